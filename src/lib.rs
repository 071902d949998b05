//! bCore Controller
//!
//! Client driver for the bCore BLE robotics controller: connects to a
//! paired bCore, discovers its characteristics and drives its motor, servo
//! and port out channels.

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use domain::function_info::FunctionInfo;
pub use domain::models::{ChannelSettings, ConnectionStatus};
pub use error::{BcoreError, Result};
pub use infrastructure::bluetooth::capability::CharacteristicKind;
pub use infrastructure::bluetooth::protocol::{
    CENTER_SERVO_POS, MAX_FUNCTION_COUNT, MAX_MOTOR_PWM, MAX_SERVO_POS, MIN_PWM_VALUE,
    STOP_MOTOR_PWM,
};
pub use infrastructure::bluetooth::{BcoreConfig, BcoreManager};
