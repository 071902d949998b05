//! bCore Protocol
//!
//! This module contains the protocol definitions for communicating with
//! the bCore controller: GATT identifiers, channel limits and the
//! encoders/decoders for every characteristic payload.

use crate::domain::function_info::FunctionInfo;
use tracing::trace;
use uuid::Uuid;

/// bCore BLE Service UUID
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x389caaf0_843f_4d3b_959d_c954cce14655);

/// Battery voltage characteristic (read)
pub const BATTERY_CHAR_UUID: Uuid = Uuid::from_u128(0x389caaf1_843f_4d3b_959d_c954cce14655);

/// Motor PWM characteristic (write without response)
pub const MOTOR_CHAR_UUID: Uuid = Uuid::from_u128(0x389caaf2_843f_4d3b_959d_c954cce14655);

/// Port out characteristic (write without response)
pub const PORT_OUT_CHAR_UUID: Uuid = Uuid::from_u128(0x389caaf3_843f_4d3b_959d_c954cce14655);

/// Servo position characteristic (write without response)
pub const SERVO_CHAR_UUID: Uuid = Uuid::from_u128(0x389caaf4_843f_4d3b_959d_c954cce14655);

/// Function info characteristic (read)
pub const FUNCTION_CHAR_UUID: Uuid = Uuid::from_u128(0x389caaf5_843f_4d3b_959d_c954cce14655);

/// Number of channels of each kind (motor, servo, port out)
pub const MAX_FUNCTION_COUNT: usize = 4;

/// Lower bound shared by motor PWM and servo position values
pub const MIN_PWM_VALUE: i32 = 0x00;

/// Motor PWM full forward
pub const MAX_MOTOR_PWM: i32 = 0xff;

/// Motor PWM stop
pub const STOP_MOTOR_PWM: i32 = 0x80;

/// Servo position upper bound
pub const MAX_SERVO_POS: i32 = 0xff;

/// Servo position center
pub const CENTER_SERVO_POS: i32 = 0x80;

/// Build the `[idx, value]` payload for the motor characteristic.
///
/// Flip mirrors the speed around the PWM range before clamping.
pub fn encode_motor_speed(idx: u8, speed: i32, flip: bool) -> [u8; 2] {
    let speed = if flip { MAX_MOTOR_PWM.saturating_sub(speed) } else { speed };
    let value = speed.clamp(MIN_PWM_VALUE, MAX_MOTOR_PWM);

    [idx, (value & 0xff) as u8]
}

/// Build the `[idx, value]` payload for the servo characteristic.
///
/// Trim is added first, then flip, then the result is clamped. A flipped
/// servo therefore moves its trim offset in the mirrored direction.
pub fn encode_servo_pos(idx: u8, pos: i32, flip: bool, trim: i32) -> [u8; 2] {
    let pos = pos.saturating_add(trim);
    let pos = if flip { MAX_SERVO_POS.saturating_sub(pos) } else { pos };
    let value = pos.clamp(MIN_PWM_VALUE, MAX_SERVO_POS);

    [idx, (value & 0xff) as u8]
}

/// Pack port states into the single-byte port out mask.
///
/// Entries past [`MAX_FUNCTION_COUNT`] are ignored.
pub fn encode_port_out_mask(states: &[bool]) -> [u8; 1] {
    let mask = states
        .iter()
        .take(MAX_FUNCTION_COUNT)
        .enumerate()
        .filter(|(_, on)| **on)
        .fold(0u8, |mask, (i, _)| mask | (0x01 << i));

    [mask]
}

/// Decode the battery characteristic into millivolts.
///
/// # Data Structure
///
/// ```text
/// [0] : voltage low byte
/// [1] : voltage high byte
/// ```
///
/// Returns `None` when fewer than two bytes were read; the peripheral never
/// reports 0 mV while powered, so a short payload is "unknown".
pub fn decode_battery(bytes: &[u8]) -> Option<u16> {
    match bytes {
        [lo, hi, ..] => {
            trace!("Battery payload: {:02X?}", bytes);
            Some(u16::from_le_bytes([*lo, *hi]))
        }
        _ => None,
    }
}

/// Decode the function characteristic into a [`FunctionInfo`].
///
/// # Data Structure
///
/// ```text
/// [0] : bits 0-3 motor port mask
/// [1] : bits 0-3 servo port mask
///       bits 4-7 port out mask
/// ```
pub fn decode_function_info(bytes: &[u8]) -> FunctionInfo {
    trace!("Function payload: {:02X?}", bytes);
    FunctionInfo::from_bytes(bytes)
}
