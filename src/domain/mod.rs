//! Domain Module
//!
//! Plain values shared by the driver and the application: connection state,
//! decoded function info, port out state and persisted settings.

pub mod function_info;
pub mod models;
pub mod port_out;
pub mod settings;
