//! Bluetooth Module
//!
//! Provides BLE communication with the bCore controller.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      BcoreManager                        │
//! │  (Session state machine - public API for the application)│
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌────────────┐  ┌────────────┐  ┌──────────┐
//! │ Capability │  │    GATT    │  │ Protocol │
//! │            │  │            │  │          │
//! │ - UUID to  │  │ - Adapter  │  │ - UUIDs  │
//! │   handle   │  │ - Device   │  │ - Encode │
//! │ - R / WWR  │  │ - Handles  │  │ - Decode │
//! └────────────┘  └─────┬──────┘  └──────────┘
//!                       │
//!                       ▼
//!                 ┌────────────┐
//!                 │   WinRT    │
//!                 │ (Windows)  │
//!                 └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - bCore identifiers and payload encoding/decoding
//! - [`gatt`] - Traits over the platform BLE stack
//! - [`capability`] - Characteristic lookup built from discovery
//! - [`service`] - Session manager
//! - `winrt` - Windows implementation of [`gatt`]

pub mod capability;
pub mod gatt;
pub mod protocol;
pub mod service;

#[cfg(windows)]
pub mod winrt;

#[cfg(test)]
pub(crate) mod fake;

// Re-export main service for convenience
pub use service::{BcoreConfig, BcoreManager};
