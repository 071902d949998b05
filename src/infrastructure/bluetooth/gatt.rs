//! GATT Boundary
//!
//! Traits the session manager uses to reach the platform BLE stack. The
//! platform owns the radio, the connection and GATT discovery; the driver
//! only consumes resolved devices, discovered services and characteristic
//! handles through these traits.

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;
use uuid::Uuid;

/// GATT characteristic property flags, using the Bluetooth Core bit values
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CharacteristicProperties(u8);

impl CharacteristicProperties {
    pub const READ: Self = Self(0x02);
    pub const WRITE_WITHOUT_RESPONSE: Self = Self(0x04);
    pub const WRITE: Self = Self(0x08);
    pub const NOTIFY: Self = Self(0x10);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CharacteristicProperties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for CharacteristicProperties {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for CharacteristicProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::READ, "READ"),
            (Self::WRITE_WITHOUT_RESPONSE, "WRITE_WITHOUT_RESPONSE"),
            (Self::WRITE, "WRITE"),
            (Self::NOTIFY, "NOTIFY"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "CharacteristicProperties({})", set.join(" | "))
    }
}

/// Callback invoked by the platform when the link state changes.
/// The argument is `true` while the device is connected.
pub type ConnectionHandler = Box<dyn Fn(bool) + Send + Sync>;

/// Registration returned by [`GattDevice::on_connection_changed`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerToken(pub i64);

/// Entry point of the platform BLE stack
#[async_trait]
pub trait BleAdapter: Send + Sync {
    /// Resolve a device id to an open device. `Ok(None)` when the platform
    /// knows no such device.
    async fn open_device(&self, device_id: &str) -> Result<Option<Arc<dyn GattDevice>>>;
}

/// A resolved BLE device
#[async_trait]
pub trait GattDevice: Send + Sync {
    fn name(&self) -> Option<String>;

    /// Enumerate the primary services, in the order the platform reports them
    async fn services(&self) -> Result<Vec<ServiceRecord>>;

    fn on_connection_changed(&self, handler: ConnectionHandler) -> Result<HandlerToken>;

    fn remove_connection_handler(&self, token: HandlerToken) -> Result<()>;

    /// Release the device. Called exactly once per opened device.
    fn close(&self);
}

/// A discovered GATT service
#[async_trait]
pub trait GattService: Send + Sync {
    async fn characteristics(&self) -> Result<Vec<CharacteristicRecord>>;

    /// Release the service and its session. Called exactly once.
    fn close(&self);
}

/// A discovered GATT characteristic
#[async_trait]
pub trait GattCharacteristic: Send + Sync {
    async fn read(&self) -> Result<Vec<u8>>;

    async fn write_without_response(&self, data: &[u8]) -> Result<()>;
}

/// Service reported by [`GattDevice::services`]
#[derive(Clone)]
pub struct ServiceRecord {
    pub uuid: Uuid,
    pub handle: Arc<dyn GattService>,
}

impl fmt::Debug for ServiceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRecord")
            .field("uuid", &self.uuid)
            .finish_non_exhaustive()
    }
}

/// Characteristic reported by [`GattService::characteristics`]
#[derive(Clone)]
pub struct CharacteristicRecord {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
    pub handle: Arc<dyn GattCharacteristic>,
}

impl fmt::Debug for CharacteristicRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CharacteristicRecord")
            .field("uuid", &self.uuid)
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_flags() {
        let props = CharacteristicProperties::READ | CharacteristicProperties::NOTIFY;
        assert!(props.contains(CharacteristicProperties::READ));
        assert!(!props.contains(CharacteristicProperties::WRITE_WITHOUT_RESPONSE));
        assert!(props.contains(CharacteristicProperties::empty()));
        assert_eq!(props.bits(), 0x12);

        let mut props = CharacteristicProperties::WRITE;
        props |= CharacteristicProperties::WRITE_WITHOUT_RESPONSE;
        assert_eq!(props, CharacteristicProperties::from_bits(0x0c));
        assert_eq!(
            format!("{:?}", props),
            "CharacteristicProperties(WRITE_WITHOUT_RESPONSE | WRITE)"
        );
    }
}
