//! Capability Table
//!
//! Maps the five bCore characteristics to the handles discovered on the
//! connected device, together with the operations each one supports.
//! Older bCore revisions lack some characteristics; a missing entry is a
//! normal state, not an error.

use crate::error::{BcoreError, Result};
use crate::infrastructure::bluetooth::gatt::{
    CharacteristicProperties, CharacteristicRecord, GattCharacteristic, ServiceRecord,
};
use crate::infrastructure::bluetooth::protocol;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// The characteristics a bCore exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacteristicKind {
    Battery,
    Function,
    Motor,
    Servo,
    PortOut,
}

impl CharacteristicKind {
    pub const ALL: [Self; 5] = [
        Self::Battery,
        Self::Function,
        Self::Motor,
        Self::Servo,
        Self::PortOut,
    ];

    pub fn uuid(self) -> Uuid {
        match self {
            Self::Battery => protocol::BATTERY_CHAR_UUID,
            Self::Function => protocol::FUNCTION_CHAR_UUID,
            Self::Motor => protocol::MOTOR_CHAR_UUID,
            Self::Servo => protocol::SERVO_CHAR_UUID,
            Self::PortOut => protocol::PORT_OUT_CHAR_UUID,
        }
    }

    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.uuid() == uuid)
    }

    fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for CharacteristicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Battery => "battery",
            Self::Function => "function",
            Self::Motor => "motor",
            Self::Servo => "servo",
            Self::PortOut => "port out",
        };
        f.write_str(label)
    }
}

/// One service as returned by discovery, with its characteristics
#[derive(Debug, Clone)]
pub struct DiscoveredService {
    pub service: ServiceRecord,
    pub characteristics: Vec<CharacteristicRecord>,
}

/// A discovered bCore characteristic and what it supports
#[derive(Clone)]
pub struct CapabilityEntry {
    handle: Arc<dyn GattCharacteristic>,
    pub readable: bool,
    pub writable_without_response: bool,
}

impl CapabilityEntry {
    fn new(record: &CharacteristicRecord) -> Self {
        Self {
            handle: Arc::clone(&record.handle),
            readable: record.properties.contains(CharacteristicProperties::READ),
            writable_without_response: record
                .properties
                .contains(CharacteristicProperties::WRITE_WITHOUT_RESPONSE),
        }
    }
}

impl fmt::Debug for CapabilityEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityEntry")
            .field("readable", &self.readable)
            .field("writable_without_response", &self.writable_without_response)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CapabilityTable {
    entries: [Option<CapabilityEntry>; 5],
}

impl CapabilityTable {
    /// Build the table from discovery results.
    ///
    /// Characteristics are matched by UUID whatever service carries them.
    /// Unknown services and characteristics are skipped. Fails with
    /// [`BcoreError::DiscoveryFailed`] when the device reported no services
    /// or no characteristics at all.
    pub fn from_discovery(services: &[DiscoveredService]) -> Result<Self> {
        if services.is_empty() {
            return Err(BcoreError::DiscoveryFailed(
                "device reported no services".to_string(),
            ));
        }
        if services.iter().all(|s| s.characteristics.is_empty()) {
            return Err(BcoreError::DiscoveryFailed(
                "device reported no characteristics".to_string(),
            ));
        }

        let mut table = Self::default();
        for discovered in services {
            trace!("Service {}", discovered.service.uuid);
            for record in &discovered.characteristics {
                let Some(kind) = CharacteristicKind::from_uuid(record.uuid) else {
                    trace!("Skipping unknown characteristic {}", record.uuid);
                    continue;
                };

                let slot = &mut table.entries[kind.slot()];
                if slot.is_some() {
                    warn!(
                        "Duplicate {} characteristic in service {}, keeping the first",
                        kind, discovered.service.uuid
                    );
                    continue;
                }

                debug!("Found {} characteristic ({:?})", kind, record.properties);
                *slot = Some(CapabilityEntry::new(record));
            }
        }

        Ok(table)
    }

    pub fn get(&self, kind: CharacteristicKind) -> Option<&CapabilityEntry> {
        self.entries[kind.slot()].as_ref()
    }

    pub fn contains(&self, kind: CharacteristicKind) -> bool {
        self.get(kind).is_some()
    }

    /// Handle for reading `kind`, if present and readable
    pub fn readable(&self, kind: CharacteristicKind) -> Option<Arc<dyn GattCharacteristic>> {
        self.get(kind)
            .filter(|entry| entry.readable)
            .map(|entry| Arc::clone(&entry.handle))
    }

    /// Handle for writing `kind` without response, if supported
    pub fn writable(&self, kind: CharacteristicKind) -> Option<Arc<dyn GattCharacteristic>> {
        self.get(kind)
            .filter(|entry| entry.writable_without_response)
            .map(|entry| Arc::clone(&entry.handle))
    }

    /// Kinds present on the device
    pub fn kinds(&self) -> impl Iterator<Item = CharacteristicKind> + '_ {
        CharacteristicKind::ALL
            .into_iter()
            .filter(|kind| self.contains(*kind))
    }

    pub fn len(&self) -> usize {
        self.entries.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every characteristic reference
    pub fn clear(&mut self) {
        self.entries = Default::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::fake::{FakeCharacteristic, FakeService, FakeLog};

    fn record(uuid: Uuid, properties: CharacteristicProperties) -> CharacteristicRecord {
        let log = FakeLog::new();
        CharacteristicRecord {
            uuid,
            properties,
            handle: Arc::new(FakeCharacteristic::new(uuid, log)),
        }
    }

    fn service(uuid: Uuid, characteristics: Vec<CharacteristicRecord>) -> DiscoveredService {
        DiscoveredService {
            service: ServiceRecord {
                uuid,
                handle: Arc::new(FakeService::new(uuid, Vec::new(), FakeLog::new())),
            },
            characteristics,
        }
    }

    #[test]
    fn test_kind_uuid_mapping() {
        for kind in CharacteristicKind::ALL {
            assert_eq!(CharacteristicKind::from_uuid(kind.uuid()), Some(kind));
        }
        assert_eq!(CharacteristicKind::from_uuid(protocol::SERVICE_UUID), None);
    }

    #[test]
    fn test_records_supported_operations() {
        let rw = CharacteristicProperties::READ | CharacteristicProperties::WRITE;
        let table = CapabilityTable::from_discovery(&[service(
            protocol::SERVICE_UUID,
            vec![
                record(protocol::BATTERY_CHAR_UUID, CharacteristicProperties::READ),
                record(
                    protocol::MOTOR_CHAR_UUID,
                    CharacteristicProperties::WRITE_WITHOUT_RESPONSE,
                ),
                record(protocol::SERVO_CHAR_UUID, rw),
            ],
        )])
        .unwrap();

        assert_eq!(table.len(), 3);
        assert!(table.readable(CharacteristicKind::Battery).is_some());
        assert!(table.writable(CharacteristicKind::Battery).is_none());
        assert!(table.writable(CharacteristicKind::Motor).is_some());
        assert!(table.readable(CharacteristicKind::Motor).is_none());

        // Present but only writable with response
        let servo = table.get(CharacteristicKind::Servo).unwrap();
        assert!(servo.readable);
        assert!(!servo.writable_without_response);
        assert!(table.writable(CharacteristicKind::Servo).is_none());

        assert!(!table.contains(CharacteristicKind::PortOut));
        assert_eq!(
            table.kinds().collect::<Vec<_>>(),
            vec![
                CharacteristicKind::Battery,
                CharacteristicKind::Motor,
                CharacteristicKind::Servo
            ]
        );
    }

    #[test]
    fn test_unknown_entries_ignored() {
        let other_service = Uuid::from_u128(0x0000180a_0000_1000_8000_00805f9b34fb);
        let firmware = Uuid::from_u128(0x00002a26_0000_1000_8000_00805f9b34fb);
        let table = CapabilityTable::from_discovery(&[
            service(
                other_service,
                vec![
                    record(firmware, CharacteristicProperties::READ),
                    // Known characteristics count wherever they are reported
                    record(protocol::FUNCTION_CHAR_UUID, CharacteristicProperties::READ),
                ],
            ),
            service(protocol::SERVICE_UUID, Vec::new()),
        ])
        .unwrap();

        assert_eq!(table.len(), 1);
        assert!(table.readable(CharacteristicKind::Function).is_some());
    }

    #[test]
    fn test_duplicate_keeps_first() {
        let table = CapabilityTable::from_discovery(&[service(
            protocol::SERVICE_UUID,
            vec![
                record(protocol::PORT_OUT_CHAR_UUID, CharacteristicProperties::READ),
                record(
                    protocol::PORT_OUT_CHAR_UUID,
                    CharacteristicProperties::WRITE_WITHOUT_RESPONSE,
                ),
            ],
        )])
        .unwrap();

        assert_eq!(table.len(), 1);
        assert!(table.writable(CharacteristicKind::PortOut).is_none());
    }

    #[test]
    fn test_empty_discovery_fails() {
        assert!(matches!(
            CapabilityTable::from_discovery(&[]),
            Err(BcoreError::DiscoveryFailed(_))
        ));
        assert!(matches!(
            CapabilityTable::from_discovery(&[service(protocol::SERVICE_UUID, Vec::new())]),
            Err(BcoreError::DiscoveryFailed(_))
        ));
    }

    #[test]
    fn test_clear() {
        let mut table = CapabilityTable::from_discovery(&[service(
            protocol::SERVICE_UUID,
            vec![record(protocol::BATTERY_CHAR_UUID, CharacteristicProperties::READ)],
        )])
        .unwrap();
        assert!(!table.is_empty());

        table.clear();
        assert!(table.is_empty());
        assert!(table.readable(CharacteristicKind::Battery).is_none());
    }
}
