//! In-memory GATT backend used by the driver tests.
//!
//! Every handle created from one [`FakeLog`] records into it, so a test can
//! inspect the writes that reached the "wire", which services were closed
//! and whether a connection handler is registered.

use crate::infrastructure::bluetooth::gatt::{
    BleAdapter, CharacteristicProperties, CharacteristicRecord, ConnectionHandler, GattCharacteristic,
    GattDevice, GattService, HandlerToken, ServiceRecord,
};
use crate::infrastructure::bluetooth::protocol;
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const GENERIC_ACCESS_UUID: Uuid = Uuid::from_u128(0x00001800_0000_1000_8000_00805f9b34fb);
pub const DEVICE_NAME_UUID: Uuid = Uuid::from_u128(0x00002a00_0000_1000_8000_00805f9b34fb);

#[derive(Default)]
pub struct FakeLog {
    writes: Mutex<Vec<(Uuid, Vec<u8>)>>,
    reads: Mutex<Vec<Uuid>>,
    values: Mutex<HashMap<Uuid, Vec<u8>>>,
    closed_services: Mutex<Vec<Uuid>>,
    device_closes: AtomicUsize,
    handler: Mutex<Option<ConnectionHandler>>,
    handler_registrations: AtomicUsize,
    handler_removals: AtomicUsize,
    stalled: AtomicBool,
    failing: AtomicBool,
    failing_discovery: AtomicBool,
    stalled_services: AtomicBool,
    stalled_characteristics: AtomicBool,
    drop_link_on_register: AtomicBool,
}

impl FakeLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn writes(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn writes_to(&self, uuid: Uuid) -> Vec<Vec<u8>> {
        self.writes()
            .into_iter()
            .filter(|(target, _)| *target == uuid)
            .map(|(_, data)| data)
            .collect()
    }

    pub fn read_count(&self) -> usize {
        self.reads.lock().unwrap().len()
    }

    pub fn set_value(&self, uuid: Uuid, value: &[u8]) {
        self.values.lock().unwrap().insert(uuid, value.to_vec());
    }

    /// Make every read/write hang until the caller gives up
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_failing_discovery(&self, failing: bool) {
        self.failing_discovery.store(failing, Ordering::SeqCst);
    }

    /// Make service enumeration hang
    pub fn set_stalled_services(&self, stalled: bool) {
        self.stalled_services.store(stalled, Ordering::SeqCst);
    }

    /// Make characteristic enumeration hang
    pub fn set_stalled_characteristics(&self, stalled: bool) {
        self.stalled_characteristics.store(stalled, Ordering::SeqCst);
    }

    /// Report the link as lost as soon as a connection handler is registered
    pub fn set_drop_link_on_register(&self, drop_link: bool) {
        self.drop_link_on_register.store(drop_link, Ordering::SeqCst);
    }

    pub fn closed_services(&self) -> Vec<Uuid> {
        self.closed_services.lock().unwrap().clone()
    }

    pub fn device_closes(&self) -> usize {
        self.device_closes.load(Ordering::SeqCst)
    }

    pub fn has_handler(&self) -> bool {
        self.handler.lock().unwrap().is_some()
    }

    pub fn handler_registrations(&self) -> usize {
        self.handler_registrations.load(Ordering::SeqCst)
    }

    pub fn handler_removals(&self) -> usize {
        self.handler_removals.load(Ordering::SeqCst)
    }

    /// Report a link state change the way the platform would
    pub fn notify_link(&self, connected: bool) {
        if let Some(handler) = self.handler.lock().unwrap().as_ref() {
            handler(connected);
        }
    }

    async fn gate(&self) -> Result<()> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            bail!("GATT communication status: Unreachable");
        }
        Ok(())
    }
}

pub struct FakeCharacteristic {
    uuid: Uuid,
    log: Arc<FakeLog>,
}

impl FakeCharacteristic {
    pub fn new(uuid: Uuid, log: Arc<FakeLog>) -> Self {
        Self { uuid, log }
    }
}

#[async_trait]
impl GattCharacteristic for FakeCharacteristic {
    async fn read(&self) -> Result<Vec<u8>> {
        self.log.gate().await?;
        self.log.reads.lock().unwrap().push(self.uuid);
        let values = self.log.values.lock().unwrap();
        Ok(values.get(&self.uuid).cloned().unwrap_or_default())
    }

    async fn write_without_response(&self, data: &[u8]) -> Result<()> {
        self.log.gate().await?;
        self.log
            .writes
            .lock()
            .unwrap()
            .push((self.uuid, data.to_vec()));
        Ok(())
    }
}

pub struct FakeService {
    uuid: Uuid,
    characteristics: Vec<(Uuid, CharacteristicProperties)>,
    log: Arc<FakeLog>,
}

impl FakeService {
    pub fn new(
        uuid: Uuid,
        characteristics: Vec<(Uuid, CharacteristicProperties)>,
        log: Arc<FakeLog>,
    ) -> Self {
        Self {
            uuid,
            characteristics,
            log,
        }
    }
}

#[async_trait]
impl GattService for FakeService {
    async fn characteristics(&self) -> Result<Vec<CharacteristicRecord>> {
        if self.log.stalled_characteristics.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.log.failing_discovery.load(Ordering::SeqCst) {
            bail!("GetCharacteristicsAsync failed");
        }
        Ok(self
            .characteristics
            .iter()
            .map(|(uuid, properties)| CharacteristicRecord {
                uuid: *uuid,
                properties: *properties,
                handle: Arc::new(FakeCharacteristic::new(*uuid, Arc::clone(&self.log))),
            })
            .collect())
    }

    fn close(&self) {
        self.log.closed_services.lock().unwrap().push(self.uuid);
    }
}

pub struct FakeDevice {
    name: String,
    services: Vec<(Uuid, Vec<(Uuid, CharacteristicProperties)>)>,
    log: Arc<FakeLog>,
}

impl FakeDevice {
    pub fn new(
        name: &str,
        services: Vec<(Uuid, Vec<(Uuid, CharacteristicProperties)>)>,
        log: Arc<FakeLog>,
    ) -> Self {
        Self {
            name: name.to_string(),
            services,
            log,
        }
    }

    /// A bCore exposing the generic access service and every bCore
    /// characteristic
    pub fn bcore(log: Arc<FakeLog>) -> Self {
        let write = CharacteristicProperties::WRITE | CharacteristicProperties::WRITE_WITHOUT_RESPONSE;
        Self::new(
            "bCore_DEMO",
            vec![
                (
                    GENERIC_ACCESS_UUID,
                    vec![(DEVICE_NAME_UUID, CharacteristicProperties::READ)],
                ),
                (
                    protocol::SERVICE_UUID,
                    vec![
                        (protocol::BATTERY_CHAR_UUID, CharacteristicProperties::READ),
                        (protocol::MOTOR_CHAR_UUID, write),
                        (protocol::PORT_OUT_CHAR_UUID, write),
                        (protocol::SERVO_CHAR_UUID, write),
                        (protocol::FUNCTION_CHAR_UUID, CharacteristicProperties::READ),
                    ],
                ),
            ],
            log,
        )
    }
}

#[async_trait]
impl GattDevice for FakeDevice {
    fn name(&self) -> Option<String> {
        Some(self.name.clone())
    }

    async fn services(&self) -> Result<Vec<ServiceRecord>> {
        if self.log.stalled_services.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(self
            .services
            .iter()
            .map(|(uuid, characteristics)| ServiceRecord {
                uuid: *uuid,
                handle: Arc::new(FakeService::new(
                    *uuid,
                    characteristics.clone(),
                    Arc::clone(&self.log),
                )),
            })
            .collect())
    }

    fn on_connection_changed(&self, handler: ConnectionHandler) -> Result<HandlerToken> {
        let registration = self.log.handler_registrations.fetch_add(1, Ordering::SeqCst);
        if self.log.drop_link_on_register.load(Ordering::SeqCst) {
            handler(false);
        }
        *self.log.handler.lock().unwrap() = Some(handler);
        Ok(HandlerToken(registration as i64))
    }

    fn remove_connection_handler(&self, _token: HandlerToken) -> Result<()> {
        self.log.handler_removals.fetch_add(1, Ordering::SeqCst);
        self.log.handler.lock().unwrap().take();
        Ok(())
    }

    fn close(&self) {
        self.log.device_closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeAdapter {
    devices: HashMap<String, Arc<FakeDevice>>,
    open_delay: Option<Duration>,
}

impl FakeAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device_id: &str, device: FakeDevice) -> Self {
        self.devices.insert(device_id.to_string(), Arc::new(device));
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }
}

#[async_trait]
impl BleAdapter for FakeAdapter {
    async fn open_device(&self, device_id: &str) -> Result<Option<Arc<dyn GattDevice>>> {
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .devices
            .get(device_id)
            .map(|device| Arc::clone(device) as Arc<dyn GattDevice>))
    }
}
