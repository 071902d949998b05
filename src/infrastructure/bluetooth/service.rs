//! bCore Session Manager
//!
//! Owns the connection state machine for one bCore, drives discovery and
//! exposes the motor, servo, port out, battery and function operations.
//!
//! ```text
//!            init()                 discovery ok
//! Disconnected ───────▶ Connecting ───────────────▶ Connected
//!      ▲                    │                          │   │
//!      │   no device /      │                link lost │   │ finalize()
//!      │   discovery failed │                          │   ▼
//!      └────────────────────┴──────────────────────────┴─ Disconnecting
//! ```

use crate::domain::function_info::FunctionInfo;
use crate::domain::models::ConnectionStatus;
use crate::domain::port_out::PortOutState;
use crate::domain::settings::Settings;
use crate::error::{BcoreError, Result};
use crate::infrastructure::bluetooth::capability::{
    CapabilityTable, CharacteristicKind, DiscoveredService,
};
use crate::infrastructure::bluetooth::gatt::{
    BleAdapter, GattCharacteristic, GattDevice, HandlerToken, ServiceRecord,
};
use crate::infrastructure::bluetooth::protocol::{self, MAX_FUNCTION_COUNT};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Timeouts applied to every request sent to the bCore
#[derive(Debug, Clone)]
pub struct BcoreConfig {
    /// Bound for device resolution and each discovery request
    pub connect_timeout: Duration,
    /// Bound for each characteristic read or write
    pub io_timeout: Duration,
}

impl Default for BcoreConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            io_timeout: Duration::from_secs(2),
        }
    }
}

impl From<&Settings> for BcoreConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            io_timeout: Duration::from_millis(settings.io_timeout_ms),
        }
    }
}

/// Handles held while connected, released together on teardown
struct Session {
    device: Arc<dyn GattDevice>,
    /// In discovery order
    services: Vec<ServiceRecord>,
    capabilities: CapabilityTable,
    link_handler: HandlerToken,
}

struct Inner {
    adapter: Arc<dyn BleAdapter>,
    device_id: Option<String>,
    config: BcoreConfig,
    status: watch::Sender<ConnectionStatus>,
    event_sender: mpsc::UnboundedSender<ConnectionStatus>,
    session: Mutex<Option<Session>>,
    port_out: Mutex<PortOutState>,
    /// Set when the link drops while still `Connecting`
    link_dropped: AtomicBool,
    /// Serializes init and finalize
    lifecycle: tokio::sync::Mutex<()>,
}

/// Driver for a single bCore
///
/// Every status transition is sent on the channel given to [`BcoreManager::new`].
/// Reads and writes require [`ConnectionStatus::Connected`] and fail with
/// [`BcoreError::NotReady`] otherwise, without touching the device.
///
/// Out-of-range channel indices and characteristics missing from the
/// connected hardware are skipped silently: a control loop keeps running
/// when a single frame cannot be applied.
pub struct BcoreManager {
    inner: Arc<Inner>,
}

impl BcoreManager {
    /// Create a manager for `device_id`. Nothing is opened until [`init`](Self::init).
    pub fn new(
        adapter: Arc<dyn BleAdapter>,
        device_id: Option<String>,
        config: BcoreConfig,
        event_sender: mpsc::UnboundedSender<ConnectionStatus>,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);

        Self {
            inner: Arc::new(Inner {
                adapter,
                device_id,
                config,
                status,
                event_sender,
                session: Mutex::new(None),
                port_out: Mutex::new(PortOutState::new()),
                link_dropped: AtomicBool::new(false),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Open the device, discover its characteristics and enter `Connected`.
    ///
    /// Failures leave the manager `Disconnected`; there is no retry.
    pub async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    /// Release every handle and enter `Disconnected`. Calling it again is a
    /// no-op.
    pub async fn finalize(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.inner.teardown();
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.status()
    }

    pub fn is_initialized(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn device_id(&self) -> Option<&str> {
        self.inner.device_id.as_deref()
    }

    /// Name reported by the device while a session is open
    pub fn device_name(&self) -> Option<String> {
        self.inner
            .lock_session()
            .as_ref()
            .and_then(|session| session.device.name())
    }

    /// Characteristics present on the connected bCore
    pub fn available_characteristics(&self) -> Vec<CharacteristicKind> {
        self.inner
            .lock_session()
            .as_ref()
            .map(|session| session.capabilities.kinds().collect())
            .unwrap_or_default()
    }

    /// Last port states sent (or about to be sent) to the device
    pub fn port_out_state(&self) -> [bool; MAX_FUNCTION_COUNT] {
        self.inner.lock_port_out().as_array()
    }

    /// Battery voltage in millivolts, `None` when this bCore has no readable
    /// battery characteristic or returned a short value.
    pub async fn read_battery(&self) -> Result<Option<u16>> {
        let value = self.inner.read_value(CharacteristicKind::Battery).await?;
        Ok(value.and_then(|bytes| protocol::decode_battery(&bytes)))
    }

    /// Channel availability, `None` when this bCore has no readable function
    /// characteristic.
    pub async fn read_function_info(&self) -> Result<Option<FunctionInfo>> {
        let value = self.inner.read_value(CharacteristicKind::Function).await?;
        Ok(value.map(|bytes| protocol::decode_function_info(&bytes)))
    }

    pub async fn write_motor_pwm(&self, idx: usize, speed: i32, flip: bool) -> Result<()> {
        self.inner.write_motor_pwm(idx, speed, flip).await
    }

    pub async fn write_servo_pos(&self, idx: usize, pos: i32, flip: bool, trim: i32) -> Result<()> {
        self.inner.write_servo_pos(idx, pos, flip, trim).await
    }

    /// Switch one port, keeping the others as last written
    pub async fn write_port_out(&self, idx: usize, on: bool) -> Result<()> {
        self.inner.write_port_out(idx, on).await
    }

    /// Set every port. Missing trailing entries switch the port off.
    pub async fn write_port_outs(&self, states: &[bool]) -> Result<()> {
        self.inner.write_port_outs(states).await
    }

    // Detached writes.
    //
    // These start the write on the Tokio runtime and return immediately, for
    // control loops that send faster than the link acknowledges. The
    // returned handle only signals completion: failures are logged at `warn`
    // and dropped. A write that starts after the manager is gone is
    // discarded. Must be called from within a Tokio runtime.

    pub fn write_motor_pwm_detached(&self, idx: usize, speed: i32, flip: bool) -> JoinHandle<()> {
        self.detach("motor", move |inner| async move {
            inner.write_motor_pwm(idx, speed, flip).await
        })
    }

    pub fn write_servo_pos_detached(
        &self,
        idx: usize,
        pos: i32,
        flip: bool,
        trim: i32,
    ) -> JoinHandle<()> {
        self.detach("servo", move |inner| async move {
            inner.write_servo_pos(idx, pos, flip, trim).await
        })
    }

    pub fn write_port_out_detached(&self, idx: usize, on: bool) -> JoinHandle<()> {
        self.detach("port out", move |inner| async move {
            inner.write_port_out(idx, on).await
        })
    }

    pub fn write_port_outs_detached(&self, states: &[bool]) -> JoinHandle<()> {
        let states = states.to_vec();
        self.detach("port out", move |inner| async move {
            inner.write_port_outs(&states).await
        })
    }

    fn detach<F, Fut>(&self, what: &'static str, op: F) -> JoinHandle<()>
    where
        F: FnOnce(Arc<Inner>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let Some(inner) = weak.upgrade() else {
                debug!("Discarding detached {} write, manager dropped", what);
                return;
            };
            if let Err(e) = op(inner).await {
                warn!("Detached {} write failed: {}", what, e);
            }
        })
    }
}

impl Drop for BcoreManager {
    fn drop(&mut self) {
        match self.inner.lifecycle.try_lock() {
            Ok(_lifecycle) => self.inner.teardown(),
            Err(_) => warn!("bCore manager dropped while its lifecycle is busy"),
        }
    }
}

/// Device and services opened by `connect` but not yet owned by a
/// [`Session`]. Dropping it while armed closes them in reverse order.
struct Acquired {
    device: Arc<dyn GattDevice>,
    services: Vec<ServiceRecord>,
    armed: bool,
}

impl Acquired {
    fn new(device: Arc<dyn GattDevice>) -> Self {
        Self {
            device,
            services: Vec::new(),
            armed: true,
        }
    }

    fn into_session(
        mut self,
        capabilities: CapabilityTable,
        link_handler: HandlerToken,
    ) -> Session {
        self.armed = false;
        Session {
            device: Arc::clone(&self.device),
            services: std::mem::take(&mut self.services),
            capabilities,
            link_handler,
        }
    }
}

impl Drop for Acquired {
    fn drop(&mut self) {
        if self.armed {
            debug!("Releasing handles from an unfinished connect");
            close_services(&self.services);
            self.device.close();
        }
    }
}

/// Resets the status if an `init` future is dropped before it finishes
struct ConnectingGuard<'a> {
    inner: &'a Inner,
    armed: bool,
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("bCore init cancelled");
            self.inner.transition(ConnectionStatus::Disconnected);
        }
    }
}

impl Inner {
    fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_port_out(&self) -> MutexGuard<'_, PortOutState> {
        self.port_out.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
        self.announce(status);
    }

    fn announce(&self, status: ConnectionStatus) {
        info!("bCore connection status: {}", status);
        // The caller may have dropped its receiver; status() still works
        let _ = self.event_sender.send(status);
    }

    async fn init(self: &Arc<Self>) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        let status = self.status();
        if status != ConnectionStatus::Disconnected {
            return Err(BcoreError::InvalidState(status));
        }

        // A lost link leaves the previous session's handles behind
        let stale = self.lock_session().take();
        if let Some(stale) = stale {
            self.release(stale);
        }

        self.link_dropped.store(false, Ordering::SeqCst);
        self.transition(ConnectionStatus::Connecting);
        let mut guard = ConnectingGuard {
            inner: self,
            armed: true,
        };

        let result = self.connect().await;
        guard.armed = false;

        let session = match result {
            Ok(session) => session,
            Err(e) => {
                warn!("bCore init failed: {}", e);
                self.transition(ConnectionStatus::Disconnected);
                return Err(e);
            }
        };

        let name = session.device.name();
        let characteristics = session.capabilities.len();
        *self.lock_session() = Some(session);

        // Checked under the status lock so a drop reported by the link
        // handler cannot slip in before the transition
        let connected = self.status.send_if_modified(|status| {
            if self.link_dropped.swap(false, Ordering::SeqCst) {
                false
            } else {
                *status = ConnectionStatus::Connected;
                true
            }
        });

        if connected {
            info!(
                "Connected to bCore {:?} ({} characteristics)",
                name, characteristics
            );
            self.announce(ConnectionStatus::Connected);
            Ok(())
        } else {
            warn!("Link to bCore dropped during discovery");
            let session = self.lock_session().take();
            if let Some(session) = session {
                self.release(session);
            }
            self.transition(ConnectionStatus::Disconnected);
            Err(BcoreError::LinkLost)
        }
    }

    async fn connect(self: &Arc<Self>) -> Result<Session> {
        let device_id = self
            .device_id
            .as_deref()
            .ok_or(BcoreError::DeviceUnavailable)?;
        info!("Connecting to bCore: {}", device_id);

        let device = match self
            .bounded(self.adapter.open_device(device_id), self.config.connect_timeout)
            .await
        {
            Ok(Some(device)) => device,
            Ok(None) => return Err(BcoreError::DeviceUnavailable),
            Err(BcoreError::Gatt(e)) => {
                warn!("Could not open bCore {}: {:#}", device_id, e);
                return Err(BcoreError::DeviceUnavailable);
            }
            Err(e) => return Err(e),
        };

        // Everything acquired from here on is released if connect fails or
        // its future is dropped
        let mut acquired = Acquired::new(device);
        let capabilities = self.discover(&mut acquired).await?;

        let weak = Arc::downgrade(self);
        let link_handler = acquired
            .device
            .on_connection_changed(Box::new(move |connected| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_link_changed(connected);
                }
            }))
            .map_err(BcoreError::Gatt)?;

        Ok(acquired.into_session(capabilities, link_handler))
    }

    /// Enumerate services and characteristics. Services are handed to
    /// `acquired` as soon as they are known.
    async fn discover(&self, acquired: &mut Acquired) -> Result<CapabilityTable> {
        let timeout = self.config.connect_timeout;
        let services = self
            .bounded(acquired.device.services(), timeout)
            .await
            .map_err(discovery_failed)?;
        debug!("Found {} services", services.len());
        acquired.services = services;

        let mut discovered = Vec::with_capacity(acquired.services.len());
        for service in &acquired.services {
            let characteristics = self
                .bounded(service.handle.characteristics(), timeout)
                .await
                .map_err(discovery_failed)?;
            discovered.push(DiscoveredService {
                service: service.clone(),
                characteristics,
            });
        }

        CapabilityTable::from_discovery(&discovered)
    }

    fn on_link_changed(&self, connected: bool) {
        if connected {
            debug!("Link reported connected");
            return;
        }

        let lost = self.status.send_if_modified(|status| match *status {
            ConnectionStatus::Connected => {
                *status = ConnectionStatus::Disconnected;
                true
            }
            ConnectionStatus::Connecting => {
                self.link_dropped.store(true, Ordering::SeqCst);
                false
            }
            _ => false,
        });

        if lost {
            warn!("Link to bCore lost");
            if let Some(session) = self.lock_session().as_mut() {
                session.capabilities.clear();
            }
            let _ = self.event_sender.send(ConnectionStatus::Disconnected);
        }
    }

    fn teardown(&self) {
        let session = self.lock_session().take();
        if session.is_none() && self.status() == ConnectionStatus::Disconnected {
            return;
        }

        self.transition(ConnectionStatus::Disconnecting);
        if let Some(session) = session {
            self.release(session);
        }
        self.transition(ConnectionStatus::Disconnected);
    }

    fn release(&self, mut session: Session) {
        session.capabilities.clear();
        close_services(&session.services);
        if let Err(e) = session.device.remove_connection_handler(session.link_handler) {
            warn!("Failed to remove connection handler: {:#}", e);
        }
        session.device.close();
        info!("Released bCore session");
    }

    /// Look up a characteristic for `kind`. `Ok(None)` when the connected
    /// bCore does not offer the operation.
    fn characteristic(
        &self,
        kind: CharacteristicKind,
        write: bool,
    ) -> Result<Option<Arc<dyn GattCharacteristic>>> {
        self.ensure_ready()?;
        let session = self.lock_session();
        let capabilities = session.as_ref().map(|s| &s.capabilities);
        Ok(capabilities.and_then(|table| {
            if write {
                table.writable(kind)
            } else {
                table.readable(kind)
            }
        }))
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.status() {
            ConnectionStatus::Connected => Ok(()),
            status => Err(BcoreError::NotReady(status)),
        }
    }

    async fn read_value(&self, kind: CharacteristicKind) -> Result<Option<Vec<u8>>> {
        let Some(characteristic) = self.characteristic(kind, false)? else {
            debug!("No readable {} characteristic on this bCore", kind);
            return Ok(None);
        };

        let value = self
            .guarded(characteristic.read(), self.config.io_timeout)
            .await?;
        trace!("Read {}: {:02X?}", kind, value);
        Ok(Some(value))
    }

    async fn write_value(&self, kind: CharacteristicKind, data: &[u8]) -> Result<()> {
        let Some(characteristic) = self.characteristic(kind, true)? else {
            debug!("No writable {} characteristic on this bCore", kind);
            return Ok(());
        };

        trace!("Write {}: {:02X?}", kind, data);
        self.guarded(
            characteristic.write_without_response(data),
            self.config.io_timeout,
        )
        .await
    }

    async fn write_motor_pwm(&self, idx: usize, speed: i32, flip: bool) -> Result<()> {
        self.ensure_ready()?;
        let Some(idx) = channel_index(idx) else {
            debug!("Ignoring motor write to invalid index {}", idx);
            return Ok(());
        };

        let data = protocol::encode_motor_speed(idx, speed, flip);
        self.write_value(CharacteristicKind::Motor, &data).await
    }

    async fn write_servo_pos(&self, idx: usize, pos: i32, flip: bool, trim: i32) -> Result<()> {
        self.ensure_ready()?;
        let Some(idx) = channel_index(idx) else {
            debug!("Ignoring servo write to invalid index {}", idx);
            return Ok(());
        };

        let data = protocol::encode_servo_pos(idx, pos, flip, trim);
        self.write_value(CharacteristicKind::Servo, &data).await
    }

    async fn write_port_out(&self, idx: usize, on: bool) -> Result<()> {
        self.ensure_ready()?;
        let mask = {
            let mut state = self.lock_port_out();
            if !state.set(idx, on) {
                debug!("Ignoring port out write to invalid index {}", idx);
                return Ok(());
            }
            state.to_mask()
        };

        self.write_value(CharacteristicKind::PortOut, &mask).await
    }

    async fn write_port_outs(&self, states: &[bool]) -> Result<()> {
        self.ensure_ready()?;
        let mask = {
            let mut state = self.lock_port_out();
            state.replace(states);
            state.to_mask()
        };

        self.write_value(CharacteristicKind::PortOut, &mask).await
    }

    /// Bound a platform request by `timeout`
    async fn bounded<T, F>(&self, request: F, timeout: Duration) -> Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(timeout, request).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(BcoreError::Gatt(e)),
            Err(_) => Err(BcoreError::PeripheralUnresponsive(timeout)),
        }
    }

    /// Bound a request by `timeout` and abandon it as soon as the session
    /// leaves `Connected`
    async fn guarded<T, F>(&self, request: F, timeout: Duration) -> Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let status = self.status.subscribe();
        tokio::select! {
            result = self.bounded(request, timeout) => result,
            _ = link_down(status) => Err(BcoreError::LinkLost),
        }
    }
}

/// Resolves once the status is anything but `Connected`
async fn link_down(mut status: watch::Receiver<ConnectionStatus>) {
    loop {
        let current = *status.borrow_and_update();
        if current != ConnectionStatus::Connected {
            return;
        }
        if status.changed().await.is_err() {
            return;
        }
    }
}

fn channel_index(idx: usize) -> Option<u8> {
    if idx < MAX_FUNCTION_COUNT {
        u8::try_from(idx).ok()
    } else {
        None
    }
}

fn close_services(services: &[ServiceRecord]) {
    for service in services.iter().rev() {
        trace!("Closing service {}", service.uuid);
        service.handle.close();
    }
}

fn discovery_failed(e: BcoreError) -> BcoreError {
    match e {
        BcoreError::Gatt(e) => BcoreError::DiscoveryFailed(format!("{:#}", e)),
        other => other,
    }
}
