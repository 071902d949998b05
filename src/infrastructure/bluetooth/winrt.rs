//! WinRT Backend
//!
//! Implements the GATT boundary on top of `Windows.Devices.Bluetooth`.

use crate::infrastructure::bluetooth::gatt::{
    BleAdapter, CharacteristicProperties, CharacteristicRecord, ConnectionHandler,
    GattCharacteristic, GattDevice, GattService, HandlerToken, ServiceRecord,
};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use windows::core::{GUID, HSTRING};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic as WinGattCharacteristic, GattCommunicationStatus, GattDeviceService,
    GattSession, GattSessionStatus, GattWriteOption,
};
use windows::Devices::Bluetooth::{BluetoothCacheMode, BluetoothConnectionStatus, BluetoothLEDevice};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, DataWriter};

fn to_uuid(guid: GUID) -> Uuid {
    Uuid::from_u128(guid.to_u128())
}

/// Opens bCore devices by their WinRT device id
#[derive(Debug, Default)]
pub struct WinrtAdapter;

impl WinrtAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BleAdapter for WinrtAdapter {
    async fn open_device(&self, device_id: &str) -> Result<Option<Arc<dyn GattDevice>>> {
        let device = match BluetoothLEDevice::FromIdAsync(&HSTRING::from(device_id))?.await {
            Ok(device) => device,
            // A null result means the id does not resolve to a device
            Err(e) if e.code().is_ok() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        info!("Device opened: {:?}", device.Name()?);

        // Let Windows drop the link once the driver releases its handles
        let session = GattSession::FromDeviceIdAsync(&device.BluetoothDeviceId()?)?.await?;
        session.SetMaintainConnection(false)?;

        Ok(Some(Arc::new(WinrtDevice { device, session })))
    }
}

struct WinrtDevice {
    device: BluetoothLEDevice,
    session: GattSession,
}

#[async_trait]
impl GattDevice for WinrtDevice {
    fn name(&self) -> Option<String> {
        self.device.Name().ok().map(|name| name.to_string())
    }

    async fn services(&self) -> Result<Vec<ServiceRecord>> {
        let result = self
            .device
            .GetGattServicesWithCacheModeAsync(BluetoothCacheMode::Cached)?
            .await?;
        if result.Status()? != GattCommunicationStatus::Success {
            anyhow::bail!("Failed to get GATT services: {:?}", result.Status()?);
        }

        let services = result.Services()?;
        let mut records = Vec::with_capacity(services.Size()? as usize);
        for i in 0..services.Size()? {
            let service = services.GetAt(i)?;
            let uuid = to_uuid(service.Uuid()?);
            debug!("Service {}", uuid);
            records.push(ServiceRecord {
                uuid,
                handle: Arc::new(WinrtService { service }),
            });
        }
        Ok(records)
    }

    fn on_connection_changed(&self, handler: ConnectionHandler) -> Result<HandlerToken> {
        let token = self.device.ConnectionStatusChanged(&TypedEventHandler::new(
            move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
                if let Some(dev) = dev.as_ref() {
                    let status = dev.ConnectionStatus()?;
                    handler(status == BluetoothConnectionStatus::Connected);
                }
                Ok(())
            },
        ))?;
        Ok(HandlerToken(token))
    }

    fn remove_connection_handler(&self, token: HandlerToken) -> Result<()> {
        self.device.RemoveConnectionStatusChanged(token.0)?;
        Ok(())
    }

    fn close(&self) {
        if let Err(e) = self.session.Close() {
            warn!("Failed to close GATT session: {}", e);
        }
        if let Err(e) = self.device.Close() {
            warn!("Failed to close device: {}", e);
        }
    }
}

struct WinrtService {
    service: GattDeviceService,
}

#[async_trait]
impl GattService for WinrtService {
    async fn characteristics(&self) -> Result<Vec<CharacteristicRecord>> {
        let result = self.service.GetCharacteristicsAsync()?.await?;
        if result.Status()? != GattCommunicationStatus::Success {
            anyhow::bail!("Failed to get characteristics: {:?}", result.Status()?);
        }

        let characteristics = result.Characteristics()?;
        let mut records = Vec::with_capacity(characteristics.Size()? as usize);
        for i in 0..characteristics.Size()? {
            let characteristic = characteristics.GetAt(i)?;
            let props = characteristic.CharacteristicProperties()?;
            records.push(CharacteristicRecord {
                uuid: to_uuid(characteristic.Uuid()?),
                // WinRT uses the Bluetooth property bit values
                properties: CharacteristicProperties::from_bits((props.0 & 0xff) as u8),
                handle: Arc::new(WinrtCharacteristic { characteristic }),
            });
        }
        Ok(records)
    }

    fn close(&self) {
        if let Ok(session) = self.service.Session() {
            if session.SessionStatus().ok() == Some(GattSessionStatus::Active) {
                let _ = session.Close();
            }
        }
        if let Err(e) = self.service.Close() {
            warn!("Failed to close service: {}", e);
        }
    }
}

struct WinrtCharacteristic {
    characteristic: WinGattCharacteristic,
}

#[async_trait]
impl GattCharacteristic for WinrtCharacteristic {
    async fn read(&self) -> Result<Vec<u8>> {
        let result = self
            .characteristic
            .ReadValueWithCacheModeAsync(BluetoothCacheMode::Uncached)?
            .await?;
        if result.Status()? != GattCommunicationStatus::Success {
            anyhow::bail!("Read failed: {:?}", result.Status()?);
        }

        let reader = DataReader::FromBuffer(&result.Value()?)?;
        let mut bytes = vec![0u8; reader.UnconsumedBufferLength()? as usize];
        reader.ReadBytes(&mut bytes)?;
        Ok(bytes)
    }

    async fn write_without_response(&self, data: &[u8]) -> Result<()> {
        let writer = DataWriter::new()?;
        writer.WriteBytes(data)?;
        let buffer = writer.DetachBuffer()?;

        let status = self
            .characteristic
            .WriteValueWithOptionAsync(&buffer, GattWriteOption::WriteWithoutResponse)?
            .await?;
        if status != GattCommunicationStatus::Success {
            anyhow::bail!("Write failed: {:?}", status);
        }
        Ok(())
    }
}
