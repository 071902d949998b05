use anyhow::Context;
use bcore_controller_rust::domain::settings::SettingsService;
use bcore_controller_rust::infrastructure::bluetooth::gatt::BleAdapter;
use bcore_controller_rust::infrastructure::logging;
use bcore_controller_rust::{
    BcoreConfig, BcoreManager, ConnectionStatus, CENTER_SERVO_POS, STOP_MOTOR_PWM,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[cfg(windows)]
fn platform_adapter() -> anyhow::Result<Arc<dyn BleAdapter>> {
    use bcore_controller_rust::infrastructure::bluetooth::winrt::WinrtAdapter;
    Ok(Arc::new(WinrtAdapter::new()))
}

#[cfg(not(windows))]
fn platform_adapter() -> anyhow::Result<Arc<dyn BleAdapter>> {
    anyhow::bail!("No BLE backend for this platform")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut settings_service = SettingsService::new()?;

    let _logging_guard = logging::init_logger(&settings_service.get().log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!("Starting bCore Controller");

    let device_id = std::env::args()
        .nth(1)
        .or_else(|| settings_service.get().last_device_id.clone())
        .context("Usage: bcore_controller_rust <device-id>")?;

    let settings = settings_service.get().clone();
    let (status_tx, mut status_rx) = mpsc::unbounded_channel();
    let manager = BcoreManager::new(
        platform_adapter()?,
        Some(device_id.clone()),
        BcoreConfig::from(&settings),
        status_tx,
    );

    tokio::spawn(async move {
        while let Some(status) = status_rx.recv().await {
            println!("status: {}", status);
            if status == ConnectionStatus::Disconnected {
                info!("bCore disconnected");
            }
        }
    });

    manager.init().await?;
    if let Err(e) = settings_service.record_connected_device(&device_id) {
        warn!("Failed to save settings: {}", e);
    }

    println!("device: {}", manager.device_name().unwrap_or_default());
    match manager.read_battery().await {
        Ok(Some(mv)) => println!("battery: {} mV", mv),
        Ok(None) => println!("battery: unknown"),
        Err(e) => error!("Battery read failed: {}", e),
    }

    let functions = manager.read_function_info().await?.unwrap_or_default();
    println!(
        "motors: {:?}, servos: {:?}, port outs: {:?}",
        functions.motor_ports().collect::<Vec<_>>(),
        functions.servo_ports().collect::<Vec<_>>(),
        functions.port_out_ports().collect::<Vec<_>>()
    );

    // Put every present channel in its resting position
    let channels = &settings.channels;
    for idx in functions.motor_ports() {
        manager
            .write_motor_pwm(idx, STOP_MOTOR_PWM, channels.motor_flip(idx))
            .await?;
    }
    for idx in functions.servo_ports() {
        manager
            .write_servo_pos(
                idx,
                CENTER_SERVO_POS,
                channels.servo_flip(idx),
                channels.servo_trim(idx),
            )
            .await?;
    }
    manager.write_port_outs(&[]).await?;

    manager.finalize().await;
    Ok(())
}
