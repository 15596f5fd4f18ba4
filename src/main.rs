use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use ble_central::core::bluetooth::BluestDriver;
use ble_central::{BleCentral, CentralConfig, CentralEvent, logging};
use log::{LevelFilter, info, warn};
use tokio::sync::oneshot;

/// Scans once with the configured defaults, lists what was found and, when a peripheral
/// id is given, connects to it and prints what it sends for a few seconds.
///
/// Usage: `ble-central [CONFIG_DIR] [PERIPHERAL_ID]`
#[tokio::main]
async fn main() -> Result<()> {
    logging::init(LevelFilter::Info);

    let mut args = std::env::args().skip(1);
    let config_dir = args.next().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    let target = args.next();

    let config = CentralConfig::load_config(&config_dir).await?;
    if config.scan_interval_ms == 0 {
        bail!("scan_interval_ms must be positive for a one-shot scan");
    }
    let central = BleCentral::new(BluestDriver::new(), &config)?;
    central.set_observer(|event: CentralEvent| match event {
        CentralEvent::DataReceived { id, data, length } => {
            info!("{} sent {} bytes: {:02x?}", id, length, data)
        }
        CentralEvent::Error { kind, detail } => warn!("{:?}: {}", kind, detail),
        event => info!("Event: {:?}", event),
    })?;
    central.setup()?;

    let mut ready = central.ready();
    tokio::time::timeout(Duration::from_secs(10), ready.wait_for(|ready| *ready))
        .await
        .context("Bluetooth adapter did not power on")??;

    let (done, found) = oneshot::channel();
    central.scan_with_defaults(move |peripherals| {
        let _ = done.send(peripherals);
    })?;
    let peripherals = found.await?;
    info!("Found {} peripherals", peripherals.len());
    for peripheral in &peripherals {
        println!(
            "{:>5} dBm  {}  {}",
            peripheral.rssi,
            peripheral.id,
            peripheral.name.as_deref().unwrap_or("<unnamed>")
        );
    }

    if let Some(id) = target {
        central.connect(id.as_str())?;
        tokio::time::sleep(Duration::from_secs(5)).await;
        if central.is_connected(&id).await? {
            central.enable_read_notifications(id.as_str())?;
            central.read(Some(&id))?;
            tokio::time::sleep(Duration::from_secs(5)).await;
        } else {
            warn!("{} did not become ready", id);
        }
    }

    central.shutdown().await?;
    Ok(())
}
