//! Process-wide central
//! An optional shared instance for applications that want a single central.
//! Independent instances built with [`BleCentral::new`] work the same way.

use std::sync::OnceLock;

use log::info;

use crate::config::CentralConfig;
use crate::core::bluetooth::{BleCentral, PlatformDriver, Result};

static SHARED: OnceLock<BleCentral> = OnceLock::new();

/// Returns the shared central, creating it over `driver` on first access.
///
/// Later calls ignore their arguments and return the existing instance.
pub fn shared_or_init<D: PlatformDriver>(
    driver: impl FnOnce() -> D,
    config: &CentralConfig,
) -> Result<&'static BleCentral> {
    if let Some(central) = SHARED.get() {
        return Ok(central);
    }
    info!("Initializing shared BLE central...");
    let central = BleCentral::new(driver(), config)?;
    // A concurrent initializer may have won; its instance is the shared one.
    Ok(SHARED.get_or_init(|| central))
}

/// The shared central, if it has been initialized.
pub fn shared() -> Option<&'static BleCentral> {
    SHARED.get()
}
