//! Central configuration
//! Persisted settings of the central, stored as JSON.

use std::path::Path;

use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::core::bluetooth::{CONFIG_FILE_NAME, DEFAULT_SCAN_INTERVAL_MS, ServiceConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CentralConfig {
    /// Services and characteristics to discover on connected peripherals.
    pub services: Vec<ServiceConfig>,

    /// Merge the built-in service table into `services` at startup.
    pub include_default_services: bool,

    /// Interval of `scan_with_defaults`, in milliseconds. 0 scans until stopped.
    pub scan_interval_ms: u64,

    /// Peripheral count that ends a `scan_with_defaults` session early. 0 disables it.
    pub early_stop_count: usize,

    /// Advertisements weaker than this (dBm) are ignored.
    pub min_rssi: Option<i16>,

    /// Ask the platform to report only peripherals advertising a registered service.
    pub scan_for_registry_services: bool,

    /// Subscribe to notify characteristics as soon as a peripheral is ready.
    pub auto_enable_notifications: bool,
}

impl Default for CentralConfig {
    fn default() -> Self {
        CentralConfig {
            services: Vec::new(),
            include_default_services: true,
            scan_interval_ms: DEFAULT_SCAN_INTERVAL_MS,
            early_stop_count: 0,
            min_rssi: None,
            scan_for_registry_services: false,
            auto_enable_notifications: false,
        }
    }
}

/// Creates `path` and its parents if missing.
async fn ensure_directory_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        if let Err(e) = fs::create_dir_all(path).await {
            error!("Failed to create directory at {:?}: {}", path, e);
            return Err(e.into());
        }
        info!("Created directory at: {:?}", path);
    }
    Ok(())
}

impl CentralConfig {
    /// Loads the config from `config_dir`, falling back to defaults when the file is absent.
    pub async fn load_config(config_dir: &Path) -> Result<Self> {
        let file_path = config_dir.join(CONFIG_FILE_NAME);
        let file_path_str = file_path.to_string_lossy().into_owned();

        if !file_path.exists() {
            warn!(
                "Config file not found at {:?}, using default.",
                file_path_str
            );
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(&file_path).await?;
        let config: Self = serde_json::from_str(&config_json)?;

        info!("Config loaded from {:?}", file_path_str);
        Ok(config)
    }

    /// Saves the config into `config_dir`, creating the directory if needed.
    pub async fn save_config(&self, config_dir: &Path) -> Result<()> {
        ensure_directory_exists(config_dir).await?;

        let file_path = config_dir.join(CONFIG_FILE_NAME);
        let file_path_str = file_path.to_string_lossy().into_owned();

        let config_json = match serde_json::to_string_pretty(&self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize central config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(&file_path, config_json).await?;

        info!("Central config saved to {:?}.", file_path_str);
        Ok(())
    }
}
