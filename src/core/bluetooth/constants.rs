//! Constants used throughout the crate
//! This module contains the built-in service table, link-layer sizes
//! and default timings.

use uuid::Uuid;

/// Base UUID that 16- and 32-bit Bluetooth UUIDs expand into.
pub const BLUETOOTH_BASE_UUID: Uuid = Uuid::from_u128(0x00000000_0000_1000_8000_00805f9b34fb);

/// RedBearLab BLE shield / BLE Mini serial service
pub const UUID_REDBEAR_SERVICE: Uuid = Uuid::from_u128(0x713d0000_503e_4c75_ba94_3148f18d941e);
/// RedBearLab TX characteristic (peripheral to central)
pub const UUID_REDBEAR_TX_CHAR: Uuid = Uuid::from_u128(0x713d0002_503e_4c75_ba94_3148f18d941e);
/// RedBearLab RX characteristic (central to peripheral)
pub const UUID_REDBEAR_RX_CHAR: Uuid = Uuid::from_u128(0x713d0003_503e_4c75_ba94_3148f18d941e);

/// Nordic UART service
pub const UUID_NORDIC_UART_SERVICE: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);
/// Nordic UART RX characteristic (central writes)
pub const UUID_NORDIC_UART_RX_CHAR: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);
/// Nordic UART TX characteristic (peripheral notifies)
pub const UUID_NORDIC_UART_TX_CHAR: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

/// HM-10 style serial modules (0xFFE0 service, 0xFFE1 data characteristic)
pub const UUID_HM10_SERVICE: Uuid = Uuid::from_u128(0x0000ffe0_0000_1000_8000_00805f9b34fb);
pub const UUID_HM10_DATA_CHAR: Uuid = Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb);

/// Default ATT MTU before any exchange
pub const DEFAULT_ATT_MTU: usize = 23;

/// ATT opcode and handle overhead of a write command
pub const ATT_WRITE_HEADER_LEN: usize = 3;

/// Default scan interval in milliseconds
pub const DEFAULT_SCAN_INTERVAL_MS: u64 = 3000;

/// Name of the persisted config file
pub const CONFIG_FILE_NAME: &str = "central_config.json";
