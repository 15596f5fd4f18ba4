//! Bluetooth functionality of the central
//! This module handles all central-role operations: adapter monitoring,
//! scanning, connecting, GATT discovery and characteristic I/O.

mod adapter;
#[cfg(feature = "bluest-driver")]
mod bluest_driver;
mod connection;
mod constants;
mod dispatcher;
mod driver;
mod error;
mod index;
mod manager;
mod registry;
mod router;
mod scanner;
mod types;

// Re-export types that should be publicly accessible
pub use adapter::AdapterMonitor;
#[cfg(feature = "bluest-driver")]
pub use bluest_driver::BluestDriver;
pub use constants::*; // Re-export all constants
pub use dispatcher::{CentralEvent, EventDispatcher, EventSink};
pub use driver::{PlatformDriver, PlatformEvent, PlatformEvents};
pub use error::{CentralError, ErrorKind, Result};
pub use index::{ActivePeripheral, GattCache, PeripheralIndex};
pub use manager::BleCentral;
pub use registry::{
    CharacteristicSet, ServiceConfig, ServiceDescriptor, ServiceMap, ServiceRegistry,
    default_set, include_defaults, merge_with_defaults, parse_uuid, to_map, to_seq, validate,
};
pub use scanner::{BluetoothScanner, ScanCompletion, ScanSession};
pub use types::{
    AdapterState, CharacteristicHandle, PeripheralId, PeripheralRecord, PeripheralState,
    PeripheralTarget, PlatformHandle,
};
