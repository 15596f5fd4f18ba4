//! BLE central library
//! A stateful, message-oriented façade over a platform Bluetooth Low Energy
//! stack in the central role: discover peripherals, keep a set of active
//! connections, discover a configured set of services and characteristics on
//! each, and read, write and subscribe to them.
//!
//! The platform stack is reached through
//! [`PlatformDriver`](crate::core::bluetooth::PlatformDriver); a driver over the
//! `bluest` crate ships behind the `bluest-driver` feature.

// Module declarations
pub mod config;
pub mod core;
pub mod logging;
pub mod state;

pub use config::CentralConfig;
pub use crate::core::bluetooth::{
    BleCentral, CentralError, CentralEvent, ErrorKind, EventSink, PeripheralId, PeripheralRecord,
    PeripheralState, PlatformDriver, PlatformEvent, PlatformEvents, ServiceConfig,
};
