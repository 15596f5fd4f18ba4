//! Core functionality of the BLE central
//! This module contains the central-role state machine and its platform seam.

pub mod bluetooth;

// Re-export commonly used types
pub use bluetooth::{BleCentral, CentralError, CentralEvent, PlatformDriver};
