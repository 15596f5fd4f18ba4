//! Error taxonomy of the central.
//! Validation errors are returned from the call that caused them; everything else is
//! reported to the observer as an `Error` event carrying the [`ErrorKind`].

use serde::Serialize;
use thiserror::Error;

use crate::core::bluetooth::types::PeripheralId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CentralError {
    #[error("Bluetooth adapter is not powered on")]
    NotReady,
    #[error("A scan is already in progress")]
    Busy,
    #[error("No active peripheral {0}")]
    NotFound(String),
    #[error("Peripheral {0} is not ready")]
    NotConnected(PeripheralId),
    #[error("Characteristic {characteristic} missing on peripheral {peripheral}")]
    CharacteristicMissing {
        peripheral: PeripheralId,
        characteristic: String,
    },
    #[error("Invalid service: {0}")]
    InvalidService(String),
    #[error("Malformed UUID: {0}")]
    MalformedUuid(String),
    #[error("Write of {len} bytes exceeds the {max} byte limit")]
    WriteTooLarge { len: usize, max: usize },
    #[error("Adapter error: {0}")]
    AdapterError(String),
    #[error("Platform error: {0}")]
    PlatformError(String),
    #[error("Bluetooth dispatch context has shut down")]
    Closed,
}

/// Fieldless discriminant of [`CentralError`], as carried by error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    NotReady,
    Busy,
    NotFound,
    NotConnected,
    CharacteristicMissing,
    InvalidService,
    MalformedUuid,
    WriteTooLarge,
    AdapterError,
    PlatformError,
    Closed,
}

impl CentralError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotReady => ErrorKind::NotReady,
            Self::Busy => ErrorKind::Busy,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::NotConnected(_) => ErrorKind::NotConnected,
            Self::CharacteristicMissing { .. } => ErrorKind::CharacteristicMissing,
            Self::InvalidService(_) => ErrorKind::InvalidService,
            Self::MalformedUuid(_) => ErrorKind::MalformedUuid,
            Self::WriteTooLarge { .. } => ErrorKind::WriteTooLarge,
            Self::AdapterError(_) => ErrorKind::AdapterError,
            Self::PlatformError(_) => ErrorKind::PlatformError,
            Self::Closed => ErrorKind::Closed,
        }
    }
}

pub type Result<T, E = CentralError> = std::result::Result<T, E>;
