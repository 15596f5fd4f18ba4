//! Defines shared data structures for the Bluetooth module.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque, stable identifier the platform assigns to a peripheral.
///
/// Equality is by the identifier text; it keys both the discovered list and the active map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeripheralId(String);

impl PeripheralId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for PeripheralId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeripheralId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PeripheralId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Platform handle of a peripheral, minted by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlatformHandle(pub u64);

/// Platform handle of a discovered characteristic, minted by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacteristicHandle(pub u64);

/// Names a peripheral in an application call, either by id or by platform handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralTarget {
    Id(PeripheralId),
    Handle(PlatformHandle),
}

impl From<PeripheralId> for PeripheralTarget {
    fn from(id: PeripheralId) -> Self {
        Self::Id(id)
    }
}

impl From<&PeripheralId> for PeripheralTarget {
    fn from(id: &PeripheralId) -> Self {
        Self::Id(id.clone())
    }
}

impl From<&str> for PeripheralTarget {
    fn from(id: &str) -> Self {
        Self::Id(PeripheralId::from(id))
    }
}

impl From<PlatformHandle> for PeripheralTarget {
    fn from(handle: PlatformHandle) -> Self {
        Self::Handle(handle)
    }
}

/// Power/authorization state reported by the platform adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AdapterState {
    #[default]
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

/// Lifecycle state of a peripheral record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeripheralState {
    Discovered,
    Connecting,
    Connected,
    DiscoveringServices,
    Ready,
    Disconnecting,
    Lost,
}

impl PeripheralState {
    /// Whether a record in this state belongs in the active map.
    pub fn is_connection_bearing(self) -> bool {
        matches!(
            self,
            Self::Connecting
                | Self::Connected
                | Self::DiscoveringServices
                | Self::Ready
                | Self::Disconnecting
        )
    }
}

/// A peripheral as seen by the central.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeripheralRecord {
    /// Stable platform identifier
    pub id: PeripheralId,
    /// Advertised local name, if any
    pub name: Option<String>,
    /// Signal strength of the latest advertisement or RSSI read, in dBm
    pub rssi: i16,
    /// Driver handle used for every platform call on this peripheral
    #[serde(skip)]
    pub handle: PlatformHandle,
    pub state: PeripheralState,
}

impl PeripheralRecord {
    pub fn new(id: PeripheralId, name: Option<String>, rssi: i16, handle: PlatformHandle) -> Self {
        Self {
            id,
            name,
            rssi,
            handle,
            state: PeripheralState::Discovered,
        }
    }
}
