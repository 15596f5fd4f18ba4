//! Platform driver contract
//! The central drives the platform Bluetooth stack only through [`PlatformDriver`];
//! the stack reports back by posting [`PlatformEvent`]s through [`PlatformEvents`].

use std::fmt;

use log::debug;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::bluetooth::manager::Message;
use crate::core::bluetooth::types::{
    AdapterState, CharacteristicHandle, PeripheralId, PlatformHandle,
};

/// Callbacks from the platform stack.
///
/// A `ValueUpdated` covers both read responses and notifications. `error` fields carry
/// the platform's description when the operation failed.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    StateChanged(AdapterState),
    Advertisement {
        handle: PlatformHandle,
        id: PeripheralId,
        name: Option<String>,
        rssi: i16,
    },
    Connected {
        handle: PlatformHandle,
    },
    FailedToConnect {
        handle: PlatformHandle,
        error: Option<String>,
    },
    Disconnected {
        handle: PlatformHandle,
        error: Option<String>,
    },
    ServicesDiscovered {
        handle: PlatformHandle,
        services: Vec<Uuid>,
        error: Option<String>,
    },
    CharacteristicsDiscovered {
        handle: PlatformHandle,
        service: Uuid,
        characteristics: Vec<(Uuid, CharacteristicHandle)>,
        error: Option<String>,
    },
    ValueUpdated {
        handle: PlatformHandle,
        characteristic: CharacteristicHandle,
        value: Vec<u8>,
        error: Option<String>,
    },
    NotificationStateChanged {
        handle: PlatformHandle,
        characteristic: CharacteristicHandle,
        enabled: bool,
        error: Option<String>,
    },
    RssiRead {
        handle: PlatformHandle,
        rssi: Result<i16, String>,
    },
    /// The platform could not start or keep up the scan last requested.
    ScanFailed {
        error: String,
    },
}

/// Posts platform callbacks onto the Bluetooth dispatch task.
///
/// Holds the queue weakly: a driver never keeps a dropped central alive.
#[derive(Clone)]
pub struct PlatformEvents {
    tx: mpsc::WeakUnboundedSender<Message>,
}

impl fmt::Debug for PlatformEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformEvents").finish_non_exhaustive()
    }
}

impl PlatformEvents {
    pub(crate) fn new(tx: mpsc::WeakUnboundedSender<Message>) -> Self {
        Self { tx }
    }

    /// Queues `event` behind everything already posted. Returns false once the
    /// central has shut down.
    pub fn send(&self, event: PlatformEvent) -> bool {
        match self.tx.upgrade() {
            Some(tx) if !tx.is_closed() => tx.send(Message::Platform(event)).is_ok(),
            _ => {
                debug!("Central is gone, dropping platform event: {:?}", event);
                false
            }
        }
    }
}

/// Operations the central issues to the platform Bluetooth stack.
///
/// Every call is made from the dispatch task and must return without blocking; results
/// come back later as [`PlatformEvent`]s.
pub trait PlatformDriver: Send + 'static {
    /// Hands the driver its callback channel. Called once before any other method.
    fn attach(&mut self, events: PlatformEvents);

    /// Forces the platform adapter to initialize and report its state.
    fn setup(&mut self);

    /// Starts scanning. `services` narrows the scan; `allow_duplicates` asks for every
    /// advertisement instead of the first per peripheral.
    fn start_scan(&mut self, services: Option<&[Uuid]>, allow_duplicates: bool);

    fn stop_scan(&mut self);

    fn connect(&mut self, peripheral: PlatformHandle);

    fn cancel_connect(&mut self, peripheral: PlatformHandle);

    fn disconnect(&mut self, peripheral: PlatformHandle);

    fn discover_services(&mut self, peripheral: PlatformHandle, services: &[Uuid]);

    fn discover_characteristics(
        &mut self,
        peripheral: PlatformHandle,
        service: Uuid,
        characteristics: &[Uuid],
    );

    fn read_value(&mut self, peripheral: PlatformHandle, characteristic: CharacteristicHandle);

    fn write_value(
        &mut self,
        peripheral: PlatformHandle,
        characteristic: CharacteristicHandle,
        value: &[u8],
        without_response: bool,
    );

    fn set_notify(
        &mut self,
        peripheral: PlatformHandle,
        characteristic: CharacteristicHandle,
        enabled: bool,
    );

    fn read_rssi(&mut self, peripheral: PlatformHandle);

    /// Largest payload a single write-without-response can carry, if the platform knows it.
    fn maximum_write_len(
        &self,
        peripheral: PlatformHandle,
        characteristic: CharacteristicHandle,
    ) -> Option<usize>;
}
