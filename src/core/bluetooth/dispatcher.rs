//! Event dispatcher
//! Owns the single observer slot and fans adapter, connection and data events
//! out to it.

use std::fmt;

use log::trace;
use serde::Serialize;

use crate::core::bluetooth::error::{CentralError, ErrorKind};
use crate::core::bluetooth::types::PeripheralId;

/// Everything the central reports to the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CentralEvent {
    PoweredOn,
    PoweredOff,
    Error { kind: ErrorKind, detail: String },
    /// The peripheral is connected and every registry characteristic it offers is cached.
    Connected(PeripheralId),
    FailToConnect(PeripheralId),
    ConnectionLost(PeripheralId),
    /// A disconnect the application asked for has completed.
    Disconnected(PeripheralId),
    DataReceived {
        id: PeripheralId,
        data: Vec<u8>,
        length: usize,
    },
    RssiUpdated { id: PeripheralId, rssi: i16 },
}

impl CentralEvent {
    pub fn data_received(id: PeripheralId, data: Vec<u8>) -> Self {
        let length = data.len();
        Self::DataReceived { id, data, length }
    }
}

impl From<CentralError> for CentralEvent {
    fn from(error: CentralError) -> Self {
        Self::Error {
            kind: error.kind(),
            detail: error.to_string(),
        }
    }
}

/// The application's observer. Called serially from the Bluetooth dispatch task.
pub trait EventSink: Send {
    fn on_event(&self, event: CentralEvent);
}

impl<F> EventSink for F
where
    F: Fn(CentralEvent) + Send,
{
    fn on_event(&self, event: CentralEvent) {
        self(event)
    }
}

#[derive(Default)]
pub struct EventDispatcher {
    sink: Option<Box<dyn EventSink>>,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `sink`, replacing any previous observer. `None` clears the slot.
    pub fn set_sink(&mut self, sink: Option<Box<dyn EventSink>>) {
        self.sink = sink;
    }

    pub fn emit(&self, event: CentralEvent) {
        match &self.sink {
            Some(sink) => sink.on_event(event),
            None => trace!("No observer installed, dropping {:?}", event),
        }
    }

    pub fn emit_all(&self, events: impl IntoIterator<Item = CentralEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}
