//! Adapter monitor
//! Tracks the platform adapter's power/authorization state and publishes the
//! `Ready` predicate.

use log::{info, warn};
use tokio::sync::watch;

use crate::core::bluetooth::dispatcher::CentralEvent;
use crate::core::bluetooth::error::{CentralError, ErrorKind, Result};
use crate::core::bluetooth::types::AdapterState;

pub struct AdapterMonitor {
    state: AdapterState,
    ready: watch::Sender<bool>,
}

impl AdapterMonitor {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (ready, ready_rx) = watch::channel(false);
        (
            Self {
                state: AdapterState::Unknown,
                ready,
            },
            ready_rx,
        )
    }

    pub fn state(&self) -> AdapterState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == AdapterState::PoweredOn
    }

    /// Fails fast with `NotReady` unless the adapter is powered on.
    pub fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(CentralError::NotReady)
        }
    }

    /// Applies a platform state report and returns the events it causes, in order.
    pub fn transition(&mut self, state: AdapterState) -> Vec<CentralEvent> {
        let was_ready = self.is_ready();
        let previous = std::mem::replace(&mut self.state, state);
        let mut events = Vec::new();

        if previous == state {
            return events;
        }
        info!("Adapter state changed: {:?} -> {:?}", previous, state);

        if state == AdapterState::PoweredOn {
            events.push(CentralEvent::PoweredOn);
        } else if was_ready {
            events.push(CentralEvent::PoweredOff);
        }

        match state {
            AdapterState::Unauthorized => {
                warn!("Application is not authorized to use Bluetooth");
                events.push(CentralEvent::Error {
                    kind: ErrorKind::AdapterError,
                    detail: "Bluetooth use is not authorized".to_string(),
                });
            }
            AdapterState::Unsupported => {
                warn!("Bluetooth Low Energy is not supported on this host");
                events.push(CentralEvent::Error {
                    kind: ErrorKind::AdapterError,
                    detail: "Bluetooth Low Energy is not supported".to_string(),
                });
            }
            _ => {}
        }

        self.ready.send_if_modified(|ready| {
            let now = state == AdapterState::PoweredOn;
            let changed = *ready != now;
            *ready = now;
            changed
        });
        events
    }
}
