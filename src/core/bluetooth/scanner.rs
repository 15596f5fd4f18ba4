//! Scan controller
//! Drives timed discovery sessions that end on a timeout, an early-stop
//! population threshold or an explicit stop, and delivers one snapshot per session.

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info};
use tokio::sync::mpsc::WeakUnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::error::{CentralError, Result};
use crate::core::bluetooth::manager::{CentralCore, Message};
use crate::core::bluetooth::types::{PeripheralId, PeripheralRecord, PlatformHandle};

/// Receives the sorted snapshot of a finished scan session.
pub type ScanCompletion = Box<dyn FnOnce(Vec<PeripheralRecord>) + Send>;

pub struct ScanSession {
    pub id: u64,
    pub started_at: DateTime<Utc>,
    pub interval_ms: u64,
    pub early_stop_count: usize,
    completion: ScanCompletion,
    timer: Option<CancellationToken>,
}

impl ScanSession {
    /// Hands the snapshot to the session's completion, consuming the session.
    pub fn complete(self, snapshot: Vec<PeripheralRecord>) {
        info!(
            "Scan session {} finished after {} ms with {} peripherals",
            self.id,
            (Utc::now() - self.started_at).num_milliseconds(),
            snapshot.len()
        );
        (self.completion)(snapshot);
    }
}

pub struct BluetoothScanner {
    session: Option<ScanSession>,
    next_id: u64,
    min_rssi: Option<i16>,
}

impl BluetoothScanner {
    pub fn new(min_rssi: Option<i16>) -> Self {
        Self {
            session: None,
            next_id: 1,
            min_rssi,
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.session.is_some()
    }

    /// Opens a new session, failing with `Busy` while another one is running.
    pub fn begin(
        &mut self,
        interval_ms: u64,
        early_stop_count: usize,
        completion: ScanCompletion,
    ) -> Result<u64> {
        if self.session.is_some() {
            return Err(CentralError::Busy);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.session = Some(ScanSession {
            id,
            started_at: Utc::now(),
            interval_ms,
            early_stop_count,
            completion,
            timer: None,
        });
        Ok(id)
    }

    /// Arms the interval timer of the current session. A zero interval arms nothing.
    pub fn arm_timer(&mut self, tx: WeakUnboundedSender<Message>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.interval_ms == 0 {
            return;
        }
        let cancel_token = CancellationToken::new();
        let cancel_token_for_task = cancel_token.clone();
        let id = session.id;
        let interval = Duration::from_millis(session.interval_ms);

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Some(tx) = tx.upgrade() {
                        let _ = tx.send(Message::ScanTimeout(id));
                    }
                }
                _ = cancel_token_for_task.cancelled() => {}
            }
        });
        session.timer = Some(cancel_token);
    }

    pub fn is_current(&self, id: u64) -> bool {
        self.session.as_ref().is_some_and(|s| s.id == id)
    }

    /// Whether an advertisement at `rssi` is strong enough to be recorded.
    pub fn accepts(&self, rssi: i16) -> bool {
        self.min_rssi.is_none_or(|min| rssi >= min)
    }

    pub fn threshold_reached(&self, discovered: usize) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.early_stop_count > 0 && discovered >= s.early_stop_count)
    }

    /// Closes the current session and cancels its timer.
    pub fn finish(&mut self) -> Option<ScanSession> {
        let mut session = self.session.take()?;
        if let Some(timer) = session.timer.take() {
            timer.cancel();
        }
        Some(session)
    }
}

impl CentralCore {
    pub(crate) fn start_scan(
        &mut self,
        interval_ms: u64,
        early_stop_count: usize,
        completion: ScanCompletion,
    ) -> Result<()> {
        self.adapter.ensure_ready()?;
        let id = self.scanner.begin(interval_ms, early_stop_count, completion)?;
        self.index.clear_discovered();

        let filter = self
            .scan_for_registry_services
            .then(|| self.registry.service_uuids());
        self.driver.start_scan(filter.as_deref(), true);
        self.scanner.arm_timer(self.tx.clone());
        info!(
            "Scan session {} started (interval {} ms, early stop at {})",
            id, interval_ms, early_stop_count
        );
        Ok(())
    }

    pub(crate) fn stop_scan(&mut self) -> Result<()> {
        self.adapter.ensure_ready()?;
        if !self.scanner.is_scanning() {
            debug!("stop_scan without an active session");
            return Ok(());
        }
        self.end_scan();
        Ok(())
    }

    pub(crate) fn on_scan_timeout(&mut self, id: u64) {
        if self.scanner.is_current(id) {
            self.end_scan();
        } else {
            debug!("Ignoring timer of finished scan session {}", id);
        }
    }

    /// Reports the failure and completes the session with what was found so far.
    pub(crate) fn on_scan_failed(&mut self, error: String) {
        if !self.scanner.is_scanning() {
            debug!("Scan failure outside a scan session, dropped: {}", error);
            return;
        }
        error!("Bluetooth scan failed: {}", error);
        self.dispatcher.emit(CentralError::PlatformError(error).into());
        self.end_scan();
    }

    /// Stops the platform scan, then completes the session with the current snapshot.
    pub(crate) fn end_scan(&mut self) {
        if let Some(session) = self.scanner.finish() {
            self.driver.stop_scan();
            session.complete(self.index.discovered());
        }
    }

    pub(crate) fn on_advertisement(
        &mut self,
        handle: PlatformHandle,
        id: PeripheralId,
        name: Option<String>,
        rssi: i16,
    ) {
        if !self.scanner.is_scanning() {
            debug!("Advertisement from {} outside a scan session, dropped", id);
            return;
        }
        if !self.scanner.accepts(rssi) {
            debug!("Advertisement from {} below RSSI floor ({}), dropped", id, rssi);
            return;
        }
        debug!("Found device - ID: {}, Name: {:?}, RSSI: {}", id, name, rssi);
        if self.index.observe_advertisement(id, name, rssi, handle)
            && self.scanner.threshold_reached(self.index.discovered_len())
        {
            info!("Early-stop threshold reached");
            self.end_scan();
        }
    }
}
