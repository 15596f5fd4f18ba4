//! Bluetooth central manager
//! This module provides the application-facing handle, [`BleCentral`], and the
//! dispatch task that owns every piece of central state.
//!
//! Application calls and platform callbacks are posted onto one queue and handled
//! in order by a single task, so no state is ever touched from two threads.

use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot, watch};

use crate::config::CentralConfig;
use crate::core::bluetooth::adapter::AdapterMonitor;
use crate::core::bluetooth::dispatcher::{EventDispatcher, EventSink};
use crate::core::bluetooth::driver::{PlatformDriver, PlatformEvent, PlatformEvents};
use crate::core::bluetooth::error::{CentralError, Result};
use crate::core::bluetooth::index::PeripheralIndex;
use crate::core::bluetooth::registry::{self, ServiceConfig, ServiceRegistry};
use crate::core::bluetooth::scanner::{BluetoothScanner, ScanCompletion};
use crate::core::bluetooth::types::{
    AdapterState, PeripheralId, PeripheralRecord, PeripheralState, PeripheralTarget,
};

/// Application intent, hopped onto the dispatch task.
pub(crate) enum Command {
    Setup,
    SetObserver(Option<Box<dyn EventSink>>),
    SetServices(ServiceRegistry),
    Scan {
        interval_ms: u64,
        early_stop_count: usize,
        completion: ScanCompletion,
    },
    StopScan,
    Connect(PeripheralTarget),
    Disconnect(PeripheralTarget),
    EnableReadNotifications(PeripheralTarget),
    Read(Option<PeripheralId>),
    Write(Option<PeripheralId>, Vec<u8>),
    ReadRssi(Option<PeripheralId>),
    IsConnected(PeripheralId, oneshot::Sender<bool>),
    Peripherals(oneshot::Sender<Vec<PeripheralRecord>>),
    ActivePeripherals(oneshot::Sender<Vec<PeripheralRecord>>),
    Services(oneshot::Sender<Vec<ServiceConfig>>),
    Shutdown(oneshot::Sender<()>),
}

/// Everything the dispatch task consumes, in arrival order.
pub(crate) enum Message {
    Command(Command),
    Platform(PlatformEvent),
    ScanTimeout(u64),
}

/// State owned by the dispatch task.
pub(crate) struct CentralCore {
    pub(crate) driver: Box<dyn PlatformDriver>,
    pub(crate) registry: ServiceRegistry,
    pub(crate) index: PeripheralIndex,
    pub(crate) adapter: AdapterMonitor,
    pub(crate) scanner: BluetoothScanner,
    pub(crate) dispatcher: EventDispatcher,
    pub(crate) tx: mpsc::WeakUnboundedSender<Message>,
    pub(crate) auto_enable_notifications: bool,
    pub(crate) scan_for_registry_services: bool,
}

impl CentralCore {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Message>) {
        info!("Bluetooth dispatch task started");
        while let Some(message) = rx.recv().await {
            match message {
                Message::Command(Command::Shutdown(ack)) => {
                    self.shutdown();
                    let _ = ack.send(());
                    return;
                }
                Message::Command(command) => self.handle_command(command),
                Message::Platform(event) => self.handle_platform_event(event),
                Message::ScanTimeout(id) => self.on_scan_timeout(id),
            }
        }
        info!("All central handles dropped");
        self.shutdown();
    }

    fn handle_command(&mut self, command: Command) {
        let result = match command {
            Command::Setup => {
                info!("Setting up Bluetooth adapter");
                self.driver.setup();
                Ok(())
            }
            Command::SetObserver(sink) => {
                self.dispatcher.set_sink(sink);
                Ok(())
            }
            Command::SetServices(registry) => {
                info!("Service registry replaced ({} services)", registry.services().len());
                self.registry = registry;
                Ok(())
            }
            Command::Scan {
                interval_ms,
                early_stop_count,
                completion,
            } => self.start_scan(interval_ms, early_stop_count, completion),
            Command::StopScan => self.stop_scan(),
            Command::Connect(target) => self.connect(target),
            Command::Disconnect(target) => self.disconnect(target),
            Command::EnableReadNotifications(target) => self.enable_read_notifications(target),
            Command::Read(id) => self.read(id),
            Command::Write(id, data) => self.write(id, data),
            Command::ReadRssi(id) => self.read_rssi(id),
            Command::IsConnected(id, reply) => {
                let _ = reply.send(self.index.is_ready(id.as_str()));
                Ok(())
            }
            Command::Peripherals(reply) => {
                let _ = reply.send(self.index.discovered());
                Ok(())
            }
            Command::ActivePeripherals(reply) => {
                let _ = reply.send(self.index.active_records());
                Ok(())
            }
            Command::Services(reply) => {
                let _ = reply.send(self.registry.to_configs());
                Ok(())
            }
            Command::Shutdown(_) => Ok(()),
        };

        if let Err(e) = result {
            warn!("Bluetooth operation failed: {}", e);
            self.dispatcher.emit(e.into());
        }
    }

    fn handle_platform_event(&mut self, event: PlatformEvent) {
        match event {
            PlatformEvent::StateChanged(state) => self.on_adapter_state(state),
            PlatformEvent::Advertisement {
                handle,
                id,
                name,
                rssi,
            } => self.on_advertisement(handle, id, name, rssi),
            PlatformEvent::Connected { handle } => self.on_connected(handle),
            PlatformEvent::FailedToConnect { handle, error } => {
                self.on_failed_to_connect(handle, error)
            }
            PlatformEvent::Disconnected { handle, error } => self.on_disconnected(handle, error),
            PlatformEvent::ServicesDiscovered {
                handle,
                services,
                error,
            } => self.on_services_discovered(handle, services, error),
            PlatformEvent::CharacteristicsDiscovered {
                handle,
                service,
                characteristics,
                error,
            } => self.on_characteristics_discovered(handle, service, characteristics, error),
            PlatformEvent::ValueUpdated {
                handle,
                characteristic,
                value,
                error,
            } => self.on_value_updated(handle, characteristic, value, error),
            PlatformEvent::NotificationStateChanged {
                handle,
                characteristic,
                enabled,
                error,
            } => self.on_notification_state(handle, characteristic, enabled, error),
            PlatformEvent::RssiRead { handle, rssi } => self.on_rssi_read(handle, rssi),
            PlatformEvent::ScanFailed { error } => self.on_scan_failed(error),
        }
    }

    fn on_adapter_state(&mut self, state: AdapterState) {
        let was_ready = self.adapter.is_ready();
        let events = self.adapter.transition(state);
        self.dispatcher.emit_all(events);

        if was_ready && !self.adapter.is_ready() {
            // The platform invalidates every scan and link when the adapter goes away.
            self.end_scan();
            for id in self.index.active_ids() {
                if let Some(evicted) = self.index.evict_active(id.as_str()) {
                    info!("Dropping {} after adapter power loss", id);
                    self.dispatcher
                        .emit(Self::eviction_event(&evicted.record, evicted.gatt.failed));
                }
            }
        }
    }

    fn shutdown(&mut self) {
        info!("Shutting down Bluetooth dispatch task");
        self.end_scan();
        for record in self.index.active_records() {
            match record.state {
                PeripheralState::Connecting => self.driver.cancel_connect(record.handle),
                PeripheralState::Disconnecting => {}
                _ => self.driver.disconnect(record.handle),
            }
            self.index.evict_active(record.id.as_str());
        }
        self.dispatcher.set_sink(None);
    }
}

/// Clonable handle to a Bluetooth LE central.
///
/// Every call returns after posting to the dispatch task; outcomes arrive as
/// [`CentralEvent`](crate::core::bluetooth::CentralEvent)s on the installed observer.
/// Only validation errors and [`CentralError::Closed`] are returned directly.
#[derive(Clone)]
pub struct BleCentral {
    tx: mpsc::UnboundedSender<Message>,
    ready: watch::Receiver<bool>,
    scan_interval_ms: u64,
    early_stop_count: usize,
}

impl std::fmt::Debug for BleCentral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleCentral")
            .field("ready", &*self.ready.borrow())
            .finish()
    }
}

impl BleCentral {
    /// Creates a central over `driver` and spawns its dispatch task on the current
    /// tokio runtime.
    pub fn new(driver: impl PlatformDriver, config: &CentralConfig) -> Result<Self> {
        let mut registry = ServiceRegistry::from_configs(&config.services)?;
        if config.include_default_services {
            registry = registry.with_defaults();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let (adapter, ready) = AdapterMonitor::new();
        let mut driver: Box<dyn PlatformDriver> = Box::new(driver);
        driver.attach(PlatformEvents::new(tx.downgrade()));

        let core = CentralCore {
            driver,
            registry,
            index: PeripheralIndex::new(),
            adapter,
            scanner: BluetoothScanner::new(config.min_rssi),
            dispatcher: EventDispatcher::new(),
            tx: tx.downgrade(),
            auto_enable_notifications: config.auto_enable_notifications,
            scan_for_registry_services: config.scan_for_registry_services,
        };
        tokio::spawn(core.run(rx));

        Ok(Self {
            tx,
            ready,
            scan_interval_ms: config.scan_interval_ms,
            early_stop_count: config.early_stop_count,
        })
    }

    fn post(&self, command: Command) -> Result<()> {
        self.tx
            .send(Message::Command(command))
            .map_err(|_| CentralError::Closed)
    }

    async fn query<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.post(command(reply))?;
        response.await.map_err(|_| CentralError::Closed)
    }

    /// Asks the platform to bring the adapter up and report its state.
    pub fn setup(&self) -> Result<()> {
        self.post(Command::Setup)
    }

    /// Installs the single observer, replacing any previous one.
    pub fn set_observer(&self, sink: impl EventSink + 'static) -> Result<()> {
        self.post(Command::SetObserver(Some(Box::new(sink))))
    }

    pub fn clear_observer(&self) -> Result<()> {
        self.post(Command::SetObserver(None))
    }

    /// Whether the adapter is powered on.
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Change-notified view of [`Self::is_ready`].
    pub fn ready(&self) -> watch::Receiver<bool> {
        self.ready.clone()
    }

    /// Starts a scan session. `completion` receives the RSSI-sorted snapshot once the
    /// session ends: after `interval_ms` (never, if 0), once `early_stop_count`
    /// peripherals were found (if > 0), or on [`Self::stop_scan`].
    pub fn scan(
        &self,
        interval_ms: u64,
        early_stop_count: usize,
        completion: impl FnOnce(Vec<PeripheralRecord>) + Send + 'static,
    ) -> Result<()> {
        self.post(Command::Scan {
            interval_ms,
            early_stop_count,
            completion: Box::new(completion),
        })
    }

    /// [`Self::scan`] with the configured interval and early-stop threshold.
    pub fn scan_with_defaults(
        &self,
        completion: impl FnOnce(Vec<PeripheralRecord>) + Send + 'static,
    ) -> Result<()> {
        self.scan(self.scan_interval_ms, self.early_stop_count, completion)
    }

    pub fn stop_scan(&self) -> Result<()> {
        self.post(Command::StopScan)
    }

    pub fn connect(&self, target: impl Into<PeripheralTarget>) -> Result<()> {
        self.post(Command::Connect(target.into()))
    }

    pub fn disconnect(&self, target: impl Into<PeripheralTarget>) -> Result<()> {
        self.post(Command::Disconnect(target.into()))
    }

    /// Whether `id` is connected with all its registry characteristics located.
    pub async fn is_connected(&self, id: &str) -> Result<bool> {
        let id = PeripheralId::from(id);
        self.query(|reply| Command::IsConnected(id, reply)).await
    }

    pub fn enable_read_notifications(&self, target: impl Into<PeripheralTarget>) -> Result<()> {
        self.post(Command::EnableReadNotifications(target.into()))
    }

    /// Reads the registry's read characteristic of `id`, or of the first connected
    /// peripheral. The value arrives as `DataReceived`.
    pub fn read(&self, id: Option<&str>) -> Result<()> {
        self.post(Command::Read(id.map(PeripheralId::from)))
    }

    /// Writes `data` without response to the registry's write characteristic of `id`,
    /// or of the first connected peripheral.
    pub fn write(&self, id: Option<&str>, data: &[u8]) -> Result<()> {
        self.post(Command::Write(id.map(PeripheralId::from), data.to_vec()))
    }

    /// Requests the current RSSI; the result arrives as `RssiUpdated`.
    pub fn read_rssi(&self, id: Option<&str>) -> Result<()> {
        self.post(Command::ReadRssi(id.map(PeripheralId::from)))
    }

    /// Snapshot of the discovered list, strongest signal first.
    pub async fn peripherals(&self) -> Result<Vec<PeripheralRecord>> {
        self.query(Command::Peripherals).await
    }

    /// Snapshot of the active map in connection order.
    pub async fn active_peripherals(&self) -> Result<Vec<PeripheralRecord>> {
        self.query(Command::ActivePeripherals).await
    }

    pub async fn services(&self) -> Result<Vec<ServiceConfig>> {
        self.query(Command::Services).await
    }

    /// Replaces the service registry. Invalid input is rejected here and the current
    /// registry is kept.
    pub fn set_services(&self, services: &[ServiceConfig]) -> Result<()> {
        let registry = ServiceRegistry::from_configs(services)?;
        self.post(Command::SetServices(registry))
    }

    /// `services` merged with the built-in defaults.
    pub fn include_defaults(&self, services: &[ServiceConfig]) -> Result<Vec<ServiceConfig>> {
        registry::include_defaults(services)
    }

    /// Stops the dispatch task after everything posted before this call was handled.
    pub async fn shutdown(&self) -> Result<()> {
        self.query(Command::Shutdown).await?;
        debug!("Bluetooth dispatch task stopped");
        Ok(())
    }
}
