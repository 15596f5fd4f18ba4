//! Platform driver over the bluest crate
//! Every driver call spawns the matching bluest operation on the tokio runtime
//! and posts its outcome back to the central as a platform event.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bluest::{Adapter, AdapterEvent, Characteristic, ConnectionEvent, Device, Service, Uuid};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::driver::{PlatformDriver, PlatformEvent, PlatformEvents};
use crate::core::bluetooth::types::{AdapterState, CharacteristicHandle, PlatformHandle};

/// bluest objects behind the handles handed to the central, and the tasks bound to them.
#[derive(Default)]
struct Handles {
    adapter: Option<Adapter>,
    devices: HashMap<PlatformHandle, Device>,
    device_ids: HashMap<String, PlatformHandle>,
    services: HashMap<(PlatformHandle, Uuid), Service>,
    characteristics: HashMap<CharacteristicHandle, (PlatformHandle, Characteristic)>,
    link_tokens: HashMap<PlatformHandle, CancellationToken>,
    notify_tokens: HashMap<(PlatformHandle, CharacteristicHandle), CancellationToken>,
    next_handle: u64,
}

impl Handles {
    fn register_device(&mut self, device: Device) -> PlatformHandle {
        let id = device.id().to_string();
        let handle = match self.device_ids.get(&id) {
            Some(handle) => *handle,
            None => {
                self.next_handle += 1;
                let handle = PlatformHandle(self.next_handle);
                self.device_ids.insert(id, handle);
                handle
            }
        };
        self.devices.insert(handle, device);
        handle
    }

    fn register_characteristic(
        &mut self,
        peripheral: PlatformHandle,
        characteristic: Characteristic,
    ) -> CharacteristicHandle {
        self.next_handle += 1;
        let handle = CharacteristicHandle(self.next_handle);
        self.characteristics
            .insert(handle, (peripheral, characteristic));
        handle
    }

    /// Drops the GATT objects of `peripheral` and stops its notification streams.
    fn forget_gatt(&mut self, peripheral: PlatformHandle) {
        self.services.retain(|(owner, _), _| *owner != peripheral);
        self.characteristics
            .retain(|_, (owner, _)| *owner != peripheral);
        self.notify_tokens.retain(|(owner, _), token| {
            if *owner == peripheral {
                token.cancel();
                return false;
            }
            true
        });
    }

    /// Stops the link task of `peripheral` and forgets everything bound to the link.
    fn release_link(&mut self, peripheral: PlatformHandle) {
        if let Some(token) = self.link_tokens.remove(&peripheral) {
            token.cancel();
        }
        self.forget_gatt(peripheral);
    }

    /// Releases every link; the adapter went away.
    fn release_all(&mut self) {
        let peripherals: Vec<_> = self
            .link_tokens
            .keys()
            .chain(self.services.keys().map(|(owner, _)| owner))
            .copied()
            .collect();
        for peripheral in peripherals {
            self.release_link(peripheral);
        }
    }

    /// Forgets devices no link refers to any more.
    fn prune_devices(&mut self) {
        let linked = &self.link_tokens;
        self.devices.retain(|handle, _| linked.contains_key(handle));
        let devices = &self.devices;
        self.device_ids
            .retain(|_, handle| devices.contains_key(handle));
    }
}

fn lock(handles: &Mutex<Handles>) -> MutexGuard<'_, Handles> {
    handles.lock().unwrap_or_else(PoisonError::into_inner)
}

/// [`PlatformDriver`] backed by the system Bluetooth stack through bluest.
#[derive(Default)]
pub struct BluestDriver {
    handles: Arc<Mutex<Handles>>,
    events: Option<PlatformEvents>,
    setup_started: bool,
    scan_token: Option<CancellationToken>,
}

impl BluestDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn events(&self) -> Option<PlatformEvents> {
        if self.events.is_none() {
            error!("Bluest driver used before being attached to a central");
        }
        self.events.clone()
    }

    fn adapter(&self) -> Option<Adapter> {
        let adapter = lock(&self.handles).adapter.clone();
        if adapter.is_none() {
            error!("Bluetooth adapter not set up yet");
        }
        adapter
    }

    fn device(&self, peripheral: PlatformHandle) -> Option<Device> {
        lock(&self.handles).devices.get(&peripheral).cloned()
    }

    fn characteristic(&self, characteristic: CharacteristicHandle) -> Option<Characteristic> {
        lock(&self.handles)
            .characteristics
            .get(&characteristic)
            .map(|(_, characteristic)| characteristic.clone())
    }

    /// Stops the link task of `peripheral`, tears the link down and reports `Disconnected`.
    fn teardown(&mut self, peripheral: PlatformHandle) {
        lock(&self.handles).release_link(peripheral);
        let Some(events) = self.events() else {
            return;
        };
        let (Some(adapter), Some(device)) = (self.adapter(), self.device(peripheral)) else {
            events.send(PlatformEvent::Disconnected {
                handle: peripheral,
                error: None,
            });
            return;
        };

        tokio::spawn(async move {
            let error = match adapter.disconnect_device(&device).await {
                Ok(()) => {
                    info!("Successfully disconnected from {}", device.id());
                    None
                }
                Err(e) => {
                    warn!("Disconnecting from {} failed: {}", device.id(), e);
                    Some(e.to_string())
                }
            };
            events.send(PlatformEvent::Disconnected {
                handle: peripheral,
                error,
            });
        });
    }
}

impl PlatformDriver for BluestDriver {
    fn attach(&mut self, events: PlatformEvents) {
        self.events = Some(events);
    }

    fn setup(&mut self) {
        if self.setup_started {
            debug!("Bluest adapter already set up");
            return;
        }
        let Some(events) = self.events() else {
            return;
        };
        self.setup_started = true;
        let handles = self.handles.clone();

        tokio::spawn(async move {
            let Some(adapter) = Adapter::default().await else {
                error!("No Bluetooth adapter found");
                events.send(PlatformEvent::StateChanged(AdapterState::Unsupported));
                return;
            };
            lock(&handles).adapter = Some(adapter.clone());

            if let Err(e) = adapter.wait_available().await {
                error!("Bluetooth adapter never became available: {}", e);
                events.send(PlatformEvent::StateChanged(AdapterState::Unsupported));
                return;
            }
            info!("Bluetooth adapter is available.");
            events.send(PlatformEvent::StateChanged(AdapterState::PoweredOn));

            let mut adapter_events = match adapter.events().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Cannot follow adapter state changes: {}", e);
                    return;
                }
            };
            while let Some(event) = adapter_events.next().await {
                let state = match event {
                    Ok(AdapterEvent::Available) => AdapterState::PoweredOn,
                    Ok(AdapterEvent::Unavailable) => {
                        lock(&handles).release_all();
                        AdapterState::PoweredOff
                    }
                    Err(e) => {
                        warn!("Error in adapter event stream: {}", e);
                        continue;
                    }
                };
                if !events.send(PlatformEvent::StateChanged(state)) {
                    break;
                }
            }
            info!("Adapter event stream ended");
        });
    }

    fn start_scan(&mut self, services: Option<&[Uuid]>, _allow_duplicates: bool) {
        // bluest reports every advertisement; duplicates need no opt-in.
        self.stop_scan();
        let (Some(adapter), Some(events)) = (self.adapter(), self.events()) else {
            return;
        };
        let services = services.map(<[Uuid]>::to_vec).unwrap_or_default();
        lock(&self.handles).prune_devices();
        let handles = self.handles.clone();
        let cancel_token = CancellationToken::new();
        let cancel_token_for_task = cancel_token.clone();

        tokio::spawn(async move {
            info!("Starting bluetooth scan");
            let mut scan_stream = match adapter.scan(&services).await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Failed to start scan: {}", e);
                    events.send(PlatformEvent::ScanFailed {
                        error: e.to_string(),
                    });
                    return;
                }
            };

            loop {
                tokio::select! {
                    result = scan_stream.next() => {
                        match result {
                            Some(discovered_device) => {
                                let Some(rssi) = discovered_device.rssi else {
                                    continue;
                                };
                                let device = discovered_device.device;
                                let id = device.id().to_string();
                                let name = discovered_device
                                    .adv_data
                                    .local_name
                                    .or_else(|| device.name().ok());
                                let handle = lock(&handles).register_device(device);
                                events.send(PlatformEvent::Advertisement {
                                    handle,
                                    id: id.into(),
                                    name,
                                    rssi,
                                });
                            }
                            None => {
                                info!("Bluetooth scan stream has ended.");
                                break;
                            }
                        }
                    }
                    _ = cancel_token_for_task.cancelled() => {
                        break;
                    }
                }
            }
        });
        self.scan_token = Some(cancel_token);
    }

    fn stop_scan(&mut self) {
        if let Some(token) = self.scan_token.take() {
            info!("Stopping Bluetooth scan.");
            token.cancel();
        }
    }

    fn connect(&mut self, peripheral: PlatformHandle) {
        let Some(events) = self.events() else {
            return;
        };
        let (Some(adapter), Some(device)) = (self.adapter(), self.device(peripheral)) else {
            events.send(PlatformEvent::FailedToConnect {
                handle: peripheral,
                error: Some("unknown peripheral".to_string()),
            });
            return;
        };
        let cancel_token = CancellationToken::new();
        let cancel_token_for_task = cancel_token.clone();
        if let Some(previous) = lock(&self.handles).link_tokens.insert(peripheral, cancel_token) {
            previous.cancel();
        }
        let handles = self.handles.clone();

        tokio::spawn(async move {
            info!("Initiating connection to {}...", device.id());
            let result = tokio::select! {
                result = adapter.connect_device(&device) => result,
                _ = cancel_token_for_task.cancelled() => return,
            };
            if let Err(e) = result {
                if !cancel_token_for_task.is_cancelled() {
                    lock(&handles).release_link(peripheral);
                }
                events.send(PlatformEvent::FailedToConnect {
                    handle: peripheral,
                    error: Some(e.to_string()),
                });
                return;
            }
            events.send(PlatformEvent::Connected { handle: peripheral });

            let mut connection_events = match adapter.device_connection_events(&device).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Cannot watch the link to {}: {}", device.id(), e);
                    return;
                }
            };
            loop {
                tokio::select! {
                    event = connection_events.next() => {
                        match event {
                            Some(ConnectionEvent::Connected) => {}
                            Some(ConnectionEvent::Disconnected) | None => {
                                // A cancelled link belongs to a teardown or a newer connect.
                                if !cancel_token_for_task.is_cancelled() {
                                    lock(&handles).release_link(peripheral);
                                    events.send(PlatformEvent::Disconnected {
                                        handle: peripheral,
                                        error: Some("link lost".to_string()),
                                    });
                                }
                                break;
                            }
                        }
                    }
                    _ = cancel_token_for_task.cancelled() => break,
                }
            }
        });
    }

    fn cancel_connect(&mut self, peripheral: PlatformHandle) {
        self.teardown(peripheral);
    }

    fn disconnect(&mut self, peripheral: PlatformHandle) {
        self.teardown(peripheral);
    }

    fn discover_services(&mut self, peripheral: PlatformHandle, services: &[Uuid]) {
        let Some(events) = self.events() else {
            return;
        };
        let Some(device) = self.device(peripheral) else {
            events.send(PlatformEvent::ServicesDiscovered {
                handle: peripheral,
                services: Vec::new(),
                error: Some("unknown peripheral".to_string()),
            });
            return;
        };
        let wanted = services.to_vec();
        // Handles from an earlier link of this peripheral are stale.
        lock(&self.handles).forget_gatt(peripheral);
        let handles = self.handles.clone();

        tokio::spawn(async move {
            let mut found = Vec::new();
            for uuid in wanted {
                match device.discover_services_with_uuid(uuid).await {
                    Ok(services) => {
                        for service in services {
                            let service_uuid = service.uuid();
                            lock(&handles)
                                .services
                                .insert((peripheral, service_uuid), service);
                            if !found.contains(&service_uuid) {
                                found.push(service_uuid);
                            }
                        }
                    }
                    Err(e) => {
                        events.send(PlatformEvent::ServicesDiscovered {
                            handle: peripheral,
                            services: Vec::new(),
                            error: Some(e.to_string()),
                        });
                        return;
                    }
                }
            }
            events.send(PlatformEvent::ServicesDiscovered {
                handle: peripheral,
                services: found,
                error: None,
            });
        });
    }

    fn discover_characteristics(
        &mut self,
        peripheral: PlatformHandle,
        service: Uuid,
        characteristics: &[Uuid],
    ) {
        let Some(events) = self.events() else {
            return;
        };
        let Some(gatt_service) = lock(&self.handles)
            .services
            .get(&(peripheral, service))
            .cloned()
        else {
            events.send(PlatformEvent::CharacteristicsDiscovered {
                handle: peripheral,
                service,
                characteristics: Vec::new(),
                error: Some(format!("service {} not discovered", service)),
            });
            return;
        };
        let wanted = characteristics.to_vec();
        let handles = self.handles.clone();

        tokio::spawn(async move {
            let mut found = Vec::new();
            for uuid in wanted {
                match gatt_service.discover_characteristics_with_uuid(uuid).await {
                    Ok(characteristics) => {
                        for characteristic in characteristics {
                            let characteristic_uuid = characteristic.uuid();
                            let handle = lock(&handles)
                                .register_characteristic(peripheral, characteristic);
                            found.push((characteristic_uuid, handle));
                        }
                    }
                    Err(e) => {
                        events.send(PlatformEvent::CharacteristicsDiscovered {
                            handle: peripheral,
                            service,
                            characteristics: Vec::new(),
                            error: Some(e.to_string()),
                        });
                        return;
                    }
                }
            }
            events.send(PlatformEvent::CharacteristicsDiscovered {
                handle: peripheral,
                service,
                characteristics: found,
                error: None,
            });
        });
    }

    fn read_value(&mut self, peripheral: PlatformHandle, characteristic: CharacteristicHandle) {
        let (Some(events), Some(gatt_characteristic)) =
            (self.events(), self.characteristic(characteristic))
        else {
            return;
        };

        tokio::spawn(async move {
            let (value, error) = match gatt_characteristic.read().await {
                Ok(value) => (value, None),
                Err(e) => (Vec::new(), Some(e.to_string())),
            };
            events.send(PlatformEvent::ValueUpdated {
                handle: peripheral,
                characteristic,
                value,
                error,
            });
        });
    }

    fn write_value(
        &mut self,
        _peripheral: PlatformHandle,
        characteristic: CharacteristicHandle,
        value: &[u8],
        without_response: bool,
    ) {
        let Some(gatt_characteristic) = self.characteristic(characteristic) else {
            warn!("Write to unknown characteristic {:?} dropped", characteristic);
            return;
        };
        let data = value.to_vec();

        tokio::spawn(async move {
            let result = if without_response {
                gatt_characteristic.write_without_response(&data).await
            } else {
                gatt_characteristic.write(&data).await
            };
            if let Err(e) = result {
                error!("Write to {} failed: {}", gatt_characteristic.uuid(), e);
            }
        });
    }

    fn set_notify(
        &mut self,
        peripheral: PlatformHandle,
        characteristic: CharacteristicHandle,
        enabled: bool,
    ) {
        let Some(events) = self.events() else {
            return;
        };
        let previous = lock(&self.handles)
            .notify_tokens
            .remove(&(peripheral, characteristic));
        if let Some(token) = previous {
            token.cancel();
        }
        if !enabled {
            events.send(PlatformEvent::NotificationStateChanged {
                handle: peripheral,
                characteristic,
                enabled: false,
                error: None,
            });
            return;
        }
        let Some(gatt_characteristic) = self.characteristic(characteristic) else {
            events.send(PlatformEvent::NotificationStateChanged {
                handle: peripheral,
                characteristic,
                enabled: false,
                error: Some("unknown characteristic".to_string()),
            });
            return;
        };
        let cancel_token = CancellationToken::new();
        let cancel_token_for_task = cancel_token.clone();
        lock(&self.handles)
            .notify_tokens
            .insert((peripheral, characteristic), cancel_token);

        tokio::spawn(async move {
            info!("Subscribing to notifications...");
            let mut notification_stream = match gatt_characteristic.notify().await {
                Ok(stream) => stream,
                Err(e) => {
                    events.send(PlatformEvent::NotificationStateChanged {
                        handle: peripheral,
                        characteristic,
                        enabled: false,
                        error: Some(e.to_string()),
                    });
                    return;
                }
            };
            events.send(PlatformEvent::NotificationStateChanged {
                handle: peripheral,
                characteristic,
                enabled: true,
                error: None,
            });

            loop {
                tokio::select! {
                    result = notification_stream.next() => {
                        match result {
                            Some(Ok(value)) => {
                                events.send(PlatformEvent::ValueUpdated {
                                    handle: peripheral,
                                    characteristic,
                                    value,
                                    error: None,
                                });
                            }
                            Some(Err(e)) => {
                                error!("Error in notification stream: {}", e);
                                break;
                            }
                            None => break,
                        }
                    }
                    _ = cancel_token_for_task.cancelled() => break,
                }
            }
            info!("Notification stream ended");
        });
    }

    fn read_rssi(&mut self, peripheral: PlatformHandle) {
        let (Some(events), Some(device)) = (self.events(), self.device(peripheral)) else {
            return;
        };

        tokio::spawn(async move {
            let rssi = device.rssi().await.map_err(|e| e.to_string());
            events.send(PlatformEvent::RssiRead {
                handle: peripheral,
                rssi,
            });
        });
    }

    fn maximum_write_len(
        &self,
        _peripheral: PlatformHandle,
        characteristic: CharacteristicHandle,
    ) -> Option<usize> {
        self.characteristic(characteristic)?.max_write_len().ok()
    }
}
