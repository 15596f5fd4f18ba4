//! Connection handling
//! Per-peripheral connect/disconnect, GATT service and characteristic discovery
//! against the service registry, and notification enablement.

use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::bluetooth::dispatcher::CentralEvent;
use crate::core::bluetooth::error::{CentralError, Result};
use crate::core::bluetooth::manager::CentralCore;
use crate::core::bluetooth::types::{
    CharacteristicHandle, PeripheralId, PeripheralRecord, PeripheralState, PeripheralTarget,
    PlatformHandle,
};

impl CentralCore {
    /// Finds the record a target names, preferring the active map over the discovered list.
    fn resolve_target(&self, target: &PeripheralTarget) -> Result<PeripheralRecord> {
        let record = match target {
            PeripheralTarget::Id(id) => self
                .index
                .active_by_id(Some(id.as_str()))
                .ok()
                .map(|p| &p.record)
                .or_else(|| self.index.find_discovered(id.as_str())),
            PeripheralTarget::Handle(handle) => self
                .index
                .active_by_handle(*handle)
                .map(|p| &p.record)
                .or_else(|| self.index.find_discovered_by_handle(*handle)),
        };
        record.cloned().ok_or_else(|| {
            CentralError::NotFound(match target {
                PeripheralTarget::Id(id) => id.to_string(),
                PeripheralTarget::Handle(handle) => format!("handle {}", handle.0),
            })
        })
    }

    /// Id of the active peripheral a target names.
    pub(crate) fn resolve_active(&self, target: &PeripheralTarget) -> Result<PeripheralId> {
        let active = match target {
            PeripheralTarget::Id(id) => self.index.active_by_id(Some(id.as_str())).ok(),
            PeripheralTarget::Handle(handle) => self.index.active_by_handle(*handle),
        };
        active.map(|p| p.record.id.clone()).ok_or_else(|| {
            CentralError::NotFound(match target {
                PeripheralTarget::Id(id) => id.to_string(),
                PeripheralTarget::Handle(handle) => format!("handle {}", handle.0),
            })
        })
    }

    pub(crate) fn connect(&mut self, target: PeripheralTarget) -> Result<()> {
        self.adapter.ensure_ready()?;
        let record = self.resolve_target(&target)?;

        let mut superseded = 0;
        if let Some(active) = self.index.active_mut(record.id.as_str()) {
            match active.record.state {
                PeripheralState::Disconnecting => {
                    // The pending teardown no longer matches intent; its callback is owed.
                    superseded = active.superseded + 1;
                }
                state => {
                    debug!("Peripheral {} already {:?}, connect ignored", record.id, state);
                    return Ok(());
                }
            }
        }

        info!("Initiating connection to {} ({:?})", record.id, record.name);
        let id = record.id.clone();
        let handle = record.handle;
        self.index.mark_active(record, PeripheralState::Connecting);
        if let Some(active) = self.index.active_mut(id.as_str()) {
            active.superseded = superseded;
        }
        self.driver.connect(handle);
        Ok(())
    }

    pub(crate) fn disconnect(&mut self, target: PeripheralTarget) -> Result<()> {
        self.adapter.ensure_ready()?;
        let id = self.resolve_active(&target)?;
        let Some(active) = self.index.active_mut(id.as_str()) else {
            return Err(CentralError::NotFound(id.to_string()));
        };
        let handle = active.record.handle;
        match active.record.state {
            PeripheralState::Disconnecting => {
                debug!("Peripheral {} already disconnecting", id);
                return Ok(());
            }
            PeripheralState::Connecting => {
                info!("Cancelling pending connection to {}", id);
                active.record.state = PeripheralState::Disconnecting;
                self.driver.cancel_connect(handle);
            }
            _ => {
                info!("Disconnecting from {}", id);
                active.record.state = PeripheralState::Disconnecting;
                self.driver.disconnect(handle);
            }
        }
        Ok(())
    }

    pub(crate) fn enable_read_notifications(&mut self, target: PeripheralTarget) -> Result<()> {
        self.adapter.ensure_ready()?;
        let id = self.resolve_active(&target)?;
        self.subscribe_notifications(&id)
    }

    fn subscribe_notifications(&mut self, id: &PeripheralId) -> Result<()> {
        let notify_uuids: Vec<Uuid> = self
            .registry
            .services()
            .iter()
            .filter_map(|s| s.notify)
            .collect();
        let Some(active) = self.index.active_mut(id.as_str()) else {
            return Err(CentralError::NotFound(id.to_string()));
        };
        if active.record.state != PeripheralState::Ready {
            return Err(CentralError::NotConnected(id.clone()));
        }

        let handle = active.record.handle;
        for uuid in notify_uuids {
            let Some(characteristic) = active.gatt.characteristics.get(&uuid).copied() else {
                continue;
            };
            if active.gatt.notifying.insert(uuid) {
                info!("Subscribing to notifications of {} on {}", uuid, id);
                self.driver.set_notify(handle, characteristic, true);
            }
        }
        Ok(())
    }

    pub(crate) fn on_connected(&mut self, handle: PlatformHandle) {
        let Some(active) = self.index.active_by_handle_mut(handle) else {
            debug!("Connect callback for untracked handle {:?}, dropped", handle);
            return;
        };
        if active.record.state != PeripheralState::Connecting {
            debug!(
                "Connect callback for {} in state {:?} no longer matches intent, dropped",
                active.record.id, active.record.state
            );
            return;
        }
        active.record.state = PeripheralState::Connected;
        info!("Connection to {} established, discovering services...", active.record.id);

        let id = active.record.id.clone();
        let services = self.registry.service_uuids();
        if services.is_empty() {
            self.become_ready(&id);
            return;
        }
        active.record.state = PeripheralState::DiscoveringServices;
        self.driver.discover_services(handle, &services);
    }

    pub(crate) fn on_services_discovered(
        &mut self,
        handle: PlatformHandle,
        services: Vec<Uuid>,
        error: Option<String>,
    ) {
        let Some(active) = self.index.active_by_handle_mut(handle) else {
            debug!("Service discovery for untracked handle {:?}, dropped", handle);
            return;
        };
        if active.record.state != PeripheralState::DiscoveringServices {
            debug!("Stale service discovery for {}, dropped", active.record.id);
            return;
        }
        let id = active.record.id.clone();
        if let Some(error) = error {
            self.fail_discovery(&id, CentralError::PlatformError(error));
            return;
        }

        // Registry order; services the peripheral lacks are skipped.
        let matched: Vec<_> = self
            .registry
            .services()
            .iter()
            .filter(|s| services.contains(&s.service))
            .copied()
            .collect();
        for service in &services {
            if !matched.iter().any(|s| &s.service == service) {
                debug!("Ignoring unregistered service {} on {}", service, id);
            }
        }
        if matched.is_empty() {
            info!("{} offers none of the registered services", id);
            self.become_ready(&id);
            return;
        }

        active.gatt.pending_services = matched.iter().map(|s| s.service).collect();
        for service in matched {
            info!("Found service {} on {}", service.service, id);
            self.driver
                .discover_characteristics(handle, service.service, &service.characteristics());
        }
    }

    pub(crate) fn on_characteristics_discovered(
        &mut self,
        handle: PlatformHandle,
        service: Uuid,
        characteristics: Vec<(Uuid, CharacteristicHandle)>,
        error: Option<String>,
    ) {
        let wanted = self
            .registry
            .get(&service)
            .map(|s| s.characteristics())
            .unwrap_or_default();
        let Some(active) = self.index.active_by_handle_mut(handle) else {
            debug!("Characteristic discovery for untracked handle {:?}, dropped", handle);
            return;
        };
        if active.record.state != PeripheralState::DiscoveringServices
            || !active.gatt.pending_services.contains(&service)
        {
            debug!("Stale characteristic discovery for {}, dropped", active.record.id);
            return;
        }
        let id = active.record.id.clone();
        if let Some(error) = error {
            self.fail_discovery(&id, CentralError::PlatformError(error));
            return;
        }

        for (uuid, characteristic) in characteristics {
            if wanted.contains(&uuid) {
                debug!("Found characteristic {} of {} on {}", uuid, service, id);
                active.gatt.characteristics.insert(uuid, characteristic);
            }
        }
        if let Some(missing) = wanted
            .iter()
            .find(|uuid| !active.gatt.characteristics.contains_key(*uuid))
        {
            let error = CentralError::CharacteristicMissing {
                peripheral: id.clone(),
                characteristic: missing.to_string(),
            };
            self.fail_discovery(&id, error);
            return;
        }

        active.gatt.pending_services.remove(&service);
        if active.gatt.pending_services.is_empty() {
            self.become_ready(&id);
        }
    }

    fn become_ready(&mut self, id: &PeripheralId) {
        if self.index.update_state(id.as_str(), PeripheralState::Ready).is_err() {
            return;
        }
        info!("Peripheral {} is ready", id);
        self.dispatcher.emit(CentralEvent::Connected(id.clone()));

        if self.auto_enable_notifications {
            if let Err(e) = self.subscribe_notifications(id) {
                warn!("Failed to enable notifications on {}: {}", id, e);
                self.dispatcher.emit(e.into());
            }
        }
    }

    /// Reports `error` and tears the link down; the eviction reports `FailToConnect`.
    fn fail_discovery(&mut self, id: &PeripheralId, error: CentralError) {
        error!("Service discovery on {} failed: {}", id, error);
        self.dispatcher.emit(error.into());
        if let Some(active) = self.index.active_mut(id.as_str()) {
            active.gatt.failed = true;
            active.record.state = PeripheralState::Disconnecting;
            self.driver.disconnect(active.record.handle);
        }
    }

    pub(crate) fn on_failed_to_connect(&mut self, handle: PlatformHandle, error: Option<String>) {
        let Some(active) = self.index.active_by_handle_mut(handle) else {
            debug!("Connect failure for untracked handle {:?}, dropped", handle);
            return;
        };
        if active.superseded > 0 {
            active.superseded -= 1;
            debug!("Superseded connect failure for {}, dropped", active.record.id);
            return;
        }
        let id = active.record.id.clone();
        let event = match active.record.state {
            PeripheralState::Connecting => {
                warn!("Failed to connect to {}: {:?}", id, error);
                CentralEvent::FailToConnect(id.clone())
            }
            PeripheralState::Disconnecting => CentralEvent::Disconnected(id.clone()),
            state => {
                debug!("Connect failure for {} in state {:?}, dropped", id, state);
                return;
            }
        };
        self.index.evict_active(id.as_str());
        self.dispatcher.emit(event);
    }

    pub(crate) fn on_disconnected(&mut self, handle: PlatformHandle, error: Option<String>) {
        let Some(active) = self.index.active_by_handle_mut(handle) else {
            debug!("Disconnect for untracked handle {:?}, dropped", handle);
            return;
        };
        if active.superseded > 0 {
            active.superseded -= 1;
            debug!("Superseded disconnect for {}, dropped", active.record.id);
            return;
        }
        let id = active.record.id.clone();
        let Some(evicted) = self.index.evict_active(id.as_str()) else {
            return;
        };
        let event = Self::eviction_event(&evicted.record, evicted.gatt.failed);
        match (&event, error) {
            (CentralEvent::ConnectionLost(_), error) => {
                warn!("Connection to {} lost: {:?}", id, error)
            }
            (_, Some(error)) => info!("{} disconnected with error: {}", id, error),
            _ => info!("{} disconnected", id),
        }
        self.dispatcher.emit(event);
    }

    /// The event that reports the eviction of a record, given its state at eviction.
    pub(crate) fn eviction_event(record: &PeripheralRecord, failed: bool) -> CentralEvent {
        let id = record.id.clone();
        match record.state {
            PeripheralState::Disconnecting if failed => CentralEvent::FailToConnect(id),
            PeripheralState::Disconnecting => CentralEvent::Disconnected(id),
            PeripheralState::Ready => CentralEvent::ConnectionLost(id),
            _ => CentralEvent::FailToConnect(id),
        }
    }

    pub(crate) fn on_notification_state(
        &mut self,
        handle: PlatformHandle,
        characteristic: CharacteristicHandle,
        enabled: bool,
        error: Option<String>,
    ) {
        let Some(active) = self.index.active_by_handle_mut(handle) else {
            debug!("Notification state for untracked handle {:?}, dropped", handle);
            return;
        };
        let Some(uuid) = active
            .gatt
            .characteristics
            .iter()
            .find(|(_, h)| **h == characteristic)
            .map(|(uuid, _)| *uuid)
        else {
            debug!("Notification state for uncached characteristic, dropped");
            return;
        };
        let id = active.record.id.clone();
        match error {
            Some(error) => {
                active.gatt.notifying.remove(&uuid);
                error!("Enabling notifications of {} on {} failed: {}", uuid, id, error);
                self.dispatcher.emit(CentralError::PlatformError(error).into());
            }
            None => info!("Notifications of {} on {} enabled: {}", uuid, id, enabled),
        }
    }
}
