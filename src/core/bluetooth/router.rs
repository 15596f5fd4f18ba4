//! I/O routing
//! Routes reads, writes and RSSI requests to the right active peripheral and
//! characteristic, and turns incoming value updates into `DataReceived` events.

use log::{debug, error, info};
use uuid::Uuid;

use crate::core::bluetooth::constants::{ATT_WRITE_HEADER_LEN, DEFAULT_ATT_MTU};
use crate::core::bluetooth::dispatcher::CentralEvent;
use crate::core::bluetooth::error::{CentralError, Result};
use crate::core::bluetooth::manager::CentralCore;
use crate::core::bluetooth::registry::ServiceDescriptor;
use crate::core::bluetooth::types::{
    CharacteristicHandle, PeripheralId, PeripheralState, PlatformHandle,
};

/// Which registry characteristic an operation goes through.
#[derive(Debug, Clone, Copy)]
enum Role {
    Read,
    Write,
}

impl Role {
    fn pick(self, service: &ServiceDescriptor) -> Option<Uuid> {
        match self {
            Self::Read => service.read,
            Self::Write => service.write,
        }
    }
}

impl CentralCore {
    /// Resolves an operation target: the named active peripheral or the first connected
    /// one, which must be `Ready`.
    fn ready_peripheral(
        &self,
        id: Option<&PeripheralId>,
    ) -> Result<(PeripheralId, PlatformHandle)> {
        let active = self.index.active_by_id(id.map(PeripheralId::as_str))?;
        if active.record.state != PeripheralState::Ready {
            return Err(CentralError::NotConnected(active.record.id.clone()));
        }
        Ok((active.record.id.clone(), active.record.handle))
    }

    /// First service in registry order whose `role` characteristic is cached on `id`.
    fn route(&self, id: &PeripheralId, role: Role) -> Result<CharacteristicHandle> {
        let active = self.index.active_by_id(Some(id.as_str()))?;
        self.registry
            .services()
            .iter()
            .filter_map(|s| role.pick(s))
            .find_map(|uuid| active.gatt.characteristics.get(&uuid).copied())
            .ok_or_else(|| CentralError::CharacteristicMissing {
                peripheral: id.clone(),
                characteristic: format!("{:?}", role).to_lowercase(),
            })
    }

    pub(crate) fn read(&mut self, id: Option<PeripheralId>) -> Result<()> {
        self.adapter.ensure_ready()?;
        let (id, handle) = self.ready_peripheral(id.as_ref())?;
        let characteristic = self.route(&id, Role::Read)?;
        debug!("Reading from {}", id);
        self.driver.read_value(handle, characteristic);
        Ok(())
    }

    /// Fire-and-forget write; nothing reports its completion.
    pub(crate) fn write(&mut self, id: Option<PeripheralId>, data: Vec<u8>) -> Result<()> {
        self.adapter.ensure_ready()?;
        let (id, handle) = self.ready_peripheral(id.as_ref())?;
        let characteristic = self.route(&id, Role::Write)?;

        let max = self
            .driver
            .maximum_write_len(handle, characteristic)
            .unwrap_or(DEFAULT_ATT_MTU - ATT_WRITE_HEADER_LEN);
        if data.len() > max {
            return Err(CentralError::WriteTooLarge {
                len: data.len(),
                max,
            });
        }
        debug!("Writing {} bytes to {}", data.len(), id);
        self.driver.write_value(handle, characteristic, &data, true);
        Ok(())
    }

    pub(crate) fn read_rssi(&mut self, id: Option<PeripheralId>) -> Result<()> {
        self.adapter.ensure_ready()?;
        let (id, handle) = self.ready_peripheral(id.as_ref())?;
        debug!("Reading RSSI of {}", id);
        self.driver.read_rssi(handle);
        Ok(())
    }

    pub(crate) fn on_value_updated(
        &mut self,
        handle: PlatformHandle,
        characteristic: CharacteristicHandle,
        value: Vec<u8>,
        error: Option<String>,
    ) {
        let Some(active) = self.index.active_by_handle(handle) else {
            debug!("Value for untracked handle {:?}, dropped", handle);
            return;
        };
        if active.record.state != PeripheralState::Ready || !active.gatt.owns(characteristic) {
            debug!("Value for uncached characteristic on {}, dropped", active.record.id);
            return;
        }
        let id = active.record.id.clone();
        if let Some(error) = error {
            error!("Reading from {} failed: {}", id, error);
            self.dispatcher.emit(CentralError::PlatformError(error).into());
            return;
        }
        debug!("Received {} bytes from {}: {:?}", value.len(), id, value);
        self.dispatcher.emit(CentralEvent::data_received(id, value));
    }

    pub(crate) fn on_rssi_read(
        &mut self,
        handle: PlatformHandle,
        rssi: std::result::Result<i16, String>,
    ) {
        let Some(active) = self.index.active_by_handle_mut(handle) else {
            debug!("RSSI for untracked handle {:?}, dropped", handle);
            return;
        };
        let id = active.record.id.clone();
        match rssi {
            Ok(rssi) => {
                active.record.rssi = rssi;
                info!("RSSI of {}: {}", id, rssi);
                self.dispatcher.emit(CentralEvent::RssiUpdated { id, rssi });
            }
            Err(error) => {
                error!("Reading RSSI of {} failed: {}", id, error);
                self.dispatcher.emit(CentralError::PlatformError(error).into());
            }
        }
    }
}
