//! Peripheral index
//! Keeps the deduplicated, RSSI-sorted list of discovered peripherals and the
//! insertion-ordered map of active (connection-bearing) peripherals.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use uuid::Uuid;

use crate::core::bluetooth::error::{CentralError, Result};
use crate::core::bluetooth::types::{
    CharacteristicHandle, PeripheralId, PeripheralRecord, PeripheralState, PlatformHandle,
};

/// GATT state the connection manager keeps for one active peripheral.
#[derive(Debug, Clone, Default)]
pub struct GattCache {
    /// characteristic UUID -> platform handle
    pub characteristics: HashMap<Uuid, CharacteristicHandle>,
    /// Services whose characteristic discovery is still outstanding
    pub pending_services: HashSet<Uuid>,
    /// Notify characteristics a subscription has been requested for
    pub notifying: HashSet<Uuid>,
    /// Set when discovery failed and the link is being torn down
    pub failed: bool,
}

impl GattCache {
    pub fn owns(&self, handle: CharacteristicHandle) -> bool {
        self.characteristics.values().any(|h| *h == handle)
    }
}

/// An entry of the active map.
#[derive(Debug, Clone)]
pub struct ActivePeripheral {
    pub record: PeripheralRecord,
    pub gatt: GattCache,
    /// Teardown callbacks still owed by the platform for links a newer connect replaced
    pub superseded: u32,
}

#[derive(Debug, Clone)]
struct DiscoveredEntry {
    record: PeripheralRecord,
    seq: u64,
}

#[derive(Debug, Default)]
pub struct PeripheralIndex {
    discovered: Vec<DiscoveredEntry>,
    next_seq: u64,
    active: IndexMap<PeripheralId, ActivePeripheral>,
}

impl PeripheralIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or refreshes a discovered peripheral and re-sorts the list.
    ///
    /// Returns true when the id was not yet in the list.
    pub fn observe_advertisement(
        &mut self,
        id: PeripheralId,
        name: Option<String>,
        rssi: i16,
        handle: PlatformHandle,
    ) -> bool {
        let inserted = match self.discovered.iter_mut().find(|e| e.record.id == id) {
            Some(entry) => {
                entry.record.rssi = rssi;
                entry.record.handle = handle;
                if name.is_some() {
                    entry.record.name = name;
                }
                false
            }
            None => {
                self.discovered.push(DiscoveredEntry {
                    record: PeripheralRecord::new(id, name, rssi, handle),
                    seq: self.next_seq,
                });
                self.next_seq += 1;
                true
            }
        };
        // Strongest first, ties by first sighting.
        self.discovered
            .sort_by(|a, b| b.record.rssi.cmp(&a.record.rssi).then(a.seq.cmp(&b.seq)));
        inserted
    }

    pub fn clear_discovered(&mut self) {
        self.discovered.clear();
    }

    pub fn discovered_len(&self) -> usize {
        self.discovered.len()
    }

    /// Stable copy of the discovered list in its current order.
    pub fn discovered(&self) -> Vec<PeripheralRecord> {
        self.discovered.iter().map(|e| e.record.clone()).collect()
    }

    pub fn find_discovered(&self, id: &str) -> Option<&PeripheralRecord> {
        self.discovered
            .iter()
            .map(|e| &e.record)
            .find(|r| r.id.as_str() == id)
    }

    pub fn find_discovered_by_handle(&self, handle: PlatformHandle) -> Option<&PeripheralRecord> {
        self.discovered
            .iter()
            .map(|e| &e.record)
            .find(|r| r.handle == handle)
    }

    /// Inserts the record into the active map in `state`, or updates the state of an
    /// existing entry. A re-activated entry starts over with an empty GATT cache.
    pub fn mark_active(&mut self, record: PeripheralRecord, state: PeripheralState) {
        debug_assert!(state.is_connection_bearing());
        let mut record = record;
        record.state = state;
        match self.active.get_mut(&record.id) {
            Some(entry) => {
                entry.record = record;
                entry.gatt = GattCache::default();
            }
            None => {
                self.active.insert(
                    record.id.clone(),
                    ActivePeripheral {
                        record,
                        gatt: GattCache::default(),
                        superseded: 0,
                    },
                );
            }
        }
    }

    pub fn update_state(&mut self, id: &str, state: PeripheralState) -> Result<()> {
        debug_assert!(state.is_connection_bearing());
        let entry = self
            .active
            .get_mut(id)
            .ok_or_else(|| CentralError::NotFound(id.to_string()))?;
        entry.record.state = state;
        Ok(())
    }

    /// Removes the peripheral from the active map, keeping the order of the rest.
    pub fn evict_active(&mut self, id: &str) -> Option<ActivePeripheral> {
        self.active.shift_remove(id)
    }

    /// The named active peripheral, or the first connected one when `id` is `None`.
    pub fn active_by_id(&self, id: Option<&str>) -> Result<&ActivePeripheral> {
        match id {
            Some(id) => self
                .active
                .get(id)
                .ok_or_else(|| CentralError::NotFound(id.to_string())),
            None => self
                .active
                .values()
                .next()
                .ok_or_else(|| CentralError::NotFound("no active peripheral".to_string())),
        }
    }

    pub fn active_mut(&mut self, id: &str) -> Option<&mut ActivePeripheral> {
        self.active.get_mut(id)
    }

    pub fn active_by_handle(&self, handle: PlatformHandle) -> Option<&ActivePeripheral> {
        self.active.values().find(|p| p.record.handle == handle)
    }

    pub fn active_by_handle_mut(
        &mut self,
        handle: PlatformHandle,
    ) -> Option<&mut ActivePeripheral> {
        self.active.values_mut().find(|p| p.record.handle == handle)
    }

    pub fn active_records(&self) -> Vec<PeripheralRecord> {
        self.active.values().map(|p| p.record.clone()).collect()
    }

    pub fn active_ids(&self) -> Vec<PeripheralId> {
        self.active.keys().cloned().collect()
    }

    pub fn is_ready(&self, id: &str) -> bool {
        self.active
            .get(id)
            .is_some_and(|p| p.record.state == PeripheralState::Ready)
    }
}
