//! In-memory registry of discovered peripherals.
//!
//! The registry is the only owner of [`DeviceRecord`]s. Records are keyed by
//! the adapter's device id and listed in discovery order. Every mutation that
//! changes a record is published as a [`RegistryEvent`] so the presentation
//! layer can re-render without polling.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::debug;
use tokio::sync::broadcast;

use crate::core::bluetooth::constants::EVENT_CHANNEL_CAPACITY;
use crate::core::bluetooth::types::{
    ConnectionStatus, DeviceRecord, DiscoveredPeripheral, ServiceTopology,
};

/// Change notifications published by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Inserted(String),
    AdvertisingMerged(String),
    StatusChanged { id: String, status: ConnectionStatus },
    SignalUpdated { id: String, rssi: i16 },
    TopologyUpdated(String),
    Cleared,
}

#[derive(Default)]
struct Devices {
    by_id: HashMap<String, DeviceRecord>,
    /// Ids in discovery order
    order: Vec<String>,
}

/// Keyed collection of peripherals
pub struct DeviceRegistry {
    devices: Mutex<Devices>,
    changes: broadcast::Sender<RegistryEvent>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            devices: Mutex::new(Devices::default()),
            changes,
        }
    }

    /// Subscribe to change notifications. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.changes.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, Devices> {
        // Records are plain data; a panic mid-update cannot leave them half-written.
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: RegistryEvent) {
        // No subscribers is fine.
        let _ = self.changes.send(event);
    }

    /// Inserts a record for a newly discovered peripheral, or merges the new
    /// advertising data into the existing record. Other fields are untouched.
    pub fn upsert_discovered(&self, peripheral: DiscoveredPeripheral) {
        let id = peripheral.id.clone();
        let event = {
            let mut devices = self.lock();
            match devices.by_id.get_mut(&id) {
                Some(record) => {
                    let before = record.advertising.clone();
                    record.advertising.merge(peripheral.advertising);
                    (record.advertising != before).then(|| RegistryEvent::AdvertisingMerged(id))
                }
                None => {
                    debug!("Registering peripheral {}", id);
                    devices.order.push(id.clone());
                    devices
                        .by_id
                        .insert(id.clone(), DeviceRecord::from_discovery(peripheral));
                    Some(RegistryEvent::Inserted(id))
                }
            }
        };
        if let Some(event) = event {
            self.publish(event);
        }
    }

    fn set_status<F>(&self, id: &str, status: ConnectionStatus, allowed: F) -> bool
    where
        F: Fn(ConnectionStatus) -> bool,
    {
        let changed = {
            let mut devices = self.lock();
            match devices.by_id.get_mut(id) {
                Some(record) if record.status != status && allowed(record.status) => {
                    record.status = status;
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.publish(RegistryEvent::StatusChanged {
                id: id.to_string(),
                status,
            });
        }
        changed
    }

    /// Returns true if the record changed
    pub fn mark_connecting(&self, id: &str) -> bool {
        self.set_status(id, ConnectionStatus::Connecting, |_| true)
    }

    /// Starts a connection attempt. `Connecting` is announced even when an
    /// earlier failed attempt left the record there. Unknown ids are ignored.
    pub fn begin_connecting(&self, id: &str) -> bool {
        let known = {
            let mut devices = self.lock();
            match devices.by_id.get_mut(id) {
                Some(record) => {
                    record.status = ConnectionStatus::Connecting;
                    true
                }
                None => false,
            }
        };
        if known {
            self.publish(RegistryEvent::StatusChanged {
                id: id.to_string(),
                status: ConnectionStatus::Connecting,
            });
        }
        known
    }

    pub fn mark_connected(&self, id: &str) -> bool {
        self.set_status(id, ConnectionStatus::Connected, |_| true)
    }

    /// Only records that are connecting or connected become disconnected
    pub fn mark_disconnected(&self, id: &str) -> bool {
        self.set_status(id, ConnectionStatus::Disconnected, |current| {
            matches!(
                current,
                ConnectionStatus::Connecting | ConnectionStatus::Connected
            )
        })
    }

    pub fn attach_signal_strength(&self, id: &str, rssi: i16) -> bool {
        let changed = {
            let mut devices = self.lock();
            match devices.by_id.get_mut(id) {
                Some(record) if record.rssi != Some(rssi) => {
                    record.rssi = Some(rssi);
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.publish(RegistryEvent::SignalUpdated {
                id: id.to_string(),
                rssi,
            });
        }
        changed
    }

    pub fn attach_topology(&self, id: &str, topology: ServiceTopology) -> bool {
        let changed = {
            let mut devices = self.lock();
            match devices.by_id.get_mut(id) {
                Some(record) if record.topology.as_ref() != Some(&topology) => {
                    record.topology = Some(topology);
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.publish(RegistryEvent::TopologyUpdated(id.to_string()));
        }
        changed
    }

    /// Drops every record. Used when a new scan starts.
    pub fn clear_all(&self) {
        {
            let mut devices = self.lock();
            devices.by_id.clear();
            devices.order.clear();
        }
        self.publish(RegistryEvent::Cleared);
    }

    pub fn get(&self, id: &str) -> Option<DeviceRecord> {
        self.lock().by_id.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().by_id.contains_key(id)
    }

    /// All records in discovery order
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        let devices = self.lock();
        devices
            .order
            .iter()
            .filter_map(|id| devices.by_id.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
