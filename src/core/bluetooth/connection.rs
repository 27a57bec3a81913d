//! Bluetooth connection handling
//! This module drives a peripheral through connect, service discovery,
//! RSSI and descriptor reads, and handles disconnecting from it.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::broadcast;

use crate::core::bluetooth::adapter::{AlertSink, BleAdapter};
use crate::core::bluetooth::constants::EVENT_CHANNEL_CAPACITY;
use crate::core::bluetooth::registry::DeviceRegistry;
use crate::core::bluetooth::types::{
    PeripheralInfo, ServiceTopology, WorkflowEvent, WorkflowState,
};
use crate::core::error::{BleError, BleResult};

/// Tracks the state of one connection attempt and announces each transition
struct ConnectionAttempt<'a> {
    id: &'a str,
    state: WorkflowState,
    events: &'a broadcast::Sender<WorkflowEvent>,
}

impl<'a> ConnectionAttempt<'a> {
    fn new(id: &'a str, events: &'a broadcast::Sender<WorkflowEvent>) -> Self {
        Self {
            id,
            state: WorkflowState::Idle,
            events,
        }
    }

    fn advance(&mut self, next: WorkflowState) {
        debug!("[connect][{}] {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
        let _ = self.events.send(WorkflowEvent::StateChanged {
            id: self.id.to_string(),
            state: next,
        });
    }

    /// Ends the attempt on an adapter error
    fn fail_with<F>(&mut self, source: anyhow::Error, wrap: F) -> BleError
    where
        F: FnOnce(String, anyhow::Error) -> BleError,
    {
        error!("[connect][{}] {:#} in state {:?}", self.id, source, self.state);
        self.advance(WorkflowState::Failed);
        wrap(self.id.to_string(), source)
    }

    fn fail(&mut self, err: BleError) -> BleError {
        error!("[connect][{}] {} in state {:?}", self.id, err, self.state);
        self.advance(WorkflowState::Failed);
        err
    }
}

/// Runs connection attempts against the adapter and keeps the registry in step
#[derive(Clone)]
pub struct ConnectionManager {
    adapter: Arc<dyn BleAdapter>,
    registry: Arc<DeviceRegistry>,
    alerts: Arc<dyn AlertSink>,
    settle_delay: Duration,
    events: broadcast::Sender<WorkflowEvent>,
}

impl ConnectionManager {
    pub fn new(
        adapter: Arc<dyn BleAdapter>,
        registry: Arc<DeviceRegistry>,
        alerts: Arc<dyn AlertSink>,
        settle_delay: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            adapter,
            registry,
            alerts,
            settle_delay,
            events,
        }
    }

    /// Subscribe to workflow state changes and "ready" snapshots
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    /// Connects to a discovered peripheral and collects its full topology.
    ///
    /// Connect and service discovery failures abort the attempt and leave the
    /// registry as it was at that point. A failed RSSI read or descriptor read
    /// is logged and skipped. No step is retried.
    pub async fn connect(&self, id: &str) -> BleResult<PeripheralInfo> {
        if !self.registry.contains(id) {
            warn!("[connect] {} has not been discovered", id);
            return Err(BleError::UnknownPeripheral(id.to_string()));
        }

        let mut attempt = ConnectionAttempt::new(id, &self.events);

        self.alerts.show("Connecting", &format!("Connecting to {}", id));
        self.registry.begin_connecting(id);
        attempt.advance(WorkflowState::Connecting);

        if let Err(source) = self.adapter.connect(id).await {
            return Err(attempt.fail_with(source, |id, source| BleError::ConnectFailed {
                id,
                source,
            }));
        }
        info!("[connect] Connected to {}", id);
        self.registry.mark_connected(id);
        attempt.advance(WorkflowState::Connected);

        tokio::time::sleep(self.settle_delay).await;

        let mut topology = match self.adapter.retrieve_services(id).await {
            Ok(topology) => topology,
            Err(source) => {
                return Err(attempt.fail_with(source, |id, source| {
                    BleError::ServiceDiscoveryFailed { id, source }
                }));
            }
        };
        info!(
            "[connect][{}] retrieved {} services, {} characteristics",
            id,
            topology.services.len(),
            topology.characteristics.len()
        );
        self.registry.attach_topology(id, topology.clone());
        attempt.advance(WorkflowState::ServicesRetrieved);

        let rssi = match self.adapter.read_rssi(id).await {
            Ok(rssi) => {
                debug!("[connect][{}] current RSSI: {}", id, rssi);
                Some(rssi)
            }
            Err(source) => {
                let err = BleError::SignalReadFailed {
                    id: id.to_string(),
                    source,
                };
                warn!("[connect][{}] {:#}", id, anyhow::Error::from(err));
                None
            }
        };
        attempt.advance(WorkflowState::SignalRead);

        let read = self.read_descriptors(id, &mut topology).await;
        debug!("[connect][{}] read {} descriptor values", id, read);
        attempt.advance(WorkflowState::DescriptorsRead);

        if let Some(rssi) = rssi {
            self.registry.attach_signal_strength(id, rssi);
        }
        self.registry.attach_topology(id, topology);

        // A scan started meanwhile clears the registry; drop the link it no longer tracks
        let Some(info) = self.registry.get(id).map(|record| record.to_peripheral_info()) else {
            if let Err(e) = self.adapter.disconnect(id).await {
                warn!("[connect][{}] failed to drop untracked link: {:#}", id, e);
            }
            return Err(attempt.fail(BleError::UnknownPeripheral(id.to_string())));
        };
        attempt.advance(WorkflowState::Ready);

        self.alerts.show("Connected", &format!("Connected to {}", id));
        let _ = self.events.send(WorkflowEvent::Ready(info.clone()));
        Ok(info)
    }

    /// Reads every descriptor of every characteristic, storing the values in
    /// `topology`. Returns how many reads succeeded.
    async fn read_descriptors(&self, id: &str, topology: &mut ServiceTopology) -> usize {
        let mut read = 0;
        for characteristic in topology.characteristics.iter_mut() {
            for descriptor in characteristic.descriptors.iter_mut() {
                match self
                    .adapter
                    .read_descriptor(
                        id,
                        characteristic.service,
                        characteristic.characteristic,
                        descriptor.uuid,
                    )
                    .await
                {
                    Ok(value) => {
                        debug!(
                            "[connect][{}] {} {} {} descriptor read as: {:?}",
                            id,
                            characteristic.service,
                            characteristic.characteristic,
                            descriptor.uuid,
                            value
                        );
                        descriptor.value = Some(value);
                        read += 1;
                    }
                    Err(source) => {
                        let err = BleError::DescriptorReadFailed {
                            id: id.to_string(),
                            characteristic: characteristic.characteristic,
                            descriptor: descriptor.uuid,
                            source,
                        };
                        warn!("[connect][{}] {:#}", id, anyhow::Error::from(err));
                    }
                }
            }
        }
        read
    }

    /// Disconnect from a peripheral. Peripherals that are not connecting or
    /// connected are left alone.
    pub async fn disconnect(&self, id: &str) -> BleResult<()> {
        let active = self
            .registry
            .get(id)
            .map(|record| record.is_connected() || record.is_connecting())
            .unwrap_or(false);
        if !active {
            info!("[disconnect] Device {} not connected", id);
            return Ok(());
        }

        self.alerts.show("Disconnecting", &format!("Disconnecting from {}", id));
        if let Err(source) = self.adapter.disconnect(id).await {
            error!("[disconnect] failed to disconnect from {}: {:#}", id, source);
            return Err(BleError::DisconnectFailed {
                id: id.to_string(),
                source,
            });
        }
        info!("[disconnect] Disconnected from {}", id);
        self.registry.mark_disconnected(id);
        self.alerts.show("Disconnected", &format!("Disconnected from {}", id));
        Ok(())
    }
}
