//! [`BleAdapter`] implementation on top of the `bluest` crate

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Result, anyhow};
use bluest::{Adapter, AdvertisingDevice, Characteristic, Device};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::error::Elapsed;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::adapter::{BleAdapter, ScanOptions};
use crate::core::bluetooth::constants::{
    ADAPTER_ENABLE_TIMEOUT_SECS, ADAPTER_STATE_PROBE_MS, EVENT_CHANNEL_CAPACITY,
};
use crate::core::bluetooth::notification::NotificationHandler;
use crate::core::bluetooth::types::{
    AdapterEvent, AdapterState, AdvertisingData, CharacteristicInfo, CharacteristicProperties,
    DescriptorInfo, DiscoveredPeripheral, ManufacturerData, ServiceTopology,
};

type DeviceMap = Arc<Mutex<HashMap<String, Device>>>;

/// Maps the outcome of a bounded `wait_available` call to an adapter state.
/// An adapter that is still unavailable when the wait runs out counts as off.
fn state_from_probe<E: Display>(
    probe: Result<std::result::Result<(), E>, Elapsed>,
) -> AdapterState {
    match probe {
        Ok(Ok(())) => AdapterState::On,
        Ok(Err(e)) => {
            warn!("Could not query adapter availability: {}", e);
            AdapterState::Unknown
        }
        Err(_) => AdapterState::Off,
    }
}

struct ScanTask {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

/// The host's default Bluetooth adapter
pub struct BluestAdapter {
    adapter: Adapter,
    /// Devices seen during the last scan, by id
    devices: DeviceMap,
    events: broadcast::Sender<AdapterEvent>,
    notification_handler: NotificationHandler,
    scan_task: tokio::sync::Mutex<Option<ScanTask>>,
}

impl BluestAdapter {
    pub async fn new() -> Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| anyhow!("No Bluetooth adapter found"))?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            adapter,
            devices: Arc::new(Mutex::new(HashMap::new())),
            notification_handler: NotificationHandler::new(events.clone()),
            events,
            scan_task: tokio::sync::Mutex::new(None),
        })
    }

    async fn probe_state(&self) -> AdapterState {
        let window = Duration::from_millis(ADAPTER_STATE_PROBE_MS);
        state_from_probe(tokio::time::timeout(window, self.adapter.wait_available()).await)
    }

    fn device(&self, id: &str) -> Result<Device> {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("Device not found with ID: {}", id))
    }

    async fn stop_scan_task(&self) {
        let previous = self.scan_task.lock().await.take();
        if let Some(task) = previous {
            info!("Stopping previous scan task...");
            task.cancel_token.cancel();
            if let Err(e) = task.handle.await {
                if !e.is_cancelled() {
                    error!("Scan task finished with an unexpected join error: {:?}", e);
                }
            }
        }
    }

    async fn scan_task(
        adapter: Adapter,
        devices: DeviceMap,
        events: broadcast::Sender<AdapterEvent>,
        options: ScanOptions,
        cancel_token: CancellationToken,
        started: oneshot::Sender<Result<()>>,
    ) {
        let mut scan_stream = match adapter.scan(&options.service_filters).await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = started.send(Err(e.into()));
                return;
            }
        };
        let _ = started.send(Ok(()));

        // Peripherals already connected to the host do not advertise
        if options.service_filters.is_empty() {
            match adapter.connected_devices().await {
                Ok(connected) => {
                    for device in connected {
                        let peripheral = Self::connected_peripheral(&device);
                        Self::remember(&devices, &events, device, peripheral);
                    }
                }
                Err(e) => warn!("Failed to list connected devices: {}", e),
            }
        }

        let deadline = tokio::time::sleep(options.duration);
        tokio::pin!(deadline);
        let mut seen = HashSet::new();

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => break,
                _ = &mut deadline => break,
                result = scan_stream.next() => match result {
                    Some(discovered) => {
                        let peripheral = Self::advertised_peripheral(&discovered);
                        if !options.allow_duplicates && !seen.insert(peripheral.id.clone()) {
                            continue;
                        }
                        Self::remember(&devices, &events, discovered.device, peripheral);
                    }
                    None => {
                        info!("Bluetooth scan stream has ended.");
                        break;
                    }
                },
            }
        }

        let _ = events.send(AdapterEvent::ScanStopped);
    }

    fn remember(
        devices: &DeviceMap,
        events: &broadcast::Sender<AdapterEvent>,
        device: Device,
        peripheral: DiscoveredPeripheral,
    ) {
        debug!("Found device - ID: {}, RSSI: {:?}", peripheral.id, peripheral.rssi);
        devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peripheral.id.clone(), device);
        let _ = events.send(AdapterEvent::PeripheralDiscovered(peripheral));
    }

    fn advertised_peripheral(discovered: &AdvertisingDevice) -> DiscoveredPeripheral {
        let adv = &discovered.adv_data;
        let advertising = AdvertisingData {
            local_name: adv.local_name.clone(),
            tx_power_level: adv.tx_power_level,
            is_connectable: adv.is_connectable,
            service_uuids: adv.services.iter().copied().collect(),
            manufacturer_data: adv.manufacturer_data.as_ref().map(|m| ManufacturerData {
                company_id: m.company_id,
                data: m.data.to_vec(),
            }),
            service_data: adv
                .service_data
                .iter()
                .map(|(uuid, data)| (*uuid, data.to_vec()))
                .collect(),
        };

        DiscoveredPeripheral {
            id: discovered.device.id().to_string(),
            name: adv
                .local_name
                .clone()
                .or_else(|| discovered.device.name().ok()),
            rssi: discovered.rssi,
            advertising,
        }
    }

    fn connected_peripheral(device: &Device) -> DiscoveredPeripheral {
        let name = device.name().ok();
        DiscoveredPeripheral {
            id: device.id().to_string(),
            name: name.clone(),
            rssi: None,
            advertising: AdvertisingData {
                local_name: name,
                is_connectable: true,
                ..Default::default()
            },
        }
    }

    async fn characteristic_info(
        service: Uuid,
        characteristic: &Characteristic,
    ) -> Result<CharacteristicInfo> {
        let props = characteristic.properties().await?;
        let descriptors = match characteristic.discover_descriptors().await {
            Ok(descriptors) => descriptors
                .iter()
                .map(|d| DescriptorInfo {
                    uuid: d.uuid(),
                    value: None,
                })
                .collect(),
            Err(e) => {
                warn!("Failed to discover descriptors of {}: {}", characteristic.uuid(), e);
                Vec::new()
            }
        };

        Ok(CharacteristicInfo {
            service,
            characteristic: characteristic.uuid(),
            properties: CharacteristicProperties {
                broadcast: props.broadcast,
                read: props.read,
                write_without_response: props.write_without_response,
                write: props.write,
                notify: props.notify,
                indicate: props.indicate,
                authenticated_signed_writes: props.authenticated_signed_writes,
                extended_properties: props.extended_properties,
            },
            descriptors,
        })
    }
}

#[async_trait::async_trait]
impl BleAdapter for BluestAdapter {
    async fn start(&self) -> Result<()> {
        let state = self.probe_state().await;
        info!("Bluetooth adapter started (state: {:?}).", state);
        Ok(())
    }

    async fn scan(&self, options: ScanOptions) -> Result<()> {
        self.stop_scan_task().await;
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        let cancel_token = CancellationToken::new();
        let (started_tx, started_rx) = oneshot::channel();
        let handle = tokio::spawn(Self::scan_task(
            self.adapter.clone(),
            self.devices.clone(),
            self.events.clone(),
            options,
            cancel_token.clone(),
            started_tx,
        ));
        *self.scan_task.lock().await = Some(ScanTask {
            cancel_token,
            handle,
        });

        started_rx
            .await
            .map_err(|_| anyhow!("Scan task ended before the scan started"))?
    }

    async fn connect(&self, id: &str) -> Result<()> {
        let device = self.device(id)?;
        if device.is_connected().await {
            info!("Device {} already connected.", id);
            return Ok(());
        }
        info!("Initiating connection to {}...", id);
        self.adapter.connect_device(&device).await?;
        Ok(())
    }

    async fn disconnect(&self, id: &str) -> Result<()> {
        let device = self.device(id)?;
        self.notification_handler.stop_notifications(id);
        if device.is_connected().await {
            info!("Disconnecting from device {}", id);
            self.adapter.disconnect_device(&device).await?;
        } else {
            info!("Device {} not connected", id);
        }
        Ok(())
    }

    async fn retrieve_services(&self, id: &str) -> Result<ServiceTopology> {
        let device = self.device(id)?;
        let mut topology = ServiceTopology::default();
        let mut notifying = Vec::new();

        for service in device.discover_services().await? {
            let service_uuid = service.uuid();
            topology.services.push(service_uuid);
            for characteristic in service.discover_characteristics().await? {
                let info = Self::characteristic_info(service_uuid, &characteristic).await?;
                if info.properties.notify || info.properties.indicate {
                    notifying.push(characteristic);
                }
                topology.characteristics.push(info);
            }
        }

        self.notification_handler
            .setup_notifications(id, device, notifying);
        Ok(topology)
    }

    async fn read_rssi(&self, id: &str) -> Result<i16> {
        let device = self.device(id)?;
        Ok(device.rssi().await?)
    }

    async fn read_descriptor(
        &self,
        id: &str,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
    ) -> Result<Vec<u8>> {
        let device = self.device(id)?;
        let service = device
            .services()
            .await?
            .into_iter()
            .find(|s| s.uuid() == service)
            .ok_or_else(|| anyhow!("Service not found: {}", service))?;
        let characteristic = service
            .characteristics()
            .await?
            .into_iter()
            .find(|c| c.uuid() == characteristic)
            .ok_or_else(|| anyhow!("Characteristic not found: {}", characteristic))?;
        let descriptor = characteristic
            .descriptors()
            .await?
            .into_iter()
            .find(|d| d.uuid() == descriptor)
            .ok_or_else(|| anyhow!("Descriptor not found: {}", descriptor))?;
        Ok(descriptor.read().await?)
    }

    async fn check_state(&self) -> Result<AdapterState> {
        Ok(self.probe_state().await)
    }

    /// The radio cannot be switched on from here; wait for the user to do it.
    async fn enable(&self) -> Result<()> {
        let timeout = Duration::from_secs(ADAPTER_ENABLE_TIMEOUT_SECS);
        tokio::time::timeout(timeout, self.adapter.wait_available())
            .await
            .map_err(|_| {
                anyhow!("Bluetooth adapter did not become available within {:?}", timeout)
            })??;
        info!("Bluetooth adapter is available.");
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AdapterEvent> {
        self.events.subscribe()
    }
}
