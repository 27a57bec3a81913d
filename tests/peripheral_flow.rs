use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use tokio::sync::broadcast;
use uuid::Uuid;

use ble_explorer_lib::config::AppConfig;
use ble_explorer_lib::core::bluetooth::constants::{
    NO_NAME, UUID_BATTERY_LEVEL, UUID_BATTERY_SERVICE, UUID_CCCD, UUID_DEVICE_NAME,
    UUID_GENERIC_ACCESS_SERVICE,
};
use ble_explorer_lib::core::bluetooth::{
    AdapterEvent, AdapterState, AdvertisingData, BleAdapter, CharacteristicInfo,
    CharacteristicProperties, ConnectionStatus, DescriptorInfo, DiscoveredPeripheral,
    RegistryEvent, ScanOptions, ServiceTopology,
};
use ble_explorer_lib::state::AppState;
use ble_explorer_lib::view;

/// One peripheral "AA:BB" with two services; its only descriptor cannot be read.
struct SinglePeripheralAdapter {
    events: broadcast::Sender<AdapterEvent>,
    disconnects: Mutex<usize>,
}

impl SinglePeripheralAdapter {
    fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            events,
            disconnects: Mutex::new(0),
        }
    }
}

#[async_trait::async_trait]
impl BleAdapter for SinglePeripheralAdapter {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn scan(&self, _options: ScanOptions) -> Result<()> {
        for _ in 0..3 {
            let _ = self.events.send(AdapterEvent::PeripheralDiscovered(DiscoveredPeripheral {
                id: "AA:BB".into(),
                name: None,
                rssi: Some(-80),
                advertising: AdvertisingData {
                    is_connectable: true,
                    ..Default::default()
                },
            }));
        }
        let _ = self.events.send(AdapterEvent::ScanStopped);
        Ok(())
    }

    async fn connect(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self, _id: &str) -> Result<()> {
        *self.disconnects.lock().unwrap() += 1;
        Ok(())
    }

    async fn retrieve_services(&self, _id: &str) -> Result<ServiceTopology> {
        Ok(ServiceTopology {
            services: vec![UUID_GENERIC_ACCESS_SERVICE, UUID_BATTERY_SERVICE],
            characteristics: vec![
                CharacteristicInfo {
                    service: UUID_GENERIC_ACCESS_SERVICE,
                    characteristic: UUID_DEVICE_NAME,
                    properties: CharacteristicProperties {
                        read: true,
                        ..Default::default()
                    },
                    descriptors: Vec::new(),
                },
                CharacteristicInfo {
                    service: UUID_BATTERY_SERVICE,
                    characteristic: UUID_BATTERY_LEVEL,
                    properties: CharacteristicProperties {
                        read: true,
                        notify: true,
                        ..Default::default()
                    },
                    descriptors: vec![DescriptorInfo {
                        uuid: UUID_CCCD,
                        value: None,
                    }],
                },
            ],
        })
    }

    async fn read_rssi(&self, _id: &str) -> Result<i16> {
        Ok(-55)
    }

    async fn read_descriptor(
        &self,
        _id: &str,
        _service: Uuid,
        _characteristic: Uuid,
        descriptor: Uuid,
    ) -> Result<Vec<u8>> {
        Err(anyhow!("descriptor {} unreadable", descriptor))
    }

    async fn check_state(&self) -> Result<AdapterState> {
        Ok(AdapterState::On)
    }

    async fn enable(&self) -> Result<()> {
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AdapterEvent> {
        self.events.subscribe()
    }
}

#[tokio::test]
async fn discover_connect_and_inspect() {
    let mut config = AppConfig::default();
    config.connection.settle_delay_ms = 0;
    let adapter = Arc::new(SinglePeripheralAdapter::new());
    let app_state = AppState::with_adapter(adapter.clone(), config);
    let manager = app_state.get_bluetooth_manager_arc();

    let listener = manager.start().await;
    manager.press_scan_button().await;
    for _ in 0..200 {
        if !manager.is_scanning() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(!manager.is_scanning());

    let peripherals = manager.peripherals();
    assert_eq!(peripherals.len(), 1);
    assert_eq!(peripherals[0].name, NO_NAME);
    assert_eq!(
        view::render_row(&peripherals[0]),
        vec!["NO NAME", "RSSI: -80", "AA:BB", "Connectable"]
    );

    let mut changes = manager.subscribe_registry();
    let info = manager.toggle_connection("AA:BB").await.expect("connection ready");

    let mut statuses = Vec::new();
    while let Ok(event) = changes.try_recv() {
        if let RegistryEvent::StatusChanged { status, .. } = event {
            statuses.push(status);
        }
    }
    assert_eq!(statuses, vec![ConnectionStatus::Connecting, ConnectionStatus::Connected]);

    assert_eq!(info.topology.services.len(), 2);
    assert_eq!(info.rssi, Some(-55));
    assert_eq!(info.topology.characteristics[1].descriptor_values(), 0);
    assert!(view::render_details(&info).contains("<unread>"));

    manager.toggle_connection("AA:BB").await;
    assert_eq!(*adapter.disconnects.lock().unwrap(), 1);
    assert_eq!(
        manager.registry().get("AA:BB").unwrap().status,
        ConnectionStatus::Disconnected
    );

    // With the listener gone, a new scan only clears the registry
    listener.stop().await;
    manager.start_scan().await;
    assert!(manager.peripherals().is_empty());
}
