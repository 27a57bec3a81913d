//! Bluetooth manager
//! This module provides the main interface for bluetooth operations

use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, error, info, warn};
use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::core::bluetooth::adapter::{
    AlertSink, BleAdapter, Permission, PermissionGate, PermissionStatus,
};
use crate::core::bluetooth::connection::ConnectionManager;
use crate::core::bluetooth::registry::{DeviceRegistry, RegistryEvent};
use crate::core::bluetooth::scanner::{BluetoothScanner, EventListener};
use crate::core::bluetooth::types::{AdapterState, DeviceRecord, PeripheralInfo, WorkflowEvent};
use crate::core::error::BleResult;

/// Manages Bluetooth operations
pub struct BluetoothManager {
    adapter: Arc<dyn BleAdapter>,
    /// Peripherals discovered during the current scan
    registry: Arc<DeviceRegistry>,
    scanner: BluetoothScanner,
    connection_manager: ConnectionManager,
    permissions: Arc<dyn PermissionGate>,
    bt_state: Mutex<AdapterState>,
    /// Held for the duration of a connection attempt; one attempt runs at a time
    connect_gate: tokio::sync::Mutex<()>,
}

impl BluetoothManager {
    pub fn new(
        adapter: Arc<dyn BleAdapter>,
        alerts: Arc<dyn AlertSink>,
        permissions: Arc<dyn PermissionGate>,
        config: &AppConfig,
    ) -> Self {
        let registry = Arc::new(DeviceRegistry::new());
        let scanner = BluetoothScanner::new(
            adapter.clone(),
            registry.clone(),
            alerts.clone(),
            config.scan.scan_options(),
        );
        let connection_manager = ConnectionManager::new(
            adapter.clone(),
            registry.clone(),
            alerts,
            config.connection.settle_delay(),
        );

        Self {
            adapter,
            registry,
            scanner,
            connection_manager,
            permissions,
            bt_state: Mutex::new(AdapterState::Off),
            connect_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Starts the adapter, requests permissions, checks the adapter state and
    /// begins applying adapter events to the registry. Events are applied for
    /// as long as the returned listener is alive.
    pub async fn start(&self) -> EventListener {
        if let Err(e) = self.adapter.start().await {
            error!("[BluetoothManager] Error starting: {:#}", e);
        }
        self.request_permissions().await;
        self.check_bluetooth_state().await;
        self.scanner.listen()
    }

    /// Asks for the runtime permissions once. The outcome is logged only;
    /// adapter calls are issued regardless.
    pub async fn request_permissions(&self) {
        let requested: &[Permission] = if self.permissions.uses_modern_permissions() {
            &Permission::MODERN
        } else {
            &Permission::LEGACY
        };

        match self.permissions.request(requested).await {
            Ok(result) => {
                debug!("[permissions] Permissions result: {:?}", result);
                for (permission, status) in result {
                    if status == PermissionStatus::Denied {
                        warn!("[permissions] {:?} was denied", permission);
                    }
                }
            }
            Err(e) => error!("[permissions] Error requesting permissions: {:#}", e),
        }
    }

    pub fn bt_state(&self) -> AdapterState {
        *self.bt_state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queries the adapter power state. On failure the last known state is kept.
    pub async fn check_bluetooth_state(&self) -> AdapterState {
        match self.adapter.check_state().await {
            Ok(state) => {
                debug!("[check_bluetooth_state] Bluetooth state: {:?}", state);
                *self.bt_state.lock().unwrap_or_else(PoisonError::into_inner) = state;
                state
            }
            Err(e) => {
                error!("[check_bluetooth_state] Error: {:#}", e);
                self.bt_state()
            }
        }
    }

    pub async fn enable_bluetooth(&self) -> AdapterState {
        match self.adapter.enable().await {
            Ok(()) => debug!("[enable_bluetooth] Bluetooth enabled"),
            Err(e) => error!("[enable_bluetooth] Error: {:#}", e),
        }
        self.check_bluetooth_state().await
    }

    pub async fn start_scan(&self) {
        if let Err(e) = self.scanner.start_scan().await {
            error!("[start_scan] Error: {:#}", e);
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scanner.is_scanning()
    }

    /// The scan button scans when the adapter is on and enables it otherwise
    pub async fn press_scan_button(&self) {
        if self.bt_state() == AdapterState::On {
            self.start_scan().await;
        } else {
            self.enable_bluetooth().await;
        }
    }

    /// Runs the connection workflow for a discovered peripheral
    pub async fn connect_peripheral(&self, id: &str) -> BleResult<PeripheralInfo> {
        let _attempt = self.connect_gate.lock().await;
        self.connection_manager.connect(id).await
    }

    pub async fn disconnect_peripheral(&self, id: &str) -> BleResult<()> {
        self.connection_manager.disconnect(id).await
    }

    /// Disconnects a connected peripheral, connects any other one.
    /// Returns the detail snapshot when a connection became ready.
    pub async fn toggle_connection(&self, id: &str) -> Option<PeripheralInfo> {
        let connected = self
            .registry
            .get(id)
            .map(|record| record.is_connected())
            .unwrap_or(false);

        if connected {
            // Failures are already logged by the connection manager
            let _ = self.disconnect_peripheral(id).await;
            None
        } else {
            match self.connect_peripheral(id).await {
                Ok(info) => {
                    info!("[toggle_connection] {} ready", id);
                    Some(info)
                }
                Err(_) => None,
            }
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Peripherals in discovery order
    pub fn peripherals(&self) -> Vec<DeviceRecord> {
        self.registry.snapshot()
    }

    pub fn subscribe_registry(&self) -> broadcast::Receiver<RegistryEvent> {
        self.registry.subscribe()
    }

    /// Workflow progress and the "navigate to details" snapshots
    pub fn subscribe_workflow(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.connection_manager.subscribe()
    }
}
