//! Application state management
//! This module defines the state shared by the entry points.

use std::sync::Arc;

use anyhow::Result;
use log::info;

use crate::config::AppConfig;
use crate::core::{BleError, BluetoothManager};
use crate::core::bluetooth::{BleAdapter, BluestAdapter, DesktopPermissionGate, LogAlertSink};

/// Application state, owned by the entry point and passed by reference
pub struct AppState {
    /// The Bluetooth manager instance
    pub bluetooth_manager: Arc<BluetoothManager>,
    pub config: AppConfig,
}

impl AppState {
    /// Creates a new AppState on top of the host's default adapter
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("Initializing BluetoothManager...");
        let adapter = BluestAdapter::new()
            .await
            .map_err(BleError::AdapterUnavailable)?;
        Ok(Self::with_adapter(Arc::new(adapter), config))
    }

    /// Creates a new AppState on top of any adapter implementation
    pub fn with_adapter(adapter: Arc<dyn BleAdapter>, config: AppConfig) -> Self {
        let manager = BluetoothManager::new(
            adapter,
            Arc::new(LogAlertSink),
            Arc::new(DesktopPermissionGate),
            &config,
        );
        Self {
            bluetooth_manager: Arc::new(manager),
            config,
        }
    }

    /// Gets a reference to the Bluetooth manager
    pub fn get_bluetooth_manager_arc(&self) -> Arc<BluetoothManager> {
        self.bluetooth_manager.clone()
    }
}
