//! Capability contracts of the collaborators around the core:
//! the platform BLE adapter, the permission gate and the alert sink.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use log::info;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::core::bluetooth::types::{AdapterEvent, AdapterState, ServiceTopology};

/// Parameters of a single scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    /// Only report peripherals advertising one of these services; empty means all
    pub service_filters: Vec<Uuid>,
    /// How long the scan runs before `ScanStopped` is emitted
    pub duration: Duration,
    /// Report every advertisement rather than only the first per peripheral
    pub allow_duplicates: bool,
}

/// Platform BLE adapter.
///
/// Implementations emit [`AdapterEvent`]s on the channel returned by
/// [`BleAdapter::subscribe`]; every other call is a request/response.
#[async_trait::async_trait]
pub trait BleAdapter: Send + Sync {
    /// Prepare the adapter for use
    async fn start(&self) -> Result<()>;

    /// Start a time-bounded scan. Returns once the scan is running.
    async fn scan(&self, options: ScanOptions) -> Result<()>;

    async fn connect(&self, id: &str) -> Result<()>;

    async fn disconnect(&self, id: &str) -> Result<()>;

    /// Discover the service/characteristic/descriptor topology of a connected peripheral
    async fn retrieve_services(&self, id: &str) -> Result<ServiceTopology>;

    async fn read_rssi(&self, id: &str) -> Result<i16>;

    async fn read_descriptor(
        &self,
        id: &str,
        service: Uuid,
        characteristic: Uuid,
        descriptor: Uuid,
    ) -> Result<Vec<u8>>;

    async fn check_state(&self) -> Result<AdapterState>;

    async fn enable(&self) -> Result<()>;

    /// Subscribe to adapter events
    fn subscribe(&self) -> broadcast::Receiver<AdapterEvent>;
}

/// Fire-and-forget user-visible alerts
pub trait AlertSink: Send + Sync {
    fn show(&self, title: &str, body: &str);
}

/// Alert sink that writes alerts to the log
#[derive(Debug, Default, Clone)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn show(&self, title: &str, body: &str) {
        info!("[alert] {}: {}", title, body);
    }
}

/// Runtime permissions the application asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    BluetoothScan,
    BluetoothConnect,
    PostNotifications,
    AccessFineLocation,
}

impl Permission {
    /// Permissions required on platforms with dedicated Bluetooth permissions
    pub const MODERN: [Permission; 3] = [
        Permission::BluetoothScan,
        Permission::BluetoothConnect,
        Permission::PostNotifications,
    ];

    /// Permissions required on platforms that gate scanning behind location
    pub const LEGACY: [Permission; 1] = [Permission::AccessFineLocation];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

/// Grants or denies runtime permissions
#[async_trait::async_trait]
pub trait PermissionGate: Send + Sync {
    /// Whether the platform uses the dedicated Bluetooth permission set
    fn uses_modern_permissions(&self) -> bool {
        true
    }

    async fn request(
        &self,
        permissions: &[Permission],
    ) -> Result<HashMap<Permission, PermissionStatus>>;
}

/// Desktop platforms have no runtime permission prompts; everything is granted.
#[derive(Debug, Default, Clone)]
pub struct DesktopPermissionGate;

#[async_trait::async_trait]
impl PermissionGate for DesktopPermissionGate {
    async fn request(
        &self,
        permissions: &[Permission],
    ) -> Result<HashMap<Permission, PermissionStatus>> {
        Ok(permissions
            .iter()
            .map(|p| (*p, PermissionStatus::Granted))
            .collect())
    }
}
