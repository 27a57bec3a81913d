//! Bluetooth functionality for the BLE explorer
//! This module handles all bluetooth operations including scanning,
//! connecting, and tracking discovered peripherals.

mod adapter;
mod bluest_adapter;
mod connection;
pub mod constants;
mod manager;
mod notification;
mod registry;
mod scanner;
mod types;

#[cfg(test)]
mod test_support;

// Re-export types that should be publicly accessible
pub use adapter::{
    AlertSink, BleAdapter, DesktopPermissionGate, LogAlertSink, Permission, PermissionGate,
    PermissionStatus, ScanOptions,
};
pub use bluest_adapter::BluestAdapter;
pub use connection::ConnectionManager;
pub use manager::BluetoothManager;
pub use registry::{DeviceRegistry, RegistryEvent};
pub use scanner::{BluetoothScanner, EventListener};
pub use types::*;
