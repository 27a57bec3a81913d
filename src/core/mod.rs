//! Core functionality for the BLE explorer
//! This module contains the Bluetooth registry, scanner and connection workflow

pub mod bluetooth;
pub mod error;

// Re-export commonly used types
pub use bluetooth::BluetoothManager;
pub use error::{BleError, BleResult};
