//! BLE explorer library
//! Discovers nearby Bluetooth Low Energy peripherals, connects to them and
//! collects their service topology.

// Module declarations
pub mod config;
pub mod core;
pub mod logging;
pub mod state;
pub mod utils;
pub mod view;
