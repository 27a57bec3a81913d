//! Constants used throughout the application
//! This module contains the constant values shared by the scanner,
//! the connection workflow and the presentation layer.

use uuid::Uuid;

/// Display name given to peripherals that advertise no name
pub const NO_NAME: &str = "NO NAME";

/// Scan duration in seconds
pub const DEFAULT_SCAN_DURATION_SECS: u64 = 3;

/// Whether repeated advertisements from the same peripheral are reported
pub const DEFAULT_ALLOW_DUPLICATES: bool = true;

/// Delay after connecting before service discovery, in milliseconds.
/// Gives the peripheral time to finish setting up its GATT database.
pub const CONNECT_SETTLE_DELAY_MS: u64 = 900;

/// Upper bound on how long `enable` waits for the adapter to come up, in seconds
pub const ADAPTER_ENABLE_TIMEOUT_SECS: u64 = 10;

/// How long a state check waits for the adapter to report itself available, in milliseconds
pub const ADAPTER_STATE_PROBE_MS: u64 = 500;

/// Capacity of the broadcast channels used for adapter and registry events
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Standard Bluetooth Service UUIDs
pub const UUID_GENERIC_ACCESS_SERVICE: Uuid =
    Uuid::from_u128(0x00001800_0000_1000_8000_00805f9b34fb);
pub const UUID_DEVICE_INFORMATION_SERVICE: Uuid =
    Uuid::from_u128(0x0000180a_0000_1000_8000_00805f9b34fb);
pub const UUID_BATTERY_SERVICE: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);

/// Standard Bluetooth Characteristic UUIDs
pub const UUID_DEVICE_NAME: Uuid = Uuid::from_u128(0x00002a00_0000_1000_8000_00805f9b34fb);
pub const UUID_BATTERY_LEVEL: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);

/// Client Characteristic Configuration descriptor
pub const UUID_CCCD: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);
/// Characteristic User Description descriptor
pub const UUID_USER_DESCRIPTION: Uuid = Uuid::from_u128(0x00002901_0000_1000_8000_00805f9b34fb);
