//! Defines shared data structures for the Bluetooth module.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::constants::NO_NAME;

/// Connection status of a peripheral as tracked by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Discovered,
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Discovered => "discovered",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Power state reported by the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterState {
    On,
    Off,
    Unknown,
}

/// Manufacturer specific advertising payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManufacturerData {
    pub company_id: u16,
    pub data: Vec<u8>,
}

/// Advertising metadata carried by a discovery event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvertisingData {
    pub local_name: Option<String>,
    pub tx_power_level: Option<i16>,
    pub is_connectable: bool,
    #[serde(rename = "serviceUUIDs")]
    pub service_uuids: Vec<Uuid>,
    pub manufacturer_data: Option<ManufacturerData>,
    pub service_data: HashMap<Uuid, Vec<u8>>,
}

impl AdvertisingData {
    /// Folds a newer advertisement into this one.
    ///
    /// Optional fields are only replaced when the newer advertisement carries
    /// them; service UUIDs are unioned in first-seen order.
    pub fn merge(&mut self, newer: AdvertisingData) {
        if newer.local_name.is_some() {
            self.local_name = newer.local_name;
        }
        if newer.tx_power_level.is_some() {
            self.tx_power_level = newer.tx_power_level;
        }
        if newer.manufacturer_data.is_some() {
            self.manufacturer_data = newer.manufacturer_data;
        }
        self.is_connectable = newer.is_connectable;
        for uuid in newer.service_uuids {
            if !self.service_uuids.contains(&uuid) {
                self.service_uuids.push(uuid);
            }
        }
        self.service_data.extend(newer.service_data);
    }
}

/// A peripheral as reported by the adapter's discovery event.
/// This is the adapter's payload; the registry wraps it in a [`DeviceRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredPeripheral {
    /// Platform-specific unique identifier for the device
    pub id: String,
    /// The advertised or cached name, if available
    pub name: Option<String>,
    /// The signal strength (RSSI) of the advertisement
    pub rssi: Option<i16>,
    pub advertising: AdvertisingData,
}

/// Properties of a GATT characteristic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicProperties {
    pub broadcast: bool,
    pub read: bool,
    pub write_without_response: bool,
    pub write: bool,
    pub notify: bool,
    pub indicate: bool,
    pub authenticated_signed_writes: bool,
    pub extended_properties: bool,
}

impl CharacteristicProperties {
    /// Names of the properties that are set, in GATT bit order
    pub fn names(&self) -> Vec<&'static str> {
        [
            (self.broadcast, "Broadcast"),
            (self.read, "Read"),
            (self.write_without_response, "WriteWithoutResponse"),
            (self.write, "Write"),
            (self.notify, "Notify"),
            (self.indicate, "Indicate"),
            (self.authenticated_signed_writes, "AuthenticatedSignedWrites"),
            (self.extended_properties, "ExtendedProperties"),
        ]
        .into_iter()
        .filter_map(|(set, name)| set.then_some(name))
        .collect()
    }
}

/// A descriptor and, once read, its value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorInfo {
    pub uuid: Uuid,
    pub value: Option<Vec<u8>>,
}

/// A characteristic within the discovered topology
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicInfo {
    pub service: Uuid,
    pub characteristic: Uuid,
    pub properties: CharacteristicProperties,
    pub descriptors: Vec<DescriptorInfo>,
}

impl CharacteristicInfo {
    /// Number of descriptors whose value has been read
    pub fn descriptor_values(&self) -> usize {
        self.descriptors.iter().filter(|d| d.value.is_some()).count()
    }
}

/// Service/characteristic topology returned by service discovery
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTopology {
    pub services: Vec<Uuid>,
    pub characteristics: Vec<CharacteristicInfo>,
}

impl ServiceTopology {
    /// Characteristics belonging to the given service
    pub fn characteristics_for(&self, service: Uuid) -> impl Iterator<Item = &CharacteristicInfo> {
        self.characteristics.iter().filter(move |c| c.service == service)
    }
}

/// Full snapshot of a peripheral handed to the detail view once a connection is ready
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeripheralInfo {
    pub id: String,
    pub name: String,
    pub rssi: Option<i16>,
    pub advertising: AdvertisingData,
    #[serde(flatten)]
    pub topology: ServiceTopology,
}

/// Represents a peripheral tracked by the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Platform-specific unique identifier, stable per physical device
    pub id: String,
    /// The address of the device when the platform id embeds one
    pub address: Option<String>,
    /// The name of the device, or [`NO_NAME`]
    pub name: String,
    /// The signal strength (RSSI) of the device
    pub rssi: Option<i16>,
    pub status: ConnectionStatus,
    pub advertising: AdvertisingData,
    /// Populated once a connection has discovered services
    pub topology: Option<ServiceTopology>,
}

impl DeviceRecord {
    /// Creates a record from the adapter's discovery payload
    pub fn from_discovery(peripheral: DiscoveredPeripheral) -> Self {
        let name = peripheral
            .name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| NO_NAME.to_string());
        let address = extract_mac_address(&peripheral.id);

        Self {
            id: peripheral.id,
            address,
            name,
            rssi: peripheral.rssi,
            status: ConnectionStatus::Discovered,
            advertising: peripheral.advertising,
            topology: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn is_connecting(&self) -> bool {
        self.status == ConnectionStatus::Connecting
    }

    /// Builds the snapshot handed to the detail view
    pub fn to_peripheral_info(&self) -> PeripheralInfo {
        PeripheralInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            rssi: self.rssi,
            advertising: self.advertising.clone(),
            topology: self.topology.clone().unwrap_or_default(),
        }
    }
}

/// Pulls a MAC address out of a platform device id, if it embeds one
pub fn extract_mac_address(device_id: &str) -> Option<String> {
    static MAC: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = MAC.get_or_init(|| {
        regex::Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").expect("valid MAC regex")
    });
    re.find_iter(device_id)
        .last()
        .map(|m| m.as_str().replace('-', ":").to_uppercase())
}

/// Events emitted by the platform adapter
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    PeripheralDiscovered(DiscoveredPeripheral),
    PeripheralDisconnected(String),
    CharacteristicValueUpdated {
        id: String,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    ScanStopped,
}

/// States of a single connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowState {
    Idle,
    Connecting,
    Connected,
    ServicesRetrieved,
    SignalRead,
    DescriptorsRead,
    Ready,
    Failed,
}

/// Events emitted by the connection workflow for the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    StateChanged { id: String, state: WorkflowState },
    /// One-shot "navigate to details" signal carrying the full snapshot
    Ready(PeripheralInfo),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discovery(id: &str, name: Option<&str>) -> DiscoveredPeripheral {
        DiscoveredPeripheral {
            id: id.to_string(),
            name: name.map(str::to_string),
            rssi: Some(-60),
            advertising: AdvertisingData::default(),
        }
    }

    #[test]
    fn missing_name_defaults_to_placeholder() {
        let record = DeviceRecord::from_discovery(discovery("AA:BB", None));
        assert_eq!(record.name, NO_NAME);
        assert_eq!(record.status, ConnectionStatus::Discovered);

        let record = DeviceRecord::from_discovery(discovery("AA:BB", Some("")));
        assert_eq!(record.name, NO_NAME);
    }

    #[test]
    fn mac_address_is_extracted_from_platform_id() {
        assert_eq!(
            extract_mac_address("hci0/dev_c4-7c-8d-6a-01-02"),
            Some("C4:7C:8D:6A:01:02".to_string())
        );
        assert_eq!(extract_mac_address("AA:BB"), None);
    }

    #[test]
    fn merge_keeps_known_fields_and_unions_services() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let mut adv = AdvertisingData {
            local_name: Some("Sensor".into()),
            tx_power_level: Some(4),
            is_connectable: true,
            service_uuids: vec![a],
            ..Default::default()
        };
        adv.merge(AdvertisingData {
            local_name: None,
            tx_power_level: None,
            is_connectable: false,
            service_uuids: vec![b, a],
            ..Default::default()
        });

        assert_eq!(adv.local_name.as_deref(), Some("Sensor"));
        assert_eq!(adv.tx_power_level, Some(4));
        assert!(!adv.is_connectable);
        assert_eq!(adv.service_uuids, vec![a, b]);
    }

    #[test]
    fn property_names_follow_bit_order() {
        let props = CharacteristicProperties {
            notify: true,
            read: true,
            ..Default::default()
        };
        assert_eq!(props.names(), vec!["Read", "Notify"]);
    }
}
