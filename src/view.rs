//! Plain-text rendering of the peripheral list and the detail view

use std::fmt::Write;

use uuid::Uuid;

use crate::core::bluetooth::constants::{
    NO_NAME, UUID_BATTERY_LEVEL, UUID_BATTERY_SERVICE, UUID_DEVICE_INFORMATION_SERVICE,
    UUID_DEVICE_NAME, UUID_GENERIC_ACCESS_SERVICE,
};
use crate::core::bluetooth::{AdapterState, DeviceRecord, PeripheralInfo};

/// Label of the scan button for the current adapter and scan state
pub fn scan_button_label(bt_state: AdapterState, is_scanning: bool) -> &'static str {
    if bt_state == AdapterState::Off {
        "Enable Bluetooth"
    } else if is_scanning {
        "Scanning..."
    } else {
        "Scan Bluetooth"
    }
}

/// Lines shown for one peripheral in the list
pub fn render_row(record: &DeviceRecord) -> Vec<String> {
    if record.is_connecting() {
        return vec!["Connecting...".to_string()];
    }

    let name = if record.name.is_empty() { NO_NAME } else { record.name.as_str() };
    let rssi = record
        .rssi
        .map(|rssi| rssi.to_string())
        .unwrap_or_default();
    let connectable = if record.advertising.is_connectable {
        "Connectable"
    } else {
        "Not Connectable"
    };

    vec![
        name.to_string(),
        format!("RSSI: {}", rssi),
        record.id.clone(),
        connectable.to_string(),
    ]
}

/// The whole list, one blank line between peripherals
pub fn render_list(records: &[DeviceRecord]) -> String {
    records
        .iter()
        .map(|record| render_row(record).join("\n"))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn well_known_name(uuid: Uuid) -> Option<&'static str> {
    match uuid {
        UUID_GENERIC_ACCESS_SERVICE => Some("Generic Access"),
        UUID_DEVICE_INFORMATION_SERVICE => Some("Device Information"),
        UUID_BATTERY_SERVICE => Some("Battery"),
        UUID_DEVICE_NAME => Some("Device Name"),
        UUID_BATTERY_LEVEL => Some("Battery Level"),
        _ => None,
    }
}

fn uuid_label(uuid: Uuid) -> String {
    match well_known_name(uuid) {
        Some(name) => format!("{} ({})", uuid, name),
        None => uuid.to_string(),
    }
}

fn or_blank<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Detail view of a connected peripheral
pub fn render_details(info: &PeripheralInfo) -> String {
    let mut out = String::new();
    let adv = &info.advertising;

    // Writing to a String cannot fail.
    let _ = writeln!(out, "Peripheral Details");
    let _ = writeln!(out, "name: {}", info.name);
    let _ = writeln!(out, "id: {}", info.id);
    let _ = writeln!(out, "rssi: {}", or_blank(info.rssi));

    let _ = writeln!(out, "\nAdvertising");
    let _ = writeln!(out, "localName: {}", or_blank(adv.local_name.as_deref()));
    let _ = writeln!(out, "txPowerLevel: {}", or_blank(adv.tx_power_level));
    let _ = writeln!(out, "isConnectable: {}", adv.is_connectable);
    let services: Vec<String> = adv.service_uuids.iter().map(Uuid::to_string).collect();
    let _ = writeln!(out, "serviceUUIDs: {}", services.join(","));

    let _ = writeln!(out, "\nServices && Characteristics");
    for service in &info.topology.services {
        let _ = writeln!(out, "Service: {}", uuid_label(*service));
        for characteristic in info.topology.characteristics_for(*service) {
            let _ = writeln!(
                out,
                "  Characteristic: {}",
                uuid_label(characteristic.characteristic)
            );
            let _ = writeln!(out, "  Properties: {}", characteristic.properties.names().join(", "));
            for descriptor in &characteristic.descriptors {
                let value = descriptor
                    .value
                    .as_ref()
                    .map(|bytes| format!("{:02x?}", bytes))
                    .unwrap_or_else(|| "<unread>".to_string());
                let _ = writeln!(out, "    Descriptor: {} = {}", descriptor.uuid, value);
            }
        }
    }

    out
}
