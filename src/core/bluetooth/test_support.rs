//! Scripted in-memory adapter and helpers shared by the Bluetooth tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::core::bluetooth::adapter::{AlertSink, BleAdapter, ScanOptions};
use crate::core::bluetooth::constants::EVENT_CHANNEL_CAPACITY;
use crate::core::bluetooth::types::{
    AdapterEvent, AdapterState, AdvertisingData, CharacteristicInfo, CharacteristicProperties,
    DescriptorInfo, DiscoveredPeripheral, ServiceTopology,
};

pub(crate) fn discovered(id: &str, name: Option<&str>) -> DiscoveredPeripheral {
    DiscoveredPeripheral {
        id: id.to_string(),
        name: name.map(str::to_string),
        rssi: Some(-72),
        advertising: AdvertisingData {
            local_name: name.map(str::to_string),
            is_connectable: true,
            ..Default::default()
        },
    }
}

pub(crate) fn characteristic(
    service: Uuid,
    uuid: Uuid,
    descriptors: &[Uuid],
) -> CharacteristicInfo {
    CharacteristicInfo {
        service,
        characteristic: uuid,
        properties: CharacteristicProperties {
            read: true,
            notify: !descriptors.is_empty(),
            ..Default::default()
        },
        descriptors: descriptors
            .iter()
            .map(|uuid| DescriptorInfo {
                uuid: *uuid,
                value: None,
            })
            .collect(),
    }
}

type Hook = Box<dyn Fn() + Send + Sync>;

/// Adapter fake. Every call is recorded by name; calls listed with
/// [`FakeAdapter::fail`] return an error. A successful descriptor read
/// returns the descriptor's UUID bytes.
pub(crate) struct FakeAdapter {
    topologies: HashMap<String, ServiceTopology>,
    rssi: HashMap<String, i16>,
    failing: HashSet<&'static str>,
    failing_once: Mutex<HashSet<&'static str>>,
    hooks: HashMap<&'static str, Hook>,
    failing_descriptors: HashSet<Uuid>,
    discoveries: Vec<DiscoveredPeripheral>,
    state: Mutex<AdapterState>,
    calls: Mutex<Vec<&'static str>>,
    scans: Mutex<Vec<ScanOptions>>,
    events: broadcast::Sender<AdapterEvent>,
}

impl FakeAdapter {
    pub(crate) fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            topologies: HashMap::new(),
            rssi: HashMap::new(),
            failing: HashSet::new(),
            failing_once: Mutex::new(HashSet::new()),
            hooks: HashMap::new(),
            failing_descriptors: HashSet::new(),
            discoveries: Vec::new(),
            state: Mutex::new(AdapterState::On),
            calls: Mutex::new(Vec::new()),
            scans: Mutex::new(Vec::new()),
            events,
        }
    }

    pub(crate) fn with_topology(mut self, id: &str, topology: ServiceTopology) -> Self {
        self.topologies.insert(id.to_string(), topology);
        self
    }

    pub(crate) fn with_rssi(mut self, id: &str, rssi: i16) -> Self {
        self.rssi.insert(id.to_string(), rssi);
        self
    }

    pub(crate) fn with_state(self, state: AdapterState) -> Self {
        *self.state.lock().unwrap() = state;
        self
    }

    /// Peripherals announced (in order) every time a scan starts
    pub(crate) fn with_discoveries(mut self, discoveries: Vec<DiscoveredPeripheral>) -> Self {
        self.discoveries = discoveries;
        self
    }

    pub(crate) fn fail(mut self, call: &'static str) -> Self {
        self.failing.insert(call);
        self
    }

    /// Only the first call by that name fails
    pub(crate) fn fail_once(self, call: &'static str) -> Self {
        self.failing_once.lock().unwrap().insert(call);
        self
    }

    /// Runs `hook` whenever `call` is made, before it returns
    pub(crate) fn on_call<F>(mut self, call: &'static str, hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks.insert(call, Box::new(hook));
        self
    }

    pub(crate) fn fail_descriptor(mut self, descriptor: Uuid) -> Self {
        self.failing_descriptors.insert(descriptor);
        self
    }

    pub(crate) fn emit(&self, event: AdapterEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn calls_to(&self, call: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == call).count()
    }

    pub(crate) fn scans(&self) -> Vec<ScanOptions> {
        self.scans.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if let Some(hook) = self.hooks.get(call) {
            hook();
        }
        if self.failing.contains(call) || self.failing_once.lock().unwrap().remove(call) {
            Err(anyhow!("{} failed", call))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl BleAdapter for FakeAdapter {
    async fn start(&self) -> Result<()> {
        self.record("start")
    }

    async fn scan(&self, options: ScanOptions) -> Result<()> {
        self.record("scan")?;
        self.scans.lock().unwrap().push(options);
        for peripheral in &self.discoveries {
            self.emit(AdapterEvent::PeripheralDiscovered(peripheral.clone()));
        }
        self.emit(AdapterEvent::ScanStopped);
        Ok(())
    }

    async fn connect(&self, _id: &str) -> Result<()> {
        self.record("connect")
    }

    async fn disconnect(&self, _id: &str) -> Result<()> {
        self.record("disconnect")
    }

    async fn retrieve_services(&self, id: &str) -> Result<ServiceTopology> {
        self.record("retrieve_services")?;
        Ok(self.topologies.get(id).cloned().unwrap_or_default())
    }

    async fn read_rssi(&self, id: &str) -> Result<i16> {
        self.record("read_rssi")?;
        self.rssi
            .get(id)
            .copied()
            .ok_or_else(|| anyhow!("no RSSI for {}", id))
    }

    async fn read_descriptor(
        &self,
        _id: &str,
        _service: Uuid,
        _characteristic: Uuid,
        descriptor: Uuid,
    ) -> Result<Vec<u8>> {
        self.record("read_descriptor")?;
        if self.failing_descriptors.contains(&descriptor) {
            return Err(anyhow!("descriptor {} unreadable", descriptor));
        }
        Ok(descriptor.as_bytes().to_vec())
    }

    async fn check_state(&self) -> Result<AdapterState> {
        self.record("check_state")?;
        Ok(*self.state.lock().unwrap())
    }

    async fn enable(&self) -> Result<()> {
        self.record("enable")?;
        *self.state.lock().unwrap() = AdapterState::On;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AdapterEvent> {
        self.events.subscribe()
    }
}

/// Alert sink that remembers what it was asked to show
#[derive(Default)]
pub(crate) struct RecordingAlerts {
    shown: Mutex<Vec<(String, String)>>,
}

impl RecordingAlerts {
    pub(crate) fn titles(&self) -> Vec<String> {
        self.shown
            .lock()
            .unwrap()
            .iter()
            .map(|(title, _)| title.clone())
            .collect()
    }
}

impl AlertSink for RecordingAlerts {
    fn show(&self, title: &str, body: &str) {
        self.shown
            .lock()
            .unwrap()
            .push((title.to_string(), body.to_string()));
    }
}
