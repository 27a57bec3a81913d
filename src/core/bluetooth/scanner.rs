use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::core::bluetooth::adapter::{AlertSink, BleAdapter, ScanOptions};
use crate::core::bluetooth::registry::DeviceRegistry;
use crate::core::bluetooth::types::AdapterEvent;

/// Starts scans and applies adapter events to the registry
#[derive(Clone)]
pub struct BluetoothScanner {
    adapter: Arc<dyn BleAdapter>,
    registry: Arc<DeviceRegistry>,
    alerts: Arc<dyn AlertSink>,
    is_scanning: Arc<AtomicBool>,
    options: ScanOptions,
}

/// Handle on the adapter event listener. Dropping it stops the listener.
pub struct EventListener {
    _guard: DropGuard,
    handle: JoinHandle<()>,
}

impl EventListener {
    /// Stops the listener and waits for it to finish
    pub async fn stop(self) {
        let EventListener { _guard, handle } = self;
        drop(_guard);
        match handle.await {
            Ok(()) => info!("Adapter event listener stopped."),
            Err(e) if e.is_cancelled() => info!("Adapter event listener was cancelled."),
            Err(e) => error!(
                "Adapter event listener finished with an unexpected join error: {:?}",
                e
            ),
        }
    }
}

impl BluetoothScanner {
    pub fn new(
        adapter: Arc<dyn BleAdapter>,
        registry: Arc<DeviceRegistry>,
        alerts: Arc<dyn AlertSink>,
        options: ScanOptions,
    ) -> Self {
        Self {
            adapter,
            registry,
            alerts,
            is_scanning: Arc::new(AtomicBool::new(false)),
            options,
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.is_scanning.load(Ordering::SeqCst)
    }

    /// Clears the registry and starts a new scan, unless one is already running
    pub async fn start_scan(&self) -> Result<()> {
        self.alerts.show("Start Scan", "Start scanning for peripherals");
        if self.is_scanning.swap(true, Ordering::SeqCst) {
            debug!("[start_scan] Scan already in progress");
            return Ok(());
        }

        self.registry.clear_all();
        if let Err(e) = self.adapter.scan(self.options.clone()).await {
            self.is_scanning.store(false, Ordering::SeqCst);
            return Err(e).context("failed to start scan");
        }
        info!(
            "[start_scan] Scanning started for {:?} (filters: {:?}, duplicates: {})",
            self.options.duration, self.options.service_filters, self.options.allow_duplicates
        );
        Ok(())
    }

    /// Called when the adapter reports the end of a scan
    pub fn on_scan_stopped(&self) {
        self.alerts.show("Stop Scan", "Stop scanning for peripherals");
        self.is_scanning.store(false, Ordering::SeqCst);
        debug!("[stop_scan] Scanning stopped");
    }

    /// Applies one adapter event to the registry
    pub fn handle_event(&self, event: AdapterEvent) {
        match event {
            AdapterEvent::PeripheralDiscovered(peripheral) => {
                debug!("Found device - ID: {}, RSSI: {:?}", peripheral.id, peripheral.rssi);
                self.registry.upsert_discovered(peripheral);
            }
            AdapterEvent::PeripheralDisconnected(id) => {
                info!("Peripheral {} disconnected", id);
                self.registry.mark_disconnected(&id);
            }
            AdapterEvent::CharacteristicValueUpdated {
                id,
                characteristic,
                value,
            } => {
                debug!("[value_updated] Data from {} ({}): {:?}", id, characteristic, value);
            }
            AdapterEvent::ScanStopped => self.on_scan_stopped(),
        }
    }

    /// Subscribes to adapter events and applies them until the returned
    /// handle is dropped or stopped.
    pub fn listen(&self) -> EventListener {
        let cancel_token = CancellationToken::new();
        let cancel_token_for_task = cancel_token.clone();
        let mut events = self.adapter.subscribe();
        let scanner = self.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_token_for_task.cancelled() => break,
                    result = events.recv() => match result {
                        Ok(event) => scanner.handle_event(event),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Adapter event listener lagged, {} events skipped", skipped);
                        }
                        Err(RecvError::Closed) => {
                            info!("Adapter event stream has ended.");
                            break;
                        }
                    },
                }
            }
        });

        EventListener {
            _guard: cancel_token.drop_guard(),
            handle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::constants::NO_NAME;
    use crate::core::bluetooth::test_support::{FakeAdapter, RecordingAlerts, discovered};
    use crate::core::bluetooth::types::ConnectionStatus;
    use std::time::Duration;

    fn options() -> ScanOptions {
        ScanOptions {
            service_filters: Vec::new(),
            duration: Duration::from_secs(3),
            allow_duplicates: true,
        }
    }

    fn scanner(
        adapter: FakeAdapter,
    ) -> (
        Arc<FakeAdapter>,
        Arc<DeviceRegistry>,
        Arc<RecordingAlerts>,
        BluetoothScanner,
    ) {
        let adapter = Arc::new(adapter);
        let registry = Arc::new(DeviceRegistry::new());
        let alerts = Arc::new(RecordingAlerts::default());
        let scanner = BluetoothScanner::new(
            adapter.clone(),
            registry.clone(),
            alerts.clone(),
            options(),
        );
        (adapter, registry, alerts, scanner)
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn scan_clears_old_records_and_collects_new_ones() {
        let adapter = FakeAdapter::new().with_discoveries(vec![
            discovered("AA:BB", None),
            discovered("CC:DD", Some("Band")),
            discovered("AA:BB", None),
        ]);
        let (adapter, registry, alerts, scanner) = scanner(adapter);
        registry.upsert_discovered(discovered("stale", None));

        let listener = scanner.listen();
        scanner.start_scan().await.unwrap();
        assert!(!registry.contains("stale"));

        wait_for(|| !scanner.is_scanning()).await;
        listener.stop().await;

        let names: Vec<_> = registry.snapshot().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec![NO_NAME, "Band"]);
        assert_eq!(adapter.scans(), vec![options()]);
        assert_eq!(alerts.titles(), vec!["Start Scan", "Stop Scan"]);
    }

    #[tokio::test]
    async fn second_scan_while_running_is_ignored() {
        let (adapter, registry, _alerts, scanner) = scanner(FakeAdapter::new());
        scanner.start_scan().await.unwrap();
        registry.upsert_discovered(discovered("kept", None));

        scanner.start_scan().await.unwrap();
        assert_eq!(adapter.calls_to("scan"), 1);
        assert!(registry.contains("kept"));
    }

    #[tokio::test]
    async fn failed_scan_does_not_stay_scanning() {
        let (_adapter, _registry, _alerts, scanner) = scanner(FakeAdapter::new().fail("scan"));
        assert!(scanner.start_scan().await.is_err());
        assert!(!scanner.is_scanning());
    }

    #[tokio::test]
    async fn disconnect_event_marks_record() {
        let (adapter, registry, _alerts, scanner) = scanner(FakeAdapter::new());
        registry.upsert_discovered(discovered("dev", None));
        registry.mark_connecting("dev");
        registry.mark_connected("dev");

        let listener = scanner.listen();
        adapter.emit(AdapterEvent::CharacteristicValueUpdated {
            id: "dev".into(),
            characteristic: uuid::Uuid::nil(),
            value: vec![1, 2],
        });
        adapter.emit(AdapterEvent::PeripheralDisconnected("dev".into()));
        adapter.emit(AdapterEvent::PeripheralDisconnected("ghost".into()));

        wait_for(|| {
            registry.get("dev").map(|r| r.status) == Some(ConnectionStatus::Disconnected)
        })
        .await;
        drop(listener);
        assert!(!registry.contains("ghost"));
    }

    #[tokio::test]
    async fn dropped_listener_stops_applying_events() {
        let (adapter, registry, _alerts, scanner) = scanner(FakeAdapter::new());
        let listener = scanner.listen();
        listener.stop().await;

        adapter.emit(AdapterEvent::PeripheralDiscovered(discovered("late", None)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(registry.is_empty());
    }
}
