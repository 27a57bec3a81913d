//! Notification handling for connected peripherals
//! This module subscribes to notifying characteristics and forwards their
//! values as adapter events.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use bluest::{Characteristic, Device};
use futures_util::StreamExt;
use log::{debug, error, info};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::types::AdapterEvent;

/// Forwards characteristic notifications to the adapter event channel
pub struct NotificationHandler {
    events: broadcast::Sender<AdapterEvent>,
    /// One token per peripheral; cancelling it ends all of its notification tasks
    subscriptions: Mutex<HashMap<String, CancellationToken>>,
}

impl NotificationHandler {
    pub fn new(events: broadcast::Sender<AdapterEvent>) -> Self {
        Self {
            events,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Starts one notification task per characteristic, replacing any
    /// previous subscriptions for the same peripheral.
    pub fn setup_notifications(
        &self,
        id: &str,
        device: Device,
        characteristics: Vec<Characteristic>,
    ) {
        self.stop_notifications(id);
        if characteristics.is_empty() {
            return;
        }

        let token = CancellationToken::new();
        info!("Subscribing to {} characteristics on {}", characteristics.len(), id);
        for characteristic in characteristics {
            tokio::spawn(Self::process_notifications(
                id.to_string(),
                device.clone(),
                characteristic,
                self.events.clone(),
                token.child_token(),
            ));
        }
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), token);
    }

    pub fn stop_notifications(&self, id: &str) {
        let token = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if let Some(token) = token {
            debug!("Stopping notifications for {}", id);
            token.cancel();
        }
    }

    async fn process_notifications(
        id: String,
        device: Device,
        notify_char: Characteristic,
        events: broadcast::Sender<AdapterEvent>,
        cancel_token: CancellationToken,
    ) {
        let characteristic = notify_char.uuid();
        let mut notification_stream = match notify_char.notify().await {
            Ok(stream) => stream,
            Err(e) => {
                error!("Failed to subscribe to notifications of {}: {}", characteristic, e);
                return;
            }
        };

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => return,
                result = notification_stream.next() => match result {
                    Some(Ok(value)) => {
                        let _ = events.send(AdapterEvent::CharacteristicValueUpdated {
                            id: id.clone(),
                            characteristic,
                            value,
                        });
                    }
                    Some(Err(e)) => {
                        error!("Error in notification stream of {}: {}", characteristic, e);
                        break;
                    }
                    None => break,
                },
            }
        }

        info!("Notification stream of {} on {} ended", characteristic, id);
        if !device.is_connected().await {
            let _ = events.send(AdapterEvent::PeripheralDisconnected(id));
        }
    }
}
