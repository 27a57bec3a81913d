use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::bluetooth::constants::CONNECT_SETTLE_DELAY_MS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Pause between connecting and service discovery, in milliseconds.
    /// Some peripherals are still populating their GATT database right after connect.
    pub settle_delay_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            settle_delay_ms: CONNECT_SETTLE_DELAY_MS,
        }
    }
}

impl ConnectionConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}
