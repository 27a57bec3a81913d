use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::ScanOptions;
use crate::core::bluetooth::constants::{DEFAULT_ALLOW_DUPLICATES, DEFAULT_SCAN_DURATION_SECS};

/// Scan settings configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// How long a scan runs before the adapter stops it, in seconds
    pub duration_secs: u64,
    /// Report every advertisement instead of only the first per peripheral
    pub allow_duplicates: bool,
    /// Only report peripherals advertising one of these services. Empty means all.
    pub service_filters: Vec<Uuid>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            duration_secs: DEFAULT_SCAN_DURATION_SECS,
            allow_duplicates: DEFAULT_ALLOW_DUPLICATES,
            service_filters: Vec::new(),
        }
    }
}

impl ScanConfig {
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            service_filters: self.service_filters.clone(),
            duration: Duration::from_secs(self.duration_secs),
            allow_duplicates: self.allow_duplicates,
        }
    }
}
