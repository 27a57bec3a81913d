//! Error types for Bluetooth operations

use thiserror::Error;

/// Failures surfaced by the connection workflow and the manager.
///
/// `SignalReadFailed` and `DescriptorReadFailed` are never returned from a
/// workflow; they are built so the skipped step can be logged uniformly.
#[derive(Debug, Error)]
pub enum BleError {
    #[error("bluetooth adapter is not available")]
    AdapterUnavailable(#[source] anyhow::Error),

    #[error("failed to connect to {id}")]
    ConnectFailed {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("service discovery failed for {id}")]
    ServiceDiscoveryFailed {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to read RSSI of {id}")]
    SignalReadFailed {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to read descriptor {descriptor} of characteristic {characteristic} on {id}")]
    DescriptorReadFailed {
        id: String,
        characteristic: uuid::Uuid,
        descriptor: uuid::Uuid,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to disconnect from {id}")]
    DisconnectFailed {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("no peripheral with id {0} has been discovered")]
    UnknownPeripheral(String),
}

pub type BleResult<T> = std::result::Result<T, BleError>;
