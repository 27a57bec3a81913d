use std::sync::OnceLock;

use chrono::Local;
use log::{Level, Metadata, Record, SetLoggerError};
use serde::Serialize;
use tokio::sync::broadcast;

const LOG_CHANNEL_CAPACITY: usize = 128;

static LOG_SENDER: OnceLock<broadcast::Sender<LogMessage>> = OnceLock::new();

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct LogMessage {
    pub level: String,
    pub message: String,
    pub timestamp: String,
}

/// Logger that prints to stderr and broadcasts every record to subscribers
pub struct ChannelLogger {
    sender: broadcast::Sender<LogMessage>,
    level: Level,
}

impl ChannelLogger {
    pub fn new(level: Level) -> Self {
        let (sender, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
        Self { sender, level }
    }

    /// Installs the logger globally
    pub fn init(level: Level) -> Result<(), SetLoggerError> {
        let logger = ChannelLogger::new(level);
        let sender = logger.sender.clone();

        log::set_boxed_logger(Box::new(logger))
            .map(|()| log::set_max_level(level.to_level_filter()))?;
        let _ = LOG_SENDER.set(sender);
        Ok(())
    }

    /// Subscribe to log records of the installed logger
    pub fn subscribe_global() -> Option<broadcast::Receiver<LogMessage>> {
        LOG_SENDER.get().map(|sender| sender.subscribe())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogMessage> {
        self.sender.subscribe()
    }

    fn emit_log(&self, record: &Record) {
        let log_message = LogMessage {
            level: record.level().to_string(),
            message: record.args().to_string(),
            timestamp: Local::now().to_rfc3339(),
        };

        // No subscribers is fine
        let _ = self.sender.send(log_message);
    }
}

impl log::Log for ChannelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
            self.emit_log(record);
        }
    }

    fn flush(&self) {}
}
