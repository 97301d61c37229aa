use chrono::Local;
use log::{Level, Metadata, Record, SetLoggerError};
use serde::Serialize;
use tokio::sync::mpsc;

/// A log line as forwarded to the host runtime
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct LogMessage {
    pub level: String,
    pub message: String,
    pub timestamp: String,
}

impl LogMessage {
    pub fn from_record(record: &Record) -> Self {
        Self {
            level: record.level().to_string(),
            message: record.args().to_string(),
            timestamp: Local::now().to_rfc3339(),
        }
    }
}

/// Logger writing to stderr and, optionally, forwarding every record to the host.
pub struct BridgeLogger {
    level: Level,
    forward: Option<mpsc::UnboundedSender<LogMessage>>,
}

impl BridgeLogger {
    pub fn new(level: Level, forward: Option<mpsc::UnboundedSender<LogMessage>>) -> Self {
        Self { level, forward }
    }

    /// Install as the global logger.
    pub fn init(
        level: Level,
        forward: Option<mpsc::UnboundedSender<LogMessage>>,
    ) -> Result<(), SetLoggerError> {
        log::set_boxed_logger(Box::new(BridgeLogger::new(level, forward)))
            .map(|()| log::set_max_level(level.to_level_filter()))
    }

    fn emit_log(&self, record: &Record) {
        if let Some(forward) = &self.forward {
            // Receiver gone means the host stopped listening; stderr still has it.
            let _ = forward.send(LogMessage::from_record(record));
        }
    }
}

impl log::Log for BridgeLogger {
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
