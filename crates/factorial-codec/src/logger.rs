//! Pluggable sinks for diagnostics raised while (de)serializing.

use parking_lot::Mutex;

/// Receives warnings, errors and failed operations reported by the codec.
pub trait Logger: Send + Sync + std::fmt::Debug {
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
    fn exception(&self, error: &dyn std::error::Error);
}

/// Routes everything to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultLogger;

impl Logger for DefaultLogger {
    fn warn(&self, message: &str) {
        log::warn!("{message}");
    }

    fn error(&self, message: &str) {
        log::error!("{message}");
    }

    fn exception(&self, error: &dyn std::error::Error) {
        log::error!("serialization failed: {error}");
    }
}

/// One message captured by a [`MemoryLogger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Warning(String),
    Error(String),
    Exception(String),
}

/// Keeps every message in memory. Useful for tests and editor tooling
/// that wants to show diagnostics after a load.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records in arrival order.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Only the warning messages.
    pub fn warnings(&self) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .filter_map(|r| match r {
                LogRecord::Warning(msg) => Some(msg.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl Logger for MemoryLogger {
    fn warn(&self, message: &str) {
        self.records.lock().push(LogRecord::Warning(message.to_owned()));
    }

    fn error(&self, message: &str) {
        self.records.lock().push(LogRecord::Error(message.to_owned()));
    }

    fn exception(&self, error: &dyn std::error::Error) {
        self.records
            .lock()
            .push(LogRecord::Exception(error.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CodecError;

    #[test]
    fn memory_logger_records_in_order() {
        let logger = MemoryLogger::new();
        logger.warn("first");
        logger.error("second");
        logger.exception(&CodecError::UnknownReference(7));

        assert_eq!(
            logger.records(),
            vec![
                LogRecord::Warning("first".into()),
                LogRecord::Error("second".into()),
                LogRecord::Exception("unknown internal reference id 7".into()),
            ]
        );
        assert_eq!(logger.warnings(), vec!["first".to_string()]);

        logger.clear();
        assert!(logger.is_empty());
    }

    #[test]
    fn default_logger_accepts_messages_without_backend() {
        let logger = DefaultLogger;
        logger.warn("nobody is listening");
        logger.error("still nobody");
    }
}
