use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const ACTIVITY_LOG_FILE: &str = "activity.log";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogRecord {
    pub timestamp: String,
    pub level: String,
    pub component: String,
    pub message: String,
}

#[derive(Debug)]
enum LogSink {
    File(PathBuf),
    Memory(Vec<LogRecord>),
}

/// Append-only JSON-lines log shared by every component.
///
/// Writes are best-effort: a log line that cannot be written is dropped.
#[derive(Debug)]
pub struct ActivityLog {
    sink: Mutex<LogSink>,
}

impl ActivityLog {
    pub fn to_file(logs_dir: &Path) -> Self {
        Self {
            sink: Mutex::new(LogSink::File(logs_dir.join(ACTIVITY_LOG_FILE))),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            sink: Mutex::new(LogSink::Memory(Vec::new())),
        }
    }

    pub fn info(&self, component: &str, message: &str) {
        self.append("info", component, message);
    }

    pub fn warn(&self, component: &str, message: &str) {
        self.append("warn", component, message);
    }

    pub fn error(&self, component: &str, message: &str) {
        self.append("error", component, message);
    }

    /// Records held by an in-memory sink; empty for file sinks.
    pub fn records(&self) -> Vec<LogRecord> {
        let Ok(sink) = self.sink.lock() else {
            return Vec::new();
        };
        match &*sink {
            LogSink::Memory(records) => records.clone(),
            LogSink::File(_) => Vec::new(),
        }
    }

    pub fn contains(&self, level: &str, component: &str, fragment: &str) -> bool {
        self.records().iter().any(|record| {
            record.level == level && record.component == component && record.message.contains(fragment)
        })
    }

    fn append(&self, level: &str, component: &str, message: &str) {
        let Ok(mut sink) = self.sink.lock() else {
            return;
        };
        let record = LogRecord {
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string(),
            component: component.to_string(),
            message: message.to_string(),
        };

        match &mut *sink {
            LogSink::Memory(records) => records.push(record),
            LogSink::File(path) => {
                let Ok(payload) = serde_json::to_string(&record) else {
                    return;
                };
                if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
                    let _ = writeln!(file, "{payload}");
                }
            }
        }
    }
}
