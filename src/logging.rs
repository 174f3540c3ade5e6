//! Run log for the DHME
//!
//! Entries are collected per run and returned in the `RunReport` as the audit
//! trail of the batch. Each entry is also forwarded to `tracing` so the host
//! application's subscriber sees it. Timestamps come from the run's frozen
//! clock, never from the wall clock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

/// Log level of a run log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// A structured run log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
    pub target: String,
    /// Business key the entry is about, if any
    pub business_key: Option<String>,
    pub message: String,
    pub metadata: Vec<(String, String)>,
}

impl LogEntry {
    pub fn new(level: LogLevel, timestamp: DateTime<Utc>, target: &str, message: impl Into<String>) -> Self {
        Self {
            level,
            timestamp,
            target: target.to_string(),
            business_key: None,
            message: message.into(),
            metadata: Vec::new(),
        }
    }

    pub fn with_business_key(mut self, business_key: &str) -> Self {
        self.business_key = Some(business_key.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.push((key.to_string(), value.to_string()));
        self
    }

    /// Look up a metadata value by key
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn emit(&self) {
        let business_key = self.business_key.as_deref().unwrap_or("");
        let metadata = self
            .metadata
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ");
        match self.level {
            LogLevel::Trace => trace!(target: "dhme", table = %self.target, business_key, %metadata, "{}", self.message),
            LogLevel::Debug => debug!(target: "dhme", table = %self.target, business_key, %metadata, "{}", self.message),
            LogLevel::Info => info!(target: "dhme", table = %self.target, business_key, %metadata, "{}", self.message),
            LogLevel::Warn => warn!(target: "dhme", table = %self.target, business_key, %metadata, "{}", self.message),
            LogLevel::Error => error!(target: "dhme", table = %self.target, business_key, %metadata, "{}", self.message),
        }
    }
}

/// Collects the entries of one run at or above a minimum level
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLog {
    target: String,
    timestamp: DateTime<Utc>,
    entries: Vec<LogEntry>,
    min_level: LogLevel,
}

impl RunLog {
    pub fn new(target: &str, timestamp: DateTime<Utc>, min_level: LogLevel) -> Self {
        Self {
            target: target.to_string(),
            timestamp,
            entries: Vec::new(),
            min_level,
        }
    }

    /// Forward to `tracing` and keep the entry if it meets the minimum level
    pub fn log(&mut self, entry: LogEntry) {
        entry.emit();
        if entry.level >= self.min_level {
            self.entries.push(entry);
        }
    }

    /// Start an entry stamped with this run's time and target
    pub fn entry(&self, level: LogLevel, message: impl Into<String>) -> LogEntry {
        LogEntry::new(level, self.timestamp, &self.target, message)
    }

    pub fn debug(&mut self, message: impl Into<String>) {
        let entry = self.entry(LogLevel::Debug, message);
        self.log(entry);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        let entry = self.entry(LogLevel::Info, message);
        self.log(entry);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let entry = self.entry(LogLevel::Warn, message);
        self.log(entry);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn filter_by_level(&self, level: LogLevel) -> Vec<&LogEntry> {
        self.entries.iter().filter(|e| e.level == level).collect()
    }

    pub fn filter_by_business_key(&self, business_key: &str) -> Vec<&LogEntry> {
        self.entries
            .iter()
            .filter(|e| e.business_key.as_deref() == Some(business_key))
            .collect()
    }

    pub fn into_entries(self) -> Vec<LogEntry> {
        self.entries
    }
}
