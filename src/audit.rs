//! Append-only audit log.
//!
//! The [`AuditLog`] is the durable record of a run: every transition the
//! orchestrator makes and every activity a stage executor reports is
//! appended here, and mirrored to `tracing`. Entries are never mutated or
//! removed, except that the whole log is cleared when a run starts or is
//! reset.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Severity or category of an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    /// Neutral progress information.
    Info,
    /// Something needs attention, e.g. the run is paused.
    Warning,
    /// A failure or rejection.
    Error,
    /// A stage or the run finished well.
    Success,
    /// Activity of an agent backing a stage.
    Agent,
    /// A tool call made on behalf of a stage.
    Tool,
}

impl AuditLevel {
    /// Upper-case label used when rendering entries.
    pub fn label(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Success => "SUCCESS",
            Self::Agent => "AGENT",
            Self::Tool => "TOOL",
        }
    }
}

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// When the entry was appended.
    pub timestamp: DateTime<Utc>,
    /// Entry level.
    pub level: AuditLevel,
    /// Free-text message.
    pub message: String,
}

impl AuditEntry {
    /// Creates an entry stamped with the current time.
    pub fn new(level: AuditLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        }
    }
}

impl fmt::Display for AuditEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.timestamp.format("%H:%M:%S"),
            self.level.label(),
            self.message
        )
    }
}

/// A shared, append-only audit log.
///
/// Cloning yields another handle to the same log.
///
/// # Example
///
/// ```
/// use loanflow::{AuditLevel, AuditLog};
///
/// let log = AuditLog::new();
/// log.info("Initializing agentic workflow execution...");
/// log.warning("Workflow paused - Human review required");
///
/// let entries = log.entries();
/// assert_eq!(entries.len(), 2);
/// assert_eq!(entries[1].level, AuditLevel::Warning);
/// ```
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    entries: Arc<Mutex<Vec<AuditEntry>>>,
}

impl AuditLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry and mirrors it to `tracing`.
    pub fn record(&self, level: AuditLevel, message: impl Into<String>) {
        let entry = AuditEntry::new(level, message);
        match entry.level {
            AuditLevel::Error => error!(level = entry.level.label(), "{}", entry.message),
            AuditLevel::Warning => warn!(level = entry.level.label(), "{}", entry.message),
            _ => info!(level = entry.level.label(), "{}", entry.message),
        }
        self.entries.lock().push(entry);
    }

    /// Appends an info entry.
    pub fn info(&self, message: impl Into<String>) {
        self.record(AuditLevel::Info, message);
    }

    /// Appends a warning entry.
    pub fn warning(&self, message: impl Into<String>) {
        self.record(AuditLevel::Warning, message);
    }

    /// Appends an error entry.
    pub fn error(&self, message: impl Into<String>) {
        self.record(AuditLevel::Error, message);
    }

    /// Appends a success entry.
    pub fn success(&self, message: impl Into<String>) {
        self.record(AuditLevel::Success, message);
    }

    /// Returns a snapshot of all entries in append order.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    /// Returns the messages of all entries at the given level.
    pub fn messages_at(&self, level: AuditLevel) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.level == level)
            .map(|e| e.message.clone())
            .collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if the log has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Removes every entry.
    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_log_is_empty() {
        let log = AuditLog::new();
        assert!(log.is_empty());
        assert_eq!(log.len(), 0);
    }

    #[test]
    fn test_entries_keep_append_order() {
        let log = AuditLog::new();
        log.info("one");
        log.success("two");
        log.error("three");
        let messages: Vec<String> = log.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_timestamps_non_decreasing() {
        let log = AuditLog::new();
        for i in 0..10 {
            log.info(format!("entry {i}"));
        }
        let entries = log.entries();
        assert!(entries.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_clones_share_entries() {
        let log = AuditLog::new();
        let handle = log.clone();
        handle.record(AuditLevel::Tool, "Calling tool ocr_tool");
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].level, AuditLevel::Tool);
    }

    #[test]
    fn test_messages_at() {
        let log = AuditLog::new();
        log.info("a");
        log.warning("b");
        log.info("c");
        assert_eq!(log.messages_at(AuditLevel::Info), vec!["a", "c"]);
        assert_eq!(log.messages_at(AuditLevel::Warning), vec!["b"]);
        assert!(log.messages_at(AuditLevel::Agent).is_empty());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let log = AuditLog::new();
        log.info("first");
        let snapshot = log.entries();
        log.info("second");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_clear() {
        let log = AuditLog::new();
        log.info("x");
        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn test_entry_display() {
        let entry = AuditEntry::new(AuditLevel::Warning, "Workflow paused - Human review required");
        let rendered = entry.to_string();
        assert!(rendered.contains("[WARNING]"));
        assert!(rendered.ends_with("Workflow paused - Human review required"));
    }

    #[test]
    fn test_level_serialize() {
        let json = serde_json::to_string(&AuditLevel::Agent).unwrap();
        assert_eq!(json, r#""agent""#);
    }
}
