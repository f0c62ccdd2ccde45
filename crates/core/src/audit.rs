//! Audit trail of raw wire exchanges.
//!
//! The engine hands every outgoing request and every received response to an
//! [`AuditLog`] before the response is parsed, so bytes that later fail to parse are
//! still on record. Audit failures are logged and never fail the exchange.

use chrono::{DateTime, Utc};
use ihe_types::MessageId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Request,
    Response,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Request => "request",
            Self::Response => "response",
        })
    }
}

/// One raw exchange leg.
#[derive(Clone, Copy, Debug)]
pub struct AuditEntry<'a> {
    pub direction: Direction,
    pub message_id: MessageId,
    /// Zero-based attempt number within one `execute` call.
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    pub bytes: &'a [u8],
}

pub trait AuditLog {
    fn record(&self, entry: &AuditEntry<'_>);
}

/// Writes exchanges to the `tracing` subscriber: a summary at `debug`, the body at `trace`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditLog;

impl AuditLog for TracingAuditLog {
    fn record(&self, entry: &AuditEntry<'_>) {
        tracing::debug!(
            message_id = %entry.message_id,
            direction = %entry.direction,
            attempt = entry.attempt,
            bytes = entry.bytes.len(),
            "wire exchange"
        );
        tracing::trace!(
            message_id = %entry.message_id,
            direction = %entry.direction,
            body = %String::from_utf8_lossy(entry.bytes),
            "wire exchange body"
        );
    }
}

/// Writes each exchange leg to its own file:
/// `<dir>/<timestamp>-<message-id>-<attempt>-<direction>.xml`.
#[derive(Clone, Debug)]
pub struct FileAuditLog {
    dir: PathBuf,
}

impl FileAuditLog {
    /// Creates the audit directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, entry: &AuditEntry<'_>) -> PathBuf {
        self.dir.join(format!(
            "{}-{}-{}-{}.xml",
            entry.timestamp.format("%Y%m%dT%H%M%S%.3fZ"),
            entry.message_id,
            entry.attempt,
            entry.direction
        ))
    }
}

impl AuditLog for FileAuditLog {
    fn record(&self, entry: &AuditEntry<'_>) {
        let path = self.path_for(entry);
        if let Err(e) = std::fs::write(&path, entry.bytes) {
            tracing::warn!(
                message_id = %entry.message_id,
                path = %path.display(),
                "failed to write audit record: {e}"
            );
        }
    }
}

/// An owned copy of an [`AuditEntry`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditRecord {
    pub direction: Direction,
    pub message_id: MessageId,
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    pub bytes: Vec<u8>,
}

/// Keeps exchanges in memory; clones share the same record list.
#[derive(Clone, Debug, Default)]
pub struct MemoryAuditLog {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl AuditLog for MemoryAuditLog {
    fn record(&self, entry: &AuditEntry<'_>) {
        if let Ok(mut records) = self.records.lock() {
            records.push(AuditRecord {
                direction: entry.direction,
                message_id: entry.message_id,
                attempt: entry.attempt,
                timestamp: entry.timestamp,
                bytes: entry.bytes.to_vec(),
            });
        }
    }
}

/// Fans one entry out to several logs.
pub struct CompositeAuditLog {
    logs: Vec<Box<dyn AuditLog>>,
}

impl CompositeAuditLog {
    pub fn new(logs: Vec<Box<dyn AuditLog>>) -> Self {
        Self { logs }
    }
}

impl AuditLog for CompositeAuditLog {
    fn record(&self, entry: &AuditEntry<'_>) {
        for log in &self.logs {
            log.record(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(bytes: &[u8], direction: Direction) -> AuditEntry<'_> {
        AuditEntry {
            direction,
            message_id: MessageId::new(),
            attempt: 1,
            timestamp: Utc::now(),
            bytes,
        }
    }

    #[test]
    fn file_audit_log_writes_raw_bytes() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let log = FileAuditLog::new(dir.path().join("audit")).expect("create dir");
        let raw = b"\xEF\xBB\xBF<not even xml";
        let e = entry(raw, Direction::Response);
        log.record(&e);

        let path = log.path_for(&e);
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with(&format!("{}-1-response.xml", e.message_id)), "{name}");
        assert_eq!(std::fs::read(&path).expect("read back"), raw);
    }

    #[test]
    fn memory_audit_log_clones_share_records() {
        let log = MemoryAuditLog::new();
        let composite = CompositeAuditLog::new(vec![Box::new(log.clone()), Box::new(TracingAuditLog)]);
        composite.record(&entry(b"<a/>", Direction::Request));
        composite.record(&entry(b"<b/>", Direction::Response));

        let records = log.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].direction, Direction::Request);
        assert_eq!(records[1].bytes, b"<b/>");
    }
}
