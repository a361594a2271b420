//! Audit logging for credential and run events
//!
//! Writes JSON lines to `<state>/audit.log` and keeps the records in memory.
//! Records are append-only: once written they are never mutated.

use crate::config::{schema::Config, ConfigManager};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

/// One immutable audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    timestamp: DateTime<Utc>,
    event: String,
    data: serde_json::Value,
}

impl AuditRecord {
    /// When the event was recorded
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Event name, e.g. `credential.issued`
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Event payload
    pub fn data(&self) -> &serde_json::Value {
        &self.data
    }
}

/// Audit logger that appends JSON lines
///
/// Appends are serialized through one lock, so the file order matches the
/// in-memory order and no record is lost under concurrent writers.
pub struct AuditLog {
    enabled: bool,
    path: Option<PathBuf>,
    records: Mutex<Vec<AuditRecord>>,
}

impl AuditLog {
    /// Create a new audit logger from config
    pub fn new(config: &Config) -> Self {
        Self {
            enabled: config.general.audit_log,
            path: Some(ConfigManager::audit_log_path()),
            records: Mutex::new(Vec::new()),
        }
    }

    /// Audit log kept only in memory
    pub fn in_memory() -> Self {
        Self {
            enabled: true,
            path: None,
            records: Mutex::new(Vec::new()),
        }
    }

    /// Audit log writing to a specific file
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            enabled: true,
            path: Some(path),
            records: Mutex::new(Vec::new()),
        }
    }

    /// Log an audit event
    ///
    /// IO failures are logged and dropped; auditing never blocks the workflow.
    pub async fn log(&self, event: &str, data: serde_json::Value) {
        if !self.enabled {
            return;
        }

        let mut records = self.records.lock().await;

        let record = AuditRecord {
            timestamp: Utc::now(),
            event: event.to_string(),
            data,
        };

        if let Some(path) = &self.path {
            match serde_json::to_string(&record) {
                Ok(mut line) => {
                    line.push('\n');
                    if let Err(e) = append(path, &line).await {
                        warn!("Failed to write audit log: {}", e);
                    }
                }
                Err(e) => warn!("Failed to serialize audit event: {}", e),
            }
        }

        records.push(record);
    }

    /// Snapshot of all records written by this logger
    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().await.clone()
    }

    /// Read the last `lines` records from an audit file (0 = all)
    pub async fn tail(path: &std::path::Path, lines: usize) -> std::io::Result<Vec<AuditRecord>> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e),
        };

        let records: Vec<AuditRecord> = content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        let skip = if lines == 0 {
            0
        } else {
            records.len().saturating_sub(lines)
        };
        Ok(records.into_iter().skip(skip).collect())
    }
}

async fn append(path: &std::path::Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;

    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}
