//! Run notifications
//!
//! Sinks receive only the run ID, status, failing stage and reason code.
//! Build output, credentials and artifact contents never leave the process
//! through this channel.

use crate::run::state::{PipelineRun, RunStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

/// Terminal run summary delivered to sinks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunNotification {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub stage: Option<String>,
    pub reason_code: Option<String>,
}

impl From<&PipelineRun> for RunNotification {
    fn from(run: &PipelineRun) -> Self {
        Self {
            run_id: run.id,
            status: run.status,
            stage: run.failure.as_ref().and_then(|f| f.stage.clone()),
            reason_code: run.failure.as_ref().map(|f| f.reason_code.clone()),
        }
    }
}

/// Receives terminal run notifications
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: &RunNotification);
}

/// Writes notifications to the tracing log
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(&self, n: &RunNotification) {
        match (&n.stage, &n.reason_code) {
            (Some(stage), Some(code)) => {
                info!("Run {} {} at {} ({})", n.run_id, n.status, stage, code)
            }
            (None, Some(code)) => info!("Run {} {} ({})", n.run_id, n.status, code),
            _ => info!("Run {} {}", n.run_id, n.status),
        }
    }
}

/// Appends notifications as JSON lines to a file
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await
    }
}

#[async_trait]
impl NotificationSink for FileSink {
    async fn notify(&self, notification: &RunNotification) {
        let line = match serde_json::to_string(notification) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to encode notification: {}", e);
                return;
            }
        };
        if let Err(e) = self.append(&line).await {
            warn!(
                "Failed to write notification to {}: {}",
                self.path.display(),
                e
            );
        }
    }
}
