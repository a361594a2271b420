//! Build step executors

use crate::cache::CacheKey;
use crate::error::{RollgateError, RollgateResult};
use crate::process::ShellCommand;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Input to a build
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub run_id: Uuid,
    pub source_ref: String,
    pub cache_key: CacheKey,
}

/// Produces artifact bytes for a run
#[async_trait]
pub trait Builder: Send + Sync {
    async fn execute(&self, request: &BuildRequest) -> RollgateResult<Vec<u8>>;
}

/// Runs a shell command and reads the artifact file it produces
///
/// The command sees `ROLLGATE_RUN_ID`, `ROLLGATE_SOURCE_REF` and
/// `ROLLGATE_CACHE_KEY`.
pub struct ShellBuilder {
    command: String,
    artifact: PathBuf,
    workdir: PathBuf,
    timeout: Duration,
}

impl ShellBuilder {
    /// `artifact` is resolved against `workdir`
    pub fn new(
        command: impl Into<String>,
        artifact: impl Into<PathBuf>,
        workdir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            command: command.into(),
            artifact: artifact.into(),
            workdir: workdir.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Builder for ShellBuilder {
    async fn execute(&self, request: &BuildRequest) -> RollgateResult<Vec<u8>> {
        info!("Building {} for run {}", request.source_ref, request.run_id);

        let output = ShellCommand::new(self.command.as_str(), self.timeout)
            .cwd(&self.workdir)
            .env("ROLLGATE_RUN_ID", request.run_id.to_string())
            .env("ROLLGATE_SOURCE_REF", request.source_ref.as_str())
            .env("ROLLGATE_CACHE_KEY", request.cache_key.as_str())
            .run(&|line: String| debug!("[build] {}", line))
            .await
            .map_err(|e| match e {
                RollgateError::CommandExecution { .. } => {
                    RollgateError::BuildTimeout(self.timeout.as_secs())
                }
                other => other,
            })?;

        if !output.success {
            return Err(RollgateError::BuildFailed(output.failure_message()));
        }

        let path = self.workdir.join(&self.artifact);
        tokio::fs::read(&path).await.map_err(|e| {
            RollgateError::BuildFailed(format!(
                "artifact {} not readable: {}",
                path.display(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request() -> BuildRequest {
        BuildRequest {
            run_id: Uuid::new_v4(),
            source_ref: "main".into(),
            cache_key: CacheKey::new("k"),
        }
    }

    #[tokio::test]
    async fn reads_artifact_after_build() {
        let dir = TempDir::new().unwrap();
        let builder = ShellBuilder::new(
            "printf \"$ROLLGATE_SOURCE_REF\" > out.bin",
            "out.bin",
            dir.path(),
            Duration::from_secs(10),
        );

        let bytes = builder.execute(&request()).await.unwrap();
        assert_eq!(bytes, b"main");
    }

    #[tokio::test]
    async fn failed_build_reports_output_tail() {
        let dir = TempDir::new().unwrap();
        let builder = ShellBuilder::new(
            "echo compile error; exit 2",
            "out.bin",
            dir.path(),
            Duration::from_secs(10),
        );

        match builder.execute(&request()).await {
            Err(RollgateError::BuildFailed(output)) => assert!(output.contains("compile error")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_artifact_is_a_build_failure() {
        let dir = TempDir::new().unwrap();
        let builder = ShellBuilder::new("true", "missing.bin", dir.path(), Duration::from_secs(10));
        assert!(matches!(
            builder.execute(&request()).await,
            Err(RollgateError::BuildFailed(_))
        ));
    }

    #[tokio::test]
    async fn slow_build_times_out() {
        let dir = TempDir::new().unwrap();
        let builder = ShellBuilder::new("sleep 5", "out.bin", dir.path(), Duration::from_millis(100));
        assert!(matches!(
            builder.execute(&request()).await,
            Err(RollgateError::BuildTimeout(_))
        ));
    }
}
