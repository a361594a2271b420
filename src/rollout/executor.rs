//! Deploy and health-probe executors
//!
//! The controller reaches deployment targets only through these traits. Each
//! call is bounded in time: shell implementations kill the command after
//! their timeout, and the controller bounds health checking by the stage's
//! health policy.

use crate::cache::ArtifactRef;
use crate::credentials::Credential;
use crate::process::ShellCommand;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Which action a deploy request performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployKind {
    Deploy,
    Rollback,
}

impl fmt::Display for DeployKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deploy => f.write_str("deploy"),
            Self::Rollback => f.write_str("rollback"),
        }
    }
}

/// Input to a deploy or rollback action
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub kind: DeployKind,
    pub run_id: Uuid,
    pub environment: String,
    pub traffic_percent: u8,
    pub attempt: u32,
    pub artifact: ArtifactRef,
    pub credential: Credential,
}

/// Result of a deploy or rollback action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Succeeded,
    Failed(String),
}

/// Input to a single health probe
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub run_id: Uuid,
    pub environment: String,
    pub traffic_percent: u8,
    pub artifact: ArtifactRef,
}

/// Result of a single health probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Healthy,
    Unhealthy(String),
}

/// Performs deploy and rollback actions against an environment
#[async_trait]
pub trait DeployExecutor: Send + Sync {
    async fn execute(&self, request: &DeployRequest) -> ActionOutcome;
}

/// Checks the health of an environment
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn execute(&self, request: &ProbeRequest) -> ProbeOutcome;
}

/// Runs configured shell commands for deploy and rollback
///
/// The command sees `ROLLGATE_ACTION`, `ROLLGATE_RUN_ID`,
/// `ROLLGATE_ENVIRONMENT`, `ROLLGATE_TRAFFIC_PERCENT`, `ROLLGATE_ATTEMPT`,
/// `ROLLGATE_ARTIFACT_DIGEST`, `ROLLGATE_ARTIFACT_LOCATION` and
/// `ROLLGATE_CREDENTIAL`.
pub struct ShellExecutor {
    deploy_command: String,
    rollback_command: Option<String>,
    workdir: Option<PathBuf>,
    timeout: Duration,
}

impl ShellExecutor {
    pub fn new(deploy_command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            deploy_command: deploy_command.into(),
            rollback_command: None,
            workdir: None,
            timeout,
        }
    }

    pub fn with_rollback(mut self, rollback_command: impl Into<String>) -> Self {
        self.rollback_command = Some(rollback_command.into());
        self
    }

    /// Run commands from `dir` instead of the process working directory
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }
}

#[async_trait]
impl DeployExecutor for ShellExecutor {
    async fn execute(&self, request: &DeployRequest) -> ActionOutcome {
        let command = match request.kind {
            DeployKind::Deploy => &self.deploy_command,
            DeployKind::Rollback => match &self.rollback_command {
                Some(command) => command,
                None => {
                    debug!("No rollback command for {}, skipping", request.environment);
                    return ActionOutcome::Succeeded;
                }
            },
        };

        let mut shell = ShellCommand::new(command.as_str(), self.timeout)
            .env("ROLLGATE_ACTION", request.kind.to_string())
            .env("ROLLGATE_RUN_ID", request.run_id.to_string())
            .env("ROLLGATE_ENVIRONMENT", request.environment.as_str())
            .env("ROLLGATE_TRAFFIC_PERCENT", request.traffic_percent.to_string())
            .env("ROLLGATE_ATTEMPT", request.attempt.to_string())
            .env("ROLLGATE_ARTIFACT_DIGEST", request.artifact.digest.as_str())
            .env("ROLLGATE_ARTIFACT_LOCATION", request.artifact.location.as_str())
            .env("ROLLGATE_CREDENTIAL", request.credential.bearer_token());
        if let Some(dir) = &self.workdir {
            shell = shell.cwd(dir);
        }

        let environment = request.environment.clone();
        let on_output = move |line: String| debug!("[{}] {}", environment, line);
        match shell.run(&on_output).await {
            Ok(output) if output.success => ActionOutcome::Succeeded,
            Ok(output) => ActionOutcome::Failed(output.failure_message()),
            Err(e) => ActionOutcome::Failed(e.to_string()),
        }
    }
}

/// Runs a configured shell command as a health probe; exit 0 is healthy
pub struct ShellProbe {
    command: String,
    workdir: Option<PathBuf>,
    timeout: Duration,
}

impl ShellProbe {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            workdir: None,
            timeout,
        }
    }

    /// Run the probe from `dir`
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }
}

#[async_trait]
impl HealthProbe for ShellProbe {
    async fn execute(&self, request: &ProbeRequest) -> ProbeOutcome {
        let mut shell = ShellCommand::new(self.command.as_str(), self.timeout)
            .env("ROLLGATE_RUN_ID", request.run_id.to_string())
            .env("ROLLGATE_ENVIRONMENT", request.environment.as_str())
            .env("ROLLGATE_TRAFFIC_PERCENT", request.traffic_percent.to_string())
            .env("ROLLGATE_ARTIFACT_DIGEST", request.artifact.digest.as_str());
        if let Some(dir) = &self.workdir {
            shell = shell.cwd(dir);
        }

        match shell.run(&|_: String| {}).await {
            Ok(output) if output.success => ProbeOutcome::Healthy,
            Ok(output) => ProbeOutcome::Unhealthy(output.failure_message()),
            Err(e) => ProbeOutcome::Unhealthy(e.to_string()),
        }
    }
}

/// Probe that always reports healthy, for pipelines without a health command
pub struct AlwaysHealthy;

#[async_trait]
impl HealthProbe for AlwaysHealthy {
    async fn execute(&self, _request: &ProbeRequest) -> ProbeOutcome {
        ProbeOutcome::Healthy
    }
}
