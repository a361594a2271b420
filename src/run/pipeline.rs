//! Pipeline files
//!
//! A pipeline file is plain TOML naming the build command, the deploy, health
//! and rollback commands, and the rollout stages:
//!
//! ```toml
//! name = "web"
//!
//! [build]
//! command = "make dist"
//! artifact = "dist/app.tar.gz"
//! inputs = ["Makefile"]
//!
//! [deploy]
//! command = "./deploy.sh"
//! rollback = "./rollback.sh"
//! health = "./health.sh"
//!
//! [[stages]]
//! environment = "staging"
//! traffic_percent = 100
//! ```

use crate::cache::BuildInputs;
use crate::config::schema::RolloutConfig;
use crate::error::{RollgateError, RollgateResult};
use crate::rollout::{HealthPolicy, RolloutPlan, Stage};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Build step definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSection {
    /// Shell command producing the artifact
    pub command: String,

    /// Artifact path, relative to the working directory
    pub artifact: PathBuf,

    /// Files whose contents feed the cache key
    #[serde(default)]
    pub inputs: Vec<PathBuf>,

    /// Include detected dependency lockfiles in the cache key
    #[serde(default = "default_true")]
    pub lockfiles: bool,
}

/// Deploy, health and rollback commands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploySection {
    pub command: String,

    #[serde(default)]
    pub rollback: Option<String>,

    #[serde(default)]
    pub health: Option<String>,

    /// Bound on a single deploy, rollback or probe command
    #[serde(default = "default_action_timeout")]
    pub timeout_secs: u64,
}

/// Health overrides for one stage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageHealth {
    pub timeout_secs: Option<u64>,
    pub interval_secs: Option<u64>,
    pub required_passes: Option<u32>,
}

/// One stage as written in the file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSection {
    pub environment: String,

    #[serde(default = "default_traffic")]
    pub traffic_percent: u8,

    #[serde(default)]
    pub requires_approval: bool,

    #[serde(default = "default_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub health: StageHealth,
}

/// Parsed pipeline file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineFile {
    pub name: String,

    /// Concurrency group (defaults to the pipeline name)
    #[serde(default)]
    pub group: Option<String>,

    /// Working directory, relative to the pipeline file
    #[serde(default)]
    pub workdir: Option<PathBuf>,

    pub build: BuildSection,

    #[serde(default)]
    pub deploy: Option<DeploySection>,

    #[serde(default)]
    pub stages: Vec<StageSection>,

    /// Directory containing the file, filled in by [`PipelineFile::load`]
    #[serde(skip)]
    base_dir: PathBuf,
}

fn default_true() -> bool {
    true
}

fn default_action_timeout() -> u64 {
    600
}

fn default_traffic() -> u8 {
    100
}

fn default_attempts() -> u32 {
    1
}

impl PipelineFile {
    /// Load and check a pipeline file
    pub async fn load(path: &Path) -> RollgateResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RollgateError::io(format!("reading pipeline {}", path.display()), e))?;

        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::parse(&content, base_dir).map_err(|reason| RollgateError::PipelineInvalid {
            path: path.to_path_buf(),
            reason,
        })
    }

    fn parse(content: &str, base_dir: PathBuf) -> Result<Self, String> {
        let mut pipeline: PipelineFile = toml::from_str(content).map_err(|e| e.to_string())?;
        pipeline.base_dir = base_dir;

        if pipeline.name.trim().is_empty() {
            return Err("name must not be empty".to_string());
        }
        if pipeline.build.command.trim().is_empty() {
            return Err("build.command must not be empty".to_string());
        }
        if !pipeline.stages.is_empty() && pipeline.deploy.is_none() {
            return Err("stages require a [deploy] section".to_string());
        }
        Ok(pipeline)
    }

    /// Concurrency group for runs of this pipeline
    pub fn group(&self) -> &str {
        self.group.as_deref().unwrap_or(&self.name)
    }

    /// Directory commands run in
    pub fn workdir(&self) -> PathBuf {
        match &self.workdir {
            Some(dir) => self.base_dir.join(dir),
            None => self.base_dir.clone(),
        }
    }

    /// Cache key inputs for a source reference
    pub fn build_inputs(&self, source_ref: &str) -> RollgateResult<BuildInputs> {
        let workdir = self.workdir();
        let mut inputs = BuildInputs::new()
            .value("pipeline", &self.name)
            .value("source", source_ref)
            .value("command", &self.build.command)
            .value("artifact", self.build.artifact.to_string_lossy().as_bytes());

        for input in &self.build.inputs {
            inputs = inputs.file(&workdir.join(input))?;
        }
        if self.build.lockfiles {
            inputs = inputs.lockfiles(&workdir)?;
        }
        Ok(inputs)
    }

    /// Rollout plan, if the pipeline deploys
    pub fn plan(&self, defaults: &RolloutConfig) -> RollgateResult<Option<RolloutPlan>> {
        if self.stages.is_empty() {
            return Ok(None);
        }

        let base = HealthPolicy::from_config(defaults);
        let stages = self
            .stages
            .iter()
            .map(|s| Stage {
                environment: s.environment.clone(),
                traffic_percent: s.traffic_percent,
                health: HealthPolicy {
                    timeout_secs: s.health.timeout_secs.unwrap_or(base.timeout_secs),
                    interval_secs: s.health.interval_secs.unwrap_or(base.interval_secs),
                    required_passes: s.health.required_passes.unwrap_or(base.required_passes),
                },
                requires_approval: s.requires_approval,
                max_attempts: s.max_attempts,
            })
            .collect();

        RolloutPlan::new(stages).map(Some)
    }
}
