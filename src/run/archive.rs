//! Persistence of finished runs
//!
//! Each run is one pretty-printed JSON file named after its ID.

use crate::error::{RollgateError, RollgateResult};
use crate::run::state::PipelineRun;
use chrono::{Duration, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

/// Directory of archived run records
#[derive(Debug, Clone)]
pub struct RunArchive {
    dir: PathBuf,
}

impl RunArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Save a run record
    pub async fn save(&self, run: &PipelineRun) -> RollgateResult<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| RollgateError::io("creating runs directory", e))?;

        let path = self.file_path(run.id);
        let content = serde_json::to_string_pretty(run)?;
        fs::write(&path, content)
            .await
            .map_err(|e| RollgateError::io(format!("writing run file {}", path.display()), e))?;

        debug!("Archived run {} to {}", run.id, path.display());
        Ok(())
    }

    /// Load a run by exact ID
    pub async fn load(&self, id: Uuid) -> RollgateResult<Option<PipelineRun>> {
        let path = self.file_path(id);
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(RollgateError::io(
                    format!("reading run file {}", path.display()),
                    e,
                ))
            }
        };

        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Find a run by full ID or unique ID prefix
    pub async fn find(&self, id_or_prefix: &str) -> RollgateResult<Option<PipelineRun>> {
        if let Ok(id) = Uuid::parse_str(id_or_prefix) {
            return self.load(id).await;
        }

        let matches: Vec<PipelineRun> = self
            .list_all()
            .await?
            .into_iter()
            .filter(|run| run.id.to_string().starts_with(id_or_prefix))
            .collect();

        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.into_iter().next()),
            n => Err(RollgateError::User(format!(
                "Run prefix '{}' is ambiguous ({} matches)",
                id_or_prefix, n
            ))),
        }
    }

    /// List all archived runs, newest first
    pub async fn list_all(&self) -> RollgateResult<Vec<PipelineRun>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(RollgateError::io("reading runs directory", e)),
        };

        let mut runs = vec![];
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RollgateError::io("reading run entry", e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                let content = fs::read_to_string(&path).await.ok();
                if let Some(content) = content {
                    if let Ok(run) = serde_json::from_str::<PipelineRun>(&content) {
                        runs.push(run);
                    }
                }
            }
        }

        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }

    /// Remove finished runs older than `max_age_hours` (0 disables)
    pub async fn cleanup(&self, max_age_hours: u32) -> RollgateResult<u32> {
        if max_age_hours == 0 {
            return Ok(0);
        }

        let cutoff = Utc::now() - Duration::hours(i64::from(max_age_hours));
        let mut cleaned = 0;

        for run in self.list_all().await? {
            let finished = match run.finished_at {
                Some(at) if run.status.is_terminal() => at,
                _ => continue,
            };
            if finished < cutoff {
                let path = self.file_path(run.id);
                fs::remove_file(&path).await.map_err(|e| {
                    RollgateError::io(format!("deleting run file {}", path.display()), e)
                })?;
                cleaned += 1;
                info!("Cleaned up old run: {}", run.id);
            }
        }

        Ok(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::state::RunStatus;
    use tempfile::TempDir;

    #[tokio::test]
    async fn save_load_and_list() {
        let dir = TempDir::new().unwrap();
        let archive = RunArchive::new(dir.path().join("runs"));

        let mut older = PipelineRun::new("v1", "web");
        older.started_at = Utc::now() - Duration::minutes(5);
        older.advance(RunStatus::Succeeded);
        let mut newer = PipelineRun::new("v2", "web");
        newer.advance(RunStatus::Failed);

        archive.save(&older).await.unwrap();
        archive.save(&newer).await.unwrap();

        let loaded = archive.load(older.id).await.unwrap().unwrap();
        assert_eq!(loaded.source_ref, "v1");

        let all = archive.list_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, newer.id);
    }

    #[tokio::test]
    async fn missing_dir_lists_empty() {
        let dir = TempDir::new().unwrap();
        let archive = RunArchive::new(dir.path().join("absent"));
        assert!(archive.list_all().await.unwrap().is_empty());
        assert!(archive.load(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_by_prefix() {
        let dir = TempDir::new().unwrap();
        let archive = RunArchive::new(dir.path());
        let run = PipelineRun::new("v1", "web");
        archive.save(&run).await.unwrap();

        let found = archive.find(&run.short_id()).await.unwrap().unwrap();
        assert_eq!(found.id, run.id);
        assert!(archive.find("zzzz").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cleanup_removes_old_finished_runs() {
        let dir = TempDir::new().unwrap();
        let archive = RunArchive::new(dir.path());

        let mut old = PipelineRun::new("v1", "web");
        old.advance(RunStatus::Succeeded);
        old.finished_at = Some(Utc::now() - Duration::hours(48));
        let mut recent = PipelineRun::new("v2", "web");
        recent.advance(RunStatus::Succeeded);

        archive.save(&old).await.unwrap();
        archive.save(&recent).await.unwrap();

        assert_eq!(archive.cleanup(24).await.unwrap(), 1);
        assert_eq!(archive.cleanup(0).await.unwrap(), 0);
        let remaining = archive.list_all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, recent.id);
    }
}
