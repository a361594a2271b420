//! Integration tests for rollgate

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::Path;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
[credentials]
trust_secret = "integration-secret"

[credentials.policies]
canary = ["deploy", "rollback"]
production = ["deploy", "rollback"]

[rollout]
health_timeout_secs = 10
health_interval_secs = 1
approval_timeout_secs = 1
"#;

    const PIPELINE: &str = r#"
name = "web"

[build]
command = 'mkdir -p dist && echo build >> build.log && echo app > dist/app.bin'
artifact = "dist/app.bin"
lockfiles = false

[deploy]
command = 'echo "$ROLLGATE_ENVIRONMENT" >> deployed.log'
rollback = 'echo "$ROLLGATE_ENVIRONMENT" >> rolled_back.log'
health = 'test ! -f "unhealthy-$ROLLGATE_ENVIRONMENT"'

[[stages]]
environment = "canary"
traffic_percent = 10

[[stages]]
environment = "production"
"#;

    /// Isolated working, config and state directories
    struct Sandbox {
        dir: TempDir,
    }

    impl Sandbox {
        fn new() -> Self {
            let sandbox = Self {
                dir: TempDir::new().unwrap(),
            };
            sandbox.write("config.toml", CONFIG);
            sandbox.write("pipeline.toml", PIPELINE);
            sandbox
        }

        fn path(&self) -> &Path {
            self.dir.path()
        }

        fn write(&self, name: &str, contents: &str) {
            std::fs::write(self.path().join(name), contents).unwrap();
        }

        fn read(&self, name: &str) -> String {
            std::fs::read_to_string(self.path().join(name)).unwrap_or_default()
        }

        fn rollgate(&self) -> Command {
            let mut cmd = cargo_bin_cmd!("rollgate");
            cmd.current_dir(self.path())
                .env("ROLLGATE_STATE_DIR", self.path().join("state"))
                .env("ROLLGATE_CONFIG", self.path().join("config.toml"))
                .env("CI", "1")
                .env_remove("ROLLGATE_TRUST_SECRET")
                .arg("--no-local");
            cmd
        }

        /// Run the pipeline, returning the run ID printed in plain format
        fn run_pipeline(&self, extra: &[&str]) -> (bool, String, String) {
            let output = self
                .rollgate()
                .args(["run", "pipeline.toml", "--format", "plain"])
                .args(extra)
                .output()
                .unwrap();
            let stdout = String::from_utf8_lossy(&output.stdout).to_string();
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            (output.status.success(), stdout, stderr)
        }
    }

    #[test]
    fn help_displays() {
        cargo_bin_cmd!("rollgate")
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Pipeline orchestrator"));
    }

    #[test]
    fn version_displays() {
        cargo_bin_cmd!("rollgate")
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("rollgate"));
    }

    #[test]
    fn config_path() {
        let sandbox = Sandbox::new();
        sandbox
            .rollgate()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show_masks_secret() {
        let sandbox = Sandbox::new();
        sandbox
            .rollgate()
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[credentials]"))
            .stdout(predicate::str::contains("integration-secret").not());
    }

    #[test]
    fn runs_empty() {
        let sandbox = Sandbox::new();
        sandbox
            .rollgate()
            .arg("runs")
            .assert()
            .success()
            .stdout(predicate::str::contains("No recorded runs"));
    }

    #[test]
    fn cache_list_empty() {
        let sandbox = Sandbox::new();
        sandbox
            .rollgate()
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Cache is empty"));
    }

    #[test]
    fn show_missing_run() {
        let sandbox = Sandbox::new();
        sandbox
            .rollgate()
            .args(["show", "00000000"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("No recorded run matches"));
    }

    #[test]
    fn run_promotes_through_all_stages() {
        let sandbox = Sandbox::new();
        let (ok, stdout, stderr) = sandbox.run_pipeline(&[]);
        assert!(ok, "run failed: {}", stderr);
        assert!(stdout.contains("succeeded"));
        assert_eq!(sandbox.read("deployed.log"), "canary\nproduction\n");
        assert_eq!(sandbox.read("rolled_back.log"), "");

        sandbox
            .rollgate()
            .args(["runs", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains(stdout.split_whitespace().next().unwrap()));

        sandbox
            .rollgate()
            .arg("audit")
            .assert()
            .success()
            .stdout(predicate::str::contains("credential.issued"))
            .stdout(predicate::str::contains("run.finished"));
    }

    #[test]
    fn second_run_reuses_cached_artifact() {
        let sandbox = Sandbox::new();
        let (first_ok, _, _) = sandbox.run_pipeline(&[]);
        let (second_ok, stdout, _) = sandbox.run_pipeline(&[]);
        assert!(first_ok && second_ok);
        assert_eq!(sandbox.read("build.log"), "build\n");

        let id = stdout.split_whitespace().next().unwrap().to_string();
        sandbox
            .rollgate()
            .args(["show", &id, "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""cache_hit": true"#));

        sandbox
            .rollgate()
            .args(["cache", "list", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::is_empty().not());
    }

    #[test]
    fn unhealthy_production_rolls_back_only_production() {
        let sandbox = Sandbox::new();
        sandbox.write("unhealthy-production", "");

        let (ok, _, stderr) = sandbox.run_pipeline(&[]);
        assert!(!ok);
        assert!(stderr.contains("health_check_failure at production"), "{}", stderr);
        assert_eq!(sandbox.read("deployed.log"), "canary\nproduction\n");
        assert_eq!(sandbox.read("rolled_back.log"), "production\n");
    }

    #[test]
    fn unhealthy_canary_never_reaches_production() {
        let sandbox = Sandbox::new();
        sandbox.write("unhealthy-canary", "");

        let (ok, _, stderr) = sandbox.run_pipeline(&[]);
        assert!(!ok);
        assert!(stderr.contains("health_check_failure at canary"), "{}", stderr);
        assert_eq!(sandbox.read("deployed.log"), "canary\n");
    }

    #[test]
    fn missing_policy_denies_credential() {
        let sandbox = Sandbox::new();
        sandbox.write(
            "config.toml",
            &CONFIG.replace("production = [\"deploy\", \"rollback\"]\n", ""),
        );

        let (ok, _, stderr) = sandbox.run_pipeline(&[]);
        assert!(!ok);
        assert!(stderr.contains("credential_denied at production"), "{}", stderr);
        assert_eq!(sandbox.read("deployed.log"), "canary\n");
    }

    #[test]
    fn gated_stage_needs_approval() {
        let sandbox = Sandbox::new();
        sandbox.write(
            "pipeline.toml",
            &format!("{}requires_approval = true\n", PIPELINE),
        );

        let (ok, _, stderr) = sandbox.run_pipeline(&[]);
        assert!(!ok);
        assert!(stderr.contains("approval_timeout at production"), "{}", stderr);
        assert_eq!(sandbox.read("deployed.log"), "canary\n");

        let (ok, _, stderr) = sandbox.run_pipeline(&["--approve", "production"]);
        assert!(ok, "approved run failed: {}", stderr);
    }

    #[test]
    fn missing_trust_secret_is_reported() {
        let sandbox = Sandbox::new();
        sandbox.write("config.toml", "");

        sandbox
            .rollgate()
            .args(["run", "pipeline.toml"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Trust secret not configured"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[cfg(unix)]
    #[test]
    fn interrupt_lets_running_deploy_finish() {
        use std::os::unix::process::CommandExt;
        use std::process::Stdio;
        use std::time::{Duration, Instant};

        let sandbox = Sandbox::new();
        sandbox.write(
            "pipeline.toml",
            &PIPELINE.replace(
                r#"command = 'echo "$ROLLGATE_ENVIRONMENT" >> deployed.log'"#,
                "command = 'echo started >> deployed.log; sleep 2; echo finished >> deployed.log'",
            ),
        );

        let child = std::process::Command::new(env!("CARGO_BIN_EXE_rollgate"))
            .current_dir(sandbox.path())
            .env("ROLLGATE_STATE_DIR", sandbox.path().join("state"))
            .env("ROLLGATE_CONFIG", sandbox.path().join("config.toml"))
            .env("CI", "1")
            .env_remove("ROLLGATE_TRUST_SECRET")
            .args(["--no-local", "run", "pipeline.toml", "--format", "plain"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(30);
        while !sandbox.read("deployed.log").contains("started") {
            assert!(Instant::now() < deadline, "deploy never started");
            std::thread::sleep(Duration::from_millis(50));
        }

        // Same signal a terminal sends to the foreground group on Ctrl-C
        let status = std::process::Command::new("kill")
            .args(["-INT", "--", &format!("-{}", child.id())])
            .status()
            .unwrap();
        assert!(status.success());

        let output = child.wait_with_output().unwrap();
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(!output.status.success());
        assert!(stderr.contains("was cancelled"), "{}", stderr);
        assert_eq!(sandbox.read("deployed.log"), "started\nfinished\n");
        assert_eq!(sandbox.read("rolled_back.log"), "");
    }

    #[test]
    fn stages_without_deploy_section_are_rejected() {
        let sandbox = Sandbox::new();
        sandbox.write(
            "pipeline.toml",
            "name = \"web\"\n[build]\ncommand = \"true\"\nartifact = \"out\"\n[[stages]]\nenvironment = \"canary\"\n",
        );

        sandbox
            .rollgate()
            .args(["run", "pipeline.toml"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid pipeline definition"));
    }
}

mod pipeline_tests {
    use async_trait::async_trait;
    use rollgate::audit::AuditLog;
    use rollgate::cache::CacheStore;
    use rollgate::config::schema::RolloutConfig;
    use rollgate::credentials::{Action, CredentialBroker, PolicySet, TrustAnchor};
    use rollgate::error::RollgateResult;
    use rollgate::rollout::{
        ActionOutcome, ApprovalGate, ControllerSettings, DeployExecutor, DeployKind,
        DeployRequest, HealthProbe, ProbeOutcome, ProbeRequest, RolloutController,
    };
    use rollgate::run::{
        BuildRequest, Builder, CoordinatorParts, CoordinatorSettings, PipelineFile,
        RunCoordinator, RunRequest, RunStatus,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;
    use uuid::Uuid;

    struct StaticBuilder {
        builds: AtomicUsize,
    }

    #[async_trait]
    impl Builder for StaticBuilder {
        async fn execute(&self, request: &BuildRequest) -> RollgateResult<Vec<u8>> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            Ok(format!("bundle {}", request.source_ref).into_bytes())
        }
    }

    /// Records each action with the scope of the credential it carried
    #[derive(Default)]
    struct ScopeRecorder {
        actions: Mutex<Vec<(Uuid, DeployKind, String, String)>>,
    }

    #[async_trait]
    impl DeployExecutor for ScopeRecorder {
        async fn execute(&self, request: &DeployRequest) -> ActionOutcome {
            assert!(!request.credential.is_expired());
            self.actions.lock().unwrap().push((
                request.run_id,
                request.kind,
                request.environment.clone(),
                request.credential.scope().to_string(),
            ));
            ActionOutcome::Succeeded
        }
    }

    struct UnhealthyIn(&'static str);

    #[async_trait]
    impl HealthProbe for UnhealthyIn {
        async fn execute(&self, request: &ProbeRequest) -> ProbeOutcome {
            if request.environment == self.0 {
                ProbeOutcome::Unhealthy("5xx rate above threshold".into())
            } else {
                ProbeOutcome::Healthy
            }
        }
    }

    struct Fixture {
        coordinator: RunCoordinator,
        builder: Arc<StaticBuilder>,
        deployer: Arc<ScopeRecorder>,
        audit: Arc<AuditLog>,
    }

    fn fixture(unhealthy: &'static str) -> Fixture {
        let anchor = Arc::new(TrustAnchor::new("rollgate", "pipeline-secret"));
        let audit = Arc::new(AuditLog::in_memory());
        let everything = [Action::Read, Action::Deploy, Action::Rollback];
        let broker = Arc::new(CredentialBroker::new(
            Arc::clone(&anchor),
            PolicySet::new()
                .bind("canary", everything)
                .bind("production", everything),
            chrono::Duration::minutes(5),
            chrono::Duration::minutes(15),
            Arc::clone(&audit),
        ));
        let deployer = Arc::new(ScopeRecorder::default());
        let controller = Arc::new(RolloutController::new(
            broker,
            Arc::clone(&deployer) as Arc<dyn DeployExecutor>,
            Arc::new(UnhealthyIn(unhealthy)),
            Arc::new(ApprovalGate::new()),
            ControllerSettings {
                issue_timeout: Duration::from_secs(5),
                approval_timeout: Duration::from_secs(30),
            },
        ));
        let builder = Arc::new(StaticBuilder {
            builds: AtomicUsize::new(0),
        });

        let coordinator = RunCoordinator::new(
            CoordinatorParts {
                cache: Arc::new(CacheStore::in_memory(1 << 20, Duration::from_secs(1))),
                builder: Arc::clone(&builder) as Arc<dyn Builder>,
                controller,
                anchor,
                audit: Arc::clone(&audit),
                sinks: Vec::new(),
                archive: None,
            },
            CoordinatorSettings::default(),
        );

        Fixture {
            coordinator,
            builder,
            deployer,
            audit,
        }
    }

    async fn pipeline(dir: &TempDir, gated: bool) -> PipelineFile {
        let gate = if gated { "requires_approval = true\n" } else { "" };
        let content = format!(
            r#"
name = "api"

[build]
command = "make"
artifact = "out/api"
lockfiles = false

[deploy]
command = "./deploy.sh"

[[stages]]
environment = "canary"
traffic_percent = 5
{gate}
[stages.health]
timeout_secs = 2
interval_secs = 0

[[stages]]
environment = "production"

[stages.health]
timeout_secs = 2
interval_secs = 0
"#
        );
        let path = dir.path().join("pipeline.toml");
        tokio::fs::write(&path, content).await.unwrap();
        PipelineFile::load(&path).await.unwrap()
    }

    fn request(file: &PipelineFile, source: &str) -> RunRequest {
        let plan = file.plan(&RolloutConfig::default()).unwrap().unwrap();
        RunRequest::new(source, file.group(), file.build_inputs(source).unwrap()).with_plan(plan)
    }

    #[tokio::test]
    async fn credentials_are_scoped_to_each_action() {
        let dir = TempDir::new().unwrap();
        let file = pipeline(&dir, false).await;
        let fx = fixture("production");

        let id = fx.coordinator.trigger(request(&file, "v2")).await.unwrap();
        let run = fx.coordinator.wait(id).await.unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        let failure = run.failure.unwrap();
        assert_eq!(failure.stage.as_deref(), Some("production"));
        assert_eq!(failure.reason_code, "health_check_failure");

        let actions: Vec<(DeployKind, String, String)> = fx
            .deployer
            .actions
            .lock()
            .unwrap()
            .iter()
            .map(|(_, kind, env, scope)| (*kind, env.clone(), scope.clone()))
            .collect();
        assert_eq!(
            actions,
            vec![
                (DeployKind::Deploy, "canary".to_string(), "deploy".to_string()),
                (DeployKind::Deploy, "production".to_string(), "deploy".to_string()),
                (DeployKind::Rollback, "production".to_string(), "rollback".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn same_inputs_build_once() {
        let dir = TempDir::new().unwrap();
        let file = pipeline(&dir, false).await;
        let fx = fixture("none");

        let first = fx.coordinator.trigger(request(&file, "v3")).await.unwrap();
        let first = fx.coordinator.wait(first).await.unwrap();
        let second = fx.coordinator.trigger(request(&file, "v3")).await.unwrap();
        let second = fx.coordinator.wait(second).await.unwrap();

        assert_eq!(first.status, RunStatus::Succeeded);
        assert_eq!(second.status, RunStatus::Succeeded);
        assert_eq!(first.cache_hit, Some(false));
        assert_eq!(second.cache_hit, Some(true));
        assert_eq!(fx.builder.builds.load(Ordering::SeqCst), 1);
        assert_eq!(
            first.artifact.unwrap().digest,
            second.artifact.unwrap().digest
        );
    }

    #[tokio::test]
    async fn newer_run_supersedes_waiting_run() {
        let dir = TempDir::new().unwrap();
        let file = pipeline(&dir, true).await;
        let fx = fixture("none");

        let older = fx.coordinator.trigger(request(&file, "v4")).await.unwrap();
        // Park the older run on the canary approval gate
        for _ in 0..100 {
            let run = fx.coordinator.status(older).unwrap();
            if run.rollout.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let newer = fx
            .coordinator
            .trigger(request(&file, "v5").approve("canary"))
            .await
            .unwrap();

        let older_run = fx.coordinator.wait(older).await.unwrap();
        let newer_run = fx.coordinator.wait(newer).await.unwrap();

        assert_eq!(older_run.status, RunStatus::Cancelled);
        assert_eq!(older_run.superseded_by, Some(newer));
        assert_eq!(newer_run.status, RunStatus::Succeeded);
        assert!(fx
            .deployer
            .actions
            .lock()
            .unwrap()
            .iter()
            .all(|(run_id, ..)| *run_id == newer));
    }

    #[tokio::test]
    async fn audit_trail_follows_run_lifecycle() {
        let dir = TempDir::new().unwrap();
        let file = pipeline(&dir, false).await;
        let fx = fixture("none");

        let id = fx.coordinator.trigger(request(&file, "v6")).await.unwrap();
        fx.coordinator.wait(id).await.unwrap();

        let events: Vec<String> = fx
            .audit
            .records()
            .await
            .iter()
            .map(|r| r.event().to_string())
            .collect();
        let position = |name: &str| events.iter().position(|e| e == name).unwrap();

        assert!(position("run.triggered") < position("credential.issued"));
        assert!(position("credential.issued") < position("run.finished"));
        assert_eq!(
            events.iter().filter(|e| *e == "credential.issued").count(),
            2
        );
    }
}
