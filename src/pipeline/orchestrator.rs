//! Stage orchestrator for one project.
//!
//! Runs the stage ordering of the project's profile strictly in sequence,
//! one collaborator process at a time. Each stage is either skipped (with a
//! logged reason) or executed through a [`StageInvoker`]. A failing required
//! stage aborts the run; a failing optional stage is logged and passed over.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::runner::{Invocation, RunError, StageInvoker};

use super::config::{ConfigError, EngineSettings, ProjectConfig};
use super::log::PipelineLog;
use super::stages::{
    dir_has_entries, find_with_extension, StageDefinition, StageHost, StageRegistry, INPUT_DIR,
    MESH_EXTENSIONS,
};

/// Errors that prevent a pipeline from starting.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The project input is missing or holds no mesh.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The pipeline log could not be opened.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a stage is not run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    WrongProfile { profile: String },
    Disabled,
    NoInput { dir: String },
    AlreadyDone { dir: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::WrongProfile { profile } => {
                write!(f, "not required for {} profile", profile)
            }
            SkipReason::Disabled => write!(f, "disabled in config"),
            SkipReason::NoInput { dir } => write!(f, "no input found in {}", dir),
            SkipReason::AlreadyDone { dir } => write!(f, "output already present in {}", dir),
        }
    }
}

/// Run-or-skip verdict for a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageDecision {
    Run,
    Skip(SkipReason),
}

/// Outcome of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageResult {
    SkippedWrongProfile,
    SkippedDisabled,
    SkippedNoInput,
    SkippedAlreadyDone,
    Succeeded,
    Failed { reason: String },
    ScriptMissing { script: PathBuf },
}

impl StageResult {
    /// Skips count as success: the caller proceeds to the next stage.
    pub fn is_success(&self) -> bool {
        !matches!(
            self,
            StageResult::Failed { .. } | StageResult::ScriptMissing { .. }
        )
    }

    /// Whether a collaborator was actually launched.
    pub fn ran(&self) -> bool {
        matches!(self, StageResult::Succeeded | StageResult::Failed { .. })
    }
}

impl From<SkipReason> for StageResult {
    fn from(reason: SkipReason) -> Self {
        match reason {
            SkipReason::WrongProfile { .. } => StageResult::SkippedWrongProfile,
            SkipReason::Disabled => StageResult::SkippedDisabled,
            SkipReason::NoInput { .. } => StageResult::SkippedNoInput,
            SkipReason::AlreadyDone { .. } => StageResult::SkippedAlreadyDone,
        }
    }
}

/// A stage key with its outcome and, for skips, the reason text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageOutcome {
    pub stage: String,
    pub result: StageResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Summary of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub project: String,
    pub profile: String,
    pub outcomes: Vec<StageOutcome>,
    /// Required stage whose failure aborted the run.
    pub failed_stage: Option<String>,
    /// Fatal error that stopped the run before any stage.
    pub error: Option<String>,
    pub success: bool,
}

impl PipelineReport {
    fn new(project: &str, profile: &str) -> Self {
        Self {
            project: project.to_string(),
            profile: profile.to_string(),
            outcomes: Vec::new(),
            failed_stage: None,
            error: None,
            success: false,
        }
    }

    /// Keys of the stages whose collaborator was launched, in order.
    pub fn executed(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.result.ran())
            .map(|o| o.stage.as_str())
            .collect()
    }

    /// Outcome of one stage, if it was recorded.
    pub fn outcome(&self, stage: &str) -> Option<&StageOutcome> {
        self.outcomes.iter().find(|o| o.stage == stage)
    }
}

/// Read-only progress view of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageStatus {
    pub key: String,
    pub name: String,
    pub required: bool,
    /// Output directory is non-empty.
    pub completed: bool,
    pub output_exists: bool,
    /// The stage's own completion check passes.
    pub done: bool,
}

/// Read-only progress view of a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineStatus {
    pub project: String,
    pub profile: String,
    pub stages: Vec<StageStatus>,
}

/// Sequences the stages of one project.
pub struct PipelineOrchestrator {
    project: PathBuf,
    config_path: PathBuf,
    config: ProjectConfig,
    registry: Arc<StageRegistry>,
    invoker: Arc<dyn StageInvoker>,
    settings: EngineSettings,
    log: PipelineLog,
    force_rerun: bool,
}

impl PipelineOrchestrator {
    /// Opens a project: loads its configuration and its pipeline log.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Config` when the project config is missing or
    /// invalid. No stage runs in that case.
    pub fn open(
        project: impl Into<PathBuf>,
        registry: Arc<StageRegistry>,
        invoker: Arc<dyn StageInvoker>,
        settings: EngineSettings,
    ) -> Result<Self, PipelineError> {
        // Collaborators run from their script's directory, so every path
        // handed to them must not depend on our working directory.
        let project: PathBuf = project.into();
        let project = std::path::absolute(&project)?;
        let config = ProjectConfig::load(&project)?;
        let log = PipelineLog::open(&project)?;

        Ok(Self {
            config_path: ProjectConfig::path_for(&project),
            project,
            config,
            registry,
            invoker,
            settings,
            log,
            force_rerun: false,
        })
    }

    /// Re-runs stages whose output is already present.
    pub fn with_force_rerun(mut self, force_rerun: bool) -> Self {
        self.force_rerun = force_rerun;
        self
    }

    /// The project's profile.
    pub fn profile(&self) -> &str {
        &self.config.profile
    }

    /// The project's pipeline log.
    pub fn log(&self) -> &PipelineLog {
        &self.log
    }


    /// Checks that `0_input` exists and holds a mesh, searched recursively.
    pub fn validate_input(&self) -> Result<PathBuf, PipelineError> {
        let input = self.project.join(INPUT_DIR);
        if !input.is_dir() {
            return Err(PipelineError::InvalidInput(format!(
                "input directory does not exist: {}",
                input.display()
            )));
        }

        let mesh = find_with_extension(&input, MESH_EXTENSIONS).ok_or_else(|| {
            PipelineError::InvalidInput(format!("no mesh files found in {}", INPUT_DIR))
        })?;

        if let Some(name) = mesh.file_name() {
            self.log
                .log(format!("Found input mesh: {}", name.to_string_lossy()));
        }

        Ok(mesh)
    }

    /// Applies the skip checks in order: profile, disabled flag, missing
    /// input, already done.
    pub fn evaluate(&self, stage: &StageDefinition) -> StageDecision {
        let profile = self.config.profile.as_str();

        if !stage.required_for(profile) {
            return StageDecision::Skip(SkipReason::WrongProfile {
                profile: profile.to_string(),
            });
        }

        if stage.optional {
            let enabled = stage
                .enable_section
                .as_deref()
                .map(|section| self.config.section_enabled(section))
                .unwrap_or(true);
            if !enabled {
                return StageDecision::Skip(SkipReason::Disabled);
            }
        }

        let input_dir = stage.input_dir_for(profile);
        if !dir_has_entries(&self.project.join(input_dir)) {
            return StageDecision::Skip(SkipReason::NoInput {
                dir: input_dir.to_string(),
            });
        }

        if !self.force_rerun && stage.completion.is_complete(&self.project.join(&stage.output_dir)) {
            return StageDecision::Skip(SkipReason::AlreadyDone {
                dir: stage.output_dir.clone(),
            });
        }

        StageDecision::Run
    }

    /// Whether `stage` would run, logging the reason when it would not.
    pub fn should_run(&self, stage: &StageDefinition) -> bool {
        match self.evaluate(stage) {
            StageDecision::Run => true,
            StageDecision::Skip(reason) => {
                self.log
                    .log(format!("  Skipping {} ({})", stage.name, reason));
                false
            }
        }
    }

    /// Builds the collaborator command line for a stage.
    pub fn build_invocation(&self, stage: &StageDefinition, script: &Path) -> Invocation {
        let script_arg = script.to_string_lossy().into_owned();
        let project_arg = self.project.to_string_lossy().into_owned();
        let config_arg = self.config_path.to_string_lossy().into_owned();

        let invocation = match stage.host {
            StageHost::Engine => Invocation::new(&self.settings.engine_binary)
                .arg("--background")
                .arg(&self.settings.script_flag)
                .arg(script_arg)
                .arg("--")
                .arg(project_arg)
                .arg(config_arg),
            StageHost::Interpreter => Invocation::new(&self.settings.interpreter)
                .arg(script_arg)
                .arg(project_arg)
                .arg(config_arg),
        };

        let invocation = invocation.with_timeout(self.settings.stage_timeout);
        match script.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(dir) => invocation.with_cwd(dir),
            None => invocation,
        }
    }

    /// Runs one stage, or skips it.
    pub async fn run_stage(&self, stage: &StageDefinition) -> StageResult {
        self.run_stage_detailed(stage).await.0
    }

    async fn run_stage_detailed(&self, stage: &StageDefinition) -> (StageResult, Option<String>) {
        if let StageDecision::Skip(reason) = self.evaluate(stage) {
            self.log
                .log(format!("  Skipping {} ({})", stage.name, reason));
            let detail = reason.to_string();
            return (reason.into(), Some(detail));
        }

        self.log.log(format!("Starting stage: {}", stage.name));
        self.log.log(format!("  Script: {}", stage.script));

        let script = match std::path::absolute(self.settings.tools_dir.join(&stage.script)) {
            Ok(script) => script,
            Err(e) => {
                let reason = format!("cannot resolve script {}: {}", stage.script, e);
                self.log.log(format!("  ✗ {} error: {}", stage.name, reason));
                return (StageResult::Failed { reason }, None);
            }
        };
        if !script.is_file() {
            self.log.log(format!(
                "  ✗ {} script not found: {}",
                stage.name,
                script.display()
            ));
            return (StageResult::ScriptMissing { script }, None);
        }

        let output_dir = self.project.join(&stage.output_dir);
        if let Err(e) = std::fs::create_dir_all(&output_dir) {
            let reason = format!("cannot create {}: {}", output_dir.display(), e);
            self.log.log(format!("  ✗ {} error: {}", stage.name, reason));
            return (StageResult::Failed { reason }, None);
        }

        let invocation = self.build_invocation(stage, &script);
        self.log.log(format!("  Executing: {}", invocation));

        let sink = |line: &str| self.log.log_output(line);
        let result = match self.invoker.invoke(&invocation, &sink).await {
            Ok(0) => {
                self.log
                    .log(format!("  ✓ {} completed successfully", stage.name));
                StageResult::Succeeded
            }
            Ok(code) => {
                self.log
                    .log(format!("  ✗ {} failed with code {}", stage.name, code));
                StageResult::Failed {
                    reason: format!("exited with code {}", code),
                }
            }
            Err(RunError::Timeout(limit)) => {
                self.log.log(format!(
                    "  ✗ {} timed out after {}s",
                    stage.name,
                    limit.as_secs()
                ));
                StageResult::Failed {
                    reason: format!("timed out after {}s", limit.as_secs()),
                }
            }
            Err(e) => {
                self.log.log(format!("  ✗ {} error: {}", stage.name, e));
                StageResult::Failed {
                    reason: e.to_string(),
                }
            }
        };

        (result, None)
    }

    /// Runs the profile's stage ordering.
    ///
    /// Stages of the registry that the profile does not order are recorded
    /// as skipped up front. Input validation failures and unknown profiles
    /// abort before any stage. A failing required stage stops the run; no
    /// later stage is attempted.
    pub async fn run_pipeline(&self) -> PipelineReport {
        let banner = "=".repeat(80);
        let project_name = project_name(&self.project);
        let profile = self.config.profile.clone();
        let mut report = PipelineReport::new(&project_name, &profile);

        self.log.log(&banner);
        self.log
            .log(format!("Starting pipeline for project: {}", project_name));
        self.log.log(format!("Profile: {}", profile));
        self.log.log(&banner);

        if let Err(e) = self.validate_input() {
            self.log.log(format!("Error: {}", e));
            report.error = Some(e.to_string());
            return report;
        }

        let order = match self.registry.order_for(&profile) {
            Ok(order) => order,
            Err(e) => {
                self.log.log(format!("Error: {}", e));
                report.error = Some(e.to_string());
                return report;
            }
        };

        for stage in self.registry.stages() {
            if order.iter().any(|s| s.key == stage.key) {
                continue;
            }
            if let StageDecision::Skip(reason) = self.evaluate(stage) {
                report.outcomes.push(StageOutcome {
                    stage: stage.key.clone(),
                    detail: Some(reason.to_string()),
                    result: reason.into(),
                });
            }
        }

        for stage in order {
            let (result, detail) = self.run_stage_detailed(stage).await;
            let ok = result.is_success();
            report.outcomes.push(StageOutcome {
                stage: stage.key.clone(),
                result,
                detail,
            });

            if !ok {
                if stage.optional {
                    self.log
                        .log(format!("  Optional stage {} failed, continuing", stage.key));
                    continue;
                }
                self.log
                    .log(format!("Pipeline failed at stage: {}", stage.key));
                report.failed_stage = Some(stage.key.clone());
                return report;
            }
        }

        self.log.log(&banner);
        self.log.log("Pipeline completed successfully!");
        self.log.log(&banner);

        report.success = true;
        report
    }

    /// Reports, for every registered stage, whether it is required under the
    /// project's profile and whether its output is present. Runs nothing.
    pub fn status(&self) -> PipelineStatus {
        status_of(&self.project, &self.config, &self.registry)
    }
}

fn project_name(project: &Path) -> String {
    project
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| project.display().to_string())
}

fn status_of(project: &Path, config: &ProjectConfig, registry: &StageRegistry) -> PipelineStatus {
    let profile = config.profile.as_str();
    let stages = registry
        .stages()
        .iter()
        .map(|stage| {
            let output_dir = project.join(&stage.output_dir);
            StageStatus {
                key: stage.key.clone(),
                name: stage.name.clone(),
                required: stage.required_for(profile),
                completed: dir_has_entries(&output_dir),
                output_exists: output_dir.exists(),
                done: stage.completion.is_complete(&output_dir),
            }
        })
        .collect();

    PipelineStatus {
        project: project_name(project),
        profile: profile.to_string(),
        stages,
    }
}

/// Status of a project without opening it for a run.
///
/// Only the project config is read; the pipeline log is neither created
/// nor touched.
pub fn project_status(project: &Path, registry: &StageRegistry) -> Result<PipelineStatus, PipelineError> {
    let project = std::path::absolute(project)?;
    let config = ProjectConfig::load(&project)?;
    Ok(status_of(&project, &config, registry))
}

/// Opens `project`, runs its pipeline and reports overall success.
pub async fn run_project(
    project: &Path,
    force_rerun: bool,
    registry: Arc<StageRegistry>,
    invoker: Arc<dyn StageInvoker>,
    settings: EngineSettings,
) -> bool {
    let orchestrator = match PipelineOrchestrator::open(project, registry, invoker, settings) {
        Ok(o) => o.with_force_rerun(force_rerun),
        Err(e) => {
            error!(project = %project.display(), error = %e, "Cannot start pipeline");
            return false;
        }
    };

    let report = orchestrator.run_pipeline().await;
    if let Some(ref stage) = report.failed_stage {
        error!(project = %project.display(), "Pipeline failed at stage: {}", stage);
    } else if let Some(ref e) = report.error {
        error!(project = %project.display(), error = %e, "Pipeline aborted");
    }

    report.success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::LineSink;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::fs;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Records invocations and fakes the files each stage script would write.
    #[derive(Default)]
    struct RecordingInvoker {
        calls: Mutex<Vec<Invocation>>,
        produces: HashMap<String, String>,
        exit_codes: HashMap<String, i32>,
        timeouts: Vec<String>,
    }

    impl RecordingInvoker {
        fn producing_outputs() -> Self {
            let produces = [
                ("prepare_mesh.py", "0_input/prepared/mesh.fbx"),
                ("generate_textures.py", "1_textures/albedo_1001.png"),
                ("auto_rig.py", "2_rig/rig.fbx"),
                ("hy_motion.py", "3_animation/walk.fbx"),
                ("export_package.py", "4_export/package/project.json"),
                ("generate_sprites.py", "4_export/sprites/frame_0001.png"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

            Self {
                produces,
                ..Default::default()
            }
        }

        fn failing(mut self, script: &str, code: i32) -> Self {
            self.exit_codes.insert(script.to_string(), code);
            self
        }

        fn timing_out(mut self, script: &str) -> Self {
            self.timeouts.push(script.to_string());
            self
        }

        fn scripts(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|inv| script_of(inv))
                .collect()
        }
    }

    fn script_of(inv: &Invocation) -> String {
        inv.args
            .iter()
            .find(|a| a.ends_with(".py"))
            .and_then(|a| Path::new(a).file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    #[async_trait]
    impl StageInvoker for RecordingInvoker {
        async fn invoke(&self, invocation: &Invocation, sink: LineSink<'_>) -> Result<i32, RunError> {
            self.calls.lock().unwrap().push(invocation.clone());
            let script = script_of(invocation);
            sink(&format!("running {}", script));

            if self.timeouts.contains(&script) {
                return Err(RunError::Timeout(invocation.timeout.unwrap_or_default()));
            }

            let code = self.exit_codes.get(&script).copied().unwrap_or(0);
            if code == 0 {
                if let Some(rel) = self.produces.get(&script) {
                    let project = Path::new(&invocation.args[invocation.args.len() - 2]);
                    let path = project.join(rel);
                    fs::create_dir_all(path.parent().unwrap()).unwrap();
                    fs::write(path, b"generated").unwrap();
                }
            }
            Ok(code)
        }
    }

    struct Fixture {
        _root: TempDir,
        project: PathBuf,
        settings: EngineSettings,
    }

    fn fixture(config: ProjectConfig) -> Fixture {
        let root = TempDir::new().unwrap();
        let tools = root.path().join("tools");
        fs::create_dir_all(&tools).unwrap();
        for stage in StageRegistry::builtin().stages() {
            fs::write(tools.join(&stage.script), "# stage script").unwrap();
        }

        let project = root.path().join("hero");
        fs::create_dir_all(project.join("0_input/meshes")).unwrap();
        fs::write(project.join("0_input/meshes/hero.obj"), "v 0 0 0").unwrap();
        fs::create_dir_all(project.join("pipeline")).unwrap();
        fs::write(
            ProjectConfig::path_for(&project),
            serde_json::to_string(&config).unwrap(),
        )
        .unwrap();

        Fixture {
            _root: root,
            project,
            settings: EngineSettings::new().with_tools_dir(tools),
        }
    }

    fn open(fx: &Fixture, invoker: Arc<RecordingInvoker>) -> PipelineOrchestrator {
        PipelineOrchestrator::open(
            &fx.project,
            Arc::new(StageRegistry::builtin()),
            invoker,
            fx.settings.clone(),
        )
        .unwrap()
    }

    fn stage(key: &str) -> StageDefinition {
        StageRegistry::builtin().stage(key).unwrap().clone()
    }

    #[test]
    fn test_skip_reason_display() {
        let reason = SkipReason::WrongProfile {
            profile: "static".to_string(),
        };
        assert_eq!(reason.to_string(), "not required for static profile");
        assert_eq!(SkipReason::Disabled.to_string(), "disabled in config");
    }

    #[test]
    fn test_open_without_config_fails() {
        let dir = TempDir::new().unwrap();
        let result = PipelineOrchestrator::open(
            dir.path(),
            Arc::new(StageRegistry::builtin()),
            Arc::new(RecordingInvoker::default()),
            EngineSettings::new(),
        );
        assert!(matches!(
            result,
            Err(PipelineError::Config(ConfigError::MissingProjectConfig(_)))
        ));
    }

    #[test]
    fn test_wrong_profile_wins_over_everything() {
        let fx = fixture(ProjectConfig::new("static"));
        let orch = open(&fx, Arc::new(RecordingInvoker::default()));

        // Input and finished output both present: the profile check still decides.
        fs::create_dir_all(fx.project.join("2_rig")).unwrap();
        fs::write(fx.project.join("2_rig/rig.fbx"), "x").unwrap();
        fs::create_dir_all(fx.project.join("3_animation")).unwrap();
        fs::write(fx.project.join("3_animation/walk.fbx"), "x").unwrap();

        for key in ["rigging", "animation"] {
            assert_eq!(
                orch.evaluate(&stage(key)),
                StageDecision::Skip(SkipReason::WrongProfile {
                    profile: "static".to_string()
                })
            );
        }
    }

    #[test]
    fn test_check_order_disabled_before_missing_input() {
        let fx = fixture(ProjectConfig::new("skeletal"));
        let orch = open(&fx, Arc::new(RecordingInvoker::default()));

        // Sprites: disabled and without input, disabled is reported.
        assert_eq!(
            orch.evaluate(&stage("sprites")),
            StageDecision::Skip(SkipReason::Disabled)
        );

        // Animation: no input and (fake) finished output, missing input is reported.
        fs::create_dir_all(fx.project.join("3_animation")).unwrap();
        fs::write(fx.project.join("3_animation/walk.fbx"), "x").unwrap();
        assert_eq!(
            orch.evaluate(&stage("animation")),
            StageDecision::Skip(SkipReason::NoInput {
                dir: "2_rig".to_string()
            })
        );

        // With input present the finished output makes it already done.
        fs::create_dir_all(fx.project.join("2_rig")).unwrap();
        fs::write(fx.project.join("2_rig/rig.fbx"), "x").unwrap();
        assert_eq!(
            orch.evaluate(&stage("animation")),
            StageDecision::Skip(SkipReason::AlreadyDone {
                dir: "3_animation".to_string()
            })
        );
        assert!(!orch.should_run(&stage("animation")));
    }

    #[test]
    fn test_force_rerun_ignores_completion() {
        let fx = fixture(ProjectConfig::new("skeletal"));
        fs::create_dir_all(fx.project.join("1_textures")).unwrap();
        fs::write(fx.project.join("1_textures/albedo.png"), "x").unwrap();

        let orch = open(&fx, Arc::new(RecordingInvoker::default()));
        assert!(!orch.should_run(&stage("textures")));

        let orch = orch.with_force_rerun(true);
        assert!(orch.should_run(&stage("textures")));
    }

    #[test]
    fn test_invocation_grammar() {
        let fx = fixture(ProjectConfig::new("skeletal"));
        let orch = open(&fx, Arc::new(RecordingInvoker::default()));
        let tools = &fx.settings.tools_dir;
        let project = fx.project.to_string_lossy().into_owned();
        let config = ProjectConfig::path_for(&fx.project)
            .to_string_lossy()
            .into_owned();

        let rig_script = tools.join("auto_rig.py");
        let inv = orch.build_invocation(&stage("rigging"), &rig_script);
        assert_eq!(inv.program, "blender");
        assert_eq!(
            inv.args,
            vec![
                "--background".to_string(),
                "--python".to_string(),
                rig_script.to_string_lossy().into_owned(),
                "--".to_string(),
                project.clone(),
                config.clone(),
            ]
        );
        assert_eq!(inv.timeout, Some(Duration::from_secs(3600)));
        assert_eq!(inv.cwd.as_deref(), Some(tools.as_path()));

        let tex_script = tools.join("generate_textures.py");
        let inv = orch.build_invocation(&stage("textures"), &tex_script);
        assert_eq!(inv.program, "python3");
        assert_eq!(
            inv.args,
            vec![tex_script.to_string_lossy().into_owned(), project, config]
        );
    }

    #[tokio::test]
    async fn test_static_profile_scenario() {
        let fx = fixture(ProjectConfig::new("static").with_section_enabled("sprite_generation", false));
        let invoker = Arc::new(RecordingInvoker::producing_outputs());
        let orch = open(&fx, invoker.clone());

        let report = orch.run_pipeline().await;

        assert!(report.success);
        assert_eq!(report.executed(), vec!["prep", "textures", "export"]);
        assert_eq!(
            invoker.scripts(),
            vec!["prepare_mesh.py", "generate_textures.py", "export_package.py"]
        );

        for key in ["rigging", "animation"] {
            let outcome = report.outcome(key).unwrap();
            assert_eq!(outcome.result, StageResult::SkippedWrongProfile);
            assert_eq!(outcome.detail.as_deref(), Some("not required for static profile"));
        }
        let sprites = report.outcome("sprites").unwrap();
        assert_eq!(sprites.result, StageResult::SkippedDisabled);
        assert_eq!(sprites.detail.as_deref(), Some("disabled in config"));
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let fx = fixture(ProjectConfig::new("skeletal").with_section_enabled("sprite_generation", true));
        let invoker = Arc::new(RecordingInvoker::producing_outputs());
        let orch = open(&fx, invoker.clone());

        let first = orch.run_pipeline().await;
        assert!(first.success);
        assert_eq!(invoker.scripts().len(), 6);

        let second = orch.run_pipeline().await;
        assert!(second.success);
        assert!(second.executed().is_empty());
        assert_eq!(invoker.scripts().len(), 6);
        assert!(second
            .outcomes
            .iter()
            .all(|o| o.result == StageResult::SkippedAlreadyDone));
    }

    #[tokio::test]
    async fn test_force_rerun_reinvokes_every_stage() {
        let fx = fixture(ProjectConfig::new("skeletal").with_section_enabled("sprite_generation", true));
        let invoker = Arc::new(RecordingInvoker::producing_outputs());

        assert!(open(&fx, invoker.clone()).run_pipeline().await.success);
        assert_eq!(invoker.scripts().len(), 6);

        let forced = open(&fx, invoker.clone()).with_force_rerun(true);
        let report = forced.run_pipeline().await;
        assert!(report.success);
        assert_eq!(report.executed().len(), 6);
        assert_eq!(invoker.scripts().len(), 12);
    }

    #[tokio::test]
    async fn test_required_failure_is_fail_fast() {
        let fx = fixture(ProjectConfig::new("skeletal"));
        let invoker = Arc::new(RecordingInvoker::producing_outputs().failing("auto_rig.py", 1));
        let orch = open(&fx, invoker.clone());

        let report = orch.run_pipeline().await;

        assert!(!report.success);
        assert_eq!(report.failed_stage.as_deref(), Some("rigging"));
        assert_eq!(
            invoker.scripts(),
            vec!["prepare_mesh.py", "generate_textures.py", "auto_rig.py"]
        );
        assert!(report.outcome("animation").is_none());

        let log = fs::read_to_string(orch.log().path()).unwrap();
        assert!(log.contains("Pipeline failed at stage: rigging"));
        assert!(log.contains("running auto_rig.py"));
    }

    #[tokio::test]
    async fn test_optional_failure_is_swallowed() {
        let fx = fixture(ProjectConfig::new("skeletal").with_section_enabled("sprite_generation", true));
        let invoker =
            Arc::new(RecordingInvoker::producing_outputs().failing("generate_sprites.py", 2));

        let report = open(&fx, invoker).run_pipeline().await;

        assert!(report.success);
        assert!(matches!(
            report.outcome("sprites").unwrap().result,
            StageResult::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn test_timeout_fails_stage() {
        let fx = fixture(ProjectConfig::new("static"));
        let invoker = Arc::new(RecordingInvoker::producing_outputs().timing_out("generate_textures.py"));
        let orch = open(&fx, invoker.clone());

        let report = orch.run_pipeline().await;

        assert!(!report.success);
        assert_eq!(report.failed_stage.as_deref(), Some("textures"));
        assert_eq!(
            report.outcome("textures").unwrap().result,
            StageResult::Failed {
                reason: "timed out after 3600s".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_missing_script_fails_stage() {
        let fx = fixture(ProjectConfig::new("static"));
        fs::remove_file(fx.settings.tools_dir.join("prepare_mesh.py")).unwrap();
        let invoker = Arc::new(RecordingInvoker::producing_outputs());

        let report = open(&fx, invoker.clone()).run_pipeline().await;

        assert!(!report.success);
        assert_eq!(report.failed_stage.as_deref(), Some("prep"));
        assert!(matches!(
            report.outcome("prep").unwrap().result,
            StageResult::ScriptMissing { .. }
        ));
        assert!(invoker.scripts().is_empty());
    }

    #[tokio::test]
    async fn test_missing_mesh_aborts_before_any_stage() {
        let fx = fixture(ProjectConfig::new("skeletal"));
        fs::remove_file(fx.project.join("0_input/meshes/hero.obj")).unwrap();
        fs::write(fx.project.join("0_input/meshes/notes.txt"), "todo").unwrap();
        let invoker = Arc::new(RecordingInvoker::producing_outputs());

        let report = open(&fx, invoker.clone()).run_pipeline().await;

        assert!(!report.success);
        assert!(report.error.unwrap().contains("no mesh files"));
        assert!(report.outcomes.is_empty());
        assert!(invoker.scripts().is_empty());
    }

    #[tokio::test]
    async fn test_run_project_entry_point() {
        let fx = fixture(ProjectConfig::new("static"));
        let registry = Arc::new(StageRegistry::builtin());

        let ok = run_project(
            &fx.project,
            false,
            registry.clone(),
            Arc::new(RecordingInvoker::producing_outputs()),
            fx.settings.clone(),
        )
        .await;
        assert!(ok);

        let missing = fx.project.join("does-not-exist");
        let failed = run_project(
            &missing,
            false,
            registry,
            Arc::new(RecordingInvoker::default()),
            fx.settings.clone(),
        )
        .await;
        assert!(!failed);
    }

    #[test]
    fn test_project_status_leaves_log_untouched() {
        let fx = fixture(ProjectConfig::new("static"));
        let log_path = fx.project.join(PipelineLog::RELATIVE_PATH);

        let status = project_status(&fx.project, &StageRegistry::builtin()).unwrap();
        assert_eq!(status.project, "hero");
        assert_eq!(status.profile, "static");
        assert_eq!(status.stages.len(), 6);
        assert!(!log_path.exists());

        let missing = project_status(&fx.project.join("nope"), &StageRegistry::builtin());
        assert!(matches!(
            missing,
            Err(PipelineError::Config(ConfigError::MissingProjectConfig(_)))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_relative_tools_dir_and_project() {
        // Relative paths below the test's working directory.
        let root = TempDir::new_in(".").unwrap();
        let base = root.path().strip_prefix(std::env::current_dir().unwrap()).unwrap_or(root.path());
        assert!(base.is_relative());

        let tools = base.join("tools");
        fs::create_dir_all(&tools).unwrap();
        // The script succeeds only when it can see the project config.
        fs::write(
            tools.join("generate_textures.py"),
            "test -f \"$2\" || exit 3\nmkdir -p \"$1/1_textures\"\ntouch \"$1/1_textures/albedo.png\"\n",
        )
        .unwrap();

        let project = base.join("hero");
        fs::create_dir_all(project.join("0_input/meshes")).unwrap();
        fs::write(project.join("0_input/meshes/hero.obj"), "v 0 0 0").unwrap();
        fs::create_dir_all(project.join("pipeline")).unwrap();
        fs::write(
            ProjectConfig::path_for(&project),
            serde_json::to_string(&ProjectConfig::new("static")).unwrap(),
        )
        .unwrap();

        let settings = EngineSettings::new()
            .with_interpreter("sh")
            .with_tools_dir(&tools);
        let orch = PipelineOrchestrator::open(
            &project,
            Arc::new(StageRegistry::builtin()),
            Arc::new(crate::runner::SubprocessInvoker::new()),
            settings,
        )
        .unwrap();

        let script = std::path::absolute(tools.join("generate_textures.py")).unwrap();
        let inv = orch.build_invocation(&stage("textures"), &script);
        assert!(inv.args.iter().all(|a| Path::new(a).is_absolute()));

        assert_eq!(orch.run_stage(&stage("textures")).await, StageResult::Succeeded);
        assert!(project.join("1_textures/albedo.png").is_file());
    }

    #[tokio::test]
    async fn test_status_reports_progress() {
        let fx = fixture(ProjectConfig::new("static"));
        let orch = open(&fx, Arc::new(RecordingInvoker::producing_outputs()));

        let before = orch.status();
        assert_eq!(before.profile, "static");
        assert_eq!(before.stages.len(), 6);
        assert!(before.stages.iter().all(|s| !s.done));
        let rigging = before.stages.iter().find(|s| s.key == "rigging").unwrap();
        assert!(!rigging.required);

        orch.run_pipeline().await;

        let after = orch.status();
        let textures = after.stages.iter().find(|s| s.key == "textures").unwrap();
        assert!(textures.required && textures.completed && textures.output_exists && textures.done);
        let rigging = after.stages.iter().find(|s| s.key == "rigging").unwrap();
        assert!(!rigging.output_exists);
    }
}
