//! Per-project generation pipeline.
//!
//! A project is a directory with numbered stage folders (`0_input`,
//! `1_textures`, `2_rig`, `3_animation`, `4_export`) and a `pipeline/`
//! folder holding `config.json` and the append-only `pipeline_log.txt`.
//!
//! # Architecture
//!
//! - **Stages**: the data-driven stage table and profile orderings
//! - **Config**: engine launch settings and the per-project config file
//! - **Log**: the timestamped project log every stage writes to
//! - **Orchestrator**: decides run-or-skip per stage and sequences them
//!
//! # Pipeline Flow
//!
//! 1. **Load**: the project config is read; a missing config aborts the run
//! 2. **Validate**: `0_input` must hold at least one `.obj`/`.fbx` mesh
//! 3. **Evaluate**: each stage of the profile ordering is checked in turn
//!    (profile, disabled flag, missing input, already done)
//! 4. **Execute**: runnable stages launch their collaborator and stream its
//!    output into the project log
//! 5. **Stop**: the first failing required stage ends the run
//!
//! # Example
//!
//! ```rust,ignore
//! use asset_forge::pipeline::{EngineSettings, PipelineOrchestrator, StageRegistry};
//! use asset_forge::runner::SubprocessInvoker;
//! use std::sync::Arc;
//!
//! let orchestrator = PipelineOrchestrator::open(
//!     "projects/hero",
//!     Arc::new(StageRegistry::builtin()),
//!     Arc::new(SubprocessInvoker::new()),
//!     EngineSettings::from_env()?,
//! )?;
//!
//! let report = orchestrator.run_pipeline().await;
//! println!("executed: {:?}", report.executed());
//! ```

pub mod config;
pub mod log;
pub mod orchestrator;
pub mod stages;

pub use config::{ConfigError, EngineSettings, ProjectConfig, DEFAULT_STAGE_TIMEOUT};
pub use log::PipelineLog;
pub use orchestrator::{
    project_status, run_project, PipelineError, PipelineOrchestrator, PipelineReport, PipelineStatus,
    SkipReason, StageDecision, StageOutcome, StageResult, StageStatus,
};
pub use stages::{CompletionCheck, StageDefinition, StageHost, StageRegistry};
