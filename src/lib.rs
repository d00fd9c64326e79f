//! asset-forge: generation pipeline execution engine.
//!
//! This library sequences the external stages of a 3D asset project
//! (mesh preparation through sprite export) and schedules batches of
//! motion x character x style sprite jobs over a worker pool.

pub mod cli;
pub mod collaborators;
pub mod error;
pub mod pipeline;
pub mod project;
pub mod runner;
pub mod scheduler;

// Re-export commonly used error types
pub use error::{BatchError, CollaboratorError, ProjectError};
pub use pipeline::{ConfigError, PipelineError};
pub use runner::RunError;
pub use scheduler::PoolError;
