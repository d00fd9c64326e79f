//! Error types shared across subsystems.
//!
//! Each subsystem that has its own module keeps its error next to it
//! (`ConfigError`, `PipelineError`, `RunError`, `PoolError`). The errors here
//! cross module boundaries:
//! - Batch persistence and scheduling
//! - External generation collaborators
//! - Project scaffolding

use std::path::PathBuf;

use thiserror::Error;

use crate::scheduler::PoolError;

/// Errors that can occur while persisting or scheduling batches.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Batch '{0}' not found")]
    NotFound(String),

    #[error("Batch '{batch_id}' is corrupt: {source}")]
    Corrupt {
        batch_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Job '{job_id}' not found in batch '{batch_id}'")]
    JobNotFound { batch_id: String, job_id: String },

    #[error("Invalid batch request: {0}")]
    InvalidRequest(String),

    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by external generation collaborators.
///
/// A collaborator that ran but reported failure returns a status value, not
/// one of these. These cover the call itself going wrong.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Process error: {0}")]
    Process(#[from] crate::runner::RunError),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Service returned {code}: {message}")]
    Service { code: u16, message: String },

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while scaffolding a project.
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("Invalid project name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Project already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("Unknown profile '{0}'")]
    UnknownProfile(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
