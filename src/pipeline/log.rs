//! Persistent per-project pipeline log.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Local};
use tracing::{debug, info, warn};

/// Append-only log at `<project>/pipeline/pipeline_log.txt`.
///
/// Every line carries a `[YYYY-MM-DD HH:MM:SS]` prefix and is mirrored to
/// tracing. Collaborator output is written as it arrives, never buffered.
#[derive(Debug)]
pub struct PipelineLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl PipelineLog {
    /// Location of the log relative to the project root.
    pub const RELATIVE_PATH: &'static str = "pipeline/pipeline_log.txt";

    /// Opens (creating if needed) the log of a project.
    pub fn open(project: &Path) -> std::io::Result<Self> {
        let path = project.join(Self::RELATIVE_PATH);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records an orchestrator message.
    pub fn log(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!(target: "asset_forge::pipeline", "{}", message);
        self.append(message);
    }

    /// Records one line of collaborator output.
    pub fn log_output(&self, line: &str) {
        debug!(target: "asset_forge::pipeline", "{}", line);
        self.append(&format!("    {}", line));
    }

    fn append(&self, message: &str) {
        let line = format_line(Local::now(), message);
        let mut file = self.file.lock().unwrap_or_else(|p| p.into_inner());
        if let Err(e) = writeln!(file, "{}", line).and_then(|_| file.flush()) {
            warn!(path = %self.path.display(), error = %e, "Failed to write pipeline log");
        }
    }
}

/// Formats one log line with its timestamp prefix.
pub fn format_line(at: DateTime<Local>, message: &str) -> String {
    format!("[{}] {}", at.format("%Y-%m-%d %H:%M:%S"), message)
}
