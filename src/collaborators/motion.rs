//! Motion synthesis through the motion model's command-line inference script.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::CollaboratorError;
use crate::runner::{Invocation, ProcessRunner};

use super::{short_id, CallStatus, MotionOutput, MotionRequest, MotionSynthesizer};

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg"];

/// Runs `<interpreter> <script> --preset <descriptor> --output <root>/<run_id>`.
///
/// No timeout is applied: a stuck run blocks its caller.
#[derive(Debug, Clone)]
pub struct HyMotionCli {
    interpreter: String,
    script: PathBuf,
    output_root: PathBuf,
    runner: ProcessRunner,
}

impl HyMotionCli {
    pub fn new(script: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: "python".to_string(),
            script: script.into(),
            output_root: output_root.into(),
            runner: ProcessRunner::new(),
        }
    }

    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = interpreter.into();
        self
    }

    /// Command line for one run writing into `output_dir`.
    pub fn invocation(&self, request: &MotionRequest, output_dir: &Path) -> Invocation {
        let mut invocation = Invocation::new(&self.interpreter)
            .arg(self.script.to_string_lossy())
            .args(["--preset", request.descriptor.as_str()])
            .arg("--output")
            .arg(output_dir.to_string_lossy());

        if let Some(seed) = request.seed {
            invocation = invocation.args(["--seed".to_string(), seed.to_string()]);
        }
        if let Some(dir) = self.script.parent().filter(|p| !p.as_os_str().is_empty()) {
            invocation = invocation.with_cwd(dir);
        }
        invocation
    }
}

fn count_frames(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter(|e| {
                    e.path()
                        .extension()
                        .and_then(|x| x.to_str())
                        .map(|x| FRAME_EXTENSIONS.iter().any(|f| f.eq_ignore_ascii_case(x)))
                        .unwrap_or(false)
                })
                .count()
        })
        .unwrap_or(0)
}

#[async_trait]
impl MotionSynthesizer for HyMotionCli {
    async fn synthesize(&self, request: &MotionRequest) -> Result<MotionOutput, CollaboratorError> {
        let run_id = short_id();
        let output_dir = self.output_root.join(&run_id);
        tokio::fs::create_dir_all(&output_dir).await?;

        let invocation = self.invocation(request, &output_dir);
        info!(
            run_id = %run_id,
            preset = %request.descriptor,
            seed = ?request.seed,
            command = %invocation,
            "Starting motion synthesis"
        );

        let sink = |line: &str| tracing::debug!(run_id = %run_id, "{}", line);
        let outcome = self.runner.run(&invocation, &sink).await?;

        if !outcome.is_success() {
            warn!(run_id = %run_id, exit_code = outcome.exit_code, "Motion synthesis failed");
            return Ok(MotionOutput {
                status: CallStatus::Error,
                run_id,
                output_dir,
                frames_dir: None,
                video: None,
                message: Some(format!("exited with code {}", outcome.exit_code)),
            });
        }

        let video = output_dir.join("output.mp4");
        let frames = output_dir.join("frames");

        if !video.exists() {
            warn!(run_id = %run_id, path = %video.display(), "Missing video output");
        }
        if !frames.is_dir() {
            warn!(run_id = %run_id, path = %frames.display(), "Missing frames directory");
        } else if count_frames(&frames) == 0 {
            warn!(run_id = %run_id, path = %frames.display(), "Frames directory is empty");
        }

        info!(run_id = %run_id, "Motion synthesis completed");

        Ok(MotionOutput {
            status: CallStatus::Success,
            run_id,
            frames_dir: frames.is_dir().then_some(frames),
            video: video.exists().then_some(video),
            output_dir,
            message: None,
        })
    }
}
