//! Job executor: one batch job's four-step sub-pipeline.
//!
//! motion synthesis → style resolution → sprite synthesis → sheet assembly.
//! The first failing step ends the job with a short fixed reason. State
//! changes go through locked read-modify-write updates of the batch
//! document, so counters are always bumped against the freshly loaded copy.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::collaborators::{Collaborators, MotionRequest, SpriteRequest};
use crate::error::BatchError;
use crate::pipeline::stages::dir_has_entries;

use super::job::{Job, JobOutput, JobStatus};
use super::store::BatchStore;

pub const MOTION_FAILED: &str = "motion synthesis failed";
pub const NO_FRAMES: &str = "no frames produced by motion synthesis";
pub const SPRITES_FAILED: &str = "sprite synthesis failed";
pub const SHEET_FAILED: &str = "sprite sheet assembly failed";

enum Claim {
    Started(Job),
    NotPending(JobStatus),
}

/// Runs single jobs against the shared batch store.
pub struct JobExecutor {
    store: Arc<BatchStore>,
    collaborators: Collaborators,
}

impl JobExecutor {
    pub fn new(store: Arc<BatchStore>, collaborators: Collaborators) -> Self {
        Self {
            store,
            collaborators,
        }
    }

    /// Runs one job and returns its status afterwards.
    ///
    /// Only a pending job is claimed. A job that is running elsewhere, done
    /// or failed is left untouched and its current status returned. Step
    /// failures are recorded on the job, not returned as errors; `Err` means
    /// the batch document could not be read or written.
    pub async fn run_job(&self, batch_id: &str, job_id: &str) -> Result<JobStatus, BatchError> {
        let claim = self.store.update(batch_id, |batch| {
            let job = batch
                .job_mut(job_id)
                .ok_or_else(|| job_not_found(batch_id, job_id))?;

            if job.status != JobStatus::Pending {
                return Ok(Claim::NotPending(job.status));
            }

            job.status = JobStatus::Running;
            job.error = None;
            Ok(Claim::Started(job.clone()))
        })?;

        let job = match claim {
            Claim::Started(job) => job,
            Claim::NotPending(status) => {
                info!(batch_id = %batch_id, job_id = %job_id, status = %status, "Job not pending, skipping");
                return Ok(status);
            }
        };

        info!(batch_id = %batch_id, job_id = %job_id, "Starting job");
        let outcome = self.execute(&job).await;

        match self.record(batch_id, job_id, &outcome) {
            Ok(status) => Ok(status),
            Err(e) => {
                warn!(batch_id = %batch_id, job_id = %job_id, error = %e, "Recording job outcome failed, retrying");
                self.record(batch_id, job_id, &outcome).map_err(|e| {
                    error!(
                        batch_id = %batch_id,
                        job_id = %job_id,
                        succeeded = outcome.is_ok(),
                        error = %e,
                        "Job outcome lost"
                    );
                    e
                })
            }
        }
    }

    /// Writes a finished job's outcome and bumps the matching counter.
    ///
    /// Applies only while the job is still running, so an outcome is never
    /// counted twice.
    fn record(
        &self,
        batch_id: &str,
        job_id: &str,
        outcome: &Result<JobOutput, String>,
    ) -> Result<JobStatus, BatchError> {
        self.store.update(batch_id, |batch| {
            let job = batch
                .job_mut(job_id)
                .ok_or_else(|| job_not_found(batch_id, job_id))?;

            if job.status != JobStatus::Running {
                return Ok(job.status);
            }

            let status = match outcome {
                Ok(output) => {
                    job.status = JobStatus::Done;
                    job.result = Some(output.clone());
                    job.error = None;
                    JobStatus::Done
                }
                Err(reason) => {
                    warn!(batch_id = %batch_id, job_id = %job_id, reason = %reason, "Job failed");
                    job.status = JobStatus::Failed;
                    job.error = Some(reason.clone());
                    JobStatus::Failed
                }
            };

            match status {
                JobStatus::Done => {
                    batch.completed += 1;
                    info!(batch_id = %batch_id, job_id = %job_id, "Job completed successfully");
                }
                _ => batch.failed += 1,
            }
            Ok(status)
        })
    }

    /// Runs the four steps, stopping at the first failure.
    async fn execute(&self, job: &Job) -> Result<JobOutput, String> {
        let c = &self.collaborators;

        let motion = match c.motion.synthesize(&MotionRequest::new(&job.motion)).await {
            Ok(out) if out.status.is_success() => out,
            Ok(_) => return Err(MOTION_FAILED.to_string()),
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Motion synthesis call failed");
                return Err(MOTION_FAILED.to_string());
            }
        };

        let frames_dir = match motion.frames_dir.as_ref() {
            Some(dir) if dir_has_entries(dir) => dir.clone(),
            _ => return Err(NO_FRAMES.to_string()),
        };

        let style = c
            .styles
            .resolve(&job.style)
            .ok_or_else(|| format!("invalid style preset: {}", job.style))?;

        let request = SpriteRequest {
            frames_dir,
            character: job.character.clone(),
            style,
        };
        let sprites = match c.sprites.synthesize(&request).await {
            Ok(out) if out.status.is_success() && out.output_dir.is_some() => out,
            Ok(_) => return Err(SPRITES_FAILED.to_string()),
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Sprite synthesis call failed");
                return Err(SPRITES_FAILED.to_string());
            }
        };

        let sprite_dir = sprites.output_dir.clone().unwrap_or_default();
        let sheet = match c.sheets.assemble(&sprite_dir, &job.character).await {
            Ok(out) if out.status.is_success() => out,
            Ok(_) => return Err(SHEET_FAILED.to_string()),
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Sheet assembly call failed");
                return Err(SHEET_FAILED.to_string());
            }
        };

        Ok(JobOutput {
            motion,
            sprites,
            sheet,
        })
    }
}

fn job_not_found(batch_id: &str, job_id: &str) -> BatchError {
    BatchError::JobNotFound {
        batch_id: batch_id.to_string(),
        job_id: job_id.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::collaborators::{
        CallStatus, MotionOutput, MotionSynthesizer, SheetAssembler, SheetOutput, SpriteOutput,
        SpriteSynthesizer, StyleResolver, StyleSettings,
    };
    use crate::error::CollaboratorError;
    use crate::scheduler::job::Batch;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Scripted collaborators that count their calls.
    pub(crate) struct FakeStudio {
        pub frames_dir: PathBuf,
        pub motion_status: CallStatus,
        pub motion_errors: bool,
        pub empty_frames: bool,
        pub sprite_status: CallStatus,
        pub sheet_status: CallStatus,
        /// Batch document deleted while motion synthesis runs.
        pub delete_during_motion: Option<PathBuf>,
        pub motion_calls: AtomicUsize,
        pub sprite_calls: AtomicUsize,
        pub sheet_calls: AtomicUsize,
    }

    impl FakeStudio {
        pub(crate) fn new(frames_dir: &Path) -> Self {
            std::fs::create_dir_all(frames_dir).unwrap();
            std::fs::write(frames_dir.join("0001.png"), b"frame").unwrap();
            Self {
                frames_dir: frames_dir.to_path_buf(),
                motion_status: CallStatus::Success,
                motion_errors: false,
                empty_frames: false,
                sprite_status: CallStatus::Success,
                sheet_status: CallStatus::Success,
                delete_during_motion: None,
                motion_calls: AtomicUsize::new(0),
                sprite_calls: AtomicUsize::new(0),
                sheet_calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn into_collaborators(self) -> (Arc<Self>, Collaborators) {
            let studio = Arc::new(self);
            let collaborators = Collaborators::new(
                studio.clone(),
                studio.clone(),
                studio.clone(),
                studio.clone(),
            );
            (studio, collaborators)
        }
    }

    #[async_trait]
    impl MotionSynthesizer for FakeStudio {
        async fn synthesize(&self, request: &MotionRequest) -> Result<MotionOutput, CollaboratorError> {
            self.motion_calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if let Some(path) = &self.delete_during_motion {
                std::fs::remove_file(path).unwrap();
            }
            if self.motion_errors {
                return Err(CollaboratorError::Request("model offline".to_string()));
            }
            let frames_dir = if self.empty_frames {
                self.frames_dir.join("missing")
            } else {
                self.frames_dir.clone()
            };
            Ok(MotionOutput {
                status: self.motion_status,
                run_id: request.descriptor.clone(),
                output_dir: self.frames_dir.clone(),
                frames_dir: Some(frames_dir),
                video: None,
                message: None,
            })
        }
    }

    impl StyleResolver for FakeStudio {
        fn resolve(&self, style_id: &str) -> Option<StyleSettings> {
            (style_id != "unknown").then(StyleSettings::default)
        }
    }

    #[async_trait]
    impl SpriteSynthesizer for FakeStudio {
        async fn synthesize(&self, _request: &SpriteRequest) -> Result<SpriteOutput, CollaboratorError> {
            self.sprite_calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(SpriteOutput {
                status: self.sprite_status,
                run_id: "sprites".to_string(),
                output_dir: Some(self.frames_dir.clone()),
                prompt_id: None,
                message: None,
            })
        }
    }

    #[async_trait]
    impl SheetAssembler for FakeStudio {
        async fn assemble(&self, sprite_dir: &Path, _character: &str) -> Result<SheetOutput, CollaboratorError> {
            self.sheet_calls.fetch_add(1, Ordering::SeqCst);
            Ok(SheetOutput {
                status: self.sheet_status,
                sheet: Some(sprite_dir.join("sheet.png")),
                frame_count: 1,
                message: None,
            })
        }
    }

    fn setup(studio: FakeStudio, style: &str) -> (TempDir, Arc<BatchStore>, JobExecutor, Arc<FakeStudio>) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(BatchStore::new(dir.path().join("batches")));
        let batch = Batch::new(
            "b1",
            &["walk".to_string()],
            &["knight".to_string()],
            &[style.to_string()],
        );
        store.save(&batch).unwrap();

        let (studio, collaborators) = studio.into_collaborators();
        let executor = JobExecutor::new(Arc::clone(&store), collaborators);
        (dir, store, executor, studio)
    }

    fn frames() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let frames = dir.path().join("frames");
        (dir, frames)
    }

    #[tokio::test]
    async fn test_successful_job() {
        let (_f, frames) = frames();
        let (_d, store, executor, studio) = setup(FakeStudio::new(&frames), "pixel");

        let status = executor.run_job("b1", "job_001").await.unwrap();
        assert_eq!(status, JobStatus::Done);

        let batch = store.load("b1").unwrap();
        let job = batch.job("job_001").unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert!(job.error.is_none());
        let result = job.result.as_ref().unwrap();
        assert_eq!(result.sheet.status, CallStatus::Success);
        assert_eq!(batch.completed, 1);
        assert_eq!(batch.failed, 0);
        assert_eq!(studio.sheet_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_motion_error_short_circuits() {
        let (_f, frames) = frames();
        let mut studio = FakeStudio::new(&frames);
        studio.motion_errors = true;
        let (_d, store, executor, studio) = setup(studio, "pixel");

        let status = executor.run_job("b1", "job_001").await.unwrap();
        assert_eq!(status, JobStatus::Failed);

        assert_eq!(studio.motion_calls.load(Ordering::SeqCst), 1);
        assert_eq!(studio.sprite_calls.load(Ordering::SeqCst), 0);
        assert_eq!(studio.sheet_calls.load(Ordering::SeqCst), 0);

        let batch = store.load("b1").unwrap();
        let job = batch.job("job_001").unwrap();
        assert_eq!(job.error.as_deref(), Some(MOTION_FAILED));
        assert!(job.result.is_none());
        assert_eq!(batch.failed, 1);
        assert_eq!(batch.completed, 0);
    }

    #[tokio::test]
    async fn test_motion_error_status_short_circuits() {
        let (_f, frames) = frames();
        let mut studio = FakeStudio::new(&frames);
        studio.motion_status = CallStatus::Error;
        let (_d, store, executor, studio) = setup(studio, "pixel");

        executor.run_job("b1", "job_001").await.unwrap();
        assert_eq!(studio.sprite_calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            store.load("b1").unwrap().jobs[0].error.as_deref(),
            Some(MOTION_FAILED)
        );
    }

    #[tokio::test]
    async fn test_missing_frames_fail() {
        let (_f, frames) = frames();
        let mut studio = FakeStudio::new(&frames);
        studio.empty_frames = true;
        let (_d, store, executor, studio) = setup(studio, "pixel");

        executor.run_job("b1", "job_001").await.unwrap();
        assert_eq!(studio.sprite_calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.load("b1").unwrap().jobs[0].error.as_deref(), Some(NO_FRAMES));
    }

    #[tokio::test]
    async fn test_unknown_style_fails() {
        let (_f, frames) = frames();
        let (_d, store, executor, studio) = setup(FakeStudio::new(&frames), "unknown");

        executor.run_job("b1", "job_001").await.unwrap();
        assert_eq!(studio.sprite_calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            store.load("b1").unwrap().jobs[0].error.as_deref(),
            Some("invalid style preset: unknown")
        );
    }

    #[tokio::test]
    async fn test_sprite_and_sheet_failures() {
        let (_f, frames) = frames();
        let mut studio = FakeStudio::new(&frames);
        studio.sprite_status = CallStatus::Error;
        let (_d, store, executor, studio) = setup(studio, "pixel");

        executor.run_job("b1", "job_001").await.unwrap();
        assert_eq!(studio.sheet_calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.load("b1").unwrap().jobs[0].error.as_deref(), Some(SPRITES_FAILED));

        let (_f, frames) = self::frames();
        let mut studio = FakeStudio::new(&frames);
        studio.sheet_status = CallStatus::Error;
        let (_d, store, executor, _) = setup(studio, "pixel");

        executor.run_job("b1", "job_001").await.unwrap();
        assert_eq!(store.load("b1").unwrap().jobs[0].error.as_deref(), Some(SHEET_FAILED));
    }

    #[tokio::test]
    async fn test_terminal_job_is_not_rerun() {
        let (_f, frames) = frames();
        let (_d, store, executor, studio) = setup(FakeStudio::new(&frames), "pixel");

        assert_eq!(executor.run_job("b1", "job_001").await.unwrap(), JobStatus::Done);
        assert_eq!(executor.run_job("b1", "job_001").await.unwrap(), JobStatus::Done);

        assert_eq!(studio.motion_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.load("b1").unwrap().completed, 1);
    }

    #[tokio::test]
    async fn test_unknown_job_and_batch() {
        let (_f, frames) = frames();
        let (_d, _store, executor, _) = setup(FakeStudio::new(&frames), "pixel");

        assert!(matches!(
            executor.run_job("b1", "job_999").await,
            Err(BatchError::JobNotFound { .. })
        ));
        assert!(matches!(
            executor.run_job("missing", "job_001").await,
            Err(BatchError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_runs_of_one_job_claim_once() {
        let (_f, frames) = frames();
        let (_d, store, executor, studio) = setup(FakeStudio::new(&frames), "pixel");

        let (a, b) = tokio::join!(
            executor.run_job("b1", "job_001"),
            executor.run_job("b1", "job_001")
        );
        let mut statuses = vec![a.unwrap(), b.unwrap()];
        statuses.sort_by_key(|s| s.to_string());
        assert_eq!(statuses, vec![JobStatus::Done, JobStatus::Running]);

        assert_eq!(studio.motion_calls.load(Ordering::SeqCst), 1);
        let batch = store.load("b1").unwrap();
        assert_eq!(batch.completed, 1);
        assert_eq!(batch.failed, 0);
        assert!(batch.counters_consistent());
    }

    #[tokio::test]
    async fn test_running_job_is_not_claimed() {
        let (_f, frames) = frames();
        let (_d, store, executor, studio) = setup(FakeStudio::new(&frames), "pixel");
        store
            .update("b1", |batch| {
                batch.jobs[0].status = JobStatus::Running;
                Ok(())
            })
            .unwrap();

        assert_eq!(executor.run_job("b1", "job_001").await.unwrap(), JobStatus::Running);
        assert_eq!(studio.motion_calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.load("b1").unwrap().completed, 0);
    }

    #[tokio::test]
    async fn test_outcome_write_failure_is_returned() {
        let (_f, frames) = frames();
        let dir = TempDir::new().unwrap();
        let store = Arc::new(BatchStore::new(dir.path().join("batches")));
        store
            .save(&Batch::new(
                "b1",
                &["walk".to_string()],
                &["knight".to_string()],
                &["pixel".to_string()],
            ))
            .unwrap();

        let mut studio = FakeStudio::new(&frames);
        studio.delete_during_motion = Some(store.path_for("b1"));
        let (studio, collaborators) = studio.into_collaborators();
        let executor = JobExecutor::new(Arc::clone(&store), collaborators);

        assert!(matches!(
            executor.run_job("b1", "job_001").await,
            Err(BatchError::NotFound(_))
        ));
        assert_eq!(studio.motion_calls.load(Ordering::SeqCst), 1);
    }
}
