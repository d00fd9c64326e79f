//! Batch scheduler: creates batches and drives their pending jobs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use crate::collaborators::short_id;
use crate::error::BatchError;

use super::executor::JobExecutor;
use super::job::{Batch, JobStatus, JobTally};
use super::store::BatchStore;
use super::worker_pool::WorkerPool;

/// Per-job line of a batch summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    pub id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Snapshot of a batch's progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub created: DateTime<Utc>,
    pub total: usize,
    pub completed: u64,
    pub failed: u64,
    pub tally: JobTally,
    pub jobs: Vec<JobSummary>,
}

impl From<&Batch> for BatchSummary {
    fn from(batch: &Batch) -> Self {
        Self {
            batch_id: batch.batch_id.clone(),
            created: batch.created,
            total: batch.jobs.len(),
            completed: batch.completed,
            failed: batch.failed,
            tally: batch.tally(),
            jobs: batch
                .jobs
                .iter()
                .map(|j| JobSummary {
                    id: j.id.clone(),
                    status: j.status,
                    error: j.error.clone(),
                })
                .collect(),
        }
    }
}

pub struct BatchScheduler {
    store: Arc<BatchStore>,
    pool: Arc<WorkerPool>,
    executor: Arc<JobExecutor>,
}

impl BatchScheduler {
    pub fn new(store: Arc<BatchStore>, pool: Arc<WorkerPool>, executor: Arc<JobExecutor>) -> Self {
        Self {
            store,
            pool,
            executor,
        }
    }

    pub fn store(&self) -> &BatchStore {
        &self.store
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Creates and persists a batch of every motion x character x style
    /// combination. Returns the new batch id.
    pub fn create(
        &self,
        motions: &[String],
        characters: &[String],
        styles: &[String],
    ) -> Result<String, BatchError> {
        let batch = Batch::new(short_id(), motions, characters, styles);
        self.store.save(&batch)?;

        info!(
            batch_id = %batch.batch_id,
            jobs = batch.jobs.len(),
            motions = motions.len(),
            characters = characters.len(),
            styles = styles.len(),
            "Created batch"
        );
        Ok(batch.batch_id)
    }

    /// Runs every pending job in list order on the calling task.
    ///
    /// Jobs left `running` by an interrupted run are not picked up again.
    pub async fn run_sync(&self, batch_id: &str) -> Result<BatchSummary, BatchError> {
        let pending = self.store.load(batch_id)?.pending_ids();
        info!(batch_id = %batch_id, jobs = pending.len(), "Running batch synchronously");

        for job_id in pending {
            self.executor.run_job(batch_id, &job_id).await?;
        }

        self.status(batch_id)
    }

    /// Submits every pending job to the worker pool and returns how many
    /// were queued. Completion is observed through the pool or [`status`].
    ///
    /// [`status`]: BatchScheduler::status
    pub fn run_async(&self, batch_id: &str) -> Result<usize, BatchError> {
        let pending = self.store.load(batch_id)?.pending_ids();
        let count = pending.len();

        for job_id in pending {
            let executor = Arc::clone(&self.executor);
            let batch = batch_id.to_string();
            let name = format!("{}/{}", batch_id, job_id);

            self.pool.submit(name, async move {
                if let Err(e) = executor.run_job(&batch, &job_id).await {
                    error!(batch_id = %batch, job_id = %job_id, error = %e, "Job could not be recorded");
                    return Err(e.into());
                }
                Ok(())
            })?;
        }

        info!(batch_id = %batch_id, jobs = count, "Submitted batch to worker pool");
        Ok(count)
    }

    /// Summarizes the stored state of a batch.
    pub fn status(&self, batch_id: &str) -> Result<BatchSummary, BatchError> {
        let batch = self.store.load(batch_id)?;
        Ok(BatchSummary::from(&batch))
    }
}
