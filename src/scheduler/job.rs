//! Batch and job records.
//!
//! These are the persisted shapes: one `Batch` document per batch, holding
//! its ordered `Job` list and the completed/failed counters.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collaborators::{MotionOutput, SheetOutput, SpriteOutput};

/// Lifecycle of a job: pending, then running, then done or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    /// Terminal states are final; the job is never retried.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Collaborator outputs of a successful job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutput {
    pub motion: MotionOutput,
    pub sprites: SpriteOutput,
    pub sheet: SheetOutput,
}

/// One motion x character x style combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Sequential id, `job_001` onwards.
    pub id: String,
    pub motion: String,
    pub character: String,
    pub style: String,
    pub status: JobStatus,
    pub result: Option<JobOutput>,
    pub error: Option<String>,
}

impl Job {
    /// Creates a pending job with the id for position `index` (1-based).
    pub fn new(
        index: usize,
        motion: impl Into<String>,
        character: impl Into<String>,
        style: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("job_{:03}", index),
            motion: motion.into(),
            character: character.into(),
            style: style.into(),
            status: JobStatus::Pending,
            result: None,
            error: None,
        }
    }
}

/// Job counts derived from per-job status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobTally {
    pub pending: usize,
    pub running: usize,
    pub done: usize,
    pub failed: usize,
}

/// A persisted batch document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: String,
    pub created: DateTime<Utc>,
    pub jobs: Vec<Job>,
    #[serde(default)]
    pub completed: u64,
    #[serde(default)]
    pub failed: u64,
}

impl Batch {
    /// Builds the cartesian product of the three dimensions, motion outermost
    /// and style innermost.
    pub fn new(
        batch_id: impl Into<String>,
        motions: &[String],
        characters: &[String],
        styles: &[String],
    ) -> Self {
        let mut jobs = Vec::with_capacity(motions.len() * characters.len() * styles.len());
        for motion in motions {
            for character in characters {
                for style in styles {
                    jobs.push(Job::new(jobs.len() + 1, motion, character, style));
                }
            }
        }

        Self {
            batch_id: batch_id.into(),
            created: Utc::now(),
            jobs,
            completed: 0,
            failed: 0,
        }
    }

    pub fn job(&self, job_id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == job_id)
    }

    pub fn job_mut(&mut self, job_id: &str) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.id == job_id)
    }

    /// Ids of jobs still pending, in list order.
    pub fn pending_ids(&self) -> Vec<String> {
        self.jobs
            .iter()
            .filter(|j| j.status == JobStatus::Pending)
            .map(|j| j.id.clone())
            .collect()
    }

    /// Counts jobs by status.
    pub fn tally(&self) -> JobTally {
        self.jobs.iter().fold(JobTally::default(), |mut t, job| {
            match job.status {
                JobStatus::Pending => t.pending += 1,
                JobStatus::Running => t.running += 1,
                JobStatus::Done => t.done += 1,
                JobStatus::Failed => t.failed += 1,
            }
            t
        })
    }

    /// Whether the stored counters agree with the per-job statuses.
    pub fn counters_consistent(&self) -> bool {
        let tally = self.tally();
        tally.done as u64 == self.completed && tally.failed as u64 == self.failed
    }
}
