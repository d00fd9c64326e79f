//! Batch scheduling: many generation jobs run over a shared worker pool.
//!
//! - **BatchScheduler**: creates batches and submits their pending jobs
//! - **JobExecutor**: runs one job through its collaborator steps
//! - **BatchStore**: persists batch documents with per-batch locking
//! - **WorkerPool**: fixed set of workers draining a task queue
//!
//! # Architecture
//!
//! ```text
//!     BatchScheduler ──create──▶ BatchStore (<root>/<batch_id>/batch.json)
//!            │                        ▲
//!        run_async                    │ locked read-modify-write
//!            ▼                        │
//!       WorkerPool ──task──▶ JobExecutor ──▶ motion ▶ style ▶ sprites ▶ sheet
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use asset_forge::collaborators::Collaborators;
//! use asset_forge::scheduler::{BatchScheduler, BatchSettings, BatchStore, JobExecutor, WorkerPool, WorkerPoolConfig};
//! use std::sync::Arc;
//!
//! let settings = BatchSettings::from_env()?;
//! let store = Arc::new(BatchStore::with_shards(&settings.batch_root, settings.lock_shards));
//! let executor = Arc::new(JobExecutor::new(Arc::clone(&store), Collaborators::from_settings(&settings)?));
//! let pool = Arc::new(WorkerPool::new(WorkerPoolConfig::new(settings.num_workers)));
//! let scheduler = BatchScheduler::new(store, Arc::clone(&pool), executor);
//!
//! let batch_id = scheduler.create(&motions, &characters, &styles)?;
//! pool.start()?;
//! scheduler.run_async(&batch_id)?;
//! pool.wait_completion().await;
//! pool.shutdown().await?;
//! ```

pub mod batch;
pub mod config;
pub mod executor;
pub mod job;
pub mod store;
pub mod worker_pool;

pub use batch::{BatchScheduler, BatchSummary, JobSummary};
pub use config::BatchSettings;
pub use executor::JobExecutor;
pub use job::{Batch, Job, JobOutput, JobStatus, JobTally};
pub use store::BatchStore;
pub use worker_pool::{PoolError, PoolStats, WorkerPool, WorkerPoolConfig};
