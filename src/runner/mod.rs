//! External process execution.
//!
//! Every generation step that is not implemented here (mesh preparation,
//! rigging, motion synthesis, ...) is a subprocess. This module provides:
//!
//! - **ProcessRunner**: spawns a process, streams merged stdout/stderr line by
//!   line, enforces an optional wall-clock timeout and reports the exit code
//! - **StageInvoker**: the trait the stage orchestrator launches through
//! - **SubprocessInvoker**: the local-subprocess implementation of it
//!
//! # Example
//!
//! ```rust,ignore
//! use asset_forge::runner::{Invocation, ProcessRunner};
//! use std::time::Duration;
//!
//! let inv = Invocation::new("blender")
//!     .args(["--background", "--python", "tools/auto_rig.py", "--"])
//!     .with_timeout(Duration::from_secs(3600));
//!
//! let outcome = ProcessRunner::new().run(&inv, &|line| println!("{line}")).await?;
//! assert!(outcome.is_success());
//! ```

pub mod invoker;
pub mod process;

pub use invoker::{StageInvoker, SubprocessInvoker};
pub use process::{Invocation, LineSink, ProcessOutcome, ProcessRunner, RunError};
