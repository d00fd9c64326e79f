//! The seam between stage orchestration and the concrete launch mechanism.

use async_trait::async_trait;

use super::process::{Invocation, LineSink, ProcessRunner, RunError};

/// Launches a collaborator and reports its exit code.
///
/// Output lines are forwarded to `sink` while the collaborator runs. The
/// orchestrator only depends on this trait, so tests substitute a recording
/// fake and alternative hosts (a remote engine, a container) can be added
/// without touching orchestration logic.
#[async_trait]
pub trait StageInvoker: Send + Sync {
    async fn invoke(&self, invocation: &Invocation, sink: LineSink<'_>) -> Result<i32, RunError>;
}

/// Runs invocations as local subprocesses.
#[derive(Debug, Clone, Default)]
pub struct SubprocessInvoker {
    runner: ProcessRunner,
}

impl SubprocessInvoker {
    pub fn new() -> Self {
        Self {
            runner: ProcessRunner::new(),
        }
    }
}

#[async_trait]
impl StageInvoker for SubprocessInvoker {
    async fn invoke(&self, invocation: &Invocation, sink: LineSink<'_>) -> Result<i32, RunError> {
        let outcome = self.runner.run(invocation, sink).await?;
        Ok(outcome.exit_code)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subprocess_invoker_reports_exit_code() {
        let invoker = SubprocessInvoker::new();
        let sink = |_: &str| {};

        let ok = Invocation::new("sh").args(["-c", "exit 0"]);
        assert_eq!(invoker.invoke(&ok, &sink).await.unwrap(), 0);

        let failing = Invocation::new("sh").args(["-c", "exit 7"]);
        assert_eq!(invoker.invoke(&failing, &sink).await.unwrap(), 7);
    }
}
