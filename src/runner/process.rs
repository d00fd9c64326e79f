//! Subprocess execution with live line streaming.
//!
//! Collaborators (the authoring engine, helper scripts, the motion model) are
//! long-running processes whose progress is only visible through their output.
//! The runner forwards every stdout/stderr line to a sink the moment it is
//! read, so the project log tails a stage while it runs.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::process::Command;
use tracing::{debug, warn};

/// Receives merged stdout/stderr output one line at a time.
pub type LineSink<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// Errors raised while launching or supervising a subprocess.
#[derive(Debug, Error)]
pub enum RunError {
    /// The program could not be started at all.
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The wall-clock limit elapsed and the process was killed.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Waiting on the child failed.
    #[error("Process error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single collaborator launch: program, arguments, working directory and
/// an optional wall-clock limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl Invocation {
    /// Creates an invocation of `program` with no arguments and no timeout.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            timeout: None,
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Sets the wall-clock limit.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// What a finished process reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Exit code, or -1 when the process was terminated by a signal.
    pub exit_code: i32,
    /// Number of output lines forwarded to the sink.
    pub lines: usize,
    pub duration: Duration,
}

impl ProcessOutcome {
    /// Exit code 0 is the only success.
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Spawns subprocesses and streams their output.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    /// Runs `invocation` to completion, forwarding every output line to `sink`.
    ///
    /// stdout and stderr are read concurrently and merged in arrival order.
    /// When the invocation carries a timeout and it elapses, the child is
    /// killed and [`RunError::Timeout`] is returned.
    pub async fn run(
        &self,
        invocation: &Invocation,
        sink: LineSink<'_>,
    ) -> Result<ProcessOutcome, RunError> {
        let start = Instant::now();

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref cwd) = invocation.cwd {
            cmd.current_dir(cwd);
        }

        debug!(command = %invocation, "Spawning process");

        let mut child = cmd.spawn().map_err(|source| RunError::Spawn {
            program: invocation.program.clone(),
            source,
        })?;

        let mut stdout_lines = child.stdout.take().map(|s| BufReader::new(s).lines());
        let mut stderr_lines = child.stderr.take().map(|s| BufReader::new(s).lines());
        let mut line_count = 0usize;

        let streamed = async {
            let mut stdout_open = stdout_lines.is_some();
            let mut stderr_open = stderr_lines.is_some();

            while stdout_open || stderr_open {
                tokio::select! {
                    line = next_line(&mut stdout_lines), if stdout_open => match line {
                        Some(l) => {
                            sink(&l);
                            line_count += 1;
                        }
                        None => stdout_open = false,
                    },
                    line = next_line(&mut stderr_lines), if stderr_open => match line {
                        Some(l) => {
                            sink(&l);
                            line_count += 1;
                        }
                        None => stderr_open = false,
                    },
                }
            }

            child.wait().await
        };

        let status = match invocation.timeout {
            Some(limit) => {
                let waited = tokio::time::timeout(limit, streamed).await;
                match waited {
                    Ok(status) => status?,
                    Err(_) => {
                        warn!(command = %invocation, ?limit, "Process timed out, killing");
                        let _ = child.kill().await;
                        return Err(RunError::Timeout(limit));
                    }
                }
            }
            None => streamed.await?,
        };

        let outcome = ProcessOutcome {
            exit_code: status.code().unwrap_or(-1),
            lines: line_count,
            duration: start.elapsed(),
        };

        debug!(
            command = %invocation,
            exit_code = outcome.exit_code,
            lines = outcome.lines,
            duration_ms = outcome.duration.as_millis() as u64,
            "Process finished"
        );

        Ok(outcome)
    }
}

/// Reads the next line, treating a read error like end of stream.
async fn next_line<R>(lines: &mut Option<Lines<R>>) -> Option<String>
where
    R: AsyncBufRead + Unpin,
{
    let reader = lines.as_mut()?;
    match reader.next_line().await {
        Ok(line) => line,
        Err(e) => {
            warn!(error = %e, "Error reading process output");
            None
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn shell(script: &str) -> Invocation {
        Invocation::new("sh").arg("-c").arg(script)
    }

    #[test]
    fn test_invocation_display() {
        let inv = Invocation::new("blender")
            .arg("--background")
            .args(["--python", "rig.py", "--"]);
        assert_eq!(inv.to_string(), "blender --background --python rig.py --");
        assert!(inv.timeout.is_none());
    }

    #[tokio::test]
    async fn test_streams_stdout_and_stderr() {
        let collected = Mutex::new(Vec::new());
        let sink = |line: &str| collected.lock().unwrap().push(line.to_string());

        let outcome = ProcessRunner::new()
            .run(&shell("echo one; echo two 1>&2; echo three"), &sink)
            .await
            .unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.lines, 3);

        let lines = collected.into_inner().unwrap();
        assert!(lines.contains(&"one".to_string()));
        assert!(lines.contains(&"two".to_string()));
        assert!(lines.contains(&"three".to_string()));
    }

    #[tokio::test]
    async fn test_nonzero_exit_code() {
        let sink = |_: &str| {};
        let outcome = ProcessRunner::new()
            .run(&shell("echo failing; exit 3"), &sink)
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, 3);
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let sink = |_: &str| {};
        let inv = shell("sleep 5").with_timeout(Duration::from_millis(200));

        let start = Instant::now();
        let err = ProcessRunner::new().run(&inv, &sink).await.unwrap_err();

        assert!(matches!(err, RunError::Timeout(_)));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let sink = |_: &str| {};
        let inv = Invocation::new("/nonexistent/definitely-not-a-binary");

        let err = ProcessRunner::new().run(&inv, &sink).await.unwrap_err();
        assert!(matches!(err, RunError::Spawn { .. }));
        assert!(err.to_string().contains("definitely-not-a-binary"));
    }

    #[tokio::test]
    async fn test_runs_in_working_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();

        let collected = Mutex::new(Vec::new());
        let sink = |line: &str| collected.lock().unwrap().push(line.to_string());

        ProcessRunner::new()
            .run(&shell("ls").with_cwd(dir.path()), &sink)
            .await
            .unwrap();

        assert_eq!(collected.into_inner().unwrap(), vec!["marker.txt".to_string()]);
    }
}
