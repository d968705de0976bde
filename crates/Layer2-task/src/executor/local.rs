//! Local executor - runs tasks on the host system with log streaming
//!
//! Features:
//! - Real-time stdout/stderr streaming, one reader per stream
//! - Cancellation with graceful termination -> kill escalation
//! - Optional per-task timeout
//! - Exit code tracking

use super::terminate::{platform_terminator, ProcessTerminator};
use super::{Executor, RunOutcome, TaskOutput};
use crate::log::LogStream;
use crate::task::Task;
use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long readers may keep draining after a normal exit
const EXIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// How long readers may keep draining after the process was terminated
const TERMINATED_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Local executor configuration
#[derive(Debug, Clone)]
pub struct LocalExecutorConfig {
    /// Wait between graceful termination and kill
    pub grace_period: Duration,
}

impl Default for LocalExecutorConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_millis(deskrun_foundation::DEFAULT_GRACE_PERIOD_MS),
        }
    }
}

/// Why the wait on the child ended
enum Stop {
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
    TimedOut,
}

/// Local executor that runs tasks directly on the host
pub struct LocalExecutor {
    config: LocalExecutorConfig,

    terminator: Arc<dyn ProcessTerminator>,
}

impl LocalExecutor {
    pub fn new() -> Self {
        Self::with_config(LocalExecutorConfig::default())
    }

    pub fn with_config(config: LocalExecutorConfig) -> Self {
        Self {
            config,
            terminator: platform_terminator(),
        }
    }

    /// Replace the platform terminator
    pub fn with_terminator(mut self, terminator: Arc<dyn ProcessTerminator>) -> Self {
        self.terminator = terminator;
        self
    }

    pub fn config(&self) -> &LocalExecutorConfig {
        &self.config
    }

    /// `program args... command`, in `cwd`, inheriting the environment
    fn build_command(task: &Task) -> Command {
        let mut cmd = Command::new(&task.shell.program);
        cmd.args(&task.shell.args)
            .arg(&task.command)
            .current_dir(&task.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so termination reaches the whole tree
        #[cfg(unix)]
        cmd.process_group(0);

        #[cfg(windows)]
        cmd.creation_flags(super::terminate::CREATE_NEW_PROCESS_GROUP);

        cmd
    }

    /// Graceful termination, then kill after the grace period
    async fn shutdown(&self, child: &mut Child, pid: Option<u32>, task: &Task) {
        if let Some(pid) = pid {
            if let Err(e) = self.terminator.terminate(pid).await {
                warn!("Task {}: {}", task.id.short(), e);
            }
        }

        match tokio::time::timeout(self.config.grace_period, child.wait()).await {
            Ok(_) => {
                debug!("Task {} exited within grace period", task.id.short());
            }
            Err(_) => {
                warn!(
                    "Task {} still running after {:?}, killing",
                    task.id.short(),
                    self.config.grace_period
                );
                if let Some(pid) = pid {
                    if let Err(e) = self.terminator.kill(pid).await {
                        warn!("Task {}: {}", task.id.short(), e);
                    }
                }
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill task {}: {}", task.id.short(), e);
                }
            }
        }

        // Leftover group members that ignored the first signal
        if let Some(pid) = pid {
            let _ = self.terminator.kill(pid).await;
        }
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    async fn run(&self, task: &Task, output: TaskOutput, cancel: CancellationToken) -> RunOutcome {
        if cancel.is_cancelled() {
            return RunOutcome::Cancelled;
        }

        let mut cmd = Self::build_command(task);
        debug!(
            "Executing task {}: {} (shell: {}, cwd: {})",
            task.id.short(),
            task.command,
            task.shell,
            task.cwd.display()
        );

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                output.stderr(format!(
                    "failed to start '{}' in {}: {}",
                    task.shell.program,
                    task.cwd.display(),
                    e
                ));
                return RunOutcome::SpawnFailed;
            }
        };
        let pid = child.id();

        let readers: Vec<JoinHandle<std::io::Result<()>>> = [
            child
                .stdout
                .take()
                .map(|s| tokio::spawn(forward_lines(s, LogStream::Stdout, output.clone()))),
            child
                .stderr
                .take()
                .map(|s| tokio::spawn(forward_lines(s, LogStream::Stderr, output.clone()))),
        ]
        .into_iter()
        .flatten()
        .collect();

        let deadline = async {
            match task.timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        let stop = tokio::select! {
            status = child.wait() => Stop::Exited(status),
            _ = cancel.cancelled() => Stop::Cancelled,
            _ = &mut deadline => Stop::TimedOut,
        };

        let (outcome, drain_timeout) = match stop {
            Stop::Exited(Ok(status)) => {
                let outcome = match status.code() {
                    Some(code) => RunOutcome::Exited(code),
                    None => RunOutcome::Signaled,
                };
                (outcome, EXIT_DRAIN_TIMEOUT)
            }
            Stop::Exited(Err(e)) => {
                output.stderr(format!("failed to wait for process: {}", e));
                self.shutdown(&mut child, pid, task).await;
                (RunOutcome::StreamFailed(None), TERMINATED_DRAIN_TIMEOUT)
            }
            Stop::Cancelled => {
                debug!("Cancelling task {}", task.id.short());
                self.shutdown(&mut child, pid, task).await;
                (RunOutcome::Cancelled, TERMINATED_DRAIN_TIMEOUT)
            }
            Stop::TimedOut => {
                let secs = task.timeout.map(|t| t.as_secs_f64()).unwrap_or_default();
                debug!("Task {} timed out after {}s", task.id.short(), secs);
                self.shutdown(&mut child, pid, task).await;
                output.stderr(format!("timed out after {}s", secs));
                (RunOutcome::TimedOut, TERMINATED_DRAIN_TIMEOUT)
            }
        };

        let stream_error = drain_readers(readers, drain_timeout, task).await;
        settle(outcome, stream_error, &output)
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

/// A lost output stream fails a process that otherwise exited on its own
fn settle(
    outcome: RunOutcome,
    stream_error: Option<std::io::Error>,
    output: &TaskOutput,
) -> RunOutcome {
    match (outcome, stream_error) {
        (RunOutcome::Exited(code), Some(e)) => {
            output.stderr(format!("output stream error: {}", e));
            RunOutcome::StreamFailed(Some(code))
        }
        (RunOutcome::Signaled, Some(e)) => {
            output.stderr(format!("output stream error: {}", e));
            RunOutcome::StreamFailed(None)
        }
        (outcome, _) => outcome,
    }
}

/// Forward complete lines from one stream until EOF
async fn forward_lines<R>(stream: R, kind: LogStream, output: TaskOutput) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::with_capacity(256);

    loop {
        buf.clear();
        let read = reader.read_until(b'\n', &mut buf).await?;
        if read == 0 {
            return Ok(());
        }
        output.emit(kind, decode_line(&buf));
    }
}

/// Lossy UTF-8 without the line terminator
fn decode_line(buf: &[u8]) -> String {
    let mut end = buf.len();
    if end > 0 && buf[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && buf[end - 1] == b'\r' {
        end -= 1;
    }
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Wait for readers to reach EOF; abort the ones still blocked after `limit`
async fn drain_readers(
    readers: Vec<JoinHandle<std::io::Result<()>>>,
    limit: Duration,
    task: &Task,
) -> Option<std::io::Error> {
    let deadline = tokio::time::Instant::now() + limit;
    let mut first_error = None;

    for mut handle in readers {
        match tokio::time::timeout_at(deadline, &mut handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => {
                warn!("Output stream of task {} failed: {}", task.id.short(), e);
                first_error.get_or_insert(e);
            }
            Ok(Err(join_error)) => {
                warn!("Output reader of task {} panicked: {}", task.id.short(), join_error);
                first_error.get_or_insert(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    join_error.to_string(),
                ));
            }
            Err(_) => {
                // Pipe held open by a detached grandchild
                debug!("Dropping unfinished output reader of task {}", task.id.short());
                handle.abort();
            }
        }
    }

    first_error
}
