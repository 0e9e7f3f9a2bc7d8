use std::collections::VecDeque;
use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::{JoinError, JoinHandle};
use tracing::Instrument;

use crate::config::LauncherConfig;
use crate::error::LaunchError;
use crate::launcher::config::LaunchConfiguration;
use crate::launcher::console::ConsoleSink;
use crate::launcher::protocol::{
    PAYLOAD_FILE, RESULT_FILE, ResultRecord, WorkPayload, worker_args,
};
use crate::launcher::result::ExecutionResult;
use crate::runtime::ShutdownToken;
use crate::telemetry;
use crate::worker::WorkUnit;

type LaunchOutcome<T> = Result<ExecutionResult<T>, LaunchError>;

/// Spawns one worker process per launch.
#[derive(Clone, Debug)]
pub struct WorkerLauncher {
    config: Arc<LauncherConfig>,
}

impl WorkerLauncher {
    pub fn new(config: LauncherConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    /// Spawn a worker for `config` and return a handle to its outcome.
    ///
    /// The worker is running by the time this returns. Console lines are
    /// forwarded to the configured sink as the worker prints them.
    pub async fn launch<W: WorkUnit>(
        &self,
        config: LaunchConfiguration<W>,
    ) -> Result<LaunchHandle<W::Output>, LaunchError> {
        let params = serde_json::to_value(config.work()).map_err(|err| {
            LaunchError::Configuration(format!("encoding {} parameters: {err}", W::KIND))
        })?;
        let classpath = config.resolved_classpath();
        let payload = WorkPayload::new(W::KIND, params).with_classpath(classpath.clone());

        let exchange = self.exchange_dir()?;
        let payload_path = exchange.path().join(PAYLOAD_FILE);
        let result_path = exchange.path().join(RESULT_FILE);
        let bytes = serde_json::to_vec(&payload)
            .map_err(|err| LaunchError::launcher(format!("encoding payload: {err}")))?;
        tokio::fs::write(&payload_path, bytes).await.map_err(|err| {
            LaunchError::launcher(format!(
                "writing payload {}: {err}",
                payload_path.display()
            ))
        })?;

        let args = worker_args(
            &payload_path,
            &result_path,
            &classpath,
            config.heap_initial(),
            config.heap_max(),
            config.extra_flags(),
        )?;

        let mut command = Command::new(&self.config.worker_program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = config.work_dir() {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|err| {
            LaunchError::launcher(format!(
                "spawning worker {}: {err}",
                self.config.worker_program.display()
            ))
        })?;
        let pid = child.id();

        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            _ => {
                if let Err(err) = child.kill().await {
                    tracing::warn!(pid = ?pid, error = %err, "failed to kill worker");
                }
                return Err(LaunchError::launcher("worker output pipes unavailable"));
            }
        };

        let cancel = ShutdownToken::new();
        let span = telemetry::launch_span(W::KIND, pid);
        let run = WorkerRun {
            kind: W::KIND,
            child,
            exchange,
            console: config.console(),
            transcript_limit: self.config.transcript_limit,
            diagnostic_tail: self.config.diagnostic_tail,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(run.supervise::<W::Output>(stdout, stderr).instrument(span));

        tracing::debug!(work_kind = W::KIND, pid = ?pid, "worker spawned");
        Ok(LaunchHandle {
            kind: W::KIND,
            pid,
            cancel,
            task: Some(task),
        })
    }

    /// Launch and wait for the outcome.
    pub async fn run<W: WorkUnit>(
        &self,
        config: LaunchConfiguration<W>,
    ) -> Result<ExecutionResult<W::Output>, LaunchError> {
        self.launch(config).await?.wait().await
    }

    fn exchange_dir(&self) -> Result<TempDir, LaunchError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("vessel-");
        let dir = match &self.config.exchange_dir {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        };
        dir.map_err(|err| LaunchError::launcher(format!("creating exchange directory: {err}")))
    }
}

/// Owns the worker process for the lifetime of one launch.
struct WorkerRun {
    kind: &'static str,
    child: Child,
    exchange: TempDir,
    console: Arc<dyn ConsoleSink>,
    transcript_limit: usize,
    diagnostic_tail: usize,
    cancel: ShutdownToken,
}

enum Exit {
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
}

impl WorkerRun {
    async fn supervise<T: DeserializeOwned>(
        self,
        stdout: ChildStdout,
        stderr: ChildStderr,
    ) -> LaunchOutcome<T> {
        let timing = telemetry::record_launch_start(self.kind);
        let outcome = self.drive::<T>(stdout, stderr).await;
        let label = match &outcome {
            Ok(result) if result.is_success() => "success",
            Ok(_) => "work_unit_failure",
            Err(LaunchError::Cancelled) => "cancelled",
            Err(_) => "launcher_error",
        };
        telemetry::record_launch_end(timing, label);
        outcome
    }

    async fn drive<T: DeserializeOwned>(
        mut self,
        stdout: ChildStdout,
        stderr: ChildStderr,
    ) -> LaunchOutcome<T> {
        let console = Arc::clone(&self.console);
        let transcript_task =
            tokio::spawn(drain_lines(stdout, self.transcript_limit, move |line| {
                console.line(line)
            }));
        let diagnostics_task = tokio::spawn(drain_lines(stderr, self.diagnostic_tail, |_| {}));

        let exit = tokio::select! {
            biased;
            status = self.child.wait() => Exit::Exited(status),
            _ = self.cancel.cancelled() => Exit::Cancelled,
        };

        let status = match exit {
            Exit::Cancelled => {
                if let Err(err) = self.child.kill().await {
                    tracing::warn!(error = %err, "failed to kill cancelled worker");
                }
                let _ = transcript_task.await;
                let _ = diagnostics_task.await;
                return Err(LaunchError::Cancelled);
            }
            Exit::Exited(status) => status
                .map_err(|err| LaunchError::launcher(format!("waiting for worker: {err}")))?,
        };

        let transcript = transcript_task.await.map_err(drain_failed)?;
        let diagnostics = diagnostics_task.await.map_err(drain_failed)?;

        if !status.success() {
            return Err(LaunchError::Launcher {
                message: format!("worker exited with {status}"),
                exit_code: status.code(),
                diagnostics,
            });
        }

        let protocol_error = |message: String| LaunchError::Launcher {
            message,
            exit_code: status.code(),
            diagnostics: diagnostics.clone(),
        };

        let result_path = self.exchange.path().join(RESULT_FILE);
        let bytes = tokio::fs::read(&result_path)
            .await
            .map_err(|err| protocol_error(format!("result record missing: {err}")))?;
        let record = ResultRecord::from_slice(&bytes)
            .map_err(|err| protocol_error(format!("result record malformed: {err:#}")))?;

        match record {
            ResultRecord::Success { value } => {
                let value = serde_json::from_value(value).map_err(|err| {
                    protocol_error(format!(
                        "protocol violation: {} value does not match its output type: {err}",
                        self.kind
                    ))
                })?;
                Ok(ExecutionResult::success(value, transcript))
            }
            ResultRecord::Failure { cause } => {
                tracing::debug!(cause = %cause, "work unit reported failure");
                Ok(ExecutionResult::failure(cause, transcript))
            }
        }
    }
}

fn drain_failed(err: JoinError) -> LaunchError {
    LaunchError::launcher(format!("output reader failed: {err}"))
}

/// Read `reader` line by line until EOF, handing each line to `on_line` and
/// keeping the last `limit` lines.
async fn drain_lines<R, F>(reader: R, limit: usize, on_line: F) -> Vec<String>
where
    R: AsyncRead + Unpin,
    F: Fn(&str),
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut kept = VecDeque::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim_end_matches(['\n', '\r']);
                on_line(line);
                if limit > 0 {
                    if kept.len() == limit {
                        kept.pop_front();
                    }
                    kept.push_back(line.to_string());
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "worker output stream failed");
                break;
            }
        }
    }
    kept.into()
}

/// Handle to a running worker.
///
/// Dropping a handle whose worker is still running cancels the launch.
pub struct LaunchHandle<T> {
    kind: &'static str,
    pid: Option<u32>,
    cancel: ShutdownToken,
    task: Option<JoinHandle<LaunchOutcome<T>>>,
}

impl<T> fmt::Debug for LaunchHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchHandle")
            .field("kind", &self.kind)
            .field("pid", &self.pid)
            .field("finished", &self.is_finished())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl<T> LaunchHandle<T> {
    /// OS process id of the worker.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Whether the outcome is ready (or was already taken).
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Kill the worker. A subsequent wait yields [`LaunchError::Cancelled`]
    /// unless the worker had already exited.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the worker to exit.
    pub async fn wait(mut self) -> LaunchOutcome<T> {
        let task = self.task.take().ok_or_else(outcome_taken)?;
        join_outcome(task.await)
    }

    /// Wait up to `timeout`. On [`LaunchError::TimedOut`] the handle stays
    /// usable: wait again or cancel.
    pub async fn wait_timeout(&mut self, timeout: Duration) -> LaunchOutcome<T> {
        let task = self.task.as_mut().ok_or_else(outcome_taken)?;
        match tokio::time::timeout(timeout, task).await {
            Ok(joined) => {
                self.task = None;
                join_outcome(joined)
            }
            Err(_) => Err(LaunchError::TimedOut(timeout)),
        }
    }
}

impl<T> Drop for LaunchHandle<T> {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            if !task.is_finished() {
                tracing::debug!(work_kind = self.kind, pid = ?self.pid, "launch handle dropped, cancelling");
                self.cancel.cancel();
            }
        }
    }
}

fn outcome_taken() -> LaunchError {
    LaunchError::launcher("launch outcome already taken")
}

fn join_outcome<T>(joined: Result<LaunchOutcome<T>, JoinError>) -> LaunchOutcome<T> {
    joined.unwrap_or_else(|err| Err(LaunchError::launcher(format!("launch task failed: {err}"))))
}
