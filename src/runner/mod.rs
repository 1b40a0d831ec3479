//! Runs checkout and deploy commands and streams their output live.
//!
//! ## Execution model
//!
//! ```text
//!  child stdout ──┐  read_until('\n')
//!                 ├──> merged channel ──> pump task ──> Tee ─┬─> ChannelSink ──> RunningProcess::output
//!  child stderr ──┘                          │               └─> FileSink (deploy log)
//!                                            │
//!                                            └─ after EOF: wait(), status line, RunOutcome on oneshot
//! ```
//!
//! [`ProcessRunner::reserve`] takes a permit from a runner-wide semaphore so
//! the number of concurrently running commands stays bounded; the permit is
//! held by the pump task until the child has exited. Starting a process
//! returns immediately. The output stream ends after the child exits and the
//! final status line has been sent.
//!
//! All channels are bounded: a consumer that reads slowly slows the pump,
//! which lets the OS pipe fill up and eventually blocks the child. A consumer
//! that goes away is detached from the tee and the child is drained to the
//! end regardless.

mod sink;
mod unbuffered;

pub use sink::{ChannelSink, FileSink, OutputSink, Tee};
pub use unbuffered::{find_in_path, find_stdbuf, is_executable};

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

use crate::errors::{PployError, Result};

const MERGED_CHANNEL_CAPACITY: usize = 64;
const OUTPUT_CHANNEL_CAPACITY: usize = 32;

/// What to run and where.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Human readable name used in logs and in the final status line.
    pub label: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    /// Run `script` with `bash -x -c`, echoing each command before it runs.
    pub fn script(label: impl Into<String>, working_dir: impl AsRef<Path>, script: &str) -> Self {
        Self {
            label: label.into(),
            program: PathBuf::from("bash"),
            args: vec!["-x".to_string(), "-c".to_string(), script.to_string()],
            working_dir: working_dir.as_ref().to_path_buf(),
            env: Vec::new(),
        }
    }

    /// Run an executable file directly.
    pub fn executable(
        label: impl Into<String>,
        working_dir: impl AsRef<Path>,
        program: impl AsRef<Path>,
    ) -> Self {
        Self {
            label: label.into(),
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            working_dir: working_dir.as_ref().to_path_buf(),
            env: Vec::new(),
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    /// Catch what would otherwise only show up as a failing `stdbuf`: a
    /// missing working directory or a missing executable path.
    fn preflight(&self) -> Result<()> {
        if !self.working_dir.is_dir() {
            return Err(PployError::Spawn {
                program: self.program_name(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("working directory {} does not exist", self.working_dir.display()),
                ),
            });
        }
        let is_path = self.program.components().count() > 1;
        if is_path {
            let program = self.working_dir.join(&self.program);
            if !is_executable(&program) {
                return Err(PployError::Spawn {
                    program: self.program_name(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "no such executable file",
                    ),
                });
            }
        }
        Ok(())
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub label: String,
    /// `None` when the process was killed by a signal or could not be waited on.
    pub exit_code: Option<i32>,
    pub success: bool,
}

impl RunOutcome {
    fn from_wait(label: &str, status: &std::io::Result<ExitStatus>) -> Self {
        match status {
            Ok(status) => Self {
                label: label.to_string(),
                exit_code: status.code(),
                success: status.success(),
            },
            Err(_) => Self {
                label: label.to_string(),
                exit_code: None,
                success: false,
            },
        }
    }
}

/// Final line appended to every run's output.
fn status_line(label: &str, status: &std::io::Result<ExitStatus>) -> String {
    match status {
        Ok(status) => match status.code() {
            Some(code) => format!("pploy: {} exited with status {}\n", label, code),
            None => format!("pploy: {} terminated by signal\n", label),
        },
        Err(e) => format!("pploy: failed to wait for {}: {}\n", label, e),
    }
}

pub type OutputStream = ReceiverStream<Vec<u8>>;

/// A started process: its live output and a completion event.
pub struct RunningProcess {
    /// One item per output line, stdout and stderr interleaved in arrival order.
    pub output: OutputStream,
    /// Resolves once the process has exited and all sinks are finished.
    pub completion: oneshot::Receiver<RunOutcome>,
}

/// Launches commands, bounded by a runner-wide concurrency limit.
#[derive(Clone)]
pub struct ProcessRunner {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    stdbuf: Option<PathBuf>,
}

impl ProcessRunner {
    pub fn new(max_concurrent: usize) -> Self {
        let stdbuf = find_stdbuf();
        if stdbuf.is_none() {
            tracing::warn!("stdbuf not found on PATH, child output may be block buffered");
        }
        Self::with_stdbuf(max_concurrent, stdbuf)
    }

    pub fn with_stdbuf(max_concurrent: usize, stdbuf: Option<PathBuf>) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            stdbuf,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Number of commands currently running.
    pub fn running(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    /// Claim a run slot without starting anything yet. Fails with `Busy` when
    /// the limit is reached.
    pub fn reserve(&self) -> Result<RunSlot> {
        let permit = Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|_| PployError::Busy {
                limit: self.max_concurrent,
            })?;
        Ok(RunSlot {
            permit,
            stdbuf: self.stdbuf.clone(),
        })
    }

    /// Check that `spec` can be started at all.
    pub fn preflight(&self, spec: &CommandSpec) -> Result<()> {
        spec.preflight()
    }

    /// Reserve a slot and start `spec` in it.
    pub fn start(&self, spec: CommandSpec, sinks: Vec<Box<dyn OutputSink>>) -> Result<RunningProcess> {
        self.reserve()?.start(spec, sinks)
    }
}

/// A reserved run slot. Dropping it without starting frees the slot.
pub struct RunSlot {
    permit: OwnedSemaphorePermit,
    stdbuf: Option<PathBuf>,
}

impl RunSlot {
    /// Spawn the command. `sinks` receive the output alongside the returned stream.
    pub fn start(self, spec: CommandSpec, sinks: Vec<Box<dyn OutputSink>>) -> Result<RunningProcess> {
        spec.preflight()?;

        let mut command = match &self.stdbuf {
            Some(stdbuf) => {
                let mut command = Command::new(stdbuf);
                command
                    .args(unbuffered::stdbuf_args())
                    .arg(&spec.program);
                command
            }
            None => Command::new(&spec.program),
        };
        command
            .args(&spec.args)
            .current_dir(&spec.working_dir)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|source| PployError::Spawn {
            program: spec.program_name(),
            source,
        })?;
        tracing::info!(run = %spec.label, pid = child.id(), "process started");

        let (merged_tx, mut merged_rx) = mpsc::channel::<Vec<u8>>(MERGED_CHANNEL_CAPACITY);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, merged_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, merged_tx.clone()));
        }
        drop(merged_tx);

        let (output_tx, output_rx) = mpsc::channel::<Vec<u8>>(OUTPUT_CHANNEL_CAPACITY);
        let (completion_tx, completion_rx) = oneshot::channel();

        let mut all_sinks: Vec<Box<dyn OutputSink>> = Vec::with_capacity(sinks.len() + 1);
        all_sinks.push(Box::new(ChannelSink::new(output_tx)));
        all_sinks.extend(sinks);
        let mut tee = Tee::new(spec.label.clone(), all_sinks);

        let permit = self.permit;
        let label = spec.label;
        tokio::spawn(async move {
            while let Some(chunk) = merged_rx.recv().await {
                tee.write(&chunk).await;
            }

            let status = child.wait().await;
            tee.write(status_line(&label, &status).as_bytes()).await;
            tee.finish().await;

            let outcome = RunOutcome::from_wait(&label, &status);
            match &status {
                Ok(_) => tracing::info!(
                    run = %label,
                    exit_code = ?outcome.exit_code,
                    success = outcome.success,
                    "process exited"
                ),
                Err(e) => tracing::warn!(run = %label, "failed to wait for process: {}", e),
            }
            drop(permit);
            let _ = completion_tx.send(outcome);
        });

        Ok(RunningProcess {
            output: ReceiverStream::new(output_rx),
            completion: completion_rx,
        })
    }
}

/// Read `reader` line by line (bytes, not UTF-8) into `tx`. A final line
/// without a newline gets one so it never merges with what follows.
async fn forward_lines<R>(reader: R, tx: mpsc::Sender<Vec<u8>>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    loop {
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                if !line.ends_with(b"\n") {
                    line.push(b'\n');
                }
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!("failed to read process output: {}", e);
                break;
            }
        }
    }
}
