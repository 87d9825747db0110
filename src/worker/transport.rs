// src/worker/transport.rs
//! How a worker is brought up. A spawner hands back raw line channels; the
//! handle layered on top does the decoding and correlation.

use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::utils::error::{NodeError, Result};
use super::pipeline::InferencePipeline;
use super::serve::WorkerHost;

const CHANNEL_CAPACITY: usize = 64;
const STDOUT_DRAIN_GRACE: Duration = Duration::from_secs(1);

pub const FIXTURES_ENV: &str = "FACEGATE_WORKER_FIXTURES";
pub const MODEL_LOAD_TIMEOUT_ENV: &str = "FACEGATE_WORKER_MODEL_LOAD_TIMEOUT_MS";

#[derive(Debug)]
pub enum WorkerEvent {
    /// One protocol line.
    Message(String),
    /// Free-form log text from the worker.
    Diagnostic(String),
    /// Always the last event.
    Exited(ExitReport),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitReport {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    pub detail: Option<String>,
}

impl ExitReport {
    pub fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
            detail: None,
        }
    }

    pub fn with_code(code: i32) -> Self {
        Self {
            code: Some(code),
            ..Default::default()
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            ..Default::default()
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0) && self.detail.is_none()
    }
}

impl fmt::Display for ExitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal, &self.detail) {
            (_, _, Some(detail)) => write!(f, "{}", detail),
            (Some(code), _, None) => write!(f, "exited with code {}", code),
            (None, Some(signal), None) => write!(f, "terminated by signal {}", signal),
            (None, None, None) => write!(f, "terminated"),
        }
    }
}

/// Raw ends of a running worker. Dropping `kill` (or sending on it)
/// terminates the worker.
pub struct WorkerChannels {
    pub outbound: mpsc::Sender<String>,
    pub events: mpsc::Receiver<WorkerEvent>,
    pub kill: oneshot::Sender<()>,
}

#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    fn describe(&self) -> String;

    async fn spawn(&self) -> Result<WorkerChannels>;
}

/// Runs the worker as a child process speaking the line protocol on
/// stdin/stdout. Stderr becomes the diagnostic stream.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
}

impl ProcessSpawner {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            envs: Vec::new(),
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

#[async_trait]
impl WorkerSpawner for ProcessSpawner {
    fn describe(&self) -> String {
        format!("process {}", self.program.display())
    }

    async fn spawn(&self) -> Result<WorkerChannels> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| NodeError::WorkerSpawn(format!("{}: {}", self.program.display(), e)))?;

        let pipe_error = || NodeError::WorkerSpawn("worker stdio was not captured".into());
        let mut stdin = child.stdin.take().ok_or_else(pipe_error)?;
        let stdout = child.stdout.take().ok_or_else(pipe_error)?;
        let stderr = child.stderr.take().ok_or_else(pipe_error)?;
        debug!("Spawned worker pid {:?}", child.id());

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            while let Some(line) = outbound_rx.recv().await {
                let written = async {
                    stdin.write_all(line.as_bytes()).await?;
                    stdin.write_all(b"\n").await?;
                    stdin.flush().await
                };
                if let Err(e) = written.await {
                    debug!("Worker stdin closed: {}", e);
                    break;
                }
            }
        });

        let messages = events_tx.clone();
        let stdout_reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if messages.send(WorkerEvent::Message(line)).await.is_err() {
                    break;
                }
            }
        });

        let diagnostics = events_tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if diagnostics.send(WorkerEvent::Diagnostic(line)).await.is_err() {
                    break;
                }
            }
        });

        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill_rx => {
                    let _ = child.start_kill();
                    child.wait().await
                }
            };
            // Let responses written just before exit reach the handle first.
            let _ = tokio::time::timeout(STDOUT_DRAIN_GRACE, stdout_reader).await;

            let report = match status {
                Ok(status) => ExitReport::from_status(status),
                Err(e) => ExitReport::failed(format!("wait failed: {}", e)),
            };
            let _ = events_tx.send(WorkerEvent::Exited(report)).await;
        });

        Ok(WorkerChannels {
            outbound: outbound_tx,
            events: events_rx,
            kill: kill_tx,
        })
    }
}

pub type PipelineFactory = Arc<dyn Fn() -> InferencePipeline + Send + Sync>;

/// Runs the worker host as a task in this process, exchanging the same
/// serialized lines a child process would. A panic in the pipeline is
/// reported as an abnormal exit.
#[derive(Clone)]
pub struct LocalSpawner {
    factory: PipelineFactory,
    model_load_timeout: Duration,
}

impl LocalSpawner {
    pub fn new(factory: PipelineFactory, model_load_timeout: Duration) -> Self {
        Self {
            factory,
            model_load_timeout,
        }
    }
}

#[async_trait]
impl WorkerSpawner for LocalSpawner {
    fn describe(&self) -> String {
        "local task".to_string()
    }

    async fn spawn(&self) -> Result<WorkerChannels> {
        let mut host = WorkerHost::new((self.factory)(), self.model_load_timeout);

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        let messages = events_tx.clone();
        let task = tokio::spawn(async move {
            let loaded = host.start().await;
            let notice = WorkerHost::startup_notice(&loaded);
            if messages.send(WorkerEvent::Message(notice)).await.is_err() {
                return 0;
            }
            if let Err(e) = loaded {
                let _ = messages.send(WorkerEvent::Diagnostic(format!("ERROR {}", e))).await;
                return 1;
            }

            while let Some(line) = outbound_rx.recv().await {
                let reply = host.handle_line(&line).await;
                if messages.send(WorkerEvent::Message(reply)).await.is_err() {
                    break;
                }
            }
            0
        });

        tokio::spawn(async move {
            let abort = task.abort_handle();
            let report = tokio::select! {
                joined = task => match joined {
                    Ok(code) => ExitReport::with_code(code),
                    Err(e) if e.is_panic() => ExitReport::failed("worker task panicked"),
                    Err(_) => ExitReport::failed("worker task was cancelled"),
                },
                _ = kill_rx => {
                    abort.abort();
                    ExitReport::failed("killed")
                }
            };
            let _ = events_tx.send(WorkerEvent::Exited(report)).await;
        });

        Ok(WorkerChannels {
            outbound: outbound_tx,
            events: events_rx,
            kill: kill_tx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_report_display() {
        assert_eq!(ExitReport::with_code(3).to_string(), "exited with code 3");
        assert!(ExitReport::with_code(0).success());
        assert!(!ExitReport::failed("killed").success());

        let signalled = ExitReport { signal: Some(9), ..Default::default() };
        assert_eq!(signalled.to_string(), "terminated by signal 9");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_spawner_reports_exit() {
        let spawner = ProcessSpawner::new("sh", vec!["-c".into(), "echo hello; exit 4".into()]);
        let mut channels = spawner.spawn().await.unwrap();

        let mut lines = Vec::new();
        let report = loop {
            match channels.events.recv().await.unwrap() {
                WorkerEvent::Message(line) => lines.push(line),
                WorkerEvent::Diagnostic(_) => {}
                WorkerEvent::Exited(report) => break report,
            }
        };
        assert_eq!(lines, vec!["hello".to_string()]);
        assert_eq!(report.code, Some(4));
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_spawn() {
        let spawner = ProcessSpawner::new("/nonexistent/facegate-worker", vec![]);
        assert!(matches!(spawner.spawn().await, Err(NodeError::WorkerSpawn(_))));
    }
}
