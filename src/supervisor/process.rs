//! # Supervised Process
//!
//! A [`Supervisor`] owns one external executable from spawn to exit.
//!
//! ## Architecture Note
//! The process moves through the states of [`ProcessState`]:
//!
//! ```text
//! Created -> Starting -> Ready -> Stopping -> Stopped
//!               |          |
//!               +----------+------> Failed
//! ```
//!
//! [`Supervisor::start`] spawns the child and polls its readiness probe every
//! [`POLL_INTERVAL`]. If the child exits first, or the probe has not answered within the
//! timeout, the child is killed and start fails; no orphan is left behind.
//!
//! Once ready, the child is handed to an actor task that owns it exclusively. The
//! [`Supervisor`] handle talks to that task over a channel, the same way every other
//! long-lived owner in this crate is driven. Standard output and standard error are
//! drained on their own tasks so a chatty child never blocks the control flow.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::error::SupervisorError;
use super::probe::ReadinessProbe;

/// Interval between readiness checks.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

// =============================================================================
// 1. PROCESS DESCRIPTION
// =============================================================================

/// Everything needed to launch an external executable.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
    /// Output of the process is appended here.
    pub log_file: PathBuf,
}

impl ProcessSpec {
    pub fn new(name: impl Into<String>, program: impl Into<String>, log_file: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
            log_file: log_file.into(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

/// Lifecycle states of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Created,
    Starting,
    Ready,
    Stopping,
    Stopped,
    Failed,
}

impl ProcessState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessState::Stopped | ProcessState::Failed)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            ProcessState::Created => "created",
            ProcessState::Starting => "starting",
            ProcessState::Ready => "ready",
            ProcessState::Stopping => "stopping",
            ProcessState::Stopped => "stopped",
            ProcessState::Failed => "failed",
        };
        f.write_str(state)
    }
}

// =============================================================================
// 2. THE HANDLE
// =============================================================================

#[derive(Debug)]
enum Request {
    Stop {
        respond_to: oneshot::Sender<Result<(), SupervisorError>>,
    },
}

/// Handle to a running, ready process.
#[derive(Debug)]
pub struct Supervisor {
    name: String,
    pid: Option<u32>,
    sender: mpsc::Sender<Request>,
    state: watch::Receiver<ProcessState>,
    task: JoinHandle<()>,
}

impl Supervisor {
    /// Spawns the process described by `spec` and returns once `probe` reports it ready.
    ///
    /// Fails with [`SupervisorError::ExitedEarly`] if the process exits first and with
    /// [`SupervisorError::NotReady`] if `timeout` elapses; in both cases the process has
    /// been killed and reaped.
    #[instrument(skip_all, fields(name = %spec.name))]
    pub async fn start(
        spec: ProcessSpec,
        probe: Box<dyn ReadinessProbe>,
        timeout: Duration,
    ) -> Result<Self, SupervisorError> {
        debug!(?spec, probe = %probe.describe(), "Starting process");
        let (state_tx, state_rx) = watch::channel(ProcessState::Created);
        let log = open_log(&spec).await?;

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.current_dir {
            command.current_dir(dir);
        }
        let mut child = command.spawn().map_err(|source| SupervisorError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        let _ = state_tx.send(ProcessState::Starting);

        let io_error = |source| SupervisorError::Io {
            name: spec.name.clone(),
            source,
        };
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(drain(spec.name.clone(), stdout, log.try_clone().await.map_err(io_error)?));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain(spec.name.clone(), stderr, log));
        }

        if let Err(e) = await_ready(&spec.name, &mut child, probe.as_ref(), timeout).await {
            let _ = state_tx.send(ProcessState::Failed);
            return Err(e);
        }
        let _ = state_tx.send(ProcessState::Ready);

        let pid = child.id();
        let (sender, receiver) = mpsc::channel(8);
        let actor = ProcessActor {
            name: spec.name.clone(),
            child,
            receiver,
            state: state_tx,
            exited: false,
        };
        let task = tokio::spawn(actor.run());
        info!(pid, "Process ready");

        Ok(Self {
            name: spec.name,
            pid,
            sender,
            state: state_rx,
            task,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        *self.state.borrow()
    }

    /// A receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<ProcessState> {
        self.state.clone()
    }

    /// Kills the process and waits for it to exit. Stopping an already exited process
    /// succeeds.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        let (respond_to, response) = oneshot::channel();
        if self.sender.send(Request::Stop { respond_to }).await.is_err() {
            return self.closed();
        }
        match response.await {
            Ok(result) => result,
            Err(_) => self.closed(),
        }
    }

    /// Waits until the supervising task has finished.
    pub async fn join(self) {
        drop(self.sender);
        if let Err(e) = self.task.await {
            error!(name = %self.name, error = %e, "Supervisor task failed");
        }
    }

    fn closed(&self) -> Result<(), SupervisorError> {
        if self.state().is_terminal() {
            Ok(())
        } else {
            Err(SupervisorError::Closed(self.name.clone()))
        }
    }
}

async fn open_log(spec: &ProcessSpec) -> Result<File, SupervisorError> {
    let io_error = |source| SupervisorError::Io {
        name: spec.name.clone(),
        source,
    };
    if let Some(parent) = spec.log_file.parent() {
        fs::create_dir_all(parent).await.map_err(io_error)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&spec.log_file)
        .await
        .map_err(io_error)
}

async fn await_ready(
    name: &str,
    child: &mut Child,
    probe: &dyn ReadinessProbe,
    timeout: Duration,
) -> Result<(), SupervisorError> {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    let mut ticker = tokio::time::interval(POLL_INTERVAL);

    loop {
        tokio::select! {
            status = child.wait() => {
                let status = match status {
                    Ok(status) => status.to_string(),
                    Err(e) => e.to_string(),
                };
                warn!(name, %status, "Process exited before becoming ready");
                return Err(SupervisorError::ExitedEarly { name: name.to_string(), status });
            }
            _ = &mut deadline => {
                warn!(name, ?timeout, "Process not ready in time, killing it");
                kill(name, child).await;
                return Err(SupervisorError::NotReady { name: name.to_string(), timeout });
            }
            // The probe is raced against exit and deadline so a hung check cannot outlive either.
            ready = async {
                ticker.tick().await;
                probe.ready().await
            } => {
                if ready {
                    return Ok(());
                }
            }
        }
    }
}

async fn kill(name: &str, child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!(name, error = %e, "Kill failed");
    }
    if let Err(e) = child.wait().await {
        debug!(name, error = %e, "Wait after kill failed");
    }
}

async fn drain<R>(name: String, reader: R, mut log: File)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!(component = %name, "{line}");
                if let Err(e) = log.write_all(format!("{line}\n").as_bytes()).await {
                    warn!(component = %name, error = %e, "Failed to write process log");
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(component = %name, error = %e, "Output stream failed");
                break;
            }
        }
    }
    let _ = log.flush().await;
}

// =============================================================================
// 3. THE ACTOR
// =============================================================================

struct ProcessActor {
    name: String,
    child: Child,
    receiver: mpsc::Receiver<Request>,
    state: watch::Sender<ProcessState>,
    exited: bool,
}

impl ProcessActor {
    async fn run(mut self) {
        info!(name = %self.name, "Supervisor started");
        loop {
            tokio::select! {
                request = self.receiver.recv() => match request {
                    Some(Request::Stop { respond_to }) => {
                        self.shutdown().await;
                        let _ = respond_to.send(Ok(()));
                        break;
                    }
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                status = self.child.wait(), if !self.exited => {
                    self.exited = true;
                    let _ = self.state.send(ProcessState::Failed);
                    match status {
                        Ok(status) => error!(name = %self.name, %status, "Process exited unexpectedly"),
                        Err(e) => error!(name = %self.name, error = %e, "Process wait failed"),
                    }
                }
            }
        }
        info!(name = %self.name, state = %*self.state.borrow(), "Shutdown");
    }

    async fn shutdown(&mut self) {
        if self.exited {
            return;
        }
        let _ = self.state.send(ProcessState::Stopping);
        kill(&self.name, &mut self.child).await;
        self.exited = true;
        let _ = self.state.send(ProcessState::Stopped);
    }
}
