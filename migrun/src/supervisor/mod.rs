//! Supervision of the managed database server process.
//!
//! - `ServerCommand` - how to install and launch the server
//! - `ProcessSupervisor` - start, readiness wait, graceful stop
//! - `ProcessHandle` - owns the running child; dropping it kills the process

mod command;
mod signal;

use std::net::Ipv4Addr;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

pub use command::{ServerCommand, default_install_args, default_server_args};

use crate::errors::{RunnerError, RunnerResult};
use crate::pipeline::DatabaseServer;

/// How long `start` waits for the server to accept connections.
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(60);
/// How long `stop` waits after the shutdown signal before killing.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(30);

const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Lifecycle of the supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProcessState {
    NotStarted,
    Starting,
    Running,
    Stopped,
    Failed,
}

/// A running server process.
pub struct ProcessHandle {
    child: Child,
    pid: Option<u32>,
    port: u16,
    started_at: Instant,
    output: Vec<JoinHandle<()>>,
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    async fn kill(&mut self) {
        if let Ok(None) = self.child.try_wait()
            && let Err(err) = self.child.kill().await
        {
            warn!("failed to kill server process: {err}");
        }
        self.abort_output();
    }

    fn abort_output(&mut self) {
        for task in self.output.drain(..) {
            task.abort();
        }
    }
}

/// Starts and stops one database server process.
pub struct ProcessSupervisor {
    command: ServerCommand,
    state: ProcessState,
    startup_timeout: Duration,
    stop_grace: Duration,
}

impl ProcessSupervisor {
    pub fn new(command: ServerCommand) -> Self {
        Self {
            command,
            state: ProcessState::NotStarted,
            startup_timeout: STARTUP_TIMEOUT,
            stop_grace: STOP_GRACE_PERIOD,
        }
    }

    #[cfg(test)]
    fn with_timeouts(mut self, startup: Duration, stop_grace: Duration) -> Self {
        self.startup_timeout = startup;
        self.stop_grace = stop_grace;
        self
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Launch the server and block until it accepts TCP connections on `port`.
    pub async fn start(&mut self, port: u16, base_dir: &Path, data_dir: &Path) -> RunnerResult<ProcessHandle> {
        self.state = ProcessState::Starting;

        match self.launch(port, base_dir, data_dir).await {
            Ok(handle) => {
                self.state = ProcessState::Running;
                info!(
                    "database server ready on port {port} (pid {:?}, {}ms)",
                    handle.pid,
                    handle.started_at.elapsed().as_millis()
                );
                Ok(handle)
            }
            Err(err) => {
                self.state = ProcessState::Failed;
                Err(err)
            }
        }
    }

    /// Signal the server to shut down, force-killing it after the grace period.
    pub async fn stop(&mut self, mut handle: ProcessHandle) -> RunnerResult<()> {
        let result = self.shutdown(&mut handle).await;
        handle.abort_output();

        self.state = match result {
            Ok(()) => ProcessState::Stopped,
            Err(_) => ProcessState::Failed,
        };
        result
    }

    async fn launch(&self, port: u16, base_dir: &Path, data_dir: &Path) -> RunnerResult<ProcessHandle> {
        ensure_port_free(port)?;

        for dir in [base_dir, data_dir] {
            tokio::fs::create_dir_all(dir).await.map_err(|err| {
                RunnerError::start_failure(format!("cannot create {}: {err}", dir.display()))
            })?;
        }

        if let Some(install_binary) = &self.command.install_binary
            && is_empty_dir(data_dir).await?
        {
            self.install(install_binary, base_dir, data_dir).await?;
        }

        let args = self.command.server_args(port, base_dir, data_dir);
        debug!("spawning {} {}", self.command.binary.display(), args.join(" "));

        let mut child = Command::new(&self.command.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                RunnerError::start_failure(format!(
                    "failed to spawn {}: {err}",
                    self.command.binary.display()
                ))
            })?;

        let mut output = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            output.push(forward_output(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            output.push(forward_output(stderr, "stderr"));
        }

        let mut handle = ProcessHandle {
            pid: child.id(),
            child,
            port,
            started_at: Instant::now(),
            output,
        };

        let readiness = tokio::time::timeout(self.startup_timeout, wait_until_ready(&mut handle.child, port)).await;
        let outcome = match readiness {
            Ok(result) => result,
            Err(_) => Err(RunnerError::start_failure(format!(
                "server not accepting connections on port {port} after {:?}",
                self.startup_timeout
            ))),
        };

        if let Err(err) = outcome {
            handle.kill().await;
            return Err(err);
        }
        Ok(handle)
    }

    async fn install(&self, binary: &Path, base_dir: &Path, data_dir: &Path) -> RunnerResult<()> {
        let args = self.command.install_args(base_dir, data_dir);
        info!("initializing data directory {}", data_dir.display());

        let output = Command::new(binary)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| RunnerError::start_failure(format!("failed to run {}: {err}", binary.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RunnerError::start_failure(format!(
                "{} exited with {}: {}",
                binary.display(),
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }

    async fn shutdown(&self, handle: &mut ProcessHandle) -> RunnerResult<()> {
        let status = handle
            .child
            .try_wait()
            .map_err(|err| RunnerError::stop_failure(format!("cannot query server process: {err}")))?;
        if let Some(status) = status {
            warn!("database server had already exited with {status}");
            return Ok(());
        }

        if let Err(err) = signal::terminate(&mut handle.child) {
            warn!("shutdown signal failed ({err}), killing server");
        }

        match tokio::time::timeout(self.stop_grace, handle.child.wait()).await {
            Ok(Ok(status)) => {
                info!("database server on port {} exited with {status}", handle.port);
                Ok(())
            }
            Ok(Err(err)) => Err(RunnerError::stop_failure(format!("failed waiting for server exit: {err}"))),
            Err(_) => {
                warn!("database server ignored shutdown for {:?}, killing", self.stop_grace);
                handle
                    .child
                    .kill()
                    .await
                    .map_err(|err| RunnerError::stop_failure(format!("failed to kill server: {err}")))
            }
        }
    }
}

impl DatabaseServer for ProcessSupervisor {
    type Handle = ProcessHandle;

    async fn start(&mut self, port: u16, base_dir: &Path, data_dir: &Path) -> RunnerResult<ProcessHandle> {
        ProcessSupervisor::start(self, port, base_dir, data_dir).await
    }

    async fn stop(&mut self, handle: ProcessHandle) -> RunnerResult<()> {
        ProcessSupervisor::stop(self, handle).await
    }
}

async fn wait_until_ready(child: &mut Child, port: u16) -> RunnerResult<()> {
    loop {
        let exited = child
            .try_wait()
            .map_err(|err| RunnerError::start_failure(format!("cannot query server process: {err}")))?;
        if let Some(status) = exited {
            return Err(RunnerError::start_failure(format!(
                "server exited with {status} before accepting connections"
            )));
        }

        if TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await.is_ok() {
            // The listener must belong to our child, which is still alive.
            if let Some(status) = child
                .try_wait()
                .map_err(|err| RunnerError::start_failure(format!("cannot query server process: {err}")))?
            {
                return Err(RunnerError::start_failure(format!(
                    "server exited with {status} while port {port} accepted connections"
                )));
            }
            return Ok(());
        }
        tokio::time::sleep(READINESS_POLL_INTERVAL).await;
    }
}

/// A listener already on `port` would pass readiness in place of our server.
fn ensure_port_free(port: u16) -> RunnerResult<()> {
    match std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, port)) {
        Ok(listener) => {
            drop(listener);
            Ok(())
        }
        Err(err) => Err(RunnerError::start_failure(format!("port {port} already in use: {err}"))),
    }
}

async fn is_empty_dir(dir: &Path) -> RunnerResult<bool> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|err| RunnerError::start_failure(format!("cannot read {}: {err}", dir.display())))?;
    let first = entries
        .next_entry()
        .await
        .map_err(|err| RunnerError::start_failure(format!("cannot read {}: {err}", dir.display())))?;
    Ok(first.is_none())
}

fn forward_output<R>(stream: R, stream_name: &'static str) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "migrun::server", "[{stream_name}] {line}");
        }
    })
}
