//! Agent process transport.
//!
//! Spawns the agent with its own stdin/stdout/stderr pipes, no shell, an
//! explicit working directory, and the parent's environment plus any
//! overrides (the API key travels this way, never on argv). The child has
//! `kill_on_drop(true)` so an abandoned engine cannot leak it.
//!
//! stderr is drained into the log at `DEBUG`; left unread, a chatty agent
//! would eventually block on a full pipe.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::{AppError, Result};

/// Executable launched when nothing else is configured.
pub const DEFAULT_COMMAND: &str = "gemini";

/// Flag switching the Gemini CLI into agent-protocol mode.
pub const ACP_FLAG: &str = "--experimental-acp";

/// What to launch and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Executable name or path.
    pub command: String,
    /// Arguments; defaults to [`ACP_FLAG`] alone.
    pub args: Vec<String>,
    /// Directory the child starts in.
    pub working_directory: PathBuf,
    /// Variables set on top of the inherited environment.
    pub env: Vec<(String, String)>,
}

impl LaunchConfig {
    /// Launch `command --experimental-acp` in `working_directory`.
    #[must_use]
    pub fn new(command: impl Into<String>, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: vec![ACP_FLAG.to_owned()],
            working_directory: working_directory.into(),
            env: Vec::new(),
        }
    }

    /// Add an environment override.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// A running agent and its pipes.
#[derive(Debug)]
pub struct AgentProcess {
    /// Child handle; keep it alive, dropping it kills the process.
    pub child: Child,
    /// Agent's stdin.
    pub stdin: ChildStdin,
    /// Agent's stdout.
    pub stdout: ChildStdout,
}

/// Spawn the agent described by `config`.
///
/// Must be called inside a tokio runtime (stderr draining runs as a task).
///
/// # Errors
///
/// - [`AppError::Launch`]`("working directory … does not exist")` when
///   the working directory is missing or not a directory.
/// - [`AppError::Launch`]`("… command not found")` when the executable
///   does not exist.
/// - [`AppError::Launch`]`("failed to spawn agent: …")` for any other spawn
///   failure, such as missing permissions.
pub fn spawn_agent(config: &LaunchConfig) -> Result<AgentProcess> {
    // A missing cwd also fails with NotFound, which would read as a missing
    // executable below.
    if !config.working_directory.is_dir() {
        return Err(AppError::Launch(format!(
            "working directory {} does not exist",
            config.working_directory.display()
        )));
    }

    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args)
        .envs(config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .current_dir(&config.working_directory)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|err| {
        if err.kind() == ErrorKind::NotFound {
            AppError::Launch(format!("{}: command not found", config.command))
        } else {
            AppError::Launch(format!("failed to spawn agent: {err}"))
        }
    })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Launch("failed to capture agent stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Launch("failed to capture agent stdout".into()))?;
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(drain_stderr(stderr));
    }

    info!(
        command = config.command.as_str(),
        cwd = %config.working_directory.display(),
        pid = child.id(),
        "agent process started"
    );

    Ok(AgentProcess {
        child,
        stdin,
        stdout,
    })
}

/// Wait up to `grace` for the child to exit, then kill it.
///
/// Returns the exit status when one could be collected.
pub async fn shutdown_child(child: &mut Child, grace: Duration) -> Option<ExitStatus> {
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            info!(?status, "agent process exited");
            Some(status)
        }
        Ok(Err(err)) => {
            warn!(%err, "error waiting for agent process");
            None
        }
        Err(_) => {
            warn!(
                pid = child.id(),
                ?grace,
                "agent did not exit within grace period, forcing kill"
            );
            if let Err(err) = child.kill().await {
                warn!(%err, "failed to kill agent process");
                return None;
            }
            child.try_wait().ok().flatten()
        }
    }
}

async fn drain_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(stderr = line.as_str(), "agent stderr"),
            Ok(None) => break,
            Err(err) => {
                debug!(%err, "agent stderr closed with error");
                break;
            }
        }
    }
}
