//! The ACP protocol engine.
//!
//! An [`AcpClient`] owns one agent process and one session. Once started it
//! runs two tasks:
//!
//! - the **read-loop** ([`run_reader`]) decodes the agent's stdout and
//!   fires [`EventSink`] hooks;
//! - the **write-loop** performs the handshake (`initialize`, then
//!   `session/new`) and afterwards drains the input queue, turning each
//!   submitted text into a `session/prompt`.
//!
//! Both tasks write through the same [`OutboundWriter`]. The read-loop is
//! the only task that mutates the session id and readiness.
//!
//! # Shutdown
//!
//! [`AcpClient::stop`] enqueues an end marker behind any queued prompts,
//! aborts a handshake wait in progress, and then waits (bounded) for the
//! write-loop to close stdin and reap the process. An agent that does not
//! exit within the grace period is killed. [`EventSink::on_exit`] fires
//! exactly once, whether the process exits by itself or is stopped.

use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::acp::handshake::{self, FsCapabilities};
use crate::acp::latch::{Latch, WaitOutcome};
use crate::acp::message::RequestId;
use crate::acp::permission::{PendingPermissions, PermissionResponse};
use crate::acp::reader::{run_reader, Dispatcher};
use crate::acp::session::{Session, SessionPhase};
use crate::acp::spawner::{self, LaunchConfig};
use crate::acp::writer::OutboundWriter;
use crate::config::ClientConfig;
use crate::events::EventSink;
use crate::{AppError, Result};

/// Engine tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Capabilities advertised in `initialize`.
    pub fs: FsCapabilities,
    /// Bounded wait for the `initialize` result.
    pub initialize_timeout: Duration,
    /// Bounded wait for the `session/new` result.
    pub session_timeout: Duration,
    /// Time the agent gets to exit after stdin closes.
    pub shutdown_grace: Duration,
    /// Treat a handshake timeout as fatal instead of continuing.
    pub strict_handshake: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for ClientOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            fs: config.fs_capabilities(),
            initialize_timeout: config.timeouts.initialize(),
            session_timeout: config.timeouts.session(),
            shutdown_grace: config.timeouts.shutdown_grace(),
            strict_handshake: config.strict_handshake,
        }
    }
}

#[derive(Debug)]
enum Input {
    Prompt(String),
    End,
}

struct Running {
    writer: OutboundWriter,
    dispatcher: Dispatcher,
    write_task: JoinHandle<()>,
    read_task: JoinHandle<()>,
}

/// One agent process, one session.
pub struct AcpClient {
    session: Arc<Session>,
    options: ClientOptions,
    sink: Arc<dyn EventSink>,
    permissions: PendingPermissions,
    input_tx: mpsc::UnboundedSender<Input>,
    input_rx: StdMutex<Option<mpsc::UnboundedReceiver<Input>>>,
    shutdown: CancellationToken,
    reader_cancel: CancellationToken,
    running: Mutex<Option<Running>>,
}

impl std::fmt::Debug for AcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcpClient")
            .field("session", &self.session)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl AcpClient {
    /// Create an engine for a session rooted at `working_directory`.
    pub fn new(
        working_directory: impl Into<std::path::PathBuf>,
        options: ClientOptions,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        Self {
            session: Arc::new(Session::new(working_directory)),
            options,
            sink,
            permissions: PendingPermissions::default(),
            input_tx,
            input_rx: StdMutex::new(Some(input_rx)),
            shutdown: CancellationToken::new(),
            reader_cancel: CancellationToken::new(),
            running: Mutex::new(None),
        }
    }

    /// Spawn the agent and start both loops.
    ///
    /// Launch failures are reported once through [`EventSink::on_error`],
    /// move the engine to [`SessionPhase::Failed`], and are also returned.
    ///
    /// # Errors
    ///
    /// - [`AppError::Launch`] if the agent cannot be spawned.
    /// - [`AppError::Acp`] if the engine was already started.
    pub async fn start(&self, launch: &LaunchConfig) -> Result<()> {
        if self.session.phase() != SessionPhase::NotStarted {
            return Err(AppError::Acp("engine already started".into()));
        }

        let process = match spawner::spawn_agent(launch) {
            Ok(process) => process,
            Err(err) => {
                warn!(error = %err, "agent launch failed");
                self.session.transition(SessionPhase::Failed);
                self.sink.on_error(&err.to_string());
                return Err(err);
            }
        };

        self.attach(process.stdout, process.stdin, Some(process.child))
            .await
    }

    /// Launch the agent described by `config` in this engine's working
    /// directory.
    ///
    /// `api_key` replaces any key already on `config`; `command` replaces
    /// the configured executable.
    ///
    /// # Errors
    ///
    /// Same as [`AcpClient::start`].
    pub async fn start_configured(
        &self,
        config: &ClientConfig,
        api_key: Option<&str>,
        command: Option<&str>,
    ) -> Result<()> {
        let mut launch = config.launch_config(self.session.working_directory(), command);
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            launch.env.retain(|(name, _)| name != &config.api_key_env);
            launch = launch.with_env(&config.api_key_env, key);
        }
        self.start(&launch).await
    }

    /// Start both loops over already-open streams.
    ///
    /// `child`, when given, is reaped (and killed if necessary) by the
    /// write-loop during shutdown.
    ///
    /// # Errors
    ///
    /// [`AppError::Acp`] if the engine was already started.
    pub async fn attach<R, W>(&self, stdout: R, stdin: W, child: Option<Child>) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let mut running = self.running.lock().await;
        let input_rx = self
            .input_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| AppError::Acp("engine already started".into()))?;

        self.session.transition(SessionPhase::Initializing);

        let writer = OutboundWriter::new(stdin);
        let abort = self.shutdown.child_token();
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.session),
            writer.clone(),
            Arc::clone(&self.sink),
            self.permissions.clone(),
            abort.clone(),
        );

        let read_task = tokio::spawn(run_reader(
            stdout,
            dispatcher.clone(),
            self.reader_cancel.clone(),
        ));

        let write_task = tokio::spawn(run_write_loop(WriteLoop {
            session: Arc::clone(&self.session),
            writer: writer.clone(),
            sink: Arc::clone(&self.sink),
            options: self.options.clone(),
            input_rx,
            abort,
            child,
        }));

        *running = Some(Running {
            writer,
            dispatcher,
            write_task,
            read_task,
        });
        Ok(())
    }

    /// Queue `text` as a prompt.
    ///
    /// Accepted in any phase before shutdown; prompts submitted before the
    /// session is ready are sent, in order, once it is.
    ///
    /// # Errors
    ///
    /// [`AppError::QueueClosed`] after [`AcpClient::stop`] or once the
    /// session has closed or failed.
    pub fn submit_text(&self, text: impl Into<String>) -> Result<()> {
        let phase = self.session.phase();
        if self.shutdown.is_cancelled() || phase.is_terminal() {
            return Err(AppError::QueueClosed(format!(
                "engine no longer accepts prompts ({phase})"
            )));
        }
        self.input_tx
            .send(Input::Prompt(text.into()))
            .map_err(|_| AppError::QueueClosed("write-loop has exited".into()))
    }

    /// Answer a pending permission request with `option_id`.
    ///
    /// # Errors
    ///
    /// - [`AppError::NotFound`] if `request_id` is not pending or
    ///   `option_id` was not offered.
    /// - [`AppError::Acp`] if the engine is not running or the write fails.
    pub async fn respond_to_permission(
        &self,
        request_id: &RequestId,
        option_id: &str,
    ) -> Result<()> {
        let Some(request) = self.permissions.take(request_id) else {
            return Err(AppError::NotFound(format!(
                "no pending permission request '{request_id}'"
            )));
        };

        if !request.offers(option_id) {
            self.permissions.restore(request);
            return Err(AppError::NotFound(format!(
                "option '{option_id}' was not offered for request '{request_id}'"
            )));
        }

        let response = PermissionResponse::selected(option_id);
        let sent = match self.writer().await {
            Ok(writer) => writer.send_response(request_id, &response).await,
            Err(err) => Err(err),
        };
        if let Err(err) = sent {
            self.permissions.restore(request);
            return Err(err);
        }

        info!(request_id = %request_id, option_id, "permission answered");
        Ok(())
    }

    /// Ask the agent to cancel the current turn.
    ///
    /// Advisory only: queued prompts are not removed.
    ///
    /// # Errors
    ///
    /// [`AppError::Acp`] if the engine is not running or the write fails.
    pub async fn cancel(&self) -> Result<()> {
        let writer = self.writer().await?;
        let session_id = self.session.session_id();
        let id = self.session.next_request_id();
        let params = handshake::cancel_params(&session_id);
        writer
            .send_request(id, handshake::SESSION_CANCEL, Some(&params))
            .await?;
        info!(session_id = session_id.as_str(), request_id = id, "cancel sent");
        Ok(())
    }

    /// Shut the engine down.
    ///
    /// Prompts queued before this call are still sent. Returns once the
    /// process is gone and [`EventSink::on_exit`] has fired, or after the
    /// bounded waits ran out and the loops were torn down.
    pub async fn stop(&self) {
        self.session.transition(SessionPhase::Closing);
        if self.input_tx.send(Input::End).is_err() {
            debug!("write-loop already gone");
        }
        self.shutdown.cancel();

        let Some(running) = self.running.lock().await.take() else {
            // Never started: no process, no exit notification.
            self.session.transition(SessionPhase::Closed);
            return;
        };

        let grace = self.options.shutdown_grace;
        let mut write_task = running.write_task;
        if tokio::time::timeout(grace * 2, &mut write_task).await.is_err() {
            warn!("write-loop did not finish in time, aborting it");
            write_task.abort();
            // Dropping the aborted task drops the child, which kills it.
            let _ = write_task.await;
        }
        if let Err(err) = running.writer.close().await {
            debug!(error = %err, "stdin close after write-loop exit failed");
        }

        let mut read_task = running.read_task;
        if tokio::time::timeout(grace, &mut read_task).await.is_err() {
            warn!("read-loop still running after shutdown, cancelling it");
            self.reader_cancel.cancel();
            let _ = read_task.await;
        }

        running.dispatcher.finish("stopped");
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.session.phase()
    }

    /// Agent-assigned session id; empty until ready.
    #[must_use]
    pub fn session_id(&self) -> String {
        self.session.session_id()
    }

    /// The session this engine drives.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Unanswered permission requests.
    #[must_use]
    pub fn pending_permissions(&self) -> &PendingPermissions {
        &self.permissions
    }

    async fn writer(&self) -> Result<OutboundWriter> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|r| r.writer.clone())
            .ok_or_else(|| AppError::Acp("engine is not running".into()))
    }
}

// ── Write-loop ────────────────────────────────────────────────────────────────

struct WriteLoop {
    session: Arc<Session>,
    writer: OutboundWriter,
    sink: Arc<dyn EventSink>,
    options: ClientOptions,
    input_rx: mpsc::UnboundedReceiver<Input>,
    /// Cancelled by `stop()` or when the read-loop finishes.
    abort: CancellationToken,
    child: Option<Child>,
}

async fn run_write_loop(ctx: WriteLoop) {
    let WriteLoop {
        session,
        writer,
        sink,
        options,
        mut input_rx,
        abort,
        child,
    } = ctx;

    if run_handshake(&session, &writer, sink.as_ref(), &options, &abort).await {
        loop {
            let input = tokio::select! {
                biased;

                input = input_rx.recv() => input,
                () = abort.cancelled() => None,
            };

            match input {
                Some(Input::Prompt(text)) => {
                    if let Err(err) = send_prompt(&session, &writer, &text).await {
                        session.transition(SessionPhase::Failed);
                        sink.on_error(&format!("Error writing to process: {err}"));
                        break;
                    }
                }
                Some(Input::End) | None => break,
            }
        }
    }

    if let Err(err) = writer.close().await {
        debug!(error = %err, "closing agent stdin failed");
    }

    if let Some(mut child) = child {
        spawner::shutdown_child(&mut child, options.shutdown_grace).await;
    }
    debug!("write-loop finished");
}

/// Run `initialize` and `session/new`. Returns `false` when the loop should
/// skip straight to shutdown.
async fn run_handshake(
    session: &Session,
    writer: &OutboundWriter,
    sink: &dyn EventSink,
    options: &ClientOptions,
    abort: &CancellationToken,
) -> bool {
    let init = handshake::initialize_params(options.fs);
    let steps = [
        (
            handshake::INITIALIZE,
            init,
            session.initialized_signal(),
            options.initialize_timeout,
        ),
        (
            handshake::SESSION_NEW,
            handshake::session_new_params(session.working_directory()),
            session.ready_signal(),
            options.session_timeout,
        ),
    ];

    for (method, params, signal, timeout) in steps {
        if method == handshake::SESSION_NEW {
            session.transition(SessionPhase::SessionCreating);
        }

        let id = session.next_request_id();
        if let Err(err) = writer.send_request(id, method, Some(&params)).await {
            session.transition(SessionPhase::Failed);
            sink.on_error(&format!("Error writing to process: {err}"));
            return false;
        }
        debug!(method, request_id = id, "handshake request sent");

        if !await_step(method, signal, timeout, abort, session, sink, options).await {
            return false;
        }
    }

    true
}

async fn await_step(
    method: &str,
    signal: &Latch,
    timeout: Duration,
    abort: &CancellationToken,
    session: &Session,
    sink: &dyn EventSink,
    options: &ClientOptions,
) -> bool {
    match signal.wait_or_abort(timeout, abort).await {
        WaitOutcome::Opened => true,
        WaitOutcome::Aborted => {
            debug!(method, "handshake aborted");
            false
        }
        WaitOutcome::TimedOut if options.strict_handshake => {
            warn!(method, ?timeout, "handshake timed out, failing session");
            session.transition(SessionPhase::Failed);
            sink.on_error(&format!("{method} timed out after {timeout:?}"));
            false
        }
        WaitOutcome::TimedOut => {
            warn!(method, ?timeout, "handshake timed out, continuing");
            true
        }
    }
}

async fn send_prompt(session: &Session, writer: &OutboundWriter, text: &str) -> Result<()> {
    let session_id = session.session_id();
    let id = session.next_request_id();
    let params = handshake::prompt_params(&session_id, text);
    writer
        .send_request(id, handshake::SESSION_PROMPT, Some(&params))
        .await?;
    debug!(session_id = session_id.as_str(), request_id = id, "prompt sent");
    Ok(())
}
