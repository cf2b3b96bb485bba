//! ACP read-loop.
//!
//! Reads newline-delimited JSON from the agent's stdout, decodes each line
//! with [`message::decode`] and dispatches it sequentially. Callbacks fire
//! on this task.
//!
//! # Dispatch
//!
//! | Inbound                                    | Action                                   |
//! |--------------------------------------------|------------------------------------------|
//! | result with `agentCapabilities`            | mark initialized                         |
//! | result with `sessionId`                    | capture id, [`EventSink::on_session_ready`] |
//! | result with `stopReason`                   | [`EventSink::on_stop`]                   |
//! | error                                      | [`EventSink::on_error`]                  |
//! | `session/update` `agent_message_chunk`     | [`EventSink::on_message`]                |
//! | `session/update` `agent_thought_chunk`     | [`EventSink::on_thought`]                |
//! | `fs/read_text_file`, `fs/write_text_file`  | [`FsProxy`], response written inline     |
//! | `session/request_permission`               | [`EventSink::on_permission_request`]     |
//! | *(anything else)*                          | Skipped; logged at `DEBUG`               |
//!
//! Malformed lines are logged and skipped. Only EOF, an I/O error or
//! cancellation end the loop, and each of them ends with exactly one
//! [`EventSink::on_exit`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::acp::codec::AcpCodec;
use crate::acp::fs_proxy::FsProxy;
use crate::acp::message::{self, InboundMessage, RequestId, RpcError};
use crate::acp::permission::{PendingPermissions, PermissionRequest};
use crate::acp::session::{Session, SessionPhase};
use crate::acp::writer::OutboundWriter;
use crate::events::EventSink;

/// `session/update` notification.
pub const SESSION_UPDATE: &str = "session/update";
/// `fs/read_text_file` request.
pub const FS_READ_TEXT_FILE: &str = "fs/read_text_file";
/// `fs/write_text_file` request.
pub const FS_WRITE_TEXT_FILE: &str = "fs/write_text_file";
/// `session/request_permission` request.
pub const REQUEST_PERMISSION: &str = "session/request_permission";

/// Routes decoded messages to session state, the fs proxy and the sink.
#[derive(Clone)]
pub struct Dispatcher {
    session: Arc<Session>,
    writer: OutboundWriter,
    sink: Arc<dyn EventSink>,
    fs: FsProxy,
    permissions: PendingPermissions,
    exited: Arc<AtomicBool>,
    exit_signal: CancellationToken,
}

impl Dispatcher {
    /// Build a dispatcher. The fs proxy resolves relative paths against the
    /// session's working directory. `exit_signal` is cancelled by
    /// [`Dispatcher::finish`].
    #[must_use]
    pub fn new(
        session: Arc<Session>,
        writer: OutboundWriter,
        sink: Arc<dyn EventSink>,
        permissions: PendingPermissions,
        exit_signal: CancellationToken,
    ) -> Self {
        let fs = FsProxy::new(session.working_directory());
        Self {
            session,
            writer,
            sink,
            fs,
            permissions,
            exited: Arc::new(AtomicBool::new(false)),
            exit_signal,
        }
    }

    /// Decode and dispatch one raw line. Blank and malformed lines are
    /// logged and ignored.
    pub async fn dispatch_line(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        match message::decode(line) {
            Ok(msg) => self.dispatch(msg).await,
            Err(e) => {
                warn!(error = %e, raw_line = line, "acp reader: decode error, skipping line");
            }
        }
    }

    /// Dispatch one decoded message.
    pub async fn dispatch(&self, msg: InboundMessage) {
        match msg {
            InboundMessage::Result { id, result } => self.handle_result(&id, &result),
            InboundMessage::Error { id, error } => self.handle_error(id.as_ref(), &error),
            InboundMessage::Notification { method, params } => {
                if method == SESSION_UPDATE {
                    self.handle_session_update(&params);
                } else {
                    debug!(method = method.as_str(), "acp reader: skipping unknown notification");
                }
            }
            InboundMessage::Request { id, method, params } => match method.as_str() {
                FS_READ_TEXT_FILE => {
                    let outcome = self.fs.read_text_file(&params).await;
                    self.reply(&id, outcome).await;
                }
                FS_WRITE_TEXT_FILE => {
                    let outcome = self.fs.write_text_file(&params).await;
                    self.reply(&id, outcome).await;
                }
                REQUEST_PERMISSION => self.handle_permission_request(id, &params),
                SESSION_UPDATE => self.handle_session_update(&params),
                other => {
                    debug!(
                        method = other,
                        request_id = %id,
                        "acp reader: skipping unknown request"
                    );
                }
            },
        }
    }

    /// Fire [`EventSink::on_exit`] and mark the session closed, once.
    pub fn finish(&self, reason: &str) {
        if self.exited.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(reason, "agent session ended");
        self.session.transition(SessionPhase::Closed);
        self.exit_signal.cancel();
        self.sink.on_exit();
    }

    /// Whether [`Dispatcher::finish`] has run.
    #[must_use]
    pub fn has_finished(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    fn handle_result(&self, id: &RequestId, result: &Value) {
        if result.get("agentCapabilities").is_some() {
            if self.session.mark_initialized() {
                info!(request_id = %id, "agent initialize succeeded");
            }
        } else if let Some(session_id) = result.get("sessionId") {
            let Some(session_id) = session_id.as_str() else {
                warn!(request_id = %id, "sessionId is not a string, ignoring");
                return;
            };
            if self.session.capture_session_id(session_id) {
                info!(session_id, "agent session ready");
                self.sink.on_session_ready();
            }
        } else if let Some(reason) = result.get("stopReason") {
            let reason = reason.as_str().map_or_else(|| reason.to_string(), str::to_owned);
            debug!(request_id = %id, stop_reason = reason.as_str(), "prompt turn finished");
            self.sink.on_stop(id, &reason);
        } else {
            debug!(request_id = %id, "acp reader: result without known fields");
        }
    }

    fn handle_error(&self, id: Option<&RequestId>, error: &RpcError) {
        let text = error.summary();
        warn!(
            request_id = ?id,
            code = error.code,
            error = text.as_str(),
            "agent returned an error"
        );
        self.sink.on_error(&text);
    }

    fn handle_session_update(&self, params: &Value) {
        let update = &params["update"];
        let kind = update["sessionUpdate"].as_str().unwrap_or_default();
        let text = update["content"]["text"].as_str().filter(|t| !t.is_empty());

        match (kind, text) {
            ("agent_message_chunk", Some(text)) => self.sink.on_message(text),
            ("agent_thought_chunk", Some(text)) => self.sink.on_thought(text),
            ("agent_message_chunk" | "agent_thought_chunk", None) => {
                debug!(kind, "acp reader: chunk without text");
            }
            _ => debug!(kind, "acp reader: skipping session update"),
        }
    }

    fn handle_permission_request(&self, id: RequestId, params: &Value) {
        let request = PermissionRequest::from_params(id, params);
        info!(
            request_id = %request.request_id,
            title = request.tool_call.display_title(),
            options = request.options.len(),
            "agent requested permission"
        );
        self.permissions.register(request.clone());
        self.sink.on_permission_request(request);
    }

    async fn reply<T: Serialize>(&self, id: &RequestId, outcome: std::result::Result<T, RpcError>) {
        let sent = match outcome {
            Ok(result) => self.writer.send_response(id, &result).await,
            Err(err) => self.writer.send_error(id, err.code, &err.message).await,
        };
        if let Err(e) = sent {
            warn!(request_id = %id, error = %e, "acp reader: failed to answer agent request");
        }
    }
}

/// Run the read-loop until EOF, an I/O error, or `cancel`.
///
/// Framing errors (over-long or non-UTF-8 lines) and decode errors skip the
/// offending line. An I/O error moves the session to
/// [`SessionPhase::Failed`] and is reported through [`EventSink::on_error`].
/// Every exit path ends with [`Dispatcher::finish`].
pub async fn run_reader<R>(stdout: R, dispatcher: Dispatcher, cancel: CancellationToken)
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stdout, AcpCodec::new());

    let reason = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("acp reader: cancellation received, stopping");
                break "reader cancelled".to_owned();
            }

            item = framed.next() => match item {
                None => {
                    debug!("acp reader: EOF detected");
                    break "stream closed".to_owned();
                }
                Some(Ok(Err(e))) => {
                    warn!(error = %e, "acp reader: framing error, skipping line");
                }
                Some(Ok(Ok(line))) => dispatcher.dispatch_line(&line).await,
                Some(Err(e)) => {
                    warn!(error = %e, "acp reader: IO error, stopping");
                    dispatcher.session.transition(SessionPhase::Failed);
                    dispatcher.sink.on_error(&format!("stream error: {e}"));
                    break format!("stream error: {e}");
                }
            }
        }
    };

    dispatcher.finish(&reason);
}
