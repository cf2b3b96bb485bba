//! Callback sink between the protocol engine and its host.
//!
//! The engine reports protocol events through an [`EventSink`]. Hooks run on
//! the engine's read-loop task (or write-loop, for write failures), never on
//! a host UI thread, so implementations must be `Send + Sync` and should
//! hand work off rather than block.
//!
//! Hosts that prefer a stream can pass an
//! `mpsc::UnboundedSender<AgentEvent>` directly; it implements the trait.

use tokio::sync::mpsc;
use tracing::debug;

use crate::acp::message::RequestId;
use crate::acp::permission::PermissionRequest;

/// Named hooks invoked by the engine.
pub trait EventSink: Send + Sync {
    /// A chunk of the agent's reply.
    fn on_message(&self, text: &str);

    /// A chunk of the agent's reasoning.
    fn on_thought(&self, text: &str);

    /// Launch, transport or protocol error, rendered as text.
    fn on_error(&self, text: &str);

    /// A prompt turn finished.
    fn on_stop(&self, request_id: &RequestId, stop_reason: &str);

    /// The agent asks the user to pick an option before a tool call runs.
    fn on_permission_request(&self, request: PermissionRequest);

    /// The handshake completed and prompts can flow.
    fn on_session_ready(&self);

    /// The agent process is gone. Fired exactly once per started engine.
    fn on_exit(&self);
}

/// Engine events as values.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// See [`EventSink::on_message`].
    Message {
        /// Chunk text.
        text: String,
    },
    /// See [`EventSink::on_thought`].
    Thought {
        /// Chunk text.
        text: String,
    },
    /// See [`EventSink::on_error`].
    Error {
        /// Rendered error.
        message: String,
    },
    /// See [`EventSink::on_stop`].
    Stopped {
        /// Id of the prompt request that finished.
        request_id: RequestId,
        /// Agent-reported stop reason (`end_turn`, `cancelled`, …).
        stop_reason: String,
    },
    /// See [`EventSink::on_permission_request`].
    PermissionRequested(PermissionRequest),
    /// See [`EventSink::on_session_ready`].
    SessionReady,
    /// See [`EventSink::on_exit`].
    Exited,
}

impl EventSink for mpsc::UnboundedSender<AgentEvent> {
    fn on_message(&self, text: &str) {
        deliver(
            self,
            AgentEvent::Message {
                text: text.to_owned(),
            },
        );
    }

    fn on_thought(&self, text: &str) {
        deliver(
            self,
            AgentEvent::Thought {
                text: text.to_owned(),
            },
        );
    }

    fn on_error(&self, text: &str) {
        deliver(
            self,
            AgentEvent::Error {
                message: text.to_owned(),
            },
        );
    }

    fn on_stop(&self, request_id: &RequestId, stop_reason: &str) {
        deliver(
            self,
            AgentEvent::Stopped {
                request_id: request_id.clone(),
                stop_reason: stop_reason.to_owned(),
            },
        );
    }

    fn on_permission_request(&self, request: PermissionRequest) {
        deliver(self, AgentEvent::PermissionRequested(request));
    }

    fn on_session_ready(&self) {
        deliver(self, AgentEvent::SessionReady);
    }

    fn on_exit(&self) {
        deliver(self, AgentEvent::Exited);
    }
}

fn deliver(tx: &mpsc::UnboundedSender<AgentEvent>, event: AgentEvent) {
    if let Err(err) = tx.send(event) {
        debug!(event = ?err.0, "event receiver dropped, discarding event");
    }
}
