//! Session identity and the engine's lifecycle state machine.
//!
//! ```text
//! NotStarted → Initializing → SessionCreating → Ready → Closing → Closed
//!      └──────────────┴───────────────┴────────────┴────────┴──→ Failed
//! ```
//!
//! Phases only move forward. `Closed` and `Failed` are terminal.
//!
//! The read-loop is the only writer of the session id and readiness; the
//! write-loop reads them. Both live behind locks so the hand-off is visible
//! across tasks running on different threads.

use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use tracing::{debug, info};

use crate::acp::latch::Latch;

/// Lifecycle phase of an engine's single session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Engine constructed, no process yet.
    NotStarted,
    /// Process spawned, `initialize` in flight.
    Initializing,
    /// `session/new` in flight.
    SessionCreating,
    /// Session id captured; prompts flow.
    Ready,
    /// `stop()` requested; draining and shutting the process down.
    Closing,
    /// Process gone.
    Closed,
    /// Unrecoverable error.
    Failed,
}

impl SessionPhase {
    fn rank(self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::Initializing => 1,
            Self::SessionCreating => 2,
            Self::Ready => 3,
            Self::Closing => 4,
            Self::Closed => 5,
            Self::Failed => 6,
        }
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

impl Display for SessionPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotStarted => "not_started",
            Self::Initializing => "initializing",
            Self::SessionCreating => "session_creating",
            Self::Ready => "ready",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One conversation with the agent process.
#[derive(Debug)]
pub struct Session {
    working_directory: PathBuf,
    session_id: RwLock<String>,
    phase: Mutex<SessionPhase>,
    initialized: Latch,
    ready: Latch,
    next_id: AtomicI64,
}

impl Session {
    /// Create a session bound to `working_directory`.
    #[must_use]
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self {
            working_directory: working_directory.into(),
            session_id: RwLock::new(String::new()),
            phase: Mutex::new(SessionPhase::NotStarted),
            initialized: Latch::new(),
            ready: Latch::new(),
            next_id: AtomicI64::new(1),
        }
    }

    /// Working directory sent with `session/new`.
    #[must_use]
    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    /// Agent-assigned session id; empty until `session/new` is answered.
    #[must_use]
    pub fn session_id(&self) -> String {
        self.session_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the `initialize` result has been seen.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.is_open()
    }

    /// Whether the session id has been captured.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.is_open()
    }

    /// Signal opened by [`Session::mark_initialized`].
    #[must_use]
    pub fn initialized_signal(&self) -> &Latch {
        &self.initialized
    }

    /// Signal opened by [`Session::capture_session_id`].
    #[must_use]
    pub fn ready_signal(&self) -> &Latch {
        &self.ready
    }

    /// Record that `initialize` succeeded. Returns `false` if already recorded.
    pub fn mark_initialized(&self) -> bool {
        self.initialized.open()
    }

    /// Capture the session id and move to [`SessionPhase::Ready`].
    ///
    /// Only the first call has any effect; it returns `true`. Later calls
    /// leave the stored id untouched and return `false`.
    pub fn capture_session_id(&self, id: &str) -> bool {
        {
            let mut current = self
                .session_id
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if self.ready.is_open() {
                debug!(
                    session_id = current.as_str(),
                    ignored = id,
                    "session id already captured"
                );
                return false;
            }
            id.clone_into(&mut *current);
            self.ready.open();
        }
        self.transition(SessionPhase::Ready);
        true
    }

    /// Allocate the next outbound request id. Ids start at 1.
    pub fn next_request_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `next` if that is a forward step.
    ///
    /// `Failed` is reachable from every non-terminal phase; other phases
    /// only advance. Returns whether the phase changed.
    pub fn transition(&self, next: SessionPhase) -> bool {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        let current = *phase;
        let allowed = !current.is_terminal()
            && (next == SessionPhase::Failed || next.rank() > current.rank());
        if allowed {
            *phase = next;
            info!(from = %current, to = %next, "session phase changed");
        } else {
            debug!(from = %current, to = %next, "session phase change ignored");
        }
        allowed
    }
}
