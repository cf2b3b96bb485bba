//! `session/request_permission` payloads and the selection response.
//!
//! The agent asks before running a tool call; the host answers by picking
//! one of the offered options. There is no decline variant: every
//! resolution selects an option, and "reject" is just another option id
//! chosen by the agent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::acp::message::RequestId;

/// One selectable answer to a permission request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOption {
    /// Opaque identifier echoed back when this option is chosen.
    pub option_id: String,
    /// Display label.
    #[serde(default)]
    pub name: String,
    /// Agent hint such as `allow_once` or `reject_always`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl PermissionOption {
    /// Label to show the user, falling back to the option id.
    #[must_use]
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.option_id
        } else {
            &self.name
        }
    }
}

/// Diff block inside an edit-kind tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffContent {
    /// File the edit targets.
    pub path: String,
    /// Current text; absent for new files.
    #[serde(default)]
    pub old_text: Option<String>,
    /// Proposed text.
    #[serde(default)]
    pub new_text: String,
}

impl DiffContent {
    /// Unified diff of the proposed edit, or an empty string when the old
    /// and new text are identical.
    #[must_use]
    pub fn unified(&self) -> String {
        let old = self.old_text.as_deref().unwrap_or("");
        if old == self.new_text {
            return String::new();
        }
        diffy::create_patch(old, &self.new_text).to_string()
    }
}

/// One content block of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolCallContent {
    /// Proposed file edit.
    Diff(DiffContent),
    /// Regular content block (text, image, …), kept verbatim.
    Content {
        /// The wrapped content block.
        #[serde(default)]
        content: Value,
    },
    /// Any block type this client does not know.
    #[serde(other)]
    Unknown,
}

/// Description of the tool call awaiting authorization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Agent-side id of the tool call.
    #[serde(default)]
    pub tool_call_id: Option<String>,
    /// Short human-readable title.
    #[serde(default)]
    pub title: Option<String>,
    /// Tool kind, e.g. `edit`, `read`, `execute`.
    #[serde(default)]
    pub kind: Option<String>,
    /// Ordered content blocks.
    #[serde(default)]
    pub content: Vec<ToolCallContent>,
}

impl ToolCall {
    /// Title, or `"Unknown tool"` when the agent sent none.
    #[must_use]
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("Unknown tool")
    }

    /// Whether this tool call edits a file.
    #[must_use]
    pub fn is_edit(&self) -> bool {
        self.kind.as_deref() == Some("edit")
    }

    /// First diff block of an edit-kind tool call.
    #[must_use]
    pub fn diff(&self) -> Option<&DiffContent> {
        if !self.is_edit() {
            return None;
        }
        self.content.iter().find_map(|block| match block {
            ToolCallContent::Diff(diff) => Some(diff),
            _ => None,
        })
    }
}

/// An agent-originated permission request.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionRequest {
    /// Id that must be echoed in the response.
    pub request_id: RequestId,
    /// Options to choose from.
    pub options: Vec<PermissionOption>,
    /// Tool call awaiting authorization.
    pub tool_call: ToolCall,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PermissionParams {
    #[serde(default)]
    options: Vec<PermissionOption>,
    #[serde(default)]
    tool_call: Option<ToolCall>,
}

impl PermissionRequest {
    /// Build a request from the raw `params` of `session/request_permission`.
    ///
    /// Missing members default to empty; a malformed payload yields an
    /// empty request rather than an error so the agent still gets an answer
    /// path.
    #[must_use]
    pub fn from_params(request_id: RequestId, params: &Value) -> Self {
        let parsed: PermissionParams =
            serde_json::from_value(params.clone()).unwrap_or_else(|e| {
                tracing::warn!(%request_id, error = %e, "malformed permission params");
                PermissionParams {
                    options: Vec::new(),
                    tool_call: None,
                }
            });

        Self {
            request_id,
            options: parsed.options,
            tool_call: parsed.tool_call.unwrap_or_default(),
        }
    }

    /// Whether `option_id` is one of the offered options.
    #[must_use]
    pub fn offers(&self, option_id: &str) -> bool {
        self.options.iter().any(|o| o.option_id == option_id)
    }
}

/// Result body of a permission response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionResponse {
    /// The chosen outcome.
    pub outcome: PermissionOutcome,
}

/// `{"outcome":"selected","optionId":…}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOutcome {
    /// Always `"selected"`.
    pub outcome: &'static str,
    /// The chosen option.
    pub option_id: String,
}

impl PermissionResponse {
    /// Select `option_id`.
    #[must_use]
    pub fn selected(option_id: impl Into<String>) -> Self {
        Self {
            outcome: PermissionOutcome {
                outcome: "selected",
                option_id: option_id.into(),
            },
        }
    }
}

/// Permission requests the host has not answered yet, keyed by request id.
///
/// The read-loop registers each request on receipt; answering removes it,
/// so a request is resolved at most once. Entries left when the session
/// ends are simply dropped.
#[derive(Debug, Clone, Default)]
pub struct PendingPermissions {
    inner: Arc<Mutex<HashMap<RequestId, PermissionRequest>>>,
}

impl PendingPermissions {
    /// Remember `request` until it is answered.
    pub fn register(&self, request: PermissionRequest) {
        self.lock().insert(request.request_id.clone(), request);
    }

    /// Remove and return the request with `id`.
    #[must_use]
    pub fn take(&self, id: &RequestId) -> Option<PermissionRequest> {
        self.lock().remove(id)
    }

    /// Put a request back after a failed answer.
    pub fn restore(&self, request: PermissionRequest) {
        self.register(request);
    }

    /// Whether `id` is awaiting an answer.
    #[must_use]
    pub fn contains(&self, id: &RequestId) -> bool {
        self.lock().contains_key(id)
    }

    /// Whether every request has been answered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RequestId, PermissionRequest>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
