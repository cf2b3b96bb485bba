//! Outbound request shapes for the ACP session lifecycle.
//!
//! The write-loop drives these in a fixed order:
//!
//! 1. **`initialize`**: protocol version plus the client's filesystem
//!    capabilities. Answered by a result carrying `agentCapabilities`.
//! 2. **`session/new`**: working directory and an empty MCP server list.
//!    Answered by a result carrying `sessionId`.
//! 3. **`session/prompt`**: any number, each bound to the captured session
//!    id. Answered by a result carrying `stopReason` once the turn ends.
//!
//! `session/cancel` may be sent at any point after step 2.

use std::path::Path;

use serde_json::{json, Value};

/// ACP protocol version announced in `initialize`.
pub const PROTOCOL_VERSION: u32 = 1;

/// `initialize` method name.
pub const INITIALIZE: &str = "initialize";
/// `session/new` method name.
pub const SESSION_NEW: &str = "session/new";
/// `session/prompt` method name.
pub const SESSION_PROMPT: &str = "session/prompt";
/// `session/cancel` method name.
pub const SESSION_CANCEL: &str = "session/cancel";

/// Filesystem capabilities the client advertises.
///
/// When both are `false` the agent is expected not to issue `fs/*`
/// requests; the client still answers them if it does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FsCapabilities {
    /// Client honours `fs/read_text_file`.
    pub read_text_file: bool,
    /// Client honours `fs/write_text_file`.
    pub write_text_file: bool,
}

/// Params for `initialize`.
#[must_use]
pub fn initialize_params(fs: FsCapabilities) -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "clientCapabilities": {
            "fs": {
                "readTextFile": fs.read_text_file,
                "writeTextFile": fs.write_text_file
            }
        }
    })
}

/// Params for `session/new`.
#[must_use]
pub fn session_new_params(cwd: &Path) -> Value {
    json!({
        "cwd": cwd.to_string_lossy(),
        "mcpServers": []
    })
}

/// Params for `session/prompt` carrying a single text block.
#[must_use]
pub fn prompt_params(session_id: &str, text: &str) -> Value {
    json!({
        "sessionId": session_id,
        "prompt": [{ "type": "text", "text": text }]
    })
}

/// Params for `session/cancel`.
#[must_use]
pub fn cancel_params(session_id: &str) -> Value {
    json!({ "sessionId": session_id })
}
