//! Agent Client Protocol (ACP) engine.
//!
//! Drives one Gemini CLI agent process over line-delimited JSON-RPC 2.0 on
//! its stdin/stdout. A session owns a pair of tasks talking to the agent's
//! stdio:
//!
//! - `codec`: newline framing that skips bad lines instead of failing.
//! - `message`: JSON-RPC envelope encoding and inbound classification.
//! - `spawner`: process spawning and grace-period shutdown.
//! - `writer`: serialized writes to the agent's stdin.
//! - `reader`: the read-loop and its message dispatch.
//! - `handshake`: method names and parameter builders.
//! - `latch`: one-shot signals for the handshake steps.
//! - `session`: session id, readiness and lifecycle phase.
//! - `fs_proxy`: agent-initiated file reads and writes.
//! - `permission`: permission requests and their answers.
//! - `client`: the engine tying the above together.

pub mod client;
pub mod codec;
pub mod fs_proxy;
pub mod handshake;
pub mod latch;
pub mod message;
pub mod permission;
pub mod reader;
pub mod session;
pub mod spawner;
pub mod writer;

pub use client::{AcpClient, ClientOptions};
pub use session::SessionPhase;
