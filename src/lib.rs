#![forbid(unsafe_code)]

//! Client engine for driving the Gemini CLI as an ACP agent.

pub mod acp;
pub mod config;
pub mod errors;
pub mod events;

pub use acp::{AcpClient, ClientOptions, SessionPhase};
pub use config::ClientConfig;
pub use errors::{AppError, Result};
pub use events::{AgentEvent, EventSink};
