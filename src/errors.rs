//! Error types shared across the client.

use std::fmt::{Display, Formatter};

/// Shared client result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Client error enumeration covering all failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Agent executable missing or could not be spawned.
    Launch(String),
    /// ACP stream or protocol failure.
    Acp(String),
    /// An inbound line could not be classified as a JSON-RPC message.
    Decode(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// The engine no longer accepts input.
    QueueClosed(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Launch(msg) => write!(f, "launch: {msg}"),
            Self::Acp(msg) => write!(f, "acp: {msg}"),
            Self::Decode(msg) => write!(f, "decode: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::QueueClosed(msg) => write!(f, "queue closed: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
