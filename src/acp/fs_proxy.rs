//! Local filesystem proxy for agent-initiated `fs/*` requests.
//!
//! Handlers never fail outward: every problem becomes an [`RpcError`] that
//! the read-loop sends back to the agent. They run inline on the read-loop,
//! so a slow filesystem stalls protocol processing until they return.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::acp::message::RpcError;

/// Message sent when a request omits `path`.
pub const MISSING_PATH: &str = "Missing 'path' parameter";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadParams {
    path: Option<String>,
    /// 1-based first line to return.
    line: Option<usize>,
    /// Maximum number of lines to return.
    limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WriteParams {
    path: Option<String>,
    #[serde(default)]
    content: String,
}

/// Result of a successful `fs/read_text_file`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadTextFileResponse {
    /// File text (or the requested line window).
    pub content: String,
}

/// Result of a successful `fs/write_text_file`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteTextFileResponse {
    /// Always `true`.
    pub success: bool,
}

/// Serves `fs/read_text_file` and `fs/write_text_file`.
///
/// Relative paths are resolved against `base`, the session's working
/// directory.
#[derive(Debug, Clone)]
pub struct FsProxy {
    base: PathBuf,
}

impl FsProxy {
    /// Create a proxy resolving relative paths against `base`.
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Handle `fs/read_text_file`.
    ///
    /// # Errors
    ///
    /// Returns an internal-error [`RpcError`] when `path` is missing or the
    /// file cannot be read as UTF-8 text.
    pub async fn read_text_file(
        &self,
        params: &Value,
    ) -> std::result::Result<ReadTextFileResponse, RpcError> {
        let params: ReadParams = parse_params(params)?;
        let path = self.resolve(params.path.as_deref())?;
        debug!(path = %path.display(), "fs/read_text_file");

        let text = tokio::fs::read_to_string(&path).await.map_err(|e| {
            warn!(path = %path.display(), error = %e, "fs proxy: read failed");
            RpcError::internal(format!("{}: {e}", path.display()))
        })?;

        let content = slice_lines(&text, params.line, params.limit);
        info!(path = %path.display(), bytes = content.len(), "fs proxy: file read");
        Ok(ReadTextFileResponse { content })
    }

    /// Handle `fs/write_text_file`, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an internal-error [`RpcError`] when `path` is missing or the
    /// directories or file cannot be written.
    pub async fn write_text_file(
        &self,
        params: &Value,
    ) -> std::result::Result<WriteTextFileResponse, RpcError> {
        let params: WriteParams = parse_params(params)?;
        let path = self.resolve(params.path.as_deref())?;
        debug!(path = %path.display(), "fs/write_text_file");

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                warn!(path = %parent.display(), error = %e, "fs proxy: mkdir failed");
                RpcError::internal(format!("{}: {e}", parent.display()))
            })?;
        }

        tokio::fs::write(&path, params.content.as_bytes())
            .await
            .map_err(|e| {
                warn!(path = %path.display(), error = %e, "fs proxy: write failed");
                RpcError::internal(format!("{}: {e}", path.display()))
            })?;

        info!(path = %path.display(), bytes = params.content.len(), "fs proxy: file written");
        Ok(WriteTextFileResponse { success: true })
    }

    fn resolve(&self, raw: Option<&str>) -> std::result::Result<PathBuf, RpcError> {
        let raw = raw
            .filter(|p| !p.is_empty())
            .ok_or_else(|| RpcError::internal(MISSING_PATH))?;
        let path = Path::new(raw);
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            Ok(self.base.join(path))
        }
    }
}

fn parse_params<T>(params: &Value) -> std::result::Result<T, RpcError>
where
    T: for<'de> Deserialize<'de> + Default,
{
    if params.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(params.clone())
        .map_err(|e| RpcError::internal(format!("invalid params: {e}")))
}

/// Apply the optional 1-based `line` / `limit` window, keeping line endings.
fn slice_lines(text: &str, line: Option<usize>, limit: Option<usize>) -> String {
    if line.is_none() && limit.is_none() {
        return text.to_owned();
    }
    let skip = line.unwrap_or(1).saturating_sub(1);
    let take = limit.unwrap_or(usize::MAX);
    text.split_inclusive('\n').skip(skip).take(take).collect()
}
