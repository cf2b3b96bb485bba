//! Serialized write side of the agent's stdin.
//!
//! Two flows write to the agent: the write-loop (handshake, prompts,
//! cancel) and the read-loop (fs proxy and permission responses). Both go
//! through one [`OutboundWriter`], whose async mutex keeps every line
//! intact on the single underlying stream.

use std::sync::Arc;

use futures_util::SinkExt;
use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tokio_util::codec::FramedWrite;
use tracing::{debug, warn};

use crate::acp::codec::AcpCodec;
use crate::acp::message::{self, RequestId};
use crate::{AppError, Result};

type LineSink = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, AcpCodec>;

/// Shared, cloneable handle to the agent's stdin.
#[derive(Clone)]
pub struct OutboundWriter {
    sink: Arc<Mutex<Option<LineSink>>>,
}

impl std::fmt::Debug for OutboundWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundWriter").finish_non_exhaustive()
    }
}

impl OutboundWriter {
    /// Wrap the write half of the transport.
    pub fn new<W>(stdin: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let boxed: Box<dyn AsyncWrite + Send + Unpin> = Box::new(stdin);
        Self {
            sink: Arc::new(Mutex::new(Some(FramedWrite::new(boxed, AcpCodec::new())))),
        }
    }

    /// Write one line and flush it.
    ///
    /// # Errors
    ///
    /// [`AppError::Acp`] when the writer was closed or the write fails
    /// (e.g. the agent exited and the pipe is broken).
    pub async fn write_line(&self, line: String) -> Result<()> {
        let mut guard = self.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            return Err(AppError::Acp("write failed: stream closed".into()));
        };
        debug!(line = line.as_str(), "acp writer: sending");
        sink.send(line).await.map_err(|e| {
            warn!(error = %e, "acp writer: write to stdin failed");
            AppError::Acp(format!("write failed: {e}"))
        })
    }

    /// Encode and write a request.
    ///
    /// # Errors
    ///
    /// See [`OutboundWriter::write_line`].
    pub async fn send_request(&self, id: i64, method: &str, params: Option<&Value>) -> Result<()> {
        self.write_line(message::encode_request(id, method, params)?)
            .await
    }

    /// Encode and write a success response.
    ///
    /// # Errors
    ///
    /// See [`OutboundWriter::write_line`].
    pub async fn send_response<T: Serialize>(&self, id: &RequestId, result: &T) -> Result<()> {
        self.write_line(message::encode_response(id, Some(result))?)
            .await
    }

    /// Encode and write an error response.
    ///
    /// # Errors
    ///
    /// See [`OutboundWriter::write_line`].
    pub async fn send_error(&self, id: &RequestId, code: i64, text: &str) -> Result<()> {
        self.write_line(message::encode_error_response(id, code, text)?)
            .await
    }

    /// Flush and shut down the write side. Idempotent.
    ///
    /// The agent sees EOF on its stdin, which is its cue to exit.
    ///
    /// # Errors
    ///
    /// [`AppError::Acp`] if the final flush or shutdown fails.
    pub async fn close(&self) -> Result<()> {
        let Some(mut sink) = self.sink.lock().await.take() else {
            return Ok(());
        };
        debug!("acp writer: closing stdin");
        sink.close()
            .await
            .map_err(|e| AppError::Acp(format!("close failed: {e}")))
    }

    /// Whether [`OutboundWriter::close`] has run.
    pub async fn is_closed(&self) -> bool {
        self.sink.lock().await.is_none()
    }
}
