//! Line framing for the agent's stdio streams.
//!
//! ACP messages travel as one compact JSON document per `\n`-terminated
//! UTF-8 line. [`AcpCodec`] splits inbound bytes on `\n` with an upper bound
//! on the line length so a runaway agent cannot make the read-loop buffer
//! without limit.
//!
//! A bad line never poisons the stream. Over-long lines and lines that are
//! not valid UTF-8 come out as an `Err` frame and decoding carries on with
//! the next line; only I/O failures surface as the decoder's error.
//!
//! ```rust,ignore
//! use tokio_util::codec::FramedRead;
//! use gemini_acp::acp::codec::AcpCodec;
//!
//! let lines = FramedRead::new(child_stdout, AcpCodec::new());
//! ```

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{AppError, Result};

/// Maximum inbound line length: 1 MiB.
///
/// Longer lines are discarded by the decoder and reported as an
/// [`AppError::Decode`] frame; the stream stays usable afterwards.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// One inbound line, or the reason it was skipped.
pub type Frame = std::result::Result<String, AppError>;

/// Newline-delimited framing used in both directions.
///
/// Decoding yields each line without its terminator (a trailing `\r` is
/// stripped as well). Encoding appends `\n`. Callers must hand the encoder
/// single-line text; [`crate::acp::message`] guarantees that for every
/// message it produces.
#[derive(Debug)]
pub struct AcpCodec {
    max_length: usize,
    /// Bytes of `src` already searched for `\n`.
    next_index: usize,
    /// Inside an over-long line, dropping bytes until its `\n`.
    discarding: bool,
}

impl AcpCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom line limit.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }

    fn too_long(&self) -> AppError {
        AppError::Decode(format!("line too long: exceeded {} bytes", self.max_length))
    }
}

impl Default for AcpCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for AcpCodec {
    type Item = Frame;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        loop {
            let read_to = src.len().min(self.max_length.saturating_add(1));
            let newline = src[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.next_index + offset);

            match (self.discarding, newline) {
                (true, Some(end)) => {
                    src.advance(end + 1);
                    self.discarding = false;
                    self.next_index = 0;
                    return Ok(Some(Err(self.too_long())));
                }
                (true, None) => {
                    src.advance(read_to);
                    self.next_index = 0;
                    if src.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(end)) => {
                    self.next_index = 0;
                    let line = src.split_to(end + 1);
                    return Ok(Some(to_text(&line[..end])));
                }
                (false, None) if src.len() > self.max_length => {
                    self.discarding = true;
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        self.next_index = 0;
        if self.discarding {
            self.discarding = false;
            src.clear();
            return Ok(Some(Err(self.too_long())));
        }
        if src.is_empty() {
            return Ok(None);
        }
        let rest = src.split();
        Ok(Some(to_text(&rest)))
    }
}

impl Encoder<String> for AcpCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        // The length limit is a decoder-side concern only.
        dst.reserve(item.len() + 1);
        dst.put_slice(item.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

fn to_text(line: &[u8]) -> Frame {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    std::str::from_utf8(line)
        .map(str::to_owned)
        .map_err(|err| AppError::Decode(format!("line is not valid UTF-8: {err}")))
}
