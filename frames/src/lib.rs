//! Newline-delimited JSON frame codec shared by the server and client halves.
//!
//! A frame is the compact JSON encoding of one message followed by a single
//! `\n`. Compact `serde_json` output escapes every newline inside strings, so
//! an encoded payload never carries a literal line break.
//!
//! Transport chunks do not respect frame boundaries. [`FrameDecoder`] buffers
//! raw bytes (not text) so both frames and multi-byte UTF-8 sequences may be
//! split anywhere.

use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Byte terminating every frame on the wire.
pub const FRAME_DELIMITER: u8 = b'\n';

/// Error returned by [`encode`] and [`decode_line`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The message could not be serialized to JSON.
    #[error("failed to serialize message: {0}")]
    Serialize(#[source] serde_json::Error),
    /// A complete line was not valid JSON for the requested type.
    #[error("failed to decode frame: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Encode a message into a single newline-terminated frame.
///
/// # Errors
///
/// Returns [`CodecError::Serialize`] if the message cannot be represented as
/// JSON (for example a map with non-string keys).
pub fn encode<T>(message: &T) -> Result<Vec<u8>, CodecError>
where
    T: Serialize + ?Sized,
{
    let mut out = serde_json::to_vec(message).map_err(CodecError::Serialize)?;
    out.push(FRAME_DELIMITER);
    Ok(out)
}

/// Decode one line (without its delimiter) into a message.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] if the line is not valid JSON for `T`.
pub fn decode_line<T>(line: &[u8]) -> Result<T, CodecError>
where
    T: DeserializeOwned,
{
    serde_json::from_slice(line).map_err(CodecError::Decode)
}

/// Incremental decoder for a stream of frames arriving in arbitrary chunks.
///
/// Each call to [`FrameDecoder::push`] yields one result per complete line.
/// The trailing partial line stays buffered until a later chunk completes it.
#[derive(Debug)]
pub struct FrameDecoder<T = Value> {
    buffer: Vec<u8>,
    _message: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> FrameDecoder<T> {
    #[must_use]
    pub fn new() -> Self {
        Self { buffer: Vec::new(), _message: PhantomData }
    }

    /// Append a chunk and decode every line it completes, in arrival order.
    ///
    /// Blank and whitespace-only lines are skipped. A line that fails to
    /// decode produces an `Err` item; later lines are unaffected.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<T, CodecError>> {
        let Some(last) = chunk.iter().rposition(|b| *b == FRAME_DELIMITER) else {
            self.buffer.extend_from_slice(chunk);
            return Vec::new();
        };

        // Only the new chunk is scanned; the buffer never holds a delimiter.
        let split_at = self.buffer.len() + last + 1;
        self.buffer.extend_from_slice(chunk);
        let rest = self.buffer.split_off(split_at);
        let complete = std::mem::replace(&mut self.buffer, rest);

        complete
            .split(|b| *b == FRAME_DELIMITER)
            .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
            .map(decode_line)
            .collect()
    }

    /// Number of bytes held for an incomplete trailing line.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Consume the decoder, returning any incomplete trailing bytes.
    ///
    /// The bytes are returned for diagnostics only; a frame without its
    /// delimiter is never decoded.
    #[must_use]
    pub fn finish(self) -> Option<Vec<u8>> {
        if self.buffer.iter().all(u8::is_ascii_whitespace) { None } else { Some(self.buffer) }
    }
}

impl<T: DeserializeOwned> Default for FrameDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
