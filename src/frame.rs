//! Stream adaptor from raw transport chunks to decoded messages.
//!
//! Both directions read an unbounded body: the client reads the GET response,
//! the server reads the POST request. Each chunk is fed to a
//! [`frames::FrameDecoder`]; malformed lines are logged and dropped, while a
//! transport failure is yielded once and ends the stream.

use std::collections::VecDeque;
use std::pin::Pin;

use futures::{Stream, StreamExt, stream};
use serde_json::Value;
use tracing::{debug, warn};

use frames::FrameDecoder;

struct DecodeState<S> {
    chunks: Pin<Box<S>>,
    decoder: FrameDecoder<Value>,
    ready: VecDeque<Value>,
    failed: bool,
}

/// Decode a stream of byte chunks into a stream of messages.
///
/// Messages are yielded in arrival order. The returned stream ends when the
/// chunk source ends (an incomplete trailing frame is discarded) or after
/// yielding the first transport error. It is single-use.
pub fn decode_stream<S, B, E>(chunks: S) -> impl Stream<Item = Result<Value, E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    let state = DecodeState {
        chunks: Box::pin(chunks),
        decoder: FrameDecoder::new(),
        ready: VecDeque::new(),
        failed: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(message) = state.ready.pop_front() {
                return Some((Ok(message), state));
            }
            if state.failed {
                return None;
            }

            match state.chunks.next().await {
                Some(Ok(chunk)) => {
                    for result in state.decoder.push(chunk.as_ref()) {
                        match result {
                            Ok(message) => state.ready.push_back(message),
                            Err(e) => warn!(error = %e, "dropping malformed frame"),
                        }
                    }
                }
                Some(Err(e)) => {
                    state.failed = true;
                    return Some((Err(e), state));
                }
                None => {
                    let DecodeState { decoder, .. } = state;
                    if let Some(tail) = decoder.finish() {
                        debug!(bytes = tail.len(), "discarding incomplete trailing frame");
                    }
                    return None;
                }
            }
        }
    })
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;
