//! Incremental decoding of the DAP byte stream.
//!
//! Raw read chunks arrive with no relationship to message boundaries: a
//! chunk may hold half a header, several whole messages, or the tail of one
//! body plus the start of the next. [`FrameDecoder`] accumulates bytes
//! across reads and drains every complete message as soon as it is present,
//! resynchronizing on malformed framing instead of losing stream position.

use bytes::BytesMut;

use crate::error::TransportError;
use crate::framing::{parse_content_length, HEADER_TERMINATOR};
use crate::protocol::ProtocolMessage;

/// Default cap on unconsumed buffered bytes (16 MiB).
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// One item produced by a [`FrameDecoder::feed`] call, in stream order.
#[derive(Debug)]
pub enum Decoded {
    /// A complete, parsed protocol message.
    Message(ProtocolMessage),
    /// A recoverable decode error. The decoder has already advanced past
    /// the offending bytes; subsequent messages still decode.
    Error(TransportError),
}

/// Incremental byte-stream → message decoder.
///
/// Owns the partial-buffer state between reads. Mutated only from the
/// stream's delivery path; reset only on connection close.
#[derive(Debug)]
pub struct FrameDecoder {
    /// Accumulated bytes not yet consumed.
    buffer: BytesMut,
    /// Body length from the last parsed header; `None` until a complete
    /// header block has been consumed.
    content_length: Option<usize>,
    max_buffer_size: usize,
}

impl FrameDecoder {
    /// Create a decoder with the default buffer cap.
    pub fn new() -> Self {
        Self::with_max_buffer(DEFAULT_MAX_BUFFER_SIZE)
    }

    /// Create a decoder with a custom cap on unconsumed bytes.
    pub fn with_max_buffer(max_buffer_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            content_length: None,
            max_buffer_size,
        }
    }

    /// Consume newly arrived bytes and return every item now complete,
    /// oldest first. Incomplete trailing data stays buffered for the next
    /// call.
    ///
    /// Recoverable problems (bad header, unparseable body) are returned
    /// in-band as [`Decoded::Error`] so their position relative to
    /// surrounding messages is preserved. The outer `Err` is reserved for
    /// the fatal case: the unconsumed buffer (or a declared body length)
    /// exceeding the configured cap, after which the connection must close.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Decoded>, TransportError> {
        self.buffer.extend_from_slice(chunk);

        let mut out = Vec::new();
        loop {
            match self.content_length {
                None => {
                    // Await a complete header block. The block is parsed
                    // before being consumed so resynchronization can still
                    // see inside it when parsing fails.
                    let Some(idx) = find(&self.buffer, HEADER_TERMINATOR) else {
                        break;
                    };
                    let header = String::from_utf8_lossy(&self.buffer[..idx]);
                    match parse_content_length(&header) {
                        Ok(len) if len > self.max_buffer_size => {
                            return Err(TransportError::BufferOverflow {
                                size: len,
                                limit: self.max_buffer_size,
                            });
                        }
                        Ok(len) => {
                            let _ = self.buffer.split_to(idx + HEADER_TERMINATOR.len());
                            self.content_length = Some(len);
                        }
                        Err(err) => {
                            tracing::warn!(%err, "malformed header, resynchronizing");
                            self.resynchronize(idx);
                            out.push(Decoded::Error(err));
                        }
                    }
                }
                Some(len) => {
                    if self.buffer.len() < len {
                        break;
                    }
                    // Exactly the declared bytes are the body; the framing
                    // stays valid even when the payload does not parse.
                    let body = self.buffer.split_to(len);
                    self.content_length = None;
                    match serde_json::from_slice::<ProtocolMessage>(&body) {
                        Ok(msg) => out.push(Decoded::Message(msg)),
                        Err(e) => out.push(Decoded::Error(TransportError::Decode(format!(
                            "invalid message body: {e}"
                        )))),
                    }
                }
            }
        }

        if self.buffer.len() > self.max_buffer_size {
            return Err(TransportError::BufferOverflow {
                size: self.buffer.len(),
                limit: self.max_buffer_size,
            });
        }
        Ok(out)
    }

    /// Number of unconsumed buffered bytes.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clear all buffered data and parsing state (connection close).
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.content_length = None;
    }

    /// Recover alignment after a malformed header block ending at
    /// `block_end` (the terminator position; the block is still buffered).
    ///
    /// The block may be a real header glued behind non-protocol noise, such
    /// as a bare-LF log line the adapter wrote to the same stream, so the
    /// scan for the next `Content-Length` occurrence starts one byte in and
    /// covers the block itself; only the bytes before the occurrence are
    /// dropped. With no later occurrence anywhere in the buffer, the block
    /// is dropped through its terminator.
    fn resynchronize(&mut self, block_end: usize) {
        if let Some(idx) = find(&self.buffer[1..], b"Content-Length") {
            let _ = self.buffer.split_to(idx + 1);
        } else {
            let _ = self.buffer.split_to(block_end + HEADER_TERMINATOR.len());
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
