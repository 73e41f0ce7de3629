//! Transport error types.

use thiserror::Error;

/// Errors from the DAP transport layer.
///
/// Decode-level and unmatched-response errors are recoverable and reach the
/// host only through the error subscriber; request-specific errors travel
/// through that request's own future and nowhere else.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Malformed header or unparseable message body. Non-fatal; the decoder
    /// resynchronizes and the connection stays usable.
    #[error("decode error: {0}")]
    Decode(String),

    /// The unconsumed decode buffer exceeded the configured cap. Fatal; the
    /// connection closes.
    #[error("decode buffer overflow: {size} bytes buffered, limit is {limit}")]
    BufferOverflow {
        /// Bytes currently buffered (or declared by the offending header).
        size: usize,
        /// The configured cap.
        limit: usize,
    },

    /// A response referenced a request that is not (or no longer) pending:
    /// already answered, cancelled, timed out, or never sent.
    #[error("no pending request matches request_seq {request_seq}")]
    UnmatchedResponse {
        /// The `request_seq` the response carried.
        request_seq: i64,
    },

    /// A second response was attempted for an already-answered request.
    /// Nothing is written to the wire.
    #[error("request {request_seq} has already been answered")]
    DuplicateResponse {
        /// The inbound request sequence number.
        request_seq: i64,
    },

    /// The adapter answered with `success = false`.
    #[error("adapter rejected request: {message}")]
    Rejected {
        /// The adapter's error message.
        message: String,
    },

    /// A pending request exceeded its deadline.
    #[error("request timed out: {command}")]
    Timeout {
        /// The command that timed out.
        command: String,
    },

    /// A pending request was cancelled locally before its response arrived.
    #[error("request cancelled: {command}")]
    Cancelled {
        /// The command that was cancelled.
        command: String,
    },

    /// The connection has been closed; no further sends are possible.
    #[error("connection closed")]
    ConnectionClosed,

    /// Stream I/O failure.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An outbound message could not be serialized.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
