//! Pending-request tracking and response correlation.
//!
//! Maps outbound request sequence numbers to the oneshot slots their
//! responses are delivered on. Responses may arrive in any order relative to
//! request send order; correlation is by `request_seq`, never arrival order.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use crate::error::TransportError;
use crate::protocol::Response;

/// The outcome delivered to a waiting `send_request` caller.
pub type ResponseResult = Result<Response, TransportError>;

/// A single outstanding request awaiting its response.
#[derive(Debug)]
struct PendingRequest {
    command: String,
    sent_at: Instant,
    tx: oneshot::Sender<ResponseResult>,
}

/// Maps outbound request sequence numbers to pending response slots.
///
/// Owns the pending set exclusively; entries are created on registration and
/// destroyed on matching response, timeout, cancellation, or connection
/// close — each exactly once.
#[derive(Debug, Default)]
pub struct RequestCorrelator {
    pending: HashMap<i64, PendingRequest>,
}

impl RequestCorrelator {
    /// Create an empty correlator.
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    /// Register an outstanding request and return the receiver its response
    /// will arrive on.
    pub fn register(&mut self, seq: i64, command: &str) -> oneshot::Receiver<ResponseResult> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            seq,
            PendingRequest {
                command: command.to_string(),
                sent_at: Instant::now(),
                tx,
            },
        );
        rx
    }

    /// How many requests are outstanding.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Route a response to the request that caused it.
    ///
    /// A response is consumed exactly once: when no entry matches
    /// `request_seq` (never sent, already answered, cancelled, or timed
    /// out) the unmatched-response error is returned for the caller to
    /// report; the connection remains usable.
    pub fn resolve(&mut self, response: Response) -> Result<(), TransportError> {
        let Some(entry) = self.pending.remove(&response.request_seq) else {
            return Err(TransportError::UnmatchedResponse {
                request_seq: response.request_seq,
            });
        };

        let outcome = if response.success {
            Ok(response)
        } else {
            let message = response
                .message
                .unwrap_or_else(|| format!("request '{}' failed", entry.command));
            Err(TransportError::Rejected { message })
        };
        // A dropped receiver means the caller gave up; nothing to deliver.
        let _ = entry.tx.send(outcome);
        Ok(())
    }

    /// Remove a pending request, failing a still-waiting future with a
    /// cancellation error.
    ///
    /// A response that arrives afterwards is reported as unmatched.
    /// Cancellation never touches the underlying stream.
    pub fn cancel(&mut self, seq: i64) -> bool {
        match self.pending.remove(&seq) {
            Some(entry) => {
                let _ = entry.tx.send(Err(TransportError::Cancelled {
                    command: entry.command,
                }));
                true
            }
            None => false,
        }
    }

    /// Fail every entry older than `deadline` with a timeout error.
    ///
    /// Returns the number of expired entries. Other pending entries are
    /// unaffected.
    pub fn sweep_timeouts(&mut self, deadline: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<i64> = self
            .pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.sent_at) >= deadline)
            .map(|(seq, _)| *seq)
            .collect();
        for seq in &expired {
            if let Some(entry) = self.pending.remove(seq) {
                tracing::debug!(seq, command = %entry.command, "request timed out");
                let _ = entry.tx.send(Err(TransportError::Timeout {
                    command: entry.command,
                }));
            }
        }
        expired.len()
    }

    /// Fail every outstanding entry with `ConnectionClosed`.
    ///
    /// Connection close path: guarantees no caller is left waiting on a
    /// dead connection.
    pub fn reject_all(&mut self) {
        for (_, entry) in self.pending.drain() {
            let _ = entry.tx.send(Err(TransportError::ConnectionClosed));
        }
    }
}
