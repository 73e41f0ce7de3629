//! Outbound message writing.
//!
//! Serializes outgoing messages, frames them with a Content-Length header,
//! and hands each one to the writer task as a single buffer so a message
//! hits the sink atomically.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::framing::encode_message;
use crate::protocol::{Event, ProtocolMessage, Request, Response};
use crate::seq::SequenceGenerator;

/// Writes framed messages to the connection's byte sink.
///
/// The sink itself is drained by the connection's writer task; this type
/// owns the sending half of that channel plus the connection's sequence
/// number source.
#[derive(Debug)]
pub struct TransportWriter {
    seq: Arc<SequenceGenerator>,
    tx: mpsc::Sender<Vec<u8>>,
}

impl TransportWriter {
    /// Create a writer over the given sequence source and outbound channel.
    pub fn new(seq: Arc<SequenceGenerator>, tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self { seq, tx }
    }

    /// Frame and send a request under an already-allocated sequence number.
    ///
    /// The caller allocates `seq` first so the pending entry can be
    /// registered before the bytes hit the wire; a response can therefore
    /// never race its own registration.
    pub async fn write_request(
        &self,
        seq: i64,
        command: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<(), TransportError> {
        let msg = ProtocolMessage::Request(Request {
            seq,
            command: command.to_string(),
            arguments,
        });
        self.write(&msg).await
    }

    /// Frame and send a complete response envelope for `request_seq`.
    ///
    /// Obtains a fresh `seq` for the outgoing envelope and carries all of
    /// `request_seq`, `success`, `body`, and `message`. Returns the
    /// envelope's sequence number.
    pub async fn write_response(
        &self,
        request_seq: i64,
        command: &str,
        success: bool,
        body: Option<serde_json::Value>,
        message: Option<String>,
    ) -> Result<i64, TransportError> {
        let seq = self.seq.next();
        let msg = ProtocolMessage::Response(Response {
            seq,
            request_seq,
            success,
            command: command.to_string(),
            message,
            body,
        });
        self.write(&msg).await?;
        Ok(seq)
    }

    /// Frame and send a locally-originated event.
    pub async fn write_event(
        &self,
        event: &str,
        body: Option<serde_json::Value>,
    ) -> Result<i64, TransportError> {
        let seq = self.seq.next();
        let msg = ProtocolMessage::Event(Event {
            seq,
            event: event.to_string(),
            body,
        });
        self.write(&msg).await?;
        Ok(seq)
    }

    async fn write(&self, msg: &ProtocolMessage) -> Result<(), TransportError> {
        let bytes = encode_message(msg)?;
        tracing::debug!(message = ?msg, len = bytes.len(), "sending message");
        self.tx
            .send(bytes)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::parse_content_length;

    fn writer() -> (TransportWriter, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(8);
        (TransportWriter::new(Arc::new(SequenceGenerator::new()), tx), rx)
    }

    /// Split a framed buffer into its JSON body, checking the declared
    /// length against the actual body bytes.
    fn unframe(bytes: &[u8]) -> serde_json::Value {
        let text = std::str::from_utf8(bytes).unwrap();
        let (header, body) = text.split_once("\r\n\r\n").unwrap();
        let declared = parse_content_length(header).unwrap();
        assert_eq!(declared, body.len(), "declared length must match body");
        serde_json::from_str(body).unwrap()
    }

    #[tokio::test]
    async fn writer_request_framed_with_exact_length() {
        let (writer, mut rx) = writer();
        writer
            .write_request(1, "evaluate", Some(serde_json::json!({"expression": "1+1"})))
            .await
            .unwrap();

        let bytes = rx.recv().await.unwrap();
        let body = unframe(&bytes);
        assert_eq!(body["type"], "request");
        assert_eq!(body["seq"], 1);
        assert_eq!(body["command"], "evaluate");
        assert_eq!(body["arguments"]["expression"], "1+1");
    }

    #[tokio::test]
    async fn writer_response_carries_complete_envelope() {
        let (writer, mut rx) = writer();
        let seq = writer
            .write_response(
                7,
                "runInTerminal",
                true,
                Some(serde_json::json!({"processId": 123})),
                None,
            )
            .await
            .unwrap();
        assert_eq!(seq, 1);

        let bytes = rx.recv().await.unwrap();
        let body = unframe(&bytes);
        assert_eq!(body["type"], "response");
        assert_eq!(body["seq"], 1);
        assert_eq!(body["request_seq"], 7);
        assert_eq!(body["success"], true);
        assert_eq!(body["command"], "runInTerminal");
        assert_eq!(body["body"]["processId"], 123);
    }

    #[tokio::test]
    async fn writer_failed_response_carries_message() {
        let (writer, mut rx) = writer();
        writer
            .write_response(3, "evaluate", false, None, Some("no such frame".into()))
            .await
            .unwrap();

        let bytes = rx.recv().await.unwrap();
        let body = unframe(&bytes);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "no such frame");
        assert!(body.get("body").is_none());
    }

    #[tokio::test]
    async fn writer_event_allocates_fresh_seq() {
        let (writer, mut rx) = writer();
        let a = writer.write_event("initialized", None).await.unwrap();
        let b = writer
            .write_event("output", Some(serde_json::json!({"output": "hi"})))
            .await
            .unwrap();
        assert!(b > a);

        let first = unframe(&rx.recv().await.unwrap());
        let second = unframe(&rx.recv().await.unwrap());
        assert_eq!(first["type"], "event");
        assert_eq!(first["event"], "initialized");
        assert_eq!(second["event"], "output");
    }

    #[tokio::test]
    async fn writer_closed_channel_reports_connection_closed() {
        let (writer, rx) = writer();
        drop(rx);
        let err = writer.write_request(1, "threads", None).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed));
    }
}
