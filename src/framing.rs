//! Content-Length wire framing.
//!
//! The DAP wire format is a text header terminated by `\r\n\r\n` followed by
//! exactly `Content-Length` bytes of UTF-8 JSON. Messages concatenate
//! back-to-back with no separator beyond the next header.

use crate::error::TransportError;
use crate::protocol::ProtocolMessage;

/// The header/body separator.
pub(crate) const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Serialize a message and wrap it with its Content-Length header.
///
/// The declared length is the exact byte length of the JSON body; nothing
/// trails beyond it.
pub fn encode_message(msg: &ProtocolMessage) -> Result<Vec<u8>, TransportError> {
    let body = serde_json::to_string(msg)?;
    Ok(frame_body(body.as_bytes()))
}

/// Frame a raw JSON body with a Content-Length header.
pub fn frame_body(body: &[u8]) -> Vec<u8> {
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    let mut buf = Vec::with_capacity(header.len() + body.len());
    buf.extend_from_slice(header.as_bytes());
    buf.extend_from_slice(body);
    buf
}

/// Parse the Content-Length value from a header block.
///
/// The block is `\r\n`-separated `Key: Value` lines; unknown keys are
/// ignored. Missing or non-numeric Content-Length is a decode error.
pub fn parse_content_length(header: &str) -> Result<usize, TransportError> {
    for line in header.split("\r\n") {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("Content-Length:") {
            let value = value.trim();
            return value.parse::<usize>().map_err(|e| {
                TransportError::Decode(format!("invalid Content-Length value '{value}': {e}"))
            });
        }
    }
    Err(TransportError::Decode(
        "missing Content-Length header".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Request;

    #[test]
    fn framing_declared_length_matches_body() {
        let msg = ProtocolMessage::Request(Request {
            seq: 1,
            command: "evaluate".into(),
            arguments: Some(serde_json::json!({"expression": "1+1"})),
        });
        let encoded = encode_message(&msg).unwrap();
        let text = String::from_utf8(encoded).unwrap();

        let (header, body) = text.split_once("\r\n\r\n").unwrap();
        let declared = parse_content_length(header).unwrap();
        assert_eq!(declared, body.len());

        let back: ProtocolMessage = serde_json::from_str(body).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn framing_frame_body_format() {
        let framed = frame_body(b"{}");
        assert_eq!(framed, b"Content-Length: 2\r\n\r\n{}");
    }

    #[test]
    fn framing_parse_content_length_valid() {
        assert_eq!(parse_content_length("Content-Length: 42").unwrap(), 42);
    }

    #[test]
    fn framing_parse_content_length_with_extra_headers() {
        let header = "Content-Type: application/json\r\nContent-Length: 100";
        assert_eq!(parse_content_length(header).unwrap(), 100);
    }

    #[test]
    fn framing_parse_content_length_missing() {
        let err = parse_content_length("Content-Type: application/json").unwrap_err();
        assert!(err.to_string().contains("missing Content-Length"));
    }

    #[test]
    fn framing_parse_content_length_non_numeric() {
        let err = parse_content_length("Content-Length: abc").unwrap_err();
        assert!(err.to_string().contains("invalid Content-Length"));
    }
}
