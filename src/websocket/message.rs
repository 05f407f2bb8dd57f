//! Wire payloads exchanged with browser clients.
//!
//! Inbound (client to server): `{"Message": "..."}`.
//! Outbound (server to client):
//! `{"From": "...", "Type": "New User" | "Chat" | "Leave", "Message": "..."}`.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Chat text submitted by a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundPayload {
    #[serde(rename = "Message", alias = "message")]
    pub text: String,
}

/// Kind of event carried by an outbound envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "New User")]
    JoinNotice,
    #[serde(rename = "Chat")]
    ChatMessage,
    #[serde(rename = "Leave")]
    LeaveNotice,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::JoinNotice => "New User",
            EventKind::ChatMessage => "Chat",
            EventKind::LeaveNotice => "Leave",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event broadcast to every connection other than its origin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "Type")]
    pub kind: EventKind,
    #[serde(rename = "Message")]
    pub text: String,
}

impl Envelope {
    pub fn new(from: impl Into<String>, kind: EventKind, text: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            kind,
            text: text.into(),
        }
    }

    pub fn join(from: impl Into<String>) -> Self {
        Self::new(from, EventKind::JoinNotice, "")
    }

    pub fn chat(from: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(from, EventKind::ChatMessage, text)
    }

    pub fn leave(from: impl Into<String>) -> Self {
        Self::new(from, EventKind::LeaveNotice, "")
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
    #[error("malformed payload: frame is not valid UTF-8")]
    NotUtf8,
}

/// Parse one inbound frame. Unknown fields are ignored; a missing or
/// non-string `Message` is rejected.
pub fn decode_inbound(bytes: &[u8]) -> Result<InboundPayload, CodecError> {
    let text = std::str::from_utf8(bytes).map_err(|_| CodecError::NotUtf8)?;
    Ok(serde_json::from_str(text)?)
}

/// Encode an envelope into the frame shared by all recipients of a broadcast.
pub fn encode_outbound(envelope: &Envelope) -> Arc<str> {
    // A json! value only holds strings here, so rendering cannot fail.
    let value = serde_json::json!({
        "From": envelope.from,
        "Type": envelope.kind.as_str(),
        "Message": envelope.text,
    });
    Arc::from(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_inbound() {
        let payload = decode_inbound(br#"{"Message":"hi"}"#).unwrap();
        assert_eq!(payload.text, "hi");
    }

    #[test]
    fn test_decode_accepts_lowercase_key_and_extra_fields() {
        let payload = decode_inbound(br#"{"message":"hey","extra":1}"#).unwrap();
        assert_eq!(payload.text, "hey");
    }

    #[test]
    fn test_decode_unicode_and_control_characters() {
        for text in ["", "héllo 世界 🚀", "line\nbreak\ttab\u{0001}", "\"quoted\""] {
            let frame = serde_json::to_vec(&InboundPayload {
                text: text.to_string(),
            })
            .unwrap();
            assert_eq!(decode_inbound(&frame).unwrap().text, text);
        }
    }

    #[test]
    fn test_decode_rejects_malformed() {
        let cases: [&[u8]; 6] = [
            b"",
            b"not json",
            br#"{}"#,
            br#"{"Message":42}"#,
            br#"{"Message":null}"#,
            br#""just a string""#,
        ];
        for case in cases {
            assert!(
                matches!(decode_inbound(case), Err(CodecError::MalformedPayload(_))),
                "expected malformed for {:?}",
                String::from_utf8_lossy(case)
            );
        }
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        assert!(matches!(
            decode_inbound(&[0xff, 0xfe, b'{']),
            Err(CodecError::NotUtf8)
        ));
    }

    #[test]
    fn test_encode_outbound_shape() {
        let frame = encode_outbound(&Envelope::chat("alice", "hi"));
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"From": "alice", "Type": "Chat", "Message": "hi"})
        );
    }

    #[test]
    fn test_encode_notices_have_empty_text() {
        let join: Envelope =
            serde_json::from_str(&encode_outbound(&Envelope::join("bob"))).unwrap();
        assert_eq!(join, Envelope::new("bob", EventKind::JoinNotice, ""));

        let leave: Envelope =
            serde_json::from_str(&encode_outbound(&Envelope::leave("bob"))).unwrap();
        assert_eq!(leave.kind, EventKind::LeaveNotice);
        assert_eq!(leave.text, "");
    }

    #[test]
    fn test_event_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&EventKind::JoinNotice).unwrap(),
            "\"New User\""
        );
        assert_eq!(EventKind::ChatMessage.to_string(), "Chat");
        assert_eq!(EventKind::LeaveNotice.as_str(), "Leave");
    }
}
