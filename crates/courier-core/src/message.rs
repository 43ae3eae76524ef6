//! Topic payload types.
//!
//! Publishers put JSON of this shape on the shared topic:
//!
//! ```json
//! {
//!   "channelId": "general",
//!   "message": {
//!     "id": "m1",
//!     "content": "hi",
//!     "userId": "u1",
//!     "channelId": "general",
//!     "timestamp": "2026-01-01T00:00:00Z",
//!     "username": "ada"
//!   }
//! }
//! ```
//!
//! The gateway only decodes a payload to learn its routing key. What goes out
//! to clients is always the original bytes, never a re-encoding of these
//! structs.

use serde::{Deserialize, Serialize};

use crate::errors::DecodeError;
use crate::ids::ChannelId;

/// One chat message. Opaque to the gateway beyond decoding.
///
/// Missing fields decode to their empty defaults; only the envelope's
/// `channelId` is required.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Message {
    /// Message id.
    pub id: String,
    /// Message body.
    pub content: String,
    /// Author's user id.
    pub user_id: String,
    /// Channel the message was posted to.
    pub channel_id: ChannelId,
    /// Publisher-supplied timestamp, passed through untouched.
    pub timestamp: String,
    /// Optional author display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// Routing wrapper around a [`Message`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Channel whose subscribers receive this envelope.
    pub channel_id: ChannelId,
    /// The message itself.
    #[serde(default)]
    pub message: Message,
}

impl Envelope {
    /// Decode a raw topic payload.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let envelope: Self = serde_json::from_slice(payload)?;
        if envelope.channel_id.is_empty() {
            return Err(DecodeError::EmptyChannel);
        }
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const FULL: &str = r#"{"channelId":"general","message":{"id":"m1","content":"hello","userId":"u1","channelId":"general","timestamp":"2026-01-01T00:00:00Z","username":"ada"}}"#;

    #[test]
    fn decode_full_envelope() {
        let env = Envelope::decode(FULL.as_bytes()).unwrap();
        assert_eq!(env.channel_id.as_str(), "general");
        assert_eq!(env.message.id, "m1");
        assert_eq!(env.message.content, "hello");
        assert_eq!(env.message.user_id, "u1");
        assert_eq!(env.message.timestamp, "2026-01-01T00:00:00Z");
        assert_eq!(env.message.username.as_deref(), Some("ada"));
    }

    #[test]
    fn username_is_optional() {
        let raw = r#"{"channelId":"random","message":{"id":"m2","content":"x","userId":"u2","channelId":"random","timestamp":"t"}}"#;
        let env = Envelope::decode(raw.as_bytes()).unwrap();
        assert!(env.message.username.is_none());
    }

    #[test]
    fn missing_message_fields_default() {
        let raw = r#"{"channelId":"general","message":{"content":"only body"}}"#;
        let env = Envelope::decode(raw.as_bytes()).unwrap();
        assert_eq!(env.message.content, "only body");
        assert!(env.message.id.is_empty());
    }

    #[test]
    fn missing_message_defaults() {
        let env = Envelope::decode(br#"{"channelId":"general"}"#).unwrap();
        assert_eq!(env.message, Message::default());
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert_matches!(Envelope::decode(b"{not json"), Err(DecodeError::Json(_)));
    }

    #[test]
    fn missing_channel_is_rejected() {
        assert_matches!(
            Envelope::decode(br#"{"message":{"id":"m1"}}"#),
            Err(DecodeError::Json(_))
        );
    }

    #[test]
    fn empty_channel_is_rejected() {
        assert_matches!(
            Envelope::decode(br#"{"channelId":"","message":{}}"#),
            Err(DecodeError::EmptyChannel)
        );
    }

    #[test]
    fn wrong_type_is_rejected() {
        assert_matches!(
            Envelope::decode(br#"{"channelId":42}"#),
            Err(DecodeError::Json(_))
        );
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let raw = r#"{"channelId":"general","extra":true,"message":{"id":"m1","reactions":[]}}"#;
        let env = Envelope::decode(raw.as_bytes()).unwrap();
        assert_eq!(env.message.id, "m1");
    }

    #[test]
    fn serialized_username_omitted_when_absent() {
        let msg = Message {
            id: "m1".into(),
            ..Message::default()
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("username").is_none());
        assert_eq!(json["userId"], "");
    }
}
