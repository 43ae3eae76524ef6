//! Envelope decode errors.

use thiserror::Error;

/// Why a topic payload could not be turned into an [`Envelope`](crate::Envelope).
///
/// Decode errors are message-local: the bridge logs them and moves on.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload is not valid JSON or does not have the envelope shape.
    #[error("malformed envelope: {0}")]
    Json(#[from] serde_json::Error),
    /// The envelope has no routing key.
    #[error("envelope has an empty channelId")]
    EmptyChannel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_error_display() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err = DecodeError::from(json_err);
        assert!(err.to_string().starts_with("malformed envelope"));
    }

    #[test]
    fn empty_channel_display() {
        assert_eq!(
            DecodeError::EmptyChannel.to_string(),
            "envelope has an empty channelId"
        );
    }
}
