//! Application payload model.
//!
//! Everything that travels inside an encrypted envelope is one of a fixed
//! set of payload kinds, matched exhaustively at dispatch time. The JSON
//! tag is `kind`, with kebab-case variant names and camelCase fields.

use serde::{Deserialize, Serialize};

/// A decrypted application payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum AppPayload {
    /// A chat message
    Chat {
        /// Client-assigned message id
        id: String,
        /// Message body
        body: String,
    },
    /// Read acknowledgement for a previously delivered message
    ReadReceipt {
        /// Id of the message that was read
        message_id: String,
    },
    /// Typing indicator
    Typing {
        /// Whether the peer is currently typing
        active: bool,
    },
    /// Attachment content and metadata
    Attachment {
        /// Client-assigned attachment id
        id: String,
        /// Original file name
        name: String,
        /// MIME type
        mime_type: String,
        /// Content bytes
        #[serde(with = "tether_crypto::serde_hex")]
        content: Vec<u8>,
    },
    /// Change to the conversation's disappearing-message timer
    DisappearingTimerUpdate {
        /// New expiry in milliseconds; `None` disables disappearing messages
        expires_after_ms: Option<u64>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_wire_shape() {
        let payload = AppPayload::Chat {
            id: "m1".into(),
            body: "hi".into(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "chat");
        assert_eq!(json["body"], "hi");
    }

    #[test]
    fn test_kebab_case_tags() {
        let receipt = AppPayload::ReadReceipt {
            message_id: "m1".into(),
        };
        let json = serde_json::to_value(&receipt).unwrap();
        assert_eq!(json["kind"], "read-receipt");
        assert_eq!(json["messageId"], "m1");

        let timer = AppPayload::DisappearingTimerUpdate {
            expires_after_ms: Some(30_000),
        };
        let json = serde_json::to_value(&timer).unwrap();
        assert_eq!(json["kind"], "disappearing-timer-update");
    }

    #[test]
    fn test_all_kinds_roundtrip() {
        let payloads = [
            AppPayload::Chat {
                id: "m1".into(),
                body: "hello".into(),
            },
            AppPayload::ReadReceipt {
                message_id: "m1".into(),
            },
            AppPayload::Typing { active: true },
            AppPayload::Attachment {
                id: "a1".into(),
                name: "photo.jpg".into(),
                mime_type: "image/jpeg".into(),
                content: vec![1, 2, 3],
            },
            AppPayload::DisappearingTimerUpdate {
                expires_after_ms: None,
            },
        ];
        for payload in payloads {
            let json = serde_json::to_vec(&payload).unwrap();
            let back: AppPayload = serde_json::from_slice(&json).unwrap();
            assert_eq!(back, payload);
        }
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let err = serde_json::from_str::<AppPayload>(r#"{"kind":"poke"}"#);
        assert!(err.is_err());
    }
}
