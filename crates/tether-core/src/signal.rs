//! Out-of-band signal tokens.
//!
//! Offers and answers travel between devices as opaque text tokens (QR
//! codes, pasted strings): a short prefix followed by the base64url-encoded
//! JSON payload. Decoding validates the minimal schema — known version and
//! type, non-empty sender, numeric timestamp, minimum-length nonce — before
//! anything cryptographic looks at the token.

use crate::error::ProtocolError;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

/// Current protocol version.
pub const PROTOCOL_VERSION: u32 = 2;

/// Legacy pre-shared-secret protocol version.
pub const LEGACY_PROTOCOL_VERSION: u32 = 1;

/// Current token prefix.
pub const SIGNAL_PREFIX: &str = "tether:";

/// Pre-rename token prefix, still accepted on decode.
pub const LEGACY_SIGNAL_PREFIX: &str = "pairlink:";

/// Minimum handshake nonce length in bytes (after hex decoding).
pub const MIN_NONCE_BYTES: usize = 16;

/// Opaque transport descriptor exchanged inside signals.
///
/// The surrounding networking layer produces and consumes these; the
/// protocol core only carries them.
pub type TransportDescriptor = serde_json::Value;

/// Key-agreement block embedded in v2 signals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KeyAgreementBlock {
    /// Named curve, `"X25519"` for keys generated here
    pub curve: String,
    /// Ephemeral public key
    #[serde(with = "tether_crypto::serde_hex")]
    pub public_key: Vec<u8>,
}

/// An offer: the initiator's half of the out-of-band exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OfferSignal {
    /// Protocol version the initiator speaks
    pub version: u32,
    /// Initiator peer id
    pub from: String,
    /// Target peer id
    pub to: String,
    /// Initiator's identity fingerprint
    pub identity: String,
    /// Opaque transport descriptor
    pub transport: TransportDescriptor,
    /// Ephemeral key material (absent on v1 offers)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_agreement: Option<KeyAgreementBlock>,
    /// Pre-shared secret for v1-only responders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_secret: Option<String>,
    /// Handshake nonce, hex
    pub nonce: String,
    /// Creation timestamp, epoch milliseconds
    pub sent_at: u64,
    /// Whether this offer restarts an existing pairing
    #[serde(default)]
    pub restart: bool,
}

/// An answer: the responder's half of the out-of-band exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnswerSignal {
    /// Negotiated protocol version (fixed for the session's lifetime)
    pub version: u32,
    /// Responder peer id
    pub from: String,
    /// Target peer id (the initiator)
    pub to: String,
    /// Responder's identity fingerprint
    pub identity: String,
    /// Opaque transport descriptor
    pub transport: TransportDescriptor,
    /// Ephemeral key material (absent on v1 answers)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_agreement: Option<KeyAgreementBlock>,
    /// Secret echoed back when the responder had to mint one for a bare
    /// v1 offer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_secret: Option<String>,
    /// The offer nonce, echoed verbatim
    pub echoed_nonce: String,
    /// Responder's own handshake nonce, hex
    pub nonce: String,
    /// Creation timestamp, epoch milliseconds
    pub sent_at: u64,
}

/// A decoded signal of either kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Signal {
    /// Initiator offer
    #[serde(rename = "offer")]
    Offer(OfferSignal),
    /// Responder answer
    #[serde(rename = "answer")]
    Answer(AnswerSignal),
}

impl Signal {
    /// The sending peer's id.
    #[must_use]
    pub fn sender(&self) -> &str {
        match self {
            Signal::Offer(o) => &o.from,
            Signal::Answer(a) => &a.from,
        }
    }

    /// The protocol version the signal carries.
    #[must_use]
    pub fn version(&self) -> u32 {
        match self {
            Signal::Offer(o) => o.version,
            Signal::Answer(a) => a.version,
        }
    }
}

/// Encode a signal into an out-of-band token.
///
/// # Errors
///
/// Returns [`ProtocolError::Payload`] if JSON encoding fails.
pub fn encode_signal(signal: &Signal) -> Result<String, ProtocolError> {
    let json = serde_json::to_vec(signal)?;
    Ok(format!("{SIGNAL_PREFIX}{}", URL_SAFE_NO_PAD.encode(json)))
}

/// Decode and validate an out-of-band token.
///
/// Accepts the current prefix and the pre-rename one. Schema validation
/// happens here, before any cryptographic step sees the payload.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedSignal`] for bad prefixes, encoding,
/// or schema violations; [`ProtocolError::UnknownSignalType`] and
/// [`ProtocolError::UnsupportedVersion`] for unrecognized type/version.
pub fn decode_signal(token: &str) -> Result<Signal, ProtocolError> {
    let body = token
        .strip_prefix(SIGNAL_PREFIX)
        .or_else(|| token.strip_prefix(LEGACY_SIGNAL_PREFIX))
        .ok_or(ProtocolError::MalformedSignal("unrecognized prefix"))?;

    let bytes = URL_SAFE_NO_PAD
        .decode(body)
        .map_err(|_| ProtocolError::MalformedSignal("invalid base64 body"))?;
    let value: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|_| ProtocolError::MalformedSignal("invalid json payload"))?;

    // Pin down type and version errors before letting serde reject the rest.
    let kind = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or(ProtocolError::MissingField("type"))?;
    if kind != "offer" && kind != "answer" {
        return Err(ProtocolError::UnknownSignalType(kind.to_string()));
    }
    let version = value
        .get("version")
        .and_then(serde_json::Value::as_u64)
        .ok_or(ProtocolError::MissingField("version"))?;
    let version =
        u32::try_from(version).map_err(|_| ProtocolError::UnsupportedVersion(u32::MAX))?;
    if !(LEGACY_PROTOCOL_VERSION..=PROTOCOL_VERSION).contains(&version) {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    let signal: Signal = serde_json::from_value(value)
        .map_err(|_| ProtocolError::MalformedSignal("schema violation"))?;
    validate(&signal)?;
    Ok(signal)
}

fn validate(signal: &Signal) -> Result<(), ProtocolError> {
    let (from, nonce, sent_at) = match signal {
        Signal::Offer(o) => (&o.from, &o.nonce, o.sent_at),
        Signal::Answer(a) => (&a.from, &a.nonce, a.sent_at),
    };
    if from.is_empty() {
        return Err(ProtocolError::MissingField("from"));
    }
    if sent_at == 0 {
        return Err(ProtocolError::MalformedSignal("timestamp"));
    }
    if nonce_bytes(nonce)?.len() < MIN_NONCE_BYTES {
        return Err(ProtocolError::MalformedSignal("nonce too short"));
    }
    if let Signal::Answer(a) = signal {
        // The echoed nonce must at least be decodable; whether it matches
        // is the key agreement engine's decision.
        nonce_bytes(&a.echoed_nonce)?;
    }
    Ok(())
}

/// Decode a hex nonce field.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedSignal`] on non-hex input.
pub fn nonce_bytes(nonce: &str) -> Result<Vec<u8>, ProtocolError> {
    hex::decode(nonce).map_err(|_| ProtocolError::MalformedSignal("nonce is not hex"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_offer() -> OfferSignal {
        OfferSignal {
            version: PROTOCOL_VERSION,
            from: "alice".into(),
            to: "bob".into(),
            identity: "fp-alice".into(),
            transport: json!({"kind": "datachannel"}),
            key_agreement: Some(KeyAgreementBlock {
                curve: "X25519".into(),
                public_key: vec![9u8; 32],
            }),
            legacy_secret: None,
            nonce: hex::encode([7u8; 16]),
            sent_at: 1_700_000_000_000,
            restart: false,
        }
    }

    #[test]
    fn test_token_roundtrip() {
        let signal = Signal::Offer(sample_offer());
        let token = encode_signal(&signal).unwrap();
        assert!(token.starts_with(SIGNAL_PREFIX));
        let decoded = decode_signal(&token).unwrap();
        assert_eq!(decoded, signal);
    }

    #[test]
    fn test_legacy_prefix_accepted() {
        let signal = Signal::Offer(sample_offer());
        let token = encode_signal(&signal).unwrap();
        let body = token.strip_prefix(SIGNAL_PREFIX).unwrap();
        let old_token = format!("{LEGACY_SIGNAL_PREFIX}{body}");
        assert_eq!(decode_signal(&old_token).unwrap(), signal);
    }

    #[test]
    fn test_unknown_prefix_rejected() {
        let signal = Signal::Offer(sample_offer());
        let token = encode_signal(&signal).unwrap();
        let body = token.strip_prefix(SIGNAL_PREFIX).unwrap();
        let bad = format!("mystery:{body}");
        assert!(matches!(
            decode_signal(&bad),
            Err(ProtocolError::MalformedSignal("unrecognized prefix"))
        ));
    }

    #[test]
    fn test_garbage_body_rejected() {
        assert!(matches!(
            decode_signal("tether:!!!not-base64!!!"),
            Err(ProtocolError::MalformedSignal("invalid base64 body"))
        ));
        let not_json = format!("tether:{}", URL_SAFE_NO_PAD.encode(b"plain text"));
        assert!(matches!(
            decode_signal(&not_json),
            Err(ProtocolError::MalformedSignal("invalid json payload"))
        ));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let body = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&json!({"type": "greeting", "version": 2})).unwrap(),
        );
        let err = decode_signal(&format!("tether:{body}"));
        assert!(matches!(err, Err(ProtocolError::UnknownSignalType(t)) if t == "greeting"));
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut offer = sample_offer();
        offer.version = 9;
        let json = serde_json::to_value(Signal::Offer(offer)).unwrap();
        let body = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&json).unwrap());
        assert!(matches!(
            decode_signal(&format!("tether:{body}")),
            Err(ProtocolError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn test_empty_sender_rejected() {
        let mut offer = sample_offer();
        offer.from = String::new();
        let token = encode_signal(&Signal::Offer(offer)).unwrap();
        assert!(matches!(
            decode_signal(&token),
            Err(ProtocolError::MissingField("from"))
        ));
    }

    #[test]
    fn test_short_nonce_rejected() {
        let mut offer = sample_offer();
        offer.nonce = hex::encode([1u8; 8]);
        let token = encode_signal(&Signal::Offer(offer)).unwrap();
        assert!(matches!(
            decode_signal(&token),
            Err(ProtocolError::MalformedSignal("nonce too short"))
        ));
    }

    #[test]
    fn test_zero_timestamp_rejected() {
        let mut offer = sample_offer();
        offer.sent_at = 0;
        let token = encode_signal(&Signal::Offer(offer)).unwrap();
        assert!(matches!(
            decode_signal(&token),
            Err(ProtocolError::MalformedSignal("timestamp"))
        ));
    }

    #[test]
    fn test_wire_field_names() {
        let token = encode_signal(&Signal::Offer(sample_offer())).unwrap();
        let body = token.strip_prefix(SIGNAL_PREFIX).unwrap();
        let bytes = URL_SAFE_NO_PAD.decode(body).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], "offer");
        assert!(value["keyAgreement"]["publicKey"].is_string());
        assert!(value["sentAt"].is_u64());
    }
}
