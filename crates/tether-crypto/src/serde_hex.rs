//! Hex serialization helpers for serde.
//!
//! Binary fields embedded in JSON wire structures (IVs, ciphertexts, tags,
//! public keys) are encoded as lowercase hex strings.

use serde::Deserialize;

/// Serialize a byte slice as a hex string.
///
/// # Errors
///
/// Propagates serializer errors.
pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&hex::encode(bytes))
}

/// Deserialize a hex string into a byte vector.
///
/// # Errors
///
/// Fails on non-hex input.
pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    hex::decode(s).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Wrapper {
        #[serde(with = "crate::serde_hex")]
        data: Vec<u8>,
    }

    #[test]
    fn test_hex_roundtrip() {
        let w = Wrapper {
            data: vec![0xde, 0xad, 0xbe, 0xef],
        };
        let json = serde_json::to_string(&w).unwrap();
        assert_eq!(json, r#"{"data":"deadbeef"}"#);
        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(back, w);
    }

    #[test]
    fn test_rejects_non_hex() {
        let err = serde_json::from_str::<Wrapper>(r#"{"data":"zzzz"}"#);
        assert!(err.is_err());
    }
}
