//! Deterministic content ↔ bytes, keyed by `payload_encoding` (§4.4).
//!
//! Only `Raw` (bincode) and `Json` (serde_json) are wired to concrete
//! encoders in this build. `Protobuf` and `CapnProto` are valid tags a
//! block may carry (and this crate will faithfully report
//! `UnknownEncoding` for them on read, per §4.4: "the file format does
//! not require that all encoders be present to read") but this
//! deployment does not ship either encoder.

use emaildb_core::{EmailDbError, PayloadEncoding, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode `value` using the given tag.
pub fn encode<T: Serialize>(value: &T, encoding: PayloadEncoding) -> Result<Vec<u8>> {
    match encoding {
        PayloadEncoding::Raw => {
            bincode::serialize(value).map_err(|e| EmailDbError::Schema(e.to_string()))
        }
        PayloadEncoding::Json => {
            serde_json::to_vec(value).map_err(|e| EmailDbError::Schema(e.to_string()))
        }
        PayloadEncoding::Protobuf | PayloadEncoding::CapnProto => {
            Err(EmailDbError::UnknownEncoding(encoding.as_u8()))
        }
    }
}

/// Decode bytes using the given tag.
pub fn decode<T: DeserializeOwned>(bytes: &[u8], encoding: PayloadEncoding) -> Result<T> {
    match encoding {
        PayloadEncoding::Raw => {
            bincode::deserialize(bytes).map_err(|e| EmailDbError::Schema(e.to_string()))
        }
        PayloadEncoding::Json => {
            serde_json::from_slice(bytes).map_err(|e| EmailDbError::Schema(e.to_string()))
        }
        PayloadEncoding::Protobuf | PayloadEncoding::CapnProto => {
            Err(EmailDbError::UnknownEncoding(encoding.as_u8()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{EmailEnvelope, FolderEnvelopeContent};
    use emaildb_core::CompoundId;

    fn sample() -> FolderEnvelopeContent {
        FolderEnvelopeContent {
            folder_path: "Inbox".to_string(),
            version: 1,
            envelopes: vec![EmailEnvelope {
                compound_id: CompoundId::new(7, 0),
                message_id: "<a@x>".to_string(),
                subject: "hi".to_string(),
                from: "a@x".to_string(),
                to: vec!["b@x".to_string()],
                date: 1,
                size_bytes: 100,
                envelope_hash: [1u8; 32],
            }],
            previous_block_id: None,
        }
    }

    #[test]
    fn raw_round_trips() {
        let value = sample();
        let bytes = encode(&value, PayloadEncoding::Raw).unwrap();
        let decoded: FolderEnvelopeContent = decode(&bytes, PayloadEncoding::Raw).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn json_round_trips() {
        let value = sample();
        let bytes = encode(&value, PayloadEncoding::Json).unwrap();
        let decoded: FolderEnvelopeContent = decode(&bytes, PayloadEncoding::Json).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn protobuf_tag_is_unknown_encoding() {
        let value = sample();
        let err = encode(&value, PayloadEncoding::Protobuf).unwrap_err();
        assert!(matches!(err, EmailDbError::UnknownEncoding(_)));
    }

    #[test]
    fn encodings_produce_different_bytes() {
        let value = sample();
        let raw = encode(&value, PayloadEncoding::Raw).unwrap();
        let json = encode(&value, PayloadEncoding::Json).unwrap();
        assert_ne!(raw, json);
    }
}
