//! Codec-level errors (spec.md §4.2). These carry no block id — the
//! caller (BlockStore) attaches one via [`CodecError::into_email_db_error`]
//! once it knows which block the transform was running for.

use emaildb_core::{BlockId, EmailDbError};
use thiserror::Error;

/// Errors from [`crate::pipeline::seal`]/[`crate::pipeline::open`] and the
/// algorithm registries.
#[derive(Debug, Error)]
pub enum CodecError {
    /// `flags` named a compression id with no registered provider.
    #[error("unknown compression algorithm id {0}")]
    UnknownCompressionAlgorithm(u8),

    /// `flags` named an encryption id with no registered provider.
    #[error("unknown encryption algorithm id {0}")]
    UnknownEncryptionAlgorithm(u8),

    /// A compression provider failed to compress.
    #[error("compression failed: {0}")]
    Compression(String),

    /// A compression provider failed to decompress.
    #[error("decompression failed: {0}")]
    Decompression(String),

    /// An encryption provider failed for a reason other than tag
    /// verification (e.g. malformed ciphertext length).
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// The key provider has no key registered under this id.
    #[error("key {0:?} not found")]
    KeyNotFound(String),

    /// AEAD/HMAC verification failed. Per §4.2, this must not be
    /// automatically retried or partially deserialized.
    #[error("authentication tag mismatch")]
    AuthTagMismatch,

    /// A transform nibble in `flags` was nonzero but no extended header
    /// (or the field it needs) was supplied.
    #[error("missing extended header for a transform recorded in flags")]
    MissingExtendedHeader,
}

impl CodecError {
    /// Attach a block id, producing the unified error type the rest of
    /// the engine propagates.
    pub fn into_email_db_error(self, block_id: BlockId) -> EmailDbError {
        match self {
            CodecError::AuthTagMismatch => EmailDbError::AuthTagMismatch { block_id },
            CodecError::KeyNotFound(key_id) => {
                EmailDbError::NotFound(format!("key {key_id}"))
            }
            other => EmailDbError::Schema(other.to_string()),
        }
    }
}
