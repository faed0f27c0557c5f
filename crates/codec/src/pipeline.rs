//! PayloadCodec: compress-then-encrypt / decrypt-then-decompress
//! (spec.md §4.2).

use crate::compression::CompressionRegistry;
use crate::encryption::EncryptionRegistry;
use crate::error::CodecError;
use emaildb_block::{ExtendedHeader, EncryptionExt};
use rand::RngCore;

/// Looks up the key bytes for a `key_id`. Implemented by `emaildb-keystore`
/// on the other side of this seam — PayloadCodec never knows how keys are
/// derived or stored, only how to ask for one.
pub trait KeyProvider: Send + Sync {
    /// Return the raw key bytes for `key_id`, or
    /// [`CodecError::KeyNotFound`] if no such key is unlocked.
    fn key_for(&self, key_id: &str) -> Result<Vec<u8>, CodecError>;
}

/// An encryption request: which algorithm and which key to seal under.
pub struct EncryptionRequest<'a> {
    /// Encryption algorithm id (§3 `flags` bits 7..14).
    pub encryption_id: u8,
    /// Key id to ask the [`KeyProvider`] for.
    pub key_id: &'a str,
}

/// The on-disk form of a payload plus the flag nibbles a caller should
/// record, after thresholding has possibly cleared the compression id.
pub struct SealedPayload {
    /// Final on-disk bytes (compressed, then encrypted, as applicable).
    pub bytes: Vec<u8>,
    /// Compression id actually used (`0` if skipped by thresholding).
    pub compression_id: u8,
    /// Encryption id actually used (`0` if none was requested).
    pub encryption_id: u8,
    /// Present iff either transform ran.
    pub extended_header: Option<ExtendedHeader>,
}

/// Registries bundling every compression and encryption provider this
/// build supports. Construct once per `Engine` and share.
pub struct Registries {
    /// Compression algorithm lookup.
    pub compression: CompressionRegistry,
    /// Encryption algorithm lookup.
    pub encryption: EncryptionRegistry,
}

impl Default for Registries {
    fn default() -> Self {
        Registries {
            compression: CompressionRegistry::default_algorithms(),
            encryption: EncryptionRegistry::default_algorithms(),
        }
    }
}

/// Compress-then-encrypt a logical payload into its on-disk form.
///
/// Thresholding (§4.2): if `compression_id != 0` but
/// `plaintext.len() < min_threshold`, compression is skipped and the
/// returned `compression_id` is `0` — this is what lets `flags == 0`
/// mean "verbatim" even when a caller asked for compression on a tiny
/// payload.
#[allow(clippy::too_many_arguments)]
pub fn seal(
    plaintext: &[u8],
    compression_id: u8,
    encryption: Option<EncryptionRequest<'_>>,
    min_threshold: usize,
    key_provider: &dyn KeyProvider,
    registries: &Registries,
    rng: &mut dyn RngCore,
) -> Result<SealedPayload, CodecError> {
    let mut working = plaintext.to_vec();
    let mut uncompressed_size = None;
    let mut compression_id_used = compression_id;

    if compression_id != 0 {
        if plaintext.len() >= min_threshold {
            let provider = registries
                .compression
                .get(compression_id)
                .ok_or(CodecError::UnknownCompressionAlgorithm(compression_id))?;
            working = provider.compress(&working)?;
            uncompressed_size = Some(plaintext.len() as u64);
        } else {
            compression_id_used = 0;
        }
    }

    let mut encryption_id_used = 0u8;
    let mut encryption_ext = None;

    if let Some(request) = encryption {
        if request.encryption_id != 0 {
            let provider = registries
                .encryption
                .get(request.encryption_id)
                .ok_or(CodecError::UnknownEncryptionAlgorithm(request.encryption_id))?;
            let key = key_provider.key_for(request.key_id)?;
            let mut iv = vec![0u8; provider.nonce_len()];
            rng.fill_bytes(&mut iv);
            let (ciphertext, auth_tag) = provider.encrypt(&working, &key, &iv)?;
            working = ciphertext;
            encryption_id_used = request.encryption_id;
            encryption_ext = Some(EncryptionExt {
                iv,
                auth_tag,
                key_id: request.key_id.to_string(),
            });
        }
    }

    let extended_header = if uncompressed_size.is_some() || encryption_ext.is_some() {
        Some(ExtendedHeader {
            uncompressed_size,
            encryption: encryption_ext,
        })
    } else {
        None
    };

    Ok(SealedPayload {
        bytes: working,
        compression_id: compression_id_used,
        encryption_id: encryption_id_used,
        extended_header,
    })
}

/// Decrypt-then-decompress the mirror of [`seal`].
///
/// A bad AEAD tag or HMAC surfaces as [`CodecError::AuthTagMismatch`]
/// before any decompression is attempted — the caller must not
/// partially deserialize an unauthenticated payload.
pub fn open(
    bytes: &[u8],
    compression_id: u8,
    encryption_id: u8,
    extended_header: Option<&ExtendedHeader>,
    key_provider: &dyn KeyProvider,
    registries: &Registries,
) -> Result<Vec<u8>, CodecError> {
    let mut working = bytes.to_vec();

    if encryption_id != 0 {
        let provider = registries
            .encryption
            .get(encryption_id)
            .ok_or(CodecError::UnknownEncryptionAlgorithm(encryption_id))?;
        let ext = extended_header.ok_or(CodecError::MissingExtendedHeader)?;
        let enc = ext
            .encryption
            .as_ref()
            .ok_or(CodecError::MissingExtendedHeader)?;
        let key = key_provider.key_for(&enc.key_id)?;
        working = provider.decrypt(&working, &key, &enc.iv, &enc.auth_tag)?;
    }

    if compression_id != 0 {
        let provider = registries
            .compression
            .get(compression_id)
            .ok_or(CodecError::UnknownCompressionAlgorithm(compression_id))?;
        let ext = extended_header.ok_or(CodecError::MissingExtendedHeader)?;
        let size = ext
            .uncompressed_size
            .ok_or(CodecError::MissingExtendedHeader)?;
        working = provider.decompress(&working, size)?;
    }

    Ok(working)
}
