//! Key-encryption-key derivation (spec.md §4.3 bootstrap/unlock).

use argon2::{Algorithm, Argon2, Params, Version};
use emaildb_core::{EmailDbError, Result};
use emaildb_serializer::KdfParams;

/// OWASP-recommended Argon2id baseline: 19 MiB memory, 2 iterations, one
/// lane. Recorded alongside the salt in every `KeyExchange` block so a
/// later unlock attempt re-derives the same key-encryption-key even if
/// these defaults change.
pub const DEFAULT_KDF_PARAMS: KdfParams = KdfParams {
    memory_kib: 19 * 1024,
    iterations: 2,
    parallelism: 1,
};

const KEY_ENCRYPTION_KEY_LEN: usize = 32;

/// Derive a 32-byte key-encryption-key from a credential's secret bytes.
pub fn derive_key_encryption_key(secret: &[u8], salt: &[u8], params: KdfParams) -> Result<Vec<u8>> {
    let argon2_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_ENCRYPTION_KEY_LEN),
    )
    .map_err(|e| EmailDbError::Internal(format!("invalid KDF params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut out = vec![0u8; KEY_ENCRYPTION_KEY_LEN];
    argon2
        .hash_password_into(secret, salt, &mut out)
        .map_err(|e| EmailDbError::Internal(format!("KDF failed: {e}")))?;
    Ok(out)
}
