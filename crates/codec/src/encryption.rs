//! Authenticated encryption algorithm registry (spec.md §4.2, §4.3).
//!
//! Every provider implements encrypt-then-authenticate: `encrypt` returns
//! `(ciphertext, auth_tag)` as two separate buffers, matching the
//! extended-header layout in §6 (`iv`, `auth_tag` are distinct fields).

use crate::error::CodecError;
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes_gcm::aead::{Aead, KeyInit as AeadKeyInit};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

const GCM_TAG_LEN: usize = 16;

/// An authenticated encryption algorithm, indexed by its 7-bit id in
/// `flags`.
pub trait EncryptionProvider: Send + Sync {
    /// The 7-bit id stored in `flags`. `0` is reserved for "none".
    fn id(&self) -> u8;
    /// Human-readable name, used in logs only — never key material.
    fn name(&self) -> &'static str;
    /// Required key length in bytes.
    fn key_len(&self) -> usize;
    /// Required IV/nonce length in bytes.
    fn nonce_len(&self) -> usize;
    /// Encrypt, returning `(ciphertext, auth_tag)`.
    fn encrypt(&self, plaintext: &[u8], key: &[u8], iv: &[u8]) -> Result<(Vec<u8>, Vec<u8>), CodecError>;
    /// Decrypt and verify. Any authentication failure must map to
    /// [`CodecError::AuthTagMismatch`], never a partial plaintext.
    fn decrypt(
        &self,
        ciphertext: &[u8],
        key: &[u8],
        iv: &[u8],
        auth_tag: &[u8],
    ) -> Result<Vec<u8>, CodecError>;
}

/// AES-256-GCM (id 1).
pub struct Aes256GcmProvider;

impl EncryptionProvider for Aes256GcmProvider {
    fn id(&self) -> u8 {
        1
    }
    fn name(&self) -> &'static str {
        "aes-256-gcm"
    }
    fn key_len(&self) -> usize {
        32
    }
    fn nonce_len(&self) -> usize {
        12
    }
    fn encrypt(&self, plaintext: &[u8], key: &[u8], iv: &[u8]) -> Result<(Vec<u8>, Vec<u8>), CodecError> {
        let cipher = aes_gcm::Aes256Gcm::new_from_slice(key)
            .map_err(|e| CodecError::Encryption(e.to_string()))?;
        let nonce = aes_gcm::Nonce::from_slice(iv);
        let combined = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CodecError::Encryption(e.to_string()))?;
        split_tag(combined, GCM_TAG_LEN)
    }
    fn decrypt(
        &self,
        ciphertext: &[u8],
        key: &[u8],
        iv: &[u8],
        auth_tag: &[u8],
    ) -> Result<Vec<u8>, CodecError> {
        let cipher = aes_gcm::Aes256Gcm::new_from_slice(key)
            .map_err(|e| CodecError::Encryption(e.to_string()))?;
        let nonce = aes_gcm::Nonce::from_slice(iv);
        let combined = [ciphertext, auth_tag].concat();
        cipher
            .decrypt(nonce, combined.as_slice())
            .map_err(|_| CodecError::AuthTagMismatch)
    }
}

/// ChaCha20-Poly1305 (id 2).
pub struct ChaCha20Poly1305Provider;

impl EncryptionProvider for ChaCha20Poly1305Provider {
    fn id(&self) -> u8 {
        2
    }
    fn name(&self) -> &'static str {
        "chacha20-poly1305"
    }
    fn key_len(&self) -> usize {
        32
    }
    fn nonce_len(&self) -> usize {
        12
    }
    fn encrypt(&self, plaintext: &[u8], key: &[u8], iv: &[u8]) -> Result<(Vec<u8>, Vec<u8>), CodecError> {
        let cipher = chacha20poly1305::ChaCha20Poly1305::new_from_slice(key)
            .map_err(|e| CodecError::Encryption(e.to_string()))?;
        let nonce = chacha20poly1305::Nonce::from_slice(iv);
        let combined = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CodecError::Encryption(e.to_string()))?;
        split_tag(combined, GCM_TAG_LEN)
    }
    fn decrypt(
        &self,
        ciphertext: &[u8],
        key: &[u8],
        iv: &[u8],
        auth_tag: &[u8],
    ) -> Result<Vec<u8>, CodecError> {
        let cipher = chacha20poly1305::ChaCha20Poly1305::new_from_slice(key)
            .map_err(|e| CodecError::Encryption(e.to_string()))?;
        let nonce = chacha20poly1305::Nonce::from_slice(iv);
        let combined = [ciphertext, auth_tag].concat();
        cipher
            .decrypt(nonce, combined.as_slice())
            .map_err(|_| CodecError::AuthTagMismatch)
    }
}

fn split_tag(mut combined: Vec<u8>, tag_len: usize) -> Result<(Vec<u8>, Vec<u8>), CodecError> {
    if combined.len() < tag_len {
        return Err(CodecError::Encryption("ciphertext shorter than tag".into()));
    }
    let tag = combined.split_off(combined.len() - tag_len);
    Ok((combined, tag))
}

/// AES-256-CBC with an HMAC-SHA256 authentication tag, encrypt-then-MAC.
/// The 64-byte key is split into a 32-byte AES key and a 32-byte HMAC key.
pub struct Aes256CbcHmacProvider;

impl Aes256CbcHmacProvider {
    fn split_key(key: &[u8]) -> Result<(&[u8], &[u8]), CodecError> {
        if key.len() != 64 {
            return Err(CodecError::Encryption(format!(
                "aes-256-cbc+hmac requires a 64-byte key, got {}",
                key.len()
            )));
        }
        Ok(key.split_at(32))
    }
}

impl EncryptionProvider for Aes256CbcHmacProvider {
    fn id(&self) -> u8 {
        3
    }
    fn name(&self) -> &'static str {
        "aes-256-cbc+hmac"
    }
    fn key_len(&self) -> usize {
        64
    }
    fn nonce_len(&self) -> usize {
        16
    }
    fn encrypt(&self, plaintext: &[u8], key: &[u8], iv: &[u8]) -> Result<(Vec<u8>, Vec<u8>), CodecError> {
        let (aes_key, hmac_key) = Self::split_key(key)?;
        let ciphertext = Aes256CbcEnc::new_from_slices(aes_key, iv)
            .map_err(|e| CodecError::Encryption(e.to_string()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut mac = HmacSha256::new_from_slice(hmac_key)
            .map_err(|e| CodecError::Encryption(e.to_string()))?;
        mac.update(iv);
        mac.update(&ciphertext);
        let tag = mac.finalize().into_bytes().to_vec();

        Ok((ciphertext, tag))
    }
    fn decrypt(
        &self,
        ciphertext: &[u8],
        key: &[u8],
        iv: &[u8],
        auth_tag: &[u8],
    ) -> Result<Vec<u8>, CodecError> {
        let (aes_key, hmac_key) = Self::split_key(key)?;

        let mut mac = HmacSha256::new_from_slice(hmac_key)
            .map_err(|e| CodecError::Encryption(e.to_string()))?;
        mac.update(iv);
        mac.update(ciphertext);
        mac.verify_slice(auth_tag)
            .map_err(|_| CodecError::AuthTagMismatch)?;

        Aes256CbcDec::new_from_slices(aes_key, iv)
            .map_err(|e| CodecError::Encryption(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|e| CodecError::Encryption(e.to_string()))
    }
}

/// Lookup table from encryption id to provider.
pub struct EncryptionRegistry {
    providers: HashMap<u8, Arc<dyn EncryptionProvider>>,
}

impl EncryptionRegistry {
    /// The three algorithms named in spec.md §1: AES-256-GCM,
    /// ChaCha20-Poly1305, AES-256-CBC+HMAC.
    pub fn default_algorithms() -> Self {
        let mut providers: HashMap<u8, Arc<dyn EncryptionProvider>> = HashMap::new();
        providers.insert(1, Arc::new(Aes256GcmProvider));
        providers.insert(2, Arc::new(ChaCha20Poly1305Provider));
        providers.insert(3, Arc::new(Aes256CbcHmacProvider));
        EncryptionRegistry { providers }
    }

    /// Look up a provider by id. Id `0` ("none") always returns `None`.
    pub fn get(&self, id: u8) -> Option<Arc<dyn EncryptionProvider>> {
        self.providers.get(&id).cloned()
    }

    /// Register or replace a provider, keyed by its own id.
    pub fn register(&mut self, provider: Arc<dyn EncryptionProvider>) {
        self.providers.insert(provider.id(), provider);
    }
}

impl Default for EncryptionRegistry {
    fn default() -> Self {
        Self::default_algorithms()
    }
}
