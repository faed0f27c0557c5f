//! Unlock credentials (spec.md §4.3). The secret bytes inside are
//! zeroized as soon as the credential is dropped.

use emaildb_serializer::UnlockMethod;
use zeroize::Zeroize;

/// A credential presented to unlock (or initialize) the master key.
/// WebAuthn/PGP/PKCS#11 are accepted as opaque secret material here —
/// this crate has no platform integration for them; a host supplies
/// whatever derived secret its own integration produces.
pub enum UnlockCredential {
    /// A user-supplied passphrase.
    Passphrase(Vec<u8>),
    /// Secret derived from a WebAuthn assertion.
    WebAuthn(Vec<u8>),
    /// Secret derived from a PGP private key operation.
    Pgp(Vec<u8>),
    /// Secret derived from a PKCS#11 token operation.
    Pkcs11(Vec<u8>),
}

impl UnlockCredential {
    /// Which [`UnlockMethod`] this credential authenticates.
    pub fn method(&self) -> UnlockMethod {
        match self {
            UnlockCredential::Passphrase(_) => UnlockMethod::Passphrase,
            UnlockCredential::WebAuthn(_) => UnlockMethod::WebAuthn,
            UnlockCredential::Pgp(_) => UnlockMethod::Pgp,
            UnlockCredential::Pkcs11(_) => UnlockMethod::Pkcs11,
        }
    }

    /// The raw secret bytes fed to the KDF.
    pub fn secret_bytes(&self) -> &[u8] {
        match self {
            UnlockCredential::Passphrase(b)
            | UnlockCredential::WebAuthn(b)
            | UnlockCredential::Pgp(b)
            | UnlockCredential::Pkcs11(b) => b,
        }
    }
}

impl Drop for UnlockCredential {
    fn drop(&mut self) {
        match self {
            UnlockCredential::Passphrase(b)
            | UnlockCredential::WebAuthn(b)
            | UnlockCredential::Pgp(b)
            | UnlockCredential::Pkcs11(b) => b.zeroize(),
        }
    }
}
