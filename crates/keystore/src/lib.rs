//! KeyStore: master-key bootstrap/unlock and data-key lifecycle
//! (spec.md §4.3).
//!
//! # Layering
//!
//! This crate is the concrete implementation behind
//! [`emaildb_codec::KeyProvider`] — it owns the `KeyExchange`/
//! `KeyManager` blocks and all key material, while `emaildb-codec`
//! only ever sees key bytes through the trait. `emaildb-store`/
//! `emaildb-engine` wire a `KeyStore` in as `Arc<dyn KeyProvider>`.

#![warn(missing_docs)]

pub mod credential;
pub mod kdf;
pub mod keystore;
pub mod state;

pub use credential::UnlockCredential;
pub use kdf::{derive_key_encryption_key, DEFAULT_KDF_PARAMS};
pub use keystore::KeyStore;
