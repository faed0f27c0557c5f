//! In-memory unlocked state (spec.md §4.3, §5: "a mutex around the
//! KeyStore state").

use emaildb_core::BlockId;
use emaildb_serializer::{DataKeyEntry, KeyPurpose};
use std::collections::HashMap;
use zeroize::Zeroizing;

/// One data key, decrypted and held only in memory.
pub struct DataKeyHandle {
    /// Raw key bytes, zeroized on drop.
    pub key_bytes: Zeroizing<Vec<u8>>,
    /// What this key is used for.
    pub purpose: KeyPurpose,
    /// Encryption algorithm id this key is sized for.
    pub algorithm_id: u8,
    /// UTC nanoseconds this key was created.
    pub created_at: i64,
    /// UTC nanoseconds this key was revoked, if rotated out.
    pub revoked_at: Option<i64>,
}

/// State held only while the store is unlocked.
pub struct UnlockedState {
    /// The master key, zeroized on drop.
    pub master_key: Zeroizing<Vec<u8>>,
    /// Block id of the most recently written `KeyManager` block.
    pub key_manager_head: Option<BlockId>,
    /// The exact (still-sealed) entry list written in the head
    /// `KeyManager` block — carried forward so the next rotation/create
    /// can extend it without re-sealing unrelated keys.
    pub known_entries: Vec<DataKeyEntry>,
    /// Decrypted key bytes, keyed by `key_id`, for everything this
    /// session could unseal.
    pub data_keys: HashMap<String, DataKeyHandle>,
}

/// The store's lock state (§4.3: "`Locked` → `Unlocked(master)`").
pub enum KeyStoreState {
    /// No master key in memory; only `initialize`/`unlock` are valid.
    Locked,
    /// Master key and data keys available.
    Unlocked(UnlockedState),
}
