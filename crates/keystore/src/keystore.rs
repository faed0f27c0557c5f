//! KeyStore: bootstrap, unlock, and rotation of the master/data keys
//! (spec.md §4.3).
//!
//! Master-key and data-key sealing inside this crate always uses
//! AES-256-GCM (encryption id 1) regardless of which algorithm a data
//! key will ultimately protect block payloads with — this is private
//! bookkeeping, never exposed through [`emaildb_codec::KeyProvider`].

use crate::credential::UnlockCredential;
use crate::kdf::{derive_key_encryption_key, DEFAULT_KDF_PARAMS};
use crate::state::{DataKeyHandle, KeyStoreState, UnlockedState};
use emaildb_block::{BlockFile, BlockFlags, RawBlock};
use emaildb_codec::{CodecError, KeyProvider, Registries};
use emaildb_core::{BlockId, BlockType, Clock, EmailDbError, LogLevel, Logger, MetricsSink, PayloadEncoding, Result};
use emaildb_serializer::{
    DataKeyEntry, KeyExchangeContent, KeyManagerContent, KeyPurpose, UnlockMethod,
};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::Arc;
use zeroize::Zeroizing;

const INTERNAL_SEAL_ALGORITHM_ID: u8 = 1; // AES-256-GCM

/// Manages the master key, its unlock methods, and the per-purpose
/// data keys sealed under it.
pub struct KeyStore {
    block_file: Arc<BlockFile>,
    registries: Arc<Registries>,
    clock: Arc<dyn Clock>,
    logger: Arc<dyn Logger>,
    metrics: Arc<dyn MetricsSink>,
    state: Mutex<KeyStoreState>,
}

impl KeyStore {
    /// Build a KeyStore over an already-open block file. Does not itself
    /// unlock anything — call [`KeyStore::initialize`] or
    /// [`KeyStore::unlock`] next.
    pub fn new(
        block_file: Arc<BlockFile>,
        registries: Arc<Registries>,
        clock: Arc<dyn Clock>,
        logger: Arc<dyn Logger>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        KeyStore {
            block_file,
            registries,
            clock,
            logger,
            metrics,
            state: Mutex::new(KeyStoreState::Locked),
        }
    }

    /// True if at least one `KeyExchange` block exists on disk.
    pub fn is_initialized(&self) -> Result<bool> {
        Ok(self.key_exchange_block_ids()?.next().is_some())
    }

    /// True if a master key is currently held in memory.
    pub fn is_unlocked(&self) -> bool {
        matches!(&*self.state.lock(), KeyStoreState::Unlocked(_))
    }

    /// Generate a fresh master key, seal it under `credential`, and
    /// create the default `data-key` and `index-key` entries. Fails with
    /// [`EmailDbError::Conflict`] if already initialized or unlocked.
    pub fn initialize(&self, credential: UnlockCredential) -> Result<()> {
        if self.is_unlocked() {
            return Err(EmailDbError::Conflict("key store is already unlocked".into()));
        }
        if self.is_initialized()? {
            return Err(EmailDbError::Conflict("key store is already initialized".into()));
        }

        let mut rng = OsRng;
        let mut master_key = vec![0u8; 32];
        rng.fill_bytes(&mut master_key);

        let mut salt = vec![0u8; 16];
        rng.fill_bytes(&mut salt);
        let kek = derive_key_encryption_key(credential.secret_bytes(), &salt, DEFAULT_KDF_PARAMS)?;
        let (sealed_master_key, sealed_master_key_iv, sealed_master_key_tag) =
            self.seal_bytes(&kek, &master_key, &mut rng)?;

        let exchange_block_id = self.block_file.allocate_block_id();
        let exchange_content = KeyExchangeContent {
            method: credential.method(),
            sealed_master_key,
            sealed_master_key_iv,
            sealed_master_key_tag,
            kdf_salt: salt,
            kdf_params: DEFAULT_KDF_PARAMS,
            active: true,
        };
        self.append_block(exchange_block_id, BlockType::KeyExchange, &exchange_content)?;

        let now = self.clock.now_nanos();
        let mut entries = Vec::new();
        let mut data_keys = std::collections::HashMap::new();
        for (key_id, purpose) in [
            ("data-key-1", KeyPurpose::DataEncryption),
            ("index-key-1", KeyPurpose::IndexEncryption),
        ] {
            let mut key_bytes = vec![0u8; 32];
            rng.fill_bytes(&mut key_bytes);
            let (sealed_key, sealed_key_iv, sealed_key_tag) =
                self.seal_bytes(&master_key, &key_bytes, &mut rng)?;
            entries.push(DataKeyEntry {
                key_id: key_id.to_string(),
                purpose,
                algorithm_id: INTERNAL_SEAL_ALGORITHM_ID,
                sealed_key,
                sealed_key_iv,
                sealed_key_tag,
                created_at: now,
                revoked_at: None,
            });
            data_keys.insert(
                key_id.to_string(),
                DataKeyHandle {
                    key_bytes: Zeroizing::new(key_bytes),
                    purpose,
                    algorithm_id: INTERNAL_SEAL_ALGORITHM_ID,
                    created_at: now,
                    revoked_at: None,
                },
            );
        }

        let key_manager_block_id = self.block_file.allocate_block_id();
        let key_manager_content = KeyManagerContent {
            entries: entries.clone(),
            previous_block_id: None,
        };
        self.append_block(key_manager_block_id, BlockType::KeyManager, &key_manager_content)?;

        *self.state.lock() = KeyStoreState::Unlocked(UnlockedState {
            master_key: Zeroizing::new(master_key),
            key_manager_head: Some(key_manager_block_id),
            known_entries: entries,
            data_keys,
        });

        self.logger.log(
            LogLevel::Info,
            "emaildb_keystore::initialize",
            &"master key and default data keys created",
        );
        self.metrics.counter("keystore_initialized", 1);
        Ok(())
    }

    /// Unlock the master key with `credential`, then load the most
    /// recent readable `KeyManager` generation's data keys. A no-op if
    /// already unlocked.
    ///
    /// Per spec.md §4.3, a `KeyManager` block snapshots its *entire*
    /// accumulated entry set, so only the newest readable generation is
    /// loaded; older generations are walked only for recovery, when the
    /// newest is corrupt.
    pub fn unlock(&self, credential: UnlockCredential) -> Result<()> {
        if self.is_unlocked() {
            return Ok(());
        }

        let method = credential.method();
        let exchanges = self.read_key_exchange_blocks()?;
        let mut candidates = exchanges
            .into_iter()
            .filter(|content| content.active && content.method == method)
            .peekable();

        if candidates.peek().is_none() {
            return Err(EmailDbError::NoUnlockMethods);
        }

        let mut master_key = None;
        for content in candidates {
            let kek = derive_key_encryption_key(
                credential.secret_bytes(),
                &content.kdf_salt,
                content.kdf_params,
            )?;
            if let Ok(mk) = self.unseal_bytes(
                &kek,
                &content.sealed_master_key,
                &content.sealed_master_key_iv,
                &content.sealed_master_key_tag,
            ) {
                master_key = Some(mk);
                break;
            }
        }
        let master_key = master_key.ok_or(EmailDbError::BadCredential)?;

        let (head, known_entries, data_keys) = self.load_newest_key_manager(&master_key)?;

        *self.state.lock() = KeyStoreState::Unlocked(UnlockedState {
            master_key: Zeroizing::new(master_key),
            key_manager_head: head,
            known_entries,
            data_keys,
        });

        self.logger
            .log(LogLevel::Info, "emaildb_keystore::unlock", &"master key unlocked");
        self.metrics.counter("keystore_unlocked", 1);
        Ok(())
    }

    /// Decrypted bytes of a data key, by id. Requires the store to be
    /// unlocked and the key to have been successfully unsealed.
    pub fn get_key(&self, key_id: &str) -> Result<Vec<u8>> {
        self.get_key_internal(key_id)
            .map_err(|e| e.into_email_db_error(0))
    }

    /// Create a new data key under a fresh id, appending an updated
    /// `KeyManager` generation that carries forward every existing
    /// entry.
    pub fn create_key(&self, key_id: impl Into<String>, purpose: KeyPurpose, algorithm_id: u8) -> Result<String> {
        let key_id = key_id.into();
        let mut state = self.state.lock();
        let unlocked = match &mut *state {
            KeyStoreState::Unlocked(u) => u,
            KeyStoreState::Locked => return Err(EmailDbError::BadCredential),
        };
        if unlocked.data_keys.contains_key(&key_id) {
            return Err(EmailDbError::Conflict(format!("key id {key_id} already exists")));
        }

        let key_len = self
            .registries
            .encryption
            .get(algorithm_id)
            .ok_or_else(|| EmailDbError::Schema(format!("unknown encryption algorithm {algorithm_id}")))?
            .key_len();

        let mut rng = OsRng;
        let mut key_bytes = vec![0u8; key_len];
        rng.fill_bytes(&mut key_bytes);
        let now = self.clock.now_nanos();
        let (sealed_key, sealed_key_iv, sealed_key_tag) =
            self.seal_bytes(&unlocked.master_key, &key_bytes, &mut rng)?;

        let mut entries = unlocked.known_entries.clone();
        entries.push(DataKeyEntry {
            key_id: key_id.clone(),
            purpose,
            algorithm_id,
            sealed_key,
            sealed_key_iv,
            sealed_key_tag,
            created_at: now,
            revoked_at: None,
        });

        let block_id = self.block_file.allocate_block_id();
        let content = KeyManagerContent {
            entries: entries.clone(),
            previous_block_id: unlocked.key_manager_head,
        };
        self.append_block(block_id, BlockType::KeyManager, &content)?;

        unlocked.data_keys.insert(
            key_id.clone(),
            DataKeyHandle {
                key_bytes: Zeroizing::new(key_bytes),
                purpose,
                algorithm_id,
                created_at: now,
                revoked_at: None,
            },
        );
        unlocked.known_entries = entries;
        unlocked.key_manager_head = Some(block_id);

        self.logger
            .log(LogLevel::Info, "emaildb_keystore::create_key", &format!("created key {key_id}"));
        self.metrics.counter("keystore_keys_created", 1);
        Ok(key_id)
    }

    /// Generate a new key for the same purpose/algorithm as `key_id`,
    /// mark `key_id` revoked, and return the new key's id. Existing
    /// blocks still referencing `key_id` remain readable (§4.3 P10: a
    /// rotation never invalidates prior ciphertext).
    pub fn rotate_key(&self, key_id: &str) -> Result<String> {
        let mut state = self.state.lock();
        let unlocked = match &mut *state {
            KeyStoreState::Unlocked(u) => u,
            KeyStoreState::Locked => return Err(EmailDbError::BadCredential),
        };
        let old = unlocked
            .data_keys
            .get(key_id)
            .ok_or_else(|| EmailDbError::NotFound(format!("key {key_id}")))?;
        let purpose = old.purpose;
        let algorithm_id = old.algorithm_id;
        let key_len = self
            .registries
            .encryption
            .get(algorithm_id)
            .map(|p| p.key_len())
            .unwrap_or(old.key_bytes.len());

        let now = self.clock.now_nanos();
        let new_key_id = format!("{key_id}-r{now}");
        let mut rng = OsRng;
        let mut new_key_bytes = vec![0u8; key_len];
        rng.fill_bytes(&mut new_key_bytes);
        let (sealed_key, sealed_key_iv, sealed_key_tag) =
            self.seal_bytes(&unlocked.master_key, &new_key_bytes, &mut rng)?;

        let mut entries = unlocked.known_entries.clone();
        for entry in entries.iter_mut() {
            if entry.key_id == key_id && entry.revoked_at.is_none() {
                entry.revoked_at = Some(now);
            }
        }
        entries.push(DataKeyEntry {
            key_id: new_key_id.clone(),
            purpose,
            algorithm_id,
            sealed_key,
            sealed_key_iv,
            sealed_key_tag,
            created_at: now,
            revoked_at: None,
        });

        let block_id = self.block_file.allocate_block_id();
        let content = KeyManagerContent {
            entries: entries.clone(),
            previous_block_id: unlocked.key_manager_head,
        };
        self.append_block(block_id, BlockType::KeyManager, &content)?;

        if let Some(handle) = unlocked.data_keys.get_mut(key_id) {
            handle.revoked_at = Some(now);
        }
        unlocked.data_keys.insert(
            new_key_id.clone(),
            DataKeyHandle {
                key_bytes: Zeroizing::new(new_key_bytes),
                purpose,
                algorithm_id,
                created_at: now,
                revoked_at: None,
            },
        );
        unlocked.known_entries = entries;
        unlocked.key_manager_head = Some(block_id);

        self.logger.log(
            LogLevel::Info,
            "emaildb_keystore::rotate_key",
            &format!("rotated {key_id} -> {new_key_id}"),
        );
        self.metrics.counter("keystore_key_rotations", 1);
        Ok(new_key_id)
    }

    /// The most recently created, unrevoked key for `purpose`, or
    /// `None` if none exists.
    pub fn default_key_id(&self, purpose: KeyPurpose) -> Option<String> {
        let state = self.state.lock();
        let KeyStoreState::Unlocked(unlocked) = &*state else {
            return None;
        };
        unlocked
            .data_keys
            .iter()
            .filter(|(_, h)| h.purpose == purpose && h.revoked_at.is_none())
            .max_by_key(|(_, h)| h.created_at)
            .map(|(id, _)| id.clone())
    }

    fn get_key_internal(&self, key_id: &str) -> std::result::Result<Vec<u8>, CodecError> {
        let state = self.state.lock();
        match &*state {
            KeyStoreState::Locked => Err(CodecError::KeyNotFound(key_id.to_string())),
            KeyStoreState::Unlocked(unlocked) => unlocked
                .data_keys
                .get(key_id)
                .map(|h| h.key_bytes.to_vec())
                .ok_or_else(|| CodecError::KeyNotFound(key_id.to_string())),
        }
    }

    fn append_block<T: serde::Serialize>(&self, block_id: BlockId, block_type: BlockType, content: &T) -> Result<()> {
        let payload = emaildb_serializer::encode(content, PayloadEncoding::Raw)?;
        let block = RawBlock {
            block_id,
            block_type,
            flags: BlockFlags::new(0, 0, PayloadEncoding::Raw),
            timestamp: self.clock.now_nanos(),
            extended_header: None,
            payload,
        };
        self.block_file.append(block)?;
        Ok(())
    }

    fn key_exchange_block_ids(&self) -> Result<impl Iterator<Item = BlockId>> {
        let locations = self.block_file.locations();
        let mut ids: Vec<BlockId> = locations
            .iter()
            .filter(|(_, loc)| loc.block_type == BlockType::KeyExchange)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        Ok(ids.into_iter())
    }

    fn read_key_exchange_blocks(&self) -> Result<Vec<KeyExchangeContent>> {
        let mut out = Vec::new();
        for block_id in self.key_exchange_block_ids()? {
            let block = self.block_file.read(block_id)?;
            let encoding = block
                .flags
                .payload_encoding()
                .ok_or_else(|| EmailDbError::UnknownEncoding(block.flags.payload_encoding_tag()))?;
            out.push(emaildb_serializer::decode::<KeyExchangeContent>(&block.payload, encoding)?);
        }
        Ok(out)
    }

    fn read_key_manager_content(&self, block_id: BlockId) -> Result<KeyManagerContent> {
        let block = self.block_file.read(block_id)?;
        let encoding = block
            .flags
            .payload_encoding()
            .ok_or_else(|| EmailDbError::UnknownEncoding(block.flags.payload_encoding_tag()))?;
        emaildb_serializer::decode::<KeyManagerContent>(&block.payload, encoding)
    }

    /// Walk `KeyManager` generations from newest to oldest, using the
    /// first one whose block reads and decodes cleanly. Individual
    /// entries that fail to unseal (e.g. truncated sealed bytes) are
    /// dropped with a warning rather than failing the whole unlock.
    fn load_newest_key_manager(
        &self,
        master_key: &[u8],
    ) -> Result<(Option<BlockId>, Vec<DataKeyEntry>, std::collections::HashMap<String, DataKeyHandle>)> {
        let locations = self.block_file.locations();
        let mut ids: Vec<BlockId> = locations
            .iter()
            .filter(|(_, loc)| loc.block_type == BlockType::KeyManager)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();

        for &block_id in ids.iter().rev() {
            match self.read_key_manager_content(block_id) {
                Ok(content) => {
                    let mut data_keys = std::collections::HashMap::new();
                    for entry in &content.entries {
                        match self.unseal_bytes(master_key, &entry.sealed_key, &entry.sealed_key_iv, &entry.sealed_key_tag) {
                            Ok(bytes) => {
                                data_keys.insert(
                                    entry.key_id.clone(),
                                    DataKeyHandle {
                                        key_bytes: Zeroizing::new(bytes),
                                        purpose: entry.purpose,
                                        algorithm_id: entry.algorithm_id,
                                        created_at: entry.created_at,
                                        revoked_at: entry.revoked_at,
                                    },
                                );
                            }
                            Err(e) => {
                                self.logger.log(
                                    LogLevel::Warn,
                                    "emaildb_keystore::unlock",
                                    &format!("data key {} failed to unseal: {e}", entry.key_id),
                                );
                            }
                        }
                    }
                    return Ok((Some(block_id), content.entries, data_keys));
                }
                Err(e) => {
                    self.logger.log(
                        LogLevel::Warn,
                        "emaildb_keystore::unlock",
                        &format!("KeyManager block {block_id} unreadable ({e}), walking to an earlier generation"),
                    );
                    self.metrics.counter("keystore_recovery_gap", 1);
                }
            }
        }
        Ok((None, Vec::new(), std::collections::HashMap::new()))
    }

    fn seal_bytes(&self, key: &[u8], plaintext: &[u8], rng: &mut dyn RngCore) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>)> {
        let provider = self
            .registries
            .encryption
            .get(INTERNAL_SEAL_ALGORITHM_ID)
            .expect("AES-256-GCM must be registered");
        let mut iv = vec![0u8; provider.nonce_len()];
        rng.fill_bytes(&mut iv);
        let (ciphertext, tag) = provider
            .encrypt(plaintext, key, &iv)
            .map_err(|e| e.into_email_db_error(0))?;
        Ok((ciphertext, iv, tag))
    }

    fn unseal_bytes(&self, key: &[u8], ciphertext: &[u8], iv: &[u8], tag: &[u8]) -> std::result::Result<Vec<u8>, CodecError> {
        let provider = self
            .registries
            .encryption
            .get(INTERNAL_SEAL_ALGORITHM_ID)
            .expect("AES-256-GCM must be registered");
        provider.decrypt(ciphertext, key, iv, tag)
    }
}

impl KeyProvider for KeyStore {
    fn key_for(&self, key_id: &str) -> std::result::Result<Vec<u8>, CodecError> {
        self.get_key_internal(key_id)
    }
}
