//! BlockStore: typed read/write facade over `BlockFile` + `PayloadCodec`
//! + the content serializer (spec.md §4.5).

use crate::cache::PayloadCache;
use crate::payload::BlockPayload;
use emaildb_block::{BlockFile, BlockFlags, RawBlock};
use emaildb_codec::{EncryptionRequest, KeyProvider, Registries};
use emaildb_core::{BlockId, Clock, EmailDbError, LogLevel, Logger, MetricsSink, PayloadEncoding, Result};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use std::sync::Arc;

/// Default size budget for the in-memory payload cache: 64 MiB.
pub const DEFAULT_CACHE_BYTES: usize = 64 * 1024 * 1024;

/// Default floor below which requested compression is skipped even if
/// asked for (spec.md §4.2 thresholding).
pub const DEFAULT_COMPRESSION_THRESHOLD_BYTES: usize = 1024;

/// Per-write knobs. Defaults to an unencrypted, uncompressed, `Raw`
/// (bincode) block.
#[derive(Clone)]
pub struct WriteOptions {
    /// Compression algorithm id, or `0` for none.
    pub compression_id: u8,
    /// Encryption algorithm id, or `0` for none. Ignored unless
    /// `key_id` is also set.
    pub encryption_id: u8,
    /// Data key id to encrypt under; `None` means the block is written
    /// in the clear regardless of `encryption_id`.
    pub key_id: Option<String>,
    /// How the content is serialized before any transform.
    pub payload_encoding: PayloadEncoding,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            compression_id: 0,
            encryption_id: 0,
            key_id: None,
            payload_encoding: PayloadEncoding::Raw,
        }
    }
}

/// Typed facade over the append-only block file (spec.md §4.5).
pub struct BlockStore {
    block_file: Arc<BlockFile>,
    registries: Arc<Registries>,
    key_provider: Arc<dyn KeyProvider>,
    clock: Arc<dyn Clock>,
    logger: Arc<dyn Logger>,
    metrics: Arc<dyn MetricsSink>,
    cache: Mutex<PayloadCache>,
    compression_threshold_bytes: usize,
}

impl BlockStore {
    /// Build a store over an already-open block file.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        block_file: Arc<BlockFile>,
        registries: Arc<Registries>,
        key_provider: Arc<dyn KeyProvider>,
        clock: Arc<dyn Clock>,
        logger: Arc<dyn Logger>,
        metrics: Arc<dyn MetricsSink>,
        cache_byte_budget: usize,
        compression_threshold_bytes: usize,
    ) -> Self {
        BlockStore {
            block_file,
            registries,
            key_provider,
            clock,
            logger,
            metrics,
            cache: Mutex::new(PayloadCache::new(cache_byte_budget)),
            compression_threshold_bytes,
        }
    }

    /// Serialize, compress, encrypt, frame, and append `value`.
    pub fn write<T: BlockPayload>(&self, value: &T, options: WriteOptions) -> Result<BlockId> {
        let block_id = self.block_file.allocate_block_id();
        self.write_with_id(block_id, value, options)
    }

    /// Like [`write`](Self::write), but appends under a block id the
    /// caller already reserved via `block_file().allocate_block_id()`.
    ///
    /// Used by `emaildb-engine`'s batcher, which must hand out a usable
    /// `CompoundId` the moment an email is accepted, before the batch it
    /// belongs to is actually flushed to disk.
    pub fn write_with_id<T: BlockPayload>(&self, block_id: BlockId, value: &T, options: WriteOptions) -> Result<BlockId> {
        let plaintext = emaildb_serializer::encode(value, options.payload_encoding)?;

        let encryption = options
            .key_id
            .as_deref()
            .filter(|_| options.encryption_id != 0)
            .map(|key_id| EncryptionRequest {
                encryption_id: options.encryption_id,
                key_id,
            });

        let mut rng = OsRng;
        let sealed = emaildb_codec::seal(
            &plaintext,
            options.compression_id,
            encryption,
            self.compression_threshold_bytes,
            self.key_provider.as_ref(),
            &self.registries,
            &mut rng,
        )
        .map_err(|e| e.into_email_db_error(block_id))?;

        let flags = BlockFlags::new(sealed.compression_id, sealed.encryption_id, options.payload_encoding);
        let block = RawBlock {
            block_id,
            block_type: T::BLOCK_TYPE,
            flags,
            timestamp: self.clock.now_nanos(),
            extended_header: sealed.extended_header,
            payload: sealed.bytes,
        };
        self.block_file.append(block)?;

        self.cache.lock().insert(block_id, options.payload_encoding, plaintext);
        self.metrics.counter("blockstore_writes", 1);
        Ok(block_id)
    }

    /// Read and decode a block, serving from cache when the plaintext
    /// is already resident.
    pub fn read<T: BlockPayload>(&self, block_id: BlockId) -> Result<T> {
        if let Some((encoding, bytes)) = self.cache.lock().get(block_id) {
            self.metrics.counter("blockstore_cache_hits", 1);
            return emaildb_serializer::decode::<T>(&bytes, encoding);
        }
        self.metrics.counter("blockstore_cache_misses", 1);

        let raw = self.block_file.read(block_id)?;
        if raw.block_type != T::BLOCK_TYPE {
            return Err(EmailDbError::Schema(format!(
                "block {block_id} has type {:?}, expected {:?}",
                raw.block_type,
                T::BLOCK_TYPE
            )));
        }
        let encoding = raw
            .flags
            .payload_encoding()
            .ok_or_else(|| EmailDbError::UnknownEncoding(raw.flags.payload_encoding_tag()))?;

        let plaintext = emaildb_codec::open(
            &raw.payload,
            raw.flags.compression_id(),
            raw.flags.encryption_id(),
            raw.extended_header.as_ref(),
            self.key_provider.as_ref(),
            &self.registries,
        )
        .map_err(|e| {
            if matches!(e, emaildb_codec::CodecError::AuthTagMismatch) {
                self.logger.log(
                    LogLevel::Warn,
                    "emaildb_store::read",
                    &format!("block {block_id} failed authentication"),
                );
            }
            e.into_email_db_error(block_id)
        })?;

        let value = emaildb_serializer::decode::<T>(&plaintext, encoding)?;
        self.cache.lock().insert(block_id, encoding, plaintext);
        Ok(value)
    }

    /// Access to the underlying block file, for components (IndexStore,
    /// MaintenanceEngine) that need raw scan/location access BlockStore
    /// does not itself expose.
    pub fn block_file(&self) -> &Arc<BlockFile> {
        &self.block_file
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emaildb_core::{CompoundId, FixedClock, NoopLogger, NoopMetricsSink};
    use emaildb_serializer::{EmailBatchContent, EmailEnvelope, FolderEnvelopeContent, StoredEmail};
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    struct FixedKeyProvider(StdMutex<HashMap<String, Vec<u8>>>);

    impl FixedKeyProvider {
        fn new() -> Self {
            let mut keys = HashMap::new();
            keys.insert("data-key-1".to_string(), vec![7u8; 32]);
            FixedKeyProvider(StdMutex::new(keys))
        }
    }

    impl KeyProvider for FixedKeyProvider {
        fn key_for(&self, key_id: &str) -> std::result::Result<Vec<u8>, emaildb_codec::CodecError> {
            self.0
                .lock()
                .unwrap()
                .get(key_id)
                .cloned()
                .ok_or_else(|| emaildb_codec::CodecError::KeyNotFound(key_id.to_string()))
        }
    }

    fn store(path: &std::path::Path) -> BlockStore {
        BlockStore::new(
            Arc::new(BlockFile::create(path).unwrap()),
            Arc::new(Registries::default()),
            Arc::new(FixedKeyProvider::new()),
            FixedClock::new(1_000),
            Arc::new(NoopLogger),
            Arc::new(NoopMetricsSink),
            DEFAULT_CACHE_BYTES,
            DEFAULT_COMPRESSION_THRESHOLD_BYTES,
        )
    }

    fn sample_batch() -> EmailBatchContent {
        EmailBatchContent {
            emails: vec![StoredEmail {
                local_id: 0,
                message_id: "<a@x>".to_string(),
                subject: "hi".to_string(),
                from: "a@x".to_string(),
                to: vec!["b@x".to_string()],
                date: 1,
                envelope_hash: [1u8; 32],
                content_hash: [2u8; 32],
                raw_eml: b"From: a\r\n\r\nbody".to_vec(),
            }],
        }
    }

    #[test]
    fn plain_write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let store = store(&dir.path().join("blocks.db"));
        let value = sample_batch();

        let block_id = store.write(&value, WriteOptions::default()).unwrap();
        let read_back: EmailBatchContent = store.read(block_id).unwrap();
        assert_eq!(read_back, value);
    }

    #[test]
    fn encrypted_write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let store = store(&dir.path().join("blocks.db"));
        let value = sample_batch();

        let options = WriteOptions {
            compression_id: 1,
            encryption_id: 1,
            key_id: Some("data-key-1".to_string()),
            payload_encoding: PayloadEncoding::Raw,
        };
        let block_id = store.write(&value, options).unwrap();
        let read_back: EmailBatchContent = store.read(block_id).unwrap();
        assert_eq!(read_back, value);
    }

    #[test]
    fn reading_with_the_wrong_content_type_is_a_schema_error() {
        let dir = tempdir().unwrap();
        let store = store(&dir.path().join("blocks.db"));
        let block_id = store.write(&sample_batch(), WriteOptions::default()).unwrap();

        let err = store.read::<FolderEnvelopeContent>(block_id).unwrap_err();
        assert!(matches!(err, EmailDbError::Schema(_)));
    }

    #[test]
    fn second_read_is_served_from_cache() {
        let dir = tempdir().unwrap();
        let store = store(&dir.path().join("blocks.db"));
        let block_id = store.write(&sample_batch(), WriteOptions::default()).unwrap();

        let _first: EmailBatchContent = store.read(block_id).unwrap();
        let _second: EmailBatchContent = store.read(block_id).unwrap();
        // Functional correctness only here; cache hit/miss accounting is
        // covered directly in `cache.rs`.
    }

    #[test]
    fn write_with_id_honors_a_pre_allocated_block_id() {
        let dir = tempdir().unwrap();
        let store = store(&dir.path().join("blocks.db"));
        let reserved = store.block_file().allocate_block_id();

        let value = sample_batch();
        let written = store.write_with_id(reserved, &value, WriteOptions::default()).unwrap();
        assert_eq!(written, reserved);

        let read_back: EmailBatchContent = store.read(reserved).unwrap();
        assert_eq!(read_back, value);
    }

    #[test]
    fn folder_envelope_round_trips_through_json_encoding() {
        let dir = tempdir().unwrap();
        let store = store(&dir.path().join("blocks.db"));
        let value = FolderEnvelopeContent {
            folder_path: "Inbox".to_string(),
            version: 1,
            envelopes: vec![EmailEnvelope {
                compound_id: CompoundId::new(0, 0),
                message_id: "<a@x>".to_string(),
                subject: "hi".to_string(),
                from: "a@x".to_string(),
                to: vec!["b@x".to_string()],
                date: 1,
                size_bytes: 16,
                envelope_hash: [3u8; 32],
            }],
            previous_block_id: None,
        };

        let options = WriteOptions {
            payload_encoding: PayloadEncoding::Json,
            ..WriteOptions::default()
        };
        let block_id = store.write(&value, options).unwrap();
        let read_back: FolderEnvelopeContent = store.read(block_id).unwrap();
        assert_eq!(read_back, value);
    }
}
