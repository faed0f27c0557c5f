//! `VersionManager`: the `Header` block, feature bitflags, and
//! cross-version compatibility rules (spec.md §4.11).

use emaildb_core::{BlockId, Clock, EmailDbError, LogLevel, Logger, MetricsSink, Result};
use emaildb_serializer::HeaderContent;
use emaildb_store::{BlockStore, WriteOptions};
use std::collections::HashMap;
use std::sync::Arc;

/// Conventional block id of the `Header` block.
pub const HEADER_BLOCK_ID: BlockId = 0;

/// This build's on-disk version.
pub const CURRENT_VERSION: (u32, u32, u32) = (1, 0, 0);

/// Oldest on-disk major version this build can still read (with an
/// upgrade available, if its major is below `CURRENT_VERSION`'s).
pub const MINIMUM_SUPPORTED_MAJOR: u32 = 1;

/// Named feature bits carried in `HeaderContent::feature_flags`
/// (spec.md §4.11). Bits not listed here are reserved.
pub mod feature_flags {
    /// Block payloads may be compressed.
    pub const COMPRESSION: u32 = 1 << 0;
    /// Block payloads may be encrypted.
    pub const ENCRYPTION: u32 = 1 << 1;
    /// Emails are stored batched into `EmailBatch` blocks.
    pub const EMAIL_BATCHING: u32 = 1 << 2;
    /// Folder membership is recorded via versioned envelope blocks.
    pub const ENVELOPE_BLOCKS: u32 = 1 << 3;
    /// Keys are managed in-band via `KeyExchange`/`KeyManager` blocks.
    pub const IN_BAND_KEY_MANAGEMENT: u32 = 1 << 4;
    /// Block-to-block hash chaining for tamper evidence beyond
    /// per-block checksums. Not implemented by this build.
    pub const HASH_CHAIN_INTEGRITY: u32 = 1 << 5;
    /// A term index supports full-text search.
    pub const FULL_TEXT_SEARCH: u32 = 1 << 6;
    /// Folders form a user-visible hierarchy.
    pub const FOLDER_HIERARCHY: u32 = 1 << 7;
    /// Content/envelope hashing dedupes imports.
    pub const EMAIL_DEDUPLICATION: u32 = 1 << 8;
    /// Superseded generations are tracked for later compaction.
    pub const BLOCK_SUPERSEDING: u32 = 1 << 9;
    /// Multi-block operations commit atomically. Not implemented by
    /// this build — the coordinator uses compensating writes instead.
    pub const ATOMIC_TRANSACTIONS: u32 = 1 << 10;
}

/// The feature set this build actually implements.
pub const IMPLEMENTED_FEATURE_FLAGS: u32 = feature_flags::COMPRESSION
    | feature_flags::ENCRYPTION
    | feature_flags::EMAIL_BATCHING
    | feature_flags::ENVELOPE_BLOCKS
    | feature_flags::IN_BAND_KEY_MANAGEMENT
    | feature_flags::FULL_TEXT_SEARCH
    | feature_flags::FOLDER_HIERARCHY
    | feature_flags::EMAIL_DEDUPLICATION
    | feature_flags::BLOCK_SUPERSEDING;

/// Pack `major.minor.patch` into one `u32` (spec.md §4.11).
pub fn pack_version(major: u32, minor: u32, patch: u32) -> u32 {
    (major << 24) | (minor << 16) | patch
}

/// Unpack a packed version back into `(major, minor, patch)`.
pub fn unpack_version(packed: u32) -> (u32, u32, u32) {
    (packed >> 24, (packed >> 16) & 0xFF, packed & 0xFFFF)
}

/// Result of comparing an on-disk version against this build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compatibility {
    /// Same major version; read/write freely.
    Compatible,
    /// Readable, and an upgrade to the current version is available.
    CompatibleUpgradeAvailable,
    /// This build cannot safely open the file.
    Incompatible,
}

/// How to move from one on-disk version to another.
pub enum UpgradeStrategy {
    /// Only the header and feature flags change; block content is
    /// unaffected.
    InPlace,
    /// Produces a new file; block content is rewritten.
    Migration,
}

/// On-disk version/feature-flag bookkeeping plus the migration
/// registry (spec.md §4.11).
pub struct VersionManager {
    store: Arc<BlockStore>,
    logger: Arc<dyn Logger>,
    metrics: Arc<dyn MetricsSink>,
    registry: HashMap<((u32, u32, u32), (u32, u32, u32)), UpgradeStrategy>,
}

impl VersionManager {
    /// Build a version manager with the default (empty) migration
    /// registry — this build only ever writes `CURRENT_VERSION`, so
    /// there is nothing yet to migrate from.
    pub fn new(store: Arc<BlockStore>, logger: Arc<dyn Logger>, metrics: Arc<dyn MetricsSink>) -> Self {
        VersionManager {
            store,
            logger,
            metrics,
            registry: HashMap::new(),
        }
    }

    /// Register an upgrade strategy for `(from, to)`.
    pub fn register_upgrade(&mut self, from: (u32, u32, u32), to: (u32, u32, u32), strategy: UpgradeStrategy) {
        self.registry.insert((from, to), strategy);
    }

    /// Locate the `Header` block, or write a fresh one at
    /// `CURRENT_VERSION` if the file is empty (spec.md §4.11).
    pub fn open_or_init(&self) -> Result<HeaderContent> {
        let is_empty = self.store.block_file().locations().is_empty();
        if is_empty {
            let header = HeaderContent {
                packed_version: pack_version(CURRENT_VERSION.0, CURRENT_VERSION.1, CURRENT_VERSION.2),
                feature_flags: IMPLEMENTED_FEATURE_FLAGS,
            };
            self.store.write_with_id(HEADER_BLOCK_ID, &header, WriteOptions::default())?;
            self.logger.log(LogLevel::Info, "emaildb_engine::version", &"initialized fresh header block");
            return Ok(header);
        }

        let header = self.store.read::<HeaderContent>(HEADER_BLOCK_ID)?;
        match self.check_compatibility(header.packed_version) {
            Compatibility::Incompatible => {
                let (major, minor, patch) = unpack_version(header.packed_version);
                Err(EmailDbError::VersionMismatch {
                    reason: format!("on-disk version {major}.{minor}.{patch} is incompatible with this build"),
                })
            }
            Compatibility::CompatibleUpgradeAvailable => {
                self.logger.log(
                    LogLevel::Warn,
                    "emaildb_engine::version",
                    &"on-disk version is older than this build; an upgrade is available but was not applied",
                );
                Ok(header)
            }
            Compatibility::Compatible => Ok(header),
        }
    }

    /// Compare an on-disk packed version against `CURRENT_VERSION`
    /// (spec.md §4.11 compatibility rules).
    pub fn check_compatibility(&self, on_disk_packed: u32) -> Compatibility {
        let (on_disk_major, _, _) = unpack_version(on_disk_packed);
        let (current_major, _, _) = CURRENT_VERSION;

        if on_disk_major == current_major {
            Compatibility::Compatible
        } else if current_major > on_disk_major && on_disk_major >= MINIMUM_SUPPORTED_MAJOR {
            Compatibility::CompatibleUpgradeAvailable
        } else {
            Compatibility::Incompatible
        }
    }

    /// Look up the registered strategy for an upgrade, if any.
    pub fn strategy_for(&self, from: (u32, u32, u32), to: (u32, u32, u32)) -> Option<&UpgradeStrategy> {
        self.registry.get(&(from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emaildb_block::BlockFile;
    use emaildb_codec::{CodecError, KeyProvider, Registries};
    use emaildb_core::{FixedClock, NoopLogger, NoopMetricsSink};
    use tempfile::tempdir;

    struct NoKeys;
    impl KeyProvider for NoKeys {
        fn key_for(&self, key_id: &str) -> std::result::Result<Vec<u8>, CodecError> {
            Err(CodecError::KeyNotFound(key_id.to_string()))
        }
    }

    fn manager(dir: &std::path::Path) -> VersionManager {
        let store = Arc::new(BlockStore::new(
            Arc::new(BlockFile::create(dir.join("b.db")).unwrap()),
            Arc::new(Registries::default()),
            Arc::new(NoKeys),
            FixedClock::new(1),
            Arc::new(NoopLogger),
            Arc::new(NoopMetricsSink),
            emaildb_store::DEFAULT_CACHE_BYTES,
            emaildb_store::DEFAULT_COMPRESSION_THRESHOLD_BYTES,
        ));
        VersionManager::new(store, Arc::new(NoopLogger), Arc::new(NoopMetricsSink))
    }

    #[test]
    fn pack_and_unpack_round_trip() {
        let packed = pack_version(1, 2, 3);
        assert_eq!(unpack_version(packed), (1, 2, 3));
    }

    #[test]
    fn opening_an_empty_file_writes_a_fresh_header_at_the_current_version() {
        let dir = tempdir().unwrap();
        let vm = manager(dir.path());
        let header = vm.open_or_init().unwrap();
        assert_eq!(unpack_version(header.packed_version), CURRENT_VERSION);
        assert_eq!(header.feature_flags, IMPLEMENTED_FEATURE_FLAGS);
    }

    #[test]
    fn reopening_returns_the_same_header() {
        let dir = tempdir().unwrap();
        let vm = manager(dir.path());
        let first = vm.open_or_init().unwrap();
        let second = vm.open_or_init().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn same_major_is_compatible() {
        let dir = tempdir().unwrap();
        let vm = manager(dir.path());
        assert_eq!(vm.check_compatibility(pack_version(1, 4, 0)), Compatibility::Compatible);
    }

    #[test]
    fn a_major_below_the_supported_minimum_is_incompatible() {
        let dir = tempdir().unwrap();
        let vm = manager(dir.path());
        assert_eq!(vm.check_compatibility(pack_version(0, 9, 0)), Compatibility::Incompatible);
    }

    #[test]
    fn a_future_major_this_build_predates_is_incompatible() {
        let dir = tempdir().unwrap();
        let vm = manager(dir.path());
        assert_eq!(vm.check_compatibility(pack_version(2, 0, 0)), Compatibility::Incompatible);
    }
}
