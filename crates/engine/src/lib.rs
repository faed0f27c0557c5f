//! Storage-engine layer: batching, folders, indexing, multi-block
//! coordination, maintenance, and versioning on top of `emaildb-store`
//! (spec.md §4.6–§4.11).
//!
//! `emaildb-api` wires this crate's pieces behind one facade; nothing
//! here knows about `OpenOptions` or the public `Engine` type.

#![warn(missing_docs)]

pub mod batcher;
pub mod coordinator;
pub mod folder_store;
pub mod hash;
pub mod index_store;
pub mod maintenance;
pub mod parse;
pub mod sizer;
pub mod version;

pub use batcher::{DedupLookup, EmailBatcher, ImportOutcome as BatcherOutcome, NewEmailEntry};
pub use coordinator::{Coordinator, ImportOutcome, LOST_AND_FOUND_FOLDER};
pub use folder_store::{FolderGeneration, FolderStore, MoveOutcome, SupersededGeneration};
pub use index_store::{tokenize, IndexStore};
pub use maintenance::{CompactionOutcome, MaintenanceEngine, MaintenancePolicy, MaintenanceReport};
pub use sizer::AdaptiveSizer;
pub use version::{Compatibility, UpgradeStrategy, VersionManager, CURRENT_VERSION, HEADER_BLOCK_ID};

use emaildb_block::BlockFile;
use emaildb_codec::{KeyProvider, Registries};
use emaildb_core::{Clock, Logger, MetricsSink, Result};
use emaildb_serializer::HeaderContent;
use emaildb_store::{BlockStore, WriteOptions, DEFAULT_CACHE_BYTES, DEFAULT_COMPRESSION_THRESHOLD_BYTES};
use std::sync::Arc;

/// Knobs that shape how [`build`] wires this crate's components
/// together. Mirrors the subset of `EngineOptions` the storage layer
/// cares about; the full option surface lives in `emaildb-api`.
#[derive(Clone)]
pub struct EngineBuildOptions {
    /// Compression/encryption/encoding applied to new blocks.
    pub write_options: WriteOptions,
    /// Payload cache byte budget.
    pub cache_bytes: usize,
    /// Floor below which compression is skipped even if requested.
    pub compression_threshold_bytes: usize,
    /// How long a pending batch may sit before a periodic `tick` flushes
    /// it, in nanoseconds.
    pub max_pending_age_nanos: i64,
    /// Maintenance policy (safety-gate thresholds, backup retention).
    pub maintenance_policy: MaintenancePolicy,
    /// Target-size/soft-cap thresholds for `EmailBatcher`.
    pub adaptive_sizer: AdaptiveSizer,
}

impl Default for EngineBuildOptions {
    fn default() -> Self {
        EngineBuildOptions {
            write_options: WriteOptions::default(),
            cache_bytes: DEFAULT_CACHE_BYTES,
            compression_threshold_bytes: DEFAULT_COMPRESSION_THRESHOLD_BYTES,
            max_pending_age_nanos: 5 * 60 * 1_000_000_000,
            maintenance_policy: MaintenancePolicy::default(),
            adaptive_sizer: AdaptiveSizer::default(),
        }
    }
}

/// Every component `emaildb-api`'s `Engine` facade needs, already
/// wired together over one `BlockFile`.
pub struct EngineComponents {
    /// The current `Header` block, read or freshly written on open.
    pub header: HeaderContent,
    /// Typed block read/write facade.
    pub store: Arc<BlockStore>,
    /// The seven reference-only indexes.
    pub index: Arc<IndexStore>,
    /// Versioned folder state.
    pub folders: Arc<FolderStore>,
    /// Adaptive-sized email batching.
    pub batcher: Arc<EmailBatcher>,
    /// Import/move/delete ordering.
    pub coordinator: Arc<Coordinator>,
    /// Superseded-block tracking and compaction.
    pub maintenance: Arc<MaintenanceEngine>,
    /// Header/feature-flag/compatibility bookkeeping.
    pub version: Arc<VersionManager>,
}

/// Build the full component graph over an already-open `BlockFile`,
/// writing a fresh `Header` block if the file is empty, then rebuilding
/// the indexes from whatever blocks are already present.
#[allow(clippy::too_many_arguments)]
pub fn build(
    block_file: Arc<BlockFile>,
    registries: Arc<Registries>,
    key_provider: Arc<dyn KeyProvider>,
    clock: Arc<dyn Clock>,
    logger: Arc<dyn Logger>,
    metrics: Arc<dyn MetricsSink>,
    options: EngineBuildOptions,
) -> Result<EngineComponents> {
    let store = Arc::new(BlockStore::new(
        block_file,
        registries,
        key_provider,
        clock.clone(),
        logger.clone(),
        metrics.clone(),
        options.cache_bytes,
        options.compression_threshold_bytes,
    ));

    let version = Arc::new(VersionManager::new(store.clone(), logger.clone(), metrics.clone()));
    let header = version.open_or_init()?;

    let index = Arc::new(IndexStore::new(store.clone(), logger.clone(), metrics.clone()));
    index.rebuild()?;

    let folders = Arc::new(FolderStore::new(
        store.clone(),
        index.clone(),
        clock.clone(),
        logger.clone(),
        metrics.clone(),
        options.write_options.clone(),
    ));

    let batcher = Arc::new(EmailBatcher::new(
        store.clone(),
        options.adaptive_sizer,
        clock.clone(),
        logger.clone(),
        metrics.clone(),
        options.max_pending_age_nanos,
        options.write_options.clone(),
    ));

    let coordinator = Arc::new(Coordinator::new(
        batcher.clone(),
        folders.clone(),
        index.clone(),
        clock.clone(),
        logger.clone(),
        metrics.clone(),
    ));

    let maintenance = Arc::new(MaintenanceEngine::new(
        store.clone(),
        index.clone(),
        folders.clone(),
        clock,
        logger,
        metrics,
        options.maintenance_policy,
    ));

    Ok(EngineComponents {
        header,
        store,
        index,
        folders,
        batcher,
        coordinator,
        maintenance,
        version,
    })
}
