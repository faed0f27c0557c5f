//! Public result types returned by [`crate::Engine`] (spec.md §6).

use emaildb_core::{BlockId, BlockType, CompoundId};
use std::collections::HashMap;
use std::path::PathBuf;

/// A full email as returned by [`crate::Engine::get_email`] — unlike
/// [`emaildb_serializer::EmailEnvelope`], this carries the original
/// `.eml` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    /// Where this email lives.
    pub id: CompoundId,
    /// RFC 5322 `Message-ID`.
    pub message_id: String,
    /// Decoded subject line.
    pub subject: String,
    /// Decoded `From` address.
    pub from: String,
    /// Decoded `To` addresses.
    pub to: Vec<String>,
    /// UTC nanoseconds from the `Date` header, or import time.
    pub date: i64,
    /// The original `.eml` bytes, verbatim.
    pub raw_eml: Vec<u8>,
}

/// Ordering for [`crate::Engine::list_folder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Oldest `date` first.
    DateAscending,
    /// Newest `date` first.
    DateDescending,
}

/// Aggregate counts returned by [`crate::Engine::stats`] (spec.md §6).
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Current on-disk file size, in bytes.
    pub file_size: u64,
    /// Number of blocks of each type currently on disk.
    pub block_counts_by_type: HashMap<BlockType, u64>,
    /// Number of distinct emails indexed by message id.
    pub email_count: u64,
    /// Number of distinct folders with at least one generation written.
    pub folder_count: u64,
    /// Estimated bytes occupied by blocks a maintenance pass would
    /// consider for removal.
    pub superseded_bytes: u64,
}

/// Result of [`crate::Engine::run_maintenance`], re-exported from
/// `emaildb-engine` under the facade's own name for API stability.
pub type MaintenanceReport = emaildb_engine::MaintenanceReport;

/// Result of [`crate::Engine::compact`].
#[derive(Debug, Clone)]
pub struct CompactionReport {
    /// Path of the (now-compacted) database file.
    pub path: PathBuf,
    /// Blocks dropped during this compaction.
    pub blocks_dropped: usize,
    /// File size before compaction, in bytes.
    pub bytes_before: u64,
    /// File size after compaction, in bytes.
    pub bytes_after: u64,
}

/// Result of [`crate::Engine::verify_integrity`].
#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
    /// Total blocks examined.
    pub blocks_scanned: usize,
    /// Block ids whose payload checksum failed to validate.
    pub corrupt_block_ids: Vec<BlockId>,
    /// Whether the in-memory indexes are known to have diverged from
    /// the block file (see `emaildb_engine::IndexStore::is_suspect`).
    pub index_suspect: bool,
}

impl IntegrityReport {
    /// Whether every examined block passed its checksum.
    pub fn is_clean(&self) -> bool {
        self.corrupt_block_ids.is_empty()
    }
}
