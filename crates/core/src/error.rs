//! Unified error taxonomy for EmailDB (spec.md §7).
//!
//! Every public operation returns a `Result<T, EmailDbError>`. Kinds map
//! directly onto the error taxonomy in the specification; none of them
//! are used for ordinary control flow, and recoverable kinds (a single
//! bad block during `scan`, a stale index) never unwind an unrelated
//! operation.

use crate::ids::BlockId;
use thiserror::Error;

/// Result alias used throughout EmailDB.
pub type Result<T> = std::result::Result<T, EmailDbError>;

/// The unified error type for all EmailDB operations.
#[derive(Debug, Error)]
pub enum EmailDbError {
    /// OS-level read/write/seek failure. Fatal to the current call only;
    /// the engine remains usable afterwards.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Bad magic, bad header checksum, or a truncated frame.
    #[error("framing error at offset {offset}: {detail}")]
    Framing {
        /// Byte offset where framing broke down.
        offset: u64,
        /// Human-readable detail.
        detail: String,
    },

    /// Payload CRC mismatch: good header, unreadable contents.
    #[error("checksum error on block {block_id}: {detail}")]
    Checksum {
        /// Block whose payload failed validation.
        block_id: BlockId,
        /// Human-readable detail.
        detail: String,
    },

    /// Encrypted block failed AEAD verification; treated as tamper or
    /// wrong key. Poisons the block id for the session.
    #[error("authentication tag mismatch on block {block_id}")]
    AuthTagMismatch {
        /// Block whose ciphertext failed authentication.
        block_id: BlockId,
    },

    /// A block id, key id, folder path, or index entry was absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// KeyStore unlock was attempted with the wrong credential.
    #[error("bad credential for key unlock")]
    BadCredential,

    /// No active KeyExchange method exists to unlock the master key.
    #[error("no unlock methods are configured")]
    NoUnlockMethods,

    /// On-disk version is incompatible, or requires a migration the
    /// caller has not requested.
    #[error("version mismatch: {reason}")]
    VersionMismatch {
        /// Explanation of the incompatibility.
        reason: String,
    },

    /// The serializer does not recognize a `payload_encoding` tag.
    #[error("unknown payload encoding tag {0}")]
    UnknownEncoding(u8),

    /// A block's payload could not be decoded into its expected schema.
    #[error("schema error: {0}")]
    Schema(String),

    /// Duplicate block-id append, double-flush, or a rotation issued
    /// against a stale head.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The calling operation was cancelled before it committed anything.
    #[error("operation cancelled")]
    Cancelled,

    /// A deadline (maintenance/compaction) was exceeded.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// An internal invariant was violated. Should not occur; carries
    /// enough context in `detail` to reproduce.
    #[error("internal invariant violation: {0}")]
    Internal(String),

    /// Compaction broke down at a specific phase (spec.md §7). `restored`
    /// is true once the original file has already been reinstated from
    /// the retained backup by the time this error reaches the caller.
    #[error("compaction failed during {phase} phase: {detail} (restored from backup: {restored})")]
    Compaction {
        /// Which step of compaction failed.
        phase: CompactionPhase,
        /// Human-readable detail, usually the underlying error's message.
        detail: String,
        /// Whether the original block file was restored from backup
        /// before this error was returned.
        restored: bool,
    },
}

/// Which step of `compact()` failed (spec.md §7's "structured error
/// describing at which phase").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionPhase {
    /// Copying retained blocks into the sibling file.
    Copy,
    /// Writing the pre-swap backup copy of the original file.
    Backup,
    /// Renaming the sibling file into place over the original.
    Swap,
    /// Rebuilding the engine's component graph against the swapped-in
    /// file.
    Rebuild,
}

impl std::fmt::Display for CompactionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CompactionPhase::Copy => "copy",
            CompactionPhase::Backup => "backup",
            CompactionPhase::Swap => "swap",
            CompactionPhase::Rebuild => "rebuild",
        };
        f.write_str(s)
    }
}

impl EmailDbError {
    /// True for errors that leave the engine in a degraded-but-usable
    /// state rather than signalling a fundamental problem with the
    /// request itself (useful for host-side retry/backoff policies).
    pub fn is_transient(&self) -> bool {
        matches!(self, EmailDbError::Io(_) | EmailDbError::Cancelled)
    }

    /// True for errors that indicate the on-disk bytes for a specific
    /// block are untrustworthy (framing, checksum, or tamper).
    pub fn is_block_corruption(&self) -> bool {
        matches!(
            self,
            EmailDbError::Framing { .. }
                | EmailDbError::Checksum { .. }
                | EmailDbError::AuthTagMismatch { .. }
        )
    }
}
