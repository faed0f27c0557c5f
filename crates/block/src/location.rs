//! In-memory index of where each block lives on disk (§4.1 `locations`).

use crate::flags::BlockFlags;
use emaildb_core::BlockType;

/// Where a block's frame begins and what its header said, without
/// re-reading the payload from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLocation {
    /// Byte offset of `HEADER_MAGIC` for this block's frame.
    pub offset: u64,
    /// Total frame length (the scan step to the next frame).
    pub length: u64,
    /// Block type, read from the header.
    pub block_type: BlockType,
    /// Timestamp, read from the header.
    pub timestamp: i64,
    /// Flags, read from the header.
    pub flags: BlockFlags,
    /// Whether the payload checksum validated when this location was
    /// recorded. A `false` here means `BlockFile::read` will surface
    /// `EmailDbError::Checksum` for this block.
    pub payload_checksum_ok: bool,
}
