//! The closed tag sets carried in every block header: `type` and
//! `payload_encoding` (§3, §6).

use serde::{Deserialize, Serialize};

/// Kind of content a block carries.
///
/// Stored as a single byte in the block header (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BlockType {
    /// The format/version header block (conventionally block 0).
    Header = 0,
    /// Free-form engine metadata.
    Metadata = 1,
    /// Reserved, unused by the core (spec.md §9 open question).
    Wal = 2,
    /// Root of the folder hierarchy.
    FolderTree = 3,
    /// A versioned folder record.
    Folder = 4,
    /// Reserved for future sub-partitioning of large folders.
    Segment = 5,
    /// Legacy single-email block; read-only for current writers.
    Email = 6,
    /// A versioned snapshot of one folder's envelopes.
    FolderEnvelope = 7,
    /// A batch of many emails, the primary storage form for messages.
    EmailBatch = 8,
    /// The sealed per-purpose data key list.
    KeyManager = 9,
    /// An unlock-method binding to the sealed master key.
    KeyExchange = 10,
    /// Reserved for a future key-value zone tree segment.
    ZoneTreeSegmentKV = 11,
    /// Reserved for a future vector zone tree segment.
    ZoneTreeSegmentVector = 12,
    /// Marks an entity as logically cleaned up (tombstone bookkeeping).
    Cleanup = 13,
}

impl BlockType {
    /// Decode a raw on-disk tag byte.
    pub fn from_u8(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => BlockType::Header,
            1 => BlockType::Metadata,
            2 => BlockType::Wal,
            3 => BlockType::FolderTree,
            4 => BlockType::Folder,
            5 => BlockType::Segment,
            6 => BlockType::Email,
            7 => BlockType::FolderEnvelope,
            8 => BlockType::EmailBatch,
            9 => BlockType::KeyManager,
            10 => BlockType::KeyExchange,
            11 => BlockType::ZoneTreeSegmentKV,
            12 => BlockType::ZoneTreeSegmentVector,
            13 => BlockType::Cleanup,
            _ => return None,
        })
    }

    /// Encode as the raw on-disk tag byte.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Which decoder the `payload_encoding` byte selects (§4.4).
///
/// A deployment need not ship every encoder to read the file format;
/// unsupported tags surface as `EmailDbError::UnknownEncoding`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PayloadEncoding {
    /// `bincode`-encoded fixed structures.
    Raw = 0,
    /// Protocol Buffers. Not compiled into this build; reserved for
    /// deployments that add the codegen pipeline.
    Protobuf = 1,
    /// `serde_json`-encoded structures.
    Json = 2,
    /// Cap'n Proto. Not compiled into this build; reserved.
    CapnProto = 3,
}

impl PayloadEncoding {
    /// Decode a raw on-disk tag byte.
    pub fn from_u8(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => PayloadEncoding::Raw,
            1 => PayloadEncoding::Protobuf,
            2 => PayloadEncoding::Json,
            3 => PayloadEncoding::CapnProto,
            _ => return None,
        })
    }

    /// Encode as the raw on-disk tag byte.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}
