//! Identifiers used across the block file and its indexes.

use std::fmt;
use std::str::FromStr;

/// 64-bit identifier of a block, unique within a single block file.
///
/// Assigned monotonically by the writer. Re-issuing an id logically
/// supersedes the prior occurrence of that id (I3); both copies remain
/// on disk until compaction.
pub type BlockId = u64;

/// Identifier of a key inside a `KeyManager` block's entry list.
pub type KeyId = String;

/// `(block_id, local_id)` pair identifying one email inside an
/// `EmailBatch` block.
///
/// Stringifies as `"<block_id>:<local_id>"` for use as an index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompoundId {
    /// Id of the `EmailBatch` block holding this email.
    pub block_id: BlockId,
    /// Index of the email within that batch, assigned in insertion order.
    pub local_id: u32,
}

impl CompoundId {
    /// Build a compound id from its parts.
    pub fn new(block_id: BlockId, local_id: u32) -> Self {
        CompoundId { block_id, local_id }
    }
}

impl fmt::Display for CompoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block_id, self.local_id)
    }
}

/// Error returned when a string does not parse as a [`CompoundId`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid compound id: {0:?}")]
pub struct CompoundIdParseError(String);

impl FromStr for CompoundId {
    type Err = CompoundIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (block, local) = s
            .split_once(':')
            .ok_or_else(|| CompoundIdParseError(s.to_string()))?;
        let block_id = block
            .parse::<BlockId>()
            .map_err(|_| CompoundIdParseError(s.to_string()))?;
        let local_id = local
            .parse::<u32>()
            .map_err(|_| CompoundIdParseError(s.to_string()))?;
        Ok(CompoundId::new(block_id, local_id))
    }
}

impl serde::Serialize for CompoundId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for CompoundId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
