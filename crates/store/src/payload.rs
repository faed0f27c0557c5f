//! Content types [`BlockStore`](crate::BlockStore) knows how to (de)serialize.

use emaildb_core::BlockType;
use emaildb_serializer::{EmailBatchContent, FolderContent, FolderEnvelopeContent, HeaderContent, LegacyEmailContent};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A content type that corresponds to exactly one [`BlockType`] and can
/// round-trip through [`BlockStore::write`](crate::BlockStore::write)/
/// [`read`](crate::BlockStore::read).
///
/// `KeyExchange`/`KeyManager` content deliberately has no impl here —
/// `emaildb-keystore` writes and reads those blocks directly, since
/// master-key sealing does not go through the ordinary
/// [`emaildb_codec::KeyProvider`]-mediated pipeline.
pub trait BlockPayload: Serialize + DeserializeOwned {
    /// The block type this content is stored as.
    const BLOCK_TYPE: BlockType;
}

impl BlockPayload for HeaderContent {
    const BLOCK_TYPE: BlockType = BlockType::Header;
}

impl BlockPayload for FolderContent {
    const BLOCK_TYPE: BlockType = BlockType::Folder;
}

impl BlockPayload for FolderEnvelopeContent {
    const BLOCK_TYPE: BlockType = BlockType::FolderEnvelope;
}

impl BlockPayload for EmailBatchContent {
    const BLOCK_TYPE: BlockType = BlockType::EmailBatch;
}

impl BlockPayload for LegacyEmailContent {
    const BLOCK_TYPE: BlockType = BlockType::Email;
}
