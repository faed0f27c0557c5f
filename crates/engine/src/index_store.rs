//! `IndexStore`: the seven reference-only indexes over the block file
//! (spec.md §4.8). Every index can be recomputed from the block file
//! alone — losing it is a performance problem, never a correctness one.

use emaildb_core::{BlockId, BlockType, CompoundId, LogLevel, Logger, MetricsSink, Result};
use emaildb_serializer::{EmailBatchContent, FolderContent, FolderEnvelopeContent};
use emaildb_store::BlockStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::batcher::DedupLookup;

/// Lowercases, splits on non-alphanumeric boundaries, drops stop words
/// and anything under 3 Unicode code points (spec.md §4.12).
pub fn tokenize(text: &str) -> Vec<String> {
    const STOP_WORDS: &[&str] = &[
        "the", "and", "for", "are", "but", "not", "you", "all", "can", "her", "was", "one", "our", "out", "has",
        "him", "his", "how", "its", "who", "did", "yes", "yet", "get",
    ];
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .filter(|w| !STOP_WORDS.contains(w))
        .map(|w| w.to_string())
        .collect()
}

#[derive(Default)]
struct IndexMaps {
    by_message_id: HashMap<String, CompoundId>,
    by_envelope_hash: HashMap<[u8; 32], (CompoundId, [u8; 32])>,
    by_content_hash: HashMap<[u8; 32], CompoundId>,
    folder_to_folder_block: HashMap<String, BlockId>,
    compound_to_envelope_block: HashMap<CompoundId, BlockId>,
    folder_to_envelope_block: HashMap<String, BlockId>,
    postings: HashMap<String, Vec<CompoundId>>,
    /// Highest folder version observed per path, so a rebuild scanning
    /// blocks in id order keeps only the most recent generation.
    folder_versions: HashMap<String, u32>,
}

/// Index layer over `BlockStore` (spec.md §4.8). Holds nothing that
/// cannot be recomputed by [`rebuild`](Self::rebuild).
pub struct IndexStore {
    store: Arc<BlockStore>,
    logger: Arc<dyn Logger>,
    metrics: Arc<dyn MetricsSink>,
    maps: RwLock<IndexMaps>,
    suspect: AtomicBool,
}

impl IndexStore {
    /// Build an index store with empty indexes. Callers should follow
    /// up with [`rebuild`](Self::rebuild) unless the block file is
    /// known to be empty.
    pub fn new(store: Arc<BlockStore>, logger: Arc<dyn Logger>, metrics: Arc<dyn MetricsSink>) -> Self {
        IndexStore {
            store,
            logger,
            metrics,
            maps: RwLock::new(IndexMaps::default()),
            suspect: AtomicBool::new(false),
        }
    }

    /// Record a freshly written `EmailBatch` block's emails into the
    /// message-id/envelope-hash/content-hash/term indexes.
    pub fn record_email_batch(&self, block_id: BlockId, batch: &EmailBatchContent) {
        apply_email_batch(&mut self.maps.write(), block_id, batch);
        self.metrics.counter("index_emails_indexed", batch.emails.len() as u64);
    }

    /// Index one email the moment the coordinator accepts it, ahead of
    /// the `EmailBatch` block it will eventually live in actually being
    /// flushed to disk. Safe because `EmailBatcher` allocates a batch's
    /// block id when the batch opens, not when it flushes, so `id` is
    /// already the id the block will be written under.
    #[allow(clippy::too_many_arguments)]
    pub fn record_new_email(
        &self,
        id: CompoundId,
        message_id: &str,
        subject: &str,
        from: &str,
        to: &[String],
        raw_eml: &[u8],
        envelope_hash: [u8; 32],
        content_hash: [u8; 32],
    ) {
        index_one_email(&mut self.maps.write(), id, message_id, subject, from, to, raw_eml, envelope_hash, content_hash);
        self.metrics.counter("index_emails_indexed", 1);
    }

    /// Record a freshly written `Folder`/`FolderEnvelope` block pair.
    /// Out-of-order calls (an older version arriving after a newer one)
    /// are ignored rather than allowed to regress the index.
    pub fn record_folder_update(&self, folder_block_id: BlockId, folder: &FolderContent, envelope_content: &FolderEnvelopeContent) {
        apply_folder_update(&mut self.maps.write(), folder_block_id, folder, envelope_content);
    }

    /// Mark the live indexes as no longer trustworthy (spec.md §4.8: "log
    /// divergence + mark suspect + schedule rebuild" on index-update
    /// failure after a block write already landed). Scheduling here
    /// means recording the need; an actual rebuild is driven by the
    /// coordinator or maintenance engine calling [`rebuild`](Self::rebuild).
    pub fn mark_suspect(&self, reason: &str) {
        self.suspect.store(true, Ordering::SeqCst);
        self.logger
            .log(LogLevel::Error, "emaildb_engine::index_store", &format!("index marked suspect: {reason}"));
        self.metrics.counter("index_marked_suspect", 1);
    }

    /// Whether the live indexes are known to have diverged from the
    /// block file and need a rebuild.
    pub fn is_suspect(&self) -> bool {
        self.suspect.load(Ordering::SeqCst)
    }

    /// Recompute every index from scratch by scanning the block file.
    /// Builds the replacement state off to the side and swaps it in only
    /// on success, so an error midway (or the caller dropping the
    /// future/thread) never leaves the live index partially rewritten.
    pub fn rebuild(&self) -> Result<()> {
        let locations = self.store.block_file().locations();
        let mut ids: Vec<BlockId> = locations.keys().copied().collect();
        ids.sort_unstable();

        let mut fresh = IndexMaps::default();
        let mut folder_blocks: Vec<(BlockId, FolderContent)> = Vec::new();

        for block_id in ids {
            let block_type = locations.get(&block_id).map(|l| l.block_type);
            match block_type {
                Some(BlockType::EmailBatch) => {
                    if let Ok(batch) = self.store.read::<EmailBatchContent>(block_id) {
                        apply_email_batch(&mut fresh, block_id, &batch);
                    }
                }
                Some(BlockType::Folder) => {
                    if let Ok(folder) = self.store.read::<FolderContent>(block_id) {
                        folder_blocks.push((block_id, folder));
                    }
                }
                _ => {}
            }
        }

        for (folder_block_id, folder) in folder_blocks {
            if let Ok(envelope_content) = self.store.read::<FolderEnvelopeContent>(folder.envelope_block_id) {
                apply_folder_update(&mut fresh, folder_block_id, &folder, &envelope_content);
            }
        }

        *self.maps.write() = fresh;
        self.suspect.store(false, Ordering::SeqCst);
        self.logger.log(LogLevel::Info, "emaildb_engine::index_store", &"rebuild complete");
        self.metrics.counter("index_rebuilds", 1);
        Ok(())
    }

    /// `message_id → compound_id`.
    pub fn lookup_by_message_id(&self, message_id: &str) -> Option<CompoundId> {
        self.maps.read().by_message_id.get(message_id).copied()
    }

    /// `content_hash → compound_id`.
    pub fn lookup_by_content_hash(&self, content_hash: &[u8; 32]) -> Option<CompoundId> {
        self.maps.read().by_content_hash.get(content_hash).copied()
    }

    /// `folder_path → folder_block_id` (the current head `Folder` block).
    pub fn folder_block_for(&self, folder_path: &str) -> Option<BlockId> {
        self.maps.read().folder_to_folder_block.get(folder_path).copied()
    }

    /// `folder_path → envelope_block_id` (the current head
    /// `FolderEnvelope` block).
    pub fn envelope_block_for_folder(&self, folder_path: &str) -> Option<BlockId> {
        self.maps.read().folder_to_envelope_block.get(folder_path).copied()
    }

    /// `compound_id → envelope_block_id`: which `FolderEnvelope` block
    /// currently lists this email.
    pub fn envelope_block_for_compound(&self, id: CompoundId) -> Option<BlockId> {
        self.maps.read().compound_to_envelope_block.get(&id).copied()
    }

    /// `term → [compound_id]`, for `SearchEngine`.
    pub fn postings_for(&self, term: &str) -> Vec<CompoundId> {
        self.maps.read().postings.get(term).cloned().unwrap_or_default()
    }

    /// Whether any folder is currently indexed (used to short-circuit
    /// `move`/`delete` validation against a never-populated store).
    pub fn has_any_folder(&self) -> bool {
        !self.maps.read().folder_to_folder_block.is_empty()
    }

    /// Number of distinct emails indexed by message id.
    pub fn email_count(&self) -> usize {
        self.maps.read().by_message_id.len()
    }

    /// Number of distinct folders with at least one generation written.
    pub fn folder_count(&self) -> usize {
        self.maps.read().folder_to_folder_block.len()
    }
}

fn apply_email_batch(maps: &mut IndexMaps, block_id: BlockId, batch: &EmailBatchContent) {
    for email in &batch.emails {
        let id = CompoundId::new(block_id, email.local_id);
        index_one_email(
            maps,
            id,
            &email.message_id,
            &email.subject,
            &email.from,
            &email.to,
            &email.raw_eml,
            email.envelope_hash,
            email.content_hash,
        );
    }
}

#[allow(clippy::too_many_arguments)]
fn index_one_email(
    maps: &mut IndexMaps,
    id: CompoundId,
    message_id: &str,
    subject: &str,
    from: &str,
    to: &[String],
    raw_eml: &[u8],
    envelope_hash: [u8; 32],
    content_hash: [u8; 32],
) {
    maps.by_message_id.insert(message_id.to_string(), id);
    maps.by_envelope_hash.insert(envelope_hash, (id, content_hash));
    maps.by_content_hash.insert(content_hash, id);

    let body = String::from_utf8_lossy(raw_eml);
    let mut terms = tokenize(subject);
    terms.extend(tokenize(from));
    terms.extend(tokenize(&to.join(" ")));
    terms.extend(tokenize(&body));
    terms.sort();
    terms.dedup();
    for term in terms {
        let postings = maps.postings.entry(term).or_default();
        if !postings.contains(&id) {
            postings.push(id);
        }
    }
}

fn apply_folder_update(maps: &mut IndexMaps, folder_block_id: BlockId, folder: &FolderContent, envelope_content: &FolderEnvelopeContent) {
    let current = maps.folder_versions.get(&envelope_content.folder_path).copied().unwrap_or(0);
    if folder.version < current {
        return;
    }
    maps.folder_versions.insert(envelope_content.folder_path.clone(), folder.version);
    maps.folder_to_folder_block.insert(envelope_content.folder_path.clone(), folder_block_id);
    maps.folder_to_envelope_block
        .insert(envelope_content.folder_path.clone(), folder.envelope_block_id);
    for envelope in &envelope_content.envelopes {
        maps.compound_to_envelope_block
            .insert(envelope.compound_id, folder.envelope_block_id);
    }
}

impl DedupLookup for IndexStore {
    fn lookup_by_envelope_hash(&self, envelope_hash: &[u8; 32]) -> Option<(CompoundId, [u8; 32])> {
        self.maps.read().by_envelope_hash.get(envelope_hash).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emaildb_codec::{CodecError, KeyProvider, Registries};
    use emaildb_block::BlockFile;
    use emaildb_core::{FixedClock, NoopLogger, NoopMetricsSink};
    use emaildb_serializer::StoredEmail;
    use emaildb_store::WriteOptions;
    use tempfile::tempdir;

    struct NoKeys;
    impl KeyProvider for NoKeys {
        fn key_for(&self, key_id: &str) -> std::result::Result<Vec<u8>, CodecError> {
            Err(CodecError::KeyNotFound(key_id.to_string()))
        }
    }

    fn index(dir: &std::path::Path) -> IndexStore {
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
        IndexStore::new(store, Arc::new(NoopLogger), Arc::new(NoopMetricsSink))
    }

    fn email(local_id: u32, message_id: &str, subject: &str) -> StoredEmail {
        StoredEmail {
            local_id,
            message_id: message_id.to_string(),
            subject: subject.to_string(),
            from: "sender@example.com".to_string(),
            to: vec!["recipient@example.com".to_string()],
            date: 1,
            envelope_hash: [local_id as u8; 32],
            content_hash: [local_id as u8 + 100; 32],
            raw_eml: b"From: a\r\n\r\nHello world".to_vec(),
        }
    }

    #[test]
    fn rebuild_recovers_message_id_and_term_indexes_from_scratch() {
        let dir = tempdir().unwrap();
        let idx = index(dir.path());
        let batch = EmailBatchContent {
            emails: vec![email(0, "<a@x>", "Quarterly Report"), email(1, "<b@x>", "Lunch plans")],
        };
        let block_id = idx.store.write(&batch, WriteOptions::default()).unwrap();

        // Don't call record_email_batch; only rebuild should populate it.
        idx.rebuild().unwrap();

        assert_eq!(idx.lookup_by_message_id("<a@x>"), Some(CompoundId::new(block_id, 0)));
        assert!(idx.postings_for("quarterly").contains(&CompoundId::new(block_id, 0)));
        assert!(!idx.is_suspect());
    }

    #[test]
    fn tokenize_drops_stop_words_and_short_tokens() {
        let tokens = tokenize("The Quarterly Report is due");
        assert!(!tokens.contains(&"the".to_string()));
        assert!(!tokens.contains(&"is".to_string()));
        assert!(tokens.contains(&"quarterly".to_string()));
        assert!(tokens.contains(&"report".to_string()));
        assert!(tokens.contains(&"due".to_string()));
    }

    #[test]
    fn mark_suspect_is_visible_until_rebuild_clears_it() {
        let dir = tempdir().unwrap();
        let idx = index(dir.path());
        assert!(!idx.is_suspect());
        idx.mark_suspect("simulated divergence");
        assert!(idx.is_suspect());
        idx.rebuild().unwrap();
        assert!(!idx.is_suspect());
    }
}
