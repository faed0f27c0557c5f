//! `SearchEngine`: query tokenization, posting-list union/scoring, and
//! preview assembly over `emaildb-engine`'s term index (spec.md §4.12).
//!
//! Indexing itself lives in `emaildb-engine::index_store` (the writer
//! that owns the postings); this crate only ever reads them.

#![warn(missing_docs)]

use emaildb_core::{BlockId, CompoundId, Result};
use emaildb_engine::{tokenize, IndexStore};
use emaildb_serializer::{EmailEnvelope, FolderEnvelopeContent};
use emaildb_store::BlockStore;
use std::collections::HashMap;
use std::sync::Arc;

/// A scored search result: the full `EmailEnvelope` preview, never the
/// email body (spec.md §4.12 — that's the entire point of indexing
/// `compound_id → envelope_block_id`).
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Where the full email lives.
    pub id: CompoundId,
    /// The folder-listing preview for this email.
    pub envelope: EmailEnvelope,
    /// `matched_terms / total_terms` plus a small recency boost.
    pub score: f64,
}

/// The result of one `search()` call (spec.md §7): a best-effort result
/// is still returned while the index is only partly rebuilt, annotated
/// so callers can tell the hits may be incomplete rather than silently
/// trusting them.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResults {
    /// Ranked hits, highest score first.
    pub hits: Vec<SearchHit>,
    /// True if the index backing this search is suspect (e.g. a
    /// compaction changed the block file contents since the last
    /// rebuild) — the hits above are best-effort, not guaranteed
    /// complete.
    pub index_stale: bool,
}

/// How much one unit of `block_id` contributes to a hit's score. Chosen
/// small enough that it only breaks ties between otherwise-equal
/// term-match scores rather than ever dominating them — a message that
/// matches one more query term always outranks a newer one that
/// doesn't.
const RECENCY_BOOST_SCALE: f64 = 1e-9;

fn recency_boost(block_id: BlockId) -> f64 {
    block_id as f64 * RECENCY_BOOST_SCALE
}

/// Read-only query layer over `IndexStore` + `BlockStore`.
pub struct SearchEngine {
    store: Arc<BlockStore>,
    index: Arc<IndexStore>,
}

impl SearchEngine {
    /// Build a search engine over an already-populated index.
    pub fn new(store: Arc<BlockStore>, index: Arc<IndexStore>) -> Self {
        SearchEngine { store, index }
    }

    /// Tokenize `query` the same way emails are indexed, union the
    /// posting lists, score by matched-term fraction plus recency, and
    /// return the top `limit` hits with their `EmailEnvelope` preview
    /// attached (spec.md §4.12). `index_stale` mirrors
    /// `IndexStore::is_suspect` — a partly-rebuilt index (e.g. right
    /// after a compaction) still returns its best-effort hits rather
    /// than an error, flagged so the caller knows not to treat them as
    /// exhaustive (spec.md §7).
    pub fn search(&self, query: &str, limit: usize) -> Result<SearchResults> {
        let index_stale = self.index.is_suspect();
        let mut terms = tokenize(query);
        terms.sort();
        terms.dedup();
        if terms.is_empty() || limit == 0 {
            return Ok(SearchResults { hits: Vec::new(), index_stale });
        }
        let total_terms = terms.len() as f64;

        let mut matched_terms: HashMap<CompoundId, usize> = HashMap::new();
        for term in &terms {
            for id in self.index.postings_for(term) {
                *matched_terms.entry(id).or_insert(0) += 1;
            }
        }

        let mut scored: Vec<(CompoundId, f64)> = matched_terms
            .into_iter()
            .map(|(id, count)| {
                let score = count as f64 / total_terms + recency_boost(id.block_id);
                (id, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.0.block_id.cmp(&a.0.block_id)));
        scored.truncate(limit);

        let hits = self.assemble_previews(scored)?;
        Ok(SearchResults { hits, index_stale })
    }

    /// Group scored candidates by their `envelope_block_id`, fetch each
    /// `FolderEnvelope` block once, and attach the matching
    /// `EmailEnvelope` to each hit (spec.md §4.12 preview assembly). A
    /// candidate whose envelope block can no longer be resolved (e.g. it
    /// was deleted from every folder since indexing) is silently
    /// dropped rather than surfaced as a broken hit.
    fn assemble_previews(&self, scored: Vec<(CompoundId, f64)>) -> Result<Vec<SearchHit>> {
        let mut ids_by_block: HashMap<BlockId, Vec<CompoundId>> = HashMap::new();
        for (id, _) in &scored {
            if let Some(envelope_block_id) = self.index.envelope_block_for_compound(*id) {
                ids_by_block.entry(envelope_block_id).or_default().push(*id);
            }
        }

        let mut envelopes_by_id: HashMap<CompoundId, EmailEnvelope> = HashMap::new();
        for (envelope_block_id, wanted) in ids_by_block {
            let content: FolderEnvelopeContent = self.store.read(envelope_block_id)?;
            for envelope in content.envelopes {
                if wanted.contains(&envelope.compound_id) {
                    envelopes_by_id.insert(envelope.compound_id, envelope);
                }
            }
        }

        Ok(scored
            .into_iter()
            .filter_map(|(id, score)| {
                envelopes_by_id.get(&id).cloned().map(|envelope| SearchHit { id, envelope, score })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emaildb_block::BlockFile;
    use emaildb_codec::{CodecError, KeyProvider, Registries};
    use emaildb_core::{FixedClock, NoopLogger, NoopMetricsSink};
    use emaildb_engine::FolderStore;
    use emaildb_store::WriteOptions;
    use emaildb_serializer::{EmailBatchContent, StoredEmail};
    use tempfile::tempdir;

    struct NoKeys;
    impl KeyProvider for NoKeys {
        fn key_for(&self, key_id: &str) -> std::result::Result<Vec<u8>, CodecError> {
            Err(CodecError::KeyNotFound(key_id.to_string()))
        }
    }

    fn harness(dir: &std::path::Path) -> (Arc<BlockStore>, Arc<IndexStore>, FolderStore) {
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
        let index = Arc::new(IndexStore::new(store.clone(), Arc::new(NoopLogger), Arc::new(NoopMetricsSink)));
        let folders = FolderStore::new(
            store.clone(),
            index.clone(),
            FixedClock::new(1),
            Arc::new(NoopLogger),
            Arc::new(NoopMetricsSink),
            WriteOptions::default(),
        );
        (store, index, folders)
    }

    fn stored(local_id: u32, message_id: &str, subject: &str, body: &str) -> StoredEmail {
        StoredEmail {
            local_id,
            message_id: message_id.to_string(),
            subject: subject.to_string(),
            from: "alice@example.com".to_string(),
            to: vec!["bob@example.com".to_string()],
            date: 1,
            envelope_hash: [local_id as u8; 32],
            content_hash: [local_id as u8 + 50; 32],
            raw_eml: format!("From: alice\r\n\r\n{body}").into_bytes(),
        }
    }

    #[test]
    fn more_matching_terms_ranks_higher() {
        let dir = tempdir().unwrap();
        let (store, index, folders) = harness(dir.path());

        let batch = EmailBatchContent {
            emails: vec![
                stored(0, "<a@x>", "Quarterly budget review", "please review the attached budget"),
                stored(1, "<b@x>", "Lunch plans", "want to grab lunch and talk about the budget too"),
            ],
        };
        let block_id = store.write(&batch, WriteOptions::default()).unwrap();
        index.record_email_batch(block_id, &batch);

        for (local_id, subject) in [(0u32, "Quarterly budget review"), (1, "Lunch plans")] {
            folders
                .add_to_folder(
                    "Inbox",
                    EmailEnvelope {
                        compound_id: CompoundId::new(block_id, local_id),
                        message_id: format!("<{local_id}@x>"),
                        subject: subject.to_string(),
                        from: "alice@example.com".to_string(),
                        to: vec!["bob@example.com".to_string()],
                        date: 1,
                        size_bytes: 32,
                        envelope_hash: [local_id as u8; 32],
                    },
                )
                .unwrap();
        }

        let search = SearchEngine::new(store, index);
        let results = search.search("quarterly budget", 10).unwrap();
        assert!(!results.index_stale);
        assert!(!results.hits.is_empty());
        assert_eq!(results.hits[0].id, CompoundId::new(block_id, 0));
        assert_eq!(results.hits[0].envelope.subject, "Quarterly budget review");
    }

    #[test]
    fn limit_truncates_the_result_set() {
        let dir = tempdir().unwrap();
        let (store, index, folders) = harness(dir.path());

        let batch = EmailBatchContent {
            emails: vec![
                stored(0, "<a@x>", "alpha", "shared keyword token here"),
                stored(1, "<b@x>", "beta", "shared keyword token here"),
                stored(2, "<c@x>", "gamma", "shared keyword token here"),
            ],
        };
        let block_id = store.write(&batch, WriteOptions::default()).unwrap();
        index.record_email_batch(block_id, &batch);
        for local_id in 0u32..3 {
            folders
                .add_to_folder(
                    "Inbox",
                    EmailEnvelope {
                        compound_id: CompoundId::new(block_id, local_id),
                        message_id: format!("<{local_id}@x>"),
                        subject: "keyword".to_string(),
                        from: "alice@example.com".to_string(),
                        to: vec!["bob@example.com".to_string()],
                        date: 1,
                        size_bytes: 32,
                        envelope_hash: [local_id as u8; 32],
                    },
                )
                .unwrap();
        }

        let search = SearchEngine::new(store, index);
        let results = search.search("keyword shared token", 2).unwrap();
        assert_eq!(results.hits.len(), 2);
    }

    #[test]
    fn an_empty_or_all_stop_word_query_returns_no_hits() {
        let dir = tempdir().unwrap();
        let (store, index, _folders) = harness(dir.path());
        let search = SearchEngine::new(store, index);
        assert!(search.search("the and for", 10).unwrap().hits.is_empty());
        assert!(search.search("", 10).unwrap().hits.is_empty());
    }

    #[test]
    fn a_suspect_index_flags_results_as_stale() {
        let dir = tempdir().unwrap();
        let (store, index, folders) = harness(dir.path());

        let batch = EmailBatchContent {
            emails: vec![stored(0, "<a@x>", "hello world", "body text")],
        };
        let block_id = store.write(&batch, WriteOptions::default()).unwrap();
        index.record_email_batch(block_id, &batch);
        folders
            .add_to_folder(
                "Inbox",
                EmailEnvelope {
                    compound_id: CompoundId::new(block_id, 0),
                    message_id: "<a@x>".to_string(),
                    subject: "hello world".to_string(),
                    from: "alice@example.com".to_string(),
                    to: vec!["bob@example.com".to_string()],
                    date: 1,
                    size_bytes: 32,
                    envelope_hash: [0u8; 32],
                },
            )
            .unwrap();

        index.mark_suspect("simulated compaction");
        let search = SearchEngine::new(store, index);
        let results = search.search("hello", 10).unwrap();
        assert!(results.index_stale);
        assert_eq!(results.hits.len(), 1);
    }
}
