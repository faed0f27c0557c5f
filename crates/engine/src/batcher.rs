//! `EmailBatcher`: accumulates emails into `EmailBatch` blocks under
//! adaptive sizing, with dedup-before-enqueue (spec.md §4.6).

use crate::sizer::AdaptiveSizer;
use emaildb_core::{BlockId, Clock, CompoundId, LogLevel, Logger, MetricsSink, Result};
use emaildb_serializer::StoredEmail;
use emaildb_store::{BlockStore, WriteOptions};
use parking_lot::Mutex;
use std::sync::Arc;

/// An email on its way into the store. Hashes are computed by the
/// caller (the coordinator knows header-normalization rules the
/// batcher does not need to).
pub struct NewEmailEntry {
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
    /// Dedup key over envelope fields (spec.md §3.A).
    pub envelope_hash: [u8; 32],
    /// Dedup key over full content.
    pub content_hash: [u8; 32],
    /// The original `.eml` bytes, verbatim.
    pub raw_eml: Vec<u8>,
}

/// Result of offering an email to the batcher.
pub struct ImportOutcome {
    /// Where the email lives (existing, if deduplicated).
    pub id: CompoundId,
    /// Whether this email was already present and was not re-stored.
    pub deduplicated: bool,
}

/// Looked up by envelope hash before an email is ever enqueued, so a
/// duplicate never reaches disk. Implemented by `IndexStore`; kept as a
/// trait here so the batcher does not depend on the index layer's
/// internals.
pub trait DedupLookup: Send + Sync {
    /// Returns the existing compound id and content hash for a known
    /// envelope hash, if any.
    fn lookup_by_envelope_hash(&self, envelope_hash: &[u8; 32]) -> Option<(CompoundId, [u8; 32])>;
}

struct PendingBatch {
    block_id: BlockId,
    emails: Vec<StoredEmail>,
    bytes: u64,
    opened_at_nanos: i64,
    /// Monotonic, never reused even across `discard_if_unflushed` —
    /// local ids already handed out as part of a `CompoundId` must stay
    /// unique within this batch regardless of what else is removed.
    next_local_id: u32,
}

/// Accumulates emails into `EmailBatch` blocks, flushing on soft-cap,
/// max age, or explicit request (spec.md §4.6).
pub struct EmailBatcher {
    store: Arc<BlockStore>,
    sizer: AdaptiveSizer,
    clock: Arc<dyn Clock>,
    logger: Arc<dyn Logger>,
    metrics: Arc<dyn MetricsSink>,
    max_pending_age_nanos: i64,
    write_options: WriteOptions,
    pending: Mutex<Option<PendingBatch>>,
}

impl EmailBatcher {
    /// Build a batcher over an already-open `BlockStore`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<BlockStore>,
        sizer: AdaptiveSizer,
        clock: Arc<dyn Clock>,
        logger: Arc<dyn Logger>,
        metrics: Arc<dyn MetricsSink>,
        max_pending_age_nanos: i64,
        write_options: WriteOptions,
    ) -> Self {
        EmailBatcher {
            store,
            sizer,
            clock,
            logger,
            metrics,
            max_pending_age_nanos,
            write_options,
            pending: Mutex::new(None),
        }
    }

    /// Offer one email. Checks dedup first; if new, enqueues it (opening
    /// a fresh batch and allocating its block id if none is pending, or
    /// flushing the current one first if it would exceed the soft cap).
    ///
    /// The returned `CompoundId` is usable immediately even though the
    /// batch may not be flushed to disk yet — the block id is allocated
    /// when the batch opens, not when it is written.
    pub fn add(&self, entry: NewEmailEntry, dedup: &dyn DedupLookup, store_size_bytes: u64) -> Result<ImportOutcome> {
        if let Some((existing_id, existing_content_hash)) = dedup.lookup_by_envelope_hash(&entry.envelope_hash) {
            if existing_content_hash != entry.content_hash {
                self.metrics.counter("envelope_hash_collisions", 1);
                self.logger.log(
                    LogLevel::Warn,
                    "emaildb_engine::batcher",
                    &format!("envelope hash collision for message {}", entry.message_id),
                );
            }
            return Ok(ImportOutcome {
                id: existing_id,
                deduplicated: true,
            });
        }

        let next_bytes = entry.raw_eml.len() as u64;
        let mut guard = self.pending.lock();

        if let Some(batch) = guard.as_ref() {
            if self.sizer.should_flush_before_adding(batch.bytes, next_bytes, store_size_bytes) {
                self.flush_locked(&mut guard)?;
            }
        }

        if guard.is_none() {
            *guard = Some(PendingBatch {
                block_id: self.store.block_file().allocate_block_id(),
                emails: Vec::new(),
                bytes: 0,
                opened_at_nanos: self.clock.now_nanos(),
                next_local_id: 0,
            });
        }

        let batch = guard.as_mut().expect("just opened above");
        let local_id = batch.next_local_id;
        batch.next_local_id += 1;
        let compound_id = CompoundId::new(batch.block_id, local_id);
        batch.bytes += next_bytes;
        batch.emails.push(StoredEmail {
            local_id,
            message_id: entry.message_id,
            subject: entry.subject,
            from: entry.from,
            to: entry.to,
            date: entry.date,
            envelope_hash: entry.envelope_hash,
            content_hash: entry.content_hash,
            raw_eml: entry.raw_eml,
        });
        self.metrics.counter("emails_batched", 1);

        Ok(ImportOutcome {
            id: compound_id,
            deduplicated: false,
        })
    }

    /// Look up `id` inside the still-pending (not yet flushed) batch, if
    /// it is there. A block id not yet present on disk at all (because
    /// its batch hasn't flushed) would otherwise make `BlockStore::read`
    /// fail with `NotFound` even though the email was accepted — callers
    /// needing a just-imported email's bytes (rather than just its
    /// envelope, which the folder layer already has) should check here
    /// before reading the block file directly.
    pub fn pending(&self, id: CompoundId) -> Option<StoredEmail> {
        let guard = self.pending.lock();
        let batch = guard.as_ref()?;
        if batch.block_id != id.block_id {
            return None;
        }
        batch.emails.iter().find(|e| e.local_id == id.local_id).cloned()
    }

    /// Flush the pending batch, if any, to disk. Returns the block id
    /// written, if a flush actually happened.
    pub fn flush(&self) -> Result<Option<BlockId>> {
        let mut guard = self.pending.lock();
        self.flush_locked(&mut guard)
    }

    /// Remove `id` from the pending (not yet flushed) batch, if it is
    /// still there. Returns `true` if removed, `false` if the batch
    /// containing `id` has already been flushed to disk (or never
    /// existed) — used by the coordinator's import failure rule
    /// (spec.md §4.9): a folder-attach failure while the batch is still
    /// pending discards the email outright; once flushed it is too late
    /// to discard and the email becomes an orphan instead.
    pub fn discard_if_unflushed(&self, id: CompoundId) -> bool {
        let mut guard = self.pending.lock();
        let Some(batch) = guard.as_mut() else {
            return false;
        };
        if batch.block_id != id.block_id {
            return false;
        }
        let before = batch.emails.len();
        batch.emails.retain(|e| e.local_id != id.local_id);
        let removed = batch.emails.len() != before;
        if removed {
            // `local_id`s already handed out as `CompoundId`s elsewhere
            // are never reassigned — only shrink the byte tally.
            batch.bytes = batch.emails.iter().map(|e| e.raw_eml.len() as u64).sum();
        }
        removed
    }

    /// Flush only if the pending batch has been open longer than
    /// `max_pending_age`. Intended to be called periodically by the
    /// coordinator (spec.md §4.6: "periodic flush on max_pending_age").
    pub fn flush_if_stale(&self) -> Result<Option<BlockId>> {
        let mut guard = self.pending.lock();
        let is_stale = guard
            .as_ref()
            .map(|b| self.clock.now_nanos() - b.opened_at_nanos >= self.max_pending_age_nanos)
            .unwrap_or(false);
        if is_stale {
            self.flush_locked(&mut guard)
        } else {
            Ok(None)
        }
    }

    fn flush_locked(&self, guard: &mut Option<PendingBatch>) -> Result<Option<BlockId>> {
        let Some(batch) = guard.take() else {
            return Ok(None);
        };
        if batch.emails.is_empty() {
            return Ok(None);
        }
        let block_id = batch.block_id;
        let content = emaildb_serializer::EmailBatchContent { emails: batch.emails };

        // `BlockStore::write` allocates its own id; we already reserved
        // `block_id` when the batch opened, so write the frame directly
        // through the block file to honor it instead of going through
        // the typed allocate-on-write path.
        self.store.write_with_id(block_id, &content, self.write_options.clone())?;
        self.logger.log(
            LogLevel::Debug,
            "emaildb_engine::batcher",
            &format!("flushed batch block {block_id} with {} emails", content.emails.len()),
        );
        self.metrics.counter("batches_flushed", 1);
        Ok(Some(block_id))
    }
}
