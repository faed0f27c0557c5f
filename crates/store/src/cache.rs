//! Size-budgeted LRU cache of decrypted, decompressed payload bytes
//! (spec.md §4.5).
//!
//! Keyed by `block_id`. No invalidation path is needed — blocks are
//! immutable once written (I4) — so eviction is purely size-driven.

use emaildb_core::{BlockId, PayloadEncoding};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;

pub(crate) struct CachedPayload {
    pub encoding: PayloadEncoding,
    pub bytes: Arc<Vec<u8>>,
}

pub(crate) struct PayloadCache {
    entries: LruCache<BlockId, CachedPayload>,
    bytes_used: usize,
    byte_budget: usize,
}

impl PayloadCache {
    pub(crate) fn new(byte_budget: usize) -> Self {
        // Unbounded by count; `insert` enforces the real (byte) budget.
        let cap = NonZeroUsize::new(usize::MAX).unwrap();
        PayloadCache {
            entries: LruCache::new(cap),
            bytes_used: 0,
            byte_budget,
        }
    }

    pub(crate) fn get(&mut self, block_id: BlockId) -> Option<(PayloadEncoding, Arc<Vec<u8>>)> {
        self.entries.get(&block_id).map(|c| (c.encoding, c.bytes.clone()))
    }

    pub(crate) fn insert(&mut self, block_id: BlockId, encoding: PayloadEncoding, bytes: Vec<u8>) {
        let size = bytes.len();
        if size > self.byte_budget {
            // Too large to ever fit; don't cache it at all.
            return;
        }
        if let Some(old) = self.entries.put(
            block_id,
            CachedPayload {
                encoding,
                bytes: Arc::new(bytes),
            },
        ) {
            self.bytes_used = self.bytes_used.saturating_sub(old.bytes.len());
        }
        self.bytes_used += size;

        while self.bytes_used > self.byte_budget {
            match self.entries.pop_lru() {
                Some((_, evicted)) => self.bytes_used = self.bytes_used.saturating_sub(evicted.bytes.len()),
                None => break,
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
