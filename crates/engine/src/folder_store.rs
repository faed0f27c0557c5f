//! `FolderStore`: versioned, append-only folder state via `Folder` +
//! `FolderEnvelope` block pairs (spec.md §4.7). A folder is never
//! mutated in place — every change produces a new generation and
//! records the old one as superseded.

use crate::index_store::IndexStore;
use emaildb_core::{BlockId, Clock, CompoundId, EmailDbError, LogLevel, Logger, MetricsSink, Result};
use emaildb_serializer::{EmailEnvelope, FolderContent, FolderEnvelopeContent};
use emaildb_store::{BlockStore, WriteOptions};
use parking_lot::Mutex;
use std::sync::Arc;

/// One generation of a folder superseded by a newer one.
#[derive(Debug, Clone)]
pub struct SupersededGeneration {
    /// The `Folder` block id that is no longer current.
    pub folder_block_id: BlockId,
    /// The `FolderEnvelope` block id paired with it.
    pub envelope_block_id: BlockId,
    /// When it was superseded.
    pub superseded_at_nanos: i64,
    /// Why (e.g. `"email_added"`, `"email_removed"`, `"move_compensation"`).
    pub reason: &'static str,
}

/// Ids of the new generation produced by a folder mutation.
#[derive(Debug, Clone, Copy)]
pub struct FolderGeneration {
    /// New `Folder` block id.
    pub folder_block_id: BlockId,
    /// New `FolderEnvelope` block id.
    pub envelope_block_id: BlockId,
    /// New monotonic version.
    pub version: u32,
}

/// Outcome of [`FolderStore::move_email`].
pub struct MoveOutcome {
    /// New generation of the source folder (email removed).
    pub source: FolderGeneration,
    /// New generation of the destination folder (email added).
    pub destination: FolderGeneration,
}

/// Versioned folder state on top of `BlockStore` + `IndexStore`
/// (spec.md §4.7).
pub struct FolderStore {
    store: Arc<BlockStore>,
    index: Arc<IndexStore>,
    clock: Arc<dyn Clock>,
    logger: Arc<dyn Logger>,
    metrics: Arc<dyn MetricsSink>,
    write_options: WriteOptions,
    superseded: Mutex<Vec<SupersededGeneration>>,
}

impl FolderStore {
    /// Build a folder store over an already-open `BlockStore`/`IndexStore`.
    pub fn new(
        store: Arc<BlockStore>,
        index: Arc<IndexStore>,
        clock: Arc<dyn Clock>,
        logger: Arc<dyn Logger>,
        metrics: Arc<dyn MetricsSink>,
        write_options: WriteOptions,
    ) -> Self {
        FolderStore {
            store,
            index,
            clock,
            logger,
            metrics,
            write_options,
            superseded: Mutex::new(Vec::new()),
        }
    }

    /// Current head generation for a folder, if it has ever been
    /// written to.
    fn current_generation(&self, folder_path: &str) -> Option<(BlockId, FolderContent, FolderEnvelopeContent)> {
        let folder_block_id = self.index.folder_block_for(folder_path)?;
        let folder = self.store.read::<FolderContent>(folder_block_id).ok()?;
        let envelope_content = self.store.read::<FolderEnvelopeContent>(folder.envelope_block_id).ok()?;
        Some((folder_block_id, folder, envelope_content))
    }

    fn write_generation(&self, folder_path: &str, envelopes: Vec<EmailEnvelope>, previous: Option<(BlockId, FolderContent)>) -> Result<FolderGeneration> {
        let (previous_folder_block_id, previous_version, previous_envelope_block_id) = match &previous {
            Some((id, folder)) => (Some(*id), folder.version, Some(folder.envelope_block_id)),
            None => (None, 0, None),
        };
        let version = previous_version + 1;

        let envelope_content = FolderEnvelopeContent {
            folder_path: folder_path.to_string(),
            version,
            envelopes,
            previous_block_id: previous_envelope_block_id,
        };
        let envelope_block_id = self.store.write(&envelope_content, self.write_options.clone())?;

        let folder_content = FolderContent {
            version,
            envelope_block_id,
            previous_block_id: previous_folder_block_id,
        };
        let folder_block_id = self.store.write(&folder_content, self.write_options.clone())?;

        self.index.record_folder_update(folder_block_id, &folder_content, &envelope_content);

        if let Some((old_folder_block_id, old_folder)) = previous {
            self.superseded.lock().push(SupersededGeneration {
                folder_block_id: old_folder_block_id,
                envelope_block_id: old_folder.envelope_block_id,
                superseded_at_nanos: self.clock.now_nanos(),
                reason: "new_generation",
            });
        }

        self.metrics.counter("folder_generations_written", 1);
        Ok(FolderGeneration {
            folder_block_id,
            envelope_block_id,
            version,
        })
    }

    /// Append `envelope` to `folder_path`, producing a new generation.
    pub fn add_to_folder(&self, folder_path: &str, envelope: EmailEnvelope) -> Result<FolderGeneration> {
        match self.current_generation(folder_path) {
            Some((folder_block_id, folder, mut envelope_content)) => {
                envelope_content.envelopes.push(envelope);
                self.write_generation(folder_path, envelope_content.envelopes, Some((folder_block_id, folder)))
            }
            None => self.write_generation(folder_path, vec![envelope], None),
        }
    }

    /// Remove the email identified by `compound_id` from `folder_path`,
    /// producing a new generation. Errors with `NotFound` if the folder
    /// does not exist or does not currently contain that email.
    pub fn remove_from_folder(&self, folder_path: &str, compound_id: CompoundId) -> Result<FolderGeneration> {
        let (folder_block_id, folder, mut envelope_content) = self
            .current_generation(folder_path)
            .ok_or_else(|| EmailDbError::NotFound(format!("folder {folder_path}")))?;

        let before = envelope_content.envelopes.len();
        envelope_content.envelopes.retain(|e| e.compound_id != compound_id);
        if envelope_content.envelopes.len() == before {
            return Err(EmailDbError::NotFound(format!("{compound_id} in folder {folder_path}")));
        }

        self.write_generation(folder_path, envelope_content.envelopes, Some((folder_block_id, folder)))
    }

    /// Move one email between folders: remove from `from_folder`, then
    /// add to `to_folder`.
    ///
    /// If the add half fails after the remove half already landed, a
    /// compensating forward-versioned generation re-adds the email to
    /// `from_folder` rather than attempting to undo the first write in
    /// place — blocks are never retracted once appended (spec.md §4.9).
    pub fn move_email(&self, from_folder: &str, to_folder: &str, compound_id: CompoundId) -> Result<MoveOutcome> {
        let (_, _, source_before) = self
            .current_generation(from_folder)
            .ok_or_else(|| EmailDbError::NotFound(format!("folder {from_folder}")))?;
        let envelope = source_before
            .envelopes
            .iter()
            .find(|e| e.compound_id == compound_id)
            .cloned()
            .ok_or_else(|| EmailDbError::NotFound(format!("{compound_id} in folder {from_folder}")))?;

        let source = self.remove_from_folder(from_folder, compound_id)?;

        match self.add_to_folder(to_folder, envelope.clone()) {
            Ok(destination) => Ok(MoveOutcome { source, destination }),
            Err(add_err) => {
                self.logger.log(
                    LogLevel::Error,
                    "emaildb_engine::folder_store",
                    &format!("move {compound_id} into {to_folder} failed after removing from {from_folder}: {add_err}; compensating"),
                );
                match self.add_to_folder(from_folder, envelope) {
                    Ok(_) => self.metrics.counter("move_compensations", 1),
                    Err(compensation_err) => {
                        self.logger.log(
                            LogLevel::Error,
                            "emaildb_engine::folder_store",
                            &format!("compensation for failed move of {compound_id} also failed: {compensation_err}"),
                        );
                        self.metrics.counter("move_compensation_failures", 1);
                    }
                }
                Err(add_err)
            }
        }
    }

    /// Drain the superseded-generation log recorded so far (consumed by
    /// `MaintenanceEngine`'s safety gate).
    pub fn drain_superseded(&self) -> Vec<SupersededGeneration> {
        std::mem::take(&mut self.superseded.lock())
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use emaildb_block::BlockFile;
    use emaildb_codec::{CodecError, KeyProvider, Registries};
    use emaildb_core::{CompoundId, FixedClock, NoopLogger, NoopMetricsSink};
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

    fn envelope(block_id: u64, local_id: u32, subject: &str) -> EmailEnvelope {
        EmailEnvelope {
            compound_id: CompoundId::new(block_id, local_id),
            message_id: format!("<{block_id}-{local_id}@x>"),
            subject: subject.to_string(),
            from: "a@x".to_string(),
            to: vec!["b@x".to_string()],
            date: 1,
            size_bytes: 10,
            envelope_hash: [1u8; 32],
        }
    }

    #[test]
    fn first_add_creates_version_one_with_no_previous_block() {
        let dir = tempdir().unwrap();
        let (_, _, folders) = harness(dir.path());
        let gen = folders.add_to_folder("Inbox", envelope(1, 0, "hi")).unwrap();
        assert_eq!(gen.version, 1);
    }

    #[test]
    fn each_mutation_bumps_the_version_and_keeps_prior_generation_resolvable() {
        let dir = tempdir().unwrap();
        let (store, _, folders) = harness(dir.path());
        let first = folders.add_to_folder("Inbox", envelope(1, 0, "a")).unwrap();
        let second = folders.add_to_folder("Inbox", envelope(2, 0, "b")).unwrap();
        assert_eq!(second.version, 2);

        let first_content: FolderContent = store.read(first.folder_block_id).unwrap();
        assert_eq!(first_content.version, 1);
        let second_content: FolderContent = store.read(second.folder_block_id).unwrap();
        assert_eq!(second_content.previous_block_id, Some(first.folder_block_id));
    }

    #[test]
    fn move_transfers_the_envelope_and_supersedes_both_sides() {
        let dir = tempdir().unwrap();
        let (store, _, folders) = harness(dir.path());
        let id = CompoundId::new(1, 0);
        folders.add_to_folder("Inbox", envelope(1, 0, "hi")).unwrap();

        let outcome = folders.move_email("Inbox", "Archive", id).unwrap();
        let src: FolderEnvelopeContent = store.read(outcome.source.envelope_block_id).unwrap();
        assert!(src.envelopes.is_empty());
        let dst: FolderEnvelopeContent = store.read(outcome.destination.envelope_block_id).unwrap();
        assert_eq!(dst.envelopes.len(), 1);

        let superseded = folders.drain_superseded();
        assert!(superseded.len() >= 2);
    }

    #[test]
    fn moving_an_email_not_present_in_the_source_folder_is_not_found() {
        let dir = tempdir().unwrap();
        let (_, _, folders) = harness(dir.path());
        folders.add_to_folder("Inbox", envelope(1, 0, "hi")).unwrap();
        let err = folders.move_email("Inbox", "Archive", CompoundId::new(99, 0)).unwrap_err();
        assert!(matches!(err, EmailDbError::NotFound(_)));
    }
}
