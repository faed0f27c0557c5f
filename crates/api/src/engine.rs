//! [`Engine`]: the single facade spec.md §6 describes, wiring
//! `emaildb-keystore`, `emaildb-engine`, and `emaildb-search` behind one
//! type (spec.md §6.A).

use crate::observability::{TracingLogger, TracingMetricsSink};
use crate::options::{EncryptionAlgorithm, KeyStoreConfig, OpenOptions};
use crate::types::{CompactionReport, Email, EngineStats, IntegrityReport, MaintenanceReport, SortOrder};
use emaildb_block::BlockFile;
use emaildb_codec::Registries;
use emaildb_core::{BlockType, Clock, CompactionPhase, CompoundId, EmailDbError, Logger, MetricsSink, Result};
use emaildb_engine::{AdaptiveSizer, EngineBuildOptions, EngineComponents, MaintenanceEngine, MaintenancePolicy};
use emaildb_keystore::{KeyStore, UnlockCredential};
use emaildb_search::{SearchEngine, SearchResults};
use emaildb_serializer::{EmailBatchContent, EmailEnvelope, FolderEnvelopeContent, KeyPurpose};
use emaildb_store::WriteOptions;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Result of [`Engine::import`].
pub struct ImportOutcome {
    /// Where the email was stored.
    pub id: CompoundId,
    /// Whether it was already present and not re-stored.
    pub deduplicated: bool,
}

struct EngineState {
    block_file: Arc<BlockFile>,
    components: EngineComponents,
    search: SearchEngine,
}

/// The embedded email archive. Owns exactly one [`emaildb_block::BlockFile`]
/// and everything wired on top of it; cheap to clone-share via `Arc` at a
/// host's own discretion (every method takes `&self`).
pub struct Engine {
    path: PathBuf,
    read_only: bool,
    registries: Arc<Registries>,
    key_store: Arc<KeyStore>,
    clock: Arc<dyn Clock>,
    logger: Arc<dyn Logger>,
    metrics: Arc<dyn MetricsSink>,
    build_options: EngineBuildOptions,
    state: RwLock<EngineState>,
}

fn key_store_credential(config: KeyStoreConfig) -> UnlockCredential {
    match config {
        KeyStoreConfig::Passphrase(bytes) => UnlockCredential::Passphrase(bytes),
        KeyStoreConfig::WebAuthn(bytes) => UnlockCredential::WebAuthn(bytes),
        KeyStoreConfig::Pgp(bytes) => UnlockCredential::Pgp(bytes),
        KeyStoreConfig::Pkcs11(bytes) => UnlockCredential::Pkcs11(bytes),
    }
}

fn build_state(
    block_file: Arc<BlockFile>,
    registries: Arc<Registries>,
    key_store: Arc<KeyStore>,
    clock: Arc<dyn Clock>,
    logger: Arc<dyn Logger>,
    metrics: Arc<dyn MetricsSink>,
    build_options: EngineBuildOptions,
) -> Result<EngineState> {
    let components = emaildb_engine::build(block_file.clone(), registries, key_store, clock, logger, metrics, build_options)?;
    let search = SearchEngine::new(components.store.clone(), components.index.clone());
    Ok(EngineState {
        block_file,
        components,
        search,
    })
}

impl Engine {
    /// Open (creating if absent) the database file at `path`.
    pub fn open(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let logger: Arc<dyn Logger> = options.logger.clone().unwrap_or_else(|| Arc::new(TracingLogger));
        let metrics: Arc<dyn MetricsSink> = options.metrics.clone().unwrap_or_else(|| Arc::new(TracingMetricsSink));

        let exists = path.exists();
        if !exists && options.read_only {
            return Err(EmailDbError::NotFound(format!("{}", path.display())));
        }
        let block_file = Arc::new(if exists {
            BlockFile::open_with(&path, logger.clone(), metrics.clone())?
        } else {
            BlockFile::create_with(&path, logger.clone(), metrics.clone())?
        });

        let registries = Arc::new(Registries::default());
        let key_store = Arc::new(KeyStore::new(
            block_file.clone(),
            registries.clone(),
            options.clock.clone(),
            logger.clone(),
            metrics.clone(),
        ));

        let already_initialized = key_store.is_initialized()?;
        if options.read_only && !already_initialized {
            return Err(EmailDbError::Conflict(
                "cannot initialize a key store on a read-only open".into(),
            ));
        }
        let credential = key_store_credential(options.key_store);
        if already_initialized {
            key_store.unlock(credential)?;
        } else {
            key_store.initialize(credential)?;
        }

        let key_id = if options.default_encryption == EncryptionAlgorithm::None {
            None
        } else {
            Some(
                key_store
                    .default_key_id(KeyPurpose::DataEncryption)
                    .ok_or(EmailDbError::NoUnlockMethods)?,
            )
        };

        let write_options = WriteOptions {
            compression_id: options.default_compression.id(),
            encryption_id: options.default_encryption.id(),
            key_id,
            payload_encoding: emaildb_core::PayloadEncoding::Raw,
        };

        let build_options = EngineBuildOptions {
            write_options,
            cache_bytes: options.block_cache_bytes,
            compression_threshold_bytes: options.compression_min_threshold,
            max_pending_age_nanos: options.max_pending_age.as_nanos() as i64,
            maintenance_policy: options.maintenance,
            adaptive_sizer: AdaptiveSizer::with_soft_cap_factor(options.adaptive_sizer.soft_cap_factor),
        };

        let state = build_state(
            block_file,
            registries.clone(),
            key_store.clone(),
            options.clock.clone(),
            logger.clone(),
            metrics.clone(),
            build_options.clone(),
        )?;

        Ok(Engine {
            path,
            read_only: options.read_only,
            registries,
            key_store,
            clock: options.clock,
            logger,
            metrics,
            build_options,
            state: RwLock::new(state),
        })
    }

    fn check_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(EmailDbError::Conflict("engine was opened read-only".into()));
        }
        Ok(())
    }

    /// Import one raw `.eml` source into `folder_path`, deduplicating
    /// against prior imports by envelope/content hash.
    pub fn import(&self, eml_bytes: &[u8], folder_path: &str) -> Result<ImportOutcome> {
        self.check_writable()?;
        let state = self.state.read();
        let store_size_bytes = state.block_file.len();
        let outcome = state.components.coordinator.import(eml_bytes, folder_path, store_size_bytes)?;
        Ok(ImportOutcome {
            id: outcome.id,
            deduplicated: outcome.deduplicated,
        })
    }

    /// Fetch one email's full content, including its original bytes.
    ///
    /// An email whose batch has not flushed yet (still accumulating
    /// toward the adaptive target size) is served straight out of the
    /// pending batch rather than failing — `import` returns a usable id
    /// immediately, before the block it will live in is necessarily on
    /// disk.
    pub fn get_email(&self, id: CompoundId) -> Result<Email> {
        let state = self.state.read();
        if let Some(stored) = state.components.batcher.pending(id) {
            return Ok(Email {
                id,
                message_id: stored.message_id,
                subject: stored.subject,
                from: stored.from,
                to: stored.to,
                date: stored.date,
                raw_eml: stored.raw_eml,
            });
        }
        let batch: EmailBatchContent = state.components.store.read(id.block_id)?;
        let stored = batch
            .emails
            .into_iter()
            .find(|e| e.local_id == id.local_id)
            .ok_or_else(|| EmailDbError::NotFound(format!("email {id}")))?;
        Ok(Email {
            id,
            message_id: stored.message_id,
            subject: stored.subject,
            from: stored.from,
            to: stored.to,
            date: stored.date,
            raw_eml: stored.raw_eml,
        })
    }

    /// List the envelopes currently attached to `folder_path`, sorted and
    /// paginated.
    pub fn list_folder(&self, folder_path: &str, sort: SortOrder, limit: usize, offset: usize) -> Result<Vec<EmailEnvelope>> {
        let state = self.state.read();
        let envelope_block_id = state
            .components
            .index
            .envelope_block_for_folder(folder_path)
            .ok_or_else(|| EmailDbError::NotFound(format!("folder {folder_path}")))?;
        let content: FolderEnvelopeContent = state.components.store.read(envelope_block_id)?;
        let mut envelopes = content.envelopes;
        match sort {
            SortOrder::DateAscending => envelopes.sort_by_key(|e| e.date),
            SortOrder::DateDescending => envelopes.sort_by(|a, b| b.date.cmp(&a.date)),
        }
        Ok(envelopes.into_iter().skip(offset).take(limit).collect())
    }

    /// Full-text search over indexed subject/body terms (spec.md §4.12).
    /// `SearchResults::index_stale` carries the spec.md §7 best-effort
    /// annotation for a search run against a partly-rebuilt index.
    pub fn search(&self, query: &str, limit: usize) -> Result<SearchResults> {
        let state = self.state.read();
        state.search.search(query, limit)
    }

    /// Move an email from one folder to another.
    pub fn move_email(&self, id: CompoundId, from_folder: &str, to_folder: &str) -> Result<()> {
        self.check_writable()?;
        let state = self.state.read();
        state.components.coordinator.move_email(from_folder, to_folder, id)?;
        Ok(())
    }

    /// Remove an email from a folder listing (the email's bytes remain on
    /// disk; the append-only model never deletes blocks outside of
    /// [`Engine::compact`]).
    pub fn delete(&self, id: CompoundId, folder_path: &str) -> Result<()> {
        self.check_writable()?;
        let state = self.state.read();
        state.components.coordinator.delete_email(folder_path, id)?;
        Ok(())
    }

    /// Aggregate counters over the current on-disk state.
    pub fn stats(&self) -> Result<EngineStats> {
        let state = self.state.read();
        let locations = state.block_file.locations();
        let mut block_counts_by_type: HashMap<BlockType, u64> = HashMap::new();
        for location in locations.values() {
            *block_counts_by_type.entry(location.block_type).or_insert(0) += 1;
        }
        let superseded = state.components.maintenance.identify_superseded()?;
        let superseded_bytes = superseded
            .iter()
            .filter_map(|id| locations.get(id))
            .map(|location| location.length)
            .sum();

        Ok(EngineStats {
            file_size: state.block_file.len(),
            block_counts_by_type,
            email_count: state.components.index.email_count() as u64,
            folder_count: state.components.index.folder_count() as u64,
            superseded_bytes,
        })
    }

    /// Identify superseded blocks and run them through the safety gate,
    /// without compacting (spec.md §4.10).
    pub fn run_maintenance(&self, policy: MaintenancePolicy) -> Result<MaintenanceReport> {
        let state = self.state.read();
        let engine = MaintenanceEngine::new(
            state.components.store.clone(),
            state.components.index.clone(),
            state.components.folders.clone(),
            self.clock.clone(),
            self.logger.clone(),
            self.metrics.clone(),
            policy,
        );
        engine.run()
    }

    /// Compact the block file: drop blocks the safety gate has cleared
    /// for deletion, then reopen every component against the swapped-in
    /// file.
    ///
    /// Holding a read lock on the current state for the duration of the
    /// underlying copy-and-swap is what makes this safe to call alongside
    /// readers: [`emaildb_engine::MaintenanceEngine::compact`] documents
    /// that file handles opened before a compaction do not see the
    /// swapped-in bytes, so every component here is rebuilt from a fresh
    /// [`BlockFile::open_with`] rather than reused.
    pub fn compact(&self, deadline: Option<Instant>) -> Result<CompactionReport> {
        self.check_writable()?;
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Err(EmailDbError::DeadlineExceeded);
            }
        }

        let (bytes_before, blocks_before, outcome) = {
            let state = self.state.read();
            state.components.coordinator.flush()?;
            let blocks_before = state.block_file.locations().len();
            let bytes_before = state.block_file.len();
            let outcome = state.components.maintenance.compact()?;
            (bytes_before, blocks_before, outcome)
        };

        // The swap already happened by the time `compact()` returns; any
        // failure from here on (the "rebuild" phase) must restore the
        // original bytes from `outcome.backup_path` before it is reported,
        // since the caller otherwise has no way back to a working file.
        let rebuilt = BlockFile::open_with(&outcome.path, self.logger.clone(), self.metrics.clone())
            .and_then(|block_file| {
                build_state(
                    Arc::new(block_file),
                    self.registries.clone(),
                    self.key_store.clone(),
                    self.clock.clone(),
                    self.logger.clone(),
                    self.metrics.clone(),
                    self.build_options.clone(),
                )
            });

        let new_state = match rebuilt {
            Ok(new_state) => new_state,
            Err(e) => {
                let restored = std::fs::copy(&outcome.backup_path, &outcome.path).is_ok();
                self.logger.log(
                    emaildb_core::LogLevel::Error,
                    "emaildb_api::engine",
                    &format!("compaction rebuild failed, restored from backup: {restored}"),
                );
                return Err(EmailDbError::Compaction {
                    phase: CompactionPhase::Rebuild,
                    detail: e.to_string(),
                    restored,
                });
            }
        };

        let bytes_after = new_state.block_file.len();
        let blocks_after = new_state.block_file.locations().len();
        let path = outcome.path.clone();
        *self.state.write() = new_state;

        Ok(CompactionReport {
            path,
            blocks_dropped: blocks_before.saturating_sub(blocks_after),
            bytes_before,
            bytes_after,
        })
    }

    /// Verify every block's payload checksum and report on index health.
    pub fn verify_integrity(&self) -> Result<IntegrityReport> {
        let state = self.state.read();
        let locations = state.block_file.locations();
        let corrupt_block_ids = locations
            .iter()
            .filter(|(_, location)| !location.payload_checksum_ok)
            .map(|(&id, _)| id)
            .collect();
        Ok(IntegrityReport {
            blocks_scanned: locations.len(),
            corrupt_block_ids,
            index_suspect: state.components.index.is_suspect(),
        })
    }

    /// Flush any pending batch and release the database. Dropping an
    /// `Engine` without calling this still leaves the file in a
    /// recoverable state (spec.md §4.1 P3): a pending batch not yet
    /// flushed was never durable and is simply re-imported.
    pub fn close(self) -> Result<()> {
        self.state.read().components.coordinator.flush()
    }

    /// Path of the underlying database file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
