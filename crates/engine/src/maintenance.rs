//! `MaintenanceEngine`: superseded-block identification, the safety
//! gate, and compaction (spec.md §4.10).

use crate::folder_store::FolderStore;
use crate::index_store::IndexStore;
use emaildb_block::BlockFile;
use emaildb_core::{BlockId, BlockType, Clock, CompactionPhase, EmailDbError, LogLevel, Logger, MetricsSink, Result};
use emaildb_serializer::{FolderContent, FolderEnvelopeContent};
use emaildb_store::BlockStore;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Policy knobs for [`MaintenanceEngine`] (surfaced through
/// `EngineOptions`).
#[derive(Debug, Clone, Copy)]
pub struct MaintenancePolicy {
    /// A superseded block must be at least this old before it is
    /// eligible for deletion (spec.md §4.10 default: 24h).
    pub min_age_hours_for_deletion: u32,
    /// How many most-recent `Folder`/`FolderEnvelope` generations to
    /// keep per folder; older ones become deletion candidates.
    pub folder_generations_to_keep: usize,
    /// How many pre-compaction backup copies to retain.
    pub backups_to_keep: usize,
}

impl Default for MaintenancePolicy {
    fn default() -> Self {
        MaintenancePolicy {
            min_age_hours_for_deletion: 24,
            folder_generations_to_keep: 1,
            backups_to_keep: 3,
        }
    }
}

/// What one maintenance pass found and did.
#[derive(Debug, Default)]
pub struct MaintenanceReport {
    /// Candidate blocks identified as superseded, before the safety
    /// gate.
    pub candidates_found: usize,
    /// Candidates that passed the safety gate and are now eligible for
    /// deletion at the next compaction.
    pub eligible_for_deletion: usize,
}

/// What a successful `compact()` produced.
#[derive(Debug, Clone)]
pub struct CompactionOutcome {
    /// The swapped-in file's path (same as the original path — the
    /// sibling was renamed over it).
    pub path: PathBuf,
    /// Where the pre-compaction bytes were retained, for restore if a
    /// later phase (outside this call) fails.
    pub backup_path: PathBuf,
}

/// Safety-gated superseded-block bookkeeping and compaction (spec.md
/// §4.10). Does not itself delete anything outside of `compact`: a
/// block only leaves the file when compaction omits it while copying.
pub struct MaintenanceEngine {
    store: Arc<BlockStore>,
    index: Arc<IndexStore>,
    folders: Arc<FolderStore>,
    clock: Arc<dyn Clock>,
    logger: Arc<dyn Logger>,
    metrics: Arc<dyn MetricsSink>,
    policy: MaintenancePolicy,
}

impl MaintenanceEngine {
    /// Build a maintenance engine over already-constructed components.
    pub fn new(
        store: Arc<BlockStore>,
        index: Arc<IndexStore>,
        folders: Arc<FolderStore>,
        clock: Arc<dyn Clock>,
        logger: Arc<dyn Logger>,
        metrics: Arc<dyn MetricsSink>,
        policy: MaintenancePolicy,
    ) -> Self {
        MaintenanceEngine {
            store,
            index,
            folders,
            clock,
            logger,
            metrics,
            policy,
        }
    }

    /// Union of the superseded-block sources named in spec.md §4.10:
    /// FolderStore-reported supersessions, plus a disk scan for
    /// `Folder`/`FolderEnvelope` generations older than
    /// `folder_generations_to_keep` for their path (this scan also
    /// covers orphaned generations FolderStore's in-memory log lost
    /// across a restart).
    ///
    /// `KeyManager` generation pruning beyond
    /// `key_manager_versions_to_keep` is not included here: rotation
    /// history lives entirely inside `emaildb-keystore`, which does not
    /// expose block enumeration to this crate.
    pub fn identify_superseded(&self) -> Result<HashSet<BlockId>> {
        let mut superseded = HashSet::new();
        for generation in self.folders.drain_superseded() {
            superseded.insert(generation.folder_block_id);
            superseded.insert(generation.envelope_block_id);
        }

        let locations = self.store.block_file().locations();
        let mut folder_blocks: Vec<(BlockId, FolderContent)> = Vec::new();
        for (&block_id, location) in locations.iter() {
            if location.block_type == BlockType::Folder {
                if let Ok(folder) = self.store.read::<FolderContent>(block_id) {
                    folder_blocks.push((block_id, folder));
                }
            }
        }

        let mut by_path: HashMap<String, Vec<(BlockId, FolderContent)>> = HashMap::new();
        for (block_id, folder) in folder_blocks {
            let path = match self.store.read::<FolderEnvelopeContent>(folder.envelope_block_id) {
                Ok(content) => content.folder_path,
                Err(_) => continue,
            };
            by_path.entry(path).or_default().push((block_id, folder));
        }

        for generations in by_path.values_mut() {
            generations.sort_by_key(|(_, folder)| std::cmp::Reverse(folder.version));
            for (block_id, folder) in generations.iter().skip(self.policy.folder_generations_to_keep) {
                superseded.insert(*block_id);
                superseded.insert(folder.envelope_block_id);
            }
        }

        self.metrics.counter("maintenance_candidates_found", superseded.len() as u64);
        Ok(superseded)
    }

    /// Filter `candidates` down to those that pass every condition in
    /// the safety gate (spec.md §4.10).
    pub fn safety_gate(&self, candidates: &HashSet<BlockId>) -> HashSet<BlockId> {
        let locations = self.store.block_file().locations();
        let now = self.clock.now_nanos();
        let min_age_nanos = self.policy.min_age_hours_for_deletion as i64 * 3600 * 1_000_000_000;

        let live_folders: Vec<(BlockId, FolderContent)> = locations
            .iter()
            .filter(|(&id, loc)| loc.block_type == BlockType::Folder && !candidates.contains(&id))
            .filter_map(|(&id, _)| self.store.read::<FolderContent>(id).ok().map(|f| (id, f)))
            .collect();
        let live_folder_heads: HashSet<BlockId> = live_folders.iter().map(|(id, _)| *id).collect();
        let live_envelope_heads: HashSet<BlockId> = live_folders.iter().map(|(_, f)| f.envelope_block_id).collect();

        let mut previous_block_id_targets: HashSet<BlockId> = HashSet::new();
        for (&id, loc) in locations.iter() {
            if candidates.contains(&id) {
                continue;
            }
            match loc.block_type {
                BlockType::Folder => {
                    if let Ok(folder) = self.store.read::<FolderContent>(id) {
                        if let Some(prev) = folder.previous_block_id {
                            previous_block_id_targets.insert(prev);
                        }
                    }
                }
                BlockType::FolderEnvelope => {
                    if let Ok(content) = self.store.read::<FolderEnvelopeContent>(id) {
                        if let Some(prev) = content.previous_block_id {
                            previous_block_id_targets.insert(prev);
                        }
                    }
                }
                _ => {}
            }
        }

        candidates
            .iter()
            .copied()
            .filter(|id| {
                let Some(location) = locations.get(id) else {
                    return false;
                };
                let old_enough = now.saturating_sub(location.timestamp) >= min_age_nanos;
                let not_a_live_folder_head = !live_folder_heads.contains(id);
                let not_a_live_envelope_head = !live_envelope_heads.contains(id);
                let not_targeted_by_previous_block_id = !previous_block_id_targets.contains(id);
                old_enough && not_a_live_folder_head && not_a_live_envelope_head && not_targeted_by_previous_block_id
            })
            .collect()
    }

    /// Identify candidates and run them through the safety gate in one
    /// call, without compacting.
    pub fn run(&self) -> Result<MaintenanceReport> {
        let candidates = self.identify_superseded()?;
        let eligible = self.safety_gate(&candidates);
        self.metrics.counter("maintenance_eligible_for_deletion", eligible.len() as u64);
        Ok(MaintenanceReport {
            candidates_found: candidates.len(),
            eligible_for_deletion: eligible.len(),
        })
    }

    /// Compact the block file: copy every block not in the deletion set
    /// (ordered by offset) into a sibling file, back up the original,
    /// and atomically swap the sibling into its place.
    ///
    /// Returns the swapped-in file's path and the retained backup's
    /// path — a caller that fails a later phase of its own (e.g.
    /// rebuilding components against the swapped-in file) needs
    /// `backup_path` to restore the original, per spec.md §7's
    /// automatic-restore-on-failure requirement. Any component holding
    /// an `Arc<BlockFile>` to the pre-compaction file (this `BlockStore`
    /// included) must be reopened against `path` afterward — this call
    /// does not itself hot-swap the file descriptors already in use,
    /// only the bytes on disk.
    pub fn compact(&self) -> Result<CompactionOutcome> {
        let original_path = self.store.block_file().path().to_path_buf();
        let sibling_path = sibling_path(&original_path, "compact.tmp");

        let deletion_set = self.safety_gate(&self.identify_superseded()?);

        if let Err(e) = self.copy_retained_blocks(&sibling_path, &deletion_set) {
            let _ = std::fs::remove_file(&sibling_path);
            return Err(self.compaction_error(CompactionPhase::Copy, e, false));
        }

        let backup_path = match self.rotate_backups(&original_path) {
            Ok(path) => path,
            Err(e) => {
                let _ = std::fs::remove_file(&sibling_path);
                return Err(self.compaction_error(CompactionPhase::Backup, e, false));
            }
        };
        if let Err(e) = std::fs::copy(&original_path, &backup_path) {
            let _ = std::fs::remove_file(&sibling_path);
            return Err(self.compaction_error(CompactionPhase::Backup, e.into(), false));
        }
        if let Err(e) = std::fs::rename(&sibling_path, &original_path) {
            // Rename either fully succeeds or leaves both files as they
            // were; the original at `original_path` is untouched.
            let _ = std::fs::remove_file(&sibling_path);
            return Err(self.compaction_error(CompactionPhase::Swap, e.into(), false));
        }

        self.index.mark_suspect("compaction changed block file contents");
        self.metrics.counter("compactions_run", 1);
        self.logger.log(
            LogLevel::Info,
            "emaildb_engine::maintenance",
            &format!("compaction complete, dropped {} blocks", deletion_set.len()),
        );
        Ok(CompactionOutcome {
            path: original_path,
            backup_path,
        })
    }

    fn compaction_error(&self, phase: CompactionPhase, source: EmailDbError, restored: bool) -> EmailDbError {
        self.logger.log(
            LogLevel::Error,
            "emaildb_engine::maintenance",
            &format!("compaction failed during {phase} phase: {source}"),
        );
        EmailDbError::Compaction {
            phase,
            detail: source.to_string(),
            restored,
        }
    }

    fn copy_retained_blocks(&self, sibling_path: &Path, deletion_set: &HashSet<BlockId>) -> Result<()> {
        let sibling = BlockFile::create(sibling_path)?;
        let locations = self.store.block_file().locations();
        let mut ids: Vec<BlockId> = locations.keys().copied().collect();
        ids.sort_by_key(|id| locations.get(id).map(|l| l.offset).unwrap_or(0));

        for id in ids {
            if deletion_set.contains(&id) {
                continue;
            }
            let raw = self.store.block_file().read(id)?;
            sibling.append(raw)?;
        }
        Ok(())
    }

    fn rotate_backups(&self, original_path: &Path) -> Result<PathBuf> {
        let mut existing: Vec<PathBuf> = Vec::new();
        if let Some(dir) = original_path.parent() {
            let prefix = format!("{}.bak.", original_path.file_name().unwrap_or_default().to_string_lossy());
            if let Ok(entries) = std::fs::read_dir(dir) {
                for entry in entries.flatten() {
                    let name = entry.file_name().to_string_lossy().to_string();
                    if name.starts_with(&prefix) {
                        existing.push(entry.path());
                    }
                }
            }
        }
        existing.sort();
        while existing.len() >= self.policy.backups_to_keep && !existing.is_empty() {
            let oldest = existing.remove(0);
            let _ = std::fs::remove_file(&oldest);
        }

        Ok(sibling_path(original_path, &format!("bak.{}", self.clock.now_nanos())))
    }
}

fn sibling_path(original: &Path, suffix: &str) -> PathBuf {
    let mut name = original.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{suffix}"));
    original.with_file_name(name)
}
