//! BlockFile: append-only file I/O over the framing in [`crate::frame`].

use crate::frame::{self, DecodedFrame, FrameError, RawBlock};
use crate::location::BlockLocation;
use emaildb_core::{BlockId, EmailDbError, Logger, LogLevel, MetricsSink, NoopLogger, NoopMetricsSink, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Description of a torn tail found during [`BlockFile::scan`] (§4.1,
/// scenario S3): bytes past the last fully-framed block that do not
/// themselves form a complete frame.
#[derive(Debug, Clone, Copy)]
pub struct TornTail {
    /// Byte offset where the torn region begins.
    pub offset: u64,
    /// Number of bytes in the torn region.
    pub length: u64,
}

struct WriterState {
    file: File,
    end_offset: u64,
}

/// Append-only block file: frames on write, verifies on read, and
/// exposes an in-memory offset index rebuilt by [`BlockFile::scan`] at
/// open time (spec.md §4.1).
pub struct BlockFile {
    path: PathBuf,
    writer: Mutex<WriterState>,
    offset_index: RwLock<Arc<HashMap<BlockId, BlockLocation>>>,
    next_block_id: AtomicU64,
    logger: Arc<dyn Logger>,
    metrics: Arc<dyn MetricsSink>,
}

impl BlockFile {
    /// Create a new, empty block file. Fails if `path` already exists.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::create_with(path, Arc::new(NoopLogger), Arc::new(NoopMetricsSink))
    }

    /// Like [`Self::create`] with explicit observability sinks.
    pub fn create_with(
        path: impl AsRef<Path>,
        logger: Arc<dyn Logger>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)?;
        Ok(BlockFile {
            path,
            writer: Mutex::new(WriterState {
                file,
                end_offset: 0,
            }),
            offset_index: RwLock::new(Arc::new(HashMap::new())),
            next_block_id: AtomicU64::new(0),
            logger,
            metrics,
        })
    }

    /// Open an existing block file, rebuilding the offset index by
    /// scanning from byte 0 (§4.1: "an implementation reads the entire
    /// file with `scan` at open time to rebuild the offset index").
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, Arc::new(NoopLogger), Arc::new(NoopMetricsSink))
    }

    /// Like [`Self::open`] with explicit observability sinks.
    pub fn open_with(
        path: impl AsRef<Path>,
        logger: Arc<dyn Logger>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let report = scan_file(&path)?;
        let mut map = HashMap::with_capacity(report.locations.len());
        let mut end_offset = 0u64;
        let mut max_block_id = None;
        for (offset, location) in &report.locations {
            end_offset = offset + location.length;
            let block_id = location_block_id(&report, *offset);
            max_block_id = Some(max_block_id.map_or(block_id, |m: BlockId| m.max(block_id)));
            map.insert(block_id, *location);
        }

        if let Some(tail) = report.torn_tail {
            logger.log(
                LogLevel::Warn,
                "emaildb_block::scan",
                &format!(
                    "torn tail at offset {} ({} bytes) ignored on open",
                    tail.offset, tail.length
                ),
            );
            metrics.counter("blocks_torn_tail", 1);
        }

        metrics.counter("blocks_scanned", report.locations.len() as u64);

        let next_block_id = max_block_id.map_or(0, |m| m + 1);

        Ok(BlockFile {
            path,
            writer: Mutex::new(WriterState { file, end_offset }),
            offset_index: RwLock::new(Arc::new(map)),
            next_block_id: AtomicU64::new(next_block_id),
            logger,
            metrics,
        })
    }

    /// Allocate the next monotonically increasing `block_id` (§3). Every
    /// block-producing component calls this exactly once per block,
    /// before building the frame to append.
    pub fn allocate_block_id(&self) -> BlockId {
        self.next_block_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current length of the file, i.e. the offset the next append
    /// will land at.
    pub fn len(&self) -> u64 {
        self.writer.lock().end_offset
    }

    /// True iff the file contains no blocks yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a pre-framed block. The payload must already be in its
    /// final on-disk form (compression/encryption already applied).
    ///
    /// A successful return means the bytes reached the OS; the
    /// in-memory offset index is updated atomically with the return
    /// (§4.1).
    pub fn append(&self, block: RawBlock) -> Result<(u64, u64)> {
        let block_id = block.block_id;
        let block_type = block.block_type;
        let timestamp = block.timestamp;
        let flags = block.flags;
        let bytes = frame::encode(&block);
        let length = bytes.len() as u64;

        let mut state = self.writer.lock();
        let offset = state.end_offset;
        state.file.seek(SeekFrom::Start(offset))?;
        state.file.write_all(&bytes)?;
        state.file.flush()?;
        state.end_offset = offset + length;
        drop(state);

        let location = BlockLocation {
            offset,
            length,
            block_type,
            timestamp,
            flags,
            payload_checksum_ok: true,
        };
        {
            let mut index = self.offset_index.write();
            let mut next = (**index).clone();
            next.insert(block_id, location);
            *index = Arc::new(next);
        }

        self.metrics.counter("blocks_appended", 1);
        Ok((offset, length))
    }

    /// Look up the latest offset registered for `block_id` and validate
    /// both checksums before returning.
    pub fn read(&self, block_id: BlockId) -> Result<RawBlock> {
        let location = self
            .locations()
            .get(&block_id)
            .copied()
            .ok_or_else(|| EmailDbError::NotFound(format!("block {block_id}")))?;
        let block = self.read_frame_at(location.offset)?;
        if block.block_id != block_id {
            return Err(EmailDbError::Internal(format!(
                "offset index pointed at block {} but found block {} at offset {}",
                block_id, block.block_id, location.offset
            )));
        }
        Ok(block)
    }

    /// Read and validate the block whose frame begins at `offset`.
    pub fn read_at(&self, offset: u64) -> Result<RawBlock> {
        self.read_frame_at(offset)
    }

    fn read_frame_at(&self, offset: u64) -> Result<RawBlock> {
        let mut file = OpenOptions::new().read(true).open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let decoded = frame::decode(&bytes).map_err(|e| self.frame_error(offset, e))?;
        if !decoded.payload_checksum_ok {
            self.logger.log(
                LogLevel::Warn,
                "emaildb_block::read",
                &format!("payload checksum mismatch on block {}", decoded.block.block_id),
            );
            self.metrics.counter("blocks_checksum_failed", 1);
            return Err(EmailDbError::Checksum {
                block_id: decoded.block.block_id,
                detail: "payload checksum mismatch".to_string(),
            });
        }
        Ok(decoded.block)
    }

    fn frame_error(&self, offset: u64, e: FrameError) -> EmailDbError {
        EmailDbError::Framing {
            offset,
            detail: e.to_string(),
        }
    }

    /// Linear scan from byte 0, rebuilding the set of valid block
    /// locations. This is the recovery procedure (§4.1, I2): any byte
    /// region passing the header checksum is a block.
    pub fn scan(&self) -> Result<Vec<(u64, BlockLocation)>> {
        let report = scan_file(&self.path)?;
        Ok(report.locations)
    }

    /// In-memory view of the offset index built by the last `open`/
    /// `scan`-driven rebuild, updated incrementally by `append`.
    pub fn locations(&self) -> Arc<HashMap<BlockId, BlockLocation>> {
        self.offset_index.read().clone()
    }

    /// Rebuild the offset index from scratch by rescanning the file.
    /// Used by recovery paths that want to discard any in-memory state
    /// and trust only what is actually on disk.
    pub fn rebuild_index(&self) -> Result<()> {
        let report = scan_file(&self.path)?;
        let mut map = HashMap::with_capacity(report.locations.len());
        let mut max_block_id = None;
        for (offset, location) in &report.locations {
            let block_id = location_block_id(&report, *offset);
            max_block_id = Some(max_block_id.map_or(block_id, |m: BlockId| m.max(block_id)));
            map.insert(block_id, *location);
        }
        *self.offset_index.write() = Arc::new(map);
        if let Some(max_block_id) = max_block_id {
            self.next_block_id
                .fetch_max(max_block_id + 1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Result of a full-file scan: every validly-framed block location in
/// file order, plus a description of any torn tail.
struct ScanReport {
    locations: Vec<(u64, BlockLocation)>,
    ids_by_offset: HashMap<u64, BlockId>,
    torn_tail: Option<TornTail>,
}

fn location_block_id(report: &ScanReport, offset: u64) -> BlockId {
    *report
        .ids_by_offset
        .get(&offset)
        .expect("every scanned location has a recorded block id")
}

fn scan_file(path: &Path) -> Result<ScanReport> {
    let mut file = File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;

    let mut locations = Vec::new();
    let mut ids_by_offset = HashMap::new();
    let mut pos: usize = 0;
    let mut torn_tail = None;

    while pos < bytes.len() {
        match frame::decode(&bytes[pos..]) {
            Ok(DecodedFrame {
                block,
                payload_checksum_ok,
                consumed,
            }) => {
                let offset = pos as u64;
                ids_by_offset.insert(offset, block.block_id);
                locations.push((
                    offset,
                    BlockLocation {
                        offset,
                        length: consumed as u64,
                        block_type: block.block_type,
                        timestamp: block.timestamp,
                        flags: block.flags,
                        payload_checksum_ok,
                    },
                ));
                pos += consumed;
            }
            Err(FrameError::Truncated) => {
                torn_tail = Some(TornTail {
                    offset: pos as u64,
                    length: (bytes.len() - pos) as u64,
                });
                break;
            }
            Err(FrameError::InvalidHeader(_)) => {
                // I1: nothing but valid frames may appear between
                // blocks, but a crash or single-byte corruption can
                // leave garbage. Resync by one byte and keep scanning.
                pos += 1;
            }
        }
    }

    Ok(ScanReport {
        locations,
        ids_by_offset,
        torn_tail,
    })
}
