//! # EmailDB
//!
//! An embedded storage engine for email archives — an append-only,
//! self-describing block file with adaptive batching, content-hash
//! deduplication, versioned folders, a rebuildable index layer, and
//! in-band key management.
//!
//! # Quick Start
//!
//! ```no_run
//! use emaildb::{Engine, OpenOptions, SortOrder};
//!
//! fn main() -> emaildb::Result<()> {
//!     let engine = Engine::open("./mail.db", OpenOptions::default().with_passphrase("hunter2"))?;
//!
//!     let outcome = engine.import(b"From: a@x\r\n\r\nHello", "Inbox")?;
//!     assert!(!outcome.deduplicated);
//!
//!     let envelopes = engine.list_folder("Inbox", SortOrder::DateDescending, 20, 0)?;
//!     assert_eq!(envelopes.len(), 1);
//!
//!     let results = engine.search("hello", 10)?;
//!     assert_eq!(results.hits.len(), 1);
//!
//!     engine.close()?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The [`Engine`] struct is the main entry point; every other type here
//! is a request or result it works with. Internal crates (`block`,
//! `codec`, `serializer`, `keystore`, `store`, `engine`, `search`) are not
//! exposed directly — only this crate's surface is stable.

pub use emaildb_api::{
    AdaptiveSizerConfig, CompactionReport, CompressionAlgorithm, Email, EncryptionAlgorithm, Engine, EngineStats,
    ImportOutcome, IntegrityReport, KeyStoreConfig, MaintenancePolicy, MaintenanceReport, OpenOptions, SearchHit,
    SearchResults, SortOrder, TracingLogger, TracingMetricsSink,
};
pub use emaildb_core::{BlockId, BlockType, CompoundId, EmailDbError, Result};
