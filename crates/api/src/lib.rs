//! Public facade over the EmailDB storage engine (spec.md §6): one
//! [`Engine`] type wiring key management, batching, indexing,
//! coordination, maintenance, versioning, and search behind a single
//! open/import/search/close surface.

#![warn(missing_docs)]

mod engine;
mod observability;
mod options;
mod types;

pub use emaildb_engine::MaintenancePolicy;
pub use emaildb_search::{SearchHit, SearchResults};

pub use engine::{Engine, ImportOutcome};
pub use observability::{TracingLogger, TracingMetricsSink};
pub use options::{AdaptiveSizerConfig, CompressionAlgorithm, EncryptionAlgorithm, KeyStoreConfig, OpenOptions};
pub use types::{CompactionReport, Email, EngineStats, IntegrityReport, MaintenanceReport, SortOrder};
