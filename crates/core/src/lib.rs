//! Shared types and traits for EmailDB
//!
//! This crate defines the foundational vocabulary used throughout the
//! storage engine:
//! - [`BlockId`] / [`CompoundId`]: on-disk and logical identifiers
//! - [`BlockType`] / [`PayloadEncoding`]: the closed tag sets from the
//!   block header
//! - [`error::EmailDbError`]: the unified error taxonomy
//! - [`Clock`]: an injected time source (no ambient `now()` calls)
//! - [`Logger`] / [`MetricsSink`]: observability seams the host wires up

#![warn(missing_docs)]

pub mod block_types;
pub mod clock;
pub mod error;
pub mod ids;
pub mod observability;

pub use block_types::{BlockType, PayloadEncoding};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{CompactionPhase, EmailDbError, Result};
pub use ids::{BlockId, CompoundId, KeyId};
pub use observability::{LogLevel, Logger, MetricsSink, NoopLogger, NoopMetricsSink};
