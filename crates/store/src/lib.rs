//! BlockStore: typed read/write facade over `BlockFile` +
//! `PayloadCodec` + the content serializer, with a size-budgeted
//! payload cache (spec.md §4.5).
//!
//! # Layering
//!
//! This crate knows how to frame a typed value into a block and back;
//! it does not decide batching, folder semantics, or indexing — those
//! live in `emaildb-engine`, one layer up.

#![warn(missing_docs)]

mod cache;
pub mod payload;
pub mod store;

pub use payload::BlockPayload;
pub use store::{BlockStore, WriteOptions, DEFAULT_CACHE_BYTES, DEFAULT_COMPRESSION_THRESHOLD_BYTES};
