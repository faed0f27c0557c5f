//! PayloadCodec: compress-then-encrypt / decrypt-then-decompress, and the
//! algorithm registries behind it (spec.md §4.2).
//!
//! # Layering
//!
//! This crate transforms payload bytes; it never writes or reads a block
//! file (that's [`emaildb_block`](../emaildb_block)) and never derives or
//! stores keys (that's `emaildb-keystore`, which implements
//! [`pipeline::KeyProvider`] for this crate to call into).

#![warn(missing_docs)]

pub mod compression;
pub mod encryption;
pub mod error;
pub mod pipeline;

pub use compression::{CompressionProvider, CompressionRegistry};
pub use encryption::{EncryptionProvider, EncryptionRegistry};
pub use error::CodecError;
pub use pipeline::{open, seal, EncryptionRequest, KeyProvider, Registries, SealedPayload};
