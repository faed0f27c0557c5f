//! BlockFile: append-only file I/O, block framing, checksums, and
//! scan/recovery (spec.md §4.1).
//!
//! # Layering
//!
//! This crate knows nothing about compression, encryption, or what a
//! block's payload *means* — it only frames, checksums, and locates
//! byte ranges. [`emaildb_codec`](../emaildb_codec) transforms payloads
//! before they reach `append` and after they leave `read`.

#![warn(missing_docs)]

pub mod file;
pub mod flags;
pub mod frame;
pub mod location;

pub use file::{BlockFile, TornTail};
pub use flags::BlockFlags;
pub use frame::{
    ExtendedHeader, RawBlock, FOOTER_MAGIC, HEADER_MAGIC, MAX_EXTENDED_HEADER_FIELD,
};
pub use location::BlockLocation;
