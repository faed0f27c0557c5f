//! Content ↔ bytes for every block payload kind, dispatched on the
//! `payload_encoding` tag (spec.md §4.4).

#![warn(missing_docs)]

pub mod codec;
pub mod content;

pub use codec::{decode, encode};
pub use content::{
    DataKeyEntry, EmailBatchContent, EmailEnvelope, FolderContent, FolderEnvelopeContent,
    HeaderContent, KdfParams, KeyExchangeContent, KeyManagerContent, KeyPurpose,
    LegacyEmailContent, StoredEmail, UnlockMethod,
};
