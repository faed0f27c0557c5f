//! `Coordinator`: orders the multi-block operations (import, move,
//! delete) across `EmailBatcher`, `FolderStore`, and `IndexStore`
//! (spec.md §4.9).

use crate::batcher::{EmailBatcher, NewEmailEntry};
use crate::folder_store::{FolderStore, MoveOutcome};
use crate::hash::{content_hash, envelope_hash, EnvelopeFields};
use crate::index_store::IndexStore;
use crate::parse::parse_email;
use emaildb_core::{Clock, CompoundId, LogLevel, Logger, MetricsSink, Result};
use emaildb_serializer::EmailEnvelope;
use std::sync::Arc;

/// "Lost and found" pseudo-folder orphaned emails land in on rebuild
/// when a folder-attach failure outlives the batch that held them
/// (spec.md §4.9).
pub const LOST_AND_FOUND_FOLDER: &str = "lost+found";

/// Result of [`Coordinator::import`].
pub struct ImportOutcome {
    /// Where the email lives.
    pub id: CompoundId,
    /// Whether it was already present and not re-stored.
    pub deduplicated: bool,
}

/// Splits a raw `.eml` source into the header block and body at the
/// first blank line, per RFC 5322 §2.1. If no blank line is found, the
/// whole source is treated as headers with an empty body.
fn split_headers_and_body(raw_eml: &[u8]) -> (&[u8], &[u8]) {
    let needle_crlf = b"\r\n\r\n";
    let needle_lf = b"\n\n";
    if let Some(pos) = raw_eml.windows(needle_crlf.len()).position(|w| w == needle_crlf) {
        return (&raw_eml[..pos], &raw_eml[pos + needle_crlf.len()..]);
    }
    if let Some(pos) = raw_eml.windows(needle_lf.len()).position(|w| w == needle_lf) {
        return (&raw_eml[..pos], &raw_eml[pos + needle_lf.len()..]);
    }
    (raw_eml, &[])
}

/// Orders multi-block mutations so each step only ever depends on
/// already-completed prior steps, and defines what happens when a
/// later step fails (spec.md §4.9).
pub struct Coordinator {
    batcher: Arc<EmailBatcher>,
    folders: Arc<FolderStore>,
    index: Arc<IndexStore>,
    clock: Arc<dyn Clock>,
    logger: Arc<dyn Logger>,
    metrics: Arc<dyn MetricsSink>,
}

impl Coordinator {
    /// Build a coordinator over already-constructed components.
    pub fn new(
        batcher: Arc<EmailBatcher>,
        folders: Arc<FolderStore>,
        index: Arc<IndexStore>,
        clock: Arc<dyn Clock>,
        logger: Arc<dyn Logger>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Coordinator {
            batcher,
            folders,
            index,
            clock,
            logger,
            metrics,
        }
    }

    /// Import one raw `.eml` source into `folder_path`.
    ///
    /// Ordering (spec.md §4.9): `batcher.add` → `folder.add_to` →
    /// `index.index`, except the hash-keyed portion of indexing (dedup
    /// lookups) which does not depend on a folder and so is recorded as
    /// soon as the email is accepted.
    pub fn import(&self, raw_eml: &[u8], folder_path: &str, store_size_bytes: u64) -> Result<ImportOutcome> {
        let parsed = parse_email(raw_eml);
        let date = parsed.date_nanos.unwrap_or_else(|| self.clock.now_nanos());
        let (header_bytes, body) = split_headers_and_body(raw_eml);

        let envelope_hash = envelope_hash(&EnvelopeFields {
            message_id: &parsed.message_id,
            from: &parsed.from,
            to: &parsed.to,
            cc: &parsed.cc,
            in_reply_to: &parsed.in_reply_to,
            date,
            subject: &parsed.subject,
            size_bytes: raw_eml.len() as u64,
        });
        let content_hash = content_hash(header_bytes, body);

        let entry = NewEmailEntry {
            message_id: parsed.message_id.clone(),
            subject: parsed.subject.clone(),
            from: parsed.from.clone(),
            to: parsed.to.clone(),
            date,
            envelope_hash,
            content_hash,
            raw_eml: raw_eml.to_vec(),
        };

        let outcome = self.batcher.add(entry, self.index.as_ref(), store_size_bytes)?;

        if outcome.deduplicated {
            self.metrics.counter("emails_deduplicated", 1);
            return Ok(ImportOutcome {
                id: outcome.id,
                deduplicated: true,
            });
        }

        self.index.record_new_email(
            outcome.id,
            &parsed.message_id,
            &parsed.subject,
            &parsed.from,
            &parsed.to,
            raw_eml,
            envelope_hash,
            content_hash,
        );

        let envelope = EmailEnvelope {
            compound_id: outcome.id,
            message_id: parsed.message_id,
            subject: parsed.subject,
            from: parsed.from,
            to: parsed.to,
            date,
            size_bytes: raw_eml.len() as u64,
            envelope_hash,
        };

        if let Err(first_err) = self.folders.add_to_folder(folder_path, envelope.clone()) {
            if self.batcher.discard_if_unflushed(outcome.id) {
                return Err(first_err);
            }
            // The batch already reached disk; retry once per spec.md
            // §4.9, then accept an orphan rather than lose the email.
            if let Err(retry_err) = self.folders.add_to_folder(folder_path, envelope) {
                self.logger.log(
                    LogLevel::Error,
                    "emaildb_engine::coordinator",
                    &format!("email {} is orphaned: folder attach failed twice ({retry_err})", outcome.id),
                );
                self.metrics.counter("orphaned_emails", 1);
                return Err(retry_err);
            }
        }

        self.metrics.counter("emails_imported", 1);
        Ok(ImportOutcome {
            id: outcome.id,
            deduplicated: false,
        })
    }

    /// Move an email between folders.
    pub fn move_email(&self, from_folder: &str, to_folder: &str, id: CompoundId) -> Result<MoveOutcome> {
        let outcome = self.folders.move_email(from_folder, to_folder, id)?;
        self.metrics.counter("emails_moved", 1);
        Ok(outcome)
    }

    /// Remove an email from a folder (it remains on disk; it is simply
    /// no longer listed, per the append-only model).
    pub fn delete_email(&self, folder_path: &str, id: CompoundId) -> Result<()> {
        self.folders.remove_from_folder(folder_path, id)?;
        self.metrics.counter("emails_deleted", 1);
        Ok(())
    }

    /// Flush any pending batch unconditionally (e.g. before `close`).
    pub fn flush(&self) -> Result<()> {
        self.batcher.flush()?;
        Ok(())
    }

    /// Flush the pending batch if it has aged past `max_pending_age`.
    /// Intended to be polled by the facade on a regular cadence.
    pub fn tick(&self) -> Result<()> {
        self.batcher.flush_if_stale()?;
        Ok(())
    }
}
