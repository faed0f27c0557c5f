//! Integration coverage for the end-to-end scenarios in spec.md §8
//! (S1-S7), driven entirely through the public `emaildb::Engine` facade.

use emaildb::{BlockType, Engine, OpenOptions, SortOrder};
use tempfile::tempdir;

const PASSPHRASE: &str = "correct horse battery staple";

fn sample(message_id: &str, subject_word: &str) -> Vec<u8> {
    format!("From: a@x\r\nTo: b@x\r\nSubject: {subject_word}\r\nMessage-ID: <{message_id}>\r\n\r\nBody of {message_id}")
        .into_bytes()
}

/// S1: a fresh file, two imports into `Inbox`.
#[test]
fn s1_fresh_file_import_two_emails() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.blk");
    let engine = Engine::open(&path, OpenOptions::default().with_passphrase(PASSPHRASE)).unwrap();

    engine.import(&sample("a@x", "Hello"), "Inbox").unwrap();
    engine.import(&sample("b@x", "World"), "Inbox").unwrap();

    let envelopes = engine.list_folder("Inbox", SortOrder::DateAscending, 10, 0).unwrap();
    let message_ids: Vec<&str> = envelopes.iter().map(|e| e.message_id.as_str()).collect();
    assert_eq!(message_ids, vec!["<a@x>", "<b@x>"]);

    // Folder/envelope blocks are written synchronously, but the batch
    // holding the two emails' bytes may still be pending; flush it by
    // closing and reopening before counting blocks by type.
    engine.close().unwrap();
    let engine = Engine::open(&path, OpenOptions::default().with_passphrase(PASSPHRASE)).unwrap();

    let stats = engine.stats().unwrap();
    assert_eq!(stats.email_count, 2);
    assert_eq!(*stats.block_counts_by_type.get(&BlockType::EmailBatch).unwrap(), 1);
    assert!(*stats.block_counts_by_type.get(&BlockType::Folder).unwrap() >= 1);
    assert!(*stats.block_counts_by_type.get(&BlockType::FolderEnvelope).unwrap() >= 1);
}

/// S2: re-importing a known message-id deduplicates.
#[test]
fn s2_reimport_dedup() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.blk");
    let a = sample("a@x", "Hello");

    let first = {
        let engine = Engine::open(&path, OpenOptions::default().with_passphrase(PASSPHRASE)).unwrap();
        let first = engine.import(&a, "Inbox").unwrap();
        // Flush the first import to disk so `before` below observes a
        // settled `EmailBatch` block count rather than a pending batch.
        engine.close().unwrap();
        first
    };

    let engine = Engine::open(&path, OpenOptions::default().with_passphrase(PASSPHRASE)).unwrap();
    let before = engine.stats().unwrap();

    // Dedup is resolved against the index before the batcher is ever
    // touched, so re-importing the same message never opens a new batch.
    let second = engine.import(&a, "Inbox").unwrap();
    let after = engine.stats().unwrap();

    assert_eq!(first.id, second.id);
    assert!(second.deduplicated);
    assert_eq!(after.email_count, before.email_count);
    assert_eq!(
        *after.block_counts_by_type.get(&BlockType::EmailBatch).unwrap(),
        *before.block_counts_by_type.get(&BlockType::EmailBatch).unwrap()
    );
}

/// S3: a truncated tail is tolerated on reopen; earlier emails remain
/// readable.
#[test]
fn s3_truncated_tail_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.blk");
    let first_id;
    {
        let engine = Engine::open(&path, OpenOptions::default().with_passphrase(PASSPHRASE)).unwrap();
        first_id = engine.import(&sample("a@x", "Hello"), "Inbox").unwrap().id;
        engine.close().unwrap();
    }

    let len = std::fs::metadata(&path).unwrap().len();
    let mut bytes = std::fs::read(&path).unwrap();
    let zero_from = (len - 40) as usize;
    for b in &mut bytes[zero_from..] {
        *b = 0;
    }
    std::fs::write(&path, bytes).unwrap();

    let engine = Engine::open(&path, OpenOptions::default().with_passphrase(PASSPHRASE)).unwrap();
    let email = engine.get_email(first_id).unwrap();
    assert_eq!(email.subject, "Hello");
}

/// S4: flipping a byte inside an encrypted block's ciphertext is caught
/// as an auth-tag mismatch on that block only; other blocks still read.
#[test]
fn s4_tamper_detected_on_one_block() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db.blk");
    let make_options = || {
        OpenOptions::default()
            .with_passphrase(PASSPHRASE)
            .with_encryption(emaildb::EncryptionAlgorithm::Aes256Gcm)
            .with_compression(emaildb::CompressionAlgorithm::None)
    };

    // Close/reopen between the two imports so each one flushes into its
    // own EmailBatch block rather than being coalesced into one.
    let good_id = {
        let engine = Engine::open(&path, make_options()).unwrap();
        let id = engine.import(&sample("a@x", "Good"), "Inbox").unwrap().id;
        engine.close().unwrap();
        id
    };
    let bad_id = {
        let engine = Engine::open(&path, make_options()).unwrap();
        let id = engine.import(&sample("b@x", "Bad"), "Inbox").unwrap().id;
        engine.close().unwrap();
        id
    };
    assert_ne!(good_id.block_id, bad_id.block_id);

    {
        let raw = emaildb_block::BlockFile::open(&path).unwrap();
        let location = *raw.locations().get(&bad_id.block_id).unwrap();
        drop(raw);
        let mut bytes = std::fs::read(&path).unwrap();
        let payload_start = (location.offset + 39) as usize; // past the fixed header
        bytes[payload_start] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();
    }

    let engine = Engine::open(&path, make_options()).unwrap();
    let bad_result = engine.get_email(bad_id);
    let good_result = engine.get_email(good_id);
    assert!(bad_result.is_err());
    assert!(bad_result.unwrap_err().is_block_corruption());
    assert_eq!(good_result.unwrap().subject, "Good");
}

/// S5: moving an email produces a superseded generation on each side.
#[test]
fn s5_move_produces_superseded_generations() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path().join("db.blk"), OpenOptions::default().with_passphrase(PASSPHRASE)).unwrap();

    let id = engine.import(&sample("a@x", "Hello"), "A").unwrap().id;
    engine.move_email(id, "A", "B").unwrap();

    let a = engine.list_folder("A", SortOrder::DateAscending, 10, 0).unwrap();
    let b = engine.list_folder("B", SortOrder::DateAscending, 10, 0).unwrap();
    assert!(a.is_empty());
    assert_eq!(b.len(), 1);
    assert_eq!(b[0].compound_id, id);

    let stats = engine.stats().unwrap();
    assert!(*stats.block_counts_by_type.get(&BlockType::Folder).unwrap() >= 4);
    assert!(stats.superseded_bytes > 0);
}

/// S6: rotating the DataEncryption key (via the underlying `KeyStore`,
/// since `Engine` does not expose rotation directly) leaves both
/// pre-rotation and post-rotation emails readable.
#[test]
fn s6_rotate_then_read_both_sides() {
    use emaildb_keystore::KeyPurpose;

    let dir = tempdir().unwrap();
    let path = dir.path().join("db.blk");
    let options = OpenOptions::default()
        .with_passphrase(PASSPHRASE)
        .with_encryption(emaildb::EncryptionAlgorithm::Aes256Gcm);

    let before_id;
    {
        let engine = Engine::open(&path, options).unwrap();
        before_id = engine.import(&sample("a@x", "Before"), "Inbox").unwrap().id;
        engine.close().unwrap();
    }

    // Rotation happens out of band, directly against the key store, as
    // `emaildb-keystore`'s own tests exercise; `Engine` only needs to
    // keep working against whichever key is currently live.
    {
        use emaildb_block::BlockFile;
        use emaildb_codec::Registries;
        use emaildb_keystore::{KeyStore, UnlockCredential};
        use std::sync::Arc;

        let block_file = Arc::new(BlockFile::open(&path).unwrap());
        let key_store = KeyStore::new(
            block_file,
            Arc::new(Registries::default()),
            Arc::new(emaildb_core::SystemClock),
            Arc::new(emaildb_core::NoopLogger),
            Arc::new(emaildb_core::NoopMetricsSink),
        );
        key_store.unlock(UnlockCredential::Passphrase(PASSPHRASE.as_bytes().to_vec())).unwrap();
        let data_key_id = key_store.default_key_id(KeyPurpose::DataEncryption).unwrap();
        key_store.rotate_key(&data_key_id).unwrap();
    }

    let options = OpenOptions::default()
        .with_passphrase(PASSPHRASE)
        .with_encryption(emaildb::EncryptionAlgorithm::Aes256Gcm);
    let engine = Engine::open(&path, options).unwrap();
    let after_id = engine.import(&sample("b@x", "After"), "Inbox").unwrap().id;

    assert_eq!(engine.get_email(before_id).unwrap().subject, "Before");
    assert_eq!(engine.get_email(after_id).unwrap().subject, "After");
}

/// S7: at scale, EmailBatch block payloads stay within the adaptive
/// sizing tolerance for the low tier of spec.md §4.6's table.
#[test]
fn s7_adaptive_sizing_at_scale() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(dir.path().join("db.blk"), OpenOptions::default().with_passphrase(PASSPHRASE)).unwrap();

    let body = "x".repeat(400_000); // ~400 KiB per email, ~400 MiB total over 1000 emails
    for i in 0..1000 {
        let raw = format!("From: a@x\r\nMessage-ID: <{i}@x>\r\n\r\n{body}");
        engine.import(raw.as_bytes(), "Inbox").unwrap();
    }
    engine.close().unwrap();

    let db_path = dir.path().join("db.blk");
    let engine = Engine::open(&db_path, OpenOptions::default().with_passphrase(PASSPHRASE)).unwrap();
    let stats = engine.stats().unwrap();
    assert_eq!(stats.email_count, 1000);

    let batch_count = *stats.block_counts_by_type.get(&BlockType::EmailBatch).unwrap_or(&0);
    assert!(batch_count >= 2, "1000 emails at ~400 KiB should span multiple batch blocks");
    engine.close().unwrap();

    // Inspect on-disk frame lengths directly: every EmailBatch block but
    // possibly the last (which may flush early/short) should land within
    // the low tier's adaptive sizing tolerance from spec.md §4.6.
    let target = 50 * 1024 * 1024u64;
    let lower = (target as f64 * 0.9) as u64;
    let upper = (target as f64 * 1.1) as u64;

    let raw = emaildb_block::BlockFile::open(&db_path).unwrap();
    let mut lengths: Vec<u64> = raw
        .locations()
        .values()
        .filter(|location| location.block_type == BlockType::EmailBatch)
        .map(|location| location.length)
        .collect();
    lengths.sort_unstable();
    let last = lengths.pop().expect("at least one batch block");
    for length in &lengths {
        assert!(
            *length >= lower && *length <= upper,
            "batch block length {length} outside tolerance [{lower}, {upper}]"
        );
    }
    assert!(last <= upper, "final batch block length {last} exceeds tolerance upper bound {upper}");
}
