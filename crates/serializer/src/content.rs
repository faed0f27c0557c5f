//! The closed tagged union of block payload content (spec.md §4.4, §9
//! "flatten to a tagged union `BlockContent = Header|Metadata|Folder|
//! FolderEnvelope|EmailBatch|KeyManager|KeyExchange|…`").
//!
//! Each struct here corresponds to exactly one [`emaildb_core::BlockType`]
//! and is what `emaildb-store`'s typed `write`/`read` actually
//! (de)serializes — `BlockFile`/`PayloadCodec` below it deal only in bytes.

use emaildb_core::{BlockId, CompoundId};
use serde::{Deserialize, Serialize};

/// Packed on-disk version plus feature bitflags (§4.11), carried by the
/// `Header` block (conventionally block 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderContent {
    /// `major << 24 | minor << 16 | patch`.
    pub packed_version: u32,
    /// Bitflags: Compression, Encryption, EmailBatching, EnvelopeBlocks,
    /// InBandKeyManagement, HashChainIntegrity, FullTextSearch,
    /// FolderHierarchy, EmailDeduplication, BlockSuperseding,
    /// AtomicTransactions (§4.11).
    pub feature_flags: u32,
}

/// Lightweight metadata record for one email (glossary: EmailEnvelope).
/// Many of these live in one [`FolderEnvelopeContent`] block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailEnvelope {
    /// Where the full email lives.
    pub compound_id: CompoundId,
    /// RFC 5322 `Message-ID`, without angle brackets stripped.
    pub message_id: String,
    /// Decoded subject line.
    pub subject: String,
    /// Decoded `From` address.
    pub from: String,
    /// Decoded `To` addresses.
    pub to: Vec<String>,
    /// UTC nanoseconds from the email's `Date` header, or import time if
    /// absent/unparseable.
    pub date: i64,
    /// Size in bytes of the original `.eml` source.
    pub size_bytes: u64,
    /// SHA-256 of the normalized envelope fields (§4.6 dedup key).
    pub envelope_hash: [u8; 32],
}

/// One email as stored inside an `EmailBatch` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEmail {
    /// Position within the batch, assigned in insertion order starting
    /// at 0 (§4.6). Combined with the block's id, forms a `CompoundId`.
    pub local_id: u32,
    /// RFC 5322 `Message-ID`.
    pub message_id: String,
    /// Decoded subject line.
    pub subject: String,
    /// Decoded `From` address.
    pub from: String,
    /// Decoded `To` addresses.
    pub to: Vec<String>,
    /// UTC nanoseconds from the email's `Date` header, or import time.
    pub date: i64,
    /// SHA-256 of the normalized envelope fields.
    pub envelope_hash: [u8; 32],
    /// SHA-256 of the full raw `.eml` bytes.
    pub content_hash: [u8; 32],
    /// The original `.eml` bytes, verbatim.
    pub raw_eml: Vec<u8>,
}

/// A block containing many emails — the primary storage form for
/// messages (§4.6).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailBatchContent {
    /// Emails in this batch, in insertion (and `local_id`) order.
    pub emails: Vec<StoredEmail>,
}

/// A legacy single-email block (glossary: "Email (legacy)"). Per the
/// frozen Open Question in spec.md §9, current writers never emit this
/// type; it is decoded only when present on disk (e.g. during a v1→v2
/// migration that repackages it into an `EmailBatch`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyEmailContent {
    /// The original `.eml` bytes, verbatim.
    pub raw_eml: Vec<u8>,
}

/// Versioned folder state (§4.7). Every mutation to a folder produces a
/// new `Folder` block; the previous one is recorded as superseded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderContent {
    /// Monotonically increasing per folder, starting at 1.
    pub version: u32,
    /// Block id of the `FolderEnvelope` block for this version.
    pub envelope_block_id: BlockId,
    /// Prior `Folder` block id for this folder, or `None` for the first.
    pub previous_block_id: Option<BlockId>,
}

/// All envelopes for one folder at one version (§4.7).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderEnvelopeContent {
    /// Folder path this envelope block belongs to (denormalized so a
    /// rebuild can recover `folder_path → *` indexes without consulting
    /// the paired `Folder` block).
    pub folder_path: String,
    /// Matches the paired `Folder` block's version.
    pub version: u32,
    /// The folder's full envelope set as of this version.
    pub envelopes: Vec<EmailEnvelope>,
    /// Prior `FolderEnvelope` block id for this folder, or `None` for
    /// the first.
    pub previous_block_id: Option<BlockId>,
}

/// What a data key is used for (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyPurpose {
    /// Encrypts `EmailBatch` (and other content) block payloads.
    DataEncryption,
    /// Encrypts index sibling-file contents, if index encryption is
    /// enabled.
    IndexEncryption,
    /// Encrypts `compact()`'s backup file, kept under a key separate
    /// from the live data key so a rotated-away data key can still be
    /// retired without orphaning old backups.
    Backup,
}

/// One data key, sealed (encrypted) with the master key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataKeyEntry {
    /// Id callers pass to reference this key (e.g. as an
    /// `extended_header.key_id`).
    pub key_id: String,
    /// What this key is used for.
    pub purpose: KeyPurpose,
    /// Which [`crate`](super)-external encryption algorithm this key's
    /// raw bytes are sized for.
    pub algorithm_id: u8,
    /// Key bytes, encrypted with the master key.
    pub sealed_key: Vec<u8>,
    /// IV used to seal `sealed_key`.
    pub sealed_key_iv: Vec<u8>,
    /// Auth tag from sealing `sealed_key`.
    pub sealed_key_tag: Vec<u8>,
    /// UTC nanoseconds this key was created.
    pub created_at: i64,
    /// UTC nanoseconds this key was revoked, if rotated out.
    pub revoked_at: Option<i64>,
}

/// The set of sealed per-purpose data keys, linked backward for
/// rotation history (§4.3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyManagerContent {
    /// Every key entry known as of this block (old and new; revoked
    /// entries are retained, not removed).
    pub entries: Vec<DataKeyEntry>,
    /// Prior `KeyManager` block id, or `None` for the first.
    pub previous_block_id: Option<BlockId>,
}

/// How a user unlocks the master key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnlockMethod {
    /// A user-supplied passphrase, run through a KDF.
    Passphrase,
    /// A WebAuthn credential (interface only; no platform integration
    /// is implemented by this crate).
    WebAuthn,
    /// A PGP private key.
    Pgp,
    /// A PKCS#11 hardware token.
    Pkcs11,
}

/// KDF parameters recorded alongside a sealed master key so a future
/// unlock attempt re-derives the same key-encryption-key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Argon2 memory cost, in KiB.
    pub memory_kib: u32,
    /// Argon2 iteration count.
    pub iterations: u32,
    /// Argon2 parallelism (lanes).
    pub parallelism: u32,
}

/// Binds an unlock method to a sealed master key (§4.3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyExchangeContent {
    /// Which unlock method this block accepts.
    pub method: UnlockMethod,
    /// The master key, encrypted under a key derived from the
    /// credential via `kdf_params`.
    pub sealed_master_key: Vec<u8>,
    /// IV used to seal the master key.
    pub sealed_master_key_iv: Vec<u8>,
    /// Auth tag from sealing the master key.
    pub sealed_master_key_tag: Vec<u8>,
    /// Salt passed to the KDF.
    pub kdf_salt: Vec<u8>,
    /// KDF parameters used to derive the key-encryption-key.
    pub kdf_params: KdfParams,
    /// Whether this unlock method is still accepted. `initialize` and
    /// rotation leave exactly the methods the caller configured active.
    pub active: bool,
}
