//! `OpenOptions`: the configuration surface for [`crate::Engine::open`]
//! (spec.md §4.14), built the way the teacher's `DatabaseConfig` is —
//! public fields, a `Default` impl with the spec's literal defaults, and
//! consuming `with_*` builder methods.

use emaildb_core::{Clock, Logger, MetricsSink, SystemClock};
use emaildb_engine::MaintenancePolicy;
use std::sync::Arc;
use std::time::Duration;

/// Compression algorithm selectable as a default for new blocks. Ids
/// match `emaildb_codec::compression`'s registered providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionAlgorithm {
    /// No compression (id 0).
    None,
    /// LZ4 (id 1).
    Lz4,
    /// Gzip (id 2).
    Gzip,
    /// Zstandard (id 3).
    Zstd,
    /// Brotli (id 4).
    Brotli,
}

impl CompressionAlgorithm {
    pub(crate) fn id(self) -> u8 {
        match self {
            CompressionAlgorithm::None => 0,
            CompressionAlgorithm::Lz4 => 1,
            CompressionAlgorithm::Gzip => 2,
            CompressionAlgorithm::Zstd => 3,
            CompressionAlgorithm::Brotli => 4,
        }
    }
}

/// Encryption algorithm selectable as a default for new blocks. Ids
/// match `emaildb_codec::encryption`'s registered providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionAlgorithm {
    /// No encryption (id 0); blocks are written in the clear.
    None,
    /// AES-256-GCM (id 1).
    Aes256Gcm,
    /// ChaCha20-Poly1305 (id 2).
    ChaCha20Poly1305,
    /// AES-256-CBC + HMAC-SHA256 (id 3).
    Aes256CbcHmac,
}

impl EncryptionAlgorithm {
    pub(crate) fn id(self) -> u8 {
        match self {
            EncryptionAlgorithm::None => 0,
            EncryptionAlgorithm::Aes256Gcm => 1,
            EncryptionAlgorithm::ChaCha20Poly1305 => 2,
            EncryptionAlgorithm::Aes256CbcHmac => 3,
        }
    }
}

/// How the master key is to be unlocked on open. Carries the same
/// secret material as `emaildb_keystore::UnlockCredential`, deferred
/// here so `OpenOptions` doesn't force a host to depend on
/// `emaildb-keystore` directly.
pub enum KeyStoreConfig {
    /// Unlock with a passphrase, initializing a fresh key store if none
    /// exists yet.
    Passphrase(Vec<u8>),
    /// Unlock with a pre-derived secret from a WebAuthn assertion.
    WebAuthn(Vec<u8>),
    /// Unlock with a pre-derived secret from a PGP operation.
    Pgp(Vec<u8>),
    /// Unlock with a pre-derived secret from a PKCS#11 token operation.
    Pkcs11(Vec<u8>),
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        KeyStoreConfig::Passphrase(Vec::new())
    }
}

/// Overridable thresholds for `emaildb_engine::AdaptiveSizer` (§4.6).
/// Defaults reproduce the table in spec.md exactly; only the soft-cap
/// factor is commonly worth overriding (e.g. lowering it in tests).
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveSizerConfig {
    /// Fraction over the target size a batch may grow to before a flush
    /// is forced (spec.md §4.6 default: 1.1).
    pub soft_cap_factor: f64,
}

impl Default for AdaptiveSizerConfig {
    fn default() -> Self {
        AdaptiveSizerConfig { soft_cap_factor: 1.1 }
    }
}

/// Configuration for [`crate::Engine::open`] (spec.md §4.14).
pub struct OpenOptions {
    /// Opens the file without permitting any writes; `import`/`move`/
    /// `delete`/`compact` all fail with `Conflict`.
    pub read_only: bool,
    /// Compression applied to new blocks unless a call site overrides
    /// it.
    pub default_compression: CompressionAlgorithm,
    /// Encryption applied to new blocks unless a call site overrides
    /// it.
    pub default_encryption: EncryptionAlgorithm,
    /// Floor below which compression is skipped even if requested
    /// (spec.md §4.2 thresholding).
    pub compression_min_threshold: usize,
    /// How the master key is unlocked (or initialized) on open.
    pub key_store: KeyStoreConfig,
    /// Payload cache byte budget (spec.md §4.5).
    pub block_cache_bytes: usize,
    /// Overridable `AdaptiveSizer` thresholds (spec.md §4.6).
    pub adaptive_sizer: AdaptiveSizerConfig,
    /// How long a pending batch may sit before a periodic flush
    /// (spec.md §4.6).
    pub max_pending_age: Duration,
    /// Safety-gate thresholds and backup retention (spec.md §4.10).
    pub maintenance: MaintenancePolicy,
    /// Time source; defaults to the system wall clock.
    pub clock: Arc<dyn Clock>,
    /// Structured log sink; `Engine::open` wires in a `tracing`-backed
    /// default if left `None`.
    pub logger: Option<Arc<dyn Logger>>,
    /// Metrics sink; `Engine::open` wires in a `tracing`-backed default
    /// if left `None`.
    pub metrics: Option<Arc<dyn MetricsSink>>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        OpenOptions {
            read_only: false,
            default_compression: CompressionAlgorithm::Zstd,
            default_encryption: EncryptionAlgorithm::None,
            compression_min_threshold: emaildb_store::DEFAULT_COMPRESSION_THRESHOLD_BYTES,
            key_store: KeyStoreConfig::default(),
            block_cache_bytes: emaildb_store::DEFAULT_CACHE_BYTES,
            adaptive_sizer: AdaptiveSizerConfig::default(),
            max_pending_age: Duration::from_secs(5 * 60),
            maintenance: MaintenancePolicy::default(),
            clock: Arc::new(SystemClock),
            logger: None,
            metrics: None,
        }
    }
}

impl OpenOptions {
    /// Open read-only: no writes of any kind will be permitted.
    pub fn read_only() -> Self {
        OpenOptions {
            read_only: true,
            ..Default::default()
        }
    }

    /// Unlock (or initialize) with a passphrase.
    pub fn with_passphrase(mut self, passphrase: impl Into<Vec<u8>>) -> Self {
        self.key_store = KeyStoreConfig::Passphrase(passphrase.into());
        self
    }

    /// Set the default compression algorithm for new blocks.
    pub fn with_compression(mut self, algorithm: CompressionAlgorithm) -> Self {
        self.default_compression = algorithm;
        self
    }

    /// Set the default encryption algorithm for new blocks.
    pub fn with_encryption(mut self, algorithm: EncryptionAlgorithm) -> Self {
        self.default_encryption = algorithm;
        self
    }

    /// Set the compression threshold floor.
    pub fn with_compression_min_threshold(mut self, bytes: usize) -> Self {
        self.compression_min_threshold = bytes;
        self
    }

    /// Set the payload cache byte budget.
    pub fn with_block_cache_bytes(mut self, bytes: usize) -> Self {
        self.block_cache_bytes = bytes;
        self
    }

    /// Set the `AdaptiveSizer` soft-cap factor.
    pub fn with_soft_cap_factor(mut self, factor: f64) -> Self {
        self.adaptive_sizer.soft_cap_factor = factor;
        self
    }

    /// Set how long a pending batch may sit before a periodic flush.
    pub fn with_max_pending_age(mut self, duration: Duration) -> Self {
        self.max_pending_age = duration;
        self
    }

    /// Set the maintenance policy.
    pub fn with_maintenance(mut self, policy: MaintenancePolicy) -> Self {
        self.maintenance = policy;
        self
    }

    /// Override the clock (tests use a `FixedClock`).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Supply a host logger instead of the `tracing`-backed default.
    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Supply a host metrics sink instead of the `tracing`-backed
    /// default.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}
