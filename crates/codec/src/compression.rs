//! Compression algorithm registry (spec.md §4.2).

use crate::error::CodecError;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;

/// A compression algorithm, indexed by its 7-bit id in `flags`.
pub trait CompressionProvider: Send + Sync {
    /// The 7-bit id stored in `flags`. `0` is reserved for "none" and is
    /// never assigned to a provider.
    fn id(&self) -> u8;
    /// Human-readable name, used in logs only.
    fn name(&self) -> &'static str;
    /// Compress `data`.
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError>;
    /// Decompress `data`. `uncompressed_size` is the size recorded in
    /// the block's extended header, available as a capacity hint.
    fn decompress(&self, data: &[u8], uncompressed_size: u64) -> Result<Vec<u8>, CodecError>;
}

/// LZ4 (id 1), via `lz4_flex`'s self-describing block format.
pub struct Lz4Provider;

impl CompressionProvider for Lz4Provider {
    fn id(&self) -> u8 {
        1
    }
    fn name(&self) -> &'static str {
        "lz4"
    }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(lz4_flex::compress_prepend_size(data))
    }
    fn decompress(&self, data: &[u8], _uncompressed_size: u64) -> Result<Vec<u8>, CodecError> {
        lz4_flex::decompress_size_prepended(data)
            .map_err(|e| CodecError::Decompression(e.to_string()))
    }
}

/// Gzip (id 2), via `flate2`.
pub struct GzipProvider;

impl CompressionProvider for GzipProvider {
    fn id(&self) -> u8 {
        2
    }
    fn name(&self) -> &'static str {
        "gzip"
    }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder
            .write_all(data)
            .map_err(|e| CodecError::Compression(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8], uncompressed_size: u64) -> Result<Vec<u8>, CodecError> {
        let mut decoder = flate2::read::GzDecoder::new(data);
        let mut out = Vec::with_capacity(uncompressed_size as usize);
        decoder
            .read_to_end(&mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(out)
    }
}

/// Zstandard (id 3), via the `zstd` crate.
pub struct ZstdProvider;

impl CompressionProvider for ZstdProvider {
    fn id(&self) -> u8 {
        3
    }
    fn name(&self) -> &'static str {
        "zstd"
    }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        zstd::stream::encode_all(data, 0).map_err(|e| CodecError::Compression(e.to_string()))
    }
    fn decompress(&self, data: &[u8], _uncompressed_size: u64) -> Result<Vec<u8>, CodecError> {
        zstd::stream::decode_all(data).map_err(|e| CodecError::Decompression(e.to_string()))
    }
}

/// Brotli (id 4), via the `brotli` crate.
pub struct BrotliProvider;

const BROTLI_BUFFER_SIZE: usize = 4096;
const BROTLI_QUALITY: i32 = 9;
const BROTLI_LGWIN: i32 = 22;

impl CompressionProvider for BrotliProvider {
    fn id(&self) -> u8 {
        4
    }
    fn name(&self) -> &'static str {
        "brotli"
    }
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        {
            let mut writer = brotli::CompressorWriter::new(
                &mut out,
                BROTLI_BUFFER_SIZE,
                BROTLI_QUALITY as u32,
                BROTLI_LGWIN as u32,
            );
            writer
                .write_all(data)
                .map_err(|e| CodecError::Compression(e.to_string()))?;
        }
        Ok(out)
    }
    fn decompress(&self, data: &[u8], uncompressed_size: u64) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(uncompressed_size as usize);
        let mut reader = brotli::Decompressor::new(data, BROTLI_BUFFER_SIZE);
        reader
            .read_to_end(&mut out)
            .map_err(|e| CodecError::Decompression(e.to_string()))?;
        Ok(out)
    }
}

/// Lookup table from compression id to provider.
pub struct CompressionRegistry {
    providers: HashMap<u8, Arc<dyn CompressionProvider>>,
}

impl CompressionRegistry {
    /// The four algorithms named in spec.md §1: LZ4, Gzip, Zstd, Brotli.
    pub fn default_algorithms() -> Self {
        let mut providers: HashMap<u8, Arc<dyn CompressionProvider>> = HashMap::new();
        providers.insert(1, Arc::new(Lz4Provider));
        providers.insert(2, Arc::new(GzipProvider));
        providers.insert(3, Arc::new(ZstdProvider));
        providers.insert(4, Arc::new(BrotliProvider));
        CompressionRegistry { providers }
    }

    /// Look up a provider by id. Id `0` ("none") always returns `None`.
    pub fn get(&self, id: u8) -> Option<Arc<dyn CompressionProvider>> {
        self.providers.get(&id).cloned()
    }

    /// Register or replace a provider, keyed by its own id.
    pub fn register(&mut self, provider: Arc<dyn CompressionProvider>) {
        self.providers.insert(provider.id(), provider);
    }
}

impl Default for CompressionRegistry {
    fn default() -> Self {
        Self::default_algorithms()
    }
}
