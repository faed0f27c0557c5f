//! Bit-exact block framing (spec.md §6):
//!
//! ```text
//! HEADER_MAGIC(8) | version(2) | type(1) | flags(4) | timestamp(8) |
//! block_id(8) | payload_length(8) | header_checksum(4) |
//! [extended_header(var)] | payload(payload_length) | payload_checksum(4) |
//! FOOTER_MAGIC(8) | total_block_length(8)
//! ```
//!
//! `header_checksum` covers `HEADER_MAGIC..=payload_length` (39 bytes).
//! `payload_checksum` covers the on-disk payload bytes only.
//! `total_block_length` is the byte distance from `HEADER_MAGIC` to (and
//! including) itself — the amount `scan` steps forward by.

use crate::flags::BlockFlags;
use emaildb_core::{BlockId, BlockType};

/// Magic bytes opening every block frame. Distinct from [`FOOTER_MAGIC`]
/// and reserved — never reused elsewhere in the file.
pub const HEADER_MAGIC: [u8; 8] = *b"EMDBHDR\x01";
/// Magic bytes closing every block frame.
pub const FOOTER_MAGIC: [u8; 8] = *b"EMDBFTR\x01";

/// Per-block framing format version (distinct from the file-level
/// major/minor/patch header in [`crate`](super) — see VersionManager).
pub const FRAME_VERSION: u16 = 1;

const FIXED_HEADER_SIZE: usize = 8 + 2 + 1 + 4 + 8 + 8 + 8; // 39
const HEADER_CHECKSUM_SIZE: usize = 4;
const PAYLOAD_CHECKSUM_SIZE: usize = 4;
const FOOTER_SIZE: usize = 8 + 8; // FOOTER_MAGIC + total_block_length

/// A single field of an IV/auth-tag/key-id that must fit a `u8` length
/// prefix, per the extended-header layout in §6.
pub const MAX_EXTENDED_HEADER_FIELD: usize = u8::MAX as usize;

/// Extended header, present iff the block's compression or encryption
/// flag nibble is nonzero (§3).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtendedHeader {
    /// Size of the payload before any transform, present iff compressed.
    pub uncompressed_size: Option<u64>,
    /// Encryption parameters, present iff encrypted.
    pub encryption: Option<EncryptionExt>,
}

/// The encryption-specific fields of an [`ExtendedHeader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionExt {
    /// Nonce/IV used for this block.
    pub iv: Vec<u8>,
    /// AEAD authentication tag.
    pub auth_tag: Vec<u8>,
    /// Id of the data key used, looked up in KeyStore.
    pub key_id: String,
}

impl ExtendedHeader {
    fn encoded_len(&self) -> usize {
        let mut len = 0;
        if self.uncompressed_size.is_some() {
            len += 8;
        }
        if let Some(enc) = &self.encryption {
            len += 1 + enc.iv.len() + 1 + enc.auth_tag.len() + 1 + enc.key_id.len();
        }
        len
    }

    fn encode(&self, out: &mut Vec<u8>) {
        if let Some(size) = self.uncompressed_size {
            out.extend_from_slice(&size.to_le_bytes());
        }
        if let Some(enc) = &self.encryption {
            out.push(enc.iv.len() as u8);
            out.extend_from_slice(&enc.iv);
            out.push(enc.auth_tag.len() as u8);
            out.extend_from_slice(&enc.auth_tag);
            out.push(enc.key_id.len() as u8);
            out.extend_from_slice(enc.key_id.as_bytes());
        }
    }

    fn decode(bytes: &[u8], flags: BlockFlags) -> Result<(Self, usize), FrameError> {
        let mut cursor = 0usize;
        let mut header = ExtendedHeader::default();

        if flags.compression_id() != 0 {
            if bytes.len() < cursor + 8 {
                return Err(FrameError::Truncated);
            }
            let size = u64::from_le_bytes(bytes[cursor..cursor + 8].try_into().unwrap());
            header.uncompressed_size = Some(size);
            cursor += 8;
        }

        if flags.encryption_id() != 0 {
            let (iv, n) = read_len_prefixed(&bytes[cursor..])?;
            cursor += n;
            let (auth_tag, n) = read_len_prefixed(&bytes[cursor..])?;
            cursor += n;
            let (key_id_bytes, n) = read_len_prefixed(&bytes[cursor..])?;
            cursor += n;
            let key_id = String::from_utf8(key_id_bytes)
                .map_err(|_| FrameError::InvalidHeader("key id is not valid utf-8".into()))?;
            header.encryption = Some(EncryptionExt {
                iv,
                auth_tag,
                key_id,
            });
        }

        Ok((header, cursor))
    }
}

fn read_len_prefixed(bytes: &[u8]) -> Result<(Vec<u8>, usize), FrameError> {
    if bytes.is_empty() {
        return Err(FrameError::Truncated);
    }
    let len = bytes[0] as usize;
    if bytes.len() < 1 + len {
        return Err(FrameError::Truncated);
    }
    Ok((bytes[1..1 + len].to_vec(), 1 + len))
}

/// A block as BlockFile sees it: framing metadata plus the on-disk
/// payload bytes, already through whatever compression/encryption
/// transform [`emaildb_codec`](../emaildb_codec) applied. BlockFile
/// never interprets the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock {
    /// Unique id assigned by the writer.
    pub block_id: BlockId,
    /// Which kind of content this block carries.
    pub block_type: BlockType,
    /// Compression/encryption/encoding flags (§3).
    pub flags: BlockFlags,
    /// UTC nanoseconds, written once.
    pub timestamp: i64,
    /// Present iff `flags.has_extended_header()`.
    pub extended_header: Option<ExtendedHeader>,
    /// On-disk payload bytes (post-transform).
    pub payload: Vec<u8>,
}

/// Errors from decoding a single frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Not enough bytes remain to determine whether this is a valid
    /// frame — the caller is at (or near) the physical end of file.
    #[error("truncated frame")]
    Truncated,
    /// The header magic, header checksum, footer magic, or
    /// `total_block_length` did not validate. Per I1, a block whose
    /// header checksum fails is treated as never-written.
    #[error("invalid header: {0}")]
    InvalidHeader(String),
}

/// Result of successfully decoding one frame's header+footer framing.
/// The payload checksum is reported separately (`payload_checksum_ok`)
/// because a framing-valid block with a bad payload checksum is
/// "recoverable framing, unreadable contents" (§3), not a scan failure.
pub struct DecodedFrame {
    /// The decoded block.
    pub block: RawBlock,
    /// Whether the payload checksum matched.
    pub payload_checksum_ok: bool,
    /// Total bytes consumed by this frame (the scan step).
    pub consumed: usize,
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Encode a block into its on-disk frame bytes.
pub fn encode(block: &RawBlock) -> Vec<u8> {
    let ext = block.extended_header.as_ref();
    let ext_len = ext.map(|e| e.encoded_len()).unwrap_or(0);

    let mut out = Vec::with_capacity(
        FIXED_HEADER_SIZE
            + HEADER_CHECKSUM_SIZE
            + ext_len
            + block.payload.len()
            + PAYLOAD_CHECKSUM_SIZE
            + FOOTER_SIZE,
    );

    out.extend_from_slice(&HEADER_MAGIC);
    out.extend_from_slice(&FRAME_VERSION.to_le_bytes());
    out.push(block.block_type.as_u8());
    out.extend_from_slice(&block.flags.as_raw().to_le_bytes());
    out.extend_from_slice(&block.timestamp.to_le_bytes());
    out.extend_from_slice(&block.block_id.to_le_bytes());
    out.extend_from_slice(&(block.payload.len() as u64).to_le_bytes());
    debug_assert_eq!(out.len(), FIXED_HEADER_SIZE);

    let header_checksum = crc32(&out);
    out.extend_from_slice(&header_checksum.to_le_bytes());

    if let Some(ext) = ext {
        ext.encode(&mut out);
    }

    out.extend_from_slice(&block.payload);
    let payload_checksum = crc32(&block.payload);
    out.extend_from_slice(&payload_checksum.to_le_bytes());

    out.extend_from_slice(&FOOTER_MAGIC);
    let total_block_length = (out.len() + 8) as u64;
    out.extend_from_slice(&total_block_length.to_le_bytes());

    out
}

/// Decode one frame starting at byte 0 of `bytes`. `bytes` may extend
/// past the end of this frame (the rest of the file); only
/// `consumed` bytes belong to this frame.
pub fn decode(bytes: &[u8]) -> Result<DecodedFrame, FrameError> {
    if bytes.len() < FIXED_HEADER_SIZE + HEADER_CHECKSUM_SIZE {
        return Err(FrameError::Truncated);
    }

    if bytes[0..8] != HEADER_MAGIC {
        return Err(FrameError::InvalidHeader("bad header magic".into()));
    }

    let version = u16::from_le_bytes(bytes[8..10].try_into().unwrap());
    if version != FRAME_VERSION {
        return Err(FrameError::InvalidHeader(format!(
            "unsupported frame version {version}"
        )));
    }

    let block_type = BlockType::from_u8(bytes[10])
        .ok_or_else(|| FrameError::InvalidHeader(format!("unknown block type {}", bytes[10])))?;
    let flags = BlockFlags::from_raw(u32::from_le_bytes(bytes[11..15].try_into().unwrap()));
    let timestamp = i64::from_le_bytes(bytes[15..23].try_into().unwrap());
    let block_id = u64::from_le_bytes(bytes[23..31].try_into().unwrap());
    let payload_length = u64::from_le_bytes(bytes[31..39].try_into().unwrap()) as usize;

    let header_span = &bytes[0..FIXED_HEADER_SIZE];
    let stored_header_checksum = u32::from_le_bytes(
        bytes[FIXED_HEADER_SIZE..FIXED_HEADER_SIZE + HEADER_CHECKSUM_SIZE]
            .try_into()
            .unwrap(),
    );
    if crc32(header_span) != stored_header_checksum {
        return Err(FrameError::InvalidHeader("bad header checksum".into()));
    }

    let mut cursor = FIXED_HEADER_SIZE + HEADER_CHECKSUM_SIZE;

    let extended_header = if flags.has_extended_header() {
        let (ext, n) = ExtendedHeader::decode(&bytes[cursor..], flags)?;
        cursor += n;
        Some(ext)
    } else {
        None
    };

    if bytes.len() < cursor + payload_length + PAYLOAD_CHECKSUM_SIZE + FOOTER_SIZE {
        return Err(FrameError::Truncated);
    }

    let payload = bytes[cursor..cursor + payload_length].to_vec();
    cursor += payload_length;

    let stored_payload_checksum =
        u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap());
    cursor += PAYLOAD_CHECKSUM_SIZE;
    let payload_checksum_ok = crc32(&payload) == stored_payload_checksum;

    if bytes[cursor..cursor + 8] != FOOTER_MAGIC {
        return Err(FrameError::InvalidHeader("bad footer magic".into()));
    }
    cursor += 8;
    let total_block_length = u64::from_le_bytes(bytes[cursor..cursor + 8].try_into().unwrap());
    cursor += 8;

    if total_block_length != cursor as u64 {
        return Err(FrameError::InvalidHeader(
            "total_block_length does not match frame size".into(),
        ));
    }

    Ok(DecodedFrame {
        block: RawBlock {
            block_id,
            block_type,
            flags,
            timestamp,
            extended_header,
            payload,
        },
        payload_checksum_ok,
        consumed: cursor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use emaildb_core::PayloadEncoding;

    fn sample_block(payload: Vec<u8>) -> RawBlock {
        RawBlock {
            block_id: 42,
            block_type: BlockType::EmailBatch,
            flags: BlockFlags::new(0, 0, PayloadEncoding::Raw),
            timestamp: 1_700_000_000_000_000_000,
            extended_header: None,
            payload,
        }
    }

    #[test]
    fn round_trips_a_plain_block() {
        let block = sample_block(b"hello world".to_vec());
        let bytes = encode(&block);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.block, block);
        assert!(decoded.payload_checksum_ok);
        assert_eq!(decoded.consumed, bytes.len());
    }

    #[test]
    fn round_trips_with_extended_header() {
        let mut block = sample_block(b"compressed-and-encrypted-bytes".to_vec());
        block.flags = BlockFlags::new(1, 2, PayloadEncoding::Json);
        block.extended_header = Some(ExtendedHeader {
            uncompressed_size: Some(1234),
            encryption: Some(EncryptionExt {
                iv: vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12],
                auth_tag: vec![9; 16],
                key_id: "data-key-1".to_string(),
            }),
        });

        let bytes = encode(&block);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.block, block);
        assert!(decoded.payload_checksum_ok);
    }

    #[test]
    fn detects_payload_corruption_without_failing_header() {
        let block = sample_block(b"0123456789".to_vec());
        let mut bytes = encode(&block);
        let payload_start = FIXED_HEADER_SIZE + HEADER_CHECKSUM_SIZE;
        bytes[payload_start] ^= 0xFF;

        let decoded = decode(&bytes).unwrap();
        assert!(!decoded.payload_checksum_ok);
    }

    #[test]
    fn detects_header_corruption() {
        let block = sample_block(b"0123456789".to_vec());
        let mut bytes = encode(&block);
        bytes[20] ^= 0xFF; // inside the fixed header span

        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, FrameError::InvalidHeader(_)));
    }

    #[test]
    fn truncated_tail_is_reported_as_truncated() {
        let block = sample_block(b"0123456789".to_vec());
        let bytes = encode(&block);
        let torn = &bytes[..bytes.len() - 5];

        let err = decode(torn).unwrap_err();
        assert!(matches!(err, FrameError::Truncated));
    }

    #[test]
    fn bad_magic_is_invalid_header_not_truncated() {
        let block = sample_block(b"0123456789".to_vec());
        let mut bytes = encode(&block);
        bytes[0] = 0;

        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, FrameError::InvalidHeader(_)));
    }

    #[test]
    fn empty_payload_round_trips() {
        let block = sample_block(Vec::new());
        let bytes = encode(&block);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.block.payload, Vec::<u8>::new());
        assert!(decoded.payload_checksum_ok);
    }
}
