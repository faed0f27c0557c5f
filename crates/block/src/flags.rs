//! Bit layout of the block header's `flags` field (spec.md §3, §6).
//!
//! ```text
//! bits 0..7   compression algorithm id (0 = none, 1..127)
//! bits 7..14  encryption algorithm id (0 = none, 1..127)
//! bits 14..22 payload_encoding tag (see emaildb_core::PayloadEncoding)
//! bits 22..32 reserved, must be zero
//! ```
//!
//! The spec's byte framing (§6) does not carry an explicit
//! `payload_encoding` field alongside the others; this implementation
//! places it in the `flags` word's documented "remaining bits reserved"
//! region (§3) rather than growing the fixed header, so the canonical
//! 39-byte checksummed header span is unchanged.

use emaildb_core::PayloadEncoding;

const COMPRESSION_MASK: u32 = 0x7F;
const ENCRYPTION_SHIFT: u32 = 7;
const ENCRYPTION_MASK: u32 = 0x7F << ENCRYPTION_SHIFT;
const ENCODING_SHIFT: u32 = 14;
const ENCODING_MASK: u32 = 0xFF << ENCODING_SHIFT;
const RESERVED_MASK: u32 = !(COMPRESSION_MASK | ENCRYPTION_MASK | ENCODING_MASK);

/// Typed view over the raw `flags` word.
///
/// `flags == 0` is the law referenced in §4.2: a verbatim, unencrypted,
/// `Raw`-encoded payload always has a flags word of exactly zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockFlags(u32);

impl BlockFlags {
    /// Build flags from algorithm ids (0..127 each) and an encoding tag.
    pub fn new(compression_id: u8, encryption_id: u8, encoding: PayloadEncoding) -> Self {
        debug_assert!(compression_id <= 0x7F);
        debug_assert!(encryption_id <= 0x7F);
        let mut bits = (compression_id as u32) & COMPRESSION_MASK;
        bits |= ((encryption_id as u32) << ENCRYPTION_SHIFT) & ENCRYPTION_MASK;
        bits |= (encoding.as_u8() as u32) << ENCODING_SHIFT;
        BlockFlags(bits)
    }

    /// Construct from a raw on-disk `u32`.
    pub fn from_raw(bits: u32) -> Self {
        BlockFlags(bits)
    }

    /// The raw on-disk `u32`.
    pub fn as_raw(self) -> u32 {
        self.0
    }

    /// The compression algorithm id, or `0` for none.
    pub fn compression_id(self) -> u8 {
        (self.0 & COMPRESSION_MASK) as u8
    }

    /// The encryption algorithm id, or `0` for none.
    pub fn encryption_id(self) -> u8 {
        ((self.0 & ENCRYPTION_MASK) >> ENCRYPTION_SHIFT) as u8
    }

    /// The `payload_encoding` tag, if it decodes to a known variant.
    pub fn payload_encoding(self) -> Option<PayloadEncoding> {
        PayloadEncoding::from_u8(self.payload_encoding_tag())
    }

    /// The raw `payload_encoding` tag, regardless of whether it decodes
    /// to a known variant — used to report `Error::UnknownEncoding(tag)`.
    pub fn payload_encoding_tag(self) -> u8 {
        ((self.0 & ENCODING_MASK) >> ENCODING_SHIFT) as u8
    }

    /// True iff any compression or encryption transform is recorded,
    /// meaning an extended header must follow the fixed header.
    pub fn has_extended_header(self) -> bool {
        self.compression_id() != 0 || self.encryption_id() != 0
    }

    /// Reserved bits, which a conforming writer always leaves at zero.
    pub fn reserved(self) -> u32 {
        self.0 & RESERVED_MASK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_flags_means_verbatim() {
        let flags = BlockFlags::new(0, 0, PayloadEncoding::Raw);
        assert_eq!(flags.as_raw(), 0);
        assert!(!flags.has_extended_header());
    }

    #[test]
    fn round_trips_all_fields() {
        let flags = BlockFlags::new(3, 5, PayloadEncoding::Json);
        assert_eq!(flags.compression_id(), 3);
        assert_eq!(flags.encryption_id(), 5);
        assert_eq!(flags.payload_encoding(), Some(PayloadEncoding::Json));
        assert!(flags.has_extended_header());
        assert_eq!(flags.reserved(), 0);
    }

    #[test]
    fn max_algorithm_ids_fit_in_seven_bits() {
        let flags = BlockFlags::new(0x7F, 0x7F, PayloadEncoding::Raw);
        assert_eq!(flags.compression_id(), 0x7F);
        assert_eq!(flags.encryption_id(), 0x7F);
    }
}
