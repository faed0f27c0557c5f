//! Dedup hashes (§3.A, frozen Open Question resolution: SHA-256 over a
//! fixed byte layout, fields separated by a `0x00` sentinel).

use sha2::{Digest, Sha256};

/// Parsed envelope fields needed to compute `envelope_hash`.
pub struct EnvelopeFields<'a> {
    /// `Message-ID`, as decoded (angle brackets intact).
    pub message_id: &'a str,
    /// Decoded `From` address.
    pub from: &'a str,
    /// Decoded `To` addresses, joined with `,` before hashing.
    pub to: &'a [String],
    /// Decoded `Cc` addresses, joined with `,` before hashing.
    pub cc: &'a [String],
    /// Decoded `In-Reply-To`, or empty string if absent.
    pub in_reply_to: &'a str,
    /// UTC nanoseconds from the `Date` header, or import time.
    pub date: i64,
    /// Decoded subject line.
    pub subject: &'a str,
    /// Size in bytes of the original `.eml` source.
    pub size_bytes: u64,
}

/// `SHA256(message_id || 0x00 || from || 0x00 || to || 0x00 || cc || 0x00
/// || in_reply_to || 0x00 || date_le_i64 || 0x00 || subject || 0x00 ||
/// size_le_u64)`.
pub fn envelope_hash(fields: &EnvelopeFields<'_>) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(fields.message_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(fields.from.as_bytes());
    hasher.update([0u8]);
    hasher.update(fields.to.join(",").as_bytes());
    hasher.update([0u8]);
    hasher.update(fields.cc.join(",").as_bytes());
    hasher.update([0u8]);
    hasher.update(fields.in_reply_to.as_bytes());
    hasher.update([0u8]);
    hasher.update(fields.date.to_le_bytes());
    hasher.update([0u8]);
    hasher.update(fields.subject.as_bytes());
    hasher.update([0u8]);
    hasher.update(fields.size_bytes.to_le_bytes());
    hasher.finalize().into()
}

/// `SHA256(canonical_headers || 0x00 || body)`, where `canonical_headers`
/// is whatever the caller has already normalized (case-folded names,
/// stripped trailing whitespace) — this function only fixes the byte
/// layout, not the normalization rules, which live with the importer.
pub fn content_hash(canonical_headers: &[u8], body: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(canonical_headers);
    hasher.update([0u8]);
    hasher.update(body);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_hash_is_sensitive_to_every_field() {
        let base = EnvelopeFields {
            message_id: "<a@x>",
            from: "a@x",
            to: &["b@x".to_string()],
            cc: &[],
            in_reply_to: "",
            date: 1,
            subject: "hi",
            size_bytes: 10,
        };
        let h1 = envelope_hash(&base);

        let mut changed = EnvelopeFields {
            message_id: "<a@x>",
            from: "a@x",
            to: &["b@x".to_string()],
            cc: &[],
            in_reply_to: "",
            date: 1,
            subject: "bye",
            size_bytes: 10,
        };
        let h2 = envelope_hash(&changed);
        assert_ne!(h1, h2);

        changed.subject = "hi";
        changed.size_bytes = 11;
        let h3 = envelope_hash(&changed);
        assert_ne!(h1, h3);
    }

    #[test]
    fn content_hash_distinguishes_header_body_boundary() {
        // Without the 0x00 separator these would collide.
        let h1 = content_hash(b"ab", b"c");
        let h2 = content_hash(b"a", b"bc");
        assert_ne!(h1, h2);
    }
}
