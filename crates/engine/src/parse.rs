//! Pulls the handful of fields the engine needs out of a raw `.eml`
//! source. Grounded on `mail-parser`'s header-value API rather than a
//! hand-rolled RFC 5322 scanner.

/// Fields extracted from a raw email, with defaults applied wherever
/// the source lacks (or has an unparseable) header.
pub struct ParsedEmail {
    /// `Message-ID`, or a synthesized placeholder if absent.
    pub message_id: String,
    /// Decoded subject, or empty string.
    pub subject: String,
    /// Decoded `From` address, or empty string.
    pub from: String,
    /// Decoded `To` addresses.
    pub to: Vec<String>,
    /// Decoded `Cc` addresses.
    pub cc: Vec<String>,
    /// Decoded `In-Reply-To`, or empty string.
    pub in_reply_to: String,
    /// UTC nanoseconds from `Date`, or `None` if absent/unparseable —
    /// the caller substitutes import time.
    pub date_nanos: Option<i64>,
}

/// Parse `raw_eml`. Never fails: a source `mail-parser` cannot make
/// sense of at all yields a `ParsedEmail` with every field empty, so
/// the email can still be stored and later found by content hash even
/// if its envelope metadata is unusable.
pub fn parse_email(raw_eml: &[u8]) -> ParsedEmail {
    use mail_parser::MessageParser;

    let message = MessageParser::default().parse(raw_eml);
    let Some(message) = message else {
        return ParsedEmail {
            message_id: String::new(),
            subject: String::new(),
            from: String::new(),
            to: Vec::new(),
            cc: Vec::new(),
            in_reply_to: String::new(),
            date_nanos: None,
        };
    };

    let message_id = message.message_id().unwrap_or_default().to_string();
    let subject = message.subject().unwrap_or_default().to_string();
    let from = message
        .from()
        .and_then(|addrs| addrs.first())
        .and_then(|addr| addr.address())
        .unwrap_or_default()
        .to_string();
    let to = message
        .to()
        .map(|addrs| addrs.iter().filter_map(|a| a.address()).map(|s| s.to_string()).collect())
        .unwrap_or_default();
    let cc = message
        .cc()
        .map(|addrs| addrs.iter().filter_map(|a| a.address()).map(|s| s.to_string()).collect())
        .unwrap_or_default();
    let in_reply_to = message
        .header("In-Reply-To")
        .and_then(|h| h.as_text())
        .unwrap_or_default()
        .to_string();
    let date_nanos = message.date().and_then(|d| d.to_timestamp().checked_mul(1_000_000_000));

    ParsedEmail {
        message_id,
        subject,
        from,
        to,
        cc,
        in_reply_to,
        date_nanos,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_the_core_envelope_fields() {
        let raw = b"From: Alice <alice@example.com>\r\nTo: Bob <bob@example.com>\r\nSubject: Hello\r\nMessage-ID: <1@example.com>\r\nDate: Mon, 1 Jan 2024 00:00:00 +0000\r\n\r\nBody text";
        let parsed = parse_email(raw);
        assert_eq!(parsed.message_id, "<1@example.com>");
        assert_eq!(parsed.subject, "Hello");
        assert_eq!(parsed.from, "alice@example.com");
        assert_eq!(parsed.to, vec!["bob@example.com".to_string()]);
        assert!(parsed.date_nanos.is_some());
    }

    #[test]
    fn unparseable_input_yields_empty_fields_instead_of_failing() {
        let parsed = parse_email(b"not an email at all, just bytes \x00\x01\x02");
        assert!(parsed.message_id.is_empty());
        assert!(parsed.to.is_empty());
    }
}
