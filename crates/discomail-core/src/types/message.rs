//! Raw messages and their envelope.

use serde::{Deserialize, Serialize};

/// A complete RFC 5322 message as handed to `append_message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    raw: Vec<u8>,
}

impl Message {
    /// Wraps raw message bytes.
    #[must_use]
    pub fn new(raw: impl Into<Vec<u8>>) -> Self {
        Self { raw: raw.into() }
    }

    /// Returns the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Size of the message in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Returns true if the message has no content.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Looks up a header value, unfolding continuation lines.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        let text = String::from_utf8_lossy(&self.raw);
        get_header(split_headers(&text), name)
    }

    /// Extracts the envelope fields cached in the summary.
    #[must_use]
    pub fn envelope(&self) -> Envelope {
        let text = String::from_utf8_lossy(&self.raw);
        let headers = split_headers(&text);
        Envelope {
            subject: get_header(headers, "subject").unwrap_or_default(),
            from: get_header(headers, "from").unwrap_or_default(),
            to: get_header(headers, "to").unwrap_or_default(),
            date: get_header(headers, "date").unwrap_or_default(),
            message_id: get_header(headers, "message-id"),
        }
    }
}

/// Header fields cached per message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Subject line.
    pub subject: String,
    /// Sender.
    pub from: String,
    /// Recipients.
    pub to: String,
    /// Date header as sent.
    pub date: String,
    /// Message-ID header, if any.
    pub message_id: Option<String>,
}

/// Returns the header block (everything before the first blank line).
fn split_headers(message: &str) -> &str {
    message
        .find("\r\n\r\n")
        .or_else(|| message.find("\n\n"))
        .map_or(message, |idx| &message[..idx])
}

/// Get a header value from raw headers.
fn get_header(headers: &str, name: &str) -> Option<String> {
    let mut value: Option<String> = None;

    for line in headers.lines() {
        let line = line.trim_end_matches('\r');
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(v) = value.as_mut() {
                v.push(' ');
                v.push_str(line.trim());
            }
            continue;
        }
        if value.is_some() {
            break;
        }
        if let Some((header_name, rest)) = line.split_once(':')
            && header_name.trim().eq_ignore_ascii_case(name)
        {
            value = Some(rest.trim().to_string());
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "From: Alice <alice@example.com>\r\n\
To: bob@example.com\r\n\
Subject: Quarterly\r\n report\r\n\
Message-ID: <q1@example.com>\r\n\
\r\n\
Subject: not a header\r\n";

    #[test]
    fn envelope_reads_headers_only() {
        let env = Message::new(SAMPLE).envelope();
        assert_eq!(env.from, "Alice <alice@example.com>");
        assert_eq!(env.to, "bob@example.com");
        assert_eq!(env.subject, "Quarterly report");
        assert_eq!(env.message_id.as_deref(), Some("<q1@example.com>"));
        assert_eq!(env.date, "");
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let msg = Message::new("subject: hi\n\nbody");
        assert_eq!(msg.header("Subject").as_deref(), Some("hi"));
        assert_eq!(msg.header("X-Missing"), None);
    }
}
