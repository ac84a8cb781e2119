//! Stored message identity and the projections derived from its bytes.

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::address::EmailAddress;
use super::dto::HeaderEntry;
use super::section::{attachment_disposition, BodySection};
use crate::error::{MailError, Result};

/// File extension of every stored message blob.
pub const MESSAGE_EXTENSION: &str = "eml";

/// Length of the `yyyyMMddHHmmssfff` timestamp prefix of generated ids.
const TIMESTAMP_LEN: usize = 17;

/// Maximum identifier length (a single path component on every common filesystem).
const MAX_ID_LEN: usize = 200;

/// Opaque, URL-safe message identifier.
///
/// Generated ids look like `20240131235959123-0000.eml`: the UTC creation
/// time to the millisecond, a per-millisecond sequence number and the blob
/// extension. Lexical order of generated ids equals save order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageId(String);

impl MessageId {
    /// Build the identifier for a message created at `created_at`.
    ///
    /// `seq` disambiguates messages saved within the same millisecond.
    pub fn generate(created_at: DateTime<Utc>, seq: u32) -> Self {
        Self(format!(
            "{}-{seq:04}.{MESSAGE_EXTENSION}",
            created_at.format("%Y%m%d%H%M%S%3f")
        ))
    }

    /// Validate a caller-supplied identifier.
    ///
    /// Only `[0-9A-Za-z._-]` names ending in `.eml` are accepted, with no
    /// leading dot, so an id can never address anything outside the message
    /// directory nor a file that is not a message blob.
    pub fn parse(raw: &str) -> Result<Self> {
        let valid = raw.len() <= MAX_ID_LEN
            && !raw.starts_with('.')
            && raw
                .strip_suffix(MESSAGE_EXTENSION)
                .and_then(|stem| stem.strip_suffix('.'))
                .is_some_and(|stem| !stem.is_empty())
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(MailError::InvalidId(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Creation time encoded in a generated id, if this id carries one.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let prefix = self.0.get(..TIMESTAMP_LEN)?;
        if !prefix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let (seconds, millis) = prefix.split_at(TIMESTAMP_LEN - 3);
        let naive = NaiveDateTime::parse_from_str(seconds, "%Y%m%d%H%M%S").ok()?;
        let millis: i64 = millis.parse().ok()?;
        Some(Utc.from_utc_datetime(&naive) + chrono::Duration::milliseconds(millis))
    }

    /// Per-millisecond sequence number of a generated id.
    pub fn sequence(&self) -> Option<u32> {
        self.timestamp()?;
        self.0
            .get(TIMESTAMP_LEN..)?
            .strip_prefix('-')?
            .strip_suffix(MESSAGE_EXTENSION)?
            .strip_suffix('.')?
            .parse()
            .ok()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MessageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for MessageId {
    type Err = MailError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MessageId {
    type Error = MailError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<MessageId> for String {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

/// Storage metadata of one persisted message.
///
/// Known without reading the message content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: MessageId,
    /// UTC creation time; monotonic with respect to save order.
    pub created_at: DateTime<Utc>,
    /// Size of the raw blob in bytes.
    pub size: u64,
}

/// Cheap projection used for listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSummary {
    pub message: StoredMessage,
    /// Decoded `Subject:` header, `None` when absent.
    pub subject: Option<String>,
}

/// Envelope fields and the raw header list of a parsed message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedEnvelope {
    pub from: Vec<EmailAddress>,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub bcc: Vec<EmailAddress>,
    pub subject: Option<String>,
    /// `Date:` header, if present and parseable.
    pub date: Option<DateTime<Utc>>,
    /// Every header in source order, names as written.
    pub headers: Vec<HeaderEntry>,
}

/// Full projection of a message: envelope, sections and extracted bodies.
///
/// Decoded section payloads are not kept here; they are produced again
/// for every section request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    pub envelope: ParsedEnvelope,
    pub sections: Vec<BodySection>,
    /// Content of the first `text/plain` section.
    pub text_body: Option<String>,
    /// Content of the first `text/html` section.
    pub html_body: Option<String>,
}

/// The stored bytes of a message, exactly as saved.
pub struct RawMessage {
    pub message: StoredMessage,
    /// Download filename: the identifier itself.
    pub file_name: String,
    reader: Box<dyn Read + Send>,
}

impl RawMessage {
    pub fn new(message: StoredMessage, reader: Box<dyn Read + Send>) -> Self {
        let file_name = message.id.to_string();
        Self {
            message,
            file_name,
            reader,
        }
    }

    /// Always `message/rfc822`.
    pub fn media_type(&self) -> &'static str {
        "message/rfc822"
    }

    pub fn content_disposition(&self) -> String {
        attachment_disposition(&self.file_name)
    }

    pub fn reader(&mut self) -> &mut (dyn Read + Send) {
        self.reader.as_mut()
    }

    pub fn into_reader(self) -> Box<dyn Read + Send> {
        self.reader
    }

    pub fn read_to_vec(mut self) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.reader.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl fmt::Debug for RawMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawMessage")
            .field("message", &self.message)
            .field("file_name", &self.file_name)
            .finish_non_exhaustive()
    }
}
