//! MIME projection: summaries for listing, full details, and on-demand
//! section extraction.
//!
//! Every call parses the stored bytes afresh. Parsing is a pure function of
//! the input, so concurrent projections need no coordination.

use std::io::{BufReader, Cursor, Read};

use mail_parser::{Message, MessageParser, MessagePart, MimeHeaders, PartType};
use tracing::debug;

use crate::config::PerformanceConfig;
use crate::error::{MailError, Result};
use crate::model::address::EmailAddress;
use crate::model::dto::HeaderEntry;
use crate::model::message::{
    MessageId, MessageSummary, ParsedEnvelope, ParsedMessage, StoredMessage,
};
use crate::model::section::{normalize_content_id, BodySection, SectionContent};
use crate::parser::header;

/// Maximum depth for recursive multipart descent (adversarial input guard).
const MAX_DEPTH: usize = 10;

/// Largest header block read when summarizing a message.
const MAX_HEADER_BLOCK: u64 = 1024 * 1024;

/// Media type assumed for parts without a `Content-Type` header.
const DEFAULT_MEDIA_TYPE: &str = "text/plain";

/// Parses raw message streams into summaries, details and sections.
#[derive(Debug, Clone)]
pub struct MimeProjector {
    max_message_size: u64,
    read_buffer_size: usize,
}

impl Default for MimeProjector {
    fn default() -> Self {
        Self::new(&PerformanceConfig::default())
    }
}

impl MimeProjector {
    pub fn new(performance: &PerformanceConfig) -> Self {
        Self {
            max_message_size: performance.max_message_size,
            read_buffer_size: performance.read_buffer_size.max(1024),
        }
    }

    /// Cheap parse for listing: reads the header block only.
    ///
    /// Never fails on content: a missing or unreadable subject yields `None`.
    pub fn parse_summary(
        &self,
        message: &StoredMessage,
        reader: impl Read,
    ) -> Result<MessageSummary> {
        let mut reader = BufReader::with_capacity(self.read_buffer_size, reader);
        let block = header::read_header_block(&mut reader, MAX_HEADER_BLOCK)
            .map_err(|e| MailError::io(message.id.as_str(), e))?;

        let subject = header::parse_header_block(&block)
            .and_then(|headers| header::get_header(&headers, "subject").map(String::from));
        if subject.is_none() {
            debug!(id = %message.id, "Message has no subject");
        }

        Ok(MessageSummary {
            message: message.clone(),
            subject,
        })
    }

    /// Full parse: envelope, header list, sections and text/html bodies.
    pub fn parse_detail(&self, id: &MessageId, reader: impl Read) -> Result<ParsedMessage> {
        let raw = self.read_message(id, reader)?;
        let (envelope, msg) = parse_structure(id, &raw)?;

        let parts = match msg {
            Some(ref msg) => body_parts(msg),
            None => Vec::new(),
        };

        let mut sections = Vec::with_capacity(parts.len());
        let mut text_body = None;
        let mut html_body = None;
        for (index, part) in parts.iter().enumerate() {
            let section = body_section(index, part);
            match section.media_type.as_str() {
                "text/plain" if text_body.is_none() => text_body = Some(text_of(part)),
                "text/html" if html_body.is_none() => html_body = Some(text_of(part)),
                _ => {}
            }
            sections.push(section);
        }

        debug!(id = %id, sections = sections.len(), "Parsed message detail");

        Ok(ParsedMessage {
            envelope,
            sections,
            text_body,
            html_body,
        })
    }

    /// Resolve a section by its depth-first index and decode its payload.
    pub fn section_at(
        &self,
        id: &MessageId,
        reader: impl Read,
        index: usize,
    ) -> Result<SectionContent> {
        self.resolve_section(id, reader, |section| section.index == index)
            .ok_or_else(|| MailError::SectionNotFound {
                id: id.to_string(),
                index,
            })?
    }

    /// Resolve the first section carrying `content_id` and decode its payload.
    pub fn section_by_content_id(
        &self,
        id: &MessageId,
        reader: impl Read,
        content_id: &str,
    ) -> Result<SectionContent> {
        self.resolve_section(id, reader, |section| section.matches_content_id(content_id))
            .ok_or_else(|| MailError::ContentNotFound {
                id: id.to_string(),
                content_id: normalize_content_id(content_id).to_string(),
            })?
    }

    /// Parse, scan sections in order, and decode the first match.
    ///
    /// Returns `None` when nothing matches, `Some(Err)` when the message
    /// itself cannot be read or parsed.
    fn resolve_section(
        &self,
        id: &MessageId,
        reader: impl Read,
        matches: impl Fn(&BodySection) -> bool,
    ) -> Option<Result<SectionContent>> {
        let raw = match self.read_message(id, reader) {
            Ok(raw) => raw,
            Err(e) => return Some(Err(e)),
        };
        let msg = match parse_structure(id, &raw) {
            Ok((_, Some(msg))) => msg,
            Ok((_, None)) => return None,
            Err(e) => return Some(Err(e)),
        };

        body_parts(&msg)
            .into_iter()
            .enumerate()
            .map(|(index, part)| (body_section(index, part), part))
            .find(|(section, _)| matches(section))
            .map(|(section, part)| {
                let payload = part.contents().to_vec();
                debug!(
                    id = %id,
                    index = section.index,
                    bytes = payload.len(),
                    "Decoded section"
                );
                Ok(SectionContent::new(section, Box::new(Cursor::new(payload))))
            })
    }

    /// Read a whole message, refusing anything over the size limit.
    fn read_message(&self, id: &MessageId, reader: impl Read) -> Result<Vec<u8>> {
        let mut raw = Vec::new();
        reader
            .take(self.max_message_size.saturating_add(1))
            .read_to_end(&mut raw)
            .map_err(|e| MailError::io(id.as_str(), e))?;
        if raw.len() as u64 > self.max_message_size {
            return Err(MailError::MessageTooLarge {
                size: raw.len() as u64,
                limit: self.max_message_size,
            });
        }
        Ok(raw)
    }
}

/// Parse headers and MIME tree, validating the structure.
///
/// The returned message is `None` when the message has no body part at all
/// (empty body and no `Content-Type`).
fn parse_structure<'x>(
    id: &MessageId,
    raw: &'x [u8],
) -> Result<(ParsedEnvelope, Option<Message<'x>>)> {
    if raw.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(MailError::parse(id.as_str(), "empty message"));
    }

    let header_end = header::find_header_end(raw).unwrap_or(raw.len());
    let fields = header::parse_raw_fields(&raw[..header_end])
        .ok_or_else(|| MailError::parse(id.as_str(), "message does not start with a header"))?;
    let envelope = envelope_from_fields(fields);

    let body = &raw[header_end..];
    let has_content_type = header::get_header(&envelope.headers, "content-type").is_some();
    if !has_content_type && body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok((envelope, None));
    }

    let msg = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| MailError::parse(id.as_str(), "unparseable MIME structure"))?;
    validate_multiparts(id, &msg, raw)?;

    Ok((envelope, Some(msg)))
}

/// Every multipart must declare a boundary that actually occurs in the message.
fn validate_multiparts(id: &MessageId, msg: &Message<'_>, raw: &[u8]) -> Result<()> {
    for part in &msg.parts {
        let Some(ct) = part.content_type() else {
            continue;
        };
        if !ct.ctype().eq_ignore_ascii_case("multipart") {
            continue;
        }
        let boundary = ct.attribute("boundary").ok_or_else(|| {
            MailError::parse(id.as_str(), "multipart part without a boundary parameter")
        })?;
        let delimiter = format!("--{boundary}");
        if !contains(raw, delimiter.as_bytes()) {
            return Err(MailError::parse(
                id.as_str(),
                format!("multipart boundary '{boundary}' never occurs in the body"),
            ));
        }
    }
    Ok(())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

/// Build the envelope from undecoded header fields.
fn envelope_from_fields(fields: Vec<(String, String)>) -> ParsedEnvelope {
    let addresses = |name: &str| -> Vec<EmailAddress> {
        fields
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .flat_map(|(_, v)| EmailAddress::parse_list(v))
            .map(|addr| EmailAddress {
                name: addr.name.map(|n| header::decode_encoded_words(&n)),
                address: addr.address,
            })
            .collect()
    };

    let from = addresses("from");
    let to = addresses("to");
    let cc = addresses("cc");
    let bcc = addresses("bcc");

    let headers: Vec<HeaderEntry> = fields
        .iter()
        .map(|(name, value)| HeaderEntry {
            name: name.clone(),
            value: header::decode_encoded_words(value),
        })
        .collect();

    let subject = header::get_header(&headers, "subject").map(String::from);
    let date = header::get_header(&headers, "date").and_then(header::parse_date);

    ParsedEnvelope {
        from,
        to,
        cc,
        bcc,
        subject,
        date,
        headers,
    }
}

/// Leaf parts of the MIME tree in depth-first order.
///
/// Attached messages are leaves; their inner parts are not descended into.
fn body_parts<'m, 'x>(msg: &'m Message<'x>) -> Vec<&'m MessagePart<'x>> {
    let mut out = Vec::new();
    if let Some(root) = msg.parts.first() {
        collect_leaves(msg, root, 0, &mut out);
    }
    out
}

fn collect_leaves<'m, 'x>(
    msg: &'m Message<'x>,
    part: &'m MessagePart<'x>,
    depth: usize,
    out: &mut Vec<&'m MessagePart<'x>>,
) {
    match part.body {
        PartType::Multipart(ref children) => {
            if depth >= MAX_DEPTH {
                debug!(depth, "Multipart nesting too deep, ignoring children");
                return;
            }
            for child in children {
                if let Some(child) = msg.parts.get(*child as usize) {
                    collect_leaves(msg, child, depth + 1, out);
                }
            }
        }
        _ => out.push(part),
    }
}

/// Section metadata for one leaf part.
fn body_section(index: usize, part: &MessagePart<'_>) -> BodySection {
    let media_type = part
        .content_type()
        .map(|ct| {
            let main = ct.ctype().to_ascii_lowercase();
            match ct.subtype() {
                Some(sub) => format!("{main}/{}", sub.to_ascii_lowercase()),
                None => main,
            }
        })
        .unwrap_or_else(|| DEFAULT_MEDIA_TYPE.to_string());

    let file_name = part
        .attachment_name()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty());

    let content_id = part
        .content_id()
        .map(|cid| normalize_content_id(cid).to_string())
        .filter(|cid| !cid.is_empty());

    BodySection {
        index,
        media_type,
        file_name,
        content_id,
    }
}

/// Decoded text of a part.
fn text_of(part: &MessagePart<'_>) -> String {
    match part.body {
        PartType::Text(ref text) | PartType::Html(ref text) => text.to_string(),
        _ => String::from_utf8_lossy(part.contents()).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn id() -> MessageId {
        MessageId::parse("20240101000000000-0000.eml").unwrap()
    }

    fn detail(raw: &str) -> Result<ParsedMessage> {
        MimeProjector::default().parse_detail(&id(), raw.as_bytes())
    }

    const MULTIPART: &str = "From: a@x.com\r\n\
        Subject: Parts\r\n\
        MIME-Version: 1.0\r\n\
        Content-Type: multipart/mixed; boundary=\"outer\"\r\n\
        \r\n\
        --outer\r\n\
        Content-Type: multipart/alternative; boundary=\"inner\"\r\n\
        \r\n\
        --inner\r\n\
        Content-Type: text/plain; charset=utf-8\r\n\
        \r\n\
        plain text\r\n\
        --inner\r\n\
        Content-Type: text/html; charset=utf-8\r\n\
        \r\n\
        <p>html text</p>\r\n\
        --inner--\r\n\
        --outer\r\n\
        Content-Type: image/png; name=\"logo.png\"\r\n\
        Content-ID: <logo@x.com>\r\n\
        Content-Transfer-Encoding: base64\r\n\
        \r\n\
        aGVsbG8=\r\n\
        --outer--\r\n";

    #[test]
    fn test_sections_depth_first() {
        let parsed = detail(MULTIPART).unwrap();
        let types: Vec<&str> = parsed
            .sections
            .iter()
            .map(|s| s.media_type.as_str())
            .collect();
        assert_eq!(types, vec!["text/plain", "text/html", "image/png"]);
        assert_eq!(parsed.sections[2].index, 2);
        assert_eq!(parsed.sections[2].content_id.as_deref(), Some("logo@x.com"));
        assert_eq!(parsed.sections[2].file_name.as_deref(), Some("logo.png"));
        assert_eq!(parsed.text_body.as_deref().map(str::trim), Some("plain text"));
        assert_eq!(
            parsed.html_body.as_deref().map(str::trim),
            Some("<p>html text</p>")
        );
    }

    #[test]
    fn test_section_decoded_on_demand() {
        let projector = MimeProjector::default();
        let by_index = projector
            .section_at(&id(), MULTIPART.as_bytes(), 2)
            .unwrap();
        assert_eq!(by_index.media_type(), "image/png");
        assert_eq!(by_index.read_to_vec().unwrap(), b"hello");

        let by_cid = projector
            .section_by_content_id(&id(), MULTIPART.as_bytes(), "<logo@x.com>")
            .unwrap();
        assert_eq!(by_cid.file_name, "logo.png");
        assert_eq!(by_cid.read_to_vec().unwrap(), b"hello");
    }

    #[test]
    fn test_missing_section_is_not_found() {
        let projector = MimeProjector::default();
        let err = projector
            .section_at(&id(), MULTIPART.as_bytes(), 3)
            .unwrap_err();
        assert!(matches!(err, MailError::SectionNotFound { index: 3, .. }));
        let err = projector
            .section_by_content_id(&id(), MULTIPART.as_bytes(), "nope")
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_no_body_part() {
        let parsed = detail("From: a@x.com\r\nSubject: Empty\r\n\r\n").unwrap();
        assert!(parsed.sections.is_empty());
        assert!(parsed.text_body.is_none());
        assert!(parsed.html_body.is_none());
        assert_eq!(parsed.envelope.subject.as_deref(), Some("Empty"));
    }

    #[test]
    fn test_single_part_plain() {
        let parsed = detail("From: a@x.com\r\nSubject: Hi\r\n\r\nHello Buddy\r\n").unwrap();
        assert_eq!(parsed.sections.len(), 1);
        assert_eq!(parsed.sections[0].media_type, "text/plain");
        assert_eq!(parsed.text_body.as_deref().map(str::trim), Some("Hello Buddy"));
        assert!(parsed.html_body.is_none());
    }

    #[test]
    fn test_quoted_printable_body_decoded() {
        let raw = "From: a@x.com\r\n\
            Content-Type: text/plain; charset=utf-8\r\n\
            Content-Transfer-Encoding: quoted-printable\r\n\
            \r\n\
            caf=C3=A9\r\n";
        let parsed = detail(raw).unwrap();
        assert_eq!(parsed.text_body.as_deref().map(str::trim), Some("café"));
    }

    #[test]
    fn test_malformed_messages_fail() {
        assert!(detail("").unwrap_err().is_parse_error());
        assert!(detail("just some text\r\nwithout headers\r\n")
            .unwrap_err()
            .is_parse_error());
        let no_boundary = "From: a@x.com\r\nContent-Type: multipart/mixed\r\n\r\nbody\r\n";
        assert!(detail(no_boundary).unwrap_err().is_parse_error());
        let lost_boundary =
            "From: a@x.com\r\nContent-Type: multipart/mixed; boundary=zzz\r\n\r\nbody\r\n";
        assert!(detail(lost_boundary).unwrap_err().is_parse_error());
    }

    #[test]
    fn test_envelope_addresses_and_headers() {
        let raw = "From: =?UTF-8?B?Sm9zw6k=?= <jose@x.com>\r\n\
            To: b@x.com\r\n\
            Cc: c@x.com, d@x.com\r\n\
            Bcc: e@x.com, f@x.com\r\n\
            Reply-To: one@replyto.com\r\n\
            X-Extended: extended value\r\n\
            Subject: Test\r\n\
            Date: Thu, 04 Jan 2024 10:00:00 +0000\r\n\
            \r\n\
            body\r\n";
        let env = detail(raw).unwrap().envelope;
        assert_eq!(env.from[0].name.as_deref(), Some("José"));
        assert_eq!(env.to.len(), 1);
        assert_eq!(env.cc.len(), 2);
        assert_eq!(env.bcc[1].address, "f@x.com");
        assert!(env.date.is_some());
        let names: Vec<&str> = env.headers.iter().map(|h| h.name.as_str()).collect();
        assert!(names.contains(&"Reply-To"));
        assert_eq!(
            header::get_header(&env.headers, "X-Extended"),
            Some("extended value")
        );
    }

    #[test]
    fn test_summary_reads_subject_only() {
        let stored = StoredMessage {
            id: id(),
            created_at: Utc::now(),
            size: 10,
        };
        let projector = MimeProjector::default();
        let summary = projector
            .parse_summary(&stored, "Subject: =?UTF-8?Q?Caf=C3=A9?=\r\n\r\nnot read".as_bytes())
            .unwrap();
        assert_eq!(summary.subject.as_deref(), Some("Café"));

        let garbage = projector
            .parse_summary(&stored, "\u{0}\u{1} not a message".as_bytes())
            .unwrap();
        assert_eq!(garbage.subject, None);
    }

    #[test]
    fn test_oversized_message_refused() {
        let projector = MimeProjector::new(&PerformanceConfig {
            max_message_size: 16,
            ..PerformanceConfig::default()
        });
        let err = projector
            .parse_detail(&id(), "Subject: far too long for the limit\r\n\r\n".as_bytes())
            .unwrap_err();
        assert!(matches!(err, MailError::MessageTooLarge { limit: 16, .. }));
    }

    #[test]
    fn test_parse_is_idempotent() {
        assert_eq!(detail(MULTIPART).unwrap(), detail(MULTIPART).unwrap());
    }
}
