//! Response shapes returned across the API boundary.
//!
//! Field names serialize in camelCase, the form HTTP callers consume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::address::EmailAddress;
use super::message::{MessageId, MessageSummary, ParsedMessage, StoredMessage};
use super::section::BodySection;

/// List item: one stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefDto {
    pub id: MessageId,
    pub created_at: DateTime<Utc>,
    /// Raw message size in bytes.
    pub size: u64,
    pub subject: Option<String>,
}

/// One page of the reverse-chronological message list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageListResponse {
    /// Size of the whole collection, not of this page.
    pub total_message_count: usize,
    pub messages: Vec<RefDto>,
}

/// A header line, name as written in the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderEntry {
    pub name: String,
    pub value: String,
}

/// Section reference within a message detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionRef {
    /// Content-ID, if the section has one.
    pub id: Option<String>,
    pub media_type: String,
    pub file_name: Option<String>,
}

/// Full message detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailDto {
    pub id: MessageId,
    pub created_at: DateTime<Utc>,
    pub from: Vec<EmailAddress>,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub bcc: Vec<EmailAddress>,
    pub subject: Option<String>,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    pub headers: Vec<HeaderEntry>,
    pub sections: Vec<SectionRef>,
}

impl From<MessageSummary> for RefDto {
    fn from(summary: MessageSummary) -> Self {
        Self {
            id: summary.message.id,
            created_at: summary.message.created_at,
            size: summary.message.size,
            subject: summary.subject,
        }
    }
}

impl From<&BodySection> for SectionRef {
    fn from(section: &BodySection) -> Self {
        Self {
            id: section.content_id.clone(),
            media_type: section.media_type.clone(),
            file_name: section.file_name.clone(),
        }
    }
}

impl DetailDto {
    /// Combine storage metadata with a full parse.
    pub fn new(message: &StoredMessage, parsed: ParsedMessage) -> Self {
        let sections = parsed.sections.iter().map(SectionRef::from).collect();
        let envelope = parsed.envelope;
        Self {
            id: message.id.clone(),
            created_at: message.created_at,
            from: envelope.from,
            to: envelope.to,
            cc: envelope.cc,
            bcc: envelope.bcc,
            subject: envelope.subject,
            text_body: parsed.text_body,
            html_body: parsed.html_body,
            headers: envelope.headers,
            sections,
        }
    }
}
