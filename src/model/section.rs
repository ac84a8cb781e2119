//! Body section metadata and on-demand section content.
//!
//! A section's payload is only decoded when explicitly requested; the
//! metadata alone is what message details carry.

use std::fmt;
use std::io::Read;

/// One leaf MIME part of a stored message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodySection {
    /// Zero-based position in depth-first order of the MIME tree.
    pub index: usize,
    /// Lower-cased `type/subtype`.
    pub media_type: String,
    /// Filename from `Content-Disposition` or the `name` content-type parameter.
    pub file_name: Option<String>,
    /// `Content-ID` without surrounding angle brackets.
    pub content_id: Option<String>,
}

impl BodySection {
    /// Filename to offer for download: the section's own, or one derived
    /// from its position and media type.
    pub fn suggested_file_name(&self) -> String {
        match self.file_name {
            Some(ref name) if !name.trim().is_empty() => name.clone(),
            _ => format!(
                "section-{}.{}",
                self.index,
                extension_for(&self.media_type)
            ),
        }
    }

    /// `true` if this section carries the given Content-ID.
    ///
    /// Both sides are normalized, so `<logo@x>` matches `logo@x`.
    pub fn matches_content_id(&self, content_id: &str) -> bool {
        let wanted = normalize_content_id(content_id);
        self.content_id
            .as_deref()
            .is_some_and(|cid| !wanted.is_empty() && cid == wanted)
    }
}

/// Strip whitespace and one pair of surrounding angle brackets.
pub fn normalize_content_id(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .unwrap_or(trimmed)
        .trim()
}

/// File extension for common media types, `bin` otherwise.
fn extension_for(media_type: &str) -> &'static str {
    match media_type {
        "text/plain" => "txt",
        "text/html" => "html",
        "text/calendar" => "ics",
        "text/csv" => "csv",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/svg+xml" => "svg",
        "application/pdf" => "pdf",
        "application/zip" => "zip",
        "application/json" => "json",
        "message/rfc822" => "eml",
        _ => "bin",
    }
}

/// A resolved section ready to be streamed to a caller.
///
/// The reader yields the transfer-decoded payload. Dropping the value
/// releases everything it holds, including mid-stream.
pub struct SectionContent {
    pub section: BodySection,
    /// Suggested download filename (never empty).
    pub file_name: String,
    reader: Box<dyn Read + Send>,
}

impl SectionContent {
    pub fn new(section: BodySection, reader: Box<dyn Read + Send>) -> Self {
        let file_name = section.suggested_file_name();
        Self {
            section,
            file_name,
            reader,
        }
    }

    pub fn media_type(&self) -> &str {
        &self.section.media_type
    }

    /// `Content-Disposition` value for attachment-style delivery.
    pub fn content_disposition(&self) -> String {
        attachment_disposition(&self.file_name)
    }

    /// Borrow the payload stream.
    pub fn reader(&mut self) -> &mut (dyn Read + Send) {
        self.reader.as_mut()
    }

    /// Take the payload stream.
    pub fn into_reader(self) -> Box<dyn Read + Send> {
        self.reader
    }

    /// Read the whole payload into memory.
    pub fn read_to_vec(mut self) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.reader.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl fmt::Debug for SectionContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SectionContent")
            .field("section", &self.section)
            .field("file_name", &self.file_name)
            .finish_non_exhaustive()
    }
}

/// Render `attachment; filename="..."` with the name quoted.
pub fn attachment_disposition(file_name: &str) -> String {
    let mut quoted = String::with_capacity(file_name.len());
    for ch in file_name.chars() {
        match ch {
            '"' | '\\' => {
                quoted.push('\\');
                quoted.push(ch);
            }
            '\r' | '\n' => quoted.push(' '),
            _ => quoted.push(ch),
        }
    }
    format!("attachment; filename=\"{quoted}\"")
}
