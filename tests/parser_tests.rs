//! Integration tests for header decoding and MIME projection.

use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};

use mailcatch::model::message::{MessageId, StoredMessage};
use mailcatch::parser::header::{decode_encoded_words, parse_date};
use mailcatch::parser::mime::MimeProjector;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn open(name: &str) -> File {
    File::open(fixture(name)).unwrap()
}

fn id() -> MessageId {
    MessageId::parse("20240104100000000-0000.eml").unwrap()
}

// ─── Encoded words in addresses and subject ─────────────────────────

#[test]
fn test_detail_decodes_encoded_words() {
    let parsed = MimeProjector::default()
        .parse_detail(&id(), open("encoded_words.eml"))
        .unwrap();
    let envelope = &parsed.envelope;

    assert_eq!(envelope.from.len(), 1);
    assert_eq!(envelope.from[0].name.as_deref(), Some("François"));
    assert_eq!(envelope.from[0].address, "francois@example.com");
    assert_eq!(envelope.to[0].name.as_deref(), Some("山田太郎"));
    assert_eq!(envelope.subject.as_deref(), Some("Café con leña"));
    assert_eq!(
        envelope.date,
        Some(Utc.with_ymd_and_hms(2024, 1, 4, 10, 0, 0).unwrap())
    );
    assert_eq!(
        parsed.text_body.as_deref().map(str::trim),
        Some("Un café, por favor.")
    );
}

// ─── Repeated headers keep order and casing ─────────────────────────

#[test]
fn test_headers_keep_order_and_casing() {
    let parsed = MimeProjector::default()
        .parse_detail(&id(), open("encoded_words.eml"))
        .unwrap();
    let names: Vec<&str> = parsed
        .envelope
        .headers
        .iter()
        .map(|h| h.name.as_str())
        .collect();
    assert_eq!(
        names,
        vec![
            "Received",
            "Received",
            "From",
            "To",
            "Subject",
            "Date",
            "X-Mailer",
            "Content-Type"
        ]
    );
    assert!(parsed.envelope.headers[0].value.starts_with("from relay2"));
    assert!(parsed.envelope.headers[1].value.starts_with("from relay1"));
}

// ─── Summary reads the subject only ─────────────────────────────────

#[test]
fn test_summary_subject() {
    let stored = StoredMessage {
        id: id(),
        created_at: Utc::now(),
        size: 0,
    };
    let summary = MimeProjector::default()
        .parse_summary(&stored, open("encoded_words.eml"))
        .unwrap();
    assert_eq!(summary.subject.as_deref(), Some("Café con leña"));
    assert_eq!(summary.message, stored);
}

// ─── Multipart sections ─────────────────────────────────────────────

#[test]
fn test_multipart_sections() {
    let parsed = MimeProjector::default()
        .parse_detail(&id(), open("multipart.eml"))
        .unwrap();

    let types: Vec<&str> = parsed
        .sections
        .iter()
        .map(|s| s.media_type.as_str())
        .collect();
    assert_eq!(
        types,
        vec![
            "text/plain",
            "text/html",
            "application/pdf",
            "application/octet-stream"
        ]
    );
    assert_eq!(parsed.sections[2].file_name.as_deref(), Some("report.pdf"));
    assert_eq!(
        parsed.sections[2].content_id.as_deref(),
        Some("report-2024-q1@example.com")
    );
    assert_eq!(parsed.sections[3].file_name, None);
    assert_eq!(parsed.sections[3].suggested_file_name(), "section-3.bin");

    assert_eq!(parsed.envelope.to.len(), 2);
    assert_eq!(parsed.envelope.to[1].name.as_deref(), Some("Carol, C."));
    assert_eq!(
        parsed.text_body.as_deref().map(str::trim),
        Some("Report attached.")
    );
    assert_eq!(
        parsed.html_body.as_deref().map(str::trim),
        Some("<p>Report attached.</p>")
    );
}

#[test]
fn test_multipart_section_payloads() {
    let projector = MimeProjector::default();

    let pdf = projector
        .section_by_content_id(&id(), open("multipart.eml"), "<report-2024-q1@example.com>")
        .unwrap();
    assert_eq!(pdf.media_type(), "application/pdf");
    assert_eq!(
        pdf.content_disposition(),
        "attachment; filename=\"report.pdf\""
    );
    assert_eq!(pdf.read_to_vec().unwrap(), b"%PDF-1.4 fake");

    let blob = projector
        .section_at(&id(), open("multipart.eml"), 3)
        .unwrap();
    assert_eq!(blob.file_name, "section-3.bin");
    assert_eq!(blob.read_to_vec().unwrap(), vec![0u8, 1, 2, 3]);

    let err = projector
        .section_at(&id(), open("multipart.eml"), 4)
        .unwrap_err();
    assert!(err.is_not_found());
}

// ─── Malformed input ────────────────────────────────────────────────

#[test]
fn test_missing_boundary_is_parse_error() {
    let projector = MimeProjector::default();
    let err = projector
        .parse_detail(&id(), open("missing_boundary.eml"))
        .unwrap_err();
    assert!(err.is_parse_error(), "got {err}");

    let stored = StoredMessage {
        id: id(),
        created_at: Utc::now(),
        size: 0,
    };
    let summary = projector
        .parse_summary(&stored, open("missing_boundary.eml"))
        .unwrap();
    assert_eq!(summary.subject.as_deref(), Some("No boundary"));
}

// ─── Date parsing in multiple formats ───────────────────────────────

#[test]
fn test_date_parsing_formats() {
    assert!(parse_date("Thu, 04 Jan 2024 10:00:00 +0000").is_some());
    assert!(parse_date("04 Jan 2024 10:00:00 +0000").is_some());
    assert!(parse_date("Thu, 04 Jan 2024 10:00:00 EST").is_some());
    assert!(parse_date("2024-01-04T10:00:00Z").is_some());
    assert!(parse_date("not a date").is_none());
}

// ─── Encoded-words ──────────────────────────────────────────────────

#[test]
fn test_decode_encoded_words_base64_utf8() {
    assert_eq!(
        decode_encoded_words("=?UTF-8?B?SG9sYSBtdW5kbw==?="),
        "Hola mundo"
    );
}

#[test]
fn test_decode_encoded_words_q_iso8859() {
    assert_eq!(decode_encoded_words("=?ISO-8859-1?Q?caf=E9?="), "café");
}

#[test]
fn test_decode_encoded_words_plain_passthrough() {
    assert_eq!(decode_encoded_words("Normal subject"), "Normal subject");
}
