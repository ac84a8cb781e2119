use criterion::{criterion_group, criterion_main, Criterion};
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use mailcatch::index::builder;
use mailcatch::model::message::{MessageId, StoredMessage};
use mailcatch::parser::mime::MimeProjector;
use mailcatch::store::{BlobStore, MemoryBlobStore};

fn fixture_bytes() -> Vec<u8> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("multipart.eml");
    std::fs::read(path).unwrap()
}

fn bench_projection(c: &mut Criterion) {
    let raw = fixture_bytes();
    let projector = MimeProjector::default();
    let stored = StoredMessage {
        id: MessageId::parse("20240401073000000-0000.eml").unwrap(),
        created_at: Utc::now(),
        size: raw.len() as u64,
    };

    c.bench_function("parse_summary_multipart", |b| {
        b.iter(|| projector.parse_summary(&stored, raw.as_slice()).unwrap())
    });

    c.bench_function("parse_detail_multipart", |b| {
        b.iter(|| projector.parse_detail(&stored.id, raw.as_slice()).unwrap())
    });
}

fn bench_index_build(c: &mut Criterion) {
    let raw = fixture_bytes();
    let blobs = MemoryBlobStore::new();
    let now = Utc::now();
    for _ in 0..1000 {
        blobs
            .save(now, 0, &mut |w: &mut dyn Write| w.write_all(&raw))
            .unwrap();
    }

    c.bench_function("build_index_1000", |b| {
        b.iter(|| builder::build_index(&blobs).unwrap())
    });
}

criterion_group!(benches, bench_projection, bench_index_build);
criterion_main!(benches);
