//! Write sections and raw messages to disk.
//!
//! Files are never overwritten: a name that is taken gets a counter suffix.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::model::message::RawMessage;
use crate::model::section::SectionContent;

/// Longest filename we write.
const MAX_FILE_NAME: usize = 150;

/// Export a decoded section into `output_dir`.
///
/// Returns the path of the created file.
pub fn export_section(content: SectionContent, output_dir: &Path) -> anyhow::Result<PathBuf> {
    let name = sanitize_filename_part(&content.file_name, MAX_FILE_NAME);
    write_new(output_dir, &name, content.into_reader())
}

/// Export a message's original bytes as `<id>` into `output_dir`.
pub fn export_raw(raw: RawMessage, output_dir: &Path) -> anyhow::Result<PathBuf> {
    let name = sanitize_filename_part(&raw.file_name, MAX_FILE_NAME);
    write_new(output_dir, &name, raw.into_reader())
}

fn write_new(
    output_dir: &Path,
    name: &str,
    mut reader: Box<dyn Read + Send>,
) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(output_dir)?;
    let (path, mut file) = create_unique(&output_dir.join(name))?;
    let bytes = io::copy(&mut reader, &mut file)?;
    file.sync_all()?;
    debug!(path = %path.display(), bytes, "Exported");
    Ok(path)
}

/// Create `path`, or the first free `stem_N.ext` next to it.
fn create_unique(path: &Path) -> io::Result<(PathBuf, File)> {
    let mut candidate = path.to_path_buf();
    for i in 1..1000 {
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                candidate = numbered(path, i);
            }
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free file name for {}", path.display()),
    ))
}

fn numbered(path: &Path, i: usize) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
    let parent = path.parent().unwrap_or(Path::new("."));
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => parent.join(format!("{stem}_{i}.{ext}")),
        None => parent.join(format!("{stem}_{i}")),
    }
}

/// Sanitize a string for use in filenames.
///
/// Replaces invalid characters with `_`, drops leading dots and truncates
/// to `max_len` characters.
pub fn sanitize_filename_part(s: &str, max_len: usize) -> String {
    let sanitized: String = s
        .trim_start_matches('.')
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '.' || c == '_' || c == '@' {
                c
            } else {
                '_'
            }
        })
        .take(max_len)
        .collect();

    if sanitized.is_empty() {
        "unknown".to_string()
    } else {
        sanitized
    }
}
