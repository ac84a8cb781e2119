//! Durable blob storage: one `.eml` file per message.
//!
//! Writes are staged in a hidden `.tmp` directory, synced, then published
//! under their final name without ever overwriting an existing blob. A
//! failed write leaves nothing visible.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{MailError, Result};
use crate::model::message::{MessageId, StoredMessage, MESSAGE_EXTENSION};

/// Name of the staging directory inside the message directory.
const STAGING_DIR: &str = ".tmp";

/// Sequence numbers are four digits, so a millisecond holds at most this many ids.
pub const MAX_SEQ: u32 = 10_000;

/// Callback that produces a message's bytes into the provided sink.
pub type MessageWriter<'a> = dyn FnMut(&mut dyn Write) -> io::Result<()> + 'a;

/// Storage of raw message bytes keyed by generated identifiers.
pub trait BlobStore: Send + Sync {
    /// Persist whatever `writer` produces under a fresh identifier derived
    /// from `created_at`, with a sequence number of at least `first_seq`.
    /// The bytes are durable once this returns.
    fn save(
        &self,
        created_at: DateTime<Utc>,
        first_seq: u32,
        writer: &mut MessageWriter<'_>,
    ) -> Result<StoredMessage>;

    /// Open a blob for reading. Fails with `MessageNotFound` if absent.
    fn open(&self, id: &MessageId) -> Result<Box<dyn Read + Send>>;

    /// Storage metadata of one blob without reading its content.
    fn stat(&self, id: &MessageId) -> Result<StoredMessage>;

    /// Remove a blob. Fails with `MessageNotFound` if absent.
    fn delete(&self, id: &MessageId) -> Result<()>;

    /// Enumerate every stored blob with its metadata, in no particular order.
    fn list(&self) -> Result<Vec<StoredMessage>>;
}

/// Filesystem-backed [`BlobStore`].
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    staging: PathBuf,
    max_message_size: u64,
}

impl FsBlobStore {
    /// Open (creating if needed) a message directory.
    pub fn open(root: impl AsRef<Path>, max_message_size: u64) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let staging = root.join(STAGING_DIR);
        fs::create_dir_all(&staging).map_err(|e| MailError::io(&staging, e))?;
        debug!(path = %root.display(), "Opened message directory");
        Ok(Self {
            root,
            staging,
            max_message_size,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the blob for `id`. Ids are validated, so this never escapes `root`.
    pub fn path_for(&self, id: &MessageId) -> PathBuf {
        self.root.join(id.as_str())
    }

    fn not_found_or_io(&self, id: &MessageId, path: &Path, e: io::Error) -> MailError {
        if e.kind() == io::ErrorKind::NotFound {
            MailError::MessageNotFound(id.to_string())
        } else {
            MailError::io(path, e)
        }
    }

    fn metadata_to_stored(id: MessageId, meta: &fs::Metadata) -> StoredMessage {
        let created_at = id.timestamp().unwrap_or_else(|| {
            meta.modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or(DateTime::UNIX_EPOCH)
        });
        StoredMessage {
            id,
            created_at,
            size: meta.len(),
        }
    }
}

impl BlobStore for FsBlobStore {
    fn save(
        &self,
        created_at: DateTime<Utc>,
        first_seq: u32,
        writer: &mut MessageWriter<'_>,
    ) -> Result<StoredMessage> {
        let mut tmp =
            NamedTempFile::new_in(&self.staging).map_err(|e| MailError::io(&self.staging, e))?;

        let tmp_path = tmp.path().to_path_buf();

        let size = {
            let mut sink =
                LimitedWriter::new(BufWriter::new(tmp.as_file_mut()), self.max_message_size);
            let written = writer(&mut sink).and_then(|()| sink.flush());
            if sink.exceeded() {
                return Err(MailError::MessageTooLarge {
                    size: sink.written(),
                    limit: self.max_message_size,
                });
            }
            written.map_err(|e| MailError::io(&tmp_path, e))?;
            sink.written()
        };
        tmp.as_file()
            .sync_all()
            .map_err(|e| MailError::io(&tmp_path, e))?;

        for seq in first_seq..MAX_SEQ {
            let id = MessageId::generate(created_at, seq);
            let path = self.path_for(&id);
            match tmp.persist_noclobber(&path) {
                Ok(_) => {
                    debug!(id = %id, size, "Blob committed");
                    return Ok(StoredMessage {
                        id,
                        created_at,
                        size,
                    });
                }
                Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => tmp = e.file,
                Err(e) => return Err(MailError::io(path, e.error)),
            }
        }

        Err(MailError::io(
            &self.root,
            io::Error::new(
                io::ErrorKind::AlreadyExists,
                "no free message identifier for this millisecond",
            ),
        ))
    }

    fn open(&self, id: &MessageId) -> Result<Box<dyn Read + Send>> {
        let path = self.path_for(id);
        let file = File::open(&path).map_err(|e| self.not_found_or_io(id, &path, e))?;
        if !file
            .metadata()
            .map_err(|e| MailError::io(&path, e))?
            .is_file()
        {
            return Err(MailError::MessageNotFound(id.to_string()));
        }
        Ok(Box::new(file))
    }

    fn stat(&self, id: &MessageId) -> Result<StoredMessage> {
        let path = self.path_for(id);
        let meta = fs::metadata(&path).map_err(|e| self.not_found_or_io(id, &path, e))?;
        if !meta.is_file() {
            return Err(MailError::MessageNotFound(id.to_string()));
        }
        Ok(Self::metadata_to_stored(id.clone(), &meta))
    }

    fn delete(&self, id: &MessageId) -> Result<()> {
        let path = self.path_for(id);
        fs::remove_file(&path).map_err(|e| self.not_found_or_io(id, &path, e))
    }

    fn list(&self) -> Result<Vec<StoredMessage>> {
        let dir = fs::read_dir(&self.root).map_err(|e| MailError::io(&self.root, e))?;
        let mut messages = Vec::new();

        for entry in dir {
            let entry = entry.map_err(|e| MailError::io(&self.root, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                warn!(path = %entry.path().display(), "Skipping non UTF-8 file name");
                continue;
            };
            if !name.ends_with(&format!(".{MESSAGE_EXTENSION}")) {
                continue;
            }
            let Ok(id) = MessageId::parse(name) else {
                warn!(name, "Skipping file with an unusable name");
                continue;
            };
            match entry.metadata() {
                Ok(meta) if meta.is_file() => messages.push(Self::metadata_to_stored(id, &meta)),
                Ok(_) => {}
                // Deleted between readdir and stat
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(MailError::io(entry.path(), e)),
            }
        }

        Ok(messages)
    }
}

/// Counts bytes written and refuses to go past a limit.
struct LimitedWriter<W> {
    inner: W,
    written: u64,
    limit: u64,
    exceeded: bool,
}

impl<W: Write> LimitedWriter<W> {
    fn new(inner: W, limit: u64) -> Self {
        Self {
            inner,
            written: 0,
            limit,
            exceeded: false,
        }
    }

    fn written(&self) -> u64 {
        self.written
    }

    fn exceeded(&self) -> bool {
        self.exceeded
    }
}

impl<W: Write> Write for LimitedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written + buf.len() as u64 > self.limit {
            self.exceeded = true;
            self.written += buf.len() as u64;
            return Err(io::Error::other("message size limit exceeded"));
        }
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
