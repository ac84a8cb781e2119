//! Centralized error types for mailcatch.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mailcatch library.
///
/// Variants fall into three classes that callers map to distinct outcomes:
/// not-found, parse failure and storage failure.
#[derive(Error, Debug)]
pub enum MailError {
    /// No message is stored under the given identifier.
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// The identifier is not one the store could ever have assigned.
    #[error("Invalid message identifier: {0}")]
    InvalidId(String),

    /// The message exists but has no body section at this index.
    #[error("Message '{id}' has no section at index {index}")]
    SectionNotFound { id: String, index: usize },

    /// The message exists but no body section carries this Content-ID.
    #[error("Message '{id}' has no section with content id '{content_id}'")]
    ContentNotFound { id: String, content_id: String },

    /// The stored bytes are not a well-formed MIME message.
    #[error("Malformed message '{id}': {reason}")]
    Parse { id: String, reason: String },

    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A message exceeded the configured size limit.
    #[error("Message of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge { size: u64, limit: u64 },
}

/// Convenience alias for `Result<T, MailError>`.
pub type Result<T> = std::result::Result<T, MailError>;

impl MailError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a `Parse` variant for the given message.
    pub fn parse(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// `true` for every variant that should surface as "not found".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::MessageNotFound(_)
                | Self::InvalidId(_)
                | Self::SectionNotFound { .. }
                | Self::ContentNotFound { .. }
        )
    }

    /// `true` if the stored bytes could not be parsed.
    pub fn is_parse_error(&self) -> bool {
        matches!(self, Self::Parse { .. })
    }

    /// `true` if the underlying storage failed or refused the operation.
    pub fn is_storage_error(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::MessageTooLarge { .. })
    }
}

/// Allow `?` on `std::io::Error` inside functions returning `MailError`
/// when no path context is available (rare, prefer `MailError::io`).
impl From<std::io::Error> for MailError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}
