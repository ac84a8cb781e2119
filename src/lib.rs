//! `mailcatch`: a local store for captured email messages.
//!
//! Messages are kept as one `.eml` file each, listed newest first and
//! projected on demand into summaries, full details and decoded body
//! sections.

pub mod config;
pub mod error;
pub mod export;
pub mod index;
pub mod model;
pub mod parser;
pub mod repository;
pub mod store;

pub use error::{MailError, Result};
pub use repository::MessageRepository;
