//! Blob storage backends for raw message bytes.

pub mod blob;
pub mod memory;

pub use blob::{BlobStore, FsBlobStore, MessageWriter};
pub use memory::MemoryBlobStore;
