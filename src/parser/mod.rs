//! Message parsing: header block handling and MIME projection.

pub mod header;
pub mod mime;
