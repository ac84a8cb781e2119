//! Core data model types: identifiers, envelopes, sections and response DTOs.

pub mod address;
pub mod dto;
pub mod message;
pub mod section;
