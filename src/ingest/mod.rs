//! Document ingestion: file loading and chunking
//!
//! Components:
//! - Loader: pdf/docx/txt → plain text
//! - Chunker: plain text → overlapping passages

pub mod chunker;
pub mod loader;

pub use chunker::{Chunker, ChunkerConfig, Chunks};
pub use loader::{is_supported, load_document, load_document_as, FileType, LoadedDocument};
