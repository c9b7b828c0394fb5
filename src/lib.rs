//! RagBuddy - Retrieval-augmented question answering
//!
//! Answers natural-language questions from a private document corpus by
//! retrieving relevant passages and handing them to a hosted language model.
//!
//! # Architecture
//!
//! - **ingest**: document loading and chunking
//! - **memory**: embeddings, vector index, conversation memory
//! - **rag**: retrieval, re-ranking, prompt composition, orchestration
//! - **streaming**: chat-completion client and answer streaming

pub mod errors;
pub mod config;
pub mod ingest;
pub mod memory;
pub mod rag;
pub mod streaming;
pub mod cli;

// Re-export commonly used types
pub use config::Config;
pub use errors::{ErrorKind, RagError, Result};
pub use rag::{AskRequest, AskResponse, RagOrchestrator};
