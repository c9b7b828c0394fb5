//! Memory for the RAG core
//!
//! Components:
//! - Embedding: text → unit vectors (remote service or local model)
//! - Vector DB: exact similarity index with on-disk snapshots
//! - Conversation: bounded per-conversation message history

pub mod conversation;
pub mod embedding;
pub mod vector_db;

pub use conversation::{ConversationMemory, ConversationState, MemoryConfig, Message, Role};
pub use embedding::{build_embedder, Embedder, EmbeddingConfig};
pub use vector_db::{IndexStore, PendingChunk, SearchHit, VectorIndex};
