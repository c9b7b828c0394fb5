// Retrieval: query embedding and scoped similarity search
pub mod engine;

pub use engine::{Retrieval, RetrievalEngine, ScopePolicy};
