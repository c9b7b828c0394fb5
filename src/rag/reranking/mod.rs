// Re-ranking of retrieval candidates

pub mod scorer;

pub use scorer::{FallbackReason, RemoteReranker, RerankConfig, RerankOutcome, Reranker, ScoredPassage};
