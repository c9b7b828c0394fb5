// RAG (Retrieval-Augmented Generation) Pipeline
//
// Answers questions from an indexed document corpus, optionally remembering
// recent turns of each conversation.
//
// Components:
// - Retrieval Engine: Query embedding and similarity search, with scoping
// - Re-ranking: Cross-encoder ordering with graceful fallback
// - Context Builder: Passage and history block inserted into prompts
// - Prompt: Named templates with placeholder substitution
// - State: Per-query state machine
// - Pipeline: End-to-end orchestration and ingestion

pub mod context;
pub mod pipeline;
pub mod prompt;
pub mod reranking;
pub mod retrieval;
pub mod state;

// Re-export key types
pub use context::{AssembledContext, ContextBuilder, NO_CONTEXT};
pub use pipeline::{
    AnswerStream, AskRequest, AskResponse, IngestProgress, IngestReport, IngestedFile, PipelineStats,
    RagOrchestrator, RetrievalConfig, RetrievedPassage, StreamingAnswer,
};
pub use prompt::{PromptBuilder, PromptConfig, Template, LEGAL_ADVISOR};
pub use reranking::{FallbackReason, RemoteReranker, RerankConfig, RerankOutcome, Reranker, ScoredPassage};
pub use retrieval::{Retrieval, RetrievalEngine, ScopePolicy};
pub use state::{QueryEvent, QueryState, QueryTrace};
