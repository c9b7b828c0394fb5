//! Integration tests for the RAG pipeline
//!
//! Runs the full ask/ingest flow against in-process fakes: no embedding,
//! re-ranking or language model service is contacted.

use async_trait::async_trait;
use futures_util::StreamExt;
use ragbuddy::memory::embedding::Embedder;
use ragbuddy::memory::vector_db::IndexStore;
use ragbuddy::rag::{
    AskRequest, FallbackReason, QueryState, RagOrchestrator, RemoteReranker, RerankConfig, ScopePolicy,
    NO_CONTEXT,
};
use ragbuddy::streaming::{CompletionStream, Generator};
use ragbuddy::{Config, RagError, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const PENALTY: &str = "Late filing incurs a 5% penalty per month.";

/// Embedder with hand-picked vectors; unknown texts map to the last axis
struct TableEmbedder {
    vectors: HashMap<String, Vec<f32>>,
}

impl TableEmbedder {
    fn new(entries: &[(&str, Vec<f32>)]) -> Self {
        Self {
            vectors: entries
                .iter()
                .map(|(text, v)| (text.to_string(), v.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl Embedder for TableEmbedder {
    fn dimension(&self) -> usize {
        2
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| self.vectors.get(t).cloned().unwrap_or_else(|| vec![0.0, 1.0]))
            .collect())
    }
}

/// Generator recording every prompt it receives
#[derive(Default)]
struct RecordingGenerator {
    prompts: Mutex<Vec<String>>,
}

impl RecordingGenerator {
    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for RecordingGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let mut prompts = self.prompts.lock().unwrap();
        prompts.push(prompt.to_string());
        Ok(format!("Answer number {}", prompts.len()))
    }

    async fn generate_stream(&self, prompt: &str) -> Result<CompletionStream> {
        let answer = self.generate(prompt).await?;
        let fragments = answer.split_inclusive(' ').map(str::to_string).collect();
        Ok(CompletionStream::from_fragments(fragments))
    }
}

fn config_in(dir: &Path) -> Config {
    let mut config = Config::default();
    config.index.path = dir.join("law_index").display().to_string();
    config
}

/// Orchestrator whose reranker has no credential and therefore always falls back
async fn orchestrator(
    embedder: TableEmbedder,
    generator: Arc<RecordingGenerator>,
    config: &Config,
) -> RagOrchestrator {
    let store = Arc::new(IndexStore::open(2, config.index_path()).await.unwrap());
    let reranker = Arc::new(RemoteReranker::new(RerankConfig::default()).unwrap());
    RagOrchestrator::with_components(Arc::new(embedder), store, reranker, generator, config)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_empty_index_still_answers() {
    let dir = TempDir::new().unwrap();
    let generator = Arc::new(RecordingGenerator::default());
    let rag = orchestrator(TableEmbedder::new(&[]), Arc::clone(&generator), &config_in(dir.path())).await;

    let response = rag.ask(AskRequest::new("What is the penalty?")).await.unwrap();

    assert!(!response.answer.is_empty());
    assert_eq!(response.context, NO_CONTEXT);
    assert!(response.sources.is_empty());
    assert!(response.degraded);
    assert_eq!(response.trace.last(), Some(&QueryState::Complete));
    assert!(generator.prompts()[0].contains(NO_CONTEXT));
}

#[tokio::test]
async fn test_single_passage_without_reranker() {
    let dir = TempDir::new().unwrap();
    let generator = Arc::new(RecordingGenerator::default());
    let similarity = 0.91f32;
    let embedder = TableEmbedder::new(&[
        (PENALTY, vec![1.0, 0.0]),
        ("What is the late filing penalty?", vec![similarity, (1.0 - similarity * similarity).sqrt()]),
    ]);
    let rag = orchestrator(embedder, Arc::clone(&generator), &config_in(dir.path())).await;

    rag.ingest_text("tax_code.txt", PENALTY).await.unwrap();
    let response = rag
        .ask(AskRequest::new("What is the late filing penalty?").with_top_k(1))
        .await
        .unwrap();

    assert!(response.context.contains(PENALTY));
    assert!(response.context.contains("(similarity: 0.91)"));
    assert_eq!(response.sources, vec![PENALTY.to_string()]);
    assert_eq!(response.rerank_fallback, Some(FallbackReason::MissingCredential));
    assert_eq!(response.passages[0].relevance, None);
    assert!(!response.degraded);
    assert!(generator.prompts()[0].contains(PENALTY));
}

#[tokio::test]
async fn test_second_turn_sees_first_exchange() {
    let dir = TempDir::new().unwrap();
    let generator = Arc::new(RecordingGenerator::default());
    let rag = orchestrator(TableEmbedder::new(&[]), Arc::clone(&generator), &config_in(dir.path())).await;

    let first = rag
        .ask(AskRequest::new("Who files the return?").with_conversation("c1"))
        .await
        .unwrap();
    rag.ask(AskRequest::new("And when is it due?").with_conversation("c1"))
        .await
        .unwrap();

    let prompts = generator.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(!prompts[0].contains("Recent conversation history"));
    assert!(prompts[1].contains("User: Who files the return?"));
    assert!(prompts[1].contains(&format!("Assistant: {}", first.answer)));
    assert!(!prompts[1].contains("User: And when is it due?"));

    assert_eq!(rag.memory().get_history("c1").len(), 4);
}

#[tokio::test]
async fn test_history_is_bounded() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(dir.path());
    config.memory.max_turns = 2;
    let rag = orchestrator(TableEmbedder::new(&[]), Arc::new(RecordingGenerator::default()), &config).await;

    for i in 0..5 {
        rag.ask(AskRequest::new(format!("question {}", i)).with_conversation("c1"))
            .await
            .unwrap();
    }

    let history = rag.memory().get_history("c1");
    assert_eq!(history.len(), 4);
    assert_eq!(history[0].content, "question 3");
}

#[tokio::test]
async fn test_conversations_are_isolated() {
    let dir = TempDir::new().unwrap();
    let generator = Arc::new(RecordingGenerator::default());
    let rag = orchestrator(TableEmbedder::new(&[]), Arc::clone(&generator), &config_in(dir.path())).await;

    rag.ask(AskRequest::new("secret question").with_conversation("a"))
        .await
        .unwrap();
    rag.ask(AskRequest::new("other question").with_conversation("b"))
        .await
        .unwrap();

    assert!(!generator.prompts()[1].contains("secret question"));
}

#[tokio::test]
async fn test_index_survives_restart() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let embedder = || TableEmbedder::new(&[(PENALTY, vec![1.0, 0.0]), ("penalty?", vec![1.0, 0.0])]);

    {
        let rag = orchestrator(embedder(), Arc::new(RecordingGenerator::default()), &config).await;
        rag.ingest_text("tax_code.txt", PENALTY).await.unwrap();
    }

    let rag = orchestrator(embedder(), Arc::new(RecordingGenerator::default()), &config).await;
    let stats = rag.stats().await;
    assert_eq!(stats.chunks, 1);
    assert_eq!(stats.sources, vec!["tax_code.txt".to_string()]);

    let response = rag.ask(AskRequest::new("penalty?")).await.unwrap();
    assert_eq!(response.sources, vec![PENALTY.to_string()]);
}

#[tokio::test]
async fn test_scope_restricts_and_falls_back() {
    let dir = TempDir::new().unwrap();
    let embedder = TableEmbedder::new(&[
        ("Tax returns are due in April.", vec![1.0, 0.0]),
        ("Employees accrue leave monthly.", vec![0.8, 0.6]),
        ("when?", vec![1.0, 0.0]),
    ]);
    let rag = orchestrator(embedder, Arc::new(RecordingGenerator::default()), &config_in(dir.path())).await;

    rag.ingest_text("tax.txt", "Tax returns are due in April.").await.unwrap();
    rag.ingest_text("labor.txt", "Employees accrue leave monthly.").await.unwrap();

    let scoped = rag
        .ask(AskRequest::new("when?").with_scope(["labor.txt"]))
        .await
        .unwrap();
    assert_eq!(scoped.sources, vec!["Employees accrue leave monthly.".to_string()]);
    assert!(!scoped.scope_fallback);

    let unknown = rag
        .ask(AskRequest::new("when?").with_scope(["missing.txt"]))
        .await
        .unwrap();
    assert!(unknown.scope_fallback);
    assert_eq!(unknown.sources[0], "Tax returns are due in April.");
}

#[tokio::test]
async fn test_strict_scope_policy() {
    let dir = TempDir::new().unwrap();
    let mut config = config_in(dir.path());
    config.retrieval.scope_policy = ScopePolicy::Fail;
    let rag = orchestrator(TableEmbedder::new(&[]), Arc::new(RecordingGenerator::default()), &config).await;

    rag.ingest_text("tax.txt", "Tax returns are due in April.").await.unwrap();
    let result = rag.ask(AskRequest::new("when?").with_scope(["missing.txt"])).await;
    assert!(matches!(result, Err(RagError::ScopeNotFound { requested: 1 })));
}

#[tokio::test]
async fn test_streamed_answer_joins_conversation() {
    let dir = TempDir::new().unwrap();
    let generator = Arc::new(RecordingGenerator::default());
    let rag = orchestrator(TableEmbedder::new(&[]), Arc::clone(&generator), &config_in(dir.path())).await;

    let mut answer = rag
        .ask_stream(AskRequest::new("Who files the return?").with_conversation("c1"))
        .await
        .unwrap();
    assert_eq!(answer.context, NO_CONTEXT);

    let mut text = String::new();
    while let Some(fragment) = answer.stream.next().await {
        text.push_str(&fragment.unwrap());
    }
    assert_eq!(text, "Answer number 1");

    rag.ask(AskRequest::new("And when?").with_conversation("c1"))
        .await
        .unwrap();
    assert!(generator.prompts()[1].contains("Assistant: Answer number 1"));
}

#[tokio::test]
async fn test_ingest_unsupported_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("table.xlsx");
    std::fs::write(&path, b"not a document").unwrap();

    let rag = orchestrator(TableEmbedder::new(&[]), Arc::new(RecordingGenerator::default()), &config_in(dir.path())).await;
    let result = rag.ingest_file(&path).await;
    assert!(matches!(result, Err(RagError::UnsupportedFileType(_))));
}

#[tokio::test]
async fn test_remove_source_persists() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let rag = orchestrator(TableEmbedder::new(&[]), Arc::new(RecordingGenerator::default()), &config).await;

    rag.ingest_text("tax.txt", "Tax returns are due in April.").await.unwrap();
    rag.ingest_text("labor.txt", "Employees accrue leave monthly.").await.unwrap();
    assert_eq!(rag.remove_source("tax.txt").await.unwrap(), 1);
    assert!(matches!(rag.remove_source("tax.txt").await, Err(RagError::NotFound(_))));

    let reopened = IndexStore::load(2, config.index_path()).await.unwrap();
    assert_eq!(reopened.sources().await, vec!["labor.txt".to_string()]);
}
