// End-to-end RAG orchestration
//
// Query: embed → search (candidate pool) → rerank (top-k) → compose → generate
// Ingestion: load → chunk → embed → insert → save
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::config::Config;
use crate::errors::{RagError, Result};
use crate::ingest::{is_supported, load_document, Chunker};
use crate::memory::conversation::{ConversationMemory, Role};
use crate::memory::embedding::{build_embedder, Embedder};
use crate::memory::vector_db::{IndexStore, PendingChunk, SearchHit};
use crate::rag::context::ContextBuilder;
use crate::rag::prompt::PromptBuilder;
use crate::rag::reranking::{FallbackReason, RemoteReranker, RerankOutcome, Reranker};
use crate::rag::retrieval::{RetrievalEngine, ScopePolicy};
use crate::rag::state::{QueryEvent, QueryState, QueryTrace};
use crate::streaming::{ChatCompletionClient, CompletionStream, Generator};

/// Retrieval sizing and scope handling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Candidates pulled from the index before re-ranking
    pub candidate_pool: usize,
    /// Passages kept after re-ranking
    pub top_k: usize,
    pub scope_policy: ScopePolicy,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_pool: 10,
            top_k: 3,
            scope_policy: ScopePolicy::default(),
        }
    }
}

/// One question
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AskRequest {
    pub query: String,
    /// Enables history injection and recording
    pub conversation_id: Option<String>,
    /// Restrict retrieval to these sources
    pub scope: Option<HashSet<String>>,
    /// Overrides the configured `top_k`
    pub top_k: Option<usize>,
    /// Overrides the default prompt template
    pub template: Option<String>,
}

impl AskRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_scope<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope = Some(sources.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }
}

/// A passage that made it into the prompt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub text: String,
    pub source_id: String,
    /// Cosine similarity to the query
    pub similarity: f32,
    /// Cross-encoder score; absent when re-ranking fell back
    pub relevance: Option<f32>,
}

/// Answer to an [`AskRequest`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer: String,
    /// Context block inserted into the prompt
    pub context: String,
    /// Texts of the passages used, best first
    pub sources: Vec<String>,
    pub passages: Vec<RetrievedPassage>,
    pub conversation_id: Option<String>,
    /// Visited query states
    pub trace: Vec<QueryState>,
    /// Retrieval produced nothing
    pub degraded: bool,
    /// The requested scope matched nothing and was ignored
    pub scope_fallback: bool,
    /// Set when re-ranking was skipped
    pub rerank_fallback: Option<FallbackReason>,
}

/// Everything decided before the language model is called
struct PreparedQuery {
    prompt: String,
    context: String,
    passages: Vec<RetrievedPassage>,
    trace: QueryTrace,
    scope_fallback: bool,
    rerank_fallback: Option<FallbackReason>,
}

impl PreparedQuery {
    fn sources(&self) -> Vec<String> {
        self.passages.iter().map(|p| p.text.clone()).collect()
    }
}

/// Streaming answer: metadata up front, fragments as they arrive
pub struct StreamingAnswer {
    pub context: String,
    pub sources: Vec<String>,
    pub passages: Vec<RetrievedPassage>,
    pub conversation_id: Option<String>,
    pub degraded: bool,
    pub scope_fallback: bool,
    pub rerank_fallback: Option<FallbackReason>,
    pub stream: AnswerStream,
}

/// Answer fragments; the full answer is recorded into conversation memory
/// once the stream is exhausted without error
pub struct AnswerStream {
    inner: CompletionStream,
    memory: Arc<ConversationMemory>,
    conversation_id: Option<String>,
    answer: String,
    trace: QueryTrace,
    failed: bool,
    finished: bool,
}

impl AnswerStream {
    /// States visited so far; ends in Complete or Failed once drained
    pub fn trace(&self) -> &[QueryState] {
        self.trace.visited()
    }

    /// Text received so far
    pub fn answer(&self) -> &str {
        &self.answer
    }

    /// Drain the stream and return the full answer
    pub async fn collect_answer(mut self) -> Result<String> {
        use futures_util::StreamExt;
        while let Some(fragment) = self.next().await {
            fragment?;
        }
        Ok(std::mem::take(&mut self.answer))
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let event = if self.failed {
            QueryEvent::GenerationFailed
        } else {
            QueryEvent::AnswerProduced
        };
        if let Err(e) = self.trace.advance(event) {
            tracing::debug!(error = %e, "Unexpected query state at end of stream");
        }

        if !self.failed {
            if let Some(id) = &self.conversation_id {
                self.memory.add_message(id, Role::Assistant, self.answer.clone());
            }
        }
    }
}

impl Stream for AnswerStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(fragment))) => {
                self.answer.push_str(&fragment);
                Poll::Ready(Some(Ok(fragment)))
            }
            Poll::Ready(Some(Err(e))) => {
                tracing::error!(error = %e, "Answer stream failed");
                self.failed = true;
                self.finish();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Chunks added for one file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestedFile {
    pub source_id: String,
    pub chunks: usize,
}

/// Outcome of an ingestion call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestReport {
    pub files: Vec<IngestedFile>,
    /// Files with an unsupported extension
    pub skipped: Vec<PathBuf>,
    /// Files that could not be loaded or embedded
    pub failed: Vec<(PathBuf, String)>,
}

impl IngestReport {
    pub fn chunks_added(&self) -> usize {
        self.files.iter().map(|f| f.chunks).sum()
    }
}

/// Progress notification during folder ingestion
#[derive(Debug, Clone, Copy)]
pub struct IngestProgress<'a> {
    pub path: &'a Path,
    /// 1-based position among supported files
    pub position: usize,
    pub total: usize,
}

/// Index and memory statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStats {
    pub chunks: usize,
    pub sources: Vec<String>,
    pub dimension: usize,
    pub conversations: usize,
    pub index_path: PathBuf,
}

/// RAG façade owning every pipeline component
pub struct RagOrchestrator {
    retrieval: RetrievalEngine,
    reranker: Arc<dyn Reranker>,
    generator: Arc<dyn Generator>,
    memory: Arc<ConversationMemory>,
    prompts: PromptBuilder,
    context_builder: ContextBuilder,
    chunker: Chunker,
    config: RetrievalConfig,
    auto_save: bool,
}

impl RagOrchestrator {
    /// Build every component from configuration
    ///
    /// Loads the index snapshot if one exists at the configured location.
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let embedder = build_embedder(&config.embedding).await?;
        let store = Arc::new(IndexStore::open(embedder.dimension(), config.index_path()).await?);
        let reranker = Arc::new(RemoteReranker::new(config.reranker.clone())?);
        let generator = Arc::new(ChatCompletionClient::new(config.generator.clone())?);

        Self::with_components(embedder, store, reranker, generator, config).await
    }

    /// Assemble from already-built components
    pub async fn with_components(
        embedder: Arc<dyn Embedder>,
        store: Arc<IndexStore>,
        reranker: Arc<dyn Reranker>,
        generator: Arc<dyn Generator>,
        config: &Config,
    ) -> Result<Self> {
        let index_dimension = store.dimension().await;
        if index_dimension != embedder.dimension() {
            return Err(RagError::Dimension {
                expected: index_dimension,
                actual: embedder.dimension(),
            });
        }

        Ok(Self {
            retrieval: RetrievalEngine::new(embedder, store, config.retrieval.scope_policy),
            reranker,
            generator,
            memory: Arc::new(ConversationMemory::new(&config.memory)),
            prompts: PromptBuilder::from_config(&config.prompt)?,
            context_builder: ContextBuilder::new(config.prompt.passage_display_chars),
            chunker: Chunker::new(config.chunking.clone())?,
            config: config.retrieval.clone(),
            auto_save: config.index.auto_save,
        })
    }

    /// Answer a question
    pub async fn ask(&self, request: AskRequest) -> Result<AskResponse> {
        let mut prepared = self.prepare(&request).await?;
        self.record_question(&request);

        match self.generator.generate(&prepared.prompt).await {
            Ok(answer) => {
                prepared.trace.advance(QueryEvent::AnswerProduced)?;
                if let Some(id) = &request.conversation_id {
                    self.memory.add_message(id, Role::Assistant, answer.clone());
                }

                Ok(AskResponse {
                    answer,
                    sources: prepared.sources(),
                    degraded: prepared.trace.was_degraded(),
                    trace: prepared.trace.visited().to_vec(),
                    context: prepared.context,
                    passages: prepared.passages,
                    conversation_id: request.conversation_id,
                    scope_fallback: prepared.scope_fallback,
                    rerank_fallback: prepared.rerank_fallback,
                })
            }
            Err(e) => {
                prepared.trace.advance(QueryEvent::GenerationFailed)?;
                tracing::error!(error = %e, "Generation failed");
                Err(e)
            }
        }
    }

    /// Answer a question, streaming the answer text
    pub async fn ask_stream(&self, request: AskRequest) -> Result<StreamingAnswer> {
        let mut prepared = self.prepare(&request).await?;
        self.record_question(&request);

        let inner = match self.generator.generate_stream(&prepared.prompt).await {
            Ok(stream) => stream,
            Err(e) => {
                prepared.trace.advance(QueryEvent::GenerationFailed)?;
                tracing::error!(error = %e, "Generation failed");
                return Err(e);
            }
        };

        let sources = prepared.sources();
        let degraded = prepared.trace.was_degraded();
        Ok(StreamingAnswer {
            context: prepared.context,
            sources,
            passages: prepared.passages,
            conversation_id: request.conversation_id.clone(),
            degraded,
            scope_fallback: prepared.scope_fallback,
            rerank_fallback: prepared.rerank_fallback,
            stream: AnswerStream {
                inner,
                memory: Arc::clone(&self.memory),
                conversation_id: request.conversation_id,
                answer: String::new(),
                trace: prepared.trace,
                failed: false,
                finished: false,
            },
        })
    }

    /// Retrieve, re-rank and compose; stops in the Generating state
    async fn prepare(&self, request: &AskRequest) -> Result<PreparedQuery> {
        let mut trace = QueryTrace::new();
        trace.advance(QueryEvent::Start)?;

        let top_k = request.top_k.unwrap_or(self.config.top_k);
        let pool = self.config.candidate_pool.max(top_k);

        let retrieval = self
            .retrieval
            .retrieve(&request.query, pool, request.scope.as_ref())
            .await?;

        let (hits, passages, rerank_fallback) = if retrieval.hits.is_empty() {
            trace.advance(QueryEvent::NothingRetrieved)?;
            tracing::warn!(degraded = true, "No passages retrieved");
            trace.advance(QueryEvent::ContinueWithoutPassages)?;
            (Vec::new(), Vec::new(), None)
        } else {
            trace.advance(QueryEvent::CandidatesFound)?;
            let outcome = self
                .reranker
                .rerank(&request.query, retrieval.hits, top_k)
                .await;
            trace.advance(QueryEvent::Reranked)?;
            split_outcome(outcome)
        };

        let history = match &request.conversation_id {
            Some(id) => self.memory.get_formatted_history(id),
            None => String::new(),
        };

        let hit_refs: Vec<&SearchHit> = hits.iter().collect();
        let context = self.context_builder.build(&hit_refs, &history);

        let template = request
            .template
            .as_deref()
            .unwrap_or_else(|| self.prompts.default_template());
        let prompt = self
            .prompts
            .compose(template, &request.query, &context.text, &history)?;
        trace.advance(QueryEvent::PromptReady)?;

        tracing::debug!(
            passages = passages.len(),
            with_history = context.includes_history,
            "Prompt composed"
        );

        Ok(PreparedQuery {
            prompt,
            context: context.text,
            passages,
            trace,
            scope_fallback: retrieval.scope_fallback,
            rerank_fallback,
        })
    }

    fn record_question(&self, request: &AskRequest) {
        if let Some(id) = &request.conversation_id {
            self.memory.add_message(id, Role::User, request.query.clone());
        }
    }

    /// Record an answer delivered outside [`ask`](Self::ask)
    pub fn record_response(&self, conversation_id: &str, answer: impl Into<String>) {
        self.memory.add_message(conversation_id, Role::Assistant, answer);
    }

    pub fn clear_conversation(&self, conversation_id: &str) {
        self.memory.clear(conversation_id);
    }

    pub fn memory(&self) -> &Arc<ConversationMemory> {
        &self.memory
    }

    pub fn store(&self) -> &Arc<IndexStore> {
        self.retrieval.store()
    }

    /// Chunk, embed and index raw text under `source_id`
    pub async fn ingest_text(&self, source_id: &str, text: &str) -> Result<usize> {
        let added = self.index_text(source_id, text).await?;
        if added > 0 && self.auto_save {
            self.store().save().await?;
        }
        Ok(added)
    }

    /// Load, chunk, embed and index one file
    pub async fn ingest_file(&self, path: &Path) -> Result<IngestReport> {
        let document = load_document(path).await?;
        let source_id = document.source_id();
        let chunks = self.index_text(&source_id, &document.text).await?;

        if chunks > 0 && self.auto_save {
            self.store().save().await?;
        }

        Ok(IngestReport {
            files: vec![IngestedFile { source_id, chunks }],
            ..Default::default()
        })
    }

    /// Ingest every supported file under `dir`
    pub async fn ingest_folder(&self, dir: &Path) -> Result<IngestReport> {
        self.ingest_folder_with(dir, |_| {}).await
    }

    /// Ingest a folder, reporting each supported file before it is processed
    ///
    /// Files that fail to load or embed are reported and skipped; the index
    /// is saved once at the end.
    pub async fn ingest_folder_with<F>(&self, dir: &Path, mut on_file: F) -> Result<IngestReport>
    where
        F: FnMut(IngestProgress<'_>),
    {
        if !dir.is_dir() {
            return Err(RagError::NotFound(format!("Directory {}", dir.display())));
        }

        let mut report = IngestReport::default();
        let (supported, skipped): (Vec<PathBuf>, Vec<PathBuf>) =
            collect_files(dir)?.into_iter().partition(|p| is_supported(p));
        report.skipped = skipped;

        let total = supported.len();
        for (i, path) in supported.iter().enumerate() {
            on_file(IngestProgress {
                path,
                position: i + 1,
                total,
            });

            let outcome = match load_document(path).await {
                Ok(document) => {
                    let source_id = document.source_id();
                    self.index_text(&source_id, &document.text)
                        .await
                        .map(|chunks| IngestedFile { source_id, chunks })
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(file) => report.files.push(file),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping file");
                    report.failed.push((path.clone(), e.to_string()));
                }
            }
        }

        if !report.skipped.is_empty() {
            tracing::info!(count = report.skipped.len(), "Skipped unsupported files");
        }
        if report.chunks_added() > 0 && self.auto_save {
            self.store().save().await?;
        }

        Ok(report)
    }

    async fn index_text(&self, source_id: &str, text: &str) -> Result<usize> {
        let chunks: Vec<String> = self.chunker.split(text).collect();
        if chunks.is_empty() {
            tracing::debug!(source = source_id, "Document has no text to index");
            return Ok(0);
        }

        let embeddings = self.retrieval.embedder().embed(&chunks).await?;
        let pending = chunks
            .into_iter()
            .map(|text| PendingChunk::new(source_id, text))
            .collect();
        let added = self.store().insert(pending, embeddings).await?;

        tracing::info!(source = source_id, chunks = added, "Indexed document");
        Ok(added)
    }

    /// Drop one source from the index and persist the rebuilt index
    pub async fn remove_source(&self, source_id: &str) -> Result<usize> {
        let removed = self.store().remove_source(source_id).await?;
        tracing::info!(source = source_id, chunks = removed, "Removed source from index");
        if self.auto_save {
            self.store().save().await?;
        }
        Ok(removed)
    }

    /// Persist the index now
    pub async fn save_index(&self) -> Result<()> {
        self.store().save().await
    }

    /// Replace the in-memory index with the saved snapshot
    pub async fn reload_index(&self) -> Result<()> {
        self.store().reload().await?;
        tracing::info!(chunks = self.store().len().await, "Reloaded index");
        Ok(())
    }

    pub async fn stats(&self) -> PipelineStats {
        let store = self.store();
        PipelineStats {
            chunks: store.len().await,
            sources: store.sources().await,
            dimension: store.dimension().await,
            conversations: self.memory.len(),
            index_path: store.location().to_path_buf(),
        }
    }
}

/// Split a rerank outcome into prompt passages and their reported form
fn split_outcome(outcome: RerankOutcome) -> (Vec<SearchHit>, Vec<RetrievedPassage>, Option<FallbackReason>) {
    match outcome {
        RerankOutcome::Scored(scored) => {
            let passages = scored
                .iter()
                .map(|p| RetrievedPassage {
                    text: p.hit.text.clone(),
                    source_id: p.hit.source_id.clone(),
                    similarity: p.hit.score,
                    relevance: Some(p.relevance),
                })
                .collect();
            let hits = scored.into_iter().map(|p| p.hit).collect();
            (hits, passages, None)
        }
        RerankOutcome::Fallback { passages: hits, reason } => {
            let passages = hits
                .iter()
                .map(|hit| RetrievedPassage {
                    text: hit.text.clone(),
                    source_id: hit.source_id.clone(),
                    similarity: hit.score,
                    relevance: None,
                })
                .collect();
            (hits, passages, Some(reason))
        }
    }
}

/// Files under `dir`, recursively, in path order
fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.is_file() {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}
