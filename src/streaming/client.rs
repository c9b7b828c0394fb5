//! Chat-completion client
//!
//! Talks to any OpenAI-compatible `/chat/completions` endpoint:
//! - One-shot answers via `generate`
//! - Token streaming via `generate_stream` (SSE over HTTP/1.1)
//! - Markdown markup stripped from answers unless disabled

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use super::markup::{strip_markup, MarkupStripper};
use super::parser::{parse_delta, SseEvent, SseParser};
use super::stream::{CompletionStream, DEFAULT_STREAM_BUFFER};
use crate::errors::{RagError, Result};

/// Default chat-completion endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com/v1";

/// Default model
pub const DEFAULT_MODEL: &str = "deepseek-chat";

/// Produces answers for composed prompts
#[async_trait]
pub trait Generator: Send + Sync {
    /// Full answer text
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Answer fragments as they arrive
    async fn generate_stream(&self, prompt: &str) -> Result<CompletionStream>;
}

/// Generator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Bound on a one-shot answer, and on waiting for a stream to start
    pub timeout_secs: u64,
    /// Longest silence tolerated between two chunks of a streamed answer
    pub stream_idle_secs: u64,
    pub temperature: Option<f32>,
    /// Fragments buffered between the network task and the consumer
    pub stream_buffer: usize,
    pub strip_markup: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            timeout_secs: 120,
            stream_idle_secs: 30,
            temperature: None,
            stream_buffer: DEFAULT_STREAM_BUFFER,
            strip_markup: true,
        }
    }
}

/// OpenAI-compatible chat-completion client
#[derive(Debug, Clone)]
pub struct ChatCompletionClient {
    client: Client,
    url: String,
    config: GeneratorConfig,
}

impl ChatCompletionClient {
    /// Create client from configuration
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        if config.stream_buffer == 0 {
            return Err(RagError::Configuration(
                "generator stream_buffer must be greater than zero".to_string(),
            ));
        }
        if config.timeout_secs == 0 || config.stream_idle_secs == 0 {
            return Err(RagError::Configuration(
                "generator timeouts must be greater than zero".to_string(),
            ));
        }

        // Totals are applied per call: a client-wide timeout would also cut
        // long streamed answers short.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(RagError::HttpError)?;

        Ok(Self {
            client,
            url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            config,
        })
    }

    /// Get current model name
    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    /// Send the request; the timeout covers only the response head
    async fn send(&self, prompt: &str, stream: bool) -> Result<reqwest::Response> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            stream,
            temperature: self.config.temperature,
        };

        let mut builder = self.client.post(&self.url).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = tokio::time::timeout(self.timeout(), builder.send())
            .await
            .map_err(|_| {
                RagError::Generation(format!("No response within {}s", self.config.timeout_secs))
            })?
            .map_err(|e| RagError::Generation(format!("Failed to send request: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(RagError::Generation(format!("HTTP {}: {}", status, error_text)));
        }

        Ok(response)
    }
}

#[async_trait]
impl Generator for ChatCompletionClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let exchange = async {
            let response = self.send(prompt, false).await?;
            response
                .json::<ChatResponse>()
                .await
                .map_err(|e| RagError::Generation(format!("Failed to parse response: {}", e)))
        };
        let body = tokio::time::timeout(self.timeout(), exchange)
            .await
            .map_err(|_| {
                RagError::Generation(format!("No answer within {}s", self.config.timeout_secs))
            })??;

        let answer = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| RagError::Generation("No choices returned".to_string()))?;

        Ok(if self.config.strip_markup {
            strip_markup(&answer)
        } else {
            answer
        })
    }

    async fn generate_stream(&self, prompt: &str) -> Result<CompletionStream> {
        let response = self.send(prompt, true).await?;
        let source = fragments(
            Box::pin(response.bytes_stream()),
            self.config.strip_markup,
            Duration::from_secs(self.config.stream_idle_secs),
        );
        Ok(CompletionStream::spawn(source, self.config.stream_buffer))
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Decoding state for one streamed completion
struct FragmentState {
    bytes: ByteStream,
    parser: SseParser,
    pending: VecDeque<Result<String>>,
    finished: bool,
    stripper: Option<MarkupStripper>,
    idle: Duration,
}

impl FragmentState {
    /// Queue the text of parsed events; an error or `[DONE]` ends the stream
    fn absorb(&mut self, events: Result<Vec<SseEvent>>) {
        let events = match events {
            Ok(events) => events,
            Err(e) => {
                self.fail(e);
                return;
            }
        };

        for event in events {
            let data = match event {
                SseEvent::Done => {
                    self.finished = true;
                    return;
                }
                SseEvent::Data(data) => data,
            };

            match parse_delta(&data) {
                Ok(Some(text)) => {
                    let text = match self.stripper.as_mut() {
                        Some(stripper) => stripper.push(&text),
                        None => text,
                    };
                    if !text.is_empty() {
                        self.pending.push_back(Ok(text));
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    self.fail(e);
                    return;
                }
            }
        }
    }

    fn fail(&mut self, error: RagError) {
        self.pending.push_back(Err(error));
        self.finished = true;
    }
}

/// Turn an SSE byte stream into answer fragments
fn fragments(bytes: ByteStream, strip: bool, idle: Duration) -> impl Stream<Item = Result<String>> + Send {
    let state = FragmentState {
        bytes,
        parser: SseParser::new(),
        pending: VecDeque::new(),
        finished: false,
        stripper: strip.then(MarkupStripper::new),
        idle,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            let next = tokio::time::timeout(state.idle, state.bytes.next()).await;
            let events = match next {
                Ok(Some(Ok(chunk))) => state.parser.add_bytes(&chunk),
                Ok(Some(Err(e))) => Err(RagError::Streaming(e.to_string())),
                Ok(None) => {
                    state.finished = true;
                    state.parser.finish().map(|last| last.into_iter().collect())
                }
                Err(_) => Err(RagError::Streaming(format!(
                    "no data for {}s",
                    state.idle.as_secs()
                ))),
            };
            state.absorb(events);
        }
    })
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}
