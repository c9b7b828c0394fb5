//! Answer generation and streaming
//!
//! Provides the chat-completion client, an incremental SSE parser, markup
//! stripping and the bounded fragment stream handed to callers.

pub mod client;
pub mod markup;
pub mod parser;
pub mod stream;

// Re-export commonly used types
pub use client::{ChatCompletionClient, Generator, GeneratorConfig, DEFAULT_BASE_URL, DEFAULT_MODEL};
pub use markup::{strip_markup, MarkupStripper};
pub use parser::{SseEvent, SseParser, MAX_BUFFER_SIZE};
pub use stream::CompletionStream;
