//! Incremental server-sent-events parser for streaming completions
//!
//! Bytes arrive in arbitrary chunks; complete `\n`-terminated lines are
//! turned into events. Splitting happens on bytes, so a multi-byte UTF-8
//! character cut across two chunks is reassembled before decoding.
//! - Buffer: 1MB maximum for a single unterminated line
//! - Recognised: `data: ...` payloads and the `data: [DONE]` terminator

use crate::errors::{RagError, Result};
use serde::Deserialize;

/// Maximum buffer size (1MB)
pub const MAX_BUFFER_SIZE: usize = 1_048_576;

const DONE_MARKER: &str = "[DONE]";

/// One parsed event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// Payload of a `data:` line
    Data(String),
    /// End of the completion
    Done,
}

/// Incremental SSE parser
#[derive(Debug)]
pub struct SseParser {
    /// Bytes of the current unterminated line
    buffer: Vec<u8>,

    /// Maximum buffer size
    max_buffer_size: usize,
}

impl SseParser {
    /// Create new parser with default settings
    pub fn new() -> Self {
        Self::with_capacity(MAX_BUFFER_SIZE)
    }

    /// Create parser with custom buffer capacity
    pub fn with_capacity(max_buffer_size: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
            max_buffer_size,
        }
    }

    /// Add bytes and return every event completed by them
    pub fn add_bytes(&mut self, bytes: &[u8]) -> Result<Vec<SseEvent>> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if let Some(event) = parse_line(&line[..line.len() - 1])? {
                events.push(event);
            }
        }

        if self.buffer.len() > self.max_buffer_size {
            return Err(RagError::Streaming(format!(
                "Buffer overflow: {} bytes exceeds maximum {}",
                self.buffer.len(),
                self.max_buffer_size
            )));
        }

        Ok(events)
    }

    /// Parse whatever remains once the byte stream ends
    pub fn finish(&mut self) -> Result<Option<SseEvent>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let line = std::mem::take(&mut self.buffer);
        parse_line(&line)
    }

    /// Get current buffer size
    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_line(raw: &[u8]) -> Result<Option<SseEvent>> {
    let line = std::str::from_utf8(raw)
        .map_err(|e| RagError::Streaming(format!("Invalid UTF-8 in event stream: {}", e)))?;
    let line = line.trim_end_matches('\r');

    let Some(data) = line.strip_prefix("data:") else {
        // blank separators, comments and other fields
        return Ok(None);
    };

    let data = data.strip_prefix(' ').unwrap_or(data);
    if data.trim() == DONE_MARKER {
        return Ok(Some(SseEvent::Done));
    }
    Ok(Some(SseEvent::Data(data.to_string())))
}

#[derive(Debug, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
}

/// Text carried by one chat-completion chunk, if any
pub fn parse_delta(data: &str) -> Result<Option<String>> {
    let payload: ChunkPayload = serde_json::from_str(data)
        .map_err(|e| RagError::Streaming(format!("Malformed completion chunk: {}", e)))?;
    Ok(payload
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|text| !text.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_event() {
        let mut parser = SseParser::new();
        let events = parser.add_bytes(b"data: {\"a\":1}\n\n").unwrap();
        assert_eq!(events, vec![SseEvent::Data("{\"a\":1}".to_string())]);
        assert!(parser.is_empty());
    }

    #[test]
    fn test_incremental_lines() {
        let mut parser = SseParser::new();
        assert!(parser.add_bytes(b"data: hel").unwrap().is_empty());
        let events = parser.add_bytes(b"lo\r\ndata: [DONE]\n").unwrap();
        assert_eq!(
            events,
            vec![SseEvent::Data("hello".to_string()), SseEvent::Done]
        );
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let mut parser = SseParser::new();
        let line = "data: 罚款\n".as_bytes();
        // split inside the first CJK character
        assert!(parser.add_bytes(&line[..7]).unwrap().is_empty());
        let events = parser.add_bytes(&line[7..]).unwrap();
        assert_eq!(events, vec![SseEvent::Data("罚款".to_string())]);
    }

    #[test]
    fn test_comments_and_other_fields_ignored() {
        let mut parser = SseParser::new();
        let events = parser
            .add_bytes(b": keep-alive\nevent: message\nid: 7\ndata:x\n")
            .unwrap();
        assert_eq!(events, vec![SseEvent::Data("x".to_string())]);
    }

    #[test]
    fn test_buffer_overflow() {
        let mut parser = SseParser::with_capacity(100);
        let result = parser.add_bytes(&vec![b'a'; 150]);
        assert!(matches!(result, Err(RagError::Streaming(_))));
    }

    #[test]
    fn test_finish_flushes_last_line() {
        let mut parser = SseParser::new();
        parser.add_bytes(b"data: [DONE]").unwrap();
        assert_eq!(parser.finish().unwrap(), Some(SseEvent::Done));
        assert_eq!(parser.finish().unwrap(), None);
    }

    #[test]
    fn test_parse_delta() {
        let data = r#"{"id":"1","choices":[{"index":0,"delta":{"content":"Hello"}}]}"#;
        assert_eq!(parse_delta(data).unwrap(), Some("Hello".to_string()));

        let role_only = r#"{"choices":[{"index":0,"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_delta(role_only).unwrap(), None);

        assert!(parse_delta("not json").is_err());
    }
}
