//! Overlapping fixed-size text chunker
//!
//! Greedy sliding window over normalized text. Each window is cut at the
//! latest natural boundary (paragraph, then sentence, then whitespace) in its
//! back half, or hard-cut at `chunk_size`. The next window starts exactly
//! `overlap` characters before the previous cut, so dropping the first
//! `overlap` characters of every chunk after the first reconstructs the text.
//!
//! Lengths are counted in `char`s: the corpus is largely CJK.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::errors::{RagError, Result};

/// Chunking parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Maximum characters per chunk
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 200,
            overlap: 20,
        }
    }
}

/// Sentence terminators recognised as boundaries
const SENTENCE_TERMINATORS: &[char] = &['.', '!', '?', ';', '。', '！', '？', '；'];

/// Splits documents into overlapping passages
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// Create a chunker, rejecting `overlap >= chunk_size` and zero values
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        if config.chunk_size == 0 || config.overlap == 0 || config.overlap >= config.chunk_size {
            return Err(RagError::Configuration(format!(
                "invalid chunking parameters: chunk_size={} overlap={}",
                config.chunk_size, config.overlap
            )));
        }
        Ok(Self { config })
    }

    /// Lazily split a document into chunk texts
    pub fn split(&self, document: &str) -> Chunks {
        let chars: Arc<[char]> = normalize(document).chars().collect();
        Chunks {
            chars,
            start: 0,
            finished: false,
            chunk_size: self.config.chunk_size,
            overlap: self.config.overlap,
        }
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }
}

/// Normalize line endings and strip outer whitespace
pub fn normalize(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n").trim().to_string()
}

/// Lazy, finite chunk sequence; clone it to restart from the beginning
#[derive(Debug, Clone)]
pub struct Chunks {
    chars: Arc<[char]>,
    start: usize,
    finished: bool,
    chunk_size: usize,
    overlap: usize,
}

impl Chunks {
    /// Pick the cut position for the window starting at `self.start`
    fn cut_point(&self, hard_end: usize) -> usize {
        let chars = &self.chars;
        // Cuts must leave room for progress past the overlap and avoid slivers
        let floor = (self.start + self.overlap + 1).max(self.start + self.chunk_size / 2);

        let candidates = || (floor..=hard_end).rev();

        let paragraph = candidates().find(|&i| i >= 2 && chars[i - 1] == '\n' && chars[i - 2] == '\n');
        if let Some(end) = paragraph {
            return end;
        }

        let sentence = candidates().find(|&i| {
            let prev = chars[i - 1];
            if !SENTENCE_TERMINATORS.contains(&prev) {
                return false;
            }
            // ASCII punctuation only ends a sentence when followed by whitespace
            !prev.is_ascii() || i == chars.len() || chars[i].is_whitespace()
        });
        if let Some(end) = sentence {
            return end;
        }

        candidates()
            .find(|&i| chars[i - 1].is_whitespace())
            .unwrap_or(hard_end)
    }
}

impl Iterator for Chunks {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.finished || self.chars.is_empty() {
            return None;
        }

        let len = self.chars.len();
        let hard_end = (self.start + self.chunk_size).min(len);

        if hard_end == len {
            self.finished = true;
            return Some(self.chars[self.start..len].iter().collect());
        }

        let end = self.cut_point(hard_end);
        let chunk = self.chars[self.start..end].iter().collect();
        self.start = end - self.overlap;
        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::TestResult;
    use quickcheck_macros::quickcheck;

    fn chunker(chunk_size: usize, overlap: usize) -> Chunker {
        Chunker::new(ChunkerConfig { chunk_size, overlap }).unwrap()
    }

    fn reassemble(chunks: &[String], overlap: usize) -> String {
        let mut text = String::new();
        for (i, chunk) in chunks.iter().enumerate() {
            if i == 0 {
                text.push_str(chunk);
            } else {
                text.extend(chunk.chars().skip(overlap));
            }
        }
        text
    }

    #[test]
    fn test_rejects_invalid_parameters() {
        assert!(Chunker::new(ChunkerConfig { chunk_size: 10, overlap: 10 }).is_err());
        assert!(Chunker::new(ChunkerConfig { chunk_size: 10, overlap: 0 }).is_err());
        assert!(Chunker::new(ChunkerConfig { chunk_size: 0, overlap: 0 }).is_err());
    }

    #[test]
    fn test_empty_and_whitespace_yield_nothing() {
        let c = chunker(50, 5);
        assert_eq!(c.split("").count(), 0);
        assert_eq!(c.split("   \n\t  \r\n").count(), 0);
    }

    #[test]
    fn test_short_document_is_single_chunk() {
        let c = chunker(200, 20);
        let chunks: Vec<String> = c.split("Late filing incurs a 5% penalty per month.").collect();
        assert_eq!(chunks, vec!["Late filing incurs a 5% penalty per month."]);
    }

    #[test]
    fn test_prefers_sentence_boundary() {
        let c = chunker(40, 5);
        let text = "The first sentence is here. The second sentence follows it closely.";
        let first = c.split(text).next().unwrap();
        assert_eq!(first, "The first sentence is here.");
    }

    #[test]
    fn test_prefers_paragraph_boundary() {
        let c = chunker(40, 4);
        let text = "Article one. Short.\n\nArticle two has a much longer body of text here.";
        let first = c.split(text).next().unwrap();
        assert_eq!(first, "Article one. Short.\n\n");
    }

    #[test]
    fn test_cjk_sentence_boundary_counts_chars() {
        let c = chunker(12, 2);
        let text = "逾期申报将被处罚。每月加收百分之五的滞纳金。";
        let chunks: Vec<String> = c.split(text).collect();
        assert_eq!(chunks[0], "逾期申报将被处罚。");
        assert!(chunks.iter().all(|ch| ch.chars().count() <= 12));
        assert_eq!(reassemble(&chunks, 2), text);
    }

    #[test]
    fn test_hard_cut_without_boundaries() {
        let c = chunker(10, 3);
        let text = "abcdefghijklmnopqrstuvwxyz";
        let chunks: Vec<String> = c.split(text).collect();
        assert_eq!(chunks[0], "abcdefghij");
        assert_eq!(chunks[1], "hijklmnopq");
        assert_eq!(reassemble(&chunks, 3), text);
    }

    #[test]
    fn test_sequence_is_restartable() {
        let c = chunker(10, 3);
        let chunks = c.split("abcdefghijklmnopqrstuvwxyz");
        let replay = chunks.clone();
        assert_eq!(chunks.collect::<Vec<_>>(), replay.collect::<Vec<_>>());
    }

    #[test]
    fn test_normalizes_line_endings() {
        let c = chunker(100, 10);
        let chunks: Vec<String> = c.split("  line one\r\nline two  ").collect();
        assert_eq!(chunks, vec!["line one\nline two"]);
    }

    #[quickcheck]
    fn prop_reconstructs_with_exact_overlap(text: String, size: u8, overlap: u8) -> TestResult {
        let chunk_size = (size as usize % 60) + 2;
        let overlap = (overlap as usize % (chunk_size - 1)) + 1;
        let c = chunker(chunk_size, overlap);

        let normalized = normalize(&text);
        let chunks: Vec<String> = c.split(&text).collect();

        if normalized.is_empty() {
            return TestResult::from_bool(chunks.is_empty());
        }

        let bounded = chunks.iter().all(|ch| ch.chars().count() <= chunk_size);
        let shared = chunks.windows(2).all(|pair| {
            let prev: Vec<char> = pair[0].chars().collect();
            let next: Vec<char> = pair[1].chars().collect();
            prev[prev.len() - overlap..] == next[..overlap]
        });

        TestResult::from_bool(bounded && shared && reassemble(&chunks, overlap) == normalized)
    }
}
