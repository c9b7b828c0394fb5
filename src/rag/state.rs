//! Per-query state machine
//!
//! Every query walks a fixed path and records the states it visits:
//! - Received → Retrieving → Reranking → Composing → Generating → Complete
//! - Retrieving → Degraded → Composing when retrieval yields nothing
//! - Generating → Failed when the language model call fails
//!
//! Complete and Failed are terminal; any other move is an error.

use crate::errors::{RagError, Result};
use serde::{Deserialize, Serialize};

/// Query processing states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryState {
    /// Query accepted
    Received,

    /// Embedding the query and searching the index
    Retrieving,

    /// Re-ordering candidates by relevance
    Reranking,

    /// Retrieval produced nothing usable; continuing without passages
    Degraded,

    /// Assembling context and prompt
    Composing,

    /// Waiting on the language model
    Generating,

    /// Answer produced (terminal)
    Complete,

    /// Language model call failed (terminal)
    Failed,
}

/// Events that trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryEvent {
    Start,
    CandidatesFound,
    NothingRetrieved,
    Reranked,
    ContinueWithoutPassages,
    PromptReady,
    AnswerProduced,
    GenerationFailed,
}

impl QueryState {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueryState::Complete | QueryState::Failed)
    }

    /// Attempt state transition with validation
    pub fn transition(&self, event: QueryEvent) -> Result<QueryState> {
        use QueryEvent::*;
        use QueryState::*;

        let next_state = match (self, event) {
            (Received, Start) => Retrieving,

            (Retrieving, CandidatesFound) => Reranking,
            (Retrieving, NothingRetrieved) => Degraded,

            (Reranking, Reranked) => Composing,
            (Degraded, ContinueWithoutPassages) => Composing,

            (Composing, PromptReady) => Generating,

            (Generating, AnswerProduced) => Complete,
            (Generating, GenerationFailed) => Failed,

            (from, event) => {
                return Err(RagError::InvalidTransition {
                    from: format!("{:?}", from),
                    event: format!("{:?}", event),
                });
            }
        };

        Ok(next_state)
    }

    /// Get all valid events from this state
    pub fn valid_events(&self) -> Vec<QueryEvent> {
        use QueryEvent::*;
        use QueryState::*;

        match self {
            Received => vec![Start],
            Retrieving => vec![CandidatesFound, NothingRetrieved],
            Reranking => vec![Reranked],
            Degraded => vec![ContinueWithoutPassages],
            Composing => vec![PromptReady],
            Generating => vec![AnswerProduced, GenerationFailed],
            Complete | Failed => vec![],
        }
    }
}

/// States visited by one query, in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryTrace {
    visited: Vec<QueryState>,
}

impl QueryTrace {
    pub fn new() -> Self {
        Self {
            visited: vec![QueryState::Received],
        }
    }

    pub fn current(&self) -> QueryState {
        self.visited
            .last()
            .copied()
            .unwrap_or(QueryState::Received)
    }

    /// Apply an event and record the resulting state
    pub fn advance(&mut self, event: QueryEvent) -> Result<QueryState> {
        let next = self.current().transition(event)?;
        self.visited.push(next);
        Ok(next)
    }

    pub fn visited(&self) -> &[QueryState] {
        &self.visited
    }

    pub fn was_degraded(&self) -> bool {
        self.visited.contains(&QueryState::Degraded)
    }
}

impl Default for QueryTrace {
    fn default() -> Self {
        Self::new()
    }
}
