//! Conversation memory: bounded per-conversation message history
//!
//! Each conversation keeps at most `2 × max_turns` messages; the oldest are
//! dropped right after every insert. Appends to one conversation are
//! serialized by its own lock, different conversations never contend.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::errors::{RagError, Result};

/// Returned by [`ConversationMemory::get_formatted_history`] for an empty history
pub const NO_HISTORY: &str = "No conversation history";

/// Memory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Question/answer pairs kept per conversation
    pub max_turns: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { max_turns: 5 }
    }
}

/// Who wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "User"),
            Role::Assistant => write!(f, "Assistant"),
        }
    }
}

/// One recorded message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Snapshot of one conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub history: VecDeque<Message>,
    pub created_at: DateTime<Utc>,
}

impl ConversationState {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            created_at: Utc::now(),
        }
    }

    fn last_activity(&self) -> DateTime<Utc> {
        self.history
            .back()
            .map(|m| m.timestamp)
            .unwrap_or(self.created_at)
    }
}

type Slot = Arc<Mutex<ConversationState>>;

/// In-process store of conversation histories
#[derive(Debug)]
pub struct ConversationMemory {
    conversations: RwLock<HashMap<String, Slot>>,
    max_messages: usize,
}

impl ConversationMemory {
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            max_messages: config.max_turns.saturating_mul(2),
        }
    }

    /// Messages retained per conversation
    pub fn capacity(&self) -> usize {
        self.max_messages
    }

    /// Append a message stamped with the current time
    pub fn add_message(&self, conversation_id: &str, role: Role, content: impl Into<String>) {
        let slot = self.slot_or_insert(conversation_id);
        let mut state = lock(&slot);

        state.history.push_back(Message {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        });

        while state.history.len() > self.max_messages {
            state.history.pop_front();
        }
    }

    /// Messages oldest first; empty for an unknown conversation
    pub fn get_history(&self, conversation_id: &str) -> Vec<Message> {
        self.slot(conversation_id)
            .map(|slot| lock(&slot).history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Numbered, role-labelled history for prompt injection
    pub fn get_formatted_history(&self, conversation_id: &str) -> String {
        format_history(&self.get_history(conversation_id))
    }

    /// Snapshot of a conversation
    pub fn conversation(&self, conversation_id: &str) -> Result<ConversationState> {
        self.slot(conversation_id)
            .map(|slot| lock(&slot).clone())
            .ok_or_else(|| RagError::NotFound(format!("conversation {}", conversation_id)))
    }

    /// Forget a conversation; a no-op if it does not exist
    pub fn clear(&self, conversation_id: &str) {
        write_map(&self.conversations).remove(conversation_id);
    }

    pub fn conversation_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = read_map(&self.conversations).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of live conversations
    pub fn len(&self) -> usize {
        read_map(&self.conversations).len()
    }

    pub fn is_empty(&self) -> bool {
        read_map(&self.conversations).is_empty()
    }

    /// Drop conversations idle for longer than `max_idle`
    ///
    /// Returns how many were removed.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let cutoff = Utc::now() - max_idle;
        let mut map = write_map(&self.conversations);
        let before = map.len();
        map.retain(|_, slot| lock(slot).last_activity() >= cutoff);
        let evicted = before - map.len();
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted idle conversations");
        }
        evicted
    }

    fn slot(&self, conversation_id: &str) -> Option<Slot> {
        read_map(&self.conversations).get(conversation_id).cloned()
    }

    fn slot_or_insert(&self, conversation_id: &str) -> Slot {
        if let Some(slot) = self.slot(conversation_id) {
            return slot;
        }
        write_map(&self.conversations)
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ConversationState::new())))
            .clone()
    }
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new(&MemoryConfig::default())
    }
}

/// Render messages as "Recent conversation history:" plus numbered lines
pub fn format_history(messages: &[Message]) -> String {
    if messages.is_empty() {
        return NO_HISTORY.to_string();
    }

    let mut out = String::from("Recent conversation history:\n");
    for (i, message) in messages.iter().enumerate() {
        out.push_str(&format!("{}. {}: {}\n", i + 1, message.role, message.content));
    }
    out
}

// A panic while holding one of these locks cannot leave a half-applied
// update, so a poisoned lock is still safe to use.
fn lock(slot: &Slot) -> MutexGuard<'_, ConversationState> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

fn read_map(map: &RwLock<HashMap<String, Slot>>) -> std::sync::RwLockReadGuard<'_, HashMap<String, Slot>> {
    map.read().unwrap_or_else(|e| e.into_inner())
}

fn write_map(map: &RwLock<HashMap<String, Slot>>) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Slot>> {
    map.write().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(max_turns: usize) -> ConversationMemory {
        ConversationMemory::new(&MemoryConfig { max_turns })
    }

    #[test]
    fn test_history_is_bounded_fifo() {
        let mem = memory(5);
        for i in 0..11 {
            mem.add_message("c1", Role::User, format!("m{}", i));
        }

        let history = mem.get_history("c1");
        assert_eq!(history.len(), 10);
        assert_eq!(history[0].content, "m1");
        assert_eq!(history[9].content, "m10");
    }

    #[test]
    fn test_formatted_history() {
        let mem = memory(5);
        mem.add_message("c1", Role::User, "What is the late filing penalty?");
        mem.add_message("c1", Role::Assistant, "Up to 10,000 yuan.");

        let formatted = mem.get_formatted_history("c1");
        assert_eq!(
            formatted,
            "Recent conversation history:\n\
             1. User: What is the late filing penalty?\n\
             2. Assistant: Up to 10,000 yuan.\n"
        );
    }

    #[test]
    fn test_unknown_conversation() {
        let mem = memory(5);
        assert!(mem.get_history("nope").is_empty());
        assert_eq!(mem.get_formatted_history("nope"), NO_HISTORY);
        assert!(matches!(mem.conversation("nope"), Err(RagError::NotFound(_))));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mem = memory(5);
        mem.add_message("c1", Role::User, "hello");
        mem.clear("c1");
        mem.clear("c1");
        assert!(mem.get_history("c1").is_empty());
        assert!(mem.is_empty());
    }

    #[test]
    fn test_conversations_are_independent() {
        let mem = memory(1);
        mem.add_message("a", Role::User, "a1");
        mem.add_message("b", Role::User, "b1");
        mem.add_message("a", Role::Assistant, "a2");
        mem.add_message("a", Role::User, "a3");

        assert_eq!(mem.get_history("b").len(), 1);
        let a: Vec<String> = mem.get_history("a").into_iter().map(|m| m.content).collect();
        assert_eq!(a, vec!["a2", "a3"]);
        assert_eq!(mem.conversation_ids(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_concurrent_appends_keep_bound() {
        let mem = Arc::new(memory(3));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let mem = Arc::clone(&mem);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        mem.add_message("shared", Role::User, format!("{}-{}", t, i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(mem.get_history("shared").len(), 6);
    }

    #[test]
    fn test_evict_idle() {
        let mem = memory(5);
        mem.add_message("old", Role::User, "hi");
        assert_eq!(mem.evict_idle(Duration::hours(1)), 0);
        assert_eq!(mem.evict_idle(Duration::milliseconds(-1)), 1);
        assert!(mem.is_empty());
    }
}
