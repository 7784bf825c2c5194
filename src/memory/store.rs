//! Conversation history storage
//!
//! Per-session ordered message logs. Each session is guarded by its own
//! async mutex; the orchestrator holds that lock for the whole request so two
//! requests on one session never interleave their messages.

use crate::models::{Message, MessageRole};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Number of messages retained per session.
pub const HISTORY_LIMIT: usize = 20;

/// Conversation history for one session
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    messages: VecDeque<Message>,
    limit: usize,
}

impl ConversationHistory {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self::with_limit(session_id, HISTORY_LIMIT)
    }

    pub fn with_limit(session_id: impl Into<String>, limit: usize) -> Self {
        Self {
            session_id: session_id.into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            messages: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    /// Append a message, dropping the oldest ones beyond the limit.
    pub fn push(&mut self, message: Message) {
        self.messages.push_back(message);
        self.trim_to_recent(self.limit);
        self.updated_at = Utc::now();
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(Message::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(Message::assistant(content));
    }

    // =============================
    // Views
    // =============================

    /// Snapshot of the retained messages, oldest first.
    pub fn messages(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }

    /// Everything before the newest message.
    pub fn prior_to_latest(&self) -> Vec<Message> {
        let keep = self.messages.len().saturating_sub(1);
        self.messages.iter().take(keep).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn trim_to_recent(&mut self, keep_count: usize) {
        while self.messages.len() > keep_count {
            self.messages.pop_front();
        }
    }
}

/// A completed question/answer pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub question: String,
    pub answer: String,
}

/// Adjacent (user, assistant) pairs in order. Unanswered user messages are
/// skipped.
pub fn exchanges(messages: &[Message]) -> Vec<Exchange> {
    messages
        .windows(2)
        .filter(|pair| pair[0].role == MessageRole::User && pair[1].role == MessageRole::Assistant)
        .map(|pair| Exchange {
            question: pair[0].content.clone(),
            answer: pair[1].content.clone(),
        })
        .collect()
}

pub type SharedHistory = Arc<Mutex<ConversationHistory>>;

/// Owner of every live session.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Get the session's history handle, creating an empty one on first use.
    async fn session(&self, session_id: &str) -> Result<SharedHistory>;

    async fn session_count(&self) -> usize;
}

/// Process-lifetime store; sessions are never evicted.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, SharedHistory>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn session(&self, session_id: &str) -> Result<SharedHistory> {
        {
            let sessions = self.sessions.read().await;
            if let Some(history) = sessions.get(session_id) {
                return Ok(Arc::clone(history));
            }
        }

        let mut sessions = self.sessions.write().await;
        let history = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ConversationHistory::new(session_id))));

        Ok(Arc::clone(history))
    }

    async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let mut history = ConversationHistory::new("s1");

        for i in 0..15 {
            history.push_user(format!("Question {}", i));
            history.push_assistant(format!("Answer {}", i));
        }

        assert_eq!(history.len(), HISTORY_LIMIT);
        let messages = history.messages();
        assert_eq!(messages.first().unwrap().content, "Question 5");
        assert_eq!(messages.last().unwrap().content, "Answer 14");
    }

    #[test]
    fn test_prior_to_latest() {
        let mut history = ConversationHistory::new("s1");
        assert!(history.prior_to_latest().is_empty());

        history.push_user("What is TSLA at?");
        history.push_assistant("TSLA closed at $250.");
        history.push_user("And its P/E?");

        let prior = history.prior_to_latest();
        assert_eq!(prior.len(), 2);
        assert_eq!(prior[1].content, "TSLA closed at $250.");
    }

    #[test]
    fn test_exchanges_skip_unanswered() {
        let messages = vec![
            Message::user("first"),
            Message::user("second"),
            Message::assistant("answer to second"),
            Message::user("third"),
        ];

        let found = exchanges(&messages);
        assert_eq!(
            found,
            vec![Exchange {
                question: "second".to_string(),
                answer: "answer to second".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_store_returns_same_session() {
        let store = InMemorySessionStore::new();

        let a = store.session("abc").await.unwrap();
        a.lock().await.push_user("hello");

        let b = store.session("abc").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.lock().await.len(), 1);

        store.session("other").await.unwrap();
        assert_eq!(store.session_count().await, 2);
    }
}
