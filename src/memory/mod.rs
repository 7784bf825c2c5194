//! Conversation memory
//!
//! Per-session message history plus the entity extraction the planner uses
//! to resolve follow-up references ("its", "that company").

pub mod entities;
pub mod store;

pub use entities::EntityExtractor;
pub use store::{
    exchanges, ConversationHistory, Exchange, InMemorySessionStore, SessionStore, SharedHistory,
    HISTORY_LIMIT,
};
