//! Conversation log: per-user local-first message store.

pub mod model;
pub mod store;

pub use model::{ConversationMessage, MessageRole};
pub use store::ConversationStore;
