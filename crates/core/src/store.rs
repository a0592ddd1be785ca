//! ConversationStore trait: durable, append-only session history.
//!
//! Implementations: SQLite (durable), in-memory (tests and ephemeral use).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::StoreError;
use crate::message::{Message, SessionId};

/// Maximum number of characters kept in a session title.
pub const TITLE_CHARS: usize = 30;

/// A row in the session listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,

    /// Human-readable title derived from the most recent message.
    /// Not a uniqueness key.
    pub title: String,

    /// Timestamp of the most recent message
    pub updated_at: DateTime<Utc>,
}

/// Derive a listing title from message content: the first
/// [`TITLE_CHARS`] characters, with `...` appended when truncated.
pub fn derive_title(content: &str) -> String {
    let flat: String = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= TITLE_CHARS {
        return flat;
    }
    let prefix: String = flat.chars().take(TITLE_CHARS).collect();
    format!("{}...", prefix.trim_end())
}

/// The core ConversationStore trait.
///
/// Messages for a session are returned in the order they were appended.
/// The store is the only owner of mutable session state; agents never
/// touch it directly.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// Append one message to a session, creating the session if needed.
    async fn append(&self, session_id: &SessionId, message: &Message) -> std::result::Result<(), StoreError>;

    /// Append several messages in order, all or nothing.
    ///
    /// The default implementation appends one at a time; durable backends
    /// override it with a transaction.
    async fn append_all(&self, session_id: &SessionId, messages: &[Message]) -> std::result::Result<(), StoreError> {
        for message in messages {
            self.append(session_id, message).await?;
        }
        Ok(())
    }

    /// All messages of a session, oldest first. Unknown sessions are empty.
    async fn list(&self, session_id: &SessionId) -> std::result::Result<Vec<Message>, StoreError>;

    /// All sessions, most recently updated first.
    async fn list_sessions(&self) -> std::result::Result<Vec<SessionSummary>, StoreError>;

    /// Delete a session and all its messages. Returns whether anything was removed.
    async fn delete(&self, session_id: &SessionId) -> std::result::Result<bool, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_titles_are_kept() {
        assert_eq!(derive_title("What's on today?"), "What's on today?");
    }

    #[test]
    fn long_titles_are_truncated() {
        let title = derive_title("When was the Liverpool match against Arsenal played last season?");
        assert_eq!(title, "When was the Liverpool match a...");
    }

    #[test]
    fn titles_collapse_whitespace() {
        assert_eq!(derive_title("line one\n\nline   two"), "line one line two");
    }
}
