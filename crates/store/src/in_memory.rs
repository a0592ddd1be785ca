//! In-memory store: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use marshal_core::error::StoreError;
use marshal_core::message::{Message, SessionId};
use marshal_core::store::{derive_title, ConversationStore, SessionSummary};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A stored message tagged with its session and a global sequence number.
#[derive(Clone)]
struct Record {
    seq: u64,
    session_id: SessionId,
    message: Message,
}

/// An in-memory store that keeps every record in a Vec, in append order.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    records: Arc<RwLock<Vec<Record>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn append(&self, session_id: &SessionId, message: &Message) -> Result<(), StoreError> {
        self.append_all(session_id, std::slice::from_ref(message)).await
    }

    async fn append_all(&self, session_id: &SessionId, messages: &[Message]) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let mut seq = records.last().map_or(0, |r| r.seq);
        for message in messages {
            seq += 1;
            records.push(Record {
                seq,
                session_id: session_id.clone(),
                message: message.clone(),
            });
        }
        Ok(())
    }

    async fn list(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| &r.session_id == session_id)
            .map(|r| r.message.clone())
            .collect())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, StoreError> {
        let records = self.records.read().await;
        let mut latest: Vec<&Record> = Vec::new();
        // Walk newest first; the first record seen per session is its latest.
        for record in records.iter().rev() {
            if !latest.iter().any(|r| r.session_id == record.session_id) {
                latest.push(record);
            }
        }
        Ok(latest
            .into_iter()
            .map(|r| SessionSummary {
                id: r.session_id.clone(),
                title: derive_title(&r.message.content),
                updated_at: r.message.timestamp,
            })
            .collect())
    }

    async fn delete(&self, session_id: &SessionId) -> Result<bool, StoreError> {
        let mut records = self.records.write().await;
        let len_before = records.len();
        records.retain(|r| &r.session_id != session_id);
        Ok(records.len() < len_before)
    }
}
