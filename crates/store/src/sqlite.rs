//! SQLite conversation store.
//!
//! A single table, `chat_history`, holds one row per message. The
//! autoincrement `seq` column gives a total append order, so a session
//! replays exactly as it was written even when timestamps collide.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marshal_core::error::StoreError;
use marshal_core::message::{Message, MessageToolCall, Role, SessionId};
use marshal_core::store::{derive_title, ConversationStore, SessionSummary};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// A durable conversation store backed by SQLite.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let in_memory = path.contains(":memory:");
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(if in_memory { SqliteJournalMode::Memory } else { SqliteJournalMode::Wal })
            .synchronous(SqliteSynchronous::Normal);

        // An in-memory database lives only as long as its connection.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite conversation store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_history (
                seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id  TEXT NOT NULL,
                message_id  TEXT NOT NULL,
                role        TEXT NOT NULL,
                content     TEXT NOT NULL,
                tool_calls  TEXT NOT NULL DEFAULT '[]',
                tool_call_id TEXT,
                timestamp   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("chat_history table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chat_history_session ON chat_history(session_id, seq)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("session index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StoreError::QueryFailed(format!("timestamp {raw:?}: {e}")))
    }

    /// Parse a `Message` from a `chat_history` row.
    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, StoreError> {
        let id: String = row
            .try_get("message_id")
            .map_err(|e| StoreError::QueryFailed(format!("message_id column: {e}")))?;
        let role: String = row
            .try_get("role")
            .map_err(|e| StoreError::QueryFailed(format!("role column: {e}")))?;
        let content: String = row
            .try_get("content")
            .map_err(|e| StoreError::QueryFailed(format!("content column: {e}")))?;
        let tool_calls: String = row
            .try_get("tool_calls")
            .map_err(|e| StoreError::QueryFailed(format!("tool_calls column: {e}")))?;
        let tool_call_id: Option<String> = row
            .try_get("tool_call_id")
            .map_err(|e| StoreError::QueryFailed(format!("tool_call_id column: {e}")))?;
        let timestamp: String = row
            .try_get("timestamp")
            .map_err(|e| StoreError::QueryFailed(format!("timestamp column: {e}")))?;

        let role = Role::from_str(&role).map_err(StoreError::QueryFailed)?;
        let tool_calls: Vec<MessageToolCall> = serde_json::from_str(&tool_calls)
            .map_err(|e| StoreError::QueryFailed(format!("tool_calls JSON: {e}")))?;
        let id = if id.is_empty() { Uuid::new_v4().to_string() } else { id };

        Ok(Message {
            id,
            role,
            content,
            tool_calls,
            tool_call_id,
            timestamp: Self::parse_timestamp(&timestamp)?,
        })
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn append(&self, session_id: &SessionId, message: &Message) -> Result<(), StoreError> {
        self.append_all(session_id, std::slice::from_ref(message)).await
    }

    async fn append_all(&self, session_id: &SessionId, messages: &[Message]) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("Begin transaction: {e}")))?;

        for message in messages {
            let tool_calls = serde_json::to_string(&message.tool_calls)
                .map_err(|e| StoreError::Storage(format!("Encode tool calls: {e}")))?;
            sqlx::query(
                r#"
                INSERT INTO chat_history (session_id, message_id, role, content, tool_calls, tool_call_id, timestamp)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(session_id.as_str())
            .bind(&message.id)
            .bind(message.role.as_str())
            .bind(&message.content)
            .bind(tool_calls)
            .bind(message.tool_call_id.as_deref())
            .bind(message.timestamp.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("Insert failed: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("Commit failed: {e}")))?;

        debug!(session_id = %session_id, count = messages.len(), "Appended messages");
        Ok(())
    }

    async fn list(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT message_id, role, content, tool_calls, tool_call_id, timestamp
            FROM chat_history
            WHERE session_id = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(session_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("List failed: {e}")))?;

        rows.iter().map(Self::row_to_message).collect()
    }

    async fn list_sessions(&self) -> Result<Vec<SessionSummary>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT h.session_id, h.content, h.timestamp
            FROM chat_history h
            JOIN (
                SELECT session_id, MAX(seq) AS last_seq
                FROM chat_history
                GROUP BY session_id
            ) latest ON h.seq = latest.last_seq
            ORDER BY h.seq DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("Session listing failed: {e}")))?;

        rows.iter()
            .map(|row| {
                let id: String = row
                    .try_get("session_id")
                    .map_err(|e| StoreError::QueryFailed(format!("session_id column: {e}")))?;
                let content: String = row
                    .try_get("content")
                    .map_err(|e| StoreError::QueryFailed(format!("content column: {e}")))?;
                let timestamp: String = row
                    .try_get("timestamp")
                    .map_err(|e| StoreError::QueryFailed(format!("timestamp column: {e}")))?;
                Ok(SessionSummary {
                    id: SessionId::from(id),
                    title: derive_title(&content),
                    updated_at: Self::parse_timestamp(&timestamp)?,
                })
            })
            .collect()
    }

    async fn delete(&self, session_id: &SessionId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM chat_history WHERE session_id = ?")
            .bind(session_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("Delete failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn append_and_list_round_trip() {
        let store = test_store().await;
        let session = SessionId::from("s1");
        let user = Message::user("What's on my calendar today?");
        let answer = Message::assistant("You have a dentist appointment at 3 PM.");

        store.append(&session, &user).await.unwrap();
        store.append(&session, &answer).await.unwrap();

        let messages = store.list(&session).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].id, user.id);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, answer.content);
    }

    #[tokio::test]
    async fn tool_calls_and_results_are_kept() {
        let store = test_store().await;
        let session = SessionId::from("s1");
        let call = MessageToolCall {
            id: "c1".into(),
            name: "list_upcoming_events".into(),
            arguments: r#"{"max_results":5}"#.into(),
        };
        let batch = vec![
            Message::assistant_with_calls("", vec![call.clone()]),
            Message::tool_result("c1", "Dentist at 15:00"),
        ];

        store.append_all(&session, &batch).await.unwrap();

        let messages = store.list(&session).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].tool_calls, vec![call]);
        assert_eq!(messages[0].tool_call_id, None);
        assert_eq!(messages[1].role, Role::Tool);
        assert_eq!(messages[1].tool_call_id.as_deref(), Some("c1"));
        assert!(messages[1].tool_calls.is_empty());
    }

    #[tokio::test]
    async fn corrupt_timestamp_is_an_error() {
        let store = test_store().await;
        sqlx::query(
            "INSERT INTO chat_history (session_id, message_id, role, content, timestamp) VALUES ('s1', 'm1', 'user', 'hi', 'yesterday')",
        )
        .execute(&store.pool)
        .await
        .unwrap();

        let err = store.list(&"s1".into()).await.unwrap_err();
        assert!(matches!(err, StoreError::QueryFailed(_)));
        assert!(matches!(store.list_sessions().await, Err(StoreError::QueryFailed(_))));
    }

    #[tokio::test]
    async fn same_timestamp_keeps_append_order() {
        let store = test_store().await;
        let session = SessionId::from("s1");
        let now = Utc::now();
        let mut batch = vec![Message::user("one"), Message::assistant("two"), Message::user("three")];
        for message in &mut batch {
            message.timestamp = now;
        }

        store.append_all(&session, &batch).await.unwrap();

        let contents: Vec<String> = store
            .list(&session)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn list_unknown_session_is_empty() {
        let store = test_store().await;
        assert!(store.list(&"missing".into()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_sessions_titles_from_latest_message() {
        let store = test_store().await;
        store.append(&"a".into(), &Message::user("Book lunch")).await.unwrap();
        store.append(&"b".into(), &Message::user("Any new email?")).await.unwrap();
        store
            .append(&"a".into(), &Message::assistant("I booked lunch with Sam at noon tomorrow."))
            .await
            .unwrap();

        let sessions = store.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].id.as_str(), "a");
        assert_eq!(sessions[0].title, "I booked lunch with Sam at noo...");
        assert_eq!(sessions[1].id.as_str(), "b");
        assert_eq!(sessions[1].title, "Any new email?");
    }

    #[tokio::test]
    async fn delete_removes_all_messages() {
        let store = test_store().await;
        let session = SessionId::from("s1");
        store
            .append_all(&session, &[Message::user("q"), Message::assistant("a")])
            .await
            .unwrap();

        assert!(store.delete(&session).await.unwrap());
        assert!(store.list(&session).await.unwrap().is_empty());
        assert!(store.list_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_nonexistent() {
        let store = test_store().await;
        assert!(!store.delete(&"ghost".into()).await.unwrap());
    }

    #[tokio::test]
    async fn history_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = format!("sqlite://{}", dir.path().join("history.db").display());
        let session = SessionId::from("durable");

        {
            let store = SqliteStore::new(&path).await.unwrap();
            store
                .append_all(&session, &[Message::user("remember me"), Message::assistant("noted")])
                .await
                .unwrap();
            store.pool.close().await;
        }

        let reopened = SqliteStore::new(&path).await.unwrap();
        let messages = reopened.list(&session).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "remember me");
        assert_eq!(messages[1].content, "noted");
    }

    #[tokio::test]
    async fn store_name() {
        assert_eq!(test_store().await.name(), "sqlite");
    }
}
