//! The coordinator: the agent the user talks to.
//!
//! # Architecture
//!
//! ```text
//! user turn
//!     │
//!     ▼
//! ┌──────────────┐   history    ┌───────────────────┐
//! │ Coordinator  │ ◄──────────► │ ConversationStore │
//! └──┬───────┬───┘              └───────────────────┘
//!    │ query │ query            (self-contained strings only)
//!    ▼       ▼
//! ┌──────┐ ┌──────┐
//! │ S-1  │ │ S-2  │  ← specialists, each behind a SpecialistTool
//! └──────┘ └──────┘
//! ```
//!
//! Specialists never see the conversation, so the coordinator's instruction
//! requires every delegated query to stand on its own. A turn is persisted
//! as a user message followed by the final answer, and only after the loop
//! succeeds.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use marshal_core::error::StoreError;
use marshal_core::event::{DomainEvent, EventBus};
use marshal_core::message::{Conversation, Message, SessionId};
use marshal_core::store::{ConversationStore, SessionSummary};
use marshal_core::tool::ToolRegistry;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::agent::{Agent, AgentError};
use crate::context::TurnContext;

const CONTEXTUALIZATION_RULES: &str = "\
Specialists cannot see this conversation. Every request you send them must stand on its own:
- Replace pronouns and references such as \"it\", \"that match\" or \"the same time\" with the concrete names, titles and values from the conversation.
- Turn relative times (\"tomorrow\", \"next Friday\", \"in an hour\") into explicit dates and times using the current time above.
- Include every detail the specialist needs (recipients, durations, subjects) in the query itself.
Never ask a specialist to \"check the conversation\" or refer to earlier messages.";

#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("Conversation store failed: {0}")]
    Store(#[from] StoreError),
}

/// Render the coordinator instruction for a turn happening at `now`.
pub fn build_instruction(persona: &str, specialists: &ToolRegistry, now: DateTime<FixedOffset>) -> String {
    let mut instruction = format!(
        "Current time: {} (UTC{})\n\n{}\n",
        now.format("%A, %Y-%m-%d %I:%M %p"),
        now.format("%:z"),
        persona.trim()
    );

    if specialists.is_empty() {
        instruction.push_str("\nYou have no specialists available; answer directly.\n");
        return instruction;
    }

    instruction.push_str("\nYour specialists:\n");
    for definition in specialists.definitions() {
        instruction.push_str(&format!("- {}: {}\n", definition.name, definition.description));
    }
    instruction.push('\n');
    instruction.push_str(CONTEXTUALIZATION_RULES);
    instruction
}

pub struct Coordinator {
    agent: Arc<Agent>,
    store: Arc<dyn ConversationStore>,
    timezone: FixedOffset,
    locks: Mutex<HashMap<SessionId, Arc<Mutex<()>>>>,
    event_bus: Option<Arc<EventBus>>,
}

impl Coordinator {
    /// Wrap `agent`, whose own instruction serves as the persona.
    pub fn new(agent: Arc<Agent>, store: Arc<dyn ConversationStore>) -> Self {
        Self {
            agent,
            store,
            timezone: Utc.fix(),
            locks: Mutex::new(HashMap::new()),
            event_bus: None,
        }
    }

    /// Offset used for the current-time line. Out-of-range offsets fall back to UTC.
    pub fn with_timezone_offset(mut self, minutes: i32) -> Self {
        match FixedOffset::east_opt(minutes * 60) {
            Some(offset) => self.timezone = offset,
            None => warn!(minutes, "Ignoring out-of-range timezone offset"),
        }
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    /// Names of the capabilities the coordinator can delegate to.
    pub fn roster(&self) -> Vec<&str> {
        self.agent.tools().names()
    }

    /// Instruction for a turn starting now.
    pub fn instruction(&self) -> String {
        let now = Utc::now().with_timezone(&self.timezone);
        build_instruction(self.agent.instruction(), self.agent.tools(), now)
    }

    /// Handle one user turn with a fresh, uncancellable-from-outside context.
    pub async fn handle_turn(&self, session_id: &SessionId, user_text: &str) -> Result<String, TurnError> {
        self.handle_turn_with(&TurnContext::new(), session_id, user_text).await
    }

    /// Handle one user turn under `ctx`.
    ///
    /// Turns on the same session are serialized. Nothing is written to the
    /// store unless the loop produces an answer and the turn was not
    /// cancelled meanwhile.
    pub async fn handle_turn_with(
        &self,
        ctx: &TurnContext,
        session_id: &SessionId,
        user_text: &str,
    ) -> Result<String, TurnError> {
        let lock = self.session_lock(session_id).await;
        let guard = lock.lock().await;
        let result = self.run_turn(ctx, session_id, user_text).await;
        self.release_lock(session_id, &lock).await;
        drop(guard);
        result
    }

    async fn run_turn(&self, ctx: &TurnContext, session_id: &SessionId, user_text: &str) -> Result<String, TurnError> {
        info!(session_id = %session_id, turn_id = %ctx.turn_id, "Handling turn");

        let mut conversation = Conversation::for_session(session_id.clone());
        for message in self.store.list(session_id).await? {
            conversation.push(message);
        }
        let user = Message::user(user_text);
        conversation.push(user.clone());
        debug!(session_id = %session_id, history = conversation.messages.len() - 1, "History loaded");

        let instruction = self.instruction();
        let outcome = match self.agent.run_with_instruction(ctx, &instruction, &conversation.messages).await {
            Ok(outcome) if !ctx.is_cancelled() => outcome,
            Ok(_) => return Err(self.fail(session_id, AgentError::Cancelled.into())),
            Err(e) => return Err(self.fail(session_id, e.into())),
        };

        let answer = Message::assistant(&outcome.answer);
        if let Err(e) = self.store.append_all(session_id, &[user, answer]).await {
            return Err(self.fail(session_id, e.into()));
        }

        info!(
            session_id = %session_id,
            iterations = outcome.iterations,
            tool_calls = outcome.tool_calls_made,
            "Turn completed"
        );
        self.publish(DomainEvent::TurnCompleted {
            session_id: session_id.to_string(),
            iterations: outcome.iterations as usize,
            tool_calls: outcome.tool_calls_made,
            timestamp: Utc::now(),
        });

        Ok(outcome.answer)
    }

    pub async fn sessions(&self) -> Result<Vec<SessionSummary>, StoreError> {
        self.store.list_sessions().await
    }

    pub async fn history(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError> {
        self.store.list(session_id).await
    }

    /// Delete a session's history. Waits for any turn in progress on it.
    pub async fn delete_session(&self, session_id: &SessionId) -> Result<bool, StoreError> {
        let lock = self.session_lock(session_id).await;
        let guard = lock.lock().await;
        let deleted = self.store.delete(session_id).await;
        self.release_lock(session_id, &lock).await;
        drop(guard);
        let deleted = deleted?;
        info!(session_id = %session_id, deleted, "Session deleted");
        Ok(deleted)
    }

    async fn session_lock(&self, session_id: &SessionId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(session_id.clone()).or_default().clone()
    }

    /// Drop the session's lock entry if no other turn holds or awaits it.
    ///
    /// Must be called while `lock` is held. Every waiter clones the `Arc`
    /// under the map lock, so a count of two (map plus caller) means nobody
    /// else can reach this mutex.
    async fn release_lock(&self, session_id: &SessionId, lock: &Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        let idle = locks
            .get(session_id)
            .is_some_and(|current| Arc::ptr_eq(current, lock) && Arc::strong_count(lock) == 2);
        if idle {
            locks.remove(session_id);
        }
    }

    fn fail(&self, session_id: &SessionId, error: TurnError) -> TurnError {
        warn!(session_id = %session_id, error = %error, "Turn failed, nothing persisted");
        self.publish(DomainEvent::TurnFailed {
            session_id: session_id.to_string(),
            error_message: error.to_string(),
            timestamp: Utc::now(),
        });
        error
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}
