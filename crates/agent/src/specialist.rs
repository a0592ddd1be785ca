//! Agent-as-capability: expose a whole agent to another agent's loop.
//!
//! The caller sees an ordinary [`Tool`] taking a `query`. Each invocation
//! runs the wrapped agent on a fresh conversation, so nothing the caller has
//! seen crosses the boundary unless it is written into `query` (or the
//! optional `context` summary).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use marshal_core::error::{ToolError, ToolErrorKind};
use marshal_core::message::{Conversation, Message};
use marshal_core::tool::{Tool, ToolResult};
use tracing::{info, warn};

use crate::agent::{Agent, AgentError};
use crate::context::TurnContext;

pub struct SpecialistTool {
    agent: Arc<Agent>,
    description: String,
    timeout: Option<Duration>,
}

impl SpecialistTool {
    pub fn new(agent: Arc<Agent>, description: impl Into<String>) -> Self {
        Self {
            agent,
            description: description.into(),
            timeout: None,
        }
    }

    /// Bound a whole delegated run, overriding the caller's per-call limit.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn agent(&self) -> &Arc<Agent> {
        &self.agent
    }

    fn conversation(query: &str, context: Option<&str>) -> Conversation {
        let mut conversation = Conversation::single(query);
        if let Some(context) = context.map(str::trim).filter(|c| !c.is_empty()) {
            conversation
                .messages
                .insert(0, Message::system(format!("Context from the coordinator: {context}")));
        }
        conversation
    }
}

#[async_trait]
impl Tool for SpecialistTool {
    fn name(&self) -> &str {
        self.agent.name()
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The complete, self-contained request. Resolve pronouns and include every name, date and detail the specialist needs.",
                    "minLength": 1
                },
                "context": {
                    "type": "string",
                    "description": "Optional short summary of relevant background from the conversation"
                }
            },
            "required": ["query"]
        })
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let query = arguments["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;
        let context = arguments["context"].as_str();

        let ctx = TurnContext::inherit();
        info!(specialist = %self.agent.name(), turn_id = %ctx.turn_id, "Delegating to specialist");

        let conversation = Self::conversation(query, context);
        match self.agent.run(&ctx, &conversation.messages).await {
            Ok(outcome) if outcome.hit_iteration_limit() => {
                warn!(specialist = %self.agent.name(), "Specialist hit its iteration limit");
                Ok(ToolResult::failure(ToolErrorKind::IterationLimitExceeded, outcome.answer))
            }
            Ok(outcome) => Ok(ToolResult::ok(outcome.answer)),
            Err(e) => {
                warn!(specialist = %self.agent.name(), error = %e, "Specialist run failed");
                let reason = match e {
                    AgentError::Cancelled => "The request was cancelled before the specialist finished.".to_string(),
                    other => format!("The {} could not complete the request: {other}", self.agent.name()),
                };
                Ok(ToolResult::failure(ToolErrorKind::CapabilityExecutionError, reason))
            }
        }
    }
}
