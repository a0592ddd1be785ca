//! The reasoning loop shared by every agent.
//!
//! ```text
//!             ┌──────────────────────┐
//!   start ──► │ AwaitingCompletion   │ ◄──────────────────────┐
//!             └─────────┬────────────┘                        │
//!          no tool calls│          tool calls                 │
//!                       ▼               ▼                     │
//!                ┌───────────┐  ┌─────────────────────────┐   │
//!                │   Done    │  │ AwaitingCapabilityResults├──┘
//!                └───────────┘  └─────────────────────────┘
//! ```
//!
//! Each iteration asks the completion service for the next step. A reply
//! without tool calls is the answer. Otherwise every requested capability
//! is invoked in order and its result appended before asking again. The
//! loop is bounded; hitting the bound yields a degraded answer, not an
//! error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use marshal_core::error::{ProviderError, ToolErrorKind};
use marshal_core::event::{DomainEvent, EventBus};
use marshal_core::message::{Message, MessageToolCall};
use marshal_core::provider::{Provider, ProviderRequest};
use marshal_core::tool::{ToolCall, ToolRegistry, ToolResult};
use tracing::{debug, info, warn};

use crate::context::TurnContext;

/// Tunables for one agent's loop.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub max_iterations: u32,
    pub completion_timeout: Duration,
    pub capability_timeout: Duration,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".into(),
            temperature: 0.7,
            max_tokens: None,
            max_iterations: 10,
            completion_timeout: Duration::from_secs(120),
            capability_timeout: Duration::from_secs(30),
        }
    }
}

/// How a loop run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    FinalAnswer,
    IterationLimitExceeded,
}

/// Everything a loop run produced.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub answer: String,

    /// Messages produced by this run, in order: assistant messages carrying
    /// tool calls, their tool results, and the final assistant message.
    /// Never contains a partial call group.
    pub transcript: Vec<Message>,

    pub iterations: u32,
    pub tool_calls_made: usize,
    pub termination: Termination,
}

impl LoopOutcome {
    pub fn hit_iteration_limit(&self) -> bool {
        self.termination == Termination::IterationLimitExceeded
    }

    /// Tool results in this run, in the order they were produced.
    pub fn tool_messages(&self) -> impl Iterator<Item = &Message> {
        self.transcript.iter().filter(|m| m.tool_call_id.is_some())
    }
}

/// Failures that abort a loop run.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    #[error("Completion service failed: {0}")]
    CompletionService(#[from] ProviderError),

    #[error("Turn was cancelled")]
    Cancelled,
}

/// An agent: an instruction, a fixed set of capabilities, and a provider.
///
/// Agents hold no per-turn state; the same `Arc<Agent>` serves any number
/// of concurrent runs.
pub struct Agent {
    name: String,
    instruction: String,
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    settings: AgentSettings,
    event_bus: Option<Arc<EventBus>>,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        instruction: impl Into<String>,
        provider: Arc<dyn Provider>,
        tools: ToolRegistry,
    ) -> Self {
        Self {
            name: name.into(),
            instruction: instruction.into(),
            provider,
            tools: Arc::new(tools),
            settings: AgentSettings::default(),
            event_bus: None,
        }
    }

    pub fn with_settings(mut self, settings: AgentSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the maximum number of loop iterations.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.settings.max_iterations = max;
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Run the loop over `conversation` with this agent's own instruction.
    pub async fn run(&self, ctx: &TurnContext, conversation: &[Message]) -> Result<LoopOutcome, AgentError> {
        self.run_with_instruction(ctx, &self.instruction, conversation).await
    }

    /// Run the loop with an instruction computed for this run.
    pub async fn run_with_instruction(
        &self,
        ctx: &TurnContext,
        instruction: &str,
        conversation: &[Message],
    ) -> Result<LoopOutcome, AgentError> {
        info!(
            agent = %self.name,
            turn_id = %ctx.turn_id,
            messages = conversation.len(),
            "Agent run started"
        );

        let mut working = Vec::with_capacity(conversation.len() + 1);
        working.push(Message::system(instruction));
        working.extend_from_slice(conversation);

        let definitions = self.tools.definitions();
        let mut transcript = Vec::new();
        let mut tool_calls_made = 0usize;

        for iteration in 1..=self.settings.max_iterations {
            if ctx.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            debug!(agent = %self.name, iteration, "Agent loop iteration");

            let request = ProviderRequest {
                model: self.settings.model.clone(),
                messages: working.clone(),
                temperature: self.settings.temperature,
                max_tokens: self.settings.max_tokens,
                tools: definitions.clone(),
            };

            let response = tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(AgentError::Cancelled),
                outcome = tokio::time::timeout(self.settings.completion_timeout, self.provider.complete(request)) => {
                    match outcome {
                        Ok(response) => response?,
                        Err(_) => {
                            warn!(agent = %self.name, iteration, "Completion call timed out");
                            return Err(ProviderError::Timeout(format!(
                                "no completion within {}s",
                                self.settings.completion_timeout.as_secs()
                            ))
                            .into());
                        }
                    }
                }
            };

            self.publish(DomainEvent::CompletionReceived {
                agent: self.name.clone(),
                iteration,
                tool_calls: response.message.tool_calls.len(),
                tokens_used: response.usage.as_ref().map(|u| u.total_tokens),
                timestamp: Utc::now(),
            });

            if response.is_final() {
                let answer = response.message.content.clone();
                transcript.push(response.message);
                info!(agent = %self.name, iterations = iteration, tool_calls_made, "Agent run finished");
                return Ok(LoopOutcome {
                    answer,
                    transcript,
                    iterations: iteration,
                    tool_calls_made,
                    termination: Termination::FinalAnswer,
                });
            }

            // The assistant message and its results land together or not at all.
            let assistant = response.message;
            let mut group = Vec::with_capacity(assistant.tool_calls.len() + 1);
            for requested in &assistant.tool_calls {
                let result = self.invoke(ctx, requested).await?;
                group.push(Message::tool_result(&requested.id, result.to_message_content()));
                tool_calls_made += 1;
            }
            group.insert(0, assistant);

            working.extend_from_slice(&group);
            transcript.extend(group);
        }

        let iterations = self.settings.max_iterations;
        warn!(agent = %self.name, iterations, "Max iterations reached, returning degraded answer");
        self.publish(DomainEvent::IterationLimitReached {
            agent: self.name.clone(),
            iterations,
            timestamp: Utc::now(),
        });

        Ok(LoopOutcome {
            answer: format!(
                "I couldn't finish this request within {iterations} steps. Here is where I got to; please narrow the request or try again."
            ),
            transcript,
            iterations,
            tool_calls_made,
            termination: Termination::IterationLimitExceeded,
        })
    }

    /// Invoke one requested capability. Only cancellation escapes as an
    /// error; every other failure is a failed `ToolResult`.
    async fn invoke(&self, ctx: &TurnContext, requested: &MessageToolCall) -> Result<ToolResult, AgentError> {
        let call = ToolCall {
            id: requested.id.clone(),
            name: requested.name.clone(),
            arguments: serde_json::Value::Null,
        };

        let arguments = match parse_arguments(&requested.arguments) {
            Ok(arguments) => arguments,
            Err(e) => {
                warn!(agent = %self.name, tool = %requested.name, error = %e, "Unparseable tool arguments");
                let result = ToolResult::failure(
                    ToolErrorKind::InvalidArguments,
                    format!("Arguments are not valid JSON: {e}"),
                )
                .for_call(&call);
                self.publish_tool_event(&result, Duration::ZERO);
                return Ok(result);
            }
        };
        let call = ToolCall { arguments, ..call };

        let started = Instant::now();
        let invocation = ctx.scope(self.tools.invoke(&call, self.settings.capability_timeout));
        let result = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(AgentError::Cancelled),
            result = invocation => result,
        };

        debug!(
            agent = %self.name,
            tool = %call.name,
            success = result.success,
            "Tool call finished"
        );
        self.publish_tool_event(&result, started.elapsed());
        Ok(result)
    }

    fn publish_tool_event(&self, result: &ToolResult, elapsed: Duration) {
        self.publish(DomainEvent::ToolExecuted {
            agent: self.name.clone(),
            tool_name: result.name.clone(),
            success: result.success,
            error_kind: result.error_kind,
            duration_ms: elapsed.as_millis() as u64,
            timestamp: Utc::now(),
        });
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}

/// Decode the model's argument string. Blank means "no arguments".
fn parse_arguments(raw: &str) -> Result<serde_json::Value, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(serde_json::Value::Null);
    }
    serde_json::from_str(raw)
}
