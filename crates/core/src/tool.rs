//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are what give an agent the ability to act in the world: search the
//! web, read a calendar, send mail, query a knowledge store, or delegate to
//! another agent. A wrapped specialist agent is also a `Tool`, so the
//! reasoning loop never needs to tell the two apart.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ToolError, ToolErrorKind};
use crate::provider::ToolDefinition;
use crate::schema;

/// A request to execute a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the model's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// Name of the tool that produced it
    #[serde(default)]
    pub name: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content
    pub output: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Failure classification, set whenever `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ToolErrorKind>,
}

impl ToolResult {
    /// A successful result with text output.
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            call_id: String::new(),
            name: String::new(),
            success: true,
            output: output.into(),
            data: None,
            error_kind: None,
        }
    }

    /// A successful result carrying structured data alongside the text.
    pub fn with_data(output: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            ..Self::ok(output)
        }
    }

    /// A failed result of the given kind.
    pub fn failure(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            call_id: String::new(),
            name: String::new(),
            success: false,
            output: message.into(),
            data: None,
            error_kind: Some(kind),
        }
    }

    /// Text the model sees for this result.
    pub fn to_message_content(&self) -> String {
        match self.error_kind {
            Some(kind) if !self.success => format!("Error [{kind}]: {}", self.output),
            _ => self.output.clone(),
        }
    }

    /// Stamp the call's id and tool name onto this result.
    pub fn for_call(mut self, call: &ToolCall) -> Self {
        self.call_id = call.id.clone();
        self.name = call.name.clone();
        self
    }
}

impl From<ToolError> for ToolResult {
    fn from(err: ToolError) -> Self {
        ToolResult::failure(err.kind(), err.to_string())
    }
}

/// The core Tool trait.
///
/// Each capability implements this trait. Tools are registered in a
/// [`ToolRegistry`] when an agent is built and made available to its
/// reasoning loop.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "web_search").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool. Arguments have already been validated against
    /// `parameters_schema()` when called through a registry.
    async fn execute(&self, arguments: serde_json::Value) -> std::result::Result<ToolResult, ToolError>;

    /// Per-tool execution limit. `None` uses the caller's default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools, keyed by name.
///
/// Names are unique: registering a second tool under an existing name is an
/// error, so the model can always address exactly one capability.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    // Registration order, so descriptors reach the model deterministically.
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> std::result::Result<(), ToolError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ToolError::DuplicateName(name));
        }
        self.order.push(name.clone());
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Builder-style registration.
    pub fn with(mut self, tool: Arc<dyn Tool>) -> std::result::Result<Self, ToolError> {
        self.register(tool)?;
        Ok(self)
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Get all tool definitions (for sending to the model).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.to_definition())
            .collect()
    }

    /// List all registered tool names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool call inside a failure boundary.
    ///
    /// Never returns an error: unknown names, schema violations, execution
    /// failures and timeouts all become a failed [`ToolResult`] carrying the
    /// matching [`ToolErrorKind`]. A call whose arguments fail validation
    /// never reaches the tool's `execute`.
    pub async fn invoke(&self, call: &ToolCall, timeout: Duration) -> ToolResult {
        let Some(tool) = self.tools.get(&call.name) else {
            warn!(tool = %call.name, "Model requested an unknown tool");
            return ToolResult::from(ToolError::NotFound(call.name.clone())).for_call(call);
        };

        if let Err(violation) = schema::validate(&tool.parameters_schema(), &call.arguments) {
            debug!(tool = %call.name, %violation, "Rejected tool arguments");
            return ToolResult::from(ToolError::InvalidArguments(violation.to_string())).for_call(call);
        }

        let arguments = if call.arguments.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            call.arguments.clone()
        };

        let timeout = tool.timeout().unwrap_or(timeout);
        match tokio::time::timeout(timeout, tool.execute(arguments)).await {
            Ok(Ok(result)) => {
                let result = result.for_call(call);
                if result.success || result.error_kind.is_some() {
                    result
                } else {
                    // Tools that report failure without a kind ran and failed.
                    ToolResult {
                        error_kind: Some(ToolErrorKind::CapabilityExecutionError),
                        ..result
                    }
                }
            }
            Ok(Err(err)) => {
                warn!(tool = %call.name, error = %err, "Tool execution failed");
                ToolResult::from(err).for_call(call)
            }
            Err(_) => {
                warn!(tool = %call.name, timeout_secs = timeout.as_secs(), "Tool timed out");
                ToolResult::from(ToolError::Timeout {
                    tool_name: call.name.clone(),
                    timeout_secs: timeout.as_secs(),
                })
                .for_call(call)
            }
        }
    }
}
