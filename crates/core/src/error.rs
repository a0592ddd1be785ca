//! Error types for the Marshal domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; capability failures are
//! additionally classified by [`ToolErrorKind`] so the reasoning loop can
//! record *what kind* of failure happened without inspecting strings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// --- Bounded context errors ---

/// Failures of the completion service. None of these are recoverable inside
/// a reasoning loop: they abort the current turn.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider returned an unusable response: {0}")]
    InvalidResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

/// Errors a capability can raise.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("A tool named '{0}' is already registered")]
    DuplicateName(String),
}

impl ToolError {
    /// Classify this error for the reasoning loop.
    pub fn kind(&self) -> ToolErrorKind {
        match self {
            Self::NotFound(_) => ToolErrorKind::UnknownCapability,
            Self::InvalidArguments(_) => ToolErrorKind::InvalidArguments,
            Self::ExecutionFailed { .. } | Self::Timeout { .. } | Self::DuplicateName(_) => {
                ToolErrorKind::CapabilityExecutionError
            }
        }
    }
}

/// Classification of a failed capability result.
///
/// Recorded on every `ToolResult` with `success == false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// Arguments did not validate against the declared schema.
    InvalidArguments,
    /// The model asked for a capability that is not registered.
    UnknownCapability,
    /// The capability ran and failed, or timed out.
    CapabilityExecutionError,
    /// A delegated agent gave up after its iteration bound.
    IterationLimitExceeded,
}

impl std::fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InvalidArguments => "invalid_arguments",
            Self::UnknownCapability => "unknown_capability",
            Self::CapabilityExecutionError => "capability_execution_error",
            Self::IterationLimitExceeded => "iteration_limit_exceeded",
        };
        f.write_str(s)
    }
}
