//! # Marshal Core
//!
//! Domain types, traits, and error definitions for the Marshal agent
//! orchestration runtime. This crate defines the domain model that all other
//! crates implement against.
//!
//! ## Design Philosophy
//!
//! Every subsystem is defined as a trait here. Implementations live in their
//! respective crates:
//! - [`Provider`]: the completion service (`marshal-providers`)
//! - [`Tool`]: a capability (`marshal-tools`, and specialist agents in `marshal-agent`)
//! - [`ConversationStore`]: session history (`marshal-store`)

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod schema;
pub mod store;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{ProviderError, StoreError, ToolError, ToolErrorKind};
pub use event::{DomainEvent, EventBus};
pub use message::{Conversation, Message, MessageToolCall, Role, SessionId};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
pub use store::{ConversationStore, SessionSummary};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
