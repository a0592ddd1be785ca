//! Agents for Marshal: the reasoning loop and hierarchical delegation.
//!
//! Every agent runs the same loop:
//!
//! 1. **Ask** the completion service for the next step, given the agent's
//!    instruction, the conversation so far and its capability descriptors
//! 2. **If capability calls**: invoke each one in order, append the results,
//!    go back to step 1
//! 3. **If text**: that is the answer
//!
//! The loop stops at the answer or at the iteration bound.
//!
//! A specialist agent is exposed to the coordinator through
//! [`SpecialistTool`], so delegating is just another capability call.

pub mod agent;
pub mod context;
pub mod coordinator;
pub mod factory;
pub mod specialist;

#[cfg(test)]
mod test_helpers;

pub use agent::{Agent, AgentError, AgentSettings, LoopOutcome, Termination};
pub use context::TurnContext;
pub use coordinator::{build_instruction, Coordinator, TurnError};
pub use factory::{build_coordinator, AgentFactory, Backends};
pub use specialist::SpecialistTool;
