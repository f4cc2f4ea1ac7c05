//! AI Portfolio Manager
//!
//! A chat assistant over a brokerage account:
//! - Routes LLM function calls to a fixed catalog of brokerage operations
//! - Validates tool arguments before anything reaches the brokerage
//! - Bounds every turn's tool-call round trips
//! - Falls back from the cloud LLM to a local one when quota runs out
//! - Writes portfolio news reports on demand
//!
//! TURN LOOP:
//! INPUT → LIMITS → BACKEND → TOOL CALLS → DISPATCH → BACKEND → ANSWER

pub mod agent;
pub mod analysis;
pub mod backend;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod models;
pub mod news;
pub mod session;
pub mod tools;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use agent::Conversation;
pub use session::{SessionController, SessionOutcome};
