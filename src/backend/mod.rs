//! Conversation backends
//!
//! An LLM backend receives the conversation so far plus the tool catalog
//! and answers with text, tool calls, or both. The cloud backend uses
//! native function calling; the local backend is prompt-engineered and
//! parses calls out of free text. The conversation loop in
//! [`crate::agent`] is written once against [`ConversationBackend`].

use crate::models::{ToolCall, ToolResult};
use crate::tools::ToolRegistry;
use crate::Result;
use async_trait::async_trait;

pub mod gemini;
pub mod ollama;

pub use gemini::GeminiBackend;
pub use ollama::OllamaBackend;

/// Message shown when a turn ends with no usable text.
pub const EMPTY_REPLY_MESSAGE: &str =
    "I apologize, but I couldn't generate a proper response. Please try rephrasing your question.";

const DEFAULT_LIMIT_MESSAGE: &str = "I've reached my function calling limit for this request. \
     Please break it into smaller steps and ask again.";

/// Capability summary shared by both backends' system prompts.
pub(crate) const ASSISTANT_ROLE: &str = "You are an AI portfolio assistant with access to the user's Alpaca trading account. You can:
- View portfolio positions, account details, and performance metrics
- Get stock quotes, historical data, and news
- Analyze portfolio allocation, concentration, and returns
- Execute trades (market and limit orders) after user confirmation
- Provide financial insights and recommendations

CRITICAL: You are outputting to a TERMINAL, not a markdown renderer. Format responses for plain text readability.";

/// One entry of conversation history.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatTurn {
    User(String),
    Assistant {
        text: Option<String>,
        tool_calls: Vec<ToolCall>,
    },
    ToolResult {
        name: String,
        result: ToolResult,
    },
}

impl ChatTurn {
    pub fn assistant_text(text: impl Into<String>) -> Self {
        ChatTurn::Assistant {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }
}

/// A single backend response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendReply {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl BackendReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            text: None,
            tool_calls,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Trait for LLM backends driving a conversation
#[async_trait]
pub trait ConversationBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Cheap liveness probe run before each turn.
    async fn check_available(&self) -> Result<()> {
        Ok(())
    }

    /// Send the full history and tool catalog, return the next reply.
    async fn complete(&self, history: &[ChatTurn], tools: &ToolRegistry) -> Result<BackendReply>;

    /// Post-process final text before it reaches the user.
    fn finalize_text(&self, text: &str) -> String {
        text.trim().to_string()
    }

    /// Whether intermediate tool-call turns stay in history after a turn
    /// completes. When `false` only the user message and final answer remain.
    fn keeps_tool_exchanges(&self) -> bool {
        true
    }

    fn iteration_limit_message(&self) -> String {
        DEFAULT_LIMIT_MESSAGE.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reply_constructors() {
        let reply = BackendReply::text("hello");
        assert!(!reply.has_tool_calls());
        assert_eq!(reply.text.as_deref(), Some("hello"));

        let reply = BackendReply::calls(vec![ToolCall::new("get_all_positions", json!({}))]);
        assert!(reply.has_tool_calls());
        assert!(reply.text.is_none());
    }
}
