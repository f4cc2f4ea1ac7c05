//! Conversation loop
//!
//! USER → BACKEND → (TOOL CALLS → DISPATCH → BACKEND)* → FINAL TEXT
//!
//! One [`Conversation`] owns one backend and its history. The loop is
//! bounded so a backend that keeps asking for tools cannot spin forever.

use crate::backend::{ChatTurn, ConversationBackend, EMPTY_REPLY_MESSAGE};
use crate::dispatch::FunctionDispatcher;
use crate::Result;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Maximum backend calls per user turn
pub const MAX_TOOL_ROUND_TRIPS: usize = 5;

enum TurnEnd {
    Answer(String),
    LimitReached,
}

pub struct Conversation {
    backend: Box<dyn ConversationBackend>,
    dispatcher: Arc<FunctionDispatcher>,
    history: Vec<ChatTurn>,
}

impl Conversation {
    pub fn new(backend: Box<dyn ConversationBackend>, dispatcher: Arc<FunctionDispatcher>) -> Self {
        Self {
            backend,
            dispatcher,
            history: Vec::new(),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    pub fn reset(&mut self) {
        debug!(backend = %self.backend.name(), "Conversation history cleared");
        self.history.clear();
    }

    /// Run one user turn, rendering any error as text.
    pub async fn chat(&mut self, message: &str) -> String {
        match self.try_chat(message).await {
            Ok(text) => text,
            Err(e) => e.user_message(),
        }
    }

    /// Run one user turn. On error the history is left as it was before
    /// the turn started.
    pub async fn try_chat(&mut self, message: &str) -> Result<String> {
        self.backend.check_available().await?;

        let start = Instant::now();
        let turn_start = self.history.len();
        self.history.push(ChatTurn::User(message.to_string()));

        let end = match self.run_rounds().await {
            Ok(end) => end,
            Err(e) => {
                warn!(backend = %self.backend.name(), error = %e, "Chat turn failed");
                self.history.truncate(turn_start);
                return Err(e);
            }
        };

        let keeps_exchanges = self.backend.keeps_tool_exchanges();
        if !keeps_exchanges {
            self.history.truncate(turn_start + 1);
        }

        let text = match end {
            TurnEnd::Answer(text) => {
                self.history.push(ChatTurn::assistant_text(text.clone()));
                text
            }
            TurnEnd::LimitReached => {
                warn!(
                    backend = %self.backend.name(),
                    limit = MAX_TOOL_ROUND_TRIPS,
                    "Tool-call limit reached"
                );
                let text = self.backend.iteration_limit_message();
                if keeps_exchanges {
                    self.history.push(ChatTurn::assistant_text(text.clone()));
                }
                text
            }
        };

        info!(
            backend = %self.backend.name(),
            history = self.history.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Chat turn complete"
        );

        Ok(text)
    }

    async fn run_rounds(&mut self) -> Result<TurnEnd> {
        for round in 1..=MAX_TOOL_ROUND_TRIPS {
            let reply = self
                .backend
                .complete(&self.history, self.dispatcher.registry())
                .await?;

            if !reply.has_tool_calls() {
                let text = reply
                    .text
                    .as_deref()
                    .map(|t| self.backend.finalize_text(t))
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| EMPTY_REPLY_MESSAGE.to_string());
                return Ok(TurnEnd::Answer(text));
            }

            debug!(round, calls = reply.tool_calls.len(), "Backend requested tool calls");

            let calls = reply.tool_calls.clone();
            self.history.push(ChatTurn::Assistant {
                text: reply.text,
                tool_calls: reply.tool_calls,
            });

            for call in calls {
                let result = self.dispatcher.dispatch(&call).await;
                info!(tool = %call.name, success = result.is_success(), round, "Tool executed");
                self.history.push(ChatTurn::ToolResult {
                    name: call.name,
                    result,
                });
            }
        }

        Ok(TurnEnd::LimitReached)
    }
}
