//! Ollama backend
//!
//! Local conversation backend over the Ollama chat API. The model cannot
//! call functions natively, so the system prompt asks it to emit a
//! single-line `{"function": ..., "args": {...}}` object and the reply
//! text is scanned for one. Final text is scrubbed of markdown since
//! local models ignore formatting instructions more often.

use super::{BackendReply, ChatTurn, ConversationBackend, ASSISTANT_ROLE};
use crate::config::OllamaConfig;
use crate::error::PortfolioError;
use crate::models::ToolCall;
use crate::tools::ToolRegistry;
use crate::Result;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, warn};

const LIVENESS_TIMEOUT: Duration = Duration::from_secs(2);
const CHAT_TIMEOUT: Duration = Duration::from_secs(30);

const NOT_RUNNING: &str =
    "Ollama is not running. Please start Ollama with 'ollama serve' and ensure the model is installed.";
const CANNOT_CONNECT: &str =
    "Cannot connect to Ollama. Please ensure Ollama is running with 'ollama serve'.";

const LIMIT_MESSAGE: &str = "I've reached my function calling limit (Ollama can handle 2-3 steps at a time). \
I need you to break this into smaller tasks:

Example workflow:
1. First ask: 'Get news on my stocks and tell me which have bad news'
2. Then ask: 'Sell half my shares in [STOCK]'
3. Then ask: 'Buy equal parts SCHD and TLT with the proceeds'

Or set AI_BACKEND=gemini for complex multi-step tasks.";

const CALLING_RULES: &str = r#"CRITICAL FUNCTION CALLING RULES - READ CAREFULLY:
1. You have DIRECT ACCESS to data through functions - USE THEM IMMEDIATELY
2. NEVER ask the user for information you can get yourself (positions, quotes, news, etc.)
3. When you need data, you MUST use function calling format
4. NEVER output code blocks showing function calls
5. After getting function results, use the ACTUAL RESULT DATA in your response
6. The user ONLY sees your final text response - not the function calls

FUNCTION CALLING FORMAT:
When you need to call a function, output ONLY this JSON format on a single line:
{"function": "function_name", "args": {"arg1": "value1", "arg2": "value2"}}

If no args needed, use empty object:
{"function": "get_all_positions", "args": {}}

EXAMPLES:
To get positions: {"function": "get_all_positions", "args": {}}
To get news: {"function": "get_stock_news", "args": {"symbols": ["AAPL", "TSLA"], "days": 7}}
To get quote: {"function": "get_stock_quote", "args": {"symbol": "AAPL"}}

MULTI-STEP TASKS:
You can handle 2-3 function calls per request. For bigger tasks, do the first 2-3 steps, report what you found, and ask the user to confirm before continuing. Always wait for confirmation before executing trades.

RESPONSE FORMATTING RULES - CRITICAL:
1. DO NOT use markdown syntax (NEVER use *, **, #, ##, etc.)
2. DO NOT output code blocks (NEVER use ```)
3. DO NOT show the user the JSON function call syntax
4. Use line breaks, 2-4 space indentation and simple "-" bullets
5. Format money: $1,234.56 and percentages: 12.5% or +8.4%
6. Keep responses concise (2-4 sentences for simple queries)"#;

lazy_static! {
    static ref CODE_BLOCK: Regex = Regex::new(r"(?s)```[a-z]*\n.*?```").expect("static pattern");
    static ref JSON_CALL: Regex =
        Regex::new(r#"\{"function":\s*"[^"]+",\s*"args":\s*\{[^}]*\}\}"#).expect("static pattern");
    static ref BOLD: Regex = Regex::new(r"\*\*(.*?)\*\*").expect("static pattern");
    static ref ITALIC_STAR: Regex = Regex::new(r"\*([^*\n]+)\*").expect("static pattern");
    static ref ITALIC_UNDERSCORE: Regex = Regex::new(r"\b_([^_\n]+)_\b").expect("static pattern");
    static ref HEADER: Regex = Regex::new(r"(?m)^#+\s+").expect("static pattern");
    static ref INLINE_CODE: Regex = Regex::new(r"`([^`]+)`").expect("static pattern");
    static ref BLANK_RUN: Regex = Regex::new(r"\n\s*\n\s*\n").expect("static pattern");
}

/// Prompt-engineered local backend
pub struct OllamaBackend {
    client: Client,
    model: String,
    base_url: String,
}

impl OllamaBackend {
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            client,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn messages(&self, history: &[ChatTurn], tools: &ToolRegistry) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::new("system", system_prompt(tools)));

        for turn in history {
            let message = match turn {
                ChatTurn::User(text) => ChatMessage::new("user", text.clone()),
                ChatTurn::Assistant { text, .. } => {
                    ChatMessage::new("assistant", text.clone().unwrap_or_default())
                }
                ChatTurn::ToolResult { result, .. } => {
                    ChatMessage::new("user", format!("Function result: {}", result))
                }
            };
            messages.push(message);
        }

        messages
    }
}

#[async_trait]
impl ConversationBackend for OllamaBackend {
    fn name(&self) -> &str {
        "Ollama"
    }

    async fn check_available(&self) -> Result<()> {
        let probe = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(LIVENESS_TIMEOUT)
            .send()
            .await;

        match probe {
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) => {
                warn!(status = %response.status(), "Ollama liveness check failed");
                Err(PortfolioError::BackendUnavailable(NOT_RUNNING.to_string()))
            }
            Err(e) => {
                warn!("Ollama liveness check failed: {}", e);
                Err(PortfolioError::BackendUnavailable(NOT_RUNNING.to_string()))
            }
        }
    }

    async fn complete(&self, history: &[ChatTurn], tools: &ToolRegistry) -> Result<BackendReply> {
        let request = ChatRequest {
            model: &self.model,
            messages: self.messages(history, tools),
            stream: false,
        };

        debug!(model = %self.model, turns = history.len(), "Calling Ollama chat API");

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .timeout(CHAT_TIMEOUT)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Ollama request failed: {}", e);
                if e.is_connect() {
                    PortfolioError::BackendUnavailable(CANNOT_CONNECT.to_string())
                } else {
                    PortfolioError::Backend(format!("Ollama request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            error!(status = %status, "Ollama API returned an error status");
            return Err(PortfolioError::Backend(format!(
                "Error calling Ollama API: {}",
                status.as_u16()
            )));
        }

        let body: ChatResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Ollama response: {}", e);
            PortfolioError::Backend(format!("Ollama parse error: {}", e))
        })?;

        let content = body.message.content;
        let tool_calls: Vec<ToolCall> = parse_function_call(&content).into_iter().collect();

        Ok(BackendReply {
            text: Some(content),
            tool_calls,
        })
    }

    fn finalize_text(&self, text: &str) -> String {
        clean_response(text)
    }

    fn keeps_tool_exchanges(&self) -> bool {
        false
    }

    fn iteration_limit_message(&self) -> String {
        LIMIT_MESSAGE.to_string()
    }
}

fn system_prompt(tools: &ToolRegistry) -> String {
    format!(
        "{}\n\n{}\n\nAVAILABLE FUNCTIONS - YOU MUST USE THESE:\n{}\n\nALWAYS start by getting positions with get_all_positions if the user asks about \"my stocks\".",
        ASSISTANT_ROLE,
        CALLING_RULES,
        tools.prompt_catalog()
    )
}

/// Find the first line shaped like `{"function": name, "args": {...}}`.
///
/// Lines that fail to parse are skipped; no call found means plain text.
pub fn parse_function_call(text: &str) -> Option<ToolCall> {
    text.lines()
        .map(str::trim)
        .filter(|line| line.starts_with('{') && line.contains("\"function\""))
        .find_map(|line| {
            let value: Value = serde_json::from_str(line).ok()?;
            let name = value.get("function")?.as_str()?;
            let args = value.get("args").cloned().unwrap_or(Value::Null);
            Some(ToolCall::new(name, args))
        })
}

/// Strip markdown, leaked call syntax and fenced code from a final answer.
pub fn clean_response(text: &str) -> String {
    let text = CODE_BLOCK.replace_all(text, "");
    let text = JSON_CALL.replace_all(&text, "");
    let text = BOLD.replace_all(&text, "$1");
    let text = ITALIC_STAR.replace_all(&text, "$1");
    let text = ITALIC_UNDERSCORE.replace_all(&text, "$1");
    let text = HEADER.replace_all(&text, "");
    let text = INLINE_CODE.replace_all(&text, "$1");
    let text = BLANK_RUN.replace_all(&text, "\n\n");
    text.trim().to_string()
}

//
// ================= Wire Types =================
//

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: String,
}

impl ChatMessage {
    fn new(role: &str, content: String) -> Self {
        Self {
            role: role.to_string(),
            content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ToolResult;
    use crate::tools::create_default_registry;
    use serde_json::json;

    fn backend() -> OllamaBackend {
        OllamaBackend::new(&OllamaConfig {
            model: "llama3.1".to_string(),
            base_url: "http://localhost:11434/".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_parse_function_call() {
        let text = "Let me check.\n{\"function\": \"get_stock_quote\", \"args\": {\"symbol\": \"AAPL\"}}\n";
        let call = parse_function_call(text).unwrap();
        assert_eq!(call.name, "get_stock_quote");
        assert_eq!(call.args["symbol"], "AAPL");

        let call = parse_function_call("{\"function\": \"get_all_positions\"}").unwrap();
        assert!(call.args.is_empty());
    }

    #[test]
    fn test_malformed_call_is_plain_text() {
        assert!(parse_function_call("{\"function\": \"get_all_positions\", \"args\": {").is_none());
        assert!(parse_function_call("You own 10 shares of AAPL.").is_none());
        assert!(parse_function_call("{\"name\": \"x\"}").is_none());

        let text = "{\"function\": broken\n{\"function\": \"get_orders\", \"args\": {}}";
        assert_eq!(parse_function_call(text).unwrap().name, "get_orders");
    }

    #[test]
    fn test_clean_response() {
        let raw = "## Summary\n**AAPL** is up *8.4%* today.\n\n\n\nUse `get_all_positions` \
                   for more.\n```json\n{\"a\": 1}\n```\n{\"function\": \"get_orders\", \"args\": {}}";
        let cleaned = clean_response(raw);

        assert!(cleaned.starts_with("Summary\nAAPL is up 8.4% today."));
        assert!(cleaned.contains("Use get_all_positions for more."));
        assert!(!cleaned.contains("```"));
        assert!(!cleaned.contains("\"function\""));
        assert!(!cleaned.contains("\n\n\n"));
    }

    #[test]
    fn test_underscore_italics_keep_identifiers() {
        assert_eq!(clean_response("this is _really_ fine"), "this is really fine");
        assert_eq!(clean_response("call get_stock_quote now"), "call get_stock_quote now");
    }

    #[test]
    fn test_message_mapping() {
        let backend = backend();
        let history = vec![
            ChatTurn::User("What do I own?".to_string()),
            ChatTurn::Assistant {
                text: Some("{\"function\": \"get_all_positions\", \"args\": {}}".to_string()),
                tool_calls: vec![ToolCall::new("get_all_positions", json!({}))],
            },
            ChatTurn::ToolResult {
                name: "get_all_positions".to_string(),
                result: ToolResult::Success(json!([])),
            },
        ];

        let messages = backend.messages(&history, &create_default_registry());
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("- get_stock_news:"));
        assert_eq!(messages[2].role, "assistant");
        assert_eq!(messages[3].role, "user");
        assert_eq!(
            messages[3].content,
            "Function result: {\"success\":true,\"data\":[]}"
        );
        assert_eq!(backend.base_url, "http://localhost:11434");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let backend = OllamaBackend::new(&OllamaConfig {
            model: "llama3.1".to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
        })
        .unwrap();

        let err = backend.check_available().await.unwrap_err();
        assert_eq!(
            err.user_message(),
            "Error: Ollama is not running. Please start Ollama with 'ollama serve' and ensure the model is installed."
        );
    }
}
