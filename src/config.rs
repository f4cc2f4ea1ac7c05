//! Startup configuration
//!
//! Everything the session needs is read once from the environment
//! (after `.env` is loaded) into an explicit [`AppConfig`].

use crate::error::PortfolioError;
use crate::Result;
use std::env;
use std::fmt;
use std::path::PathBuf;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.1";
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_DATA_DIR: &str = "data";

/// Which LLM backend drives the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Gemini,
    Ollama,
}

impl BackendKind {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "gemini" => Ok(BackendKind::Gemini),
            "ollama" => Ok(BackendKind::Ollama),
            other => Err(PortfolioError::Config(format!(
                "Unknown AI_BACKEND '{}' (expected 'gemini' or 'ollama')",
                other
            ))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackendKind::Gemini => "Gemini API",
            BackendKind::Ollama => "Ollama (local LLM)",
        };
        write!(f, "{}", s)
    }
}

/// Per-session input and rate limits
#[derive(Debug, Clone)]
pub struct SessionLimits {
    pub max_input_chars: usize,
    pub max_turns: usize,
    pub max_messages_per_minute: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_input_chars: 2000,
            max_turns: 20,
            max_messages_per_minute: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlpacaConfig {
    pub api_key: String,
    pub secret_key: String,
    pub paper: bool,
}

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub alpaca: AlpacaConfig,
    pub backend: BackendKind,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub ollama: OllamaConfig,
    pub data_dir: PathBuf,
    pub limits: SessionLimits,
}

impl AppConfig {
    /// Load `.env` (if present) and read the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_key = get("ALPACA_API_KEY");
        let secret_key = get("ALPACA_SECRET_KEY");
        let (api_key, secret_key) = match (api_key, secret_key) {
            (Some(k), Some(s)) => (k, s),
            _ => {
                return Err(PortfolioError::Config(
                    "Missing required Alpaca API keys (ALPACA_API_KEY, ALPACA_SECRET_KEY)".to_string(),
                ))
            }
        };

        let paper = match get("ALPACA_PAPER") {
            None => true,
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                PortfolioError::Config(format!("ALPACA_PAPER must be true or false, got '{}'", raw))
            })?,
        };

        let backend = match get("AI_BACKEND") {
            Some(raw) => BackendKind::parse(&raw)?,
            None => BackendKind::Gemini,
        };

        let gemini_api_key = get("GEMINI_API_KEY");
        if backend == BackendKind::Gemini && gemini_api_key.is_none() {
            return Err(PortfolioError::Config(
                "Missing GEMINI_API_KEY (required when AI_BACKEND=gemini)".to_string(),
            ));
        }

        Ok(Self {
            alpaca: AlpacaConfig {
                api_key,
                secret_key,
                paper,
            },
            backend,
            gemini_api_key,
            gemini_model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            ollama: OllamaConfig {
                model: get("OLLAMA_MODEL").unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string()),
                base_url: get("OLLAMA_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_OLLAMA_BASE_URL.to_string())
                    .trim_end_matches('/')
                    .to_string(),
            },
            data_dir: PathBuf::from(
                get("PORTFOLIO_DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()),
            ),
            limits: SessionLimits::default(),
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}
