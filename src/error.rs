//! Error types for the portfolio manager

use thiserror::Error;

/// Result type alias for portfolio manager operations
pub type Result<T> = std::result::Result<T, PortfolioError>;

#[derive(Error, Debug)]
pub enum PortfolioError {

    // =============================
    // Startup
    // =============================

    #[error("Configuration error: {0}")]
    Config(String),

    // =============================
    // External Services
    // =============================

    #[error("Brokerage API error: {0}")]
    Brokerage(String),

    #[error("LLM backend error: {0}")]
    Backend(String),

    /// Cloud backend refused the request for quota or authorization reasons.
    #[error("LLM quota exhausted: {0}")]
    QuotaExceeded(String),

    /// Cloud backend rejected the request shape (HTTP 400).
    #[error("LLM rejected request: {0}")]
    InvalidRequest(String),

    #[error("LLM backend unavailable: {0}")]
    BackendUnavailable(String),

    // =============================
    // Tool Dispatch
    // =============================

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid tool input: {0}")]
    InvalidToolInput(String),

    #[error("Report error: {0}")]
    Report(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

const QUOTA_MARKERS: &[&str] = &[
    "quota",
    "resource_exhausted",
    "permission_denied",
    "429",
];

impl PortfolioError {
    /// Whether this error should trigger the switch from the cloud backend
    /// to the local one.
    pub fn is_quota(&self) -> bool {
        match self {
            PortfolioError::QuotaExceeded(_) => true,
            PortfolioError::Backend(message) => looks_like_quota(message),
            _ => false,
        }
    }

    /// Plain-text line shown to the user when a chat turn fails.
    pub fn user_message(&self) -> String {
        match self {
            PortfolioError::InvalidRequest(_) => "I encountered an issue processing your request. \
                Please try asking about one thing at a time, or rephrase your question."
                .to_string(),
            PortfolioError::BackendUnavailable(message) => format!("Error: {}", message),
            other => format!("Sorry, I encountered an error: {}", other),
        }
    }
}

/// Inspect a raw backend error body/message for quota or permission indicators.
pub fn looks_like_quota(message: &str) -> bool {
    let lowered = message.to_lowercase();
    QUOTA_MARKERS.iter().any(|marker| lowered.contains(marker))
}
