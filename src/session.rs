//! Session controller
//!
//! Owns the per-session limits, the control commands and the choice of
//! active backend. It does no terminal I/O itself: every input maps to a
//! [`SessionOutcome`] that the binary renders.

use crate::agent::Conversation;
use crate::config::SessionLimits;
use crate::news::NewsReporter;
use chrono::Utc;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const RATE_WINDOW: Duration = Duration::from_secs(60);
const NEWS_DAYS: u32 = 7;

/// Rolling-window message counter.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    max_messages: usize,
    stamps: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(max_messages: usize, window: Duration) -> Self {
        Self {
            window,
            max_messages,
            stamps: VecDeque::with_capacity(max_messages),
        }
    }

    pub fn per_minute(max_messages: usize) -> Self {
        Self::new(max_messages, RATE_WINDOW)
    }

    /// Drop stamps older than the window, then accept and record `now`
    /// if there is room. A rejected message is not recorded.
    pub fn check_and_record(&mut self, now: Instant) -> bool {
        let window = self.window;
        self.stamps
            .retain(|stamp| now.saturating_duration_since(*stamp) < window);

        if self.stamps.len() >= self.max_messages {
            return false;
        }
        self.stamps.push_back(now);
        true
    }
}

/// Inputs handled without the AI loop. They never count toward limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Exit,
    UpdateNews,
    Report,
    Reset,
}

impl Command {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "exit" => Some(Command::Exit),
            "update news" => Some(Command::UpdateNews),
            "report" => Some(Command::Report),
            "reset" => Some(Command::Reset),
            _ => None,
        }
    }
}

/// Result of a news refresh
#[derive(Debug, Clone)]
pub struct NewsUpdate {
    pub counts: Vec<(String, usize)>,
    pub saved_to: PathBuf,
}

#[derive(Debug, Clone)]
pub enum SessionOutcome {
    /// Blank input.
    Ignored,
    Exit,
    Reply {
        text: String,
        /// Set when the turn was moved to the fallback backend.
        fallback_notice: Option<String>,
    },
    /// Input refused by a limit; state unchanged.
    Warning(String),
    Info(String),
    News(NewsUpdate),
    Error(String),
}

pub struct SessionController {
    limits: SessionLimits,
    active: Conversation,
    fallback: Option<Conversation>,
    news: NewsReporter,
    turn_count: usize,
    rate_limiter: RateLimiter,
}

impl SessionController {
    pub fn new(
        limits: SessionLimits,
        active: Conversation,
        fallback: Option<Conversation>,
        news: NewsReporter,
    ) -> Self {
        let rate_limiter = RateLimiter::per_minute(limits.max_messages_per_minute);
        Self {
            limits,
            active,
            fallback,
            news,
            turn_count: 0,
            rate_limiter,
        }
    }

    pub fn active_backend(&self) -> &str {
        self.active.backend_name()
    }

    pub fn turn_count(&self) -> usize {
        self.turn_count
    }

    pub async fn handle_input(&mut self, input: &str) -> SessionOutcome {
        self.handle_input_at(input, Instant::now()).await
    }

    /// Same as [`handle_input`](Self::handle_input) with an explicit clock.
    pub async fn handle_input_at(&mut self, input: &str, now: Instant) -> SessionOutcome {
        let input = input.trim();
        if input.is_empty() {
            return SessionOutcome::Ignored;
        }

        let length = input.chars().count();
        if length > self.limits.max_input_chars {
            return SessionOutcome::Warning(format!(
                "Input too long! Maximum {} characters allowed. Your input: {} characters.",
                self.limits.max_input_chars, length
            ));
        }

        if let Some(command) = Command::parse(input) {
            return self.run_command(command).await;
        }

        if self.turn_count >= self.limits.max_turns {
            return SessionOutcome::Warning(format!(
                "Maximum conversation limit reached ({} turns). Please restart the application to continue.\nType 'exit' to quit.",
                self.limits.max_turns
            ));
        }

        if !self.rate_limiter.check_and_record(now) {
            warn!(limit = self.limits.max_messages_per_minute, "Message rate limit hit");
            return SessionOutcome::Warning(format!(
                "Rate limit reached! Maximum {} messages per minute. Please wait a moment.",
                self.limits.max_messages_per_minute
            ));
        }

        self.turn_count += 1;
        self.chat(input).await
    }

    async fn chat(&mut self, input: &str) -> SessionOutcome {
        let error = match self.active.try_chat(input).await {
            Ok(text) => {
                return SessionOutcome::Reply {
                    text,
                    fallback_notice: None,
                }
            }
            Err(e) => e,
        };

        if !error.is_quota() {
            return SessionOutcome::Reply {
                text: error.user_message(),
                fallback_notice: None,
            };
        }

        let Some(fallback) = self.fallback.take() else {
            return SessionOutcome::Reply {
                text: error.user_message(),
                fallback_notice: None,
            };
        };

        let notice = format!(
            "{} API quota exhausted. Switching to {}...",
            self.active.backend_name(),
            fallback.backend_name()
        );
        warn!(
            from = %self.active.backend_name(),
            to = %fallback.backend_name(),
            error = %error,
            "Switching conversation backend"
        );

        self.active = fallback;
        let text = self.active.chat(input).await;

        SessionOutcome::Reply {
            text,
            fallback_notice: Some(notice),
        }
    }

    async fn run_command(&mut self, command: Command) -> SessionOutcome {
        match command {
            Command::Exit => SessionOutcome::Exit,
            Command::Report => SessionOutcome::Info("Report generation coming soon!".to_string()),
            Command::Reset => {
                self.active.reset();
                SessionOutcome::Info("Conversation history cleared.".to_string())
            }
            Command::UpdateNews => self.update_news().await,
        }
    }

    async fn update_news(&self) -> SessionOutcome {
        let news = self.news.fetch_portfolio_news(NEWS_DAYS).await;
        if news.is_empty() {
            return SessionOutcome::Warning("No positions found or no news available".to_string());
        }

        let counts: Vec<(String, usize)> = news
            .iter()
            .map(|(symbol, articles)| (symbol.clone(), articles.len()))
            .collect();

        match self.news.write_reports(&news, Utc::now()) {
            Ok(paths) => {
                info!(symbols = counts.len(), "News refreshed");
                SessionOutcome::News(NewsUpdate {
                    counts,
                    saved_to: paths.markdown,
                })
            }
            Err(e) => SessionOutcome::Error(format!("Error updating news: {}", e)),
        }
    }
}
