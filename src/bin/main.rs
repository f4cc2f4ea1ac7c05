use colored::Colorize;
use portfolio_manager::{
    agent::Conversation,
    backend::{GeminiBackend, OllamaBackend},
    config::{AppConfig, BackendKind},
    dispatch::FunctionDispatcher,
    gateway::{AlpacaGateway, BrokerageGateway},
    news::NewsReporter,
    session::{SessionController, SessionOutcome},
    tools::create_default_registry,
};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so chat output stays readable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    info!(backend = %config.backend, paper = config.alpaca.paper, "AI Portfolio Manager starting");
    println!("{}", "Initializing API clients...".yellow());

    let gateway: Arc<dyn BrokerageGateway> = Arc::new(AlpacaGateway::new(&config.alpaca)?);
    let registry = Arc::new(create_default_registry());
    let dispatcher = Arc::new(FunctionDispatcher::new(registry, Arc::clone(&gateway)));

    let local = || -> portfolio_manager::Result<Conversation> {
        let backend = OllamaBackend::new(&config.ollama)?;
        Ok(Conversation::new(Box::new(backend), Arc::clone(&dispatcher)))
    };

    let (active, fallback) = match config.backend {
        BackendKind::Ollama => {
            println!("{}", "Using Ollama (local LLM) backend".cyan());
            (local()?, None)
        }
        BackendKind::Gemini => {
            println!("{}", "Using Gemini API backend".cyan());
            let api_key = config.gemini_api_key.clone().unwrap_or_default();
            match GeminiBackend::new(api_key, config.gemini_model.clone()) {
                Ok(backend) => (
                    Conversation::new(Box::new(backend), Arc::clone(&dispatcher)),
                    Some(local()?),
                ),
                Err(e) => {
                    warn!(error = %e, "Gemini backend could not be created");
                    println!("{}", format!("Gemini initialization failed: {}", e).yellow());
                    println!("{}", "Falling back to Ollama backend...".cyan());
                    (local()?, None)
                }
            }
        }
    };

    let news = NewsReporter::new(Arc::clone(&gateway), config.data_dir.clone());
    let mut session = SessionController::new(config.limits.clone(), active, fallback, news);

    print_banner(config.alpaca.paper);
    print_portfolio_summary(gateway.as_ref()).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("{} ", "You:".bold().cyan());
        std::io::stdout().flush()?;

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                println!("\n{}\n", "Goodbye! Happy trading!".cyan());
                break;
            }
            Err(e) => {
                eprintln!("{}", format!("Error reading input: {}", e).red());
                break;
            }
        };

        match session.handle_input(&line).await {
            SessionOutcome::Ignored => continue,
            SessionOutcome::Exit => {
                println!("\n{}\n", "Goodbye! Happy trading!".cyan());
                break;
            }
            SessionOutcome::Reply {
                text,
                fallback_notice,
            } => {
                if let Some(notice) = fallback_notice {
                    println!("{}", notice.yellow());
                }
                println!("{} {}\n", "AI:".bold().green(), text);
            }
            SessionOutcome::Warning(message) => println!("{}\n", message.yellow()),
            SessionOutcome::Info(message) => println!("\n{}\n", message.yellow()),
            SessionOutcome::News(update) => {
                println!();
                for (symbol, count) in &update.counts {
                    let plural = if *count == 1 { "" } else { "s" };
                    println!("✓ {} - {} article{}", symbol, count, plural);
                }
                println!(
                    "\n{}\n",
                    format!("Saved to: {}", update.saved_to.display()).green()
                );
            }
            SessionOutcome::Error(message) => println!("{}\n", message.red()),
        }
    }

    Ok(())
}

fn print_banner(paper: bool) {
    let rule = "═".repeat(48);
    let mode = if paper { "Paper Trading" } else { "Live Trading" };

    println!("{}", rule.cyan());
    println!("{}", "AI Portfolio Manager".bold().cyan());
    println!("{}", format!("Connected to Alpaca ({})", mode).green());
    println!();
    println!(
        "Commands: {}, {}, {}, {}",
        "'update news'".yellow(),
        "'report'".yellow(),
        "'reset'".yellow(),
        "'exit'".yellow()
    );
    println!("{}", rule.cyan());
}

async fn print_portfolio_summary(gateway: &dyn BrokerageGateway) {
    match gateway.account().await {
        Some(account) => {
            println!(
                "\nPortfolio Value: {}",
                format_money(account.portfolio_value).bold().green()
            );
            println!("Cash Available: {}\n", format_money(account.cash).bold().cyan());
        }
        None => println!("{}\n", "Could not retrieve portfolio summary".red()),
    }
}

/// `$1,234.56` style amount.
fn format_money(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if amount < 0.0 { "-" } else { "" };
    format!("{}${}.{:02}", sign, grouped, cents % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_money() {
        assert_eq!(format_money(0.0), "$0.00");
        assert_eq!(format_money(7520.987), "$7,520.99");
        assert_eq!(format_money(1234567.5), "$1,234,567.50");
        assert_eq!(format_money(-42.1), "-$42.10");
    }
}
