//! Portfolio news reports
//!
//! Fetches recent articles for every held symbol and writes two artifacts
//! to the data directory: a readable `news.md` and a `news.json` with the
//! same content. Both are regenerated wholesale on every refresh.

use crate::error::PortfolioError;
use crate::gateway::{BrokerageGateway, DEFAULT_NEWS_LIMIT};
use crate::models::NewsArticle;
use crate::Result;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Articles shown per symbol in the markdown report
const ARTICLES_PER_SYMBOL: usize = 5;

pub const MARKDOWN_FILE: &str = "news.md";
pub const JSON_FILE: &str = "news.json";

/// Articles keyed by symbol, in symbol order.
pub type NewsBySymbol = BTreeMap<String, Vec<NewsArticle>>;

/// Group articles under each requested symbol.
///
/// An article tagged with several requested symbols appears under each of
/// them; tags that were not requested are ignored. Every requested symbol
/// gets an entry, possibly empty.
pub fn group_by_symbol(symbols: &[String], articles: Vec<NewsArticle>) -> NewsBySymbol {
    let mut grouped: NewsBySymbol = symbols.iter().map(|s| (s.clone(), Vec::new())).collect();

    for article in articles {
        for tag in &article.symbols {
            if let Some(bucket) = grouped.get_mut(tag) {
                bucket.push(article.clone());
            }
        }
    }

    grouped
}

/// Human-readable age: minutes under an hour, hours under a day, then days.
pub fn format_age(hours: f64) -> String {
    fn plural(n: i64, unit: &str) -> String {
        format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" })
    }

    if hours < 1.0 {
        plural((hours * 60.0) as i64, "minute")
    } else if hours < 24.0 {
        plural(hours as i64, "hour")
    } else {
        plural((hours / 24.0) as i64, "day")
    }
}

/// Render the markdown report. Symbols without articles are skipped.
pub fn render_markdown(news: &NewsBySymbol, now: DateTime<Utc>) -> String {
    let mut lines: Vec<String> = vec![
        "# Portfolio News Cache".to_string(),
        format!(
            "**Last Updated:** {}",
            now.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        ),
        String::new(),
    ];

    for (symbol, articles) in news {
        if articles.is_empty() {
            continue;
        }

        lines.push(format!("## {} ({} Articles)", symbol, articles.len()));
        lines.push(String::new());

        for article in articles.iter().take(ARTICLES_PER_SYMBOL) {
            lines.push(format!("**{}**", article.headline));

            let source = if article.author.is_empty() {
                "Unknown"
            } else {
                article.author.as_str()
            };
            lines.push(format!("- Source: {}", source));

            let published = article.created_at.unwrap_or(now);
            let hours = (now - published).num_seconds().max(0) as f64 / 3600.0;
            lines.push(format!(
                "- Published: {} ({})",
                published.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
                format_age(hours)
            ));

            if !article.summary.is_empty() {
                lines.push(format!("- Summary: {}", article.summary));
            }
            if !article.url.is_empty() {
                lines.push(format!("- URL: {}", article.url));
            }
            lines.push(String::new());
        }

        if articles.len() > ARTICLES_PER_SYMBOL {
            lines.push(format!(
                "*...and {} more articles*",
                articles.len() - ARTICLES_PER_SYMBOL
            ));
            lines.push(String::new());
        }

        lines.push("---".to_string());
        lines.push(String::new());
    }

    lines.join("\n")
}

#[derive(Debug, Serialize)]
struct ArticleRecord<'a> {
    headline: &'a str,
    summary: &'a str,
    author: &'a str,
    url: &'a str,
    created_at: String,
    symbols: &'a [String],
}

/// Render the JSON report. Timestamps become RFC 3339 strings.
pub fn render_json(news: &NewsBySymbol) -> Result<String> {
    let records: BTreeMap<&str, Vec<ArticleRecord<'_>>> = news
        .iter()
        .map(|(symbol, articles)| {
            let rows = articles
                .iter()
                .map(|a| ArticleRecord {
                    headline: &a.headline,
                    summary: &a.summary,
                    author: &a.author,
                    url: &a.url,
                    created_at: a.created_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
                    symbols: &a.symbols,
                })
                .collect();
            (symbol.as_str(), rows)
        })
        .collect();

    Ok(serde_json::to_string_pretty(&records)?)
}

/// Paths of the artifacts written by [`NewsReporter::write_reports`].
#[derive(Debug, Clone)]
pub struct ReportPaths {
    pub markdown: PathBuf,
    pub json: PathBuf,
}

/// Fetches portfolio news and persists the reports
pub struct NewsReporter {
    gateway: Arc<dyn BrokerageGateway>,
    data_dir: PathBuf,
}

impl NewsReporter {
    pub fn new(gateway: Arc<dyn BrokerageGateway>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            gateway,
            data_dir: data_dir.into(),
        }
    }

    /// News for every held symbol. Empty when nothing is held or the
    /// brokerage is unavailable.
    pub async fn fetch_portfolio_news(&self, days: u32) -> NewsBySymbol {
        let positions = match self.gateway.positions().await {
            Some(positions) if !positions.is_empty() => positions,
            _ => return NewsBySymbol::new(),
        };

        let symbols: Vec<String> = positions.into_iter().map(|p| p.symbol).collect();

        match self.gateway.news(&symbols, days, DEFAULT_NEWS_LIMIT).await {
            Some(articles) => group_by_symbol(&symbols, articles),
            None => {
                warn!(symbols = symbols.len(), "Portfolio news unavailable");
                NewsBySymbol::new()
            }
        }
    }

    /// Write `news.md` and `news.json`, creating the data directory if needed.
    pub fn write_reports(&self, news: &NewsBySymbol, now: DateTime<Utc>) -> Result<ReportPaths> {
        fs::create_dir_all(&self.data_dir).map_err(|e| {
            PortfolioError::Report(format!(
                "could not create {}: {}",
                self.data_dir.display(),
                e
            ))
        })?;

        let paths = ReportPaths {
            markdown: self.data_dir.join(MARKDOWN_FILE),
            json: self.data_dir.join(JSON_FILE),
        };

        fs::write(&paths.markdown, render_markdown(news, now))?;
        fs::write(&paths.json, render_json(news)?)?;

        info!(
            symbols = news.len(),
            path = %paths.markdown.display(),
            "News reports written"
        );

        Ok(paths)
    }
}
