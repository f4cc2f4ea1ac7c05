//! Function dispatcher
//!
//! Turns a backend's tool call into exactly one brokerage operation and
//! wraps the outcome in a [`ToolResult`]. Validation happens here, before
//! the gateway is touched. Nothing escapes as an error: every failure
//! becomes a `{success: false, error}` envelope the backend can read.

use crate::analysis;
use crate::error::PortfolioError;
use crate::gateway::{BrokerageGateway, DEFAULT_NEWS_LIMIT};
use crate::models::{OrderSide, OrderStatusFilter, Timeframe, ToolArgs, ToolCall, ToolResult};
use crate::news;
use crate::tools::ToolRegistry;
use crate::Result;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

const DEFAULT_BAR_DAYS: u32 = 30;
const DEFAULT_NEWS_DAYS: u32 = 7;
const DEFAULT_PERFORMER_LIMIT: u32 = 5;
const DEFAULT_CONCENTRATION_PCT: f64 = 20.0;

lazy_static! {
    /// Equity tickers, share classes included (`BRK.B`).
    static ref SYMBOL: Regex = Regex::new(r"^[A-Z0-9][A-Z0-9.]{0,14}$").expect("static pattern");
}

/// Routes validated tool calls to the brokerage gateway
pub struct FunctionDispatcher {
    registry: Arc<ToolRegistry>,
    gateway: Arc<dyn BrokerageGateway>,
}

impl FunctionDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, gateway: Arc<dyn BrokerageGateway>) -> Self {
        Self { registry, gateway }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Execute one tool call. Never fails; errors are reported in the envelope.
    pub async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        if !self.registry.contains(&call.name) {
            warn!(tool = %call.name, "Backend requested an unknown function");
            return ToolResult::failure(format!("Unknown function: {}", call.name));
        }

        let start = Instant::now();

        let result = match self.execute(&call.name, &call.args).await {
            Ok(result) => result,
            Err(PortfolioError::InvalidToolInput(detail)) => {
                ToolResult::failure(format!("Invalid argument: {}", detail))
            }
            Err(e) => ToolResult::failure(format!("Function execution error: {}", e)),
        };

        debug!(
            tool = %call.name,
            success = result.is_success(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Dispatched tool call"
        );

        if let Some(error) = result.error() {
            debug!(tool = %call.name, error = %error, "Tool call failed");
        }

        result
    }

    async fn execute(&self, name: &str, args: &ToolArgs) -> Result<ToolResult> {
        let gateway = &self.gateway;

        let result = match name {
            // -------------------------------------------------
            // Account & positions
            // -------------------------------------------------
            "get_account_info" => match gateway.account().await {
                Some(account) => ToolResult::success(&account),
                None => ToolResult::failure("Could not retrieve account info"),
            },

            "get_all_positions" => {
                ToolResult::success(&gateway.positions().await.unwrap_or_default())
            }

            "get_position" => {
                let symbol = symbol_arg(args, "symbol")?;
                if symbol.is_empty() {
                    return Ok(ToolResult::failure("Symbol is required"));
                }
                match gateway.position(&symbol).await {
                    Some(position) => ToolResult::success(&position),
                    None => ToolResult::failure(format!("No position found for {}", symbol)),
                }
            }

            // -------------------------------------------------
            // Market data
            // -------------------------------------------------
            "get_stock_quote" => {
                let symbol = symbol_arg(args, "symbol")?;
                if symbol.is_empty() {
                    return Ok(ToolResult::failure("Symbol is required"));
                }
                match gateway.latest_quote(&symbol).await {
                    Some(quote) => ToolResult::success(&quote),
                    None => ToolResult::failure(format!("Could not retrieve quote for {}", symbol)),
                }
            }

            "get_stock_bars" => {
                let symbol = symbol_arg(args, "symbol")?;
                if symbol.is_empty() {
                    return Ok(ToolResult::failure("Symbol is required"));
                }
                let days = count_arg(args, "days", DEFAULT_BAR_DAYS)?;
                let timeframe = Timeframe::parse(&text_arg(args, "timeframe", "1Day"));
                let bars = gateway.bars(&symbol, days, timeframe).await;
                ToolResult::success(&bars.unwrap_or_default())
            }

            // -------------------------------------------------
            // Trading
            // -------------------------------------------------
            "place_market_order" => {
                let symbol = symbol_arg(args, "symbol")?;
                let qty = number_arg(args, "qty", 0.0)?;
                if symbol.is_empty() || qty <= 0.0 {
                    return Ok(ToolResult::failure("Valid symbol and quantity required"));
                }
                let side = match side_arg(args) {
                    Some(side) => side,
                    None => return Ok(invalid_side()),
                };
                match gateway.place_market_order(&symbol, qty, side).await {
                    Some(order) => ToolResult::success(&order),
                    None => ToolResult::failure("Failed to place order"),
                }
            }

            "place_limit_order" => {
                let symbol = symbol_arg(args, "symbol")?;
                let qty = number_arg(args, "qty", 0.0)?;
                let limit_price = number_arg(args, "limit_price", 0.0)?;
                if symbol.is_empty() || qty <= 0.0 || limit_price <= 0.0 {
                    return Ok(ToolResult::failure(
                        "Valid symbol, quantity, and limit price required",
                    ));
                }
                let side = match side_arg(args) {
                    Some(side) => side,
                    None => return Ok(invalid_side()),
                };
                match gateway.place_limit_order(&symbol, qty, side, limit_price).await {
                    Some(order) => ToolResult::success(&order),
                    None => ToolResult::failure("Failed to place limit order"),
                }
            }

            "get_orders" => {
                let status = OrderStatusFilter::parse(&text_arg(args, "status", "all"));
                ToolResult::success(&gateway.orders(status).await.unwrap_or_default())
            }

            "cancel_order" => {
                let raw_id = text_arg(args, "order_id", "");
                if raw_id.is_empty() {
                    return Ok(ToolResult::failure("Order ID is required"));
                }
                let order_id = Uuid::parse_str(&raw_id)
                    .map_err(|_| {
                        PortfolioError::InvalidToolInput(format!(
                            "order ID '{}' is not a valid UUID",
                            raw_id
                        ))
                    })?
                    .hyphenated()
                    .to_string();
                if gateway.cancel_order(&order_id).await {
                    ToolResult::Success(json!({ "order_id": order_id, "cancelled": true }))
                } else {
                    ToolResult::failure(format!("Failed to cancel order {}", order_id))
                }
            }

            // -------------------------------------------------
            // News
            // -------------------------------------------------
            "get_stock_news" => {
                let symbols = symbols_arg(args, "symbols")?;
                if symbols.is_empty() {
                    return Ok(ToolResult::failure("At least one symbol is required"));
                }
                let days = count_arg(args, "days", DEFAULT_NEWS_DAYS)?;
                let articles = gateway
                    .news(&symbols, days, DEFAULT_NEWS_LIMIT)
                    .await
                    .unwrap_or_default();
                ToolResult::success(&news::group_by_symbol(&symbols, articles))
            }

            // -------------------------------------------------
            // Analysis
            // -------------------------------------------------
            "get_portfolio_summary" => {
                let account = gateway.account().await;
                let positions = gateway.positions().await.unwrap_or_default();
                match analysis::portfolio_summary(account, positions) {
                    Some(summary) => ToolResult::success(&summary),
                    None => ToolResult::failure("Could not retrieve portfolio summary"),
                }
            }

            "get_best_performers" => {
                let limit = count_arg(args, "limit", DEFAULT_PERFORMER_LIMIT)? as usize;
                let positions = gateway.positions().await.unwrap_or_default();
                ToolResult::success(&analysis::best_performers(positions, limit))
            }

            "get_worst_performers" => {
                let limit = count_arg(args, "limit", DEFAULT_PERFORMER_LIMIT)? as usize;
                let positions = gateway.positions().await.unwrap_or_default();
                ToolResult::success(&analysis::worst_performers(positions, limit))
            }

            "get_position_allocation" => {
                let account = gateway.account().await;
                let positions = gateway.positions().await.unwrap_or_default();
                ToolResult::success(&analysis::position_allocation(account.as_ref(), &positions))
            }

            "get_total_return" => match gateway.positions().await {
                Some(positions) => ToolResult::success(&analysis::total_return(&positions)),
                None => ToolResult::failure("Could not calculate total return"),
            },

            "get_largest_position" => {
                let positions = gateway.positions().await.unwrap_or_default();
                match analysis::largest_position(&positions) {
                    Some(position) => ToolResult::success(&position),
                    None => ToolResult::failure("No positions found"),
                }
            }

            "get_smallest_position" => {
                let positions = gateway.positions().await.unwrap_or_default();
                match analysis::smallest_position(&positions) {
                    Some(position) => ToolResult::success(&position),
                    None => ToolResult::failure("No positions found"),
                }
            }

            "get_concentrated_positions" => {
                let threshold = number_arg(args, "threshold_pct", DEFAULT_CONCENTRATION_PCT)?;
                let account = gateway.account().await;
                let positions = gateway.positions().await.unwrap_or_default();
                let allocations = analysis::position_allocation(account.as_ref(), &positions);
                ToolResult::success(&analysis::concentrated_positions(allocations, threshold))
            }

            "get_sector_allocation" => {
                ToolResult::failure("Sector allocation is not yet implemented.")
            }

            // -------------------------------------------------
            // Calculations
            // -------------------------------------------------
            "calculate_dollar_amount" => {
                let symbol = symbol_arg(args, "symbol")?;
                let dollar_amount = number_arg(args, "dollar_amount", 0.0)?;
                if symbol.is_empty() || dollar_amount <= 0.0 {
                    return Ok(ToolResult::failure("Valid symbol and dollar amount required"));
                }
                let estimate = gateway
                    .latest_quote(&symbol)
                    .await
                    .and_then(|quote| analysis::shares_for_dollars(&quote, dollar_amount));
                match estimate {
                    Some(estimate) => ToolResult::success(&estimate),
                    None => ToolResult::failure(format!("Could not calculate shares for {}", symbol)),
                }
            }

            // Registered but not routed here.
            other => return Err(PortfolioError::ToolNotFound(other.to_string())),
        };

        Ok(result)
    }
}

fn invalid_side() -> ToolResult {
    ToolResult::failure("Side must be 'buy' or 'sell'")
}

//
// ================= Argument Coercion =================
//

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Free-form string argument, trimmed. Missing or null falls back to `default`.
fn text_arg(args: &ToolArgs, key: &str, default: &str) -> String {
    args.get(key)
        .and_then(scalar_text)
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| default.to_string())
}

fn checked_symbol(symbol: String) -> Result<String> {
    if symbol.is_empty() || SYMBOL.is_match(&symbol) {
        Ok(symbol)
    } else {
        Err(PortfolioError::InvalidToolInput(format!(
            "'{}' is not a valid ticker symbol",
            symbol
        )))
    }
}

/// Ticker argument, trimmed and upper-cased. Missing yields an empty string.
fn symbol_arg(args: &ToolArgs, key: &str) -> Result<String> {
    checked_symbol(text_arg(args, key, "").to_uppercase())
}

/// One symbol or a list of symbols, normalized with blanks dropped.
fn symbols_arg(args: &ToolArgs, key: &str) -> Result<Vec<String>> {
    let raw: Vec<String> = match args.get(key) {
        Some(Value::Array(items)) => items.iter().filter_map(scalar_text).collect(),
        Some(value) => scalar_text(value).into_iter().collect(),
        None => Vec::new(),
    };

    raw.into_iter()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .map(checked_symbol)
        .collect()
}

fn side_arg(args: &ToolArgs) -> Option<OrderSide> {
    OrderSide::parse(&text_arg(args, "side", ""))
}

/// Numeric argument; numeric strings are accepted.
fn number_arg(args: &ToolArgs, key: &str, default: f64) -> Result<f64> {
    let value = match args.get(key) {
        None | Some(Value::Null) => return Ok(default),
        Some(value) => value,
    };

    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match number {
        Some(n) if n.is_finite() => Ok(n),
        _ => Err(PortfolioError::InvalidToolInput(format!(
            "could not convert {} to a number for '{}'",
            value, key
        ))),
    }
}

/// Non-negative whole-number argument; fractional values are truncated.
fn count_arg(args: &ToolArgs, key: &str, default: u32) -> Result<u32> {
    let n = number_arg(args, key, default as f64)?;
    if n < 0.0 {
        return Err(PortfolioError::InvalidToolInput(format!(
            "'{}' must not be negative (got {})",
            key, n
        )));
    }
    Ok(n.trunc().min(u32::MAX as f64) as u32)
}
