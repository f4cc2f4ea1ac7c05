//! Core data models for the portfolio manager
//!
//! Brokerage records are read-only projections fetched fresh on every
//! request. Anything handed to an LLM backend or written to disk goes
//! through [`to_neutral`] first.

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Loosely typed value that can cross any serialization boundary.
pub type NeutralValue = Value;

/// Argument mapping supplied by a backend with a tool call.
pub type ToolArgs = Map<String, Value>;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "buy" => Some(OrderSide::Buy),
            "sell" => Some(OrderSide::Sell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatusFilter {
    Open,
    Closed,
    All,
}

impl OrderStatusFilter {
    /// Unrecognised filters fall back to `All`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "open" => OrderStatusFilter::Open,
            "closed" => OrderStatusFilter::Closed,
            _ => OrderStatusFilter::All,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatusFilter::Open => "open",
            OrderStatusFilter::Closed => "closed",
            OrderStatusFilter::All => "all",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Timeframe {
    #[serde(rename = "1Day")]
    OneDay,
    #[serde(rename = "1Hour")]
    OneHour,
}

impl Timeframe {
    /// Unrecognised timeframes fall back to daily bars.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "1Hour" => Timeframe::OneHour,
            _ => Timeframe::OneDay,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::OneDay => "1Day",
            Timeframe::OneHour => "1Hour",
        }
    }
}

//
// ================= Brokerage Records =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub cash: f64,
    pub portfolio_value: f64,
    pub buying_power: f64,
    pub equity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub qty: f64,
    pub market_value: f64,
    pub avg_entry_price: f64,
    pub current_price: f64,
    pub unrealized_pl: f64,
    /// Unrealized P/L as a fraction (0.084 == +8.4%)
    pub unrealized_plpc: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: String,
    pub symbol: String,
    pub qty: f64,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<f64>,
    pub status: String,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quote {
    pub symbol: String,
    pub bid_price: f64,
    pub ask_price: f64,
    pub bid_size: f64,
    pub ask_size: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewsArticle {
    pub headline: String,
    pub summary: String,
    pub author: String,
    pub url: String,
    pub created_at: Option<DateTime<Utc>>,
    pub symbols: Vec<String>,
}

//
// ================= Derived Records =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioSummary {
    pub cash: f64,
    pub portfolio_value: f64,
    pub equity: f64,
    pub buying_power: f64,
    pub positions: Vec<Position>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Allocation {
    pub symbol: String,
    pub market_value: f64,
    pub allocation_pct: f64,
    pub qty: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TotalReturn {
    pub total_unrealized_pl: f64,
    pub total_market_value: f64,
    pub total_cost_basis: f64,
    pub total_return_pct: f64,
    pub position_count: usize,
    pub winning_positions: usize,
    pub losing_positions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SharesEstimate {
    pub symbol: String,
    pub dollar_amount: f64,
    pub ask_price: f64,
    pub shares: f64,
    pub whole_shares: u64,
    pub estimated_cost: f64,
    pub estimated_cost_whole: f64,
}

//
// ================= Tool I/O =================
//

/// A backend's request to run one registry operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub args: ToolArgs,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        let args = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            name: name.into(),
            args,
        }
    }
}

/// Uniform dispatch envelope: `{success: true, data}` or `{success: false, error}`.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    Success(NeutralValue),
    Failure(String),
}

impl ToolResult {
    pub fn success<T: Serialize>(data: &T) -> Self {
        ToolResult::Success(to_neutral(data))
    }

    pub fn failure(message: impl Into<String>) -> Self {
        ToolResult::Failure(message.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolResult::Success(_))
    }

    pub fn data(&self) -> Option<&NeutralValue> {
        match self {
            ToolResult::Success(data) => Some(data),
            ToolResult::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ToolResult::Success(_) => None,
            ToolResult::Failure(message) => Some(message),
        }
    }

    pub fn to_value(&self) -> Value {
        to_neutral(self)
    }
}

impl Serialize for ToolResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        match self {
            ToolResult::Success(data) => {
                map.serialize_entry("success", &true)?;
                map.serialize_entry("data", data)?;
            }
            ToolResult::Failure(error) => {
                map.serialize_entry("success", &false)?;
                map.serialize_entry("error", error)?;
            }
        }
        map.end()
    }
}

impl fmt::Display for ToolResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

/// Convert any typed record into the neutral value form.
///
/// Timestamps serialize as RFC 3339 strings and non-finite floats become
/// `null`, so the result is always representable as JSON.
pub fn to_neutral<T: Serialize + ?Sized>(value: &T) -> NeutralValue {
    match serde_json::to_value(value) {
        Ok(v) => v,
        Err(e) => Value::String(format!("<unserializable: {}>", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_tool_result_envelope() {
        let ok = ToolResult::success(&json!({"symbol": "AAPL"}));
        assert_eq!(ok.to_value(), json!({"success": true, "data": {"symbol": "AAPL"}}));

        let err = ToolResult::failure("Symbol is required");
        assert_eq!(
            err.to_value(),
            json!({"success": false, "error": "Symbol is required"})
        );
    }

    #[test]
    fn test_timestamps_become_iso_strings() {
        let quote = Quote {
            symbol: "AAPL".to_string(),
            bid_price: 1.0,
            ask_price: 2.0,
            bid_size: 3.0,
            ask_size: 4.0,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap(),
        };

        let value = to_neutral(&quote);
        assert_eq!(value["timestamp"], json!("2024-03-01T14:30:00Z"));
    }

    #[test]
    fn test_non_finite_numbers_are_null() {
        let value = to_neutral(&json!({"x": 1}));
        assert_eq!(value["x"], json!(1));

        let position = Position {
            symbol: "X".into(),
            qty: f64::NAN,
            market_value: 1.0,
            avg_entry_price: 1.0,
            current_price: 1.0,
            unrealized_pl: 0.0,
            unrealized_plpc: f64::INFINITY,
        };
        let value = to_neutral(&position);
        assert!(value["qty"].is_null());
        assert!(value["unrealized_plpc"].is_null());
    }

    #[test]
    fn test_order_type_field_name() {
        let order = Order {
            id: "1".into(),
            symbol: "AAPL".into(),
            qty: 10.0,
            side: "buy".into(),
            order_type: "market".into(),
            limit_price: None,
            status: "accepted".into(),
            created_at: None,
        };
        let value = to_neutral(&order);
        assert_eq!(value["type"], json!("market"));
        assert!(value.get("limit_price").is_none());
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!(OrderSide::parse(" BUY "), Some(OrderSide::Buy));
        assert_eq!(OrderSide::parse("short"), None);
        assert_eq!(OrderStatusFilter::parse("weird"), OrderStatusFilter::All);
        assert_eq!(Timeframe::parse("5Min"), Timeframe::OneDay);
        assert_eq!(Timeframe::parse("1Hour").as_str(), "1Hour");
    }
}
