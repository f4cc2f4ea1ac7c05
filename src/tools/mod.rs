//! Tool specs and registry
//!
//! The static catalog of brokerage operations an LLM backend may call.
//! Every backend sees the same catalog; the dispatcher uses it to reject
//! unknown names before anything reaches the gateway.

use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    StringArray,
}

impl ParamType {
    fn schema(&self) -> Value {
        match self {
            ParamType::String => json!({ "type": "string" }),
            ParamType::Integer => json!({ "type": "integer" }),
            ParamType::Number => json!({ "type": "number" }),
            ParamType::StringArray => json!({ "type": "array", "items": { "type": "string" } }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub param_type: ParamType,
    pub description: &'static str,
    pub required: bool,
    pub allowed: &'static [&'static str],
}

impl ParamSpec {
    pub const fn required(name: &'static str, param_type: ParamType, description: &'static str) -> Self {
        Self {
            name,
            param_type,
            description,
            required: true,
            allowed: &[],
        }
    }

    pub const fn optional(name: &'static str, param_type: ParamType, description: &'static str) -> Self {
        Self {
            name,
            param_type,
            description,
            required: false,
            allowed: &[],
        }
    }

    pub const fn one_of(mut self, allowed: &'static [&'static str]) -> Self {
        self.allowed = allowed;
        self
    }
}

/// One callable operation: name, description, parameter schema.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
}

impl ToolSpec {
    pub fn new(name: &'static str, description: &'static str, params: Vec<ParamSpec>) -> Self {
        Self {
            name,
            description,
            params,
        }
    }

    /// Gemini `functionDeclarations` entry. Parameter-less tools omit
    /// `parameters` entirely since an empty OBJECT schema is rejected.
    pub fn function_declaration(&self) -> Value {
        let mut declaration = json!({
            "name": self.name,
            "description": self.description,
        });

        if self.params.is_empty() {
            return declaration;
        }

        let mut properties = Map::new();
        for param in &self.params {
            let mut schema = param.param_type.schema();
            if !param.description.is_empty() {
                schema["description"] = json!(param.description);
            }
            if !param.allowed.is_empty() {
                schema["enum"] = json!(param.allowed);
            }
            properties.insert(param.name.to_string(), schema);
        }

        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name)
            .collect();

        declaration["parameters"] = json!({
            "type": "object",
            "properties": properties,
            "required": required,
        });
        declaration
    }

    /// Single prompt line, e.g. `get_stock_quote: Get current price ... (args: symbol)`
    pub fn prompt_line(&self) -> String {
        if self.params.is_empty() {
            return format!("{}: {} (NO ARGS NEEDED)", self.name, self.description);
        }
        let args: Vec<String> = self
            .params
            .iter()
            .map(|p| {
                let mut arg = p.name.to_string();
                if !p.allowed.is_empty() {
                    arg.push_str(&format!(" [{}]", p.allowed.join("|")));
                }
                if !p.required {
                    arg.push_str(" (optional)");
                }
                arg
            })
            .collect();
        format!("{}: {} (args: {})", self.name, self.description, args.join(", "))
    }
}

/// Tool registry for looking up tool specs by name
pub struct ToolRegistry {
    tools: HashMap<&'static str, Arc<ToolSpec>>,
    order: Vec<&'static str>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn register(&mut self, spec: ToolSpec) {
        if !self.tools.contains_key(spec.name) {
            self.order.push(spec.name);
        }
        self.tools.insert(spec.name, Arc::new(spec));
    }

    pub fn get(&self, name: &str) -> Option<Arc<ToolSpec>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Specs in registration order.
    pub fn list(&self) -> Vec<Arc<ToolSpec>> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn function_declarations(&self) -> Vec<Value> {
        self.list().iter().map(|t| t.function_declaration()).collect()
    }

    /// Bulleted catalog for prompt-engineered backends.
    pub fn prompt_catalog(&self) -> String {
        self.list()
            .iter()
            .map(|t| format!("- {}", t.prompt_line()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

const SIDES: &[&str] = &["buy", "sell"];
const ORDER_STATUSES: &[&str] = &["open", "closed", "all"];
const TIMEFRAMES: &[&str] = &["1Day", "1Hour"];

/// Create the default registry with every brokerage operation.
pub fn create_default_registry() -> ToolRegistry {
    use ParamType::*;

    let symbol = || ParamSpec::required("symbol", String, "Stock ticker");
    let side = || ParamSpec::required("side", String, "Order side").one_of(SIDES);
    let qty = || ParamSpec::required("qty", Number, "Number of shares");
    let limit = || ParamSpec::optional("limit", Integer, "Number of positions to return");

    let mut registry = ToolRegistry::new();

    // Account & portfolio
    registry.register(ToolSpec::new(
        "get_account_info",
        "Get account cash, portfolio value, buying power",
        vec![],
    ));
    registry.register(ToolSpec::new(
        "get_all_positions",
        "Get all current stock positions",
        vec![],
    ));
    registry.register(ToolSpec::new(
        "get_position",
        "Get details on a specific position",
        vec![symbol()],
    ));

    // Market data
    registry.register(ToolSpec::new(
        "get_stock_quote",
        "Get current price and quote for a stock",
        vec![symbol()],
    ));
    registry.register(ToolSpec::new(
        "get_stock_bars",
        "Get historical price data (default 30 days if not specified)",
        vec![
            symbol(),
            ParamSpec::optional("days", Integer, "Days of history"),
            ParamSpec::optional("timeframe", String, "Bar size").one_of(TIMEFRAMES),
        ],
    ));

    // Trading
    registry.register(ToolSpec::new(
        "place_market_order",
        "Place a market order to buy or sell stock",
        vec![symbol(), qty(), side()],
    ));
    registry.register(ToolSpec::new(
        "place_limit_order",
        "Place a limit order to buy or sell stock at a specific price",
        vec![
            symbol(),
            qty(),
            side(),
            ParamSpec::required("limit_price", Number, "Limit price"),
        ],
    ));
    registry.register(ToolSpec::new(
        "get_orders",
        "Get order history (open, closed, or all - defaults to all if not specified)",
        vec![ParamSpec::optional("status", String, "Order status filter").one_of(ORDER_STATUSES)],
    ));
    registry.register(ToolSpec::new(
        "cancel_order",
        "Cancel a pending order",
        vec![ParamSpec::required("order_id", String, "Order ID")],
    ));

    // News
    registry.register(ToolSpec::new(
        "get_stock_news",
        "Get recent news for specific stocks (default 7 days if not specified)",
        vec![
            ParamSpec::required("symbols", StringArray, "Stock ticker symbols"),
            ParamSpec::optional("days", Integer, "Days of news history"),
        ],
    ));

    // Analysis
    registry.register(ToolSpec::new(
        "get_portfolio_summary",
        "Get complete portfolio analysis with performance metrics",
        vec![],
    ));
    registry.register(ToolSpec::new(
        "get_best_performers",
        "Get top performing positions (default 5 if not specified)",
        vec![limit()],
    ));
    registry.register(ToolSpec::new(
        "get_worst_performers",
        "Get worst performing positions (default 5 if not specified)",
        vec![limit()],
    ));
    registry.register(ToolSpec::new(
        "get_position_allocation",
        "Get portfolio breakdown by position with allocation percentages",
        vec![],
    ));
    registry.register(ToolSpec::new(
        "get_total_return",
        "Get total portfolio return, P&L, and win/loss statistics",
        vec![],
    ));
    registry.register(ToolSpec::new(
        "get_largest_position",
        "Get the largest position by market value",
        vec![],
    ));
    registry.register(ToolSpec::new(
        "get_smallest_position",
        "Get the smallest position by market value",
        vec![],
    ));
    registry.register(ToolSpec::new(
        "get_concentrated_positions",
        "Get positions that exceed a percentage threshold (default 20% if not specified)",
        vec![ParamSpec::optional(
            "threshold_pct",
            Number,
            "Percentage threshold (e.g., 20.0 for 20%)",
        )],
    ));
    registry.register(ToolSpec::new(
        "get_sector_allocation",
        "Get portfolio breakdown by sector",
        vec![],
    ));

    // Calculations
    registry.register(ToolSpec::new(
        "calculate_dollar_amount",
        "Calculate shares needed for dollar amount at current price",
        vec![
            symbol(),
            ParamSpec::required("dollar_amount", Number, "Dollar amount to invest"),
        ],
    ));

    registry
}
