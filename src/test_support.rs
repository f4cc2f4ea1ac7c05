//! Test doubles for the brokerage gateway and LLM backends.
//!
//! `MockGateway` serves canned records and records every call it receives.
//! `ScriptedBackend` replays a fixed queue of replies and counts how many
//! times the conversation loop asked it for one.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::backend::{BackendReply, ChatTurn, ConversationBackend};
use crate::error::PortfolioError;
use crate::gateway::BrokerageGateway;
use crate::models::{
    Account, Bar, NewsArticle, Order, OrderSide, OrderStatusFilter, Position, Quote, Timeframe,
};
use crate::tools::ToolRegistry;
use crate::Result;

/// Gateway serving canned data. Anything left unset is "not available".
#[derive(Default)]
pub struct MockGateway {
    account: Option<Account>,
    positions: Option<Vec<Position>>,
    quotes: HashMap<String, Quote>,
    orders: Option<Vec<Order>>,
    articles: Option<Vec<NewsArticle>>,
    bars: Option<Vec<Bar>>,
    accept_cancels: bool,
    requests: Mutex<Vec<String>>,
}

impl MockGateway {
    pub fn with_account(mut self, account: Account) -> Self {
        self.account = Some(account);
        self
    }

    pub fn with_positions(mut self, positions: Vec<Position>) -> Self {
        self.positions = Some(positions);
        self
    }

    pub fn with_quote(mut self, symbol: &str, bid: f64, ask: f64) -> Self {
        self.quotes.insert(
            symbol.to_string(),
            Quote {
                symbol: symbol.to_string(),
                bid_price: bid,
                ask_price: ask,
                bid_size: 100.0,
                ask_size: 100.0,
                timestamp: Utc::now(),
            },
        );
        self
    }

    pub fn with_orders(mut self, orders: Vec<Order>) -> Self {
        self.orders = Some(orders);
        self
    }

    pub fn with_articles(mut self, articles: Vec<NewsArticle>) -> Self {
        self.articles = Some(articles);
        self
    }

    pub fn with_bars(mut self, bars: Vec<Bar>) -> Self {
        self.bars = Some(bars);
        self
    }

    pub fn accepting_cancels(mut self, accept: bool) -> Self {
        self.accept_cancels = accept;
        self
    }

    /// Every gateway call so far, as `operation:arg:...` strings.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn record(&self, request: String) {
        self.requests.lock().unwrap().push(request);
    }

    fn order(symbol: &str, qty: f64, side: OrderSide, limit_price: Option<f64>) -> Order {
        Order {
            id: "order-1".to_string(),
            symbol: symbol.to_string(),
            qty,
            side: side.as_str().to_string(),
            order_type: if limit_price.is_some() { "limit" } else { "market" }.to_string(),
            limit_price,
            status: "accepted".to_string(),
            created_at: Some(Utc::now()),
        }
    }
}

#[async_trait]
impl BrokerageGateway for MockGateway {
    async fn account(&self) -> Option<Account> {
        self.record("account".to_string());
        self.account.clone()
    }

    async fn positions(&self) -> Option<Vec<Position>> {
        self.record("positions".to_string());
        self.positions.clone()
    }

    async fn position(&self, symbol: &str) -> Option<Position> {
        self.record(format!("position:{}", symbol));
        self.positions
            .as_ref()?
            .iter()
            .find(|p| p.symbol == symbol)
            .cloned()
    }

    async fn place_market_order(&self, symbol: &str, qty: f64, side: OrderSide) -> Option<Order> {
        self.record(format!("market_order:{}:{}:{}", symbol, qty, side.as_str()));
        Some(Self::order(symbol, qty, side, None))
    }

    async fn place_limit_order(
        &self,
        symbol: &str,
        qty: f64,
        side: OrderSide,
        limit_price: f64,
    ) -> Option<Order> {
        self.record(format!(
            "limit_order:{}:{}:{}:{}",
            symbol,
            qty,
            side.as_str(),
            limit_price
        ));
        Some(Self::order(symbol, qty, side, Some(limit_price)))
    }

    async fn orders(&self, status: OrderStatusFilter) -> Option<Vec<Order>> {
        self.record(format!("orders:{}", status.as_str()));
        self.orders.clone()
    }

    async fn cancel_order(&self, order_id: &str) -> bool {
        self.record(format!("cancel:{}", order_id));
        self.accept_cancels
    }

    async fn latest_quote(&self, symbol: &str) -> Option<Quote> {
        self.record(format!("quote:{}", symbol));
        self.quotes.get(symbol).cloned()
    }

    async fn bars(&self, symbol: &str, days: u32, timeframe: Timeframe) -> Option<Vec<Bar>> {
        self.record(format!("bars:{}:{}:{}", symbol, days, timeframe.as_str()));
        self.bars.clone()
    }

    async fn news(&self, symbols: &[String], days: u32, limit: u32) -> Option<Vec<NewsArticle>> {
        self.record(format!("news:{}:{}:{}", symbols.join(","), days, limit));
        self.articles.clone()
    }
}

/// Shared view of a [`ScriptedBackend`] that survives boxing it.
#[derive(Clone, Default)]
pub struct ScriptProbe {
    calls: Arc<AtomicUsize>,
    histories: Arc<Mutex<Vec<Vec<ChatTurn>>>>,
}

impl ScriptProbe {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The history passed on each `complete` call, oldest first.
    pub fn histories(&self) -> Vec<Vec<ChatTurn>> {
        self.histories.lock().unwrap().clone()
    }
}

/// Backend that replays queued replies in order.
pub struct ScriptedBackend {
    name: String,
    replies: Mutex<VecDeque<Result<BackendReply>>>,
    keeps_tool_exchanges: bool,
    unavailable: Option<String>,
    probe: ScriptProbe,
}

impl ScriptedBackend {
    pub fn new(name: &str, replies: Vec<Result<BackendReply>>) -> Self {
        Self {
            name: name.to_string(),
            replies: Mutex::new(replies.into()),
            keeps_tool_exchanges: true,
            unavailable: None,
            probe: ScriptProbe::default(),
        }
    }

    /// Behave like a prompt-engineered backend that compacts its history.
    pub fn compacting(mut self) -> Self {
        self.keeps_tool_exchanges = false;
        self
    }

    pub fn unavailable(mut self, message: &str) -> Self {
        self.unavailable = Some(message.to_string());
        self
    }

    pub fn probe(&self) -> ScriptProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl ConversationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check_available(&self) -> Result<()> {
        match &self.unavailable {
            Some(message) => Err(PortfolioError::BackendUnavailable(message.clone())),
            None => Ok(()),
        }
    }

    async fn complete(&self, history: &[ChatTurn], _tools: &ToolRegistry) -> Result<BackendReply> {
        self.probe.calls.fetch_add(1, Ordering::SeqCst);
        self.probe.histories.lock().unwrap().push(history.to_vec());

        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(PortfolioError::Backend("script exhausted".to_string())))
    }

    fn keeps_tool_exchanges(&self) -> bool {
        self.keeps_tool_exchanges
    }
}
