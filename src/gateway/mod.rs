//! Brokerage gateway
//!
//! Translates typed requests into calls against the external brokerage.
//! Implementations never return errors: failures are logged and reported
//! as `None` (the "not available" signal). No retries, no caching.

use crate::models::{
    Account, Bar, NewsArticle, Order, OrderSide, OrderStatusFilter, Position, Quote, Timeframe,
};
use async_trait::async_trait;

pub mod alpaca;
pub use alpaca::AlpacaGateway;

/// Default maximum number of news articles fetched per request
pub const DEFAULT_NEWS_LIMIT: u32 = 50;

#[async_trait]
pub trait BrokerageGateway: Send + Sync {
    async fn account(&self) -> Option<Account>;

    async fn positions(&self) -> Option<Vec<Position>>;

    async fn position(&self, symbol: &str) -> Option<Position>;

    async fn place_market_order(&self, symbol: &str, qty: f64, side: OrderSide) -> Option<Order>;

    async fn place_limit_order(
        &self,
        symbol: &str,
        qty: f64,
        side: OrderSide,
        limit_price: f64,
    ) -> Option<Order>;

    async fn orders(&self, status: OrderStatusFilter) -> Option<Vec<Order>>;

    /// Returns `true` when the brokerage accepted the cancellation.
    async fn cancel_order(&self, order_id: &str) -> bool;

    async fn latest_quote(&self, symbol: &str) -> Option<Quote>;

    async fn bars(&self, symbol: &str, days: u32, timeframe: Timeframe) -> Option<Vec<Bar>>;

    async fn news(&self, symbols: &[String], days: u32, limit: u32) -> Option<Vec<NewsArticle>>;
}
