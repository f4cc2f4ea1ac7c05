//! Alpaca REST gateway
//!
//! Trading API (account, positions, orders) plus the Market Data API
//! (quotes, bars, news). Uses a long-lived reqwest::Client for connection pooling.

use super::BrokerageGateway;
use crate::config::AlpacaConfig;
use crate::error::PortfolioError;
use crate::models::{
    Account, Bar, NewsArticle, Order, OrderSide, OrderStatusFilter, Position, Quote, Timeframe,
};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, warn};
use uuid::Uuid;

const PAPER_TRADING_URL: &str = "https://paper-api.alpaca.markets";
const LIVE_TRADING_URL: &str = "https://api.alpaca.markets";
const MARKET_DATA_URL: &str = "https://data.alpaca.markets";

pub struct AlpacaGateway {
    client: Client,
    api_key: String,
    secret_key: String,
    trading_url: Url,
    data_url: Url,
}

impl AlpacaGateway {
    pub fn new(config: &AlpacaConfig) -> Result<Self> {
        let trading_url = if config.paper {
            PAPER_TRADING_URL
        } else {
            LIVE_TRADING_URL
        };
        Self::with_urls(config, trading_url, MARKET_DATA_URL)
    }

    /// Point the gateway at custom endpoints (proxies, local fakes).
    pub fn with_urls(config: &AlpacaConfig, trading_url: &str, data_url: &str) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            trading_url: parse_base(trading_url)?,
            data_url: parse_base(data_url)?,
        })
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.secret_key)
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder, what: &str) -> Result<T> {
        let response = builder.send().await.map_err(|e| {
            PortfolioError::Brokerage(format!("request for {} failed: {}", what, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PortfolioError::Brokerage(format!(
                "{} returned {}: {}",
                what, status, body
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| PortfolioError::Brokerage(format!("invalid JSON for {}: {}", what, e)))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        base: &Url,
        segments: &[&str],
        query: &[(&str, String)],
        what: &str,
    ) -> Result<T> {
        let url = endpoint(base, segments)?;
        self.send_json(self.request(Method::GET, url).query(query), what)
            .await
    }

    /// Every order carries a fresh `client_order_id`.
    async fn submit_order(&self, mut body: Value) -> Result<Order> {
        body["client_order_id"] = json!(Uuid::new_v4().to_string());
        let url = endpoint(&self.trading_url, &["v2", "orders"])?;
        let raw: RawOrder = self
            .send_json(self.request(Method::POST, url).json(&body), "submit order")
            .await?;
        Ok(raw.into_order())
    }

    async fn fetch_all_bars(&self, symbol: &str, days: u32, timeframe: Timeframe) -> Result<Vec<Bar>> {
        let url = endpoint(&self.data_url, &["v2", "stocks", symbol, "bars"])?;
        let start = start_of_window(days);
        let mut bars = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("timeframe", timeframe.as_str().to_string()),
                ("start", start.clone()),
                ("limit", "10000".to_string()),
            ];
            if let Some(token) = &page_token {
                query.push(("page_token", token.clone()));
            }

            let page: RawBarsPage = self
                .send_json(self.request(Method::GET, url.clone()).query(&query), "bars")
                .await?;

            bars.extend(page.bars.unwrap_or_default().into_iter().map(RawBar::into_bar));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(bars)
    }
}

/// Parse a base URL once so request paths can be appended segment by segment.
fn parse_base(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| PortfolioError::Config(format!("invalid Alpaca URL '{}': {}", raw, e)))?;
    if url.cannot_be_a_base() {
        return Err(PortfolioError::Config(format!(
            "Alpaca URL '{}' cannot carry a path",
            raw
        )));
    }
    Ok(url)
}

/// Append path segments to `base`, percent-encoding each one.
///
/// Empty and dot segments are refused: the URL parser would drop them and
/// the request would land on the parent collection.
fn endpoint(base: &Url, segments: &[&str]) -> Result<Url> {
    if let Some(bad) = segments
        .iter()
        .find(|s| s.is_empty() || **s == "." || **s == "..")
    {
        return Err(PortfolioError::Brokerage(format!(
            "refusing path segment '{}'",
            bad
        )));
    }

    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| PortfolioError::Brokerage(format!("{} cannot carry a path", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Log a gateway failure and convert it into the "not available" signal.
fn unavailable<T>(operation: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            error!(operation, error = %e, "Brokerage call failed");
            None
        }
    }
}

fn start_of_window(days: u32) -> String {
    (Utc::now() - ChronoDuration::days(i64::from(days))).to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl BrokerageGateway for AlpacaGateway {
    async fn account(&self) -> Option<Account> {
        let result = self
            .get_json::<RawAccount>(&self.trading_url, &["v2", "account"], &[], "account")
            .await
            .map(RawAccount::into_account);
        unavailable("account", result)
    }

    async fn positions(&self) -> Option<Vec<Position>> {
        let result = self
            .get_json::<Vec<RawPosition>>(&self.trading_url, &["v2", "positions"], &[], "positions")
            .await
            .map(|raw| raw.into_iter().map(RawPosition::into_position).collect());
        unavailable("positions", result)
    }

    async fn position(&self, symbol: &str) -> Option<Position> {
        let result = self
            .get_json::<RawPosition>(&self.trading_url, &["v2", "positions", symbol], &[], "position")
            .await
            .map(RawPosition::into_position);
        unavailable("position", result)
    }

    async fn place_market_order(&self, symbol: &str, qty: f64, side: OrderSide) -> Option<Order> {
        debug!(symbol, qty, side = side.as_str(), "Submitting market order");
        let body = json!({
            "symbol": symbol,
            "qty": qty.to_string(),
            "side": side.as_str(),
            "type": "market",
            "time_in_force": "day",
        });
        unavailable("place_market_order", self.submit_order(body).await)
    }

    async fn place_limit_order(
        &self,
        symbol: &str,
        qty: f64,
        side: OrderSide,
        limit_price: f64,
    ) -> Option<Order> {
        debug!(symbol, qty, limit_price, side = side.as_str(), "Submitting limit order");
        let body = json!({
            "symbol": symbol,
            "qty": qty.to_string(),
            "side": side.as_str(),
            "type": "limit",
            "time_in_force": "day",
            "limit_price": limit_price.to_string(),
        });
        unavailable("place_limit_order", self.submit_order(body).await)
    }

    async fn orders(&self, status: OrderStatusFilter) -> Option<Vec<Order>> {
        let query = [("status", status.as_str().to_string())];
        let result = self
            .get_json::<Vec<RawOrder>>(&self.trading_url, &["v2", "orders"], &query, "orders")
            .await
            .map(|raw| raw.into_iter().map(RawOrder::into_order).collect());
        unavailable("orders", result)
    }

    async fn cancel_order(&self, order_id: &str) -> bool {
        let url = match endpoint(&self.trading_url, &["v2", "orders", order_id]) {
            Ok(url) => url,
            Err(e) => {
                error!(order_id, error = %e, "Order cancellation refused");
                return false;
            }
        };
        match self.request(Method::DELETE, url).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(order_id, status = %response.status(), "Order cancellation rejected");
                false
            }
            Err(e) => {
                error!(order_id, error = %e, "Order cancellation failed");
                false
            }
        }
    }

    async fn latest_quote(&self, symbol: &str) -> Option<Quote> {
        let segments = ["v2", "stocks", symbol, "quotes", "latest"];
        let result = self
            .get_json::<RawLatestQuote>(&self.data_url, &segments, &[], "latest quote")
            .await
            .map(|raw| raw.quote.into_quote(symbol));
        unavailable("latest_quote", result)
    }

    async fn bars(&self, symbol: &str, days: u32, timeframe: Timeframe) -> Option<Vec<Bar>> {
        unavailable("bars", self.fetch_all_bars(symbol, days, timeframe).await)
    }

    async fn news(&self, symbols: &[String], days: u32, limit: u32) -> Option<Vec<NewsArticle>> {
        let query = [
            ("symbols", symbols.join(",")),
            ("start", start_of_window(days)),
            ("limit", limit.to_string()),
        ];
        let result = self
            .get_json::<RawNewsPage>(&self.data_url, &["v1beta1", "news"], &query, "news")
            .await
            .map(|page| page.news.into_iter().map(RawArticle::into_article).collect());
        unavailable("news", result)
    }
}

//
// ================= Wire Formats =================
//

/// Alpaca encodes most numbers as strings; tolerate both.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireNumber {
    Text(String),
    Number(f64),
}

impl WireNumber {
    fn value(&self) -> f64 {
        match self {
            WireNumber::Text(s) => s.trim().parse().unwrap_or(0.0),
            WireNumber::Number(n) => *n,
        }
    }
}

fn num(raw: &Option<WireNumber>) -> f64 {
    raw.as_ref().map(WireNumber::value).unwrap_or(0.0)
}

#[derive(Debug, Deserialize)]
struct RawAccount {
    cash: Option<WireNumber>,
    portfolio_value: Option<WireNumber>,
    buying_power: Option<WireNumber>,
    equity: Option<WireNumber>,
}

impl RawAccount {
    fn into_account(self) -> Account {
        Account {
            cash: num(&self.cash),
            portfolio_value: num(&self.portfolio_value),
            buying_power: num(&self.buying_power),
            equity: num(&self.equity),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawPosition {
    symbol: String,
    qty: Option<WireNumber>,
    market_value: Option<WireNumber>,
    avg_entry_price: Option<WireNumber>,
    current_price: Option<WireNumber>,
    unrealized_pl: Option<WireNumber>,
    unrealized_plpc: Option<WireNumber>,
}

impl RawPosition {
    fn into_position(self) -> Position {
        Position {
            qty: num(&self.qty),
            market_value: num(&self.market_value),
            avg_entry_price: num(&self.avg_entry_price),
            current_price: num(&self.current_price),
            unrealized_pl: num(&self.unrealized_pl),
            unrealized_plpc: num(&self.unrealized_plpc),
            symbol: self.symbol,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawOrder {
    id: String,
    symbol: String,
    qty: Option<WireNumber>,
    side: String,
    #[serde(rename = "type")]
    order_type: String,
    limit_price: Option<WireNumber>,
    status: String,
    created_at: Option<DateTime<Utc>>,
}

impl RawOrder {
    fn into_order(self) -> Order {
        Order {
            qty: num(&self.qty),
            limit_price: self.limit_price.as_ref().map(WireNumber::value),
            id: self.id,
            symbol: self.symbol,
            side: self.side,
            order_type: self.order_type,
            status: self.status,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawLatestQuote {
    quote: RawQuote,
}

#[derive(Debug, Deserialize)]
struct RawQuote {
    #[serde(rename = "t")]
    timestamp: DateTime<Utc>,
    #[serde(rename = "bp")]
    bid_price: f64,
    #[serde(rename = "ap")]
    ask_price: f64,
    #[serde(rename = "bs")]
    bid_size: f64,
    #[serde(rename = "as")]
    ask_size: f64,
}

impl RawQuote {
    fn into_quote(self, symbol: &str) -> Quote {
        Quote {
            symbol: symbol.to_string(),
            bid_price: self.bid_price,
            ask_price: self.ask_price,
            bid_size: self.bid_size,
            ask_size: self.ask_size,
            timestamp: self.timestamp,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawBarsPage {
    bars: Option<Vec<RawBar>>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawBar {
    t: DateTime<Utc>,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
}

impl RawBar {
    fn into_bar(self) -> Bar {
        Bar {
            timestamp: self.t,
            open: self.o,
            high: self.h,
            low: self.l,
            close: self.c,
            volume: self.v,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawNewsPage {
    #[serde(default)]
    news: Vec<RawArticle>,
}

#[derive(Debug, Deserialize)]
struct RawArticle {
    headline: Option<String>,
    summary: Option<String>,
    author: Option<String>,
    url: Option<String>,
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    symbols: Vec<String>,
}

impl RawArticle {
    fn into_article(self) -> NewsArticle {
        NewsArticle {
            headline: self
                .headline
                .filter(|h| !h.is_empty())
                .unwrap_or_else(|| "No headline".to_string()),
            summary: self.summary.unwrap_or_default(),
            author: self
                .author
                .filter(|a| !a.is_empty())
                .unwrap_or_else(|| "Unknown".to_string()),
            url: self.url.unwrap_or_default(),
            created_at: self.created_at,
            symbols: self.symbols,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_position_parses_string_numbers() {
        let raw: RawPosition = serde_json::from_str(
            r#"{
                "symbol": "AAPL",
                "qty": "10",
                "market_value": "2687.15",
                "avg_entry_price": "247.90",
                "current_price": "268.715",
                "unrealized_pl": "208.15",
                "unrealized_plpc": "0.0839",
                "asset_class": "us_equity"
            }"#,
        )
        .unwrap();

        let position = raw.into_position();
        assert_eq!(position.symbol, "AAPL");
        assert_eq!(position.qty, 10.0);
        assert!((position.unrealized_plpc - 0.0839).abs() < 1e-9);
    }

    #[test]
    fn test_order_parses_alpaca_payload() {
        let raw: RawOrder = serde_json::from_str(
            r#"{
                "id": "61e69015-8549-4bfd-b9c3-01e75843f47d",
                "symbol": "AAPL",
                "qty": "10",
                "side": "buy",
                "type": "limit",
                "limit_price": "150.5",
                "status": "accepted",
                "created_at": "2024-03-01T14:30:00.123456Z"
            }"#,
        )
        .unwrap();

        let order = raw.into_order();
        assert_eq!(order.qty, 10.0);
        assert_eq!(order.order_type, "limit");
        assert_eq!(order.limit_price, Some(150.5));
        assert!(order.created_at.is_some());
    }

    #[test]
    fn test_quote_and_article_defaults() {
        let raw: RawLatestQuote = serde_json::from_str(
            r#"{"symbol":"MSFT","quote":{"t":"2024-03-01T14:30:00Z","ap":410.2,"as":2,"bp":410.1,"bs":3,"c":["R"]}}"#,
        )
        .unwrap();
        let quote = raw.quote.into_quote("MSFT");
        assert_eq!(quote.ask_price, 410.2);
        assert_eq!(quote.bid_size, 3.0);

        let article: RawArticle =
            serde_json::from_str(r#"{"headline":"","symbols":["AAPL"]}"#).unwrap();
        let article = article.into_article();
        assert_eq!(article.headline, "No headline");
        assert_eq!(article.author, "Unknown");
        assert!(article.created_at.is_none());
    }

    #[test]
    fn test_gateway_urls_follow_paper_flag() {
        let config = AlpacaConfig {
            api_key: "k".into(),
            secret_key: "s".into(),
            paper: true,
        };
        let gateway = AlpacaGateway::new(&config).unwrap();
        assert_eq!(gateway.trading_url.as_str(), "https://paper-api.alpaca.markets/");

        let live = AlpacaGateway::new(&AlpacaConfig { paper: false, ..config }).unwrap();
        assert_eq!(live.trading_url.as_str(), "https://api.alpaca.markets/");
    }

    #[test]
    fn test_path_segments_are_encoded() {
        let base = parse_base("https://paper-api.alpaca.markets").unwrap();

        let url = endpoint(&base, &["v2", "orders", "../positions"]).unwrap();
        assert_eq!(url.path(), "/v2/orders/..%2Fpositions");

        let url = endpoint(&base, &["v2", "stocks", "BRK.B", "bars"]).unwrap();
        assert_eq!(url.path(), "/v2/stocks/BRK.B/bars");

        let proxied = parse_base("http://127.0.0.1:8080/alpaca/").unwrap();
        let url = endpoint(&proxied, &["v2", "account"]).unwrap();
        assert_eq!(url.path(), "/alpaca/v2/account");
    }

    #[test]
    fn test_dot_and_empty_segments_are_refused() {
        let base = parse_base("https://paper-api.alpaca.markets").unwrap();
        for bad in ["..", ".", ""] {
            assert!(endpoint(&base, &["v2", "orders", bad]).is_err(), "{:?}", bad);
        }
        assert!(parse_base("not a url").is_err());
    }

    /// Accept one connection, answer 404 and return the request line.
    async fn capture_request_line(listener: TcpListener) -> String {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        let n = socket.read(&mut buf).await.unwrap();
        socket
            .write_all(b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
            .await
            .unwrap();
        String::from_utf8_lossy(&buf[..n])
            .lines()
            .next()
            .unwrap_or_default()
            .to_string()
    }

    #[tokio::test]
    async fn test_cancel_cannot_escape_orders_collection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(capture_request_line(listener));

        let config = AlpacaConfig {
            api_key: "k".into(),
            secret_key: "s".into(),
            paper: true,
        };
        let gateway = AlpacaGateway::with_urls(&config, &base, &base).unwrap();

        assert!(!gateway.cancel_order("../positions").await);
        let request_line = server.await.unwrap();
        assert_eq!(request_line, "DELETE /v2/orders/..%2Fpositions HTTP/1.1");
    }
}
