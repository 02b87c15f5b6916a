// Exchange adapter capability interface and shared market-data types

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::types::{OrderSide, OrderStatus};
use crate::error::TradingResult;

pub mod kraken;
pub mod mock;

pub use kraken::KrakenAdapter;
pub use mock::MockExchange;

#[derive(Debug, Clone, PartialEq)]
pub struct DepthLevel {
    pub price: f64,
    pub volume: f64,
}

/// Order book snapshot: bids best-first, asks best-first
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Depth {
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
}

impl Depth {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|l| l.price)
    }

    pub fn mid_price(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => None,
        }
    }

    /// Quoted spread in basis points of the mid price
    pub fn spread_bps(&self) -> Option<f64> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        let mid = (bid + ask) / 2.0;
        if mid <= 0.0 {
            return None;
        }
        Some((ask - bid) / mid * 10_000.0)
    }

    /// Total volume resting on the touch level of the given side
    pub fn touch_volume(&self, side: OrderSide) -> f64 {
        let levels = match side {
            OrderSide::Buy => &self.bids,
            OrderSide::Sell => &self.asks,
        };
        levels.first().map(|l| l.volume).unwrap_or(0.0)
    }
}

#[derive(Debug, Clone)]
pub struct MarketInfo {
    pub price_decimals: u32,
    pub qty_decimals: u32,
    pub min_qty: f64,
    pub step_size: f64,
}

impl MarketInfo {
    pub fn round_price(&self, price: f64) -> f64 {
        let factor = 10f64.powi(self.price_decimals as i32);
        (price * factor).round() / factor
    }

    pub fn round_qty(&self, qty: f64) -> f64 {
        if self.step_size > 0.0 {
            (qty / self.step_size).floor() * self.step_size
        } else {
            let factor = 10f64.powi(self.qty_decimals as i32);
            (qty * factor).floor() / factor
        }
    }
}

/// Exchange acknowledgment of an order placement
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub id: String,
}

/// One open order as reported by the exchange's open-orders listing
#[derive(Debug, Clone)]
pub struct OpenOrderInfo {
    pub order_id: String,
    pub side: OrderSide,
    pub price: f64,
    pub quantity: f64,
    pub age_secs: f64,
}

/// Trade-execution confirmation from the user stream
#[derive(Debug, Clone)]
pub struct FillEvent {
    pub order_id: String,
    pub symbol: String,
    pub status: OrderStatus,
    pub side: OrderSide,
    pub price: f64,
    pub quantity: f64,
}

/// Events pushed by the adapter into the engine's stream channel
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Book { symbol: String, depth: Depth },
    Fill(FillEvent),
}

/// Capability interface over a single exchange.
///
/// The adapter owns its credentials; callers never pass them per-request.
/// `place_order` with `price: None` submits an immediate-or-cancel market
/// order, with `Some(price)` a resting limit order.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Start the streaming connection, pushing events into the given channel
    async fn connect_stream(&self, events: mpsc::UnboundedSender<StreamEvent>)
        -> TradingResult<()>;

    async fn subscribe_orderbook(&self, symbols: &[String]) -> TradingResult<()>;

    async fn subscribe_user_trades(&self, symbols: &[String]) -> TradingResult<()>;

    async fn get_depth(&self, symbol: &str) -> TradingResult<Depth>;

    async fn get_market_info(&self, symbol: &str) -> TradingResult<MarketInfo>;

    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        price: Option<f64>,
        quantity: f64,
    ) -> TradingResult<OrderAck>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> TradingResult<()>;

    async fn cancel_all_open_orders(&self, symbol: &str) -> TradingResult<()>;

    /// Live status of a single order; Ok(None) means the exchange does not
    /// know the order (or it is no longer open)
    async fn get_open_order(&self, symbol: &str, order_id: &str)
        -> TradingResult<Option<OrderStatus>>;

    async fn list_open_orders(&self, symbol: &str) -> TradingResult<Vec<OpenOrderInfo>>;
}
