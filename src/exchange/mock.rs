// Scripted in-process exchange used by the integration suites.
//
// Behaves like a tiny matching venue front-end: hands out sequential order
// ids, remembers every placement and cancel, and lets a test script the
// replies for validation queries and failure injection.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::core::types::{OrderSide, OrderStatus};
use crate::error::{TradingError, TradingResult};

use super::{Depth, ExchangeAdapter, MarketInfo, OpenOrderInfo, OrderAck, StreamEvent};

#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Option<f64>,
    pub quantity: f64,
}

/// Scripted reply for `get_open_order`
#[derive(Debug, Clone)]
pub enum OpenOrderReply {
    Status(Option<OrderStatus>),
    Error(String),
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    placements_seen: u64,
    placed: Vec<PlacedOrder>,
    canceled: Vec<String>,
    depth: HashMap<String, Depth>,
    open_order_replies: HashMap<String, OpenOrderReply>,
    open_orders_listing: Vec<OpenOrderInfo>,
    fail_ordinals: std::collections::HashSet<u64>,
    fail_with_insufficient_funds: bool,
    fail_cancels: bool,
    subscribed_book: Vec<String>,
    subscribed_trades: Vec<String>,
}

#[derive(Default)]
pub struct MockExchange {
    state: Mutex<MockState>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_depth(&self, symbol: &str, depth: Depth) {
        self.state.lock().unwrap().depth.insert(symbol.to_string(), depth);
    }

    /// Fail the next `count` placements with OrderFailed
    pub fn fail_next_placements(&self, count: u64) {
        let mut state = self.state.lock().unwrap();
        let seen = state.placements_seen;
        for n in 1..=count {
            state.fail_ordinals.insert(seen + n);
        }
    }

    /// Fail specific placement attempts, counted from 1 across the mock's
    /// lifetime (attempt 2 of a two-leg grid is the ask leg)
    pub fn fail_placement_ordinals(&self, ordinals: &[u64]) {
        let mut state = self.state.lock().unwrap();
        state.fail_ordinals.extend(ordinals.iter().copied());
    }

    /// Fail the next placement with InsufficientFunds instead
    pub fn fail_next_with_insufficient_funds(&self) {
        let mut state = self.state.lock().unwrap();
        let next = state.placements_seen + 1;
        state.fail_ordinals.insert(next);
        state.fail_with_insufficient_funds = true;
    }

    pub fn fail_cancels(&self, fail: bool) {
        self.state.lock().unwrap().fail_cancels = fail;
    }

    /// Script the validation reply for one order id
    pub fn set_open_order_reply(&self, order_id: &str, reply: OpenOrderReply) {
        self.state
            .lock()
            .unwrap()
            .open_order_replies
            .insert(order_id.to_string(), reply);
    }

    pub fn set_open_orders_listing(&self, orders: Vec<OpenOrderInfo>) {
        self.state.lock().unwrap().open_orders_listing = orders;
    }

    pub fn placed_orders(&self) -> Vec<PlacedOrder> {
        self.state.lock().unwrap().placed.clone()
    }

    pub fn canceled_orders(&self) -> Vec<String> {
        self.state.lock().unwrap().canceled.clone()
    }

    pub fn subscriptions(&self) -> (Vec<String>, Vec<String>) {
        let state = self.state.lock().unwrap();
        (state.subscribed_book.clone(), state.subscribed_trades.clone())
    }
}

#[async_trait]
impl ExchangeAdapter for MockExchange {
    async fn connect_stream(
        &self,
        _events: mpsc::UnboundedSender<StreamEvent>,
    ) -> TradingResult<()> {
        Ok(())
    }

    async fn subscribe_orderbook(&self, symbols: &[String]) -> TradingResult<()> {
        self.state.lock().unwrap().subscribed_book.extend_from_slice(symbols);
        Ok(())
    }

    async fn subscribe_user_trades(&self, symbols: &[String]) -> TradingResult<()> {
        self.state.lock().unwrap().subscribed_trades.extend_from_slice(symbols);
        Ok(())
    }

    async fn get_depth(&self, symbol: &str) -> TradingResult<Depth> {
        self.state
            .lock()
            .unwrap()
            .depth
            .get(symbol)
            .cloned()
            .ok_or_else(|| TradingError::ApiResponse(format!("no depth for {}", symbol)))
    }

    async fn get_market_info(&self, _symbol: &str) -> TradingResult<MarketInfo> {
        Ok(MarketInfo {
            price_decimals: 5,
            qty_decimals: 8,
            min_qty: 0.0,
            step_size: 0.0,
        })
    }

    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        price: Option<f64>,
        quantity: f64,
    ) -> TradingResult<OrderAck> {
        let mut state = self.state.lock().unwrap();

        state.placements_seen += 1;
        let seen = state.placements_seen;
        if state.fail_ordinals.remove(&seen) {
            if state.fail_with_insufficient_funds {
                state.fail_with_insufficient_funds = false;
                return Err(TradingError::InsufficientFunds(quantity, 0.0));
            }
            return Err(TradingError::OrderFailed("scripted placement failure".to_string()));
        }

        state.next_id += 1;
        let id = format!("M-{}", state.next_id);
        state.placed.push(PlacedOrder {
            id: id.clone(),
            symbol: symbol.to_string(),
            side,
            price,
            quantity,
        });
        Ok(OrderAck { id })
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> TradingResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_cancels {
            return Err(TradingError::OrderFailed("scripted cancel failure".to_string()));
        }
        state.canceled.push(order_id.to_string());
        Ok(())
    }

    async fn cancel_all_open_orders(&self, symbol: &str) -> TradingResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_cancels {
            return Err(TradingError::OrderFailed("scripted cancel failure".to_string()));
        }
        let marker = format!("ALL:{}", symbol);
        state.canceled.push(marker);
        Ok(())
    }

    async fn get_open_order(
        &self,
        _symbol: &str,
        order_id: &str,
    ) -> TradingResult<Option<OrderStatus>> {
        let state = self.state.lock().unwrap();

        if let Some(reply) = state.open_order_replies.get(order_id) {
            return match reply {
                OpenOrderReply::Status(status) => Ok(*status),
                OpenOrderReply::Error(msg) => Err(TradingError::ApiTimeout(msg.clone())),
            };
        }

        // Unscripted: orders placed here and not canceled read back as open
        let placed = state.placed.iter().any(|o| o.id == order_id);
        let canceled = state.canceled.iter().any(|c| c == order_id);
        if placed && !canceled {
            Ok(Some(OrderStatus::New))
        } else {
            Ok(None)
        }
    }

    async fn list_open_orders(&self, _symbol: &str) -> TradingResult<Vec<OpenOrderInfo>> {
        Ok(self.state.lock().unwrap().open_orders_listing.clone())
    }
}
