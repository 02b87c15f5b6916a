// Grid lifecycle: quote computation, leg placement, reactivation, teardown

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::TradingConfig;
use crate::core::lock_coordinator::LockCoordinator;
use crate::core::types::{GridState, OrderSide, OrderStatus};
use crate::db::{Database, OrderRecord};
use crate::error::{TradingError, TradingResult};
use crate::exchange::{Depth, ExchangeAdapter};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    pub spread_pct: f64,
    pub min_touch_buffer_pct: f64,
    pub max_price_deviation_pct: f64,
}

impl From<&TradingConfig> for GridConfig {
    fn from(config: &TradingConfig) -> Self {
        Self {
            spread_pct: config.spread_pct,
            min_touch_buffer_pct: config.min_touch_buffer_pct,
            max_price_deviation_pct: config.max_price_deviation_pct,
        }
    }
}

/// One paired bid/ask market-making order set for a symbol
#[derive(Debug, Clone)]
pub struct Grid {
    pub symbol: String,
    pub bid_order_id: Option<String>,
    pub ask_order_id: Option<String>,
    pub bid_price: f64,
    pub ask_price: f64,
    pub amount: f64,
    pub config: GridConfig,
    pub last_update: DateTime<Utc>,
}

impl Grid {
    pub fn state(&self) -> GridState {
        match (&self.bid_order_id, &self.ask_order_id) {
            (Some(_), Some(_)) => GridState::Complete,
            (None, None) => GridState::Absent,
            _ => GridState::Partial,
        }
    }

    /// Which leg an order id belongs to, if any
    pub fn leg_for_order(&self, order_id: &str) -> Option<OrderSide> {
        if self.bid_order_id.as_deref() == Some(order_id) {
            Some(OrderSide::Buy)
        } else if self.ask_order_id.as_deref() == Some(order_id) {
            Some(OrderSide::Sell)
        } else {
            None
        }
    }

    pub fn leg_id(&self, side: OrderSide) -> Option<&str> {
        match side {
            OrderSide::Buy => self.bid_order_id.as_deref(),
            OrderSide::Sell => self.ask_order_id.as_deref(),
        }
    }

    pub fn set_leg(&mut self, side: OrderSide, order_id: Option<String>) {
        match side {
            OrderSide::Buy => self.bid_order_id = order_id,
            OrderSide::Sell => self.ask_order_id = order_id,
        }
        self.last_update = Utc::now();
    }

    pub fn clear_leg(&mut self, side: OrderSide) {
        self.set_leg(side, None);
    }

    /// Both legs gone: nothing left to track
    pub fn is_stale(&self) -> bool {
        self.state() == GridState::Absent
    }

    /// Reposition trigger: price left the quoted envelope, or drifted too
    /// far from the grid midpoint
    pub fn needs_reposition(&self, price: f64) -> bool {
        if price < self.bid_price || price > self.ask_price {
            return true;
        }
        let mid = (self.bid_price + self.ask_price) / 2.0;
        if mid <= 0.0 {
            return false;
        }
        (price - mid).abs() / mid * 100.0 > self.config.max_price_deviation_pct
    }
}

/// Bid/ask quotes from the book mid, clamped so neither leg can execute
/// against the current touch. The clamp, not the spread, carries the price
/// safety guarantee.
pub fn compute_quotes(depth: &Depth, config: &GridConfig) -> TradingResult<(f64, f64)> {
    let best_bid = depth
        .best_bid()
        .ok_or_else(|| TradingError::InsufficientLiquidity("empty bid side".to_string()))?;
    let best_ask = depth
        .best_ask()
        .ok_or_else(|| TradingError::InsufficientLiquidity("empty ask side".to_string()))?;

    if best_bid <= 0.0 || best_ask <= best_bid {
        return Err(TradingError::InsufficientLiquidity(format!(
            "crossed or degenerate book: bid {} ask {}",
            best_bid, best_ask
        )));
    }

    let mid = (best_bid + best_ask) / 2.0;
    let half_spread = mid * config.spread_pct / 100.0 / 2.0;
    let buffer = (mid * config.min_touch_buffer_pct / 100.0).max(mid * 1e-6);

    let bid = (mid - half_spread).min(best_bid - buffer);
    let ask = (mid + half_spread).max(best_ask + buffer);

    if bid <= 0.0 {
        return Err(TradingError::InvalidParameter(
            "spread_pct".to_string(),
            format!("computed bid {} is not positive", bid),
        ));
    }

    Ok((bid, ask))
}

fn floor_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).floor() / factor
}

fn ceil_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).ceil() / factor
}

pub struct GridManager {
    bot_id: String,
    exchange: Arc<dyn ExchangeAdapter>,
    db: Database,
    locks: LockCoordinator,
}

impl GridManager {
    pub fn new(
        bot_id: String,
        exchange: Arc<dyn ExchangeAdapter>,
        db: Database,
        locks: LockCoordinator,
    ) -> Self {
        Self {
            bot_id,
            exchange,
            db,
            locks,
        }
    }

    /// Place one leg and persist the durable record as soon as the exchange
    /// acknowledges it, before anything else happens.
    async fn place_leg(
        &self,
        symbol: &str,
        side: OrderSide,
        price: f64,
        quantity: f64,
    ) -> TradingResult<String> {
        let ack = self.exchange.place_order(symbol, side, Some(price), quantity).await?;

        let record = OrderRecord::new(
            ack.id.clone(),
            self.bot_id.clone(),
            symbol.to_string(),
            side,
            price,
            quantity,
        );
        record.insert(self.db.get_connection())?;

        info!(
            "📝 Placed {} leg for {}: {} @ {:.6} x {:.4}",
            side.as_str(),
            symbol,
            ack.id,
            price,
            quantity
        );
        Ok(ack.id)
    }

    /// Create a fresh grid for a symbol.
    ///
    /// Preconditions: no active lock, and no surviving durable orders —
    /// those belong to the recovery path. Legs are placed sequentially; a
    /// failure on the second leg leaves a valid PARTIAL grid rather than
    /// rolling back the first.
    pub async fn create_grid(
        &self,
        symbol: &str,
        amount: f64,
        config: GridConfig,
        depth: &Depth,
    ) -> TradingResult<Grid> {
        if self.locks.has_active_lock(symbol) {
            return Err(TradingError::LockConflict(format!(
                "grid creation for {} blocked by active lock",
                symbol
            )));
        }

        let existing = OrderRecord::list_non_terminal(self.db.get_connection(), &self.bot_id, symbol)?;
        if !existing.is_empty() {
            return Err(TradingError::OrderFailed(format!(
                "{} durable order(s) still open for {}; reconcile before placing a new grid",
                existing.len(),
                symbol
            )));
        }

        let info = self.exchange.get_market_info(symbol).await?;
        let quantity = info.round_qty(amount);
        if quantity < info.min_qty || quantity <= 0.0 {
            return Err(TradingError::InvalidParameter(
                "order_amount".to_string(),
                format!("{} below exchange minimum {}", quantity, info.min_qty),
            ));
        }

        let (raw_bid, raw_ask) = compute_quotes(depth, &config)?;
        let bid_price = floor_to(raw_bid, info.price_decimals);
        let ask_price = ceil_to(raw_ask, info.price_decimals);

        let mut grid = Grid {
            symbol: symbol.to_string(),
            bid_order_id: None,
            ask_order_id: None,
            bid_price,
            ask_price,
            amount: quantity,
            config,
            last_update: Utc::now(),
        };

        let bid_id = self.place_leg(symbol, OrderSide::Buy, bid_price, quantity).await?;
        grid.set_leg(OrderSide::Buy, Some(bid_id));

        match self.place_leg(symbol, OrderSide::Sell, ask_price, quantity).await {
            Ok(ask_id) => grid.set_leg(OrderSide::Sell, Some(ask_id)),
            Err(e) => {
                warn!(
                    "Ask leg placement for {} failed ({}); keeping PARTIAL grid",
                    symbol, e
                );
            }
        }

        info!(
            "🎯 Grid for {} is {:?}: bid {:.6} / ask {:.6}",
            symbol,
            grid.state(),
            grid.bid_price,
            grid.ask_price
        );
        Ok(grid)
    }

    /// Place only the missing leg(s) of a PARTIAL grid, reusing the stored
    /// counterpart prices, re-clamped against the current touch.
    pub async fn reactivate_grid(&self, grid: &mut Grid, depth: &Depth) -> TradingResult<()> {
        if self.locks.has_active_lock(&grid.symbol) {
            debug!("Reactivation of {} skipped: symbol is locked", grid.symbol);
            return Ok(());
        }

        if grid.state() == GridState::Complete {
            return Ok(());
        }

        let info = self.exchange.get_market_info(&grid.symbol).await?;
        let mid = depth.mid_price().ok_or_else(|| {
            TradingError::InsufficientLiquidity(format!("empty book for {}", grid.symbol))
        })?;
        let buffer = (mid * grid.config.min_touch_buffer_pct / 100.0).max(mid * 1e-6);

        if grid.bid_order_id.is_none() {
            let best_bid = depth.best_bid().unwrap_or(mid);
            let price = floor_to(grid.bid_price.min(best_bid - buffer), info.price_decimals);
            let id = self
                .place_leg(&grid.symbol, OrderSide::Buy, price, grid.amount)
                .await?;
            grid.bid_price = price;
            grid.set_leg(OrderSide::Buy, Some(id));
        }

        if grid.ask_order_id.is_none() {
            let best_ask = depth.best_ask().unwrap_or(mid);
            let price = ceil_to(grid.ask_price.max(best_ask + buffer), info.price_decimals);
            let id = self
                .place_leg(&grid.symbol, OrderSide::Sell, price, grid.amount)
                .await?;
            grid.ask_price = price;
            grid.set_leg(OrderSide::Sell, Some(id));
        }

        Ok(())
    }

    /// Best-effort cancel of both legs. A cancel ack is a confirmed
    /// outcome, so the durable record is marked CANCELED immediately and
    /// the later stream event becomes an idempotent no-op. Individual
    /// failures are logged and never abort the sibling cancel.
    pub async fn cancel_all(&self, grid: &mut Grid) {
        for side in [OrderSide::Buy, OrderSide::Sell] {
            let Some(order_id) = grid.leg_id(side).map(str::to_string) else {
                continue;
            };

            match self.exchange.cancel_order(&grid.symbol, &order_id).await {
                Ok(()) => {
                    if let Err(e) = OrderRecord::update_status(
                        self.db.get_connection(),
                        &order_id,
                        OrderStatus::Canceled,
                    ) {
                        warn!("Failed to persist cancel of {}: {}", order_id, e);
                    }
                    grid.clear_leg(side);
                }
                Err(e) => {
                    warn!(
                        "Cancel of {} leg {} on {} failed: {}",
                        side.as_str(),
                        order_id,
                        grid.symbol,
                        e
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::DepthLevel;

    fn config() -> GridConfig {
        GridConfig {
            spread_pct: 0.5,
            min_touch_buffer_pct: 0.05,
            max_price_deviation_pct: 1.0,
        }
    }

    fn depth(bid: f64, ask: f64) -> Depth {
        Depth {
            bids: vec![DepthLevel { price: bid, volume: 1000.0 }],
            asks: vec![DepthLevel { price: ask, volume: 1000.0 }],
        }
    }

    fn grid() -> Grid {
        Grid {
            symbol: "XRP/GBP".to_string(),
            bid_order_id: Some("B-1".to_string()),
            ask_order_id: Some("A-1".to_string()),
            bid_price: 99.0,
            ask_price: 101.0,
            amount: 100.0,
            config: config(),
            last_update: Utc::now(),
        }
    }

    #[test]
    fn test_quotes_clear_the_touch() {
        // Tight book relative to the spread: the clamp must kick in
        let (bid, ask) = compute_quotes(&depth(100.0, 101.0), &config()).unwrap();
        assert!(bid < 100.0, "bid {} must be strictly below best bid", bid);
        assert!(ask > 101.0, "ask {} must be strictly above best ask", ask);
    }

    #[test]
    fn test_quotes_straddle_mid_on_wide_book() {
        let (bid, ask) = compute_quotes(&depth(99.0, 101.0), &config()).unwrap();
        let mid = 100.0;
        assert!(bid < mid && ask > mid);
        assert!(bid < 99.0 && ask > 101.0);
    }

    #[test]
    fn test_quotes_reject_empty_book() {
        assert!(compute_quotes(&Depth::default(), &config()).is_err());
    }

    #[test]
    fn test_quotes_reject_crossed_book() {
        assert!(compute_quotes(&depth(101.0, 100.0), &config()).is_err());
    }

    #[test]
    fn test_grid_state_transitions() {
        let mut g = grid();
        assert_eq!(g.state(), GridState::Complete);

        g.clear_leg(OrderSide::Buy);
        assert_eq!(g.state(), GridState::Partial);

        g.clear_leg(OrderSide::Sell);
        assert_eq!(g.state(), GridState::Absent);
        assert!(g.is_stale());
    }

    #[test]
    fn test_leg_lookup() {
        let g = grid();
        assert_eq!(g.leg_for_order("B-1"), Some(OrderSide::Buy));
        assert_eq!(g.leg_for_order("A-1"), Some(OrderSide::Sell));
        assert_eq!(g.leg_for_order("other"), None);
    }

    #[test]
    fn test_reposition_trigger() {
        let g = grid();
        assert!(!g.needs_reposition(100.0));
        assert!(!g.needs_reposition(99.5));
        assert!(g.needs_reposition(98.9)); // below envelope
        assert!(g.needs_reposition(101.1)); // above envelope
    }

    #[test]
    fn test_reposition_on_deviation_within_envelope() {
        let mut g = grid();
        g.bid_price = 90.0;
        g.ask_price = 110.0;
        // Inside the envelope but > 1% off the 100.0 midpoint
        assert!(g.needs_reposition(102.0));
        assert!(!g.needs_reposition(100.5));
    }
}
