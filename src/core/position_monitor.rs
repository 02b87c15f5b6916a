// Position monitoring: immediate closure against current liquidity, with
// per-tick stop-loss / take-profit / slippage fallback.

use std::sync::Arc;
use tracing::{info, warn};

use crate::config::RiskConfig;
use crate::core::lock_coordinator::LockCoordinator;
use crate::core::types::{OrderSide, Position};
use crate::db::{Database, OrderRecord};
use crate::error::{TradingError, TradingResult};
use crate::exchange::{Depth, ExchangeAdapter};

/// Liquidity classification for a prospective market closure. The tier
/// encodes how much slippage the current book can be expected to cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosureTier {
    Aggressive,
    Moderate,
    Conservative,
    VeryConservative,
}

impl ClosureTier {
    /// Classify the book for a closure of `quantity` hitting `side`
    pub fn classify(depth: &Depth, side: OrderSide, quantity: f64) -> ClosureTier {
        let Some(spread_bps) = depth.spread_bps() else {
            return ClosureTier::VeryConservative;
        };
        let touch = depth.touch_volume(side);

        if spread_bps <= 5.0 && touch >= quantity * 3.0 {
            ClosureTier::Aggressive
        } else if spread_bps <= 15.0 && touch >= quantity * 2.0 {
            ClosureTier::Moderate
        } else if spread_bps <= 40.0 && touch >= quantity {
            ClosureTier::Conservative
        } else {
            ClosureTier::VeryConservative
        }
    }

    /// Maximum tolerable slippage for this tier; None means a market order
    /// is not acceptable right now
    pub fn max_slippage_pct(&self) -> Option<f64> {
        match self {
            ClosureTier::Aggressive => Some(0.10),
            ClosureTier::Moderate => Some(0.25),
            ClosureTier::Conservative => Some(0.50),
            ClosureTier::VeryConservative => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Immediate,
    SlippageGuard,
    StopLoss,
    TakeProfit,
}

pub struct PositionMonitor {
    bot_id: String,
    exchange: Arc<dyn ExchangeAdapter>,
    db: Database,
    locks: LockCoordinator,
    risk: RiskConfig,
}

impl PositionMonitor {
    pub fn new(
        bot_id: String,
        exchange: Arc<dyn ExchangeAdapter>,
        db: Database,
        locks: LockCoordinator,
        risk: RiskConfig,
    ) -> Self {
        Self {
            bot_id,
            exchange,
            db,
            locks,
            risk,
        }
    }

    /// Attempt closure right after the entry fill. Returns the closure
    /// order id when one was placed; None when conditions were classified
    /// very-conservative and the position falls back to tick monitoring.
    pub async fn try_immediate_closure(
        &self,
        position: &mut Position,
        depth: &Depth,
    ) -> TradingResult<Option<String>> {
        self.place_adaptive_closure(position, depth, ExitReason::Immediate).await
    }

    /// Per-tick evaluation of a monitored position. The slippage guard is
    /// checked before the fixed stop-loss / take-profit levels.
    pub async fn check_tick(
        &self,
        position: &mut Position,
        depth: &Depth,
    ) -> TradingResult<Option<String>> {
        if position.closure_order_id.is_some() {
            // Closure already in flight; waiting for its fill confirmation
            return Ok(None);
        }

        let Some(price) = depth.mid_price() else {
            return Ok(None);
        };

        let pnl_pct = position.pnl_pct(price);

        let reason = if pnl_pct.abs() > self.risk.slippage_exit_pct {
            Some(ExitReason::SlippageGuard)
        } else if self.crossed_stop_loss(position, price) {
            Some(ExitReason::StopLoss)
        } else if self.crossed_take_profit(position, price) {
            Some(ExitReason::TakeProfit)
        } else {
            None
        };

        let Some(reason) = reason else {
            return Ok(None);
        };

        info!(
            "🛑 Exit triggered for {} ({:?}): price {:.6}, PnL {:+.3}%",
            position.symbol, reason, price, pnl_pct
        );
        self.place_adaptive_closure(position, depth, reason).await
    }

    fn crossed_stop_loss(&self, position: &Position, price: f64) -> bool {
        match position.side {
            crate::core::types::PositionSide::Long => price <= position.stop_loss_price,
            crate::core::types::PositionSide::Short => price >= position.stop_loss_price,
        }
    }

    fn crossed_take_profit(&self, position: &Position, price: f64) -> bool {
        match position.side {
            crate::core::types::PositionSide::Long => price >= position.take_profit_price,
            crate::core::types::PositionSide::Short => price <= position.take_profit_price,
        }
    }

    /// The shared adaptive market-order path. Classifies the book, and
    /// unless conditions are very-conservative places an IOC market order
    /// sized to the entry quantity, recording its id into the lock
    /// metadata before returning.
    async fn place_adaptive_closure(
        &self,
        position: &mut Position,
        depth: &Depth,
        reason: ExitReason,
    ) -> TradingResult<Option<String>> {
        let side = position.side.closing_order_side();
        let tier = ClosureTier::classify(depth, side, position.quantity);

        let Some(max_slippage) = tier.max_slippage_pct() else {
            warn!(
                "Closure of {} deferred: book classified {:?} (spread {:?} bps)",
                position.symbol,
                tier,
                depth.spread_bps()
            );
            return Ok(None);
        };

        let touch_price = match side {
            OrderSide::Sell => depth.best_bid(),
            OrderSide::Buy => depth.best_ask(),
        }
        .ok_or_else(|| {
            TradingError::InsufficientLiquidity(format!("no touch price for {}", position.symbol))
        })?;

        // Stray resting orders must not outlive the position
        if let Err(e) = self.exchange.cancel_all_open_orders(&position.symbol).await {
            warn!("Stray-order sweep for {} failed: {}", position.symbol, e);
        }

        let ack = self
            .exchange
            .place_order(&position.symbol, side, None, position.quantity)
            .await?;

        let record = OrderRecord::new(
            ack.id.clone(),
            self.bot_id.clone(),
            position.symbol.clone(),
            side,
            touch_price,
            position.quantity,
        );
        record.insert(self.db.get_connection())?;

        OrderRecord::mark_closed_by_sl_tp(self.db.get_connection(), &position.entry_order_id)?;

        position.closure_order_id = Some(ack.id.clone());

        if let Some(lock) = self.locks.get_lock(&position.symbol)? {
            if let Some(mut metadata) = lock.parsed_metadata() {
                metadata.closure_order_id = Some(ack.id.clone());
                self.locks.update_lock_metadata(&position.symbol, &metadata)?;
            }
        }

        info!(
            "💥 Closure order {} placed for {} ({:?}, tier {:?}, max slippage {:.2}%)",
            ack.id, position.symbol, reason, tier, max_slippage
        );
        Ok(Some(ack.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::DepthLevel;

    fn depth_with(spread_bps: f64, touch_volume: f64) -> Depth {
        let mid = 100.0;
        let half = mid * spread_bps / 10_000.0 / 2.0;
        Depth {
            bids: vec![DepthLevel { price: mid - half, volume: touch_volume }],
            asks: vec![DepthLevel { price: mid + half, volume: touch_volume }],
        }
    }

    #[test]
    fn test_tier_classification() {
        assert_eq!(
            ClosureTier::classify(&depth_with(3.0, 300.0), OrderSide::Sell, 100.0),
            ClosureTier::Aggressive
        );
        assert_eq!(
            ClosureTier::classify(&depth_with(10.0, 200.0), OrderSide::Sell, 100.0),
            ClosureTier::Moderate
        );
        assert_eq!(
            ClosureTier::classify(&depth_with(30.0, 100.0), OrderSide::Sell, 100.0),
            ClosureTier::Conservative
        );
        // Wide spread: thin-book tier no matter the depth
        assert_eq!(
            ClosureTier::classify(&depth_with(80.0, 1000.0), OrderSide::Sell, 100.0),
            ClosureTier::VeryConservative
        );
        // Tight spread but thin book
        assert_eq!(
            ClosureTier::classify(&depth_with(3.0, 50.0), OrderSide::Sell, 100.0),
            ClosureTier::VeryConservative
        );
    }

    #[test]
    fn test_tier_slippage_budgets_widen() {
        let budgets: Vec<_> = [
            ClosureTier::Aggressive,
            ClosureTier::Moderate,
            ClosureTier::Conservative,
        ]
        .iter()
        .map(|t| t.max_slippage_pct().unwrap())
        .collect();
        assert!(budgets.windows(2).all(|w| w[0] < w[1]));
        assert!(ClosureTier::VeryConservative.max_slippage_pct().is_none());
    }

    #[test]
    fn test_empty_book_is_very_conservative() {
        assert_eq!(
            ClosureTier::classify(&Depth::default(), OrderSide::Sell, 100.0),
            ClosureTier::VeryConservative
        );
    }
}
