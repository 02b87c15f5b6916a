// Order recovery and reconciliation
//
// Rebuilds in-memory grid/position state from durable records and live
// exchange state, on startup or whenever a symbol is found without a grid.
// The durable order and lock tables are the only state trusted across
// restarts.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::RiskConfig;
use crate::core::grid_manager::{Grid, GridConfig, GridManager};
use crate::core::lock_coordinator::LockCoordinator;
use crate::core::types::{OrderSide, OrderStatus, Position, PositionSide};
use crate::db::{Database, OrderRecord};
use crate::error::TradingResult;
use crate::exchange::{Depth, ExchangeAdapter};

/// Exchange orders younger than this block fresh placement, as an extra
/// guard against doubling up right after a partially-observed restart.
const RECENT_ORDER_GUARD_SECS: f64 = 60.0;

pub struct RecoveryOutcome {
    pub grid: Option<Grid>,
    pub position: Option<Position>,
}

pub struct OrderRecovery {
    bot_id: String,
    exchange: Arc<dyn ExchangeAdapter>,
    db: Database,
    locks: LockCoordinator,
    risk: RiskConfig,
}

impl OrderRecovery {
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

    /// Rebuild the in-memory Position from an ACTIVE lock's metadata, so
    /// monitoring and closure-fill release survive a restart mid-position.
    pub fn restore_position(&self, symbol: &str) -> TradingResult<Option<Position>> {
        let Some(lock) = self.locks.get_lock(symbol)? else {
            return Ok(None);
        };
        let Some(metadata) = lock.parsed_metadata() else {
            warn!("Active lock for {} carries unreadable metadata", symbol);
            return Ok(None);
        };

        let (stop_loss_price, take_profit_price) = stop_levels(
            metadata.side,
            metadata.entry_price,
            &self.risk,
        );

        info!(
            "🔁 Restored {} position on {} from lock metadata (entry {:.6})",
            metadata.side.as_str(),
            symbol,
            metadata.entry_price
        );

        Ok(Some(Position {
            symbol: symbol.to_string(),
            side: metadata.side,
            entry_price: metadata.entry_price,
            quantity: metadata.quantity,
            stop_loss_price,
            take_profit_price,
            entry_order_id: lock.position_id.clone(),
            closure_order_id: metadata.closure_order_id,
            opened_at: Utc::now(),
        }))
    }

    /// Reconcile durable orders for a symbol against live exchange state
    /// and restore or recreate the grid. Running this twice over the same
    /// durable state never yields more than one live order per side.
    pub async fn recover_symbol(
        &self,
        grids: &GridManager,
        symbol: &str,
        amount: f64,
        config: GridConfig,
        depth: &Depth,
    ) -> TradingResult<RecoveryOutcome> {
        // A held lock means a position is open: no grid until it releases
        if self.locks.has_active_lock(symbol) {
            return Ok(RecoveryOutcome {
                grid: None,
                position: self.restore_position(symbol)?,
            });
        }

        let open = OrderRecord::list_non_terminal(self.db.get_connection(), &self.bot_id, symbol)?;

        // Most recent candidate per side (the listing is newest-first)
        let newest_bid = open.iter().find(|o| o.side == OrderSide::Buy);
        let newest_ask = open.iter().find(|o| o.side == OrderSide::Sell);

        let bid_live = match newest_bid {
            Some(record) => self.validate_leg(symbol, record).await?,
            None => false,
        };
        let ask_live = match newest_ask {
            Some(record) => self.validate_leg(symbol, record).await?,
            None => false,
        };

        if !bid_live && !ask_live {
            if self.recent_exchange_orders(symbol).await {
                warn!(
                    "Recovery for {} deferred: live exchange orders younger than {}s",
                    symbol, RECENT_ORDER_GUARD_SECS
                );
                return Ok(RecoveryOutcome { grid: None, position: None });
            }

            let grid = grids.create_grid(symbol, amount, config, depth).await?;
            return Ok(RecoveryOutcome { grid: Some(grid), position: None });
        }

        // At least one leg survived: restore and complete opportunistically
        let mut grid = restore_grid(symbol, amount, config, newest_bid, newest_ask, bid_live, ask_live);
        info!(
            "♻️  Restored {:?} grid for {} from durable records",
            grid.state(),
            symbol
        );

        if let Err(e) = grids.reactivate_grid(&mut grid, depth).await {
            warn!("Could not complete restored grid for {}: {}", symbol, e);
        }

        Ok(RecoveryOutcome { grid: Some(grid), position: None })
    }

    /// Validate one durable leg against the exchange. Errors are resolved
    /// conservatively: an order we cannot check is assumed still active,
    /// because a duplicate placement is worse than a missing leg.
    async fn validate_leg(&self, symbol: &str, record: &OrderRecord) -> TradingResult<bool> {
        match self
            .exchange
            .get_open_order(symbol, &record.external_order_id)
            .await
        {
            Ok(Some(status)) if !status.is_terminal() => Ok(true),
            Ok(_) => {
                // Confirmed gone on the exchange: reconcile the local record
                OrderRecord::update_status(
                    self.db.get_connection(),
                    &record.external_order_id,
                    OrderStatus::Canceled,
                )?;
                info!(
                    "Order {} confirmed inactive on exchange; marked CANCELED locally",
                    record.external_order_id
                );
                Ok(false)
            }
            Err(e) => {
                warn!(
                    "Validation of {} failed ({}); assuming order is still active",
                    record.external_order_id, e
                );
                Ok(true)
            }
        }
    }

    async fn recent_exchange_orders(&self, symbol: &str) -> bool {
        match self.exchange.list_open_orders(symbol).await {
            Ok(orders) => orders.iter().any(|o| o.age_secs < RECENT_ORDER_GUARD_SECS),
            Err(e) => {
                // Same conservative default as leg validation
                warn!(
                    "Open-order listing for {} failed ({}); deferring fresh placement",
                    symbol, e
                );
                true
            }
        }
    }
}

fn stop_levels(side: PositionSide, entry_price: f64, risk: &RiskConfig) -> (f64, f64) {
    match side {
        PositionSide::Long => (
            entry_price * (1.0 - risk.stop_loss_pct / 100.0),
            entry_price * (1.0 + risk.take_profit_pct / 100.0),
        ),
        PositionSide::Short => (
            entry_price * (1.0 + risk.stop_loss_pct / 100.0),
            entry_price * (1.0 - risk.take_profit_pct / 100.0),
        ),
    }
}

pub(crate) fn position_from_entry(
    symbol: &str,
    side: PositionSide,
    entry_price: f64,
    quantity: f64,
    entry_order_id: &str,
    risk: &RiskConfig,
) -> Position {
    let (stop_loss_price, take_profit_price) = stop_levels(side, entry_price, risk);
    Position {
        symbol: symbol.to_string(),
        side,
        entry_price,
        quantity,
        stop_loss_price,
        take_profit_price,
        entry_order_id: entry_order_id.to_string(),
        closure_order_id: None,
        opened_at: Utc::now(),
    }
}

fn restore_grid(
    symbol: &str,
    amount: f64,
    config: GridConfig,
    bid: Option<&OrderRecord>,
    ask: Option<&OrderRecord>,
    bid_live: bool,
    ask_live: bool,
) -> Grid {
    let bid_price = bid.map(|r| r.price);
    let ask_price = ask.map(|r| r.price);

    // A missing side's price is derived from the surviving counterpart
    let (bid_price, ask_price) = match (bid_price, ask_price) {
        (Some(b), Some(a)) => (b, a),
        (Some(b), None) => (b, b * (1.0 + config.spread_pct / 100.0)),
        (None, Some(a)) => (a * (1.0 - config.spread_pct / 100.0), a),
        (None, None) => (0.0, 0.0),
    };

    Grid {
        symbol: symbol.to_string(),
        bid_order_id: if bid_live {
            bid.map(|r| r.external_order_id.clone())
        } else {
            None
        },
        ask_order_id: if ask_live {
            ask.map(|r| r.external_order_id.clone())
        } else {
            None
        },
        bid_price,
        ask_price,
        amount: bid.or(ask).map(|r| r.quantity).unwrap_or(amount),
        config,
        last_update: Utc::now(),
    }
}
