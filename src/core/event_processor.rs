// Per-symbol trade-event processing
//
// One worker per symbol consumes an ordered event queue. Ordering within
// a symbol is preserved by the queue; cross-symbol ordering is neither
// guaranteed nor required. The worker is the sole writer of its symbol's
// in-memory grid and position.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::core::book_cache::BookCache;
use crate::core::grid_manager::{Grid, GridConfig, GridManager};
use crate::core::lock_coordinator::LockCoordinator;
use crate::core::position_monitor::PositionMonitor;
use crate::core::recovery::{position_from_entry, OrderRecovery};
use crate::core::types::{OrderSide, OrderStatus, Position, PositionSide};
use crate::db::{BotSession, Database, LockMetadata, OrderRecord};
use crate::error::TradingResult;
use crate::exchange::{Depth, ExchangeAdapter, FillEvent};

/// Retries for a fill update racing the local write of a just-placed order
const FILL_PERSIST_ATTEMPTS: u32 = 3;
const FILL_PERSIST_RETRY_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub enum SymbolEvent {
    Book(Depth),
    Fill(FillEvent),
    /// Idempotent "make the grid whole" request; safe to deliver repeatedly
    EnsureGrid,
}

pub struct SymbolWorker {
    bot_id: String,
    symbol: String,
    amount: f64,
    grid_config: GridConfig,
    rejected_retry_delay: Duration,
    locks: LockCoordinator,
    grids: GridManager,
    monitor: PositionMonitor,
    recovery: OrderRecovery,
    db: Database,
    book: BookCache,
    grid: Option<Grid>,
    position: Option<Position>,
    session_id: Option<i64>,
    self_tx: mpsc::UnboundedSender<SymbolEvent>,
    risk: crate::config::RiskConfig,
}

impl SymbolWorker {
    pub fn new(
        symbol: String,
        config: &Config,
        exchange: Arc<dyn ExchangeAdapter>,
        db: Database,
        session_id: Option<i64>,
        self_tx: mpsc::UnboundedSender<SymbolEvent>,
    ) -> Self {
        let bot_id = config.bot.bot_id.clone();
        let locks = LockCoordinator::new(db.clone(), bot_id.clone());
        let grids = GridManager::new(
            bot_id.clone(),
            Arc::clone(&exchange),
            db.clone(),
            locks.clone(),
        );
        let monitor = PositionMonitor::new(
            bot_id.clone(),
            Arc::clone(&exchange),
            db.clone(),
            locks.clone(),
            config.risk.clone(),
        );
        let recovery = OrderRecovery::new(
            bot_id.clone(),
            Arc::clone(&exchange),
            db.clone(),
            locks.clone(),
            config.risk.clone(),
        );

        Self {
            bot_id,
            symbol,
            amount: config.trading.order_amount,
            grid_config: GridConfig::from(&config.trading),
            rejected_retry_delay: Duration::from_secs(config.trading.rejected_retry_delay_secs),
            locks,
            grids,
            monitor,
            recovery,
            db,
            book: BookCache::new(Duration::from_secs(config.trading.book_ttl_secs)),
            grid: None,
            position: None,
            session_id,
            self_tx,
            risk: config.risk.clone(),
        }
    }

    /// Consume the symbol's event queue until the sender side closes.
    /// A failed event never aborts the worker; it is logged and the next
    /// event is processed.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<SymbolEvent>) {
        info!("▶️  Worker for {} started", self.symbol);
        while let Some(event) = events.recv().await {
            if let Err(e) = self.handle_event(event).await {
                error!(
                    "Event handling for {} failed ({}): {}",
                    self.symbol,
                    e.category(),
                    e
                );
            }
        }
        info!("⏹  Worker for {} stopped", self.symbol);
    }

    pub async fn handle_event(&mut self, event: SymbolEvent) -> TradingResult<()> {
        match event {
            SymbolEvent::Book(depth) => self.on_book(depth).await,
            SymbolEvent::Fill(fill) => self.on_fill(fill).await,
            SymbolEvent::EnsureGrid => self.ensure_grid().await,
        }
    }

    /// Book tick: refresh the cache, drive position monitoring, then apply
    /// the repositioning trigger unless the symbol is locked.
    async fn on_book(&mut self, depth: Depth) -> TradingResult<()> {
        self.book.update(&self.symbol, depth.clone());

        if let Some(position) = self.position.as_mut() {
            self.monitor.check_tick(position, &depth).await?;
        }

        if self.locks.has_active_lock(&self.symbol) {
            if self.position.is_none() {
                self.position = self.recovery.restore_position(&self.symbol)?;
            }
            return Ok(());
        }

        let reposition = self
            .grid
            .as_ref()
            .zip(depth.mid_price())
            .map_or(false, |(grid, price)| grid.needs_reposition(price));

        if !reposition {
            return self.ensure_grid().await;
        }

        let mut old = self.grid.take().expect("reposition implies a grid");
        let price = depth.mid_price().unwrap_or_default();
        info!(
            "🔀 {} price {:.6} left envelope [{:.6}, {:.6}]; repositioning",
            self.symbol, price, old.bid_price, old.ask_price
        );
        self.grids.cancel_all(&mut old).await;
        if !old.is_stale() {
            // A cancel failed: keep the surviving leg rather than risking
            // a duplicate
            warn!(
                "Teardown of {} left a live leg; keeping PARTIAL grid",
                self.symbol
            );
            self.grid = Some(old);
            return Ok(());
        }
        self.ensure_grid().await
    }

    /// Fill event: always persist the confirmed status first, then dispatch
    /// in strict priority order.
    async fn on_fill(&mut self, fill: FillEvent) -> TradingResult<()> {
        debug!(
            "📬 {} fill event: order {} {:?} {:.6} x {:.4}",
            self.symbol,
            fill.order_id,
            fill.status,
            fill.price,
            fill.quantity
        );

        self.persist_fill(&fill).await;

        // (a) Closure-order confirmation outranks everything else
        if self.handle_closure_fill(&fill).await? {
            return Ok(());
        }

        // (b)-(d) Events for a tracked grid leg
        if let Some(leg) = self.grid.as_ref().and_then(|g| g.leg_for_order(&fill.order_id)) {
            return self.handle_leg_event(fill, leg).await;
        }

        // (e) Orphan order
        self.handle_orphan(&fill).await
    }

    /// Persist the status transition for the referenced order. Idempotent:
    /// replayed events for terminal orders change nothing. A "not found"
    /// may mean the event raced the local write of a just-placed order, so
    /// it is retried a bounded number of times before giving up.
    async fn persist_fill(&self, fill: &FillEvent) {
        for attempt in 1..=FILL_PERSIST_ATTEMPTS {
            match OrderRecord::find_by_external_id(self.db.get_connection(), &fill.order_id) {
                Ok(Some(record)) => {
                    if record.status.is_terminal() {
                        return;
                    }
                    match OrderRecord::update_status(
                        self.db.get_connection(),
                        &fill.order_id,
                        fill.status,
                    ) {
                        Ok(_) => return,
                        Err(e) => {
                            warn!("Status persist for {} failed: {}", fill.order_id, e);
                            return;
                        }
                    }
                }
                Ok(None) => {
                    if attempt < FILL_PERSIST_ATTEMPTS {
                        tokio::time::sleep(FILL_PERSIST_RETRY_DELAY).await;
                    }
                }
                Err(e) => {
                    warn!("Order lookup for {} failed: {}", fill.order_id, e);
                    return;
                }
            }
        }
        warn!(
            "Order {} not in store after {} attempts; proceeding without persist",
            fill.order_id, FILL_PERSIST_ATTEMPTS
        );
    }

    /// (a) If this event confirms the pending closure order tracked in the
    /// active lock's metadata, release the lock and schedule recreation.
    /// Returns true when the event was consumed as a closure event.
    async fn handle_closure_fill(&mut self, fill: &FillEvent) -> TradingResult<bool> {
        let Some(lock) = self.locks.get_lock(&self.symbol)? else {
            return Ok(false);
        };
        let Some(metadata) = lock.parsed_metadata() else {
            return Ok(false);
        };
        if metadata.closure_order_id.as_deref() != Some(fill.order_id.as_str()) {
            return Ok(false);
        }

        match fill.status {
            OrderStatus::Filled => {}
            OrderStatus::Canceled | OrderStatus::Rejected => {
                // An IOC closure that died unfilled: clear it so tick
                // monitoring can try again instead of waiting forever
                warn!(
                    "Closure order {} for {} came back {:?}; re-arming monitoring",
                    fill.order_id, self.symbol, fill.status
                );
                if let Some(position) = self.position.as_mut() {
                    position.closure_order_id = None;
                }
                let mut metadata = metadata;
                metadata.closure_order_id = None;
                self.locks.update_lock_metadata(&self.symbol, &metadata)?;
                return Ok(true);
            }
            _ => {
                // Partial fill or ack of the closure order: keep waiting
                debug!(
                    "Closure order {} for {} reported {:?}; lock stays ACTIVE",
                    fill.order_id, self.symbol, fill.status
                );
                return Ok(true);
            }
        }

        let released = self.locks.release_lock(&self.symbol)?;
        info!(
            "🔓 Closure {} confirmed FILLED for {}; lock released ({})",
            fill.order_id, self.symbol, released
        );

        self.record_session_fill(fill);
        self.position = None;
        if let Some(grid) = self.grid.as_mut() {
            grid.clear_leg(OrderSide::Buy);
            grid.clear_leg(OrderSide::Sell);
        }
        self.grid = None;

        let _ = self.self_tx.send(SymbolEvent::EnsureGrid);
        Ok(true)
    }

    /// (b)-(d) Event for a live grid leg
    async fn handle_leg_event(&mut self, fill: FillEvent, leg: OrderSide) -> TradingResult<()> {
        match fill.status {
            OrderStatus::Filled => {
                if self.locks.has_active_lock(&self.symbol) {
                    // The opposite leg filled before its cancel landed.
                    // The position accounting belongs to the open lock; do
                    // not open a second one.
                    warn!(
                        "Fill on {} leg {} while symbol is locked; leg cleared, no new position",
                        self.symbol, fill.order_id
                    );
                    if let Some(grid) = self.grid.as_mut() {
                        grid.clear_leg(leg);
                    }
                    return Ok(());
                }
                self.on_entry_fill(fill, leg).await
            }
            OrderStatus::Canceled => {
                if let Some(grid) = self.grid.as_mut() {
                    grid.clear_leg(leg);
                }
                if !self.locks.has_active_lock(&self.symbol) {
                    self.ensure_grid().await?;
                }
                Ok(())
            }
            OrderStatus::Rejected => {
                warn!(
                    "{} leg {} rejected; scheduling delayed grid recreation",
                    self.symbol, fill.order_id
                );
                if let Some(grid) = self.grid.as_mut() {
                    grid.clear_leg(leg);
                }
                if self.grid.as_ref().is_some_and(|g| g.is_stale()) {
                    self.grid = None;
                }
                if !self.locks.has_active_lock(&self.symbol) {
                    self.schedule_ensure_grid(self.rejected_retry_delay);
                }
                Ok(())
            }
            _ => Ok(()), // NEW / PARTIALLY_FILLED acknowledgments
        }
    }

    /// (b) Entry fill. The lock is created synchronously, before any other
    /// side effect — this ordering is what stops a concurrent tick-driven
    /// repositioning from recreating the grid mid-transition.
    async fn on_entry_fill(&mut self, fill: FillEvent, leg: OrderSide) -> TradingResult<()> {
        let side = match leg {
            OrderSide::Buy => PositionSide::Long,
            OrderSide::Sell => PositionSide::Short,
        };

        let metadata = LockMetadata {
            entry_price: fill.price,
            side,
            quantity: fill.quantity,
            closure_order_id: None,
        };

        if !self.locks.create_lock(&self.symbol, &fill.order_id, &metadata)? {
            // Lost the race to a concurrent handler; nothing else to do
            return Ok(());
        }

        info!(
            "🔒 Entry fill on {} {} leg at {:.6}; position opened and symbol locked",
            self.symbol,
            leg.as_str(),
            fill.price
        );
        self.record_session_fill(&fill);

        // Opposite leg must not rest while the position is open
        if let Some(mut grid) = self.grid.take() {
            grid.clear_leg(leg);
            self.grids.cancel_all(&mut grid).await;
        }

        let mut position = position_from_entry(
            &self.symbol,
            side,
            fill.price,
            fill.quantity,
            &fill.order_id,
            &self.risk,
        );

        match self.book.get(&self.symbol) {
            Ok(depth) => {
                let depth = depth.clone();
                if self.monitor.try_immediate_closure(&mut position, &depth).await?.is_none() {
                    info!(
                        "👁  {} position falls back to continuous monitoring",
                        self.symbol
                    );
                }
            }
            Err(e) => {
                warn!(
                    "No fresh book for {}; immediate closure skipped ({})",
                    self.symbol, e
                );
            }
        }

        self.position = Some(position);
        Ok(())
    }

    /// (e) Event for an order no tracked grid or lock knows about
    async fn handle_orphan(&mut self, fill: &FillEvent) -> TradingResult<()> {
        match OrderRecord::find_by_external_id(self.db.get_connection(), &fill.order_id)? {
            Some(record) if record.bot_id == self.bot_id => {
                if fill.status == OrderStatus::Canceled {
                    warn!(
                        "Orphan order {} for {} was externally canceled; full reactivation",
                        fill.order_id, self.symbol
                    );
                    if let Some(mut grid) = self.grid.take() {
                        self.grids.cancel_all(&mut grid).await;
                    }
                    self.ensure_grid().await?;
                } else {
                    debug!(
                        "Orphan event for our order {} ({:?}); persisted, no action",
                        fill.order_id, fill.status
                    );
                }
            }
            _ => {
                debug!(
                    "Event for unknown order {} on {}; ignored",
                    fill.order_id, self.symbol
                );
            }
        }
        Ok(())
    }

    /// Idempotent grid maintenance: checks lock and current grid state
    /// before acting, so repeated invocations are harmless.
    pub async fn ensure_grid(&mut self) -> TradingResult<()> {
        if self.locks.has_active_lock(&self.symbol) {
            if self.position.is_none() {
                self.position = self.recovery.restore_position(&self.symbol)?;
            }
            return Ok(());
        }

        if let Some(grid) = self.grid.as_mut() {
            if grid.state() == crate::core::types::GridState::Complete {
                return Ok(());
            }
            let depth = self.book.get(&self.symbol)?.clone();
            return self.grids.reactivate_grid(grid, &depth).await;
        }

        let depth = self.book.get(&self.symbol)?.clone();
        let outcome = self
            .recovery
            .recover_symbol(
                &self.grids,
                &self.symbol,
                self.amount,
                self.grid_config.clone(),
                &depth,
            )
            .await?;

        self.grid = outcome.grid;
        if self.position.is_none() {
            self.position = outcome.position;
        }
        Ok(())
    }

    fn schedule_ensure_grid(&self, delay: Duration) {
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(SymbolEvent::EnsureGrid);
        });
    }

    fn record_session_fill(&self, fill: &FillEvent) {
        let Some(session_id) = self.session_id else {
            return;
        };
        let signed_quantity = match fill.side {
            OrderSide::Buy => fill.quantity,
            OrderSide::Sell => -fill.quantity,
        };
        if let Err(e) = BotSession::record_fill(
            self.db.get_connection(),
            session_id,
            fill.price * fill.quantity,
            signed_quantity,
        ) {
            warn!("Session metrics update failed: {}", e);
        }
    }

    // Test accessors: the integration suites drive handle_event directly
    // and assert on the resulting state.
    pub fn grid(&self) -> Option<&Grid> {
        self.grid.as_ref()
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }
}
