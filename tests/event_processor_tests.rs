// Integration tests for per-symbol event processing: entry fills, lock
// lifecycle, repositioning interleavings and failure handling.

mod common;

use common::{create_test_config, make_depth, setup_memory_db};
use mm_grid_bot::{
    Database, ExchangeAdapter, FillEvent, GridState, LockCoordinator, MockExchange, OrderRecord,
    OrderSide, OrderStatus, SymbolEvent, SymbolWorker,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const SYMBOL: &str = "XRP/GBP";

struct Harness {
    exchange: Arc<MockExchange>,
    db: Database,
    worker: SymbolWorker,
    rx: mpsc::UnboundedReceiver<SymbolEvent>,
}

impl Harness {
    fn new() -> Self {
        let exchange = Arc::new(MockExchange::new());
        exchange.set_depth(SYMBOL, make_depth(0.5000, 0.5010, 1000.0));
        let db = setup_memory_db();
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = SymbolWorker::new(
            SYMBOL.to_string(),
            &create_test_config(),
            Arc::clone(&exchange) as Arc<dyn ExchangeAdapter>,
            db.clone(),
            None,
            tx,
        );
        Self {
            exchange,
            db,
            worker,
            rx,
        }
    }

    fn locks(&self) -> LockCoordinator {
        LockCoordinator::new(self.db.clone(), "bot-test".to_string())
    }

    async fn tick(&mut self, bid: f64, ask: f64) {
        self.worker
            .handle_event(SymbolEvent::Book(make_depth(bid, ask, 1000.0)))
            .await
            .unwrap();
    }

    async fn fill(&mut self, order_id: &str, status: OrderStatus, side: OrderSide, price: f64) {
        self.worker
            .handle_event(SymbolEvent::Fill(FillEvent {
                order_id: order_id.to_string(),
                symbol: SYMBOL.to_string(),
                status,
                side,
                price,
                quantity: 50.0,
            }))
            .await
            .unwrap();
    }

    fn stored_status(&self, order_id: &str) -> OrderStatus {
        OrderRecord::find_by_external_id(self.db.get_connection(), order_id)
            .unwrap()
            .unwrap()
            .status
    }
}

#[tokio::test]
async fn test_entry_fill_through_closure_fill_scenario() {
    let mut harness = Harness::new();

    // First tick places the grid
    harness.tick(0.5000, 0.5010).await;
    let grid = harness.worker.grid().unwrap();
    assert_eq!(grid.state(), GridState::Complete);
    let bid_price = grid.bid_price;
    assert!(bid_price < 0.5000, "bid must clear the touch");
    assert!(grid.ask_price > 0.5010, "ask must clear the touch");

    // Entry fill on the BUY leg: lock first, opposite leg canceled, an
    // immediate SELL closure placed, metadata updated before returning
    harness.fill("M-1", OrderStatus::Filled, OrderSide::Buy, bid_price).await;

    let locks = harness.locks();
    assert!(locks.has_active_lock(SYMBOL));

    let lock = locks.get_lock(SYMBOL).unwrap().unwrap();
    assert_eq!(lock.position_id, "M-1");
    let metadata = lock.parsed_metadata().unwrap();
    assert_eq!(metadata.closure_order_id.as_deref(), Some("M-3"));

    let placed = harness.exchange.placed_orders();
    assert_eq!(placed.len(), 3);
    assert_eq!(placed[2].side, OrderSide::Sell);
    assert!(placed[2].price.is_none(), "closure is a market order");
    assert!((placed[2].quantity - 50.0).abs() < 1e-9, "sized to the entry");

    let canceled = harness.exchange.canceled_orders();
    assert!(canceled.contains(&"M-2".to_string()), "opposite leg canceled");

    assert_eq!(harness.stored_status("M-1"), OrderStatus::ClosedBySlTp);
    assert_eq!(harness.stored_status("M-2"), OrderStatus::Canceled);
    assert_eq!(harness.stored_status("M-3"), OrderStatus::New);

    let position = harness.worker.position().unwrap();
    assert_eq!(position.closure_order_id.as_deref(), Some("M-3"));

    // An unrelated FILLED event first: the lock must stay ACTIVE
    harness.fill("X-9", OrderStatus::Filled, OrderSide::Sell, 0.5000).await;
    assert!(harness.locks().has_active_lock(SYMBOL));

    // A tick far outside the old envelope: repositioning is a no-op while
    // the lock is held
    harness.tick(0.6000, 0.6012).await;
    assert_eq!(harness.exchange.placed_orders().len(), 3);
    assert!(harness.worker.grid().is_none());

    // The matching closure fill releases the lock and schedules recreation
    harness.fill("M-3", OrderStatus::Filled, OrderSide::Sell, 0.5000).await;
    assert!(!harness.locks().has_active_lock(SYMBOL));
    assert!(harness.worker.position().is_none());

    let queued = harness.rx.try_recv().expect("recreation scheduled");
    assert!(matches!(queued, SymbolEvent::EnsureGrid));
    harness.worker.handle_event(queued).await.unwrap();

    let grid = harness.worker.grid().unwrap();
    assert_eq!(grid.state(), GridState::Complete);
    assert_eq!(harness.exchange.placed_orders().len(), 5);
}

#[tokio::test]
async fn test_tick_repositioning_wins_over_stale_fill() {
    let mut harness = Harness::new();

    harness.tick(0.5000, 0.5010).await;
    assert_eq!(harness.exchange.placed_orders().len(), 2);

    // Price escapes the envelope: tear down and recreate immediately
    harness.tick(0.5200, 0.5210).await;
    assert_eq!(harness.exchange.placed_orders().len(), 4);
    let grid = harness.worker.grid().unwrap();
    assert_eq!(grid.bid_order_id.as_deref(), Some("M-3"));
    assert_eq!(grid.ask_order_id.as_deref(), Some("M-4"));

    // A stale FILLED event for the torn-down leg arrives afterwards. Its
    // record is already terminal and it matches no tracked leg: no lock is
    // created and the new grid is untouched.
    harness.fill("M-1", OrderStatus::Filled, OrderSide::Buy, 0.4992).await;

    assert!(!harness.locks().has_active_lock(SYMBOL));
    assert_eq!(harness.exchange.placed_orders().len(), 4);
    assert_eq!(harness.stored_status("M-1"), OrderStatus::Canceled);
    let grid = harness.worker.grid().unwrap();
    assert_eq!(grid.state(), GridState::Complete);
}

#[tokio::test]
async fn test_canceled_leg_is_reactivated() {
    let mut harness = Harness::new();

    harness.tick(0.5000, 0.5010).await;

    harness.fill("M-2", OrderStatus::Canceled, OrderSide::Sell, 0.5017).await;

    let grid = harness.worker.grid().unwrap();
    assert_eq!(grid.state(), GridState::Complete);
    assert_eq!(grid.bid_order_id.as_deref(), Some("M-1"), "bid leg untouched");
    assert_eq!(grid.ask_order_id.as_deref(), Some("M-3"), "ask leg re-placed");
    assert_eq!(harness.stored_status("M-2"), OrderStatus::Canceled);
}

#[tokio::test]
async fn test_rejected_leg_recreates_after_delay() {
    let mut harness = Harness::new();

    harness.tick(0.5000, 0.5010).await;
    let started = Instant::now();

    harness.fill("M-2", OrderStatus::Rejected, OrderSide::Sell, 0.5017).await;

    // Not recreated synchronously
    assert_eq!(harness.exchange.placed_orders().len(), 2);
    assert_eq!(harness.worker.grid().unwrap().state(), GridState::Partial);

    // The deferred EnsureGrid arrives after the configured delay (1s in
    // the test config)
    let queued = tokio::time::timeout(Duration::from_secs(3), harness.rx.recv())
        .await
        .expect("delayed recreation must be scheduled")
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(900));
    assert!(matches!(queued, SymbolEvent::EnsureGrid));

    harness.worker.handle_event(queued).await.unwrap();
    assert_eq!(harness.worker.grid().unwrap().state(), GridState::Complete);
    assert_eq!(harness.exchange.placed_orders().len(), 3);
}

#[tokio::test]
async fn test_orphan_external_cancel_triggers_full_reactivation() {
    let mut harness = Harness::new();

    harness.tick(0.5000, 0.5010).await;

    // A durable order of ours that no in-memory grid tracks
    OrderRecord::new(
        "O-X".to_string(),
        "bot-test".to_string(),
        SYMBOL.to_string(),
        OrderSide::Buy,
        0.4990,
        50.0,
    )
    .insert(harness.db.get_connection())
    .unwrap();

    harness.fill("O-X", OrderStatus::Canceled, OrderSide::Buy, 0.4990).await;

    // Old legs swept, fresh grid in place
    let canceled = harness.exchange.canceled_orders();
    assert!(canceled.contains(&"M-1".to_string()));
    assert!(canceled.contains(&"M-2".to_string()));

    let grid = harness.worker.grid().unwrap();
    assert_eq!(grid.bid_order_id.as_deref(), Some("M-3"));
    assert_eq!(grid.ask_order_id.as_deref(), Some("M-4"));
    assert_eq!(harness.stored_status("O-X"), OrderStatus::Canceled);
}

#[tokio::test]
async fn test_foreign_order_events_are_ignored() {
    let mut harness = Harness::new();

    harness.tick(0.5000, 0.5010).await;

    // Same shape as the reactivation case, but the record belongs to a
    // different bot: nothing happens
    OrderRecord::new(
        "THEIRS".to_string(),
        "bot-other".to_string(),
        SYMBOL.to_string(),
        OrderSide::Buy,
        0.4990,
        50.0,
    )
    .insert(harness.db.get_connection())
    .unwrap();

    harness.fill("THEIRS", OrderStatus::Canceled, OrderSide::Buy, 0.4990).await;

    assert_eq!(harness.exchange.placed_orders().len(), 2);
    assert!(harness.exchange.canceled_orders().is_empty());
}

#[tokio::test]
async fn test_ticks_inside_envelope_do_not_churn_the_grid() {
    let mut harness = Harness::new();

    harness.tick(0.5000, 0.5010).await;
    assert_eq!(harness.exchange.placed_orders().len(), 2);

    // Mid stays within ±0.05% of the grid midpoint: well inside both the
    // quoted envelope and the deviation threshold
    for mid in common::jittered_prices(0.5005, 50, 0.05) {
        harness.tick(mid - 0.0005, mid + 0.0005).await;
    }

    assert_eq!(harness.exchange.placed_orders().len(), 2, "no repositioning churn");
    assert!(harness.exchange.canceled_orders().is_empty());
    assert_eq!(harness.worker.grid().unwrap().state(), GridState::Complete);
}

#[tokio::test]
async fn test_insufficient_funds_aborts_cycle_and_retries_next_event() {
    let exchange = Arc::new(MockExchange::new());
    exchange.set_depth(SYMBOL, make_depth(0.5000, 0.5010, 1000.0));
    exchange.fail_next_with_insufficient_funds();

    let db = setup_memory_db();
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut worker = SymbolWorker::new(
        SYMBOL.to_string(),
        &create_test_config(),
        Arc::clone(&exchange) as Arc<dyn ExchangeAdapter>,
        db,
        None,
        tx,
    );

    let err = worker
        .handle_event(SymbolEvent::Book(make_depth(0.5000, 0.5010, 1000.0)))
        .await
        .expect_err("insufficient funds must surface");
    assert!(err.is_retryable());
    assert!(worker.grid().is_none());

    // The very next event retries and succeeds
    worker
        .handle_event(SymbolEvent::Book(make_depth(0.5000, 0.5010, 1000.0)))
        .await
        .unwrap();
    assert_eq!(worker.grid().unwrap().state(), GridState::Complete);
    assert_eq!(exchange.placed_orders().len(), 2);
}

#[tokio::test]
async fn test_failed_ioc_closure_rearms_monitoring() {
    let mut harness = Harness::new();

    harness.tick(0.5000, 0.5010).await;
    let bid_price = harness.worker.grid().unwrap().bid_price;
    harness.fill("M-1", OrderStatus::Filled, OrderSide::Buy, bid_price).await;

    let metadata = harness.locks().get_lock(SYMBOL).unwrap().unwrap().parsed_metadata().unwrap();
    assert_eq!(metadata.closure_order_id.as_deref(), Some("M-3"));

    // The IOC closure dies unfilled: the lock stays, but the pending
    // closure reference is cleared so the monitor can try again
    harness.fill("M-3", OrderStatus::Canceled, OrderSide::Sell, 0.5000).await;

    assert!(harness.locks().has_active_lock(SYMBOL));
    let metadata = harness.locks().get_lock(SYMBOL).unwrap().unwrap().parsed_metadata().unwrap();
    assert!(metadata.closure_order_id.is_none());
    assert!(harness.worker.position().unwrap().closure_order_id.is_none());

    // Next tick breaches the slippage guard and places a fresh closure
    harness.tick(0.5100, 0.5110).await;
    let placed = harness.exchange.placed_orders();
    assert_eq!(placed.last().unwrap().id, "M-4");
    assert!(placed.last().unwrap().price.is_none());
    assert_eq!(
        harness
            .locks()
            .get_lock(SYMBOL)
            .unwrap()
            .unwrap()
            .parsed_metadata()
            .unwrap()
            .closure_order_id
            .as_deref(),
        Some("M-4")
    );
}
