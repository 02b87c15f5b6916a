// Integration tests for engine startup, routing and shutdown

mod common;

use common::{create_test_config, make_depth, setup_memory_db};
use mm_grid_bot::{BotSession, Engine, ExchangeAdapter, MockExchange, SessionStatus};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_engine_start_places_grid_and_records_session() {
    let exchange = Arc::new(MockExchange::new());
    exchange.set_depth("XRP/GBP", make_depth(0.5000, 0.5010, 1000.0));

    let db = setup_memory_db();
    let mut engine = Engine::new(
        create_test_config(),
        db.clone(),
        Arc::clone(&exchange) as Arc<dyn ExchangeAdapter>,
    );

    engine.start().await.unwrap();
    let session_id = engine.session_id().expect("session row created");

    let session = BotSession::find_by_id(db.get_connection(), session_id)
        .unwrap()
        .unwrap();
    assert_eq!(session.status, SessionStatus::Running);

    let (book_subs, trade_subs) = exchange.subscriptions();
    assert_eq!(book_subs, vec!["XRP/GBP".to_string()]);
    assert_eq!(trade_subs, vec!["XRP/GBP".to_string()]);

    // The primed book and initial recovery run in the worker task
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(exchange.placed_orders().len(), 2);

    engine.shutdown().await;

    let session = BotSession::find_by_id(db.get_connection(), session_id)
        .unwrap()
        .unwrap();
    assert_eq!(session.status, SessionStatus::Stopped);
    assert!(session.ended_at.is_some());

    // Shutdown sweeps resting orders per symbol
    assert!(exchange
        .canceled_orders()
        .contains(&"ALL:XRP/GBP".to_string()));
}

#[tokio::test]
async fn test_engine_rejects_invalid_config() {
    let exchange = Arc::new(MockExchange::new());
    let mut config = create_test_config();
    config.trading.spread_pct = 0.0;

    let mut engine = Engine::new(
        config,
        setup_memory_db(),
        exchange as Arc<dyn ExchangeAdapter>,
    );
    assert!(engine.start().await.is_err());
}

#[tokio::test]
async fn test_engine_error_is_persisted_on_session() {
    let exchange = Arc::new(MockExchange::new());
    exchange.set_depth("XRP/GBP", make_depth(0.5000, 0.5010, 1000.0));

    let db = setup_memory_db();
    let mut engine = Engine::new(
        create_test_config(),
        db.clone(),
        exchange as Arc<dyn ExchangeAdapter>,
    );
    engine.start().await.unwrap();
    let session_id = engine.session_id().unwrap();

    engine.mark_error("stream disconnected");

    let session = BotSession::find_by_id(db.get_connection(), session_id)
        .unwrap()
        .unwrap();
    assert_eq!(session.status, SessionStatus::Error);
    assert_eq!(session.error_message.as_deref(), Some("stream disconnected"));
}
