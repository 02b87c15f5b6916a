// Common test utilities and helpers

use mm_grid_bot::{
    BotConfig, Config, Database, Depth, DepthLevel, ExchangeConfig, RiskConfig, TradingConfig,
};

/// Create a test configuration with sensible defaults
pub fn create_test_config() -> Config {
    Config {
        bot: BotConfig {
            bot_id: "bot-test".to_string(),
            symbols: vec!["XRP/GBP".to_string()],
            db_path: ":memory:".to_string(),
        },
        exchange: ExchangeConfig {
            ws_url: "wss://ws.example.com".to_string(),
            rest_url: "https://api.example.com".to_string(),
            api_key: "test-key".to_string(),
            api_secret: "test-secret".to_string(),
        },
        trading: TradingConfig {
            order_amount: 50.0,
            spread_pct: 0.5,
            min_touch_buffer_pct: 0.05,
            max_price_deviation_pct: 1.0,
            book_ttl_secs: 5,
            rejected_retry_delay_secs: 1,
        },
        risk: RiskConfig {
            stop_loss_pct: 1.0,
            take_profit_pct: 0.5,
            slippage_exit_pct: 0.8,
        },
    }
}

/// In-memory database with the schema applied
pub fn setup_memory_db() -> Database {
    let db = Database::new_in_memory().expect("Failed to open in-memory database");
    db.run_migrations().expect("Failed to run migrations");
    db
}

/// Single-level book snapshot with generous depth
pub fn make_depth(bid: f64, ask: f64, volume: f64) -> Depth {
    Depth {
        bids: vec![DepthLevel { price: bid, volume }],
        asks: vec![DepthLevel { price: ask, volume }],
    }
}

/// Mid prices jittered independently around a base, bounded by
/// max_offset_pct so callers can keep them inside a known envelope
pub fn jittered_prices(base: f64, count: usize, max_offset_pct: f64) -> Vec<f64> {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| base * (1.0 + rng.gen_range(-max_offset_pct..max_offset_pct) / 100.0))
        .collect()
}
