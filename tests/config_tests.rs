// Integration tests for configuration loading and validation

mod common;

use common::create_test_config;
use mm_grid_bot::Config;
use tempfile::TempDir;

#[test]
fn test_config_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");

    let config = create_test_config();
    config.to_file(&path).expect("Failed to write config");

    let loaded = Config::from_file(&path).expect("Failed to load config");
    assert_eq!(loaded.bot.bot_id, "bot-test");
    assert_eq!(loaded.bot.symbols, vec!["XRP/GBP".to_string()]);
    assert_eq!(loaded.trading.spread_pct, 0.5);
    assert_eq!(loaded.risk.stop_loss_pct, 1.0);
}

#[test]
fn test_load_or_create_writes_default() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");

    assert!(!path.exists());
    let config = Config::load_or_create(&path).expect("Failed to create default config");
    assert!(path.exists());
    assert!(!config.bot.symbols.is_empty());
}

#[test]
fn test_zero_spread_is_rejected() {
    let mut config = create_test_config();
    config.trading.spread_pct = 0.0;
    assert!(config.validate().is_err());
}

#[test]
fn test_negative_spread_is_rejected() {
    let mut config = create_test_config();
    config.trading.spread_pct = -0.5;
    assert!(config.validate().is_err());
}

#[test]
fn test_empty_symbols_rejected() {
    let mut config = create_test_config();
    config.bot.symbols.clear();
    assert!(config.validate().is_err());
}

#[test]
fn test_zero_order_amount_rejected() {
    let mut config = create_test_config();
    config.trading.order_amount = 0.0;
    assert!(config.validate().is_err());
}

#[test]
fn test_zero_book_ttl_rejected() {
    let mut config = create_test_config();
    config.trading.book_ttl_secs = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_invalid_file_is_rejected_on_load() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");
    std::fs::write(&path, "not valid toml [").unwrap();

    assert!(Config::from_file(&path).is_err());
}

#[test]
fn test_validation_failure_surfaces_on_load() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("config.toml");

    let mut config = create_test_config();
    config.risk.take_profit_pct = 0.0;
    config.to_file(&path).unwrap();

    // Invalid values must fail the load, never default silently
    assert!(Config::from_file(&path).is_err());
}
