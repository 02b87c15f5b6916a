// Configuration management for the market-making engine

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub bot_id: String,
    pub symbols: Vec<String>,
    pub db_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub ws_url: String,
    pub rest_url: String,
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    pub order_amount: f64,
    pub spread_pct: f64,              // full bid/ask spread as % of mid
    pub min_touch_buffer_pct: f64,    // minimum clearance from the opposite touch
    pub max_price_deviation_pct: f64, // teardown threshold from grid midpoint
    pub book_ttl_secs: u64,
    pub rejected_retry_delay_secs: u64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            order_amount: 50.0,
            spread_pct: 0.5,
            min_touch_buffer_pct: 0.05,
            max_price_deviation_pct: 1.0,
            book_ttl_secs: 5,
            rejected_retry_delay_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub slippage_exit_pct: f64, // emergency exit when |PnL%| exceeds this
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            stop_loss_pct: 1.0,
            take_profit_pct: 0.5,
            slippage_exit_pct: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bot: BotConfig,
    pub exchange: ExchangeConfig,
    pub trading: TradingConfig,
    pub risk: RiskConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot: BotConfig {
                bot_id: "mm-bot-1".to_string(),
                symbols: vec!["XRP/GBP".to_string()],
                db_path: "data/mm-bot.db".to_string(),
            },
            exchange: ExchangeConfig {
                ws_url: "wss://ws.kraken.com".to_string(),
                rest_url: "https://api.kraken.com".to_string(),
                api_key: "YOUR_API_KEY".to_string(),
                api_secret: "YOUR_API_SECRET".to_string(),
            },
            trading: TradingConfig::default(),
            risk: RiskConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::FileRead(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;

        fs::write(path, content).map_err(|e| ConfigError::FileWrite(e.to_string()))?;

        Ok(())
    }

    /// Load configuration from file, or create default if file doesn't exist
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            let config = Self::default();
            config.to_file(&path)?;
            println!("📁 Created default config file: {}", path.as_ref().display());
            Ok(config)
        }
    }

    /// Validate configuration values. Failures here are fatal for startup,
    /// never silently defaulted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bot.bot_id.is_empty() {
            return Err(ConfigError::Validation("bot_id must not be empty".to_string()));
        }

        if self.bot.symbols.is_empty() {
            return Err(ConfigError::Validation(
                "at least one symbol must be configured".to_string(),
            ));
        }

        if self.trading.spread_pct <= 0.0 {
            return Err(ConfigError::Validation("spread_pct must be positive".to_string()));
        }

        if self.trading.order_amount <= 0.0 {
            return Err(ConfigError::Validation("order_amount must be positive".to_string()));
        }

        if self.trading.min_touch_buffer_pct < 0.0 {
            return Err(ConfigError::Validation(
                "min_touch_buffer_pct must be non-negative".to_string(),
            ));
        }

        if self.trading.max_price_deviation_pct <= 0.0 {
            return Err(ConfigError::Validation(
                "max_price_deviation_pct must be positive".to_string(),
            ));
        }

        if self.trading.book_ttl_secs == 0 {
            return Err(ConfigError::Validation("book_ttl_secs must be greater than 0".to_string()));
        }

        if self.risk.stop_loss_pct <= 0.0 {
            return Err(ConfigError::Validation("stop_loss_pct must be positive".to_string()));
        }

        if self.risk.take_profit_pct <= 0.0 {
            return Err(ConfigError::Validation("take_profit_pct must be positive".to_string()));
        }

        if self.risk.slippage_exit_pct <= 0.0 {
            return Err(ConfigError::Validation(
                "slippage_exit_pct must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(String),

    #[error("Failed to write config file: {0}")]
    FileWrite(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Failed to serialize config: {0}")]
    Serialize(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}
