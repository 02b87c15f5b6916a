//! Unified error handling for the market-making engine
//!
//! This module provides a single error type that replaces Box<dyn Error>
//! throughout the application with context-rich, actionable error messages.

use std::fmt;
use std::io;

/// Main error type for the market-making engine
#[derive(Debug)]
pub enum TradingError {
    // Configuration errors
    ConfigNotFound(String),
    ConfigParse(String),
    ConfigValidation(String),

    // Database errors
    DatabaseConnection(String),
    DatabaseQuery(String),
    DatabaseMigration(String),
    DatabaseConstraint(String),

    // Exchange API errors
    ApiConnection(String),
    ApiAuthentication(String),
    ApiRateLimit(String),
    ApiResponse(String),
    ApiTimeout(String),

    // Validation errors
    ValidationFailed(String),
    InvalidParameter(String, String), // (parameter_name, reason)
    InsufficientFunds(f64, f64),      // (required, available)

    // Trading errors
    OrderFailed(String),
    OrderRejected(String),
    InsufficientLiquidity(String),
    LockConflict(String),
    StaleMarketData(String),

    // Network errors
    NetworkUnavailable(String),
    ConnectionTimeout(String),

    // General errors
    Internal(String),
}

impl TradingError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TradingError::ApiTimeout(_)
                | TradingError::ConnectionTimeout(_)
                | TradingError::NetworkUnavailable(_)
                | TradingError::ApiRateLimit(_)
                | TradingError::InsufficientFunds(_, _)
        )
    }

    /// Get error category for logging/metrics
    pub fn category(&self) -> &'static str {
        match self {
            TradingError::ConfigNotFound(_)
            | TradingError::ConfigParse(_)
            | TradingError::ConfigValidation(_) => "config",

            TradingError::DatabaseConnection(_)
            | TradingError::DatabaseQuery(_)
            | TradingError::DatabaseMigration(_)
            | TradingError::DatabaseConstraint(_) => "database",

            TradingError::ApiConnection(_)
            | TradingError::ApiAuthentication(_)
            | TradingError::ApiRateLimit(_)
            | TradingError::ApiResponse(_)
            | TradingError::ApiTimeout(_) => "api",

            TradingError::ValidationFailed(_)
            | TradingError::InvalidParameter(_, _)
            | TradingError::InsufficientFunds(_, _) => "validation",

            TradingError::OrderFailed(_)
            | TradingError::OrderRejected(_)
            | TradingError::InsufficientLiquidity(_)
            | TradingError::LockConflict(_)
            | TradingError::StaleMarketData(_) => "trading",

            TradingError::NetworkUnavailable(_) | TradingError::ConnectionTimeout(_) => "network",

            TradingError::Internal(_) => "internal",
        }
    }

    /// Get a user-friendly error message with helpful context
    pub fn user_message(&self) -> String {
        match self {
            TradingError::ConfigNotFound(path) => {
                format!(
                    "Configuration file not found: {}\n\n\
                    💡 Quick fix:\n\
                    1. Run: mm-bot init\n\
                    2. Edit config.toml with your API keys\n\
                    3. Try again",
                    path
                )
            }
            TradingError::ConfigValidation(msg) => {
                format!(
                    "Configuration validation error: {}\n\n\
                    💡 Check config.toml for:\n\
                    - Valid API keys (not placeholders)\n\
                    - Positive spread and order amount\n\
                    - At least one symbol",
                    msg
                )
            }
            TradingError::ApiAuthentication(msg) => {
                format!(
                    "API authentication failed: {}\n\n\
                    💡 Check:\n\
                    - API key is correct\n\
                    - API secret is correct\n\
                    - Keys have trading permissions",
                    msg
                )
            }
            TradingError::InsufficientFunds(required, available) => {
                format!(
                    "Insufficient funds for operation\n\
                    Required: {:.2}\n\
                    Available: {:.2}\n\n\
                    💡 Either top up the account or reduce order_amount",
                    required, available
                )
            }
            _ => self.to_string(),
        }
    }
}

impl fmt::Display for TradingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradingError::ConfigNotFound(path) => {
                write!(f, "Configuration file not found: {}", path)
            }
            TradingError::ConfigParse(msg) => write!(f, "Configuration parse error: {}", msg),
            TradingError::ConfigValidation(msg) => {
                write!(f, "Configuration validation error: {}", msg)
            }

            TradingError::DatabaseConnection(msg) => {
                write!(f, "Database connection error: {}", msg)
            }
            TradingError::DatabaseQuery(msg) => write!(f, "Database query error: {}", msg),
            TradingError::DatabaseMigration(msg) => write!(f, "Database migration error: {}", msg),
            TradingError::DatabaseConstraint(msg) => {
                write!(f, "Database constraint violation: {}", msg)
            }

            TradingError::ApiConnection(msg) => write!(f, "API connection error: {}", msg),
            TradingError::ApiAuthentication(msg) => write!(f, "API authentication failed: {}", msg),
            TradingError::ApiRateLimit(msg) => write!(f, "API rate limit exceeded: {}", msg),
            TradingError::ApiResponse(msg) => write!(f, "API response error: {}", msg),
            TradingError::ApiTimeout(msg) => write!(f, "API timeout: {}", msg),

            TradingError::ValidationFailed(msg) => write!(f, "Validation failed: {}", msg),
            TradingError::InvalidParameter(param, reason) => {
                write!(f, "Invalid parameter '{}': {}", param, reason)
            }
            TradingError::InsufficientFunds(required, available) => {
                write!(
                    f,
                    "Insufficient funds: required {:.2}, available {:.2}",
                    required, available
                )
            }

            TradingError::OrderFailed(msg) => write!(f, "Order failed: {}", msg),
            TradingError::OrderRejected(msg) => write!(f, "Order rejected: {}", msg),
            TradingError::InsufficientLiquidity(msg) => {
                write!(f, "Insufficient liquidity: {}", msg)
            }
            TradingError::LockConflict(msg) => write!(f, "Trading lock conflict: {}", msg),
            TradingError::StaleMarketData(msg) => write!(f, "Stale market data: {}", msg),

            TradingError::NetworkUnavailable(msg) => write!(f, "Network unavailable: {}", msg),
            TradingError::ConnectionTimeout(msg) => write!(f, "Connection timeout: {}", msg),

            TradingError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for TradingError {}

// Conversion implementations for common error types

impl From<io::Error> for TradingError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => TradingError::ConnectionTimeout(err.to_string()),
            io::ErrorKind::ConnectionRefused => TradingError::NetworkUnavailable(err.to_string()),
            _ => TradingError::Internal(format!("IO error: {}", err)),
        }
    }
}

impl From<rusqlite::Error> for TradingError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(_, Some(msg)) => {
                if msg.contains("UNIQUE constraint") || msg.contains("FOREIGN KEY constraint") {
                    TradingError::DatabaseConstraint(msg)
                } else {
                    TradingError::DatabaseQuery(msg)
                }
            }
            rusqlite::Error::QueryReturnedNoRows => {
                TradingError::DatabaseQuery("Query returned no rows".to_string())
            }
            _ => TradingError::DatabaseQuery(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for TradingError {
    fn from(err: serde_json::Error) -> Self {
        TradingError::Internal(format!("JSON error: {}", err))
    }
}

impl From<toml::de::Error> for TradingError {
    fn from(err: toml::de::Error) -> Self {
        TradingError::ConfigParse(format!("TOML parse error: {}", err))
    }
}

impl From<reqwest::Error> for TradingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TradingError::ApiTimeout(err.to_string())
        } else if err.is_connect() {
            TradingError::ApiConnection(err.to_string())
        } else if err.is_status() {
            TradingError::ApiResponse(err.to_string())
        } else {
            TradingError::ApiConnection(err.to_string())
        }
    }
}

impl From<crate::config::ConfigError> for TradingError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::FileRead(msg) => TradingError::ConfigNotFound(msg),
            ConfigError::FileWrite(msg) => TradingError::Internal(msg),
            ConfigError::Parse(msg) => TradingError::ConfigParse(msg),
            ConfigError::Serialize(msg) => TradingError::Internal(msg),
            ConfigError::Validation(msg) => TradingError::ConfigValidation(msg),
        }
    }
}

impl From<String> for TradingError {
    fn from(msg: String) -> Self {
        TradingError::Internal(msg)
    }
}

impl From<&str> for TradingError {
    fn from(msg: &str) -> Self {
        TradingError::Internal(msg.to_string())
    }
}

/// Result type alias using TradingError
pub type TradingResult<T> = Result<T, TradingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TradingError::ConfigNotFound("config.toml".to_string());
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn test_error_category() {
        let err = TradingError::ConfigValidation("test".to_string());
        assert_eq!(err.category(), "config");

        let err = TradingError::DatabaseQuery("test".to_string());
        assert_eq!(err.category(), "database");

        let err = TradingError::StaleMarketData("test".to_string());
        assert_eq!(err.category(), "trading");
    }

    #[test]
    fn test_retryable() {
        let err = TradingError::ApiTimeout("test".to_string());
        assert!(err.is_retryable());

        let err = TradingError::InsufficientFunds(100.0, 50.0);
        assert!(err.is_retryable());

        let err = TradingError::ConfigNotFound("test".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_user_message() {
        let err = TradingError::InsufficientFunds(100.0, 50.0);
        let msg = err.user_message();
        assert!(msg.contains("100.00"));
        assert!(msg.contains("50.00"));
    }
}
