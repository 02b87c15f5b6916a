//! Pre-flight validation module for the market-making engine
//!
//! Performs comprehensive checks before starting trading operations
//! to ensure system readiness and prevent errors.

use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::Database;
use crate::exchange::ExchangeAdapter;

/// Validation result with detailed findings
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub passed: bool,
    pub checks: Vec<ValidationCheck>,
}

#[derive(Debug, Clone)]
pub struct ValidationCheck {
    pub name: String,
    pub passed: bool,
    pub message: String,
    pub level: ValidationLevel,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationLevel {
    Critical, // Must pass for operation to proceed
    Warning,  // Should pass, but operation can continue
    Info,     // Informational only
}

impl ValidationResult {
    pub fn new() -> Self {
        ValidationResult {
            passed: true,
            checks: Vec::new(),
        }
    }

    pub fn add_check(&mut self, check: ValidationCheck) {
        if !check.passed && check.level == ValidationLevel::Critical {
            self.passed = false;
        }
        self.checks.push(check);
    }

    pub fn critical_failures(&self) -> Vec<&ValidationCheck> {
        self.checks
            .iter()
            .filter(|c| !c.passed && c.level == ValidationLevel::Critical)
            .collect()
    }

    pub fn warnings(&self) -> Vec<&ValidationCheck> {
        self.checks
            .iter()
            .filter(|c| !c.passed && c.level == ValidationLevel::Warning)
            .collect()
    }

    pub fn display(&self) {
        info!("🔍 Pre-flight Validation");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        for check in &self.checks {
            let icon = if check.passed {
                "✅"
            } else {
                match check.level {
                    ValidationLevel::Critical => "❌",
                    ValidationLevel::Warning => "⚠️",
                    ValidationLevel::Info => "ℹ️",
                }
            };

            info!("{} {} - {}", icon, check.name, check.message);
        }

        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if !self.passed {
            let failures = self.critical_failures();
            error!("❌ Validation failed: {} critical issue(s)", failures.len());
            for failure in failures {
                error!("   • {}: {}", failure.name, failure.message);
            }
        } else {
            let warnings = self.warnings();
            if !warnings.is_empty() {
                warn!("⚠️  {} warning(s) detected", warnings.len());
                for warning in warnings {
                    warn!("   • {}: {}", warning.name, warning.message);
                }
            }
            info!("✅ All critical checks passed");
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Pre-flight validator for engine startup
pub struct PreFlightValidator {
    config: Config,
}

impl PreFlightValidator {
    pub fn new(config: Config) -> Self {
        PreFlightValidator { config }
    }

    /// Run full validation suite
    pub async fn validate_all(&self, exchange: &dyn ExchangeAdapter) -> ValidationResult {
        let mut result = ValidationResult::new();

        result.add_check(self.check_config());
        result.add_check(self.check_api_keys());
        result.add_check(self.check_database());
        result.add_check(self.check_exchange_reachability(exchange).await);

        result
    }

    fn check_config(&self) -> ValidationCheck {
        match self.config.validate() {
            Ok(()) => ValidationCheck {
                name: "Configuration".to_string(),
                passed: true,
                message: format!(
                    "{} symbol(s), spread {:.2}%",
                    self.config.bot.symbols.len(),
                    self.config.trading.spread_pct
                ),
                level: ValidationLevel::Info,
            },
            Err(e) => ValidationCheck {
                name: "Configuration".to_string(),
                passed: false,
                message: e.to_string(),
                level: ValidationLevel::Critical,
            },
        }
    }

    fn check_api_keys(&self) -> ValidationCheck {
        let placeholder = self.config.exchange.api_key.is_empty()
            || self.config.exchange.api_key.starts_with("YOUR_")
            || self.config.exchange.api_secret.is_empty()
            || self.config.exchange.api_secret.starts_with("YOUR_");

        ValidationCheck {
            name: "API Keys".to_string(),
            passed: !placeholder,
            message: if placeholder {
                "API credentials look like placeholders".to_string()
            } else {
                "credentials present".to_string()
            },
            level: ValidationLevel::Critical,
        }
    }

    fn check_database(&self) -> ValidationCheck {
        let outcome = Database::new(&self.config.bot.db_path)
            .and_then(|db| db.run_migrations().map(|_| db))
            .and_then(|db| db.health_check());

        match outcome {
            Ok(true) => ValidationCheck {
                name: "Database".to_string(),
                passed: true,
                message: format!("{} is reachable", self.config.bot.db_path),
                level: ValidationLevel::Info,
            },
            Ok(false) => ValidationCheck {
                name: "Database".to_string(),
                passed: false,
                message: "health check query returned unexpected result".to_string(),
                level: ValidationLevel::Critical,
            },
            Err(e) => ValidationCheck {
                name: "Database".to_string(),
                passed: false,
                message: e.to_string(),
                level: ValidationLevel::Critical,
            },
        }
    }

    async fn check_exchange_reachability(
        &self,
        exchange: &dyn ExchangeAdapter,
    ) -> ValidationCheck {
        let Some(symbol) = self.config.bot.symbols.first() else {
            return ValidationCheck {
                name: "Exchange".to_string(),
                passed: false,
                message: "no symbols configured to probe".to_string(),
                level: ValidationLevel::Critical,
            };
        };
        match exchange.get_depth(symbol).await {
            Ok(depth) if depth.mid_price().is_some() => ValidationCheck {
                name: "Exchange".to_string(),
                passed: true,
                message: format!("order book for {} available", symbol),
                level: ValidationLevel::Info,
            },
            Ok(_) => ValidationCheck {
                name: "Exchange".to_string(),
                passed: false,
                message: format!("order book for {} is empty", symbol),
                level: ValidationLevel::Warning,
            },
            Err(e) => ValidationCheck {
                name: "Exchange".to_string(),
                passed: false,
                message: e.to_string(),
                level: ValidationLevel::Critical,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_critical_failure_fails_result() {
        let mut result = ValidationResult::new();
        result.add_check(ValidationCheck {
            name: "Test".to_string(),
            passed: false,
            message: "broken".to_string(),
            level: ValidationLevel::Critical,
        });
        assert!(!result.passed);
        assert_eq!(result.critical_failures().len(), 1);
    }

    #[test]
    fn test_warning_does_not_fail_result() {
        let mut result = ValidationResult::new();
        result.add_check(ValidationCheck {
            name: "Test".to_string(),
            passed: false,
            message: "iffy".to_string(),
            level: ValidationLevel::Warning,
        });
        assert!(result.passed);
        assert_eq!(result.warnings().len(), 1);
    }
}
