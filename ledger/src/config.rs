//! Ledger configuration.

use std::time::Duration;

use rust_decimal::Decimal;

use strongbox_common::{has_money_scale, AmountPolicy, DEFAULT_MAX_AMOUNT};

/// Database pool configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Connection URL.
    pub url: String,
    /// Maximum open connections.
    pub max_connections: u32,
    /// Connections kept open while idle.
    pub min_connections: u32,
    /// Maximum lifetime of a pooled connection.
    pub max_lifetime: Duration,
    /// How long to wait for a pooled connection.
    pub acquire_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/strongbox".to_string(),
            max_connections: 25,
            min_connections: 5,
            max_lifetime: Duration::from_secs(5 * 60),
            acquire_timeout: Duration::from_secs(1),
        }
    }
}

/// Main ledger configuration.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Largest amount one operation may move.
    pub max_amount: Decimal,
    /// Bound on a whole unit, lock waits included. `None` waits forever.
    pub unit_timeout: Option<Duration>,
    /// Database configuration.
    pub database: DatabaseConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_amount: DEFAULT_MAX_AMOUNT,
            unit_timeout: Some(Duration::from_secs(10)),
            database: DatabaseConfig::default(),
        }
    }
}

impl LedgerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(max) = std::env::var("LEDGER_MAX_AMOUNT") {
            if let Ok(max) = max.parse() {
                config.max_amount = max;
            }
        }

        if let Ok(ms) = std::env::var("LEDGER_UNIT_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse::<u64>() {
                // 0 disables the bound
                config.unit_timeout = (ms > 0).then(|| Duration::from_millis(ms));
            }
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = url;
        }

        if let Ok(max) = std::env::var("DB_MAX_OPEN_CONNS") {
            if let Ok(max) = max.parse() {
                config.database.max_connections = max;
            }
        }

        if let Ok(min) = std::env::var("DB_MAX_IDLE_CONNS") {
            if let Ok(min) = min.parse() {
                config.database.min_connections = min;
            }
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_amount <= Decimal::ZERO {
            return Err("Maximum amount must be positive".to_string());
        }

        if !has_money_scale(self.max_amount) {
            return Err("Maximum amount can have at most 2 decimal places".to_string());
        }

        if self.unit_timeout == Some(Duration::ZERO) {
            return Err("Unit timeout cannot be 0".to_string());
        }

        if self.database.url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }

        if self.database.max_connections == 0 {
            return Err("Database pool needs at least one connection".to_string());
        }

        if self.database.min_connections > self.database.max_connections {
            return Err("Idle connections cannot exceed open connections".to_string());
        }

        Ok(())
    }

    /// Amount policy derived from this configuration.
    pub fn amount_policy(&self) -> AmountPolicy {
        AmountPolicy::new(self.max_amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config() {
        let config = LedgerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.amount_policy().max_amount, dec!(1000000));
    }

    #[test]
    fn test_invalid_config() {
        let mut config = LedgerConfig::default();
        config.max_amount = dec!(0.001);
        assert!(config.validate().is_err());

        let mut config = LedgerConfig::default();
        config.database.min_connections = 30;
        assert!(config.validate().is_err());

        let mut config = LedgerConfig::default();
        config.unit_timeout = Some(Duration::ZERO);
        assert!(config.validate().is_err());
    }
}
