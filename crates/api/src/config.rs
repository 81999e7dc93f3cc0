//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use messaging::{CheckConfig, DelayLevel};
use saga::SagaConfig;

/// Slack added on top of the remote call timeouts when deriving the
/// check-back immunity window.
const CHECK_IMMUNITY_MARGIN: Duration = Duration::from_secs(5);

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `DATABASE_URL`: PostgreSQL connection string; unset runs fully in memory
/// - `ORDER_TIMEOUT_DELAY_LEVEL`: payment window as a broker delay level (default: `16`, 30 minutes)
/// - `CATALOG_TIMEOUT_MS` / `INVENTORY_TIMEOUT_MS`: remote call timeouts (default: `3000`)
/// - `TX_CHECK_MAX_ATTEMPTS`: check-backs before a half message is rolled back (default: `15`)
///
/// Half messages are not checked back while the local transaction can still be
/// waiting on the catalog and inventory, so the immunity window grows with
/// `CATALOG_TIMEOUT_MS + INVENTORY_TIMEOUT_MS`.
/// - `TX_CHECK_INTERVAL_MS`: pause between check-back passes (default: `60000`)
/// - `CONSUMER_POLL_INTERVAL_MS`: consumer idle poll interval (default: `1000`)
/// - `CONSUMER_MAX_RECONSUME`: redeliveries before dead-lettering (default: `16`)
/// - `MESSAGE_RETENTION_MS`: how long the in-memory broker keeps resolved messages (default: 72 hours)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub order_timeout_delay_level: u8,
    pub catalog_timeout: Duration,
    pub inventory_timeout: Duration,
    pub tx_check_max_attempts: u32,
    pub tx_check_interval: Duration,
    pub consumer_poll_interval: Duration,
    pub consumer_max_reconsume: u32,
    pub message_retention: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_or("PORT", defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.is_empty()),
            order_timeout_delay_level: env_or(
                "ORDER_TIMEOUT_DELAY_LEVEL",
                defaults.order_timeout_delay_level,
            ),
            catalog_timeout: env_millis_or("CATALOG_TIMEOUT_MS", defaults.catalog_timeout),
            inventory_timeout: env_millis_or("INVENTORY_TIMEOUT_MS", defaults.inventory_timeout),
            tx_check_max_attempts: env_or("TX_CHECK_MAX_ATTEMPTS", defaults.tx_check_max_attempts),
            tx_check_interval: env_millis_or("TX_CHECK_INTERVAL_MS", defaults.tx_check_interval),
            consumer_poll_interval: env_millis_or(
                "CONSUMER_POLL_INTERVAL_MS",
                defaults.consumer_poll_interval,
            ),
            consumer_max_reconsume: env_or(
                "CONSUMER_MAX_RECONSUME",
                defaults.consumer_max_reconsume,
            ),
            message_retention: env_millis_or("MESSAGE_RETENTION_MS", defaults.message_retention),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Builds the saga settings. An out-of-range delay level falls back to 30 minutes.
    pub fn saga_config(&self) -> SagaConfig {
        let timeout_delay = DelayLevel::new(self.order_timeout_delay_level).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "using the default order timeout");
            DelayLevel::THIRTY_MINUTES
        });
        SagaConfig {
            timeout_delay,
            catalog_timeout: self.catalog_timeout,
            inventory_timeout: self.inventory_timeout,
            ..SagaConfig::default()
        }
    }

    /// Builds the check-back settings. The immunity window outlasts both
    /// remote calls of the local transaction plus [`CHECK_IMMUNITY_MARGIN`].
    pub fn check_config(&self) -> CheckConfig {
        let defaults = CheckConfig::default();
        let busy = self
            .catalog_timeout
            .saturating_add(self.inventory_timeout)
            .saturating_add(CHECK_IMMUNITY_MARGIN);
        CheckConfig {
            immunity: defaults.immunity.max(busy),
            max_check_times: self.tx_check_max_attempts,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            order_timeout_delay_level: DelayLevel::THIRTY_MINUTES.get(),
            catalog_timeout: Duration::from_millis(3000),
            inventory_timeout: Duration::from_millis(3000),
            tx_check_max_attempts: 15,
            tx_check_interval: Duration::from_millis(60_000),
            consumer_poll_interval: Duration::from_millis(1000),
            consumer_max_reconsume: 16,
            message_retention: Duration::from_secs(72 * 60 * 60),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_millis_or(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}
