//! Saga configuration.

use std::time::Duration;

use messaging::DelayLevel;

use crate::topics;

/// Tuning of the order-creation saga.
#[derive(Debug, Clone)]
pub struct SagaConfig {
    pub order_created_topic: String,
    pub order_timeout_topic: String,
    pub stock_return_topic: String,
    /// Payment window before an unpaid order is closed.
    pub timeout_delay: DelayLevel,
    pub catalog_timeout: Duration,
    pub inventory_timeout: Duration,
    /// Attempts at sending a stock return before giving up.
    pub stock_return_attempts: u32,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            order_created_topic: topics::ORDER_CREATED.to_string(),
            order_timeout_topic: topics::ORDER_TIMEOUT.to_string(),
            stock_return_topic: topics::STOCK_RETURN.to_string(),
            timeout_delay: DelayLevel::THIRTY_MINUTES,
            catalog_timeout: Duration::from_secs(3),
            inventory_timeout: Duration::from_secs(3),
            stock_return_attempts: 3,
        }
    }
}
