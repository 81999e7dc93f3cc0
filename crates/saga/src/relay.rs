//! Forwards stock returns to the inventory client.

use std::time::Duration;

use async_trait::async_trait;
use messaging::{ConsumeResult, Message, MessageHandler};

use crate::clients::{InventoryClient, with_timeout};
use crate::messages::StockReturn;

/// Consumes stock return messages and calls [`InventoryClient::release`].
///
/// Release is idempotent per order number, so redelivery is harmless.
pub struct StockReleaseRelay<I> {
    inventory: I,
    timeout: Duration,
}

impl<I: InventoryClient> StockReleaseRelay<I> {
    pub fn new(inventory: I, timeout: Duration) -> Self {
        Self { inventory, timeout }
    }
}

#[async_trait]
impl<I: InventoryClient> MessageHandler for StockReleaseRelay<I> {
    async fn handle(&self, message: &Message) -> ConsumeResult {
        let stock_return = match message.decode::<StockReturn>() {
            Ok(stock_return) => stock_return,
            Err(e) => {
                tracing::error!(message_id = %message.id, error = %e, "undecodable stock return, dropping");
                return ConsumeResult::Success;
            }
        };

        match with_timeout(
            self.timeout,
            self.inventory
                .release(&stock_return.order_sn, &stock_return.lines),
        )
        .await
        {
            Ok(()) => {
                tracing::info!(order_sn = %stock_return.order_sn, "stock released");
                ConsumeResult::Success
            }
            Err(e) => {
                tracing::warn!(order_sn = %stock_return.order_sn, error = %e, "stock release failed");
                ConsumeResult::RetryLater
            }
        }
    }
}
