//! Timeout compensation for unpaid orders.

use async_trait::async_trait;
use messaging::{Broker, ConsumeResult, Message, MessageHandler};
use order_store::{OrderStatus, OrderStore, StoreTransaction};

use crate::executor::discard;
use crate::messages::{OrderTimeout, StockReturn};

/// Closes orders still unpaid when their timeout message fires and asks
/// inventory to give their stock back.
///
/// Delivery is at-least-once. The handler re-reads the order status under a
/// row lock before acting, so a redelivered timeout for an order it already
/// closed is a no-op.
pub struct TimeoutCompensator<S, B> {
    store: S,
    broker: B,
    stock_return_topic: String,
}

impl<S: OrderStore, B: Broker> TimeoutCompensator<S, B> {
    pub fn new(store: S, broker: B, stock_return_topic: impl Into<String>) -> Self {
        Self {
            store,
            broker,
            stock_return_topic: stock_return_topic.into(),
        }
    }

    #[tracing::instrument(skip(self, timeout), fields(order_sn = %timeout.order_sn))]
    async fn compensate(&self, timeout: &OrderTimeout) -> ConsumeResult {
        match self.store.find_order_by_sn(&timeout.order_sn).await {
            Ok(Some(order)) if order.status.is_terminal() => {
                tracing::debug!(status = %order.status, "order already settled");
                return ConsumeResult::Success;
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::info!("order no longer exists, nothing to compensate");
                return ConsumeResult::Success;
            }
            Err(e) => {
                tracing::warn!(error = %e, "order lookup failed");
                return ConsumeResult::RetryLater;
            }
        }

        let mut tx = match self.store.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                tracing::warn!(error = %e, "cannot open transaction");
                return ConsumeResult::RetryLater;
            }
        };

        let order = match tx.find_order_by_sn_for_update(&timeout.order_sn).await {
            Ok(Some(order)) if order.status == OrderStatus::Pending => order,
            Ok(_) => {
                // Paid or closed between the two reads.
                discard(tx).await;
                return ConsumeResult::Success;
            }
            Err(e) => {
                tracing::warn!(error = %e, "locked order lookup failed");
                discard(tx).await;
                return ConsumeResult::RetryLater;
            }
        };

        if let Err(e) = tx
            .update_order_status(order.id, OrderStatus::TradeClosed)
            .await
        {
            tracing::warn!(error = %e, "failed to close order");
            discard(tx).await;
            return ConsumeResult::RetryLater;
        }

        if let Err(e) = self.send_stock_return(timeout).await {
            metrics::counter!("stock_release_send_failures_total").increment(1);
            tracing::warn!(error = %e, "stock return send failed, keeping order open");
            discard(tx).await;
            return ConsumeResult::RetryLater;
        }

        if let Err(e) = tx.commit().await {
            // The stock return is already out; release is idempotent per order number.
            tracing::warn!(error = %e, "failed to commit order close");
            return ConsumeResult::RetryLater;
        }

        metrics::counter!("order_timeout_closed_total").increment(1);
        metrics::counter!("stock_release_sent_total").increment(1);
        tracing::info!(order_id = %order.id, "unpaid order closed, stock return sent");
        ConsumeResult::Success
    }

    async fn send_stock_return(&self, timeout: &OrderTimeout) -> messaging::Result<()> {
        let payload = StockReturn {
            order_sn: timeout.order_sn.clone(),
            lines: timeout.lines.clone(),
        };
        self.broker
            .send(Message::json(&self.stock_return_topic, &payload)?)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl<S: OrderStore, B: Broker> MessageHandler for TimeoutCompensator<S, B> {
    async fn handle(&self, message: &Message) -> ConsumeResult {
        match message.decode::<OrderTimeout>() {
            Ok(timeout) => self.compensate(&timeout).await,
            Err(e) => {
                // Redelivery cannot fix a malformed payload.
                tracing::error!(message_id = %message.id, error = %e, "undecodable order timeout, dropping");
                ConsumeResult::Success
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common::{GoodsId, Money, OrderSn, UserId};
    use messaging::InMemoryBroker;
    use order_store::{InMemoryOrderStore, NewOrder, StoreFault};

    use super::*;
    use crate::clients::StockLine;

    async fn pending_order(store: &InMemoryOrderStore, sn: &str) {
        let mut tx = store.begin().await.unwrap();
        tx.insert_order(&NewOrder {
            order_sn: OrderSn::new(sn),
            user_id: UserId::new(1),
            address: String::new(),
            signer_name: String::new(),
            signer_mobile: String::new(),
            post: String::new(),
            total: Money::from_cents(100),
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();
    }

    fn timeout_message(sn: &str) -> Message {
        let timeout = OrderTimeout {
            order_sn: OrderSn::new(sn),
            user_id: UserId::new(1),
            lines: vec![StockLine {
                goods_id: GoodsId::new(1),
                quantity: 1,
            }],
        };
        Message::json("order_timeout", &timeout).unwrap()
    }

    #[tokio::test]
    async fn test_pending_order_is_closed() {
        let store = InMemoryOrderStore::new();
        let broker = InMemoryBroker::new();
        pending_order(&store, "sn-1").await;
        let compensator = TimeoutCompensator::new(store.clone(), broker.clone(), "order_reback");

        let result = compensator.handle(&timeout_message("sn-1")).await;

        assert_eq!(result, ConsumeResult::Success);
        let order = store
            .find_order_by_sn(&OrderSn::new("sn-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.status, OrderStatus::TradeClosed);
        assert_eq!(broker.messages("order_reback").await.len(), 1);
    }

    #[tokio::test]
    async fn test_send_failure_keeps_order_pending() {
        let store = InMemoryOrderStore::new();
        let broker = InMemoryBroker::new();
        pending_order(&store, "sn-1").await;
        broker.set_fail_on_send("order_reback", true).await;
        let compensator = TimeoutCompensator::new(store.clone(), broker.clone(), "order_reback");

        let result = compensator.handle(&timeout_message("sn-1")).await;

        assert_eq!(result, ConsumeResult::RetryLater);
        let order = store
            .find_order_by_sn(&OrderSn::new("sn-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_payment_holding_the_row_lock_wins() {
        let store = InMemoryOrderStore::new();
        let broker = InMemoryBroker::new();
        pending_order(&store, "sn-1").await;
        let compensator = TimeoutCompensator::new(store.clone(), broker.clone(), "order_reback");

        let mut paying = store.begin().await.unwrap();
        let order = paying
            .find_order_by_sn_for_update(&OrderSn::new("sn-1"))
            .await
            .unwrap()
            .unwrap();

        let message = timeout_message("sn-1");

        let (result, ()) = tokio::join!(compensator.handle(&message), async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            paying
                .update_order_status(order.id, OrderStatus::TradeSuccess)
                .await
                .unwrap();
            paying.commit().await.unwrap();
        });

        assert_eq!(result, ConsumeResult::Success);
        let order = store
            .find_order_by_sn(&OrderSn::new("sn-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.status, OrderStatus::TradeSuccess);
        assert!(broker.messages("order_reback").await.is_empty());
    }

    #[tokio::test]
    async fn test_store_outage_retries() {
        let store = InMemoryOrderStore::new();
        let broker = InMemoryBroker::new();
        pending_order(&store, "sn-1").await;
        store.fail_on(StoreFault::UpdateStatus);
        let compensator = TimeoutCompensator::new(store.clone(), broker.clone(), "order_reback");

        assert_eq!(
            compensator.handle(&timeout_message("sn-1")).await,
            ConsumeResult::RetryLater
        );
        assert!(broker.messages("order_reback").await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_order_is_a_no_op() {
        let broker = InMemoryBroker::new();
        let compensator =
            TimeoutCompensator::new(InMemoryOrderStore::new(), broker.clone(), "order_reback");

        assert_eq!(
            compensator.handle(&timeout_message("sn-404")).await,
            ConsumeResult::Success
        );
        assert!(broker.messages("order_reback").await.is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_dropped() {
        let broker = InMemoryBroker::new();
        let compensator =
            TimeoutCompensator::new(InMemoryOrderStore::new(), broker.clone(), "order_reback");

        let result = compensator
            .handle(&Message::new("order_timeout", b"{".to_vec()))
            .await;

        assert_eq!(result, ConsumeResult::Success);
    }
}
