//! Public entry point of order creation.

use std::sync::Arc;
use std::time::Instant;

use common::UserId;
use domain::generate_order_sn;
use messaging::{Broker, CheckConfig, Message, TransactionProducer};
use order_store::OrderStore;
use serde::{Deserialize, Serialize};

use crate::clients::{CatalogClient, InventoryClient};
use crate::error::{Result, SagaError};
use crate::executor::{CreatedOrder, OrderTransactionListener};
use crate::messages::OrderDraft;

/// Caller's request to turn their checked cart entries into an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: UserId,
    pub address: String,
    pub signer_name: String,
    pub signer_mobile: String,
    /// Shipping method.
    pub post: String,
}

/// The transactional producer driving order creation.
pub type OrderProducer<S, C, I, B> = TransactionProducer<B, OrderTransactionListener<S, C, I, B>>;

/// Creates orders through a half message and reports the outcome
/// synchronously.
pub struct OrderOrchestrator<S, C, I, B>
where
    S: OrderStore,
    C: CatalogClient,
    I: InventoryClient,
    B: Broker,
{
    producer: Arc<OrderProducer<S, C, I, B>>,
}

impl<S, C, I, B> Clone for OrderOrchestrator<S, C, I, B>
where
    S: OrderStore,
    C: CatalogClient,
    I: InventoryClient,
    B: Broker,
{
    fn clone(&self) -> Self {
        Self {
            producer: self.producer.clone(),
        }
    }
}

impl<S, C, I, B> OrderOrchestrator<S, C, I, B>
where
    S: OrderStore,
    C: CatalogClient,
    I: InventoryClient,
    B: Broker,
{
    /// Creates an orchestrator whose half messages go through `broker`.
    pub fn new(
        broker: B,
        listener: OrderTransactionListener<S, C, I, B>,
        check: CheckConfig,
    ) -> Self {
        Self {
            producer: Arc::new(TransactionProducer::with_check_config(
                broker, listener, check,
            )),
        }
    }

    /// Returns the producer, for running its check-back loop.
    pub fn producer(&self) -> Arc<OrderProducer<S, C, I, B>> {
        self.producer.clone()
    }

    /// Creates an order from the user's checked cart entries.
    ///
    /// Exactly one half message is sent per call. If it cannot be sent,
    /// nothing else happens and [`SagaError::OutboxFailure`] is returned.
    #[tracing::instrument(skip(self, request), fields(user_id = %request.user_id, order_sn = tracing::field::Empty))]
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<CreatedOrder> {
        let start = Instant::now();
        let order_sn = generate_order_sn(request.user_id);
        tracing::Span::current().record("order_sn", tracing::field::display(&order_sn));

        let draft = OrderDraft {
            order_sn,
            user_id: request.user_id,
            address: request.address,
            signer_name: request.signer_name,
            signer_mobile: request.signer_mobile,
            post: request.post,
        };

        let result = self.send(&draft).await;
        metrics::histogram!("order_create_duration_seconds").record(start.elapsed().as_secs_f64());

        match result {
            Ok(created) => {
                metrics::counter!("order_create_total").increment(1);
                tracing::info!(order_id = %created.id, total = %created.total, "order created");
                Ok(created)
            }
            Err(e) => {
                metrics::counter!("order_create_failed", "kind" => e.kind()).increment(1);
                tracing::warn!(error = %e, "order creation failed");
                Err(e)
            }
        }
    }

    async fn send(&self, draft: &OrderDraft) -> Result<CreatedOrder> {
        let topic = &self.producer.listener().config().order_created_topic;
        let message =
            Message::json(topic, draft).map_err(|e| SagaError::OutboxFailure(e.to_string()))?;

        let sent = self
            .producer
            .send_in_transaction(message)
            .await
            .map_err(|e| SagaError::OutboxFailure(e.to_string()))?;
        if !sent.resolved {
            tracing::warn!(
                message_id = %sent.message_id,
                state = sent.state.as_str(),
                "half message left unresolved"
            );
        }
        sent.outcome
    }
}
