//! Local transaction of the order-creation saga and its check-back.
//!
//! The executor runs while the order-created half message is held by the
//! broker. Remote calls (catalog, inventory) happen first; only then is the
//! local transaction opened, so no row lock is held across a network call.
//!
//! Once stock has been deducted, every failure path emits a stock return
//! message before reporting the failure.

use async_trait::async_trait;
use common::{Money, OrderId, OrderSn};
use domain::{PricedSelection, PricingError, distinct_goods_ids, price_selection};
use messaging::{Broker, LocalTransactionState, Message, TransactionListener};
use order_store::{Order, OrderStore, StoreError, StoreTransaction};
use serde::{Deserialize, Serialize};

use crate::clients::{CatalogClient, ClientError, InventoryClient, StockLine, with_timeout};
use crate::config::SagaConfig;
use crate::error::{Result, SagaError};
use crate::messages::{OrderDraft, OrderTimeout, StockReturn, stock_lines};

/// What the caller learns about a created order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedOrder {
    pub id: OrderId,
    pub order_sn: OrderSn,
    pub total: Money,
}

impl From<&Order> for CreatedOrder {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            order_sn: order.order_sn.clone(),
            total: order.total,
        }
    }
}

/// Result of the local transaction.
enum Persisted {
    Committed(Order),
    /// Nothing was written.
    RolledBack(SagaError),
    /// The writes may or may not have landed.
    Ambiguous(StoreError),
}

/// Transaction listener that turns an order draft into a persisted order.
pub struct OrderTransactionListener<S, C, I, B> {
    store: S,
    catalog: C,
    inventory: I,
    broker: B,
    config: SagaConfig,
}

impl<S, C, I, B> OrderTransactionListener<S, C, I, B>
where
    S: OrderStore,
    C: CatalogClient,
    I: InventoryClient,
    B: Broker,
{
    pub fn new(store: S, catalog: C, inventory: I, broker: B, config: SagaConfig) -> Self {
        Self {
            store,
            catalog,
            inventory,
            broker,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    #[tracing::instrument(skip(self, draft), fields(order_sn = %draft.order_sn, user_id = %draft.user_id))]
    async fn execute(&self, draft: &OrderDraft) -> (LocalTransactionState, Result<CreatedOrder>) {
        let selection = match self.price(draft).await {
            Ok(selection) => selection,
            Err(e) => return (LocalTransactionState::Rollback, Err(e)),
        };
        let lines = stock_lines(&selection);

        if let Err(e) = with_timeout(
            self.config.inventory_timeout,
            self.inventory.reserve(&draft.order_sn, &lines),
        )
        .await
        {
            tracing::warn!(error = %e, "stock reservation failed");
            // A timed out reservation may still land.
            if matches!(e, ClientError::Timeout(_)) {
                self.return_stock(&draft.order_sn, &lines).await;
            }
            return (
                LocalTransactionState::Rollback,
                Err(SagaError::StockUnavailable(e.to_string())),
            );
        }

        match self.persist(draft, &selection, &lines).await {
            Persisted::Committed(order) => {
                tracing::info!(order_id = %order.id, total = %order.total, "order persisted");
                (LocalTransactionState::Commit, Ok(CreatedOrder::from(&order)))
            }
            Persisted::RolledBack(e) => {
                tracing::warn!(error = %e, "local transaction rolled back");
                self.return_stock(&draft.order_sn, &lines).await;
                (LocalTransactionState::Rollback, Err(e))
            }
            Persisted::Ambiguous(cause) => self.settle(draft, &lines, cause).await,
        }
    }

    /// Loads the checked cart entries and prices them against the catalog.
    async fn price(&self, draft: &OrderDraft) -> Result<PricedSelection> {
        let entries = self
            .store
            .checked_cart_entries(draft.user_id)
            .await
            .map_err(|e| SagaError::PersistenceFailure(e.to_string()))?;
        if entries.is_empty() {
            return Err(SagaError::EmptySelection);
        }

        let ids = distinct_goods_ids(&entries);
        let goods = with_timeout(
            self.config.catalog_timeout,
            self.catalog.batch_get_goods(&ids),
        )
        .await
        .map_err(|e| SagaError::CatalogUnavailable(e.to_string()))?;

        price_selection(&entries, &goods).map_err(|e| match e {
            PricingError::EmptySelection => SagaError::EmptySelection,
            PricingError::MissingGoods(_) => SagaError::CatalogUnavailable(e.to_string()),
            PricingError::ZeroQuantity(_) => SagaError::Internal(e.to_string()),
        })
    }

    /// Writes the order, its line items and the cart cleanup in one local
    /// transaction, and schedules the timeout message before committing.
    async fn persist(
        &self,
        draft: &OrderDraft,
        selection: &PricedSelection,
        lines: &[StockLine],
    ) -> Persisted {
        let mut tx = match self.store.begin().await {
            Ok(tx) => tx,
            Err(e) => return Persisted::RolledBack(SagaError::PersistenceFailure(e.to_string())),
        };

        let order = match write_order(&mut tx, draft, selection).await {
            Ok(order) => order,
            Err(e @ StoreError::DuplicateOrderSn(_)) => {
                discard(tx).await;
                return Persisted::Ambiguous(e);
            }
            Err(e) => {
                discard(tx).await;
                return Persisted::RolledBack(SagaError::PersistenceFailure(e.to_string()));
            }
        };

        if let Err(e) = self.schedule_timeout(draft, lines).await {
            discard(tx).await;
            return Persisted::RolledBack(e);
        }

        match tx.commit().await {
            Ok(()) => Persisted::Committed(order),
            Err(e) => Persisted::Ambiguous(e),
        }
    }

    async fn schedule_timeout(&self, draft: &OrderDraft, lines: &[StockLine]) -> Result<()> {
        let timeout = OrderTimeout {
            order_sn: draft.order_sn.clone(),
            user_id: draft.user_id,
            lines: lines.to_vec(),
        };
        let message = Message::json(&self.config.order_timeout_topic, &timeout)
            .map_err(|e| SagaError::OutboxFailure(e.to_string()))?
            .with_delay(self.config.timeout_delay);

        self.broker
            .send(message)
            .await
            .map_err(|e| SagaError::OutboxFailure(e.to_string()))?;
        Ok(())
    }

    /// Decides the fate of a transaction whose commit outcome is unclear by
    /// looking the order up.
    async fn settle(
        &self,
        draft: &OrderDraft,
        lines: &[StockLine],
        cause: StoreError,
    ) -> (LocalTransactionState, Result<CreatedOrder>) {
        match self.store.find_order_by_sn(&draft.order_sn).await {
            Ok(Some(order)) => {
                tracing::info!(error = %cause, order_id = %order.id, "order found after unclear commit");
                (LocalTransactionState::Commit, Ok(CreatedOrder::from(&order)))
            }
            Ok(None) => {
                tracing::warn!(error = %cause, "order missing after unclear commit");
                self.return_stock(&draft.order_sn, lines).await;
                (
                    LocalTransactionState::Rollback,
                    Err(SagaError::PersistenceFailure(cause.to_string())),
                )
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    cause = %cause,
                    "cannot tell whether the order was committed, leaving it to check-back"
                );
                (
                    LocalTransactionState::Unknown,
                    Err(SagaError::Internal(format!("commit outcome unknown: {cause}"))),
                )
            }
        }
    }

    /// Sends a stock return, retrying a bounded number of times.
    ///
    /// Returns false if every attempt failed; the stock then needs manual
    /// reconciliation.
    pub(crate) async fn return_stock(&self, order_sn: &OrderSn, lines: &[StockLine]) -> bool {
        let payload = StockReturn {
            order_sn: order_sn.clone(),
            lines: lines.to_vec(),
        };
        let attempts = self.config.stock_return_attempts.max(1);

        for attempt in 1..=attempts {
            let sent = match Message::json(&self.config.stock_return_topic, &payload) {
                Ok(message) => self.broker.send(message).await.map(|_| ()),
                Err(e) => Err(e),
            };
            match sent {
                Ok(()) => {
                    metrics::counter!("stock_release_sent_total").increment(1);
                    tracing::info!(order_sn = %order_sn, "stock return sent");
                    return true;
                }
                Err(e) => {
                    tracing::warn!(order_sn = %order_sn, attempt, error = %e, "stock return send failed");
                }
            }
        }

        metrics::counter!("stock_release_send_failures_total").increment(1);
        tracing::error!(order_sn = %order_sn, ?lines, "stock return could not be sent, stock needs reconciliation");
        false
    }
}

async fn write_order<T: StoreTransaction>(
    tx: &mut T,
    draft: &OrderDraft,
    selection: &PricedSelection,
) -> std::result::Result<Order, StoreError> {
    let order = tx.insert_order(&draft.to_new_order(selection.total)).await?;
    tx.insert_line_items(&selection.line_items(order.id)).await?;

    // Only the priced entries; anything checked since then stays in the cart.
    let priced: Vec<_> = selection.quantities().map(|(goods_id, _)| goods_id).collect();
    let deleted = tx
        .delete_checked_cart_entries(draft.user_id, &priced)
        .await?;
    if deleted != priced.len() as u64 {
        return Err(StoreError::Conflict(format!(
            "expected to clear {} checked cart entries, found {deleted}",
            priced.len()
        )));
    }
    Ok(order)
}

/// Rolls a transaction back, logging instead of propagating a failure.
pub(crate) async fn discard<T: StoreTransaction>(tx: T) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!(error = %e, "rollback failed");
    }
}

#[async_trait]
impl<S, C, I, B> TransactionListener for OrderTransactionListener<S, C, I, B>
where
    S: OrderStore,
    C: CatalogClient,
    I: InventoryClient,
    B: Broker,
{
    type Outcome = Result<CreatedOrder>;

    async fn execute_local_transaction(
        &self,
        message: &Message,
    ) -> (LocalTransactionState, Self::Outcome) {
        match message.decode::<OrderDraft>() {
            Ok(draft) => self.execute(&draft).await,
            Err(e) => {
                tracing::error!(message_id = %message.id, error = %e, "undecodable order draft");
                (
                    LocalTransactionState::Rollback,
                    Err(SagaError::Internal(e.to_string())),
                )
            }
        }
    }

    /// The order number is unique, so the presence of the order row is the
    /// whole answer.
    async fn check_local_transaction(&self, message: &Message) -> LocalTransactionState {
        let draft = match message.decode::<OrderDraft>() {
            Ok(draft) => draft,
            Err(e) => {
                tracing::error!(message_id = %message.id, error = %e, "undecodable order draft");
                return LocalTransactionState::Rollback;
            }
        };

        match self.store.find_order_by_sn(&draft.order_sn).await {
            Ok(Some(_)) => LocalTransactionState::Commit,
            Ok(None) => LocalTransactionState::Rollback,
            Err(e) => {
                tracing::warn!(order_sn = %draft.order_sn, error = %e, "check-back lookup failed");
                LocalTransactionState::Unknown
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common::{GoodsId, UserId};
    use domain::GoodsInfo;
    use messaging::InMemoryBroker;
    use order_store::{InMemoryOrderStore, StoreFault};

    use super::*;
    use crate::clients::{InMemoryCatalog, InMemoryInventory};

    type Listener = OrderTransactionListener<
        InMemoryOrderStore,
        InMemoryCatalog,
        InMemoryInventory,
        InMemoryBroker,
    >;

    struct Fixture {
        store: InMemoryOrderStore,
        inventory: InMemoryInventory,
        broker: InMemoryBroker,
        listener: Listener,
    }

    async fn fixture() -> Fixture {
        let store = InMemoryOrderStore::new();
        let catalog = InMemoryCatalog::new();
        let inventory = InMemoryInventory::new();
        let broker = InMemoryBroker::new();

        catalog
            .put(GoodsInfo {
                id: GoodsId::new(1),
                name: "tea".to_string(),
                price: Money::from_cents(300),
                image: "tea.png".to_string(),
            })
            .await;
        inventory.set_stock(GoodsId::new(1), 10).await;
        store
            .put_cart_entry(UserId::new(7), GoodsId::new(1), 2, true)
            .await;

        let listener = OrderTransactionListener::new(
            store.clone(),
            catalog,
            inventory.clone(),
            broker.clone(),
            SagaConfig::default(),
        );
        Fixture {
            store,
            inventory,
            broker,
            listener,
        }
    }

    fn draft_message(sn: &str) -> Message {
        let draft = OrderDraft {
            order_sn: OrderSn::new(sn),
            user_id: UserId::new(7),
            address: "1 Main St".to_string(),
            signer_name: "Sam".to_string(),
            signer_mobile: "555-0100".to_string(),
            post: "standard".to_string(),
        };
        Message::json("order_created", &draft).unwrap()
    }

    #[tokio::test]
    async fn test_execute_commits_and_schedules_timeout() {
        let f = fixture().await;

        let (state, outcome) = f
            .listener
            .execute_local_transaction(&draft_message("sn-1"))
            .await;

        assert_eq!(state, LocalTransactionState::Commit);
        let created = outcome.unwrap();
        assert_eq!(created.total, Money::from_cents(600));
        assert_eq!(f.inventory.stock(GoodsId::new(1)).await, 8);

        let timeouts = f.broker.messages("order_timeout").await;
        assert_eq!(timeouts.len(), 1);
        let timeout: OrderTimeout = timeouts[0].decode().unwrap();
        assert_eq!(timeout.order_sn, OrderSn::new("sn-1"));
        assert_eq!(timeouts[0].delay, Some(messaging::DelayLevel::THIRTY_MINUTES));
    }

    #[tokio::test]
    async fn test_unclear_commit_resolved_by_lookup() {
        let f = fixture().await;
        f.store.fail_on(StoreFault::Commit);

        let (state, outcome) = f
            .listener
            .execute_local_transaction(&draft_message("sn-1"))
            .await;

        // The in-memory commit fails before applying anything.
        assert_eq!(state, LocalTransactionState::Rollback);
        assert!(matches!(outcome, Err(SagaError::PersistenceFailure(_))));
        assert_eq!(f.broker.messages("order_reback").await.len(), 1);
    }

    #[tokio::test]
    async fn test_unclear_commit_with_failing_lookup_is_unknown() {
        let f = fixture().await;
        f.store.fail_on(StoreFault::Commit);
        f.store.fail_on(StoreFault::Read);

        let (state, outcome) = f
            .listener
            .execute_local_transaction(&draft_message("sn-1"))
            .await;

        assert_eq!(state, LocalTransactionState::Unknown);
        assert!(matches!(outcome, Err(SagaError::Internal(_))));
    }

    #[tokio::test]
    async fn test_reservation_timeout_returns_stock() {
        let mut f = fixture().await;
        f.listener.inventory = f.inventory.clone().with_latency(Duration::from_millis(200));
        f.listener.config.inventory_timeout = Duration::from_millis(10);

        let (state, outcome) = f
            .listener
            .execute_local_transaction(&draft_message("sn-1"))
            .await;

        assert_eq!(state, LocalTransactionState::Rollback);
        assert!(matches!(outcome, Err(SagaError::StockUnavailable(_))));
        assert_eq!(f.broker.messages("order_reback").await.len(), 1);
    }

    #[tokio::test]
    async fn test_stock_return_retries_are_bounded() {
        let f = fixture().await;
        f.broker.set_fail_on_send("order_reback", true).await;

        let sent = f.listener.return_stock(&OrderSn::new("sn-1"), &[]).await;

        assert!(!sent);
    }

    #[tokio::test]
    async fn test_check_with_undecodable_payload_rolls_back() {
        let f = fixture().await;
        let message = Message::new("order_created", b"not json".to_vec());

        assert_eq!(
            f.listener.check_local_transaction(&message).await,
            LocalTransactionState::Rollback
        );
    }

    #[tokio::test]
    async fn test_check_with_failing_store_is_unknown() {
        let f = fixture().await;
        f.store.fail_on(StoreFault::Read);

        assert_eq!(
            f.listener
                .check_local_transaction(&draft_message("sn-1"))
                .await,
            LocalTransactionState::Unknown
        );
    }
}
