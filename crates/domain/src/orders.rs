//! Order queries and payment-status updates.

use common::{OrderId, OrderSn, UserId};
use order_store::{
    Order, OrderLineItem, OrderQuery, OrderStatus, OrderStore, Page, StoreTransaction,
};
use serde::Serialize;

use crate::error::DomainError;

/// An order together with its line items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderDetail {
    pub order: Order,
    pub items: Vec<OrderLineItem>,
}

/// Service for reading orders and recording payment outcomes.
///
/// Orders are created only by the order-creation saga; this service never
/// inserts them.
#[derive(Clone)]
pub struct OrderService<S: OrderStore> {
    store: S,
}

impl<S: OrderStore> OrderService<S> {
    /// Creates a new order service over the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Lists orders, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn list_orders(&self, query: OrderQuery) -> Result<Page<Order>, DomainError> {
        Ok(self.store.list_orders(&query).await?)
    }

    /// Returns one of the user's orders with its line items.
    ///
    /// An order owned by another user is reported as not found.
    #[tracing::instrument(skip(self))]
    pub async fn order_detail(
        &self,
        user_id: UserId,
        order_id: OrderId,
    ) -> Result<OrderDetail, DomainError> {
        let order = self
            .store
            .find_order(order_id)
            .await?
            .filter(|o| o.user_id == user_id)
            .ok_or_else(|| DomainError::not_found("Order", order_id))?;

        let items = self.store.line_items(order.id).await?;
        Ok(OrderDetail { order, items })
    }

    /// Records the payment outcome of an order.
    ///
    /// Only `PENDING` orders move; repeating the current status succeeds
    /// without writing.
    #[tracing::instrument(skip(self))]
    pub async fn update_order_status(
        &self,
        order_sn: &OrderSn,
        status: OrderStatus,
    ) -> Result<Order, DomainError> {
        let mut tx = self.store.begin().await?;

        let Some(mut order) = tx.find_order_by_sn_for_update(order_sn).await? else {
            tx.rollback().await?;
            return Err(DomainError::not_found("Order", order_sn));
        };

        if order.status == status {
            tx.rollback().await?;
            return Ok(order);
        }

        if !order.status.can_transition_to(status) {
            tx.rollback().await?;
            return Err(DomainError::InvalidTransition {
                from: order.status,
                to: status,
            });
        }

        let updated = tx.update_order_status(order.id, status).await?;
        if updated == 0 {
            tx.rollback().await?;
            return Err(DomainError::not_found("Order", order_sn));
        }
        tx.commit().await?;

        metrics::counter!("order_status_updated_total", "status" => status.as_str()).increment(1);
        tracing::info!(%order_sn, from = %order.status, to = %status, "order status updated");

        order.status = status;
        Ok(order)
    }
}
