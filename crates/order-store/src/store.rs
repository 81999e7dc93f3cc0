use async_trait::async_trait;

use crate::{
    CartEntry, GoodsId, NewOrder, Order, OrderId, OrderLineItem, OrderQuery, OrderSn, OrderStatus,
    Page, Result, UserId,
};

/// Persistence port for orders, order line items and cart entries.
///
/// Reads and single-statement cart writes go straight to the store. Multi-row
/// writes that must succeed or fail together go through a [`StoreTransaction`]
/// obtained from [`OrderStore::begin`]; the caller decides when to commit.
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// The transaction type handed out by [`OrderStore::begin`].
    type Transaction: StoreTransaction;

    /// Opens a local transaction.
    async fn begin(&self) -> Result<Self::Transaction>;

    /// Looks up an order by its order number.
    async fn find_order_by_sn(&self, order_sn: &OrderSn) -> Result<Option<Order>>;

    /// Looks up an order by id.
    async fn find_order(&self, id: OrderId) -> Result<Option<Order>>;

    /// Lists orders, newest first.
    async fn list_orders(&self, query: &OrderQuery) -> Result<Page<Order>>;

    /// Returns the line items written for an order.
    async fn line_items(&self, order_id: OrderId) -> Result<Vec<OrderLineItem>>;

    /// Returns every cart entry of a user.
    async fn cart_entries(&self, user_id: UserId) -> Result<Vec<CartEntry>>;

    /// Returns the checked cart entries of a user.
    async fn checked_cart_entries(&self, user_id: UserId) -> Result<Vec<CartEntry>>;

    /// Inserts an unchecked entry, or adds `quantity` to the existing entry
    /// for the same (user, goods) pair. Fails with
    /// [`StoreError::QuantityOutOfRange`](crate::StoreError::QuantityOutOfRange)
    /// if the sum would exceed [`MAX_QUANTITY`](crate::MAX_QUANTITY).
    async fn merge_cart_entry(
        &self,
        user_id: UserId,
        goods_id: GoodsId,
        quantity: u32,
    ) -> Result<CartEntry>;

    /// Overwrites quantity and checked flag. Returns the number of rows updated.
    async fn update_cart_entry(
        &self,
        user_id: UserId,
        goods_id: GoodsId,
        quantity: u32,
        checked: bool,
    ) -> Result<u64>;

    /// Deletes one cart entry. Returns the number of rows deleted.
    async fn delete_cart_entry(&self, user_id: UserId, goods_id: GoodsId) -> Result<u64>;
}

/// A local atomic transaction.
///
/// Dropping a transaction without calling [`StoreTransaction::commit`]
/// discards every write made through it.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Looks up an order by order number, locking the row until the transaction ends.
    async fn find_order_by_sn_for_update(&mut self, order_sn: &OrderSn) -> Result<Option<Order>>;

    /// Inserts an order with status `PENDING` and returns it with its assigned id.
    async fn insert_order(&mut self, order: &NewOrder) -> Result<Order>;

    /// Inserts all line items in one batch. Returns the number of rows written.
    async fn insert_line_items(&mut self, items: &[OrderLineItem]) -> Result<u64>;

    /// Sets the status of an order. Returns the number of rows updated.
    async fn update_order_status(&mut self, id: OrderId, status: OrderStatus) -> Result<u64>;

    /// Deletes the user's checked cart entries for the given goods. Entries
    /// checked after the selection was read are left alone. Returns the
    /// number of rows deleted.
    async fn delete_checked_cart_entries(
        &mut self,
        user_id: UserId,
        goods_ids: &[GoodsId],
    ) -> Result<u64>;

    /// Makes every write of this transaction durable and visible.
    async fn commit(self) -> Result<()>;

    /// Discards every write of this transaction.
    async fn rollback(self) -> Result<()>;
}
