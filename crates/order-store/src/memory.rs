use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::{
    CartEntry, GoodsId, MAX_QUANTITY, NewOrder, Order, OrderId, OrderLineItem, OrderQuery, OrderSn,
    OrderStatus, Page, Result, StoreError, UserId,
    store::{OrderStore, StoreTransaction},
};

/// Operations of the in-memory store that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreFault {
    /// Order lookups by order number.
    Read,
    InsertOrder,
    InsertLineItems,
    DeleteCart,
    UpdateStatus,
    Commit,
}

impl StoreFault {
    const fn bit(self) -> u32 {
        1 << self as u32
    }
}

#[derive(Debug, Default)]
struct Tables {
    orders: Vec<Order>,
    line_items: Vec<OrderLineItem>,
    cart: Vec<CartEntry>,
    next_cart_id: i64,
}

/// In-memory order store for testing and local runs.
///
/// Transactions buffer their writes and apply them under a single write lock
/// on commit, so a rolled back or dropped transaction leaves no trace.
/// Reading an order for update, or updating it, takes a per-order lock held
/// until the transaction ends, like a row lock.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    tables: Arc<RwLock<Tables>>,
    row_locks: RowLocks,
    faults: Arc<AtomicU32>,
    next_order_id: Arc<AtomicI64>,
}

type RowLocks = Arc<Mutex<HashMap<OrderId, Arc<Mutex<()>>>>>;

impl InMemoryOrderStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the given operation fail until [`InMemoryOrderStore::clear_faults`] is called.
    pub fn fail_on(&self, fault: StoreFault) {
        self.faults.fetch_or(fault.bit(), Ordering::SeqCst);
    }

    /// Removes every injected fault.
    pub fn clear_faults(&self) {
        self.faults.store(0, Ordering::SeqCst);
    }

    /// Inserts or replaces a cart entry as-is.
    pub async fn put_cart_entry(
        &self,
        user_id: UserId,
        goods_id: GoodsId,
        quantity: u32,
        checked: bool,
    ) -> CartEntry {
        let mut tables = self.tables.write().await;
        tables
            .cart
            .retain(|e| !(e.user_id == user_id && e.goods_id == goods_id));
        tables.next_cart_id += 1;
        let entry = CartEntry {
            id: tables.next_cart_id,
            user_id,
            goods_id,
            quantity,
            checked,
        };
        tables.cart.push(entry.clone());
        entry
    }

    /// Returns every committed order.
    pub async fn orders(&self) -> Vec<Order> {
        self.tables.read().await.orders.clone()
    }

    /// Returns the number of committed line items across all orders.
    pub async fn line_item_count(&self) -> usize {
        self.tables.read().await.line_items.len()
    }

    fn check(&self, fault: StoreFault) -> Result<()> {
        check_fault(&self.faults, fault)
    }
}

fn check_fault(faults: &AtomicU32, fault: StoreFault) -> Result<()> {
    if faults.load(Ordering::SeqCst) & fault.bit() != 0 {
        return Err(StoreError::Unavailable(format!("injected {fault:?} failure")));
    }
    Ok(())
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    type Transaction = InMemoryTransaction;

    async fn begin(&self) -> Result<InMemoryTransaction> {
        Ok(InMemoryTransaction {
            tables: self.tables.clone(),
            row_locks: self.row_locks.clone(),
            faults: self.faults.clone(),
            next_order_id: self.next_order_id.clone(),
            writes: Vec::new(),
            held_rows: Vec::new(),
        })
    }

    async fn find_order_by_sn(&self, order_sn: &OrderSn) -> Result<Option<Order>> {
        self.check(StoreFault::Read)?;
        let tables = self.tables.read().await;
        Ok(tables
            .orders
            .iter()
            .find(|o| &o.order_sn == order_sn)
            .cloned())
    }

    async fn find_order(&self, id: OrderId) -> Result<Option<Order>> {
        self.check(StoreFault::Read)?;
        let tables = self.tables.read().await;
        Ok(tables.orders.iter().find(|o| o.id == id).cloned())
    }

    async fn list_orders(&self, query: &OrderQuery) -> Result<Page<Order>> {
        self.check(StoreFault::Read)?;
        let tables = self.tables.read().await;
        let mut orders: Vec<_> = tables
            .orders
            .iter()
            .filter(|o| query.user_id.is_none_or(|u| o.user_id == u))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.id.cmp(&a.id));

        let total = orders.len() as u64;
        let items = orders
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit() as usize)
            .collect();
        Ok(Page { total, items })
    }

    async fn line_items(&self, order_id: OrderId) -> Result<Vec<OrderLineItem>> {
        let tables = self.tables.read().await;
        Ok(tables
            .line_items
            .iter()
            .filter(|i| i.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn cart_entries(&self, user_id: UserId) -> Result<Vec<CartEntry>> {
        let tables = self.tables.read().await;
        Ok(tables
            .cart
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn checked_cart_entries(&self, user_id: UserId) -> Result<Vec<CartEntry>> {
        let tables = self.tables.read().await;
        Ok(tables
            .cart
            .iter()
            .filter(|e| e.user_id == user_id && e.checked)
            .cloned()
            .collect())
    }

    async fn merge_cart_entry(
        &self,
        user_id: UserId,
        goods_id: GoodsId,
        quantity: u32,
    ) -> Result<CartEntry> {
        if quantity > MAX_QUANTITY {
            return Err(StoreError::QuantityOutOfRange(goods_id));
        }
        let mut tables = self.tables.write().await;
        if let Some(entry) = tables
            .cart
            .iter_mut()
            .find(|e| e.user_id == user_id && e.goods_id == goods_id)
        {
            entry.quantity = entry
                .quantity
                .checked_add(quantity)
                .filter(|q| *q <= MAX_QUANTITY)
                .ok_or(StoreError::QuantityOutOfRange(goods_id))?;
            return Ok(entry.clone());
        }

        tables.next_cart_id += 1;
        let entry = CartEntry {
            id: tables.next_cart_id,
            user_id,
            goods_id,
            quantity,
            checked: false,
        };
        tables.cart.push(entry.clone());
        Ok(entry)
    }

    async fn update_cart_entry(
        &self,
        user_id: UserId,
        goods_id: GoodsId,
        quantity: u32,
        checked: bool,
    ) -> Result<u64> {
        if quantity > MAX_QUANTITY {
            return Err(StoreError::QuantityOutOfRange(goods_id));
        }
        let mut tables = self.tables.write().await;
        match tables
            .cart
            .iter_mut()
            .find(|e| e.user_id == user_id && e.goods_id == goods_id)
        {
            Some(entry) => {
                entry.quantity = quantity;
                entry.checked = checked;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_cart_entry(&self, user_id: UserId, goods_id: GoodsId) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.cart.len();
        tables
            .cart
            .retain(|e| !(e.user_id == user_id && e.goods_id == goods_id));
        Ok((before - tables.cart.len()) as u64)
    }
}

#[derive(Debug)]
enum PendingWrite {
    InsertOrder(Order),
    InsertLineItems(Vec<OrderLineItem>),
    UpdateStatus(OrderId, OrderStatus),
    DeleteCheckedCart {
        user_id: UserId,
        goods_ids: Vec<GoodsId>,
        expected: usize,
    },
}

/// Transaction handed out by [`InMemoryOrderStore`].
pub struct InMemoryTransaction {
    tables: Arc<RwLock<Tables>>,
    row_locks: RowLocks,
    faults: Arc<AtomicU32>,
    next_order_id: Arc<AtomicI64>,
    writes: Vec<PendingWrite>,
    /// Released when the transaction is committed, rolled back or dropped.
    held_rows: Vec<(OrderId, OwnedMutexGuard<()>)>,
}

fn checked_entries<'a>(
    cart: &'a [CartEntry],
    user_id: UserId,
    goods_ids: &'a [GoodsId],
) -> impl Iterator<Item = &'a CartEntry> + 'a {
    cart.iter()
        .filter(move |e| e.user_id == user_id && e.checked && goods_ids.contains(&e.goods_id))
}

impl InMemoryTransaction {
    fn pending_order(&self, order_sn: &OrderSn) -> Option<Order> {
        self.writes.iter().find_map(|w| match w {
            PendingWrite::InsertOrder(o) if &o.order_sn == order_sn => Some(o.clone()),
            _ => None,
        })
    }

    /// Waits for the order's row lock unless this transaction already holds it.
    async fn lock_row(&mut self, id: OrderId) {
        if self.held_rows.iter().any(|(held, _)| *held == id) {
            return;
        }
        let row = self.row_locks.lock().await.entry(id).or_default().clone();
        let guard = row.lock_owned().await;
        self.held_rows.push((id, guard));
    }

    fn pending_status(&self, id: OrderId) -> Option<OrderStatus> {
        self.writes.iter().rev().find_map(|w| match w {
            PendingWrite::UpdateStatus(order_id, status) if *order_id == id => Some(*status),
            _ => None,
        })
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn find_order_by_sn_for_update(&mut self, order_sn: &OrderSn) -> Result<Option<Order>> {
        check_fault(&self.faults, StoreFault::Read)?;
        let mut order = match self.pending_order(order_sn) {
            Some(order) => Some(order),
            None => {
                let id = self
                    .tables
                    .read()
                    .await
                    .orders
                    .iter()
                    .find(|o| &o.order_sn == order_sn)
                    .map(|o| o.id);
                let Some(id) = id else {
                    return Ok(None);
                };
                self.lock_row(id).await;
                // Re-read: the holder we waited for may have changed the row.
                let tables = self.tables.read().await;
                tables.orders.iter().find(|o| o.id == id).cloned()
            }
        };
        if let Some(order) = order.as_mut()
            && let Some(status) = self.pending_status(order.id)
        {
            order.status = status;
        }
        Ok(order)
    }

    async fn insert_order(&mut self, order: &NewOrder) -> Result<Order> {
        check_fault(&self.faults, StoreFault::InsertOrder)?;
        let exists = self.pending_order(&order.order_sn).is_some()
            || self
                .tables
                .read()
                .await
                .orders
                .iter()
                .any(|o| o.order_sn == order.order_sn);
        if exists {
            return Err(StoreError::DuplicateOrderSn(order.order_sn.clone()));
        }

        let id = OrderId::new(self.next_order_id.fetch_add(1, Ordering::SeqCst) + 1);
        let inserted = Order::from_new(id, order.clone(), Utc::now());
        self.writes.push(PendingWrite::InsertOrder(inserted.clone()));
        Ok(inserted)
    }

    async fn insert_line_items(&mut self, items: &[OrderLineItem]) -> Result<u64> {
        check_fault(&self.faults, StoreFault::InsertLineItems)?;
        self.writes
            .push(PendingWrite::InsertLineItems(items.to_vec()));
        Ok(items.len() as u64)
    }

    async fn update_order_status(&mut self, id: OrderId, status: OrderStatus) -> Result<u64> {
        check_fault(&self.faults, StoreFault::UpdateStatus)?;
        let pending = self
            .writes
            .iter()
            .any(|w| matches!(w, PendingWrite::InsertOrder(o) if o.id == id));
        let committed = self.tables.read().await.orders.iter().any(|o| o.id == id);
        if !pending && !committed {
            return Ok(0);
        }
        if committed {
            self.lock_row(id).await;
        }
        self.writes.push(PendingWrite::UpdateStatus(id, status));
        Ok(1)
    }

    async fn delete_checked_cart_entries(
        &mut self,
        user_id: UserId,
        goods_ids: &[GoodsId],
    ) -> Result<u64> {
        check_fault(&self.faults, StoreFault::DeleteCart)?;
        let count = checked_entries(&self.tables.read().await.cart, user_id, goods_ids).count();
        if count > 0 {
            self.writes.push(PendingWrite::DeleteCheckedCart {
                user_id,
                goods_ids: goods_ids.to_vec(),
                expected: count,
            });
        }
        Ok(count as u64)
    }

    async fn commit(self) -> Result<()> {
        check_fault(&self.faults, StoreFault::Commit)?;
        let mut tables = self.tables.write().await;

        // Validate everything before touching the tables so commit stays atomic.
        for write in &self.writes {
            match write {
                PendingWrite::InsertOrder(order) => {
                    if tables.orders.iter().any(|o| o.order_sn == order.order_sn) {
                        return Err(StoreError::DuplicateOrderSn(order.order_sn.clone()));
                    }
                }
                PendingWrite::DeleteCheckedCart {
                    user_id,
                    goods_ids,
                    expected,
                } => {
                    if checked_entries(&tables.cart, *user_id, goods_ids).count() != *expected {
                        return Err(StoreError::Conflict(format!(
                            "checked cart entries of user {user_id} changed concurrently"
                        )));
                    }
                }
                PendingWrite::InsertLineItems(_) | PendingWrite::UpdateStatus(..) => {}
            }
        }

        for write in self.writes {
            match write {
                PendingWrite::InsertOrder(order) => tables.orders.push(order),
                PendingWrite::InsertLineItems(items) => tables.line_items.extend(items),
                PendingWrite::UpdateStatus(id, status) => {
                    if let Some(order) = tables.orders.iter_mut().find(|o| o.id == id) {
                        order.status = status;
                    }
                }
                PendingWrite::DeleteCheckedCart { user_id, goods_ids, .. } => {
                    tables.cart.retain(|e| {
                        !(e.user_id == user_id && e.checked && goods_ids.contains(&e.goods_id))
                    });
                }
            }
        }
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Money;

    fn new_order(sn: &str, user: i32) -> NewOrder {
        NewOrder {
            order_sn: OrderSn::from(sn),
            user_id: UserId::new(user),
            address: "1 Main St".to_string(),
            signer_name: "Ann".to_string(),
            signer_mobile: "13800000000".to_string(),
            post: "leave at door".to_string(),
            total: Money::from_cents(2500),
        }
    }

    #[tokio::test]
    async fn committed_transaction_is_visible() {
        let store = InMemoryOrderStore::new();
        let mut tx = store.begin().await.unwrap();
        let order = tx.insert_order(&new_order("SN-1", 1)).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);

        assert!(
            store
                .find_order_by_sn(&OrderSn::from("SN-1"))
                .await
                .unwrap()
                .is_none()
        );

        tx.commit().await.unwrap();
        let found = store
            .find_order_by_sn(&OrderSn::from("SN-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, order.id);
    }

    #[tokio::test]
    async fn rolled_back_transaction_leaves_no_trace() {
        let store = InMemoryOrderStore::new();
        store
            .put_cart_entry(UserId::new(1), GoodsId::new(10), 2, true)
            .await;

        let mut tx = store.begin().await.unwrap();
        tx.insert_order(&new_order("SN-1", 1)).await.unwrap();
        assert_eq!(
            tx.delete_checked_cart_entries(UserId::new(1), &[GoodsId::new(10)])
                .await
                .unwrap(),
            1
        );
        tx.rollback().await.unwrap();

        assert!(store.orders().await.is_empty());
        assert_eq!(store.cart_entries(UserId::new(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_order_sn_is_rejected() {
        let store = InMemoryOrderStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.insert_order(&new_order("SN-1", 1)).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let result = tx.insert_order(&new_order("SN-1", 2)).await;
        assert!(matches!(result, Err(StoreError::DuplicateOrderSn(_))));
    }

    #[tokio::test]
    async fn merge_cart_entry_adds_quantities() {
        let store = InMemoryOrderStore::new();
        let first = store
            .merge_cart_entry(UserId::new(1), GoodsId::new(10), 2)
            .await
            .unwrap();
        let second = store
            .merge_cart_entry(UserId::new(1), GoodsId::new(10), 3)
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.quantity, 5);
        assert!(!second.checked);
        assert_eq!(store.cart_entries(UserId::new(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn injected_fault_fails_operation() {
        let store = InMemoryOrderStore::new();
        store.fail_on(StoreFault::InsertLineItems);

        let mut tx = store.begin().await.unwrap();
        assert!(tx.insert_line_items(&[]).await.is_err());

        store.clear_faults();
        assert_eq!(tx.insert_line_items(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn status_update_inside_transaction_is_read_back() {
        let store = InMemoryOrderStore::new();
        let mut tx = store.begin().await.unwrap();
        let order = tx.insert_order(&new_order("SN-1", 1)).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(
            tx.update_order_status(order.id, OrderStatus::TradeClosed)
                .await
                .unwrap(),
            1
        );
        let locked = tx
            .find_order_by_sn_for_update(&order.order_sn)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(locked.status, OrderStatus::TradeClosed);
        tx.commit().await.unwrap();

        let stored = store.find_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::TradeClosed);
    }

    #[tokio::test]
    async fn row_lock_holds_competing_transaction_until_commit() {
        let store = InMemoryOrderStore::new();
        let mut tx = store.begin().await.unwrap();
        let order = tx.insert_order(&new_order("SN-1", 1)).await.unwrap();
        tx.commit().await.unwrap();

        let mut closing = store.begin().await.unwrap();
        let seen = closing
            .find_order_by_sn_for_update(&order.order_sn)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen.status, OrderStatus::Pending);

        let paying = tokio::spawn({
            let store = store.clone();
            let sn = order.order_sn.clone();
            async move {
                let mut tx = store.begin().await.unwrap();
                let status = tx
                    .find_order_by_sn_for_update(&sn)
                    .await
                    .unwrap()
                    .unwrap()
                    .status;
                tx.rollback().await.unwrap();
                status
            }
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!paying.is_finished());

        closing
            .update_order_status(order.id, OrderStatus::TradeClosed)
            .await
            .unwrap();
        closing.commit().await.unwrap();

        assert_eq!(paying.await.unwrap(), OrderStatus::TradeClosed);
    }

    #[tokio::test]
    async fn dropped_transaction_releases_row_lock() {
        let store = InMemoryOrderStore::new();
        let mut tx = store.begin().await.unwrap();
        let order = tx.insert_order(&new_order("SN-1", 1)).await.unwrap();
        tx.commit().await.unwrap();

        let mut first = store.begin().await.unwrap();
        first
            .find_order_by_sn_for_update(&order.order_sn)
            .await
            .unwrap();
        drop(first);

        let mut second = store.begin().await.unwrap();
        let locked = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            second.find_order_by_sn_for_update(&order.order_sn),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(locked.is_some());
    }

    #[tokio::test]
    async fn cart_delete_only_touches_selected_goods() {
        let store = InMemoryOrderStore::new();
        let user = UserId::new(1);
        store.put_cart_entry(user, GoodsId::new(10), 1, true).await;

        let mut tx = store.begin().await.unwrap();
        assert_eq!(
            tx.delete_checked_cart_entries(user, &[GoodsId::new(10)])
                .await
                .unwrap(),
            1
        );
        // Checked while the transaction is open.
        store.put_cart_entry(user, GoodsId::new(11), 1, true).await;
        tx.commit().await.unwrap();

        let remaining = store.cart_entries(user).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].goods_id, GoodsId::new(11));
        assert!(remaining[0].checked);
    }

    #[tokio::test]
    async fn cart_delete_conflicts_when_selection_changed() {
        let store = InMemoryOrderStore::new();
        let user = UserId::new(1);
        store.put_cart_entry(user, GoodsId::new(10), 1, true).await;

        let mut tx = store.begin().await.unwrap();
        tx.delete_checked_cart_entries(user, &[GoodsId::new(10)])
            .await
            .unwrap();
        store.put_cart_entry(user, GoodsId::new(10), 1, false).await;

        assert!(matches!(tx.commit().await, Err(StoreError::Conflict(_))));
        assert_eq!(store.cart_entries(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn merge_beyond_max_quantity_is_rejected() {
        let store = InMemoryOrderStore::new();
        let user = UserId::new(1);
        store
            .merge_cart_entry(user, GoodsId::new(10), MAX_QUANTITY)
            .await
            .unwrap();

        let result = store.merge_cart_entry(user, GoodsId::new(10), 1).await;
        assert!(matches!(result, Err(StoreError::QuantityOutOfRange(_))));
        let result = store.merge_cart_entry(user, GoodsId::new(11), u32::MAX).await;
        assert!(matches!(result, Err(StoreError::QuantityOutOfRange(_))));

        let entries = store.cart_entries(user).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].quantity, MAX_QUANTITY);
    }

    #[tokio::test]
    async fn list_orders_pages_newest_first() {
        let store = InMemoryOrderStore::new();
        for i in 0..3 {
            let mut tx = store.begin().await.unwrap();
            tx.insert_order(&new_order(&format!("SN-{i}"), 1))
                .await
                .unwrap();
            tx.commit().await.unwrap();
        }

        let page = store
            .list_orders(&OrderQuery::for_user(UserId::new(1)).per_page(2))
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].order_sn.as_str(), "SN-2");
    }
}
