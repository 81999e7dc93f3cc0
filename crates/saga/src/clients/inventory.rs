//! Inventory client trait and in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{GoodsId, OrderSn};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::ClientError;

/// Quantity of one good to deduct or give back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockLine {
    pub goods_id: GoodsId,
    pub quantity: u32,
}

/// Stock deduction and return, keyed by order number.
///
/// Both operations must be idempotent per order number: repeating a call
/// with the same order number never deducts or returns stock twice.
#[async_trait]
pub trait InventoryClient: Send + Sync {
    /// Deducts every line or nothing.
    async fn reserve(&self, order_sn: &OrderSn, lines: &[StockLine]) -> Result<(), ClientError>;

    /// Gives back whatever was deducted for `order_sn`.
    async fn release(&self, order_sn: &OrderSn, lines: &[StockLine]) -> Result<(), ClientError>;
}

#[async_trait]
impl<I: InventoryClient + ?Sized> InventoryClient for Arc<I> {
    async fn reserve(&self, order_sn: &OrderSn, lines: &[StockLine]) -> Result<(), ClientError> {
        (**self).reserve(order_sn, lines).await
    }

    async fn release(&self, order_sn: &OrderSn, lines: &[StockLine]) -> Result<(), ClientError> {
        (**self).release(order_sn, lines).await
    }
}

#[derive(Debug, Default)]
struct InventoryState {
    stock: HashMap<GoodsId, u32>,
    reservations: HashMap<OrderSn, Vec<StockLine>>,
    released: HashSet<OrderSn>,
}

/// In-memory inventory for testing and local runs.
///
/// A release that arrives before its reservation leaves a tombstone, so the
/// late reservation is refused instead of leaking stock.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventory {
    state: Arc<RwLock<InventoryState>>,
    fail_on_reserve: Arc<AtomicBool>,
    fail_on_release: Arc<AtomicBool>,
    latency: Option<Duration>,
}

impl InMemoryInventory {
    /// Creates an inventory with no stock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every reservation by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Sets the available quantity of a good.
    pub async fn set_stock(&self, goods_id: GoodsId, quantity: u32) {
        self.state.write().await.stock.insert(goods_id, quantity);
    }

    /// Returns the available quantity of a good.
    pub async fn stock(&self, goods_id: GoodsId) -> u32 {
        self.state
            .read()
            .await
            .stock
            .get(&goods_id)
            .copied()
            .unwrap_or(0)
    }

    /// Returns the lines reserved for `order_sn`, if any.
    pub async fn reservation(&self, order_sn: &OrderSn) -> Option<Vec<StockLine>> {
        self.state.read().await.reservations.get(order_sn).cloned()
    }

    /// Returns the number of live reservations.
    pub async fn reservation_count(&self) -> usize {
        self.state.read().await.reservations.len()
    }

    /// Returns true if stock was released for `order_sn`.
    pub async fn is_released(&self, order_sn: &OrderSn) -> bool {
        self.state.read().await.released.contains(order_sn)
    }

    /// Makes every reservation fail.
    pub fn set_fail_on_reserve(&self, fail: bool) {
        self.fail_on_reserve.store(fail, Ordering::SeqCst);
    }

    /// Makes every release fail.
    pub fn set_fail_on_release(&self, fail: bool) {
        self.fail_on_release.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl InventoryClient for InMemoryInventory {
    async fn reserve(&self, order_sn: &OrderSn, lines: &[StockLine]) -> Result<(), ClientError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.fail_on_reserve.load(Ordering::SeqCst) {
            return Err(ClientError::Unavailable("inventory is down".to_string()));
        }

        let mut state = self.state.write().await;
        if state.reservations.contains_key(order_sn) {
            return Ok(());
        }
        if state.released.contains(order_sn) {
            return Err(ClientError::Rejected(format!(
                "stock for order {order_sn} was already released"
            )));
        }

        for line in lines {
            let available = state.stock.get(&line.goods_id).copied().unwrap_or(0);
            if available < line.quantity {
                return Err(ClientError::Rejected(format!(
                    "insufficient stock for goods {}: {} requested, {} available",
                    line.goods_id, line.quantity, available
                )));
            }
        }
        for line in lines {
            if let Some(available) = state.stock.get_mut(&line.goods_id) {
                *available -= line.quantity;
            }
        }
        state.reservations.insert(order_sn.clone(), lines.to_vec());

        Ok(())
    }

    async fn release(&self, order_sn: &OrderSn, _lines: &[StockLine]) -> Result<(), ClientError> {
        if self.fail_on_release.load(Ordering::SeqCst) {
            return Err(ClientError::Unavailable("inventory is down".to_string()));
        }

        let mut state = self.state.write().await;
        if !state.released.insert(order_sn.clone()) {
            return Ok(());
        }

        // Give back what was actually deducted, not what the caller claims.
        if let Some(reserved) = state.reservations.remove(order_sn) {
            for line in reserved {
                *state.stock.entry(line.goods_id).or_insert(0) += line.quantity;
            }
        }

        Ok(())
    }
}
