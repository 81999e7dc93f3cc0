//! Shopping cart management.

use common::{GoodsId, UserId};
use order_store::{CartEntry, MAX_QUANTITY, OrderStore, StoreError};
use serde::Serialize;

use crate::error::DomainError;

/// A user's cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartSummary {
    pub total: usize,
    pub entries: Vec<CartEntry>,
}

/// Service for managing shopping carts.
///
/// At most one entry exists per (user, goods); adding the same good again
/// merges into the existing entry.
#[derive(Clone)]
pub struct CartService<S: OrderStore> {
    store: S,
}

impl<S: OrderStore> CartService<S> {
    /// Creates a new cart service over the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns every entry of the user's cart.
    #[tracing::instrument(skip(self))]
    pub async fn list_cart(&self, user_id: UserId) -> Result<CartSummary, DomainError> {
        let entries = self.store.cart_entries(user_id).await?;
        Ok(CartSummary {
            total: entries.len(),
            entries,
        })
    }

    /// Adds `quantity` of a good to the cart, unchecked.
    ///
    /// The merged quantity must stay within [`MAX_QUANTITY`].
    #[tracing::instrument(skip(self))]
    pub async fn add_to_cart(
        &self,
        user_id: UserId,
        goods_id: GoodsId,
        quantity: u32,
    ) -> Result<CartEntry, DomainError> {
        if quantity == 0 {
            return Err(DomainError::Validation(
                "quantity must be greater than zero".to_string(),
            ));
        }
        check_upper_bound(quantity)?;
        let entry = self
            .store
            .merge_cart_entry(user_id, goods_id, quantity)
            .await
            .map_err(|e| match e {
                StoreError::QuantityOutOfRange(_) => DomainError::Validation(format!(
                    "cart quantity of goods {goods_id} cannot exceed {MAX_QUANTITY}"
                )),
                other => DomainError::Store(other),
            })?;
        tracing::debug!(entry_id = entry.id, quantity = entry.quantity, "cart entry merged");
        Ok(entry)
    }

    /// Sets quantity and checked flag of an existing entry.
    ///
    /// A zero `quantity` leaves the entry untouched but still reports
    /// `NotFound` when there is no such entry.
    #[tracing::instrument(skip(self))]
    pub async fn update_cart_item(
        &self,
        user_id: UserId,
        goods_id: GoodsId,
        quantity: u32,
        checked: bool,
    ) -> Result<(), DomainError> {
        check_upper_bound(quantity)?;
        let exists = self
            .store
            .cart_entries(user_id)
            .await?
            .iter()
            .any(|e| e.goods_id == goods_id);
        if !exists {
            return Err(DomainError::not_found("Cart entry", goods_id));
        }
        if quantity == 0 {
            return Ok(());
        }

        let updated = self
            .store
            .update_cart_entry(user_id, goods_id, quantity, checked)
            .await?;
        if updated == 0 {
            return Err(DomainError::not_found("Cart entry", goods_id));
        }
        Ok(())
    }

    /// Removes a good from the cart.
    #[tracing::instrument(skip(self))]
    pub async fn delete_cart_item(
        &self,
        user_id: UserId,
        goods_id: GoodsId,
    ) -> Result<(), DomainError> {
        let deleted = self.store.delete_cart_entry(user_id, goods_id).await?;
        if deleted == 0 {
            return Err(DomainError::not_found("Cart entry", goods_id));
        }
        Ok(())
    }
}

fn check_upper_bound(quantity: u32) -> Result<(), DomainError> {
    if quantity > MAX_QUANTITY {
        return Err(DomainError::Validation(format!(
            "quantity must not exceed {MAX_QUANTITY}"
        )));
    }
    Ok(())
}
