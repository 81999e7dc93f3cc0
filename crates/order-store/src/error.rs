use thiserror::Error;

use crate::{GoodsId, OrderSn};

/// Errors that can occur when interacting with the order store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An order with the same order number already exists.
    #[error("Duplicate order number: {0}")]
    DuplicateOrderSn(OrderSn),

    /// The transaction touched rows that were changed underneath it.
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// A quantity would leave the storable range.
    #[error("Quantity of goods {0} out of range")]
    QuantityOutOfRange(GoodsId),

    /// The store could not serve the request.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for order store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
