//! Saga error types.

use thiserror::Error;

/// Why an order could not be created.
///
/// Every failure of the order-creation saga maps to exactly one variant and
/// reaches the caller unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SagaError {
    /// The user has no checked cart entries.
    #[error("No goods selected for checkout")]
    EmptySelection,

    /// The catalog failed, timed out or did not know every selected good.
    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(String),

    /// The inventory service refused or failed to reserve stock.
    #[error("Stock unavailable: {0}")]
    StockUnavailable(String),

    /// The local transaction could not be written.
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    /// A message could not be handed to the broker.
    #[error("Outbox failure: {0}")]
    OutboxFailure(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SagaError {
    /// Returns the error kind as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            SagaError::EmptySelection => "empty_selection",
            SagaError::CatalogUnavailable(_) => "catalog_unavailable",
            SagaError::StockUnavailable(_) => "stock_unavailable",
            SagaError::PersistenceFailure(_) => "persistence_failure",
            SagaError::OutboxFailure(_) => "outbox_failure",
            SagaError::NotFound(_) => "not_found",
            SagaError::Internal(_) => "internal",
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
