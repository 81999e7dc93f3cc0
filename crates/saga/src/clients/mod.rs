//! Clients of the services the saga coordinates with, plus in-memory doubles.

pub mod catalog;
pub mod inventory;

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

pub use catalog::{CatalogClient, InMemoryCatalog};
pub use inventory::{InMemoryInventory, InventoryClient, StockLine};

/// Errors returned by remote service calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The service could not be reached or failed internally.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// The service understood the request and refused it.
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// No answer arrived in time; the call may or may not have taken effect.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

/// Bounds a remote call by `limit`.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| ClientError::Timeout(limit))?
}
