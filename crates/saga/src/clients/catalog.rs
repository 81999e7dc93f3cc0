//! Catalog client trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::GoodsId;
use domain::GoodsInfo;
use tokio::sync::RwLock;

use super::ClientError;

/// Read access to the goods catalog.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Fetches the current name, price and image of each good.
    ///
    /// Ids the catalog does not know are left out of the answer.
    async fn batch_get_goods(&self, ids: &[GoodsId]) -> Result<Vec<GoodsInfo>, ClientError>;
}

#[async_trait]
impl<C: CatalogClient + ?Sized> CatalogClient for Arc<C> {
    async fn batch_get_goods(&self, ids: &[GoodsId]) -> Result<Vec<GoodsInfo>, ClientError> {
        (**self).batch_get_goods(ids).await
    }
}

/// In-memory catalog for testing and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    goods: Arc<RwLock<HashMap<GoodsId, GoodsInfo>>>,
    fail: Arc<AtomicBool>,
    latency: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl InMemoryCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every answer by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Adds or replaces a good.
    pub async fn put(&self, info: GoodsInfo) {
        self.goods.write().await.insert(info.id, info);
    }

    /// Makes every lookup fail.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of lookups served or refused.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogClient for InMemoryCatalog {
    async fn batch_get_goods(&self, ids: &[GoodsId]) -> Result<Vec<GoodsInfo>, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ClientError::Unavailable("catalog is down".to_string()));
        }

        let goods = self.goods.read().await;
        Ok(ids.iter().filter_map(|id| goods.get(id).cloned()).collect())
    }
}
