//! In-memory collaborators for tests and local runs without a storefront.

use super::{CommitAck, DataSourceError, PriceCommit, RevenueSource, Storefront};
use crate::domain::{ItemId, RevenueSignal, TimeMs};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::Mutex;

/// Revenue source returning scripted signals per item.
#[derive(Debug, Default)]
pub struct MockRevenueSource {
    signals: HashMap<ItemId, Result<RevenueSignal, DataSourceError>>,
    fallback: Option<RevenueSignal>,
    delay: Option<Duration>,
}

impl MockRevenueSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal returned for items without their own entry.
    pub fn with_default(mut self, signal: RevenueSignal) -> Self {
        self.fallback = Some(signal);
        self
    }

    pub fn with_signal(mut self, item_id: ItemId, signal: RevenueSignal) -> Self {
        self.signals.insert(item_id, Ok(signal));
        self
    }

    pub fn with_error(mut self, item_id: ItemId, error: DataSourceError) -> Self {
        self.signals.insert(item_id, Err(error));
        self
    }

    /// Sleep before every answer; used to exercise call timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl RevenueSource for MockRevenueSource {
    async fn fetch_revenue_signal(
        &self,
        item_id: &ItemId,
        _window_start: TimeMs,
        _window_end: TimeMs,
    ) -> Result<RevenueSignal, DataSourceError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.signals.get(item_id) {
            Some(result) => result.clone(),
            None => self
                .fallback
                .ok_or_else(|| DataSourceError::Other(format!("no signal for {}", item_id))),
        }
    }
}

/// Storefront that records every commit and can be told to fail per item.
#[derive(Debug, Default)]
pub struct MockStorefront {
    commits: Mutex<Vec<PriceCommit>>,
    failing: Mutex<HashSet<ItemId>>,
    delay: Option<Duration>,
}

impl MockStorefront {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make commits for `item_id` fail until `recover` is called.
    pub async fn fail_item(&self, item_id: ItemId) {
        self.failing.lock().await.insert(item_id);
    }

    pub async fn recover(&self, item_id: &ItemId) {
        self.failing.lock().await.remove(item_id);
    }

    /// Successful commits, in order.
    pub async fn commits(&self) -> Vec<PriceCommit> {
        self.commits.lock().await.clone()
    }

    pub async fn commits_for(&self, item_id: &ItemId) -> Vec<PriceCommit> {
        self.commits
            .lock()
            .await
            .iter()
            .filter(|c| &c.item_id == item_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Storefront for MockStorefront {
    async fn commit_price(&self, commit: &PriceCommit) -> Result<CommitAck, DataSourceError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().await.contains(&commit.item_id) {
            return Err(DataSourceError::HttpError {
                status: 503,
                message: "storefront unavailable".to_string(),
            });
        }
        self.commits.lock().await.push(commit.clone());
        Ok(CommitAck {
            item_id: commit.item_id.clone(),
            price: commit.price,
        })
    }
}
