//! `onPriceChanged` notifications.
//!
//! Every change is written to the price history and then broadcast to live
//! subscribers (toasts, dashboards). A lagging subscriber loses events, not
//! history.

use crate::db::Repository;
use crate::domain::PriceChange;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct PriceEvents {
    sender: broadcast::Sender<PriceChange>,
    repo: Arc<Repository>,
}

impl PriceEvents {
    pub fn new(repo: Arc<Repository>) -> Self {
        let (sender, _) = broadcast::channel(DEFAULT_CAPACITY);
        Self { sender, repo }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PriceChange> {
        self.sender.subscribe()
    }

    /// Record and publish a change. History write failures are logged; the
    /// price itself is already committed at this point.
    pub async fn price_changed(&self, change: PriceChange) {
        if let Err(e) = self.repo.insert_price_change(&change).await {
            warn!(item_id = %change.item_id, error = %e, "Failed to record price change");
        }
        // No receivers is fine
        let _ = self.sender.send(change);
    }
}
