//! External collaborators of the pricing core: the revenue signal provider
//! and the storefront that receives committed prices.

use crate::domain::{Decimal, ItemId, RevenueSignal, TimeMs};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod http;
pub mod mock;

pub use http::HttpStorefront;
pub use mock::{MockRevenueSource, MockStorefront};

/// Supplies windowed revenue comparisons for an item.
#[async_trait]
pub trait RevenueSource: Send + Sync + fmt::Debug {
    /// Fetch revenue for `[window_start, window_end]` and for the equally long
    /// window immediately before it.
    async fn fetch_revenue_signal(
        &self,
        item_id: &ItemId,
        window_start: TimeMs,
        window_end: TimeMs,
    ) -> Result<RevenueSignal, DataSourceError>;
}

/// Persists a new price on the external storefront.
///
/// Implementations must treat a repeated `idempotency_key` as the same write.
#[async_trait]
pub trait Storefront: Send + Sync + fmt::Debug {
    async fn commit_price(&self, commit: &PriceCommit) -> Result<CommitAck, DataSourceError>;
}

/// One price write destined for the storefront.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceCommit {
    pub item_id: ItemId,
    pub price: Decimal,
    pub idempotency_key: String,
}

impl PriceCommit {
    /// `scope` distinguishes writes of the same price for different reasons
    /// (a scheduled step vs. an undo, for instance).
    pub fn new(item_id: ItemId, price: Decimal, scope: &str) -> Self {
        let idempotency_key = Self::compute_idempotency_key(&item_id, &price, scope);
        Self {
            item_id,
            price,
            idempotency_key,
        }
    }

    /// Hex SHA-256 over (item, canonical price, scope), length-prefixed.
    pub fn compute_idempotency_key(item_id: &ItemId, price: &Decimal, scope: &str) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        let price = price.to_canonical_string();
        for part in [item_id.as_str(), price.as_str(), scope] {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitAck {
    pub item_id: ItemId,
    pub price: Decimal,
}

/// Error type for collaborator calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataSourceError {
    /// Network error (e.g., connection timeout, DNS failure)
    #[error("Network error: {0}")]
    NetworkError(String),
    /// HTTP error (e.g., 429 rate limit, 5xx server error)
    #[error("HTTP error {status}: {message}")]
    HttpError { status: u16, message: String },
    /// Parsing error (invalid JSON or malformed response)
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Rate limited")]
    RateLimited,
    /// The call did not finish within the configured timeout
    #[error("Timed out")]
    Timeout,
    #[error("Error: {0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datasource_error_display() {
        let err = DataSourceError::NetworkError("connection timeout".to_string());
        assert_eq!(err.to_string(), "Network error: connection timeout");

        let err = DataSourceError::HttpError {
            status: 429,
            message: "Too many requests".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP error 429: Too many requests");

        assert_eq!(DataSourceError::Timeout.to_string(), "Timed out");
    }

    #[test]
    fn test_idempotency_key_stable_and_scoped() {
        let item = ItemId::new("sku-1");
        let price = Decimal::from_str_canonical("26.99").unwrap();
        let same_price = Decimal::from_str_canonical("26.990").unwrap();

        let a = PriceCommit::new(item.clone(), price, "cycle:86400000");
        let b = PriceCommit::new(item.clone(), same_price, "cycle:86400000");
        let c = PriceCommit::new(item, price, "undo:batch-1");

        assert_eq!(a.idempotency_key, b.idempotency_key);
        assert_ne!(a.idempotency_key, c.idempotency_key);
        assert_eq!(a.idempotency_key.len(), 64);
    }
}
