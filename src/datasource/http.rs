//! HTTP client for the storefront's pricing API.

use super::{CommitAck, DataSourceError, PriceCommit, RevenueSource, Storefront};
use crate::domain::{Decimal, ItemId, RevenueSignal, TimeMs};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::{Client, Method, Url};
use std::time::Duration;
use tracing::debug;

/// Storefront client speaking JSON over HTTP.
///
/// Serves both collaborator roles: revenue reads and price commits.
#[derive(Debug, Clone)]
pub struct HttpStorefront {
    client: Client,
    base_url: String,
    max_elapsed: Duration,
}

impl HttpStorefront {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            max_elapsed: Duration::from_secs(4),
        }
    }

    /// Bound the total retry time; the caller's timeout still applies on top.
    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    /// `{base}/items/{item_id}/{leaf}` with the id as one encoded segment;
    /// storefront ids such as `gid://shop/ProductVariant/1` contain slashes.
    fn item_url(&self, item_id: &ItemId, leaf: &str) -> Result<Url, DataSourceError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| DataSourceError::Other(format!("Invalid storefront URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| DataSourceError::Other("Storefront URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(["items", item_id.as_str(), leaf]);
        Ok(url)
    }

    async fn send_json(
        &self,
        method: Method,
        url: Url,
        payload: Option<serde_json::Value>,
        idempotency_key: Option<&str>,
    ) -> Result<serde_json::Value, DataSourceError> {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        };

        retry(backoff, || async {
            let mut request = self.client.request(method.clone(), url.clone());
            if let Some(body) = &payload {
                request = request.json(body);
            }
            if let Some(key) = idempotency_key {
                request = request.header("Idempotency-Key", key);
            }

            let response = request.send().await.map_err(|e| {
                backoff::Error::transient(DataSourceError::NetworkError(e.to_string()))
            })?;

            let status = response.status();
            if status == 429 {
                return Err(backoff::Error::transient(DataSourceError::RateLimited));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(DataSourceError::HttpError {
                    status: status.as_u16(),
                    message: "Server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(DataSourceError::HttpError {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }

            response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| backoff::Error::permanent(DataSourceError::ParseError(e.to_string())))
        })
        .await
    }
}

#[async_trait]
impl RevenueSource for HttpStorefront {
    async fn fetch_revenue_signal(
        &self,
        item_id: &ItemId,
        window_start: TimeMs,
        window_end: TimeMs,
    ) -> Result<RevenueSignal, DataSourceError> {
        debug!(
            "Fetching revenue for item={}, window_start={}, window_end={}",
            item_id, window_start, window_end
        );

        let mut url = self.item_url(item_id, "revenue")?;
        url.query_pairs_mut()
            .append_pair("windowStart", &window_start.as_ms().to_string())
            .append_pair("windowEnd", &window_end.as_ms().to_string());
        let response = self.send_json(Method::GET, url, None, None).await?;
        parse_revenue_signal(&response)
    }
}

#[async_trait]
impl Storefront for HttpStorefront {
    async fn commit_price(&self, commit: &PriceCommit) -> Result<CommitAck, DataSourceError> {
        debug!("Committing price {} for item={}", commit.price, commit.item_id);

        let url = self.item_url(&commit.item_id, "price")?;
        let payload = serde_json::json!({ "price": commit.price.to_canonical_string() });
        let response = self
            .send_json(
                Method::PUT,
                url,
                Some(payload),
                Some(&commit.idempotency_key),
            )
            .await?;

        // Storefronts may echo a normalized price; trust the echo when present.
        let price = match response.get("price") {
            Some(value) => parse_decimal_field(value, "price")?,
            None => commit.price,
        };

        Ok(CommitAck {
            item_id: commit.item_id.clone(),
            price,
        })
    }
}

fn parse_revenue_signal(json: &serde_json::Value) -> Result<RevenueSignal, DataSourceError> {
    let field = |name: &str| {
        json.get(name)
            .ok_or_else(|| DataSourceError::ParseError(format!("Missing {} field", name)))
    };

    let current_revenue = parse_decimal_field(field("currentPeriodRevenue")?, "currentPeriodRevenue")?;
    let previous_revenue =
        parse_decimal_field(field("previousPeriodRevenue")?, "previousPeriodRevenue")?;
    let current_units = json
        .get("currentPeriodUnits")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    let previous_units = json
        .get("previousPeriodUnits")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);

    Ok(RevenueSignal::new(current_revenue, previous_revenue)
        .with_units(current_units, previous_units))
}

/// Accepts a decimal string or a finite JSON number.
fn parse_decimal_field(value: &serde_json::Value, name: &str) -> Result<Decimal, DataSourceError> {
    let raw = match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => {
            return Err(DataSourceError::ParseError(format!(
                "{} is not a number",
                name
            )))
        }
    };
    Decimal::from_str_canonical(&raw)
        .map_err(|e| DataSourceError::ParseError(format!("Invalid {}: {}", name, e)))
}
