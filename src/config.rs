use crate::domain::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub storefront_api_url: String,
    pub store_id: String,
    pub policy: PricingPolicy,
    pub undo_window_ms: i64,
    pub worker_concurrency: usize,
    pub call_timeout_ms: u64,
}

/// Tunables of the decision engine. Injected, never hard-coded at call sites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricingPolicy {
    /// Fractional step applied on an increase (0.08 = 8%).
    pub increment_pct: Decimal,
    pub drop_threshold: DropThreshold,
    /// Cool-down between evaluations; also the revenue window length.
    pub period_ms: i64,
    pub revert_wait_ms: i64,
}

/// How large a revenue drop must be before a revert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropThreshold {
    /// Fraction of the previous period's revenue.
    Percent(Decimal),
    /// Absolute revenue amount.
    Absolute(Decimal),
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            increment_pct: Decimal::new(rust_decimal::Decimal::new(8, 2)),
            drop_threshold: DropThreshold::Percent(Decimal::new(rust_decimal::Decimal::new(10, 2))),
            period_ms: 86_400_000,
            revert_wait_ms: 172_800_000,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = parse_or(&env_map, "PORT", "8080", "must be a valid u16")?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let storefront_api_url = env_map
            .get("STOREFRONT_API_URL")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("STOREFRONT_API_URL".to_string()))?;

        let store_id = env_map
            .get("STORE_ID")
            .cloned()
            .unwrap_or_else(|| "default".to_string());

        let increment_pct = parse_fraction(&env_map, "INCREMENT_PCT", "0.08")?;

        let drop_threshold = match env_map.get("DROP_THRESHOLD_ABS") {
            Some(raw) => {
                let amount = Decimal::from_str(raw).map_err(|_| {
                    ConfigError::InvalidValue(
                        "DROP_THRESHOLD_ABS".to_string(),
                        "must be a decimal amount".to_string(),
                    )
                })?;
                if amount.is_negative() {
                    return Err(ConfigError::InvalidValue(
                        "DROP_THRESHOLD_ABS".to_string(),
                        "must not be negative".to_string(),
                    ));
                }
                DropThreshold::Absolute(amount)
            }
            None => DropThreshold::Percent(parse_fraction(&env_map, "DROP_THRESHOLD_PCT", "0.10")?),
        };

        let period_ms = parse_positive_ms(&env_map, "PERIOD_MS", "86400000")?;
        let revert_wait_ms = parse_positive_ms(&env_map, "REVERT_WAIT_MS", "172800000")?;
        let undo_window_ms = parse_positive_ms(&env_map, "UNDO_WINDOW_MS", "300000")?;

        let worker_concurrency: usize =
            parse_or(&env_map, "WORKER_CONCURRENCY", "8", "must be a valid usize")?;
        if worker_concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "WORKER_CONCURRENCY".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let call_timeout_ms: u64 =
            parse_or(&env_map, "CALL_TIMEOUT_MS", "5000", "must be a valid u64")?;

        Ok(Config {
            port,
            database_path,
            storefront_api_url,
            store_id,
            policy: PricingPolicy {
                increment_pct,
                drop_threshold,
                period_ms,
                revert_wait_ms,
            },
            undo_window_ms,
            worker_concurrency,
            call_timeout_ms,
        })
    }
}

fn parse_or<T: FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: &str,
    expectation: &str,
) -> Result<T, ConfigError> {
    env_map
        .get(key)
        .map(|s| s.as_str())
        .unwrap_or(default)
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue(key.to_string(), expectation.to_string()))
}

fn parse_positive_ms(
    env_map: &HashMap<String, String>,
    key: &str,
    default: &str,
) -> Result<i64, ConfigError> {
    let value: i64 = parse_or(env_map, key, default, "must be a valid i64")?;
    if value <= 0 {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(value)
}

/// Fractions live in (0, 1].
fn parse_fraction(
    env_map: &HashMap<String, String>,
    key: &str,
    default: &str,
) -> Result<Decimal, ConfigError> {
    let value: Decimal = parse_or(env_map, key, default, "must be a decimal fraction")?;
    if !value.is_positive() || value > Decimal::one() {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("must be in (0, 1], got {}", value),
        ));
    }
    Ok(value)
}
