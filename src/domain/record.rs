//! Per-item pricing record and its field-level update operations.

use crate::domain::{Decimal, ItemId, StoreId, TimeMs};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Automated pricing state of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PricingState {
    /// Stepping the price up while revenue holds.
    Increasing,
    /// A revert happened; waiting before increases resume.
    RevertPending,
    /// Revenue fell with nothing left to roll back.
    Holding,
}

impl PricingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PricingState::Increasing => "increasing",
            PricingState::RevertPending => "revert_pending",
            PricingState::Holding => "holding",
        }
    }
}

impl fmt::Display for PricingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PricingState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "increasing" => Ok(PricingState::Increasing),
            "revert_pending" => Ok(PricingState::RevertPending),
            "holding" => Ok(PricingState::Holding),
            other => Err(format!("unknown pricing state: {}", other)),
        }
    }
}

/// Durable pricing state of one sellable item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingRecord {
    pub item_id: ItemId,
    pub store_id: StoreId,
    pub starting_price: Decimal,
    pub current_price: Decimal,
    pub max_price: Decimal,
    pub cost: Decimal,
    /// Price before the most recent automated increase; target of a revert.
    pub previous_price: Option<Decimal>,
    /// Price captured when auto-pricing was last disabled.
    pub last_smart_price: Option<Decimal>,
    pub auto_pricing_enabled: bool,
    pub current_state: PricingState,
    pub next_price_change: TimeMs,
    pub revert_wait_until: Option<TimeMs>,
    /// Owned by catalog sync; inactive items are never evaluated.
    pub is_active: bool,
    /// Optimistic concurrency token, bumped on every write.
    pub version: i64,
}

impl PricingRecord {
    /// Record as first created by catalog sync: disabled, `Increasing`, due immediately.
    pub fn new_from_catalog(
        item_id: ItemId,
        store_id: StoreId,
        price: Decimal,
        max_price: Decimal,
        cost: Decimal,
        now: TimeMs,
    ) -> Self {
        Self {
            item_id,
            store_id,
            starting_price: price,
            current_price: price,
            max_price,
            cost,
            previous_price: None,
            last_smart_price: None,
            auto_pricing_enabled: false,
            current_state: PricingState::Increasing,
            next_price_change: now,
            revert_wait_until: None,
            is_active: true,
            version: 0,
        }
    }

    /// Whether the runner may act on this record at `now`.
    pub fn is_due(&self, now: TimeMs) -> bool {
        self.is_active && self.auto_pricing_enabled && self.next_price_change <= now
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} must be positive")]
    NonPositive(&'static str),
    #[error("{0} must not be negative")]
    Negative(&'static str),
    #[error("maxPrice {max} is below {field} {value}")]
    AboveCeiling {
        field: &'static str,
        value: Decimal,
        max: Decimal,
    },
}

/// Explicit field-level update of an item's price limits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitsUpdate {
    pub starting_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub cost: Option<Decimal>,
}

impl LimitsUpdate {
    /// Apply to a copy of `record`, validating the result.
    pub fn apply(&self, record: &PricingRecord) -> Result<PricingRecord, ValidationError> {
        let mut next = record.clone();
        if let Some(starting) = self.starting_price {
            next.starting_price = starting;
        }
        if let Some(max) = self.max_price {
            next.max_price = max;
        }
        if let Some(cost) = self.cost {
            next.cost = cost;
        }
        validate_prices(&next)?;
        Ok(next)
    }
}

/// Checks the price invariants that every write must keep.
pub fn validate_prices(record: &PricingRecord) -> Result<(), ValidationError> {
    if !record.current_price.is_positive() {
        return Err(ValidationError::NonPositive("currentPrice"));
    }
    if !record.starting_price.is_positive() {
        return Err(ValidationError::NonPositive("startingPrice"));
    }
    if record.cost.is_negative() {
        return Err(ValidationError::Negative("cost"));
    }
    if record.current_price > record.max_price {
        return Err(ValidationError::AboveCeiling {
            field: "currentPrice",
            value: record.current_price,
            max: record.max_price,
        });
    }
    if record.starting_price > record.max_price {
        return Err(ValidationError::AboveCeiling {
            field: "startingPrice",
            value: record.starting_price,
            max: record.max_price,
        });
    }
    Ok(())
}
