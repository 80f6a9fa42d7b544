//! Price change notifications and history entries.

use crate::domain::{Decimal, ItemId, TimeMs};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Why a price moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeReason {
    Increase,
    Revert,
    Toggle,
    BulkEdit,
    /// Starting price, ceiling or cost edited.
    Limits,
    Undo,
}

impl ChangeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeReason::Increase => "increase",
            ChangeReason::Revert => "revert",
            ChangeReason::Toggle => "toggle",
            ChangeReason::BulkEdit => "bulk-edit",
            ChangeReason::Limits => "limits",
            ChangeReason::Undo => "undo",
        }
    }
}

impl fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "increase" => Ok(ChangeReason::Increase),
            "revert" => Ok(ChangeReason::Revert),
            "toggle" => Ok(ChangeReason::Toggle),
            "bulk-edit" => Ok(ChangeReason::BulkEdit),
            "limits" => Ok(ChangeReason::Limits),
            "undo" => Ok(ChangeReason::Undo),
            other => Err(format!("unknown change reason: {}", other)),
        }
    }
}

/// `onPriceChanged` payload; also the row shape of the price history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceChange {
    pub item_id: ItemId,
    pub old_price: Decimal,
    pub new_price: Decimal,
    pub reason: ChangeReason,
    pub changed_at: TimeMs,
}
