//! Undo snapshots produced by toggles and bulk edits.

use crate::domain::{Decimal, ItemId, StoreId, TimeMs};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of manual action a snapshot batch records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotAction {
    GlobalOn,
    GlobalOff,
    ItemOn,
    ItemOff,
    BulkEdit,
}

impl SnapshotAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotAction::GlobalOn => "global-on",
            SnapshotAction::GlobalOff => "global-off",
            SnapshotAction::ItemOn => "item-on",
            SnapshotAction::ItemOff => "item-off",
            SnapshotAction::BulkEdit => "bulk-edit",
        }
    }

    /// Global actions also flip the tenant toggle and need the exclusive section.
    pub fn is_global(&self) -> bool {
        matches!(self, SnapshotAction::GlobalOn | SnapshotAction::GlobalOff)
    }
}

impl fmt::Display for SnapshotAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SnapshotAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global-on" => Ok(SnapshotAction::GlobalOn),
            "global-off" => Ok(SnapshotAction::GlobalOff),
            "item-on" => Ok(SnapshotAction::ItemOn),
            "item-off" => Ok(SnapshotAction::ItemOff),
            "bulk-edit" => Ok(SnapshotAction::BulkEdit),
            other => Err(format!("unknown snapshot action: {}", other)),
        }
    }
}

/// Prior state of one item before a manual action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub item_id: ItemId,
    pub old_price: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_price: Option<Decimal>,
    pub was_enabled: bool,
    pub now_enabled: bool,
    pub action: SnapshotAction,
    pub timestamp: TimeMs,
}

/// A set of snapshots forming one undoable unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotBatch {
    pub batch_id: String,
    pub store_id: StoreId,
    pub action: SnapshotAction,
    pub description: String,
    pub created_at: TimeMs,
    pub expires_at: TimeMs,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub undone_at: Option<TimeMs>,
    /// Tenant toggle value before a global action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_global_enabled: Option<bool>,
    pub snapshots: Vec<Snapshot>,
}

impl SnapshotBatch {
    pub fn new(
        store_id: StoreId,
        action: SnapshotAction,
        description: String,
        created_at: TimeMs,
        undo_window_ms: i64,
    ) -> Self {
        Self {
            batch_id: uuid::Uuid::new_v4().to_string(),
            store_id,
            action,
            description,
            created_at,
            expires_at: created_at.plus_ms(undo_window_ms),
            undone_at: None,
            previous_global_enabled: None,
            snapshots: Vec::new(),
        }
    }

    /// Undo is allowed up to and including `expires_at`.
    pub fn is_within_window(&self, now: TimeMs) -> bool {
        now <= self.expires_at
    }
}
