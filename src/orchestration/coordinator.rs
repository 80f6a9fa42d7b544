//! Toggle/undo coordinator: manual enable, disable, resume, bulk edits and
//! their undo.
//!
//! Every manual action yields a [`SnapshotBatch`] stored in the snapshot log
//! and undoable until it expires. Item writes use the same versioned
//! conditional update as the runner and are retried on a lost race. Global
//! actions also take the tenant's [`CycleGate`] exclusively.

use crate::datasource::{DataSourceError, PriceCommit, Storefront};
use crate::db::Repository;
use crate::domain::{
    validate_prices, ChangeReason, Decimal, ItemId, LimitsUpdate, PriceChange, PricingRecord,
    PricingState, Snapshot, SnapshotAction, SnapshotBatch, StoreId, TimeMs, ValidationError,
};
use crate::orchestration::events::PriceEvents;
use crate::orchestration::gate::CycleGate;
use crate::orchestration::runner::ItemFailure;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

const MAX_WRITE_ATTEMPTS: usize = 3;

/// Which price an item resumes from when auto-pricing is turned back on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResumeFrom {
    /// The item's starting price.
    BasePrice,
    /// The price captured when auto-pricing was disabled.
    LastSmartPrice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemToggle {
    Enable { resume: ResumeFrom },
    /// `revert_to_base` also resets the price to the starting price.
    Disable { revert_to_base: bool },
}

impl ItemToggle {
    fn enables(&self) -> bool {
        matches!(self, ItemToggle::Enable { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkAdjustment {
    /// Fractional change, `-0.10` lowers prices by 10%.
    Percent(Decimal),
    /// Fixed amount added to each price; negative lowers.
    Amount(Decimal),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub batch: SnapshotBatch,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<ItemFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreResult {
    pub batch_id: String,
    pub restored: Vec<ItemId>,
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("item not found: {0}")]
    NotFound(ItemId),
    #[error("snapshot batch not found: {0}")]
    BatchNotFound(String),
    #[error("no items selected")]
    EmptySelection,
    #[error("invalid prices for {item_id}: {source}")]
    Validation {
        item_id: ItemId,
        #[source]
        source: ValidationError,
    },
    #[error("storefront commit failed for {item_id}: {source}")]
    Commit {
        item_id: ItemId,
        #[source]
        source: DataSourceError,
    },
    #[error("concurrent update kept winning for {0}")]
    Conflict(ItemId),
    #[error("undo window for {batch_id} closed at {expired_at}")]
    ExpiredUndo { batch_id: String, expired_at: TimeMs },
    #[error("snapshot batch {0} was already undone")]
    AlreadyUndone(String),
    #[error("undo partially applied: {} restored, {} failed", .restored.len(), .failed.len())]
    PartialRestore {
        restored: Vec<ItemId>,
        failed: Vec<ItemFailure>,
    },
    #[error(transparent)]
    Store(#[from] sqlx::Error),
}

pub struct ToggleCoordinator {
    repo: Arc<Repository>,
    storefront: Arc<dyn Storefront>,
    events: PriceEvents,
    gate: Arc<CycleGate>,
    store_id: StoreId,
    period_ms: i64,
    undo_window_ms: i64,
    call_timeout: Duration,
}

impl ToggleCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo: Arc<Repository>,
        storefront: Arc<dyn Storefront>,
        events: PriceEvents,
        gate: Arc<CycleGate>,
        store_id: StoreId,
        period_ms: i64,
        undo_window_ms: i64,
        call_timeout: Duration,
    ) -> Self {
        Self {
            repo,
            storefront,
            events,
            gate,
            store_id,
            period_ms,
            undo_window_ms,
            call_timeout,
        }
    }

    pub fn store_id(&self) -> &StoreId {
        &self.store_id
    }

    // =========================================================================
    // Toggles
    // =========================================================================

    /// Enable or disable one item.
    ///
    /// Disabling captures the current price as the last smart price and
    /// leaves the price alone unless `revert_to_base` is set. Enabling needs
    /// an explicit [`ResumeFrom`].
    pub async fn set_item_enabled(
        &self,
        item_id: &ItemId,
        toggle: ItemToggle,
        now: TimeMs,
    ) -> Result<SnapshotBatch, CoordinatorError> {
        let action = if toggle.enables() {
            SnapshotAction::ItemOn
        } else {
            SnapshotAction::ItemOff
        };
        let snapshot = self.toggle_item(item_id, toggle, action, now).await?;

        let verb = if toggle.enables() { "on" } else { "off" };
        let mut batch = SnapshotBatch::new(
            self.store_id.clone(),
            action,
            format!("Auto-pricing turned {} for {}", verb, item_id),
            now,
            self.undo_window_ms,
        );
        batch.snapshots.push(snapshot);
        self.repo.insert_snapshot_batch(&batch).await?;

        info!(item_id = %item_id, action = %action, batch_id = %batch.batch_id, "Item toggled");
        Ok(batch)
    }

    /// Flip the tenant toggle and apply the matching item toggle to every
    /// active item not already in that state.
    ///
    /// Holds the gate exclusively, so no cycle observes a half-applied toggle.
    pub async fn set_global_enabled(
        &self,
        toggle: ItemToggle,
        now: TimeMs,
    ) -> Result<BatchOutcome, CoordinatorError> {
        let _exclusive = self.gate.exclusive().await;

        let enabled = toggle.enables();
        let action = if enabled {
            SnapshotAction::GlobalOn
        } else {
            SnapshotAction::GlobalOff
        };

        let previous = self.repo.get_global_enabled(&self.store_id).await?;
        self.repo
            .set_global_enabled(&self.store_id, enabled, now)
            .await?;

        let in_scope: Vec<PricingRecord> = self
            .repo
            .list_pricing_records(&self.store_id)
            .await?
            .into_iter()
            .filter(|r| r.is_active && r.auto_pricing_enabled != enabled)
            .collect();

        let mut snapshots = Vec::with_capacity(in_scope.len());
        let mut failed = Vec::new();
        for record in &in_scope {
            match self.toggle_item(&record.item_id, toggle, action, now).await {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => {
                    warn!(item_id = %record.item_id, error = %e, "Global toggle failed for item");
                    failed.push(ItemFailure {
                        item_id: record.item_id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let verb = if enabled { "on" } else { "off" };
        let mut batch = SnapshotBatch::new(
            self.store_id.clone(),
            action,
            format!("Auto-pricing turned {} for {} items", verb, snapshots.len()),
            now,
            self.undo_window_ms,
        );
        batch.previous_global_enabled = Some(previous);
        batch.snapshots = snapshots;
        self.repo.insert_snapshot_batch(&batch).await?;

        info!(
            store_id = %self.store_id,
            action = %action,
            items = batch.snapshots.len(),
            failed = failed.len(),
            batch_id = %batch.batch_id,
            "Global auto-pricing toggled"
        );
        Ok(BatchOutcome { batch, failed })
    }

    async fn toggle_item(
        &self,
        item_id: &ItemId,
        toggle: ItemToggle,
        action: SnapshotAction,
        now: TimeMs,
    ) -> Result<Snapshot, CoordinatorError> {
        let period_ms = self.period_ms;
        let (before, after) = self
            .mutate_item(item_id, ChangeReason::Toggle, now, |record| {
                let mut next = record.clone();
                match toggle {
                    ItemToggle::Disable { revert_to_base } => {
                        if record.auto_pricing_enabled {
                            next.last_smart_price = Some(record.current_price);
                        }
                        next.auto_pricing_enabled = false;
                        if revert_to_base {
                            next.current_price = record.starting_price;
                            next.previous_price = None;
                        }
                    }
                    ItemToggle::Enable { resume } => {
                        let target = match resume {
                            ResumeFrom::BasePrice => record.starting_price,
                            ResumeFrom::LastSmartPrice => {
                                record.last_smart_price.unwrap_or(record.current_price)
                            }
                        };
                        next.current_price = target.min(record.max_price);
                        next.auto_pricing_enabled = true;
                        next.current_state = PricingState::Increasing;
                        next.previous_price = None;
                        next.revert_wait_until = None;
                        // A fresh observation period at the resumed price.
                        next.next_price_change =
                            now.plus_ms(period_ms).max(record.next_price_change);
                    }
                }
                Ok(next)
            })
            .await?;

        Ok(snapshot_of(&before, &after, action, now))
    }

    // =========================================================================
    // Bulk edits and limits
    // =========================================================================

    /// Adjust the price of every selected item as one undoable unit.
    /// Items whose new price breaks a limit are reported, not written.
    pub async fn bulk_edit(
        &self,
        item_ids: &[ItemId],
        adjustment: BulkAdjustment,
        now: TimeMs,
    ) -> Result<BatchOutcome, CoordinatorError> {
        if item_ids.is_empty() {
            return Err(CoordinatorError::EmptySelection);
        }

        let mut snapshots = Vec::with_capacity(item_ids.len());
        let mut failed = Vec::new();
        for item_id in item_ids {
            let result = self
                .mutate_item(item_id, ChangeReason::BulkEdit, now, |record| {
                    let mut next = record.clone();
                    next.current_price = match adjustment {
                        BulkAdjustment::Percent(pct) => {
                            record.current_price * (Decimal::one() + pct)
                        }
                        BulkAdjustment::Amount(amount) => record.current_price + amount,
                    }
                    .round_cents();
                    next.previous_price = None;
                    Ok(next)
                })
                .await;

            match result {
                Ok((before, after)) => {
                    snapshots.push(snapshot_of(&before, &after, SnapshotAction::BulkEdit, now))
                }
                Err(e) => failed.push(ItemFailure {
                    item_id: item_id.clone(),
                    error: e.to_string(),
                }),
            }
        }

        let mut batch = SnapshotBatch::new(
            self.store_id.clone(),
            SnapshotAction::BulkEdit,
            format!("Bulk price edit on {} items", snapshots.len()),
            now,
            self.undo_window_ms,
        );
        batch.snapshots = snapshots;
        self.repo.insert_snapshot_batch(&batch).await?;

        info!(
            batch_id = %batch.batch_id,
            items = batch.snapshots.len(),
            failed = failed.len(),
            "Bulk edit applied"
        );
        Ok(BatchOutcome { batch, failed })
    }

    /// Validated update of starting price, ceiling and cost.
    pub async fn update_limits(
        &self,
        item_id: &ItemId,
        update: &LimitsUpdate,
        now: TimeMs,
    ) -> Result<PricingRecord, CoordinatorError> {
        let (_, after) = self
            .mutate_item(item_id, ChangeReason::Limits, now, |record| {
                update
                    .apply(record)
                    .map_err(|source| CoordinatorError::Validation {
                        item_id: record.item_id.clone(),
                        source,
                    })
            })
            .await?;
        Ok(after)
    }

    // =========================================================================
    // Undo
    // =========================================================================

    /// Restore every item of a batch to its snapshotted price and enabled
    /// flag, and the tenant toggle for global batches.
    ///
    /// # Errors
    /// `ExpiredUndo` after the window, `AlreadyUndone` on a second undo,
    /// `PartialRestore` listing the items that could not be restored.
    pub async fn undo(
        &self,
        batch_id: &str,
        now: TimeMs,
    ) -> Result<RestoreResult, CoordinatorError> {
        let batch = self
            .repo
            .get_snapshot_batch(batch_id)
            .await?
            .ok_or_else(|| CoordinatorError::BatchNotFound(batch_id.to_string()))?;

        if batch.undone_at.is_some() {
            return Err(CoordinatorError::AlreadyUndone(batch.batch_id));
        }
        if !batch.is_within_window(now) {
            return Err(CoordinatorError::ExpiredUndo {
                batch_id: batch.batch_id,
                expired_at: batch.expires_at,
            });
        }

        let _exclusive = if batch.action.is_global() {
            Some(self.gate.exclusive().await)
        } else {
            None
        };

        if !self.repo.claim_batch_for_undo(&batch.batch_id, now).await? {
            return Err(CoordinatorError::AlreadyUndone(batch.batch_id));
        }

        if let Some(previous) = batch.previous_global_enabled {
            self.repo
                .set_global_enabled(&self.store_id, previous, now)
                .await?;
        }

        let mut restored = Vec::with_capacity(batch.snapshots.len());
        let mut failed = Vec::new();
        for snapshot in &batch.snapshots {
            let result = self
                .mutate_item(&snapshot.item_id, ChangeReason::Undo, now, |record| {
                    let mut next = record.clone();
                    next.current_price = snapshot.old_price;
                    next.auto_pricing_enabled = snapshot.was_enabled;
                    Ok(next)
                })
                .await;
            match result {
                Ok(_) => restored.push(snapshot.item_id.clone()),
                Err(e) => {
                    warn!(item_id = %snapshot.item_id, error = %e, "Undo failed for item");
                    failed.push(ItemFailure {
                        item_id: snapshot.item_id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if !failed.is_empty() {
            return Err(CoordinatorError::PartialRestore { restored, failed });
        }

        info!(batch_id = %batch.batch_id, items = restored.len(), "Snapshot batch undone");
        Ok(RestoreResult {
            batch_id: batch.batch_id,
            restored,
        })
    }

    // =========================================================================
    // Shared write path
    // =========================================================================

    /// Read, transform, validate, push a changed price to the storefront,
    /// then write conditionally on the version read. Lost races are retried
    /// from a fresh read.
    ///
    /// Any failure after a storefront commit puts the storefront back to the
    /// price the store holds.
    async fn mutate_item<F>(
        &self,
        item_id: &ItemId,
        reason: ChangeReason,
        now: TimeMs,
        transform: F,
    ) -> Result<(PricingRecord, PricingRecord), CoordinatorError>
    where
        F: Fn(&PricingRecord) -> Result<PricingRecord, CoordinatorError>,
    {
        let mut storefront_dirty = false;
        let result = self
            .try_mutate_item(item_id, reason, now, &transform, &mut storefront_dirty)
            .await;
        if result.is_err() && storefront_dirty {
            self.compensate(item_id, now).await;
        }
        result
    }

    async fn try_mutate_item<F>(
        &self,
        item_id: &ItemId,
        reason: ChangeReason,
        now: TimeMs,
        transform: &F,
        storefront_dirty: &mut bool,
    ) -> Result<(PricingRecord, PricingRecord), CoordinatorError>
    where
        F: Fn(&PricingRecord) -> Result<PricingRecord, CoordinatorError>,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let current = self
                .repo
                .get_pricing_record(item_id)
                .await?
                .ok_or_else(|| CoordinatorError::NotFound(item_id.clone()))?;

            let next = transform(&current)?;
            validate_prices(&next).map_err(|source| CoordinatorError::Validation {
                item_id: item_id.clone(),
                source,
            })?;

            let price_changed = next.current_price != current.current_price;
            if price_changed {
                let scope = format!("{}:{}:{}", reason, current.version, now);
                self.commit(item_id, next.current_price, &scope).await?;
                *storefront_dirty = true;
            }

            if self
                .repo
                .replace_record_if_unchanged(&next, current.version)
                .await?
            {
                if price_changed {
                    self.events
                        .price_changed(PriceChange {
                            item_id: item_id.clone(),
                            old_price: current.current_price,
                            new_price: next.current_price,
                            reason,
                            changed_at: now,
                        })
                        .await;
                }
                return Ok((current, next));
            }

            warn!(item_id = %item_id, attempt, "Concurrent update, retrying");
        }

        Err(CoordinatorError::Conflict(item_id.clone()))
    }

    async fn compensate(&self, item_id: &ItemId, now: TimeMs) {
        let latest = match self.repo.get_pricing_record(item_id).await {
            Ok(Some(latest)) => latest,
            Ok(None) => return,
            Err(e) => {
                warn!(item_id = %item_id, error = %e, "Could not read price to restore storefront");
                return;
            }
        };
        let scope = format!("compensate:{}:{}", latest.version, now);
        match self.commit(item_id, latest.current_price, &scope).await {
            Ok(()) => warn!(
                item_id = %item_id,
                price = %latest.current_price,
                "Manual change failed after storefront commit, restored storefront price"
            ),
            Err(e) => warn!(item_id = %item_id, error = %e, "Could not restore storefront price"),
        }
    }

    async fn commit(
        &self,
        item_id: &ItemId,
        price: Decimal,
        scope: &str,
    ) -> Result<(), CoordinatorError> {
        let commit = PriceCommit::new(item_id.clone(), price, scope);
        let result =
            match tokio::time::timeout(self.call_timeout, self.storefront.commit_price(&commit))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(DataSourceError::Timeout),
            };
        result
            .map(|_| ())
            .map_err(|source| CoordinatorError::Commit {
                item_id: item_id.clone(),
                source,
            })
    }
}

fn snapshot_of(
    before: &PricingRecord,
    after: &PricingRecord,
    action: SnapshotAction,
    now: TimeMs,
) -> Snapshot {
    Snapshot {
        item_id: before.item_id.clone(),
        old_price: before.current_price,
        new_price: (after.current_price != before.current_price).then_some(after.current_price),
        was_enabled: before.auto_pricing_enabled,
        now_enabled: after.auto_pricing_enabled,
        action,
        timestamp: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::{CommitAck, MockStorefront};
    use crate::db::init_db;
    use tempfile::TempDir;

    const DAY: i64 = 86_400_000;
    const UNDO_WINDOW: i64 = 300_000;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    struct Harness {
        repo: Arc<Repository>,
        storefront: Arc<MockStorefront>,
        coordinator: ToggleCoordinator,
        store: StoreId,
        _temp: TempDir,
    }

    impl Harness {
        async fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let db_path = temp.path().join("test.db").to_string_lossy().to_string();
            let repo = Arc::new(Repository::new(init_db(&db_path).await.unwrap()));
            let store = StoreId::new("default");
            repo.set_global_enabled(&store, true, TimeMs::new(0))
                .await
                .unwrap();
            let storefront = Arc::new(MockStorefront::new());
            let coordinator = ToggleCoordinator::new(
                repo.clone(),
                storefront.clone(),
                PriceEvents::new(repo.clone()),
                Arc::new(CycleGate::new()),
                store.clone(),
                DAY,
                UNDO_WINDOW,
                Duration::from_millis(200),
            );
            Self {
                repo,
                storefront,
                coordinator,
                store,
                _temp: temp,
            }
        }

        async fn item(&self, item: &str, price: &str, enabled: bool) -> PricingRecord {
            let item_id = ItemId::new(item);
            self.repo
                .sync_catalog_item(&self.store, &item_id, d("24.99"), d("49.98"), d("10"), TimeMs::new(0))
                .await
                .unwrap();
            let mut record = self.repo.get_pricing_record(&item_id).await.unwrap().unwrap();
            record.auto_pricing_enabled = enabled;
            record.current_price = d(price);
            self.repo
                .replace_record_if_unchanged(&record, record.version)
                .await
                .unwrap();
            self.record(item).await
        }

        async fn record(&self, item: &str) -> PricingRecord {
            self.repo
                .get_pricing_record(&ItemId::new(item))
                .await
                .unwrap()
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_disable_keeps_price_and_captures_smart_price() {
        let h = Harness::new().await;
        h.item("sku-1", "29.15", true).await;

        let batch = h
            .coordinator
            .set_item_enabled(
                &ItemId::new("sku-1"),
                ItemToggle::Disable {
                    revert_to_base: false,
                },
                TimeMs::new(1_000),
            )
            .await
            .unwrap();

        assert_eq!(batch.action, SnapshotAction::ItemOff);
        assert_eq!(batch.snapshots.len(), 1);
        assert!(batch.snapshots[0].was_enabled);
        assert!(!batch.snapshots[0].now_enabled);
        assert_eq!(batch.snapshots[0].new_price, None);

        let record = h.record("sku-1").await;
        assert!(!record.auto_pricing_enabled);
        assert_eq!(record.current_price, d("29.15"));
        assert_eq!(record.last_smart_price, Some(d("29.15")));
        assert!(h.storefront.commits().await.is_empty());
    }

    #[tokio::test]
    async fn test_resume_choices() {
        let h = Harness::new().await;
        h.item("sku-1", "29.15", true).await;
        let item_id = ItemId::new("sku-1");

        h.coordinator
            .set_item_enabled(
                &item_id,
                ItemToggle::Disable {
                    revert_to_base: true,
                },
                TimeMs::new(1_000),
            )
            .await
            .unwrap();
        let record = h.record("sku-1").await;
        assert_eq!(record.current_price, d("24.99"));
        assert_eq!(record.last_smart_price, Some(d("29.15")));

        h.coordinator
            .set_item_enabled(
                &item_id,
                ItemToggle::Enable {
                    resume: ResumeFrom::LastSmartPrice,
                },
                TimeMs::new(2_000),
            )
            .await
            .unwrap();
        let record = h.record("sku-1").await;
        assert!(record.auto_pricing_enabled);
        assert_eq!(record.current_price, d("29.15"));
        assert_eq!(record.current_state, PricingState::Increasing);
        assert_eq!(record.next_price_change, TimeMs::new(2_000 + DAY));

        h.coordinator
            .set_item_enabled(
                &item_id,
                ItemToggle::Disable {
                    revert_to_base: false,
                },
                TimeMs::new(3_000),
            )
            .await
            .unwrap();
        h.coordinator
            .set_item_enabled(
                &item_id,
                ItemToggle::Enable {
                    resume: ResumeFrom::BasePrice,
                },
                TimeMs::new(4_000),
            )
            .await
            .unwrap();
        let record = h.record("sku-1").await;
        assert_eq!(record.current_price, d("24.99"));

        let prices: Vec<Decimal> = h
            .storefront
            .commits_for(&item_id)
            .await
            .iter()
            .map(|c| c.price)
            .collect();
        assert_eq!(prices, vec![d("24.99"), d("29.15"), d("24.99")]);
    }

    #[tokio::test]
    async fn test_bulk_edit_and_undo_round_trip() {
        let h = Harness::new().await;
        h.item("sku-1", "24.99", true).await;
        h.item("sku-2", "40.00", false).await;
        let ids = vec![ItemId::new("sku-1"), ItemId::new("sku-2")];

        let outcome = h
            .coordinator
            .bulk_edit(&ids, BulkAdjustment::Percent(d("-0.10")), TimeMs::new(1_000))
            .await
            .unwrap();
        assert!(outcome.failed.is_empty());
        assert_eq!(outcome.batch.snapshots.len(), 2);
        assert_eq!(h.record("sku-1").await.current_price, d("22.49"));
        assert_eq!(h.record("sku-2").await.current_price, d("36.00"));

        let undoable = h
            .repo
            .list_undoable_batches(&h.store, TimeMs::new(2_000))
            .await
            .unwrap();
        assert_eq!(undoable.len(), 1);

        let result = h
            .coordinator
            .undo(&outcome.batch.batch_id, TimeMs::new(2_000))
            .await
            .unwrap();
        assert_eq!(result.restored, ids);
        assert_eq!(h.record("sku-1").await.current_price, d("24.99"));
        assert_eq!(h.record("sku-2").await.current_price, d("40.00"));
        assert!(h.record("sku-1").await.auto_pricing_enabled);
        assert!(!h.record("sku-2").await.auto_pricing_enabled);

        let history = h.repo.list_price_changes(&ids[0], 10).await.unwrap();
        assert_eq!(history[0].reason, ChangeReason::Undo);
        assert_eq!(history[1].reason, ChangeReason::BulkEdit);

        let again = h
            .coordinator
            .undo(&outcome.batch.batch_id, TimeMs::new(3_000))
            .await;
        assert!(matches!(again, Err(CoordinatorError::AlreadyUndone(_))));
    }

    #[tokio::test]
    async fn test_bulk_edit_reports_items_over_ceiling() {
        let h = Harness::new().await;
        h.item("sku-1", "24.99", true).await;
        h.item("sku-2", "45.00", true).await;
        let ids = vec![ItemId::new("sku-1"), ItemId::new("sku-2")];

        let outcome = h
            .coordinator
            .bulk_edit(&ids, BulkAdjustment::Amount(d("10")), TimeMs::new(1_000))
            .await
            .unwrap();
        assert_eq!(outcome.batch.snapshots.len(), 1);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].item_id, ItemId::new("sku-2"));
        assert_eq!(h.record("sku-1").await.current_price, d("34.99"));
        assert_eq!(h.record("sku-2").await.current_price, d("45.00"));
        assert!(h.storefront.commits_for(&ids[1]).await.is_empty());
    }

    #[tokio::test]
    async fn test_bulk_edit_empty_selection() {
        let h = Harness::new().await;
        let result = h
            .coordinator
            .bulk_edit(&[], BulkAdjustment::Amount(d("1")), TimeMs::new(1_000))
            .await;
        assert!(matches!(result, Err(CoordinatorError::EmptySelection)));
    }

    #[tokio::test]
    async fn test_undo_after_window_is_expired() {
        let h = Harness::new().await;
        h.item("sku-1", "24.99", true).await;
        let created = TimeMs::new(1_000);
        let batch = h
            .coordinator
            .set_item_enabled(
                &ItemId::new("sku-1"),
                ItemToggle::Disable {
                    revert_to_base: false,
                },
                created,
            )
            .await
            .unwrap();

        let ten_minutes_later = created.plus_ms(600_000);
        let result = h.coordinator.undo(&batch.batch_id, ten_minutes_later).await;
        match result {
            Err(CoordinatorError::ExpiredUndo { expired_at, .. }) => {
                assert_eq!(expired_at, created.plus_ms(UNDO_WINDOW));
            }
            other => panic!("expected ExpiredUndo, got {:?}", other),
        }
        assert!(!h.record("sku-1").await.auto_pricing_enabled);
    }

    #[tokio::test]
    async fn test_undo_unknown_batch() {
        let h = Harness::new().await;
        let result = h.coordinator.undo("missing", TimeMs::new(1)).await;
        assert!(matches!(result, Err(CoordinatorError::BatchNotFound(_))));
    }

    #[tokio::test]
    async fn test_partial_restore_lists_failed_items() {
        let h = Harness::new().await;
        h.item("sku-1", "24.99", true).await;
        h.item("sku-2", "30.00", true).await;
        let ids = vec![ItemId::new("sku-1"), ItemId::new("sku-2")];

        let outcome = h
            .coordinator
            .bulk_edit(&ids, BulkAdjustment::Amount(d("1")), TimeMs::new(1_000))
            .await
            .unwrap();
        h.storefront.fail_item(ids[1].clone()).await;

        let result = h
            .coordinator
            .undo(&outcome.batch.batch_id, TimeMs::new(2_000))
            .await;
        match result {
            Err(CoordinatorError::PartialRestore { restored, failed }) => {
                assert_eq!(restored, vec![ids[0].clone()]);
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].item_id, ids[1]);
            }
            other => panic!("expected PartialRestore, got {:?}", other),
        }
        assert_eq!(h.record("sku-1").await.current_price, d("24.99"));
        assert_eq!(h.record("sku-2").await.current_price, d("31.00"));

        let batch = h
            .repo
            .get_snapshot_batch(&outcome.batch.batch_id)
            .await
            .unwrap()
            .unwrap();
        assert!(batch.undone_at.is_some());
    }

    #[tokio::test]
    async fn test_global_toggle_and_undo() {
        let h = Harness::new().await;
        h.item("sku-1", "24.99", true).await;
        h.item("sku-2", "30.00", true).await;
        h.item("sku-3", "30.00", false).await;

        let outcome = h
            .coordinator
            .set_global_enabled(
                ItemToggle::Disable {
                    revert_to_base: false,
                },
                TimeMs::new(1_000),
            )
            .await
            .unwrap();
        assert_eq!(outcome.batch.action, SnapshotAction::GlobalOff);
        assert_eq!(outcome.batch.previous_global_enabled, Some(true));
        assert_eq!(outcome.batch.snapshots.len(), 2);
        assert!(!h.repo.get_global_enabled(&h.store).await.unwrap());
        assert!(!h.record("sku-1").await.auto_pricing_enabled);
        assert!(!h.record("sku-2").await.auto_pricing_enabled);

        h.coordinator
            .undo(&outcome.batch.batch_id, TimeMs::new(2_000))
            .await
            .unwrap();
        assert!(h.repo.get_global_enabled(&h.store).await.unwrap());
        assert!(h.record("sku-1").await.auto_pricing_enabled);
        assert!(h.record("sku-2").await.auto_pricing_enabled);
        assert!(!h.record("sku-3").await.auto_pricing_enabled);
    }

    #[tokio::test]
    async fn test_update_limits_validates() {
        let h = Harness::new().await;
        h.item("sku-1", "30.00", true).await;
        let item_id = ItemId::new("sku-1");

        let too_low = LimitsUpdate {
            max_price: Some(d("25")),
            ..Default::default()
        };
        let result = h
            .coordinator
            .update_limits(&item_id, &too_low, TimeMs::new(1_000))
            .await;
        assert!(matches!(result, Err(CoordinatorError::Validation { .. })));

        let ok = LimitsUpdate {
            max_price: Some(d("60")),
            cost: Some(d("12.50")),
            ..Default::default()
        };
        let record = h
            .coordinator
            .update_limits(&item_id, &ok, TimeMs::new(1_000))
            .await
            .unwrap();
        assert_eq!(record.max_price, d("60"));
        assert_eq!(h.record("sku-1").await.cost, d("12.50"));
    }

    #[tokio::test]
    async fn test_missing_item_is_not_found() {
        let h = Harness::new().await;
        let result = h
            .coordinator
            .set_item_enabled(
                &ItemId::new("ghost"),
                ItemToggle::Disable {
                    revert_to_base: false,
                },
                TimeMs::new(1),
            )
            .await;
        assert!(matches!(result, Err(CoordinatorError::NotFound(_))));
    }

    /// Storefront whose first commit races a concurrent write of 30.00 and
    /// whose second commit fails; later commits succeed.
    #[derive(Debug)]
    struct FlakyStorefront {
        repo: Arc<Repository>,
        calls: tokio::sync::Mutex<Vec<Decimal>>,
    }

    #[async_trait::async_trait]
    impl Storefront for FlakyStorefront {
        async fn commit_price(
            &self,
            commit: &PriceCommit,
        ) -> Result<CommitAck, DataSourceError> {
            let call = {
                let mut calls = self.calls.lock().await;
                calls.push(commit.price);
                calls.len()
            };
            match call {
                1 => {
                    let mut record = self
                        .repo
                        .get_pricing_record(&commit.item_id)
                        .await
                        .unwrap()
                        .unwrap();
                    record.current_price = d("30.00");
                    assert!(self
                        .repo
                        .replace_record_if_unchanged(&record, record.version)
                        .await
                        .unwrap());
                }
                2 => {
                    return Err(DataSourceError::HttpError {
                        status: 503,
                        message: "storefront unavailable".to_string(),
                    })
                }
                _ => {}
            }
            Ok(CommitAck {
                item_id: commit.item_id.clone(),
                price: commit.price,
            })
        }
    }

    #[tokio::test]
    async fn test_failed_retry_restores_storefront_price() {
        let h = Harness::new().await;
        h.item("sku-1", "24.99", true).await;
        let storefront = Arc::new(FlakyStorefront {
            repo: h.repo.clone(),
            calls: tokio::sync::Mutex::new(Vec::new()),
        });
        let coordinator = ToggleCoordinator::new(
            h.repo.clone(),
            storefront.clone(),
            PriceEvents::new(h.repo.clone()),
            Arc::new(CycleGate::new()),
            h.store.clone(),
            DAY,
            UNDO_WINDOW,
            Duration::from_millis(200),
        );

        let outcome = coordinator
            .bulk_edit(
                &[ItemId::new("sku-1")],
                BulkAdjustment::Amount(d("1")),
                TimeMs::new(1_000),
            )
            .await
            .unwrap();
        assert_eq!(outcome.failed.len(), 1);
        assert!(outcome.batch.snapshots.is_empty());

        // First push lost its race, the retry's push failed, and the
        // storefront was put back to what the store holds.
        let calls = storefront.calls.lock().await.clone();
        assert_eq!(calls, vec![d("25.99"), d("31.00"), d("30.00")]);
        assert_eq!(h.record("sku-1").await.current_price, d("30.00"));
    }

    async fn three_enabled_items(h: &Harness) -> Vec<(ItemId, Decimal)> {
        let items = vec![
            (ItemId::new("sku-1"), d("29.15")),
            (ItemId::new("sku-2"), d("31.00")),
            (ItemId::new("sku-3"), d("26.99")),
        ];
        for (item_id, price) in &items {
            h.item(item_id.as_str(), &price.to_canonical_string(), true)
                .await;
        }
        items
    }

    #[tokio::test]
    async fn test_global_off_to_base_and_undo_restores_every_item() {
        let h = Harness::new().await;
        let items = three_enabled_items(&h).await;
        let created = TimeMs::new(1_000);

        let outcome = h
            .coordinator
            .set_global_enabled(
                ItemToggle::Disable {
                    revert_to_base: true,
                },
                created,
            )
            .await
            .unwrap();
        assert!(outcome.failed.is_empty());
        assert_eq!(outcome.batch.snapshots.len(), 3);
        for (item_id, _) in &items {
            let record = h.record(item_id.as_str()).await;
            assert!(!record.auto_pricing_enabled);
            assert_eq!(record.current_price, d("24.99"));
        }

        let result = h
            .coordinator
            .undo(&outcome.batch.batch_id, created.plus_ms(120_000))
            .await
            .unwrap();
        assert_eq!(result.restored.len(), 3);
        assert!(h.repo.get_global_enabled(&h.store).await.unwrap());
        for (item_id, price) in &items {
            let record = h.record(item_id.as_str()).await;
            assert!(record.auto_pricing_enabled);
            assert_eq!(record.current_price, *price);
            let last = h.storefront.commits_for(item_id).await;
            assert_eq!(last.last().unwrap().price, *price);
        }
    }

    #[tokio::test]
    async fn test_global_off_undo_after_window_is_expired() {
        let h = Harness::new().await;
        let items = three_enabled_items(&h).await;
        let created = TimeMs::new(1_000);

        let outcome = h
            .coordinator
            .set_global_enabled(
                ItemToggle::Disable {
                    revert_to_base: true,
                },
                created,
            )
            .await
            .unwrap();

        let result = h
            .coordinator
            .undo(&outcome.batch.batch_id, created.plus_ms(600_000))
            .await;
        assert!(matches!(result, Err(CoordinatorError::ExpiredUndo { .. })));
        assert!(!h.repo.get_global_enabled(&h.store).await.unwrap());
        for (item_id, _) in &items {
            let record = h.record(item_id.as_str()).await;
            assert!(!record.auto_pricing_enabled);
            assert_eq!(record.current_price, d("24.99"));
        }
    }
}
