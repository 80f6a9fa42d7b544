//! State machine runner: one bounded cycle over every due item.
//!
//! The runner does not schedule itself; an external trigger calls
//! [`Runner::run_cycle`]. Items are independent and are processed with
//! bounded parallelism. Per item the sequence is read, decide, re-read,
//! commit to the storefront, then a versioned conditional write.

use crate::config::PricingPolicy;
use crate::datasource::{DataSourceError, PriceCommit, RevenueSource, Storefront};
use crate::db::Repository;
use crate::domain::{ChangeReason, ItemId, PriceChange, PricingRecord, StoreId, TimeMs};
use crate::engine::{decide, Decision, DecisionError, Transition};
use crate::orchestration::events::PriceEvents;
use crate::orchestration::gate::CycleGate;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

/// Counters returned by one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    pub processed: usize,
    pub increased: usize,
    pub reverted: usize,
    pub held: usize,
    pub skipped: usize,
    pub errors: usize,
    /// The global toggle was off; nothing was evaluated.
    pub cycle_skipped: bool,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ItemFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemFailure {
    pub item_id: ItemId,
    pub error: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Decide but do not commit anything.
    pub dry_run: bool,
}

/// Whole-cycle failure; nothing was committed.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("pricing store unreachable: {0}")]
    StoreUnreachable(#[source] sqlx::Error),
}

/// Why one item failed; it stays eligible for the next cycle.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error(transparent)]
    DataQuality(DecisionError),
    #[error("revenue signal: {0}")]
    Revenue(DataSourceError),
    #[error("price commit: {0}")]
    Commit(DataSourceError),
    #[error("store: {0}")]
    Store(#[from] sqlx::Error),
}

#[derive(Debug)]
enum ItemOutcome {
    Applied(Transition),
    Skipped(&'static str),
    Failed(ItemError),
}

/// Timing and parallelism of a cycle.
#[derive(Debug, Clone, Copy)]
pub struct RunnerSettings {
    pub concurrency: usize,
    pub call_timeout: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            concurrency: 8,
            call_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Clone)]
pub struct Runner {
    repo: Arc<Repository>,
    revenue: Arc<dyn RevenueSource>,
    storefront: Arc<dyn Storefront>,
    events: PriceEvents,
    gate: Arc<CycleGate>,
    store_id: StoreId,
    policy: PricingPolicy,
    settings: RunnerSettings,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Runner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo: Arc<Repository>,
        revenue: Arc<dyn RevenueSource>,
        storefront: Arc<dyn Storefront>,
        events: PriceEvents,
        gate: Arc<CycleGate>,
        store_id: StoreId,
        policy: PricingPolicy,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            repo,
            revenue,
            storefront,
            events,
            gate,
            store_id,
            policy,
            settings,
            shutdown: None,
        }
    }

    /// Once the channel reads `true`, no new items start; in-flight items
    /// finish their current write.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Run one cycle at `now`.
    ///
    /// # Errors
    /// Only `StoreUnreachable`; per-item failures land in `RunStats`.
    pub async fn run_cycle(&self, now: TimeMs, options: RunOptions) -> Result<RunStats, RunError> {
        let _cycle = self.gate.shared().await;

        let global_enabled = self
            .repo
            .get_global_enabled(&self.store_id)
            .await
            .map_err(RunError::StoreUnreachable)?;
        let due = self
            .repo
            .list_due_records(&self.store_id, now)
            .await
            .map_err(RunError::StoreUnreachable)?;

        let mut stats = RunStats {
            dry_run: options.dry_run,
            ..Default::default()
        };

        if !global_enabled {
            info!(store_id = %self.store_id, due = due.len(), "Global auto-pricing off, skipping cycle");
            stats.skipped = due.len();
            stats.cycle_skipped = true;
            return Ok(stats);
        }

        info!(
            store_id = %self.store_id,
            due = due.len(),
            dry_run = options.dry_run,
            "Starting pricing cycle"
        );

        let outcomes: Vec<(ItemId, ItemOutcome)> = stream::iter(due)
            .map(|record| async move {
                let item_id = record.item_id.clone();
                let outcome = self.process_item(record, now, options).await;
                (item_id, outcome)
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        for (item_id, outcome) in outcomes {
            stats.processed += 1;
            match outcome {
                ItemOutcome::Applied(Transition::Increase) => stats.increased += 1,
                ItemOutcome::Applied(Transition::Revert) => stats.reverted += 1,
                ItemOutcome::Applied(Transition::Hold(_) | Transition::Rearm) => stats.held += 1,
                ItemOutcome::Skipped(reason) => {
                    info!(item_id = %item_id, reason, "Item skipped");
                    stats.skipped += 1;
                }
                ItemOutcome::Failed(error) => {
                    warn!(item_id = %item_id, error = %error, "Item failed, will retry next cycle");
                    stats.errors += 1;
                    stats.failures.push(ItemFailure {
                        item_id,
                        error: error.to_string(),
                    });
                }
            }
        }
        stats.failures.sort_by(|a, b| a.item_id.cmp(&b.item_id));

        info!(
            store_id = %self.store_id,
            processed = stats.processed,
            increased = stats.increased,
            reverted = stats.reverted,
            held = stats.held,
            skipped = stats.skipped,
            errors = stats.errors,
            "Pricing cycle finished"
        );
        Ok(stats)
    }

    fn shutting_down(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    async fn with_timeout<T>(
        &self,
        call: impl Future<Output = Result<T, DataSourceError>>,
    ) -> Result<T, DataSourceError> {
        match tokio::time::timeout(self.settings.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(DataSourceError::Timeout),
        }
    }

    async fn process_item(
        &self,
        record: PricingRecord,
        now: TimeMs,
        options: RunOptions,
    ) -> ItemOutcome {
        if self.shutting_down() {
            return ItemOutcome::Skipped("cycle cancelled");
        }

        let window_start = now.plus_ms(-self.policy.period_ms);
        let signal = match self
            .with_timeout(
                self.revenue
                    .fetch_revenue_signal(&record.item_id, window_start, now),
            )
            .await
        {
            Ok(signal) => signal,
            Err(e) => return ItemOutcome::Failed(ItemError::Revenue(e)),
        };

        let decision = match decide(&record, &signal, now, &self.policy) {
            Ok(decision) => decision,
            Err(DecisionError::NotEligible(reason)) => return ItemOutcome::Skipped(reason),
            Err(e) => return ItemOutcome::Failed(ItemError::DataQuality(e)),
        };

        if options.dry_run {
            return ItemOutcome::Applied(decision.transition);
        }

        match self.commit(&record, &decision, now).await {
            Ok(true) => ItemOutcome::Applied(decision.transition),
            Ok(false) => ItemOutcome::Skipped("record changed during cycle"),
            Err(e) => ItemOutcome::Failed(e),
        }
    }

    /// Compare-and-commit. `Ok(false)` means the record moved under us and
    /// nothing local was written.
    async fn commit(
        &self,
        record: &PricingRecord,
        decision: &Decision,
        now: TimeMs,
    ) -> Result<bool, ItemError> {
        let Some(current) = self.repo.get_pricing_record(&record.item_id).await? else {
            return Ok(false);
        };
        if current.version != record.version || !current.is_due(now) {
            return Ok(false);
        }

        let next = decision.apply_to(&current);

        if let Some(price) = decision.new_price {
            // Same step, same key: a retried cycle re-sends an identical write.
            let scope = format!("cycle:{}:{}", current.version, current.next_price_change);
            let commit = PriceCommit::new(current.item_id.clone(), price, &scope);
            self.with_timeout(self.storefront.commit_price(&commit))
                .await
                .map_err(ItemError::Commit)?;
        }

        let written = match self
            .repo
            .apply_decision_if_unchanged(&next, current.version, now)
            .await
        {
            Ok(written) => written,
            Err(e) => {
                if decision.changes_price() {
                    self.compensate(&current).await;
                }
                return Err(e.into());
            }
        };

        if !written {
            if decision.changes_price() {
                self.compensate(&current).await;
            }
            return Ok(false);
        }

        if let Some(new_price) = decision.new_price {
            let reason = match decision.transition {
                Transition::Revert => ChangeReason::Revert,
                _ => ChangeReason::Increase,
            };
            self.events
                .price_changed(PriceChange {
                    item_id: current.item_id.clone(),
                    old_price: current.current_price,
                    new_price,
                    reason,
                    changed_at: now,
                })
                .await;
        }
        Ok(true)
    }

    /// The storefront took a price the store then refused; put the
    /// storefront back to whatever the store now holds.
    async fn compensate(&self, before: &PricingRecord) {
        let target = match self.repo.get_pricing_record(&before.item_id).await {
            Ok(Some(latest)) => latest.current_price,
            _ => before.current_price,
        };
        let scope = format!("compensate:{}:{}", before.version, before.next_price_change);
        let commit = PriceCommit::new(before.item_id.clone(), target, &scope);
        match self.with_timeout(self.storefront.commit_price(&commit)).await {
            Ok(_) => warn!(
                item_id = %before.item_id,
                price = %target,
                "Lost race after storefront commit, restored storefront price"
            ),
            Err(e) => warn!(
                item_id = %before.item_id,
                error = %e,
                "Lost race after storefront commit and could not restore storefront price"
            ),
        }
    }
}
