//! Undo snapshot log and price history operations for the repository.

use crate::domain::{
    ChangeReason, ItemId, PriceChange, Snapshot, SnapshotAction, SnapshotBatch, StoreId, TimeMs,
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;

use super::{parse_decimal_column, parse_optional_decimal_column, Repository};

impl Repository {
    // =========================================================================
    // Snapshot log
    // =========================================================================

    /// Persist a batch and all of its snapshots in one transaction.
    pub async fn insert_snapshot_batch(&self, batch: &SnapshotBatch) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO snapshot_batches (
                batch_id, store_id, action, description, created_ms, expires_ms,
                undone_ms, previous_global_enabled
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&batch.batch_id)
        .bind(batch.store_id.as_str())
        .bind(batch.action.as_str())
        .bind(&batch.description)
        .bind(batch.created_at.as_ms())
        .bind(batch.expires_at.as_ms())
        .bind(batch.undone_at.map(|t| t.as_ms()))
        .bind(batch.previous_global_enabled.map(|b| b as i64))
        .execute(&mut *tx)
        .await?;

        for snapshot in &batch.snapshots {
            sqlx::query(
                r#"
                INSERT INTO snapshots (
                    batch_id, item_id, old_price, new_price, was_enabled, now_enabled, created_ms
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&batch.batch_id)
            .bind(snapshot.item_id.as_str())
            .bind(snapshot.old_price.to_canonical_string())
            .bind(snapshot.new_price.map(|d| d.to_canonical_string()))
            .bind(snapshot.was_enabled as i64)
            .bind(snapshot.now_enabled as i64)
            .bind(snapshot.timestamp.as_ms())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_snapshot_batch(
        &self,
        batch_id: &str,
    ) -> Result<Option<SnapshotBatch>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT batch_id, store_id, action, description, created_ms, expires_ms,
                   undone_ms, previous_global_enabled
            FROM snapshot_batches
            WHERE batch_id = ?
            "#,
        )
        .bind(batch_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut batch = batch_from_row(&row)?;

        let rows = sqlx::query(
            r#"
            SELECT item_id, old_price, new_price, was_enabled, now_enabled, created_ms
            FROM snapshots
            WHERE batch_id = ?
            ORDER BY item_id ASC
            "#,
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        batch.snapshots = rows
            .iter()
            .map(|r| {
                Ok(Snapshot {
                    item_id: ItemId::new(r.get::<String, _>("item_id")),
                    old_price: parse_decimal_column(r, "old_price")?,
                    new_price: parse_optional_decimal_column(r, "new_price")?,
                    was_enabled: r.get::<i64, _>("was_enabled") != 0,
                    now_enabled: r.get::<i64, _>("now_enabled") != 0,
                    action: batch.action,
                    timestamp: TimeMs::new(r.get("created_ms")),
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        Ok(Some(batch))
    }

    /// Batches of a store that can still be undone at `now`, newest first.
    pub async fn list_undoable_batches(
        &self,
        store_id: &StoreId,
        now: TimeMs,
    ) -> Result<Vec<SnapshotBatch>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT batch_id, store_id, action, description, created_ms, expires_ms,
                   undone_ms, previous_global_enabled
            FROM snapshot_batches
            WHERE store_id = ? AND undone_ms IS NULL AND expires_ms >= ?
            ORDER BY created_ms DESC, batch_id ASC
            "#,
        )
        .bind(store_id.as_str())
        .bind(now.as_ms())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(batch_from_row).collect()
    }

    /// Mark a batch undone. Returns `false` if it already was, so concurrent
    /// undo requests for one batch cannot both proceed.
    pub async fn claim_batch_for_undo(
        &self,
        batch_id: &str,
        now: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE snapshot_batches SET undone_ms = ? WHERE batch_id = ? AND undone_ms IS NULL",
        )
        .bind(now.as_ms())
        .bind(batch_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Price history
    // =========================================================================

    pub async fn insert_price_change(&self, change: &PriceChange) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO price_changes (item_id, old_price, new_price, reason, changed_ms)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(change.item_id.as_str())
        .bind(change.old_price.to_canonical_string())
        .bind(change.new_price.to_canonical_string())
        .bind(change.reason.as_str())
        .bind(change.changed_at.as_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent price changes of an item, newest first.
    pub async fn list_price_changes(
        &self,
        item_id: &ItemId,
        limit: i64,
    ) -> Result<Vec<PriceChange>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT item_id, old_price, new_price, reason, changed_ms
            FROM price_changes
            WHERE item_id = ?
            ORDER BY changed_ms DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(item_id.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                let reason_str: String = r.get("reason");
                let reason =
                    ChangeReason::from_str(&reason_str).map_err(|e| sqlx::Error::ColumnDecode {
                        index: "reason".to_string(),
                        source: e.into(),
                    })?;
                Ok(PriceChange {
                    item_id: ItemId::new(r.get::<String, _>("item_id")),
                    old_price: parse_decimal_column(r, "old_price")?,
                    new_price: parse_decimal_column(r, "new_price")?,
                    reason,
                    changed_at: TimeMs::new(r.get("changed_ms")),
                })
            })
            .collect()
    }
}

fn batch_from_row(row: &SqliteRow) -> Result<SnapshotBatch, sqlx::Error> {
    let action_str: String = row.get("action");
    let action = SnapshotAction::from_str(&action_str).map_err(|e| sqlx::Error::ColumnDecode {
        index: "action".to_string(),
        source: e.into(),
    })?;

    Ok(SnapshotBatch {
        batch_id: row.get("batch_id"),
        store_id: StoreId::new(row.get::<String, _>("store_id")),
        action,
        description: row.get("description"),
        created_at: TimeMs::new(row.get("created_ms")),
        expires_at: TimeMs::new(row.get("expires_ms")),
        undone_at: row.get::<Option<i64>, _>("undone_ms").map(TimeMs::new),
        previous_global_enabled: row
            .get::<Option<i64>, _>("previous_global_enabled")
            .map(|v| v != 0),
        snapshots: Vec::new(),
    })
}
