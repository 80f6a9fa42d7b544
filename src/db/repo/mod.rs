//! Repository layer for the Pricing Record Store.
//!
//! Methods are organized across submodules by concern:
//! - `mod.rs` - pricing records and the tenant toggle
//! - `snapshots.rs` - the undo snapshot log and price history
//!
//! Every write to `pricing_records` is conditional on the row's `version`
//! and bumps it, so the runner and the coordinator can race without
//! overwriting each other.

mod snapshots;

use crate::domain::{Decimal, ItemId, PricingRecord, PricingState, StoreId, TimeMs};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::str::FromStr;

const RECORD_COLUMNS: &str = r#"
    item_id, store_id, starting_price, current_price, max_price, cost,
    previous_price, last_smart_price, auto_pricing_enabled, current_state,
    next_price_change_ms, revert_wait_until_ms, is_active, version
"#;

/// Repository for database operations.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    /// Cheap connectivity probe for readiness checks.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // =========================================================================
    // Tenant toggle
    // =========================================================================

    /// Read the global auto-pricing flag. A store with no settings row is off.
    pub async fn get_global_enabled(&self, store_id: &StoreId) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT auto_pricing_enabled FROM store_settings WHERE store_id = ?")
            .bind(store_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row
            .map(|r| r.get::<i64, _>("auto_pricing_enabled") != 0)
            .unwrap_or(false))
    }

    pub async fn set_global_enabled(
        &self,
        store_id: &StoreId,
        enabled: bool,
        now: TimeMs,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO store_settings (store_id, auto_pricing_enabled, updated_ms)
            VALUES (?, ?, ?)
            ON CONFLICT(store_id) DO UPDATE SET
                auto_pricing_enabled = excluded.auto_pricing_enabled,
                updated_ms = excluded.updated_ms
            "#,
        )
        .bind(store_id.as_str())
        .bind(enabled as i64)
        .bind(now.as_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // =========================================================================
    // Catalog sync collaborator
    // =========================================================================

    /// Create or refresh an item from catalog sync.
    ///
    /// New items start disabled in `Increasing`. For existing items only
    /// `cost` and `is_active` are refreshed; the price fields belong to the
    /// pricing core and are never overwritten here.
    ///
    /// Returns `true` when the record was created.
    pub async fn sync_catalog_item(
        &self,
        store_id: &StoreId,
        item_id: &ItemId,
        price: Decimal,
        max_price: Decimal,
        cost: Decimal,
        now: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let record = PricingRecord::new_from_catalog(
            item_id.clone(),
            store_id.clone(),
            price,
            max_price,
            cost,
            now,
        );

        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO pricing_records (
                item_id, store_id, starting_price, current_price, max_price, cost,
                auto_pricing_enabled, current_state, next_price_change_ms,
                is_active, version, updated_ms
            ) VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?, 1, 0, ?)
            ON CONFLICT(item_id) DO NOTHING
            "#,
        )
        .bind(record.item_id.as_str())
        .bind(record.store_id.as_str())
        .bind(record.starting_price.to_canonical_string())
        .bind(record.current_price.to_canonical_string())
        .bind(record.max_price.to_canonical_string())
        .bind(record.cost.to_canonical_string())
        .bind(record.current_state.as_str())
        .bind(record.next_price_change.as_ms())
        .bind(now.as_ms())
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if !inserted {
            sqlx::query(
                r#"
                UPDATE pricing_records
                SET cost = ?, is_active = 1, version = version + 1, updated_ms = ?
                WHERE item_id = ?
                "#,
            )
            .bind(cost.to_canonical_string())
            .bind(now.as_ms())
            .bind(item_id.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Deactivate or reactivate an item; records are never hard-deleted.
    pub async fn set_item_active(
        &self,
        item_id: &ItemId,
        active: bool,
        now: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE pricing_records
            SET is_active = ?, version = version + 1, updated_ms = ?
            WHERE item_id = ?
            "#,
        )
        .bind(active as i64)
        .bind(now.as_ms())
        .bind(item_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Pricing records
    // =========================================================================

    pub async fn get_pricing_record(
        &self,
        item_id: &ItemId,
    ) -> Result<Option<PricingRecord>, sqlx::Error> {
        let sql = format!("SELECT {} FROM pricing_records WHERE item_id = ?", RECORD_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(item_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    /// All records of a store, active or not, ordered by item id.
    pub async fn list_pricing_records(
        &self,
        store_id: &StoreId,
    ) -> Result<Vec<PricingRecord>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM pricing_records WHERE store_id = ? ORDER BY item_id ASC",
            RECORD_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(store_id.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    /// Active, enabled records whose cool-down has elapsed at `now`.
    pub async fn list_due_records(
        &self,
        store_id: &StoreId,
        now: TimeMs,
    ) -> Result<Vec<PricingRecord>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {} FROM pricing_records
            WHERE store_id = ? AND auto_pricing_enabled = 1 AND is_active = 1
              AND next_price_change_ms <= ?
            ORDER BY item_id ASC
            "#,
            RECORD_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(store_id.as_str())
            .bind(now.as_ms())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    /// Write an automated transition.
    ///
    /// Succeeds only if the row still has `expected_version`, is still enabled
    /// and active, and is still due at `now`. Returns `false` when any of
    /// those no longer hold.
    pub async fn apply_decision_if_unchanged(
        &self,
        next: &PricingRecord,
        expected_version: i64,
        now: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        self.conditional_write(next, expected_version, Some(now)).await
    }

    /// Write a manual change (toggle, bulk edit, undo, limits) if the row
    /// still has `expected_version`. Returns `false` on a lost race.
    pub async fn replace_record_if_unchanged(
        &self,
        next: &PricingRecord,
        expected_version: i64,
    ) -> Result<bool, sqlx::Error> {
        self.conditional_write(next, expected_version, None).await
    }

    async fn conditional_write(
        &self,
        next: &PricingRecord,
        expected_version: i64,
        due_at: Option<TimeMs>,
    ) -> Result<bool, sqlx::Error> {
        let mut sql = String::from(
            r#"
            UPDATE pricing_records SET
                starting_price = ?, current_price = ?, max_price = ?, cost = ?,
                previous_price = ?, last_smart_price = ?, auto_pricing_enabled = ?,
                current_state = ?, next_price_change_ms = ?, revert_wait_until_ms = ?,
                version = version + 1, updated_ms = ?
            WHERE item_id = ? AND version = ?
            "#,
        );
        if due_at.is_some() {
            sql.push_str(
                " AND auto_pricing_enabled = 1 AND is_active = 1 AND next_price_change_ms <= ?",
            );
        }

        let mut query = sqlx::query(&sql)
            .bind(next.starting_price.to_canonical_string())
            .bind(next.current_price.to_canonical_string())
            .bind(next.max_price.to_canonical_string())
            .bind(next.cost.to_canonical_string())
            .bind(next.previous_price.map(|d| d.to_canonical_string()))
            .bind(next.last_smart_price.map(|d| d.to_canonical_string()))
            .bind(next.auto_pricing_enabled as i64)
            .bind(next.current_state.as_str())
            .bind(next.next_price_change.as_ms())
            .bind(next.revert_wait_until.map(|t| t.as_ms()))
            .bind(chrono::Utc::now().timestamp_millis())
            .bind(next.item_id.as_str())
            .bind(expected_version);
        if let Some(now) = due_at {
            query = query.bind(now.as_ms());
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}

fn parse_decimal_column(row: &SqliteRow, column: &str) -> Result<Decimal, sqlx::Error> {
    let raw: String = row.get(column);
    Decimal::from_str(&raw).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

fn parse_optional_decimal_column(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<Decimal>, sqlx::Error> {
    let raw: Option<String> = row.get(column);
    raw.map(|s| {
        Decimal::from_str(&s).map_err(|e| sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: Box::new(e),
        })
    })
    .transpose()
}

fn record_from_row(row: &SqliteRow) -> Result<PricingRecord, sqlx::Error> {
    let state_str: String = row.get("current_state");
    let current_state =
        PricingState::from_str(&state_str).map_err(|e| sqlx::Error::ColumnDecode {
            index: "current_state".to_string(),
            source: e.into(),
        })?;

    Ok(PricingRecord {
        item_id: ItemId::new(row.get::<String, _>("item_id")),
        store_id: StoreId::new(row.get::<String, _>("store_id")),
        starting_price: parse_decimal_column(row, "starting_price")?,
        current_price: parse_decimal_column(row, "current_price")?,
        max_price: parse_decimal_column(row, "max_price")?,
        cost: parse_decimal_column(row, "cost")?,
        previous_price: parse_optional_decimal_column(row, "previous_price")?,
        last_smart_price: parse_optional_decimal_column(row, "last_smart_price")?,
        auto_pricing_enabled: row.get::<i64, _>("auto_pricing_enabled") != 0,
        current_state,
        next_price_change: TimeMs::new(row.get("next_price_change_ms")),
        revert_wait_until: row
            .get::<Option<i64>, _>("revert_wait_until_ms")
            .map(TimeMs::new),
        is_active: row.get::<i64, _>("is_active") != 0,
        version: row.get("version"),
    })
}
