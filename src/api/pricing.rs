use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::domain::{
    Decimal, ItemId, LimitsUpdate, PriceChange, PricingRecord, PricingState, SnapshotBatch,
    TimeMs,
};
use crate::error::AppError;
use crate::orchestration::{
    BatchOutcome, BulkAdjustment, ItemToggle, RestoreResult, ResumeFrom, RunOptions, RunStats,
};

const DEFAULT_HISTORY_LIMIT: i64 = 50;
const MAX_HISTORY_LIMIT: i64 = 500;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingRecordDto {
    pub item_id: String,
    pub starting_price: String,
    pub current_price: String,
    pub max_price: String,
    pub cost: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_smart_price: Option<String>,
    pub auto_pricing_enabled: bool,
    pub current_state: PricingState,
    pub next_price_change_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revert_wait_until_ms: Option<i64>,
    pub is_active: bool,
}

impl From<PricingRecord> for PricingRecordDto {
    fn from(r: PricingRecord) -> Self {
        Self {
            item_id: r.item_id.0,
            starting_price: r.starting_price.to_canonical_string(),
            current_price: r.current_price.to_canonical_string(),
            max_price: r.max_price.to_canonical_string(),
            cost: r.cost.to_canonical_string(),
            last_smart_price: r.last_smart_price.map(|d| d.to_canonical_string()),
            auto_pricing_enabled: r.auto_pricing_enabled,
            current_state: r.current_state,
            next_price_change_ms: r.next_price_change.as_ms(),
            revert_wait_until_ms: r.revert_wait_until.map(|t| t.as_ms()),
            is_active: r.is_active,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitsRequest {
    pub starting_price: Option<String>,
    pub max_price: Option<String>,
    pub cost: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleRequest {
    pub enabled: bool,
    pub resume_from: Option<ResumeFrom>,
    #[serde(default)]
    pub revert_to_base: bool,
}

impl ToggleRequest {
    /// Enabling without an explicit resume choice is rejected; the
    /// controller never picks a resume price on the caller's behalf.
    fn into_toggle(self) -> Result<ItemToggle, AppError> {
        if self.enabled {
            let resume = self.resume_from.ok_or_else(|| {
                AppError::BadRequest(
                    "resumeFrom (basePrice or lastSmartPrice) is required when enabling".into(),
                )
            })?;
            Ok(ItemToggle::Enable { resume })
        } else {
            Ok(ItemToggle::Disable {
                revert_to_base: self.revert_to_base,
            })
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkEditRequest {
    pub item_ids: Vec<String>,
    /// Percentage points, e.g. "-10" lowers prices by 10%.
    pub percent: Option<String>,
    pub amount: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GlobalStatus {
    pub enabled: bool,
}

fn parse_money(field: &str, raw: &str) -> Result<Decimal, AppError> {
    raw.parse::<Decimal>()
        .map_err(|_| AppError::BadRequest(format!("{} must be a decimal number", field)))
}

fn parse_optional_money(field: &str, raw: Option<&String>) -> Result<Option<Decimal>, AppError> {
    raw.map(|s| parse_money(field, s)).transpose()
}

/// An empty body is a live run. Anything else must be a valid
/// `RunRequest`; a body that does not parse is rejected rather than run live.
fn parse_run_request(body: &[u8]) -> Result<RunRequest, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(RunRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("invalid run request: {}", e)))
}

pub async fn run_cycle(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<RunStats>, AppError> {
    let request = parse_run_request(&body)?;
    let options = RunOptions {
        dry_run: request.dry_run,
    };

    // Detached from the request: a caller that hangs up must not cut an
    // item off between its storefront commit and its local write.
    let runner = state.runner.clone();
    let cycle = tokio::spawn(async move { runner.run_cycle(TimeMs::now(), options).await });
    let stats = cycle
        .await
        .map_err(|e| AppError::Internal(format!("pricing cycle aborted: {}", e)))??;
    Ok(Json(stats))
}

pub async fn list_items(
    State(state): State<AppState>,
) -> Result<Json<Vec<PricingRecordDto>>, AppError> {
    let records = state
        .repo
        .list_pricing_records(state.coordinator.store_id())
        .await?;
    Ok(Json(records.into_iter().map(PricingRecordDto::from).collect()))
}

pub async fn get_item(
    Path(item_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<PricingRecordDto>, AppError> {
    let record = state
        .repo
        .get_pricing_record(&ItemId::new(item_id.clone()))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("item {}", item_id)))?;
    Ok(Json(record.into()))
}

pub async fn get_history(
    Path(item_id): Path<String>,
    Query(params): Query<HistoryQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<PriceChange>>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    if !(1..=MAX_HISTORY_LIMIT).contains(&limit) {
        return Err(AppError::BadRequest(format!(
            "limit must be between 1 and {}",
            MAX_HISTORY_LIMIT
        )));
    }
    let history = state
        .repo
        .list_price_changes(&ItemId::new(item_id), limit)
        .await?;
    Ok(Json(history))
}

pub async fn update_limits(
    Path(item_id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<LimitsRequest>,
) -> Result<Json<PricingRecordDto>, AppError> {
    let update = LimitsUpdate {
        starting_price: parse_optional_money("startingPrice", body.starting_price.as_ref())?,
        max_price: parse_optional_money("maxPrice", body.max_price.as_ref())?,
        cost: parse_optional_money("cost", body.cost.as_ref())?,
    };
    let record = state
        .coordinator
        .update_limits(&ItemId::new(item_id), &update, TimeMs::now())
        .await?;
    Ok(Json(record.into()))
}

pub async fn toggle_item(
    Path(item_id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<ToggleRequest>,
) -> Result<Json<SnapshotBatch>, AppError> {
    let toggle = body.into_toggle()?;
    let batch = state
        .coordinator
        .set_item_enabled(&ItemId::new(item_id), toggle, TimeMs::now())
        .await?;
    Ok(Json(batch))
}

pub async fn get_global(State(state): State<AppState>) -> Result<Json<GlobalStatus>, AppError> {
    let enabled = state
        .repo
        .get_global_enabled(state.coordinator.store_id())
        .await?;
    Ok(Json(GlobalStatus { enabled }))
}

pub async fn set_global(
    State(state): State<AppState>,
    Json(body): Json<ToggleRequest>,
) -> Result<Json<BatchOutcome>, AppError> {
    let toggle = body.into_toggle()?;
    let outcome = state
        .coordinator
        .set_global_enabled(toggle, TimeMs::now())
        .await?;
    Ok(Json(outcome))
}

pub async fn bulk_edit(
    State(state): State<AppState>,
    Json(body): Json<BulkEditRequest>,
) -> Result<Json<BatchOutcome>, AppError> {
    let adjustment = match (body.percent.as_deref(), body.amount.as_deref()) {
        (Some(percent), None) => {
            let points = parse_money("percent", percent)?;
            let fraction = points
                .checked_div(Decimal::new(rust_decimal::Decimal::ONE_HUNDRED))
                .ok_or_else(|| AppError::BadRequest("percent is out of range".into()))?;
            BulkAdjustment::Percent(fraction)
        }
        (None, Some(amount)) => BulkAdjustment::Amount(parse_money("amount", amount)?),
        _ => {
            return Err(AppError::BadRequest(
                "exactly one of percent or amount is required".into(),
            ))
        }
    };
    let item_ids: Vec<ItemId> = body.item_ids.into_iter().map(ItemId::new).collect();
    let outcome = state
        .coordinator
        .bulk_edit(&item_ids, adjustment, TimeMs::now())
        .await?;
    Ok(Json(outcome))
}

pub async fn list_undoable(
    State(state): State<AppState>,
) -> Result<Json<Vec<SnapshotBatch>>, AppError> {
    let batches = state
        .repo
        .list_undoable_batches(state.coordinator.store_id(), TimeMs::now())
        .await?;
    Ok(Json(batches))
}

pub async fn undo(
    Path(batch_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<RestoreResult>, AppError> {
    let result = state.coordinator.undo(&batch_id, TimeMs::now()).await?;
    Ok(Json(result))
}
