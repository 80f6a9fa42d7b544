pub mod health;
pub mod pricing;

use crate::db::Repository;
use crate::orchestration::{Runner, ToggleCoordinator};
use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub runner: Arc<Runner>,
    pub coordinator: Arc<ToggleCoordinator>,
}

impl AppState {
    pub fn new(
        repo: Arc<Repository>,
        runner: Arc<Runner>,
        coordinator: Arc<ToggleCoordinator>,
    ) -> Self {
        Self {
            repo,
            runner,
            coordinator,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/pricing/run", post(pricing::run_cycle))
        .route("/pricing/items", get(pricing::list_items))
        .route("/pricing/items/:item_id", get(pricing::get_item))
        .route("/pricing/items/:item_id/history", get(pricing::get_history))
        .route("/pricing/items/:item_id/limits", put(pricing::update_limits))
        .route("/pricing/items/:item_id/toggle", post(pricing::toggle_item))
        .route(
            "/pricing/global",
            get(pricing::get_global).post(pricing::set_global),
        )
        .route("/pricing/bulk-edit", post(pricing::bulk_edit))
        .route("/pricing/undo", get(pricing::list_undoable))
        .route("/pricing/undo/:batch_id", post(pricing::undo))
        .layer(cors)
        .with_state(state)
}
