use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::info;

use crate::config::Settings;
use crate::coordinator::{RefreshCoordinator, TriggerStatus};
use crate::error::ApiError;
use crate::view::view;

pub const SERVICE_NAME: &str = "Google Trends API";

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<RefreshCoordinator>,
    pub settings: Arc<Settings>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/trends", get(get_trends))
        .route("/api/update", post(force_update))
        .route("/health", get(health))
        .with_state(state)
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct TrendsQuery {
    pub geo: Option<String>,
    pub category: Option<String>,
    #[serde(default = "default_true")]
    pub flat: bool,
    #[serde(default)]
    pub force_refresh: bool,
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "endpoints": {
            "trends": "/api/trends",
            "force_update": "/api/update",
            "health": "/health",
        }
    }))
}

/// Serve from cache. Without a cache, wait (bounded) for a running refresh;
/// if that leaves nothing, or the client forces it, scrape `geo` now.
async fn get_trends(
    State(state): State<AppState>,
    Query(q): Query<TrendsQuery>,
) -> Result<Response, ApiError> {
    let store = state.coordinator.store();
    // shared by both waits below
    let deadline = Instant::now() + state.settings.cold_start_wait();

    if store.snapshot().is_none() && store.is_updating() {
        info!("no cache yet, waiting for the running update");
        store.wait_until_idle(deadline.saturating_duration_since(Instant::now())).await;
    }

    let snapshot = match store.snapshot() {
        Some(snapshot) if !q.force_refresh => snapshot,
        _ => {
            let geo = q.geo.as_deref().unwrap_or(&state.settings.geo);
            info!(geo, force = q.force_refresh, "scraping now");
            let remaining = deadline.saturating_duration_since(Instant::now());
            state.coordinator.refresh_now(geo, remaining).await?
        }
    };

    let body = view(&snapshot, q.category.as_deref(), q.flat, store.cache_info())?;
    Ok(Json(body).into_response())
}

async fn force_update(State(state): State<AppState>) -> Json<Value> {
    let status = state.coordinator.trigger();
    let message = match status {
        TriggerStatus::UpdateTriggered => "Background update has been triggered",
        TriggerStatus::UpdateAlreadyRunning => "An update is already in progress",
    };
    Json(json!({
        "status": status,
        "message": message,
        "cache_info": state.coordinator.store().cache_info(),
    }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "cache": state.coordinator.store().cache_info(),
        "timestamp": Utc::now(),
    }))
}
