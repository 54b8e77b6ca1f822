//! File watcher toggles.

use axum::extract::State;
use axum::Json;

use fiscal_sync::{ControlApi, WatcherStatus};

use crate::error::ApiResult;

pub async fn start_watcher(State(api): State<ControlApi>) -> ApiResult<Json<WatcherStatus>> {
    Ok(Json(api.start_watcher().await?))
}

pub async fn stop_watcher(State(api): State<ControlApi>) -> Json<WatcherStatus> {
    Json(api.stop_watcher().await)
}
