//! Status, configuration and liveness.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use fiscal_sync::{ConfigResponse, ControlApi, StatusResponse};

use crate::error::ApiResult;

pub async fn get_status(State(api): State<ControlApi>) -> ApiResult<Json<StatusResponse>> {
    Ok(Json(api.get_status().await?))
}

/// Always 200; an unreachable backend shows up as `backend_error`.
pub async fn get_config(State(api): State<ControlApi>) -> Json<ConfigResponse> {
    Json(api.get_config().await)
}

pub async fn health() -> impl IntoResponse {
    "OK"
}
