use axum::extract::State;
use axum::Json;

use fiscal_sync::{ControlApi, ForceSyncReport};

use crate::error::ApiResult;

/// Re-enqueues stalled invoices and probes the backend when offline.
pub async fn force_sync(State(api): State<ControlApi>) -> ApiResult<Json<ForceSyncReport>> {
    Ok(Json(api.force_sync().await?))
}
