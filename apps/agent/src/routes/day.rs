//! Fiscal day commands.

use axum::extract::State;
use axum::Json;
use tracing::info;

use fiscal_sync::{CloseDayResponse, ControlApi, OpenDayResponse};

use crate::error::ApiResult;

pub async fn open_day(State(api): State<ControlApi>) -> ApiResult<Json<OpenDayResponse>> {
    let response = api.open_day().await?;
    info!(
        day_no = response.day.day_no,
        already_open = response.already_open,
        "Open day requested"
    );
    Ok(Json(response))
}

pub async fn close_day(State(api): State<ControlApi>) -> ApiResult<Json<CloseDayResponse>> {
    let response = api.close_day().await?;
    info!(
        day_no = response.day.day_no,
        already_closed = response.already_closed,
        "Close day requested"
    );
    Ok(Json(response))
}
