//! Activity feed and invoice listing.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use fiscal_core::{ActivityEntry, Invoice, InvoiceStatus};
use fiscal_sync::ControlApi;

use crate::error::ApiResult;

/// Entries returned when no limit is given; matches the default log capacity.
const DEFAULT_ACTIVITY_LIMIT: usize = 50;

#[derive(Debug, Default, Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InvoiceQuery {
    pub status: Option<InvoiceStatus>,
    pub limit: Option<u32>,
}

pub async fn get_activity(
    State(api): State<ControlApi>,
    Query(query): Query<ActivityQuery>,
) -> Json<Vec<ActivityEntry>> {
    Json(api.activity(query.limit.unwrap_or(DEFAULT_ACTIVITY_LIMIT)))
}

pub async fn list_invoices(
    State(api): State<ControlApi>,
    Query(query): Query<InvoiceQuery>,
) -> ApiResult<Json<Vec<Invoice>>> {
    Ok(Json(api.list_invoices(query.status, query.limit).await?))
}
