//! # Control Routes
//!
//! HTTP/JSON surface over [`ControlApi`].
//!
//! ## Route Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  POST /day/open        open the fiscal day (idempotent)                 │
//! │  POST /day/close       close the fiscal day (idempotent)                │
//! │  POST /sync            force sync                                       │
//! │  GET  /status          connection, day, watcher, engine, counts         │
//! │  GET  /config          local settings + backend identity                │
//! │  GET  /activity        ?limit=N, newest first                           │
//! │  GET  /invoices        ?status=pending&limit=N                          │
//! │  POST /watcher/start   start the inbox watcher                          │
//! │  POST /watcher/stop    stop the inbox watcher                           │
//! │  GET  /health          liveness                                         │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod activity;
pub mod day;
pub mod status;
pub mod sync;
pub mod watcher;

use axum::routing::{get, post};
use axum::Router;

use fiscal_sync::ControlApi;

/// Builds the control router.
pub fn router(api: ControlApi) -> Router {
    Router::new()
        .route("/day/open", post(day::open_day))
        .route("/day/close", post(day::close_day))
        .route("/sync", post(sync::force_sync))
        .route("/status", get(status::get_status))
        .route("/config", get(status::get_config))
        .route("/activity", get(activity::get_activity))
        .route("/invoices", get(activity::list_invoices))
        .route("/watcher/start", post(watcher::start_watcher))
        .route("/watcher/stop", post(watcher::stop_watcher))
        .route("/health", get(status::health))
        .with_state(api)
}
