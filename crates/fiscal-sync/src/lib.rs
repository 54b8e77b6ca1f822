//! # fiscal-sync: Sync Engine for the Fiscal Bridge
//!
//! This crate moves invoices from a watched directory to the fiscal
//! backend, keeping every invoice's lifecycle durable and ordered.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   inbox/*.json                                                          │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  ┌─────────────┐  create   ┌──────────────┐  append  ┌──────────────┐   │
//! │  │ FileWatcher │──────────►│ InvoiceStore │─────────►│ ActivityLog  │   │
//! │  └──────┬──────┘           └──────▲───────┘          └──────┬───────┘   │
//! │         │ ingest(id, seq)         │ transition              │ snapshot, │
//! │         ▼                         │                         │ subscribe │
//! │  ┌─────────────┐  sign / send ┌───┴──────────┐              ▼           │
//! │  │ SyncEngine  │─────────────►│ FiscalClient │       dashboard, logs    │
//! │  │ (one task)  │              │ Http | Sim   │                          │
//! │  └──────▲──────┘              └──────────────┘                          │
//! │         │ open_day / close_day / force_sync                             │
//! │  ┌──────┴──────┐                                                        │
//! │  │ ControlApi  │◄──── agent HTTP server                                 │
//! │  └─────────────┘                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`activity`] - Bounded operator event log with push subscriptions
//! - [`config`] - Agent configuration (TOML + `FISCAL_*` overrides)
//! - [`control`] - Operator commands and status queries
//! - [`engine`] - Ordered sign/send pipeline, retries and offline mode
//! - [`error`] - Sync and backend error types
//! - [`fiscal`] - Backend trait, HTTP and simulated backends, timeout client
//! - [`probe`] - Jittered exponential probe schedule
//! - [`store`] - Invoice store enforcing the lifecycle
//! - [`watcher`] - Inbox directory watcher
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fiscal_sync::{ActivityLog, AgentConfig, FiscalClient, InvoiceStore, SimulatedBackend, SyncEngine};
//!
//! let config = AgentConfig::load(None)?;
//! let store = InvoiceStore::new(database, Arc::new(ActivityLog::new(config.activity.capacity)));
//! let client = FiscalClient::new(Arc::new(SimulatedBackend::new()), config.call_timeout());
//! let (engine, task) = SyncEngine::spawn(store.clone(), client, config.engine_settings());
//!
//! engine.open_day().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod activity;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod fiscal;
pub mod probe;
pub mod store;
pub mod watcher;

#[cfg(test)]
pub(crate) mod test_support;

// =============================================================================
// Re-exports
// =============================================================================

pub use activity::{ActivityLog, SubscriptionId};
pub use config::{AgentConfig, BackendKind, EngineSettings, WatcherSettings};
pub use control::{CloseDayResponse, ConfigResponse, ControlApi, OpenDayResponse, StatusResponse};
pub use engine::{EngineHandle, EngineStatus, ForceSyncReport, SyncEngine, OFFLINE_NOTICE};
pub use error::{FiscalError, SyncError, SyncResult};
pub use fiscal::{FiscalBackend, FiscalClient, FiscalOp, HttpBackend, SimulatedBackend};
pub use store::{DayChange, InvoiceStore, StatusCounts, TransitionMeta};
pub use watcher::{FileWatcher, WatcherStatus};
