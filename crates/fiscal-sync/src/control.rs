//! # Control API
//!
//! Operator commands and status queries. Transport-agnostic: the agent
//! binary serves these over HTTP, tests call them directly.
//!
//! ## Command Routing
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  open_day / close_day / force_sync ──► EngineHandle (serialized with    │
//! │                                        in-flight sign/send)             │
//! │                                                                         │
//! │  get_status ──► EngineStatus + StatusCounts + FiscalDay + watcher       │
//! │  get_config ──► AgentConfig + FiscalClient::get_config (best effort)    │
//! │  activity   ──► ActivityLog::snapshot                                   │
//! │  start_watcher / stop_watcher ──► FileWatcher                           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every command is an idempotent acknowledgement: repeating it reports the
//! current state instead of failing.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use ts_rs::TS;

use fiscal_core::{ActivityEntry, BackendConfig, FiscalDay, Invoice, InvoiceStatus};

use crate::config::AgentConfig;
use crate::engine::{EngineHandle, EngineStatus, ForceSyncReport, OFFLINE_NOTICE};
use crate::error::SyncResult;
use crate::fiscal::FiscalClient;
use crate::store::{InvoiceStore, StatusCounts};
use crate::watcher::{FileWatcher, WatcherStatus};

/// Default page size for invoice listings.
pub const DEFAULT_LIST_LIMIT: u32 = 100;

// =============================================================================
// Response DTOs
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OpenDayResponse {
    pub day: FiscalDay,
    pub already_open: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CloseDayResponse {
    pub day: FiscalDay,
    pub already_closed: bool,
}

/// Everything the dashboard shows at a glance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StatusResponse {
    pub online: bool,
    /// "Connected to fiscal backend" / "Connection failed"
    pub connection: String,
    /// Banner text while offline.
    pub offline_notice: Option<String>,
    pub day: FiscalDay,
    /// "Ready to process invoices" / "Day must be opened first"
    pub day_message: String,
    pub watcher: WatcherStatus,
    pub engine: EngineStatus,
    pub counts: StatusCounts,
    pub alert: Option<String>,
}

/// Local configuration plus the backend's own identity, when reachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ConfigResponse {
    pub agent_name: String,
    pub backend_kind: String,
    pub backend_url: Option<String>,
    pub inbox_dir: String,
    pub max_retries: u32,
    pub alert_threshold: u32,
    pub activity_capacity: usize,
    pub backend: Option<BackendConfig>,
    pub backend_error: Option<String>,
}

// =============================================================================
// Control API
// =============================================================================

/// Command surface shared by every transport.
#[derive(Clone)]
pub struct ControlApi {
    store: InvoiceStore,
    engine: EngineHandle,
    client: FiscalClient,
    watcher: Arc<FileWatcher>,
    config: Arc<AgentConfig>,
}

impl std::fmt::Debug for ControlApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlApi")
            .field("backend", &self.client.backend_name())
            .field("watcher_running", &self.watcher.is_running())
            .finish()
    }
}

impl ControlApi {
    pub fn new(
        store: InvoiceStore,
        engine: EngineHandle,
        client: FiscalClient,
        watcher: Arc<FileWatcher>,
        config: Arc<AgentConfig>,
    ) -> Self {
        ControlApi {
            store,
            engine,
            client,
            watcher,
            config,
        }
    }

    // =========================================================================
    // Fiscal Day
    // =========================================================================

    /// Opens the fiscal day. On an open day returns `already_open: true`.
    pub async fn open_day(&self) -> SyncResult<OpenDayResponse> {
        let change = self.engine.open_day().await?;
        Ok(OpenDayResponse {
            day: change.day,
            already_open: !change.changed,
        })
    }

    pub async fn close_day(&self) -> SyncResult<CloseDayResponse> {
        let change = self.engine.close_day().await?;
        Ok(CloseDayResponse {
            day: change.day,
            already_closed: !change.changed,
        })
    }

    // =========================================================================
    // Sync
    // =========================================================================

    /// Re-enqueues stalled invoices and probes the backend if offline.
    pub async fn force_sync(&self) -> SyncResult<ForceSyncReport> {
        self.engine.force_sync().await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub async fn get_status(&self) -> SyncResult<StatusResponse> {
        let engine = self.engine.status().await;
        let day = self.store.current_day().await?;
        let counts = self.store.counts().await?;

        let (connection, offline_notice) = if engine.online {
            ("Connected to fiscal backend", None)
        } else {
            ("Connection failed", Some(OFFLINE_NOTICE.to_string()))
        };
        let day_message = if day.is_open() {
            "Ready to process invoices"
        } else {
            "Day must be opened first"
        };

        Ok(StatusResponse {
            online: engine.online,
            connection: connection.to_string(),
            offline_notice,
            day,
            day_message: day_message.to_string(),
            watcher: self.watcher.status(),
            alert: engine.alert.clone(),
            engine,
            counts,
        })
    }

    /// Never fails on backend trouble; the error is reported in the body.
    pub async fn get_config(&self) -> ConfigResponse {
        let (backend, backend_error) = match self.client.get_config().await {
            Ok(config) => (Some(config), None),
            Err(e) => {
                debug!(error = %e, "Backend config unavailable");
                (None, Some(e.reason().to_string()))
            }
        };

        ConfigResponse {
            agent_name: self.config.agent.name.clone(),
            backend_kind: self.config.backend.kind.to_string(),
            backend_url: self.config.backend.url.clone(),
            inbox_dir: self.watcher.inbox_dir().display().to_string(),
            max_retries: self.config.sync.max_retries,
            alert_threshold: self.config.sync.alert_threshold,
            activity_capacity: self.store.activity().capacity(),
            backend,
            backend_error,
        }
    }

    /// Newest entries first.
    pub fn activity(&self, limit: usize) -> Vec<ActivityEntry> {
        self.store.activity().snapshot(limit)
    }

    /// Invoices newest first, optionally filtered by status.
    pub async fn list_invoices(
        &self,
        status: Option<InvoiceStatus>,
        limit: Option<u32>,
    ) -> SyncResult<Vec<Invoice>> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT);
        match status {
            Some(status) => self.store.list_by_status(status, limit).await,
            None => self.store.list_recent(limit).await,
        }
    }

    // =========================================================================
    // Watcher
    // =========================================================================

    pub async fn start_watcher(&self) -> SyncResult<WatcherStatus> {
        self.watcher.start().await?;
        Ok(self.watcher.status())
    }

    pub async fn stop_watcher(&self) -> WatcherStatus {
        self.watcher.stop().await;
        self.watcher.status()
    }

    pub fn store(&self) -> &InvoiceStore {
        &self.store
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WatcherSettings;
    use crate::engine::SyncEngine;
    use crate::error::FiscalError;
    use crate::fiscal::{FiscalOp, SimulatedBackend};
    use crate::test_support::{count_messages, fast_settings, test_store, wait_for_engine, wait_for_invoice_status};
    use fiscal_core::{DayState, Money};
    use std::time::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        backend: SimulatedBackend,
        api: ControlApi,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store().await;
        let backend = SimulatedBackend::new();
        let client = FiscalClient::new(Arc::new(backend.clone()), Duration::from_secs(1));
        let (engine, _task) = SyncEngine::spawn(store.clone(), client.clone(), fast_settings());

        let settings = WatcherSettings {
            inbox_dir: dir.path().join("inbox"),
            poll_interval_ms: 10,
            debounce_ms: 20,
            ..Default::default()
        };
        let watcher = Arc::new(FileWatcher::new(settings, store.clone(), engine.clone()));
        let api = ControlApi::new(store, engine, client, watcher, Arc::new(AgentConfig::default()));

        Fixture {
            _dir: dir,
            backend,
            api,
        }
    }

    #[tokio::test]
    async fn test_open_day_twice_acknowledges() {
        let f = fixture().await;

        let first = f.api.open_day().await.unwrap();
        assert!(!first.already_open);
        assert_eq!(first.day.day_no, 1);
        assert_eq!(first.day.state, DayState::Open);

        let second = f.api.open_day().await.unwrap();
        assert!(second.already_open);
        assert_eq!(second.day, first.day);

        let log = f.api.store().activity();
        assert_eq!(count_messages(log, "Fiscal day opened"), 1);
        assert_eq!(count_messages(log, "Fiscal day 1 is already open"), 1);
    }

    #[tokio::test]
    async fn test_close_day_when_closed_acknowledges() {
        let f = fixture().await;

        let closed = f.api.close_day().await.unwrap();
        assert!(closed.already_closed);
        assert_eq!(closed.day.day_no, 0);

        f.api.open_day().await.unwrap();
        let closed = f.api.close_day().await.unwrap();
        assert!(!closed.already_closed);
        assert_eq!(closed.day.state, DayState::Closed);
        assert!(!f.backend.is_day_open());
    }

    #[tokio::test]
    async fn test_status_reflects_day_and_connection() {
        let f = fixture().await;

        let status = f.api.get_status().await.unwrap();
        assert!(status.online);
        assert_eq!(status.connection, "Connected to fiscal backend");
        assert_eq!(status.offline_notice, None);
        assert_eq!(status.day_message, "Day must be opened first");
        assert!(!status.watcher.running);

        f.api.open_day().await.unwrap();
        let status = f.api.get_status().await.unwrap();
        assert_eq!(status.day_message, "Ready to process invoices");
    }

    #[tokio::test]
    async fn test_status_while_offline() {
        let f = fixture().await;
        f.api.open_day().await.unwrap();

        f.backend.set_reachable(false);
        let invoice = f.api.store().create("INV-1", Money::from_minor(100)).await.unwrap();
        f.api.engine.ingest(&invoice.id, invoice.seq).await.unwrap();
        wait_for_engine(&f.api.engine, |s| !s.online).await;

        let status = f.api.get_status().await.unwrap();
        assert!(!status.online);
        assert_eq!(status.connection, "Connection failed");
        assert_eq!(status.offline_notice.as_deref(), Some(OFFLINE_NOTICE));
        assert_eq!(status.counts.pending, 1);

        f.backend.set_reachable(true);
        let report = f.api.force_sync().await.unwrap();
        assert!(report.online);
        wait_for_invoice_status(f.api.store(), &invoice.id, InvoiceStatus::Sent).await;
    }

    #[tokio::test]
    async fn test_config_reports_backend_error() {
        let f = fixture().await;

        let config = f.api.get_config().await;
        assert_eq!(config.backend_kind, "simulated");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.backend.map(|b| b.device_id).as_deref(), Some("SIM-0001"));
        assert_eq!(config.backend_error, None);

        f.backend
            .fail_next(FiscalOp::Config, FiscalError::Transient("503: busy".into()), 1);
        let config = f.api.get_config().await;
        assert_eq!(config.backend, None);
        assert_eq!(config.backend_error.as_deref(), Some("503: busy"));
    }

    #[tokio::test]
    async fn test_watcher_toggle_and_listing() {
        let f = fixture().await;

        assert!(f.api.start_watcher().await.unwrap().running);
        assert!(f.api.start_watcher().await.unwrap().running);
        assert!(!f.api.stop_watcher().await.running);
        assert!(!f.api.stop_watcher().await.running);

        f.api.store().create("A", Money::from_minor(100)).await.unwrap();
        f.api.store().create("B", Money::from_minor(200)).await.unwrap();

        let all = f.api.list_invoices(None, None).await.unwrap();
        assert_eq!(all.len(), 2);
        let pending = f
            .api
            .list_invoices(Some(InvoiceStatus::Pending), Some(1))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert!(f
            .api
            .list_invoices(Some(InvoiceStatus::Sent), None)
            .await
            .unwrap()
            .is_empty());

        let entries = f.api.activity(2);
        assert_eq!(entries.len(), 2);
        assert!(entries[0].message.contains("Invoice B received"));
    }
}
