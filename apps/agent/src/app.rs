//! # Agent Wiring
//!
//! Builds every long-lived component from an [`AgentConfig`] and tears them
//! down in order.
//!
//! ## Startup Sequence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  1. Database ──────── SQLite file, WAL, migrations                      │
//! │  2. ActivityLog ───── capacity from [activity]                          │
//! │  3. FiscalClient ──── HttpBackend | SimulatedBackend + call timeout     │
//! │  4. SyncEngine ────── restores unfinished invoices, recovers in-flight  │
//! │  5. FileWatcher ───── started when [watcher].autostart                  │
//! │  6. ControlApi ────── handed to the HTTP router                         │
//! │                                                                         │
//! │  Shutdown: watcher ──► engine (finishes current step) ──► database      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use fiscal_db::{Database, DbConfig};
use fiscal_sync::{
    ActivityLog, AgentConfig, BackendKind, ControlApi, EngineHandle, FileWatcher, FiscalBackend,
    FiscalClient, HttpBackend, InvoiceStore, SimulatedBackend, SyncEngine, SyncError, SyncResult,
};

/// A running agent.
pub struct Agent {
    pub api: ControlApi,
    engine: EngineHandle,
    engine_task: JoinHandle<()>,
    watcher: Arc<FileWatcher>,
    db: Database,
}

impl Agent {
    /// Opens the configured database and backend, then starts everything.
    pub async fn start(config: AgentConfig) -> SyncResult<Self> {
        let db = Database::new(DbConfig::new(config.database_path())).await?;
        let backend = build_backend(&config)?;
        Self::start_with(config, db, backend).await
    }

    /// Starts with an explicit database and backend.
    pub async fn start_with(
        config: AgentConfig,
        db: Database,
        backend: Arc<dyn FiscalBackend>,
    ) -> SyncResult<Self> {
        let activity = Arc::new(ActivityLog::new(config.activity.capacity));
        let store = InvoiceStore::new(db.clone(), activity);
        let client = FiscalClient::new(backend, config.call_timeout());
        info!(backend = client.backend_name(), "Fiscal client ready");

        let (engine, engine_task) =
            SyncEngine::spawn(store.clone(), client.clone(), config.engine_settings());

        let watcher = Arc::new(FileWatcher::new(
            config.watcher.clone(),
            store.clone(),
            engine.clone(),
        ));
        if config.watcher.autostart {
            watcher.start().await?;
        }

        store.activity().success("System started successfully", None);

        let api = ControlApi::new(
            store,
            engine.clone(),
            client,
            Arc::clone(&watcher),
            Arc::new(config),
        );

        Ok(Agent {
            api,
            engine,
            engine_task,
            watcher,
            db,
        })
    }

    /// Stops ingestion first so nothing new reaches a stopping engine.
    pub async fn shutdown(self) {
        info!("Shutting down agent");

        self.watcher.stop().await;

        if let Err(e) = self.engine.shutdown().await {
            warn!(error = %e, "Engine already stopped");
        }
        if let Err(e) = self.engine_task.await {
            warn!(error = %e, "Engine task ended abnormally");
        }

        self.db.close().await;
        info!("Agent stopped");
    }
}

/// Chooses the backend from `[backend]`.
pub fn build_backend(config: &AgentConfig) -> SyncResult<Arc<dyn FiscalBackend>> {
    match config.backend.kind {
        BackendKind::Http => {
            let url = config.backend.url.as_deref().ok_or_else(|| {
                SyncError::InvalidConfig("backend.url is required for the http backend".into())
            })?;
            Ok(Arc::new(HttpBackend::new(url, config.call_timeout())?))
        }
        BackendKind::Simulated => {
            warn!("Using the simulated fiscal backend; nothing is reported to the tax authority");
            Ok(Arc::new(SimulatedBackend::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_backend_requires_url() {
        let mut config = AgentConfig::default();
        config.backend.kind = BackendKind::Http;
        assert!(matches!(build_backend(&config), Err(SyncError::InvalidConfig(_))));

        config.backend.url = Some("http://127.0.0.1:9000/api/".into());
        assert_eq!(build_backend(&config).unwrap().name(), "http");
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AgentConfig::default();
        config.watcher.inbox_dir = dir.path().join("inbox");
        config.database.path = Some(dir.path().join("agent.db"));

        let agent = Agent::start(config).await.unwrap();
        let status = agent.api.get_status().await.unwrap();
        assert!(status.watcher.running);
        assert!(status.engine.running);
        assert!(agent
            .api
            .activity(10)
            .iter()
            .any(|e| e.message == "System started successfully"));

        agent.shutdown().await;
        assert!(dir.path().join("agent.db").exists());
    }
}
