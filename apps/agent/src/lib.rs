//! # fiscal-agent Library
//!
//! Wiring and HTTP surface for the headless fiscal agent. `main.rs` only
//! loads configuration, initializes logging and serves the router.
//!
//! ## Module Organization
//! ```text
//! fiscal_agent/
//! ├── lib.rs          ◄─── You are here (tracing init, shutdown signal)
//! ├── app.rs          ◄─── Agent: build, start, ordered shutdown
//! ├── routes/         ◄─── axum handlers over ControlApi
//! └── error.rs        ◄─── ApiError { code, message } + status mapping
//! ```

pub mod app;
pub mod error;
pub mod routes;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Initializes the tracing subscriber.
///
/// Default filter `info,fiscal=debug,sqlx=warn`; `RUST_LOG` overrides it.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fiscal=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}

// =============================================================================
// Router Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::Value;
    use tokio::net::TcpListener;

    use fiscal_db::{Database, DbConfig};
    use fiscal_sync::{AgentConfig, SimulatedBackend};

    use crate::app::Agent;
    use crate::routes::router;

    struct Served {
        _dir: tempfile::TempDir,
        base: String,
        http: reqwest::Client,
        backend: SimulatedBackend,
        agent: Agent,
    }

    async fn serve() -> Served {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AgentConfig::default();
        config.watcher.inbox_dir = dir.path().join("inbox");
        config.watcher.autostart = false;
        config.backend.timeout_secs = 1;

        let backend = SimulatedBackend::new();
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let agent = Agent::start_with(config, db, Arc::new(backend.clone()))
            .await
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        let app = router(agent.api.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Served {
            _dir: dir,
            base: format!("http://{}", addr),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap(),
            backend,
            agent,
        }
    }

    impl Served {
        async fn post(&self, path: &str) -> (u16, Value) {
            let res = self.http.post(format!("{}{}", self.base, path)).send().await.unwrap();
            (res.status().as_u16(), res.json().await.unwrap())
        }

        async fn get(&self, path: &str) -> (u16, Value) {
            let res = self.http.get(format!("{}{}", self.base, path)).send().await.unwrap();
            (res.status().as_u16(), res.json().await.unwrap())
        }
    }

    #[tokio::test]
    async fn test_day_routes_acknowledge() {
        let s = serve().await;

        let (code, body) = s.post("/day/open").await;
        assert_eq!(code, 200);
        assert_eq!(body["already_open"], false);
        assert_eq!(body["day"]["day_no"], 1);

        let (_, body) = s.post("/day/open").await;
        assert_eq!(body["already_open"], true);

        let (code, body) = s.post("/day/close").await;
        assert_eq!(code, 200);
        assert_eq!(body["already_closed"], false);
        assert_eq!(body["day"]["state"], "closed");
    }

    #[tokio::test]
    async fn test_day_open_refused_when_backend_down() {
        let s = serve().await;
        s.backend.set_reachable(false);

        let (code, body) = s.post("/day/open").await;
        assert_eq!(code, 503);
        assert_eq!(body["code"], "BACKEND_UNAVAILABLE");

        let (_, status) = s.get("/status").await;
        assert_eq!(status["day"]["state"], "closed");
    }

    #[tokio::test]
    async fn test_status_config_and_listing() {
        let s = serve().await;

        let (code, status) = s.get("/status").await;
        assert_eq!(code, 200);
        assert_eq!(status["online"], true);
        assert_eq!(status["day_message"], "Day must be opened first");
        assert_eq!(status["watcher"]["running"], false);

        let (_, config) = s.get("/config").await;
        assert_eq!(config["backend_kind"], "simulated");
        assert_eq!(config["backend"]["device_id"], "SIM-0001");

        s.agent
            .api
            .store()
            .create("INV-7", fiscal_core::Money::from_minor(700))
            .await
            .unwrap();
        let (code, invoices) = s.get("/invoices?status=pending").await;
        assert_eq!(code, 200);
        assert_eq!(invoices.as_array().map(Vec::len), Some(1));
        assert_eq!(invoices[0]["number"], "INV-7");

        let (_, activity) = s.get("/activity?limit=1").await;
        assert_eq!(activity.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn test_watcher_routes_and_sync() {
        let s = serve().await;

        let (code, body) = s.post("/watcher/start").await;
        assert_eq!(code, 200);
        assert_eq!(body["running"], true);

        let (_, body) = s.post("/watcher/stop").await;
        assert_eq!(body["running"], false);

        let (code, report) = s.post("/sync").await;
        assert_eq!(code, 200);
        assert_eq!(report["retried"], 0);
        assert_eq!(report["online"], true);
    }
}
