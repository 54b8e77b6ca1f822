//! Shared fixtures for the crate's async tests.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use fiscal_core::{Invoice, InvoiceStatus};
use fiscal_db::{Database, DbConfig};

use crate::activity::ActivityLog;
use crate::config::EngineSettings;
use crate::engine::{EngineHandle, EngineStatus};
use crate::store::InvoiceStore;

const WAIT_LIMIT: Duration = Duration::from_secs(5);
const POLL_EVERY: Duration = Duration::from_millis(5);

pub(crate) async fn test_store() -> InvoiceStore {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    InvoiceStore::new(db, Arc::new(ActivityLog::new(200)))
}

/// Millisecond-scale timings so retry and probe paths finish quickly.
pub(crate) fn fast_settings() -> EngineSettings {
    EngineSettings {
        max_retries: 3,
        retry_delay: Duration::from_millis(10),
        probe_base: Duration::from_millis(10),
        probe_max: Duration::from_millis(40),
        alert_threshold: 5,
    }
}

pub(crate) fn count_messages(log: &ActivityLog, needle: &str) -> usize {
    log.snapshot(log.capacity())
        .iter()
        .filter(|e| e.message.contains(needle))
        .count()
}

pub(crate) async fn wait_for_invoice_status(
    store: &InvoiceStore,
    id: &str,
    status: InvoiceStatus,
) -> Invoice {
    let deadline = Instant::now() + WAIT_LIMIT;
    loop {
        let invoice = store.get(id).await.unwrap();
        if invoice.status == status {
            return invoice;
        }
        assert!(
            Instant::now() < deadline,
            "invoice {} stayed {} (expected {})",
            invoice.number,
            invoice.status,
            status
        );
        tokio::time::sleep(POLL_EVERY).await;
    }
}

pub(crate) async fn wait_for_engine<F>(handle: &EngineHandle, done: F) -> EngineStatus
where
    F: Fn(&EngineStatus) -> bool,
{
    let deadline = Instant::now() + WAIT_LIMIT;
    loop {
        let status = handle.status().await;
        if done(&status) {
            return status;
        }
        assert!(Instant::now() < deadline, "engine never reached state: {:?}", status);
        tokio::time::sleep(POLL_EVERY).await;
    }
}

pub(crate) async fn wait_for_activity(log: &ActivityLog, needle: &str, count: usize) {
    let deadline = Instant::now() + WAIT_LIMIT;
    while count_messages(log, needle) < count {
        assert!(Instant::now() < deadline, "no activity entry containing {:?}", needle);
        tokio::time::sleep(POLL_EVERY).await;
    }
}
