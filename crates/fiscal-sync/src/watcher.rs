//! # File Watcher
//!
//! Polls the inbox directory and turns stable `*.json` files into invoices.
//!
//! ## Per-File Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  seen ──► candidate ──(same size+mtime for debounce)──► ready           │
//! │                                                         │               │
//! │                                   parse + store.create ─┤               │
//! │                                                         │               │
//! │          ┌──────────────────────────┬───────────────────┴──────┐        │
//! │          ▼                          ▼                          ▼        │
//! │   ok: engine.ingest,         invalid / duplicate:       store failure:  │
//! │       move to processed/     Error entry, file left,    retried on the  │
//! │                              settled (not re-reported)  next scan       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A settled file is reported again only if its size or mtime changes.
//! Ready files in one scan are ingested oldest first.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use ts_rs::TS;

use fiscal_core::validation::parse_invoice_document;
use fiscal_core::CoreError;

use crate::activity::ActivityLog;
use crate::config::WatcherSettings;
use crate::engine::EngineHandle;
use crate::error::{SyncError, SyncResult};
use crate::store::InvoiceStore;

/// Observable watcher state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct WatcherStatus {
    pub running: bool,
    pub inbox_dir: String,
}

struct Running {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

/// Inbox directory watcher.
pub struct FileWatcher {
    settings: WatcherSettings,
    store: InvoiceStore,
    engine: EngineHandle,
    running: Arc<AtomicBool>,
    current: Mutex<Option<Running>>,
}

impl FileWatcher {
    pub fn new(settings: WatcherSettings, store: InvoiceStore, engine: EngineHandle) -> Self {
        FileWatcher {
            settings,
            store,
            engine,
            running: Arc::new(AtomicBool::new(false)),
            current: Mutex::new(None),
        }
    }

    /// Starts polling. Returns false if already running.
    pub async fn start(&self) -> SyncResult<bool> {
        let mut current = self.current.lock().await;
        if current.is_some() {
            return Ok(false);
        }

        tokio::fs::create_dir_all(&self.settings.inbox_dir).await?;
        if self.settings.archive_processed {
            tokio::fs::create_dir_all(self.settings.processed_path()).await?;
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let scanner = Scanner {
            settings: self.settings.clone(),
            store: self.store.clone(),
            engine: self.engine.clone(),
            activity: Arc::clone(self.store.activity()),
            candidates: HashMap::new(),
            settled: HashMap::new(),
        };
        let task = tokio::spawn(scanner.run(shutdown_rx));

        *current = Some(Running { shutdown_tx, task });
        self.running.store(true, Ordering::SeqCst);

        info!(inbox_dir = %self.settings.inbox_dir.display(), "File watcher started");
        self.store.activity().info(
            format!("File watcher started. Monitoring: {}", self.settings.inbox_dir.display()),
            None,
        );
        Ok(true)
    }

    /// Stops polling and waits for the scan task to exit. Returns false if
    /// it was not running.
    ///
    /// Nothing is ingested after this returns.
    pub async fn stop(&self) -> bool {
        let Some(running) = self.current.lock().await.take() else {
            return false;
        };

        let _ = running.shutdown_tx.send(()).await;
        if let Err(e) = running.task.await {
            warn!(error = %e, "File watcher task ended abnormally");
        }
        self.running.store(false, Ordering::SeqCst);

        info!("File watcher stopped");
        self.store.activity().info("File watcher stopped", None);
        true
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn inbox_dir(&self) -> &Path {
        &self.settings.inbox_dir
    }

    pub fn status(&self) -> WatcherStatus {
        WatcherStatus {
            running: self.is_running(),
            inbox_dir: self.settings.inbox_dir.display().to_string(),
        }
    }
}

// =============================================================================
// Scanner
// =============================================================================

type Fingerprint = (u64, Option<SystemTime>);

struct Candidate {
    fingerprint: Fingerprint,
    stable_since: Instant,
}

struct Scanner {
    settings: WatcherSettings,
    store: InvoiceStore,
    engine: EngineHandle,
    activity: Arc<ActivityLog>,
    candidates: HashMap<PathBuf, Candidate>,
    /// Files already reported or handled, by fingerprint.
    settled: HashMap<PathBuf, Fingerprint>,
}

impl Scanner {
    async fn run(mut self, mut shutdown_rx: mpsc::Receiver<()>) {
        let mut interval = tokio::time::interval(self.settings.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.scan().await {
                        warn!(error = %e, "Inbox scan failed");
                    }
                }
            }
        }

        debug!("Scanner exiting");
    }

    async fn scan(&mut self) -> SyncResult<()> {
        let mut seen = HashSet::new();
        let mut ready = Vec::new();

        let mut entries = tokio::fs::read_dir(&self.settings.inbox_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !is_candidate(&path) {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                _ => continue,
            };
            let fingerprint = (metadata.len(), metadata.modified().ok());
            seen.insert(path.clone());

            if self.settled.get(&path) == Some(&fingerprint) {
                continue;
            }

            match self.candidates.get(&path) {
                Some(c) if c.fingerprint == fingerprint => {
                    if c.stable_since.elapsed() >= self.settings.debounce() {
                        ready.push((fingerprint.1, path, fingerprint));
                    }
                }
                _ => {
                    self.candidates.insert(
                        path,
                        Candidate {
                            fingerprint,
                            stable_since: Instant::now(),
                        },
                    );
                }
            }
        }

        self.candidates.retain(|p, _| seen.contains(p));
        self.settled.retain(|p, _| seen.contains(p));

        ready.sort();
        for (_, path, fingerprint) in ready {
            self.ingest(path, fingerprint).await;
        }

        Ok(())
    }

    async fn ingest(&mut self, path: PathBuf, fingerprint: Fingerprint) {
        self.candidates.remove(&path);
        let name = display_name(&path);

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(file = %name, error = %e, "Inbox file vanished before read");
                return;
            }
        };

        let descriptor = match parse_invoice_document(&bytes) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                self.activity
                    .error(format!("Invalid invoice file {}: {}", name, e), None);
                self.settled.insert(path, fingerprint);
                return;
            }
        };

        match self.store.create(&descriptor.number, descriptor.amount).await {
            Ok(invoice) => {
                if let Err(e) = self.engine.ingest(&invoice.id, invoice.seq).await {
                    // Still recorded as Pending; queued on the next engine start
                    warn!(invoice_id = %invoice.id, error = %e, "Engine not accepting invoices");
                }
                self.archive(path, fingerprint).await;
            }
            Err(SyncError::Core(CoreError::DuplicateNumber { number, day_no })) => {
                self.activity.error(
                    format!(
                        "Duplicate invoice {} in {}: already recorded for fiscal day {}",
                        number, name, day_no
                    ),
                    None,
                );
                self.settled.insert(path, fingerprint);
            }
            Err(SyncError::Core(CoreError::Validation(e))) => {
                self.activity
                    .error(format!("Invalid invoice file {}: {}", name, e), None);
                self.settled.insert(path, fingerprint);
            }
            Err(e) => {
                warn!(file = %name, error = %e, "Failed to record invoice, will retry");
            }
        }
    }

    async fn archive(&mut self, path: PathBuf, fingerprint: Fingerprint) {
        if !self.settings.archive_processed {
            self.settled.insert(path, fingerprint);
            return;
        }

        let processed = self.settings.processed_path();
        let target = match unique_target(&processed, &path).await {
            Some(target) => target,
            None => {
                self.settled.insert(path, fingerprint);
                return;
            }
        };

        if let Err(e) = tokio::fs::rename(&path, &target).await {
            warn!(file = %path.display(), error = %e, "Failed to archive processed file");
            self.settled.insert(path, fingerprint);
        } else {
            debug!(from = %path.display(), to = %target.display(), "Archived invoice file");
        }
    }
}

fn is_candidate(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map_or(true, |n| n.starts_with('.'));
    let json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    json && !hidden
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// `processed/<name>`, or `processed/<stem>-<n>.<ext>` when taken.
async fn unique_target(dir: &Path, source: &Path) -> Option<PathBuf> {
    let file_name = source.file_name()?;
    let first = dir.join(file_name);
    if !tokio::fs::try_exists(&first).await.unwrap_or(false) {
        return Some(first);
    }

    let stem = source.file_stem()?.to_string_lossy();
    let ext = source
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();
    for n in 1..1000 {
        let candidate = dir.join(format!("{}-{}.{}", stem, n, ext));
        if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return Some(candidate);
        }
    }
    None
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SyncEngine;
    use crate::fiscal::{FiscalClient, SimulatedBackend};
    use crate::test_support::{count_messages, fast_settings, test_store, wait_for_activity, wait_for_engine};
    use fiscal_core::{InvoiceStatus, Money};
    use std::time::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        inbox: PathBuf,
        store: InvoiceStore,
        engine: EngineHandle,
        watcher: FileWatcher,
    }

    async fn fixture() -> Fixture {
        fixture_with(30).await
    }

    async fn fixture_with(debounce_ms: u64) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let inbox = dir.path().join("inbox");
        let store = test_store().await;

        let client = FiscalClient::new(Arc::new(SimulatedBackend::new()), Duration::from_secs(1));
        let (engine, _task) = SyncEngine::spawn(store.clone(), client, fast_settings());

        let settings = WatcherSettings {
            inbox_dir: inbox.clone(),
            poll_interval_ms: 10,
            debounce_ms,
            ..Default::default()
        };
        let watcher = FileWatcher::new(settings, store.clone(), engine.clone());

        Fixture {
            _dir: dir,
            inbox,
            store,
            engine,
            watcher,
        }
    }

    async fn wait_for_invoices(store: &InvoiceStore, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while store.list_recent(100).await.unwrap().len() < count {
            assert!(Instant::now() < deadline, "expected {} invoices", count);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[test]
    fn test_candidate_filter() {
        assert!(is_candidate(Path::new("/in/INV-1.json")));
        assert!(is_candidate(Path::new("/in/INV-1.JSON")));
        assert!(!is_candidate(Path::new("/in/INV-1.json.tmp")));
        assert!(!is_candidate(Path::new("/in/.INV-1.json")));
        assert!(!is_candidate(Path::new("/in/readme.txt")));
    }

    #[tokio::test]
    async fn test_stable_file_is_ingested_and_archived() {
        let f = fixture().await;
        assert!(f.watcher.start().await.unwrap());
        assert!(f.watcher.is_running());

        let file = f.inbox.join("INV-010.json");
        std::fs::write(&file, r#"{"number": "INV-010", "amount": 1999, "till": 4}"#).unwrap();

        wait_for_invoices(&f.store, 1).await;
        let invoice = &f.store.list_recent(1).await.unwrap()[0];
        assert_eq!(invoice.number, "INV-010");
        assert_eq!(invoice.amount(), Money::from_minor(1999));
        assert_eq!(invoice.status, InvoiceStatus::Pending);

        // Handed to the engine, which parks it until the day opens
        wait_for_engine(&f.engine, |s| s.queue_len == 1 && s.parked).await;

        let deadline = Instant::now() + Duration::from_secs(5);
        while file.exists() {
            assert!(Instant::now() < deadline, "file was not archived");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(f.inbox.join("processed").join("INV-010.json").exists());
        assert_eq!(count_messages(f.store.activity(), "Monitoring:"), 1);
    }

    #[tokio::test]
    async fn test_file_still_being_written_is_not_read() {
        let f = fixture_with(200).await;
        f.watcher.start().await.unwrap();

        let file = f.inbox.join("slow.json");
        let chunks = [
            r#"{"num"#,
            r#"ber": "#,
            r#""INV-"#,
            r#"SLOW","#,
            r#" "amo"#,
            r#"unt": "#,
            r#"4200"#,
            r#"}"#,
        ];
        for chunk in chunks {
            let mut out = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&file)
                .unwrap();
            std::io::Write::write_all(&mut out, chunk.as_bytes()).unwrap();
            drop(out);

            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(f.store.list_recent(10).await.unwrap().is_empty());
            assert_eq!(count_messages(f.store.activity(), "Invalid invoice file"), 0);
        }

        wait_for_invoices(&f.store, 1).await;
        let invoice = &f.store.list_recent(1).await.unwrap()[0];
        assert_eq!(invoice.number, "INV-SLOW");
        assert_eq!(invoice.amount(), Money::from_minor(4200));
        assert_eq!(count_messages(f.store.activity(), "Invalid invoice file"), 0);
    }

    #[tokio::test]
    async fn test_invalid_file_reported_once_and_kept() {
        let f = fixture().await;
        f.watcher.start().await.unwrap();

        let file = f.inbox.join("broken.json");
        std::fs::write(&file, "{not json").unwrap();

        wait_for_activity(f.store.activity(), "Invalid invoice file broken.json", 1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(count_messages(f.store.activity(), "Invalid invoice file"), 1);
        assert!(file.exists());
        assert!(f.store.list_recent(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_number_leaves_file() {
        let f = fixture().await;
        f.store.create("INV-1", Money::from_minor(100)).await.unwrap();
        f.watcher.start().await.unwrap();

        let file = f.inbox.join("again.json");
        std::fs::write(&file, r#"{"number": "INV-1", "amount": 100}"#).unwrap();

        wait_for_activity(f.store.activity(), "Duplicate invoice INV-1", 1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(count_messages(f.store.activity(), "Duplicate invoice"), 1);
        assert!(file.exists());
        assert_eq!(f.store.list_recent(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stopped_watcher_ingests_nothing() {
        let f = fixture().await;
        f.watcher.start().await.unwrap();
        assert!(!f.watcher.start().await.unwrap());

        assert!(f.watcher.stop().await);
        assert!(!f.watcher.is_running());
        assert!(!f.watcher.stop().await);

        std::fs::write(f.inbox.join("late.json"), r#"{"number": "LATE", "amount": 5}"#).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(f.store.list_recent(10).await.unwrap().is_empty());

        // Picked up once watching resumes
        f.watcher.start().await.unwrap();
        wait_for_invoices(&f.store, 1).await;
        assert!(f.watcher.status().running);
    }
}
