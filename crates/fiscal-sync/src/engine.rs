//! # Sync Engine
//!
//! Drives every invoice from `Pending` to `Sent` (or `Excluded`), one at a
//! time, in ingestion order.
//!
//! ## Engine Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           SyncEngine::run                               │
//! │                                                                         │
//! │   ┌──────────────┐   online && needs_recovery                          │
//! │   │   recover    │◄──────────────────────────┐                         │
//! │   │ Signing  -> Pending                       │                         │
//! │   │ Sending  -> Sent (confirmed) | Pending    │                         │
//! │   └──────┬───────┘                            │                         │
//! │          ▼                                    │                         │
//! │   ┌────────────────────────────────────────────────────────────────┐   │
//! │   │ select! (biased)                                               │   │
//! │   │   1. command       Ingest / ForceSync / OpenDay / CloseDay     │   │
//! │   │   2. deadline      retry wait expired, or offline probe due    │   │
//! │   │   3. step          head of queue, when online + day open       │   │
//! │   └────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │   step(head):  Pending ─sign─► Signed ─send─► Sent                     │
//! │                                                                         │
//! │   failure:     Unreachable  revert head, go offline, probe w/ backoff  │
//! │                Transient    revert head, retry after delay * attempt   │
//! │                Rejected     Excluded                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ownership
//! The engine task is the only writer of `Signing`, `Signed`, `Sending`,
//! `Sent` and `Excluded`. Commands are handled between steps, never during
//! one, so a backend call for an invoice is never issued twice at once.
//! Day changes go through the engine for the same reason.
//!
//! A `Signed` invoice that still carries `last_error` was sent before with
//! an unknown outcome. It is looked up with `find_confirmation` before it
//! is sent again, so a reply lost to a timeout never registers it twice.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use ts_rs::TS;

use fiscal_core::{ConfirmationId, Invoice, InvoiceStatus, Severity, SignedInvoice};

use crate::activity::ActivityLog;
use crate::config::EngineSettings;
use crate::error::{FiscalError, SyncError, SyncResult};
use crate::fiscal::FiscalClient;
use crate::probe::ProbeBackoff;
use crate::store::{DayChange, InvoiceStore, TransitionMeta};

/// Activity message logged when the engine enters offline mode.
pub const OFFLINE_NOTICE: &str =
    "System is running in offline mode. Invoices will be queued and sent when connection is restored.";

const COMMAND_BUFFER: usize = 256;

// =============================================================================
// Commands & Status
// =============================================================================

/// Requests handled by the engine task.
#[derive(Debug)]
pub enum EngineCommand {
    /// A freshly created invoice.
    Ingest { invoice_id: String, seq: i64 },

    ForceSync {
        reply: oneshot::Sender<SyncResult<ForceSyncReport>>,
    },

    OpenDay {
        reply: oneshot::Sender<SyncResult<DayChange>>,
    },

    CloseDay {
        reply: oneshot::Sender<SyncResult<DayChange>>,
    },

    /// Stop after the current step.
    Shutdown { done: oneshot::Sender<()> },
}

/// Live engine state, refreshed on every loop iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct EngineStatus {
    pub running: bool,
    pub online: bool,
    pub day_open: bool,
    pub queue_len: usize,
    /// Consecutive failed reachability probes in the current outage.
    pub failed_probes: u32,
    pub alert: Option<String>,
    /// Work is queued but the fiscal day is closed.
    pub parked: bool,
    /// Waiting out a retry delay.
    pub retry_pending: bool,
    pub last_error: Option<String>,
}

/// Outcome of a force-sync request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ForceSyncReport {
    /// `Pending`/`Signed` invoices found.
    pub retried: usize,
    /// Of those, how many were not already queued.
    pub requeued: usize,
    pub online: bool,
    pub queue_len: usize,
}

// =============================================================================
// Engine Handle
// =============================================================================

/// Cloneable handle for talking to a running engine.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
    status: Arc<RwLock<EngineStatus>>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<SyncResult<T>>) -> EngineCommand,
    ) -> SyncResult<T> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(build(reply))
            .await
            .map_err(|_| SyncError::ShuttingDown)?;
        rx.await.map_err(|_| SyncError::ShuttingDown)?
    }

    /// Hands a newly created invoice to the engine.
    pub async fn ingest(&self, invoice_id: &str, seq: i64) -> SyncResult<()> {
        self.cmd_tx
            .send(EngineCommand::Ingest {
                invoice_id: invoice_id.to_string(),
                seq,
            })
            .await
            .map_err(|_| SyncError::ShuttingDown)
    }

    pub async fn force_sync(&self) -> SyncResult<ForceSyncReport> {
        self.request(|reply| EngineCommand::ForceSync { reply }).await
    }

    pub async fn open_day(&self) -> SyncResult<DayChange> {
        self.request(|reply| EngineCommand::OpenDay { reply }).await
    }

    pub async fn close_day(&self) -> SyncResult<DayChange> {
        self.request(|reply| EngineCommand::CloseDay { reply }).await
    }

    /// Stops the engine and waits for the current step to finish.
    pub async fn shutdown(&self) -> SyncResult<()> {
        let (done, rx) = oneshot::channel();
        self.cmd_tx
            .send(EngineCommand::Shutdown { done })
            .await
            .map_err(|_| SyncError::ShuttingDown)?;
        rx.await.map_err(|_| SyncError::ShuttingDown)
    }

    pub async fn status(&self) -> EngineStatus {
        self.status.read().await.clone()
    }
}

// =============================================================================
// Sync Engine
// =============================================================================

/// Single task owning the ordered invoice queue.
pub struct SyncEngine {
    store: InvoiceStore,
    client: FiscalClient,
    activity: Arc<ActivityLog>,
    settings: EngineSettings,
    cmd_rx: mpsc::Receiver<EngineCommand>,
    status: Arc<RwLock<EngineStatus>>,

    /// seq -> invoice id. Keyed by seq so the head is the oldest invoice.
    queue: BTreeMap<i64, String>,
    online: bool,
    day_open: bool,
    needs_recovery: bool,
    parked: bool,
    retry_at: Option<Instant>,
    probe_at: Option<Instant>,
    probe: ProbeBackoff,
    failed_probes: u32,
    alert: Option<String>,
    last_error: Option<String>,
}

impl SyncEngine {
    /// Spawns the engine task.
    ///
    /// Unfinished invoices already in the store are queued on start, and
    /// invoices left in `Signing`/`Sending` are resolved before anything
    /// else is processed.
    pub fn spawn(
        store: InvoiceStore,
        client: FiscalClient,
        settings: EngineSettings,
    ) -> (EngineHandle, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let status = Arc::new(RwLock::new(EngineStatus {
            running: true,
            online: true,
            ..Default::default()
        }));

        let engine = SyncEngine {
            activity: Arc::clone(store.activity()),
            store,
            client,
            probe: ProbeBackoff::new(settings.probe_base, settings.probe_max),
            settings,
            cmd_rx,
            status: Arc::clone(&status),
            queue: BTreeMap::new(),
            online: true,
            day_open: false,
            needs_recovery: true,
            parked: false,
            retry_at: None,
            probe_at: None,
            failed_probes: 0,
            alert: None,
            last_error: None,
        };

        let task = tokio::spawn(engine.run());
        (EngineHandle { cmd_tx, status }, task)
    }

    async fn run(mut self) {
        info!(backend = self.client.backend_name(), "Sync engine started");

        self.load_queue().await;
        let mut shutdown_ack = None;

        loop {
            if self.online && self.needs_recovery && self.retry_at.is_none() {
                self.recover().await;
            }
            self.update_parking();
            self.publish(true).await;

            let can_work = self.can_work();
            let deadline = self.next_deadline();

            tokio::select! {
                biased;

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(EngineCommand::Ingest { invoice_id, seq }) => {
                        debug!(invoice_id = %invoice_id, seq, "Invoice queued");
                        self.queue.entry(seq).or_insert(invoice_id);
                    }
                    Some(EngineCommand::ForceSync { reply }) => {
                        let _ = reply.send(self.force_sync().await);
                    }
                    Some(EngineCommand::OpenDay { reply }) => {
                        let _ = reply.send(self.open_day().await);
                    }
                    Some(EngineCommand::CloseDay { reply }) => {
                        let _ = reply.send(self.close_day().await);
                    }
                    Some(EngineCommand::Shutdown { done }) => {
                        shutdown_ack = Some(done);
                        break;
                    }
                    None => break,
                },

                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_deadline().await;
                }

                _ = std::future::ready(()), if can_work => {
                    self.step().await;
                }
            }
        }

        self.publish(false).await;
        info!(queue_len = self.queue.len(), "Sync engine stopped");

        if let Some(done) = shutdown_ack {
            let _ = done.send(());
        }
    }

    // =========================================================================
    // Loop Helpers
    // =========================================================================

    async fn load_queue(&mut self) {
        match self.store.current_day().await {
            Ok(day) => self.day_open = day.is_open(),
            Err(e) => self.defer("load fiscal day", &e),
        }

        match self.store.list_unfinished().await {
            Ok(invoices) => {
                for invoice in invoices {
                    self.queue.insert(invoice.seq, invoice.id);
                }
                info!(queued = self.queue.len(), "Restored invoice queue");
            }
            Err(e) => self.defer("restore queue", &e),
        }
    }

    fn can_work(&self) -> bool {
        self.online && self.day_open && self.retry_at.is_none() && !self.queue.is_empty()
    }

    fn next_deadline(&self) -> Option<Instant> {
        if self.online {
            self.retry_at
        } else {
            self.probe_at
        }
    }

    async fn on_deadline(&mut self) {
        if self.online {
            self.retry_at = None;
        } else {
            self.probe().await;
        }
    }

    fn update_parking(&mut self) {
        let parked = self.online && !self.day_open && !self.queue.is_empty();
        if parked && !self.parked {
            self.activity.info("Waiting for fiscal day to open", None);
        }
        self.parked = parked;
    }

    async fn publish(&self, running: bool) {
        let mut status = self.status.write().await;
        *status = EngineStatus {
            running,
            online: self.online,
            day_open: self.day_open,
            queue_len: self.queue.len(),
            failed_probes: self.failed_probes,
            alert: self.alert.clone(),
            parked: self.parked,
            retry_pending: self.retry_at.is_some(),
            last_error: self.last_error.clone(),
        };
    }

    /// Backs off after a local (store) failure.
    fn defer(&mut self, what: &str, err: &SyncError) {
        error!(error = %err, "Sync engine failed to {}", what);
        self.last_error = Some(err.to_string());
        self.retry_at = Some(Instant::now() + self.settings.retry_delay);
    }

    // =========================================================================
    // Commands
    // =========================================================================

    async fn force_sync(&mut self) -> SyncResult<ForceSyncReport> {
        self.activity
            .info("Force sync initiated - checking for failed receipts", None);

        if !self.online {
            self.probe().await;
        }
        self.retry_at = None;

        let mut retried = 0;
        let mut requeued = 0;
        for invoice in self.store.list_unfinished().await? {
            if matches!(invoice.status, InvoiceStatus::Pending | InvoiceStatus::Signed) {
                retried += 1;
                if !self.queue.contains_key(&invoice.seq) {
                    self.queue.insert(invoice.seq, invoice.id);
                    requeued += 1;
                }
            }
        }

        self.activity.success(
            format!("Force sync completed - {} receipts retried", retried),
            None,
        );

        Ok(ForceSyncReport {
            retried,
            requeued,
            online: self.online,
            queue_len: self.queue.len(),
        })
    }

    async fn open_day(&mut self) -> SyncResult<DayChange> {
        let current = self.store.current_day().await?;
        if current.is_open() {
            return self.store.open_day().await;
        }

        let day_no = current.day_no + 1;
        if let Err(e) = self.client.open_day(day_no).await {
            self.activity
                .error(format!("Failed to open fiscal day: {}", e.reason()), None);
            if e.is_unreachable() {
                self.go_offline(e.reason());
            }
            return Err(e.into());
        }

        let change = self.store.open_day().await?;
        self.day_open = true;
        self.backend_answered();
        Ok(change)
    }

    async fn close_day(&mut self) -> SyncResult<DayChange> {
        let current = self.store.current_day().await?;
        if !current.is_open() {
            return self.store.close_day().await;
        }

        if let Err(e) = self.client.close_day(current.day_no).await {
            self.activity
                .error(format!("Failed to close fiscal day: {}", e.reason()), None);
            if e.is_unreachable() {
                self.go_offline(e.reason());
            }
            return Err(e.into());
        }

        let change = self.store.close_day().await?;
        self.day_open = false;
        self.backend_answered();
        Ok(change)
    }

    /// A day command reached the backend; probe right away if offline.
    fn backend_answered(&mut self) {
        if !self.online {
            self.probe_at = Some(Instant::now());
        }
    }

    // =========================================================================
    // Connectivity
    // =========================================================================

    fn go_offline(&mut self, reason: &str) {
        self.last_error = Some(reason.to_string());
        if !self.online {
            return;
        }

        warn!(reason, "Fiscal backend unreachable, entering offline mode");
        self.online = false;
        self.failed_probes = 0;
        self.probe.reset();
        self.probe_at = Some(Instant::now() + self.probe.next_delay());
        self.activity.error(OFFLINE_NOTICE, None);
    }

    async fn probe(&mut self) {
        match self.client.get_status().await {
            Ok(_) => {
                info!(
                    failed_probes = self.failed_probes,
                    "Fiscal backend reachable again"
                );
                self.online = true;
                self.failed_probes = 0;
                self.alert = None;
                self.probe.reset();
                self.probe_at = None;
                self.activity
                    .success("Connection to fiscal backend restored", None);
            }
            Err(e) => {
                self.failed_probes += 1;
                self.last_error = Some(e.to_string());

                let delay = self.probe.next_delay();
                self.probe_at = Some(Instant::now() + delay);
                debug!(
                    failed_probes = self.failed_probes,
                    next_probe = ?delay,
                    error = %e,
                    "Probe failed"
                );

                let threshold = self.settings.alert_threshold;
                if threshold > 0 && self.failed_probes == threshold {
                    let alert = format!(
                        "Fiscal backend unreachable after {} attempts",
                        self.failed_probes
                    );
                    self.activity.error(alert.clone(), None);
                    self.alert = Some(alert);
                }
            }
        }
    }

    // =========================================================================
    // Recovery
    // =========================================================================

    /// Resolves invoices a previous run left mid-call.
    async fn recover(&mut self) {
        let invoices = match self.store.list_unfinished().await {
            Ok(invoices) => invoices,
            Err(e) => return self.defer("list unfinished invoices", &e),
        };

        for invoice in invoices.into_iter().filter(|i| i.status.is_in_flight()) {
            match self.recover_invoice(&invoice).await {
                Ok(status) if status.is_terminal() => {
                    self.queue.remove(&invoice.seq);
                }
                Ok(_) => {
                    self.queue.insert(invoice.seq, invoice.id);
                }
                Err(SyncError::Fiscal(f)) if f.is_unreachable() => {
                    return self.go_offline(f.reason());
                }
                Err(e) => return self.defer("recover invoice", &e),
            }
        }

        self.needs_recovery = false;
    }

    /// Returns the status the invoice was moved to.
    async fn recover_invoice(&self, invoice: &Invoice) -> SyncResult<InvoiceStatus> {
        let number = &invoice.number;
        let (target, meta) = match invoice.status {
            InvoiceStatus::Signing => (
                InvoiceStatus::Pending,
                TransitionMeta::logged(
                    Severity::Info,
                    format!("Invoice {} was interrupted while signing; returned to queue", number),
                ),
            ),
            InvoiceStatus::Sending => match self.client.find_confirmation(invoice).await? {
                Some(confirmation) => (
                    InvoiceStatus::Sent,
                    TransitionMeta::logged(
                        Severity::Success,
                        format!("Invoice {} confirmed by fiscal backend after restart", number),
                    )
                    .with_confirmation(confirmation.0)
                    .reconciled(),
                ),
                None => (
                    InvoiceStatus::Pending,
                    TransitionMeta::logged(
                        Severity::Info,
                        format!(
                            "Invoice {} was not registered by fiscal backend; returned to queue",
                            number
                        ),
                    ),
                ),
            },
            other => return Ok(other),
        };

        let updated = self.store.transition(&invoice.id, target, meta).await?;
        Ok(updated.status)
    }

    // =========================================================================
    // Processing
    // =========================================================================

    /// Processes the head of the queue by one backend call.
    async fn step(&mut self) {
        let Some((&seq, id)) = self.queue.first_key_value() else {
            return;
        };
        let id = id.clone();

        let invoice = match self.store.get(&id).await {
            Ok(invoice) => invoice,
            Err(SyncError::Core(fiscal_core::CoreError::InvoiceNotFound(_))) => {
                warn!(invoice_id = %id, "Queued invoice no longer exists");
                self.queue.remove(&seq);
                return;
            }
            Err(e) => return self.defer("load invoice", &e),
        };

        let finished = match invoice.status {
            InvoiceStatus::Pending => self.sign(invoice).await,
            InvoiceStatus::Signed => self.send(invoice).await,
            InvoiceStatus::Signing | InvoiceStatus::Sending => {
                self.needs_recovery = true;
                false
            }
            InvoiceStatus::Sent | InvoiceStatus::Excluded => true,
        };

        if finished {
            self.queue.remove(&seq);
        }
    }

    /// Returns true when the invoice reached a terminal state.
    async fn sign(&mut self, invoice: Invoice) -> bool {
        let invoice = match self
            .store
            .transition(
                &invoice.id,
                InvoiceStatus::Signing,
                TransitionMeta::logged(Severity::Info, format!("Signing invoice {}", invoice.number)),
            )
            .await
        {
            Ok(invoice) => invoice,
            Err(e) => return self.transition_failed(e),
        };

        match self.client.sign(&invoice).await {
            Ok(signed) => {
                let result = self
                    .store
                    .transition(
                        &invoice.id,
                        InvoiceStatus::Signed,
                        TransitionMeta::logged(
                            Severity::Info,
                            format!("Invoice {} signed", invoice.number),
                        )
                        .with_signature(signed.signature),
                    )
                    .await;
                if let Err(e) = result {
                    self.needs_recovery = true;
                    return self.transition_failed(e);
                }
                false
            }
            Err(e) => self.handle_failure(&invoice, InvoiceStatus::Pending, e).await,
        }
    }

    async fn send(&mut self, invoice: Invoice) -> bool {
        let Some(signed) = SignedInvoice::from_invoice(&invoice) else {
            let result = self
                .store
                .transition(
                    &invoice.id,
                    InvoiceStatus::Excluded,
                    TransitionMeta::logged(
                        Severity::Error,
                        format!("Invoice {} has no signature; excluded", invoice.number),
                    )
                    .with_error("missing signature"),
                )
                .await;
            return match result {
                Ok(_) => true,
                Err(e) => self.transition_failed(e),
            };
        };

        // A Signed invoice carrying an error already went out once with an
        // unknown outcome; the backend may hold it.
        let unverified = invoice.last_error.is_some();

        let invoice = match self
            .store
            .transition(
                &invoice.id,
                InvoiceStatus::Sending,
                TransitionMeta::logged(
                    Severity::Info,
                    format!("Sending invoice {} to fiscal backend", invoice.number),
                ),
            )
            .await
        {
            Ok(invoice) => invoice,
            Err(e) => return self.transition_failed(e),
        };

        if unverified {
            match self.client.find_confirmation(&invoice).await {
                Ok(Some(confirmation)) => {
                    let message =
                        format!("Invoice {} was already registered by fiscal backend", invoice.number);
                    return self.mark_sent(&invoice, confirmation, message).await;
                }
                Ok(None) => {}
                Err(e) => return self.handle_failure(&invoice, InvoiceStatus::Signed, e).await,
            }
        }

        match self.client.send(&signed).await {
            Ok(confirmation) => {
                let message =
                    format!("Invoice {} processed and sent to fiscal backend", invoice.number);
                self.mark_sent(&invoice, confirmation, message).await
            }
            Err(e) => self.handle_failure(&invoice, InvoiceStatus::Signed, e).await,
        }
    }

    async fn mark_sent(
        &mut self,
        invoice: &Invoice,
        confirmation: ConfirmationId,
        message: String,
    ) -> bool {
        let result = self
            .store
            .transition(
                &invoice.id,
                InvoiceStatus::Sent,
                TransitionMeta::logged(Severity::Success, message).with_confirmation(confirmation.0),
            )
            .await;
        match result {
            Ok(_) => true,
            Err(e) => {
                // Registered remotely; recovery reconciles it
                self.needs_recovery = true;
                self.transition_failed(e)
            }
        }
    }

    /// Reacts to a rejected or failed store write. Never terminal.
    fn transition_failed(&mut self, err: SyncError) -> bool {
        if err.is_policy() {
            self.day_open = false;
            return false;
        }
        self.defer("update invoice", &err);
        false
    }

    /// Applies the failure policy to an in-flight invoice.
    ///
    /// `revert_to` is the status before the call. Returns true when the
    /// invoice was excluded.
    async fn handle_failure(
        &mut self,
        invoice: &Invoice,
        revert_to: InvoiceStatus,
        err: FiscalError,
    ) -> bool {
        let number = &invoice.number;
        let max_retries = self.settings.max_retries;

        let (target, meta, excluded) = match &err {
            FiscalError::Unreachable(reason) => (
                revert_to,
                TransitionMeta::logged(
                    Severity::Info,
                    format!("Invoice {} returned to queue: backend unreachable", number),
                )
                .with_error(reason.clone()),
                false,
            ),
            FiscalError::Transient(reason) => {
                let attempt = invoice.retry_count + 1;
                if attempt > i64::from(max_retries) {
                    (
                        InvoiceStatus::Excluded,
                        TransitionMeta::logged(
                            Severity::Error,
                            format!(
                                "Invoice {} excluded after {} retries: {}",
                                number, max_retries, reason
                            ),
                        )
                        .with_error(reason.clone()),
                        true,
                    )
                } else {
                    self.retry_at = Some(Instant::now() + self.settings.retry_delay * attempt as u32);
                    (
                        revert_to,
                        TransitionMeta::logged(
                            Severity::Error,
                            format!(
                                "Retry {}/{} for invoice {}: {}",
                                attempt, max_retries, number, reason
                            ),
                        )
                        .with_error(reason.clone())
                        .bump_retry(),
                        false,
                    )
                }
            }
            FiscalError::Rejected(reason) => (
                InvoiceStatus::Excluded,
                TransitionMeta::logged(
                    Severity::Error,
                    format!("Invoice {} rejected by fiscal backend: {}", number, reason),
                )
                .with_error(reason.clone()),
                true,
            ),
        };

        self.last_error = Some(err.to_string());

        if let Err(e) = self.store.transition(&invoice.id, target, meta).await {
            self.needs_recovery = true;
            return self.transition_failed(e);
        }

        if err.is_unreachable() {
            self.go_offline(err.reason());
        }

        excluded
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
