//! # Invoice Store
//!
//! Durable record of every invoice and of the fiscal day. The only place
//! lifecycle rules are enforced before anything is written.
//!
//! ## Mutation Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  transition(id, to, meta)                                               │
//! │                                                                         │
//! │   1. load invoice + current fiscal day                                 │
//! │   2. check_transition(from, to, day, reconciled)   (fiscal-core)       │
//! │   3. apply meta: signature / confirmation id / error / retry bump      │
//! │   4. update_lifecycle(invoice, expected_from)      (guarded UPDATE)    │
//! │   5. exactly one ActivityLog entry                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rejected mutations write nothing and log nothing; the caller decides how
//! to report them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use ts_rs::TS;

use fiscal_core::lifecycle::{check_transition, is_forward};
use fiscal_core::validation::{validate_amount, validate_invoice_number};
use fiscal_core::{CoreError, FiscalDay, Invoice, InvoiceStatus, Money, Severity};
use fiscal_db::Database;

use crate::activity::ActivityLog;
use crate::error::SyncResult;

// =============================================================================
// Transition Metadata
// =============================================================================

/// Everything a transition carries besides the target status.
#[derive(Debug, Clone, Default)]
pub struct TransitionMeta {
    pub signature: Option<String>,
    pub confirmation_id: Option<String>,
    pub error: Option<String>,
    pub bump_retry: bool,
    /// Restart reconciliation of an in-flight send.
    pub reconciled: bool,
    pub severity: Option<Severity>,
    pub message: Option<String>,
}

impl TransitionMeta {
    /// Meta with the activity entry to log on success.
    pub fn logged(severity: Severity, message: impl Into<String>) -> Self {
        TransitionMeta {
            severity: Some(severity),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn with_confirmation(mut self, confirmation_id: impl Into<String>) -> Self {
        self.confirmation_id = Some(confirmation_id.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn bump_retry(mut self) -> Self {
        self.bump_retry = true;
        self
    }

    pub fn reconciled(mut self) -> Self {
        self.reconciled = true;
        self
    }
}

// =============================================================================
// Result Types
// =============================================================================

/// Outcome of an open/close request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct DayChange {
    pub day: FiscalDay,
    /// False when the day was already in the requested state.
    pub changed: bool,
}

/// Invoice counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct StatusCounts {
    pub pending: i64,
    pub signing: i64,
    pub signed: i64,
    pub sending: i64,
    pub sent: i64,
    pub excluded: i64,
}

impl StatusCounts {
    pub fn get(&self, status: InvoiceStatus) -> i64 {
        match status {
            InvoiceStatus::Pending => self.pending,
            InvoiceStatus::Signing => self.signing,
            InvoiceStatus::Signed => self.signed,
            InvoiceStatus::Sending => self.sending,
            InvoiceStatus::Sent => self.sent,
            InvoiceStatus::Excluded => self.excluded,
        }
    }

    fn slot(&mut self, status: InvoiceStatus) -> &mut i64 {
        match status {
            InvoiceStatus::Pending => &mut self.pending,
            InvoiceStatus::Signing => &mut self.signing,
            InvoiceStatus::Signed => &mut self.signed,
            InvoiceStatus::Sending => &mut self.sending,
            InvoiceStatus::Sent => &mut self.sent,
            InvoiceStatus::Excluded => &mut self.excluded,
        }
    }

    /// Invoices not yet in a terminal state.
    pub fn unfinished(&self) -> i64 {
        self.pending + self.signing + self.signed + self.sending
    }

    pub fn total(&self) -> i64 {
        self.unfinished() + self.sent + self.excluded
    }
}

// =============================================================================
// Invoice Store
// =============================================================================

/// Invoice and fiscal day state, backed by SQLite.
#[derive(Debug, Clone)]
pub struct InvoiceStore {
    db: Database,
    activity: Arc<ActivityLog>,
}

impl InvoiceStore {
    pub fn new(db: Database, activity: Arc<ActivityLog>) -> Self {
        InvoiceStore { db, activity }
    }

    pub fn activity(&self) -> &Arc<ActivityLog> {
        &self.activity
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // =========================================================================
    // Invoices
    // =========================================================================

    /// Records a new `Pending` invoice.
    ///
    /// ## Errors
    /// - `CoreError::Validation` for a malformed number or a zero amount
    /// - `CoreError::DuplicateNumber` if the number exists for the current day
    pub async fn create(&self, number: &str, amount: Money) -> SyncResult<Invoice> {
        validate_invoice_number(number).map_err(CoreError::from)?;
        validate_amount(amount).map_err(CoreError::from)?;

        let invoice = match self.db.invoices().insert_for_current_day(number, amount).await {
            Ok(invoice) => invoice,
            Err(e) if e.is_unique_violation_on("invoices.number") => {
                let day = self.db.fiscal_days().current().await?;
                return Err(CoreError::DuplicateNumber {
                    number: number.to_string(),
                    day_no: day.ingestion_day_no(),
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        };

        self.activity.info(
            format!("Invoice {} received ({})", invoice.number, invoice.amount()),
            Some(&invoice.id),
        );

        Ok(invoice)
    }

    /// Moves an invoice to `to`, enforcing the lifecycle table and day policy.
    ///
    /// On success exactly one activity entry is logged: the message in
    /// `meta`, or a generic one.
    pub async fn transition(
        &self,
        id: &str,
        to: InvoiceStatus,
        meta: TransitionMeta,
    ) -> SyncResult<Invoice> {
        let current = self.get(id).await?;
        let day = self.db.fiscal_days().current().await?;
        let from = current.status;

        check_transition(id, from, to, day.state, meta.reconciled)?;

        let mut next = current.clone();
        next.status = to;

        match to {
            InvoiceStatus::Signed if from == InvoiceStatus::Signing => {
                let signature = meta
                    .signature
                    .clone()
                    .ok_or_else(|| CoreError::MissingSignature(id.to_string()))?;
                next.signature = Some(signature);
            }
            InvoiceStatus::Sent => {
                let confirmation = meta
                    .confirmation_id
                    .clone()
                    .ok_or_else(|| CoreError::MissingConfirmation(id.to_string()))?;
                next.confirmation_id = Some(confirmation);
            }
            InvoiceStatus::Pending => {
                next.signature = None;
            }
            _ => {}
        }

        if let Some(error) = &meta.error {
            next.last_error = Some(error.clone());
        } else if is_forward(from, to) {
            next.last_error = None;
        }

        if meta.bump_retry {
            next.retry_count += 1;
        }

        let updated = self.db.invoices().update_lifecycle(&next, from).await?;

        debug!(
            invoice_id = %id,
            from = %from,
            to = %to,
            retry_count = updated.retry_count,
            "Invoice transitioned"
        );

        let severity = meta.severity.unwrap_or(Severity::Info);
        let message = meta
            .message
            .unwrap_or_else(|| format!("Invoice {}: {} -> {}", updated.number, from, to));
        self.activity.append(severity, message, Some(&updated.id));

        Ok(updated)
    }

    /// Returns the invoice or `CoreError::InvoiceNotFound`.
    pub async fn get(&self, id: &str) -> SyncResult<Invoice> {
        self.db
            .invoices()
            .get_by_id(id)
            .await?
            .ok_or_else(|| CoreError::InvoiceNotFound(id.to_string()).into())
    }

    /// Invoices with `status`, newest first.
    pub async fn list_by_status(&self, status: InvoiceStatus, limit: u32) -> SyncResult<Vec<Invoice>> {
        Ok(self.db.invoices().list_by_status(status, limit).await?)
    }

    /// Most recent invoices of any status.
    pub async fn list_recent(&self, limit: u32) -> SyncResult<Vec<Invoice>> {
        Ok(self.db.invoices().list_recent(limit).await?)
    }

    /// Non-terminal invoices in ingestion order.
    pub async fn list_unfinished(&self) -> SyncResult<Vec<Invoice>> {
        Ok(self.db.invoices().list_unfinished().await?)
    }

    pub async fn counts(&self) -> SyncResult<StatusCounts> {
        let mut counts = StatusCounts::default();
        for (status, n) in self.db.invoices().count_by_status().await? {
            *counts.slot(status) = n;
        }
        Ok(counts)
    }

    // =========================================================================
    // Fiscal Day
    // =========================================================================

    pub async fn current_day(&self) -> SyncResult<FiscalDay> {
        Ok(self.db.fiscal_days().current().await?)
    }

    /// Opens the next fiscal day. Idempotent.
    pub async fn open_day(&self) -> SyncResult<DayChange> {
        let current = self.db.fiscal_days().current().await?;
        if current.is_open() {
            self.activity
                .info(format!("Fiscal day {} is already open", current.day_no), None);
            return Ok(DayChange {
                day: current,
                changed: false,
            });
        }

        let day = self.db.fiscal_days().open_next().await?;
        self.activity.success("Fiscal day opened", None);

        Ok(DayChange { day, changed: true })
    }

    /// Closes the current fiscal day. Idempotent.
    pub async fn close_day(&self) -> SyncResult<DayChange> {
        let current = self.db.fiscal_days().current().await?;
        if !current.is_open() {
            self.activity.info("Fiscal day is already closed", None);
            return Ok(DayChange {
                day: current,
                changed: false,
            });
        }

        let day = self.db.fiscal_days().close(current.day_no).await?;
        self.activity.success("Fiscal day closed", None);

        Ok(DayChange { day, changed: true })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use fiscal_core::ValidationError;
    use fiscal_db::DbConfig;

    async fn test_store() -> InvoiceStore {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        InvoiceStore::new(db, Arc::new(ActivityLog::new(50)))
    }

    fn messages(store: &InvoiceStore) -> Vec<String> {
        store
            .activity()
            .snapshot(50)
            .into_iter()
            .rev()
            .map(|e| e.message)
            .collect()
    }

    #[tokio::test]
    async fn test_create_logs_once() {
        let store = test_store().await;
        let invoice = store.create("INV-010", Money::from_minor(1999)).await.unwrap();

        assert_eq!(invoice.status, InvoiceStatus::Pending);
        assert_eq!(invoice.fiscal_day_no, 1);
        assert_eq!(messages(&store), vec!["Invoice INV-010 received (19.99)"]);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates_and_invalid_input() {
        let store = test_store().await;
        store.create("INV-001", Money::from_minor(100)).await.unwrap();

        let err = store.create("INV-001", Money::from_minor(100)).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Core(CoreError::DuplicateNumber { day_no: 1, .. })
        ));

        let err = store.create("INV-002", Money::from_minor(0)).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Core(CoreError::Validation(ValidationError::MustBeNonZero { .. }))
        ));

        let err = store.create("", Money::from_minor(5)).await.unwrap_err();
        assert!(matches!(err, SyncError::Core(CoreError::Validation(_))));

        // Only the first create was logged
        assert_eq!(store.activity().len(), 1);
    }

    #[tokio::test]
    async fn test_forward_transition_requires_open_day() {
        let store = test_store().await;
        let invoice = store.create("INV-010", Money::from_minor(1999)).await.unwrap();

        let err = store
            .transition(&invoice.id, InvoiceStatus::Signing, TransitionMeta::default())
            .await
            .unwrap_err();
        assert!(err.is_policy());
        assert_eq!(store.get(&invoice.id).await.unwrap().status, InvoiceStatus::Pending);

        store.open_day().await.unwrap();
        let signing = store
            .transition(&invoice.id, InvoiceStatus::Signing, TransitionMeta::default())
            .await
            .unwrap();
        assert_eq!(signing.status, InvoiceStatus::Signing);
    }

    #[tokio::test]
    async fn test_full_lifecycle_sets_artifacts() {
        let store = test_store().await;
        store.open_day().await.unwrap();
        let invoice = store.create("INV-010", Money::from_minor(1999)).await.unwrap();
        let id = invoice.id.as_str();

        store
            .transition(id, InvoiceStatus::Signing, TransitionMeta::default())
            .await
            .unwrap();

        // Signing -> Signed needs the signature
        let err = store
            .transition(id, InvoiceStatus::Signed, TransitionMeta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Core(CoreError::MissingSignature(_))));

        store
            .transition(
                id,
                InvoiceStatus::Signed,
                TransitionMeta::default().with_signature("SIG-1"),
            )
            .await
            .unwrap();
        store
            .transition(id, InvoiceStatus::Sending, TransitionMeta::default())
            .await
            .unwrap();

        let err = store
            .transition(id, InvoiceStatus::Sent, TransitionMeta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Core(CoreError::MissingConfirmation(_))));

        let sent = store
            .transition(
                id,
                InvoiceStatus::Sent,
                TransitionMeta::logged(Severity::Success, "sent").with_confirmation("CONF-1"),
            )
            .await
            .unwrap();
        assert_eq!(sent.signature.as_deref(), Some("SIG-1"));
        assert_eq!(sent.confirmation_id.as_deref(), Some("CONF-1"));

        // Terminal
        let err = store
            .transition(id, InvoiceStatus::Pending, TransitionMeta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Core(CoreError::InvalidTransition { .. })));
        assert_eq!(store.get(id).await.unwrap().status, InvoiceStatus::Sent);
    }

    #[tokio::test]
    async fn test_revert_bumps_retry_and_records_error() {
        let store = test_store().await;
        store.open_day().await.unwrap();
        let invoice = store.create("INV-1", Money::from_minor(10)).await.unwrap();

        store
            .transition(&invoice.id, InvoiceStatus::Signing, TransitionMeta::default())
            .await
            .unwrap();
        let reverted = store
            .transition(
                &invoice.id,
                InvoiceStatus::Pending,
                TransitionMeta::logged(Severity::Error, "retry").with_error("503").bump_retry(),
            )
            .await
            .unwrap();
        assert_eq!(reverted.retry_count, 1);
        assert_eq!(reverted.last_error.as_deref(), Some("503"));

        // A successful forward move clears the error
        let signing = store
            .transition(&invoice.id, InvoiceStatus::Signing, TransitionMeta::default())
            .await
            .unwrap();
        assert_eq!(signing.last_error, None);
        assert_eq!(signing.retry_count, 1);
    }

    #[tokio::test]
    async fn test_reconciled_send_allowed_while_closed() {
        let store = test_store().await;
        store.open_day().await.unwrap();
        let invoice = store.create("INV-1", Money::from_minor(10)).await.unwrap();
        let id = invoice.id.as_str();

        store.transition(id, InvoiceStatus::Signing, TransitionMeta::default()).await.unwrap();
        store
            .transition(id, InvoiceStatus::Signed, TransitionMeta::default().with_signature("S"))
            .await
            .unwrap();
        store.transition(id, InvoiceStatus::Sending, TransitionMeta::default()).await.unwrap();
        store.close_day().await.unwrap();

        let err = store
            .transition(id, InvoiceStatus::Sent, TransitionMeta::default().with_confirmation("C"))
            .await
            .unwrap_err();
        assert!(err.is_policy());

        let sent = store
            .transition(
                id,
                InvoiceStatus::Sent,
                TransitionMeta::default().with_confirmation("C").reconciled(),
            )
            .await
            .unwrap();
        assert_eq!(sent.status, InvoiceStatus::Sent);
    }

    #[tokio::test]
    async fn test_open_day_twice() {
        let store = test_store().await;

        let first = store.open_day().await.unwrap();
        assert!(first.changed);
        assert_eq!(first.day.day_no, 1);

        let second = store.open_day().await.unwrap();
        assert!(!second.changed);
        assert_eq!(second.day.day_no, 1);

        let log = messages(&store);
        assert_eq!(log.iter().filter(|m| *m == "Fiscal day opened").count(), 1);
        assert_eq!(log.iter().filter(|m| m.contains("already open")).count(), 1);
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn test_close_day_idempotent_and_counts() {
        let store = test_store().await;
        assert!(!store.close_day().await.unwrap().changed);

        store.open_day().await.unwrap();
        store.create("A", Money::from_minor(1)).await.unwrap();
        let b = store.create("B", Money::from_minor(1)).await.unwrap();
        store
            .transition(
                &b.id,
                InvoiceStatus::Excluded,
                TransitionMeta::default().with_error("rejected"),
            )
            .await
            .unwrap();

        let closed = store.close_day().await.unwrap();
        assert!(closed.changed);
        assert!(!closed.day.is_open());

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.get(InvoiceStatus::Excluded), 1);
        assert_eq!(counts.total(), 2);
        assert_eq!(counts.unfinished(), 1);
    }
}
