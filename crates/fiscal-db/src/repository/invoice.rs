//! # Invoice Repository
//!
//! Persistence for invoice records.
//!
//! ## Ordering
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  seq is assigned inside the INSERT (MAX(seq) + 1), so ingestion order  │
//! │  is a total order even across restarts.                                │
//! │                                                                         │
//! │   list_unfinished()      ORDER BY seq ASC    (engine queue rebuild)    │
//! │   list_by_status(s, n)   ORDER BY seq DESC   (dashboard, newest first) │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarded Updates
//! `update_lifecycle` only writes when the row still has the status the
//! caller read. A mismatch surfaces as [`DbError::StaleState`].

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use fiscal_core::{Invoice, InvoiceStatus, Money};

/// Repository for invoice operations.
#[derive(Debug, Clone)]
pub struct InvoiceRepository {
    pool: SqlitePool,
}

impl InvoiceRepository {
    /// Creates a new InvoiceRepository.
    pub fn new(pool: SqlitePool) -> Self {
        InvoiceRepository { pool }
    }

    /// Inserts a `Pending` invoice attached to the current ingestion day.
    ///
    /// The day number is resolved in the same statement: the open day, or
    /// the next one when the current day is closed.
    ///
    /// ## Errors
    /// `DbError::UniqueViolation` when the number already exists for that day.
    pub async fn insert_for_current_day(&self, number: &str, amount: Money) -> DbResult<Invoice> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        debug!(invoice_id = %id, number = %number, "Inserting invoice");

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            INSERT INTO invoices (
                id, seq, number, amount_minor, fiscal_day_no,
                status, retry_count, created_at, updated_at
            )
            SELECT
                ?1,
                (SELECT COALESCE(MAX(seq), 0) + 1 FROM invoices),
                ?2,
                ?3,
                COALESCE(
                    (SELECT CASE WHEN state = 'open' THEN day_no ELSE day_no + 1 END
                     FROM fiscal_days ORDER BY day_no DESC LIMIT 1),
                    1
                ),
                ?4,
                0,
                ?5,
                ?5
            RETURNING
                id, seq, number, amount_minor, fiscal_day_no, status,
                retry_count, last_error, signature, confirmation_id,
                created_at, updated_at
            "#,
        )
        .bind(&id)
        .bind(number)
        .bind(amount.minor())
        .bind(InvoiceStatus::Pending)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(invoice)
    }

    /// Gets an invoice by its id.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Invoice>> {
        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT
                id, seq, number, amount_minor, fiscal_day_no, status,
                retry_count, last_error, signature, confirmation_id,
                created_at, updated_at
            FROM invoices
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(invoice)
    }

    /// Finds an invoice by business number within a fiscal day.
    pub async fn find_by_number(&self, fiscal_day_no: i64, number: &str) -> DbResult<Option<Invoice>> {
        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT
                id, seq, number, amount_minor, fiscal_day_no, status,
                retry_count, last_error, signature, confirmation_id,
                created_at, updated_at
            FROM invoices
            WHERE fiscal_day_no = ?1 AND number = ?2
            "#,
        )
        .bind(fiscal_day_no)
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(invoice)
    }

    /// Writes the mutable lifecycle columns of `invoice`.
    ///
    /// Only succeeds when the stored status still equals `expected_from`.
    /// `number`, `amount_minor`, `seq` and `fiscal_day_no` are never written.
    pub async fn update_lifecycle(
        &self,
        invoice: &Invoice,
        expected_from: InvoiceStatus,
    ) -> DbResult<Invoice> {
        let updated = sqlx::query_as::<_, Invoice>(
            r#"
            UPDATE invoices SET
                status = ?3,
                retry_count = ?4,
                last_error = ?5,
                signature = ?6,
                confirmation_id = ?7,
                updated_at = ?8
            WHERE id = ?1 AND status = ?2
            RETURNING
                id, seq, number, amount_minor, fiscal_day_no, status,
                retry_count, last_error, signature, confirmation_id,
                created_at, updated_at
            "#,
        )
        .bind(&invoice.id)
        .bind(expected_from)
        .bind(invoice.status)
        .bind(invoice.retry_count)
        .bind(&invoice.last_error)
        .bind(&invoice.signature)
        .bind(&invoice.confirmation_id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(invoice) => Ok(invoice),
            None => match self.get_by_id(&invoice.id).await? {
                Some(_) => Err(DbError::stale("Invoice", &invoice.id)),
                None => Err(DbError::not_found("Invoice", &invoice.id)),
            },
        }
    }

    /// Lists invoices with the given status, newest first.
    pub async fn list_by_status(&self, status: InvoiceStatus, limit: u32) -> DbResult<Vec<Invoice>> {
        let invoices = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT
                id, seq, number, amount_minor, fiscal_day_no, status,
                retry_count, last_error, signature, confirmation_id,
                created_at, updated_at
            FROM invoices
            WHERE status = ?1
            ORDER BY seq DESC
            LIMIT ?2
            "#,
        )
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(invoices)
    }

    /// Lists the most recent invoices regardless of status, newest first.
    pub async fn list_recent(&self, limit: u32) -> DbResult<Vec<Invoice>> {
        let invoices = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT
                id, seq, number, amount_minor, fiscal_day_no, status,
                retry_count, last_error, signature, confirmation_id,
                created_at, updated_at
            FROM invoices
            ORDER BY seq DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(invoices)
    }

    /// Lists every non-terminal invoice in ingestion order.
    pub async fn list_unfinished(&self) -> DbResult<Vec<Invoice>> {
        let invoices = sqlx::query_as::<_, Invoice>(
            r#"
            SELECT
                id, seq, number, amount_minor, fiscal_day_no, status,
                retry_count, last_error, signature, confirmation_id,
                created_at, updated_at
            FROM invoices
            WHERE status NOT IN (?1, ?2)
            ORDER BY seq ASC
            "#,
        )
        .bind(InvoiceStatus::Sent)
        .bind(InvoiceStatus::Excluded)
        .fetch_all(&self.pool)
        .await?;

        Ok(invoices)
    }

    /// Counts invoices per status. Statuses with no invoices are omitted.
    pub async fn count_by_status(&self) -> DbResult<Vec<(InvoiceStatus, i64)>> {
        let counts = sqlx::query_as::<_, (InvoiceStatus, i64)>(
            r#"
            SELECT status, COUNT(*)
            FROM invoices
            GROUP BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(counts)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::{Database, DbConfig, DbError};
    use fiscal_core::{InvoiceStatus, Money};

    async fn test_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_assigns_increasing_seq() {
        let db = test_db().await;
        let repo = db.invoices();

        let a = repo.insert_for_current_day("INV-001", Money::from_minor(100)).await.unwrap();
        let b = repo.insert_for_current_day("INV-002", Money::from_minor(200)).await.unwrap();

        assert_eq!(a.seq, 1);
        assert_eq!(b.seq, 2);
        assert_eq!(a.status, InvoiceStatus::Pending);
        assert_eq!(a.retry_count, 0);
        assert_eq!(b.amount(), Money::from_minor(200));
    }

    #[tokio::test]
    async fn test_day_number_follows_day_state() {
        let db = test_db().await;
        let repo = db.invoices();

        // No day yet: belongs to day 1
        let a = repo.insert_for_current_day("A", Money::from_minor(1)).await.unwrap();
        assert_eq!(a.fiscal_day_no, 1);

        db.fiscal_days().open_next().await.unwrap();
        let b = repo.insert_for_current_day("B", Money::from_minor(1)).await.unwrap();
        assert_eq!(b.fiscal_day_no, 1);

        db.fiscal_days().close(1).await.unwrap();
        let c = repo.insert_for_current_day("C", Money::from_minor(1)).await.unwrap();
        assert_eq!(c.fiscal_day_no, 2);
    }

    #[tokio::test]
    async fn test_duplicate_number_within_day() {
        let db = test_db().await;
        let repo = db.invoices();

        repo.insert_for_current_day("INV-001", Money::from_minor(100)).await.unwrap();
        let err = repo
            .insert_for_current_day("INV-001", Money::from_minor(100))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation_on("invoices.number"));

        // The same number is fine on another day
        db.fiscal_days().open_next().await.unwrap();
        db.fiscal_days().close(1).await.unwrap();
        assert!(repo.insert_for_current_day("INV-001", Money::from_minor(100)).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_lifecycle_guards_status() {
        let db = test_db().await;
        let repo = db.invoices();

        let mut invoice = repo.insert_for_current_day("INV-001", Money::from_minor(100)).await.unwrap();
        invoice.status = InvoiceStatus::Signing;

        let updated = repo.update_lifecycle(&invoice, InvoiceStatus::Pending).await.unwrap();
        assert_eq!(updated.status, InvoiceStatus::Signing);

        // Second write with the old expected status is stale
        let err = repo.update_lifecycle(&invoice, InvoiceStatus::Pending).await.unwrap_err();
        assert!(matches!(err, DbError::StaleState { .. }));

        invoice.id = "missing".to_string();
        let err = repo.update_lifecycle(&invoice, InvoiceStatus::Pending).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_listing_order_and_counts() {
        let db = test_db().await;
        let repo = db.invoices();

        for n in ["A", "B", "C"] {
            repo.insert_for_current_day(n, Money::from_minor(10)).await.unwrap();
        }
        let mut first = repo.find_by_number(1, "A").await.unwrap().unwrap();
        first.status = InvoiceStatus::Excluded;
        repo.update_lifecycle(&first, InvoiceStatus::Pending).await.unwrap();

        let unfinished: Vec<String> = repo
            .list_unfinished()
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.number)
            .collect();
        assert_eq!(unfinished, vec!["B", "C"]);

        let pending: Vec<String> = repo
            .list_by_status(InvoiceStatus::Pending, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.number)
            .collect();
        assert_eq!(pending, vec!["C", "B"]);

        assert_eq!(repo.list_recent(2).await.unwrap().len(), 2);

        let counts = repo.count_by_status().await.unwrap();
        assert!(counts.contains(&(InvoiceStatus::Pending, 2)));
        assert!(counts.contains(&(InvoiceStatus::Excluded, 1)));
    }
}
