//! # Domain Types
//!
//! Core domain types used throughout the fiscal bridge.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Invoice      │   │   FiscalDay     │   │ ActivityEntry   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  day_no         │   │  id             │       │
//! │  │  number (biz)   │   │  state          │   │  severity       │       │
//! │  │  amount_minor   │   │  opened_at      │   │  message        │       │
//! │  │  status         │   │  closed_at      │   │  invoice_id?    │       │
//! │  │  seq            │   └─────────────────┘   └─────────────────┘       │
//! │  └─────────────────┘                                                   │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │ InvoiceStatus   │   │   DayState      │   │   Severity      │       │
//! │  │  Pending        │   │  Closed         │   │  Info           │       │
//! │  │  Signing        │   │  Open           │   │  Success        │       │
//! │  │  Signed         │   └─────────────────┘   │  Error          │       │
//! │  │  Sending        │                         └─────────────────┘       │
//! │  │  Sent           │                                                   │
//! │  │  Excluded       │                                                   │
//! │  └─────────────────┘                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every invoice has:
//! - `id`: UUID v4, assigned on ingestion, used everywhere internally
//! - `number`: the business number printed on the receipt, unique per day

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::money::Money;

// =============================================================================
// Invoice Status
// =============================================================================

/// Lifecycle status of an invoice.
///
/// `Signing` and `Sending` are persisted working states. Finding one of them
/// at startup means the process stopped during a backend call whose outcome
/// is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    /// Ingested, waiting to be signed.
    Pending,
    /// Sign call in flight.
    Signing,
    /// Signed artifact held, waiting to be sent.
    Signed,
    /// Send call in flight.
    Sending,
    /// Registered by the backend (terminal).
    Sent,
    /// Given up on (terminal).
    Excluded,
}

impl InvoiceStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [InvoiceStatus; 6] = [
        InvoiceStatus::Pending,
        InvoiceStatus::Signing,
        InvoiceStatus::Signed,
        InvoiceStatus::Sending,
        InvoiceStatus::Sent,
        InvoiceStatus::Excluded,
    ];

    /// Stable lowercase name, identical to the database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Signing => "signing",
            InvoiceStatus::Signed => "signed",
            InvoiceStatus::Sending => "sending",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Excluded => "excluded",
        }
    }
}

impl Default for InvoiceStatus {
    fn default() -> Self {
        InvoiceStatus::Pending
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InvoiceStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ValidationError::InvalidFormat {
                field: "status".to_string(),
                reason: format!("unknown invoice status '{}'", s),
            })
    }
}

// =============================================================================
// Invoice
// =============================================================================

/// An invoice as recorded by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Invoice {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Ingestion sequence. Strictly increasing; defines send order.
    pub seq: i64,

    /// Business invoice number.
    pub number: String,

    /// Amount in minor units. Immutable after creation.
    pub amount_minor: i64,

    /// Fiscal day the number is unique within.
    pub fiscal_day_no: i64,

    pub status: InvoiceStatus,

    /// Failed attempts so far.
    pub retry_count: i64,

    /// Last failure reason, cleared on success.
    pub last_error: Option<String>,

    /// Signed artifact returned by the backend.
    pub signature: Option<String>,

    /// Backend-issued registration id. Set once, never changed.
    pub confirmation_id: Option<String>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Returns the amount as Money.
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_minor(self.amount_minor)
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// =============================================================================
// Invoice Descriptor
// =============================================================================

/// Provisional invoice parsed from an inbox file, before the store assigns
/// an id.
///
/// ## File Format
/// ```json
/// { "number": "INV-010", "amount": 1999 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct InvoiceDescriptor {
    pub number: String,
    pub amount: Money,
}

// =============================================================================
// Signing / Sending Artifacts
// =============================================================================

/// Output of a successful `sign` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedInvoice {
    pub invoice_id: String,
    pub number: String,
    pub amount: Money,
    pub signature: String,
}

impl SignedInvoice {
    /// Rebuilds the artifact from a stored invoice.
    ///
    /// Returns `None` when the invoice has no signature.
    pub fn from_invoice(invoice: &Invoice) -> Option<Self> {
        invoice.signature.as_ref().map(|signature| SignedInvoice {
            invoice_id: invoice.id.clone(),
            number: invoice.number.clone(),
            amount: invoice.amount(),
            signature: signature.clone(),
        })
    }
}

/// Registration id returned by `send`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfirmationId(pub String);

impl fmt::Display for ConfirmationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Fiscal Day
// =============================================================================

/// Whether invoices may currently be signed and sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DayState {
    Closed,
    Open,
}

impl Default for DayState {
    fn default() -> Self {
        DayState::Closed
    }
}

impl fmt::Display for DayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DayState::Closed => f.write_str("closed"),
            DayState::Open => f.write_str("open"),
        }
    }
}

/// A fiscal day record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct FiscalDay {
    /// Monotonic day counter. `0` means no day was ever opened.
    pub day_no: i64,

    pub state: DayState,

    #[ts(as = "Option<String>")]
    pub opened_at: Option<DateTime<Utc>>,

    #[ts(as = "Option<String>")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl FiscalDay {
    /// The state before any day has been opened.
    pub fn initial() -> Self {
        FiscalDay {
            day_no: 0,
            state: DayState::Closed,
            opened_at: None,
            closed_at: None,
        }
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.state == DayState::Open
    }

    /// Day number an invoice ingested right now belongs to.
    ///
    /// While closed, new invoices wait for the next day to be opened.
    pub fn ingestion_day_no(&self) -> i64 {
        match self.state {
            DayState::Open => self.day_no,
            DayState::Closed => self.day_no + 1,
        }
    }
}

// =============================================================================
// Activity Log
// =============================================================================

/// Severity of an activity entry, as shown on the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => f.write_str("info"),
            Severity::Success => f.write_str("success"),
            Severity::Error => f.write_str("error"),
        }
    }
}

/// One operator-facing event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ActivityEntry {
    /// Monotonic within a process run.
    pub id: u64,

    #[ts(as = "String")]
    pub timestamp: DateTime<Utc>,

    pub severity: Severity,

    pub message: String,

    /// Correlation with an invoice, when the event concerns one.
    pub invoice_id: Option<String>,
}

// =============================================================================
// Backend Views
// =============================================================================

/// Reachability and state reported by the fiscal backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BackendStatus {
    /// Whether the backend considers a fiscal day open for this device.
    pub day_open: bool,

    /// Free-form backend identification (version, environment).
    pub description: String,
}

/// Configuration the fiscal backend holds for this device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct BackendConfig {
    /// Registered taxpayer id.
    pub taxpayer_id: String,

    /// Device/terminal id assigned by the authority.
    pub device_id: String,

    /// Registered business name.
    pub business_name: String,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_and_display() {
        for status in InvoiceStatus::ALL {
            assert_eq!(status.to_string().parse::<InvoiceStatus>().unwrap(), status);
        }
        assert_eq!("SENT".parse::<InvoiceStatus>().unwrap(), InvoiceStatus::Sent);
        assert!("queued".parse::<InvoiceStatus>().is_err());
    }

    #[test]
    fn test_ingestion_day_no() {
        let mut day = FiscalDay::initial();
        assert_eq!(day.ingestion_day_no(), 1);

        day.day_no = 1;
        day.state = DayState::Open;
        assert_eq!(day.ingestion_day_no(), 1);

        day.state = DayState::Closed;
        assert_eq!(day.ingestion_day_no(), 2);
    }

    #[test]
    fn test_signed_invoice_requires_signature() {
        let now = Utc::now();
        let mut invoice = Invoice {
            id: "id-1".to_string(),
            seq: 1,
            number: "INV-001".to_string(),
            amount_minor: 1999,
            fiscal_day_no: 1,
            status: InvoiceStatus::Signed,
            retry_count: 0,
            last_error: None,
            signature: None,
            confirmation_id: None,
            created_at: now,
            updated_at: now,
        };
        assert!(SignedInvoice::from_invoice(&invoice).is_none());

        invoice.signature = Some("sig".to_string());
        let signed = SignedInvoice::from_invoice(&invoice).unwrap();
        assert_eq!(signed.amount, Money::from_minor(1999));
        assert_eq!(signed.signature, "sig");
    }
}
