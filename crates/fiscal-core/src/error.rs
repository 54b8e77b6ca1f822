//! # Error Types
//!
//! Domain-specific error types for fiscal-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  fiscal-core errors (this file)                                        │
//! │  ├── CoreError        - Lifecycle and policy violations                │
//! │  └── ValidationError  - Bad invoice data                               │
//! │                                                                         │
//! │  fiscal-db errors                                                      │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  fiscal-sync errors                                                    │
//! │  ├── FiscalError      - Classified backend failures                    │
//! │  └── SyncError        - Everything the engine/store can surface        │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → ApiError → Operator   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::types::InvoiceStatus;

// =============================================================================
// Core Error
// =============================================================================

/// Lifecycle and policy errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The requested status change is not in the transition table.
    ///
    /// ## When This Occurs
    /// - `Sent → Pending` (a registered invoice cannot be resent)
    /// - Anything out of `Excluded`
    /// - Skipping a step, e.g. `Pending → Sent`
    #[error("Invoice {invoice_id}: transition {from} → {to} is not allowed")]
    InvalidTransition {
        invoice_id: String,
        from: InvoiceStatus,
        to: InvoiceStatus,
    },

    /// Forward progress attempted while the fiscal day is closed.
    ///
    /// This is a policy error: the invoice stays parked and is retried
    /// automatically once the day opens.
    #[error("Fiscal day is closed: invoice {invoice_id} cannot move to {to}")]
    FiscalDayClosed { invoice_id: String, to: InvoiceStatus },

    /// `Sent` requires a confirmation id issued by the backend.
    #[error("Invoice {0} cannot be marked sent without a confirmation id")]
    MissingConfirmation(String),

    /// `Signed` requires the signed artifact.
    #[error("Invoice {0} cannot be marked signed without a signature")]
    MissingSignature(String),

    /// An invoice with this number already exists for the fiscal day.
    #[error("Invoice number '{number}' already exists for fiscal day {day_no}")]
    DuplicateNumber { number: String, day_no: i64 },

    /// Invoice cannot be found.
    #[error("Invoice not found: {0}")]
    InvoiceNotFound(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Invoice data validation errors.
///
/// Invoices failing validation are excluded and never retried.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Value must be different from zero.
    #[error("{field} must not be zero")]
    MustBeNonZero { field: String },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Invalid format.
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// The invoice file could not be decoded.
    #[error("Malformed invoice document: {0}")]
    Malformed(String),
}

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
