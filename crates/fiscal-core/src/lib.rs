//! # fiscal-core: Pure Domain Logic for the Fiscal Bridge
//!
//! This crate holds the invoice model and its lifecycle rules as pure
//! functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Fiscal Bridge Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 Operator Dashboard (any client)                 │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ HTTP / JSON                            │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │             fiscal-sync (watcher, engine, control)              │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ fiscal-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   money   │  │ lifecycle │  │ validation│  │   │
//! │  │   │  Invoice  │  │   Money   │  │ table +   │  │ number,   │  │   │
//! │  │   │ FiscalDay │  │           │  │ day rule  │  │ amount    │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                   fiscal-db (Database Layer)                    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Invoice, FiscalDay, ActivityEntry, ...)
//! - [`money`] - Integer minor-unit amounts
//! - [`lifecycle`] - Transition table and fiscal-day policy
//! - [`error`] - Domain error types
//! - [`validation`] - Invoice number/amount rules and file parsing
//!
//! ## Example Usage
//!
//! ```rust
//! use fiscal_core::{lifecycle::check_transition, DayState, InvoiceStatus};
//!
//! assert!(check_transition("id", InvoiceStatus::Pending, InvoiceStatus::Signing, DayState::Open, false).is_ok());
//! assert!(check_transition("id", InvoiceStatus::Sent, InvoiceStatus::Pending, DayState::Open, false).is_err());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod lifecycle;
pub mod money;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Longest accepted business invoice number.
pub const MAX_INVOICE_NUMBER_LEN: usize = 64;

/// Largest absolute amount accepted, in minor units.
///
/// Well below `i64::MAX` so day totals cannot overflow in practice.
pub const MAX_ABS_AMOUNT_MINOR: i64 = 1_000_000_000_000;
