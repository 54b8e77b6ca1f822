//! # Fiscal Backend
//!
//! Contract with the tax authority's fiscal backend and its implementations.
//!
//! ## Layering
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   SyncEngine / ControlApi                                              │
//! │          │                                                              │
//! │          ▼                                                              │
//! │   FiscalClient          timeout on every call, Unreachable on expiry   │
//! │          │                                                              │
//! │          ▼                                                              │
//! │   dyn FiscalBackend     returns classified FiscalError only            │
//! │     ├── HttpBackend       JSON over HTTP (reqwest)                     │
//! │     └── SimulatedBackend  in-process, scriptable failures              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod client;
mod http;
mod simulated;

pub use client::FiscalClient;
pub use http::HttpBackend;
pub use simulated::{FiscalOp, SimulatedBackend};

use async_trait::async_trait;

use fiscal_core::{BackendConfig, BackendStatus, ConfirmationId, Invoice, SignedInvoice};

use crate::error::FiscalError;

/// Result of a fiscal backend call.
pub type FiscalResult<T> = Result<T, FiscalError>;

/// Operations offered by a fiscal backend.
///
/// Implementations classify their own failures. `find_confirmation` must
/// answer from the backend's records, not from local state, since it is
/// used to resolve sends whose outcome was lost in a crash.
#[async_trait]
pub trait FiscalBackend: Send + Sync {
    /// Short identifier for logs and status output.
    fn name(&self) -> &str;

    async fn open_day(&self, day_no: i64) -> FiscalResult<()>;

    async fn close_day(&self, day_no: i64) -> FiscalResult<()>;

    async fn sign(&self, invoice: &Invoice) -> FiscalResult<SignedInvoice>;

    async fn send(&self, signed: &SignedInvoice) -> FiscalResult<ConfirmationId>;

    async fn get_status(&self) -> FiscalResult<BackendStatus>;

    async fn get_config(&self) -> FiscalResult<BackendConfig>;

    /// Looks up a registration for `invoice`, if the backend has one.
    async fn find_confirmation(&self, invoice: &Invoice) -> FiscalResult<Option<ConfirmationId>>;
}
