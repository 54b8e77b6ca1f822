//! # fiscal-db: Database Layer for the Fiscal Bridge
//!
//! This crate provides durable storage for invoices and fiscal days.
//! It uses SQLite for local storage with sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Fiscal Bridge Data Flow                            │
//! │                                                                         │
//! │  InvoiceStore (fiscal-sync)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    fiscal-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ InvoiceRepo   │    │ 001_init.sql │  │   │
//! │  │   │ SqlitePool    │◄───│ FiscalDayRepo │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   <data_dir>/fiscal-agent.db                                    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Invoice and fiscal day repositories
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fiscal_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("fiscal-agent.db")).await?;
//! let day = db.fiscal_days().current().await?;
//! let unfinished = db.invoices().list_unfinished().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::fiscal_day::FiscalDayRepository;
pub use repository::invoice::InvoiceRepository;
