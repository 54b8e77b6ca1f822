//! # Repository Module
//!
//! Database repository implementations for the fiscal bridge.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                   │
//! │                                                                         │
//! │  InvoiceStore (fiscal-sync)                                            │
//! │       │                                                                 │
//! │       │  db.invoices().list_unfinished()                               │
//! │       ▼                                                                 │
//! │  InvoiceRepository                                                     │
//! │  ├── insert_for_current_day(number, amount)                            │
//! │  ├── get_by_id(id)                                                     │
//! │  ├── update_lifecycle(invoice, expected_from)                          │
//! │  └── list_* / count_by_status                                          │
//! │       │                                                                 │
//! │       │  SQL Query                                                      │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! │  Repositories never enforce lifecycle rules. The store checks them    │
//! │  before writing; the repository only guards against stale reads.     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`InvoiceRepository`](invoice::InvoiceRepository) - Invoice records
//! - [`FiscalDayRepository`](fiscal_day::FiscalDayRepository) - Fiscal day records

pub mod fiscal_day;
pub mod invoice;
