//! # Sync Error Types
//!
//! Error types for the agent's runtime components.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │  Fiscal Backend │  │  Lifecycle (CoreError)  │ │
//! │  │                 │  │  (FiscalError)  │  │                         │ │
//! │  │  InvalidConfig  │  │  Rejected       │  │  InvalidTransition      │ │
//! │  │  InvalidUrl     │  │  Transient      │  │  FiscalDayClosed        │ │
//! │  │  ConfigLoad/Save│  │  Unreachable    │  │  DuplicateNumber        │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Database     │  │     Watcher     │  │      Internal           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  DbError        │  │  Io             │  │  ShuttingDown           │ │
//! │  │                 │  │                 │  │  ChannelError           │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure Kinds
//! | kind        | handling                                         |
//! |-------------|--------------------------------------------------|
//! | Validation  | invoice excluded, never retried                  |
//! | Policy      | invoice parked until the fiscal day opens        |
//! | Transient   | linear retry up to `max_retries`                 |
//! | Unreachable | offline mode, backend probed indefinitely        |
//! | Duplicate   | rejected at ingestion, inbox file left in place  |

use thiserror::Error;

use fiscal_core::CoreError;
use fiscal_db::DbError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

// =============================================================================
// Fiscal Error
// =============================================================================

/// A fiscal backend failure, already classified.
///
/// Backends produce these; nothing transport-specific crosses the
/// `FiscalClient` boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FiscalError {
    /// The backend refused the request. Retrying will not help.
    #[error("Rejected by fiscal backend: {0}")]
    Rejected(String),

    /// The backend answered but failed. Worth retrying.
    #[error("Fiscal backend error: {0}")]
    Transient(String),

    /// The backend could not be reached (timeout, refused connection).
    #[error("Fiscal backend unreachable: {0}")]
    Unreachable(String),
}

impl FiscalError {
    /// Returns true if the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FiscalError::Rejected(_))
    }

    /// Returns true if the agent should switch to offline mode.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, FiscalError::Unreachable(_))
    }

    /// The reason without the category prefix.
    pub fn reason(&self) -> &str {
        match self {
            FiscalError::Rejected(r) | FiscalError::Transient(r) | FiscalError::Unreachable(r) => r,
        }
    }
}

// =============================================================================
// Sync Error
// =============================================================================

/// Error type covering every failure the agent can surface.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid agent configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid backend URL.
    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Domain Errors
    // =========================================================================
    /// Lifecycle, validation or duplicate-number error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Classified fiscal backend failure.
    #[error(transparent)]
    Fiscal(#[from] FiscalError),

    // =========================================================================
    // Infrastructure Errors
    // =========================================================================
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// File system error in the watcher.
    #[error("I/O error: {0}")]
    Io(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// The engine has shut down.
    #[error("Sync engine is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Io(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if the operation can be retried later.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Fiscal(e) => e.is_retryable(),
            SyncError::Core(CoreError::FiscalDayClosed { .. }) => true,
            SyncError::Database(DbError::PoolExhausted) => true,
            _ => false,
        }
    }

    /// Returns true if this is a fiscal-day policy refusal.
    pub fn is_policy(&self) -> bool {
        matches!(self, SyncError::Core(CoreError::FiscalDayClosed { .. }))
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}
