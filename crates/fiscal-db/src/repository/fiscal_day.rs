//! # Fiscal Day Repository
//!
//! One row per fiscal day ever opened. The row with the highest `day_no`
//! is the current day; no row at all means no day was ever opened.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use fiscal_core::{DayState, FiscalDay};

/// Repository for fiscal day records.
#[derive(Debug, Clone)]
pub struct FiscalDayRepository {
    pool: SqlitePool,
}

impl FiscalDayRepository {
    /// Creates a new FiscalDayRepository.
    pub fn new(pool: SqlitePool) -> Self {
        FiscalDayRepository { pool }
    }

    /// Returns the current fiscal day, or [`FiscalDay::initial`] if none.
    pub async fn current(&self) -> DbResult<FiscalDay> {
        let day = sqlx::query_as::<_, FiscalDay>(
            r#"
            SELECT day_no, state, opened_at, closed_at
            FROM fiscal_days
            ORDER BY day_no DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(day.unwrap_or_else(FiscalDay::initial))
    }

    /// Opens the next fiscal day (`last_day_no + 1`).
    ///
    /// Callers check that the current day is closed first; opening while a
    /// day is open is rejected here as a stale state.
    pub async fn open_next(&self) -> DbResult<FiscalDay> {
        let now = Utc::now();

        let day = sqlx::query_as::<_, FiscalDay>(
            r#"
            INSERT INTO fiscal_days (day_no, state, opened_at, closed_at)
            SELECT next_no, ?1, ?2, NULL
            FROM (SELECT COALESCE(MAX(day_no), 0) + 1 AS next_no FROM fiscal_days)
            WHERE NOT EXISTS (SELECT 1 FROM fiscal_days WHERE state = ?3)
            RETURNING day_no, state, opened_at, closed_at
            "#,
        )
        .bind(DayState::Open)
        .bind(now)
        .bind(DayState::Open)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::stale("FiscalDay", "open"))?;

        debug!(day_no = day.day_no, "Fiscal day row inserted");
        Ok(day)
    }

    /// Closes the given open day.
    pub async fn close(&self, day_no: i64) -> DbResult<FiscalDay> {
        let now = Utc::now();

        let day = sqlx::query_as::<_, FiscalDay>(
            r#"
            UPDATE fiscal_days
            SET state = ?2, closed_at = ?3
            WHERE day_no = ?1 AND state = ?4
            RETURNING day_no, state, opened_at, closed_at
            "#,
        )
        .bind(day_no)
        .bind(DayState::Closed)
        .bind(now)
        .bind(DayState::Open)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::stale("FiscalDay", day_no.to_string()))?;

        debug!(day_no = day.day_no, "Fiscal day row closed");
        Ok(day)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
