//! Database schema management for `powermeter-rollup`.
//!
//! Ensures the four tier tables and their period-key constraints exist before
//! the pipeline starts. Applied once on startup from `main.rs`.

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// The unique constraints on `daily_energy.date`, `weekly_energy (year, week)`
/// and `monthly_energy (year, month)` are what the rollup upserts conflict on;
/// each period key maps to at most one row.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    // One row per flush window
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS hourly_energy (
            id             BIGSERIAL PRIMARY KEY,
            timestamp_hour TIMESTAMPTZ      NOT NULL,
            energy_kwh     DOUBLE PRECISION NOT NULL,
            voltage        DOUBLE PRECISION NOT NULL,
            current        DOUBLE PRECISION NOT NULL,
            power_factor   DOUBLE PRECISION NOT NULL,
            created_at     TIMESTAMPTZ      NOT NULL DEFAULT NOW()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS daily_energy (
            id           BIGSERIAL PRIMARY KEY,
            date         DATE             NOT NULL UNIQUE,
            total_energy DOUBLE PRECISION NOT NULL,
            avg_energy   DOUBLE PRECISION NOT NULL,
            max_energy   DOUBLE PRECISION NOT NULL,
            min_energy   DOUBLE PRECISION NOT NULL,
            created_at   TIMESTAMPTZ      NOT NULL DEFAULT NOW()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // `year` is the ISO week-numbering year
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS weekly_energy (
            id               BIGSERIAL PRIMARY KEY,
            year             INTEGER          NOT NULL,
            week             INTEGER          NOT NULL CHECK (week BETWEEN 1 AND 53),
            total_energy     DOUBLE PRECISION NOT NULL,
            avg_daily_energy DOUBLE PRECISION NOT NULL,
            peak_date        DATE             NOT NULL,
            peak_energy      DOUBLE PRECISION NOT NULL,
            day_count        INTEGER          NOT NULL,
            created_at       TIMESTAMPTZ      NOT NULL DEFAULT NOW(),
            UNIQUE (year, week)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS monthly_energy (
            id               BIGSERIAL PRIMARY KEY,
            year             INTEGER          NOT NULL,
            month            INTEGER          NOT NULL CHECK (month BETWEEN 1 AND 12),
            total_energy     DOUBLE PRECISION NOT NULL,
            avg_daily_energy DOUBLE PRECISION NOT NULL,
            peak_date        DATE             NOT NULL,
            peak_energy      DOUBLE PRECISION NOT NULL,
            day_count        INTEGER          NOT NULL,
            created_at       TIMESTAMPTZ      NOT NULL DEFAULT NOW(),
            UNIQUE (year, month)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Range scans by the daily rollup and the dashboard
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_hourly_energy_timestamp
            ON hourly_energy (timestamp_hour);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
