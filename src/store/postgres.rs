//! Postgres-backed [`Store`].
//!
//! Every upsert is one `INSERT .. ON CONFLICT .. DO UPDATE .. RETURNING`
//! statement, so concurrent writers to the same period key serialize inside
//! Postgres and the last one wins. `created_at` is left out of the `SET`
//! list and keeps the value from the first insert.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;

use super::Store;
use crate::error::Result;
use crate::models::{
    DailyRecord, DailySummary, HourlyRecord, MonthlyRecord, MonthlySummary, NewHourlyRecord, Tier,
    WeeklyRecord, WeeklySummary,
};

const HOURLY_COLUMNS: &str = "id, timestamp_hour, energy_kwh, voltage, current, power_factor, created_at";
const DAILY_COLUMNS: &str = "id, date, total_energy, avg_energy, max_energy, min_energy, created_at";
const WEEKLY_COLUMNS: &str = "id, year, week, total_energy, avg_daily_energy, peak_date, peak_energy, day_count, created_at";
const MONTHLY_COLUMNS: &str = "id, year, month, total_energy, avg_daily_energy, peak_date, peak_energy, day_count, created_at";

// ---

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    // ---
    async fn insert_hourly(&self, record: &NewHourlyRecord) -> Result<HourlyRecord> {
        // ---
        let row = sqlx::query_as::<_, HourlyRecord>(&format!(
            r#"
            INSERT INTO hourly_energy (timestamp_hour, energy_kwh, voltage, current, power_factor)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {HOURLY_COLUMNS}
            "#
        ))
        .bind(record.timestamp_hour)
        .bind(record.energy_kwh)
        .bind(record.voltage)
        .bind(record.current)
        .bind(record.power_factor)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn hourly_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HourlyRecord>> {
        // ---
        let rows = sqlx::query_as::<_, HourlyRecord>(&format!(
            r#"
            SELECT {HOURLY_COLUMNS}
            FROM hourly_energy
            WHERE timestamp_hour >= $1 AND timestamp_hour < $2
            ORDER BY timestamp_hour ASC, id ASC
            "#
        ))
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn recent_hourly(&self, limit: i64) -> Result<Vec<HourlyRecord>> {
        // ---
        let mut rows = sqlx::query_as::<_, HourlyRecord>(&format!(
            r#"
            SELECT {HOURLY_COLUMNS}
            FROM hourly_energy
            ORDER BY timestamp_hour DESC, id DESC
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.reverse();
        Ok(rows)
    }

    async fn hourly_dates(&self) -> Result<Vec<NaiveDate>> {
        // ---
        let dates = sqlx::query_scalar::<_, NaiveDate>(
            r#"
            SELECT DISTINCT (timestamp_hour AT TIME ZONE 'UTC')::date AS day
            FROM hourly_energy
            ORDER BY day ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(dates)
    }

    async fn upsert_daily(&self, s: &DailySummary) -> Result<DailyRecord> {
        // ---
        let row = sqlx::query_as::<_, DailyRecord>(&format!(
            r#"
            INSERT INTO daily_energy (date, total_energy, avg_energy, max_energy, min_energy)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (date) DO UPDATE SET
                total_energy = EXCLUDED.total_energy,
                avg_energy   = EXCLUDED.avg_energy,
                max_energy   = EXCLUDED.max_energy,
                min_energy   = EXCLUDED.min_energy
            RETURNING {DAILY_COLUMNS}
            "#
        ))
        .bind(s.date)
        .bind(s.total_energy)
        .bind(s.avg_energy)
        .bind(s.max_energy)
        .bind(s.min_energy)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn daily_between(&self, first: NaiveDate, last: NaiveDate) -> Result<Vec<DailyRecord>> {
        // ---
        let rows = sqlx::query_as::<_, DailyRecord>(&format!(
            r#"
            SELECT {DAILY_COLUMNS}
            FROM daily_energy
            WHERE date BETWEEN $1 AND $2
            ORDER BY date ASC
            "#
        ))
        .bind(first)
        .bind(last)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn all_daily(&self) -> Result<Vec<DailyRecord>> {
        // ---
        let rows = sqlx::query_as::<_, DailyRecord>(&format!(
            "SELECT {DAILY_COLUMNS} FROM daily_energy ORDER BY date ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn recent_daily(&self, limit: i64) -> Result<Vec<DailyRecord>> {
        // ---
        let mut rows = sqlx::query_as::<_, DailyRecord>(&format!(
            "SELECT {DAILY_COLUMNS} FROM daily_energy ORDER BY date DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.reverse();
        Ok(rows)
    }

    async fn upsert_weekly(&self, s: &WeeklySummary) -> Result<WeeklyRecord> {
        // ---
        let row = sqlx::query_as::<_, WeeklyRecord>(&format!(
            r#"
            INSERT INTO weekly_energy
                (year, week, total_energy, avg_daily_energy, peak_date, peak_energy, day_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (year, week) DO UPDATE SET
                total_energy     = EXCLUDED.total_energy,
                avg_daily_energy = EXCLUDED.avg_daily_energy,
                peak_date        = EXCLUDED.peak_date,
                peak_energy      = EXCLUDED.peak_energy,
                day_count        = EXCLUDED.day_count
            RETURNING {WEEKLY_COLUMNS}
            "#
        ))
        .bind(s.year)
        .bind(s.week)
        .bind(s.total_energy)
        .bind(s.avg_daily_energy)
        .bind(s.peak_date)
        .bind(s.peak_energy)
        .bind(s.day_count)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn weekly_for_years(
        &self,
        first_year: i32,
        last_year: i32,
    ) -> Result<Vec<WeeklyRecord>> {
        // ---
        let rows = sqlx::query_as::<_, WeeklyRecord>(&format!(
            r#"
            SELECT {WEEKLY_COLUMNS}
            FROM weekly_energy
            WHERE year BETWEEN $1 AND $2
            ORDER BY year ASC, week ASC
            "#
        ))
        .bind(first_year)
        .bind(last_year)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn all_weekly(&self) -> Result<Vec<WeeklyRecord>> {
        // ---
        let rows = sqlx::query_as::<_, WeeklyRecord>(&format!(
            "SELECT {WEEKLY_COLUMNS} FROM weekly_energy ORDER BY year ASC, week ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn recent_weekly(&self, limit: i64) -> Result<Vec<WeeklyRecord>> {
        // ---
        let mut rows = sqlx::query_as::<_, WeeklyRecord>(&format!(
            "SELECT {WEEKLY_COLUMNS} FROM weekly_energy ORDER BY year DESC, week DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.reverse();
        Ok(rows)
    }

    async fn upsert_monthly(&self, s: &MonthlySummary) -> Result<MonthlyRecord> {
        // ---
        let row = sqlx::query_as::<_, MonthlyRecord>(&format!(
            r#"
            INSERT INTO monthly_energy
                (year, month, total_energy, avg_daily_energy, peak_date, peak_energy, day_count)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (year, month) DO UPDATE SET
                total_energy     = EXCLUDED.total_energy,
                avg_daily_energy = EXCLUDED.avg_daily_energy,
                peak_date        = EXCLUDED.peak_date,
                peak_energy      = EXCLUDED.peak_energy,
                day_count        = EXCLUDED.day_count
            RETURNING {MONTHLY_COLUMNS}
            "#
        ))
        .bind(s.year)
        .bind(s.month)
        .bind(s.total_energy)
        .bind(s.avg_daily_energy)
        .bind(s.peak_date)
        .bind(s.peak_energy)
        .bind(s.day_count)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn recent_monthly(&self, limit: i64) -> Result<Vec<MonthlyRecord>> {
        // ---
        let mut rows = sqlx::query_as::<_, MonthlyRecord>(&format!(
            "SELECT {MONTHLY_COLUMNS} FROM monthly_energy ORDER BY year DESC, month DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.reverse();
        Ok(rows)
    }

    async fn clear(&self, tier: Tier) -> Result<u64> {
        // ---
        let result = sqlx::query(&format!("DELETE FROM {}", tier.table()))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn count(&self, tier: Tier) -> Result<i64> {
        // ---
        let n = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", tier.table()))
            .fetch_one(&self.pool)
            .await?;

        Ok(n)
    }
}
