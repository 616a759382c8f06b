//! Durable-store capability used by the flush and rollup paths.
//!
//! Implementations must make each `upsert_*` atomic on its unique period key
//! (last writer wins) and must never overwrite `created_at` of an existing
//! row. Concurrent manual and scheduled rollups of the same period rely on
//! this.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::Result;
use crate::models::{
    DailyRecord, DailySummary, HourlyRecord, MonthlyRecord, MonthlySummary, NewHourlyRecord, Tier,
    WeeklyRecord, WeeklySummary,
};

#[cfg(test)]
mod faulty;
mod memory;
mod postgres;

#[cfg(test)]
pub(crate) use faulty::FaultyStore;
pub use memory::MemoryStore;
pub use postgres::PgStore;

// ---

#[async_trait]
pub trait Store: Send + Sync {
    // ---
    async fn insert_hourly(&self, record: &NewHourlyRecord) -> Result<HourlyRecord>;

    /// Hourly rows with `start <= timestamp_hour < end`, oldest first.
    async fn hourly_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HourlyRecord>>;

    /// Newest `limit` hourly rows, returned oldest first.
    async fn recent_hourly(&self, limit: i64) -> Result<Vec<HourlyRecord>>;

    /// Distinct UTC dates that have at least one hourly row, ascending.
    async fn hourly_dates(&self) -> Result<Vec<NaiveDate>>;

    async fn upsert_daily(&self, summary: &DailySummary) -> Result<DailyRecord>;

    /// Daily rows with `first <= date <= last`, ascending.
    async fn daily_between(&self, first: NaiveDate, last: NaiveDate) -> Result<Vec<DailyRecord>>;

    async fn all_daily(&self) -> Result<Vec<DailyRecord>>;

    /// Newest `limit` daily rows, returned oldest first.
    async fn recent_daily(&self, limit: i64) -> Result<Vec<DailyRecord>>;

    async fn upsert_weekly(&self, summary: &WeeklySummary) -> Result<WeeklyRecord>;

    /// Weekly rows whose ISO year lies in `first_year..=last_year`, ascending.
    async fn weekly_for_years(&self, first_year: i32, last_year: i32)
        -> Result<Vec<WeeklyRecord>>;

    async fn all_weekly(&self) -> Result<Vec<WeeklyRecord>>;

    /// Newest `limit` weekly rows, returned oldest first.
    async fn recent_weekly(&self, limit: i64) -> Result<Vec<WeeklyRecord>>;

    async fn upsert_monthly(&self, summary: &MonthlySummary) -> Result<MonthlyRecord>;

    /// Newest `limit` monthly rows, returned oldest first.
    async fn recent_monthly(&self, limit: i64) -> Result<Vec<MonthlyRecord>>;

    /// Delete every row of `tier`; returns the number removed.
    async fn clear(&self, tier: Tier) -> Result<u64>;

    async fn count(&self, tier: Tier) -> Result<i64>;
}
