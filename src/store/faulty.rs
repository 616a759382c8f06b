use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use super::{MemoryStore, Store};
use crate::error::{AppError, Result};
use crate::models::{
    DailyRecord, DailySummary, HourlyRecord, MonthlyRecord, MonthlySummary, NewHourlyRecord, Tier,
    WeeklyRecord, WeeklySummary,
};

/// Delegates to a [`MemoryStore`] but refuses selected writes.
#[derive(Default)]
pub(crate) struct FaultyStore {
    pub inner: MemoryStore,
    pub fail_hourly_inserts: bool,
    pub bad_week: Option<(i32, i32)>,
}

impl FaultyStore {
    pub fn failing_hourly_inserts() -> Self {
        Self {
            fail_hourly_inserts: true,
            ..Self::default()
        }
    }

    pub fn failing_week(year: i32, week: i32) -> Self {
        Self {
            bad_week: Some((year, week)),
            ..Self::default()
        }
    }
}

#[async_trait]
impl Store for FaultyStore {
    async fn insert_hourly(&self, r: &NewHourlyRecord) -> Result<HourlyRecord> {
        if self.fail_hourly_inserts {
            return Err(AppError::Internal("connection reset".into()));
        }
        self.inner.insert_hourly(r).await
    }
    async fn hourly_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HourlyRecord>> {
        self.inner.hourly_between(start, end).await
    }
    async fn recent_hourly(&self, limit: i64) -> Result<Vec<HourlyRecord>> {
        self.inner.recent_hourly(limit).await
    }
    async fn hourly_dates(&self) -> Result<Vec<NaiveDate>> {
        self.inner.hourly_dates().await
    }
    async fn upsert_daily(&self, s: &DailySummary) -> Result<DailyRecord> {
        self.inner.upsert_daily(s).await
    }
    async fn daily_between(&self, a: NaiveDate, b: NaiveDate) -> Result<Vec<DailyRecord>> {
        self.inner.daily_between(a, b).await
    }
    async fn all_daily(&self) -> Result<Vec<DailyRecord>> {
        self.inner.all_daily().await
    }
    async fn recent_daily(&self, limit: i64) -> Result<Vec<DailyRecord>> {
        self.inner.recent_daily(limit).await
    }
    async fn upsert_weekly(&self, s: &WeeklySummary) -> Result<WeeklyRecord> {
        if Some((s.year, s.week)) == self.bad_week {
            return Err(AppError::Internal("disk full".into()));
        }
        self.inner.upsert_weekly(s).await
    }
    async fn weekly_for_years(&self, a: i32, b: i32) -> Result<Vec<WeeklyRecord>> {
        self.inner.weekly_for_years(a, b).await
    }
    async fn all_weekly(&self) -> Result<Vec<WeeklyRecord>> {
        self.inner.all_weekly().await
    }
    async fn recent_weekly(&self, limit: i64) -> Result<Vec<WeeklyRecord>> {
        self.inner.recent_weekly(limit).await
    }
    async fn upsert_monthly(&self, s: &MonthlySummary) -> Result<MonthlyRecord> {
        self.inner.upsert_monthly(s).await
    }
    async fn recent_monthly(&self, limit: i64) -> Result<Vec<MonthlyRecord>> {
        self.inner.recent_monthly(limit).await
    }
    async fn clear(&self, tier: Tier) -> Result<u64> {
        self.inner.clear(tier).await
    }
    async fn count(&self, tier: Tier) -> Result<i64> {
        self.inner.count(tier).await
    }
}
