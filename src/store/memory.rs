//! In-process [`Store`] with the same upsert semantics as Postgres.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;

use super::Store;
use crate::error::Result;
use crate::models::{
    DailyRecord, DailySummary, HourlyRecord, MonthlyRecord, MonthlySummary, NewHourlyRecord, Tier,
    WeeklyRecord, WeeklySummary,
};

// ---

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    hourly: Vec<HourlyRecord>,
    daily: BTreeMap<NaiveDate, DailyRecord>,
    weekly: BTreeMap<(i32, i32), WeeklyRecord>,
    monthly: BTreeMap<(i32, i32), MonthlyRecord>,
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Newest `limit` of an ascending sequence, still ascending.
fn tail<T>(rows: impl DoubleEndedIterator<Item = T>, limit: i64) -> Vec<T> {
    // ---
    let limit = usize::try_from(limit).unwrap_or(0);
    let mut out: Vec<T> = rows.rev().take(limit).collect();
    out.reverse();
    out
}

#[async_trait]
impl Store for MemoryStore {
    // ---
    async fn insert_hourly(&self, record: &NewHourlyRecord) -> Result<HourlyRecord> {
        // ---
        let mut t = self.tables.lock();
        let row = HourlyRecord {
            id: t.allocate_id(),
            timestamp_hour: record.timestamp_hour,
            energy_kwh: record.energy_kwh,
            voltage: record.voltage,
            current: record.current,
            power_factor: record.power_factor,
            created_at: Utc::now(),
        };
        // Keep ascending by timestamp; late arrivals land in place.
        let pos = t
            .hourly
            .partition_point(|h| h.timestamp_hour <= row.timestamp_hour);
        t.hourly.insert(pos, row.clone());
        Ok(row)
    }

    async fn hourly_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HourlyRecord>> {
        // ---
        let t = self.tables.lock();
        Ok(t.hourly
            .iter()
            .filter(|h| h.timestamp_hour >= start && h.timestamp_hour < end)
            .cloned()
            .collect())
    }

    async fn recent_hourly(&self, limit: i64) -> Result<Vec<HourlyRecord>> {
        let t = self.tables.lock();
        Ok(tail(t.hourly.iter().cloned(), limit))
    }

    async fn hourly_dates(&self) -> Result<Vec<NaiveDate>> {
        // ---
        let t = self.tables.lock();
        let mut dates: Vec<NaiveDate> = t.hourly.iter().map(HourlyRecord::date).collect();
        dates.dedup();
        Ok(dates)
    }

    async fn upsert_daily(&self, s: &DailySummary) -> Result<DailyRecord> {
        // ---
        let mut t = self.tables.lock();
        let existing = t.daily.get(&s.date).map(|r| (r.id, r.created_at));
        let (id, created_at) = match existing {
            Some(identity) => identity,
            None => (t.allocate_id(), Utc::now()),
        };
        let row = DailyRecord {
            id,
            date: s.date,
            total_energy: s.total_energy,
            avg_energy: s.avg_energy,
            max_energy: s.max_energy,
            min_energy: s.min_energy,
            created_at,
        };
        t.daily.insert(s.date, row.clone());
        Ok(row)
    }

    async fn daily_between(&self, first: NaiveDate, last: NaiveDate) -> Result<Vec<DailyRecord>> {
        // ---
        if first > last {
            return Ok(Vec::new());
        }
        let t = self.tables.lock();
        Ok(t.daily.range(first..=last).map(|(_, r)| r.clone()).collect())
    }

    async fn all_daily(&self) -> Result<Vec<DailyRecord>> {
        Ok(self.tables.lock().daily.values().cloned().collect())
    }

    async fn recent_daily(&self, limit: i64) -> Result<Vec<DailyRecord>> {
        let t = self.tables.lock();
        Ok(tail(t.daily.values().cloned(), limit))
    }

    async fn upsert_weekly(&self, s: &WeeklySummary) -> Result<WeeklyRecord> {
        // ---
        let mut t = self.tables.lock();
        let key = (s.year, s.week);
        let existing = t.weekly.get(&key).map(|r| (r.id, r.created_at));
        let (id, created_at) = match existing {
            Some(identity) => identity,
            None => (t.allocate_id(), Utc::now()),
        };
        let row = WeeklyRecord {
            id,
            year: s.year,
            week: s.week,
            total_energy: s.total_energy,
            avg_daily_energy: s.avg_daily_energy,
            peak_date: s.peak_date,
            peak_energy: s.peak_energy,
            day_count: s.day_count,
            created_at,
        };
        t.weekly.insert(key, row.clone());
        Ok(row)
    }

    async fn weekly_for_years(
        &self,
        first_year: i32,
        last_year: i32,
    ) -> Result<Vec<WeeklyRecord>> {
        // ---
        let t = self.tables.lock();
        Ok(t.weekly
            .values()
            .filter(|w| w.year >= first_year && w.year <= last_year)
            .cloned()
            .collect())
    }

    async fn all_weekly(&self) -> Result<Vec<WeeklyRecord>> {
        Ok(self.tables.lock().weekly.values().cloned().collect())
    }

    async fn recent_weekly(&self, limit: i64) -> Result<Vec<WeeklyRecord>> {
        let t = self.tables.lock();
        Ok(tail(t.weekly.values().cloned(), limit))
    }

    async fn upsert_monthly(&self, s: &MonthlySummary) -> Result<MonthlyRecord> {
        // ---
        let mut t = self.tables.lock();
        let key = (s.year, s.month);
        let existing = t.monthly.get(&key).map(|r| (r.id, r.created_at));
        let (id, created_at) = match existing {
            Some(identity) => identity,
            None => (t.allocate_id(), Utc::now()),
        };
        let row = MonthlyRecord {
            id,
            year: s.year,
            month: s.month,
            total_energy: s.total_energy,
            avg_daily_energy: s.avg_daily_energy,
            peak_date: s.peak_date,
            peak_energy: s.peak_energy,
            day_count: s.day_count,
            created_at,
        };
        t.monthly.insert(key, row.clone());
        Ok(row)
    }

    async fn recent_monthly(&self, limit: i64) -> Result<Vec<MonthlyRecord>> {
        let t = self.tables.lock();
        Ok(tail(t.monthly.values().cloned(), limit))
    }

    async fn clear(&self, tier: Tier) -> Result<u64> {
        // ---
        let mut t = self.tables.lock();
        let removed = match tier {
            Tier::Hourly => std::mem::take(&mut t.hourly).len(),
            Tier::Daily => std::mem::take(&mut t.daily).len(),
            Tier::Weekly => std::mem::take(&mut t.weekly).len(),
            Tier::Monthly => std::mem::take(&mut t.monthly).len(),
        };
        Ok(removed as u64)
    }

    async fn count(&self, tier: Tier) -> Result<i64> {
        // ---
        let t = self.tables.lock();
        let n = match tier {
            Tier::Hourly => t.hourly.len(),
            Tier::Daily => t.daily.len(),
            Tier::Weekly => t.weekly.len(),
            Tier::Monthly => t.monthly.len(),
        };
        Ok(n as i64)
    }
}
