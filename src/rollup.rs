//! Cascading rollups: hourly → daily, daily → weekly, daily → monthly and
//! weekly → monthly.
//!
//! Each transition reads the finer tier's persisted rows, groups them by the
//! coarser period key, and upserts one summary per group. Grouping happens
//! here rather than in SQL so the ISO week logic in [`crate::period`] is the
//! only week definition in play.
//!
//! Rounding: daily totals, weekly/monthly totals and average-daily values are
//! stored at 2 decimals; per-hour averages, minima and maxima at 4. Coarser
//! tiers sum the already-rounded totals of the tier below, so the same day
//! contributes the same amount to its week and to its month.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{Days, NaiveDate, NaiveTime};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::models::{
    round2, round4, DailyRecord, DailySummary, HourlyRecord, MonthlySummary, Tier, WeeklyRecord,
    WeeklySummary,
};
use crate::period::{MonthKey, WeekKey};
use crate::store::Store;

// ---

/// Outcome of one rollup batch.
///
/// `groups` is the number of periods found in the source tier;
/// `records_written + failed == groups`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollupSummary {
    pub tier: Tier,
    pub groups: usize,
    pub records_written: usize,
    pub failed: usize,
}

impl RollupSummary {
    pub fn new(tier: Tier) -> Self {
        Self {
            tier,
            groups: 0,
            records_written: 0,
            failed: 0,
        }
    }

    fn absorb(&mut self, other: RollupSummary) {
        self.groups += other.groups;
        self.records_written += other.records_written;
        self.failed += other.failed;
    }
}

// ---

/// Running totals for one coarse period.
#[derive(Debug, Default)]
struct PeriodTotals {
    total: f64,
    days: i32,
    peak: Option<(NaiveDate, f64)>,
}

impl PeriodTotals {
    // ---
    fn add(&mut self, total: f64, days: i32, peak_date: NaiveDate, peak_energy: f64) {
        // ---
        self.total += total;
        self.days += days;
        // Highest energy wins; equal energy keeps the earlier date.
        let keep = matches!(
            self.peak,
            Some((date, energy)) if energy > peak_energy || (energy == peak_energy && date <= peak_date)
        );
        if !keep {
            self.peak = Some((peak_date, peak_energy));
        }
    }

    /// `(total, avg_daily, peak_date, peak_energy, day_count)`
    fn finish(&self) -> Option<(f64, f64, NaiveDate, f64, i32)> {
        // ---
        let (peak_date, peak_energy) = self.peak?;
        let total = round2(self.total);
        let days = self.days.max(1);
        Some((
            total,
            round2(total / days as f64),
            peak_date,
            peak_energy,
            self.days,
        ))
    }
}

/// Daily summary from the hourly rows of one date. `None` if there are none.
pub fn summarize_day(date: NaiveDate, hourly: &[HourlyRecord]) -> Option<DailySummary> {
    // ---
    if hourly.is_empty() {
        return None;
    }

    let sum: f64 = hourly.iter().map(|h| h.energy_kwh).sum();
    let max = hourly.iter().map(|h| h.energy_kwh).fold(f64::MIN, f64::max);
    let min = hourly.iter().map(|h| h.energy_kwh).fold(f64::MAX, f64::min);

    Some(DailySummary {
        date,
        total_energy: round2(sum),
        avg_energy: round4(sum / hourly.len() as f64),
        max_energy: round4(max),
        min_energy: round4(min),
    })
}

/// One weekly summary per ISO week present in `daily`, ascending.
pub fn summarize_weeks(daily: &[DailyRecord]) -> Vec<WeeklySummary> {
    // ---
    let mut groups: BTreeMap<WeekKey, PeriodTotals> = BTreeMap::new();
    for d in daily {
        groups
            .entry(WeekKey::of(d.date))
            .or_default()
            .add(d.total_energy, 1, d.date, d.total_energy);
    }

    groups
        .into_iter()
        .filter_map(|(key, totals)| {
            let (total_energy, avg_daily_energy, peak_date, peak_energy, day_count) =
                totals.finish()?;
            Some(WeeklySummary {
                year: key.year(),
                week: key.week(),
                total_energy,
                avg_daily_energy,
                peak_date,
                peak_energy,
                day_count,
            })
        })
        .collect()
}

/// One monthly summary per calendar month present in `daily`, ascending.
pub fn summarize_months_from_daily(daily: &[DailyRecord]) -> Vec<MonthlySummary> {
    // ---
    let mut groups: BTreeMap<MonthKey, PeriodTotals> = BTreeMap::new();
    for d in daily {
        groups
            .entry(MonthKey::of(d.date))
            .or_default()
            .add(d.total_energy, 1, d.date, d.total_energy);
    }
    finish_months(groups)
}

/// One monthly summary per month that weekly rows are attributed to.
///
/// A week belongs to the month of its Monday. Rows whose `(year, week)` is not
/// a valid ISO week are skipped.
pub fn summarize_months_from_weekly(weekly: &[WeeklyRecord]) -> Vec<MonthlySummary> {
    // ---
    let mut groups: BTreeMap<MonthKey, PeriodTotals> = BTreeMap::new();
    for w in weekly {
        let key = match WeekKey::new(w.year, w.week) {
            Ok(k) => k,
            Err(e) => {
                warn!("Skipping weekly row {}: {}", w.id, e);
                continue;
            }
        };
        groups.entry(key.month()).or_default().add(
            w.total_energy,
            w.day_count,
            w.peak_date,
            w.peak_energy,
        );
    }
    finish_months(groups)
}

fn finish_months(groups: BTreeMap<MonthKey, PeriodTotals>) -> Vec<MonthlySummary> {
    // ---
    groups
        .into_iter()
        .filter_map(|(key, totals)| {
            let (total_energy, avg_daily_energy, peak_date, peak_energy, day_count) =
                totals.finish()?;
            Some(MonthlySummary {
                year: key.year(),
                month: key.month(),
                total_energy,
                avg_daily_energy,
                peak_date,
                peak_energy,
                day_count,
            })
        })
        .collect()
}

// ---

/// Derives each tier from the one below it through a [`Store`].
pub struct RollupEngine {
    store: Arc<dyn Store>,
}

impl RollupEngine {
    // ---
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Recompute the daily row of `date` from its hourly rows.
    pub async fn daily_for_date(&self, date: NaiveDate) -> Result<RollupSummary> {
        // ---
        let start = date.and_time(NaiveTime::MIN).and_utc();
        let end = (date + Days::new(1)).and_time(NaiveTime::MIN).and_utc();
        let hourly = self.store.hourly_between(start, end).await?;

        let mut summary = RollupSummary::new(Tier::Daily);
        let Some(daily) = summarize_day(date, &hourly) else {
            info!("Daily rollup for {}: no hourly data, nothing written", date);
            return Ok(summary);
        };

        summary.groups = 1;
        match self.store.upsert_daily(&daily).await {
            Ok(row) => {
                summary.records_written = 1;
                info!(
                    date = %row.date,
                    hours = hourly.len(),
                    total_energy = row.total_energy,
                    "Daily rollup written"
                );
            }
            Err(e) => {
                summary.failed = 1;
                error!("Daily rollup for {} failed to persist: {}", date, e);
            }
        }
        Ok(summary)
    }

    /// Daily rollup for every date that has hourly rows but no daily row yet.
    pub async fn daily_catch_up(&self) -> Result<RollupSummary> {
        // ---
        let hourly_dates = self.store.hourly_dates().await?;
        let done: BTreeSet<NaiveDate> = self
            .store
            .all_daily()
            .await?
            .into_iter()
            .map(|d| d.date)
            .collect();

        let mut summary = RollupSummary::new(Tier::Daily);
        for date in hourly_dates.into_iter().filter(|d| !done.contains(d)) {
            // A read failure for one date is a failed group, not a failed batch.
            match self.daily_for_date(date).await {
                Ok(s) => summary.absorb(s),
                Err(e) => {
                    summary.groups += 1;
                    summary.failed += 1;
                    error!("Daily catch-up for {} failed: {}", date, e);
                }
            }
        }
        info!(
            written = summary.records_written,
            failed = summary.failed,
            "Daily catch-up complete"
        );
        Ok(summary)
    }

    /// Recompute one ISO week from its daily rows.
    pub async fn weekly_for(&self, week: WeekKey) -> Result<RollupSummary> {
        // ---
        let daily = self
            .store
            .daily_between(week.monday(), week.sunday())
            .await?;
        debug!("Weekly rollup for {}: {} daily rows", week, daily.len());
        Ok(self.write_weeks(summarize_weeks(&daily)).await)
    }

    /// Recompute every ISO week that has daily rows.
    pub async fn weekly_all(&self) -> Result<RollupSummary> {
        // ---
        let daily = self.store.all_daily().await?;
        Ok(self.write_weeks(summarize_weeks(&daily)).await)
    }

    async fn write_weeks(&self, weeks: Vec<WeeklySummary>) -> RollupSummary {
        // ---
        let mut summary = RollupSummary::new(Tier::Weekly);
        summary.groups = weeks.len();

        for w in &weeks {
            match self.store.upsert_weekly(w).await {
                Ok(row) => {
                    summary.records_written += 1;
                    info!(
                        year = row.year,
                        week = row.week,
                        days = row.day_count,
                        total_energy = row.total_energy,
                        peak_date = %row.peak_date,
                        "Weekly rollup written"
                    );
                }
                Err(e) => {
                    summary.failed += 1;
                    error!("Weekly rollup for {}-W{:02} failed: {}", w.year, w.week, e);
                }
            }
        }

        if weeks.is_empty() {
            info!("Weekly rollup: no daily data, nothing written");
        }
        summary
    }

    /// Recompute one month directly from its daily rows.
    pub async fn monthly_from_daily(&self, month: MonthKey) -> Result<RollupSummary> {
        // ---
        let daily = self
            .store
            .daily_between(month.first_day(), month.last_day())
            .await?;
        Ok(self.write_months(summarize_months_from_daily(&daily)).await)
    }

    pub async fn monthly_from_daily_all(&self) -> Result<RollupSummary> {
        // ---
        let daily = self.store.all_daily().await?;
        Ok(self.write_months(summarize_months_from_daily(&daily)).await)
    }

    /// Recompute one month from the weekly rows attributed to it.
    ///
    /// The weekly rollups for those weeks must have been run first.
    pub async fn monthly_from_weekly(&self, month: MonthKey) -> Result<RollupSummary> {
        // ---
        let (first_year, last_year) = month.iso_year_span();
        let weekly: Vec<WeeklyRecord> = self
            .store
            .weekly_for_years(first_year, last_year)
            .await?
            .into_iter()
            .filter(|w| {
                WeekKey::new(w.year, w.week)
                    .map(|k| k.month() == month)
                    .unwrap_or(false)
            })
            .collect();
        Ok(self
            .write_months(summarize_months_from_weekly(&weekly))
            .await)
    }

    pub async fn monthly_from_weekly_all(&self) -> Result<RollupSummary> {
        // ---
        let weekly = self.store.all_weekly().await?;
        Ok(self
            .write_months(summarize_months_from_weekly(&weekly))
            .await)
    }

    async fn write_months(&self, months: Vec<MonthlySummary>) -> RollupSummary {
        // ---
        let mut summary = RollupSummary::new(Tier::Monthly);
        summary.groups = months.len();

        for m in &months {
            match self.store.upsert_monthly(m).await {
                Ok(row) => {
                    summary.records_written += 1;
                    info!(
                        year = row.year,
                        month = row.month,
                        days = row.day_count,
                        total_energy = row.total_energy,
                        peak_date = %row.peak_date,
                        "Monthly rollup written"
                    );
                }
                Err(e) => {
                    summary.failed += 1;
                    error!("Monthly rollup for {}-{:02} failed: {}", m.year, m.month, e);
                }
            }
        }

        if months.is_empty() {
            info!("Monthly rollup: no source data, nothing written");
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::NewHourlyRecord;
    use crate::store::{FaultyStore, MemoryStore};
    use chrono::{DateTime, TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn daily(date: NaiveDate, total: f64) -> DailyRecord {
        // ---
        DailyRecord {
            id: 0,
            date,
            total_energy: total,
            avg_energy: 0.0,
            max_energy: 0.0,
            min_energy: 0.0,
            created_at: Utc::now(),
        }
    }

    async fn insert_hour(store: &dyn Store, ts: DateTime<Utc>, energy: f64) {
        // ---
        store
            .insert_hourly(&NewHourlyRecord {
                timestamp_hour: ts,
                energy_kwh: energy,
                voltage: 220.0,
                current: 1.0,
                power_factor: 0.95,
            })
            .await
            .unwrap();
    }

    #[test]
    fn test_summarize_day() {
        // ---
        let date = d(2025, 6, 2);
        let rows: Vec<HourlyRecord> = [0.1234, 0.2, 0.0766]
            .iter()
            .enumerate()
            .map(|(i, e)| HourlyRecord {
                id: i as i64,
                timestamp_hour: Utc.with_ymd_and_hms(2025, 6, 2, i as u32, 0, 0).unwrap(),
                energy_kwh: *e,
                voltage: 220.0,
                current: 1.0,
                power_factor: 0.95,
                created_at: Utc::now(),
            })
            .collect();

        let s = summarize_day(date, &rows).unwrap();
        assert_eq!(s.total_energy, 0.4);
        assert_eq!(s.avg_energy, 0.1333);
        assert_eq!(s.max_energy, 0.2);
        assert_eq!(s.min_energy, 0.0766);
        assert!(summarize_day(date, &[]).is_none());
    }

    #[test]
    fn test_weekly_peak_tie_resolves_to_earlier_date() {
        // ---
        // Tuesday and Thursday of the same week, given latest first.
        let rows = vec![
            daily(d(2025, 6, 5), 10.0),
            daily(d(2025, 6, 3), 10.0),
            daily(d(2025, 6, 4), 7.5),
        ];
        let weeks = summarize_weeks(&rows);

        assert_eq!(weeks.len(), 1);
        assert_eq!(weeks[0].peak_date, d(2025, 6, 3));
        assert_eq!(weeks[0].peak_energy, 10.0);
        assert_eq!(weeks[0].total_energy, 27.5);
        assert_eq!(weeks[0].day_count, 3);
        // Divides by the three days present, not seven.
        assert_eq!(weeks[0].avg_daily_energy, 9.17);
    }

    #[test]
    fn test_weeks_split_on_iso_boundary() {
        // ---
        let rows = vec![
            daily(d(2025, 12, 28), 1.0),
            daily(d(2025, 12, 29), 2.0),
            daily(d(2026, 1, 4), 3.0),
        ];
        let weeks = summarize_weeks(&rows);

        assert_eq!(weeks.len(), 2);
        assert_eq!((weeks[0].year, weeks[0].week), (2025, 52));
        assert_eq!((weeks[1].year, weeks[1].week), (2026, 1));
        assert_eq!(weeks[1].total_energy, 5.0);
    }

    #[test]
    fn test_monthly_paths_agree_on_complete_weeks() {
        // ---
        // 2025-09-01 is a Monday; four full weeks end on 2025-09-28.
        let mut rows = Vec::new();
        let mut date = d(2025, 9, 1);
        let mut i = 0u32;
        while date <= d(2025, 9, 28) {
            rows.push(daily(date, round2(3.0 + (i % 5) as f64 * 0.37)));
            date = date.succ_opt().unwrap();
            i += 1;
        }

        let direct = summarize_months_from_daily(&rows);
        let weekly: Vec<WeeklyRecord> = summarize_weeks(&rows)
            .into_iter()
            .map(|w| WeeklyRecord {
                id: 0,
                year: w.year,
                week: w.week,
                total_energy: w.total_energy,
                avg_daily_energy: w.avg_daily_energy,
                peak_date: w.peak_date,
                peak_energy: w.peak_energy,
                day_count: w.day_count,
                created_at: Utc::now(),
            })
            .collect();
        let via_weeks = summarize_months_from_weekly(&weekly);

        assert_eq!(direct.len(), 1);
        assert_eq!(via_weeks.len(), 1);
        assert!((direct[0].total_energy - via_weeks[0].total_energy).abs() <= 0.01);
        assert_eq!(direct[0].day_count, via_weeks[0].day_count);
        assert_eq!(direct[0].avg_daily_energy, via_weeks[0].avg_daily_energy);
        assert_eq!(direct[0].peak_date, via_weeks[0].peak_date);
    }

    #[test]
    fn test_week_attributed_to_month_of_monday() {
        // ---
        // 2026-W01 runs 2025-12-29 .. 2026-01-04.
        let week = WeeklyRecord {
            id: 1,
            year: 2026,
            week: 1,
            total_energy: 14.0,
            avg_daily_energy: 2.0,
            peak_date: d(2026, 1, 2),
            peak_energy: 3.0,
            day_count: 7,
            created_at: Utc::now(),
        };
        let months = summarize_months_from_weekly(&[week.clone()]);
        assert_eq!((months[0].year, months[0].month), (2025, 12));

        let bogus = WeeklyRecord { week: 60, ..week };
        assert!(summarize_months_from_weekly(&[bogus]).is_empty());
    }

    #[tokio::test]
    async fn daily_rollup_is_idempotent() {
        // ---
        let store = Arc::new(MemoryStore::new());
        for hour in 0..4 {
            insert_hour(
                store.as_ref(),
                Utc.with_ymd_and_hms(2025, 6, 2, hour, 30, 0).unwrap(),
                0.0125,
            )
            .await;
        }
        // Next day's data must not leak in.
        insert_hour(
            store.as_ref(),
            Utc.with_ymd_and_hms(2025, 6, 3, 0, 0, 0).unwrap(),
            9.0,
        )
        .await;

        let engine = RollupEngine::new(store.clone());
        let first = engine.daily_for_date(d(2025, 6, 2)).await.unwrap();
        let row_a = store.all_daily().await.unwrap();
        let second = engine.daily_for_date(d(2025, 6, 2)).await.unwrap();
        let row_b = store.all_daily().await.unwrap();

        assert_eq!(first.records_written, 1);
        assert_eq!(second.records_written, 1);
        assert_eq!(row_a, row_b);
        assert_eq!(row_b.len(), 1);
        assert_eq!(row_b[0].total_energy, 0.05);
    }

    #[tokio::test]
    async fn empty_period_is_a_no_op() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let engine = RollupEngine::new(store.clone());

        let weekly = engine
            .weekly_for(WeekKey::new(2025, 20).unwrap())
            .await
            .unwrap();
        assert_eq!(weekly.groups, 0);
        assert_eq!(weekly.records_written, 0);

        let daily = engine.daily_for_date(d(2025, 5, 1)).await.unwrap();
        assert_eq!(daily.records_written, 0);
        assert_eq!(store.count(Tier::Weekly).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn catch_up_only_fills_missing_dates() {
        // ---
        let store = Arc::new(MemoryStore::new());
        for day in [1, 2, 3] {
            insert_hour(
                store.as_ref(),
                Utc.with_ymd_and_hms(2025, 7, day, 12, 0, 0).unwrap(),
                1.0,
            )
            .await;
        }
        let engine = RollupEngine::new(store.clone());
        engine.daily_for_date(d(2025, 7, 2)).await.unwrap();

        let summary = engine.daily_catch_up().await.unwrap();
        assert_eq!(summary.records_written, 2);
        assert_eq!(store.count(Tier::Daily).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn catch_up_skips_every_rolled_up_date_over_a_long_history() {
        // ---
        let store = Arc::new(MemoryStore::new());
        let first = d(2024, 1, 1);
        for offset in 0..120 {
            let date = first + Days::new(offset);
            insert_hour(store.as_ref(), date.and_hms_opt(8, 0, 0).unwrap().and_utc(), 0.5).await;
        }
        let engine = RollupEngine::new(store.clone());
        for offset in (0..120).step_by(2) {
            engine.daily_for_date(first + Days::new(offset)).await.unwrap();
        }

        let summary = engine.daily_catch_up().await.unwrap();
        assert_eq!((summary.groups, summary.records_written), (60, 60));
        assert_eq!(store.count(Tier::Daily).await.unwrap(), 120);

        let again = engine.daily_catch_up().await.unwrap();
        assert_eq!(again.groups, 0);
    }

    #[tokio::test]
    async fn monthly_from_weekly_picks_weeks_by_monday() {
        // ---
        let store = Arc::new(MemoryStore::new());
        // Dec 29 2025 .. Jan 4 2026 is one ISO week attributed to December.
        let mut date = d(2025, 12, 22);
        while date <= d(2026, 1, 11) {
            store
                .upsert_daily(&DailySummary {
                    date,
                    total_energy: 2.0,
                    avg_energy: 0.0,
                    max_energy: 0.0,
                    min_energy: 0.0,
                })
                .await
                .unwrap();
            date = date.succ_opt().unwrap();
        }
        let engine = RollupEngine::new(store.clone());
        engine.weekly_all().await.unwrap();

        let dec = engine
            .monthly_from_weekly(MonthKey::new(2025, 12).unwrap())
            .await
            .unwrap();
        assert_eq!(dec.records_written, 1);

        let months = store.recent_monthly(12).await.unwrap();
        assert_eq!(months.len(), 1);
        assert_eq!(months[0].total_energy, 28.0);
        assert_eq!(months[0].day_count, 14);
        assert_eq!(months[0].peak_date, d(2025, 12, 22));
    }

    // ---

    #[tokio::test]
    async fn one_failing_group_does_not_abort_the_batch() {
        // ---
        let store = Arc::new(FaultyStore::failing_week(2025, 24));
        // Three consecutive ISO weeks: 2025-W23, W24, W25.
        let mut date = d(2025, 6, 2);
        while date <= d(2025, 6, 22) {
            store
                .upsert_daily(&DailySummary {
                    date,
                    total_energy: 1.0,
                    avg_energy: 0.0,
                    max_energy: 0.0,
                    min_energy: 0.0,
                })
                .await
                .unwrap();
            date = date.succ_opt().unwrap();
        }

        let engine = RollupEngine::new(store.clone());
        let summary = engine.weekly_all().await.unwrap();

        assert_eq!(summary.groups, 3);
        assert_eq!(summary.records_written, 2);
        assert_eq!(summary.failed, 1);
        let weeks: Vec<i32> = store
            .all_weekly()
            .await
            .unwrap()
            .iter()
            .map(|w| w.week)
            .collect();
        assert_eq!(weeks, vec![23, 25]);
    }
}
