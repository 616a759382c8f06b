//! Rollup cadences and on-demand entry points.
//!
//! Scheduled runs infer their period from the UTC clock (yesterday, last ISO
//! week, last month). Manual runs take the period explicitly. The monthly job
//! reads daily rows, so it has no ordering dependency on the weekly job;
//! callers of the weekly-based monthly path must run the weekly rollups for
//! that month first.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, Utc, Weekday};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::Result;
use crate::period::{last_month, last_week, yesterday, MonthKey, WeekKey};
use crate::rollup::{RollupEngine, RollupSummary};

// ---

/// Wall-clock recurrence in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Daily { at: NaiveTime },
    Weekly { weekday: Weekday, at: NaiveTime },
    /// `day` is clamped to 1..=28 so every month has it.
    Monthly { day: u32, at: NaiveTime },
}

impl Cadence {
    // ---
    /// First firing strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        // ---
        let today = now.date_naive();
        match *self {
            Cadence::Daily { at } => {
                let candidate = today.and_time(at).and_utc();
                if candidate > now {
                    candidate
                } else {
                    (today + Days::new(1)).and_time(at).and_utc()
                }
            }
            Cadence::Weekly { weekday, at } => {
                let ahead = (7 + weekday.num_days_from_monday()
                    - today.weekday().num_days_from_monday())
                    % 7;
                let candidate = (today + Days::new(ahead as u64)).and_time(at).and_utc();
                if candidate > now {
                    candidate
                } else {
                    candidate + chrono::Duration::days(7)
                }
            }
            Cadence::Monthly { day, at } => {
                let day = day.clamp(1, 28);
                let this_month = today.with_day(day).unwrap_or(today);
                let candidate = this_month.and_time(at).and_utc();
                if candidate > now {
                    candidate
                } else {
                    (this_month + Months::new(1)).and_time(at).and_utc()
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollupJob {
    Daily,
    Weekly,
    Monthly,
}

impl RollupJob {
    /// 00:01 daily, Monday 00:05, the 1st at 00:10.
    pub fn default_cadence(&self) -> Cadence {
        // ---
        let at = |minute| NaiveTime::from_hms_opt(0, minute, 0).unwrap_or(NaiveTime::MIN);
        match self {
            RollupJob::Daily => Cadence::Daily { at: at(1) },
            RollupJob::Weekly => Cadence::Weekly {
                weekday: Weekday::Mon,
                at: at(5),
            },
            RollupJob::Monthly => Cadence::Monthly { day: 1, at: at(10) },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RollupJob::Daily => "daily",
            RollupJob::Weekly => "weekly",
            RollupJob::Monthly => "monthly",
        }
    }
}

// ---

pub struct ScheduleCoordinator {
    engine: RollupEngine,
}

impl ScheduleCoordinator {
    // ---
    pub fn new(engine: RollupEngine) -> Self {
        Self { engine }
    }

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    /// Daily rollup for `date`, or yesterday.
    pub async fn run_daily(&self, date: Option<NaiveDate>) -> Result<RollupSummary> {
        // ---
        let date = date.unwrap_or_else(|| yesterday(Self::today()));
        self.engine.daily_for_date(date).await
    }

    pub async fn run_daily_catch_up(&self) -> Result<RollupSummary> {
        self.engine.daily_catch_up().await
    }

    /// Weekly rollup for `week`, or the last complete ISO week.
    pub async fn run_weekly(&self, week: Option<WeekKey>) -> Result<RollupSummary> {
        // ---
        let week = week.unwrap_or_else(|| last_week(Self::today()));
        self.engine.weekly_for(week).await
    }

    pub async fn run_weekly_all(&self) -> Result<RollupSummary> {
        self.engine.weekly_all().await
    }

    /// Monthly rollup for `month`, or last month.
    pub async fn run_monthly(
        &self,
        month: Option<MonthKey>,
        from_weekly: bool,
    ) -> Result<RollupSummary> {
        // ---
        let month = month.unwrap_or_else(|| last_month(Self::today()));
        if from_weekly {
            self.engine.monthly_from_weekly(month).await
        } else {
            self.engine.monthly_from_daily(month).await
        }
    }

    pub async fn run_monthly_all(&self, from_weekly: bool) -> Result<RollupSummary> {
        // ---
        if from_weekly {
            self.engine.monthly_from_weekly_all().await
        } else {
            self.engine.monthly_from_daily_all().await
        }
    }

    /// Daily, then weekly, then monthly, one after another. Stops at the
    /// first tier whose source read fails.
    pub async fn run_all(&self) -> Result<Vec<RollupSummary>> {
        // ---
        info!("Running all rollups");
        let daily = self.run_daily(None).await?;
        let weekly = self.run_weekly(None).await?;
        let monthly = self.run_monthly(None, false).await?;
        info!("All rollups completed");
        Ok(vec![daily, weekly, monthly])
    }

    async fn run_scheduled(&self, job: RollupJob) {
        // ---
        let result = match job {
            RollupJob::Daily => self.run_daily(None).await,
            RollupJob::Weekly => self.run_weekly(None).await,
            RollupJob::Monthly => self.run_monthly(None, false).await,
        };
        match result {
            Ok(s) => info!(
                job = job.name(),
                written = s.records_written,
                failed = s.failed,
                "Scheduled rollup finished"
            ),
            // The next cadence is the retry.
            Err(e) => error!("Scheduled {} rollup failed: {}", job.name(), e),
        }
    }

    /// One task per job, each sleeping until its next firing.
    ///
    /// A job's body completes before its next firing is computed, so runs of
    /// the same job never overlap.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        // ---
        [RollupJob::Daily, RollupJob::Weekly, RollupJob::Monthly]
            .into_iter()
            .map(|job| {
                let this = Arc::clone(&self);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { this.job_loop(job, job.default_cadence(), shutdown).await })
            })
            .collect()
    }

    async fn job_loop(&self, job: RollupJob, cadence: Cadence, mut shutdown: watch::Receiver<bool>) {
        // ---
        loop {
            let now = Utc::now();
            let next = cadence.next_after(now);
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            info!("Next {} rollup at {}", job.name(), next);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    self.run_scheduled(job).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("{} rollup schedule stopped", job.name());
    }
}
