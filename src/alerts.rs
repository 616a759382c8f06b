//! Advisory threshold signals over recent weekly rollups.
//!
//! Read-only: nothing here writes to the store. The running average is taken
//! over the same window of weeks that is evaluated, so every alert compares a
//! week against its neighbours.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;
use crate::models::{round2, WeeklyRecord};
use crate::store::Store;

// ---

/// Multipliers and window size for [`AlertThresholdReader`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertConfig {
    pub weeks: i64,
    pub high_multiplier: f64,
    pub low_multiplier: f64,
    pub daily_multiplier: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            weeks: 10,
            high_multiplier: 1.05,
            low_multiplier: 0.90,
            daily_multiplier: 1.10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    HighConsumption,
    UnusualPattern,
    PeakUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    /// Peak day of the flagged week.
    pub date: NaiveDate,
    pub year: i32,
    pub week: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KindCounts {
    pub high_consumption: usize,
    pub unusual_pattern: usize,
    pub peak_usage: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlertSummary {
    pub total: usize,
    pub critical: usize,
    pub warning: usize,
    pub info: usize,
    pub by_kind: KindCounts,
}

impl AlertSummary {
    pub fn from_alerts(alerts: &[Alert]) -> Self {
        // ---
        let mut s = AlertSummary {
            total: alerts.len(),
            ..Default::default()
        };
        for a in alerts {
            match a.severity {
                Severity::Critical => s.critical += 1,
                Severity::Warning => s.warning += 1,
                Severity::Info => s.info += 1,
            }
            match a.kind {
                AlertKind::HighConsumption => s.by_kind.high_consumption += 1,
                AlertKind::UnusualPattern => s.by_kind.unusual_pattern += 1,
                AlertKind::PeakUsage => s.by_kind.peak_usage += 1,
            }
        }
        s
    }
}

/// Flag weeks against the mean weekly total of `weeks`.
///
/// `weeks` is evaluated in the order given; alerts come out in that order.
pub fn evaluate(weeks: &[WeeklyRecord], cfg: &AlertConfig) -> Vec<Alert> {
    // ---
    if weeks.is_empty() {
        return Vec::new();
    }

    let avg = weeks.iter().map(|w| w.total_energy).sum::<f64>() / weeks.len() as f64;
    let high = avg * cfg.high_multiplier;
    let low = avg * cfg.low_multiplier;
    let daily = avg / 7.0 * cfg.daily_multiplier;
    debug!(avg, high, low, daily, "Alert thresholds");

    let mut alerts = Vec::new();
    for w in weeks {
        let label = format!("{}-W{:02}", w.year, w.week);
        let mut push = |kind, severity, message: String, value, threshold| {
            alerts.push(Alert {
                kind,
                severity,
                message,
                value,
                threshold: round2(threshold),
                date: w.peak_date,
                year: w.year,
                week: w.week,
            })
        };

        if w.total_energy > high {
            push(
                AlertKind::HighConsumption,
                Severity::Warning,
                format!("{label}: high consumption {:.2} kWh (average {:.2} kWh)", w.total_energy, avg),
                w.total_energy,
                high,
            );
        }
        if w.total_energy > 0.0 && w.total_energy < low {
            push(
                AlertKind::UnusualPattern,
                Severity::Info,
                format!("{label}: unusually low consumption {:.2} kWh", w.total_energy),
                w.total_energy,
                low,
            );
        }
        if w.avg_daily_energy > daily {
            push(
                AlertKind::PeakUsage,
                Severity::Critical,
                format!(
                    "{label}: daily usage {:.2} kWh/day above {:.2} kWh/day",
                    w.avg_daily_energy, daily
                ),
                w.avg_daily_energy,
                daily,
            );
        }
    }
    alerts
}

// ---

pub struct AlertThresholdReader {
    store: Arc<dyn Store>,
    config: AlertConfig,
}

impl AlertThresholdReader {
    // ---
    pub fn new(store: Arc<dyn Store>, config: AlertConfig) -> Self {
        Self { store, config }
    }

    /// Alerts for the most recent `config.weeks` weekly rows, oldest first.
    pub async fn alerts(&self) -> Result<Vec<Alert>> {
        // ---
        let weeks = self.store.recent_weekly(self.config.weeks).await?;
        let alerts = evaluate(&weeks, &self.config);
        info!(weeks = weeks.len(), alerts = alerts.len(), "Evaluated weekly alerts");
        Ok(alerts)
    }

    pub async fn summary(&self) -> Result<AlertSummary> {
        Ok(AlertSummary::from_alerts(&self.alerts().await?))
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::WeeklySummary;
    use crate::store::MemoryStore;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn week(n: i32, total: f64, avg_daily: f64) -> WeeklyRecord {
        // ---
        WeeklyRecord {
            id: n as i64,
            year: 2025,
            week: n,
            total_energy: total,
            avg_daily_energy: avg_daily,
            peak_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            peak_energy: 0.0,
            day_count: 7,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_no_weeks_no_alerts() {
        assert!(evaluate(&[], &AlertConfig::default()).is_empty());
    }

    #[test]
    fn test_flat_consumption_raises_nothing() {
        // ---
        let weeks: Vec<_> = (1..=4).map(|n| week(n, 70.0, 10.0)).collect();
        assert!(evaluate(&weeks, &AlertConfig::default()).is_empty());
    }

    #[test]
    fn test_high_low_and_peak_rules() {
        // ---
        // Average 100: high > 105, low < 90, daily > 100/7*1.1 = 15.71
        let weeks = vec![
            week(1, 100.0, 14.0),
            week(2, 120.0, 17.0),
            week(3, 80.0, 11.0),
            week(4, 100.0, 14.0),
        ];
        let alerts = evaluate(&weeks, &AlertConfig::default());

        let kinds: Vec<(i32, AlertKind)> = alerts.iter().map(|a| (a.week, a.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                (2, AlertKind::HighConsumption),
                (2, AlertKind::PeakUsage),
                (3, AlertKind::UnusualPattern),
            ]
        );
        assert_eq!(alerts[0].severity, Severity::Warning);
        assert_eq!(alerts[0].threshold, 105.0);
        assert_eq!(alerts[1].severity, Severity::Critical);
        assert_eq!(alerts[1].threshold, 15.71);
        assert_eq!(alerts[2].severity, Severity::Info);
    }

    #[test]
    fn test_zero_week_is_not_unusual() {
        // ---
        let weeks = vec![week(1, 0.0, 0.0), week(2, 100.0, 14.0)];
        let alerts = evaluate(&weeks, &AlertConfig::default());
        assert!(alerts.iter().all(|a| a.kind != AlertKind::UnusualPattern));
    }

    #[test]
    fn test_summary_counts() {
        // ---
        let weeks = vec![
            week(1, 100.0, 14.0),
            week(2, 120.0, 17.0),
            week(3, 80.0, 11.0),
            week(4, 100.0, 14.0),
        ];
        let summary = AlertSummary::from_alerts(&evaluate(&weeks, &AlertConfig::default()));

        assert_eq!(summary.total, 3);
        assert_eq!((summary.critical, summary.warning, summary.info), (1, 1, 1));
        assert_eq!(summary.by_kind.high_consumption, 1);
    }

    #[tokio::test]
    async fn reader_only_looks_at_recent_weeks() {
        // ---
        let store = Arc::new(MemoryStore::new());
        for (n, total) in [(1, 500.0), (2, 100.0), (3, 100.0)] {
            store
                .upsert_weekly(&WeeklySummary {
                    year: 2025,
                    week: n,
                    total_energy: total,
                    avg_daily_energy: total / 7.0,
                    peak_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                    peak_energy: 0.0,
                    day_count: 7,
                })
                .await
                .unwrap();
        }

        let cfg = AlertConfig {
            weeks: 2,
            ..Default::default()
        };
        let reader = AlertThresholdReader::new(store, cfg);
        assert!(reader.alerts().await.unwrap().is_empty());
        assert_eq!(reader.summary().await.unwrap().total, 0);
    }
}
