//! Period keys and calendar arithmetic for the rollup tiers.
//!
//! Weeks follow ISO-8601 exactly: Monday start, week 1 is the week holding the
//! year's first Thursday, and the week-numbering year may differ from the
//! calendar year for a few days around January 1. Every read and write path
//! derives week keys through [`WeekKey::of`], so the unique key of a weekly row
//! is computed one way only.
//!
//! A week is attributed to the calendar month of its Monday.

use std::fmt;

use chrono::{Datelike, Days, NaiveDate, Weekday};
use serde::Serialize;

use crate::error::{AppError, Result};

// ---

/// `(iso_year, iso_week)` key of a weekly row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WeekKey {
    year: i32,
    week: i32,
}

impl WeekKey {
    // ---
    /// Validate an explicit `(iso_year, iso_week)` pair.
    pub fn new(year: i32, week: i32) -> Result<Self> {
        // ---
        let valid = u32::try_from(week)
            .ok()
            .and_then(|w| NaiveDate::from_isoywd_opt(year, w, Weekday::Mon))
            .is_some();
        if valid {
            Ok(WeekKey { year, week })
        } else {
            Err(AppError::InvalidInput(format!(
                "{year}-W{week:02} is not an ISO-8601 week"
            )))
        }
    }

    /// The ISO week containing `date`.
    pub fn of(date: NaiveDate) -> Self {
        // ---
        let iso = date.iso_week();
        WeekKey {
            year: iso.year(),
            week: iso.week() as i32,
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn week(&self) -> i32 {
        self.week
    }

    pub fn monday(&self) -> NaiveDate {
        // Both constructors guarantee the pair exists.
        NaiveDate::from_isoywd_opt(self.year, self.week as u32, Weekday::Mon)
            .unwrap_or(NaiveDate::MIN)
    }

    pub fn sunday(&self) -> NaiveDate {
        self.monday() + Days::new(6)
    }

    /// Calendar month the week is attributed to.
    pub fn month(&self) -> MonthKey {
        MonthKey::of(self.monday())
    }

    pub fn previous(&self) -> Self {
        WeekKey::of(self.monday() - Days::new(7))
    }
}

impl fmt::Display for WeekKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-W{:02}", self.year, self.week)
    }
}

// ---

/// `(year, month)` key of a monthly row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MonthKey {
    year: i32,
    month: i32,
}

impl MonthKey {
    // ---
    pub fn new(year: i32, month: i32) -> Result<Self> {
        // ---
        let valid = u32::try_from(month)
            .ok()
            .and_then(|m| NaiveDate::from_ymd_opt(year, m, 1))
            .is_some();
        if valid {
            Ok(MonthKey { year, month })
        } else {
            Err(AppError::InvalidInput(format!(
                "{year}-{month:02} is not a calendar month"
            )))
        }
    }

    pub fn of(date: NaiveDate) -> Self {
        MonthKey {
            year: date.year(),
            month: date.month() as i32,
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> i32 {
        self.month
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month as u32, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn last_day(&self) -> NaiveDate {
        self.next().first_day() - Days::new(1)
    }

    pub fn next(&self) -> Self {
        // ---
        if self.month == 12 {
            MonthKey {
                year: self.year + 1,
                month: 1,
            }
        } else {
            MonthKey {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn previous(&self) -> Self {
        MonthKey::of(self.first_day() - Days::new(1))
    }

    /// ISO years whose weeks can be attributed to this month.
    ///
    /// Week 1 of next year may start in late December.
    pub fn iso_year_span(&self) -> (i32, i32) {
        (self.year, self.year + 1)
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

// ---

pub fn yesterday(today: NaiveDate) -> NaiveDate {
    today - Days::new(1)
}

/// The complete ISO week before the one containing `today`.
pub fn last_week(today: NaiveDate) -> WeekKey {
    WeekKey::of(today).previous()
}

pub fn last_month(today: NaiveDate) -> MonthKey {
    MonthKey::of(today).previous()
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_iso_week_year_boundaries() {
        // ---
        // Sunday 2021-01-03 still belongs to 2020's last week.
        assert_eq!(WeekKey::of(d(2021, 1, 3)), WeekKey::new(2020, 53).unwrap());
        assert_eq!(WeekKey::of(d(2021, 1, 4)), WeekKey::new(2021, 1).unwrap());
        // Monday 2024-12-30 opens 2025-W01.
        assert_eq!(WeekKey::of(d(2024, 12, 30)), WeekKey::new(2025, 1).unwrap());
        assert_eq!(WeekKey::of(d(2026, 1, 1)), WeekKey::new(2026, 1).unwrap());
        assert_eq!(WeekKey::of(d(2025, 12, 28)), WeekKey::new(2025, 52).unwrap());
    }

    #[test]
    fn test_week_validation() {
        // ---
        assert!(WeekKey::new(2020, 53).is_ok());
        assert!(WeekKey::new(2021, 53).is_err());
        assert!(WeekKey::new(2025, 0).is_err());
        assert!(WeekKey::new(2025, -1).is_err());
    }

    #[test]
    fn test_keys_serialize_as_plain_pairs() {
        // ---
        // Keys are only produced by the validating constructors.
        let week = serde_json::to_value(WeekKey::new(2026, 1).unwrap()).unwrap();
        assert_eq!(week, serde_json::json!({"year": 2026, "week": 1}));
        let month = serde_json::to_value(MonthKey::new(2025, 12).unwrap()).unwrap();
        assert_eq!(month, serde_json::json!({"year": 2025, "month": 12}));
        assert!(MonthKey::new(2025, 0).is_err());
    }

    #[test]
    fn test_week_bounds_and_month_attribution() {
        // ---
        let w = WeekKey::new(2026, 1).unwrap();
        assert_eq!(w.monday(), d(2025, 12, 29));
        assert_eq!(w.sunday(), d(2026, 1, 4));
        assert_eq!(w.month(), MonthKey::new(2025, 12).unwrap());
        assert_eq!(w.to_string(), "2026-W01");
        assert_eq!(w.previous(), WeekKey::new(2025, 52).unwrap());
    }

    #[test]
    fn test_month_of_week_round_trips_away_from_boundaries() {
        // ---
        // Any date at least six days into its month has its week's Monday in
        // the same month.
        let mut date = d(2019, 1, 1);
        while date < d(2031, 1, 1) {
            if date.day() >= 7 {
                assert_eq!(WeekKey::of(date).month(), MonthKey::of(date), "{date}");
            }
            date = date.succ_opt().unwrap();
        }
    }

    #[test]
    fn test_every_date_falls_within_its_week() {
        // ---
        let mut date = d(2024, 12, 1);
        while date < d(2026, 2, 1) {
            let w = WeekKey::of(date);
            assert!(w.monday() <= date && date <= w.sunday(), "{date}");
            assert_eq!(w.monday().weekday(), Weekday::Mon);
            date = date.succ_opt().unwrap();
        }
    }

    #[test]
    fn test_month_bounds() {
        // ---
        let feb = MonthKey::new(2024, 2).unwrap();
        assert_eq!(feb.first_day(), d(2024, 2, 1));
        assert_eq!(feb.last_day(), d(2024, 2, 29));
        assert_eq!(MonthKey::new(2025, 12).unwrap().last_day(), d(2025, 12, 31));
        assert_eq!(MonthKey::new(2026, 1).unwrap().previous().to_string(), "2025-12");
        assert!(MonthKey::new(2025, 13).is_err());
    }

    #[test]
    fn test_relative_periods() {
        // ---
        let today = d(2026, 1, 1);
        assert_eq!(yesterday(today), d(2025, 12, 31));
        assert_eq!(last_week(today), WeekKey::new(2025, 52).unwrap());
        assert_eq!(last_month(today), MonthKey::new(2025, 12).unwrap());

        let monday = d(2025, 10, 6);
        assert_eq!(last_week(monday).monday(), d(2025, 9, 29));
    }
}
