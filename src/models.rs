//! Data models for the power-meter pipeline.
//!
//! Inbound payloads are parsed into [`RawPowerPayload`] and defaulted into a
//! [`Sample`] at the boundary. Persisted tiers are the four record types; the
//! rollup engine produces the `*Summary` shapes and the store turns them into
//! records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::AppError;

/// Substituted when a payload carries no voltage.
pub const DEFAULT_VOLTAGE: f64 = 220.0;
/// Substituted when a payload carries no power factor.
pub const DEFAULT_POWER_FACTOR: f64 = 0.95;
/// Substituted when a payload carries no grid frequency.
pub const DEFAULT_FREQUENCY: f64 = 50.0;

// ---

/// Round half away from zero to `places` decimals.
pub fn round_to(value: f64, places: i32) -> f64 {
    // ---
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Precision for energy totals, voltage, current and power factor.
pub fn round2(value: f64) -> f64 {
    round_to(value, 2)
}

/// Precision for sub-unit energy (per-window kWh, per-hour averages).
pub fn round4(value: f64) -> f64 {
    round_to(value, 4)
}

// ---

/// Telemetry message as delivered by the transport.
///
/// Every field is optional. Besides the canonical names, the camelCase keys
/// and the meter firmware's legacy keys are read into their own fields, so a
/// message carrying two spellings of one value is still accepted; the
/// accessors prefer the canonical key. Numbers may arrive as strings.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawPowerPayload {
    // ---
    #[serde(default, deserialize_with = "lenient_f64")]
    pub voltage: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub tegangan: Option<f64>,

    #[serde(default, deserialize_with = "lenient_f64")]
    pub current: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub arus: Option<f64>,

    #[serde(default, deserialize_with = "lenient_f64")]
    pub power_factor: Option<f64>,
    #[serde(default, rename = "powerFactor", deserialize_with = "lenient_f64")]
    pub power_factor_camel: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub pf: Option<f64>,

    #[serde(default, deserialize_with = "lenient_f64")]
    pub energy_kwh: Option<f64>,
    #[serde(default, rename = "energyKwh", deserialize_with = "lenient_f64")]
    pub energy_kwh_camel: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub energi_kwh: Option<f64>,

    #[serde(default, deserialize_with = "lenient_f64")]
    pub frequency: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub frekuensi: Option<f64>,

    #[serde(default, deserialize_with = "lenient_f64")]
    pub power_watts: Option<f64>,
    #[serde(default, rename = "powerWatts", deserialize_with = "lenient_f64")]
    pub power_watts_camel: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub daya_watt: Option<f64>,
}

fn lenient_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    // ---
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Number(f64),
        Text(String),
    }

    let value = match Option::<NumberOrText>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(NumberOrText::Number(n)) => n,
        Some(NumberOrText::Text(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            trimmed.parse::<f64>().map_err(serde::de::Error::custom)?
        }
    };

    if value.is_finite() {
        Ok(Some(value))
    } else {
        Err(serde::de::Error::custom("non-finite telemetry value"))
    }
}

impl RawPowerPayload {
    // ---
    /// Decode a transport message body.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, AppError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn voltage(&self) -> Option<f64> {
        self.voltage.or(self.tegangan)
    }

    pub fn current(&self) -> Option<f64> {
        self.current.or(self.arus)
    }

    pub fn power_factor(&self) -> Option<f64> {
        self.power_factor.or(self.power_factor_camel).or(self.pf)
    }

    pub fn energy_kwh(&self) -> Option<f64> {
        self.energy_kwh.or(self.energy_kwh_camel).or(self.energi_kwh)
    }

    pub fn frequency(&self) -> Option<f64> {
        self.frequency.or(self.frekuensi)
    }

    pub fn power_watts(&self) -> Option<f64> {
        self.power_watts.or(self.power_watts_camel).or(self.daya_watt)
    }

    /// Apply default substitutions and derive instantaneous power.
    pub fn to_sample(&self, captured_at: DateTime<Utc>) -> Sample {
        // ---
        let voltage = self.voltage().unwrap_or(DEFAULT_VOLTAGE);
        let current = self.current().unwrap_or(0.0);
        let power_factor = self.power_factor().unwrap_or(DEFAULT_POWER_FACTOR);
        let power_watts = self
            .power_watts()
            .unwrap_or_else(|| round2(voltage * current * power_factor));

        Sample {
            voltage,
            current,
            power_factor,
            power_watts,
            energy_kwh: self.energy_kwh(),
            frequency: self.frequency().unwrap_or(DEFAULT_FREQUENCY),
            captured_at,
        }
    }
}

/// One buffered reading. Lives only between flushes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    // ---
    pub voltage: f64,
    pub current: f64,
    pub power_factor: f64,
    pub power_watts: f64,
    /// `None` when the meter did not report energy; the flush derives it from power.
    pub energy_kwh: Option<f64>,
    pub frequency: f64,
    pub captured_at: DateTime<Utc>,
}

/// Field-wise mean of one drained buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AveragedSample {
    // ---
    pub sample_count: usize,
    pub voltage: f64,
    pub current: f64,
    pub power_factor: f64,
    pub power_watts: f64,
    /// Mean over the samples that reported energy, `None` if none did.
    pub energy_kwh: Option<f64>,
    pub frequency: f64,
    pub first_captured_at: DateTime<Utc>,
    pub last_captured_at: DateTime<Utc>,
}

impl AveragedSample {
    // ---
    /// Returns `None` for an empty slice.
    pub fn from_samples(samples: &[Sample]) -> Option<Self> {
        // ---
        let first = samples.first()?;
        let count = samples.len() as f64;

        let mut voltage = 0.0;
        let mut current = 0.0;
        let mut power_factor = 0.0;
        let mut power_watts = 0.0;
        let mut frequency = 0.0;
        let mut energy_sum = 0.0;
        let mut energy_count = 0usize;
        let mut first_captured_at = first.captured_at;
        let mut last_captured_at = first.captured_at;

        for s in samples {
            voltage += s.voltage;
            current += s.current;
            power_factor += s.power_factor;
            power_watts += s.power_watts;
            frequency += s.frequency;
            if let Some(e) = s.energy_kwh {
                energy_sum += e;
                energy_count += 1;
            }
            first_captured_at = first_captured_at.min(s.captured_at);
            last_captured_at = last_captured_at.max(s.captured_at);
        }

        Some(AveragedSample {
            sample_count: samples.len(),
            voltage: round2(voltage / count),
            current: round2(current / count),
            power_factor: round2(power_factor / count),
            power_watts: round2(power_watts / count),
            energy_kwh: (energy_count > 0).then(|| round4(energy_sum / energy_count as f64)),
            frequency: round2(frequency / count),
            first_captured_at,
            last_captured_at,
        })
    }
}

// ---

/// Fields written by a flush; the store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewHourlyRecord {
    // ---
    pub timestamp_hour: DateTime<Utc>,
    pub energy_kwh: f64,
    pub voltage: f64,
    pub current: f64,
    pub power_factor: f64,
}

/// One averaged flush window. Never mutated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct HourlyRecord {
    // ---
    pub id: i64,
    pub timestamp_hour: DateTime<Utc>,
    pub energy_kwh: f64,
    pub voltage: f64,
    pub current: f64,
    pub power_factor: f64,
    pub created_at: DateTime<Utc>,
}

impl HourlyRecord {
    /// Calendar date (UTC) this record rolls up into.
    pub fn date(&self) -> NaiveDate {
        self.timestamp_hour.date_naive()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DailyRecord {
    // ---
    pub id: i64,
    pub date: NaiveDate,
    pub total_energy: f64,
    pub avg_energy: f64,
    pub max_energy: f64,
    pub min_energy: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct WeeklyRecord {
    // ---
    pub id: i64,
    /// ISO week-numbering year, which differs from the calendar year near January 1.
    pub year: i32,
    pub week: i32,
    pub total_energy: f64,
    pub avg_daily_energy: f64,
    pub peak_date: NaiveDate,
    pub peak_energy: f64,
    pub day_count: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MonthlyRecord {
    // ---
    pub id: i64,
    pub year: i32,
    pub month: i32,
    pub total_energy: f64,
    pub avg_daily_energy: f64,
    pub peak_date: NaiveDate,
    pub peak_energy: f64,
    pub day_count: i32,
    pub created_at: DateTime<Utc>,
}

// ---

/// Derived values for one date, ready to upsert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailySummary {
    // ---
    pub date: NaiveDate,
    pub total_energy: f64,
    pub avg_energy: f64,
    pub max_energy: f64,
    pub min_energy: f64,
}

/// Derived values for one ISO week, ready to upsert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklySummary {
    // ---
    pub year: i32,
    pub week: i32,
    pub total_energy: f64,
    pub avg_daily_energy: f64,
    pub peak_date: NaiveDate,
    pub peak_energy: f64,
    pub day_count: i32,
}

/// Derived values for one calendar month, ready to upsert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlySummary {
    // ---
    pub year: i32,
    pub month: i32,
    pub total_energy: f64,
    pub avg_daily_energy: f64,
    pub peak_date: NaiveDate,
    pub peak_energy: f64,
    pub day_count: i32,
}

// ---

/// One granularity level of the rollup hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Hourly, Tier::Daily, Tier::Weekly, Tier::Monthly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Hourly => "hourly",
            Tier::Daily => "daily",
            Tier::Weekly => "weekly",
            Tier::Monthly => "monthly",
        }
    }

    /// Backing table name.
    pub fn table(&self) -> &'static str {
        match self {
            Tier::Hourly => "hourly_energy",
            Tier::Daily => "daily_energy",
            Tier::Weekly => "weekly_energy",
            Tier::Monthly => "monthly_energy",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // ---
        match s.to_ascii_lowercase().as_str() {
            "hourly" => Ok(Tier::Hourly),
            "daily" => Ok(Tier::Daily),
            "weekly" => Ok(Tier::Weekly),
            "monthly" => Ok(Tier::Monthly),
            other => Err(AppError::InvalidInput(format!("unknown tier '{other}'"))),
        }
    }
}
