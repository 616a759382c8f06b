//! Configuration loader for the `powermeter-rollup` service.
//!
//! All runtime configuration is read here from environment variables (with
//! optional `.env` support provided by the caller), so no other module calls
//! `env::var`. Invalid values are reported instead of silently replaced by a
//! default.
//!
use std::env;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};

use crate::alerts::AlertConfig;
use crate::mqtt::MqttSettings;

/// Parse an optional numeric environment variable with a default value.
macro_rules! parse_env {
    ($var_name:expr, $ty:ty, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse an optional boolean environment variable (`true/false/1/0/yes/no`).
macro_rules! parse_env_bool {
    ($var_name:expr, $default:expr) => {
        match env::var($var_name).ok().map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            None => $default,
            Some("1") | Some("true") | Some("yes") | Some("on") => true,
            Some("0") | Some("false") | Some("no") | Some("off") => false,
            Some(other) => bail!("Invalid {}: '{}' is not a boolean", $var_name, other),
        }
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Optional string variable; empty counts as unset.
fn optional_env(var_name: &str) -> Option<String> {
    env::var(var_name).ok().filter(|v| !v.trim().is_empty())
}

/// Strongly typed application configuration.
///
/// Immutable after loading.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    pub http_port: u16,

    pub mqtt_enabled: bool,
    pub mqtt_broker: String,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_topic: String,
    pub mqtt_topic_control: String,
    pub mqtt_topic_reboot: String,
    pub mqtt_qos: u8,
    pub mqtt_keep_alive_secs: u64,
    pub mqtt_reconnect_secs: u64,

    /// Flush period in milliseconds.
    pub batch_interval_ms: u64,

    /// Final flush at shutdown; `false` discards pending samples.
    pub flush_on_shutdown: bool,

    pub rollup_schedule_enabled: bool,

    pub alert_weeks: i64,
    pub alert_high_multiplier: f64,
    pub alert_low_multiplier: f64,
    pub alert_daily_multiplier: f64,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string
///
/// Optional:
/// - `DB_POOL_MAX` (5), `HTTP_PORT` (8080)
/// - `MQTT_ENABLED` (true), `MQTT_BROKER` (`tcp://test.mosquitto.org:1883`),
///   `MQTT_USERNAME`, `MQTT_PASSWORD`, `MQTT_TOPIC_DATA` (`iot/power`),
///   `MQTT_QOS` (1), `MQTT_KEEP_ALIVE_SECS` (30), `MQTT_RECONNECT_SECS` (5)
/// - `MQTT_BATCH_INTERVAL` – flush period in ms (60000)
/// - `FLUSH_ON_SHUTDOWN` (true), `ROLLUP_SCHEDULE_ENABLED` (true)
/// - `ALERT_WEEKS` (10), `ALERT_HIGH_MULTIPLIER` (1.05),
///   `ALERT_LOW_MULTIPLIER` (0.90), `ALERT_DAILY_MULTIPLIER` (1.10)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let defaults = AlertConfig::default();

    let cfg = Config {
        db_url: require_env!("DATABASE_URL"),
        db_pool_max: parse_env!("DB_POOL_MAX", u32, 5),
        http_port: parse_env!("HTTP_PORT", u16, 8080),
        mqtt_enabled: parse_env_bool!("MQTT_ENABLED", true),
        mqtt_broker: optional_env("MQTT_BROKER")
            .unwrap_or_else(|| "tcp://test.mosquitto.org:1883".into()),
        mqtt_username: optional_env("MQTT_USERNAME"),
        mqtt_password: optional_env("MQTT_PASSWORD"),
        mqtt_topic: optional_env("MQTT_TOPIC_DATA").unwrap_or_else(|| "iot/power".into()),
        mqtt_topic_control: optional_env("MQTT_TOPIC_CONTROL")
            .unwrap_or_else(|| "iot/power/control".into()),
        mqtt_topic_reboot: optional_env("MQTT_TOPIC_REBOOT")
            .unwrap_or_else(|| "iot/power/reboot".into()),
        mqtt_qos: parse_env!("MQTT_QOS", u8, 1),
        mqtt_keep_alive_secs: parse_env!("MQTT_KEEP_ALIVE_SECS", u64, 30),
        mqtt_reconnect_secs: parse_env!("MQTT_RECONNECT_SECS", u64, 5),
        batch_interval_ms: parse_env!("MQTT_BATCH_INTERVAL", u64, 60_000),
        flush_on_shutdown: parse_env_bool!("FLUSH_ON_SHUTDOWN", true),
        rollup_schedule_enabled: parse_env_bool!("ROLLUP_SCHEDULE_ENABLED", true),
        alert_weeks: parse_env!("ALERT_WEEKS", i64, defaults.weeks),
        alert_high_multiplier: parse_env!("ALERT_HIGH_MULTIPLIER", f64, defaults.high_multiplier),
        alert_low_multiplier: parse_env!("ALERT_LOW_MULTIPLIER", f64, defaults.low_multiplier),
        alert_daily_multiplier: parse_env!(
            "ALERT_DAILY_MULTIPLIER",
            f64,
            defaults.daily_multiplier
        ),
    };

    if cfg.mqtt_qos > 2 {
        bail!("Invalid MQTT_QOS: {} (expected 0, 1 or 2)", cfg.mqtt_qos);
    }
    if cfg.batch_interval_ms == 0 {
        bail!("Invalid MQTT_BATCH_INTERVAL: must be greater than 0");
    }
    if cfg.alert_weeks < 1 {
        bail!("Invalid ALERT_WEEKS: must be at least 1");
    }
    Ok(cfg)
}

impl Config {
    // ---
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    pub fn alert_config(&self) -> AlertConfig {
        // ---
        AlertConfig {
            weeks: self.alert_weeks,
            high_multiplier: self.alert_high_multiplier,
            low_multiplier: self.alert_low_multiplier,
            daily_multiplier: self.alert_daily_multiplier,
        }
    }

    pub fn mqtt_settings(&self) -> MqttSettings {
        // ---
        MqttSettings {
            broker: self.mqtt_broker.clone(),
            username: self.mqtt_username.clone(),
            password: self.mqtt_password.clone(),
            topic: self.mqtt_topic.clone(),
            control_topic: self.mqtt_topic_control.clone(),
            reboot_topic: self.mqtt_topic_reboot.clone(),
            qos: self.mqtt_qos,
            keep_alive: Duration::from_secs(self.mqtt_keep_alive_secs),
            reconnect_delay: Duration::from_secs(self.mqtt_reconnect_secs),
        }
    }

    /// Database URL with the password replaced by `****`.
    pub fn masked_db_url(&self) -> String {
        // ---
        let Some(at_pos) = self.db_url.rfind('@') else {
            return self.db_url.clone();
        };
        // The password sits between the first ':' after the scheme and '@'
        let userinfo_start = self.db_url.find("://").map_or(0, |i| i + 3);
        let colon = self
            .db_url
            .get(userinfo_start..at_pos)
            .and_then(|userinfo| userinfo.find(':'));

        match colon {
            Some(rel) => format!(
                "{}:****{}",
                &self.db_url[..userinfo_start + rel],
                &self.db_url[at_pos..]
            ),
            None => self.db_url.clone(),
        }
    }

    /// Log the loaded configuration with passwords masked.
    pub fn log_config(&self) {
        // ---
        let mqtt_password = self.mqtt_password.as_ref().map(|_| "****");

        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL            : {}", self.masked_db_url());
        tracing::info!("  DB_POOL_MAX             : {}", self.db_pool_max);
        tracing::info!("  HTTP_PORT               : {}", self.http_port);
        tracing::info!("  MQTT_ENABLED            : {}", self.mqtt_enabled);
        tracing::info!("  MQTT_BROKER             : {}", self.mqtt_broker);
        tracing::info!("  MQTT_USERNAME           : {:?}", self.mqtt_username);
        tracing::info!("  MQTT_PASSWORD           : {:?}", mqtt_password);
        tracing::info!("  MQTT_TOPIC_DATA         : {}", self.mqtt_topic);
        tracing::info!("  MQTT_TOPIC_CONTROL      : {}", self.mqtt_topic_control);
        tracing::info!("  MQTT_TOPIC_REBOOT       : {}", self.mqtt_topic_reboot);
        tracing::info!("  MQTT_QOS                : {}", self.mqtt_qos);
        tracing::info!("  MQTT_KEEP_ALIVE_SECS    : {}", self.mqtt_keep_alive_secs);
        tracing::info!("  MQTT_RECONNECT_SECS     : {}", self.mqtt_reconnect_secs);
        tracing::info!("  MQTT_BATCH_INTERVAL     : {} ms", self.batch_interval_ms);
        tracing::info!("  FLUSH_ON_SHUTDOWN       : {}", self.flush_on_shutdown);
        tracing::info!("  ROLLUP_SCHEDULE_ENABLED : {}", self.rollup_schedule_enabled);
        tracing::info!("  ALERT_WEEKS             : {}", self.alert_weeks);
        tracing::info!("  ALERT_HIGH_MULTIPLIER   : {}", self.alert_high_multiplier);
        tracing::info!("  ALERT_LOW_MULTIPLIER    : {}", self.alert_low_multiplier);
        tracing::info!("  ALERT_DAILY_MULTIPLIER  : {}", self.alert_daily_multiplier);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "DATABASE_URL",
        "HTTP_PORT",
        "MQTT_ENABLED",
        "MQTT_BROKER",
        "MQTT_PASSWORD",
        "MQTT_QOS",
        "MQTT_TOPIC_CONTROL",
        "MQTT_BATCH_INTERVAL",
        "FLUSH_ON_SHUTDOWN",
        "ALERT_HIGH_MULTIPLIER",
    ];

    fn reset() {
        for v in VARS {
            env::remove_var(v);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        // ---
        reset();
        env::set_var("DATABASE_URL", "postgres://meter:pw@localhost/energy");
        let cfg = load_from_env().unwrap();

        assert_eq!(cfg.http_port, 8080);
        assert!(cfg.mqtt_enabled);
        assert_eq!(cfg.mqtt_broker, "tcp://test.mosquitto.org:1883");
        assert_eq!(cfg.mqtt_topic, "iot/power");
        assert_eq!(cfg.mqtt_topic_control, "iot/power/control");
        assert_eq!(cfg.mqtt_topic_reboot, "iot/power/reboot");
        assert_eq!(cfg.flush_interval(), Duration::from_secs(60));
        assert!(cfg.flush_on_shutdown);
        assert_eq!(cfg.alert_config(), AlertConfig::default());
        reset();
    }

    #[test]
    #[serial]
    fn test_missing_database_url() {
        reset();
        assert!(load_from_env().is_err());
    }

    #[test]
    #[serial]
    fn test_invalid_values_are_errors() {
        // ---
        reset();
        env::set_var("DATABASE_URL", "postgres://localhost/energy");

        env::set_var("MQTT_BATCH_INTERVAL", "soon");
        assert!(load_from_env().is_err());
        env::remove_var("MQTT_BATCH_INTERVAL");

        env::set_var("FLUSH_ON_SHUTDOWN", "maybe");
        assert!(load_from_env().is_err());
        env::set_var("FLUSH_ON_SHUTDOWN", "no");
        assert!(!load_from_env().unwrap().flush_on_shutdown);

        env::set_var("MQTT_QOS", "3");
        assert!(load_from_env().is_err());
        reset();
    }

    #[test]
    #[serial]
    fn test_overrides() {
        // ---
        reset();
        env::set_var("DATABASE_URL", "postgres://localhost/energy");
        env::set_var("MQTT_ENABLED", "false");
        env::set_var("MQTT_BATCH_INTERVAL", "1500");
        env::set_var("ALERT_HIGH_MULTIPLIER", "1.2");
        env::set_var("MQTT_TOPIC_CONTROL", "site-7/relay");
        let cfg = load_from_env().unwrap();

        assert!(!cfg.mqtt_enabled);
        assert_eq!(cfg.mqtt_settings().control_topic, "site-7/relay");
        assert_eq!(cfg.mqtt_settings().reboot_topic, "iot/power/reboot");
        assert_eq!(cfg.flush_interval(), Duration::from_millis(1500));
        assert_eq!(cfg.alert_config().high_multiplier, 1.2);
        reset();
    }

    #[test]
    #[serial]
    fn test_password_masking() {
        // ---
        reset();
        env::set_var("DATABASE_URL", "postgres://meter:hunter2@db:5432/energy");
        let cfg = load_from_env().unwrap();
        assert_eq!(cfg.masked_db_url(), "postgres://meter:****@db:5432/energy");

        env::set_var("DATABASE_URL", "postgres://db:5432/energy");
        let cfg = load_from_env().unwrap();
        assert_eq!(cfg.masked_db_url(), "postgres://db:5432/energy");

        env::set_var("DATABASE_URL", "postgres://meter@db/energy");
        let cfg = load_from_env().unwrap();
        assert_eq!(cfg.masked_db_url(), "postgres://meter@db/energy");
        reset();
    }
}
