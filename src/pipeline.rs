//! The pipeline facade consumed by the transport and the HTTP layer.
//!
//! Owns one [`SampleBuffer`] and wires it to a [`FlushScheduler`], a
//! [`ScheduleCoordinator`] and an [`AlertThresholdReader`] over a shared
//! [`Store`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::alerts::{Alert, AlertConfig, AlertSummary, AlertThresholdReader};
use crate::buffer::{BufferStatus, SampleBuffer};
use crate::coordinator::ScheduleCoordinator;
use crate::error::{AppError, Result};
use crate::flush::{FlushOutcome, FlushScheduler, ShutdownPolicy};
use crate::models::{DailyRecord, HourlyRecord, MonthlyRecord, RawPowerPayload, Tier, WeeklyRecord};
use crate::mqtt::{DeviceCommands, RelayState};
use crate::period::{MonthKey, WeekKey};
use crate::rollup::{RollupEngine, RollupSummary};
use crate::store::Store;

// ---

/// Row counts per tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnergyStats {
    pub hourly: i64,
    pub daily: i64,
    pub weekly: i64,
    pub monthly: i64,
}

/// Which background tasks [`EnergyPipeline::spawn_background`] starts.
#[derive(Debug, Clone, Copy)]
pub struct BackgroundOptions {
    pub shutdown_policy: ShutdownPolicy,
    pub rollup_schedule: bool,
}

pub struct EnergyPipeline {
    buffer: Arc<SampleBuffer>,
    flusher: Arc<FlushScheduler>,
    coordinator: Arc<ScheduleCoordinator>,
    alerts: AlertThresholdReader,
    store: Arc<dyn Store>,
    mqtt_connected: AtomicBool,
    commands: RwLock<Option<DeviceCommands>>,
}

impl EnergyPipeline {
    // ---
    pub fn new(store: Arc<dyn Store>, flush_interval: Duration, alert_config: AlertConfig) -> Self {
        // ---
        let buffer = Arc::new(SampleBuffer::new());
        let flusher = Arc::new(FlushScheduler::new(
            buffer.clone(),
            store.clone(),
            flush_interval,
        ));
        let coordinator = Arc::new(ScheduleCoordinator::new(RollupEngine::new(store.clone())));
        let alerts = AlertThresholdReader::new(store.clone(), alert_config);

        Self {
            buffer,
            flusher,
            coordinator,
            alerts,
            store,
            mqtt_connected: AtomicBool::new(false),
            commands: RwLock::new(None),
        }
    }

    /// Decode and buffer one transport message.
    ///
    /// Malformed bodies are dropped with a warning; returns whether the
    /// message was buffered.
    pub fn ingest_payload(&self, bytes: &[u8]) -> bool {
        self.try_ingest(bytes).is_ok()
    }

    /// Like [`Self::ingest_payload`], but hands the decode error back.
    pub fn try_ingest(&self, bytes: &[u8]) -> Result<()> {
        // ---
        match RawPowerPayload::from_slice(bytes) {
            Ok(raw) => {
                self.ingest_sample(&raw);
                Ok(())
            }
            Err(e) => {
                warn!(
                    "Dropping malformed payload ({} bytes): {}",
                    bytes.len(),
                    e
                );
                Err(e)
            }
        }
    }

    pub fn ingest_sample(&self, raw: &RawPowerPayload) {
        // ---
        let sample = raw.to_sample(Utc::now());
        debug!(
            voltage = sample.voltage,
            current = sample.current,
            power_w = sample.power_watts,
            "Sample buffered"
        );
        self.buffer.append(sample);
    }

    pub async fn flush_now(&self) -> Result<Option<FlushOutcome>> {
        self.flusher.flush_once().await
    }

    pub async fn run_daily_rollup(&self, date: Option<NaiveDate>) -> Result<RollupSummary> {
        self.coordinator.run_daily(date).await
    }

    pub async fn run_daily_catch_up(&self) -> Result<RollupSummary> {
        self.coordinator.run_daily_catch_up().await
    }

    pub async fn run_weekly_rollup(&self, week: Option<WeekKey>) -> Result<RollupSummary> {
        self.coordinator.run_weekly(week).await
    }

    pub async fn run_weekly_all(&self) -> Result<RollupSummary> {
        self.coordinator.run_weekly_all().await
    }

    pub async fn run_monthly_rollup(
        &self,
        month: Option<MonthKey>,
        from_weekly: bool,
    ) -> Result<RollupSummary> {
        self.coordinator.run_monthly(month, from_weekly).await
    }

    pub async fn run_monthly_all(&self, from_weekly: bool) -> Result<RollupSummary> {
        self.coordinator.run_monthly_all(from_weekly).await
    }

    pub async fn run_all(&self) -> Result<Vec<RollupSummary>> {
        self.coordinator.run_all().await
    }

    // ---

    pub fn buffer_status(&self) -> BufferStatus {
        self.buffer.status()
    }

    pub fn flush_interval(&self) -> Duration {
        self.flusher.period()
    }

    pub fn set_mqtt_connected(&self, connected: bool) {
        self.mqtt_connected.store(connected, Ordering::Relaxed);
    }

    pub fn mqtt_connected(&self) -> bool {
        self.mqtt_connected.load(Ordering::Relaxed)
    }

    /// Route device commands through `commands` from now on.
    pub fn attach_commands(&self, commands: DeviceCommands) {
        *self.commands.write() = Some(commands);
    }

    /// Ask the meter to switch its relay.
    pub async fn send_relay(&self, state: RelayState) -> Result<()> {
        let commands = self.connected_commands()?;
        commands.relay(state).await
    }

    /// Ask the meter to reboot.
    pub async fn send_reboot(&self) -> Result<()> {
        let commands = self.connected_commands()?;
        commands.reboot().await
    }

    fn connected_commands(&self) -> Result<DeviceCommands> {
        // ---
        let commands = self
            .commands
            .read()
            .clone()
            .ok_or_else(|| AppError::Mqtt("MQTT is disabled".into()))?;
        if !self.mqtt_connected() {
            return Err(AppError::Mqtt("MQTT client is not connected".into()));
        }
        Ok(commands)
    }

    pub async fn recent_hourly(&self, limit: i64) -> Result<Vec<HourlyRecord>> {
        self.store.recent_hourly(limit).await
    }

    pub async fn recent_daily(&self, limit: i64) -> Result<Vec<DailyRecord>> {
        self.store.recent_daily(limit).await
    }

    pub async fn recent_weekly(&self, limit: i64) -> Result<Vec<WeeklyRecord>> {
        self.store.recent_weekly(limit).await
    }

    pub async fn recent_monthly(&self, limit: i64) -> Result<Vec<MonthlyRecord>> {
        self.store.recent_monthly(limit).await
    }

    pub async fn stats(&self) -> Result<EnergyStats> {
        // ---
        Ok(EnergyStats {
            hourly: self.store.count(Tier::Hourly).await?,
            daily: self.store.count(Tier::Daily).await?,
            weekly: self.store.count(Tier::Weekly).await?,
            monthly: self.store.count(Tier::Monthly).await?,
        })
    }

    /// Delete every row of one tier. Coarser tiers are left as they are.
    pub async fn clear(&self, tier: Tier) -> Result<u64> {
        // ---
        let deleted = self.store.clear(tier).await?;
        warn!("Cleared {} rows from {}", deleted, tier.table());
        Ok(deleted)
    }

    pub async fn alerts(&self) -> Result<Vec<Alert>> {
        self.alerts.alerts().await
    }

    pub async fn alert_summary(&self) -> Result<AlertSummary> {
        self.alerts.summary().await
    }

    /// Start the flush timer and, if enabled, the rollup cadences.
    ///
    /// All tasks stop once `shutdown` flips to `true`; the flush task applies
    /// the shutdown policy on its way out.
    pub fn spawn_background(
        &self,
        shutdown: watch::Receiver<bool>,
        options: BackgroundOptions,
    ) -> Vec<JoinHandle<()>> {
        // ---
        let mut handles = vec![self
            .flusher
            .clone()
            .spawn(shutdown.clone(), options.shutdown_policy)];

        if options.rollup_schedule {
            handles.extend(self.coordinator.clone().spawn(shutdown));
        } else {
            info!("Rollup schedule disabled; rollups run on demand only");
        }
        handles
    }
}
