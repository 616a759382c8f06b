//! Periodic drain of the [`SampleBuffer`] into one hourly record.
//!
//! The buffer is emptied before the write is attempted. If the write fails the
//! averaged window is gone: it is logged at error level with its values and
//! not retried, since the raw samples no longer exist.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::buffer::SampleBuffer;
use crate::error::Result;
use crate::models::{round2, round4, AveragedSample, HourlyRecord, NewHourlyRecord};
use crate::store::Store;

// ---

/// What to do with samples still buffered when the service stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPolicy {
    /// Run one last flush.
    Flush,
    /// Drop pending samples, logging how many.
    Discard,
}

/// Flushed window and the row it produced.
#[derive(Debug, Clone)]
pub struct FlushOutcome {
    pub sample: AveragedSample,
    pub record: HourlyRecord,
}

pub struct FlushScheduler {
    buffer: Arc<SampleBuffer>,
    store: Arc<dyn Store>,
    period: Duration,
}

impl FlushScheduler {
    // ---
    pub fn new(buffer: Arc<SampleBuffer>, store: Arc<dyn Store>, period: Duration) -> Self {
        Self {
            buffer,
            store,
            period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Hourly fields for one averaged window.
    ///
    /// Without a metered energy value the window's energy is its mean power
    /// integrated over one flush period: `W * h / 1000`.
    pub fn to_hourly(&self, avg: &AveragedSample) -> NewHourlyRecord {
        // ---
        let window_hours = self.period.as_secs_f64() / 3600.0;
        let energy_kwh = avg
            .energy_kwh
            .unwrap_or_else(|| avg.power_watts * window_hours / 1000.0);

        NewHourlyRecord {
            timestamp_hour: Utc::now(),
            energy_kwh: round4(energy_kwh),
            voltage: round2(avg.voltage),
            current: round2(avg.current),
            power_factor: round2(avg.power_factor),
        }
    }

    /// Drain, average and persist. `Ok(None)` when the buffer was empty.
    pub async fn flush_once(&self) -> Result<Option<FlushOutcome>> {
        // ---
        let Some(avg) = self.buffer.drain_and_average() else {
            debug!("Flush: buffer empty, skipping");
            return Ok(None);
        };

        let new_row = self.to_hourly(&avg);
        match self.store.insert_hourly(&new_row).await {
            Ok(record) => {
                info!(
                    id = record.id,
                    samples = avg.sample_count,
                    voltage = record.voltage,
                    current = record.current,
                    power_w = avg.power_watts,
                    energy_kwh = record.energy_kwh,
                    power_factor = record.power_factor,
                    "Flushed buffer to hourly_energy"
                );
                Ok(Some(FlushOutcome {
                    sample: avg,
                    record,
                }))
            }
            Err(e) => {
                error!(
                    samples = avg.sample_count,
                    voltage = new_row.voltage,
                    current = new_row.current,
                    energy_kwh = new_row.energy_kwh,
                    "Flush persistence failed, averaged window lost: {}",
                    e
                );
                Err(e)
            }
        }
    }

    /// Run the timer until `shutdown` flips to `true`, then apply `policy`.
    ///
    /// Each tick runs to completion before the next is awaited, so two flushes
    /// from this task never overlap.
    pub fn spawn(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
        policy: ShutdownPolicy,
    ) -> JoinHandle<()> {
        // ---
        tokio::spawn(async move {
            info!("Flush scheduler started (interval: {:?})", self.period);

            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // Errors are already logged; the next tick is the retry.
                        let _ = self.flush_once().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            self.finish(policy).await;
            info!("Flush scheduler stopped");
        })
    }

    async fn finish(&self, policy: ShutdownPolicy) {
        // ---
        match policy {
            ShutdownPolicy::Flush => {
                if let Err(e) = self.flush_once().await {
                    error!("Final flush failed: {}", e);
                }
            }
            ShutdownPolicy::Discard => {
                let dropped = self.buffer.drain().len();
                if dropped > 0 {
                    warn!("Discarded {} buffered samples at shutdown", dropped);
                }
            }
        }
    }
}
