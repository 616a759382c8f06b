//! In-memory accumulation of raw samples between flushes.
//!
//! A single `parking_lot::Mutex` guards the pending samples. Append holds it
//! for one `push`; drain holds it for one `mem::take`, and the averaging runs
//! after the lock is released. A sample is therefore seen by exactly one
//! drain.
//!
//! The buffer is unbounded. Its size is exposed through [`SampleBuffer::size`]
//! so a growing backlog shows up on the status endpoint.

use parking_lot::Mutex;
use serde::Serialize;

use crate::models::{AveragedSample, Sample};

// ---

#[derive(Debug, Default)]
struct BufferState {
    pending: Vec<Sample>,
    latest: Option<Sample>,
}

/// Snapshot used by dashboards and health checks.
#[derive(Debug, Clone, Serialize)]
pub struct BufferStatus {
    pub size: usize,
    pub latest_sample: Option<Sample>,
}

#[derive(Debug, Default)]
pub struct SampleBuffer {
    state: Mutex<BufferState>,
}

impl SampleBuffer {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, sample: Sample) {
        // ---
        let mut state = self.state.lock();
        state.latest = Some(sample.clone());
        state.pending.push(sample);
    }

    /// Take every pending sample, leaving the buffer empty.
    pub fn drain(&self) -> Vec<Sample> {
        std::mem::take(&mut self.state.lock().pending)
    }

    /// Drain and compute the field-wise mean. `None` when nothing was pending.
    pub fn drain_and_average(&self) -> Option<AveragedSample> {
        // ---
        let drained = self.drain();
        AveragedSample::from_samples(&drained)
    }

    /// Most recent sample ever appended. Survives drains.
    pub fn peek(&self) -> Option<Sample> {
        self.state.lock().latest.clone()
    }

    pub fn size(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn status(&self) -> BufferStatus {
        // ---
        let state = self.state.lock();
        BufferStatus {
            size: state.pending.len(),
            latest_sample: state.latest.clone(),
        }
    }
}
