//! # Sample Clock
//!
//! Produces exactly `duration_secs * sample_rate` PCM samples, each one read at
//! its own scheduled instant:
//!
//! ```text
//! deadline(i) = start + i * 1s / sample_rate
//! ```
//!
//! Every deadline is computed from the single start instant, never from the
//! previous sample, so a late sample does not push the ones after it. Slots
//! are never skipped or retried: a late slot still yields one sample and is
//! counted in [`CaptureStats::late_samples`].
//!
//! ## Timing Modes:
//! - **Spin**: busy-wait on the monotonic clock (lowest jitter)
//! - **Hybrid**: sleep until [`HYBRID_SPIN_MARGIN`] before the deadline, then spin

use crate::audio::adc::{rescale, AnalogInput};
use crate::config::TimingMode;
use crate::error::NodeResult;
use std::hint;
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// How long before a deadline the hybrid mode stops sleeping and starts spinning
pub const HYBRID_SPIN_MARGIN: Duration = Duration::from_micros(200);

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// What the clock observed during one capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureStats {
    pub samples: u64,
    pub elapsed: Duration,
    /// Samples read more than one interval after their deadline
    pub late_samples: u64,
}

impl CaptureStats {
    /// Measured samples per second over the whole capture.
    pub fn effective_rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.samples as f64 / secs
        } else {
            0.0
        }
    }
}

/// Fixed-period clock anchored to one start instant.
#[derive(Debug, Clone, Copy)]
pub struct SampleClock {
    sample_rate: u32,
    timing: TimingMode,
}

impl SampleClock {
    pub fn new(sample_rate: u32, timing: TimingMode) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            timing,
        }
    }

    /// Number of slots in a capture of `duration_secs`.
    pub fn sample_count(&self, duration_secs: u32) -> u64 {
        u64::from(duration_secs) * u64::from(self.sample_rate)
    }

    /// Nominal spacing between two slots.
    pub fn sample_interval(&self) -> Duration {
        self.deadline_offset(1)
    }

    /// Offset of slot `index` from the start instant, exact to the nanosecond.
    pub fn deadline_offset(&self, index: u64) -> Duration {
        let nanos = u128::from(index) * NANOS_PER_SEC / u128::from(self.sample_rate);
        Duration::from_nanos(nanos as u64)
    }

    /// Run one capture, handing every rescaled sample to `emit` in slot order.
    ///
    /// `emit` runs inside the timing loop; it must not block (a buffered
    /// writer that only flushes every few kilobytes is fine).
    pub fn capture<A, F>(&self, duration_secs: u32, input: &mut A, mut emit: F) -> NodeResult<CaptureStats>
    where
        A: AnalogInput + ?Sized,
        F: FnMut(i16) -> NodeResult<()>,
    {
        let total = self.sample_count(duration_secs);
        let bits = input.resolution_bits();
        let interval = self.sample_interval();
        let per_second = u64::from(self.sample_rate);
        let mut late_samples = 0u64;

        let start = Instant::now();
        for index in 0..total {
            let deadline = start + self.deadline_offset(index);
            self.wait_until(deadline);

            if Instant::now().duration_since(deadline) > interval {
                late_samples += 1;
            }

            let raw = input.read_raw()?;
            emit(rescale(raw, bits))?;

            if (index + 1) % per_second == 0 {
                debug!(seconds = (index + 1) / per_second, "Capture progress");
            }
        }

        Ok(CaptureStats {
            samples: total,
            elapsed: start.elapsed(),
            late_samples,
        })
    }

    fn wait_until(&self, deadline: Instant) {
        if self.timing == TimingMode::Hybrid {
            let now = Instant::now();
            if deadline > now + HYBRID_SPIN_MARGIN {
                thread::sleep(deadline - now - HYBRID_SPIN_MARGIN);
            }
        }
        while Instant::now() < deadline {
            hint::spin_loop();
        }
    }
}
