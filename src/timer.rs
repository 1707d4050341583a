//! Tick source used to time kernel loops.
//!
//! On x86_64 ticks come from the time-stamp counter; elsewhere they are
//! nanoseconds of a process-wide monotonic clock. Either way the conversion to
//! wall time goes through [`Timer::ns_per_tick`], which is calibrated once.

use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::BenchmarkError;

/// Default calibration window.
pub const DEFAULT_CALIBRATION: Duration = Duration::from_millis(200);

/// Read the current tick counter.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn ticks() -> u64 {
    #[allow(unused_unsafe)]
    unsafe {
        core::arch::x86_64::_rdtsc()
    }
}

#[cfg(not(target_arch = "x86_64"))]
#[inline(always)]
pub fn ticks() -> u64 {
    use std::sync::OnceLock;

    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

/// Conversion factor between ticks and nanoseconds. Read-only after calibration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timer {
    ns_per_tick: f64,
}

impl Timer {
    /// Measure how many ticks elapse over `window` of wall time.
    pub fn calibrate(window: Duration) -> Result<Self, BenchmarkError> {
        let wall_start = Instant::now();
        let tick_start = ticks();
        thread::sleep(window);
        let tick_end = ticks();
        let wall_ns = wall_start.elapsed().as_nanos() as f64;

        let elapsed_ticks = tick_end.saturating_sub(tick_start);
        if elapsed_ticks == 0 {
            return Err(BenchmarkError::Calibration(
                "tick counter did not advance".to_string(),
            ));
        }

        let timer = Self {
            ns_per_tick: wall_ns / elapsed_ticks as f64,
        };
        debug!(
            ns_per_tick = timer.ns_per_tick,
            window_ms = window.as_millis() as u64,
            "calibrated tick timer"
        );
        Ok(timer)
    }

    /// Build a timer with a known conversion factor.
    pub fn from_ns_per_tick(ns_per_tick: f64) -> Self {
        Self { ns_per_tick }
    }

    pub fn ns_per_tick(&self) -> f64 {
        self.ns_per_tick
    }

    pub fn ticks_to_ns(&self, ticks: u64) -> f64 {
        ticks as f64 * self.ns_per_tick
    }

    pub fn ticks_to_secs(&self, ticks: u64) -> f64 {
        self.ticks_to_ns(ticks) / 1e9
    }

    /// Number of ticks covering `duration`, rounded up and never zero.
    pub fn duration_to_ticks(&self, duration: Duration) -> u64 {
        let ticks = (duration.as_nanos() as f64 / self.ns_per_tick).ceil();
        (ticks as u64).max(1)
    }
}
