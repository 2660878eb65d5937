//! Streaming loop with throughput accounting.
//!
//! Drives [`DeviceHandle::get_iq_into`] a fixed number of times with a reused
//! buffer and reports how many samples arrived and how fast. The sample count
//! is derived from completed fetches only (`captures * samples_per_capture`)
//! and never from timing.

use crate::binding::IqFetchInfo;
use crate::device::DeviceHandle;
use crate::error::{AppResult, DaqError};
use crate::settings::StreamingSettings;
use num_complex::Complex32;
use std::time::{Duration, Instant};

/// Bytes per complex sample (two 32-bit floats).
pub const BYTES_PER_SAMPLE: usize = 8;

/// Result of one streaming run.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ThroughputStats {
    /// Completed fetch calls.
    pub captures: usize,
    /// Samples delivered across all captures.
    pub sample_count: u64,
    /// Wall-clock time spent inside fetch calls.
    pub elapsed: Duration,
    /// Fetches that reported sample loss.
    pub sample_loss_events: usize,
    /// Fetches that came back with a warning.
    pub warnings: usize,
}

impl ThroughputStats {
    /// Average delivered sample rate.
    pub fn samples_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.sample_count as f64 / secs
        } else {
            0.0
        }
    }

    /// Average delivered data rate in megabytes per second.
    pub fn megabytes_per_second(&self) -> f64 {
        self.samples_per_second() * BYTES_PER_SAMPLE as f64 / 1.0e6
    }
}

/// Repeated IQ fetches of a fixed size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamingLoop {
    samples_per_capture: usize,
    captures: usize,
    purge_first: bool,
}

impl StreamingLoop {
    /// Loop of `captures` fetches of `samples_per_capture` samples each.
    pub fn new(samples_per_capture: usize, captures: usize) -> AppResult<Self> {
        if samples_per_capture == 0 {
            return Err(DaqError::Configuration(
                "samples_per_capture must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            samples_per_capture,
            captures,
            purge_first: true,
        })
    }

    /// Loop described by the `[streaming]` settings section.
    pub fn from_settings(settings: &StreamingSettings) -> AppResult<Self> {
        Self::new(settings.samples_per_capture, settings.captures)
    }

    /// Whether the first fetch discards samples queued before the loop
    /// started. On by default.
    pub fn purge_first(mut self, purge: bool) -> Self {
        self.purge_first = purge;
        self
    }

    /// Samples fetched per capture.
    pub fn samples_per_capture(&self) -> usize {
        self.samples_per_capture
    }

    /// Number of captures per run.
    pub fn captures(&self) -> usize {
        self.captures
    }

    /// Run the loop, discarding the samples.
    pub fn run(&self, handle: &mut DeviceHandle<'_>) -> AppResult<ThroughputStats> {
        self.run_with(handle, |_, _| {})
    }

    /// Run the loop, handing every block to `consumer`.
    ///
    /// Time spent in `consumer` is excluded from `elapsed`. The first error
    /// ends the loop and is returned.
    pub fn run_with<F>(
        &self,
        handle: &mut DeviceHandle<'_>,
        mut consumer: F,
    ) -> AppResult<ThroughputStats>
    where
        F: FnMut(&[Complex32], &IqFetchInfo),
    {
        let mut buffer = vec![Complex32::new(0.0, 0.0); self.samples_per_capture];
        let mut stats = ThroughputStats::default();

        tracing::info!(
            device = handle.id().0,
            samples_per_capture = self.samples_per_capture,
            captures = self.captures,
            "Streaming started"
        );

        for i in 0..self.captures {
            let purge = self.purge_first && i == 0;
            let started = Instant::now();
            let checked = handle.get_iq_into(&mut buffer, purge)?;
            stats.elapsed += started.elapsed();

            stats.captures += 1;
            stats.sample_count += buffer.len() as u64;
            if checked.value.sample_loss {
                stats.sample_loss_events += 1;
            }
            if checked.has_warning() {
                stats.warnings += 1;
            }
            consumer(&buffer, &checked.value);
        }

        tracing::info!(
            device = handle.id().0,
            samples = stats.sample_count,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            msps = stats.samples_per_second() / 1.0e6,
            "Streaming finished"
        );
        Ok(stats)
    }
}
