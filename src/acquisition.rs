//! Acquisition engine: sweep fetch and continuous IQ.
//!
//! Buffer lengths are never chosen by the caller. A sweep fetch takes a
//! [`TraceGeometry`] obtained from [`DeviceHandle::sweep_geometry`] and fills
//! a [`SweepBuffer`] built from that same geometry. Before the device is
//! called the engine checks that
//!
//! 1. the handle is open,
//! 2. the geometry belongs to the current configuration generation, and
//! 3. the buffer length equals the geometry's trace length.
//!
//! Failing any of these is a local contract violation; nothing is sent to
//! the device.

use crate::binding::{IqFetchInfo, IqParameters, Mode};
use crate::device::DeviceHandle;
use crate::error::{AppResult, DaqError};
use crate::interceptor::Checked;
use chrono::{DateTime, TimeZone, Utc};
use num_complex::Complex32;
use std::cmp::Ordering;

/// Convert a device timestamp to UTC.
pub fn timestamp_from_ns(ns_since_epoch: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(ns_since_epoch)
}

/// Evenly spaced frequency axis: bin `i` sits at `start + i * step`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyAxis {
    start: f64,
    step: f64,
    len: usize,
}

impl FrequencyAxis {
    /// Axis of `len` bins starting at `start` Hz, `step` Hz apart.
    pub fn new(start: f64, step: f64, len: usize) -> Self {
        Self { start, step, len }
    }

    /// Frequency of bin 0.
    pub fn start(&self) -> f64 {
        self.start
    }

    /// Spacing between bins.
    pub fn step(&self) -> f64 {
        self.step
    }

    /// Number of bins.
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Frequency of the last bin, `None` for an empty axis.
    pub fn stop(&self) -> Option<f64> {
        self.len.checked_sub(1).map(|last| self.frequency(last))
    }

    /// Frequency of bin `index`. Not bounds checked.
    pub fn frequency(&self, index: usize) -> f64 {
        self.start + index as f64 * self.step
    }

    /// Frequencies of every bin in order.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.len).map(move |i| self.frequency(i))
    }

    /// Bin holding the largest value of `values`, with its frequency.
    ///
    /// `values` is expected to be indexed like the axis; NaN entries are
    /// ignored.
    pub fn peak<T: Copy + PartialOrd>(&self, values: &[T]) -> Option<(f64, T)> {
        values
            .iter()
            .take(self.len)
            .enumerate()
            .filter(|(_, v)| v.partial_cmp(v).is_some())
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(Ordering::Equal))
            .map(|(i, v)| (self.frequency(i), *v))
    }
}

/// Sweep geometry reported by the device after `configure`.
///
/// Valid only for the configuration generation it was queried under.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceGeometry {
    axis: FrequencyAxis,
    rbw: f64,
    vbw: f64,
    generation: u64,
}

impl TraceGeometry {
    /// Number of bins in every trace of this configuration.
    pub fn trace_len(&self) -> usize {
        self.axis.len()
    }

    /// Frequency of bin 0 in Hz.
    pub fn start_freq(&self) -> f64 {
        self.axis.start()
    }

    /// Spacing between bins in Hz.
    pub fn bin_size(&self) -> f64 {
        self.axis.step()
    }

    /// Actual resolution bandwidth chosen by the device.
    pub fn rbw(&self) -> f64 {
        self.rbw
    }

    /// Actual video bandwidth chosen by the device.
    pub fn vbw(&self) -> f64 {
        self.vbw
    }

    /// Frequency axis of every trace.
    pub fn axis(&self) -> FrequencyAxis {
        self.axis
    }

    /// Configuration generation this geometry belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Min/max trace storage sized for one geometry.
///
/// With the average detector both halves carry the same trace.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepBuffer {
    min: Vec<f32>,
    max: Vec<f32>,
}

impl SweepBuffer {
    /// Allocate a buffer of exactly `geometry.trace_len()` bins.
    pub fn for_geometry(geometry: &TraceGeometry) -> Self {
        let len = geometry.trace_len();
        Self {
            min: vec![0.0; len],
            max: vec![0.0; len],
        }
    }

    /// Wrap existing storage, checking it against `geometry`.
    pub fn from_vecs(min: Vec<f32>, max: Vec<f32>, geometry: &TraceGeometry) -> AppResult<Self> {
        let expected = geometry.trace_len();
        for actual in [min.len(), max.len()] {
            if actual != expected {
                return Err(DaqError::BufferSizeMismatch { expected, actual });
            }
        }
        Ok(Self { min, max })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.max.len()
    }

    /// `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.max.is_empty()
    }

    /// Min trace storage.
    pub fn min(&self) -> &[f32] {
        &self.min
    }

    /// Max trace storage.
    pub fn max(&self) -> &[f32] {
        &self.max
    }

    /// Give back the `(min, max)` storage.
    pub fn into_vecs(self) -> (Vec<f32>, Vec<f32>) {
        (self.min, self.max)
    }

    fn check_len(&self, geometry: &TraceGeometry) -> AppResult<()> {
        let expected = geometry.trace_len();
        let actual = if self.min.len() != expected {
            self.min.len()
        } else {
            self.max.len()
        };
        if actual != expected {
            return Err(DaqError::BufferSizeMismatch { expected, actual });
        }
        Ok(())
    }
}

/// One fetched sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    /// Frequency of every bin.
    pub axis: FrequencyAxis,
    /// Min-detector values, one per bin.
    pub min: Vec<f32>,
    /// Max-detector values, one per bin.
    pub max: Vec<f32>,
    /// Sweep timestamp, nanoseconds since the Unix epoch.
    pub ns_since_epoch: i64,
}

impl Trace {
    /// Number of entries.
    pub fn len(&self) -> usize {
        self.max.len()
    }

    /// `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.max.is_empty()
    }

    /// Frequency of every bin.
    pub fn frequencies(&self) -> Vec<f64> {
        self.axis.iter().collect()
    }

    /// `(frequency, max value)` pairs in frequency order.
    pub fn points(&self) -> impl Iterator<Item = (f64, f32)> + '_ {
        self.axis.iter().zip(self.max.iter().copied())
    }

    /// Highest max-trace bin.
    pub fn peak(&self) -> Option<(f64, f32)> {
        self.axis.peak(&self.max)
    }

    /// Sweep timestamp as UTC time.
    pub fn timestamp(&self) -> DateTime<Utc> {
        timestamp_from_ns(self.ns_since_epoch)
    }
}

/// One block of IQ samples from the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct IqBlock {
    /// Interleaved I/Q samples.
    pub samples: Vec<Complex32>,
    /// Side information of the fetch.
    pub info: IqFetchInfo,
}

impl IqBlock {
    /// Number of entries.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Timestamp of the first sample.
    pub fn timestamp(&self) -> DateTime<Utc> {
        timestamp_from_ns(self.info.ns_since_epoch)
    }
}

impl<'ctx> DeviceHandle<'ctx> {
    /// Query sweep geometry for the committed sweep configuration.
    pub fn sweep_geometry(&mut self) -> AppResult<Checked<TraceGeometry>> {
        self.ensure_open()?;
        let generation = self.config.require_committed(Mode::Sweeping)?;
        let checked = self.call("get_sweep_parameters", |api, id| api.get_sweep_parameters(id))?;
        let warning = checked.warning;
        let params = checked.value.ok_or_else(|| {
            DaqError::Protocol(format!("device {} returned no sweep parameters", self.id()))
        })?;
        let geometry = TraceGeometry {
            axis: FrequencyAxis::new(params.actual_start_freq, params.bin_size, params.sweep_size),
            rbw: params.actual_rbw,
            vbw: params.actual_vbw,
            generation,
        };
        tracing::debug!(
            device = self.id().0,
            trace_len = geometry.trace_len(),
            start_freq = geometry.start_freq(),
            bin_size = geometry.bin_size(),
            generation,
            "Sweep geometry"
        );
        Ok(Checked {
            value: geometry,
            warning,
        })
    }

    fn check_geometry(&self, geometry: &TraceGeometry) -> AppResult<()> {
        self.ensure_open()?;
        let current = self.config.require_committed(Mode::Sweeping)?;
        if geometry.generation != current {
            return Err(DaqError::StaleGeometry {
                geometry: geometry.generation,
                current,
            });
        }
        Ok(())
    }

    /// Perform one sweep into a freshly allocated buffer.
    pub fn fetch_sweep(&mut self, geometry: &TraceGeometry) -> AppResult<Checked<Trace>> {
        let mut buffer = SweepBuffer::for_geometry(geometry);
        let checked = self.fetch_sweep_into(geometry, &mut buffer)?;
        let (min, max) = buffer.into_vecs();
        Ok(checked.map(|ns_since_epoch| Trace {
            axis: geometry.axis(),
            min,
            max,
            ns_since_epoch,
        }))
    }

    /// Perform one sweep into `buffer`. Returns the sweep timestamp.
    pub fn fetch_sweep_into(
        &mut self,
        geometry: &TraceGeometry,
        buffer: &mut SweepBuffer,
    ) -> AppResult<Checked<i64>> {
        self.check_geometry(geometry)?;
        buffer.check_len(geometry)?;
        self.call("get_sweep", |api, id| {
            api.get_sweep(id, &mut buffer.min, &mut buffer.max)
        })
    }

    /// Effective IQ sample rate and bandwidth.
    pub fn iq_parameters(&mut self) -> AppResult<Checked<IqParameters>> {
        self.ensure_open()?;
        let mode = match self.config.committed_mode() {
            Some(Mode::IqSegmented) => Mode::IqSegmented,
            _ => Mode::IqStreaming,
        };
        self.config.require_committed(mode)?;
        let checked = self.call("get_iq_parameters", |api, id| api.get_iq_parameters(id))?;
        let warning = checked.warning;
        let params = checked.value.ok_or_else(|| {
            DaqError::Protocol(format!("device {} returned no IQ parameters", self.id()))
        })?;
        Ok(Checked {
            value: params,
            warning,
        })
    }

    /// Fetch exactly `count` samples from the IQ stream.
    ///
    /// `purge` discards samples queued on the host before this fetch.
    pub fn get_iq(&mut self, count: usize, purge: bool) -> AppResult<Checked<IqBlock>> {
        let mut samples = vec![Complex32::new(0.0, 0.0); count];
        let checked = self.get_iq_into(&mut samples, purge)?;
        Ok(checked.map(|info| IqBlock { samples, info }))
    }

    /// Fill `samples` completely from the IQ stream. `samples` must not be
    /// empty.
    pub fn get_iq_into(
        &mut self,
        samples: &mut [Complex32],
        purge: bool,
    ) -> AppResult<Checked<IqFetchInfo>> {
        if samples.is_empty() {
            return Err(DaqError::InvalidState(
                "IQ sample count must be non-zero".to_string(),
            ));
        }
        self.ensure_open()?;
        self.config.require_committed(Mode::IqStreaming)?;
        let checked = self.call("get_iq", |api, id| api.get_iq(id, samples, purge))?;
        if checked.value.sample_loss {
            tracing::warn!(device = self.id().0, "IQ sample loss before block");
        }
        Ok(checked)
    }
}
