//! Configuration session.
//!
//! Setters stage values on the device; [`DeviceHandle::configure`] commits
//! them and selects the acquisition mode. The client keeps a mirror of what
//! was requested ([`ConfigurationState`]) and a *generation* counter:
//!
//! - every successful `configure` starts a new generation;
//! - any setter issued after `configure` marks the state dirty, which locks
//!   geometry queries and fetches until the next `configure`;
//! - `abort` and `close` drop the commit altogether.
//!
//! Geometry handed out by [`crate::acquisition`] is stamped with the
//! generation it was queried under, so a fetch with geometry from an earlier
//! generation is refused before it reaches the device.
//!
//! Range checking is the device's job. Out-of-range requests come back as a
//! warning (the device clamped the value) or an error (the device rejected
//! it); the client never adjusts a value itself.

use crate::binding::{
    Attenuation, Detector, DeviceApi, DeviceId, Gain, Mode, Scale, SegmentDefinition, SweepSpeed,
    TriggerEdge, VideoUnits, Window,
};
use crate::device::DeviceHandle;
use crate::error::{AppResult, DaqError};
use crate::interceptor::Checked;
use crate::status::StatusCode;
use std::time::Duration;

/// Requested sweep frequency range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrequencyRange {
    /// Center frequency and span in Hz.
    CenterSpan {
        /// Center frequency.
        center: f64,
        /// Span around the center.
        span: f64,
    },
    /// Start and stop frequency in Hz.
    StartStop {
        /// Lowest frequency.
        start: f64,
        /// Highest frequency.
        stop: f64,
    },
}

/// RBW/VBW/sweep-time triple.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepCoupling {
    /// Resolution bandwidth in Hz.
    pub rbw: f64,
    /// Video bandwidth in Hz.
    pub vbw: f64,
    /// Time spent acquiring per sweep.
    pub sweep_time: Duration,
}

/// IQ bandwidth request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IqBandwidth {
    /// Software filter enabled.
    pub software_filter: bool,
    /// Bandwidth in Hz.
    pub bandwidth: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Commit {
    mode: Mode,
    generation: u64,
}

/// Client-side mirror of the values requested on one handle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigurationState {
    /// Reference level in dBm.
    pub ref_level: Option<f64>,
    /// Gain and attenuation.
    pub gain_atten: Option<(Gain, Attenuation)>,
    /// Sweep frequency range.
    pub sweep_range: Option<FrequencyRange>,
    /// RBW/VBW/sweep time.
    pub coupling: Option<SweepCoupling>,
    /// Detector and processing units.
    pub detector: Option<(Detector, VideoUnits)>,
    /// Trace amplitude scale.
    pub scale: Option<Scale>,
    /// FFT window.
    pub window: Option<Window>,
    /// Spur rejection.
    pub spur_reject: Option<bool>,
    /// Sweep speed.
    pub sweep_speed: Option<SweepSpeed>,
    /// IQ center frequency in Hz. Shared by streaming and segmented capture.
    pub iq_center_freq: Option<f64>,
    /// IQ decimation factor.
    pub iq_decimation: Option<u32>,
    /// IQ bandwidth request.
    pub iq_bandwidth: Option<IqBandwidth>,
    /// External trigger edge for segmented capture.
    pub ext_trigger_edge: Option<TriggerEdge>,
    /// Segment table; `None` entries have not been defined yet.
    pub segments: Vec<Option<SegmentDefinition>>,
    commit: Option<Commit>,
    generation: u64,
    dirty: bool,
}

impl ConfigurationState {
    /// Mode locked in by the last `configure`, if still valid.
    pub fn committed_mode(&self) -> Option<Mode> {
        self.commit.map(|c| c.mode)
    }

    /// Generation of the last commit (0 before the first `configure`).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// `true` if a setter ran after the last `configure`.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Definition of `segment`, if staged.
    pub fn segment(&self, segment: usize) -> Option<SegmentDefinition> {
        self.segments.get(segment).copied().flatten()
    }

    fn touch(&mut self) {
        if self.commit.is_some() {
            self.dirty = true;
        }
    }

    fn commit(&mut self, mode: Mode) {
        self.generation += 1;
        self.commit = Some(Commit {
            mode,
            generation: self.generation,
        });
        self.dirty = false;
    }

    pub(crate) fn invalidate_commit(&mut self) {
        if self.commit.take().is_some() {
            self.generation += 1;
        }
        self.dirty = false;
    }

    /// Check that `mode` is committed and untouched since; returns the
    /// generation of that commit.
    pub(crate) fn require_committed(&self, mode: Mode) -> AppResult<u64> {
        if self.dirty {
            return Err(DaqError::InvalidState(
                "configuration changed after configure; configure again before acquiring"
                    .to_string(),
            ));
        }
        match self.commit {
            Some(commit) if commit.mode == mode => Ok(commit.generation),
            Some(commit) => Err(DaqError::InvalidState(format!(
                "device is configured for {:?}, operation requires {:?}",
                commit.mode, mode
            ))),
            None => Err(DaqError::InvalidState(format!(
                "device is not configured; configure {:?} first",
                mode
            ))),
        }
    }
}

impl<'ctx> DeviceHandle<'ctx> {
    fn stage(
        &mut self,
        operation: &'static str,
        f: impl FnOnce(&dyn DeviceApi, DeviceId) -> StatusCode,
        record: impl FnOnce(&mut ConfigurationState),
    ) -> AppResult<Checked<()>> {
        let checked = self.call_status(operation, f)?;
        record(&mut self.config);
        self.config.touch();
        Ok(checked)
    }

    /// Requested configuration.
    pub fn configuration(&self) -> &ConfigurationState {
        &self.config
    }

    /// Set the reference level in dBm.
    pub fn set_ref_level(&mut self, ref_level_dbm: f64) -> AppResult<Checked<()>> {
        self.stage(
            "set_ref_level",
            |api, id| api.set_ref_level(id, ref_level_dbm),
            |c| c.ref_level = Some(ref_level_dbm),
        )
    }

    /// Reference level as the device holds it.
    pub fn ref_level(&mut self) -> AppResult<Checked<f64>> {
        self.call("get_ref_level", |api, id| api.get_ref_level(id))
    }

    /// Set front-end gain and attenuation.
    pub fn set_gain_atten(&mut self, gain: Gain, atten: Attenuation) -> AppResult<Checked<()>> {
        self.stage(
            "set_gain_atten",
            |api, id| api.set_gain_atten(id, gain, atten),
            |c| c.gain_atten = Some((gain, atten)),
        )
    }

    /// Set the sweep range by center and span.
    pub fn set_sweep_center_span(
        &mut self,
        center_hz: f64,
        span_hz: f64,
    ) -> AppResult<Checked<()>> {
        self.stage(
            "set_sweep_center_span",
            |api, id| api.set_sweep_center_span(id, center_hz, span_hz),
            |c| {
                c.sweep_range = Some(FrequencyRange::CenterSpan {
                    center: center_hz,
                    span: span_hz,
                })
            },
        )
    }

    /// Set the sweep range by start and stop frequency.
    pub fn set_sweep_start_stop(&mut self, start_hz: f64, stop_hz: f64) -> AppResult<Checked<()>> {
        self.stage(
            "set_sweep_start_stop",
            |api, id| api.set_sweep_start_stop(id, start_hz, stop_hz),
            |c| {
                c.sweep_range = Some(FrequencyRange::StartStop {
                    start: start_hz,
                    stop: stop_hz,
                })
            },
        )
    }

    /// Set RBW, VBW and sweep time.
    ///
    /// VBW greater than RBW is passed to the device unchanged; the device
    /// decides whether to clamp (warning) or reject (error).
    pub fn set_sweep_coupling(
        &mut self,
        rbw: f64,
        vbw: f64,
        sweep_time: Duration,
    ) -> AppResult<Checked<()>> {
        self.stage(
            "set_sweep_coupling",
            |api, id| api.set_sweep_coupling(id, rbw, vbw, sweep_time),
            |c| {
                c.coupling = Some(SweepCoupling {
                    rbw,
                    vbw,
                    sweep_time,
                })
            },
        )
    }

    /// Set the detector and the units it operates in.
    pub fn set_sweep_detector(
        &mut self,
        detector: Detector,
        units: VideoUnits,
    ) -> AppResult<Checked<()>> {
        self.stage(
            "set_sweep_detector",
            |api, id| api.set_sweep_detector(id, detector, units),
            |c| c.detector = Some((detector, units)),
        )
    }

    /// Select log (dBm) or linear (mV) traces.
    pub fn set_sweep_scale(&mut self, scale: Scale) -> AppResult<Checked<()>> {
        self.stage(
            "set_sweep_scale",
            |api, id| api.set_sweep_scale(id, scale),
            |c| c.scale = Some(scale),
        )
    }

    /// Select the FFT window.
    pub fn set_sweep_window(&mut self, window: Window) -> AppResult<Checked<()>> {
        self.stage(
            "set_sweep_window",
            |api, id| api.set_sweep_window(id, window),
            |c| c.window = Some(window),
        )
    }

    /// Enable or disable spur rejection.
    pub fn set_sweep_spur_reject(&mut self, enabled: bool) -> AppResult<Checked<()>> {
        self.stage(
            "set_sweep_spur_reject",
            |api, id| api.set_sweep_spur_reject(id, enabled),
            |c| c.spur_reject = Some(enabled),
        )
    }

    /// Trade sweep speed against dynamic range.
    pub fn set_sweep_speed(&mut self, speed: SweepSpeed) -> AppResult<Checked<()>> {
        self.stage(
            "set_sweep_speed",
            |api, id| api.set_sweep_speed(id, speed),
            |c| c.sweep_speed = Some(speed),
        )
    }

    /// Set the IQ center frequency in Hz.
    pub fn set_iq_center_freq(&mut self, center_hz: f64) -> AppResult<Checked<()>> {
        self.stage(
            "set_iq_center_freq",
            |api, id| api.set_iq_center_freq(id, center_hz),
            |c| c.iq_center_freq = Some(center_hz),
        )
    }

    /// Set the IQ decimation factor. Must be a power of two.
    pub fn set_iq_sample_rate(&mut self, decimation: u32) -> AppResult<Checked<()>> {
        self.stage(
            "set_iq_sample_rate",
            |api, id| api.set_iq_sample_rate(id, decimation),
            |c| c.iq_decimation = Some(decimation),
        )
    }

    /// Set the IQ bandwidth, optionally with the software filter enabled.
    pub fn set_iq_bandwidth(
        &mut self,
        software_filter: bool,
        bandwidth_hz: f64,
    ) -> AppResult<Checked<()>> {
        self.stage(
            "set_iq_bandwidth",
            |api, id| api.set_iq_bandwidth(id, software_filter, bandwidth_hz),
            |c| {
                c.iq_bandwidth = Some(IqBandwidth {
                    software_filter,
                    bandwidth: bandwidth_hz,
                })
            },
        )
    }

    /// Select the edge of the external trigger input for segmented capture.
    pub fn set_segmented_ext_trigger(&mut self, edge: TriggerEdge) -> AppResult<Checked<()>> {
        self.stage(
            "set_seg_iq_ext_trigger",
            |api, id| api.set_seg_iq_ext_trigger(id, edge),
            |c| c.ext_trigger_edge = Some(edge),
        )
    }

    /// Set the number of segments per capture. Clears existing definitions.
    pub fn set_segment_count(&mut self, count: usize) -> AppResult<Checked<()>> {
        self.stage(
            "set_seg_iq_segment_count",
            |api, id| api.set_seg_iq_segment_count(id, count),
            |c| c.segments = vec![None; count],
        )
    }

    /// Define one segment.
    pub fn set_segment(
        &mut self,
        segment: usize,
        definition: SegmentDefinition,
    ) -> AppResult<Checked<()>> {
        self.stage(
            "set_seg_iq_segment",
            |api, id| api.set_seg_iq_segment(id, segment, definition),
            |c| {
                if let Some(slot) = c.segments.get_mut(segment) {
                    *slot = Some(definition);
                }
            },
        )
    }

    /// Commit staged configuration and enter `mode`.
    ///
    /// Starts a new configuration generation; geometry queried before this
    /// call is stale afterwards.
    pub fn configure(&mut self, mode: Mode) -> AppResult<Checked<()>> {
        if mode == Mode::IqSegmented {
            if let Some(missing) = self.config.segments.iter().position(Option::is_none) {
                return Err(DaqError::InvalidState(format!(
                    "segment {missing} has no definition"
                )));
            }
        }
        let checked = self.call_status("configure", |api, id| api.configure(id, mode))?;
        self.config.commit(mode);
        tracing::info!(
            device = self.id().0,
            ?mode,
            generation = self.config.generation(),
            "Configuration committed"
        );
        Ok(checked)
    }

    /// Mode the device reports as active.
    pub fn current_mode(&mut self) -> AppResult<Checked<Mode>> {
        self.call("get_current_mode", |api, id| api.get_current_mode(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setter_after_commit_marks_dirty() {
        let mut state = ConfigurationState::default();
        state.touch();
        assert!(!state.is_dirty());

        state.commit(Mode::Sweeping);
        assert_eq!(state.generation(), 1);
        assert!(state.require_committed(Mode::Sweeping).is_ok());

        state.touch();
        assert!(state.is_dirty());
        assert!(matches!(
            state.require_committed(Mode::Sweeping),
            Err(DaqError::InvalidState(_))
        ));

        state.commit(Mode::Sweeping);
        assert_eq!(state.generation(), 2);
        assert!(!state.is_dirty());
    }

    #[test]
    fn wrong_mode_is_rejected() {
        let mut state = ConfigurationState::default();
        assert!(state.require_committed(Mode::IqStreaming).is_err());
        state.commit(Mode::Sweeping);
        let err = state.require_committed(Mode::IqStreaming).unwrap_err();
        assert!(err.to_string().contains("IqStreaming"));
    }

    #[test]
    fn invalidating_a_commit_bumps_generation() {
        let mut state = ConfigurationState::default();
        state.commit(Mode::IqStreaming);
        state.invalidate_commit();
        assert_eq!(state.committed_mode(), None);
        assert_eq!(state.generation(), 2);
        state.invalidate_commit();
        assert_eq!(state.generation(), 2);
    }
}
