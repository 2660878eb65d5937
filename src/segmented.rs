//! Segmented, triggered IQ capture.
//!
//! [`DeviceHandle::capture_start`] arms a capture and returns a
//! [`SegmentedCapture`] guard that mutably borrows the handle for the
//! capture's lifetime:
//!
//! ```text
//! Armed ──wait──▶ Waited ──finish──▶ Finished
//!   │               │
//!   └───abort───────┴──▶ Aborted (finished, then device abort)
//! ```
//!
//! Segment data and timestamps are available once `wait` has returned. A
//! segment that timed out still reads back its full length; whether that
//! data is usable is for the caller to judge from [`SegmentedCapture::timed_out`].
//!
//! Device-side capture storage is released exactly once. If the guard is
//! dropped without `finish` or `abort`, including on an early `?` return,
//! the drop finishes the capture.

use crate::acquisition::timestamp_from_ns;
use crate::binding::{Mode, SegmentDefinition};
use crate::device::DeviceHandle;
use crate::error::{AppResult, DaqError};
use crate::interceptor::Checked;
use chrono::{DateTime, Utc};
use num_complex::Complex32;

/// How a segment ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentOutcome {
    /// The trigger arrived within the segment's timeout.
    Completed,
    /// No trigger arrived before the timeout elapsed.
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureState {
    Armed,
    Waited,
    Finished,
}

/// Guard over one armed capture.
pub struct SegmentedCapture<'h, 'ctx> {
    handle: &'h mut DeviceHandle<'ctx>,
    capture: usize,
    segments: Vec<SegmentDefinition>,
    state: CaptureState,
}

impl<'ctx> DeviceHandle<'ctx> {
    /// Arm capture slot `capture` with the committed segment table.
    pub fn capture_start(
        &mut self,
        capture: usize,
    ) -> AppResult<Checked<SegmentedCapture<'_, 'ctx>>> {
        self.ensure_open()?;
        self.config.require_committed(Mode::IqSegmented)?;
        let segments = self
            .config
            .segments
            .iter()
            .enumerate()
            .map(|(i, def)| {
                def.ok_or_else(|| DaqError::InvalidState(format!("segment {i} has no definition")))
            })
            .collect::<AppResult<Vec<_>>>()?;
        if segments.is_empty() {
            return Err(DaqError::InvalidState(
                "segmented capture needs at least one segment".to_string(),
            ));
        }

        let checked = self.call_status("seg_capture_start", |api, id| {
            api.seg_capture_start(id, capture)
        })?;
        tracing::debug!(device = self.id().0, capture, segments = segments.len(), "Capture armed");
        Ok(checked.map(|()| SegmentedCapture {
            handle: self,
            capture,
            segments,
            state: CaptureState::Armed,
        }))
    }
}

impl<'h, 'ctx> SegmentedCapture<'h, 'ctx> {
    /// Capture slot this guard owns.
    pub fn capture(&self) -> usize {
        self.capture
    }

    /// Number of segments in the capture.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Definition of `segment` as armed.
    pub fn segment(&self, segment: usize) -> Option<&SegmentDefinition> {
        self.segments.get(segment)
    }

    /// Block until every segment has triggered or timed out.
    pub fn wait(&mut self) -> AppResult<Checked<()>> {
        if self.state != CaptureState::Armed {
            return Err(DaqError::InvalidState(format!(
                "capture {} has already been waited on",
                self.capture
            )));
        }
        let capture = self.capture;
        let checked = self
            .handle
            .call_status("seg_capture_wait", |api, id| api.seg_capture_wait(id, capture))?;
        self.state = CaptureState::Waited;
        Ok(checked)
    }

    fn definition(&self, segment: usize) -> AppResult<SegmentDefinition> {
        if self.state != CaptureState::Waited {
            return Err(DaqError::InvalidState(format!(
                "capture {} has not completed; call wait first",
                self.capture
            )));
        }
        self.segments.get(segment).copied().ok_or_else(|| {
            DaqError::InvalidState(format!(
                "segment {segment} out of range for a {}-segment capture",
                self.segments.len()
            ))
        })
    }

    /// `true` if `segment` timed out waiting for its trigger.
    pub fn timed_out(&mut self, segment: usize) -> AppResult<Checked<bool>> {
        self.definition(segment)?;
        let capture = self.capture;
        self.handle.call("seg_capture_timeout", |api, id| {
            api.seg_capture_timeout(id, capture, segment)
        })
    }

    /// Outcome of `segment`.
    pub fn outcome(&mut self, segment: usize) -> AppResult<Checked<SegmentOutcome>> {
        Ok(self.timed_out(segment)?.map(|timed_out| {
            if timed_out {
                SegmentOutcome::TimedOut
            } else {
                SegmentOutcome::Completed
            }
        }))
    }

    /// Trigger instant of `segment`, nanoseconds since the Unix epoch.
    pub fn time(&mut self, segment: usize) -> AppResult<Checked<i64>> {
        self.definition(segment)?;
        let capture = self.capture;
        self.handle.call("seg_capture_time", |api, id| {
            api.seg_capture_time(id, capture, segment)
        })
    }

    /// Trigger instant of `segment` in UTC.
    pub fn trigger_time(&mut self, segment: usize) -> AppResult<Checked<DateTime<Utc>>> {
        Ok(self.time(segment)?.map(timestamp_from_ns))
    }

    /// Read all `pre_trigger + post_trigger` samples of `segment`.
    pub fn read(&mut self, segment: usize) -> AppResult<Checked<Vec<Complex32>>> {
        let len = self.definition(segment)?.capture_len();
        let mut iq = vec![Complex32::new(0.0, 0.0); len];
        let checked = self.read_into(segment, &mut iq)?;
        Ok(checked.map(|()| iq))
    }

    /// Read `segment` into `iq`, which must hold exactly the segment length.
    pub fn read_into(&mut self, segment: usize, iq: &mut [Complex32]) -> AppResult<Checked<()>> {
        let expected = self.definition(segment)?.capture_len();
        if iq.len() != expected {
            return Err(DaqError::BufferSizeMismatch {
                expected,
                actual: iq.len(),
            });
        }
        let capture = self.capture;
        self.handle.call_status("seg_capture_read", |api, id| {
            api.seg_capture_read(id, capture, segment, iq, 0)
        })
    }

    fn release(&mut self) -> AppResult<Checked<()>> {
        self.state = CaptureState::Finished;
        let capture = self.capture;
        let checked = self.handle.release("seg_capture_finish", |api, id| {
            api.seg_capture_finish(id, capture)
        })?;
        tracing::debug!(device = self.handle.id().0, capture, "Capture finished");
        Ok(checked)
    }

    /// Release the device-side storage of this capture.
    pub fn finish(mut self) -> AppResult<Checked<()>> {
        self.release()
    }

    /// Finish the capture and return the device to idle.
    ///
    /// The handle must be reconfigured before the next acquisition.
    pub fn abort(mut self) -> AppResult<Checked<()>> {
        let finished = self.release();
        let aborted = self.handle.abort()?;
        finished?;
        Ok(aborted)
    }
}

impl Drop for SegmentedCapture<'_, '_> {
    fn drop(&mut self) {
        if self.state != CaptureState::Finished {
            if let Err(e) = self.release() {
                tracing::error!(
                    device = self.handle.id().0,
                    capture = self.capture,
                    "Failed to finish dropped capture: {}",
                    e
                );
            }
        }
    }
}

impl std::fmt::Debug for SegmentedCapture<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentedCapture")
            .field("device", &self.handle.id())
            .field("capture", &self.capture)
            .field("segments", &self.segments)
            .field("state", &self.state)
            .finish()
    }
}
