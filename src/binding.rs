//! Device Binding Surface
//!
//! [`DeviceApi`] is the raw, status-returning call surface of an RF analyzer
//! family. It mirrors the shape of a native vendor library: every call takes a
//! device id, returns exactly one [`StatusCode`], and fetch calls write into
//! caller-provided buffers whose length the binding does **not** check. All
//! sizing discipline therefore lives on the client side
//! (see [`crate::acquisition`]).
//!
//! Nothing outside [`crate::device`] calls a `DeviceApi` directly. Components
//! receive a [`BindingContext`], constructed once at startup, which pairs the
//! binding with the [`Interceptor`] every call is routed through.
//!
//! # Implementations
//!
//! - [`crate::sim::SimulatedAnalyzer`] - in-process device model used for tests
//!   and for running without hardware.

use crate::error::AppResult;
use crate::interceptor::{ErrorPolicy, Interceptor};
use crate::status::StatusCode;
use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Raw result of a binding call that also produces a value.
pub type Reply<T> = (StatusCode, T);

/// Integer identity of an open device, as handed out by the binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub i32);

impl DeviceId {
    /// Id the binding reports when no device could be opened.
    pub const INVALID: DeviceId = DeviceId(-1);
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hardware variant reported during enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    /// USB receiver without segmented capture support.
    Usb,
    /// USB receiver with segmented IQ capture.
    UsbSegmented,
    /// Receiver attached over a network link.
    Networked,
    /// USB signal generator.
    Generator,
}

impl DeviceType {
    /// Whether the device can run [`Mode::IqSegmented`].
    pub fn supports_segmented_capture(self) -> bool {
        matches!(self, DeviceType::UsbSegmented | DeviceType::Networked)
    }

    /// Whether the device is a signal source rather than a receiver.
    pub fn is_generator(self) -> bool {
        self == DeviceType::Generator
    }
}

/// Control link between host and device. Bounds IQ throughput.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkType {
    /// Local bus.
    Usb,
    /// Networked link.
    Network,
}

/// One entry returned by device enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceListing {
    /// Serial number, usable with open-by-serial.
    pub serial: u32,
    /// Hardware variant.
    pub device_type: DeviceType,
}

/// Firmware version triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion {
    /// Major version.
    pub major: u32,
    /// Minor version.
    pub minor: u32,
    /// Revision within the minor version.
    pub revision: u32,
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.revision)
    }
}

/// Identity of an open device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Serial number.
    pub serial: u32,
    /// Hardware variant.
    pub device_type: DeviceType,
    /// Control link in use.
    pub link: LinkType,
    /// Firmware running on the device.
    pub firmware: FirmwareVersion,
}

/// Acquisition mode committed by `configure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// No measurement active.
    Idle,
    /// Swept spectrum analysis.
    Sweeping,
    /// Continuous IQ streaming.
    IqStreaming,
    /// Triggered, segmented IQ capture.
    IqSegmented,
}

/// Sweep detector. `MinMax` yields distinct min and max traces, `Average`
/// yields a single trace returned in both buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Detector {
    /// Average of the samples in each bin.
    Average,
    /// Minimum and maximum of the samples in each bin.
    MinMax,
}

/// Units the detector operates in (processing units).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoUnits {
    /// Logarithmic (dB) processing.
    Log,
    /// Linear voltage.
    Voltage,
    /// Linear power.
    Power,
    /// No video processing.
    Sample,
}

/// Amplitude scale of returned traces (dBm or mV).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scale {
    /// dBm.
    Log,
    /// mV.
    Lin,
}

/// FFT window used by the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Window {
    /// Flat top, best amplitude accuracy.
    FlatTop,
    /// Nuttall.
    Nutall,
    /// Blackman.
    Blackman,
    /// Hamming.
    Hamming,
    /// Gaussian with 6 dB bandwidth equal to RBW.
    Gaussian6dB,
    /// Rectangular.
    Rect,
}

/// Trade-off between sweep speed and dynamic range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepSpeed {
    /// Device picks from the span and RBW.
    Auto,
    /// Full dynamic range.
    Normal,
    /// Faster sweeps at reduced dynamic range.
    Fast,
}

/// Front-end gain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gain {
    /// Device chooses gain from the reference level.
    Auto,
    /// Fixed gain step.
    Fixed(u8),
}

/// Front-end attenuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Attenuation {
    /// Device chooses attenuation from the reference level.
    Auto,
    /// Fixed attenuation step (5 dB per step).
    Fixed(u8),
}

/// Trigger source of one capture segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerType {
    /// Trigger as soon as the capture is armed.
    Immediate,
    /// Trigger on signal level.
    Video,
    /// Trigger on the external trigger input.
    External,
}

/// Active edge of the external trigger input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerEdge {
    /// Low-to-high transition.
    Rising,
    /// High-to-low transition.
    Falling,
}

/// Waveform of an analog modulating tone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModulationShape {
    /// Sine wave.
    Sine,
    /// Triangle wave.
    Triangle,
    /// Square wave.
    Square,
    /// Rising ramp.
    Ramp,
}

/// Pulse-shaping filter applied to digital symbols, with its rolloff or
/// bandwidth-time product.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SymbolFilter {
    /// Raised cosine with the given alpha.
    RaisedCosine(f64),
    /// Root raised cosine with the given alpha.
    RootRaisedCosine(f64),
    /// Gaussian with the given BT product.
    Gaussian(f64),
    /// Rectangular symbols.
    None,
}

impl SymbolFilter {
    /// Rolloff or BT parameter; 0 for [`SymbolFilter::None`].
    pub fn alpha(self) -> f64 {
        match self {
            SymbolFilter::RaisedCosine(a)
            | SymbolFilter::RootRaisedCosine(a)
            | SymbolFilter::Gaussian(a) => a,
            SymbolFilter::None => 0.0,
        }
    }
}

/// Phase or quadrature-amplitude constellation for PSK output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PskModulation {
    /// Binary PSK.
    Bpsk,
    /// Differential binary PSK.
    Dbpsk,
    /// Quadrature PSK.
    Qpsk,
    /// Differential QPSK.
    Dqpsk,
    /// Offset QPSK.
    Oqpsk,
    /// pi/4 differential QPSK.
    Pi4Dqpsk,
    /// 8-PSK.
    Psk8,
    /// Differential 8-PSK.
    D8psk,
    /// 16-PSK.
    Psk16,
    /// 16-QAM.
    Qam16,
    /// 64-QAM.
    Qam64,
    /// 256-QAM.
    Qam256,
}

impl PskModulation {
    /// Number of constellation points; symbols index `0..order()`.
    pub fn order(self) -> u32 {
        match self {
            PskModulation::Bpsk | PskModulation::Dbpsk => 2,
            PskModulation::Qpsk
            | PskModulation::Dqpsk
            | PskModulation::Oqpsk
            | PskModulation::Pi4Dqpsk => 4,
            PskModulation::Psk8 | PskModulation::D8psk => 8,
            PskModulation::Psk16 | PskModulation::Qam16 => 16,
            PskModulation::Qam64 => 64,
            PskModulation::Qam256 => 256,
        }
    }
}

/// One segment of a segmented IQ capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentDefinition {
    /// Trigger source.
    pub trigger: TriggerType,
    /// Samples kept before the trigger instant.
    pub pre_trigger: usize,
    /// Samples kept after the trigger instant.
    pub post_trigger: usize,
    /// How long to wait for the trigger before giving up.
    pub timeout: Duration,
}

impl SegmentDefinition {
    /// Total samples delivered by a read of this segment.
    pub fn capture_len(&self) -> usize {
        self.pre_trigger + self.post_trigger
    }
}

/// Sweep geometry as reported by the binding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepParameters {
    /// RBW in effect, in Hz.
    pub actual_rbw: f64,
    /// VBW in effect, in Hz.
    pub actual_vbw: f64,
    /// Frequency of bin 0 in Hz.
    pub actual_start_freq: f64,
    /// Spacing between bins in Hz.
    pub bin_size: f64,
    /// Number of bins in one sweep.
    pub sweep_size: usize,
}

/// Effective IQ stream parameters after configure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IqParameters {
    /// Samples per second after decimation.
    pub sample_rate: f64,
    /// Usable bandwidth in Hz.
    pub bandwidth: f64,
}

/// Side information of one IQ fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IqFetchInfo {
    /// Timestamp of the first sample.
    pub ns_since_epoch: i64,
    /// Samples were dropped before this block.
    pub sample_loss: bool,
    /// Samples still queued on the host.
    pub samples_remaining: usize,
}

/// Raw binding surface of an analyzer and generator family.
///
/// Receiver calls and `sg_` generator calls share one surface; a device
/// refuses calls meant for the other kind with
/// [`StatusCode::INVALID_CONFIGURATION_ERR`].
///
/// Implementations must be safe to share between threads; calls against a
/// single device are still issued sequentially by its owning handle.
pub trait DeviceApi: Send + Sync {
    /// Enumerate attached devices.
    fn get_device_list(&self) -> Reply<Vec<DeviceListing>>;
    /// Open the first available device.
    fn open_device(&self) -> Reply<DeviceId>;
    /// Open the device with the given serial number.
    fn open_device_by_serial(&self, serial: u32) -> Reply<DeviceId>;
    /// Open a device over the network.
    fn open_networked_device(&self, host_addr: &str, device_addr: &str, port: u16)
        -> Reply<DeviceId>;
    /// Release a device.
    fn close_device(&self, device: DeviceId) -> StatusCode;
    /// Return a device to its power-on state. Closes the device.
    fn preset(&self, device: DeviceId) -> StatusCode;
    /// Stop the active measurement and return to idle.
    fn abort(&self, device: DeviceId) -> StatusCode;
    /// Identity of an open device.
    fn get_device_info(&self, device: DeviceId) -> Reply<Option<DeviceInfo>>;

    /// Reference level in dBm.
    fn set_ref_level(&self, device: DeviceId, ref_level_dbm: f64) -> StatusCode;
    /// Reference level the device holds.
    fn get_ref_level(&self, device: DeviceId) -> Reply<f64>;
    /// Front-end gain and attenuation.
    fn set_gain_atten(&self, device: DeviceId, gain: Gain, atten: Attenuation) -> StatusCode;
    /// Sweep range by center and span in Hz.
    fn set_sweep_center_span(&self, device: DeviceId, center_hz: f64, span_hz: f64)
        -> StatusCode;
    /// Sweep range by start and stop frequency in Hz.
    fn set_sweep_start_stop(&self, device: DeviceId, start_hz: f64, stop_hz: f64)
        -> StatusCode;
    /// RBW, VBW and sweep time. VBW above RBW is for the device to judge.
    fn set_sweep_coupling(&self, device: DeviceId, rbw: f64, vbw: f64, sweep_time: Duration)
        -> StatusCode;
    /// Detector and the units it operates in.
    fn set_sweep_detector(&self, device: DeviceId, detector: Detector, units: VideoUnits)
        -> StatusCode;
    /// Amplitude scale of returned traces.
    fn set_sweep_scale(&self, device: DeviceId, scale: Scale) -> StatusCode;
    /// FFT window.
    fn set_sweep_window(&self, device: DeviceId, window: Window) -> StatusCode;
    /// Software spur rejection.
    fn set_sweep_spur_reject(&self, device: DeviceId, enabled: bool) -> StatusCode;
    /// Speed versus dynamic range.
    fn set_sweep_speed(&self, device: DeviceId, speed: SweepSpeed) -> StatusCode;

    /// IQ center frequency in Hz.
    fn set_iq_center_freq(&self, device: DeviceId, center_hz: f64) -> StatusCode;
    /// Decimation factor, a power of two.
    fn set_iq_sample_rate(&self, device: DeviceId, decimation: u32) -> StatusCode;
    /// IQ bandwidth in Hz, optionally through the software filter.
    fn set_iq_bandwidth(&self, device: DeviceId, software_filter: bool, bandwidth_hz: f64)
        -> StatusCode;

    /// Active edge of the external trigger input.
    fn set_seg_iq_ext_trigger(&self, device: DeviceId, edge: TriggerEdge) -> StatusCode;
    /// Number of segments per capture. Clears segment definitions.
    fn set_seg_iq_segment_count(&self, device: DeviceId, count: usize) -> StatusCode;
    /// Define one segment.
    fn set_seg_iq_segment(&self, device: DeviceId, segment: usize, def: SegmentDefinition)
        -> StatusCode;

    /// Commit pending configuration and enter `mode`.
    fn configure(&self, device: DeviceId, mode: Mode) -> StatusCode;
    /// Mode the device is running.
    fn get_current_mode(&self, device: DeviceId) -> Reply<Mode>;
    /// Sweep geometry of the active sweep configuration.
    fn get_sweep_parameters(&self, device: DeviceId) -> Reply<Option<SweepParameters>>;
    /// Effective IQ parameters of the active IQ configuration.
    fn get_iq_parameters(&self, device: DeviceId) -> Reply<Option<IqParameters>>;

    /// Perform one sweep into `sweep_min`/`sweep_max`. Returns the sweep
    /// timestamp in nanoseconds since the epoch.
    fn get_sweep(&self, device: DeviceId, sweep_min: &mut [f32], sweep_max: &mut [f32])
        -> Reply<i64>;
    /// Fill `iq` with the next samples of the stream.
    fn get_iq(&self, device: DeviceId, iq: &mut [Complex32], purge: bool) -> Reply<IqFetchInfo>;

    /// Arm `capture`.
    fn seg_capture_start(&self, device: DeviceId, capture: usize) -> StatusCode;
    /// Block until every segment of `capture` triggered or timed out.
    fn seg_capture_wait(&self, device: DeviceId, capture: usize) -> StatusCode;
    /// Whether `segment` ended without a trigger.
    fn seg_capture_timeout(&self, device: DeviceId, capture: usize, segment: usize)
        -> Reply<bool>;
    /// Trigger time of `segment`, nanoseconds since the epoch.
    fn seg_capture_time(&self, device: DeviceId, capture: usize, segment: usize) -> Reply<i64>;
    /// Copy samples of `segment` starting at `offset` into `iq`.
    fn seg_capture_read(
        &self,
        device: DeviceId,
        capture: usize,
        segment: usize,
        iq: &mut [Complex32],
        offset: usize,
    ) -> StatusCode;
    /// Release device-side storage of `capture`.
    fn seg_capture_finish(&self, device: DeviceId, capture: usize) -> StatusCode;

    /// Set output frequency in Hz and amplitude in dBm. Does not switch the
    /// output on.
    fn sg_set_frequency_amplitude(
        &self,
        device: DeviceId,
        frequency_hz: f64,
        amplitude_dbm: f64,
    ) -> StatusCode;
    /// Switch the RF output off.
    fn sg_rf_off(&self, device: DeviceId) -> StatusCode;
    /// Output an unmodulated carrier.
    fn sg_set_cw(&self, device: DeviceId) -> StatusCode;
    /// Amplitude-modulate the carrier. `depth_percent` spans 0 to 100.
    fn sg_set_am(
        &self,
        device: DeviceId,
        frequency_hz: f64,
        depth_percent: f64,
        shape: ModulationShape,
    ) -> StatusCode;
    /// Frequency-modulate the carrier.
    fn sg_set_fm(
        &self,
        device: DeviceId,
        frequency_hz: f64,
        deviation_hz: f64,
        shape: ModulationShape,
    ) -> StatusCode;
    /// Amplitude-shift keying of `symbols` (0 or 1) at `symbol_rate` Hz.
    fn sg_set_ask(
        &self,
        device: DeviceId,
        symbol_rate: f64,
        filter: SymbolFilter,
        depth_percent: f64,
        symbols: &[u32],
    ) -> StatusCode;
    /// Frequency-shift keying of `symbols` (0 or 1) at `symbol_rate` Hz.
    fn sg_set_fsk(
        &self,
        device: DeviceId,
        symbol_rate: f64,
        filter: SymbolFilter,
        modulation_index: f64,
        symbols: &[u32],
    ) -> StatusCode;
    /// Phase-shift or QAM keying of `symbols` at `symbol_rate` Hz.
    fn sg_set_psk(
        &self,
        device: DeviceId,
        symbol_rate: f64,
        modulation: PskModulation,
        filter: SymbolFilter,
        symbols: &[u32],
    ) -> StatusCode;
    /// Symbol clock the device actually runs for the active digital
    /// modulation.
    fn sg_query_symbol_clock_rate(&self, device: DeviceId) -> Reply<f64>;

    /// Release library-wide resources.
    fn shutdown(&self) -> StatusCode {
        StatusCode::NO_ERROR
    }
}

/// Binding context shared by every component that issues device calls.
///
/// Constructed once with [`BindingContext::init`] and torn down with
/// [`BindingContext::teardown`]. Device handles borrow the context, so the
/// borrow checker guarantees every handle is gone before teardown runs.
pub struct BindingContext {
    api: Arc<dyn DeviceApi>,
    interceptor: Interceptor,
}

impl BindingContext {
    /// Create a context around a binding using the given error policy.
    pub fn init(api: Arc<dyn DeviceApi>, policy: ErrorPolicy) -> Self {
        tracing::debug!(?policy, "Binding context initialized");
        Self {
            api,
            interceptor: Interceptor::new(policy),
        }
    }

    /// The raw binding.
    pub(crate) fn api(&self) -> &dyn DeviceApi {
        self.api.as_ref()
    }

    /// The interceptor every call passes through.
    pub fn interceptor(&self) -> &Interceptor {
        &self.interceptor
    }

    /// Release library-wide resources.
    pub fn teardown(self) -> AppResult<()> {
        let status = self.api.shutdown();
        self.interceptor.check("shutdown", None, status, ())?;
        tracing::debug!("Binding context torn down");
        Ok(())
    }
}

impl fmt::Debug for BindingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingContext")
            .field("interceptor", &self.interceptor)
            .finish_non_exhaustive()
    }
}
