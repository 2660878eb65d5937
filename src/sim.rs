//! Simulated analyzer.
//!
//! An in-process implementation of [`DeviceApi`] for running without hardware.
//! It models the device-side behavior the client depends on:
//!
//! - setters stage values that take effect on `configure`
//! - out-of-range values are clamped (positive status) or rejected
//!   (negative status), never silently accepted
//! - sweep geometry follows from span and RBW (`bin_size = rbw / 2`)
//! - IQ sample rate is `50 MS/s / decimation`
//! - segmented captures honor per-segment trigger type and timeout
//! - generator devices ([`DeviceType::Generator`]) accept only the `sg_`
//!   calls and clamp power, modulation rate, depth and symbol rate into
//!   their documented ranges
//!
//! # Performance Characteristics
//!
//! - Sweeps and IQ fetches return immediately
//! - `seg_capture_wait` sleeps until every segment has triggered or timed out

use crate::binding::{
    Attenuation, DeviceApi, DeviceId, DeviceInfo, DeviceListing, DeviceType, Detector,
    FirmwareVersion, Gain, IqFetchInfo, IqParameters, LinkType, Mode, ModulationShape,
    PskModulation, Reply, Scale, SegmentDefinition, SweepParameters, SweepSpeed, SymbolFilter,
    TriggerEdge, TriggerType, VideoUnits, Window,
};
use crate::status::StatusCode;
use num_complex::Complex32;
use rand::Rng;
use std::collections::HashMap;
use std::f32::consts::TAU;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Lowest tunable frequency in Hz.
pub const MIN_FREQ_HZ: f64 = 100.0e3;
/// Highest tunable frequency in Hz.
pub const MAX_FREQ_HZ: f64 = 20.0e9;
/// Lowest reference level in dBm.
pub const MIN_REF_LEVEL_DBM: f64 = -130.0;
/// Highest reference level in dBm.
pub const MAX_REF_LEVEL_DBM: f64 = 20.0;
/// IQ sample rate at decimation 1.
pub const BASE_SAMPLE_RATE: f64 = 50.0e6;
/// Largest IQ decimation factor.
pub const MAX_DECIMATION: u32 = 4096;
/// Most segments per capture.
pub const MAX_SEGMENTS: usize = 250;
const MAX_GAIN_STEP: u8 = 6;
const MAX_ATTEN_STEP: u8 = 6;
/// Usable fraction of the sample rate.
const MAX_BANDWIDTH_RATIO: f64 = 0.8;

/// Lowest generator output frequency in Hz.
pub const SG_MIN_FREQUENCY: f64 = 80.0e6;
/// Highest generator output frequency in Hz.
pub const SG_MAX_FREQUENCY: f64 = 2.55e9;
/// Lowest generator output power in dBm.
pub const SG_MIN_OUTPUT_POWER: f64 = -50.0;
/// Highest generator output power in dBm.
pub const SG_MAX_OUTPUT_POWER: f64 = 13.0;
/// Lowest analog modulation rate in Hz.
pub const SG_MIN_AM_FREQ: f64 = 30.0;
/// Highest analog modulation rate in Hz.
pub const SG_MAX_AM_FREQ: f64 = 50.0e6;
/// Lowest digital symbol rate in Hz.
pub const SG_MIN_SYMBOL_RATE: f64 = 53.334e3;
/// Highest digital symbol rate in Hz.
pub const SG_MAX_SYMBOL_RATE: f64 = 180.0e6;
/// Longest symbol sequence a generator accepts.
pub const SG_MAX_SYMBOLS: usize = 4096;

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

fn in_tuning_range(freq: f64) -> bool {
    (MIN_FREQ_HZ..=MAX_FREQ_HZ).contains(&freq)
}

/// Clamp `value` into `min..=max`, flagging `clamped` when it moved.
fn clamp_flag(value: f64, min: f64, max: f64, clamped: &mut bool) -> f64 {
    let out = value.clamp(min, max);
    if out != value {
        *clamped = true;
    }
    out
}

/// Analog modulation rate after device-side clamping.
fn modulation_rate(frequency_hz: f64, clamped: &mut bool) -> Result<f64, StatusCode> {
    if !frequency_hz.is_finite() || frequency_hz <= 0.0 {
        return Err(StatusCode::INVALID_PARAMETER_ERR);
    }
    Ok(clamp_flag(frequency_hz, SG_MIN_AM_FREQ, SG_MAX_AM_FREQ, clamped))
}

/// Validate a digital symbol stream and return the symbol rate the device
/// will run.
fn digital_symbol_rate(
    symbol_rate: f64,
    filter: SymbolFilter,
    symbols: &[u32],
    order: u32,
    clamped: &mut bool,
) -> Result<f64, StatusCode> {
    if !symbol_rate.is_finite() || symbol_rate <= 0.0 {
        return Err(StatusCode::INVALID_PARAMETER_ERR);
    }
    if symbols.is_empty() || symbols.len() > SG_MAX_SYMBOLS {
        return Err(StatusCode::INVALID_PARAMETER_ERR);
    }
    if symbols.iter().any(|&sym| sym >= order) {
        return Err(StatusCode::INVALID_PARAMETER_ERR);
    }
    if !(0.0..=1.0).contains(&filter.alpha()) {
        return Err(StatusCode::INVALID_PARAMETER_ERR);
    }
    Ok(clamp_flag(
        symbol_rate,
        SG_MIN_SYMBOL_RATE,
        SG_MAX_SYMBOL_RATE,
        clamped,
    ))
}

fn clamp_status(clamped: bool) -> StatusCode {
    if clamped {
        StatusCode::SETTING_CLAMPED
    } else {
        StatusCode::NO_ERROR
    }
}

/// Values staged on a simulated device, after device-side clamping.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedSettings {
    /// Reference level in dBm.
    pub ref_level: f64,
    /// Front-end gain.
    pub gain: Gain,
    /// Front-end attenuation.
    pub atten: Attenuation,
    /// Sweep center in Hz.
    pub center: f64,
    /// Sweep span in Hz.
    pub span: f64,
    /// Resolution bandwidth in Hz.
    pub rbw: f64,
    /// Video bandwidth in Hz.
    pub vbw: f64,
    /// Requested sweep time.
    pub sweep_time: Duration,
    /// Sweep detector.
    pub detector: Detector,
    /// Detector units.
    pub units: VideoUnits,
    /// Trace amplitude scale.
    pub scale: Scale,
    /// FFT window.
    pub window: Window,
    /// Spur rejection.
    pub spur_reject: bool,
    /// Sweep speed.
    pub speed: SweepSpeed,
    /// IQ center frequency in Hz.
    pub iq_center: f64,
    /// IQ decimation factor.
    pub decimation: u32,
    /// IQ software filter enabled.
    pub software_filter: bool,
    /// Requested IQ bandwidth in Hz.
    pub iq_bandwidth: f64,
    /// External trigger edge.
    pub ext_edge: TriggerEdge,
    /// Segment table.
    pub segments: Vec<Option<SegmentDefinition>>,
}

impl Default for StagedSettings {
    fn default() -> Self {
        Self {
            ref_level: -20.0,
            gain: Gain::Auto,
            atten: Attenuation::Auto,
            center: 1.0e9,
            span: 100.0e6,
            rbw: 100.0e3,
            vbw: 100.0e3,
            sweep_time: Duration::from_millis(1),
            detector: Detector::MinMax,
            units: VideoUnits::Log,
            scale: Scale::Log,
            window: Window::FlatTop,
            spur_reject: false,
            speed: SweepSpeed::Auto,
            iq_center: 1.0e9,
            decimation: 1,
            software_filter: true,
            iq_bandwidth: 40.0e6,
            ext_edge: TriggerEdge::Rising,
            segments: Vec::new(),
        }
    }
}

/// Modulation a simulated generator is producing.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalModulation {
    /// Unmodulated carrier.
    Cw,
    /// Analog amplitude modulation.
    Am {
        /// Modulating tone in Hz.
        frequency: f64,
        /// Depth in percent.
        depth_percent: f64,
        /// Tone waveform.
        shape: ModulationShape,
    },
    /// Analog frequency modulation.
    Fm {
        /// Modulating tone in Hz.
        frequency: f64,
        /// Peak deviation in Hz.
        deviation: f64,
        /// Tone waveform.
        shape: ModulationShape,
    },
    /// Amplitude-shift keying.
    Ask {
        /// Symbol rate in Hz.
        symbol_rate: f64,
        /// Depth in percent.
        depth_percent: f64,
        /// Number of symbols in the repeating sequence.
        symbols: usize,
    },
    /// Frequency-shift keying.
    Fsk {
        /// Symbol rate in Hz.
        symbol_rate: f64,
        /// FSK modulation index.
        modulation_index: f64,
        /// Number of symbols in the repeating sequence.
        symbols: usize,
    },
    /// Phase-shift or QAM keying.
    Psk {
        /// Symbol rate in Hz.
        symbol_rate: f64,
        /// Constellation.
        modulation: PskModulation,
        /// Number of symbols in the repeating sequence.
        symbols: usize,
    },
}

impl SignalModulation {
    fn symbol_rate(&self) -> Option<f64> {
        match self {
            SignalModulation::Ask { symbol_rate, .. }
            | SignalModulation::Fsk { symbol_rate, .. }
            | SignalModulation::Psk { symbol_rate, .. } => Some(*symbol_rate),
            _ => None,
        }
    }
}

/// Output state of a simulated generator, after device-side clamping.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorOutput {
    /// Carrier frequency in Hz.
    pub frequency: f64,
    /// Output power in dBm.
    pub amplitude: f64,
    /// RF output enabled.
    pub rf_on: bool,
    /// Active modulation; meaningful while `rf_on`.
    pub modulation: SignalModulation,
}

impl Default for GeneratorOutput {
    fn default() -> Self {
        Self {
            frequency: 1.0e9,
            amplitude: -20.0,
            rf_on: false,
            modulation: SignalModulation::Cw,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SegmentResult {
    timed_out: bool,
    trigger_ns: i64,
}

#[derive(Debug)]
struct SimCapture {
    armed_at: Instant,
    armed_ns: i64,
    results: Option<Vec<SegmentResult>>,
}

#[derive(Debug)]
enum Active {
    Idle,
    Sweep {
        params: SweepParameters,
        ref_level: f64,
        detector: Detector,
        scale: Scale,
        center: f64,
    },
    Stream {
        params: IqParameters,
        started_ns: i64,
        delivered: u64,
    },
    Segmented {
        params: IqParameters,
        segments: Vec<SegmentDefinition>,
        captures: HashMap<usize, SimCapture>,
    },
}

impl Active {
    fn mode(&self) -> Mode {
        match self {
            Active::Idle => Mode::Idle,
            Active::Sweep { .. } => Mode::Sweeping,
            Active::Stream { .. } => Mode::IqStreaming,
            Active::Segmented { .. } => Mode::IqSegmented,
        }
    }
}

#[derive(Debug)]
struct SimDevice {
    listing: DeviceListing,
    staged: StagedSettings,
    active: Active,
    output: GeneratorOutput,
}

#[derive(Debug, Default)]
struct SimState {
    next_id: i32,
    open: HashMap<i32, SimDevice>,
    faults: HashMap<&'static str, StatusCode>,
}

/// Builder for [`SimulatedAnalyzer`].
#[derive(Debug, Clone)]
pub struct SimulatedAnalyzerBuilder {
    devices: Vec<DeviceListing>,
    link: LinkType,
    trigger_delay: Option<Duration>,
    firmware: FirmwareVersion,
}

impl SimulatedAnalyzerBuilder {
    /// Attach a device with the given serial number.
    pub fn with_device(mut self, serial: u32, device_type: DeviceType) -> Self {
        self.devices.push(DeviceListing {
            serial,
            device_type,
        });
        self
    }

    /// Link reported for non-networked devices.
    pub fn with_link(mut self, link: LinkType) -> Self {
        self.link = link;
        self
    }

    /// When external and video triggers fire after arming. `None` means the
    /// trigger never arrives.
    pub fn with_external_trigger(mut self, delay: Option<Duration>) -> Self {
        self.trigger_delay = delay;
        self
    }

    /// Finish the analyzer.
    pub fn build(self) -> SimulatedAnalyzer {
        SimulatedAnalyzer {
            devices: self.devices,
            link: self.link,
            trigger_delay: self.trigger_delay,
            firmware: self.firmware,
            state: Mutex::new(SimState::default()),
        }
    }
}

/// Simulated analyzer family.
#[derive(Debug)]
pub struct SimulatedAnalyzer {
    devices: Vec<DeviceListing>,
    link: LinkType,
    trigger_delay: Option<Duration>,
    firmware: FirmwareVersion,
    state: Mutex<SimState>,
}

impl Default for SimulatedAnalyzer {
    /// One segmented-capable USB device, serial 1000, trigger arriving
    /// immediately.
    fn default() -> Self {
        Self::builder()
            .with_device(1000, DeviceType::UsbSegmented)
            .build()
    }
}

impl SimulatedAnalyzer {
    /// Start building an analyzer with no attached devices.
    pub fn builder() -> SimulatedAnalyzerBuilder {
        SimulatedAnalyzerBuilder {
            devices: Vec::new(),
            link: LinkType::Usb,
            trigger_delay: Some(Duration::ZERO),
            firmware: FirmwareVersion {
                major: 8,
                minor: 0,
                revision: 3,
            },
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next call of `operation` return `status`.
    ///
    /// An error status skips the operation. A warning status lets it take
    /// effect and reports the warning in place of its own status.
    pub fn fail_next(&self, operation: &'static str, status: StatusCode) {
        self.state().faults.insert(operation, status);
    }

    /// Number of devices currently open.
    pub fn open_devices(&self) -> usize {
        self.state().open.len()
    }

    /// Staged settings of the open device `device`.
    pub fn staged_settings(&self, device: DeviceId) -> Option<StagedSettings> {
        self.state().open.get(&device.0).map(|dev| dev.staged.clone())
    }

    /// Output state of the open generator `device`.
    pub fn generator_output(&self, device: DeviceId) -> Option<GeneratorOutput> {
        self.state().open.get(&device.0).map(|dev| dev.output.clone())
    }

    /// Armed captures not yet finished, across all devices.
    pub fn pending_captures(&self) -> usize {
        self.state()
            .open
            .values()
            .map(|dev| match &dev.active {
                Active::Segmented { captures, .. } => captures.len(),
                _ => 0,
            })
            .sum()
    }

    fn open_listing(&self, listing: Option<DeviceListing>, missing: StatusCode) -> Reply<DeviceId> {
        let mut state = self.state();
        let Some(listing) = listing else {
            return (missing, DeviceId::INVALID);
        };
        if state
            .open
            .values()
            .any(|dev| dev.listing.serial == listing.serial)
        {
            return (missing, DeviceId::INVALID);
        }
        let id = state.next_id;
        state.next_id += 1;
        state.open.insert(
            id,
            SimDevice {
                listing,
                staged: StagedSettings::default(),
                active: Active::Idle,
                output: GeneratorOutput::default(),
            },
        );
        tracing::trace!(device = id, serial = listing.serial, "Simulated device opened");
        (StatusCode::NO_ERROR, DeviceId(id))
    }

    fn first_closed(&self, filter: impl Fn(&DeviceListing) -> bool) -> Option<DeviceListing> {
        let state = self.state();
        self.devices
            .iter()
            .filter(|l| filter(l))
            .find(|l| !state.open.values().any(|dev| dev.listing.serial == l.serial))
            .copied()
    }

    /// Run `f` against an open device.
    ///
    /// A pending error fault for `operation` replaces the call. A pending
    /// warning lets the call take effect and replaces its status, unless the
    /// call itself failed.
    fn with_device<T>(
        &self,
        operation: &'static str,
        device: DeviceId,
        default: T,
        f: impl FnOnce(&mut SimDevice) -> Reply<T>,
    ) -> Reply<T> {
        let mut state = self.state();
        let fault = state.faults.remove(operation);
        if let Some(status) = fault.filter(|s| s.is_error()) {
            return (status, default);
        }
        let (status, value) = match state.open.get_mut(&device.0) {
            Some(dev) => f(dev),
            None => (StatusCode::INVALID_DEVICE_ERR, default),
        };
        match fault {
            Some(injected) if !status.is_error() => (injected, value),
            _ => (status, value),
        }
    }

    fn update(
        &self,
        operation: &'static str,
        device: DeviceId,
        f: impl FnOnce(&mut SimDevice) -> StatusCode,
    ) -> StatusCode {
        self.with_device(operation, device, (), |dev| (f(dev), ())).0
    }

    /// Like [`Self::update`], restricted to generator devices.
    fn update_generator(
        &self,
        operation: &'static str,
        device: DeviceId,
        f: impl FnOnce(&mut GeneratorOutput) -> Result<StatusCode, StatusCode>,
    ) -> StatusCode {
        self.update(operation, device, |dev| {
            if !dev.listing.device_type.is_generator() {
                return StatusCode::INVALID_CONFIGURATION_ERR;
            }
            f(&mut dev.output).unwrap_or_else(|status| status)
        })
    }

    fn configure_device(dev: &mut SimDevice, mode: Mode) -> StatusCode {
        if dev.listing.device_type.is_generator() && mode != Mode::Idle {
            return StatusCode::INVALID_CONFIGURATION_ERR;
        }
        let staged = &dev.staged;
        match mode {
            Mode::Idle => {
                dev.active = Active::Idle;
                StatusCode::NO_ERROR
            }
            Mode::Sweeping => {
                let bin_size = staged.rbw / 2.0;
                let sweep_size = (staged.span / bin_size).round() as usize + 1;
                dev.active = Active::Sweep {
                    params: SweepParameters {
                        actual_rbw: staged.rbw,
                        actual_vbw: staged.vbw,
                        actual_start_freq: staged.center - staged.span / 2.0,
                        bin_size,
                        sweep_size,
                    },
                    ref_level: staged.ref_level,
                    detector: staged.detector,
                    scale: staged.scale,
                    center: staged.center,
                };
                StatusCode::NO_ERROR
            }
            Mode::IqStreaming | Mode::IqSegmented => {
                let sample_rate = BASE_SAMPLE_RATE / f64::from(staged.decimation);
                let max_bw = sample_rate * MAX_BANDWIDTH_RATIO;
                let (bandwidth, status) = if staged.iq_bandwidth > max_bw {
                    (max_bw, StatusCode::SETTING_CLAMPED)
                } else {
                    (staged.iq_bandwidth, StatusCode::NO_ERROR)
                };
                let params = IqParameters {
                    sample_rate,
                    bandwidth,
                };
                if mode == Mode::IqStreaming {
                    dev.active = Active::Stream {
                        params,
                        started_ns: now_ns(),
                        delivered: 0,
                    };
                    return status;
                }
                if !dev.listing.device_type.supports_segmented_capture() {
                    return StatusCode::INVALID_CONFIGURATION_ERR;
                }
                let segments: Option<Vec<_>> = staged.segments.iter().copied().collect();
                match segments {
                    Some(segments) if !segments.is_empty() => {
                        dev.active = Active::Segmented {
                            params,
                            segments,
                            captures: HashMap::new(),
                        };
                        status
                    }
                    _ => StatusCode::INVALID_CONFIGURATION_ERR,
                }
            }
        }
    }

    /// Outcome of every segment of a capture armed at `armed_ns`, plus how
    /// long after arming the last segment ends.
    fn resolve_segments(
        &self,
        segments: &[SegmentDefinition],
        armed_ns: i64,
    ) -> (Vec<SegmentResult>, Duration) {
        let mut offset = Duration::ZERO;
        let results = segments
            .iter()
            .map(|def| {
                let delay = match def.trigger {
                    TriggerType::Immediate => Some(Duration::ZERO),
                    TriggerType::Video | TriggerType::External => self.trigger_delay,
                };
                let (timed_out, wait) = match delay {
                    Some(d) if d <= def.timeout => (false, d),
                    _ => (true, def.timeout),
                };
                offset += wait;
                SegmentResult {
                    timed_out,
                    trigger_ns: armed_ns + offset.as_nanos() as i64,
                }
            })
            .collect();
        (results, offset)
    }
}

fn tone_and_noise(iq: &mut [Complex32], start_index: u64, tone: bool) {
    let mut rng = rand::thread_rng();
    for (i, sample) in iq.iter_mut().enumerate() {
        let noise = Complex32::new(rng.gen_range(-1e-3..1e-3), rng.gen_range(-1e-3..1e-3));
        let signal = if tone {
            let phase = TAU * ((start_index + i as u64) % 8) as f32 / 8.0;
            Complex32::from_polar(0.1, phase)
        } else {
            Complex32::new(0.0, 0.0)
        };
        *sample = signal + noise;
    }
}

fn dbm_to_mv(dbm: f32) -> f32 {
    // 0 dBm into 50 ohm
    223.6 * 10f32.powf(dbm / 20.0)
}

impl DeviceApi for SimulatedAnalyzer {
    fn get_device_list(&self) -> Reply<Vec<DeviceListing>> {
        (StatusCode::NO_ERROR, self.devices.clone())
    }

    fn open_device(&self) -> Reply<DeviceId> {
        let listing = self.first_closed(|_| true);
        self.open_listing(listing, StatusCode::DEVICE_NOT_FOUND_ERR)
    }

    fn open_device_by_serial(&self, serial: u32) -> Reply<DeviceId> {
        let listing = self.first_closed(|l| l.serial == serial);
        self.open_listing(listing, StatusCode::DEVICE_NOT_FOUND_ERR)
    }

    fn open_networked_device(
        &self,
        _host_addr: &str,
        _device_addr: &str,
        _port: u16,
    ) -> Reply<DeviceId> {
        let listing = self.first_closed(|l| l.device_type == DeviceType::Networked);
        self.open_listing(listing, StatusCode::NETWORK_ERR)
    }

    fn close_device(&self, device: DeviceId) -> StatusCode {
        match self.state().open.remove(&device.0) {
            Some(_) => StatusCode::NO_ERROR,
            None => StatusCode::INVALID_DEVICE_ERR,
        }
    }

    fn preset(&self, device: DeviceId) -> StatusCode {
        let status = self.update("preset", device, |_| StatusCode::NO_ERROR);
        if status.is_ok() {
            self.state().open.remove(&device.0);
        }
        status
    }

    fn abort(&self, device: DeviceId) -> StatusCode {
        self.update("abort", device, |dev| {
            dev.active = Active::Idle;
            StatusCode::NO_ERROR
        })
    }

    fn get_device_info(&self, device: DeviceId) -> Reply<Option<DeviceInfo>> {
        let link = self.link;
        let firmware = self.firmware;
        self.with_device("get_device_info", device, None, |dev| {
            let link = if dev.listing.device_type == DeviceType::Networked {
                LinkType::Network
            } else {
                link
            };
            (
                StatusCode::NO_ERROR,
                Some(DeviceInfo {
                    serial: dev.listing.serial,
                    device_type: dev.listing.device_type,
                    link,
                    firmware,
                }),
            )
        })
    }

    fn set_ref_level(&self, device: DeviceId, ref_level_dbm: f64) -> StatusCode {
        self.update("set_ref_level", device, |dev| {
            let clamped = ref_level_dbm.clamp(MIN_REF_LEVEL_DBM, MAX_REF_LEVEL_DBM);
            dev.staged.ref_level = clamped;
            if clamped != ref_level_dbm {
                StatusCode::SETTING_CLAMPED
            } else {
                StatusCode::NO_ERROR
            }
        })
    }

    fn get_ref_level(&self, device: DeviceId) -> Reply<f64> {
        self.with_device("get_ref_level", device, 0.0, |dev| {
            (StatusCode::NO_ERROR, dev.staged.ref_level)
        })
    }

    fn set_gain_atten(&self, device: DeviceId, gain: Gain, atten: Attenuation) -> StatusCode {
        self.update("set_gain_atten", device, |dev| {
            let mut status = StatusCode::NO_ERROR;
            dev.staged.gain = match gain {
                Gain::Fixed(step) if step > MAX_GAIN_STEP => {
                    status = StatusCode::SETTING_CLAMPED;
                    Gain::Fixed(MAX_GAIN_STEP)
                }
                other => other,
            };
            dev.staged.atten = match atten {
                Attenuation::Fixed(step) if step > MAX_ATTEN_STEP => {
                    status = StatusCode::SETTING_CLAMPED;
                    Attenuation::Fixed(MAX_ATTEN_STEP)
                }
                other => other,
            };
            status
        })
    }

    fn set_sweep_center_span(&self, device: DeviceId, center_hz: f64, span_hz: f64) -> StatusCode {
        self.update("set_sweep_center_span", device, |dev| {
            if !in_tuning_range(center_hz) {
                return StatusCode::INVALID_CENTER_FREQ_ERR;
            }
            if span_hz <= 0.0 {
                return StatusCode::INVALID_PARAMETER_ERR;
            }
            let max_span = 2.0 * (center_hz - MIN_FREQ_HZ).min(MAX_FREQ_HZ - center_hz);
            dev.staged.center = center_hz;
            if span_hz > max_span {
                dev.staged.span = max_span;
                StatusCode::SETTING_CLAMPED
            } else {
                dev.staged.span = span_hz;
                StatusCode::NO_ERROR
            }
        })
    }

    fn set_sweep_start_stop(&self, device: DeviceId, start_hz: f64, stop_hz: f64) -> StatusCode {
        self.update("set_sweep_start_stop", device, |dev| {
            if start_hz >= stop_hz {
                return StatusCode::INVALID_PARAMETER_ERR;
            }
            let start = start_hz.max(MIN_FREQ_HZ);
            let stop = stop_hz.min(MAX_FREQ_HZ);
            if start >= stop {
                return StatusCode::INVALID_PARAMETER_ERR;
            }
            dev.staged.center = (start + stop) / 2.0;
            dev.staged.span = stop - start;
            if start != start_hz || stop != stop_hz {
                StatusCode::SETTING_CLAMPED
            } else {
                StatusCode::NO_ERROR
            }
        })
    }

    fn set_sweep_coupling(
        &self,
        device: DeviceId,
        rbw: f64,
        vbw: f64,
        sweep_time: Duration,
    ) -> StatusCode {
        self.update("set_sweep_coupling", device, |dev| {
            if rbw <= 0.0 || vbw <= 0.0 {
                return StatusCode::INVALID_PARAMETER_ERR;
            }
            dev.staged.rbw = rbw;
            dev.staged.sweep_time = sweep_time;
            if vbw > rbw {
                dev.staged.vbw = rbw;
                StatusCode::SETTING_CLAMPED
            } else {
                dev.staged.vbw = vbw;
                StatusCode::NO_ERROR
            }
        })
    }

    fn set_sweep_detector(
        &self,
        device: DeviceId,
        detector: Detector,
        units: VideoUnits,
    ) -> StatusCode {
        self.update("set_sweep_detector", device, |dev| {
            dev.staged.detector = detector;
            dev.staged.units = units;
            StatusCode::NO_ERROR
        })
    }

    fn set_sweep_scale(&self, device: DeviceId, scale: Scale) -> StatusCode {
        self.update("set_sweep_scale", device, |dev| {
            dev.staged.scale = scale;
            StatusCode::NO_ERROR
        })
    }

    fn set_sweep_window(&self, device: DeviceId, window: Window) -> StatusCode {
        self.update("set_sweep_window", device, |dev| {
            dev.staged.window = window;
            StatusCode::NO_ERROR
        })
    }

    fn set_sweep_spur_reject(&self, device: DeviceId, enabled: bool) -> StatusCode {
        self.update("set_sweep_spur_reject", device, |dev| {
            dev.staged.spur_reject = enabled;
            StatusCode::NO_ERROR
        })
    }

    fn set_sweep_speed(&self, device: DeviceId, speed: SweepSpeed) -> StatusCode {
        self.update("set_sweep_speed", device, |dev| {
            dev.staged.speed = speed;
            StatusCode::NO_ERROR
        })
    }

    fn set_iq_center_freq(&self, device: DeviceId, center_hz: f64) -> StatusCode {
        self.update("set_iq_center_freq", device, |dev| {
            if !in_tuning_range(center_hz) {
                return StatusCode::INVALID_CENTER_FREQ_ERR;
            }
            dev.staged.iq_center = center_hz;
            StatusCode::NO_ERROR
        })
    }

    fn set_iq_sample_rate(&self, device: DeviceId, decimation: u32) -> StatusCode {
        self.update("set_iq_sample_rate", device, |dev| {
            if !decimation.is_power_of_two() || decimation > MAX_DECIMATION {
                return StatusCode::INVALID_IQ_DECIMATION_ERR;
            }
            dev.staged.decimation = decimation;
            StatusCode::NO_ERROR
        })
    }

    fn set_iq_bandwidth(
        &self,
        device: DeviceId,
        software_filter: bool,
        bandwidth_hz: f64,
    ) -> StatusCode {
        self.update("set_iq_bandwidth", device, |dev| {
            if bandwidth_hz <= 0.0 {
                return StatusCode::INVALID_PARAMETER_ERR;
            }
            dev.staged.software_filter = software_filter;
            dev.staged.iq_bandwidth = bandwidth_hz;
            StatusCode::NO_ERROR
        })
    }

    fn set_seg_iq_ext_trigger(&self, device: DeviceId, edge: TriggerEdge) -> StatusCode {
        self.update("set_seg_iq_ext_trigger", device, |dev| {
            dev.staged.ext_edge = edge;
            StatusCode::NO_ERROR
        })
    }

    fn set_seg_iq_segment_count(&self, device: DeviceId, count: usize) -> StatusCode {
        self.update("set_seg_iq_segment_count", device, |dev| {
            if count == 0 || count > MAX_SEGMENTS {
                return StatusCode::INVALID_PARAMETER_ERR;
            }
            dev.staged.segments = vec![None; count];
            StatusCode::NO_ERROR
        })
    }

    fn set_seg_iq_segment(
        &self,
        device: DeviceId,
        segment: usize,
        def: SegmentDefinition,
    ) -> StatusCode {
        self.update("set_seg_iq_segment", device, |dev| {
            if def.capture_len() == 0 {
                return StatusCode::INVALID_PARAMETER_ERR;
            }
            match dev.staged.segments.get_mut(segment) {
                Some(slot) => {
                    *slot = Some(def);
                    StatusCode::NO_ERROR
                }
                None => StatusCode::INVALID_PARAMETER_ERR,
            }
        })
    }

    fn configure(&self, device: DeviceId, mode: Mode) -> StatusCode {
        self.update("configure", device, |dev| Self::configure_device(dev, mode))
    }

    fn get_current_mode(&self, device: DeviceId) -> Reply<Mode> {
        self.with_device("get_current_mode", device, Mode::Idle, |dev| {
            (StatusCode::NO_ERROR, dev.active.mode())
        })
    }

    fn get_sweep_parameters(&self, device: DeviceId) -> Reply<Option<SweepParameters>> {
        self.with_device("get_sweep_parameters", device, None, |dev| match &dev.active {
            Active::Sweep { params, .. } => (StatusCode::NO_ERROR, Some(*params)),
            _ => (StatusCode::INVALID_CONFIGURATION_ERR, None),
        })
    }

    fn get_iq_parameters(&self, device: DeviceId) -> Reply<Option<IqParameters>> {
        self.with_device("get_iq_parameters", device, None, |dev| match &dev.active {
            Active::Stream { params, .. } | Active::Segmented { params, .. } => {
                (StatusCode::NO_ERROR, Some(*params))
            }
            _ => (StatusCode::INVALID_CONFIGURATION_ERR, None),
        })
    }

    fn get_sweep(
        &self,
        device: DeviceId,
        sweep_min: &mut [f32],
        sweep_max: &mut [f32],
    ) -> Reply<i64> {
        self.with_device("get_sweep", device, 0, |dev| {
            let Active::Sweep {
                params,
                ref_level,
                detector,
                scale,
                center,
            } = &dev.active
            else {
                return (StatusCode::INVALID_CONFIGURATION_ERR, 0);
            };
            let mut rng = rand::thread_rng();
            let floor = (*ref_level - 70.0) as f32;
            let tone_bin = ((center - params.actual_start_freq) / params.bin_size).round() as usize;
            let bins = sweep_min.iter_mut().zip(sweep_max.iter_mut());
            for (i, (min, max)) in bins.take(params.sweep_size).enumerate() {
                let peak = if i == tone_bin {
                    (*ref_level - 10.0) as f32
                } else {
                    floor + rng.gen_range(0.0..3.0)
                };
                let low = match detector {
                    Detector::MinMax => peak - rng.gen_range(0.0..2.0),
                    Detector::Average => peak,
                };
                let (low, peak) = match scale {
                    Scale::Log => (low, peak),
                    Scale::Lin => (dbm_to_mv(low), dbm_to_mv(peak)),
                };
                *min = low;
                *max = peak;
            }
            (StatusCode::NO_ERROR, now_ns())
        })
    }

    fn get_iq(&self, device: DeviceId, iq: &mut [Complex32], purge: bool) -> Reply<IqFetchInfo> {
        self.with_device("get_iq", device, IqFetchInfo::default(), |dev| {
            let Active::Stream {
                params,
                started_ns,
                delivered,
            } = &mut dev.active
            else {
                return (StatusCode::INVALID_CONFIGURATION_ERR, IqFetchInfo::default());
            };
            if purge {
                *started_ns = now_ns();
                *delivered = 0;
            }
            let offset_ns = (*delivered as f64 / params.sample_rate * 1.0e9) as i64;
            tone_and_noise(iq, *delivered, true);
            *delivered += iq.len() as u64;
            (
                StatusCode::NO_ERROR,
                IqFetchInfo {
                    ns_since_epoch: *started_ns + offset_ns,
                    sample_loss: false,
                    samples_remaining: 0,
                },
            )
        })
    }

    fn seg_capture_start(&self, device: DeviceId, capture: usize) -> StatusCode {
        self.update("seg_capture_start", device, |dev| {
            let Active::Segmented { captures, .. } = &mut dev.active else {
                return StatusCode::INVALID_CONFIGURATION_ERR;
            };
            if captures.contains_key(&capture) {
                return StatusCode::INVALID_PARAMETER_ERR;
            }
            captures.insert(
                capture,
                SimCapture {
                    armed_at: Instant::now(),
                    armed_ns: now_ns(),
                    results: None,
                },
            );
            StatusCode::NO_ERROR
        })
    }

    fn seg_capture_wait(&self, device: DeviceId, capture: usize) -> StatusCode {
        let (status, deadline) = self.with_device("seg_capture_wait", device, None, |dev| {
            let Active::Segmented {
                segments, captures, ..
            } = &mut dev.active
            else {
                return (StatusCode::INVALID_CONFIGURATION_ERR, None);
            };
            let Some(cap) = captures.get_mut(&capture) else {
                return (StatusCode::INVALID_PARAMETER_ERR, None);
            };
            let (results, total) = self.resolve_segments(segments, cap.armed_ns);
            cap.results = Some(results);
            (StatusCode::NO_ERROR, Some(cap.armed_at + total))
        });
        if let Some(deadline) = deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !remaining.is_zero() {
                std::thread::sleep(remaining);
            }
        }
        status
    }

    fn seg_capture_timeout(&self, device: DeviceId, capture: usize, segment: usize) -> Reply<bool> {
        self.with_device("seg_capture_timeout", device, false, |dev| {
            match segment_result(&dev.active, capture, segment) {
                Ok(result) => (StatusCode::NO_ERROR, result.timed_out),
                Err(status) => (status, false),
            }
        })
    }

    fn seg_capture_time(&self, device: DeviceId, capture: usize, segment: usize) -> Reply<i64> {
        self.with_device("seg_capture_time", device, 0, |dev| {
            match segment_result(&dev.active, capture, segment) {
                Ok(result) => (StatusCode::NO_ERROR, result.trigger_ns),
                Err(status) => (status, 0),
            }
        })
    }

    fn seg_capture_read(
        &self,
        device: DeviceId,
        capture: usize,
        segment: usize,
        iq: &mut [Complex32],
        offset: usize,
    ) -> StatusCode {
        self.update("seg_capture_read", device, |dev| {
            let result = match segment_result(&dev.active, capture, segment) {
                Ok(result) => result,
                Err(status) => return status,
            };
            let Active::Segmented { segments, .. } = &dev.active else {
                return StatusCode::INVALID_CONFIGURATION_ERR;
            };
            let len = segments[segment].capture_len();
            if offset + iq.len() > len {
                return StatusCode::INVALID_PARAMETER_ERR;
            }
            tone_and_noise(iq, offset as u64, !result.timed_out);
            StatusCode::NO_ERROR
        })
    }

    fn seg_capture_finish(&self, device: DeviceId, capture: usize) -> StatusCode {
        self.update("seg_capture_finish", device, |dev| match &mut dev.active {
            Active::Segmented { captures, .. } => match captures.remove(&capture) {
                Some(_) => StatusCode::NO_ERROR,
                None => StatusCode::INVALID_PARAMETER_ERR,
            },
            _ => StatusCode::INVALID_CONFIGURATION_ERR,
        })
    }

    fn sg_set_frequency_amplitude(
        &self,
        device: DeviceId,
        frequency_hz: f64,
        amplitude_dbm: f64,
    ) -> StatusCode {
        self.update_generator("sg_set_frequency_amplitude", device, |out| {
            if !(SG_MIN_FREQUENCY..=SG_MAX_FREQUENCY).contains(&frequency_hz) {
                return Err(StatusCode::INVALID_CENTER_FREQ_ERR);
            }
            if amplitude_dbm.is_nan() {
                return Err(StatusCode::INVALID_PARAMETER_ERR);
            }
            let mut clamped = false;
            out.frequency = frequency_hz;
            out.amplitude = clamp_flag(
                amplitude_dbm,
                SG_MIN_OUTPUT_POWER,
                SG_MAX_OUTPUT_POWER,
                &mut clamped,
            );
            Ok(clamp_status(clamped))
        })
    }

    fn sg_rf_off(&self, device: DeviceId) -> StatusCode {
        self.update_generator("sg_rf_off", device, |out| {
            out.rf_on = false;
            Ok(StatusCode::NO_ERROR)
        })
    }

    fn sg_set_cw(&self, device: DeviceId) -> StatusCode {
        self.update_generator("sg_set_cw", device, |out| {
            out.modulation = SignalModulation::Cw;
            out.rf_on = true;
            Ok(StatusCode::NO_ERROR)
        })
    }

    fn sg_set_am(
        &self,
        device: DeviceId,
        frequency_hz: f64,
        depth_percent: f64,
        shape: ModulationShape,
    ) -> StatusCode {
        self.update_generator("sg_set_am", device, |out| {
            if depth_percent.is_nan() {
                return Err(StatusCode::INVALID_PARAMETER_ERR);
            }
            let mut clamped = false;
            out.modulation = SignalModulation::Am {
                frequency: modulation_rate(frequency_hz, &mut clamped)?,
                depth_percent: clamp_flag(depth_percent, 0.0, 100.0, &mut clamped),
                shape,
            };
            out.rf_on = true;
            Ok(clamp_status(clamped))
        })
    }

    fn sg_set_fm(
        &self,
        device: DeviceId,
        frequency_hz: f64,
        deviation_hz: f64,
        shape: ModulationShape,
    ) -> StatusCode {
        self.update_generator("sg_set_fm", device, |out| {
            if !deviation_hz.is_finite() || deviation_hz <= 0.0 {
                return Err(StatusCode::INVALID_PARAMETER_ERR);
            }
            let mut clamped = false;
            out.modulation = SignalModulation::Fm {
                frequency: modulation_rate(frequency_hz, &mut clamped)?,
                deviation: deviation_hz,
                shape,
            };
            out.rf_on = true;
            Ok(clamp_status(clamped))
        })
    }

    fn sg_set_ask(
        &self,
        device: DeviceId,
        symbol_rate: f64,
        filter: SymbolFilter,
        depth_percent: f64,
        symbols: &[u32],
    ) -> StatusCode {
        self.update_generator("sg_set_ask", device, |out| {
            if depth_percent.is_nan() {
                return Err(StatusCode::INVALID_PARAMETER_ERR);
            }
            let mut clamped = false;
            let rate = digital_symbol_rate(symbol_rate, filter, symbols, 2, &mut clamped)?;
            out.modulation = SignalModulation::Ask {
                symbol_rate: rate,
                depth_percent: clamp_flag(depth_percent, 0.0, 100.0, &mut clamped),
                symbols: symbols.len(),
            };
            out.rf_on = true;
            Ok(clamp_status(clamped))
        })
    }

    fn sg_set_fsk(
        &self,
        device: DeviceId,
        symbol_rate: f64,
        filter: SymbolFilter,
        modulation_index: f64,
        symbols: &[u32],
    ) -> StatusCode {
        self.update_generator("sg_set_fsk", device, |out| {
            if !modulation_index.is_finite() || modulation_index <= 0.0 {
                return Err(StatusCode::INVALID_PARAMETER_ERR);
            }
            let mut clamped = false;
            let rate = digital_symbol_rate(symbol_rate, filter, symbols, 2, &mut clamped)?;
            out.modulation = SignalModulation::Fsk {
                symbol_rate: rate,
                modulation_index,
                symbols: symbols.len(),
            };
            out.rf_on = true;
            Ok(clamp_status(clamped))
        })
    }

    fn sg_set_psk(
        &self,
        device: DeviceId,
        symbol_rate: f64,
        modulation: PskModulation,
        filter: SymbolFilter,
        symbols: &[u32],
    ) -> StatusCode {
        self.update_generator("sg_set_psk", device, |out| {
            let mut clamped = false;
            let order = modulation.order();
            let rate = digital_symbol_rate(symbol_rate, filter, symbols, order, &mut clamped)?;
            out.modulation = SignalModulation::Psk {
                symbol_rate: rate,
                modulation,
                symbols: symbols.len(),
            };
            out.rf_on = true;
            Ok(clamp_status(clamped))
        })
    }

    fn sg_query_symbol_clock_rate(&self, device: DeviceId) -> Reply<f64> {
        self.with_device("sg_query_symbol_clock_rate", device, 0.0, |dev| {
            if !dev.listing.device_type.is_generator() {
                return (StatusCode::INVALID_CONFIGURATION_ERR, 0.0);
            }
            match dev.output.modulation.symbol_rate() {
                Some(rate) if dev.output.rf_on => (StatusCode::NO_ERROR, rate),
                _ => (StatusCode::INVALID_CONFIGURATION_ERR, 0.0),
            }
        })
    }
}

fn segment_result(
    active: &Active,
    capture: usize,
    segment: usize,
) -> Result<SegmentResult, StatusCode> {
    let Active::Segmented { captures, .. } = active else {
        return Err(StatusCode::INVALID_CONFIGURATION_ERR);
    };
    captures
        .get(&capture)
        .and_then(|cap| cap.results.as_ref())
        .and_then(|results| results.get(segment))
        .copied()
        .ok_or(StatusCode::INVALID_PARAMETER_ERR)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sim() -> SimulatedAnalyzer {
        SimulatedAnalyzer::builder()
            .with_device(7, DeviceType::UsbSegmented)
            .build()
    }

    #[test]
    fn settings_take_effect_on_configure() {
        let sim = sim();
        let (_, id) = sim.open_device();
        assert_eq!(sim.set_sweep_center_span(id, 2.0e9, 1.0e6), StatusCode::NO_ERROR);
        assert_eq!(
            sim.set_sweep_coupling(id, 10.0e3, 10.0e3, Duration::from_millis(1)),
            StatusCode::NO_ERROR
        );
        assert_eq!(sim.get_sweep_parameters(id).0, StatusCode::INVALID_CONFIGURATION_ERR);

        assert_eq!(sim.configure(id, Mode::Sweeping), StatusCode::NO_ERROR);
        let params = sim.get_sweep_parameters(id).1.unwrap();
        assert_eq!(params.bin_size, 5.0e3);
        assert_eq!(params.sweep_size, 201);
        assert_eq!(params.actual_start_freq, 2.0e9 - 0.5e6);
    }

    #[test]
    fn out_of_range_values_are_clamped_or_rejected() {
        let sim = sim();
        let (_, id) = sim.open_device();
        assert_eq!(sim.set_ref_level(id, 35.0), StatusCode::SETTING_CLAMPED);
        assert_eq!(sim.get_ref_level(id).1, MAX_REF_LEVEL_DBM);
        assert_eq!(
            sim.set_sweep_coupling(id, 1.0e3, 3.0e3, Duration::ZERO),
            StatusCode::SETTING_CLAMPED
        );
        assert_eq!(sim.set_iq_center_freq(id, 30.0e9), StatusCode::INVALID_CENTER_FREQ_ERR);
        assert_eq!(sim.set_iq_sample_rate(id, 3), StatusCode::INVALID_IQ_DECIMATION_ERR);
        assert_eq!(sim.set_sweep_center_span(id, 1.0e9, 0.0), StatusCode::INVALID_PARAMETER_ERR);
    }

    #[test]
    fn unknown_device_is_invalid() {
        let sim = sim();
        assert_eq!(sim.abort(DeviceId(42)), StatusCode::INVALID_DEVICE_ERR);
        assert_eq!(sim.close_device(DeviceId(42)), StatusCode::INVALID_DEVICE_ERR);
    }

    #[test]
    fn injected_fault_fires_once() {
        let sim = sim();
        let (_, id) = sim.open_device();
        sim.fail_next("abort", StatusCode::CONNECTION_LOST_ERR);
        assert_eq!(sim.abort(id), StatusCode::CONNECTION_LOST_ERR);
        assert_eq!(sim.abort(id), StatusCode::NO_ERROR);
    }

    #[test]
    fn injected_warning_still_takes_effect() {
        let sim = sim();
        let (_, id) = sim.open_device();
        sim.fail_next("configure", StatusCode::UNCAL_DATA);
        assert_eq!(sim.configure(id, Mode::Sweeping), StatusCode::UNCAL_DATA);
        assert_eq!(sim.get_current_mode(id), (StatusCode::NO_ERROR, Mode::Sweeping));

        sim.fail_next("set_ref_level", StatusCode::TEMP_DRIFT_WARNING);
        assert_eq!(sim.set_ref_level(id, -35.0), StatusCode::TEMP_DRIFT_WARNING);
        assert_eq!(sim.get_ref_level(id).1, -35.0);
    }

    #[test]
    fn generator_clamps_and_rejects_at_range_edges() {
        let sim = SimulatedAnalyzer::builder()
            .with_device(21, DeviceType::Generator)
            .build();
        let (_, id) = sim.open_device();

        assert_eq!(
            sim.sg_set_frequency_amplitude(id, 3.0e9, 0.0),
            StatusCode::INVALID_CENTER_FREQ_ERR
        );
        assert_eq!(
            sim.sg_set_frequency_amplitude(id, 915.0e6, 20.0),
            StatusCode::SETTING_CLAMPED
        );
        let out = sim.generator_output(id).unwrap();
        assert_eq!(out.amplitude, SG_MAX_OUTPUT_POWER);
        assert!(!out.rf_on);

        assert_eq!(
            sim.sg_set_am(id, 10.0, 150.0, ModulationShape::Sine),
            StatusCode::SETTING_CLAMPED
        );
        assert_eq!(
            sim.generator_output(id).unwrap().modulation,
            SignalModulation::Am {
                frequency: SG_MIN_AM_FREQ,
                depth_percent: 100.0,
                shape: ModulationShape::Sine,
            }
        );
        assert_eq!(
            sim.sg_set_psk(id, 1.0e6, PskModulation::Qpsk, SymbolFilter::None, &[0, 4]),
            StatusCode::INVALID_PARAMETER_ERR
        );
        assert_eq!(sim.sg_query_symbol_clock_rate(id).0, StatusCode::INVALID_CONFIGURATION_ERR);
    }

    #[test]
    fn receiver_refuses_generator_calls() {
        let sim = sim();
        let (_, id) = sim.open_device();
        assert_eq!(sim.sg_set_cw(id), StatusCode::INVALID_CONFIGURATION_ERR);
        assert!(!sim.generator_output(id).unwrap().rf_on);
    }

    #[test]
    fn immediate_segments_never_time_out() {
        let sim = SimulatedAnalyzer::builder()
            .with_device(7, DeviceType::UsbSegmented)
            .with_external_trigger(None)
            .build();
        let (_, id) = sim.open_device();
        sim.set_seg_iq_segment_count(id, 2);
        let immediate = SegmentDefinition {
            trigger: TriggerType::Immediate,
            pre_trigger: 0,
            post_trigger: 64,
            timeout: Duration::from_millis(5),
        };
        let external = SegmentDefinition {
            trigger: TriggerType::External,
            ..immediate
        };
        sim.set_seg_iq_segment(id, 0, immediate);
        sim.set_seg_iq_segment(id, 1, external);
        assert_eq!(sim.configure(id, Mode::IqSegmented), StatusCode::NO_ERROR);

        assert_eq!(sim.seg_capture_start(id, 0), StatusCode::NO_ERROR);
        assert_eq!(sim.seg_capture_wait(id, 0), StatusCode::NO_ERROR);
        assert_eq!(sim.seg_capture_timeout(id, 0, 0), (StatusCode::NO_ERROR, false));
        assert_eq!(sim.seg_capture_timeout(id, 0, 1), (StatusCode::NO_ERROR, true));
        assert_eq!(sim.pending_captures(), 1);
        assert_eq!(sim.seg_capture_finish(id, 0), StatusCode::NO_ERROR);
        assert_eq!(sim.pending_captures(), 0);
    }

    #[test]
    fn plain_usb_device_cannot_segment() {
        let sim = SimulatedAnalyzer::builder()
            .with_device(8, DeviceType::Usb)
            .build();
        let (_, id) = sim.open_device();
        sim.set_seg_iq_segment_count(id, 1);
        sim.set_seg_iq_segment(
            id,
            0,
            SegmentDefinition {
                trigger: TriggerType::Immediate,
                pre_trigger: 16,
                post_trigger: 16,
                timeout: Duration::ZERO,
            },
        );
        assert_eq!(sim.configure(id, Mode::IqSegmented), StatusCode::INVALID_CONFIGURATION_ERR);
    }
}
