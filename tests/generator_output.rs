//! Integration tests for signal generator output
//!
//! Device-side clamping and rejection at the generator's frequency, power,
//! modulation and symbol-rate limits, against the simulated generator.

mod common;

use rf_daq::binding::{DeviceType, Mode, ModulationShape, PskModulation, SymbolFilter};
use rf_daq::device::DeviceHandle;
use rf_daq::error::DaqError;
use rf_daq::generator::SymbolStream;
use rf_daq::sim::{
    SignalModulation, SimulatedAnalyzer, SG_MAX_OUTPUT_POWER, SG_MAX_SYMBOL_RATE,
    SG_MIN_AM_FREQ, SG_MIN_SYMBOL_RATE,
};
use rf_daq::status::StatusCode;
use std::sync::Arc;

const GENERATOR: u32 = 2500;

fn generator() -> Arc<SimulatedAnalyzer> {
    Arc::new(
        SimulatedAnalyzer::builder()
            .with_device(GENERATOR, DeviceType::Generator)
            .build(),
    )
}

// =============================================================================
// Frequency and amplitude
// =============================================================================

#[test]
fn test_cw_output_at_requested_frequency() {
    let sim = generator();
    let ctx = common::context(&sim);
    let mut sg = DeviceHandle::open(&ctx).unwrap();

    sg.set_frequency_amplitude(433.92e6, -30.0).unwrap();
    let out = sim.generator_output(sg.id()).unwrap();
    assert_eq!(out.frequency, 433.92e6);
    assert!(!out.rf_on);

    sg.output_cw().unwrap();
    let out = sim.generator_output(sg.id()).unwrap();
    assert!(out.rf_on);
    assert_eq!(out.modulation, SignalModulation::Cw);

    sg.rf_off().unwrap();
    assert!(!sim.generator_output(sg.id()).unwrap().rf_on);
}

#[test]
fn test_excess_power_is_clamped_with_warning() {
    let sim = generator();
    let ctx = common::context(&sim);
    let mut sg = DeviceHandle::open(&ctx).unwrap();

    let checked = sg.set_frequency_amplitude(1.0e9, 25.0).unwrap();
    assert_eq!(
        checked.warning.map(|w| w.status),
        Some(StatusCode::SETTING_CLAMPED)
    );
    assert_eq!(
        sim.generator_output(sg.id()).unwrap().amplitude,
        SG_MAX_OUTPUT_POWER
    );
    assert!(sg.is_open());
    assert_eq!(sg.take_warnings().len(), 1);
}

#[test]
fn test_frequency_outside_range_is_rejected() {
    let sim = generator();
    let ctx = common::context(&sim);
    let mut sg = DeviceHandle::open(&ctx).unwrap();

    let err = sg.set_frequency_amplitude(10.0e6, -10.0).unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::INVALID_CENTER_FREQ_ERR));
    assert_eq!(sim.generator_output(sg.id()).unwrap().frequency, 1.0e9);
    assert!(matches!(
        sg.output_cw(),
        Err(DaqError::SessionPoisoned { .. })
    ));
    sg.close().unwrap();
}

// =============================================================================
// Analog modulation
// =============================================================================

#[test]
fn test_am_rate_and_depth_are_clamped() {
    let sim = generator();
    let ctx = common::context(&sim);
    let mut sg = DeviceHandle::open(&ctx).unwrap();

    let checked = sg.output_am(5.0, 120.0, ModulationShape::Triangle).unwrap();
    assert!(checked.has_warning());
    assert_eq!(
        sim.generator_output(sg.id()).unwrap().modulation,
        SignalModulation::Am {
            frequency: SG_MIN_AM_FREQ,
            depth_percent: 100.0,
            shape: ModulationShape::Triangle,
        }
    );
}

#[test]
fn test_fm_in_range_is_accepted_unchanged() {
    let sim = generator();
    let ctx = common::context(&sim);
    let mut sg = DeviceHandle::open(&ctx).unwrap();

    let checked = sg.output_fm(1.0e3, 5.0e3, ModulationShape::Sine).unwrap();
    assert!(!checked.has_warning());
    assert_eq!(
        sim.generator_output(sg.id()).unwrap().modulation,
        SignalModulation::Fm {
            frequency: 1.0e3,
            deviation: 5.0e3,
            shape: ModulationShape::Sine,
        }
    );
}

#[test]
fn test_fm_without_deviation_is_rejected() {
    let sim = generator();
    let ctx = common::context(&sim);
    let mut sg = DeviceHandle::open(&ctx).unwrap();

    let err = sg.output_fm(1.0e3, 0.0, ModulationShape::Sine).unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::INVALID_PARAMETER_ERR));
    assert!(sg.is_poisoned());
}

// =============================================================================
// Digital modulation
// =============================================================================

#[test]
fn test_symbol_rate_is_clamped_at_both_ends() {
    let sim = generator();
    let ctx = common::context(&sim);
    let mut sg = DeviceHandle::open(&ctx).unwrap();
    let symbols: [u32; 5] = [0, 1, 1, 0, 1];

    let fast = SymbolStream {
        symbol_rate: 500.0e6,
        filter: SymbolFilter::Gaussian(0.5),
        symbols: &symbols,
    };
    let checked = sg.output_fsk(&fast, 0.5).unwrap();
    assert!(checked.has_warning());
    assert_eq!(
        sg.symbol_clock_rate().unwrap().into_value(),
        SG_MAX_SYMBOL_RATE
    );

    let slow = SymbolStream {
        symbol_rate: 1.0e3,
        ..fast
    };
    let checked = sg.output_ask(&slow, 50.0).unwrap();
    assert!(checked.has_warning());
    assert_eq!(
        sg.symbol_clock_rate().unwrap().into_value(),
        SG_MIN_SYMBOL_RATE
    );
    assert!(sg.is_open());
}

#[test]
fn test_psk_symbols_must_fit_the_constellation() {
    let sim = generator();
    let ctx = common::context(&sim);
    let mut sg = DeviceHandle::open(&ctx).unwrap();

    let symbols: [u32; 4] = [0, 3, 2, 1];
    let stream = SymbolStream {
        symbol_rate: 1.0e6,
        filter: SymbolFilter::RootRaisedCosine(0.35),
        symbols: &symbols,
    };
    let checked = sg.output_psk(&stream, PskModulation::Qpsk).unwrap();
    assert!(!checked.has_warning());
    assert_eq!(sg.symbol_clock_rate().unwrap().into_value(), 1.0e6);

    let err = sg.output_psk(&stream, PskModulation::Bpsk).unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::INVALID_PARAMETER_ERR));
    assert!(sg.is_poisoned());
}

#[test]
fn test_empty_symbol_sequence_is_rejected_by_device() {
    let sim = generator();
    let ctx = common::context(&sim);
    let mut sg = DeviceHandle::open(&ctx).unwrap();

    let stream = SymbolStream {
        symbol_rate: 1.0e6,
        filter: SymbolFilter::None,
        symbols: &[],
    };
    let err = sg.output_ask(&stream, 100.0).unwrap_err();
    assert!(matches!(
        err,
        DaqError::Device {
            operation: "sg_set_ask",
            ..
        }
    ));
}

// =============================================================================
// Device kinds
// =============================================================================

#[test]
fn test_generator_and_receiver_refuse_each_others_calls() {
    let sim = Arc::new(
        SimulatedAnalyzer::builder()
            .with_device(GENERATOR, DeviceType::Generator)
            .with_device(common::SERIAL, DeviceType::UsbSegmented)
            .build(),
    );
    let ctx = common::context(&sim);

    let mut sg = DeviceHandle::open_by_serial(&ctx, GENERATOR).unwrap();
    let err = sg.configure(Mode::Sweeping).unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::INVALID_CONFIGURATION_ERR));

    let mut sa = DeviceHandle::open_by_serial(&ctx, common::SERIAL).unwrap();
    let err = sa.output_cw().unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::INVALID_CONFIGURATION_ERR));
}
