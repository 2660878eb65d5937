//! Integration tests for sweep configuration and acquisition
//!
//! Runs the configure -> geometry -> fetch sequence against the simulated
//! analyzer and checks buffer sizing, the frequency axis and geometry
//! invalidation.

mod common;

use rf_daq::acquisition::SweepBuffer;
use rf_daq::binding::{Detector, Mode, VideoUnits};
use rf_daq::device::DeviceHandle;
use rf_daq::error::DaqError;
use rf_daq::status::StatusCode;
use std::sync::Arc;
use std::time::Duration;

const CENTER: f64 = 1.0e9;
const SPAN: f64 = 20.0e6;
const RBW: f64 = 10.0e3;

fn configure_sweep(handle: &mut DeviceHandle<'_>, center: f64, span: f64) {
    handle.set_ref_level(-20.0).unwrap();
    handle.set_sweep_center_span(center, span).unwrap();
    handle
        .set_sweep_coupling(RBW, RBW, Duration::from_millis(10))
        .unwrap();
    handle.configure(Mode::Sweeping).unwrap();
}

// =============================================================================
// Geometry and fetch
// =============================================================================

#[test]
fn test_fetch_yields_exactly_trace_len_bins() {
    let sim = Arc::new(common::analyzer().build());
    let ctx = common::context(&sim);
    let mut sa = DeviceHandle::open(&ctx).unwrap();
    configure_sweep(&mut sa, CENTER, SPAN);

    let geometry = sa.sweep_geometry().unwrap().into_value();
    assert_eq!(geometry.bin_size(), RBW / 2.0);
    assert_eq!(geometry.trace_len(), 4001);
    assert_eq!(geometry.start_freq(), CENTER - SPAN / 2.0);

    let trace = sa.fetch_sweep(&geometry).unwrap().into_value();
    assert_eq!(trace.len(), geometry.trace_len());
    assert_eq!(trace.min.len(), geometry.trace_len());

    for (i, freq) in trace.frequencies().into_iter().enumerate() {
        assert_eq!(freq, geometry.start_freq() + i as f64 * geometry.bin_size());
    }

    let (peak_freq, peak_dbm) = trace.peak().unwrap();
    assert!((peak_freq - CENTER).abs() < geometry.bin_size());
    assert!(peak_dbm > -40.0, "peak {} dBm", peak_dbm);
}

#[test]
fn test_frequency_axis_is_reproducible() {
    let sim = Arc::new(common::analyzer().build());
    let ctx = common::context(&sim);
    let mut sa = DeviceHandle::open(&ctx).unwrap();
    configure_sweep(&mut sa, CENTER, SPAN);

    let geometry = sa.sweep_geometry().unwrap().into_value();
    let first = sa.fetch_sweep(&geometry).unwrap().into_value();
    let second = sa.fetch_sweep(&geometry).unwrap().into_value();
    assert_eq!(first.frequencies(), second.frequencies());
    assert_eq!(sa.sweep_geometry().unwrap().into_value(), geometry);
}

#[test]
fn test_reused_buffer_is_filled_in_place() {
    let sim = Arc::new(common::analyzer().build());
    let ctx = common::context(&sim);
    let mut sa = DeviceHandle::open(&ctx).unwrap();
    configure_sweep(&mut sa, CENTER, SPAN);

    let geometry = sa.sweep_geometry().unwrap().into_value();
    let mut buffer = SweepBuffer::for_geometry(&geometry);
    let ts = sa.fetch_sweep_into(&geometry, &mut buffer).unwrap().into_value();
    assert!(ts > 0);
    assert!(buffer.max().iter().all(|v| *v < 0.0));
    assert!(buffer.min().iter().zip(buffer.max()).all(|(lo, hi)| lo <= hi));
}

#[test]
fn test_average_detector_returns_same_trace_twice() {
    let sim = Arc::new(common::analyzer().build());
    let ctx = common::context(&sim);
    let mut sa = DeviceHandle::open(&ctx).unwrap();
    sa.set_sweep_detector(Detector::Average, VideoUnits::Power)
        .unwrap();
    configure_sweep(&mut sa, CENTER, SPAN);

    let geometry = sa.sweep_geometry().unwrap().into_value();
    let trace = sa.fetch_sweep(&geometry).unwrap().into_value();
    assert_eq!(trace.min, trace.max);
}

// =============================================================================
// Geometry invalidation
// =============================================================================

#[test]
fn test_setter_after_configure_blocks_fetch_until_reconfigure() {
    let sim = Arc::new(common::analyzer().build());
    let ctx = common::context(&sim);
    let mut sa = DeviceHandle::open(&ctx).unwrap();
    configure_sweep(&mut sa, CENTER, SPAN);
    let stale = sa.sweep_geometry().unwrap().into_value();

    sa.set_sweep_center_span(2.0e9, SPAN).unwrap();
    let err = sa.fetch_sweep(&stale).unwrap_err();
    assert!(matches!(err, DaqError::InvalidState(_)));
    assert!(sa.sweep_geometry().is_err());

    sa.configure(Mode::Sweeping).unwrap();
    let err = sa.fetch_sweep(&stale).unwrap_err();
    assert!(matches!(
        err,
        DaqError::StaleGeometry {
            geometry: 1,
            current: 2
        }
    ));
    assert!(err.is_contract_violation());
    assert!(sa.is_open());

    let fresh = sa.sweep_geometry().unwrap().into_value();
    assert_eq!(fresh.start_freq(), 2.0e9 - SPAN / 2.0);
    assert!(sa.fetch_sweep(&fresh).is_ok());
}

#[test]
fn test_buffer_sized_for_other_geometry_is_rejected() {
    let sim = Arc::new(common::analyzer().build());
    let ctx = common::context(&sim);
    let mut sa = DeviceHandle::open(&ctx).unwrap();

    configure_sweep(&mut sa, CENTER, SPAN);
    let narrow = sa.sweep_geometry().unwrap().into_value();
    let mut buffer = SweepBuffer::for_geometry(&narrow);

    configure_sweep(&mut sa, CENTER, 2.0 * SPAN);
    let wide = sa.sweep_geometry().unwrap().into_value();
    let err = sa.fetch_sweep_into(&wide, &mut buffer).unwrap_err();
    assert!(matches!(
        err,
        DaqError::BufferSizeMismatch {
            expected: 8001,
            actual: 4001
        }
    ));
}

#[test]
fn test_geometry_before_configure_is_contract_violation() {
    let sim = Arc::new(common::analyzer().build());
    let ctx = common::context(&sim);
    let mut sa = DeviceHandle::open(&ctx).unwrap();
    sa.set_sweep_center_span(CENTER, SPAN).unwrap();

    let err = sa.sweep_geometry().unwrap_err();
    assert!(matches!(err, DaqError::InvalidState(_)));
    assert!(!sa.is_poisoned());
}

#[test]
fn test_sweep_geometry_in_iq_mode_is_rejected() {
    let sim = Arc::new(common::analyzer().build());
    let ctx = common::context(&sim);
    let mut sa = DeviceHandle::open(&ctx).unwrap();
    sa.configure(Mode::IqStreaming).unwrap();
    assert!(matches!(
        sa.sweep_geometry(),
        Err(DaqError::InvalidState(_))
    ));
}

// =============================================================================
// Setter status handling
// =============================================================================

#[test]
fn test_in_range_setters_are_reflected_by_device() {
    let sim = Arc::new(common::analyzer().build());
    let ctx = common::context(&sim);
    let mut sa = DeviceHandle::open(&ctx).unwrap();

    assert!(!sa.set_ref_level(-35.0).unwrap().has_warning());
    assert_eq!(sa.ref_level().unwrap().into_value(), -35.0);

    sa.set_sweep_start_stop(900.0e6, 950.0e6).unwrap();
    let staged = sim.staged_settings(sa.id()).unwrap();
    assert_eq!(staged.center, 925.0e6);
    assert_eq!(staged.span, 50.0e6);
    assert_eq!(sa.configuration().ref_level, Some(-35.0));
}

#[test]
fn test_clamped_setting_returns_warning_and_value() {
    let sim = Arc::new(common::analyzer().build());
    let ctx = common::context(&sim);
    let mut sa = DeviceHandle::open(&ctx).unwrap();

    let checked = sa.set_ref_level(35.0).unwrap();
    assert_eq!(
        checked.warning.map(|w| w.status),
        Some(StatusCode::SETTING_CLAMPED)
    );
    assert_eq!(sa.ref_level().unwrap().into_value(), 20.0);

    // VBW above RBW is forwarded; the device decides
    let checked = sa
        .set_sweep_coupling(1.0e3, 3.0e3, Duration::from_millis(1))
        .unwrap();
    assert!(checked.has_warning());
    assert_eq!(sa.configuration().coupling.map(|c| c.vbw), Some(3.0e3));

    sa.configure(Mode::Sweeping).unwrap();
    let geometry = sa.sweep_geometry().unwrap().into_value();
    assert_eq!(geometry.vbw(), 1.0e3);

    let warnings = sa.take_warnings();
    assert_eq!(warnings.len(), 2);
    assert_eq!(warnings[1].operation, "set_sweep_coupling");
    assert!(sa.take_warnings().is_empty());
}

#[test]
fn test_rejected_setting_poisons_session() {
    let sim = Arc::new(common::analyzer().build());
    let ctx = common::context(&sim);
    let mut sa = DeviceHandle::open(&ctx).unwrap();

    let err = sa.set_sweep_center_span(50.0e9, SPAN).unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::INVALID_CENTER_FREQ_ERR));
    assert!(sa.is_poisoned());

    let err = sa.set_ref_level(-20.0).unwrap_err();
    assert!(matches!(
        err,
        DaqError::SessionPoisoned {
            operation: "set_sweep_center_span"
        }
    ));

    sa.close().unwrap();
    assert_eq!(sim.open_devices(), 0);
}
