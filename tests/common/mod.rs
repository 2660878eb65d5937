//! Shared fixtures for integration tests.
#![allow(dead_code)]

use rf_daq::binding::{BindingContext, DeviceType};
use rf_daq::interceptor::ErrorPolicy;
use rf_daq::sim::{SimulatedAnalyzer, SimulatedAnalyzerBuilder};
use std::sync::Arc;

pub const SERIAL: u32 = 1000;

/// Builder with one segmented-capable USB analyzer attached.
pub fn analyzer() -> SimulatedAnalyzerBuilder {
    SimulatedAnalyzer::builder().with_device(SERIAL, DeviceType::UsbSegmented)
}

/// Context over `sim` that propagates errors.
pub fn context(sim: &Arc<SimulatedAnalyzer>) -> BindingContext {
    BindingContext::init(sim.clone(), ErrorPolicy::Propagate)
}
