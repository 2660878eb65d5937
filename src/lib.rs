//! # RF DAQ Core Library
//!
//! Client layer for radio-frequency analyzers and generators: opening device
//! sessions, configuring them, acquiring sweeps and IQ data, and applying one
//! status discipline to every device call. Instruments driven as remote
//! applications are reached through a SCPI client with the same
//! configure/initiate/query shape.
//!
//! ## Crate Structure
//!
//! - **`status`**: The `StatusCode` taxonomy (error / warning / ok) and its messages.
//! - **`error`**: The `DaqError` enum and `AppResult` alias used throughout the crate.
//! - **`interceptor`**: Routes every status through one check that reports warnings and
//!   applies the error policy.
//! - **`binding`**: The raw `DeviceApi` call surface and the `BindingContext` handed to
//!   every component.
//! - **`device`**: `DeviceHandle` lifecycle: enumerate, open, close, abort, preset.
//! - **`configuration`**: Setters, `configure`, and configuration generations.
//! - **`acquisition`**: Sweep geometry, fixed-length sweep buffers, continuous IQ.
//! - **`segmented`**: Triggered segmented IQ capture behind a release-on-drop guard.
//! - **`streaming`**: Repeated IQ fetches with throughput accounting.
//! - **`generator`**: Signal generator output: frequency/amplitude, CW, analog and
//!   digital modulation.
//! - **`scpi`**: Line-oriented SCPI client, completion polling, analyzer and generator
//!   helpers, and a scripted mock instrument.
//! - **`sim`**: In-process simulated analyzer and generator implementing `DeviceApi`.
//! - **`settings`**: Figment-based settings (TOML plus environment).
//! - **`logging`**: `tracing-subscriber` setup.
//!
//! ## Example
//!
//! ```no_run
//! use rf_daq::binding::{BindingContext, Mode};
//! use rf_daq::device::DeviceHandle;
//! use rf_daq::interceptor::ErrorPolicy;
//! use rf_daq::sim::SimulatedAnalyzer;
//! use std::sync::Arc;
//!
//! # fn main() -> rf_daq::error::AppResult<()> {
//! let ctx = BindingContext::init(Arc::new(SimulatedAnalyzer::default()), ErrorPolicy::Propagate);
//! {
//!     let mut sa = DeviceHandle::open(&ctx)?;
//!     sa.set_sweep_center_span(1.0e9, 20.0e6)?;
//!     sa.configure(Mode::Sweeping)?;
//!     let geometry = sa.sweep_geometry()?.into_value();
//!     let trace = sa.fetch_sweep(&geometry)?.into_value();
//!     if let Some((freq, dbm)) = trace.peak() {
//!         println!("Peak {:.3} MHz at {:.1} dBm", freq / 1.0e6, dbm);
//!     }
//!     sa.close()?;
//! }
//! ctx.teardown()?;
//! # Ok(())
//! # }
//! ```

pub mod acquisition;
pub mod binding;
pub mod configuration;
pub mod device;
pub mod error;
pub mod generator;
pub mod interceptor;
pub mod logging;
pub mod scpi;
pub mod segmented;
pub mod settings;
pub mod sim;
pub mod status;
pub mod streaming;
