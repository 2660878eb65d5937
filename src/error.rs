//! Custom error types for the crate.
//!
//! This module defines the primary error type, `DaqError`. Using the `thiserror`
//! crate, it gives a single, consistent way to report the three kinds of failure
//! an instrument client runs into:
//!
//! - **Device errors** (`Device`): the device answered a call with a negative
//!   [`StatusCode`]. The session that issued the call is poisoned afterwards.
//! - **Client contract violations** (`InvalidState`, `BufferSizeMismatch`,
//!   `StaleGeometry`, `SessionPoisoned`): the caller broke a local invariant,
//!   such as fetching before configure or reusing a closed handle. These are
//!   raised locally and never forwarded to the device.
//! - **Transport and environment errors** (`Io`, `Protocol`, `Config`,
//!   `Configuration`): socket failures, unparseable SCPI replies and bad
//!   configuration files.
//!
//! Timeouts of segmented captures and bounded completion polls are *not*
//! errors; they are reported as flags on the respective results.

use crate::status::StatusCode;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Error type shared by every module of the crate.
#[derive(Error, Debug)]
pub enum DaqError {
    /// The device returned a negative status.
    #[error("{status} in {operation}()")]
    Device {
        /// Binding call that failed.
        operation: &'static str,
        /// Status the device returned.
        status: StatusCode,
    },

    /// The call is not allowed in the handle's or capture's current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Caller buffer length differs from the trace geometry.
    #[error("Buffer size mismatch: geometry requires {expected} samples, buffer holds {actual}")]
    BufferSizeMismatch {
        /// Length the geometry requires.
        expected: usize,
        /// Length of the caller buffer.
        actual: usize,
    },

    /// Geometry was queried under an earlier configuration.
    #[error(
        "Stale geometry: queried for configuration {geometry}, device is at configuration {current}"
    )]
    StaleGeometry {
        /// Generation the geometry was queried under.
        geometry: u64,
        /// Generation currently committed.
        current: u64,
    },

    /// An earlier fatal status invalidated the handle; only close is allowed.
    #[error("Session was invalidated by a fatal status in {operation}()")]
    SessionPoisoned {
        /// Call that poisoned the handle.
        operation: &'static str,
    },

    /// Transport failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Instrument reply could not be understood.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Settings could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Settings loaded but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl DaqError {
    /// `true` for errors raised locally because the caller broke an ordering
    /// or sizing rule.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            DaqError::InvalidState(_)
                | DaqError::BufferSizeMismatch { .. }
                | DaqError::StaleGeometry { .. }
                | DaqError::SessionPoisoned { .. }
        )
    }

    /// Device status carried by this error, if it came from the device.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            DaqError::Device { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Config(Box::new(err))
    }
}
