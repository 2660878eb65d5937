//! Device status codes.
//!
//! Every binding call returns exactly one [`StatusCode`]. The sign of the
//! integer decides its [`Severity`]:
//!
//! - **negative**: the operation did not take effect and the session may be
//!   unusable.
//! - **zero**: success.
//! - **positive**: the operation took effect with a caveat (for example a
//!   parameter the device clamped into range).
//!
//! Codes the table below does not know about still classify by sign, so a
//! newer device firmware can never turn an error into a success.

use std::fmt;

/// Classification of a [`StatusCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Operation failed.
    Error,
    /// Operation succeeded with a caveat.
    Warning,
    /// Operation succeeded.
    Ok,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "Error"),
            Severity::Warning => write!(f, "Warning"),
            Severity::Ok => write!(f, "Ok"),
        }
    }
}

/// Signed result code returned by the device binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusCode(pub i32);

impl StatusCode {
    // Errors
    /// Network error in the control link.
    pub const NETWORK_ERR: Self = Self(-53);
    /// Too many receivers connected.
    pub const MAX_DEVICES_CONNECTED_ERR: Self = Self(-51);
    /// IQ decimation value is not valid.
    pub const INVALID_IQ_DECIMATION_ERR: Self = Self(-100);
    /// Invalid center frequency.
    pub const INVALID_CENTER_FREQ_ERR: Self = Self(-101);
    /// GPS information requested while not locked.
    pub const GPS_NOT_LOCKED_ERR: Self = Self(-16);
    /// API version does not match the device.
    pub const VERSION_MISMATCH_ERR: Self = Self(-14);
    /// Unable to allocate resources for the measurement mode.
    pub const ALLOCATION_ERR: Self = Self(-13);
    /// Framing issue detected on measurement data.
    pub const SYNC_ERR: Self = Self(-11);
    /// Invalid or already active sweep/capture position.
    pub const INVALID_SWEEP_POSITION: Self = Self(-10);
    /// Operation cannot be performed in the current device state.
    pub const INVALID_CONFIGURATION_ERR: Self = Self(-8);
    /// Device disconnected.
    pub const CONNECTION_LOST_ERR: Self = Self(-6);
    /// A parameter has an invalid value.
    pub const INVALID_PARAMETER_ERR: Self = Self(-5);
    /// A required output argument was missing.
    pub const NULL_PTR_ERR: Self = Self(-4);
    /// Handle does not refer to an open device.
    pub const INVALID_DEVICE_ERR: Self = Self(-3);
    /// Unable to open device.
    pub const DEVICE_NOT_FOUND_ERR: Self = Self(-2);

    /// Function returned successfully.
    pub const NO_ERROR: Self = Self(0);

    // Warnings
    /// One or more settings were adjusted by the device.
    pub const SETTING_CLAMPED: Self = Self(1);
    /// Measurement includes ADC overload.
    pub const ADC_OVERFLOW: Self = Self(2);
    /// Measurement is uncalibrated.
    pub const UNCAL_DATA: Self = Self(3);
    /// Temperature drift, reconfigure the device.
    pub const TEMP_DRIFT_WARNING: Self = Self(4);
    /// Preselector span smaller than the requested span.
    pub const SPAN_EXCEEDS_PRESELECTOR: Self = Self(5);
    /// Internal temperature close to shutdown.
    pub const TEMP_HIGH_WARNING: Self = Self(6);
    /// Host processing could not keep up.
    pub const CPU_LIMITED: Self = Self(7);
    /// Device reports features newer than this client.
    pub const UPDATE_API: Self = Self(8);
    /// Calibration data potentially corrupt.
    pub const INVALID_CAL_DATA: Self = Self(9);

    /// Severity derived from the sign of the code.
    pub fn severity(self) -> Severity {
        match self.0 {
            c if c < 0 => Severity::Error,
            0 => Severity::Ok,
            _ => Severity::Warning,
        }
    }

    /// `true` for negative codes.
    pub fn is_error(self) -> bool {
        self.severity() == Severity::Error
    }

    /// `true` for positive codes.
    pub fn is_warning(self) -> bool {
        self.severity() == Severity::Warning
    }

    /// `true` for zero.
    pub fn is_ok(self) -> bool {
        self.0 == 0
    }

    /// Human-readable description of the code.
    pub fn message(self) -> &'static str {
        match self {
            Self::NETWORK_ERR => "Socket/network error",
            Self::MAX_DEVICES_CONNECTED_ERR => "Maximum number of devices already connected",
            Self::INVALID_IQ_DECIMATION_ERR => "IQ decimation value provided not a valid value",
            Self::INVALID_CENTER_FREQ_ERR => "Invalid center frequency specified",
            Self::GPS_NOT_LOCKED_ERR => "GPS is not locked",
            Self::VERSION_MISMATCH_ERR => "Invalid API version for target device",
            Self::ALLOCATION_ERR => "Unable to allocate resources for the measurement mode",
            Self::SYNC_ERR => "Framing issue detected on measurement data",
            Self::INVALID_SWEEP_POSITION => "Invalid or already active sweep position",
            Self::INVALID_CONFIGURATION_ERR => {
                "Operation cannot be performed in the current device state"
            }
            Self::CONNECTION_LOST_ERR => "Device disconnected",
            Self::INVALID_PARAMETER_ERR => "Required parameter found to have invalid value",
            Self::NULL_PTR_ERR => "One or more required pointer parameters were null",
            Self::INVALID_DEVICE_ERR => "User specified invalid device index",
            Self::DEVICE_NOT_FOUND_ERR => "Unable to open device",
            Self::NO_ERROR => "No error",
            Self::SETTING_CLAMPED => "One or more of the provided settings were adjusted",
            Self::ADC_OVERFLOW => "Measurement includes data which caused an ADC overload",
            Self::UNCAL_DATA => "Measurement is uncalibrated",
            Self::TEMP_DRIFT_WARNING => "Temperature drift occurred, measurements uncalibrated",
            Self::SPAN_EXCEEDS_PRESELECTOR => "Preselector span is smaller than the selected span",
            Self::TEMP_HIGH_WARNING => "Internal temperature is close to shutdown",
            Self::CPU_LIMITED => "API was unable to keep up with processing",
            Self::UPDATE_API => "Device has newer features than this API version",
            Self::INVALID_CAL_DATA => "Calibration data potentially corrupt",
            other => match other.severity() {
                Severity::Error => "Unknown error",
                Severity::Warning => "Unknown warning",
                Severity::Ok => "No error",
            },
        }
    }
}

impl From<i32> for StatusCode {
    fn from(code: i32) -> Self {
        Self(code)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.severity(), self.0, self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_follows_sign() {
        assert_eq!(StatusCode(-5).severity(), Severity::Error);
        assert_eq!(StatusCode(0).severity(), Severity::Ok);
        assert_eq!(StatusCode(1).severity(), Severity::Warning);
    }

    #[test]
    fn unknown_codes_classify_by_sign() {
        assert!(StatusCode(-9999).is_error());
        assert_eq!(StatusCode(-9999).message(), "Unknown error");
        assert!(StatusCode(4242).is_warning());
        assert_eq!(StatusCode(4242).message(), "Unknown warning");
    }

    #[test]
    fn display_includes_severity_and_message() {
        let text = StatusCode::SETTING_CLAMPED.to_string();
        assert_eq!(
            text,
            "Warning 1: One or more of the provided settings were adjusted"
        );
        assert!(StatusCode::INVALID_PARAMETER_ERR
            .to_string()
            .starts_with("Error -5"));
    }
}
