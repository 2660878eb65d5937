//! Status interception.
//!
//! Every binding call made by [`crate::device::DeviceHandle`] passes through
//! [`Interceptor::check`] before its payload reaches the caller:
//!
//! - `status < 0`: an error event is logged naming the operation, then the
//!   configured [`ErrorPolicy`] runs: either a [`DaqError::Device`] is returned
//!   (and the owning handle poisons itself), or the process exits.
//! - `status > 0`: a warning event is logged and the payload is returned
//!   together with a [`Warning`].
//! - `status == 0`: the payload is returned untouched.

use crate::binding::DeviceId;
use crate::error::{AppResult, DaqError};
use crate::status::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What happens after an error status has been reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Return `DaqError::Device` and invalidate the session.
    #[default]
    Propagate,
    /// Terminate the process with exit code 1.
    #[serde(alias = "exit_process")]
    Exit,
}

/// A non-fatal status reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Warning {
    /// Binding operation that reported the warning.
    pub operation: &'static str,
    /// The warning code.
    pub status: StatusCode,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}()", self.status, self.operation)
    }
}

/// Payload of a successful call plus the warning the device attached, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Checked<T> {
    /// Value produced by the call.
    pub value: T,
    /// Set when the device returned a positive status.
    pub warning: Option<Warning>,
}

impl<T> Checked<T> {
    /// Discard the warning and keep the value.
    pub fn into_value(self) -> T {
        self.value
    }

    /// Transform the value, keeping the warning.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Checked<U> {
        Checked {
            value: f(self.value),
            warning: self.warning,
        }
    }

    /// `true` if the device attached a warning.
    pub fn has_warning(&self) -> bool {
        self.warning.is_some()
    }
}

/// Interprets status codes for every device operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct Interceptor {
    policy: ErrorPolicy,
}

impl Interceptor {
    /// Create an interceptor with the given policy.
    pub fn new(policy: ErrorPolicy) -> Self {
        Self { policy }
    }

    /// Active error policy.
    pub fn policy(&self) -> ErrorPolicy {
        self.policy
    }

    /// Inspect `status` returned by `operation` and decide the fate of `value`.
    pub fn check<T>(
        &self,
        operation: &'static str,
        device: Option<DeviceId>,
        status: StatusCode,
        value: T,
    ) -> AppResult<Checked<T>> {
        let device = device.map(|d| d.0).unwrap_or(-1);

        if status.is_error() {
            tracing::error!(
                device,
                code = status.0,
                "Error {}: {} in {}()",
                status.0,
                status.message(),
                operation
            );
            if self.policy == ErrorPolicy::Exit {
                std::process::exit(1);
            }
            return Err(DaqError::Device { operation, status });
        }

        if status.is_warning() {
            tracing::warn!(
                device,
                code = status.0,
                "Warning {}: {} in {}()",
                status.0,
                status.message(),
                operation
            );
            return Ok(Checked {
                value,
                warning: Some(Warning { operation, status }),
            });
        }

        tracing::trace!(device, "{}() ok", operation);
        Ok(Checked {
            value,
            warning: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn ok_status_returns_payload_without_warning() {
        let checked = Interceptor::default()
            .check("get_ref_level", Some(DeviceId(0)), StatusCode::NO_ERROR, -30.0)
            .unwrap();
        assert_eq!(checked.value, -30.0);
        assert!(!checked.has_warning());
    }

    #[traced_test]
    #[test]
    fn warning_status_returns_payload_and_reports() {
        let checked = Interceptor::default()
            .check(
                "set_sweep_coupling",
                Some(DeviceId(3)),
                StatusCode::SETTING_CLAMPED,
                (),
            )
            .unwrap();
        let warning = checked.warning.unwrap();
        assert_eq!(warning.operation, "set_sweep_coupling");
        assert_eq!(warning.status, StatusCode::SETTING_CLAMPED);
        assert!(logs_contain("Warning 1"));
        assert!(logs_contain("set_sweep_coupling()"));
    }

    #[traced_test]
    #[test]
    fn error_status_is_propagated_and_reported() {
        let err = Interceptor::new(ErrorPolicy::Propagate)
            .check(
                "configure",
                Some(DeviceId(1)),
                StatusCode::INVALID_CONFIGURATION_ERR,
                (),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            DaqError::Device {
                operation: "configure",
                status: StatusCode::INVALID_CONFIGURATION_ERR
            }
        ));
        assert!(logs_contain("Error -8"));
    }

    #[test]
    fn checked_map_keeps_warning() {
        let checked = Checked {
            value: 2,
            warning: Some(Warning {
                operation: "get_iq",
                status: StatusCode::ADC_OVERFLOW,
            }),
        };
        let mapped = checked.map(|v| v * 10);
        assert_eq!(mapped.value, 20);
        assert!(mapped.has_warning());
    }
}
