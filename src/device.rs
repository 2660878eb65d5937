//! Device handle lifecycle.
//!
//! A [`DeviceHandle`] owns one open device session:
//!
//! ```text
//! Closed ──open / open_by_serial / open_networked──▶ Open ──close──▶ Closed
//!                                                     │
//!                                                     └─fatal status─▶ Poisoned ──close──▶ Closed
//! ```
//!
//! Every operation other than enumerate/open checks the state first. A closed
//! handle answers with [`DaqError::InvalidState`], a poisoned one with
//! [`DaqError::SessionPoisoned`]. Neither is forwarded to the device.
//!
//! All binding calls go through [`DeviceHandle::call`], which routes the
//! returned status through the context's interceptor. There is no other path
//! from a handle to the binding.

use crate::binding::{BindingContext, DeviceApi, DeviceId, DeviceInfo, DeviceListing, Reply};
use crate::configuration::ConfigurationState;
use crate::error::{AppResult, DaqError};
use crate::interceptor::{Checked, Warning};
use crate::status::StatusCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleState {
    Open,
    Poisoned { operation: &'static str },
    Closed,
}

/// Exclusive owner of one open device session.
///
/// Dropping an open handle closes the device.
pub struct DeviceHandle<'ctx> {
    ctx: &'ctx BindingContext,
    id: DeviceId,
    state: HandleState,
    pub(crate) config: ConfigurationState,
    warnings: Vec<Warning>,
}

impl<'ctx> DeviceHandle<'ctx> {
    /// List attached devices. Does not require an open handle.
    pub fn enumerate(ctx: &'ctx BindingContext) -> AppResult<Checked<Vec<DeviceListing>>> {
        let (status, devices) = ctx.api().get_device_list();
        let checked = ctx
            .interceptor()
            .check("get_device_list", None, status, devices)?;
        tracing::info!(count = checked.value.len(), "Enumerated devices");
        Ok(checked)
    }

    /// Open the first available device.
    pub fn open(ctx: &'ctx BindingContext) -> AppResult<Self> {
        let reply = ctx.api().open_device();
        Self::from_open_reply(ctx, "open_device", reply)
    }

    /// Open the device with the given serial number.
    pub fn open_by_serial(ctx: &'ctx BindingContext, serial: u32) -> AppResult<Self> {
        let reply = ctx.api().open_device_by_serial(serial);
        Self::from_open_reply(ctx, "open_device_by_serial", reply)
    }

    /// Open a device attached over the network.
    ///
    /// # Arguments
    /// * `host_addr` - Local interface address to bind
    /// * `device_addr` - Address of the device
    /// * `port` - Device control port
    pub fn open_networked(
        ctx: &'ctx BindingContext,
        host_addr: &str,
        device_addr: &str,
        port: u16,
    ) -> AppResult<Self> {
        let reply = ctx
            .api()
            .open_networked_device(host_addr, device_addr, port);
        Self::from_open_reply(ctx, "open_networked_device", reply)
    }

    fn from_open_reply(
        ctx: &'ctx BindingContext,
        operation: &'static str,
        (status, id): Reply<DeviceId>,
    ) -> AppResult<Self> {
        let checked = ctx.interceptor().check(operation, None, status, id)?;
        let id = checked.value;
        if id == DeviceId::INVALID {
            return Err(DaqError::Device {
                operation,
                status: StatusCode::DEVICE_NOT_FOUND_ERR,
            });
        }
        tracing::info!(device = id.0, "Device opened");
        Ok(Self {
            ctx,
            id,
            state: HandleState::Open,
            config: ConfigurationState::default(),
            warnings: checked.warning.into_iter().collect(),
        })
    }

    /// Binding-assigned identity of this session.
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// `true` until the handle is closed or poisoned.
    pub fn is_open(&self) -> bool {
        self.state == HandleState::Open
    }

    /// `true` after a fatal status invalidated the session.
    pub fn is_poisoned(&self) -> bool {
        matches!(self.state, HandleState::Poisoned { .. })
    }

    /// Drain warnings reported on this handle since the last call.
    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    pub(crate) fn ensure_open(&self) -> AppResult<()> {
        match self.state {
            HandleState::Open => Ok(()),
            HandleState::Poisoned { operation } => Err(DaqError::SessionPoisoned { operation }),
            HandleState::Closed => Err(DaqError::InvalidState(format!(
                "device {} is closed",
                self.id
            ))),
        }
    }

    /// Issue one binding call and route its status through the interceptor.
    ///
    /// Refuses to run on a closed or poisoned handle. A negative status poisons
    /// the handle.
    pub(crate) fn call<T>(
        &mut self,
        operation: &'static str,
        f: impl FnOnce(&dyn DeviceApi, DeviceId) -> Reply<T>,
    ) -> AppResult<Checked<T>> {
        self.ensure_open()?;
        tracing::debug!(device = self.id.0, "{}()", operation);
        let (status, value) = f(self.ctx.api(), self.id);
        match self
            .ctx
            .interceptor()
            .check(operation, Some(self.id), status, value)
        {
            Ok(checked) => {
                if let Some(warning) = checked.warning {
                    self.warnings.push(warning);
                }
                Ok(checked)
            }
            Err(err) => {
                self.state = HandleState::Poisoned { operation };
                Err(err)
            }
        }
    }

    /// Binding call that only returns a status.
    pub(crate) fn call_status(
        &mut self,
        operation: &'static str,
        f: impl FnOnce(&dyn DeviceApi, DeviceId) -> StatusCode,
    ) -> AppResult<Checked<()>> {
        self.call(operation, |api, id| (f(api, id), ()))
    }

    /// Release device-side resources, also on a poisoned handle.
    ///
    /// The status is still routed through the interceptor, but an error does
    /// not change the handle state.
    pub(crate) fn release(
        &mut self,
        operation: &'static str,
        f: impl FnOnce(&dyn DeviceApi, DeviceId) -> StatusCode,
    ) -> AppResult<Checked<()>> {
        if self.state == HandleState::Closed {
            return Err(DaqError::InvalidState(format!(
                "device {} is closed",
                self.id
            )));
        }
        let status = f(self.ctx.api(), self.id);
        let checked = self
            .ctx
            .interceptor()
            .check(operation, Some(self.id), status, ())?;
        if let Some(warning) = checked.warning {
            self.warnings.push(warning);
        }
        Ok(checked)
    }

    /// Identity of the open device.
    pub fn device_info(&mut self) -> AppResult<Checked<DeviceInfo>> {
        let checked = self.call("get_device_info", |api, id| api.get_device_info(id))?;
        let warning = checked.warning;
        match checked.value {
            Some(info) => Ok(Checked {
                value: info,
                warning,
            }),
            None => Err(DaqError::Protocol(format!(
                "device {} returned no device info",
                self.id
            ))),
        }
    }

    /// Stop the active measurement and return the device to idle.
    ///
    /// Discards any in-flight segmented capture and invalidates the committed
    /// configuration.
    pub fn abort(&mut self) -> AppResult<Checked<()>> {
        let checked = self.call_status("abort", |api, id| api.abort(id))?;
        self.config.invalidate_commit();
        Ok(checked)
    }

    /// Return the device to its power-on state. The device closes as part of
    /// the preset, so the handle ends up closed.
    pub fn preset(&mut self) -> AppResult<Checked<()>> {
        let checked = self.call_status("preset", |api, id| api.preset(id))?;
        self.state = HandleState::Closed;
        tracing::info!(device = self.id.0, "Device preset, handle closed");
        Ok(checked)
    }

    /// Close the session.
    ///
    /// Allowed on an open or poisoned handle; a second close is a contract
    /// violation.
    pub fn close(&mut self) -> AppResult<Checked<()>> {
        if self.state == HandleState::Closed {
            return Err(DaqError::InvalidState(format!(
                "device {} is already closed",
                self.id
            )));
        }
        let status = self.ctx.api().close_device(self.id);
        self.state = HandleState::Closed;
        self.config.invalidate_commit();
        let checked = self
            .ctx
            .interceptor()
            .check("close_device", Some(self.id), status, ())?;
        tracing::info!(device = self.id.0, "Device closed");
        Ok(checked)
    }
}

impl Drop for DeviceHandle<'_> {
    fn drop(&mut self) {
        if self.state != HandleState::Closed {
            let status = self.ctx.api().close_device(self.id);
            if status.is_error() {
                tracing::warn!(device = self.id.0, "Closing dropped handle failed: {}", status);
            } else {
                tracing::debug!(device = self.id.0, "Dropped handle closed");
            }
        }
    }
}

impl std::fmt::Debug for DeviceHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::DeviceType;
    use crate::interceptor::ErrorPolicy;
    use crate::sim::SimulatedAnalyzer;
    use std::sync::Arc;

    fn context() -> BindingContext {
        let sim = SimulatedAnalyzer::builder()
            .with_device(1001, DeviceType::UsbSegmented)
            .with_device(1002, DeviceType::Usb)
            .build();
        BindingContext::init(Arc::new(sim), ErrorPolicy::Propagate)
    }

    #[test]
    fn enumerate_lists_serials_and_types() {
        let ctx = context();
        let devices = DeviceHandle::enumerate(&ctx).unwrap().value;
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].serial, 1001);
        assert_eq!(devices[1].device_type, DeviceType::Usb);
    }

    #[test]
    fn open_by_serial_and_close() {
        let ctx = context();
        let mut handle = DeviceHandle::open_by_serial(&ctx, 1002).unwrap();
        assert!(handle.is_open());
        assert_eq!(handle.device_info().unwrap().value.serial, 1002);
        handle.close().unwrap();
        assert!(!handle.is_open());
    }

    #[test]
    fn operations_on_closed_handle_are_rejected_locally() {
        let ctx = context();
        let mut handle = DeviceHandle::open(&ctx).unwrap();
        handle.close().unwrap();

        let err = handle.device_info().unwrap_err();
        assert!(matches!(err, DaqError::InvalidState(_)));
        assert!(err.is_contract_violation());

        let err = handle.close().unwrap_err();
        assert!(matches!(err, DaqError::InvalidState(_)));
    }

    #[test]
    fn unknown_serial_fails_to_open() {
        let ctx = context();
        let err = DeviceHandle::open_by_serial(&ctx, 9).unwrap_err();
        assert_eq!(err.status(), Some(StatusCode::DEVICE_NOT_FOUND_ERR));
    }

    #[test]
    fn two_handles_are_independent() {
        let ctx = context();
        let mut a = DeviceHandle::open_by_serial(&ctx, 1001).unwrap();
        let mut b = DeviceHandle::open_by_serial(&ctx, 1002).unwrap();
        assert_ne!(a.id(), b.id());
        a.close().unwrap();
        assert!(b.device_info().is_ok());
        b.close().unwrap();
    }

    #[test]
    fn dropped_handle_releases_the_device() {
        let ctx = context();
        {
            let _handle = DeviceHandle::open_by_serial(&ctx, 1001).unwrap();
        }
        let mut reopened = DeviceHandle::open_by_serial(&ctx, 1001).unwrap();
        reopened.close().unwrap();
    }
}
