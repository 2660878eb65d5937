//! Signal generator output.
//!
//! Generator setters act on the device as soon as they return: there is no
//! `configure` step, and they leave the receiver configuration generation
//! alone. Ranges are the device's to enforce, as for receiver setters. A
//! clamped frequency, power, depth or symbol rate comes back as a warning;
//! a rejected one as an error that poisons the handle.

use crate::binding::{ModulationShape, PskModulation, SymbolFilter};
use crate::device::DeviceHandle;
use crate::error::AppResult;
use crate::interceptor::Checked;

/// Repeating symbol sequence for digital modulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymbolStream<'a> {
    /// Symbols per second.
    pub symbol_rate: f64,
    /// Pulse-shaping filter.
    pub filter: SymbolFilter,
    /// Symbol indices, repeated by the device.
    pub symbols: &'a [u32],
}

impl<'ctx> DeviceHandle<'ctx> {
    /// Set carrier frequency in Hz and output power in dBm.
    ///
    /// Leaves the RF output state unchanged.
    pub fn set_frequency_amplitude(
        &mut self,
        frequency_hz: f64,
        amplitude_dbm: f64,
    ) -> AppResult<Checked<()>> {
        self.call_status("sg_set_frequency_amplitude", |api, id| {
            api.sg_set_frequency_amplitude(id, frequency_hz, amplitude_dbm)
        })
    }

    /// Switch the RF output off.
    pub fn rf_off(&mut self) -> AppResult<Checked<()>> {
        let checked = self.call_status("sg_rf_off", |api, id| api.sg_rf_off(id))?;
        tracing::info!(device = self.id().0, "RF output off");
        Ok(checked)
    }

    /// Output an unmodulated carrier.
    pub fn output_cw(&mut self) -> AppResult<Checked<()>> {
        let checked = self.call_status("sg_set_cw", |api, id| api.sg_set_cw(id))?;
        tracing::info!(device = self.id().0, "CW output on");
        Ok(checked)
    }

    /// Amplitude-modulate the carrier with a tone of `frequency_hz`.
    pub fn output_am(
        &mut self,
        frequency_hz: f64,
        depth_percent: f64,
        shape: ModulationShape,
    ) -> AppResult<Checked<()>> {
        self.call_status("sg_set_am", |api, id| {
            api.sg_set_am(id, frequency_hz, depth_percent, shape)
        })
    }

    /// Frequency-modulate the carrier with a tone of `frequency_hz`.
    pub fn output_fm(
        &mut self,
        frequency_hz: f64,
        deviation_hz: f64,
        shape: ModulationShape,
    ) -> AppResult<Checked<()>> {
        self.call_status("sg_set_fm", |api, id| {
            api.sg_set_fm(id, frequency_hz, deviation_hz, shape)
        })
    }

    /// Amplitude-shift keying. Symbols are 0 or 1.
    pub fn output_ask(
        &mut self,
        stream: &SymbolStream<'_>,
        depth_percent: f64,
    ) -> AppResult<Checked<()>> {
        let SymbolStream {
            symbol_rate,
            filter,
            symbols,
        } = *stream;
        self.call_status("sg_set_ask", |api, id| {
            api.sg_set_ask(id, symbol_rate, filter, depth_percent, symbols)
        })
    }

    /// Frequency-shift keying. Symbols are 0 or 1.
    pub fn output_fsk(
        &mut self,
        stream: &SymbolStream<'_>,
        modulation_index: f64,
    ) -> AppResult<Checked<()>> {
        let SymbolStream {
            symbol_rate,
            filter,
            symbols,
        } = *stream;
        self.call_status("sg_set_fsk", |api, id| {
            api.sg_set_fsk(id, symbol_rate, filter, modulation_index, symbols)
        })
    }

    /// Phase-shift or QAM keying. Symbols index the constellation.
    pub fn output_psk(
        &mut self,
        stream: &SymbolStream<'_>,
        modulation: PskModulation,
    ) -> AppResult<Checked<()>> {
        let SymbolStream {
            symbol_rate,
            filter,
            symbols,
        } = *stream;
        self.call_status("sg_set_psk", |api, id| {
            api.sg_set_psk(id, symbol_rate, modulation, filter, symbols)
        })
    }

    /// Symbol clock the device runs for the active digital modulation.
    pub fn symbol_clock_rate(&mut self) -> AppResult<Checked<f64>> {
        self.call("sg_query_symbol_clock_rate", |api, id| {
            api.sg_query_symbol_clock_rate(id)
        })
    }
}
