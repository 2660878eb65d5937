//! Analyzer and generator command sets on top of [`ScpiClient`].

use super::{OpcWait, ScpiClient, ScpiError};
use crate::acquisition::FrequencyAxis;
use crate::error::{AppResult, DaqError};
use crate::settings::ScpiSettings;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// Bounds of a completion poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcPolicy {
    /// Gap between `*ESR?` polls.
    pub poll_interval: Duration,
    /// Give up after this long.
    pub timeout: Duration,
}

impl OpcPolicy {
    /// Poll interval and timeout from the `[scpi]` settings section.
    pub fn from_settings(settings: &ScpiSettings) -> Self {
        Self {
            poll_interval: Duration::from_millis(settings.opc_poll_interval_ms),
            timeout: Duration::from_millis(settings.opc_timeout_ms),
        }
    }
}

impl Default for OpcPolicy {
    fn default() -> Self {
        Self {
            poll_interval: super::DEFAULT_OPC_POLL_INTERVAL,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Trace read back over SCPI.
#[derive(Debug, Clone, PartialEq)]
pub struct ScpiTrace {
    /// Frequency of every bin.
    pub axis: FrequencyAxis,
    /// One value per bin, in frequency order.
    pub values: Vec<f64>,
}

impl ScpiTrace {
    /// `(frequency, value)` of the highest bin.
    pub fn peak(&self) -> Option<(f64, f64)> {
        self.axis.peak(&self.values)
    }

    /// `(frequency, value)` pairs in frequency order.
    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.axis.iter().zip(self.values.iter().copied())
    }
}

/// Sweep parameters applied in one go by [`SpectrumAnalyzer::configure_sweep`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepSetup {
    /// Center frequency in Hz.
    pub center_hz: f64,
    /// Span in Hz.
    pub span_hz: f64,
    /// Reference level in dBm.
    pub ref_level_dbm: f64,
    /// `None` leaves RBW on auto.
    pub rbw_hz: Option<f64>,
    /// `None` leaves VBW on auto.
    pub vbw_hz: Option<f64>,
}

/// Spectrum analyzer application driven over SCPI.
#[derive(Debug)]
pub struct SpectrumAnalyzer<S: Read + Write> {
    client: ScpiClient<S>,
    opc: OpcPolicy,
}

impl SpectrumAnalyzer<TcpStream> {
    /// Connect to `settings.host` on the analyzer port.
    pub fn connect(settings: &ScpiSettings) -> AppResult<Self> {
        let client = ScpiClient::connect(
            &settings.host,
            settings.analyzer_port,
            Duration::from_millis(settings.read_timeout_ms),
        )?;
        Ok(Self::new(client, OpcPolicy::from_settings(settings)))
    }
}

impl<S: Read + Write> SpectrumAnalyzer<S> {
    /// Wrap a connected client.
    pub fn new(client: ScpiClient<S>, opc: OpcPolicy) -> Self {
        Self { client, opc }
    }

    /// Underlying client for commands not covered here.
    pub fn client(&mut self) -> &mut ScpiClient<S> {
        &mut self.client
    }

    /// Give back the client.
    pub fn into_client(self) -> ScpiClient<S> {
        self.client
    }

    /// Select the measurement mode, e.g. `SA`.
    pub fn select_instrument(&mut self, mode: &str) -> AppResult<()> {
        self.client.write(&format!("INSTRUMENT:SELECT {}", mode))
    }

    /// Enable or disable continuous measurement.
    pub fn set_continuous(&mut self, on: bool) -> AppResult<()> {
        self.client
            .write(if on { "INIT:CONT ON" } else { "INIT:CONT OFF" })
    }

    /// Center frequency in Hz.
    pub fn set_center(&mut self, hz: f64) -> AppResult<()> {
        self.client.write(&format!("SENS:FREQ:CENT {}", hz))
    }

    /// Span in Hz.
    pub fn set_span(&mut self, hz: f64) -> AppResult<()> {
        self.client.write(&format!("SENS:FREQ:SPAN {}", hz))
    }

    /// Reference level in dBm.
    pub fn set_ref_level(&mut self, dbm: f64) -> AppResult<()> {
        self.client.write(&format!("SENS:POW:RF:RLEV {}", dbm))
    }

    /// Fixed RBW in Hz.
    pub fn set_rbw(&mut self, hz: f64) -> AppResult<()> {
        self.client.write(&format!("SENS:BAND:RES {}", hz))
    }

    /// Fixed VBW in Hz.
    pub fn set_vbw(&mut self, hz: f64) -> AppResult<()> {
        self.client.write(&format!("SENS:BAND:VID {}", hz))
    }

    /// Put RBW and VBW back on auto.
    pub fn set_auto_bandwidths(&mut self) -> AppResult<()> {
        self.client
            .write("SENS:BAND:RES:AUTO ON; :BAND:VID:AUTO ON")
    }

    /// Single-sweep mode plus center, span, reference level and bandwidths.
    pub fn configure_sweep(&mut self, setup: &SweepSetup) -> AppResult<()> {
        self.select_instrument("SA")?;
        self.set_continuous(false)?;
        self.set_center(setup.center_hz)?;
        self.set_span(setup.span_hz)?;
        self.set_ref_level(setup.ref_level_dbm)?;
        match (setup.rbw_hz, setup.vbw_hz) {
            (None, None) => self.set_auto_bandwidths()?,
            (rbw, vbw) => {
                if let Some(rbw) = rbw {
                    self.set_rbw(rbw)?;
                }
                if let Some(vbw) = vbw {
                    self.set_vbw(vbw)?;
                }
            }
        }
        tracing::debug!(
            center_hz = setup.center_hz,
            span_hz = setup.span_hz,
            "SCPI sweep configured"
        );
        Ok(())
    }

    /// Start one sweep and poll until it completes or the timeout passes.
    pub fn sweep(&mut self) -> AppResult<OpcWait> {
        self.client.write(":INIT")?;
        self.client
            .wait_for_opc(self.opc.poll_interval, self.opc.timeout)
    }

    /// Start one sweep and block on `*OPC?`, bounded only by the read
    /// timeout of the stream.
    pub fn sweep_blocking(&mut self) -> AppResult<()> {
        let reply = self.client.query(":INIT; *OPC?")?;
        if reply.trim() != "1" {
            return Err(DaqError::Protocol(format!(
                "Unexpected *OPC? reply: {:?}",
                reply
            )));
        }
        Ok(())
    }

    /// Read the current trace and its frequency axis.
    pub fn fetch_trace(&mut self) -> AppResult<ScpiTrace> {
        let values = self.client.query_values("TRAC:DATA?")?;
        let start = self.client.query_f64("TRACE:XSTART?")?;
        let step = self.client.query_f64("TRACE:XINC?")?;
        Ok(ScpiTrace {
            axis: FrequencyAxis::new(start, step, values.len()),
            values,
        })
    }

    /// Sweep, then fetch the trace. `None` if the sweep did not complete in
    /// time.
    pub fn acquire_trace(&mut self) -> AppResult<Option<ScpiTrace>> {
        if self.sweep()?.timed_out() {
            return Ok(None);
        }
        self.fetch_trace().map(Some)
    }

    /// Drain the instrument error queue.
    pub fn errors(&mut self) -> AppResult<Vec<ScpiError>> {
        self.client.error_queue()
    }
}

/// Signal generator application driven over SCPI.
#[derive(Debug)]
pub struct SignalGenerator<S: Read + Write> {
    client: ScpiClient<S>,
    opc: OpcPolicy,
}

impl SignalGenerator<TcpStream> {
    /// Connect to `settings.host` on the generator port.
    pub fn connect(settings: &ScpiSettings) -> AppResult<Self> {
        let client = ScpiClient::connect(
            &settings.host,
            settings.generator_port,
            Duration::from_millis(settings.read_timeout_ms),
        )?;
        Ok(Self::new(client, OpcPolicy::from_settings(settings)))
    }
}

impl<S: Read + Write> SignalGenerator<S> {
    /// Wrap a connected client.
    pub fn new(client: ScpiClient<S>, opc: OpcPolicy) -> Self {
        Self { client, opc }
    }

    /// Underlying client for commands not covered here.
    pub fn client(&mut self) -> &mut ScpiClient<S> {
        &mut self.client
    }

    /// Give back the client.
    pub fn into_client(self) -> ScpiClient<S> {
        self.client
    }

    /// Switch the RF output.
    pub fn set_output(&mut self, on: bool) -> AppResult<()> {
        self.client.write(if on { "OUTPUT ON" } else { "OUTPUT OFF" })
    }

    /// Switch modulation.
    pub fn set_modulation(&mut self, on: bool) -> AppResult<()> {
        self.client
            .write(if on { "OUTPUT:MOD ON" } else { "OUTPUT:MOD OFF" })
    }

    /// Output frequency in Hz.
    pub fn set_frequency(&mut self, hz: f64) -> AppResult<()> {
        self.client.write(&format!("FREQ {}", hz))
    }

    /// Output power in dBm.
    pub fn set_power(&mut self, dbm: f64) -> AppResult<()> {
        self.client.write(&format!("POW {}", dbm))
    }

    /// Output an unmodulated carrier and wait until it is settled.
    pub fn output_cw(&mut self, frequency_hz: f64, power_dbm: f64) -> AppResult<OpcWait> {
        self.set_output(true)?;
        self.set_modulation(false)?;
        self.set_frequency(frequency_hz)?;
        self.set_power(power_dbm)?;
        let wait = self
            .client
            .wait_for_opc(self.opc.poll_interval, self.opc.timeout)?;
        tracing::info!(frequency_hz, power_dbm, completed = wait.completed, "CW output");
        Ok(wait)
    }

    /// Drain the instrument error queue.
    pub fn errors(&mut self) -> AppResult<Vec<ScpiError>> {
        self.client.error_queue()
    }
}

#[cfg(test)]
mod tests {
    use super::super::mock::MockInstrument;
    use super::*;

    fn fast_policy() -> OpcPolicy {
        OpcPolicy {
            poll_interval: Duration::from_millis(1),
            timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn configure_sweep_sends_expected_commands() {
        let client = ScpiClient::from_stream(MockInstrument::new());
        let mut sa = SpectrumAnalyzer::new(client, fast_policy());
        sa.configure_sweep(&SweepSetup {
            center_hz: 1.0e9,
            span_hz: 20.0e6,
            ref_level_dbm: -20.0,
            rbw_hz: Some(30.0e3),
            vbw_hz: None,
        })
        .unwrap();
        let sent = sa.into_client().into_inner().received();
        assert_eq!(
            sent,
            vec![
                "INSTRUMENT:SELECT SA",
                "INIT:CONT OFF",
                "SENS:FREQ:CENT 1000000000",
                "SENS:FREQ:SPAN 20000000",
                "SENS:POW:RF:RLEV -20",
                "SENS:BAND:RES 30000",
            ]
        );
    }

    #[test]
    fn trace_axis_comes_from_xstart_and_xinc() {
        let mock = MockInstrument::new()
            .esr_after(0)
            .respond("TRAC:DATA?", "-90,-30.5,-88")
            .respond("TRACE:XSTART?", "990e6")
            .respond("TRACE:XINC?", "10e6");
        let mut sa = SpectrumAnalyzer::new(ScpiClient::from_stream(mock), fast_policy());
        let trace = sa.acquire_trace().unwrap().unwrap();
        assert_eq!(trace.axis.len(), 3);
        assert_eq!(trace.peak(), Some((1.0e9, -30.5)));
    }

    #[test]
    fn blocking_sweep_expects_one() {
        let mock = MockInstrument::new().respond("*OPC?", "1");
        let mut sa = SpectrumAnalyzer::new(ScpiClient::from_stream(mock), fast_policy());
        sa.sweep_blocking().unwrap();
    }

    #[test]
    fn generator_cw_sequence() {
        let mut sg = SignalGenerator::new(
            ScpiClient::from_stream(MockInstrument::new().esr_after(2)),
            fast_policy(),
        );
        let wait = sg.output_cw(1.0e9, -30.0).unwrap();
        assert!(wait.completed);
        assert_eq!(wait.polls, 3);
        let sent = sg.into_client().into_inner().received();
        assert_eq!(
            &sent[..5],
            &["OUTPUT ON", "OUTPUT:MOD OFF", "FREQ 1000000000", "POW -30", "*OPC"]
        );
    }
}
