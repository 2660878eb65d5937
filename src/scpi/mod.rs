//! SCPI command/query client.
//!
//! Line-oriented request/response over a byte stream, normally a TCP socket:
//!
//! - every command or query is sent as one line terminated by `\n`
//! - a query (last `;`-separated part ends in `?`) is answered by exactly
//!   one reply line; a command is answered by nothing
//! - compound commands joined with `;` are handed to the instrument as
//!   written; the client does not treat them as atomic
//!
//! Long-running operations are awaited with [`ScpiClient::wait_for_opc`],
//! which sets the operation-complete bit and polls the event status register
//! until it reads non-zero or a caller-supplied timeout passes.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut sa = ScpiClient::connect("localhost", ANALYZER_PORT, Duration::from_secs(2))?;
//! sa.write("INIT:CONT OFF")?;
//! sa.write("INIT")?;
//! let done = sa.wait_for_opc(DEFAULT_OPC_POLL_INTERVAL, Duration::from_secs(5))?;
//! ```

pub mod instruments;
pub mod mock;

use crate::error::{AppResult, DaqError};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

/// Default control port of a spectrum analyzer application.
pub const ANALYZER_PORT: u16 = 5025;

/// Default control port of a signal generator application.
pub const GENERATOR_PORT: u16 = 5024;

/// Default reply timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Interval between `*ESR?` polls.
pub const DEFAULT_OPC_POLL_INTERVAL: Duration = Duration::from_millis(16);

/// Largest error queue length accepted from `SYST:ERR:COUNT?`.
pub const MAX_ERROR_QUEUE_LEN: i32 = 256;

/// Outcome of a completion poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcWait {
    /// The event status register read non-zero.
    pub completed: bool,
    /// Number of `*ESR?` queries issued.
    pub polls: u32,
    /// Time from `*OPC` to the last poll.
    pub elapsed: Duration,
}

impl OpcWait {
    /// `true` if the timeout passed before completion was observed.
    pub fn timed_out(&self) -> bool {
        !self.completed
    }
}

/// One entry of the instrument error queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScpiError {
    /// SCPI error number; negative values are standard SCPI errors.
    pub code: i32,
    /// Error text without quotes.
    pub message: String,
}

impl ScpiError {
    /// Parse a `SYST:ERR:NEXT?` reply such as `-113,"Undefined header"`.
    pub fn parse(reply: &str) -> AppResult<Self> {
        let (code, message) = reply.split_once(',').ok_or_else(|| {
            DaqError::Protocol(format!("Malformed error queue entry: {:?}", reply))
        })?;
        let code = code.trim().parse::<i32>().map_err(|_| {
            DaqError::Protocol(format!("Malformed error code in {:?}", reply))
        })?;
        Ok(Self {
            code,
            message: message.trim().trim_matches('"').to_string(),
        })
    }
}

fn is_query(line: &str) -> bool {
    line.rsplit(';')
        .next()
        .map(|last| last.trim_end().ends_with('?'))
        .unwrap_or(false)
}

/// Synchronous SCPI client over any byte stream.
pub struct ScpiClient<S: Read + Write> {
    stream: BufReader<S>,
}

impl ScpiClient<TcpStream> {
    /// Connect to an instrument.
    ///
    /// # Arguments
    /// * `host` - Hostname or IP address
    /// * `port` - TCP port (5025 analyzer, 5024 generator)
    /// * `read_timeout` - Upper bound on waiting for one reply line
    pub fn connect(host: &str, port: u16, read_timeout: Duration) -> AppResult<Self> {
        let stream = TcpStream::connect((host, port))?;
        stream.set_read_timeout(Some(read_timeout))?;
        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        tracing::info!("Connected to SCPI instrument at {}:{}", host, port);
        Ok(Self::from_stream(stream))
    }
}

impl<S: Read + Write> ScpiClient<S> {
    /// Wrap an already connected stream.
    pub fn from_stream(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    /// The underlying stream.
    pub fn get_ref(&self) -> &S {
        self.stream.get_ref()
    }

    /// The underlying stream, mutably.
    pub fn get_mut(&mut self) -> &mut S {
        self.stream.get_mut()
    }

    /// Give back the stream. Buffered input is dropped.
    pub fn into_inner(self) -> S {
        self.stream.into_inner()
    }

    fn send_line(&mut self, line: &str) -> AppResult<()> {
        if line.contains('\n') {
            return Err(DaqError::InvalidState(format!(
                "SCPI line must not contain a newline: {:?}",
                line
            )));
        }
        let stream = self.stream.get_mut();
        stream.write_all(line.as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()?;
        Ok(())
    }

    /// Send a command that produces no reply.
    ///
    /// # Arguments
    /// * `command` - SCPI command string (e.g., "SENS:FREQ:CENT 1GHZ")
    pub fn write(&mut self, command: &str) -> AppResult<()> {
        if is_query(command) {
            return Err(DaqError::InvalidState(format!(
                "{:?} is a query; use query()",
                command
            )));
        }
        tracing::debug!("SCPI write: {:?}", command);
        self.send_line(command)
    }

    /// Send a query and read its single reply line.
    ///
    /// # Returns
    /// Reply with the line terminator removed
    pub fn query(&mut self, query: &str) -> AppResult<String> {
        if !is_query(query) {
            return Err(DaqError::InvalidState(format!(
                "{:?} is not a query; use write()",
                query
            )));
        }
        tracing::debug!("SCPI query: {:?}", query);
        self.send_line(query)?;

        let mut response = String::new();
        if self.stream.read_line(&mut response)? == 0 {
            return Err(DaqError::Protocol(format!(
                "Connection closed while waiting for reply to: {}",
                query
            )));
        }
        let trimmed = response.trim_end_matches(['\n', '\r']).to_string();
        tracing::debug!("SCPI response: {:?}", trimmed);
        Ok(trimmed)
    }

    /// Query a floating-point value.
    pub fn query_f64(&mut self, query: &str) -> AppResult<f64> {
        let response = self.query(query)?;
        response.trim().parse::<f64>().map_err(|_| {
            DaqError::Protocol(format!(
                "Failed to parse '{}' as f64 from query: {}",
                response, query
            ))
        })
    }

    /// Query an integer value.
    pub fn query_i32(&mut self, query: &str) -> AppResult<i32> {
        let response = self.query(query)?;
        response.trim().parse::<i32>().map_err(|_| {
            DaqError::Protocol(format!(
                "Failed to parse '{}' as integer from query: {}",
                response, query
            ))
        })
    }

    /// Query a comma-separated list of floating-point values.
    pub fn query_values(&mut self, query: &str) -> AppResult<Vec<f64>> {
        let response = self.query(query)?;
        if response.trim().is_empty() {
            return Ok(Vec::new());
        }
        response
            .split(',')
            .enumerate()
            .map(|(i, field)| {
                field.trim().parse::<f64>().map_err(|_| {
                    DaqError::Protocol(format!(
                        "Failed to parse value {} ('{}') from query: {}",
                        i, field, query
                    ))
                })
            })
            .collect()
    }

    /// Wait for pending operations to complete.
    ///
    /// Writes `*OPC`, then queries `*ESR?` every `poll_interval` until the
    /// register reads non-zero. Gives up once another poll would start after
    /// `timeout`; running out of time is reported in the result, not as an
    /// error.
    pub fn wait_for_opc(
        &mut self,
        poll_interval: Duration,
        timeout: Duration,
    ) -> AppResult<OpcWait> {
        self.write("*OPC")?;
        let started = Instant::now();
        let mut polls = 0u32;
        loop {
            let esr = self.query_i32("*ESR?")?;
            polls += 1;
            if esr != 0 {
                let elapsed = started.elapsed();
                tracing::debug!(
                    polls,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Operation complete"
                );
                return Ok(OpcWait {
                    completed: true,
                    polls,
                    elapsed,
                });
            }
            if started.elapsed() + poll_interval > timeout {
                let elapsed = started.elapsed();
                tracing::warn!(
                    polls,
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed out waiting for operation complete"
                );
                return Ok(OpcWait {
                    completed: false,
                    polls,
                    elapsed,
                });
            }
            std::thread::sleep(poll_interval);
        }
    }

    /// Drain the instrument error queue.
    pub fn error_queue(&mut self) -> AppResult<Vec<ScpiError>> {
        let count = self.query_i32("SYST:ERR:COUNT?")?;
        if !(0..=MAX_ERROR_QUEUE_LEN).contains(&count) {
            return Err(DaqError::Protocol(format!(
                "error queue length {count} outside 0..={MAX_ERROR_QUEUE_LEN}"
            )));
        }
        let mut errors = Vec::new();
        for _ in 0..count {
            let entry = ScpiError::parse(&self.query("SYST:ERR:NEXT?")?)?;
            tracing::warn!(code = entry.code, "SCPI error: {}", entry.message);
            errors.push(entry);
        }
        Ok(errors)
    }
}

impl<S: Read + Write> std::fmt::Debug for ScpiClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScpiClient")
            .field("buffered", &self.stream.buffer().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockInstrument;
    use super::*;

    #[test]
    fn query_detection_looks_at_last_part() {
        assert!(is_query("*ESR?"));
        assert!(is_query(":INIT; *OPC?"));
        assert!(!is_query("SENS:FREQ:SPAN 20MHZ; CENT 1GHZ"));
        assert!(!is_query("*OPC"));
    }

    #[test]
    fn write_terminates_with_single_newline() {
        let mut client = ScpiClient::from_stream(MockInstrument::new());
        client.write("INIT:CONT OFF").unwrap();
        assert_eq!(client.get_ref().received(), vec!["INIT:CONT OFF".to_string()]);
        assert_eq!(client.get_ref().raw_input(), b"INIT:CONT OFF\n");
    }

    #[test]
    fn write_refuses_queries_and_query_refuses_commands() {
        let mut client = ScpiClient::from_stream(MockInstrument::new());
        assert!(matches!(client.write("*ESR?"), Err(DaqError::InvalidState(_))));
        assert!(matches!(client.query("*OPC"), Err(DaqError::InvalidState(_))));
        assert!(client.get_ref().received().is_empty());
    }

    #[test]
    fn numeric_and_list_replies_are_parsed() {
        let mock = MockInstrument::new()
            .respond("TRACE:XSTART?", "990000000")
            .respond("TRAC:DATA?", "-80.5,-79.25,-20.0")
            .respond("SYST:ERR:COUNT?", "0");
        let mut client = ScpiClient::from_stream(mock);
        assert_eq!(client.query_f64("TRACE:XSTART?").unwrap(), 990.0e6);
        assert_eq!(
            client.query_values("TRAC:DATA?").unwrap(),
            vec![-80.5, -79.25, -20.0]
        );
        assert!(client.error_queue().unwrap().is_empty());
    }

    #[test]
    fn unparseable_reply_is_protocol_error() {
        let mock = MockInstrument::new().respond("TRACE:XINC?", "abc");
        let mut client = ScpiClient::from_stream(mock);
        assert!(matches!(
            client.query_f64("TRACE:XINC?"),
            Err(DaqError::Protocol(_))
        ));
    }

    #[test]
    fn implausible_error_count_is_protocol_error() {
        for count in ["2147483647", "-1"] {
            let mock = MockInstrument::new()
                .respond("SYST:ERR:COUNT?", count)
                .respond("SYST:ERR:NEXT?", "0,\"No error\"");
            let mut client = ScpiClient::from_stream(mock);
            assert!(matches!(
                client.error_queue(),
                Err(DaqError::Protocol(_))
            ));
            assert_eq!(client.get_ref().arrivals("SYST:ERR:NEXT?").len(), 0);
        }
    }

    #[test]
    fn error_entries_are_parsed() {
        let err = ScpiError::parse("-113,\"Undefined header\"").unwrap();
        assert_eq!(err.code, -113);
        assert_eq!(err.message, "Undefined header");
        assert!(ScpiError::parse("garbage").is_err());
    }
}
