//! Integration tests for SCPI completion polling
//!
//! Uses the scripted [`MockInstrument`] for timing checks and a loopback TCP
//! listener for the connect path.

use rf_daq::error::DaqError;
use rf_daq::scpi::instruments::{OpcPolicy, SpectrumAnalyzer, SweepSetup};
use rf_daq::scpi::mock::MockInstrument;
use rf_daq::scpi::ScpiClient;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;

// =============================================================================
// *OPC / *ESR? polling
// =============================================================================

#[test]
fn test_opc_wait_polls_until_register_sets() {
    let interval = Duration::from_millis(10);
    let mut client = ScpiClient::from_stream(MockInstrument::new().esr_after(3));

    let wait = client
        .wait_for_opc(interval, Duration::from_secs(1))
        .unwrap();
    assert!(wait.completed);
    assert!(!wait.timed_out());
    assert_eq!(wait.polls, 4);

    let mock = client.into_inner();
    assert_eq!(mock.received()[0], "*OPC");
    let polls = mock.arrivals("*ESR?");
    assert_eq!(polls.len(), 4);
    for pair in polls.windows(2) {
        assert!(pair[1].duration_since(pair[0]) >= interval);
    }
}

#[test]
fn test_opc_wait_timeout_is_reported_not_raised() {
    let interval = Duration::from_millis(5);
    let timeout = Duration::from_millis(30);
    let mut client = ScpiClient::from_stream(MockInstrument::new().esr_after(1_000));

    let wait = client.wait_for_opc(interval, timeout).unwrap();
    assert!(wait.timed_out());
    assert!(wait.polls >= 1);
    // Bounded by the timeout plus at most one oversleep
    assert!(wait.elapsed < timeout + Duration::from_millis(100));
}

#[test]
fn test_completed_register_on_first_poll() {
    let mut client = ScpiClient::from_stream(MockInstrument::new().esr_after(0));
    let wait = client
        .wait_for_opc(Duration::from_millis(50), Duration::from_secs(1))
        .unwrap();
    assert!(wait.completed);
    assert_eq!(wait.polls, 1);
}

// =============================================================================
// Replies and framing
// =============================================================================

#[test]
fn test_compound_command_is_one_line() {
    let mut client = ScpiClient::from_stream(MockInstrument::new());
    client
        .write("SENS:BAND:RES:AUTO ON; :BAND:VID:AUTO ON")
        .unwrap();
    assert_eq!(
        client.get_ref().raw_input(),
        b"SENS:BAND:RES:AUTO ON; :BAND:VID:AUTO ON\n"
    );
}

#[test]
fn test_unanswered_query_times_out_as_io_error() {
    let mut client = ScpiClient::from_stream(MockInstrument::new());
    let err = client.query("SENS:FREQ:CENT?").unwrap_err();
    assert!(matches!(err, DaqError::Io(_)));
}

#[test]
fn test_closed_connection_is_protocol_error() {
    let mut client = ScpiClient::from_stream(MockInstrument::new().disconnect());
    let err = client.query("*IDN?").unwrap_err();
    assert!(matches!(err, DaqError::Protocol(_)));
}

#[test]
fn test_error_queue_drains_all_entries() {
    let mock = MockInstrument::new()
        .respond("SYST:ERR:COUNT?", "2")
        .respond_sequence(
            "SYST:ERR:NEXT?",
            [r#"-113,"Undefined header""#, r#"-222,"Data out of range""#],
        );
    let mut client = ScpiClient::from_stream(mock);
    let errors = client.error_queue().unwrap();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].code, -113);
    assert_eq!(errors[1].message, "Data out of range");
}

// =============================================================================
// TCP transport
// =============================================================================

#[test]
fn test_analyzer_sweep_over_loopback() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut writer = stream.try_clone().unwrap();
        let mut lines = Vec::new();
        for line in BufReader::new(stream).lines() {
            let line = line.unwrap();
            let reply = match line.as_str() {
                "*ESR?" => Some("1"),
                "TRAC:DATA?" => Some("-80,-25,-81"),
                "TRACE:XSTART?" => Some("2.4e9"),
                "TRACE:XINC?" => Some("1e6"),
                _ => None,
            };
            if let Some(reply) = reply {
                writer.write_all(format!("{}\n", reply).as_bytes()).unwrap();
            }
            let done = line == "TRACE:XINC?";
            lines.push(line);
            if done {
                break;
            }
        }
        lines
    });

    let client = ScpiClient::connect("127.0.0.1", port, Duration::from_secs(2)).unwrap();
    let mut sa = SpectrumAnalyzer::new(
        client,
        OpcPolicy {
            poll_interval: Duration::from_millis(1),
            timeout: Duration::from_secs(1),
        },
    );
    sa.configure_sweep(&SweepSetup {
        center_hz: 2.401e9,
        span_hz: 2.0e6,
        ref_level_dbm: -10.0,
        rbw_hz: None,
        vbw_hz: None,
    })
    .unwrap();
    let trace = sa.acquire_trace().unwrap().unwrap();
    assert_eq!(trace.peak(), Some((2.401e9, -25.0)));

    let lines = server.join().unwrap();
    assert!(lines.contains(&"SENS:BAND:RES:AUTO ON; :BAND:VID:AUTO ON".to_string()));
    assert!(lines.contains(&":INIT".to_string()));
}
