//! Integration tests for settings loading from TOML files

use rf_daq::error::DaqError;
use rf_daq::interceptor::ErrorPolicy;
use rf_daq::logging::LoggingConfig;
use rf_daq::scpi::instruments::OpcPolicy;
use rf_daq::settings::Settings;
use rf_daq::streaming::StreamingLoop;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::Level;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_full_file() {
    let file = write_config(
        r#"
        [application]
        name = "bench"
        log_level = "debug"

        [scpi]
        host = "10.1.2.3"
        opc_poll_interval_ms = 20
        opc_timeout_ms = 5000

        [streaming]
        samples_per_capture = 16384
        captures = 12

        [interceptor]
        policy = "propagate"
        "#,
    );

    let settings = Settings::load_from(file.path()).unwrap();
    assert_eq!(settings.application.name, "bench");
    assert_eq!(settings.scpi.host, "10.1.2.3");
    assert_eq!(settings.scpi.analyzer_port, 5025);
    assert_eq!(settings.interceptor.policy, ErrorPolicy::Propagate);

    let opc = OpcPolicy::from_settings(&settings.scpi);
    assert_eq!(opc.poll_interval, Duration::from_millis(20));
    assert_eq!(opc.timeout, Duration::from_secs(5));

    let stream = StreamingLoop::from_settings(&settings.streaming).unwrap();
    assert_eq!(stream.samples_per_capture(), 16_384);
    assert_eq!(stream.captures(), 12);

    let logging = LoggingConfig::from_settings(&settings).unwrap();
    assert_eq!(logging.level, Level::DEBUG);
}

#[test]
fn test_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::load_from(dir.path().join("absent.toml")).unwrap();
    assert_eq!(settings, Settings::default());
}

#[test]
fn test_exit_policy_alias() {
    let file = write_config(
        r#"
        [interceptor]
        policy = "exit_process"
        "#,
    );
    let settings = Settings::load_from(file.path()).unwrap();
    assert_eq!(settings.interceptor.policy, ErrorPolicy::Exit);
}

#[test]
fn test_semantic_validation_runs_after_extract() {
    let file = write_config(
        r#"
        [streaming]
        samples_per_capture = 0
        "#,
    );
    assert!(matches!(
        Settings::load_from(file.path()),
        Err(DaqError::Configuration(_))
    ));
}

#[test]
fn test_wrong_type_is_config_error() {
    let file = write_config(
        r#"
        [scpi]
        analyzer_port = "not a port"
        "#,
    );
    assert!(matches!(
        Settings::load_from(file.path()),
        Err(DaqError::Config(_))
    ));
}
