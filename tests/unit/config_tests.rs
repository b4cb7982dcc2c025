//! Unit tests for session configuration parsing and validation.

use std::path::{Path, PathBuf};

use pdal_session::config::{DEFAULT_COMMAND_QUEUE_DEPTH, DEFAULT_MAX_FRAME_BYTES};
use pdal_session::{AppError, SessionConfig};

fn full_toml() -> &'static str {
    r#"
process_path = "/opt/pdal/bin/pdal-session"
working_directory = "/var/lib/pdal"
log = false
max_frame_bytes = 1048576
command_queue_depth = 4
"#
}

#[test]
fn full_config_parses() {
    let config = SessionConfig::from_toml_str(full_toml()).expect("valid config");
    assert_eq!(config.process_path, PathBuf::from("/opt/pdal/bin/pdal-session"));
    assert_eq!(config.working_directory(), PathBuf::from("/var/lib/pdal"));
    assert!(!config.log);
    assert_eq!(config.frame_limit(), Some(1_048_576));
    assert_eq!(config.command_queue_depth, 4);
}

#[test]
fn minimal_config_applies_defaults() {
    let config = SessionConfig::from_toml_str(r#"process_path = "/opt/pdal/bin/pdal-session""#)
        .expect("valid config");
    assert!(config.log, "diagnostic echo defaults to on");
    assert_eq!(config.working_directory, None);
    assert_eq!(config.max_frame_bytes, DEFAULT_MAX_FRAME_BYTES);
    assert_eq!(config.command_queue_depth, DEFAULT_COMMAND_QUEUE_DEPTH);
}

#[test]
fn working_directory_defaults_to_executable_directory() {
    let config = SessionConfig::new("/opt/pdal/bin/pdal-session").expect("valid path");
    assert_eq!(config.working_directory(), Path::new("/opt/pdal/bin"));
}

#[test]
fn bare_executable_name_runs_in_current_directory() {
    let config = SessionConfig::new("pdal-session").expect("valid path");
    assert_eq!(config.working_directory(), Path::new("."));
}

#[test]
fn relative_process_path_is_anchored_to_current_directory() {
    let config = SessionConfig::new("build/pdal-session").expect("valid path");
    let cwd = std::env::current_dir().expect("current dir");
    assert_eq!(config.program(), cwd.join("build/pdal-session"));
    assert_eq!(config.working_directory(), cwd.join("build"));
}

#[test]
fn bare_program_name_is_left_for_path_lookup() {
    let config = SessionConfig::new("pdal-session").expect("valid path");
    assert_eq!(config.program(), Path::new("pdal-session"));
}

#[test]
fn builder_overrides_defaults() {
    let config = SessionConfig::new("/opt/pdal/bin/pdal-session")
        .expect("valid path")
        .with_working_directory("/tmp")
        .with_log(false)
        .with_max_frame_bytes(0);
    assert_eq!(config.working_directory(), Path::new("/tmp"));
    assert!(!config.log);
    assert_eq!(config.frame_limit(), None, "zero disables the frame cap");
}

#[test]
fn missing_process_path_is_rejected() {
    let result = SessionConfig::from_toml_str("log = true");
    match result {
        Err(AppError::Config(msg)) => assert!(msg.contains("process_path"), "got: {msg}"),
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn empty_process_path_is_rejected() {
    assert!(matches!(SessionConfig::new(""), Err(AppError::Config(_))));
    assert!(matches!(
        SessionConfig::from_toml_str(r#"process_path = """#),
        Err(AppError::Config(_))
    ));
}

#[test]
fn zero_queue_depth_is_rejected() {
    let raw = r#"
process_path = "/opt/pdal/bin/pdal-session"
command_queue_depth = 0
"#;
    assert!(matches!(
        SessionConfig::from_toml_str(raw),
        Err(AppError::Config(_))
    ));
}

#[test]
fn unknown_keys_are_rejected() {
    let raw = r#"
process_path = "/opt/pdal/bin/pdal-session"
proces_path = "/typo"
"#;
    assert!(matches!(
        SessionConfig::from_toml_str(raw),
        Err(AppError::Config(_))
    ));
}

#[test]
fn load_from_path_reads_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("session.toml");
    std::fs::write(&path, full_toml()).expect("write config");

    let config = SessionConfig::load_from_path(&path).expect("load config");
    assert_eq!(config.command_queue_depth, 4);
}

#[test]
fn load_from_missing_path_is_config_error() {
    let result = SessionConfig::load_from_path("/nonexistent/pdal-session.toml");
    match result {
        Err(AppError::Config(msg)) => assert!(msg.contains("failed to read config"), "got: {msg}"),
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn session_requires_tokio_runtime() {
    let config = SessionConfig::new("/opt/pdal/bin/pdal-session").expect("valid path");
    match pdal_session::Session::new(config) {
        Err(AppError::Config(msg)) => assert!(msg.contains("tokio runtime"), "got: {msg}"),
        Err(other) => panic!("expected config error, got {other:?}"),
        Ok(_) => panic!("session must not start outside a runtime"),
    }
}
