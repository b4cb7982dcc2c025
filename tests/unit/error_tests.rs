//! Unit tests for `AppError` display format and conversions.

use pdal_session::AppError;

#[test]
fn display_prefixes_kind() {
    let cases = [
        (AppError::Config("x".into()), "config: x"),
        (AppError::Spawn("x".into()), "spawn: x"),
        (AppError::Handshake("x".into()), "handshake: x"),
        (AppError::Protocol("x".into()), "protocol: x"),
        (AppError::ErrorOutput("x".into()), "error output: x"),
        (AppError::Terminated("x".into()), "terminated: x"),
        (AppError::Framing("x".into()), "framing: x"),
        (AppError::Io("x".into()), "io: x"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn error_message_has_no_trailing_period() {
    let err = AppError::Terminated("worker exited with code 1 while awaiting ready signal".into());
    assert!(!err.to_string().ends_with('.'));
}

#[test]
fn kinds_are_distinct() {
    let terminated = AppError::Terminated("gone".into());
    let error_output = AppError::ErrorOutput("gone".into());
    assert_ne!(terminated, error_output);
    assert_ne!(terminated.to_string(), error_output.to_string());
}

#[test]
fn io_error_converts_to_io_variant() {
    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
    let err: AppError = io.into();
    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("pipe closed")));
}

#[test]
fn toml_error_converts_to_config_variant() {
    let toml_err = toml::from_str::<toml::Value>("not = = toml").unwrap_err();
    let err: AppError = toml_err.into();
    assert!(err.to_string().starts_with("config: invalid config"));
}

#[test]
fn implements_std_error() {
    fn assert_error<E: std::error::Error + Send + Sync + 'static>(_: &E) {}
    assert_error(&AppError::Protocol("x".into()));
}
