use fulcra_context_mcp::config::{load_config, TransportMode};
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_stdio_selects_local_transport() {
    assert_eq!(TransportMode::from_environment_value(Some("stdio")), TransportMode::Local);
}

#[test]
fn test_anything_else_selects_remote_transport() {
    for value in [None, Some(""), Some("production"), Some("STDIO"), Some("stdio ")] {
        assert_eq!(
            TransportMode::from_environment_value(value),
            TransportMode::Remote,
            "value {value:?}"
        );
    }
}

#[test]
fn test_config_file_values_are_loaded() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
callback_bind_address = "127.0.0.1:9999"
refresh_skew_secs = 120

[oauth]
audience = "https://api.example.com/"
"#
    )
    .unwrap();

    let config = load_config(Some(file.path())).unwrap();
    assert_eq!(config.callback_bind_address, "127.0.0.1:9999");
    assert_eq!(config.refresh_skew_secs, 120);
    assert_eq!(config.oauth.audience, "https://api.example.com/");
    assert_eq!(config.oauth.redirect_path, "/oauth/callback");
}

#[test]
fn test_malformed_config_file_is_an_error() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "refresh_skew_secs = \"soon\"").unwrap();
    assert!(load_config(Some(file.path())).is_err());
}
