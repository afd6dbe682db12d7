use std::fs;
use tandem_config::{ConfigError, ConfigLoader};
use tempfile::TempDir;

fn no_env(_: &str) -> Option<String> {
    None
}

fn write(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("Failed to write config");
    path
}

#[test]
fn explicit_file_overrides_global_file() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let global = write(
        &dir,
        "global.toml",
        r#"
[sync.flush]
debounce_ms = 1000
max_attempts = 5

[relay]
denied_topics = ["archive/"]
"#,
    );
    let explicit = write(
        &dir,
        "tandem.toml",
        r#"
[sync.flush]
debounce_ms = 250

[relay]
port = 7000
denied_topics = ["private/"]
"#,
    );

    let config = ConfigLoader::new()
        .with_global_file(&global)
        .with_file(&explicit)
        .load_with_env(no_env)
        .expect("Failed to load config");

    assert_eq!(config.sync.flush.debounce_ms, 250);
    assert_eq!(config.sync.flush.max_attempts, 5);
    assert_eq!(config.sync.flush.max_wait_ms, 10_000);
    assert_eq!(config.relay.port, 7000);
    assert_eq!(config.relay.denied_topics, vec!["archive/", "private/"]);
}

#[test]
fn missing_global_file_is_skipped() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = ConfigLoader::new()
        .with_global_file(dir.path().join("absent.toml"))
        .load_with_env(no_env)
        .expect("Failed to load config");
    assert_eq!(config.relay.port, 4455);
}

#[test]
fn missing_explicit_file_is_an_error() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let result = ConfigLoader::new()
        .without_global()
        .with_file(dir.path().join("absent.toml"))
        .load_with_env(no_env);
    assert!(matches!(result, Err(ConfigError::Io { .. })));
}

#[test]
fn json_files_are_supported() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = write(
        &dir,
        "tandem.json",
        r#"{ "sync": { "presence": { "heartbeat_ms": 2000, "ttl_ms": 6000 } } }"#,
    );

    let config = ConfigLoader::new()
        .without_global()
        .with_file(&path)
        .load_with_env(no_env)
        .expect("Failed to load config");
    assert_eq!(config.sync.presence.heartbeat_ms, 2000);
    assert_eq!(config.sync.presence.ttl_ms, 6000);
    assert_eq!(config.sync.presence.typing_timeout_ms, 1000);
}

#[cfg(feature = "yaml")]
#[test]
fn yaml_files_are_supported() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = write(
        &dir,
        "tandem.yaml",
        "sync:\n  snapshot:\n    max_operations: 50\nlogging:\n  level: warn\n",
    );

    let config = ConfigLoader::new()
        .without_global()
        .with_file(&path)
        .load_with_env(no_env)
        .expect("Failed to load config");
    assert_eq!(config.sync.snapshot.max_operations, 50);
    assert_eq!(config.logging.level, "warn");
}

#[test]
fn unknown_extension_is_rejected() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = write(&dir, "tandem.ini", "port=1");
    let result = ConfigLoader::new()
        .without_global()
        .with_file(&path)
        .load_with_env(no_env);
    assert!(matches!(result, Err(ConfigError::UnsupportedFormat { .. })));
}

#[test]
fn invalid_values_fail_validation() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = write(
        &dir,
        "tandem.toml",
        r#"
[sync.presence]
heartbeat_ms = 5000
ttl_ms = 4000
"#,
    );
    let result = ConfigLoader::new()
        .without_global()
        .with_file(&path)
        .load_with_env(no_env);
    assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
}

#[test]
fn malformed_toml_is_a_parse_error() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = write(&dir, "tandem.toml", "this is not valid toml {[}");
    let result = ConfigLoader::new()
        .without_global()
        .with_file(&path)
        .load_with_env(no_env);
    assert!(matches!(result, Err(ConfigError::Parse { .. })));
}
