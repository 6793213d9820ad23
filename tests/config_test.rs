//! Integration tests for configuration loading through the environment.

use std::env;
use std::fs;
use std::sync::Mutex;

use hostlink::{Config, ProtocolVersion};
use tempfile::TempDir;

// Global lock to prevent env var pollution between tests
static ENV_LOCK: Mutex<()> = Mutex::new(());

const OVERRIDES: [&str; 5] = [
    "HOSTLINK_PROTOCOL",
    "HOSTLINK_ADDRESS",
    "HOSTLINK_PORT",
    "HOSTLINK_TICK_INTERVAL_MS",
    "HOSTLINK_CONNECT_TIMEOUT_MS",
];

/// Point the config dir at a fresh temp dir and clear every override.
fn setup_test_env() -> (TempDir, std::sync::MutexGuard<'static, ()>) {
    let guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let temp_dir = TempDir::new().unwrap();

    for key in OVERRIDES {
        env::remove_var(key);
    }
    env::set_var("HOSTLINK_CONFIG_DIR", temp_dir.path());

    (temp_dir, guard)
}

#[test]
fn test_load_without_file_uses_defaults() {
    let (_dir, _guard) = setup_test_env();
    let config = Config::load().unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_config_dir_honours_env() {
    let (dir, _guard) = setup_test_env();
    assert_eq!(Config::config_dir().unwrap(), dir.path());
}

#[test]
fn test_env_overrides_file() {
    let (dir, _guard) = setup_test_env();
    fs::write(
        dir.path().join("config.json"),
        r#"{"protocol":"legacy","port":31001,"tick_interval_ms":50}"#,
    )
    .unwrap();
    env::set_var("HOSTLINK_PORT", "31002");

    let config = Config::load().unwrap();
    env::remove_var("HOSTLINK_PORT");

    assert_eq!(config.protocol, ProtocolVersion::Legacy);
    assert_eq!(config.endpoint().port, 31002);
    assert_eq!(config.tick_interval_ms, 50);
}

#[test]
fn test_malformed_file_fails_load() {
    let (dir, _guard) = setup_test_env();
    fs::write(dir.path().join("config.json"), "[]").unwrap();
    assert!(Config::load().is_err());
}
