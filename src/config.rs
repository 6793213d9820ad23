//! Configuration loading and persistence.
//!
//! Both roles work with zero configuration: the endpoint defaults to the
//! loopback address and the fixed port of the current protocol generation.
//! The daemon may override that from `config.json` and environment
//! variables, mainly for tests and side-by-side development builds.
//!
//! Precedence, lowest first: defaults, `config.json`, `HOSTLINK_*` env vars,
//! command-line flags (applied by the binary).

use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::connection::Endpoint;
use crate::constants::{CONNECT_TIMEOUT, DEFAULT_ADDRESS, TICK_INTERVAL};
use crate::protocol::ProtocolVersion;

/// Name of the configuration file inside the config directory.
pub const CONFIG_FILE: &str = "config.json";

/// Transport configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Protocol generation (selects wire layout and default port).
    pub protocol: ProtocolVersion,
    /// Address to bind / connect to.
    pub address: Ipv4Addr,
    /// Port override; `None` uses the generation's fixed port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Delay between daemon ticks in milliseconds.
    pub tick_interval_ms: u64,
    /// Per-attempt connect bound in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            protocol: ProtocolVersion::default(),
            address: DEFAULT_ADDRESS,
            port: None,
            tick_interval_ms: TICK_INTERVAL.as_millis() as u64,
            connect_timeout_ms: CONNECT_TIMEOUT.as_millis() as u64,
        }
    }
}

impl Config {
    /// Returns the configuration directory path.
    ///
    /// `HOSTLINK_CONFIG_DIR` wins; otherwise the platform config dir
    /// (macOS: `~/Library/Application Support/hostlink`).
    pub fn config_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("HOSTLINK_CONFIG_DIR") {
            return Ok(PathBuf::from(dir));
        }
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join("hostlink"))
    }

    /// Loads configuration from the config directory, then applies
    /// environment overrides. A missing file means defaults.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join(CONFIG_FILE);
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from `path` without environment overrides.
    ///
    /// A missing file yields defaults; an unreadable or malformed one is an error.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}; using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config: {}", path.display()))
    }

    /// Persists the configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `HOSTLINK_*` overrides looked up through `lookup`.
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(protocol) = lookup("HOSTLINK_PROTOCOL") {
            match protocol.parse() {
                Ok(v) => self.protocol = v,
                Err(e) => log::warn!("Ignoring HOSTLINK_PROTOCOL: {e}"),
            }
        }

        if let Some(address) = lookup("HOSTLINK_ADDRESS") {
            match address.parse() {
                Ok(a) => self.address = a,
                Err(e) => log::warn!("Ignoring HOSTLINK_ADDRESS={address}: {e}"),
            }
        }

        if let Some(port) = lookup("HOSTLINK_PORT") {
            match port.parse::<u16>() {
                Ok(p) => self.port = Some(p),
                Err(e) => log::warn!("Ignoring HOSTLINK_PORT={port}: {e}"),
            }
        }

        if let Some(interval) = lookup("HOSTLINK_TICK_INTERVAL_MS") {
            if let Ok(ms) = interval.parse::<u64>() {
                self.tick_interval_ms = ms;
            }
        }

        if let Some(timeout) = lookup("HOSTLINK_CONNECT_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse::<u64>() {
                self.connect_timeout_ms = ms;
            }
        }
    }

    /// Endpoint described by this configuration.
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        let endpoint = Endpoint::new(self.protocol).with_address(self.address);
        match self.port {
            Some(port) => endpoint.with_port(port),
            None => endpoint,
        }
    }

    /// Delay between daemon ticks.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Per-attempt connect bound. Zero is not a valid timeout for
    /// `connect_timeout`, so it falls back to the default.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        if self.connect_timeout_ms == 0 {
            CONNECT_TIMEOUT
        } else {
            Duration::from_millis(self.connect_timeout_ms)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_target_current_generation_on_loopback() {
        let config = Config::default();
        let endpoint = config.endpoint();
        assert_eq!(endpoint.version, ProtocolVersion::Current);
        assert_eq!(endpoint.port, ProtocolVersion::Current.port());
        assert_eq!(endpoint.address, Ipv4Addr::LOCALHOST);
        assert_eq!(config.tick_interval(), TICK_INTERVAL);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let config = Config {
            protocol: ProtocolVersion::Legacy,
            port: Some(31000),
            tick_interval_ms: 25,
            ..Config::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, r#"{"protocol":"legacy"}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.protocol, ProtocolVersion::Legacy);
        assert_eq!(config.endpoint().port, ProtocolVersion::Legacy.port());
        assert_eq!(config.tick_interval_ms, Config::default().tick_interval_ms);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "{ not json").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_overrides(lookup(&[
            ("HOSTLINK_PROTOCOL", "legacy"),
            ("HOSTLINK_PORT", "40000"),
            ("HOSTLINK_TICK_INTERVAL_MS", "5"),
            ("HOSTLINK_CONNECT_TIMEOUT_MS", "0"),
        ]));
        assert_eq!(config.protocol, ProtocolVersion::Legacy);
        assert_eq!(config.endpoint().port, 40000);
        assert_eq!(config.tick_interval(), Duration::from_millis(5));
        assert_eq!(config.connect_timeout(), CONNECT_TIMEOUT);
    }

    #[test]
    fn test_invalid_env_values_are_ignored() {
        let mut config = Config::default();
        config.apply_overrides(lookup(&[
            ("HOSTLINK_PROTOCOL", "v9"),
            ("HOSTLINK_ADDRESS", "not-an-ip"),
            ("HOSTLINK_PORT", "70000"),
        ]));
        assert_eq!(config, Config::default());
    }
}
