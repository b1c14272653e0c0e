//! Configuration file and environment handling
//!
//! Precedence, lowest first: built-in defaults, the TOML config file,
//! `STORY_BRIDGE_*` environment variables, then CLI flags.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::{Error, Result};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "STORY_BRIDGE_CONFIG";

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Listener and coordination settings
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Device collaborator settings
    #[serde(default)]
    pub device: DeviceConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener and timeout settings for the coordination channel
#[derive(Debug, Deserialize, Clone)]
pub struct ChannelConfig {
    /// Interface to bind
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind; the device reaches the host on the same port
    #[serde(default = "default_port")]
    pub port: u16,

    /// How long to wait for an open device connection
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// How long a story change may take once the command is sent
    #[serde(default = "default_change_timeout")]
    pub change_timeout_ms: u64,

    /// Interval between checks for an open device connection
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// How long one device route attempt may take before it counts as failed
    #[serde(default = "default_route_timeout")]
    pub route_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout(),
            change_timeout_ms: default_change_timeout(),
            poll_interval_ms: default_poll_interval(),
            route_timeout_ms: default_route_timeout(),
        }
    }
}

impl ChannelConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn change_timeout(&self) -> Duration {
        Duration::from_millis(self.change_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn route_timeout(&self) -> Duration {
        Duration::from_millis(self.route_timeout_ms)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    7007
}
fn default_connect_timeout() -> u64 {
    60_000
}
fn default_change_timeout() -> u64 {
    20_000
}
fn default_poll_interval() -> u64 {
    100
}
fn default_route_timeout() -> u64 {
    30_000
}

/// Which device collaborator to drive
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Android device or emulator reached through adb
    #[default]
    Adb,
    /// Simulator sharing the host loopback; nothing to route or relaunch
    Host,
}

impl std::str::FromStr for DeviceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "adb" | "android" => Ok(Self::Adb),
            "host" | "ios" | "none" => Ok(Self::Host),
            other => Err(Error::Config(format!("unknown device kind '{}'", other))),
        }
    }
}

/// Device collaborator configuration
#[derive(Debug, Deserialize, Default, Clone)]
pub struct DeviceConfig {
    #[serde(default)]
    pub kind: DeviceKind,

    /// Path to adb; searched on PATH when unset
    pub adb_path: Option<PathBuf>,

    /// adb serial of the target device
    pub serial: Option<String>,

    /// Android package of the app under test, needed to relaunch it
    pub app_package: Option<String>,

    /// Launch activity; the launcher intent is used when unset
    pub app_activity: Option<String>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Default, Clone)]
pub struct LoggingConfig {
    /// Raise the crate's log level to debug
    #[serde(default)]
    pub debug: bool,
}

impl Config {
    /// Load configuration from the config file and the environment
    ///
    /// Returns defaults (plus environment overrides) if no file exists
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .or_else(config_path);

        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigParse(format!("Failed to read '{}': {}", path.display(), e))
        })?;
        toml::from_str(&content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Apply `STORY_BRIDGE_*` overrides using the given variable lookup
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("STORY_BRIDGE_HOST") {
            self.channel.host = host;
        }
        if let Some(port) = lookup("STORY_BRIDGE_PORT") {
            self.channel.port = parse_var("STORY_BRIDGE_PORT", &port)?;
        }
        if let Some(ms) = lookup("STORY_BRIDGE_CONNECT_TIMEOUT_MS") {
            self.channel.connect_timeout_ms = parse_var("STORY_BRIDGE_CONNECT_TIMEOUT_MS", &ms)?;
        }
        if let Some(ms) = lookup("STORY_BRIDGE_CHANGE_TIMEOUT_MS") {
            self.channel.change_timeout_ms = parse_var("STORY_BRIDGE_CHANGE_TIMEOUT_MS", &ms)?;
        }
        if let Some(ms) = lookup("STORY_BRIDGE_POLL_INTERVAL_MS") {
            self.channel.poll_interval_ms = parse_var("STORY_BRIDGE_POLL_INTERVAL_MS", &ms)?;
        }
        if let Some(ms) = lookup("STORY_BRIDGE_ROUTE_TIMEOUT_MS") {
            self.channel.route_timeout_ms = parse_var("STORY_BRIDGE_ROUTE_TIMEOUT_MS", &ms)?;
        }
        if let Some(debug) = lookup("STORY_BRIDGE_DEBUG") {
            self.logging.debug = parse_flag(&debug);
        }
        if let Some(kind) = lookup("STORY_BRIDGE_DEVICE") {
            self.device.kind = kind.parse()?;
        }
        if let Some(serial) = lookup("STORY_BRIDGE_ADB_SERIAL") {
            self.device.serial = Some(serial);
        }
        if let Some(package) = lookup("STORY_BRIDGE_APP_PACKAGE") {
            self.device.app_package = Some(package);
        }

        if self.channel.poll_interval_ms == 0 {
            return Err(Error::Config(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid value '{}' for {}", value, name)))
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.channel.port, 7007);
        assert_eq!(config.channel.connect_timeout_ms, 60_000);
        assert_eq!(config.channel.change_timeout_ms, 20_000);
        assert_eq!(config.device.kind, DeviceKind::Adb);
        assert!(!config.logging.debug);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("STORY_BRIDGE_PORT", "7100"),
                ("STORY_BRIDGE_CHANGE_TIMEOUT_MS", "5000"),
                ("STORY_BRIDGE_ROUTE_TIMEOUT_MS", "1500"),
                ("STORY_BRIDGE_DEBUG", "true"),
                ("STORY_BRIDGE_DEVICE", "host"),
            ]))
            .unwrap();

        assert_eq!(config.channel.port, 7100);
        assert_eq!(config.channel.change_timeout_ms, 5000);
        assert_eq!(config.channel.route_timeout_ms, 1500);
        assert!(config.logging.debug);
        assert_eq!(config.device.kind, DeviceKind::Host);
    }

    #[test]
    fn test_invalid_env_value_is_config_error() {
        let mut config = Config::default();
        let err = config
            .apply_env(env(&[("STORY_BRIDGE_PORT", "seventy")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let mut config = Config::default();
        assert!(config
            .apply_env(env(&[("STORY_BRIDGE_POLL_INTERVAL_MS", "0")]))
            .is_err());
    }

    #[test]
    fn test_from_file_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[channel]\nport = 7200\n\n[device]\nkind = \"adb\"\napp_package = \"com.example.storybook\"\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.channel.port, 7200);
        assert_eq!(config.channel.change_timeout_ms, 20_000);
        assert_eq!(
            config.device.app_package.as_deref(),
            Some("com.example.storybook")
        );
    }
}
