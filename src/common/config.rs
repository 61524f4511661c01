//! Configuration file handling

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::paths::config_path;
use super::{Error, Result};

/// Environment variable overriding `engine.ide_key`
pub const ENV_IDE_KEY: &str = "DBGP_IDEKEY";
/// Environment variable overriding `engine.session`
pub const ENV_SESSION: &str = "DBGP_COOKIE";

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Engine identity and connection settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Initial property serialization limits
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Command and response buffer sizes
    #[serde(default)]
    pub buffers: BufferConfig,

    /// Settings for the `dbgp listen` client
    #[serde(default)]
    pub client: ClientConfig,
}

/// Engine settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Debugger client host to connect to
    #[serde(default = "default_host")]
    pub host: String,

    /// Debugger client port
    #[serde(default = "default_port")]
    pub port: u16,

    /// `appid` reported in the init packet
    #[serde(default = "default_app_id")]
    pub app_id: String,

    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default = "default_language_version")]
    pub language_version: String,

    #[serde(default)]
    pub ide_key: String,

    /// Session cookie echoed in the init packet
    #[serde(default)]
    pub session: String,

    /// How often a running script checks for commands such as `break`
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            app_id: default_app_id(),
            language: default_language(),
            language_version: default_language_version(),
            ide_key: String::new(),
            session: String::new(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    9000
}
fn default_app_id() -> String {
    "dbgp-engine".to_string()
}
fn default_language() -> String {
    "AutoHotkey".to_string()
}
fn default_language_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
fn default_poll_interval() -> u64 {
    100
}

/// Initial values of the feature-negotiated limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_data")]
    pub max_data: usize,

    #[serde(default = "default_max_children")]
    pub max_children: usize,

    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_data: default_max_data(),
            max_children: default_max_children(),
            max_depth: default_max_depth(),
        }
    }
}

fn default_max_data() -> usize {
    1024
}
fn default_max_children() -> usize {
    1000
}
fn default_max_depth() -> usize {
    1
}

/// Buffer sizing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BufferConfig {
    /// Starting capacity in bytes
    #[serde(default = "default_initial_size")]
    pub initial_size: usize,

    /// Hard ceiling per buffer, in megabytes
    #[serde(default = "default_max_size")]
    pub max_size_mb: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            initial_size: default_initial_size(),
            max_size_mb: default_max_size(),
        }
    }
}

fn default_initial_size() -> usize {
    2048
}
fn default_max_size() -> usize {
    64
}

impl BufferConfig {
    pub fn max_size_bytes(&self) -> usize {
        self.max_size_mb.saturating_mul(1024 * 1024)
    }
}

/// Listener settings for the CLI
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    #[serde(default = "default_host")]
    pub listen_host: String,

    #[serde(default = "default_port")]
    pub listen_port: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            listen_host: default_host(),
            listen_port: default_port(),
        }
    }
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist. Environment
    /// overrides are applied either way.
    pub fn load() -> Result<Self> {
        let mut config = match config_path() {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Apply `DBGP_IDEKEY` / `DBGP_COOKIE` style overrides
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup(ENV_IDE_KEY) {
            self.engine.ide_key = key;
        }
        if let Some(cookie) = lookup(ENV_SESSION) {
            self.engine.session = cookie;
        }
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.engine.port, 9000);
        assert_eq!(config.engine.poll_interval_ms, 100);
        assert_eq!(config.limits.max_data, 1024);
        assert_eq!(config.limits.max_children, 1000);
        assert_eq!(config.limits.max_depth, 1);
        assert_eq!(config.buffers.initial_size, 2048);
        assert_eq!(config.buffers.max_size_bytes(), 64 * 1024 * 1024);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::parse(
            r#"
            [engine]
            port = 9005
            ide_key = "vim"

            [limits]
            max_depth = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.port, 9005);
        assert_eq!(config.engine.host, "127.0.0.1");
        assert_eq!(config.engine.ide_key, "vim");
        assert_eq!(config.limits.max_depth, 3);
        assert_eq!(config.limits.max_data, 1024);
    }

    #[test]
    fn test_invalid_toml() {
        let err = Config::parse("[engine\nport = ").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(|name| match name {
            ENV_IDE_KEY => Some("emacs".to_string()),
            ENV_SESSION => Some("cookie-1".to_string()),
            _ => None,
        });
        assert_eq!(config.engine.ide_key, "emacs");
        assert_eq!(config.engine.session, "cookie-1");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[client]\nlisten_port = 9100\n").unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.client.listen_port, 9100);

        let missing = Config::load_from(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, Error::FileRead { .. }));
    }

    #[test]
    fn test_round_trips_through_toml() {
        let text = Config::default().to_toml().unwrap();
        let parsed = Config::parse(&text).unwrap();
        assert_eq!(parsed.engine.port, 9000);
    }
}
