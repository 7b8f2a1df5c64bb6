use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub listen: String,
    pub server_name: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub exposure: ExposureConfig,
}

/// Settings for the two external collaborators: the static-asset server
/// and the tunnel CLI. Both are opaque black boxes whose only contract is
/// text output, so each gets a readiness text pattern and a tick budget.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ExposureConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub static_server: StaticServerConfig,
    #[serde(default)]
    pub tunnel: TunnelConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StaticServerConfig {
    /// Program and arguments; the extracted asset directory is appended.
    pub command: Vec<String>,
    /// Local port the static server listens on, handed to the tunnel.
    pub port: u16,
    /// Substring in the captured output meaning "finished initializing".
    pub ready_marker: String,
    #[serde(default = "default_static_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_static_max_ticks")]
    pub max_ticks: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TunnelConfig {
    /// Program and arguments; the static server port is appended.
    pub command: Vec<String>,
    /// Prefix of the output line carrying the public URL.
    pub url_prefix: String,
    #[serde(default = "default_tunnel_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_tunnel_max_ticks")]
    pub max_ticks: u32,
}

impl Default for StaticServerConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "npx".to_string(),
                "serve".to_string(),
                "--no-clipboard".to_string(),
                "-l".to_string(),
                "3030".to_string(),
            ],
            port: 3030,
            ready_marker: "Accepting connections".to_string(),
            tick_secs: default_static_tick_secs(),
            max_ticks: default_static_max_ticks(),
        }
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "npx".to_string(),
                "localtunnel".to_string(),
                "--port".to_string(),
            ],
            url_prefix: "your url is: ".to_string(),
            tick_secs: default_tunnel_tick_secs(),
            max_ticks: default_tunnel_max_ticks(),
        }
    }
}

/// Read-only object clients fetch once before they start polling.
#[derive(Debug, Clone, Serialize)]
pub struct AgentConfig {
    pub server_name: String,
    pub poll_interval_seconds: u64,
}

impl From<&Config> for AgentConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            server_name: cfg.server_name.clone(),
            poll_interval_seconds: cfg.poll_interval_secs,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("config validation failed: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation("listen is required".to_string()));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "listen must be a valid host:port address".to_string(),
            ));
        }
        if self.server_name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "server_name must not be empty".to_string(),
            ));
        }
        if self.poll_interval_secs < 1 {
            return Err(ConfigError::Validation(
                "poll_interval_secs must be >= 1".to_string(),
            ));
        }

        if self.exposure.enabled {
            validate_static_server(&self.exposure.static_server)?;
            validate_tunnel(&self.exposure.tunnel)?;
        }

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_static_server(cfg: &StaticServerConfig) -> Result<(), ConfigError> {
    if cfg.command.is_empty() {
        return Err(ConfigError::Validation(
            "exposure.static_server.command must not be empty".to_string(),
        ));
    }
    if cfg.port == 0 {
        return Err(ConfigError::Validation(
            "exposure.static_server.port must be in 1..65535".to_string(),
        ));
    }
    if cfg.ready_marker.is_empty() {
        return Err(ConfigError::Validation(
            "exposure.static_server.ready_marker must not be empty".to_string(),
        ));
    }
    if cfg.tick_secs < 1 || cfg.max_ticks < 1 {
        return Err(ConfigError::Validation(
            "exposure.static_server tick_secs and max_ticks must be >= 1".to_string(),
        ));
    }
    Ok(())
}

fn validate_tunnel(cfg: &TunnelConfig) -> Result<(), ConfigError> {
    if cfg.command.is_empty() {
        return Err(ConfigError::Validation(
            "exposure.tunnel.command must not be empty".to_string(),
        ));
    }
    if cfg.url_prefix.is_empty() {
        return Err(ConfigError::Validation(
            "exposure.tunnel.url_prefix must not be empty".to_string(),
        ));
    }
    if cfg.tick_secs < 1 || cfg.max_ticks < 1 {
        return Err(ConfigError::Validation(
            "exposure.tunnel tick_secs and max_ticks must be >= 1".to_string(),
        ));
    }
    Ok(())
}

const fn default_poll_interval_secs() -> u64 {
    3
}

const fn default_static_tick_secs() -> u64 {
    5
}

const fn default_static_max_ticks() -> u32 {
    12
}

const fn default_tunnel_tick_secs() -> u64 {
    2
}

const fn default_tunnel_max_ticks() -> u32 {
    30
}
