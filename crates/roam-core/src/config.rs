//! Configuration system for Roam.
//!
//! Resolution order: environment variables → config file → defaults.
//! Command-line flags override the loaded config in the binaries.
//!
//! Config file location:
//!   1. $ROAM_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/roam/config.toml
//!   3. ~/.config/roam/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoamConfig {
    pub network: NetworkConfig,
    pub server: ServerConfig,
    pub mobility: MobilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// TCP port the server listens on.
    pub port: u16,
    /// Bind attempts before giving up.
    pub bind_retries: u32,
    /// Seconds between bind attempts.
    pub bind_retry_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Protocol variant served: "uamp" or "mvisp".
    pub protocol: String,
    /// Simulation worker threads per connection. 0 = available cores.
    pub worker_threads: u32,
    /// Detach from the terminal after binding.
    pub daemon: bool,
    /// Advertise 3D coordinates in the handshake.
    pub three_d: bool,
    /// Advertise agent appearance/disappearance in the handshake.
    pub appearance: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MobilityConfig {
    /// Map extent in metres.
    pub map_width_m: f64,
    pub map_height_m: f64,
    /// Vertical extent, used only when 3D is advertised.
    pub map_depth_m: f64,
    /// Uniform speed range in metres per second.
    pub speed_min_mps: f64,
    pub speed_max_mps: f64,
    /// Uniform pause range at each destination, in seconds.
    pub pause_min_s: f64,
    pub pause_max_s: f64,
    /// Milliseconds between emitted updates.
    pub step_ms: u32,
    /// MVISP only: the published simulation's size and length.
    pub agents: u32,
    pub duration_s: f64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for RoamConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            server: ServerConfig::default(),
            mobility: MobilityConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: 4211,
            bind_retries: 10,
            bind_retry_secs: 3,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            protocol: "uamp".to_string(),
            worker_threads: 0,
            daemon: false,
            three_d: false,
            appearance: false,
        }
    }
}

impl Default for MobilityConfig {
    fn default() -> Self {
        Self {
            map_width_m: 1000.0,
            map_height_m: 1000.0,
            map_depth_m: 50.0,
            speed_min_mps: 0.5,
            speed_max_mps: 2.0,
            pause_min_s: 0.0,
            pause_max_s: 60.0,
            step_ms: 500,
            agents: 25,
            duration_s: 300.0,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_or_tmp().join(".config"))
        .join("roam")
}

fn home_or_tmp() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl RoamConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::file_path())
    }

    /// Load from an explicit path, still applying env overrides.
    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            RoamConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("ROAM_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&RoamConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text)
                .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply ROAM_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("ROAM_NETWORK__PORT") {
            if let Ok(p) = v.parse() {
                self.network.port = p;
            }
        }
        if let Ok(v) = std::env::var("ROAM_SERVER__PROTOCOL") {
            self.server.protocol = v;
        }
        if let Ok(v) = std::env::var("ROAM_SERVER__WORKER_THREADS") {
            if let Ok(n) = v.parse() {
                self.server.worker_threads = n;
            }
        }
        if let Ok(v) = std::env::var("ROAM_SERVER__THREE_D") {
            self.server.three_d = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("ROAM_SERVER__APPEARANCE") {
            self.server.appearance = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("ROAM_MOBILITY__AGENTS") {
            if let Ok(n) = v.parse() {
                self.mobility.agents = n;
            }
        }
        if let Ok(v) = std::env::var("ROAM_MOBILITY__DURATION_S") {
            if let Ok(n) = v.parse() {
                self.mobility.duration_s = n;
            }
        }
    }
}
