//! Server configuration: RON file with sensible defaults, CLI overrides.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Errors that can occur when loading, saving, or parsing configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the config file from disk.
    #[error("failed to read config: {0}")]
    Read(#[source] std::io::Error),

    /// Failed to write the config file to disk.
    #[error("failed to write config: {0}")]
    Write(#[source] std::io::Error),

    /// Failed to parse RON content.
    #[error("failed to parse config: {0}")]
    Parse(#[source] ron::error::SpannedError),

    /// Failed to serialize config to RON.
    #[error("failed to serialize config: {0}")]
    Serialize(#[source] ron::Error),

    /// The configured bind address is not a valid socket address.
    #[error("invalid bind address {addr:?}: {source}")]
    BindAddr {
        addr: String,
        source: std::net::AddrParseError,
    },
}

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener settings.
    pub network: NetworkConfig,
    /// Simulation settings.
    pub simulation: SimulationConfig,
    /// Autosave settings.
    pub snapshot: SnapshotConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind the listener to.
    pub bind_address: String,
    /// Listener port.
    pub port: u16,
    /// Maximum concurrent connections.
    pub max_connections: usize,
}

/// Simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    /// Fixed tick rate in Hz.
    pub tick_rate: u32,
    /// Maximum interaction distance in millimetres.
    pub reach_mm: i64,
    /// Render distance granted to clients, in chunks.
    pub render_distance: i32,
    /// Radius (in chunks, Chebyshev) of the world loaded at startup.
    pub world_radius_chunks: i32,
    /// Player spawn position in millimetres.
    pub spawn_pos_mm: [i64; 3],
}

/// Autosave configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Whether periodic snapshots are taken at all.
    pub enabled: bool,
    /// Directory snapshot files are written to.
    pub dir: PathBuf,
    /// Ticks between snapshots.
    pub interval_ticks: u64,
    /// Maximum number of snapshot files to retain.
    pub max_retained: usize,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log filter override (e.g. "debug", "info,strata_net=trace").
    pub log_level: String,
    /// Directory for JSON log files; `None` disables file logging.
    pub log_dir: Option<PathBuf>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 7777,
            max_connections: 256,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            reach_mm: 7_500,
            render_distance: 8,
            world_radius_chunks: 4,
            // One metre above the terrain surface at the origin.
            spawn_pos_mm: [500, 65_000, 500],
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("./snapshots"),
            // Five minutes at the default tick rate.
            interval_ticks: 18_000,
            max_retained: 24,
        }
    }
}

// --- Load / Save ---

impl ServerConfig {
    /// Load config from the given directory, or create a default config
    /// file there.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("server.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::Read)?;
            let config: ServerConfig = ron::from_str(&contents).map_err(ConfigError::Parse)?;
            tracing::info!("loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = ServerConfig::default();
            config.save(config_dir)?;
            tracing::info!("created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `server.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::Write)?;
        let config_path = config_dir.join("server.ron");
        let contents = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(ConfigError::Serialize)?;
        std::fs::write(&config_path, contents).map_err(ConfigError::Write)?;
        Ok(())
    }

    /// The socket address the listener binds to.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.network.bind_address, self.network.port);
        addr.parse().map_err(|source| ConfigError::BindAddr {
            addr,
            source,
        })
    }
}

// --- CLI ---

/// Strata server command-line arguments.
///
/// CLI values override settings loaded from `server.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "strata-server", about = "Authoritative voxel world server")]
pub struct CliArgs {
    /// Bind address.
    #[arg(long)]
    pub bind: Option<String>,

    /// Listener port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Maximum concurrent connections.
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Tick rate in Hz.
    #[arg(long)]
    pub tick_rate: Option<u32>,

    /// Render distance in chunks.
    #[arg(long)]
    pub render_distance: Option<i32>,

    /// Snapshot directory.
    #[arg(long)]
    pub snapshot_dir: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl ServerConfig {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref bind) = args.bind {
            self.network.bind_address = bind.clone();
        }
        if let Some(port) = args.port {
            self.network.port = port;
        }
        if let Some(max) = args.max_connections {
            self.network.max_connections = max;
        }
        if let Some(rate) = args.tick_rate {
            self.simulation.tick_rate = rate;
        }
        if let Some(rd) = args.render_distance {
            self.simulation.render_distance = rd;
        }
        if let Some(ref dir) = args.snapshot_dir {
            self.snapshot.dir = dir.clone();
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.network.port, 7777);
        assert_eq!(config.simulation.tick_rate, 60);
        assert_eq!(config.simulation.reach_mm, 7_500);
        assert!(config.snapshot.enabled);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServerConfig::default();
        config.network.port = 9001;
        config.simulation.render_distance = 12;
        config.save(dir.path()).unwrap();

        let loaded = ServerConfig::load_or_create(dir.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::load_or_create(dir.path()).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert!(dir.path().join("server.ron").exists());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("server.ron"),
            "(network: (port: 4242))",
        )
        .unwrap();
        let config = ServerConfig::load_or_create(dir.path()).unwrap();
        assert_eq!(config.network.port, 4242);
        assert_eq!(config.simulation.tick_rate, 60);
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = ServerConfig::default();
        let args = CliArgs {
            port: Some(9999),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.network.port, 9999);
        assert_eq!(config.debug.log_level, "debug");
    }

    #[test]
    fn test_bind_addr_parses() {
        let config = ServerConfig::default();
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 7777);
    }

    #[test]
    fn test_bad_bind_addr_is_an_error() {
        let mut config = ServerConfig::default();
        config.network.bind_address = "not-an-address".to_string();
        assert!(matches!(
            config.bind_addr(),
            Err(ConfigError::BindAddr { .. })
        ));
    }
}
