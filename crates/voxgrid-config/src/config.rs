//! Configuration structs with defaults and RON persistence.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use voxgrid_coords::{TileEngine, VoxelLattice};

use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Map geometry.
    pub world: WorldConfig,
    /// Transport settings.
    pub network: NetworkConfig,
    /// Tile snapshot persistence.
    pub storage: StorageConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Map geometry shared by every peer of a world. Peers with different values
/// disagree on tile keys and cannot sync.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorldConfig {
    /// Side of the square map, in world units.
    pub map_size: f64,
    /// Side of one tile; must divide `map_size`.
    pub tile_size: f64,
    /// Side of one voxel, used to snap editor input.
    pub voxel_size: f64,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Server host name or IP.
    pub server_address: String,
    /// Server port.
    pub server_port: u16,
    /// Maximum concurrent client connections (server only).
    pub max_connections: usize,
    /// Maximum size of one framed message in bytes.
    pub max_frame_bytes: u32,
    /// First reconnection delay in milliseconds.
    pub reconnect_initial_ms: u64,
    /// Upper bound on the reconnection delay in milliseconds.
    pub reconnect_max_ms: u64,
    /// Reconnection attempts before giving up.
    pub reconnect_max_attempts: u32,
}

/// Tile snapshot persistence (server only).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one `<tileKey>.json` per tile.
    pub tiles_dir: PathBuf,
    /// Pretty-print snapshot files.
    pub pretty_snapshots: bool,
    /// Rewrite a tile's snapshot after every effective change.
    pub save_on_change: bool,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log filter (e.g., "debug", "info,voxgrid_net=trace").
    pub log_level: String,
}

// --- Default implementations ---

impl Default for WorldConfig {
    fn default() -> Self {
        // 4 voxels of size 2 per tile edge, 4 tiles per map edge.
        Self {
            map_size: 32.0,
            tile_size: 8.0,
            voxel_size: 2.0,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1".to_string(),
            server_port: 8080,
            max_connections: 256,
            max_frame_bytes: 1_048_576,
            reconnect_initial_ms: 500,
            reconnect_max_ms: 30_000,
            reconnect_max_attempts: 20,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            tiles_dir: PathBuf::from("tiles"),
            pretty_snapshots: false,
            save_on_change: true,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

// --- Derived values ---

impl WorldConfig {
    /// Builds the tile engine for these dimensions.
    pub fn tile_engine(&self) -> Result<TileEngine, ConfigError> {
        Ok(TileEngine::new(self.map_size, self.tile_size)?)
    }

    /// Lattice used to snap editor positions onto voxel centers.
    pub fn lattice(&self) -> Result<VoxelLattice, ConfigError> {
        if self.voxel_size.is_finite() && self.voxel_size > 0.0 {
            Ok(VoxelLattice::new(self.voxel_size))
        } else {
            Err(ConfigError::InvalidVoxelSize(self.voxel_size))
        }
    }
}

impl NetworkConfig {
    /// Resolves `server_address:server_port`.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let target = format!("{}:{}", self.server_address, self.server_port);
        target
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or(ConfigError::InvalidAddress(target))
    }

    pub fn reconnect_initial_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Re-read `config.ron`: `Some(new_config)` if it differs from `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join("config.ron");
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }
}
