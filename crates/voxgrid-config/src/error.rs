//! Configuration error types.

/// Errors that can occur when loading, saving, or parsing configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read `config.ron` from disk.
    #[error("failed to read config: {0}")]
    ReadError(#[source] std::io::Error),

    /// Failed to write `config.ron` to disk.
    #[error("failed to write config: {0}")]
    WriteError(#[source] std::io::Error),

    /// The file is not valid RON for [`Config`](crate::Config).
    #[error("failed to parse config: {0}")]
    ParseError(#[source] ron::error::SpannedError),

    /// Failed to serialize config to RON.
    #[error("failed to serialize config: {0}")]
    SerializeError(#[source] ron::Error),

    /// The world dimensions do not describe a valid tile grid.
    #[error("invalid world dimensions: {0}")]
    InvalidWorld(#[from] voxgrid_coords::TileConfigError),

    /// `voxel_size` is not a positive number.
    #[error("invalid voxel size {0}")]
    InvalidVoxelSize(f64),

    /// `server_address:server_port` is not a socket address.
    #[error("invalid server address {0:?}")]
    InvalidAddress(String),
}
