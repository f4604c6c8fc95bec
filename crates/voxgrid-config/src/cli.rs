//! Command-line overrides shared by the voxgrid binaries.

use std::path::PathBuf;

use clap::Args;

use crate::Config;

/// Options every voxgrid binary accepts. Flatten into a binary's own parser.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Args, Debug, Default, Clone)]
pub struct CliArgs {
    /// Server address.
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// Server port.
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Side of the square map, in world units.
    #[arg(long, global = true)]
    pub map_size: Option<f64>,

    /// Side of one tile, in world units.
    #[arg(long, global = true)]
    pub tile_size: Option<f64>,

    /// Directory of tile snapshot files.
    #[arg(long, global = true)]
    pub tiles_dir: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref addr) = args.server {
            self.network.server_address = addr.clone();
        }
        if let Some(port) = args.port {
            self.network.server_port = port;
        }
        if let Some(size) = args.map_size {
            self.world.map_size = size;
        }
        if let Some(size) = args.tile_size {
            self.world.tile_size = size;
        }
        if let Some(ref dir) = args.tiles_dir {
            self.storage.tiles_dir = dir.clone();
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        common: CliArgs,
    }

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            server: Some("192.168.1.1".to_string()),
            port: None,
            map_size: Some(64.0),
            tile_size: None,
            tiles_dir: None,
            log_level: None,
            config: None,
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.network.server_address, "192.168.1.1");
        assert_eq!(config.world.map_size, 64.0);
        // Non-overridden fields retain defaults
        assert_eq!(config.world.tile_size, 8.0);
        assert_eq!(config.network.server_port, 8080);
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_cli_parses_flags() {
        let cli = TestCli::try_parse_from([
            "voxgrid",
            "--port",
            "9000",
            "--tiles-dir",
            "/tmp/tiles",
            "--log-level",
            "debug",
        ])
        .unwrap();
        let mut config = Config::default();
        config.apply_cli_overrides(&cli.common);
        assert_eq!(config.network.server_port, 9000);
        assert_eq!(config.storage.tiles_dir, PathBuf::from("/tmp/tiles"));
        assert_eq!(config.debug.log_level, "debug");
    }
}
