//! Coordinating server for a shared voxel grid.
//!
//! Loads every tile snapshot from the configured tiles directory, serves
//! clients until Ctrl-C, then writes every tile back.
//!
//! Run with `cargo run -p voxgrid-server -- --port 9000 --tiles-dir ./tiles`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use voxgrid_config::{CliArgs, Config, ConfigError};
use voxgrid_net::{CoordinatorServer, FrameConfig, ServerConfig, SnapshotSink};
use voxgrid_sync::SharedGrid;
use voxgrid_voxel::{GridStore, SnapshotError, TileSnapshotDir};

/// Coordinating server command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "voxgrid-server", about = "Coordinating server for a shared voxel grid")]
struct ServerArgs {
    #[command(flatten)]
    common: CliArgs,

    /// Address to listen on (defaults to the configured server address and port).
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Only write snapshots at shutdown.
    #[arg(long)]
    no_save_on_change: bool,
}

#[derive(Debug, thiserror::Error)]
enum ServerError {
    #[error("could not determine a config directory; pass --config")]
    NoConfigDir,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn config_dir(args: &CliArgs) -> Result<PathBuf, ServerError> {
    match &args.config {
        Some(dir) => Ok(dir.clone()),
        None => dirs::config_dir()
            .map(|dir| dir.join("voxgrid"))
            .ok_or(ServerError::NoConfigDir),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = ServerArgs::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            eprintln!("voxgrid-server: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: ServerArgs) -> Result<(), ServerError> {
    let config_dir = config_dir(&args.common)?;
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args.common);
    if args.no_save_on_change {
        config.storage.save_on_change = false;
    }

    voxgrid_log::init_logging(Some(&config_dir.join("logs")), cfg!(debug_assertions), Some(&config));

    let engine = config.world.tile_engine()?;
    tracing::info!(
        "Map {} / tile {}: {} tiles",
        engine.map_size(),
        engine.tile_size(),
        engine.tile_grid().len()
    );

    let snapshots = TileSnapshotDir::new(&config.storage.tiles_dir);
    let mut grid = GridStore::new(&engine);
    snapshots.import_grid(&engine, &mut grid)?;
    let shared = Arc::new(SharedGrid::from_grid(engine, grid));

    let server_config = ServerConfig {
        bind_addr: match args.bind {
            Some(addr) => addr,
            None => config.network.socket_addr()?,
        },
        max_connections: config.network.max_connections,
        frame: FrameConfig {
            max_payload_size: config.network.max_frame_bytes,
        },
    };
    let mut server = CoordinatorServer::new(server_config, Arc::clone(&shared));
    if config.storage.save_on_change {
        server = server.with_snapshots(SnapshotSink {
            dir: snapshots.clone(),
            pretty: config.storage.pretty_snapshots,
        });
    }

    tokio::select! {
        result = server.run() => result?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("Interrupted");
        }
    }
    server.shutdown();

    let written = snapshots.export_grid(&shared.to_grid(), config.storage.pretty_snapshots)?;
    tracing::info!("Saved {written} tiles ({} voxels)", shared.voxel_count());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = ServerArgs::try_parse_from([
            "voxgrid-server",
            "--bind",
            "0.0.0.0:9000",
            "--map-size",
            "64",
            "--no-save-on-change",
        ])
        .unwrap();
        assert_eq!(args.bind, Some("0.0.0.0:9000".parse().unwrap()));
        assert_eq!(args.common.map_size, Some(64.0));
        assert!(args.no_save_on_change);
    }

    #[test]
    fn test_explicit_config_dir_wins() {
        let args = CliArgs {
            config: Some(PathBuf::from("/etc/voxgrid")),
            ..Default::default()
        };
        assert_eq!(config_dir(&args).unwrap(), PathBuf::from("/etc/voxgrid"));
    }
}
