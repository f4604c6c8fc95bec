//! Headless editor for a shared voxel grid.
//!
//! ```text
//! voxgrid attach 1 1 1 --color '#ff0000'
//! voxgrid detach 1 1 1
//! voxgrid watch
//! voxgrid dump --tile 2_1 --pretty
//! voxgrid grid
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use glam::DVec3;
use tokio::sync::{mpsc, watch};
use voxgrid_config::{CliArgs, Config, ConfigError};
use voxgrid_coords::{TileEngine, TileKey, VoxelLattice};
use voxgrid_net::{Editor, EditorConfig, EditorError, FrameConfig, LocalIntent, ReconnectConfig};
use voxgrid_sync::{NullPresenter, Presenter, World};
use voxgrid_voxel::{Color, PositionKey, SnapshotError, Voxel, snapshot};

#[derive(Parser, Debug)]
#[command(name = "voxgrid", about = "Headless editor for a shared voxel grid")]
struct Cli {
    #[command(flatten)]
    common: CliArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Attach a voxel in the cell containing X Y Z.
    #[command(allow_negative_numbers = true)]
    Attach {
        x: f64,
        y: f64,
        z: f64,
        /// Decimal, `#rrggbb` or `0xrrggbb`.
        #[arg(long, default_value = "16777215", value_parser = parse_color)]
        color: Color,
    },
    /// Detach the voxel in the cell containing X Y Z.
    #[command(allow_negative_numbers = true)]
    Detach { x: f64, y: f64, z: f64 },
    /// Log every change until Ctrl-C.
    Watch,
    /// Print tile snapshots after syncing.
    Dump {
        /// Only this tile.
        #[arg(long)]
        tile: Option<TileKey>,
        #[arg(long)]
        pretty: bool,
    },
    /// Print the tile grid in fetch order.
    Grid,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("could not determine a config directory; pass --config")]
    NoConfigDir,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Editor(#[from] EditorError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("tile {0} is not part of the map")]
    UnknownTile(TileKey),

    #[error("failed to install Ctrl-C handler: {0}")]
    Signal(#[source] std::io::Error),
}

fn parse_color(text: &str) -> Result<Color, String> {
    let text = text.trim();
    let rgb = match text.strip_prefix('#').or_else(|| text.strip_prefix("0x")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse::<u32>(),
    }
    .map_err(|e| format!("invalid color {text:?}: {e}"))?;
    Color::new(rgb).ok_or_else(|| format!("color {text} exceeds 0xFFFFFF"))
}

/// Logs committed changes.
struct LogPresenter;

impl Presenter for LogPresenter {
    fn voxel_attached(&mut self, key: &PositionKey, voxel: &Voxel) {
        tracing::info!("+ {key} {}", voxel.color);
    }

    fn voxel_detached(&mut self, key: &PositionKey) {
        tracing::info!("- {key}");
    }
}

fn config_dir(args: &CliArgs) -> Result<PathBuf, CliError> {
    match &args.config {
        Some(dir) => Ok(dir.clone()),
        None => dirs::config_dir()
            .map(|dir| dir.join("voxgrid"))
            .ok_or(CliError::NoConfigDir),
    }
}

fn editor_config(config: &Config) -> Result<EditorConfig, ConfigError> {
    Ok(EditorConfig {
        server_addr: config.network.socket_addr()?,
        frame: FrameConfig {
            max_payload_size: config.network.max_frame_bytes,
        },
        reconnect: ReconnectConfig {
            initial_delay: config.network.reconnect_initial_delay(),
            max_delay: config.network.reconnect_max_delay(),
            max_attempts: config.network.reconnect_max_attempts,
            ..Default::default()
        },
    })
}

/// One line per tile: key, center and bounding box.
fn grid_lines(engine: &TileEngine) -> Vec<String> {
    engine
        .tile_grid()
        .map(|index| {
            let (x, z) = engine.tile_to_point(index);
            let bbox = engine.tile_to_bbox(index);
            format!(
                "{}\tcenter ({x}, {z})\tbbox {:?}",
                engine.tile_to_key(index),
                bbox.to_array()
            )
        })
        .collect()
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            eprintln!("voxgrid: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config_dir = config_dir(&cli.common)?;
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&cli.common);
    voxgrid_log::init_logging(Some(&config_dir.join("logs")), cfg!(debug_assertions), Some(&config));

    let engine = config.world.tile_engine()?;
    let lattice = config.world.lattice()?;

    match cli.command {
        Command::Grid => {
            for line in grid_lines(&engine) {
                println!("{line}");
            }
        }
        Command::Attach { x, y, z, color } => {
            let mut editor = connect(&config, engine, &mut NullPresenter).await?;
            let position = snap(&lattice, x, y, z);
            let sent = editor
                .submit(LocalIntent::Attach { position, color }, &mut LogPresenter)
                .await?;
            report(sent.is_some(), "attached", position);
            editor.disconnect();
        }
        Command::Detach { x, y, z } => {
            let mut editor = connect(&config, engine, &mut NullPresenter).await?;
            let position = snap(&lattice, x, y, z);
            let sent = editor
                .submit(LocalIntent::Detach { position }, &mut LogPresenter)
                .await?;
            report(sent.is_some(), "detached", position);
            editor.disconnect();
        }
        Command::Watch => {
            let mut presenter = LogPresenter;
            let mut editor = connect(&config, engine, &mut presenter).await?;
            tracing::info!("Watching {} voxels", editor.world().grid().voxel_count());

            let (stop_tx, mut stop_rx) = watch::channel(false);
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("{}", CliError::Signal(e));
                }
                let _ = stop_tx.send(true);
            });
            // Nothing submits from the terminal; the sender keeps the channel
            // open until Ctrl-C.
            let (_intent_tx, mut intents) = mpsc::channel(1);
            editor.run(&mut intents, &mut presenter, &mut stop_rx).await?;
        }
        Command::Dump { tile, pretty } => {
            let mut editor = connect(&config, engine, &mut NullPresenter).await?;
            let world = editor.world();
            let tiles: Vec<TileKey> = match tile {
                Some(key) if world.tile(&key).is_some() => vec![key],
                Some(key) => return Err(CliError::UnknownTile(key)),
                None => engine.tile_grid().map(TileKey::from_index).collect(),
            };
            for key in tiles {
                if let Some(store) = world.tile(&key) {
                    println!("{key}\t{}", snapshot::serialize(store, pretty)?);
                }
            }
            editor.disconnect();
        }
    }
    Ok(())
}

/// Builds an editor for `engine` and runs its initial sync.
async fn connect<P: Presenter + ?Sized>(
    config: &Config,
    engine: TileEngine,
    presenter: &mut P,
) -> Result<Editor, CliError> {
    let mut editor = Editor::new(editor_config(config)?, World::new(engine));
    editor.connect(presenter).await?;
    Ok(editor)
}

fn snap(lattice: &VoxelLattice, x: f64, y: f64, z: f64) -> DVec3 {
    lattice.snap(DVec3::new(x, y, z))
}

fn report(changed: bool, verb: &str, position: DVec3) {
    let key = PositionKey::from_position(position);
    if changed {
        println!("{verb} {key}");
    } else {
        println!("unchanged {key}");
    }
}
