//! Tile-partitioned voxel storage: voxel records, per-tile stores with
//! idempotent attach/detach, the fixed-shape grid of tiles, and JSON snapshots.

pub mod grid_store;
pub mod snapshot;
pub mod tile_store;
pub mod voxel;

pub use grid_store::GridStore;
pub use snapshot::{SnapshotError, TileSnapshotDir};
pub use tile_store::{TileStore, attach_if_absent, detach_if_present};
pub use voxel::{Color, PositionKey, Voxel};
