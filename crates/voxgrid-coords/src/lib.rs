//! Tile coordinate math: world points to tile indices, tile keys, bounding boxes
//! and the fixed row-major tile grid.
//!
//! The world map is a square of side `map_size` centred on the origin in the XZ
//! plane, partitioned into `total_tiles × total_tiles` square tiles of side
//! `tile_size`. Tiles are addressed by integer indices `(u, v)`:
//!
//! - `u` grows with world `x`,
//! - `v` grows with world **`-z`** (the z-axis is inverted so the grid reads
//!   top-down, row-major).
//!
//! ```rust
//! use voxgrid_coords::{TileEngine, TileIndex};
//!
//! let engine = TileEngine::new(16.0, 4.0).unwrap();
//! assert_eq!(engine.point_to_tile(0.0, 0.0), TileIndex::new(2, 2));
//! assert_eq!(engine.tile_to_point(TileIndex::new(0, 0)), (-6.0, 6.0));
//! ```

mod engine;
mod lattice;
mod tile;

pub use engine::{TileConfigError, TileEngine, TileGrid};
pub use lattice::VoxelLattice;
pub use tile::{TileBBox, TileIndex, TileKey, TileKeyError};
