//! The [`TileEngine`]: stateless conversions between world points and tiles.

use std::iter::FusedIterator;

use crate::tile::{TileBBox, TileIndex, TileKey};

/// Invalid map/tile dimensions.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TileConfigError {
    /// A size is zero, negative, NaN or infinite.
    #[error("{name} must be a positive finite number, got {value}")]
    NotPositive {
        /// Which parameter was rejected.
        name: &'static str,
        /// The rejected value.
        value: f64,
    },
    /// `map_size` is not a whole number of tiles.
    #[error("map_size {map_size} must be divisible by tile_size {tile_size}")]
    NotDivisible {
        /// Configured map extent.
        map_size: f64,
        /// Configured tile extent.
        tile_size: f64,
    },
}

/// Maps world points to tile indices and back for one square map.
///
/// Pure and `Copy`; every method is a closed-form computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileEngine {
    map_size: f64,
    tile_size: f64,
    total_tiles: i64,
}

impl TileEngine {
    /// Creates an engine for a map of side `map_size` split into tiles of side
    /// `tile_size`.
    ///
    /// # Errors
    ///
    /// Fails unless both sizes are positive and finite and `map_size` is an
    /// exact multiple of `tile_size`.
    pub fn new(map_size: f64, tile_size: f64) -> Result<Self, TileConfigError> {
        for (name, value) in [("map_size", map_size), ("tile_size", tile_size)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(TileConfigError::NotPositive { name, value });
            }
        }

        let ratio = map_size / tile_size;
        if ratio.fract() != 0.0 {
            return Err(TileConfigError::NotDivisible {
                map_size,
                tile_size,
            });
        }

        Ok(Self {
            map_size,
            tile_size,
            total_tiles: ratio as i64,
        })
    }

    pub fn map_size(&self) -> f64 {
        self.map_size
    }

    pub fn tile_size(&self) -> f64 {
        self.tile_size
    }

    /// Number of tiles along one axis.
    pub fn total_tiles(&self) -> i64 {
        self.total_tiles
    }

    fn half_map(&self) -> f64 {
        self.map_size / 2.0
    }

    /// Tile containing the world point `(x, z)`.
    ///
    /// The result is unbounded: points outside the map yield indices outside
    /// `[0, total_tiles - 1]`. Use [`clamp`](Self::clamp) or
    /// [`contains`](Self::contains) where an addressable tile is required.
    pub fn point_to_tile(&self, x: f64, z: f64) -> TileIndex {
        let u = ((x + self.half_map()) / self.tile_size).floor();
        // z is inverted: v grows towards -z
        let v = ((-z + self.half_map()) / self.tile_size).floor();
        TileIndex::new(u as i64, v as i64)
    }

    /// World `(x, z)` of the **center** of a tile.
    ///
    /// Only tile centers round-trip through [`point_to_tile`](Self::point_to_tile);
    /// this is not a general inverse.
    pub fn tile_to_point(&self, index: TileIndex) -> (f64, f64) {
        let half_tile = self.tile_size / 2.0;
        let x = index.u as f64 * self.tile_size - self.half_map() + half_tile;
        let z = -(index.v as f64 * self.tile_size - self.half_map() + half_tile);
        (x, z)
    }

    /// Canonical key of a tile.
    pub fn tile_to_key(&self, index: TileIndex) -> TileKey {
        TileKey::from_index(index)
    }

    /// Key of the tile containing `(x, z)`, or `None` outside the map.
    pub fn key_for_point(&self, x: f64, z: f64) -> Option<TileKey> {
        let index = self.point_to_tile(x, z);
        self.contains(index).then(|| TileKey::from_index(index))
    }

    /// Clamps each index independently into `[0, total_tiles - 1]`.
    pub fn clamp(&self, index: TileIndex) -> TileIndex {
        let last = self.total_tiles - 1;
        TileIndex::new(index.u.clamp(0, last), index.v.clamp(0, last))
    }

    /// Whether `index` addresses a tile of this map.
    pub fn contains(&self, index: TileIndex) -> bool {
        (0..self.total_tiles).contains(&index.u) && (0..self.total_tiles).contains(&index.v)
    }

    /// Footprint of a tile. Note `min_z > max_z`, see [`TileBBox`].
    pub fn tile_to_bbox(&self, index: TileIndex) -> TileBBox {
        let min_x = index.u as f64 * self.tile_size - self.half_map();
        let min_z = -(index.v as f64 * self.tile_size - self.half_map());
        TileBBox {
            min_x,
            min_z,
            max_x: min_x + self.tile_size,
            max_z: min_z - self.tile_size,
        }
    }

    /// Every tile of the map in row-major order: `u` outer, `v` inner,
    /// starting at `(0, 0)`.
    ///
    /// The order is part of the sync protocol (it fixes the bulk-load order).
    /// Each call returns a fresh iterator.
    pub fn tile_grid(&self) -> TileGrid {
        TileGrid {
            total_tiles: self.total_tiles,
            next: 0,
        }
    }
}

/// Row-major iterator over all tile indices of a map.
#[derive(Debug, Clone)]
pub struct TileGrid {
    total_tiles: i64,
    next: i64,
}

impl Iterator for TileGrid {
    type Item = TileIndex;

    fn next(&mut self) -> Option<TileIndex> {
        if self.next >= self.total_tiles * self.total_tiles {
            return None;
        }
        let index = TileIndex::new(self.next / self.total_tiles, self.next % self.total_tiles);
        self.next += 1;
        Some(index)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.total_tiles * self.total_tiles - self.next).max(0) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for TileGrid {}

impl FusedIterator for TileGrid {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
