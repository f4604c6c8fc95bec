//! Fixed-shape owner of every tile's [`TileStore`], keyed by [`TileKey`].
//!
//! A [`GridStore`] is created fully populated from a [`TileEngine`] and never
//! gains or loses tiles afterwards; only the voxels inside tiles change.

use rustc_hash::FxHashMap;
use voxgrid_coords::{TileEngine, TileKey};

use crate::tile_store::TileStore;

/// One [`TileStore`] per tile of the map.
#[derive(Debug, Clone, PartialEq)]
pub struct GridStore {
    tiles: FxHashMap<TileKey, TileStore>,
}

impl GridStore {
    /// Creates an empty tile store for every tile of `engine`'s map.
    pub fn new(engine: &TileEngine) -> Self {
        let tiles = engine
            .tile_grid()
            .map(|index| (engine.tile_to_key(index), TileStore::new()))
            .collect();
        Self { tiles }
    }

    /// The store of a tile of this grid.
    ///
    /// # Panics
    ///
    /// Panics if `key` is not one of the grid's tiles. Keys derived through the
    /// engine for in-map points are always present; use
    /// [`try_get`](Self::try_get) for keys that come from outside.
    pub fn get(&self, key: &TileKey) -> &TileStore {
        self.tiles
            .get(key)
            .unwrap_or_else(|| panic!("tile {key} is not part of the grid"))
    }

    /// Mutable access to a tile of this grid.
    ///
    /// # Panics
    ///
    /// Same contract as [`get`](Self::get).
    pub fn get_mut(&mut self, key: &TileKey) -> &mut TileStore {
        self.tiles
            .get_mut(key)
            .unwrap_or_else(|| panic!("tile {key} is not part of the grid"))
    }

    /// Checked lookup for untrusted keys.
    pub fn try_get(&self, key: &TileKey) -> Option<&TileStore> {
        self.tiles.get(key)
    }

    pub fn contains_tile(&self, key: &TileKey) -> bool {
        self.tiles.contains_key(key)
    }

    /// Number of tiles; constant for the grid's lifetime.
    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// Total number of voxels across all tiles.
    pub fn voxel_count(&self) -> usize {
        self.tiles.values().map(TileStore::len).sum()
    }

    /// All `(key, store)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&TileKey, &TileStore)> {
        self.tiles.iter()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
