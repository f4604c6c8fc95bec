//! Server-side authoritative grid shared by all connection tasks.
//!
//! Each tile sits behind its own mutex: at most one writer per tile, distinct
//! tiles proceed in parallel. No operation touches two tiles, so no lock is
//! ever held while taking another.

use std::sync::{Mutex, MutexGuard, PoisonError};

use rustc_hash::FxHashMap;
use voxgrid_coords::{TileEngine, TileKey};
use voxgrid_voxel::{GridStore, TileStore, Voxel, attach_if_absent};

use crate::error::SyncError;
use crate::message::SyncMessage;
use crate::world::{apply_to_tile, canonical, resolve};

/// Fixed-shape map of per-tile locked stores.
#[derive(Debug)]
pub struct SharedGrid {
    engine: TileEngine,
    tiles: FxHashMap<TileKey, Mutex<TileStore>>,
}

impl SharedGrid {
    /// One empty tile per tile of `engine`'s map.
    pub fn new(engine: TileEngine) -> Self {
        Self::from_grid(engine, GridStore::new(&engine))
    }

    /// Takes over the contents of an existing grid (e.g. imported snapshots).
    ///
    /// The tile set always follows `engine`: tiles missing from `grid` start
    /// empty and stores under keys outside the map are dropped.
    pub fn from_grid(engine: TileEngine, grid: GridStore) -> Self {
        let tiles: FxHashMap<_, _> = engine
            .tile_grid()
            .map(|index| {
                let key = engine.tile_to_key(index);
                let store = grid.try_get(&key).map_or_else(TileStore::new, Clone::clone);
                (key, Mutex::new(store))
            })
            .collect();
        for (key, store) in grid.iter() {
            if !tiles.contains_key(key) {
                tracing::warn!("Dropping {} voxels of tile {key}: not part of the map", store.len());
            }
        }
        Self { engine, tiles }
    }

    pub fn engine(&self) -> &TileEngine {
        &self.engine
    }

    fn lock(&self, key: &TileKey) -> Option<MutexGuard<'_, TileStore>> {
        // Tile mutations are single map operations; a poisoned store is intact.
        self.tiles
            .get(key)
            .map(|tile| tile.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Applies an intent from a client.
    ///
    /// Returns the canonical message to broadcast to the other peers when the
    /// store changed, `None` for a no-op.
    pub fn apply(&self, msg: &SyncMessage) -> Result<Option<SyncMessage>, SyncError> {
        self.apply_then(msg, |canonical, _, _| canonical.clone())
    }

    /// Like [`apply`](Self::apply), but on an effective change runs `commit`
    /// with the canonical message, the tile key and the updated store while the
    /// tile is still locked.
    ///
    /// Anything `commit` enqueues is therefore ordered exactly like the
    /// mutations of that tile. `commit` must not block.
    pub fn apply_then<R>(
        &self,
        msg: &SyncMessage,
        commit: impl FnOnce(&SyncMessage, &TileKey, &TileStore) -> R,
    ) -> Result<Option<R>, SyncError> {
        let resolved = resolve(&self.engine, msg.position())?;
        let Some(mut store) = self.lock(&resolved.tile_key) else {
            // resolve() only yields in-map keys, and the grid holds all of them.
            unreachable!("tile {} missing from shared grid", resolved.tile_key);
        };
        let applied = apply_to_tile(&mut store, msg, &resolved);

        if applied.is_effective() {
            tracing::debug!("{} {} applied", msg.kind(), resolved.position_key);
            let canonical = canonical(msg, &resolved);
            Ok(Some(commit(&canonical, &resolved.tile_key, &store)))
        } else {
            tracing::trace!("{} {} was a no-op", msg.kind(), resolved.position_key);
            Ok(None)
        }
    }

    /// Copy of a tile's voxels, or `None` if `key` is not a tile of this map.
    pub fn tile_voxels(&self, key: &TileKey) -> Option<Vec<Voxel>> {
        self.lock(key).map(|store| store.voxels().copied().collect())
    }

    /// Runs `f` with a tile's store locked.
    pub fn with_tile<R>(&self, key: &TileKey, f: impl FnOnce(&TileStore) -> R) -> Option<R> {
        self.lock(key).map(|store| f(&store))
    }

    /// Total voxels across all tiles. Tiles are locked one at a time, so the
    /// figure is not an atomic snapshot under concurrent writes.
    pub fn voxel_count(&self) -> usize {
        self.tiles
            .keys()
            .filter_map(|key| self.lock(key).map(|store| store.len()))
            .sum()
    }

    /// Copies the current contents into a plain [`GridStore`].
    pub fn to_grid(&self) -> GridStore {
        let mut grid = GridStore::new(&self.engine);
        for (key, tile) in &self.tiles {
            let store = tile.lock().unwrap_or_else(PoisonError::into_inner);
            let target = grid.get_mut(key);
            for voxel in store.voxels() {
                attach_if_absent(target, *voxel);
            }
        }
        grid
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use glam::DVec3;
    use voxgrid_coords::TileIndex;
    use voxgrid_voxel::{Color, PositionKey};

    use super::*;
    use crate::message::DetachIntent;

    fn shared() -> SharedGrid {
        SharedGrid::new(TileEngine::new(16.0, 4.0).unwrap())
    }

    fn attach(x: f64, z: f64, rgb: u32) -> SyncMessage {
        SyncMessage::attach(Voxel::new(DVec3::new(x, 1.0, z), Color::new(rgb).unwrap()))
    }

    #[test]
    fn test_effective_attach_is_broadcast() {
        let grid = shared();
        let out = grid.apply(&attach(1.0, 1.0, 0xff0000)).unwrap();
        assert_eq!(out, Some(attach(1.0, 1.0, 0xff0000)));
        assert_eq!(grid.voxel_count(), 1);
    }

    #[test]
    fn test_losing_attach_is_not_broadcast() {
        let grid = shared();
        grid.apply(&attach(1.0, 1.0, 0xff0000)).unwrap();
        assert_eq!(grid.apply(&attach(1.0, 1.0, 0x00ff00)).unwrap(), None);

        let key = TileKey::from_index(TileIndex::new(2, 1));
        let color = grid.with_tile(&key, |store| {
            store
                .get(&PositionKey::from_position(DVec3::ONE))
                .map(|v| v.color.rgb())
        });
        assert_eq!(color, Some(Some(0xff0000)));
    }

    #[test]
    fn test_detach_broadcast_is_canonical() {
        let grid = shared();
        grid.apply(&attach(1.0, 1.0, 0xff0000)).unwrap();

        let bogus = SyncMessage::Detach(DetachIntent {
            tile_key: TileKey::from_index(TileIndex::new(0, 3)),
            position_key: PositionKey::from_position(DVec3::ZERO),
            position: DVec3::ONE,
        });
        let Some(SyncMessage::Detach(out)) = grid.apply(&bogus).unwrap() else {
            panic!("expected canonical detach");
        };
        assert_eq!(out.tile_key.as_str(), "2_1");
        assert_eq!(out.position_key.as_str(), "1_1_1");
        assert_eq!(grid.apply(&bogus).unwrap(), None);
    }

    #[test]
    fn test_commit_sees_updated_tile() {
        let grid = shared();
        let seen = grid
            .apply_then(&attach(1.0, 1.0, 0xff0000), |msg, key, store| {
                (msg.kind(), key.to_string(), store.len())
            })
            .unwrap();
        assert_eq!(seen, Some(("ATTACH", "2_1".to_string(), 1)));

        let mut called = false;
        let noop = grid
            .apply_then(&attach(1.0, 1.0, 0x00ff00), |_, _, _| called = true)
            .unwrap();
        assert!(noop.is_none());
        assert!(!called);
    }

    #[test]
    fn test_outside_map_rejected() {
        let grid = shared();
        assert!(matches!(
            grid.apply(&attach(100.0, 0.0, 1)),
            Err(SyncError::OutsideMap(_))
        ));
    }

    #[test]
    fn test_unknown_tile_fetch_is_none() {
        let grid = shared();
        assert!(grid.tile_voxels(&TileKey::from_index(TileIndex::new(9, 9))).is_none());
        assert_eq!(
            grid.tile_voxels(&TileKey::from_index(TileIndex::new(0, 0))),
            Some(Vec::new())
        );
    }

    #[test]
    fn test_concurrent_writers_converge() {
        let grid = Arc::new(shared());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let grid = Arc::clone(&grid);
                std::thread::spawn(move || {
                    let mut effective = 0;
                    for i in 0..8 {
                        let x = -7.0 + 2.0 * i as f64;
                        for z in [-7.0, -3.0, 1.0, 5.0] {
                            if grid.apply(&attach(x, z, t)).unwrap().is_some() {
                                effective += 1;
                            }
                        }
                    }
                    effective
                })
            })
            .collect();

        let effective: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        // Every position was won exactly once.
        assert_eq!(effective, 32);
        assert_eq!(grid.voxel_count(), 32);
    }

    #[test]
    fn test_from_grid_of_smaller_map_fills_missing_tiles() {
        let engine = TileEngine::new(16.0, 4.0).unwrap();
        let smaller = GridStore::new(&TileEngine::new(8.0, 4.0).unwrap());
        assert_eq!(smaller.tile_count(), 4);

        let grid = SharedGrid::from_grid(engine, smaller);
        assert_eq!(grid.to_grid().tile_count(), 16);
        // Tile 3_3 only exists in the 16-unit map.
        assert_eq!(grid.apply(&attach(7.0, -7.0, 0xff0000)).unwrap(), Some(attach(7.0, -7.0, 0xff0000)));
        assert_eq!(grid.voxel_count(), 1);
    }

    #[test]
    fn test_from_grid_drops_tiles_outside_the_map() {
        let engine = TileEngine::new(16.0, 4.0).unwrap();
        let larger_engine = TileEngine::new(40.0, 4.0).unwrap();
        let mut larger = GridStore::new(&larger_engine);
        let far = DVec3::new(18.0, 1.0, -18.0);
        let key = larger_engine.key_for_point(far.x, far.z).unwrap();
        assert_eq!(key.as_str(), "9_9");
        attach_if_absent(larger.get_mut(&key), Voxel::new(far, Color::WHITE));

        let grid = SharedGrid::from_grid(engine, larger);
        assert_eq!(grid.to_grid().tile_count(), 16);
        assert_eq!(grid.voxel_count(), 0);
        assert!(grid.tile_voxels(&key).is_none());
    }

    #[test]
    fn test_to_grid_roundtrip() {
        let engine = TileEngine::new(16.0, 4.0).unwrap();
        let grid = shared();
        grid.apply(&attach(1.0, 1.0, 0xff0000)).unwrap();
        grid.apply(&attach(-5.0, 5.0, 0x00ff00)).unwrap();

        let plain = grid.to_grid();
        let again = SharedGrid::from_grid(engine, plain.clone());
        assert_eq!(again.to_grid(), plain);
        assert_eq!(plain.voxel_count(), 2);
    }
}
