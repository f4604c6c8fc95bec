//! Per-tile voxel storage and its two idempotent mutators.
//!
//! [`attach_if_absent`] and [`detach_if_present`] are the only functions that
//! change a [`TileStore`]. Repeating either with the same arguments after the
//! first effective call changes nothing, which is what lets peers apply
//! duplicated or reordered messages safely.

use rustc_hash::FxHashMap;

use crate::voxel::{PositionKey, Voxel};

/// Voxels of one tile keyed by [`PositionKey`]. Iteration order is unspecified.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileStore {
    voxels: FxHashMap<PositionKey, Voxel>,
}

impl TileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store by attaching each voxel in turn; on duplicate positions
    /// the first one wins.
    pub fn from_voxels(voxels: impl IntoIterator<Item = Voxel>) -> Self {
        let mut store = Self::new();
        for voxel in voxels {
            attach_if_absent(&mut store, voxel);
        }
        store
    }

    pub fn len(&self) -> usize {
        self.voxels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voxels.is_empty()
    }

    pub fn get(&self, key: &PositionKey) -> Option<&Voxel> {
        self.voxels.get(key)
    }

    pub fn contains(&self, key: &PositionKey) -> bool {
        self.voxels.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PositionKey, &Voxel)> {
        self.voxels.iter()
    }

    pub fn voxels(&self) -> impl Iterator<Item = &Voxel> {
        self.voxels.values()
    }
}

/// Inserts `voxel` unless its position is already occupied.
///
/// Returns `true` if the voxel was inserted. An occupied position keeps its
/// existing voxel, color included (first writer wins).
pub fn attach_if_absent(store: &mut TileStore, voxel: Voxel) -> bool {
    let key = voxel.key();
    if store.voxels.contains_key(&key) {
        return false;
    }
    store.voxels.insert(key, voxel);
    true
}

/// Removes the voxel at `key` if there is one. Returns `true` if removed.
pub fn detach_if_present(store: &mut TileStore, key: &PositionKey) -> bool {
    store.voxels.remove(key).is_some()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use glam::DVec3;

    use super::*;
    use crate::voxel::Color;

    fn voxel(x: f64, y: f64, z: f64, rgb: u32) -> Voxel {
        Voxel::new(DVec3::new(x, y, z), Color::new(rgb).unwrap())
    }

    #[test]
    fn test_attach_into_empty_store() {
        let mut store = TileStore::new();
        assert!(attach_if_absent(&mut store, voxel(1.0, 1.0, 1.0, 0xff0000)));
        assert_eq!(store.len(), 1);
        assert!(store.contains(&PositionKey::from_position(DVec3::ONE)));
    }

    #[test]
    fn test_attach_then_detach_restores_store() {
        let mut store = TileStore::new();
        attach_if_absent(&mut store, voxel(3.0, 1.0, 3.0, 0x0000ff));
        let before = store.clone();

        let v = voxel(1.0, 1.0, 1.0, 0xff0000);
        assert!(attach_if_absent(&mut store, v));
        assert!(detach_if_present(&mut store, &v.key()));

        assert_eq!(store, before);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_detach_absent_is_noop() {
        let mut store = TileStore::from_voxels([voxel(1.0, 1.0, 1.0, 0xff0000)]);
        let before = store.clone();

        let missing = PositionKey::from_position(DVec3::new(5.0, 1.0, 5.0));
        assert!(!detach_if_present(&mut store, &missing));
        assert_eq!(store, before);
    }

    #[test]
    fn test_double_attach_keeps_first_color() {
        let mut store = TileStore::new();
        assert!(attach_if_absent(&mut store, voxel(1.0, 1.0, 1.0, 0xff0000)));
        assert!(!attach_if_absent(&mut store, voxel(1.0, 1.0, 1.0, 0x00ff00)));

        assert_eq!(store.len(), 1);
        let kept = store.get(&PositionKey::from_position(DVec3::ONE)).unwrap();
        assert_eq!(kept.color.rgb(), 0xff0000);
    }

    #[test]
    fn test_repeated_detach_is_idempotent() {
        let v = voxel(1.0, 1.0, 1.0, 0xff0000);
        let mut store = TileStore::from_voxels([v]);
        assert!(detach_if_present(&mut store, &v.key()));
        for _ in 0..3 {
            assert!(!detach_if_present(&mut store, &v.key()));
        }
        assert!(store.is_empty());
    }

    #[test]
    fn test_from_voxels_first_wins() {
        let store = TileStore::from_voxels([
            voxel(1.0, 1.0, 1.0, 0x111111),
            voxel(1.0, 1.0, 1.0, 0x222222),
            voxel(1.0, 3.0, 1.0, 0x333333),
        ]);
        assert_eq!(store.len(), 2);
        let first = store.get(&PositionKey::from_position(DVec3::ONE)).unwrap();
        assert_eq!(first.color.rgb(), 0x111111);
    }
}
