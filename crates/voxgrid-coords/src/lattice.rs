//! Snapping of arbitrary world points onto voxel centers.

use glam::DVec3;

/// Regular cubic lattice of voxels with side `voxel_size`, aligned to the origin.
///
/// Voxel centers sit at `k * voxel_size + voxel_size / 2` on every axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelLattice {
    voxel_size: f64,
}

impl VoxelLattice {
    /// # Panics
    ///
    /// Panics if `voxel_size` is not positive and finite.
    pub fn new(voxel_size: f64) -> Self {
        assert!(
            voxel_size.is_finite() && voxel_size > 0.0,
            "voxel_size must be positive, got {voxel_size}"
        );
        Self { voxel_size }
    }

    pub fn voxel_size(&self) -> f64 {
        self.voxel_size
    }

    /// Center of the voxel cell containing `point`.
    pub fn snap(&self, point: DVec3) -> DVec3 {
        let s = self.voxel_size;
        (point / s).floor() * s + DVec3::splat(s / 2.0)
    }

    /// Center of the cell adjacent to a picked surface: the cell containing
    /// `hit + normal`. This is where a new voxel goes when placing against an
    /// existing face or the ground.
    pub fn place_against(&self, hit: DVec3, normal: DVec3) -> DVec3 {
        self.snap(hit + normal)
    }
}
