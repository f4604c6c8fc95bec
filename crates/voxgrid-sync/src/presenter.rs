//! Hooks for whatever materializes committed voxels (a renderer, a log, a test).

use voxgrid_voxel::{PositionKey, Voxel};

/// Consumer of committed store changes.
///
/// Called once per *effective* change only. The presenter should tag whatever
/// it builds for a voxel with the voxel's [`PositionKey`], since that key is
/// all [`voxel_detached`](Presenter::voxel_detached) receives.
pub trait Presenter {
    /// A voxel was inserted at `key`.
    fn voxel_attached(&mut self, key: &PositionKey, voxel: &Voxel);

    /// The voxel at `key` was removed.
    fn voxel_detached(&mut self, key: &PositionKey);
}

/// Ignores all changes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPresenter;

impl Presenter for NullPresenter {
    fn voxel_attached(&mut self, _key: &PositionKey, _voxel: &Voxel) {}

    fn voxel_detached(&mut self, _key: &PositionKey) {}
}

/// One committed change.
#[derive(Debug, Clone, PartialEq)]
pub enum VoxelChange {
    Attached { key: PositionKey, voxel: Voxel },
    Detached { key: PositionKey },
}

/// Records every change in order.
#[derive(Debug, Default, Clone)]
pub struct ChangeLog {
    changes: Vec<VoxelChange>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn changes(&self) -> &[VoxelChange] {
        &self.changes
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Takes the recorded changes, leaving the log empty.
    pub fn drain(&mut self) -> Vec<VoxelChange> {
        std::mem::take(&mut self.changes)
    }
}

impl Presenter for ChangeLog {
    fn voxel_attached(&mut self, key: &PositionKey, voxel: &Voxel) {
        self.changes.push(VoxelChange::Attached {
            key: key.clone(),
            voxel: *voxel,
        });
    }

    fn voxel_detached(&mut self, key: &PositionKey) {
        self.changes.push(VoxelChange::Detached { key: key.clone() });
    }
}
