//! Sync error types.

use glam::DVec3;

/// Reasons an intent cannot be applied.
///
/// Attaching to an occupied position or detaching an empty one is **not** an
/// error; those resolve to [`Applied::Unchanged`](crate::Applied::Unchanged).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    /// A position component is NaN or infinite.
    #[error("position {0} is not finite")]
    NonFinite(DVec3),

    /// The position maps to a tile outside the map.
    #[error("position {0} lies outside the map")]
    OutsideMap(DVec3),
}
