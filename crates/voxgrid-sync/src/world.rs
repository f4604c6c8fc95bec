//! The client-side world: one owned [`GridStore`] plus the rules for applying
//! intents to it.
//!
//! Every intent, local or remote, goes through the same steps:
//!
//! 1. recompute `(tileKey, positionKey)` from the intent's position,
//! 2. apply `attach_if_absent` / `detach_if_present` to that tile,
//! 3. notify the [`Presenter`] only if the store actually changed.

use glam::DVec3;
use voxgrid_coords::{TileEngine, TileKey};
use voxgrid_voxel::{
    Color, GridStore, PositionKey, TileStore, Voxel, attach_if_absent, detach_if_present,
};

use crate::error::SyncError;
use crate::message::{DetachIntent, SyncMessage};
use crate::presenter::Presenter;

/// Keys derived from a position through the tile engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub tile_key: TileKey,
    pub position_key: PositionKey,
}

/// Derives the tile and position keys of `position`.
///
/// # Errors
///
/// Rejects non-finite positions and positions whose tile is outside the map.
/// Positions are never clamped: a clamped voxel would be stored under a tile
/// its position does not map to.
pub fn resolve(engine: &TileEngine, position: DVec3) -> Result<Resolved, SyncError> {
    if !position.is_finite() {
        return Err(SyncError::NonFinite(position));
    }
    let tile_key = engine
        .key_for_point(position.x, position.z)
        .ok_or(SyncError::OutsideMap(position))?;
    Ok(Resolved {
        tile_key,
        position_key: PositionKey::from_position(position),
    })
}

/// Outcome of applying one intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// A voxel was inserted.
    Attached(PositionKey),
    /// A voxel was removed.
    Detached(PositionKey),
    /// Already present / already absent; nothing changed.
    Unchanged,
}

impl Applied {
    pub fn is_effective(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Applies `msg` to the tile it was resolved to.
///
/// `store` must be the tile of `resolved.tile_key`.
pub(crate) fn apply_to_tile(store: &mut TileStore, msg: &SyncMessage, resolved: &Resolved) -> Applied {
    match msg {
        SyncMessage::Attach(intent) => {
            if attach_if_absent(store, intent.voxel) {
                Applied::Attached(resolved.position_key.clone())
            } else {
                Applied::Unchanged
            }
        }
        SyncMessage::Detach(_) => {
            if detach_if_present(store, &resolved.position_key) {
                Applied::Detached(resolved.position_key.clone())
            } else {
                Applied::Unchanged
            }
        }
    }
}

/// Rewrites the redundant keys of a message to the resolved ones.
pub(crate) fn canonical(msg: &SyncMessage, resolved: &Resolved) -> SyncMessage {
    match msg {
        SyncMessage::Attach(_) => msg.clone(),
        SyncMessage::Detach(intent) => SyncMessage::Detach(DetachIntent {
            tile_key: resolved.tile_key.clone(),
            position_key: resolved.position_key.clone(),
            position: intent.position,
        }),
    }
}

fn log_key_mismatch(msg: &SyncMessage, resolved: &Resolved) {
    if let SyncMessage::Detach(intent) = msg
        && (intent.tile_key != resolved.tile_key || intent.position_key != resolved.position_key)
    {
        tracing::debug!(
            "DETACH keys {}/{} disagree with position; using {}/{}",
            intent.tile_key,
            intent.position_key,
            resolved.tile_key,
            resolved.position_key
        );
    }
}

/// A tile engine and the grid it partitions, owned by one session.
#[derive(Debug, Clone)]
pub struct World {
    engine: TileEngine,
    grid: GridStore,
}

impl World {
    /// Creates a world with an empty store for every tile.
    pub fn new(engine: TileEngine) -> Self {
        Self {
            grid: GridStore::new(&engine),
            engine,
        }
    }

    pub fn engine(&self) -> &TileEngine {
        &self.engine
    }

    pub fn grid(&self) -> &GridStore {
        &self.grid
    }

    /// Keys for `position` in this world.
    pub fn resolve(&self, position: DVec3) -> Result<Resolved, SyncError> {
        resolve(&self.engine, position)
    }

    /// Applies an intent, from a peer or from the local user, and notifies
    /// `presenter` if the store changed.
    pub fn apply<P: Presenter + ?Sized>(
        &mut self,
        msg: &SyncMessage,
        presenter: &mut P,
    ) -> Result<Applied, SyncError> {
        let resolved = self.resolve(msg.position())?;
        log_key_mismatch(msg, &resolved);

        let applied = apply_to_tile(self.grid.get_mut(&resolved.tile_key), msg, &resolved);
        match (&applied, msg) {
            (Applied::Attached(key), SyncMessage::Attach(intent)) => {
                presenter.voxel_attached(key, &intent.voxel)
            }
            (Applied::Detached(key), _) => presenter.voxel_detached(key),
            _ => {}
        }
        Ok(applied)
    }

    /// Attaches a voxel on behalf of the local user.
    ///
    /// Returns the message to forward to peers, or `None` if the position was
    /// already occupied (nothing is sent in that case).
    pub fn attach_local<P: Presenter + ?Sized>(
        &mut self,
        position: DVec3,
        color: Color,
        presenter: &mut P,
    ) -> Result<Option<SyncMessage>, SyncError> {
        let msg = SyncMessage::attach(Voxel::new(position, color));
        let applied = self.apply(&msg, presenter)?;
        Ok(applied.is_effective().then_some(msg))
    }

    /// Detaches the voxel at `position` on behalf of the local user.
    ///
    /// Returns the message to forward to peers, or `None` if there was no voxel.
    pub fn detach_local<P: Presenter + ?Sized>(
        &mut self,
        position: DVec3,
        presenter: &mut P,
    ) -> Result<Option<SyncMessage>, SyncError> {
        let resolved = self.resolve(position)?;
        let msg = SyncMessage::Detach(DetachIntent {
            tile_key: resolved.tile_key,
            position_key: resolved.position_key,
            position,
        });
        let applied = self.apply(&msg, presenter)?;
        Ok(applied.is_effective().then_some(msg))
    }

    /// Voxels of one tile, or `None` for a key outside the grid.
    pub fn tile(&self, key: &TileKey) -> Option<&TileStore> {
        self.grid.try_get(key)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
