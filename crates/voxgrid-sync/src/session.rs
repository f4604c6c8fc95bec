//! Connection-scoped sync state: the initial bulk load and live updates.
//!
//! ```text
//!  Disconnected --begin()--> Syncing --last tile loaded--> Live
//!        ^                      |                           |
//!        +------disconnect()----+-----------disconnect()----+
//! ```
//!
//! While `Syncing`, the session expects one tile response per key of the tile
//! grid (row-major). Live messages that arrive meanwhile are buffered and
//! applied, in arrival order, once the last tile is in. A reconnect starts the
//! whole bulk load again; replaying voxels the world already holds is a no-op.

use std::collections::VecDeque;

use voxgrid_coords::TileKey;
use voxgrid_voxel::Voxel;

use crate::error::SyncError;
use crate::message::SyncMessage;
use crate::presenter::Presenter;
use crate::world::{Applied, World};

/// Current phase of a [`SyncSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No transport. Live messages are dropped.
    Disconnected,
    /// Bulk load in progress. Live messages are buffered.
    Syncing,
    /// Bulk load complete. Live messages are applied on arrival.
    Live,
}

/// What happened to a live message handed to [`SyncSession::on_remote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Applied(Applied),
    Buffered,
    Dropped,
}

/// Result of loading one tile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TileLoad {
    /// Voxels that were not already present.
    pub inserted: usize,
    /// Voxels rejected because their position is invalid for this map.
    pub rejected: usize,
    /// Whether this tile completed the bulk load.
    pub completed: bool,
}

/// Per-connection synchronization state machine. Owns no store; it drives a
/// [`World`] passed in by the caller.
#[derive(Debug)]
pub struct SyncSession {
    phase: SessionPhase,
    pending: VecDeque<TileKey>,
    buffered: Vec<SyncMessage>,
}

impl Default for SyncSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncSession {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Disconnected,
            pending: VecDeque::new(),
            buffered: Vec::new(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_live(&self) -> bool {
        self.phase == SessionPhase::Live
    }

    /// Tiles still awaited by the bulk load, in request order.
    pub fn pending(&self) -> impl Iterator<Item = &TileKey> {
        self.pending.iter()
    }

    /// Starts a bulk load after (re)connecting.
    ///
    /// Returns the tile keys to request, in the engine's row-major grid order.
    /// Anything buffered by an earlier, abandoned load is discarded.
    pub fn begin(&mut self, world: &World) -> Vec<TileKey> {
        let engine = world.engine();
        self.pending = engine.tile_grid().map(|i| engine.tile_to_key(i)).collect();
        self.buffered.clear();
        self.phase = SessionPhase::Syncing;
        tracing::debug!("Initial sync started: {} tiles", self.pending.len());
        self.pending.iter().cloned().collect()
    }

    /// Applies a bulk-fetched tile with attach semantics.
    ///
    /// Each voxel is filed under the tile its own position maps to. Voxels
    /// with invalid positions are counted and skipped. Responses outside a
    /// bulk load (stale replies after a reconnect) are still applied, since
    /// attaching is idempotent, but do not affect the phase.
    pub fn on_tile<P: Presenter + ?Sized>(
        &mut self,
        key: &TileKey,
        voxels: Vec<Voxel>,
        world: &mut World,
        presenter: &mut P,
    ) -> TileLoad {
        let mut load = self.on_tile_part(key, voxels, world, presenter);

        if self.phase == SessionPhase::Syncing {
            if let Some(at) = self.pending.iter().position(|k| k == key) {
                self.pending.remove(at);
            } else {
                tracing::debug!("Tile {key} was not awaited");
            }
            if self.pending.is_empty() {
                self.go_live(world, presenter);
                load.completed = true;
            }
        }
        load
    }

    /// Applies one chunk of a tile that arrives in several parts. The tile
    /// stays pending until its final chunk goes through [`on_tile`](Self::on_tile).
    pub fn on_tile_part<P: Presenter + ?Sized>(
        &mut self,
        key: &TileKey,
        voxels: Vec<Voxel>,
        world: &mut World,
        presenter: &mut P,
    ) -> TileLoad {
        let mut load = TileLoad::default();
        for voxel in voxels {
            match world.apply(&SyncMessage::attach(voxel), presenter) {
                Ok(applied) if applied.is_effective() => load.inserted += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Rejected voxel from tile {key}: {e}");
                    load.rejected += 1;
                }
            }
        }
        load
    }

    /// Handles a live message from a peer according to the current phase.
    pub fn on_remote<P: Presenter + ?Sized>(
        &mut self,
        msg: SyncMessage,
        world: &mut World,
        presenter: &mut P,
    ) -> Result<Delivery, SyncError> {
        match self.phase {
            SessionPhase::Live => Ok(Delivery::Applied(world.apply(&msg, presenter)?)),
            SessionPhase::Syncing => {
                self.buffered.push(msg);
                Ok(Delivery::Buffered)
            }
            SessionPhase::Disconnected => {
                tracing::debug!("Dropping {} received while disconnected", msg.kind());
                Ok(Delivery::Dropped)
            }
        }
    }

    /// Abandons any bulk load in progress and suspends live updates.
    pub fn disconnect(&mut self) {
        if self.phase != SessionPhase::Disconnected {
            tracing::info!("Sync suspended ({} tiles were pending)", self.pending.len());
        }
        self.phase = SessionPhase::Disconnected;
        self.pending.clear();
        self.buffered.clear();
    }

    fn go_live<P: Presenter + ?Sized>(&mut self, world: &mut World, presenter: &mut P) {
        self.phase = SessionPhase::Live;
        let buffered = std::mem::take(&mut self.buffered);
        let count = buffered.len();
        for msg in buffered {
            if let Err(e) = world.apply(&msg, presenter) {
                tracing::warn!("Rejected buffered {}: {e}", msg.kind());
            }
        }
        tracing::info!(
            "Initial sync complete: {} voxels, {count} buffered updates applied",
            world.grid().voxel_count()
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
