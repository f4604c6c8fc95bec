//! Attach/detach intents exchanged between peers.
//!
//! Wire shape (JSON):
//!
//! ```json
//! { "type": "ATTACH", "data": { "voxel": { "position": [1.0, 1.0, 1.0], "color": 16711680 } } }
//! { "type": "DETACH", "data": { "tileKey": "2_1", "positionKey": "1_1_1", "position": [1.0, 1.0, 1.0] } }
//! ```
//!
//! No sequence numbers are carried; receivers rely on idempotent application.

use glam::DVec3;
use serde::{Deserialize, Serialize};
use voxgrid_coords::TileKey;
use voxgrid_voxel::{PositionKey, Voxel};

/// A synchronization intent. Matched exhaustively by every receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SyncMessage {
    /// A voxel should exist at `voxel.position` with `voxel.color`.
    #[serde(rename = "ATTACH")]
    Attach(AttachIntent),
    /// Any voxel at `position` should be removed.
    #[serde(rename = "DETACH")]
    Detach(DetachIntent),
}

/// Payload of [`SyncMessage::Attach`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachIntent {
    pub voxel: Voxel,
}

/// Payload of [`SyncMessage::Detach`].
///
/// `tile_key` and `position_key` are convenience copies for inspection.
/// Receivers recompute both from `position` and never use these for lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetachIntent {
    pub tile_key: TileKey,
    pub position_key: PositionKey,
    pub position: DVec3,
}

impl SyncMessage {
    pub fn attach(voxel: Voxel) -> Self {
        Self::Attach(AttachIntent { voxel })
    }

    /// World position the intent targets.
    pub fn position(&self) -> DVec3 {
        match self {
            Self::Attach(intent) => intent.voxel.position,
            Self::Detach(intent) => intent.position,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Attach(_) => "ATTACH",
            Self::Detach(_) => "DETACH",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
