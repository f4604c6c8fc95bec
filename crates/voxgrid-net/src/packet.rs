//! Everything that travels over a voxgrid connection.
//!
//! Sync messages are sent as-is, so a frame holding an `ATTACH` or `DETACH`
//! is byte-for-byte the [`SyncMessage`] JSON. Tile fetches share the same
//! `{ "type", "data" }` envelope:
//!
//! ```json
//! { "type": "FETCH_TILE", "data": { "tileKey": "0_1" } }
//! { "type": "TILE", "data": { "tileKey": "0_1", "voxels": [], "last": true } }
//! ```
//!
//! A tile too large for one frame is answered with several `TILE` packets;
//! only the final one has `last` set. A `TILE` without `last` is complete.

use serde::{Deserialize, Serialize};
use voxgrid_coords::TileKey;
use voxgrid_sync::SyncMessage;
use voxgrid_voxel::Voxel;

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Packet {
    Sync(SyncMessage),
    Control(Control),
}

/// Request/response traffic used by the initial bulk load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum Control {
    /// Client asks for the current contents of one tile.
    #[serde(rename = "FETCH_TILE")]
    FetchTile { tile_key: TileKey },
    /// Server's answer, possibly one chunk of several. Unknown keys are
    /// answered with an empty list.
    #[serde(rename = "TILE")]
    Tile {
        tile_key: TileKey,
        voxels: Vec<Voxel>,
        #[serde(default = "final_chunk")]
        last: bool,
    },
}

fn final_chunk() -> bool {
    true
}

impl From<SyncMessage> for Packet {
    fn from(msg: SyncMessage) -> Self {
        Self::Sync(msg)
    }
}

impl From<Control> for Packet {
    fn from(control: Control) -> Self {
        Self::Control(control)
    }
}
