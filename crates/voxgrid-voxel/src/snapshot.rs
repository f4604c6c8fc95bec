//! JSON snapshots of tile stores.
//!
//! A snapshot is a JSON array of voxel records, the same array a bulk tile
//! fetch returns:
//!
//! ```json
//! [{"position":[1.0,1.0,1.0],"color":16711680},{"position":[3.0,1.0,1.0],"color":65280}]
//! ```
//!
//! Round-tripping preserves the *set* of voxels, not their order. On disk every
//! tile lives in `<root>/<tileKey>.json`; a missing file is an empty tile.

use std::io;
use std::path::{Path, PathBuf};

use voxgrid_coords::{TileEngine, TileKey};

use crate::grid_store::GridStore;
use crate::tile_store::{TileStore, attach_if_absent};
use crate::voxel::Voxel;

/// Errors that can occur while encoding, decoding or storing snapshots.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// The text is not a JSON array of voxel records.
    #[error("invalid snapshot: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading or writing a snapshot file failed.
    #[error("snapshot I/O on {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

/// Encodes a tile's voxels as a JSON array, minified or pretty-printed.
///
/// Voxels are written in position-key order so identical stores produce
/// identical files.
pub fn serialize(store: &TileStore, pretty: bool) -> Result<String, SnapshotError> {
    let mut entries: Vec<_> = store.iter().collect();
    entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
    let voxels: Vec<&Voxel> = entries.into_iter().map(|(_, voxel)| voxel).collect();

    let text = if pretty {
        serde_json::to_string_pretty(&voxels)?
    } else {
        serde_json::to_string(&voxels)?
    };
    Ok(text)
}

/// Decodes a JSON array of voxel records.
///
/// Duplicates are kept; attaching the result collapses them first-wins.
pub fn deserialize(text: &str) -> Result<Vec<Voxel>, SnapshotError> {
    Ok(serde_json::from_str(text)?)
}

/// Directory of per-tile snapshot files.
#[derive(Debug, Clone)]
pub struct TileSnapshotDir {
    root: PathBuf,
}

impl TileSnapshotDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<key>.json`
    pub fn path_for(&self, key: &TileKey) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    /// Writes one tile's snapshot, creating the directory if needed.
    pub fn save(&self, key: &TileKey, store: &TileStore, pretty: bool) -> Result<(), SnapshotError> {
        let text = serialize(store, pretty)?;
        self.write_raw(key, &text)
    }

    /// Writes already-encoded snapshot text for a tile.
    pub fn write_raw(&self, key: &TileKey, text: &str) -> Result<(), SnapshotError> {
        std::fs::create_dir_all(&self.root).map_err(|source| SnapshotError::Io {
            path: self.root.clone(),
            source,
        })?;
        let path = self.path_for(key);
        std::fs::write(&path, text).map_err(|source| SnapshotError::Io { path, source })
    }

    /// Reads one tile's voxels. A tile without a file is empty.
    pub fn load(&self, key: &TileKey) -> Result<Vec<Voxel>, SnapshotError> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(text) => deserialize(&text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(source) => Err(SnapshotError::Io { path, source }),
        }
    }

    /// Writes every tile of `grid`, including empty ones. Returns the number of
    /// files written.
    pub fn export_grid(&self, grid: &GridStore, pretty: bool) -> Result<usize, SnapshotError> {
        let mut written = 0;
        for (key, store) in grid.iter() {
            self.save(key, store, pretty)?;
            written += 1;
        }
        tracing::info!("Exported {written} tile snapshots to {}", self.root.display());
        Ok(written)
    }

    /// Loads every tile file of the map into `grid`, with attach semantics.
    ///
    /// Each voxel is filed under the tile its own position maps to, whatever
    /// file it came from; voxels outside the map are skipped. Returns the number
    /// of voxels inserted.
    pub fn import_grid(
        &self,
        engine: &TileEngine,
        grid: &mut GridStore,
    ) -> Result<usize, SnapshotError> {
        let mut inserted = 0;
        for index in engine.tile_grid() {
            let file_key = engine.tile_to_key(index);
            for voxel in self.load(&file_key)? {
                let Some(key) = engine.key_for_point(voxel.position.x, voxel.position.z) else {
                    tracing::warn!(
                        "Skipping voxel at {} in {file_key}.json: outside the map",
                        voxel.key()
                    );
                    continue;
                };
                if key != file_key {
                    tracing::warn!("Voxel {} in {file_key}.json belongs to tile {key}", voxel.key());
                }
                if attach_if_absent(grid.get_mut(&key), voxel) {
                    inserted += 1;
                }
            }
        }
        tracing::info!("Imported {inserted} voxels from {}", self.root.display());
        Ok(inserted)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
