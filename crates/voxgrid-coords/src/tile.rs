//! Tile addressing types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Integer tile indices `(u, v)`.
///
/// Indices produced by [`TileEngine::point_to_tile`](crate::TileEngine::point_to_tile)
/// may be negative or past the last tile for points outside the map, hence `i64`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileIndex {
    /// Column, grows with world `x`.
    pub u: i64,
    /// Row, grows with world `-z`.
    pub v: i64,
}

impl TileIndex {
    pub const fn new(u: i64, v: i64) -> Self {
        Self { u, v }
    }
}

impl From<(i64, i64)> for TileIndex {
    fn from((u, v): (i64, i64)) -> Self {
        Self { u, v }
    }
}

/// Canonical string key of a tile, `"{u}_{v}"`.
///
/// Two indices map to the same key only if they are equal. The key is also the
/// file stem of a tile's snapshot on disk and the address of a bulk fetch.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TileKey(String);

impl TileKey {
    /// Builds the key for `index`.
    pub fn from_index(index: TileIndex) -> Self {
        Self(format!("{}_{}", index.u, index.v))
    }

    /// Recovers the indices encoded in this key.
    pub fn index(&self) -> Result<TileIndex, TileKeyError> {
        self.0.parse()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<TileIndex> for TileKey {
    fn from(index: TileIndex) -> Self {
        Self::from_index(index)
    }
}

/// A string that is not a well-formed `"{u}_{v}"` tile key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed tile key: {0:?}")]
pub struct TileKeyError(pub String);

impl FromStr for TileIndex {
    type Err = TileKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || TileKeyError(s.to_string());
        let (u, v) = s.split_once('_').ok_or_else(malformed)?;
        let u = u.parse::<i64>().map_err(|_| malformed())?;
        let v = v.parse::<i64>().map_err(|_| malformed())?;
        Ok(Self { u, v })
    }
}

impl FromStr for TileKey {
    type Err = TileKeyError;

    /// Parses and re-canonicalises, so `"02_3"` becomes `"2_3"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<TileIndex>().map(Self::from_index)
    }
}

/// Axis-aligned footprint of a tile in the XZ plane.
///
/// Because `v` grows towards `-z`, the corner with the smaller `x` carries the
/// **larger** `z`: `min_z > max_z` always holds. Geometry built from this box
/// (grid outlines, ground quads) depends on that ordering.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileBBox {
    pub min_x: f64,
    /// Larger z value of the tile.
    pub min_z: f64,
    pub max_x: f64,
    /// Smaller z value of the tile.
    pub max_z: f64,
}

impl TileBBox {
    /// The box as `[min_x, min_z, max_x, max_z]`.
    pub fn to_array(self) -> [f64; 4] {
        [self.min_x, self.min_z, self.max_x, self.max_z]
    }

    /// Whether the world point `(x, z)` lies in the half-open tile footprint.
    pub fn contains(&self, x: f64, z: f64) -> bool {
        x >= self.min_x && x < self.max_x && z <= self.min_z && z > self.max_z
    }
}
