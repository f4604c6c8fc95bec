//! The voxel record, its color and its position key.

use std::fmt;

use glam::DVec3;
use serde::{Deserialize, Serialize};

/// Largest representable 24-bit RGB value.
const MAX_RGB: u32 = 0xFF_FFFF;

/// 24-bit RGB color packed as `0xRRGGBB`.
///
/// Serialized as a plain integer. Decoding also accepts the integer written as
/// a decimal string (`"16777215"`), which older editors emitted for their
/// default color.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "ColorRepr", into = "u32")]
pub struct Color(u32);

impl Color {
    pub const WHITE: Self = Self(0xFF_FFFF);

    /// Returns `None` if `rgb` does not fit in 24 bits.
    pub fn new(rgb: u32) -> Option<Self> {
        (rgb <= MAX_RGB).then_some(Self(rgb))
    }

    pub fn rgb(self) -> u32 {
        self.0
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:06x}", self.0)
    }
}

impl From<Color> for u32 {
    fn from(color: Color) -> Self {
        color.0
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ColorRepr {
    Int(u32),
    Text(String),
}

impl TryFrom<ColorRepr> for Color {
    type Error = String;

    fn try_from(repr: ColorRepr) -> Result<Self, Self::Error> {
        let rgb = match repr {
            ColorRepr::Int(rgb) => rgb,
            ColorRepr::Text(text) => text
                .trim()
                .parse::<u32>()
                .map_err(|_| format!("invalid color string {text:?}"))?,
        };
        Color::new(rgb).ok_or_else(|| format!("color {rgb} exceeds 0xFFFFFF"))
    }
}

/// A unit cube at a world position with a color.
///
/// On the wire and on disk: `{ "position": [x, y, z], "color": 16711680 }`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Voxel {
    pub position: DVec3,
    pub color: Color,
}

impl Voxel {
    pub fn new(position: DVec3, color: Color) -> Self {
        Self { position, color }
    }

    /// The key identifying this voxel within its tile.
    pub fn key(&self) -> PositionKey {
        PositionKey::from_position(self.position)
    }
}

/// Canonical identity of a voxel position: `"{x}_{y}_{z}"`.
///
/// Each component uses the shortest decimal form that round-trips to the same
/// `f64`, so equal finite positions always produce equal keys and different
/// positions never collide. `-0.0` is written as `0`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionKey(String);

impl PositionKey {
    pub fn from_position(position: DVec3) -> Self {
        let c = |v: f64| if v == 0.0 { 0.0 } else { v };
        Self(format!(
            "{}_{}_{}",
            c(position.x),
            c(position.y),
            c(position.z)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
