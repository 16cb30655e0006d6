//! Tile coordinates.
//! <https://wiki.openstreetmap.org/wiki/Slippy_map_tilenames>

use serde::{Deserialize, Serialize};

/// Number of tiles along one axis at given zoom.
pub fn total_tiles(z: u8) -> u32 {
    1u32 << z
}

/// Coordinates of the tile in the tile grid, without wrapping or overscaling.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize)]
pub struct CanonicalTileId {
    /// Zoom level, where 0 means the whole world in a single tile.
    pub z: u8,

    /// X number of the tile.
    pub x: u32,

    /// Y number of the tile.
    pub y: u32,
}

impl CanonicalTileId {
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    pub fn valid(&self) -> bool {
        self.z <= 24 && self.x < total_tiles(self.z) && self.y < total_tiles(self.z)
    }

    /// Key used by the tiling index: `((2^z * y + x) * 32) + z`.
    pub fn to_id(&self) -> u64 {
        ((u64::from(total_tiles(self.z)) * u64::from(self.y) + u64::from(self.x)) << 5)
            + u64::from(self.z)
    }

    pub fn parent(&self) -> Option<Self> {
        Some(Self {
            z: self.z.checked_sub(1)?,
            x: self.x / 2,
            y: self.y / 2,
        })
    }

    /// Neighbour to the east, wrapping around the antimeridian.
    pub fn east(&self) -> Self {
        Self {
            x: (self.x + 1) % total_tiles(self.z),
            ..*self
        }
    }

    pub fn west(&self) -> Self {
        Self {
            x: (self.x + total_tiles(self.z) - 1) % total_tiles(self.z),
            ..*self
        }
    }
}

/// Tile as requested by the renderer. It might be displayed at a higher zoom than
/// its data (overscaled) and in one of the world copies (wrapped).
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverscaledTileId {
    pub overscaled_z: u8,
    pub wrap: i32,
    pub canonical: CanonicalTileId,
}

impl OverscaledTileId {
    pub fn new(overscaled_z: u8, wrap: i32, canonical: CanonicalTileId) -> Self {
        Self {
            overscaled_z,
            wrap,
            canonical,
        }
    }

    /// Tile which is displayed at the zoom of its data.
    pub fn canonical(canonical: CanonicalTileId) -> Self {
        Self::new(canonical.z, 0, canonical)
    }

    /// How many times the data is magnified.
    pub fn overscale_factor(&self) -> u32 {
        1 << self.overscaled_z.saturating_sub(self.canonical.z)
    }
}

/// Identifier assigned by the main thread to every tile instance. Keys all tile caches.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileUid(pub u64);

impl std::fmt::Display for TileUid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_per_coordinate() {
        let mut ids = std::collections::HashSet::new();
        for z in 0..5 {
            for x in 0..total_tiles(z) {
                for y in 0..total_tiles(z) {
                    assert!(ids.insert(CanonicalTileId::new(z, x, y).to_id()));
                }
            }
        }
    }

    #[test]
    fn id_layout() {
        assert_eq!(CanonicalTileId::new(0, 0, 0).to_id(), 0);
        assert_eq!(CanonicalTileId::new(1, 1, 0).to_id(), 33);
        assert_eq!(CanonicalTileId::new(2, 1, 2).to_id(), (4 * 2 + 1) * 32 + 2);
    }

    #[test]
    fn neighbours_wrap() {
        let tile = CanonicalTileId::new(2, 0, 1);
        assert_eq!(tile.west(), CanonicalTileId::new(2, 3, 1));
        assert_eq!(tile.west().east(), tile);
        assert_eq!(tile.parent(), Some(CanonicalTileId::new(1, 0, 0)));
        assert_eq!(CanonicalTileId::new(0, 0, 0).parent(), None);
    }

    #[test]
    fn overscaling() {
        let tile = OverscaledTileId::new(5, 0, CanonicalTileId::new(3, 1, 1));
        assert_eq!(tile.overscale_factor(), 4);
        assert_eq!(OverscaledTileId::canonical(tile.canonical).overscale_factor(), 1);
    }
}
