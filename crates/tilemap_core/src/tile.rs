//! Tile references with flip flags

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one tile of one tileset, including its flip state.
///
/// Two `TileRef`s are equal only if every field matches. The empty tile is
/// not a `TileRef`: layers store `Option<TileRef>` and use `None` for "no tile".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileRef {
    /// The tileset this tile belongs to
    pub tileset: Uuid,
    /// Index of the tile within its tileset
    pub local_id: u32,
    #[serde(default)]
    pub flip_h: bool,
    #[serde(default)]
    pub flip_v: bool,
    /// Anti-diagonal flip (rotation helper, as in Tiled)
    #[serde(default)]
    pub flip_d: bool,
}

impl TileRef {
    /// Create an unflipped tile reference
    pub const fn new(tileset: Uuid, local_id: u32) -> Self {
        Self {
            tileset,
            local_id,
            flip_h: false,
            flip_v: false,
            flip_d: false,
        }
    }

    /// Set the horizontal flip flag
    pub const fn with_flip_h(mut self, flip: bool) -> Self {
        self.flip_h = flip;
        self
    }

    /// Set the vertical flip flag
    pub const fn with_flip_v(mut self, flip: bool) -> Self {
        self.flip_v = flip;
        self
    }

    /// Set the diagonal flip flag
    pub const fn with_flip_d(mut self, flip: bool) -> Self {
        self.flip_d = flip;
        self
    }

    /// True if any flip flag is set
    pub fn is_flipped(&self) -> bool {
        self.flip_h || self.flip_v || self.flip_d
    }

    /// Same tile with all flip flags cleared
    pub fn unflipped(&self) -> Self {
        Self::new(self.tileset, self.local_id)
    }
}
