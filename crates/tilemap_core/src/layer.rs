//! Layer types for tile and object layers

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::TileRef;

/// A named layer (tiles or objects)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    pub visible: bool,
    pub data: LayerData,
}

impl Layer {
    /// Create a new empty tile layer of the given size
    pub fn new_tile_layer(name: impl Into<String>, width: u32, height: u32) -> Self {
        let size = width as usize * height as usize;
        Self {
            name: name.into(),
            visible: true,
            data: LayerData::Tiles {
                tiles: vec![None; size],
            },
        }
    }

    /// Create a new object layer
    pub fn new_object_layer(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            visible: true,
            data: LayerData::Objects {
                objects: Vec::new(),
            },
        }
    }

    /// Create an empty layer of the given kind
    pub fn new_of_kind(name: impl Into<String>, kind: LayerKind, width: u32, height: u32) -> Self {
        match kind {
            LayerKind::Tiles => Self::new_tile_layer(name, width, height),
            LayerKind::Objects => Self::new_object_layer(name),
        }
    }

    /// Get the kind of this layer
    pub fn kind(&self) -> LayerKind {
        match &self.data {
            LayerData::Tiles { .. } => LayerKind::Tiles,
            LayerData::Objects { .. } => LayerKind::Objects,
        }
    }

    pub fn is_tile_layer(&self) -> bool {
        matches!(self.data, LayerData::Tiles { .. })
    }

    /// Row-major tile storage if this is a tile layer
    pub fn tiles(&self) -> Option<&[Option<TileRef>]> {
        match &self.data {
            LayerData::Tiles { tiles } => Some(tiles),
            LayerData::Objects { .. } => None,
        }
    }

    pub fn tiles_mut(&mut self) -> Option<&mut Vec<Option<TileRef>>> {
        match &mut self.data {
            LayerData::Tiles { tiles } => Some(tiles),
            LayerData::Objects { .. } => None,
        }
    }

    /// True if this is a tile layer without a single tile in it
    pub fn is_blank(&self) -> bool {
        self.tiles()
            .map(|tiles| tiles.iter().all(Option::is_none))
            .unwrap_or(true)
    }
}

/// The kind of a layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerKind {
    Tiles,
    Objects,
}

/// The data contained in a layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LayerData {
    /// Dense tile layer, row-major, `width * height` entries
    Tiles {
        /// `None` means empty
        tiles: Vec<Option<TileRef>>,
    },
    /// Object layer. Never inspected by automapping, only carried along.
    Objects {
        /// Object IDs placed on this layer
        objects: Vec<Uuid>,
    },
}
