//! The tile grid: a stack of layers sharing one size

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{Cell, Layer, Rect, TileRef, Value};

/// Structural problems with a grid
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("layer '{layer}' holds {actual} cells, grid needs {expected}")]
    LayerSizeMismatch {
        layer: String,
        expected: usize,
        actual: usize,
    },
}

/// A tile map: ordered layers (bottom first) over a fixed `width * height` cell grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub id: Uuid,
    pub name: String,
    /// Width in cells
    pub width: u32,
    /// Height in cells
    pub height: u32,
    /// Tile size in pixels
    pub tile_width: u32,
    pub tile_height: u32,
    pub layers: Vec<Layer>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, Value>,
}

impl Grid {
    /// Create an empty grid with 16x16 pixel tiles
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            width,
            height,
            tile_width: 16,
            tile_height: 16,
            layers: Vec::new(),
            properties: HashMap::new(),
        }
    }

    pub fn with_tile_size(mut self, tile_width: u32, tile_height: u32) -> Self {
        self.tile_width = tile_width;
        self.tile_height = tile_height;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// The rectangle covering the whole grid
    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Append a layer on top of the stack, returning its index
    pub fn add_layer(&mut self, layer: Layer) -> usize {
        self.layers.push(layer);
        self.layers.len() - 1
    }

    /// Append a new empty tile layer sized to this grid
    pub fn add_tile_layer(&mut self, name: impl Into<String>) -> usize {
        let layer = Layer::new_tile_layer(name, self.width, self.height);
        self.add_layer(layer)
    }

    /// Insert a layer at `index` (clamped to the stack height)
    pub fn insert_layer(&mut self, index: usize, layer: Layer) -> usize {
        let index = index.min(self.layers.len());
        self.layers.insert(index, layer);
        index
    }

    pub fn get_layer(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    pub fn get_layer_mut(&mut self, index: usize) -> Option<&mut Layer> {
        self.layers.get_mut(index)
    }

    /// Index of the first layer (of any kind) with this name
    pub fn find_layer(&self, name: &str) -> Option<usize> {
        self.layers.iter().position(|l| l.name == name)
    }

    /// Index of the first tile layer with this name
    pub fn find_tile_layer(&self, name: &str) -> Option<usize> {
        self.layers
            .iter()
            .position(|l| l.name == name && l.is_tile_layer())
    }

    /// Row-major storage index for a cell, or `None` when outside the grid
    pub fn index_of(&self, cell: Cell) -> Option<usize> {
        if cell.x < 0 || cell.y < 0 || cell.x >= self.width as i32 || cell.y >= self.height as i32 {
            return None;
        }
        Some(cell.y as usize * self.width as usize + cell.x as usize)
    }

    pub fn in_bounds(&self, cell: Cell) -> bool {
        self.index_of(cell).is_some()
    }

    /// Tile at a cell. Out-of-range cells and object layers read as empty.
    pub fn get_tile(&self, layer_index: usize, cell: Cell) -> Option<TileRef> {
        let idx = self.index_of(cell)?;
        self.layers
            .get(layer_index)?
            .tiles()?
            .get(idx)
            .copied()
            .flatten()
    }

    /// Write a tile. Returns `false` if the cell or layer could not be written.
    pub fn set_tile(&mut self, layer_index: usize, cell: Cell, tile: Option<TileRef>) -> bool {
        let Some(idx) = self.index_of(cell) else {
            return false;
        };
        let Some(tiles) = self.layers.get_mut(layer_index).and_then(Layer::tiles_mut) else {
            return false;
        };
        match tiles.get_mut(idx) {
            Some(slot) => {
                *slot = tile;
                true
            }
            None => false,
        }
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Check that every tile layer holds exactly `width * height` cells
    pub fn validate(&self) -> Result<(), GridError> {
        let expected = self.cell_count();
        for layer in &self.layers {
            if let Some(tiles) = layer.tiles() {
                if tiles.len() != expected {
                    return Err(GridError::LayerSizeMismatch {
                        layer: layer.name.clone(),
                        expected,
                        actual: tiles.len(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile(id: u32) -> TileRef {
        TileRef::new(Uuid::nil(), id)
    }

    #[test]
    fn test_set_and_get_tile() {
        let mut grid = Grid::new("test", 4, 3);
        let layer = grid.add_tile_layer("Ground");

        assert!(grid.set_tile(layer, Cell::new(3, 2), Some(tile(5))));
        assert_eq!(grid.get_tile(layer, Cell::new(3, 2)), Some(tile(5)));
        assert_eq!(grid.get_tile(layer, Cell::new(0, 0)), None);
    }

    #[test]
    fn test_out_of_bounds_access() {
        let mut grid = Grid::new("test", 2, 2);
        let layer = grid.add_tile_layer("Ground");

        assert!(!grid.set_tile(layer, Cell::new(2, 0), Some(tile(1))));
        assert!(!grid.set_tile(layer, Cell::new(0, -1), Some(tile(1))));
        assert_eq!(grid.get_tile(layer, Cell::new(-1, 0)), None);
        assert_eq!(grid.get_tile(7, Cell::new(0, 0)), None);
    }

    #[test]
    fn test_object_layer_reads_empty_and_rejects_writes() {
        let mut grid = Grid::new("test", 2, 2);
        let objects = grid.add_layer(Layer::new_object_layer("Objects"));

        assert_eq!(grid.get_tile(objects, Cell::new(0, 0)), None);
        assert!(!grid.set_tile(objects, Cell::new(0, 0), Some(tile(1))));
    }

    #[test]
    fn test_find_tile_layer_skips_object_layers() {
        let mut grid = Grid::new("test", 2, 2);
        grid.add_layer(Layer::new_object_layer("Walls"));
        let tiles = grid.add_tile_layer("Walls");

        assert_eq!(grid.find_layer("Walls"), Some(0));
        assert_eq!(grid.find_tile_layer("Walls"), Some(tiles));
        assert_eq!(grid.find_tile_layer("Missing"), None);
    }

    #[test]
    fn test_insert_layer_clamps_index() {
        let mut grid = Grid::new("test", 1, 1);
        grid.add_tile_layer("a");
        let idx = grid.insert_layer(10, Layer::new_tile_layer("b", 1, 1));
        assert_eq!(idx, 1);
        let idx = grid.insert_layer(0, Layer::new_tile_layer("c", 1, 1));
        assert_eq!(idx, 0);
        let names: Vec<&str> = grid.layers.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_validate_detects_size_mismatch() {
        let mut grid = Grid::new("test", 3, 3);
        grid.add_tile_layer("ok");
        assert!(grid.validate().is_ok());

        grid.add_layer(Layer::new_tile_layer("bad", 2, 2));
        assert_eq!(
            grid.validate(),
            Err(GridError::LayerSizeMismatch {
                layer: "bad".to_string(),
                expected: 9,
                actual: 4,
            })
        );
    }
}
