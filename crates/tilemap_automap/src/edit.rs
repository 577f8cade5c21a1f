//! The edit batch: the only thing an automapping pass produces.
//!
//! A batch is an ordered list of [`Edit`]s. The caller's command layer applies
//! it as one undoable step; [`EditBatch::apply_to`] is the reference
//! implementation of that application.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tilemap_core::{Cell, Grid, Layer, LayerKind, Rect, TileRef};

use crate::ApplyError;

/// Where a newly created layer goes in the target's layer stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InsertionHint {
    /// Directly above the topmost layer with this name
    AboveLayer(String),
    /// On top of the stack
    Top,
}

/// A primitive grid mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Edit {
    /// Create the layer unless a layer of that name and kind exists
    EnsureLayer {
        layer: String,
        kind: LayerKind,
        hint: InsertionHint,
    },
    /// Write one cell. `tile: None` erases it.
    SetTile {
        layer: String,
        cell: Cell,
        tile: Option<TileRef>,
    },
}

/// Ordered edits with at most one `SetTile` per (layer, cell).
///
/// Writing a cell twice keeps the first entry's position and the last value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Edit>", into = "Vec<Edit>")]
pub struct EditBatch {
    edits: Vec<Edit>,
    tile_index: HashMap<(String, Cell), usize>,
    ensured: HashSet<String>,
}

impl EditBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn edits(&self) -> &[Edit] {
        &self.edits
    }

    pub fn iter(&self) -> impl Iterator<Item = &Edit> {
        self.edits.iter()
    }

    pub fn len(&self) -> usize {
        self.edits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Number of `SetTile` entries
    pub fn set_tile_count(&self) -> usize {
        self.tile_index.len()
    }

    /// True if this batch creates the named layer
    pub fn ensures_layer(&self, layer: &str) -> bool {
        self.ensured.contains(layer)
    }

    /// Record a layer creation. Repeated requests for one name are ignored.
    pub fn push_ensure_layer(&mut self, layer: impl Into<String>, kind: LayerKind, hint: InsertionHint) {
        let layer = layer.into();
        if !self.ensured.insert(layer.clone()) {
            return;
        }
        self.edits.push(Edit::EnsureLayer { layer, kind, hint });
    }

    /// Record a cell write, replacing the value of an earlier write to the same cell
    pub fn push_set_tile(&mut self, layer: impl Into<String>, cell: Cell, tile: Option<TileRef>) {
        let layer = layer.into();
        let key = (layer, cell);
        if let Some(&idx) = self.tile_index.get(&key) {
            if let Some(Edit::SetTile { tile: slot, .. }) = self.edits.get_mut(idx) {
                *slot = tile;
            }
            return;
        }
        let (layer, cell) = key.clone();
        self.tile_index.insert(key, self.edits.len());
        self.edits.push(Edit::SetTile { layer, cell, tile });
    }

    /// Value this batch writes to a cell: `None` if the cell is untouched,
    /// `Some(None)` if it is erased.
    pub fn pending_tile(&self, layer: &str, cell: Cell) -> Option<Option<TileRef>> {
        let idx = *self.tile_index.get(&(layer.to_string(), cell))?;
        match self.edits.get(idx) {
            Some(Edit::SetTile { tile, .. }) => Some(*tile),
            _ => None,
        }
    }

    /// Append another batch, in order
    pub fn extend(&mut self, other: EditBatch) {
        for edit in other.edits {
            self.push(edit);
        }
    }

    pub fn push(&mut self, edit: Edit) {
        match edit {
            Edit::EnsureLayer { layer, kind, hint } => self.push_ensure_layer(layer, kind, hint),
            Edit::SetTile { layer, cell, tile } => self.push_set_tile(layer, cell, tile),
        }
    }

    /// Every (layer, cell) written, in batch order
    pub fn touched_cells(&self) -> Vec<(&str, Cell)> {
        self.edits
            .iter()
            .filter_map(|edit| match edit {
                Edit::SetTile { layer, cell, .. } => Some((layer.as_str(), *cell)),
                Edit::EnsureLayer { .. } => None,
            })
            .collect()
    }

    /// Bounding rectangle of all written cells, empty if nothing is written
    pub fn touched_region(&self) -> Rect {
        self.touched_cells()
            .into_iter()
            .fold(Rect::default(), |acc, (_, cell)| {
                acc.union(&Rect::new(cell.x, cell.y, 1, 1))
            })
    }

    /// Apply every edit to `grid`, in order.
    ///
    /// Stops at the first edit that cannot be applied; earlier edits stay applied.
    pub fn apply_to(&self, grid: &mut Grid) -> Result<(), ApplyError> {
        for edit in &self.edits {
            match edit {
                Edit::EnsureLayer { layer, kind, hint } => {
                    ensure_layer(grid, layer, *kind, hint)?;
                }
                Edit::SetTile { layer, cell, tile } => {
                    let idx = grid.find_tile_layer(layer).ok_or_else(|| {
                        if grid.find_layer(layer).is_some() {
                            ApplyError::LayerKindMismatch {
                                layer: layer.clone(),
                            }
                        } else {
                            ApplyError::MissingLayer {
                                layer: layer.clone(),
                            }
                        }
                    })?;
                    if !grid.set_tile(idx, *cell, *tile) {
                        return Err(ApplyError::OutOfBounds {
                            layer: layer.clone(),
                            cell: *cell,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

fn ensure_layer(
    grid: &mut Grid,
    name: &str,
    kind: LayerKind,
    hint: &InsertionHint,
) -> Result<(), ApplyError> {
    if grid.layers.iter().any(|l| l.name == name && l.kind() == kind) {
        return Ok(());
    }
    if kind == LayerKind::Tiles && grid.find_layer(name).is_some() {
        return Err(ApplyError::LayerKindMismatch {
            layer: name.to_string(),
        });
    }

    let layer = Layer::new_of_kind(name, kind, grid.width, grid.height);
    let index = match hint {
        InsertionHint::AboveLayer(below) => grid
            .layers
            .iter()
            .rposition(|l| &l.name == below)
            .map(|i| i + 1)
            .unwrap_or(grid.layers.len()),
        InsertionHint::Top => grid.layers.len(),
    };
    grid.insert_layer(index, layer);
    Ok(())
}

impl From<Vec<Edit>> for EditBatch {
    fn from(edits: Vec<Edit>) -> Self {
        let mut batch = EditBatch::new();
        for edit in edits {
            batch.push(edit);
        }
        batch
    }
}

impl From<EditBatch> for Vec<Edit> {
    fn from(batch: EditBatch) -> Self {
        batch.edits
    }
}
