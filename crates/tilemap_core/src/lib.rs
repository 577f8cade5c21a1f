//! Core data structures for tilemap_automap
//!
//! This crate provides the plain-data types the automapping engine works on:
//! - `Grid` - A tile map: a stack of layers over a fixed cell grid
//! - `Layer` - A single layer (tiles or objects)
//! - `TileRef` - A tile of a tileset, with flip flags
//! - `Cell` / `Rect` - Integer grid coordinates
//! - `Value` - Custom property value type

mod geometry;
mod grid;
mod layer;
mod tile;
mod value;

pub use geometry::{Cell, Rect};
pub use grid::{Grid, GridError};
pub use layer::{Layer, LayerData, LayerKind};
pub use tile::TileRef;
pub use value::Value;
