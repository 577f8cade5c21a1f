//! Data types for the automapping engine.
//!
//! A [`RuleMap`] is a loaded [`Grid`] whose layer names follow the automapping
//! conventions. Decomposing it yields [`Rule`]s, grouped into [`RuleFamily`]s
//! of competing siblings.

use serde::{Deserialize, Serialize};
use tilemap_core::{Grid, Rect, TileRef};

use crate::{AutomapOptions, DecomposeError};

// ─── RuleMap ─────────────────────────────────────────────────────────────────

/// A rule map handed in by the caller, already loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleMap {
    /// Identifier the rule map was loaded from (used in diagnostics and as cache key)
    pub identifier: String,
    /// Bumped by the caller whenever the rule map is reloaded; a new revision
    /// invalidates cached rules.
    #[serde(default)]
    pub revision: u64,
    pub grid: Grid,
}

impl RuleMap {
    pub fn new(identifier: impl Into<String>, grid: Grid) -> Self {
        Self {
            identifier: identifier.into(),
            revision: 0,
            grid,
        }
    }

    pub fn with_revision(mut self, revision: u64) -> Self {
        self.revision = revision;
        self
    }
}

// ─── Region ──────────────────────────────────────────────────────────────────

/// The extent of one rule inside its rule map.
///
/// `bounds` is in rule map coordinates. `mask` is row-major over `bounds` and
/// marks the cells that actually belong to the region, so irregular regions
/// leave holes in their bounding box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub bounds: Rect,
    pub mask: Vec<bool>,
}

impl Region {
    /// A fully filled rectangular region
    pub fn rect(bounds: Rect) -> Self {
        Self {
            bounds,
            mask: vec![true; bounds.area()],
        }
    }

    pub fn width(&self) -> u32 {
        self.bounds.width
    }

    pub fn height(&self) -> u32 {
        self.bounds.height
    }

    /// True if the region-local offset belongs to the region
    pub fn contains_offset(&self, dx: i32, dy: i32) -> bool {
        if dx < 0 || dy < 0 || dx >= self.bounds.width as i32 || dy >= self.bounds.height as i32 {
            return false;
        }
        let idx = dy as usize * self.bounds.width as usize + dx as usize;
        self.mask.get(idx).copied().unwrap_or(false)
    }

    /// Region-local offsets of all member cells, row-major
    pub fn offsets(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        let w = self.bounds.width as i32;
        self.mask
            .iter()
            .enumerate()
            .filter(|(_, inside)| **inside)
            .map(move |(i, _)| (i as i32 % w, i as i32 / w))
    }

    pub fn cell_count(&self) -> usize {
        self.mask.iter().filter(|inside| **inside).count()
    }

    /// Two regions compete for the same anchors when their shapes are equal,
    /// wherever they sit in the rule map.
    pub fn same_shape(&self, other: &Region) -> bool {
        self.bounds.width == other.bounds.width
            && self.bounds.height == other.bounds.height
            && self.mask == other.mask
    }
}

// ─── Pattern ─────────────────────────────────────────────────────────────────

/// One rule layer cropped to its region, in region-local coordinates.
///
/// Cells outside the region mask are always empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pattern {
    pub width: u32,
    pub height: u32,
    /// Row-major, `width * height` entries
    pub tiles: Vec<Option<TileRef>>,
}

impl Pattern {
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tiles: vec![None; width as usize * height as usize],
        }
    }

    pub fn get(&self, dx: i32, dy: i32) -> Option<TileRef> {
        if dx < 0 || dy < 0 || dx >= self.width as i32 || dy >= self.height as i32 {
            return None;
        }
        let idx = dy as usize * self.width as usize + dx as usize;
        self.tiles.get(idx).copied().flatten()
    }

    /// Non-empty cells as `(dx, dy, tile)`, row-major
    pub fn constraints(&self) -> impl Iterator<Item = (i32, i32, TileRef)> + '_ {
        let w = self.width as i32;
        self.tiles
            .iter()
            .enumerate()
            .filter_map(move |(i, t)| t.map(|tile| (i as i32 % w, i as i32 / w, tile)))
    }

    /// True if no cell holds a tile (a pure wildcard layer)
    pub fn is_blank(&self) -> bool {
        self.tiles.iter().all(Option::is_none)
    }
}

// ─── Rule ────────────────────────────────────────────────────────────────────

/// A single automapping rule, derived from a rule map.
///
/// A rule fires at an anchor when every non-empty cell of every input layer
/// equals the target tile under it, and no non-empty cell of an input-not
/// layer does. Layer lists keep the rule map's stack order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Numeric suffix shared by this rule's layers and region tile
    pub id: u32,
    pub region: Region,
    pub input_layers: Vec<(String, Pattern)>,
    pub input_not_layers: Vec<(String, Pattern)>,
    pub output_layers: Vec<(String, Pattern)>,
    /// Relative weight among siblings, `None` when unset
    #[serde(default)]
    pub probability: Option<f64>,
}

impl Rule {
    pub fn input_layer(&self, name: &str) -> Option<&Pattern> {
        find_pattern(&self.input_layers, name)
    }

    pub fn input_not_layer(&self, name: &str) -> Option<&Pattern> {
        find_pattern(&self.input_not_layers, name)
    }

    pub fn output_layer(&self, name: &str) -> Option<&Pattern> {
        find_pattern(&self.output_layers, name)
    }
}

fn find_pattern<'a>(layers: &'a [(String, Pattern)], name: &str) -> Option<&'a Pattern> {
    layers.iter().find(|(n, _)| n == name).map(|(_, p)| p)
}

/// Rules with identical region shapes. At any anchor at most one of them
/// fires, unless `match_all` is in effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleFamily {
    /// Indices into [`DecomposedRuleMap::rules`], ascending rule id
    pub members: Vec<usize>,
    /// True once any member carries a probability
    pub weighted: bool,
}

// ─── Rule map settings ───────────────────────────────────────────────────────

/// Settings read from a rule map's own properties.
///
/// `Some` values override the caller's [`AutomapOptions`] for this rule map only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleMapSettings {
    pub wrap_x: Option<bool>,
    pub wrap_y: Option<bool>,
    pub match_all: Option<bool>,
    pub clear_on_empty_output: Option<bool>,
    /// Pick uniformly among matching unweighted siblings instead of the first
    pub random_siblings: bool,
    pub disabled: bool,
}

impl RuleMapSettings {
    /// Merge these overrides over the caller's options
    pub fn effective(&self, options: &AutomapOptions) -> AutomapOptions {
        AutomapOptions {
            wrap_x: self.wrap_x.unwrap_or(options.wrap_x),
            wrap_y: self.wrap_y.unwrap_or(options.wrap_y),
            match_all: self.match_all.unwrap_or(options.match_all),
            clear_on_empty_output: self
                .clear_on_empty_output
                .unwrap_or(options.clear_on_empty_output),
            seed: options.seed,
        }
    }
}

/// Everything derived from one rule map; cached for the rule map's lifetime.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecomposedRuleMap {
    /// Valid rules, ascending id
    pub rules: Vec<Rule>,
    /// Sibling groups in processing order
    pub families: Vec<RuleFamily>,
    pub settings: RuleMapSettings,
    /// Per-rule problems; the affected rules are absent from `rules`
    pub issues: Vec<DecomposeError>,
    /// Layer names that follow no naming convention
    pub unrecognized_layers: Vec<String>,
}

impl DecomposedRuleMap {
    pub fn rule(&self, id: u32) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    /// Largest region side among all rules, 0 without rules
    pub fn max_region_extent(&self) -> u32 {
        self.rules
            .iter()
            .map(|r| r.region.width().max(r.region.height()))
            .max()
            .unwrap_or(0)
    }
}
