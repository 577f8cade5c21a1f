//! Pass options, the rule set descriptor, and the loader interface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tilemap_core::Grid;

use crate::{DescriptorError, LoadError, RuleMap};

/// Global options for one [`Automapper::apply_rules`](crate::Automapper::apply_rules) call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AutomapOptions {
    /// Patterns wrap around the left/right edges
    pub wrap_x: bool,
    /// Patterns wrap around the top/bottom edges
    pub wrap_y: bool,
    /// Apply every matching sibling and skip overlap suppression
    pub match_all: bool,
    /// Empty output cells erase the target cell instead of leaving it alone
    pub clear_on_empty_output: bool,
    /// Seed for sibling selection
    pub seed: u64,
}

/// Cooperative cancellation for a running pass, polled once per anchor.
pub trait CancelFlag {
    fn is_cancelled(&self) -> bool;
}

impl CancelFlag for AtomicBool {
    fn is_cancelled(&self) -> bool {
        self.load(Ordering::Relaxed)
    }
}

/// Supplies rule map grids by identifier. Implemented by the caller's file layer.
pub trait GridLoader {
    fn load_grid(&mut self, identifier: &str) -> Result<Grid, LoadError>;
}

/// In-memory loader, mostly useful for tests and embedded rule sets
impl GridLoader for HashMap<String, Grid> {
    fn load_grid(&mut self, identifier: &str) -> Result<Grid, LoadError> {
        self.get(identifier)
            .cloned()
            .ok_or_else(|| LoadError::NotFound(identifier.to_string()))
    }
}

/// Ordered rule map identifiers plus the options to run them with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSetDescriptor {
    pub rule_maps: Vec<String>,
    #[serde(default)]
    pub options: AutomapOptions,
}

impl RuleSetDescriptor {
    /// Decode the JSON form: `{"ruleMaps": [...], "options": {...}}`
    pub fn from_json(json: &str) -> Result<Self, DescriptorError> {
        serde_json::from_str(json).map_err(|e| DescriptorError::Parse(e.to_string()))
    }

    /// Encode as pretty-printed JSON
    pub fn to_json(&self) -> Result<String, DescriptorError> {
        serde_json::to_string_pretty(self).map_err(|e| DescriptorError::Parse(e.to_string()))
    }

    /// Parse the plain text form: one identifier per line.
    ///
    /// Blank lines and lines starting with `#` or `//` are skipped. Options
    /// keep their defaults.
    pub fn parse_text(text: &str) -> Self {
        let rule_maps = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with("//"))
            .map(str::to_string)
            .collect();
        Self {
            rule_maps,
            options: AutomapOptions::default(),
        }
    }

    /// Load every listed rule map through `loader`, in order.
    ///
    /// This runs on the caller's side before automapping; the engine itself
    /// never loads anything.
    pub fn load_rule_maps(&self, loader: &mut impl GridLoader) -> Result<Vec<RuleMap>, LoadError> {
        self.rule_maps
            .iter()
            .map(|identifier| {
                let grid = loader.load_grid(identifier)?;
                Ok(RuleMap::new(identifier.clone(), grid))
            })
            .collect()
    }
}
