//! Error types for each stage of an automapping pass.

use thiserror::Error;
use tilemap_core::{Cell, GridError};
use uuid::Uuid;

/// Problems found while splitting a rule map into rules.
///
/// Everything except [`MalformedGrid`](DecomposeError::MalformedGrid) concerns a
/// single rule id: that rule is dropped and the rest of the rule map survives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecomposeError {
    #[error("rule {rule_id} has no region")]
    MissingRegion { rule_id: u32 },
    #[error("rule {rule_id} has {count} separate regions, expected one")]
    MultipleRegions { rule_id: u32, count: usize },
    #[error("rule {rule_id} has no output layer")]
    MissingOutput { rule_id: u32 },
    #[error("rule {rule_id} has neither input nor inputnot layers")]
    NoInputLayers { rule_id: u32 },
    #[error(
        "rule {rule_id} both requires and forbids a tile on layer '{layer}' at ({}, {})",
        .cell.x,
        .cell.y
    )]
    ConflictingConstraint { rule_id: u32, layer: String, cell: Cell },
    #[error("malformed rule map: {0}")]
    MalformedGrid(#[from] GridError),
}

impl DecomposeError {
    /// The rule this error concerns, if it is rule-specific
    pub fn rule_id(&self) -> Option<u32> {
        match self {
            DecomposeError::MissingRegion { rule_id }
            | DecomposeError::MultipleRegions { rule_id, .. }
            | DecomposeError::MissingOutput { rule_id }
            | DecomposeError::NoInputLayers { rule_id }
            | DecomposeError::ConflictingConstraint { rule_id, .. } => Some(*rule_id),
            DecomposeError::MalformedGrid(_) => None,
        }
    }
}

/// Problems writing edits into a grid
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("layer '{layer}' exists but is not a tile layer")]
    LayerKindMismatch { layer: String },
    #[error("no tile layer named '{layer}'")]
    MissingLayer { layer: String },
    #[error("cell ({}, {}) is outside layer '{layer}'", .cell.x, .cell.y)]
    OutOfBounds { layer: String, cell: Cell },
}

/// Failures that abort a whole [`Automapper::apply_rules`](crate::Automapper::apply_rules) call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestrationError {
    #[error("an automapping pass is already running for grid {0}")]
    Busy(Uuid),
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),
}

/// Errors reported by a [`GridLoader`](crate::GridLoader)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("rule map not found: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Errors decoding a [`RuleSetDescriptor`](crate::RuleSetDescriptor)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("Parse error: {0}")]
    Parse(String),
}
