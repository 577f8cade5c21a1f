//! Rule-map driven automapping engine for tile grids.
//!
//! The primary entry point is [`Automapper::apply_rules`], which runs an ordered
//! list of [`RuleMap`]s against a target [`Grid`](tilemap_core::Grid) and
//! returns an [`EditBatch`] plus [`Diagnostics`]. The target is never modified;
//! the caller applies the batch (e.g. through [`EditBatch::apply_to`]) inside
//! its own undo step.
//!
//! The stages are usable on their own:
//! - [`decompose`] splits a rule map grid into [`Rule`]s and [`RuleFamily`]s
//! - [`matches_at`] / [`find_matches`] test a rule against a grid
//! - [`apply`] turns accepted anchors into edits
//! - [`select_sibling`] picks among siblings matching at the same anchor
//!
//! Loading rule maps from disk is the caller's job; see [`GridLoader`] and
//! [`RuleSetDescriptor`].

mod apply;
mod config;
mod decompose;
mod diagnostics;
mod edit;
mod error;
mod matcher;
mod orchestrator;
mod types;

pub use apply::{apply, insertion_hint, layer_prefix, select_sibling, Applied};
pub use config::{AutomapOptions, CancelFlag, GridLoader, RuleSetDescriptor};
pub use decompose::decompose;
pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics, Severity};
pub use edit::{Edit, EditBatch, InsertionHint};
pub use error::{ApplyError, DecomposeError, DescriptorError, LoadError, OrchestrationError};
pub use matcher::{candidate_anchors, find_matches, matches_at, resolve_search_region, wrap_cell};
pub use orchestrator::{Automapper, PassState};
pub use types::{
    DecomposedRuleMap, Pattern, Region, Rule, RuleFamily, RuleMap, RuleMapSettings,
};

pub use tilemap_core;
