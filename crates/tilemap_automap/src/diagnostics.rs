//! Non-fatal findings collected during an automapping pass.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::DecomposeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// What a [`Diagnostic`] is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticKind {
    MissingRegion,
    MultipleRegions,
    MissingOutput,
    NoInputLayers,
    ConflictingConstraint,
    /// Rule map layers disagree with the rule map's own size
    MalformedRuleMap,
    /// A rule map layer whose name follows none of the naming conventions
    UnrecognizedLayer,
    /// An output layer names an existing non-tile layer in the target
    LayerKindMismatch,
    /// Writes dropped because an earlier rule map already wrote those cells
    OverriddenByEarlierRuleMap,
    RuleMapDisabled,
    Cancelled,
    Summary,
}

impl DiagnosticKind {
    pub fn of_decompose_error(err: &DecomposeError) -> Self {
        match err {
            DecomposeError::MissingRegion { .. } => DiagnosticKind::MissingRegion,
            DecomposeError::MultipleRegions { .. } => DiagnosticKind::MultipleRegions,
            DecomposeError::MissingOutput { .. } => DiagnosticKind::MissingOutput,
            DecomposeError::NoInputLayers { .. } => DiagnosticKind::NoInputLayers,
            DecomposeError::ConflictingConstraint { .. } => DiagnosticKind::ConflictingConstraint,
            DecomposeError::MalformedGrid(_) => DiagnosticKind::MalformedRuleMap,
        }
    }
}

/// One record for the caller's UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
    /// Identifier of the rule map this concerns, empty for pass-level records
    pub rule_map: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<u32>,
}

impl Diagnostic {
    pub fn new(
        severity: Severity,
        kind: DiagnosticKind,
        rule_map: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
            rule_map: rule_map.into(),
            rule_id: None,
        }
    }

    pub fn with_rule(mut self, rule_id: u32) -> Self {
        self.rule_id = Some(rule_id);
        self
    }

    /// A dropped rule. Always an error-level record.
    pub fn from_decompose_error(rule_map: &str, err: &DecomposeError) -> Self {
        let diagnostic = Self::new(
            Severity::Error,
            DiagnosticKind::of_decompose_error(err),
            rule_map,
            err.to_string(),
        );
        match err.rule_id() {
            Some(id) => diagnostic.with_rule(id),
            None => diagnostic,
        }
    }
}

/// Ordered diagnostics of one pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostics {
    records: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a diagnostic and mirror it to the log
    pub fn push(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Warning | Severity::Error => warn!(
                rule_map = %diagnostic.rule_map,
                rule_id = ?diagnostic.rule_id,
                "[automap] {:?}: {}",
                diagnostic.kind,
                diagnostic.message
            ),
            Severity::Info => debug!(
                rule_map = %diagnostic.rule_map,
                "[automap] {:?}: {}",
                diagnostic.kind,
                diagnostic.message
            ),
        }
        self.records.push(diagnostic);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records of one kind, in order
    pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.records.iter().filter(move |d| d.kind == kind)
    }

    pub fn has_errors(&self) -> bool {
        self.records.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.records
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}
