//! The orchestrator: runs rule maps in order against one target grid.
//!
//! [`Automapper`] is the caller-owned context. It caches decomposed rule maps
//! and tracks which target grids have a pass in flight. Everything below
//! [`Automapper::apply_rules`] is an internal helper.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use rand::rngs::SmallRng;
use rand::SeedableRng;
use tilemap_core::{Cell, Grid, Rect};
use tracing::{debug, info};
use uuid::Uuid;

use crate::apply::{apply, select_sibling};
use crate::decompose::decompose;
use crate::matcher::{candidate_anchors, matches_at, resolve_search_region, wrap_cell};
use crate::{
    AutomapOptions, CancelFlag, DecomposedRuleMap, Diagnostic, DiagnosticKind, Diagnostics, Edit, EditBatch,
    OrchestrationError, Region, Rule, RuleMap, Severity,
};

/// Where a target grid's pass currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassState {
    #[default]
    Idle,
    Loading,
    Matching,
    Applying,
}

#[derive(Debug)]
struct CachedRuleMap {
    revision: u64,
    rules: Arc<DecomposedRuleMap>,
}

/// Caller-owned automapping context.
///
/// One `Automapper` can serve several documents: the rule cache is shared
/// read-only, and each target grid (by [`Grid::id`]) runs at most one pass at
/// a time.
#[derive(Debug, Default)]
pub struct Automapper {
    cache: RwLock<HashMap<String, CachedRuleMap>>,
    passes: Mutex<HashMap<Uuid, PassState>>,
}

impl Automapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current pass state of a target grid
    pub fn state(&self, grid: Uuid) -> PassState {
        self.passes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&grid)
            .copied()
            .unwrap_or_default()
    }

    /// Drop the cached rules of one rule map, e.g. after it was reloaded
    pub fn invalidate(&self, identifier: &str) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identifier);
    }

    pub fn clear_cache(&self) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of rule maps with cached rules
    pub fn cached_rule_maps(&self) -> usize {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Decomposed rules of a rule map, from cache when the revision matches.
    pub fn rules_for(&self, rule_map: &RuleMap) -> Result<Arc<DecomposedRuleMap>, OrchestrationError> {
        if let Some(cached) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&rule_map.identifier)
            .filter(|cached| cached.revision == rule_map.revision)
        {
            return Ok(Arc::clone(&cached.rules));
        }

        let decomposed = decompose(&rule_map.grid).map_err(|e| {
            OrchestrationError::DimensionMismatch(format!("rule map '{}': {e}", rule_map.identifier))
        })?;
        let rules = Arc::new(decomposed);
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                rule_map.identifier.clone(),
                CachedRuleMap {
                    revision: rule_map.revision,
                    rules: Arc::clone(&rules),
                },
            );
        debug!(
            "[automap] cached rule map '{}' revision {}",
            rule_map.identifier, rule_map.revision
        );
        Ok(rules)
    }

    /// Largest region side across all rule maps.
    ///
    /// Use it as the margin around an edited rectangle when re-applying
    /// rules incrementally: `edited.expanded(margin)`.
    pub fn max_region_extent(&self, rule_maps: &[RuleMap]) -> Result<u32, OrchestrationError> {
        let mut extent = 0;
        for rule_map in rule_maps {
            extent = extent.max(self.rules_for(rule_map)?.max_region_extent());
        }
        Ok(extent)
    }

    /// Run `rule_maps` in order against `target` and return the resulting edits.
    ///
    /// `target` is not modified; later rule maps see the edits of earlier ones
    /// through an internal working copy. `search_region` bounds the anchors
    /// considered (`None` = whole grid). `cancel` is polled once per anchor; on
    /// cancellation the edits produced so far are returned with a `Cancelled`
    /// diagnostic.
    ///
    /// Fails without producing edits if a pass for the same grid is already
    /// running, or if the target or a rule map is structurally unusable.
    pub fn apply_rules(
        &self,
        target: &Grid,
        rule_maps: &[RuleMap],
        search_region: Option<Rect>,
        options: &AutomapOptions,
        cancel: Option<&dyn CancelFlag>,
    ) -> Result<(EditBatch, Diagnostics), OrchestrationError> {
        target.validate().map_err(|e| {
            OrchestrationError::DimensionMismatch(format!("target grid '{}': {e}", target.name))
        })?;

        let guard = PassGuard::begin(&self.passes, target.id)?;

        let mut loaded = Vec::with_capacity(rule_maps.len());
        for rule_map in rule_maps {
            let rules = self.rules_for(rule_map)?;
            let effective = rules.settings.effective(options);
            if !rules.settings.disabled {
                check_regions_fit(target, rule_map, &rules, &effective)?;
            }
            loaded.push((rule_map, rules, effective));
        }

        let mut pass = Pass {
            guard: &guard,
            working: target.clone(),
            batch: EditBatch::new(),
            diagnostics: Diagnostics::new(),
            rng: SmallRng::seed_from_u64(options.seed),
            written_by: HashMap::new(),
            anchors_applied: 0,
        };

        for (map_index, (rule_map, rules, effective)) in loaded.iter().enumerate() {
            let flow = pass.run_rule_map(map_index, rule_map, rules, effective, search_region, cancel);
            if flow == Flow::Cancelled {
                break;
            }
        }

        info!(
            "[automap] pass over '{}' finished: {} rule maps, {} anchors applied, {} edits",
            target.name,
            rule_maps.len(),
            pass.anchors_applied,
            pass.batch.len()
        );
        pass.diagnostics.push(Diagnostic::new(
            Severity::Info,
            DiagnosticKind::Summary,
            "",
            format!(
                "{} rule maps, {} anchors applied, {} cells touched",
                rule_maps.len(),
                pass.anchors_applied,
                pass.batch.set_tile_count()
            ),
        ));

        Ok((pass.batch, pass.diagnostics))
    }
}

/// Without wrapping, a region larger than the target can never be placed.
fn check_regions_fit(
    target: &Grid,
    rule_map: &RuleMap,
    rules: &DecomposedRuleMap,
    options: &AutomapOptions,
) -> Result<(), OrchestrationError> {
    for rule in &rules.rules {
        let too_wide = !options.wrap_x && rule.region.width() > target.width;
        let too_tall = !options.wrap_y && rule.region.height() > target.height;
        if too_wide || too_tall {
            return Err(OrchestrationError::DimensionMismatch(format!(
                "rule {} of '{}' needs {}x{} cells but the target is {}x{}",
                rule.id,
                rule_map.identifier,
                rule.region.width(),
                rule.region.height(),
                target.width,
                target.height
            )));
        }
    }
    Ok(())
}

// ─── Pass bookkeeping ────────────────────────────────────────────────────────

/// Marks a grid busy for the lifetime of the guard
struct PassGuard<'a> {
    passes: &'a Mutex<HashMap<Uuid, PassState>>,
    grid: Uuid,
}

impl<'a> PassGuard<'a> {
    fn begin(passes: &'a Mutex<HashMap<Uuid, PassState>>, grid: Uuid) -> Result<Self, OrchestrationError> {
        let mut map = passes.lock().unwrap_or_else(PoisonError::into_inner);
        if map.contains_key(&grid) {
            return Err(OrchestrationError::Busy(grid));
        }
        map.insert(grid, PassState::Loading);
        debug!("[automap] grid {grid}: Idle -> Loading");
        Ok(Self { passes, grid })
    }

    fn set(&self, state: PassState) {
        let mut map = self.passes.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = map.get_mut(&self.grid) {
            if *current != state {
                debug!("[automap] grid {}: {:?} -> {:?}", self.grid, current, state);
                *current = state;
            }
        }
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.passes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.grid);
        debug!("[automap] grid {}: -> Idle", self.grid);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Cancelled,
}

/// Mutable state of one `apply_rules` call
struct Pass<'g> {
    guard: &'g PassGuard<'g>,
    /// Target plus every edit accepted so far
    working: Grid,
    batch: EditBatch,
    diagnostics: Diagnostics,
    rng: SmallRng,
    /// Which rule map (by position) last wrote each (layer, cell)
    written_by: HashMap<(String, Cell), usize>,
    anchors_applied: usize,
}

/// Per rule map counters
#[derive(Debug, Default)]
struct MapStats {
    anchors: usize,
    touched: HashSet<(String, Cell)>,
    overridden: usize,
}

impl Pass<'_> {
    fn run_rule_map(
        &mut self,
        map_index: usize,
        rule_map: &RuleMap,
        rules: &DecomposedRuleMap,
        options: &AutomapOptions,
        search_region: Option<Rect>,
        cancel: Option<&dyn CancelFlag>,
    ) -> Flow {
        let identifier = rule_map.identifier.as_str();
        if rules.settings.disabled {
            self.diagnostics.push(Diagnostic::new(
                Severity::Info,
                DiagnosticKind::RuleMapDisabled,
                identifier,
                "rule map is disabled",
            ));
            return Flow::Continue;
        }

        for issue in &rules.issues {
            self.diagnostics
                .push(Diagnostic::from_decompose_error(identifier, issue));
        }
        for layer in &rules.unrecognized_layers {
            self.diagnostics.push(Diagnostic::new(
                Severity::Warning,
                DiagnosticKind::UnrecognizedLayer,
                identifier,
                format!("layer '{layer}' is not a regions, input, inputnot or output layer"),
            ));
        }

        let search = resolve_search_region(&self.working, search_region);
        let mut consumed: HashSet<Cell> = HashSet::new();
        let mut stats = MapStats::default();
        let mut reported: HashSet<(u32, String)> = HashSet::new();

        for family in &rules.families {
            let members: Vec<&Rule> = family
                .members
                .iter()
                .filter_map(|&idx| rules.rules.get(idx))
                .collect();
            let Some(first) = members.first() else {
                continue;
            };

            // Match every anchor against the state before this family runs.
            self.guard.set(PassState::Matching);
            let mut accepted: Vec<(Cell, &Rule)> = Vec::new();
            for anchor in candidate_anchors(&self.working, &first.region, search, options) {
                if cancel.is_some_and(|flag| flag.is_cancelled()) {
                    self.diagnostics.push(Diagnostic::new(
                        Severity::Warning,
                        DiagnosticKind::Cancelled,
                        identifier,
                        format!(
                            "cancelled at anchor ({}, {}); {} edits kept",
                            anchor.x,
                            anchor.y,
                            self.batch.len()
                        ),
                    ));
                    return Flow::Cancelled;
                }

                let cells = region_cells(&self.working, &first.region, anchor, options);
                if !options.match_all && cells.iter().any(|c| consumed.contains(c)) {
                    continue;
                }

                let matching: Vec<&Rule> = members
                    .iter()
                    .copied()
                    .filter(|rule| matches_at(&self.working, rule, anchor, options))
                    .collect();
                if matching.is_empty() {
                    continue;
                }

                if options.match_all {
                    accepted.extend(matching.into_iter().map(|rule| (anchor, rule)));
                    continue;
                }

                let Some(chosen) = select_sibling(
                    &matching,
                    family.weighted,
                    rules.settings.random_siblings,
                    &mut self.rng,
                ) else {
                    continue;
                };
                consumed.extend(cells);
                accepted.push((anchor, chosen));
            }

            self.guard.set(PassState::Applying);
            for (anchor, rule) in accepted {
                let applied = apply(&self.working, &[anchor], rule, options);
                for err in applied.errors {
                    if reported.insert((rule.id, err.to_string())) {
                        self.diagnostics.push(
                            Diagnostic::new(
                                Severity::Warning,
                                DiagnosticKind::LayerKindMismatch,
                                identifier,
                                format!("{err}; output skipped"),
                            )
                            .with_rule(rule.id),
                        );
                    }
                }
                self.merge(map_index, identifier, applied.batch, &mut stats);
                stats.anchors += 1;
            }
        }

        self.anchors_applied += stats.anchors;
        if stats.overridden > 0 {
            self.diagnostics.push(Diagnostic::new(
                Severity::Warning,
                DiagnosticKind::OverriddenByEarlierRuleMap,
                identifier,
                format!(
                    "{} writes dropped: cells already written by an earlier rule map",
                    stats.overridden
                ),
            ));
        }
        self.diagnostics.push(Diagnostic::new(
            Severity::Info,
            DiagnosticKind::Summary,
            identifier,
            format!(
                "{} rules, {} anchors applied, {} cells touched",
                rules.rules.len(),
                stats.anchors,
                stats.touched.len()
            ),
        ));
        Flow::Continue
    }

    /// Move one applied piece into the call's batch and working grid, dropping
    /// writes to cells an earlier rule map already wrote.
    fn merge(&mut self, map_index: usize, identifier: &str, piece: EditBatch, stats: &mut MapStats) {
        let edits: Vec<Edit> = piece.into();

        let mut surviving_layers: HashSet<String> = HashSet::new();
        let mut keep = vec![false; edits.len()];
        for (idx, edit) in edits.iter().enumerate() {
            let Edit::SetTile { layer, cell, .. } = edit else {
                continue;
            };
            let key = (layer.clone(), *cell);
            if self.written_by.get(&key).is_some_and(|&owner| owner < map_index) {
                stats.overridden += 1;
                continue;
            }
            self.written_by.insert(key.clone(), map_index);
            stats.touched.insert(key);
            surviving_layers.insert(layer.clone());
            if let Some(slot) = keep.get_mut(idx) {
                *slot = true;
            }
        }

        let mut kept = EditBatch::new();
        for (edit, keep_set_tile) in edits.into_iter().zip(keep) {
            let wanted = match &edit {
                Edit::EnsureLayer { layer, .. } => surviving_layers.contains(layer),
                Edit::SetTile { .. } => keep_set_tile,
            };
            if wanted {
                kept.push(edit);
            }
        }

        if let Err(err) = kept.apply_to(&mut self.working) {
            self.diagnostics.push(Diagnostic::new(
                Severity::Warning,
                DiagnosticKind::LayerKindMismatch,
                identifier,
                err.to_string(),
            ));
        }
        self.batch.extend(kept);
    }
}

/// Target cells covered by a region placed at `anchor`
fn region_cells(grid: &Grid, region: &Region, anchor: Cell, options: &AutomapOptions) -> Vec<Cell> {
    region
        .offsets()
        .filter_map(|(dx, dy)| wrap_cell(grid, anchor.offset(dx, dy), options))
        .collect()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tilemap_core::{Layer, TileRef};

    fn tile(id: u32) -> TileRef {
        TileRef::new(Uuid::nil(), id)
    }

    /// 1x1 rule map: on any cell that is not `from`, write `to` to `layer`.
    fn replace_map(identifier: &str, layer: &str, from: u32, to: u32) -> RuleMap {
        let mut grid = Grid::new(identifier, 1, 1);
        let regions = grid.add_tile_layer("regions");
        grid.set_tile(regions, Cell::new(0, 0), Some(tile(0)));
        let not = grid.add_tile_layer(format!("inputnot_{layer}"));
        grid.set_tile(not, Cell::new(0, 0), Some(tile(from)));
        let out = grid.add_tile_layer(format!("output_{layer}"));
        grid.set_tile(out, Cell::new(0, 0), Some(tile(to)));
        RuleMap::new(identifier, grid)
    }

    fn target(width: u32, height: u32) -> Grid {
        let mut grid = Grid::new("target", width, height);
        grid.add_tile_layer("Ground");
        grid
    }

    #[test]
    fn test_busy_while_pass_in_flight() {
        let automapper = Automapper::new();
        let grid = target(2, 2);

        let guard = PassGuard::begin(&automapper.passes, grid.id).unwrap();
        assert_eq!(automapper.state(grid.id), PassState::Loading);
        guard.set(PassState::Matching);
        assert_eq!(automapper.state(grid.id), PassState::Matching);

        let result = automapper.apply_rules(&grid, &[], None, &AutomapOptions::default(), None);
        assert_eq!(result.unwrap_err(), OrchestrationError::Busy(grid.id));

        drop(guard);
        assert_eq!(automapper.state(grid.id), PassState::Idle);
        assert!(automapper
            .apply_rules(&grid, &[], None, &AutomapOptions::default(), None)
            .is_ok());
    }

    #[test]
    fn test_other_grids_are_not_blocked() {
        let automapper = Automapper::new();
        let busy = target(2, 2);
        let free = target(2, 2);

        let _guard = PassGuard::begin(&automapper.passes, busy.id).unwrap();
        let maps = [replace_map("r", "Ground", 9, 1)];
        let (batch, _) = automapper
            .apply_rules(&free, &maps, None, &AutomapOptions::default(), None)
            .unwrap();
        assert_eq!(batch.set_tile_count(), 4);
    }

    #[test]
    fn test_state_returns_to_idle_after_error() {
        let automapper = Automapper::new();
        let grid = target(1, 1);
        let mut wide = Grid::new("wide", 3, 1);
        let regions = wide.add_tile_layer("regions");
        for x in 0..3 {
            wide.set_tile(regions, Cell::new(x, 0), Some(tile(0)));
        }
        wide.add_tile_layer("input_Ground");
        let out = wide.add_tile_layer("output_Ground");
        wide.set_tile(out, Cell::new(0, 0), Some(tile(1)));

        let result = automapper.apply_rules(
            &grid,
            &[RuleMap::new("wide", wide)],
            None,
            &AutomapOptions::default(),
            None,
        );
        assert!(matches!(result, Err(OrchestrationError::DimensionMismatch(_))));
        assert_eq!(automapper.state(grid.id), PassState::Idle);
    }

    #[test]
    fn test_rule_cache_reused_until_revision_changes() {
        let automapper = Automapper::new();
        let map = replace_map("r", "Ground", 9, 1);

        let first = automapper.rules_for(&map).unwrap();
        let second = automapper.rules_for(&map).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(automapper.cached_rule_maps(), 1);

        let reloaded = map.clone().with_revision(1);
        let third = automapper.rules_for(&reloaded).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));

        automapper.invalidate("r");
        assert_eq!(automapper.cached_rule_maps(), 0);
        let fourth = automapper.rules_for(&reloaded).unwrap();
        assert!(!Arc::ptr_eq(&third, &fourth));

        automapper.clear_cache();
        assert_eq!(automapper.cached_rule_maps(), 0);
    }

    #[test]
    fn test_malformed_target_is_rejected() {
        let automapper = Automapper::new();
        let mut grid = target(2, 2);
        grid.add_layer(Layer::new_tile_layer("Bad", 3, 3));
        let result = automapper.apply_rules(&grid, &[], None, &AutomapOptions::default(), None);
        assert!(matches!(result, Err(OrchestrationError::DimensionMismatch(_))));
    }

    #[test]
    fn test_earlier_rule_map_wins_shared_cells() {
        let automapper = Automapper::new();
        let grid = target(2, 1);
        let maps = [
            replace_map("first", "Ground", 9, 1),
            // Would overwrite tile 1 with 2 everywhere.
            replace_map("second", "Ground", 9, 2),
        ];

        let (batch, diagnostics) = automapper
            .apply_rules(&grid, &maps, None, &AutomapOptions::default(), None)
            .unwrap();
        assert_eq!(batch.pending_tile("Ground", Cell::new(0, 0)), Some(Some(tile(1))));
        assert_eq!(batch.pending_tile("Ground", Cell::new(1, 0)), Some(Some(tile(1))));
        let overridden: Vec<_> = diagnostics
            .of_kind(DiagnosticKind::OverriddenByEarlierRuleMap)
            .collect();
        assert_eq!(overridden.len(), 1);
        assert_eq!(overridden[0].rule_map, "second");
    }

    #[test]
    fn test_later_rule_map_sees_earlier_output() {
        let automapper = Automapper::new();
        let grid = target(1, 1);

        // Second map: where Ground holds tile 1, write tile 5 to Deco.
        let mut second = Grid::new("second", 1, 1);
        let regions = second.add_tile_layer("regions");
        second.set_tile(regions, Cell::new(0, 0), Some(tile(0)));
        let input = second.add_tile_layer("input_Ground");
        second.set_tile(input, Cell::new(0, 0), Some(tile(1)));
        let out = second.add_tile_layer("output_Deco");
        second.set_tile(out, Cell::new(0, 0), Some(tile(5)));

        let maps = [
            replace_map("first", "Ground", 9, 1),
            RuleMap::new("second", second),
        ];
        let (batch, _) = automapper
            .apply_rules(&grid, &maps, None, &AutomapOptions::default(), None)
            .unwrap();
        assert_eq!(batch.pending_tile("Deco", Cell::new(0, 0)), Some(Some(tile(5))));
        assert!(batch.ensures_layer("Deco"));
    }

    #[test]
    fn test_disabled_rule_map_is_skipped() {
        let automapper = Automapper::new();
        let grid = target(2, 2);
        let mut map = replace_map("off", "Ground", 9, 1);
        map.grid = map.grid.with_property("Disabled", true);

        let (batch, diagnostics) = automapper
            .apply_rules(&grid, &[map], None, &AutomapOptions::default(), None)
            .unwrap();
        assert!(batch.is_empty());
        assert_eq!(diagnostics.of_kind(DiagnosticKind::RuleMapDisabled).count(), 1);
    }

    #[test]
    fn test_object_layer_output_reported_once() {
        let automapper = Automapper::new();
        let mut grid = target(2, 2);
        grid.add_layer(Layer::new_object_layer("Things"));
        let maps = [replace_map("r", "Things", 9, 1)];

        let (batch, diagnostics) = automapper
            .apply_rules(&grid, &maps, None, &AutomapOptions::default(), None)
            .unwrap();
        assert!(batch.is_empty());
        let mismatches: Vec<_> = diagnostics.of_kind(DiagnosticKind::LayerKindMismatch).collect();
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].rule_id, Some(0));
    }

    #[test]
    fn test_max_region_extent() {
        let automapper = Automapper::new();
        let maps = [replace_map("r", "Ground", 9, 1)];
        assert_eq!(automapper.max_region_extent(&maps).unwrap(), 1);
        assert_eq!(automapper.max_region_extent(&[]).unwrap(), 0);
    }
}
