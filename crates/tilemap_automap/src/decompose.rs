//! Rule map decomposition: turns a rule map grid into [`Rule`]s.
//!
//! Layer naming (prefixes are case-insensitive, `<id>` defaults to 0):
//! - `regions` marks rule regions; the tile's local id is the rule id
//! - `input<id>_<layer>` / `inputnot<id>_<layer>` hold the match patterns
//! - `output<id>_<layer>` holds the patch written on a match

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tilemap_core::{Cell, Grid, Rect, TileRef, Value};
use tracing::{debug, warn};

use crate::{DecomposeError, DecomposedRuleMap, Pattern, Region, Rule, RuleFamily, RuleMapSettings};

/// What a rule map layer contributes, judged by its name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LayerRole<'a> {
    Regions,
    Input { id: u32, target: &'a str },
    InputNot { id: u32, target: &'a str },
    Output { id: u32, target: &'a str },
}

fn classify(name: &str) -> Option<LayerRole<'_>> {
    if name.eq_ignore_ascii_case("regions") {
        return Some(LayerRole::Regions);
    }
    // `inputnot` must be tried before its prefix `input`.
    ["inputnot", "input", "output"]
        .into_iter()
        .find_map(|prefix| {
            let head = name.get(..prefix.len())?;
            if !head.eq_ignore_ascii_case(prefix) {
                return None;
            }
            let (id, target) = split_id_and_target(name.get(prefix.len()..)?)?;
            Some(match prefix {
                "inputnot" => LayerRole::InputNot { id, target },
                "input" => LayerRole::Input { id, target },
                _ => LayerRole::Output { id, target },
            })
        })
}

/// Split `"12_Ground"` into `(12, "Ground")`; `"_Ground"` gives id 0.
fn split_id_and_target(rest: &str) -> Option<(u32, &str)> {
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    let id = if digits == 0 {
        0
    } else {
        rest.get(..digits)?.parse().ok()?
    };
    let target = rest.get(digits..)?.strip_prefix('_')?;
    if target.is_empty() {
        return None;
    }
    Some((id, target))
}

/// Full-size (uncropped) layers of one rule id, merged by target name
#[derive(Debug, Default)]
struct RuleLayers {
    inputs: Vec<(String, Vec<Option<TileRef>>)>,
    input_nots: Vec<(String, Vec<Option<TileRef>>)>,
    outputs: Vec<(String, Vec<Option<TileRef>>)>,
}

/// Merge `tiles` into the layer named `target`; later non-empty cells win.
fn merge_layer(layers: &mut Vec<(String, Vec<Option<TileRef>>)>, target: &str, tiles: &[Option<TileRef>]) {
    match layers.iter_mut().find(|(name, _)| name == target) {
        Some((_, existing)) => merge_tiles(existing, tiles),
        None => layers.push((target.to_string(), tiles.to_vec())),
    }
}

fn merge_tiles(into: &mut [Option<TileRef>], from: &[Option<TileRef>]) {
    for (slot, tile) in into.iter_mut().zip(from) {
        if tile.is_some() {
            *slot = *tile;
        }
    }
}

/// Split a rule map into rules.
///
/// Only a malformed grid fails as a whole. Problems with a single rule id are
/// collected in [`DecomposedRuleMap::issues`] and that rule is left out.
pub fn decompose(rule_map: &Grid) -> Result<DecomposedRuleMap, DecomposeError> {
    rule_map.validate()?;

    let cell_count = rule_map.cell_count();
    let mut region_tiles: Vec<Option<TileRef>> = vec![None; cell_count];
    let mut per_rule: BTreeMap<u32, RuleLayers> = BTreeMap::new();
    let mut unrecognized_layers = Vec::new();

    for layer in &rule_map.layers {
        // Object layers carry no rule data.
        let Some(tiles) = layer.tiles() else {
            continue;
        };
        match classify(&layer.name) {
            Some(LayerRole::Regions) => merge_tiles(&mut region_tiles, tiles),
            Some(LayerRole::Input { id, target }) => {
                merge_layer(&mut per_rule.entry(id).or_default().inputs, target, tiles)
            }
            Some(LayerRole::InputNot { id, target }) => {
                merge_layer(&mut per_rule.entry(id).or_default().input_nots, target, tiles)
            }
            Some(LayerRole::Output { id, target }) => {
                merge_layer(&mut per_rule.entry(id).or_default().outputs, target, tiles)
            }
            None => unrecognized_layers.push(layer.name.clone()),
        }
    }

    let regions = find_regions(&region_tiles, rule_map.width, rule_map.height);
    let ids: BTreeSet<u32> = regions.keys().chain(per_rule.keys()).copied().collect();

    let mut rules = Vec::new();
    let mut issues = Vec::new();
    for id in ids {
        let probability = read_probability(rule_map, id);
        match build_rule(
            id,
            regions.get(&id).map(Vec::as_slice).unwrap_or_default(),
            per_rule.get(&id),
            rule_map.width,
            probability,
        ) {
            Ok(rule) => rules.push(rule),
            Err(errors) => issues.extend(errors),
        }
    }

    let families = group_families(&rules);
    debug!(
        "[automap] decomposed rule map '{}': {} rules in {} families, {} issues",
        rule_map.name,
        rules.len(),
        families.len(),
        issues.len()
    );

    Ok(DecomposedRuleMap {
        rules,
        families,
        settings: read_settings(rule_map),
        issues,
        unrecognized_layers,
    })
}

/// Validate one rule id and crop its layers to its region
fn build_rule(
    id: u32,
    regions: &[Region],
    layers: Option<&RuleLayers>,
    map_width: u32,
    probability: Option<f64>,
) -> Result<Rule, Vec<DecomposeError>> {
    let mut errors = Vec::new();
    match regions.len() {
        0 => errors.push(DecomposeError::MissingRegion { rule_id: id }),
        1 => {}
        count => errors.push(DecomposeError::MultipleRegions { rule_id: id, count }),
    }

    let empty = RuleLayers::default();
    let layers = layers.unwrap_or(&empty);
    if layers.inputs.is_empty() && layers.input_nots.is_empty() {
        errors.push(DecomposeError::NoInputLayers { rule_id: id });
    }
    if layers.outputs.is_empty() {
        errors.push(DecomposeError::MissingOutput { rule_id: id });
    }

    let Some(region) = regions.first().filter(|_| errors.is_empty()) else {
        return Err(errors);
    };

    if let Some(conflict) = find_conflict(id, region, layers, map_width) {
        return Err(vec![conflict]);
    }

    let crop_all = |list: &[(String, Vec<Option<TileRef>>)]| -> Vec<(String, Pattern)> {
        list.iter()
            .map(|(name, tiles)| (name.clone(), crop(tiles, map_width, region)))
            .collect()
    };

    Ok(Rule {
        id,
        region: region.clone(),
        input_layers: crop_all(&layers.inputs),
        input_not_layers: crop_all(&layers.input_nots),
        output_layers: crop_all(&layers.outputs),
        probability,
    })
}

/// First cell inside the region where the same target layer is both
/// required and forbidden
fn find_conflict(
    id: u32,
    region: &Region,
    layers: &RuleLayers,
    map_width: u32,
) -> Option<DecomposeError> {
    for (name, positive) in &layers.inputs {
        let Some((_, negative)) = layers.input_nots.iter().find(|(n, _)| n == name) else {
            continue;
        };
        for (dx, dy) in region.offsets() {
            let cell = Cell::new(region.bounds.x + dx, region.bounds.y + dy);
            let idx = cell.y as usize * map_width as usize + cell.x as usize;
            let both = matches!(
                (positive.get(idx), negative.get(idx)),
                (Some(Some(_)), Some(Some(_)))
            );
            if both {
                return Some(DecomposeError::ConflictingConstraint {
                    rule_id: id,
                    layer: name.clone(),
                    cell,
                });
            }
        }
    }
    None
}

/// Copy the region's cells out of a full-size layer into region-local coordinates
fn crop(tiles: &[Option<TileRef>], map_width: u32, region: &Region) -> Pattern {
    let mut pattern = Pattern::empty(region.width(), region.height());
    for (dx, dy) in region.offsets() {
        let src = (region.bounds.y + dy) as usize * map_width as usize + (region.bounds.x + dx) as usize;
        let dst = dy as usize * region.width() as usize + dx as usize;
        if let (Some(slot), Some(tile)) = (pattern.tiles.get_mut(dst), tiles.get(src)) {
            *slot = *tile;
        }
    }
    pattern
}

/// Flood-fill the regions layer into 4-connected blobs of equal tile id.
///
/// Returns rule id -> blobs, each id's blobs in scan order of their first cell.
fn find_regions(tiles: &[Option<TileRef>], width: u32, height: u32) -> BTreeMap<u32, Vec<Region>> {
    let (w, h) = (width as i32, height as i32);
    let mut visited = vec![false; tiles.len()];
    let mut regions: BTreeMap<u32, Vec<Region>> = BTreeMap::new();

    for start in 0..tiles.len() {
        let Some(Some(seed)) = tiles.get(start).copied() else {
            continue;
        };
        if visited[start] {
            continue;
        }
        visited[start] = true;

        let mut blob = Vec::new();
        let mut queue = VecDeque::from([start]);
        while let Some(idx) = queue.pop_front() {
            let cell = Cell::new(idx as i32 % w, idx as i32 / w);
            blob.push(cell);
            for (nx, ny) in [(0, -1), (1, 0), (0, 1), (-1, 0)] {
                let n = cell.offset(nx, ny);
                if n.x < 0 || n.y < 0 || n.x >= w || n.y >= h {
                    continue;
                }
                let nidx = n.y as usize * width as usize + n.x as usize;
                let same = matches!(tiles.get(nidx), Some(Some(t)) if t.local_id == seed.local_id);
                if same && !visited[nidx] {
                    visited[nidx] = true;
                    queue.push_back(nidx);
                }
            }
        }

        regions.entry(seed.local_id).or_default().push(region_from_cells(&blob));
    }
    regions
}

fn region_from_cells(cells: &[Cell]) -> Region {
    let bounds = cells
        .iter()
        .fold(Rect::default(), |acc, c| acc.union(&Rect::new(c.x, c.y, 1, 1)));
    let mut mask = vec![false; bounds.area()];
    for c in cells {
        let idx = (c.y - bounds.y) as usize * bounds.width as usize + (c.x - bounds.x) as usize;
        if let Some(slot) = mask.get_mut(idx) {
            *slot = true;
        }
    }
    Region { bounds, mask }
}

/// Group rules with identical region shapes, ordered by their lowest id
fn group_families(rules: &[Rule]) -> Vec<RuleFamily> {
    let mut families: Vec<RuleFamily> = Vec::new();
    for (idx, rule) in rules.iter().enumerate() {
        let existing = families.iter_mut().find(|family| {
            family
                .members
                .first()
                .and_then(|&first| rules.get(first))
                .is_some_and(|first| first.region.same_shape(&rule.region))
        });
        match existing {
            Some(family) => {
                family.members.push(idx);
                family.weighted |= rule.probability.is_some();
            }
            None => families.push(RuleFamily {
                members: vec![idx],
                weighted: rule.probability.is_some(),
            }),
        }
    }
    families
}

/// Case-insensitive property lookup.
///
/// An exact-case key wins; among other spellings the lowest key wins.
fn property<'a>(grid: &'a Grid, key: &str) -> Option<&'a Value> {
    if let Some(value) = grid.properties.get(key) {
        return Some(value);
    }
    grid.properties
        .iter()
        .filter(|(k, _)| k.eq_ignore_ascii_case(key))
        .min_by(|a, b| a.0.cmp(b.0))
        .map(|(_, v)| v)
}

fn read_probability(grid: &Grid, id: u32) -> Option<f64> {
    let key = format!("probability{id}");
    let value = property(grid, &key).or_else(|| {
        if id == 0 {
            property(grid, "probability")
        } else {
            None
        }
    })?;
    match value.as_float() {
        Some(p) if p.is_finite() && p >= 0.0 => Some(p),
        _ => {
            warn!(
                "[automap] rule map '{}': ignoring invalid {} = {:?}",
                grid.name, key, value
            );
            None
        }
    }
}

fn read_settings(grid: &Grid) -> RuleMapSettings {
    let flag = |key: &str| property(grid, key).and_then(Value::as_bool);
    RuleMapSettings {
        wrap_x: flag("WrapX"),
        wrap_y: flag("WrapY"),
        match_all: flag("MatchAll"),
        clear_on_empty_output: flag("ClearOnEmptyOutput").or_else(|| flag("DeleteTiles")),
        random_siblings: flag("RandomSiblings").unwrap_or(false),
        disabled: flag("Disabled").unwrap_or(false),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
