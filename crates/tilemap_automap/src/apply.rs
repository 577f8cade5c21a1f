//! The applier: turns accepted anchors into edits, and picks among siblings.

use rand::Rng;
use tilemap_core::{Cell, Grid, LayerKind};

use crate::matcher::wrap_cell;
use crate::{ApplyError, AutomapOptions, EditBatch, InsertionHint, Rule};

/// Result of applying one rule at some anchors
#[derive(Debug, Default)]
pub struct Applied {
    pub batch: EditBatch,
    /// Output layers skipped at some anchor, one entry per skip
    pub errors: Vec<ApplyError>,
}

/// Compute the edits that stamp `rule`'s outputs at each anchor.
///
/// `target` is read, never written. Writes that would not change the current
/// value (including earlier writes of this same call) are left out. Output
/// layers missing from `target` are created with an `EnsureLayer` edit ahead
/// of their first write.
pub fn apply(target: &Grid, anchors: &[Cell], rule: &Rule, options: &AutomapOptions) -> Applied {
    let mut applied = Applied::default();

    for &anchor in anchors {
        for (name, pattern) in &rule.output_layers {
            let layer = target.find_tile_layer(name);
            if layer.is_none() && target.find_layer(name).is_some() {
                applied.errors.push(ApplyError::LayerKindMismatch {
                    layer: name.clone(),
                });
                continue;
            }

            for (dx, dy) in rule.region.offsets() {
                let desired = match pattern.get(dx, dy) {
                    Some(tile) => Some(tile),
                    None if options.clear_on_empty_output => None,
                    None => continue,
                };
                let Some(cell) = wrap_cell(target, anchor.offset(dx, dy), options) else {
                    continue;
                };

                let current = applied
                    .batch
                    .pending_tile(name, cell)
                    .unwrap_or_else(|| layer.and_then(|idx| target.get_tile(idx, cell)));
                if current == desired {
                    continue;
                }

                if layer.is_none() && !applied.batch.ensures_layer(name) {
                    applied
                        .batch
                        .push_ensure_layer(name.clone(), LayerKind::Tiles, insertion_hint(target, name));
                }
                applied.batch.push_set_tile(name.clone(), cell, desired);
            }
        }
    }

    applied
}

/// Leading part of a layer name up to its first separator: `Walls_Top` -> `Walls`
pub fn layer_prefix(name: &str) -> &str {
    name.split(['_', ' ', '-', '.']).next().unwrap_or(name)
}

/// Place a new layer above the topmost layer sharing its name prefix,
/// otherwise on top of the stack.
pub fn insertion_hint(target: &Grid, name: &str) -> InsertionHint {
    let prefix = layer_prefix(name);
    target
        .layers
        .iter()
        .rev()
        .find(|l| layer_prefix(&l.name) == prefix)
        .map(|l| InsertionHint::AboveLayer(l.name.clone()))
        .unwrap_or(InsertionHint::Top)
}

/// Choose one rule among siblings that all matched at the same anchor.
///
/// - `weighted`: weighted random selection by probability (unset weights
///   count as 1.0); `None` if every weight is zero.
/// - `random`: uniform random selection.
/// - otherwise the first candidate (lowest rule id) wins.
pub fn select_sibling<'a>(
    candidates: &[&'a Rule],
    weighted: bool,
    random: bool,
    rng: &mut impl Rng,
) -> Option<&'a Rule> {
    if candidates.is_empty() {
        return None;
    }

    if weighted {
        fn weight(rule: &Rule) -> f64 {
            match rule.probability {
                Some(p) if p.is_finite() && p > 0.0 => p,
                Some(_) => 0.0,
                None => 1.0,
            }
        }
        // Scale by the largest weight so the sum stays finite.
        let max = candidates.iter().map(|r| weight(r)).fold(0.0, f64::max);
        if max <= 0.0 {
            return None;
        }
        let scaled = |rule: &Rule| weight(rule) / max;
        let total: f64 = candidates.iter().map(|r| scaled(*r)).sum();

        let mut pick = rng.gen_range(0.0..total);
        for rule in candidates {
            let w = scaled(*rule);
            if pick < w {
                return Some(*rule);
            }
            pick -= w;
        }
        // Floating point leftovers land on the last candidate with weight.
        return candidates.iter().rev().find(|r| weight(r) > 0.0).copied();
    }

    if random {
        return candidates.get(rng.gen_range(0..candidates.len())).copied();
    }

    candidates.first().copied()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Edit, Pattern, Region};
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use tilemap_core::{Layer, Rect, TileRef};
    use uuid::Uuid;

    fn seeded_rng() -> SmallRng {
        SmallRng::seed_from_u64(0)
    }

    fn tile(id: u32) -> TileRef {
        TileRef::new(Uuid::nil(), id)
    }

    fn stamp(id: u32, layer: &str, out: &[Option<u32>], width: u32) -> Rule {
        let height = out.len() as u32 / width;
        Rule {
            id,
            region: Region::rect(Rect::new(0, 0, width, height)),
            input_layers: vec![(layer.to_string(), Pattern::empty(width, height))],
            input_not_layers: Vec::new(),
            output_layers: vec![(
                layer.to_string(),
                Pattern {
                    width,
                    height,
                    tiles: out.iter().map(|t| t.map(tile)).collect(),
                },
            )],
            probability: None,
        }
    }

    fn target(width: u32, height: u32) -> Grid {
        let mut grid = Grid::new("target", width, height);
        grid.add_tile_layer("Ground");
        grid
    }

    #[test]
    fn test_apply_writes_non_empty_outputs() {
        let grid = target(3, 3);
        let rule = stamp(1, "Ground", &[Some(1), None], 2);

        let applied = apply(&grid, &[Cell::new(1, 1)], &rule, &AutomapOptions::default());
        assert!(applied.errors.is_empty());
        assert_eq!(
            applied.batch.edits(),
            &[Edit::SetTile {
                layer: "Ground".to_string(),
                cell: Cell::new(1, 1),
                tile: Some(tile(1)),
            }]
        );
    }

    #[test]
    fn test_apply_clear_on_empty_output_erases() {
        let mut grid = target(2, 1);
        grid.set_tile(0, Cell::new(1, 0), Some(tile(7)));
        let rule = stamp(1, "Ground", &[Some(1), None], 2);
        let options = AutomapOptions {
            clear_on_empty_output: true,
            ..Default::default()
        };

        let applied = apply(&grid, &[Cell::new(0, 0)], &rule, &options);
        assert_eq!(applied.batch.pending_tile("Ground", Cell::new(1, 0)), Some(None));
        assert_eq!(applied.batch.set_tile_count(), 2);
    }

    #[test]
    fn test_apply_skips_writes_that_change_nothing() {
        let mut grid = target(1, 1);
        grid.set_tile(0, Cell::new(0, 0), Some(tile(1)));
        let rule = stamp(1, "Ground", &[Some(1)], 1);

        let applied = apply(&grid, &[Cell::new(0, 0)], &rule, &AutomapOptions::default());
        assert!(applied.batch.is_empty());
    }

    #[test]
    fn test_apply_creates_missing_layer_first() {
        let mut grid = target(2, 1);
        grid.add_tile_layer("Sky");
        let rule = stamp(1, "Ground_Deco", &[Some(4)], 1);

        let applied = apply(
            &grid,
            &[Cell::new(0, 0), Cell::new(1, 0)],
            &rule,
            &AutomapOptions::default(),
        );
        let edits = applied.batch.edits();
        assert_eq!(edits.len(), 3);
        assert_eq!(
            edits[0],
            Edit::EnsureLayer {
                layer: "Ground_Deco".to_string(),
                kind: LayerKind::Tiles,
                hint: InsertionHint::AboveLayer("Ground".to_string()),
            }
        );
    }

    #[test]
    fn test_apply_does_not_create_layer_for_erase_only() {
        let grid = target(1, 1);
        let rule = stamp(1, "Fresh", &[None], 1);
        let options = AutomapOptions {
            clear_on_empty_output: true,
            ..Default::default()
        };
        assert!(apply(&grid, &[Cell::new(0, 0)], &rule, &options).batch.is_empty());
    }

    #[test]
    fn test_apply_reports_object_layer_collision() {
        let mut grid = target(1, 1);
        grid.add_layer(Layer::new_object_layer("Objects"));
        let rule = stamp(1, "Objects", &[Some(1)], 1);

        let applied = apply(&grid, &[Cell::new(0, 0)], &rule, &AutomapOptions::default());
        assert!(applied.batch.is_empty());
        assert_eq!(
            applied.errors,
            vec![ApplyError::LayerKindMismatch {
                layer: "Objects".to_string()
            }]
        );
    }

    #[test]
    fn test_apply_wraps_output() {
        let grid = target(3, 1);
        let rule = stamp(1, "Ground", &[Some(1), Some(2)], 2);
        let options = AutomapOptions {
            wrap_x: true,
            ..Default::default()
        };

        let applied = apply(&grid, &[Cell::new(2, 0)], &rule, &options);
        assert_eq!(applied.batch.pending_tile("Ground", Cell::new(2, 0)), Some(Some(tile(1))));
        assert_eq!(applied.batch.pending_tile("Ground", Cell::new(0, 0)), Some(Some(tile(2))));
    }

    #[test]
    fn test_layer_prefix_and_hint() {
        assert_eq!(layer_prefix("Walls_Top"), "Walls");
        assert_eq!(layer_prefix("Walls"), "Walls");
        assert_eq!(layer_prefix("Deco layer"), "Deco");

        let mut grid = Grid::new("g", 1, 1);
        grid.add_tile_layer("Walls");
        grid.add_tile_layer("Walls_Shadow");
        grid.add_tile_layer("Sky");
        assert_eq!(
            insertion_hint(&grid, "Walls_Top"),
            InsertionHint::AboveLayer("Walls_Shadow".to_string())
        );
        assert_eq!(insertion_hint(&grid, "Clouds"), InsertionHint::Top);
    }

    #[test]
    fn test_select_first_without_weights() {
        let a = stamp(1, "Ground", &[Some(1)], 1);
        let b = stamp(2, "Ground", &[Some(2)], 1);
        let mut rng = seeded_rng();
        for _ in 0..10 {
            let chosen = select_sibling(&[&a, &b], false, false, &mut rng).unwrap();
            assert_eq!(chosen.id, 1);
        }
    }

    #[test]
    fn test_select_zero_weight_never_chosen() {
        let mut a = stamp(1, "Ground", &[Some(1)], 1);
        a.probability = Some(0.0);
        let b = stamp(2, "Ground", &[Some(2)], 1);
        let mut rng = seeded_rng();
        for _ in 0..50 {
            let chosen = select_sibling(&[&a, &b], true, false, &mut rng).unwrap();
            assert_eq!(chosen.id, 2);
        }
    }

    #[test]
    fn test_select_all_zero_weights_returns_none() {
        let mut a = stamp(1, "Ground", &[Some(1)], 1);
        a.probability = Some(0.0);
        let mut rng = seeded_rng();
        assert!(select_sibling(&[&a], true, false, &mut rng).is_none());
    }

    #[test]
    fn test_select_huge_weights_do_not_overflow() {
        let mut a = stamp(1, "Ground", &[Some(1)], 1);
        a.probability = Some(1e308);
        let mut b = stamp(2, "Ground", &[Some(2)], 1);
        b.probability = Some(1e308);
        let mut rng = seeded_rng();
        let mut seen = [false, false];
        for _ in 0..100 {
            let chosen = select_sibling(&[&a, &b], true, false, &mut rng).unwrap();
            seen[(chosen.id - 1) as usize] = true;
        }
        assert_eq!(seen, [true, true]);
    }

    #[test]
    fn test_select_random_visits_every_sibling() {
        let a = stamp(1, "Ground", &[Some(1)], 1);
        let b = stamp(2, "Ground", &[Some(2)], 1);
        let mut rng = seeded_rng();
        let mut seen = [false, false];
        for _ in 0..100 {
            let chosen = select_sibling(&[&a, &b], false, true, &mut rng).unwrap();
            seen[(chosen.id - 1) as usize] = true;
        }
        assert_eq!(seen, [true, true]);
    }
}
