//! Pattern matching of rules against a target grid.

use tilemap_core::{Cell, Grid, Rect, TileRef};

use crate::{AutomapOptions, Region, Rule};

/// Clamp the caller's search region to the grid; `None` searches everything.
pub fn resolve_search_region(grid: &Grid, search: Option<Rect>) -> Rect {
    match search {
        Some(rect) => grid.bounds().intersection(&rect),
        None => grid.bounds(),
    }
}

/// Anchors where `region` could be placed, in row-major order.
///
/// The placed region must lie inside `search`. Wrapping only lifts that
/// restriction on an axis where `search` spans the whole grid: there every
/// cell is a candidate and the region wraps around the grid edge.
pub fn candidate_anchors(grid: &Grid, region: &Region, search: Rect, options: &AutomapOptions) -> Vec<Cell> {
    let axis = |start: i32, len: u32, size: u32, full_span: bool| -> std::ops::Range<i32> {
        if full_span {
            start..start + len as i32
        } else if size > len {
            start..start
        } else {
            start..start + (len - size) as i32 + 1
        }
    };
    let bounds = grid.bounds();
    let span_x = options.wrap_x && search.x == bounds.x && search.width == bounds.width;
    let span_y = options.wrap_y && search.y == bounds.y && search.height == bounds.height;
    let xs = axis(search.x, search.width, region.width(), span_x);
    let ys = axis(search.y, search.height, region.height(), span_y);

    ys.flat_map(|y| xs.clone().map(move |x| Cell::new(x, y)))
        .collect()
}

/// Map a cell onto the grid, wrapping on the enabled axes.
/// Returns `None` for cells off a non-wrapping edge.
pub fn wrap_cell(grid: &Grid, cell: Cell, options: &AutomapOptions) -> Option<Cell> {
    let (w, h) = (grid.width as i32, grid.height as i32);
    if w == 0 || h == 0 {
        return None;
    }
    let x = if options.wrap_x { cell.x.rem_euclid(w) } else { cell.x };
    let y = if options.wrap_y { cell.y.rem_euclid(h) } else { cell.y };
    let wrapped = Cell::new(x, y);
    grid.in_bounds(wrapped).then_some(wrapped)
}

/// Return `true` if `rule` matches with its region's top-left at `anchor`.
pub fn matches_at(grid: &Grid, rule: &Rule, anchor: Cell, options: &AutomapOptions) -> bool {
    let tile_at = |layer: Option<usize>, dx: i32, dy: i32| -> Option<TileRef> {
        let cell = wrap_cell(grid, anchor.offset(dx, dy), options)?;
        grid.get_tile(layer?, cell)
    };

    for (name, pattern) in &rule.input_layers {
        // A missing target layer reads as empty, so any required tile fails.
        let layer = grid.find_tile_layer(name);
        for (dx, dy, required) in pattern.constraints() {
            if tile_at(layer, dx, dy) != Some(required) {
                return false;
            }
        }
    }

    for (name, pattern) in &rule.input_not_layers {
        let Some(layer) = grid.find_tile_layer(name) else {
            continue;
        };
        for (dx, dy, forbidden) in pattern.constraints() {
            if tile_at(Some(layer), dx, dy) == Some(forbidden) {
                return false;
            }
        }
    }

    true
}

/// Every anchor in `search` where `rule` matches, row-major.
pub fn find_matches(grid: &Grid, rule: &Rule, search: Rect, options: &AutomapOptions) -> Vec<Cell> {
    let search = resolve_search_region(grid, Some(search));
    candidate_anchors(grid, &rule.region, search, options)
        .into_iter()
        .filter(|&anchor| matches_at(grid, rule, anchor, options))
        .collect()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Pattern;
    use uuid::Uuid;

    fn tile(id: u32) -> TileRef {
        TileRef::new(Uuid::nil(), id)
    }

    fn pattern(width: u32, height: u32, cells: &[(i32, i32, u32)]) -> Pattern {
        let mut p = Pattern::empty(width, height);
        for &(x, y, id) in cells {
            p.tiles[y as usize * width as usize + x as usize] = Some(tile(id));
        }
        p
    }

    fn rule(width: u32, height: u32) -> Rule {
        Rule {
            id: 1,
            region: Region::rect(Rect::new(0, 0, width, height)),
            input_layers: Vec::new(),
            input_not_layers: Vec::new(),
            output_layers: vec![("Ground".to_string(), pattern(width, height, &[]))],
            probability: None,
        }
    }

    fn target(width: u32, height: u32) -> Grid {
        let mut grid = Grid::new("target", width, height);
        grid.add_tile_layer("Ground");
        grid
    }

    #[test]
    fn test_candidate_anchors_fit_inside_search() {
        let grid = target(4, 2);
        let region = Region::rect(Rect::new(0, 0, 3, 1));
        let anchors = candidate_anchors(&grid, &region, Rect::new(0, 0, 4, 2), &AutomapOptions::default());
        assert_eq!(
            anchors,
            vec![Cell::new(0, 0), Cell::new(1, 0), Cell::new(0, 1), Cell::new(1, 1)]
        );

        let too_big = candidate_anchors(&grid, &region, Rect::new(0, 0, 2, 2), &AutomapOptions::default());
        assert!(too_big.is_empty());
    }

    #[test]
    fn test_candidate_anchors_with_wrap_cover_search() {
        let grid = target(4, 1);
        let region = Region::rect(Rect::new(0, 0, 3, 1));
        let options = AutomapOptions {
            wrap_x: true,
            ..Default::default()
        };
        let anchors = candidate_anchors(&grid, &region, Rect::new(0, 0, 4, 1), &options);
        assert_eq!(anchors.len(), 4);
        assert_eq!(anchors.last(), Some(&Cell::new(3, 0)));
    }

    #[test]
    fn test_wrap_keeps_region_inside_partial_search() {
        let grid = target(10, 1);
        let mut stamp = rule(3, 1);
        stamp.input_layers.push(("Ground".to_string(), pattern(3, 1, &[])));
        let options = AutomapOptions {
            wrap_x: true,
            ..Default::default()
        };

        // A 3-wide region cannot fit in a 2-wide search, wrapped or not.
        assert!(find_matches(&grid, &stamp, Rect::new(0, 0, 2, 1), &options).is_empty());
        assert_eq!(
            find_matches(&grid, &stamp, Rect::new(4, 0, 4, 1), &options),
            vec![Cell::new(4, 0), Cell::new(5, 0)]
        );
        // Spanning the whole row, every cell anchors and the tail wraps.
        assert_eq!(find_matches(&grid, &stamp, grid.bounds(), &options).len(), 10);
    }

    #[test]
    fn test_blank_input_matches_everywhere() {
        let grid = target(3, 3);
        let mut stamp = rule(1, 1);
        stamp.input_layers.push(("Ground".to_string(), pattern(1, 1, &[])));

        let matches = find_matches(&grid, &stamp, grid.bounds(), &AutomapOptions::default());
        assert_eq!(matches.len(), 9);
        assert_eq!(matches[0], Cell::new(0, 0));
        assert_eq!(matches[8], Cell::new(2, 2));
    }

    #[test]
    fn test_positive_input_requires_exact_tile() {
        let mut grid = target(3, 1);
        grid.set_tile(0, Cell::new(1, 0), Some(tile(5)));
        grid.set_tile(0, Cell::new(2, 0), Some(tile(5).with_flip_h(true)));

        let mut r = rule(1, 1);
        r.input_layers.push(("Ground".to_string(), pattern(1, 1, &[(0, 0, 5)])));

        let matches = find_matches(&grid, &r, grid.bounds(), &AutomapOptions::default());
        assert_eq!(matches, vec![Cell::new(1, 0)], "flipped tile is a different tile");
    }

    #[test]
    fn test_positive_input_fails_on_missing_layer() {
        let grid = target(2, 2);
        let mut r = rule(1, 1);
        r.input_layers.push(("Walls".to_string(), pattern(1, 1, &[(0, 0, 1)])));
        assert!(find_matches(&grid, &r, grid.bounds(), &AutomapOptions::default()).is_empty());
    }

    #[test]
    fn test_negative_input_passes_on_missing_layer() {
        let grid = target(2, 2);
        let mut r = rule(1, 1);
        r.input_not_layers.push(("Walls".to_string(), pattern(1, 1, &[(0, 0, 1)])));
        assert_eq!(
            find_matches(&grid, &r, grid.bounds(), &AutomapOptions::default()).len(),
            4
        );
    }

    #[test]
    fn test_negative_input_rejects_forbidden_tile() {
        let mut grid = target(2, 1);
        grid.set_tile(0, Cell::new(0, 0), Some(tile(1)));

        let mut r = rule(1, 1);
        r.input_not_layers.push(("Ground".to_string(), pattern(1, 1, &[(0, 0, 1)])));
        assert_eq!(
            find_matches(&grid, &r, grid.bounds(), &AutomapOptions::default()),
            vec![Cell::new(1, 0)]
        );
    }

    #[test]
    fn test_wrap_x_samples_across_edge() {
        // Row: B C _ A. Pattern A B C only fits by wrapping from x = 3.
        let mut grid = target(4, 1);
        grid.set_tile(0, Cell::new(0, 0), Some(tile(2)));
        grid.set_tile(0, Cell::new(1, 0), Some(tile(3)));
        grid.set_tile(0, Cell::new(3, 0), Some(tile(1)));

        let mut r = rule(3, 1);
        r.input_layers.push((
            "Ground".to_string(),
            pattern(3, 1, &[(0, 0, 1), (1, 0, 2), (2, 0, 3)]),
        ));

        let no_wrap = find_matches(&grid, &r, grid.bounds(), &AutomapOptions::default());
        assert!(no_wrap.is_empty());

        let options = AutomapOptions {
            wrap_x: true,
            ..Default::default()
        };
        assert_eq!(
            find_matches(&grid, &r, grid.bounds(), &options),
            vec![Cell::new(3, 0)]
        );
    }

    #[test]
    fn test_search_region_limits_anchors() {
        let grid = target(5, 5);
        let mut stamp = rule(2, 2);
        stamp.input_layers.push(("Ground".to_string(), pattern(2, 2, &[])));

        let matches = find_matches(&grid, &stamp, Rect::new(1, 1, 3, 2), &AutomapOptions::default());
        assert_eq!(matches, vec![Cell::new(1, 1), Cell::new(2, 1)]);

        // Search regions are clamped to the grid.
        let matches = find_matches(&grid, &stamp, Rect::new(3, 3, 10, 10), &AutomapOptions::default());
        assert_eq!(matches, vec![Cell::new(3, 3)]);
    }
}
