// Flood-fill connectivity index.
//
// Answers "can traversal class C for team group G move between tiles A and B"
// in O(1) by comparing region colors. One color plane is kept per
// (group, class) pair; colors are unsigned with 0 meaning "not colored". A
// tile is colored in a plane only when the tile itself is passable for that
// class, so two tiles are mutually reachable exactly when both carry the same
// nonzero color.
//
// The full rebuild computes the four neutral-baseline planes (group 0) with a
// two-directional row sweep, copies them into every real group, then reapplies
// locked-door cuts. Ordinary digging never needs a rebuild: a single-tile
// refresh adopts neighbor colors and merges the regions the opening joins.
//
// The whole index is derived state. It is never serialized; `GameMap` rebuilds
// it after load and patches it as the grid mutates.
//
// **Critical constraint: determinism.** Colors are assigned in row-major scan
// order and neighbors are visited in the fixed `ORTHO_OFFSETS` order, so two
// rebuilds of the same grid produce identical planes. The parallel rebuild
// only splits across planes, never within one, which keeps each plane's
// assignment sequential.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::ops::Range;

use rayon::prelude::*;

use crate::grid::{ORTHO_OFFSETS, TileGrid};
use crate::types::{TeamGroup, TileCoord, TraversalClass};

#[derive(Clone, Debug, Default)]
pub struct ConnectivityIndex {
    width: u32,
    height: u32,
    group_count: u32,
    /// Flat color planes. Plane (group, class) occupies the tile_count-sized
    /// chunk starting at `(group * CLASS_COUNT + class) * tile_count`.
    colors: Vec<u32>,
    /// Per-plane high-water mark for fresh color allocation.
    next_color: Vec<u32>,
    /// Locked-door graph cuts: flat tile index -> the one group whose planes
    /// exclude that tile. Neutral and enemy groups keep the connector.
    cuts: BTreeMap<usize, TeamGroup>,
    warned_bad_group: Cell<bool>,
    warned_oob_tile: Cell<bool>,
}

impl ConnectivityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group_count(&self) -> u32 {
        self.group_count
    }

    fn tile_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Region color of one tile in one (group, class) plane. 0 = uncolored.
    /// Unknown groups and out-of-bounds tiles are reported once and read as
    /// uncolored, so every query on them fails closed.
    pub fn color_at(&self, group: TeamGroup, class: TraversalClass, at: TileCoord) -> u32 {
        let Some(range) = self.plane_range(group, class) else {
            return 0;
        };
        let Some(idx) = self.query_tile_index(at) else {
            return 0;
        };
        self.colors[range.start + idx]
    }

    /// O(1) reachability: true iff both tiles carry the same nonzero color.
    pub fn connected(
        &self,
        group: TeamGroup,
        class: TraversalClass,
        a: TileCoord,
        b: TileCoord,
    ) -> bool {
        let ca = self.color_at(group, class, a);
        ca != 0 && ca == self.color_at(group, class, b)
    }

    fn plane_range(&self, group: TeamGroup, class: TraversalClass) -> Option<Range<usize>> {
        if group.0 >= self.group_count {
            if !self.warned_bad_group.replace(true) {
                eprintln!(
                    "connectivity: unknown team group {} (have {}), treating as disconnected",
                    group.0, self.group_count
                );
            }
            return None;
        }
        let tiles = self.tile_count();
        let start = (group.index() * TraversalClass::COUNT + class.index()) * tiles;
        Some(start..start + tiles)
    }

    /// Flat index for a queried coordinate; out-of-bounds reported once.
    fn query_tile_index(&self, at: TileCoord) -> Option<usize> {
        if at.x >= 0 && at.y >= 0 && (at.x as u32) < self.width && (at.y as u32) < self.height {
            Some(at.x as usize + at.y as usize * self.width as usize)
        } else {
            if !self.warned_oob_tile.replace(true) {
                eprintln!("connectivity: out-of-bounds tile {at}, treating as disconnected");
            }
            None
        }
    }

    /// Neighbor flat index, without warning: internal walks step off the map
    /// edge as a matter of course.
    fn neighbor_index(&self, idx: usize, dx: i32, dy: i32) -> Option<usize> {
        let width = self.width as usize;
        let x = (idx % width) as i32 + dx;
        let y = (idx / width) as i32 + dy;
        if x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height {
            Some(x as usize + y as usize * width)
        } else {
            None
        }
    }

    /// Whether `idx` may carry a color in `group`'s planes for `class`:
    /// passable terrain and not cut by a locked door for that group.
    fn plane_allows(
        &self,
        grid: &TileGrid,
        idx: usize,
        group: TeamGroup,
        class: TraversalClass,
    ) -> bool {
        if self.cuts.get(&idx) == Some(&group) {
            return false;
        }
        grid.tiles()[idx].passable_by(class)
    }

    fn fresh_color(&mut self, group: TeamGroup, class: TraversalClass) -> u32 {
        let plane = group.index() * TraversalClass::COUNT + class.index();
        self.next_color[plane] += 1;
        self.next_color[plane]
    }

    // -----------------------------------------------------------------------
    // Full rebuild
    // -----------------------------------------------------------------------

    /// Recolor every plane from scratch. The four neutral class planes are
    /// computed in parallel, copied verbatim into each real group, and any
    /// locked-door cuts recorded on the index are reapplied.
    pub fn rebuild(&mut self, grid: &TileGrid, group_count: u32) {
        self.width = grid.width;
        self.height = grid.height;
        self.group_count = group_count.max(1);
        let tiles = self.tile_count();
        let planes = self.group_count as usize * TraversalClass::COUNT;
        self.colors.clear();
        self.colors.resize(planes * tiles, 0);
        self.next_color = vec![0; planes];
        if tiles == 0 {
            return;
        }

        let (neutral, rest) = self.colors.split_at_mut(TraversalClass::COUNT * tiles);
        let highs: Vec<u32> = neutral
            .par_chunks_mut(tiles)
            .zip(TraversalClass::ALL.par_iter())
            .map(|(plane, &class)| rebuild_plane(grid, class, plane))
            .collect();

        for chunk in rest.chunks_mut(TraversalClass::COUNT * tiles) {
            chunk.copy_from_slice(neutral);
        }
        for group in 0..self.group_count as usize {
            for (class, &high) in highs.iter().enumerate() {
                self.next_color[group * TraversalClass::COUNT + class] = high;
            }
        }

        let cuts: Vec<(usize, TeamGroup)> = self.cuts.iter().map(|(&i, &g)| (i, g)).collect();
        for (idx, group) in cuts {
            self.apply_cut(grid, idx, group);
        }
    }

    // -----------------------------------------------------------------------
    // Incremental updates
    // -----------------------------------------------------------------------

    /// Refresh one tile's colors after it was dug out to fullness 0. The tile
    /// adopts the first colored neighbor per plane and merges any further
    /// neighbor regions the new opening joins; an isolated opening becomes a
    /// region of its own. Safe to call again on an already-refreshed tile.
    pub fn refresh_dug_tile(&mut self, grid: &TileGrid, at: TileCoord) {
        let Some(idx) = self.query_tile_index(at) else {
            return;
        };
        for group in 0..self.group_count {
            for class in TraversalClass::ALL {
                self.adopt_and_merge(grid, idx, TeamGroup(group), class);
            }
        }
    }

    /// Lock a door: the tile stops connecting regions in the owner group's
    /// planes only. Enemies can still path through a locked door to force it,
    /// and the neutral baseline keeps the connector too.
    pub fn lock_cut(&mut self, grid: &TileGrid, at: TileCoord, group: TeamGroup) {
        let Some(idx) = self.query_tile_index(at) else {
            return;
        };
        if self.cuts.contains_key(&idx) {
            return;
        }
        self.cuts.insert(idx, group);
        self.apply_cut(grid, idx, group);
    }

    /// Unlock a door: the tile becomes a connector again and whichever
    /// regions meet at it merge back together.
    pub fn unlock_cut(&mut self, grid: &TileGrid, at: TileCoord) {
        let Some(idx) = self.query_tile_index(at) else {
            return;
        };
        let Some(group) = self.cuts.remove(&idx) else {
            return;
        };
        for class in TraversalClass::ALL {
            self.adopt_and_merge(grid, idx, group, class);
        }
    }

    /// Retag every tile bearing `absorb` to `keep` in one plane. `ignore`
    /// excludes a single tile from the retag, modeling a door that acts as a
    /// graph cut while the regions around it merge.
    pub fn merge_colors(
        &mut self,
        group: TeamGroup,
        class: TraversalClass,
        keep: u32,
        absorb: u32,
        ignore: Option<TileCoord>,
    ) {
        if keep == 0 || absorb == 0 || keep == absorb {
            return;
        }
        let Some(range) = self.plane_range(group, class) else {
            return;
        };
        let ignore_idx = ignore.and_then(|c| self.query_tile_index(c));
        self.retag(range, keep, absorb, ignore_idx);
    }

    fn retag(&mut self, range: Range<usize>, keep: u32, absorb: u32, ignore: Option<usize>) {
        for (off, color) in self.colors[range].iter_mut().enumerate() {
            if ignore == Some(off) {
                continue;
            }
            if *color == absorb {
                *color = keep;
            }
        }
    }

    /// Recompute one tile's color in one plane from its neighbors: adopt the
    /// first colored neighbor, merge any differently-colored neighbor region
    /// into the adopted one, and give an isolated tile a fresh color. No-op
    /// when the tile cannot carry a color in this plane.
    fn adopt_and_merge(
        &mut self,
        grid: &TileGrid,
        idx: usize,
        group: TeamGroup,
        class: TraversalClass,
    ) {
        if !self.plane_allows(grid, idx, group, class) {
            return;
        }
        let Some(range) = self.plane_range(group, class) else {
            return;
        };
        let plane_start = range.start;
        let mut adopted = 0u32;
        for (dx, dy) in ORTHO_OFFSETS {
            let Some(n) = self.neighbor_index(idx, dx, dy) else {
                continue;
            };
            let n_color = self.colors[plane_start + n];
            if n_color == 0 {
                continue;
            }
            if adopted == 0 {
                adopted = n_color;
                self.colors[plane_start + idx] = n_color;
            } else if n_color != adopted {
                self.retag(range.clone(), adopted, n_color, None);
            }
        }
        if adopted == 0 && self.colors[plane_start + idx] == 0 {
            let fresh = self.fresh_color(group, class);
            self.colors[plane_start + idx] = fresh;
        }
    }

    /// Remove `idx` as a connector in every plane of `group`. The former
    /// region is cleared and each side of the cut refloods with its own fresh
    /// color; sides still connected around the cut end up sharing one color.
    fn apply_cut(&mut self, grid: &TileGrid, idx: usize, group: TeamGroup) {
        for class in TraversalClass::ALL {
            let Some(range) = self.plane_range(group, class) else {
                return;
            };
            let plane_start = range.start;
            let old = self.colors[plane_start + idx];
            if old == 0 {
                continue;
            }
            for color in &mut self.colors[range] {
                if *color == old {
                    *color = 0;
                }
            }
            for (dx, dy) in ORTHO_OFFSETS {
                let Some(n) = self.neighbor_index(idx, dx, dy) else {
                    continue;
                };
                if self.colors[plane_start + n] != 0 || !self.plane_allows(grid, n, group, class) {
                    continue;
                }
                let fresh = self.fresh_color(group, class);
                self.flood_from(grid, plane_start, n, fresh, group, class);
            }
        }
    }

    /// Worklist flood from `start`, painting every reachable uncolored tile
    /// that may carry a color in this plane.
    fn flood_from(
        &mut self,
        grid: &TileGrid,
        plane_start: usize,
        start: usize,
        color: u32,
        group: TeamGroup,
        class: TraversalClass,
    ) {
        self.colors[plane_start + start] = color;
        let mut stack = vec![start];
        while let Some(idx) = stack.pop() {
            for (dx, dy) in ORTHO_OFFSETS {
                let Some(n) = self.neighbor_index(idx, dx, dy) else {
                    continue;
                };
                if self.colors[plane_start + n] == 0 && self.plane_allows(grid, n, group, class) {
                    self.colors[plane_start + n] = color;
                    stack.push(n);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Plane rebuild
// ---------------------------------------------------------------------------

/// Rebuild one class plane from scratch: repeatedly seed the first uncolored
/// passable tile (row-major scan) with a fresh color and run the
/// two-directional row sweep until the plane is stable. Returns the highest
/// color assigned.
fn rebuild_plane(grid: &TileGrid, class: TraversalClass, plane: &mut [u32]) -> u32 {
    plane.fill(0);
    let width = grid.width as usize;
    let height = grid.height as usize;
    let mut next = 0u32;
    loop {
        let mut seed = None;
        for (idx, &color) in plane.iter().enumerate() {
            if color == 0 && grid.tiles()[idx].passable_by(class) {
                seed = Some(idx);
                break;
            }
        }
        let Some(seed_idx) = seed else {
            break;
        };
        next += 1;
        plane[seed_idx] = next;

        // Sweep left-to-right then right-to-left per row, backing up a row
        // whenever the row still changed, until the whole plane settles.
        let mut y = seed_idx / width;
        while y < height {
            let changed = sweep_row(grid, class, plane, y, false);
            if changed {
                sweep_row(grid, class, plane, y, true);
            }
            if changed && y > 0 {
                y -= 1;
            } else {
                y += 1;
            }
        }
    }
    next
}

/// One directional pass over row `y`: every uncolored passable tile adopts
/// the color of its first colored orthogonal neighbor. Returns whether any
/// tile changed.
fn sweep_row(
    grid: &TileGrid,
    class: TraversalClass,
    plane: &mut [u32],
    y: usize,
    reverse: bool,
) -> bool {
    let width = grid.width as usize;
    let height = grid.height as usize;
    let row = y * width;
    let mut changed = false;
    for step in 0..width {
        let x = if reverse { width - 1 - step } else { step };
        let idx = row + x;
        if plane[idx] != 0 || !grid.tiles()[idx].passable_by(class) {
            continue;
        }
        for (dx, dy) in ORTHO_OFFSETS {
            let nx = x as i32 + dx;
            let ny = y as i32 + dy;
            if nx < 0 || ny < 0 || nx >= width as i32 || ny >= height as i32 {
                continue;
            }
            let n_idx = nx as usize + ny as usize * width;
            if plane[n_idx] != 0 {
                plane[idx] = plane[n_idx];
                changed = true;
                break;
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::Tile;
    use crate::types::Terrain;

    fn open_grid(width: u32, height: u32) -> TileGrid {
        TileGrid::new(width, height, Tile::open(Terrain::Dirt))
    }

    fn at(x: i32, y: i32) -> TileCoord {
        TileCoord::new(x, y)
    }

    #[test]
    fn open_map_is_one_region() {
        let grid = open_grid(4, 4);
        let mut index = ConnectivityIndex::new();
        index.rebuild(&grid, 1);
        for class in TraversalClass::ALL {
            let base = index.color_at(TeamGroup::NEUTRAL, class, at(0, 0));
            assert_ne!(base, 0);
            for coord in grid.coords() {
                assert_eq!(index.color_at(TeamGroup::NEUTRAL, class, coord), base);
            }
        }
    }

    #[test]
    fn wall_splits_ground_region() {
        let mut grid = open_grid(5, 1);
        grid.set(at(2, 0), Tile::wall(Terrain::Dirt, 100.0));
        let mut index = ConnectivityIndex::new();
        index.rebuild(&grid, 1);
        assert!(index.connected(TeamGroup::NEUTRAL, TraversalClass::Ground, at(0, 0), at(1, 0)));
        assert!(!index.connected(TeamGroup::NEUTRAL, TraversalClass::Ground, at(0, 0), at(3, 0)));
        assert_eq!(
            index.color_at(TeamGroup::NEUTRAL, TraversalClass::Ground, at(2, 0)),
            0
        );
    }

    #[test]
    fn water_connects_only_swimming_classes() {
        let mut grid = open_grid(5, 1);
        grid.set(at(2, 0), Tile::open(Terrain::Water));
        let mut index = ConnectivityIndex::new();
        index.rebuild(&grid, 1);
        let n = TeamGroup::NEUTRAL;
        assert!(!index.connected(n, TraversalClass::Ground, at(0, 0), at(4, 0)));
        assert!(index.connected(n, TraversalClass::GroundWater, at(0, 0), at(4, 0)));
        assert!(!index.connected(n, TraversalClass::GroundLava, at(0, 0), at(4, 0)));
        assert!(index.connected(n, TraversalClass::GroundWaterLava, at(0, 0), at(4, 0)));
        assert_eq!(index.color_at(n, TraversalClass::Ground, at(2, 0)), 0);
    }

    #[test]
    fn lava_connects_only_lava_classes() {
        let mut grid = open_grid(3, 1);
        grid.set(at(1, 0), Tile::open(Terrain::Lava));
        let mut index = ConnectivityIndex::new();
        index.rebuild(&grid, 1);
        let n = TeamGroup::NEUTRAL;
        assert!(!index.connected(n, TraversalClass::Ground, at(0, 0), at(2, 0)));
        assert!(!index.connected(n, TraversalClass::GroundWater, at(0, 0), at(2, 0)));
        assert!(index.connected(n, TraversalClass::GroundLava, at(0, 0), at(2, 0)));
        assert!(index.connected(n, TraversalClass::GroundWaterLava, at(0, 0), at(2, 0)));
    }

    #[test]
    fn connectivity_is_symmetric() {
        let mut grid = open_grid(4, 3);
        grid.set(at(1, 0), Tile::wall(Terrain::Rock, 100.0));
        grid.set(at(1, 1), Tile::open(Terrain::Water));
        grid.set(at(2, 2), Tile::open(Terrain::Lava));
        let mut index = ConnectivityIndex::new();
        index.rebuild(&grid, 1);
        let coords: Vec<TileCoord> = grid.coords().collect();
        for class in TraversalClass::ALL {
            for &a in &coords {
                for &b in &coords {
                    assert_eq!(
                        index.connected(TeamGroup::NEUTRAL, class, a, b),
                        index.connected(TeamGroup::NEUTRAL, class, b, a),
                        "asymmetric answer for {a} vs {b}"
                    );
                }
            }
        }
    }

    #[test]
    fn groups_copy_neutral_baseline() {
        let mut grid = open_grid(4, 2);
        grid.set(at(2, 0), Tile::wall(Terrain::Gold, 100.0));
        let mut index = ConnectivityIndex::new();
        index.rebuild(&grid, 3);
        for coord in grid.coords() {
            for class in TraversalClass::ALL {
                let neutral = index.color_at(TeamGroup::NEUTRAL, class, coord);
                assert_eq!(index.color_at(TeamGroup(1), class, coord), neutral);
                assert_eq!(index.color_at(TeamGroup(2), class, coord), neutral);
            }
        }
    }

    #[test]
    fn dig_refresh_joins_split_regions() {
        let mut grid = open_grid(5, 1);
        grid.set(at(2, 0), Tile::wall(Terrain::Dirt, 100.0));
        let mut index = ConnectivityIndex::new();
        index.rebuild(&grid, 2);
        assert!(!index.connected(TeamGroup(1), TraversalClass::Ground, at(0, 0), at(4, 0)));

        grid.set(at(2, 0), Tile::open(Terrain::Dirt));
        index.refresh_dug_tile(&grid, at(2, 0));
        for group in [TeamGroup::NEUTRAL, TeamGroup(1)] {
            for class in TraversalClass::ALL {
                assert!(index.connected(group, class, at(0, 0), at(4, 0)));
                assert!(index.connected(group, class, at(2, 0), at(4, 0)));
            }
        }
    }

    #[test]
    fn dig_refresh_isolated_pocket_is_idempotent() {
        let mut grid = TileGrid::new(3, 3, Tile::wall(Terrain::Dirt, 100.0));
        let mut index = ConnectivityIndex::new();
        index.rebuild(&grid, 1);
        grid.set(at(1, 1), Tile::open(Terrain::Dirt));
        index.refresh_dug_tile(&grid, at(1, 1));
        let first = index.color_at(TeamGroup::NEUTRAL, TraversalClass::Ground, at(1, 1));
        assert_ne!(first, 0);
        index.refresh_dug_tile(&grid, at(1, 1));
        assert_eq!(
            index.color_at(TeamGroup::NEUTRAL, TraversalClass::Ground, at(1, 1)),
            first
        );
        assert!(index.connected(TeamGroup::NEUTRAL, TraversalClass::Ground, at(1, 1), at(1, 1)));
    }

    #[test]
    fn door_cut_blocks_owner_group_only() {
        let grid = open_grid(5, 1);
        let mut index = ConnectivityIndex::new();
        index.rebuild(&grid, 3);
        index.lock_cut(&grid, at(2, 0), TeamGroup(1));

        assert!(!index.connected(TeamGroup(1), TraversalClass::Ground, at(0, 0), at(4, 0)));
        assert_eq!(
            index.color_at(TeamGroup(1), TraversalClass::Ground, at(2, 0)),
            0
        );
        assert!(index.connected(TeamGroup::NEUTRAL, TraversalClass::Ground, at(0, 0), at(4, 0)));
        assert!(index.connected(TeamGroup(2), TraversalClass::Ground, at(0, 0), at(4, 0)));

        index.unlock_cut(&grid, at(2, 0));
        assert!(index.connected(TeamGroup(1), TraversalClass::Ground, at(0, 0), at(4, 0)));
        assert_ne!(
            index.color_at(TeamGroup(1), TraversalClass::Ground, at(2, 0)),
            0
        );
    }

    #[test]
    fn door_cut_on_loop_keeps_sides_connected() {
        // A ring of open tiles around a rock center: cutting one ring tile
        // leaves the rest connected around the other side.
        let mut grid = open_grid(3, 3);
        grid.set(at(1, 1), Tile::wall(Terrain::Rock, 100.0));
        let mut index = ConnectivityIndex::new();
        index.rebuild(&grid, 2);
        index.lock_cut(&grid, at(1, 0), TeamGroup(1));
        assert!(index.connected(TeamGroup(1), TraversalClass::Ground, at(0, 0), at(2, 0)));
        assert_eq!(
            index.color_at(TeamGroup(1), TraversalClass::Ground, at(1, 0)),
            0
        );
    }

    #[test]
    fn cuts_survive_full_rebuild() {
        let grid = open_grid(5, 1);
        let mut index = ConnectivityIndex::new();
        index.rebuild(&grid, 2);
        index.lock_cut(&grid, at(2, 0), TeamGroup(1));
        index.rebuild(&grid, 2);
        assert!(!index.connected(TeamGroup(1), TraversalClass::Ground, at(0, 0), at(4, 0)));
        assert!(index.connected(TeamGroup::NEUTRAL, TraversalClass::Ground, at(0, 0), at(4, 0)));
    }

    #[test]
    fn unknown_group_and_oob_fail_closed() {
        let grid = open_grid(2, 2);
        let mut index = ConnectivityIndex::new();
        index.rebuild(&grid, 1);
        assert_eq!(
            index.color_at(TeamGroup(9), TraversalClass::Ground, at(0, 0)),
            0
        );
        assert!(!index.connected(TeamGroup(9), TraversalClass::Ground, at(0, 0), at(1, 0)));
        assert!(!index.connected(TeamGroup::NEUTRAL, TraversalClass::Ground, at(0, 0), at(7, 7)));
        assert_eq!(
            index.color_at(TeamGroup::NEUTRAL, TraversalClass::Ground, at(-1, 0)),
            0
        );
    }

    #[test]
    fn merge_colors_respects_ignored_tile() {
        let mut grid = open_grid(5, 1);
        grid.set(at(2, 0), Tile::wall(Terrain::Dirt, 100.0));
        let mut index = ConnectivityIndex::new();
        index.rebuild(&grid, 1);
        let n = TeamGroup::NEUTRAL;
        let left = index.color_at(n, TraversalClass::Ground, at(0, 0));
        let right = index.color_at(n, TraversalClass::Ground, at(3, 0));
        assert_ne!(left, right);

        index.merge_colors(n, TraversalClass::Ground, left, right, Some(at(3, 0)));
        assert_eq!(index.color_at(n, TraversalClass::Ground, at(3, 0)), right);
        assert_eq!(index.color_at(n, TraversalClass::Ground, at(4, 0)), left);
    }
}
