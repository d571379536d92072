// Dense 2D tile grid for the game map.
//
// The map is stored as a flat `Vec<Tile>` indexed by `x + y * width`,
// giving O(1) access. Out-of-bounds reads return `None`; out-of-bounds
// writes are no-ops. The grid is sized once at load and never grows;
// tiles mutate in place for the whole session.
//
// Neighbor enumeration lives here: the four orthogonal offsets, the four
// diagonal offsets, and the flank pairs the pathfinder uses to keep movers
// from cutting wall corners (a diagonal step is legal only when both
// orthogonal tiles flanking it are passable).
//
// See also: `connectivity.rs` for the flood-fill color planes layered over
// this grid, `gamemap.rs` which owns the grid and is the only sanctioned
// mutator.

use crate::tile::Tile;
use crate::types::TileCoord;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// The four orthogonal neighbor offsets: west, east, south, north.
pub const ORTHO_OFFSETS: [(i32, i32); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];

/// The four diagonal neighbor offsets, each paired with the two indices
/// into `ORTHO_OFFSETS` whose tiles flank it.
pub const DIAGONAL_OFFSETS: [((i32, i32), (usize, usize)); 4] = [
    ((-1, -1), (0, 2)),
    ((-1, 1), (0, 3)),
    ((1, -1), (1, 2)),
    ((1, 1), (1, 3)),
];

/// Dense 2D tile grid.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TileGrid {
    /// Flat storage: index = x + y * width.
    tiles: Vec<Tile>,
    pub width: u32,
    pub height: u32,
}

impl TileGrid {
    /// Create a grid with every tile cloned from `fill`.
    pub fn new(width: u32, height: u32, fill: Tile) -> Self {
        let total = (width as usize) * (height as usize);
        Self {
            tiles: vec![fill; total],
            width,
            height,
        }
    }

    /// Check whether a coordinate is within bounds.
    pub fn in_bounds(&self, coord: TileCoord) -> bool {
        coord.x >= 0
            && coord.y >= 0
            && (coord.x as u32) < self.width
            && (coord.y as u32) < self.height
    }

    /// Convert a coordinate to a flat index. Returns `None` if out of bounds.
    pub fn index(&self, coord: TileCoord) -> Option<usize> {
        if self.in_bounds(coord) {
            Some(coord.x as usize + coord.y as usize * self.width as usize)
        } else {
            None
        }
    }

    /// Total tile count (`width * height`).
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    /// Flat tile storage, row-major. Hot loops index this directly.
    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Read a tile. Returns `None` for out-of-bounds coordinates.
    pub fn get(&self, coord: TileCoord) -> Option<&Tile> {
        self.index(coord).map(|i| &self.tiles[i])
    }

    /// Mutable tile access. Returns `None` for out-of-bounds coordinates.
    pub fn get_mut(&mut self, coord: TileCoord) -> Option<&mut Tile> {
        self.index(coord).map(move |i| &mut self.tiles[i])
    }

    /// Replace a tile. No-op for out-of-bounds coordinates.
    pub fn set(&mut self, coord: TileCoord, tile: Tile) {
        if let Some(i) = self.index(coord) {
            self.tiles[i] = tile;
        }
    }

    /// In-bounds orthogonal neighbors of `coord`.
    pub fn ortho_neighbors(&self, coord: TileCoord) -> SmallVec<[TileCoord; 4]> {
        let mut out = SmallVec::new();
        for (dx, dy) in ORTHO_OFFSETS {
            let n = TileCoord::new(coord.x + dx, coord.y + dy);
            if self.in_bounds(n) {
                out.push(n);
            }
        }
        out
    }

    /// In-bounds neighbors of `coord`, orthogonal then diagonal.
    pub fn all_neighbors(&self, coord: TileCoord) -> SmallVec<[TileCoord; 8]> {
        let mut out = SmallVec::new();
        for (dx, dy) in ORTHO_OFFSETS {
            let n = TileCoord::new(coord.x + dx, coord.y + dy);
            if self.in_bounds(n) {
                out.push(n);
            }
        }
        for ((dx, dy), _) in DIAGONAL_OFFSETS {
            let n = TileCoord::new(coord.x + dx, coord.y + dy);
            if self.in_bounds(n) {
                out.push(n);
            }
        }
        out
    }

    /// Iterate all coordinates in row-major order (x fastest).
    pub fn coords(&self) -> impl Iterator<Item = TileCoord> + '_ {
        let width = self.width as i32;
        let height = self.height as i32;
        (0..height).flat_map(move |y| (0..width).map(move |x| TileCoord::new(x, y)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Terrain;

    fn wall() -> Tile {
        Tile::wall(Terrain::Dirt, 100.0)
    }

    #[test]
    fn new_grid_is_filled_with_template() {
        let grid = TileGrid::new(4, 3, wall());
        assert_eq!(grid.len(), 12);
        for coord in grid.coords() {
            let tile = grid.get(coord).unwrap();
            assert_eq!(tile.terrain, Terrain::Dirt);
            assert!(tile.is_wall());
        }
    }

    #[test]
    fn out_of_bounds_read_returns_none() {
        let grid = TileGrid::new(4, 4, wall());
        assert!(grid.get(TileCoord::new(-1, 0)).is_none());
        assert!(grid.get(TileCoord::new(0, -1)).is_none());
        assert!(grid.get(TileCoord::new(4, 0)).is_none());
        assert!(grid.get(TileCoord::new(0, 4)).is_none());
        assert!(grid.get(TileCoord::new(100, 100)).is_none());
    }

    #[test]
    fn out_of_bounds_write_is_noop() {
        let mut grid = TileGrid::new(4, 4, wall());
        // Should not panic.
        grid.set(TileCoord::new(-1, 0), Tile::open(Terrain::Water));
        grid.set(TileCoord::new(100, 0), Tile::open(Terrain::Water));
        for coord in grid.coords() {
            assert_eq!(grid.get(coord).unwrap().terrain, Terrain::Dirt);
        }
    }

    #[test]
    fn indexing_is_correct() {
        // Verify the indexing scheme: x + y * width.
        let mut grid = TileGrid::new(10, 6, wall());
        let coord = TileCoord::new(5, 3);
        grid.set(coord, Tile::open(Terrain::Gold));
        assert_eq!(grid.get(coord).unwrap().terrain, Terrain::Gold);
        assert_eq!(grid.get(TileCoord::new(4, 3)).unwrap().terrain, Terrain::Dirt);
        assert_eq!(grid.get(TileCoord::new(5, 2)).unwrap().terrain, Terrain::Dirt);
        assert_eq!(grid.get(TileCoord::new(6, 3)).unwrap().terrain, Terrain::Dirt);
    }

    #[test]
    fn neighbor_counts_at_corner_edge_and_interior() {
        let grid = TileGrid::new(5, 5, wall());
        assert_eq!(grid.ortho_neighbors(TileCoord::new(0, 0)).len(), 2);
        assert_eq!(grid.all_neighbors(TileCoord::new(0, 0)).len(), 3);
        assert_eq!(grid.ortho_neighbors(TileCoord::new(2, 0)).len(), 3);
        assert_eq!(grid.all_neighbors(TileCoord::new(2, 0)).len(), 5);
        assert_eq!(grid.ortho_neighbors(TileCoord::new(2, 2)).len(), 4);
        assert_eq!(grid.all_neighbors(TileCoord::new(2, 2)).len(), 8);
    }

    #[test]
    fn diagonal_flank_pairs_point_at_their_orthogonals() {
        for ((dx, dy), (a, b)) in DIAGONAL_OFFSETS {
            let (ax, ay) = ORTHO_OFFSETS[a];
            let (bx, by) = ORTHO_OFFSETS[b];
            // The two flanks must combine into the diagonal.
            assert_eq!((ax + bx, ay + by), (dx, dy));
        }
    }

    #[test]
    fn coords_iterates_row_major() {
        let grid = TileGrid::new(3, 2, wall());
        let coords: Vec<TileCoord> = grid.coords().collect();
        assert_eq!(coords.len(), 6);
        assert_eq!(coords[0], TileCoord::new(0, 0));
        assert_eq!(coords[1], TileCoord::new(1, 0));
        assert_eq!(coords[3], TileCoord::new(0, 1));
    }

    #[test]
    fn mutation_through_get_mut() {
        let mut grid = TileGrid::new(4, 4, wall());
        let coord = TileCoord::new(1, 1);
        grid.get_mut(coord).unwrap().fullness = 0.0;
        assert!(!grid.get(coord).unwrap().is_wall());
        assert!(grid.get_mut(TileCoord::new(9, 9)).is_none());
    }
}
