// A* pathfinding over the tile grid.
//
// Paths are tile sequences exclusive of the start tile and inclusive of the
// destination, weighted by per-tile movement speed. Before searching, the
// flood-fill colors answer reachability in O(1) and reject most impossible
// queries outright; the one exception is a mover standing on its own locked
// door, whose tile is uncolored for its group yet still a legal place to
// start from.
//
// The engine owns a reusable node arena, a visited map keyed by flat tile
// index, and an open-set binary heap, so repeated queries do not reallocate.
//
// **Critical constraint: determinism.** Equal-cost candidates are broken by
// open-set insertion order: the heap orders entries by (total cost, sequence
// number), so the first-discovered tile wins ties. Neighbor expansion order
// is the fixed `ORTHO_OFFSETS` / `DIAGONAL_OFFSETS` order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::config::CreatureClass;
use crate::connectivity::ConnectivityIndex;
use crate::grid::{DIAGONAL_OFFSETS, ORTHO_OFFSETS, TileGrid};
use crate::tile::Tile;
use crate::types::{SeatId, TeamGroup, Terrain, TileCoord, TraversalClass};

// ---------------------------------------------------------------------------
// Mover profile
// ---------------------------------------------------------------------------

/// Movement capabilities of one query's subject.
///
/// Built by `GameMap` from a creature's class, seat, and the doors currently
/// locked against it. The engine itself never touches entity state.
#[derive(Clone, Debug)]
pub struct MoverProfile {
    pub class: TraversalClass,
    pub group: TeamGroup,
    pub seat: Option<SeatId>,
    pub ground_speed: f32,
    pub water_speed: f32,
    pub lava_speed: f32,
    /// Seats allied with the mover, the mover's own seat included.
    pub allied_seats: SmallVec<[SeatId; 4]>,
    /// Tiles whose covering door is currently locked against this mover.
    pub blocked_tiles: SmallVec<[TileCoord; 4]>,
    /// Treat diggable walls as walkable, for planning routes through rock
    /// that still needs digging.
    pub through_diggable: bool,
}

impl MoverProfile {
    pub fn from_class(def: &CreatureClass, group: TeamGroup) -> Self {
        Self {
            class: TraversalClass::from_speeds(def.water_speed, def.lava_speed),
            group,
            seat: None,
            ground_speed: def.ground_speed,
            water_speed: def.water_speed,
            lava_speed: def.lava_speed,
            allied_seats: SmallVec::new(),
            blocked_tiles: SmallVec::new(),
            through_diggable: false,
        }
    }

    pub fn max_speed(&self) -> f32 {
        self.ground_speed.max(self.water_speed).max(self.lava_speed)
    }

    pub fn allied_with(&self, other: SeatId) -> bool {
        self.allied_seats.contains(&other)
    }

    /// Whether the mover may stand on `tile` during normal movement.
    pub fn can_occupy(&self, at: TileCoord, tile: &Tile) -> bool {
        !self.blocked_tiles.contains(&at) && tile.passable_by(self.class)
    }

    /// Speed over a tile's terrain, ignoring door blocks. Used for the cost
    /// of leaving a tile; leaving a wall costs ground speed (the mover is
    /// digging its way out).
    pub fn speed_on(&self, tile: &Tile) -> f32 {
        if tile.is_wall() {
            return self.ground_speed;
        }
        match tile.terrain {
            Terrain::Dirt | Terrain::Gold => self.ground_speed,
            Terrain::Water => self.water_speed,
            Terrain::Lava => self.lava_speed,
            Terrain::Rock | Terrain::Gem => 0.0,
        }
    }

    /// Whether the search may expand through `tile`: occupiable, or a wall
    /// the mover's seat could dig when planning through diggables.
    fn can_traverse(&self, at: TileCoord, tile: &Tile) -> bool {
        if self.can_occupy(at, tile) {
            return true;
        }
        if !self.through_diggable || !tile.is_wall() {
            return false;
        }
        let allied = tile.owner.is_some_and(|o| self.allied_with(o));
        tile.is_diggable(allied)
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// A computed path plus its accumulated weighted cost. Tiles run from the
/// first step (the start tile is not included) to the destination.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TilePath {
    pub tiles: Vec<TileCoord>,
    pub cost: f32,
}

impl TilePath {
    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn destination(&self) -> Option<TileCoord> {
        self.tiles.last().copied()
    }
}

// ---------------------------------------------------------------------------
// Search engine
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct Node {
    coord: TileCoord,
    g: f32,
    /// Arena handle of the predecessor, -1 for the start node.
    parent: i32,
    closed: bool,
}

/// Open-set entry. Reversed ordering turns `BinaryHeap` into a min-heap on
/// (f, seq); the sequence number makes earlier insertions win cost ties.
#[derive(Clone, Copy, Debug)]
struct OpenEntry {
    f: f32,
    seq: u32,
    node: u32,
}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f
            .total_cmp(&self.f)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OpenEntry {}

/// Reusable A* searcher. One instance per thread of use; queries reset and
/// reuse the internal allocations.
#[derive(Clone, Debug, Default)]
pub struct PathfindingEngine {
    nodes: Vec<Node>,
    by_tile: FxHashMap<usize, u32>,
    open: BinaryHeap<OpenEntry>,
    seq: u32,
}

impl PathfindingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shortest weighted path for `mover` from `from` to `to`, or an empty
    /// path when none exists. The start tile itself may be impassable (a
    /// mover shut in by its own door still gets to leave); every later step
    /// enforces passability.
    pub fn find_path(
        &mut self,
        grid: &TileGrid,
        conn: &ConnectivityIndex,
        mover: &MoverProfile,
        from: TileCoord,
        to: TileCoord,
    ) -> TilePath {
        let Some(start_flat) = grid.index(from) else {
            return TilePath::default();
        };
        if grid.index(to).is_none() || from == to || mover.max_speed() <= 0.0 {
            return TilePath::default();
        }
        // The color planes are skipped when digging through walls is allowed:
        // they only describe the already-open world.
        if !mover.through_diggable && !fast_reject_passes(grid, conn, mover, from, to) {
            return TilePath::default();
        }

        self.nodes.clear();
        self.by_tile.clear();
        self.open.clear();
        self.seq = 0;

        self.nodes.push(Node {
            coord: from,
            g: 0.0,
            parent: -1,
            closed: false,
        });
        self.by_tile.insert(start_flat, 0);
        self.push_open(0, heuristic(from, to, mover));

        let mut found = None;
        while let Some(entry) = self.open.pop() {
            let handle = entry.node as usize;
            if self.nodes[handle].closed {
                continue;
            }
            self.nodes[handle].closed = true;
            let current = self.nodes[handle].coord;
            if current == to {
                found = Some(entry.node);
                break;
            }

            let current_g = self.nodes[handle].g;
            let leave_speed = match grid.get(current) {
                Some(tile) => mover.speed_on(tile),
                None => continue,
            };
            if leave_speed <= 0.0 {
                continue;
            }

            // Orthogonal neighbors first: their passability gates the
            // diagonals, so a corner is never cut past a wall. The dig
            // allowance deliberately does not open a flank.
            let mut flank_open = [false; 4];
            for (i, (dx, dy)) in ORTHO_OFFSETS.iter().enumerate() {
                let n = TileCoord::new(current.x + dx, current.y + dy);
                let Some(tile) = grid.get(n) else {
                    continue;
                };
                if mover.can_occupy(n, tile) {
                    flank_open[i] = true;
                } else if !mover.can_traverse(n, tile) {
                    continue;
                }
                self.relax(entry.node, current_g, leave_speed, n, 1, grid, mover, to);
            }
            for ((dx, dy), (f1, f2)) in DIAGONAL_OFFSETS {
                if !flank_open[f1] || !flank_open[f2] {
                    continue;
                }
                let n = TileCoord::new(current.x + dx, current.y + dy);
                let Some(tile) = grid.get(n) else {
                    continue;
                };
                if !mover.can_traverse(n, tile) {
                    continue;
                }
                self.relax(entry.node, current_g, leave_speed, n, 2, grid, mover, to);
            }
        }

        let Some(dest_handle) = found else {
            return TilePath::default();
        };
        let cost = self.nodes[dest_handle as usize].g;
        let mut tiles = Vec::new();
        let mut cursor = dest_handle as i32;
        while cursor >= 0 {
            let node = &self.nodes[cursor as usize];
            tiles.push(node.coord);
            cursor = node.parent;
        }
        tiles.pop(); // drop the start tile
        tiles.reverse();
        TilePath { tiles, cost }
    }

    /// Cheapest-to-reach candidate and its path. Candidates are tried in
    /// ascending straight-line order; the search stops once a candidate's
    /// straight-line lower bound (crow distance over max speed) can no
    /// longer beat the best path already found.
    pub fn find_best_among(
        &mut self,
        grid: &TileGrid,
        conn: &ConnectivityIndex,
        mover: &MoverProfile,
        from: TileCoord,
        candidates: &[TileCoord],
    ) -> Option<(TileCoord, TilePath)> {
        let max_speed = mover.max_speed();
        if max_speed <= 0.0 {
            return None;
        }
        let mut sorted = candidates.to_vec();
        sorted.sort_by(|a, b| from.crow_distance(*a).total_cmp(&from.crow_distance(*b)));

        let mut best: Option<(TileCoord, TilePath)> = None;
        for cand in sorted {
            if let Some((_, best_path)) = &best {
                if from.crow_distance(cand) / max_speed >= best_path.cost {
                    break;
                }
            }
            let path = self.find_path(grid, conn, mover, from, cand);
            if path.is_empty() {
                continue;
            }
            let better = match &best {
                None => true,
                Some((_, best_path)) => path.cost < best_path.cost,
            };
            if better {
                best = Some((cand, path));
            }
        }
        best
    }

    #[allow(clippy::too_many_arguments)]
    fn relax(
        &mut self,
        parent: u32,
        parent_g: f32,
        leave_speed: f32,
        n: TileCoord,
        step: u32,
        grid: &TileGrid,
        mover: &MoverProfile,
        goal: TileCoord,
    ) {
        let Some(n_flat) = grid.index(n) else {
            return;
        };
        let g = parent_g + step as f32 / leave_speed;
        match self.by_tile.get(&n_flat) {
            Some(&handle) => {
                let node = &mut self.nodes[handle as usize];
                if node.closed || g >= node.g {
                    return;
                }
                node.g = g;
                node.parent = parent as i32;
                let f = g + heuristic(n, goal, mover);
                self.push_open(handle, f);
            }
            None => {
                let handle = self.nodes.len() as u32;
                self.nodes.push(Node {
                    coord: n,
                    g,
                    parent: parent as i32,
                    closed: false,
                });
                self.by_tile.insert(n_flat, handle);
                let f = g + heuristic(n, goal, mover);
                self.push_open(handle, f);
            }
        }
    }

    fn push_open(&mut self, node: u32, f: f32) {
        self.seq += 1;
        self.open.push(OpenEntry {
            f,
            seq: self.seq,
            node,
        });
    }
}

/// Manhattan distance scaled by the mover's best speed, so the estimate
/// never exceeds the true remaining cost.
fn heuristic(from: TileCoord, goal: TileCoord, mover: &MoverProfile) -> f32 {
    from.manhattan_distance(goal) as f32 / mover.max_speed()
}

/// O(1) reachability check via the color planes. An uncolored start that is
/// still standable (a mover sitting on its own locked door) passes through
/// to the full search.
fn fast_reject_passes(
    grid: &TileGrid,
    conn: &ConnectivityIndex,
    mover: &MoverProfile,
    from: TileCoord,
    to: TileCoord,
) -> bool {
    let start_color = conn.color_at(mover.group, mover.class, from);
    let dest_color = conn.color_at(mover.group, mover.class, to);
    if start_color == 0 {
        let standable = grid.get(from).is_some_and(|t| t.passable_by(mover.class));
        return standable && dest_color != 0;
    }
    start_color == dest_color
}
