// Structures: doors and rooms covering tiles of the map.
//
// A closed sum type rather than an open class hierarchy: the simulation only
// ever needs to know the kind, the owning seat, the covered tiles, and the
// derived active spots. Center spots (every orthogonal neighbor also
// covered) are where a room does its work; wall spots (covered tile against
// a wall) are where furnishings hang. Both are recomputed whenever coverage
// or nearby walls change, and are never serialized.

use serde::{Deserialize, Serialize};

use crate::grid::{ORTHO_OFFSETS, TileGrid};
use crate::types::{SeatId, StructureId, TileCoord};

/// What a structure is. Doors carry their lock state inline; everything
/// else is stateless beyond coverage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StructureKind {
    Door { locked: bool },
    Treasury,
    Dormitory,
    Workshop,
}

impl StructureKind {
    pub fn ordinal(self) -> u8 {
        match self {
            StructureKind::Door { .. } => 0,
            StructureKind::Treasury => 1,
            StructureKind::Dormitory => 2,
            StructureKind::Workshop => 3,
        }
    }

    /// Rebuild a kind from its wire parts. The lock flag only matters for
    /// doors; unknown ordinals are `None`.
    pub fn from_parts(ordinal: u8, locked: bool) -> Option<StructureKind> {
        match ordinal {
            0 => Some(StructureKind::Door { locked }),
            1 => Some(StructureKind::Treasury),
            2 => Some(StructureKind::Dormitory),
            3 => Some(StructureKind::Workshop),
            _ => None,
        }
    }

    pub fn is_door(self) -> bool {
        matches!(self, StructureKind::Door { .. })
    }
}

/// One placed structure.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Structure {
    pub id: StructureId,
    pub kind: StructureKind,
    pub seat: SeatId,
    /// Covered tiles, sorted for deterministic iteration and lookup.
    pub tiles: Vec<TileCoord>,
    #[serde(skip)]
    pub center_spots: Vec<TileCoord>,
    #[serde(skip)]
    pub wall_spots: Vec<TileCoord>,
}

impl Structure {
    pub fn new(id: StructureId, kind: StructureKind, seat: SeatId, mut tiles: Vec<TileCoord>) -> Self {
        tiles.sort();
        tiles.dedup();
        Self {
            id,
            kind,
            seat,
            tiles,
            center_spots: Vec::new(),
            wall_spots: Vec::new(),
        }
    }

    pub fn covers(&self, at: TileCoord) -> bool {
        self.tiles.binary_search(&at).is_ok()
    }

    pub fn is_door(&self) -> bool {
        self.kind.is_door()
    }

    pub fn door_locked(&self) -> bool {
        matches!(self.kind, StructureKind::Door { locked: true })
    }

    /// Set a door's lock state. Returns false for non-doors and for writes
    /// that change nothing.
    pub fn set_door_locked(&mut self, locked: bool) -> bool {
        match self.kind {
            StructureKind::Door { locked: current } if current != locked => {
                self.kind = StructureKind::Door { locked };
                true
            }
            _ => false,
        }
    }

    /// Recompute the derived spot lists from current coverage and walls.
    pub fn recompute_active_spots(&mut self, grid: &TileGrid) {
        let mut center_spots = Vec::new();
        let mut wall_spots = Vec::new();
        for &t in &self.tiles {
            let mut covered = 0;
            let mut touches_wall = false;
            for (dx, dy) in ORTHO_OFFSETS {
                let n = TileCoord::new(t.x + dx, t.y + dy);
                if self.covers(n) {
                    covered += 1;
                }
                if grid.get(n).is_some_and(|tile| tile.is_wall()) {
                    touches_wall = true;
                }
            }
            if covered == ORTHO_OFFSETS.len() {
                center_spots.push(t);
            }
            if touches_wall {
                wall_spots.push(t);
            }
        }
        self.center_spots = center_spots;
        self.wall_spots = wall_spots;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::Tile;
    use crate::types::Terrain;

    fn at(x: i32, y: i32) -> TileCoord {
        TileCoord::new(x, y)
    }

    fn square_3x3(origin: TileCoord) -> Vec<TileCoord> {
        let mut tiles = Vec::new();
        for dy in 0..3 {
            for dx in 0..3 {
                tiles.push(at(origin.x + dx, origin.y + dy));
            }
        }
        tiles
    }

    #[test]
    fn kind_ordinal_roundtrip() {
        for kind in [
            StructureKind::Door { locked: true },
            StructureKind::Door { locked: false },
            StructureKind::Treasury,
            StructureKind::Dormitory,
            StructureKind::Workshop,
        ] {
            let rebuilt = StructureKind::from_parts(
                kind.ordinal(),
                matches!(kind, StructureKind::Door { locked: true }),
            );
            assert_eq!(rebuilt, Some(kind));
        }
        assert_eq!(StructureKind::from_parts(9, false), None);
    }

    #[test]
    fn center_spot_needs_full_orthogonal_coverage() {
        let grid = TileGrid::new(8, 8, Tile::open(Terrain::Dirt));
        let mut room = Structure::new(
            StructureId(1),
            StructureKind::Treasury,
            SeatId(1),
            square_3x3(at(2, 2)),
        );
        room.recompute_active_spots(&grid);
        assert_eq!(room.center_spots, vec![at(3, 3)]);
        assert!(room.wall_spots.is_empty());
    }

    #[test]
    fn wall_spots_hug_adjacent_walls() {
        let mut grid = TileGrid::new(8, 8, Tile::open(Terrain::Dirt));
        // Wall column just left of the room.
        for y in 2..5 {
            grid.set(at(1, y), Tile::wall(Terrain::Dirt, 100.0));
        }
        let mut room = Structure::new(
            StructureId(1),
            StructureKind::Dormitory,
            SeatId(1),
            square_3x3(at(2, 2)),
        );
        room.recompute_active_spots(&grid);
        assert_eq!(room.wall_spots, vec![at(2, 2), at(2, 3), at(2, 4)]);
    }

    #[test]
    fn door_lock_state_changes() {
        let mut door = Structure::new(
            StructureId(2),
            StructureKind::Door { locked: false },
            SeatId(1),
            vec![at(4, 4)],
        );
        assert!(door.is_door());
        assert!(!door.door_locked());
        assert!(door.set_door_locked(true));
        assert!(door.door_locked());
        assert!(!door.set_door_locked(true));

        let mut room = Structure::new(
            StructureId(3),
            StructureKind::Workshop,
            SeatId(1),
            vec![at(0, 0)],
        );
        assert!(!room.set_door_locked(true));
    }

    #[test]
    fn coverage_is_sorted_and_deduplicated() {
        let room = Structure::new(
            StructureId(4),
            StructureKind::Treasury,
            SeatId(1),
            vec![at(2, 0), at(0, 0), at(2, 0), at(1, 0)],
        );
        assert_eq!(room.tiles, vec![at(0, 0), at(1, 0), at(2, 0)]);
        assert!(room.covers(at(1, 0)));
        assert!(!room.covers(at(3, 0)));
    }
}
