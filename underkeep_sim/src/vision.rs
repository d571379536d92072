// Seat vision: which tiles a seat currently sees.
//
// Vision is the union of Chebyshev discs around the seat's creatures
// (radius = each creature's sight) plus the footprints of the seat's own
// structures. There is no line-of-sight occlusion: a wall inside the disc is
// visible, which is what lets a player watch their diggers work.

use std::collections::BTreeSet;

use crate::creature::Creature;
use crate::grid::TileGrid;
use crate::structures::Structure;
use crate::types::{SeatId, TileCoord};

/// Every tile `seat` currently sees, clipped to the grid. The set iterates
/// in coordinate order, which keeps downstream replication deterministic.
pub fn visible_tiles<'a>(
    grid: &TileGrid,
    seat: SeatId,
    creatures: impl Iterator<Item = &'a Creature>,
    structures: impl Iterator<Item = &'a Structure>,
) -> BTreeSet<TileCoord> {
    let mut seen = BTreeSet::new();
    for creature in creatures.filter(|c| c.seat == seat) {
        let r = creature.sight_radius() as i32;
        for dy in -r..=r {
            for dx in -r..=r {
                let coord = TileCoord::new(creature.pos.x + dx, creature.pos.y + dy);
                if grid.in_bounds(coord) {
                    seen.insert(coord);
                }
            }
        }
    }
    for structure in structures.filter(|s| s.seat == seat) {
        for &tile in &structure.tiles {
            if grid.in_bounds(tile) {
                seen.insert(tile);
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CreatureClass;
    use crate::structures::StructureKind;
    use crate::tile::Tile;
    use crate::types::{CreatureId, StructureId, Terrain};

    fn scout(seat: SeatId, pos: TileCoord, sight: u32) -> Creature {
        let stats = CreatureClass {
            ground_speed: 1.0,
            water_speed: 0.0,
            lava_speed: 0.0,
            sight_radius: sight,
            dig_rate: 0.0,
            claim_rate: 0.0,
        };
        Creature::new(CreatureId(1), seat, "scout", stats, pos)
    }

    #[test]
    fn sight_disc_is_chebyshev() {
        let grid = TileGrid::new(10, 10, Tile::open(Terrain::Dirt));
        let c = scout(SeatId(1), TileCoord::new(5, 5), 2);
        let seen = visible_tiles(&grid, SeatId(1), [&c].into_iter(), std::iter::empty());
        assert_eq!(seen.len(), 25);
        assert!(seen.contains(&TileCoord::new(3, 3)));
        assert!(seen.contains(&TileCoord::new(7, 7)));
        assert!(!seen.contains(&TileCoord::new(8, 5)));
    }

    #[test]
    fn sight_clips_to_grid_edge() {
        let grid = TileGrid::new(10, 10, Tile::open(Terrain::Dirt));
        let c = scout(SeatId(1), TileCoord::new(0, 0), 2);
        let seen = visible_tiles(&grid, SeatId(1), [&c].into_iter(), std::iter::empty());
        assert_eq!(seen.len(), 9);
    }

    #[test]
    fn enemy_creatures_grant_nothing() {
        let grid = TileGrid::new(10, 10, Tile::open(Terrain::Dirt));
        let c = scout(SeatId(2), TileCoord::new(5, 5), 3);
        let seen = visible_tiles(&grid, SeatId(1), [&c].into_iter(), std::iter::empty());
        assert!(seen.is_empty());
    }

    #[test]
    fn owned_structures_are_always_seen() {
        let grid = TileGrid::new(10, 10, Tile::open(Terrain::Dirt));
        let room = Structure::new(
            StructureId(1),
            StructureKind::Treasury,
            SeatId(1),
            vec![TileCoord::new(8, 8), TileCoord::new(9, 8)],
        );
        let seen = visible_tiles(&grid, SeatId(1), std::iter::empty(), [&room].into_iter());
        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&TileCoord::new(9, 8)));
    }
}
