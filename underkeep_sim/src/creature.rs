// Creatures: seat-owned entities with a position and movement stats.

use serde::{Deserialize, Serialize};

use crate::config::CreatureClass;
use crate::types::{CreatureId, SeatId, TileCoord, TraversalClass};

/// A creature on the map.
///
/// Stats are copied out of the class definition at spawn time, so a creature
/// keeps behaving the same even if the config is edited under a running
/// game. The class name is kept for replication and display.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Creature {
    pub id: CreatureId,
    pub seat: SeatId,
    pub class_name: String,
    pub pos: TileCoord,
    pub stats: CreatureClass,
}

impl Creature {
    pub fn new(
        id: CreatureId,
        seat: SeatId,
        class_name: &str,
        stats: CreatureClass,
        pos: TileCoord,
    ) -> Self {
        Self {
            id,
            seat,
            class_name: class_name.to_owned(),
            pos,
            stats,
        }
    }

    /// Connectivity class implied by the creature's movement speeds.
    pub fn traversal_class(&self) -> TraversalClass {
        TraversalClass::from_speeds(self.stats.water_speed, self.stats.lava_speed)
    }

    pub fn sight_radius(&self) -> u32 {
        self.stats.sight_radius
    }
}
