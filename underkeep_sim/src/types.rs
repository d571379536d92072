// Core types shared across the simulation.
//
// Defines tile coordinates (`TileCoord`), strongly-typed integer identifiers
// for seats, creatures, and structures, terrain kinds, and the traversal-class
// enum that partitions connectivity per mover capability. All types derive
// `Serialize` and `Deserialize` for save/load and test-time state comparison.
//
// **Critical constraint: determinism.** Identifiers are monotonic counters
// handed out by `GameMap`: no UUIDs, no OS entropy. Server and clients must
// agree on every id byte-for-byte.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Spatial types
// ---------------------------------------------------------------------------

/// A position in the 2D tile grid. Each component is in tile units.
///
/// The coordinate system matches the map layout: X grows east, Y grows
/// north. Coordinates are signed so arithmetic near the map edge never
/// underflows; the grid itself rejects out-of-range lookups.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    pub x: i32,
    pub y: i32,
}

impl TileCoord {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Manhattan distance between two coordinates.
    pub fn manhattan_distance(self, other: Self) -> u32 {
        (self.x - other.x).unsigned_abs() + (self.y - other.y).unsigned_abs()
    }

    /// Chebyshev (king-move) distance between two coordinates.
    pub fn chebyshev_distance(self, other: Self) -> u32 {
        (self.x - other.x)
            .unsigned_abs()
            .max((self.y - other.y).unsigned_abs())
    }

    /// Straight-line distance between two coordinates.
    pub fn crow_distance(self, other: Self) -> f32 {
        let dx = (self.x - other.x) as f32;
        let dy = (self.y - other.y) as f32;
        (dx * dx + dy * dy).sqrt()
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

// ---------------------------------------------------------------------------
// Strongly-typed id wrappers: compact integers, assigned by the server.
// ---------------------------------------------------------------------------

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident($int:ty)) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub $int);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

numeric_id!(/// A player slot. Seat id 0 is reserved as the wire encoding for
/// "no owner"; real seats always use nonzero ids.
SeatId(u32));
numeric_id!(/// A team of allied seats. Seats with equal `TeamId` are allies.
TeamId(u32));
numeric_id!(/// Unique identifier for a creature entity.
CreatureId(u64));
numeric_id!(/// Unique identifier for a structure (door, room).
StructureId(u64));

/// Index into the flood-fill color planes for one allied team group.
///
/// Group 0 is the neutral baseline: it ignores door ownership and is the
/// view copied into every real group when the index is rebuilt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TeamGroup(pub u32);

impl TeamGroup {
    pub const NEUTRAL: TeamGroup = TeamGroup(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// ---------------------------------------------------------------------------
// Terrain
// ---------------------------------------------------------------------------

/// The material of a single tile.
///
/// Ownership (claiming) is tracked separately on the tile; a claimed tile
/// keeps its terrain kind. `Gem` walls are diggable forever for gold but
/// never open into ground.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Terrain {
    Dirt = 0,
    Gold = 1,
    Rock = 2,
    Water = 3,
    Lava = 4,
    Gem = 5,
}

impl Terrain {
    /// Inverse of `ordinal`, for wire decoding. Unknown ordinals are `None`.
    pub fn from_ordinal(v: u8) -> Option<Terrain> {
        match v {
            0 => Some(Terrain::Dirt),
            1 => Some(Terrain::Gold),
            2 => Some(Terrain::Rock),
            3 => Some(Terrain::Water),
            4 => Some(Terrain::Lava),
            5 => Some(Terrain::Gem),
            _ => None,
        }
    }

    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// Whether this terrain can ever be dug (wall removal or gem mining).
    pub fn kind_diggable(self) -> bool {
        matches!(self, Terrain::Dirt | Terrain::Gold | Terrain::Gem)
    }

    /// Whether an open tile of this terrain is walkable ground.
    pub fn open_is_ground(self) -> bool {
        matches!(self, Terrain::Dirt | Terrain::Gold)
    }
}

impl Default for Terrain {
    fn default() -> Self {
        Self::Dirt
    }
}

// ---------------------------------------------------------------------------
// Traversal classes
// ---------------------------------------------------------------------------

/// Capability bucket partitioning connectivity per mover type.
///
/// A mover's class is derived from which movement speeds are nonzero; the
/// flood-fill index maintains one color plane per class so "can A reach B"
/// is answered per capability, not per creature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum TraversalClass {
    Ground = 0,
    GroundWater = 1,
    GroundLava = 2,
    GroundWaterLava = 3,
}

impl TraversalClass {
    /// All classes in rebuild priority order (ground first).
    pub const ALL: [TraversalClass; 4] = [
        TraversalClass::Ground,
        TraversalClass::GroundWater,
        TraversalClass::GroundLava,
        TraversalClass::GroundWaterLava,
    ];

    pub const COUNT: usize = 4;

    /// Derive the class from a mover's movement speeds.
    pub fn from_speeds(water_speed: f32, lava_speed: f32) -> TraversalClass {
        match (water_speed > 0.0, lava_speed > 0.0) {
            (true, true) => TraversalClass::GroundWaterLava,
            (true, false) => TraversalClass::GroundWater,
            (false, true) => TraversalClass::GroundLava,
            (false, false) => TraversalClass::Ground,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn crosses_water(self) -> bool {
        matches!(
            self,
            TraversalClass::GroundWater | TraversalClass::GroundWaterLava
        )
    }

    pub fn crosses_lava(self) -> bool {
        matches!(
            self,
            TraversalClass::GroundLava | TraversalClass::GroundWaterLava
        )
    }
}
