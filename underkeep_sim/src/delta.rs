// Per-turn mutation record.
//
// Every sanctioned `GameMap` mutation reports what changed into a
// `MapDeltas` collector passed in by the caller. The replication layer
// turns one turn's collector into per-client wire messages; tests inspect
// it directly. Nothing in the sim posts to a global queue; the collector
// is the only channel out of a mutation.
//
// Tile changes are a `BTreeSet` so per-client delta construction iterates
// in a deterministic order.

use crate::types::{CreatureId, SeatId, StructureId, TileCoord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A creature lifecycle event observed during a mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreatureEvent {
    Spawned(CreatureId),
    Moved(CreatureId),
    Removed(CreatureId),
}

/// A structure lifecycle event observed during a mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StructureEvent {
    Added(StructureId),
    Removed(StructureId),
    DoorState(StructureId, bool),
}

/// A change to one seat's dig marks, addressed to that seat only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkChange {
    pub seat: SeatId,
    pub tiles: Vec<TileCoord>,
    pub marked: bool,
}

/// Everything that changed during one turn's mutations.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MapDeltas {
    /// Tiles whose replicated state (terrain, fullness, owner) changed.
    pub dirty_tiles: BTreeSet<TileCoord>,
    pub creature_events: Vec<CreatureEvent>,
    pub structure_events: Vec<StructureEvent>,
    pub mark_changes: Vec<MarkChange>,
    /// Seats whose replicated state (gold) changed.
    pub dirty_seats: BTreeSet<SeatId>,
}

impl MapDeltas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_tile_dirty(&mut self, coord: TileCoord) {
        self.dirty_tiles.insert(coord);
    }

    pub fn mark_seat_dirty(&mut self, seat: SeatId) {
        self.dirty_seats.insert(seat);
    }

    pub fn is_empty(&self) -> bool {
        self.dirty_tiles.is_empty()
            && self.creature_events.is_empty()
            && self.structure_events.is_empty()
            && self.mark_changes.is_empty()
            && self.dirty_seats.is_empty()
    }

    /// Reset for the next turn without releasing allocations.
    pub fn clear(&mut self) {
        self.dirty_tiles.clear();
        self.creature_events.clear();
        self.structure_events.clear();
        self.mark_changes.clear();
        self.dirty_seats.clear();
    }
}
