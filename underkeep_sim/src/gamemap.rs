// The authoritative game map.
//
// `GameMap` owns the tile grid, seats, creatures, structures, and the
// derived connectivity index, and is the single writer for all of them.
// Every mutation goes through a sanctioned entry point (`dig`,
// `claim_for_seat`, `set_fullness`, `lock_door`, `set_dig_mark`, entity
// add/remove/move) that validates first, applies, patches derived state,
// and records what changed into the caller's `MapDeltas`. Invalid requests
// are rejected as no-ops, so a stale or hostile client command can never
// corrupt the map.
//
// The same type backs both roles of a session: the server's full map and
// each client's vision-filtered mirror, which receives state only through
// replicated deltas.
//
// **Critical constraint: determinism.** Collections iterate in key order,
// ids come from monotonic counters, and mutations happen on one thread.
// Two maps fed the same commands in the same order stay bit-identical,
// which is what the per-turn state checksums verify.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::config::GameConfig;
use crate::connectivity::ConnectivityIndex;
use crate::creature::Creature;
use crate::delta::{CreatureEvent, MapDeltas, MarkChange, StructureEvent};
use crate::grid::TileGrid;
use crate::pathfinding::{MoverProfile, PathfindingEngine, TilePath};
use crate::seat::{Seat, SeatRegistry};
use crate::structures::{Structure, StructureKind};
use crate::tile::{ClaimOutcome, DigOutcome, Tile};
use crate::types::{
    CreatureId, SeatId, StructureId, TeamGroup, TeamId, Terrain, TileCoord, TraversalClass,
};
use crate::vision;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameMap {
    config: GameConfig,
    grid: TileGrid,
    seats: SeatRegistry,
    creatures: BTreeMap<CreatureId, Creature>,
    structures: BTreeMap<StructureId, Structure>,
    turn: u64,
    next_creature_id: u64,
    next_structure_id: u64,
    /// Fill state for tiles the map descriptor left unlisted. Replication
    /// compresses bootstrap snapshots against this tile.
    default_terrain: Terrain,
    default_wall: bool,
    #[serde(skip)]
    conn: ConnectivityIndex,
    #[serde(skip)]
    engine: PathfindingEngine,
}

impl GameMap {
    pub fn new(grid: TileGrid, seats: Vec<Seat>, config: GameConfig) -> Self {
        let mut map = Self {
            config,
            grid,
            seats: SeatRegistry::new(seats),
            creatures: BTreeMap::new(),
            structures: BTreeMap::new(),
            turn: 0,
            next_creature_id: 0,
            next_structure_id: 0,
            default_terrain: Terrain::Dirt,
            default_wall: true,
            conn: ConnectivityIndex::new(),
            engine: PathfindingEngine::new(),
        };
        map.rebuild_connectivity();
        map
    }

    /// Rebuild the connectivity planes from the grid and reapply every
    /// locked door's cut. Needed after load and after bulk terrain edits.
    pub fn rebuild_connectivity(&mut self) {
        self.conn = ConnectivityIndex::new();
        self.conn.rebuild(&self.grid, self.seats.group_count());
        let doors: Vec<(TileCoord, TeamGroup)> = self
            .structures
            .values()
            .filter(|s| s.door_locked())
            .filter_map(|s| {
                let at = s.tiles.first().copied()?;
                let group = self.seats.group_of_seat(s.seat)?;
                Some((at, group))
            })
            .collect();
        for (at, group) in doors {
            self.conn.lock_cut(&self.grid, at, group);
        }
    }

    /// Restore derived state (connectivity planes, active spots) after
    /// deserializing a snapshot; serde skips both.
    pub fn after_load(&mut self) {
        self.rebuild_connectivity();
        for structure in self.structures.values_mut() {
            structure.recompute_active_spots(&self.grid);
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn connectivity(&self) -> &ConnectivityIndex {
        &self.conn
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn seats(&self) -> &SeatRegistry {
        &self.seats
    }

    /// Mutable seat access for the session layer (player binding).
    pub fn seats_mut(&mut self) -> &mut SeatRegistry {
        &mut self.seats
    }

    pub fn tile(&self, at: TileCoord) -> Option<&Tile> {
        self.grid.get(at)
    }

    pub fn creature(&self, id: CreatureId) -> Option<&Creature> {
        self.creatures.get(&id)
    }

    pub fn creatures(&self) -> impl Iterator<Item = &Creature> {
        self.creatures.values()
    }

    pub fn structure(&self, id: StructureId) -> Option<&Structure> {
        self.structures.get(&id)
    }

    pub fn structures(&self) -> impl Iterator<Item = &Structure> {
        self.structures.values()
    }

    pub fn turn(&self) -> u64 {
        self.turn
    }

    pub fn advance_turn(&mut self) -> u64 {
        self.turn += 1;
        self.turn
    }

    /// Mirrors adopt the server's turn counter from the bootstrap.
    pub fn set_turn(&mut self, turn: u64) {
        self.turn = turn;
    }

    // -----------------------------------------------------------------------
    // Tile mutations
    // -----------------------------------------------------------------------

    /// Directly set a tile's fullness (map editing and test setup). Digging
    /// a wall down to 0 patches connectivity incrementally; raising a wall
    /// out of open ground forces a full rebuild, since that can split
    /// regions. A tile changing between wall and ground sheds its claim
    /// state and dig marks.
    pub fn set_fullness(&mut self, at: TileCoord, value: f32, deltas: &mut MapDeltas) -> bool {
        if !(value >= 0.0) || value > self.config.max_fullness {
            return false;
        }
        let (was_wall, now_wall, canceled) = {
            let Some(tile) = self.grid.get_mut(at) else {
                return false;
            };
            if matches!(tile.terrain, Terrain::Water | Terrain::Lava) {
                return false;
            }
            if value > 0.0 && tile.covering_structure.is_some() {
                return false;
            }
            if tile.fullness == value {
                return true;
            }
            let was_wall = tile.is_wall();
            tile.fullness = value;
            let now_wall = tile.is_wall();
            let mut canceled: SmallVec<[SeatId; 2]> = SmallVec::new();
            if was_wall != now_wall {
                tile.owner = None;
                tile.claimed_fraction = 0.0;
                canceled = tile.take_marks_where(|_| false);
            }
            (was_wall, now_wall, canceled)
        };
        for seat in canceled {
            deltas.mark_changes.push(MarkChange {
                seat,
                tiles: vec![at],
                marked: false,
            });
        }
        deltas.mark_tile_dirty(at);
        if was_wall && !now_wall {
            self.conn.refresh_dug_tile(&self.grid, at);
            self.recompute_spots_near(at);
        } else if !was_wall && now_wall {
            self.conn.rebuild(&self.grid, self.seats.group_count());
            self.recompute_spots_near(at);
        }
        true
    }

    /// One dig action by `seat` against the wall at `at`. Mined gold is
    /// credited to the seat; a tile dug open patches connectivity and
    /// clears every seat's dig mark on it.
    pub fn dig(
        &mut self,
        at: TileCoord,
        seat: SeatId,
        amount: f32,
        deltas: &mut MapDeltas,
    ) -> DigOutcome {
        if self.seats.get(seat).is_none() || !self.is_diggable(at, seat) {
            return DigOutcome::Rejected;
        }
        let outcome = {
            let Some(tile) = self.grid.get_mut(at) else {
                return DigOutcome::Rejected;
            };
            tile.dig(amount, self.config.gold_per_fullness_dug, &self.config.claim)
        };
        match outcome {
            DigOutcome::Rejected => {}
            DigOutcome::Progress { gold } => {
                if gold > 0.0 {
                    self.seats.credit_gold(seat, gold);
                    deltas.mark_seat_dirty(seat);
                }
                deltas.mark_tile_dirty(at);
            }
            DigOutcome::DugOut { gold } => {
                if gold > 0.0 {
                    self.seats.credit_gold(seat, gold);
                    deltas.mark_seat_dirty(seat);
                }
                let canceled = match self.grid.get_mut(at) {
                    Some(tile) => tile.take_marks_where(|_| false),
                    None => SmallVec::new(),
                };
                for s in canceled {
                    deltas.mark_changes.push(MarkChange {
                        seat: s,
                        tiles: vec![at],
                        marked: false,
                    });
                }
                deltas.mark_tile_dirty(at);
                self.conn.refresh_dug_tile(&self.grid, at);
                self.recompute_spots_near(at);
            }
        }
        outcome
    }

    /// One claim action by `seat` at `at`: ground conversion, or wall
    /// fortification when the wall has adjacent claimed ground support.
    /// Finishing a claim cancels enemy dig marks on the tile and refreshes
    /// nearby active spots.
    pub fn claim_for_seat(
        &mut self,
        at: TileCoord,
        seat: SeatId,
        rate: f32,
        deltas: &mut MapDeltas,
    ) -> ClaimOutcome {
        if self.seats.get(seat).is_none() {
            return ClaimOutcome::Rejected;
        }
        if !self.is_ground_claimable(at) && !self.is_wall_claimable(at, seat) {
            return ClaimOutcome::Rejected;
        }
        let allied_with_owner = {
            let Some(tile) = self.grid.get(at) else {
                return ClaimOutcome::Rejected;
            };
            tile.owner.is_none_or(|o| self.seats.allied(seat, o))
        };
        let outcome = {
            let Some(tile) = self.grid.get_mut(at) else {
                return ClaimOutcome::Rejected;
            };
            tile.claim_for_seat(seat, allied_with_owner, rate, &self.config.claim)
        };
        match outcome {
            ClaimOutcome::Rejected => {}
            ClaimOutcome::Progress | ClaimOutcome::Flipped => deltas.mark_tile_dirty(at),
            ClaimOutcome::FullyClaimed => {
                deltas.mark_tile_dirty(at);
                let canceled = {
                    let seats = &self.seats;
                    match self.grid.get_mut(at) {
                        Some(tile) => tile.take_marks_where(|s| seats.allied(seat, s)),
                        None => SmallVec::new(),
                    }
                };
                for s in canceled {
                    deltas.mark_changes.push(MarkChange {
                        seat: s,
                        tiles: vec![at],
                        marked: false,
                    });
                }
                self.recompute_spots_near(at);
            }
        }
        outcome
    }

    /// Mark or unmark a tile for digging on behalf of `seat`. Marking
    /// requires the tile to be diggable by that seat right now; unmarking
    /// is always allowed.
    pub fn set_dig_mark(
        &mut self,
        at: TileCoord,
        seat: SeatId,
        marked: bool,
        deltas: &mut MapDeltas,
    ) -> bool {
        if self.seats.get(seat).is_none() {
            return false;
        }
        if marked && !self.is_diggable(at, seat) {
            return false;
        }
        let changed = {
            let Some(tile) = self.grid.get_mut(at) else {
                return false;
            };
            tile.set_mark(seat, marked)
        };
        if changed {
            deltas.mark_changes.push(MarkChange {
                seat,
                tiles: vec![at],
                marked,
            });
        }
        changed
    }

    /// Lock or unlock a door. Locking cuts the door tile out of the owning
    /// side's connectivity planes; enemies keep pathing through it.
    pub fn lock_door(&mut self, id: StructureId, locked: bool, deltas: &mut MapDeltas) -> bool {
        let (at, seat) = {
            let Some(structure) = self.structures.get(&id) else {
                return false;
            };
            let Some(&at) = structure.tiles.first() else {
                return false;
            };
            (at, structure.seat)
        };
        let changed = self
            .structures
            .get_mut(&id)
            .is_some_and(|s| s.set_door_locked(locked));
        if !changed {
            return false;
        }
        if let Some(group) = self.seats.group_of_seat(seat) {
            if locked {
                self.conn.lock_cut(&self.grid, at, group);
            } else {
                self.conn.unlock_cut(&self.grid, at);
            }
        }
        deltas
            .structure_events
            .push(StructureEvent::DoorState(id, locked));
        true
    }

    // -----------------------------------------------------------------------
    // Predicates
    // -----------------------------------------------------------------------

    /// Whether `seat` may dig the tile at `at` right now.
    pub fn is_diggable(&self, at: TileCoord, seat: SeatId) -> bool {
        let Some(tile) = self.grid.get(at) else {
            return false;
        };
        let allied = tile.owner.is_some_and(|o| self.seats.allied(seat, o));
        tile.is_diggable(allied)
    }

    pub fn is_ground_claimable(&self, at: TileCoord) -> bool {
        self.grid.get(at).is_some_and(|t| t.is_ground_claimable())
    }

    /// Whether `seat` may fortify the wall at `at`: a dirt wall with an
    /// orthogonally adjacent fully claimed allied ground tile. A wall an
    /// enemy finished stays theirs while any adjacent fully claimed ground
    /// tile of that enemy still supports it.
    pub fn is_wall_claimable(&self, at: TileCoord, seat: SeatId) -> bool {
        let Some(tile) = self.grid.get(at) else {
            return false;
        };
        if !tile.wall_claimable_kind() {
            return false;
        }
        if tile.is_fully_claimed() {
            let Some(owner) = tile.owner else {
                return false;
            };
            if self.seats.allied(seat, owner) {
                return false;
            }
            if self.ortho_ground_support(at, owner) {
                return false;
            }
        }
        self.ortho_ground_support(at, seat)
    }

    /// Any orthogonal neighbor that is fully claimed open ground of a seat
    /// allied with `seat`.
    fn ortho_ground_support(&self, at: TileCoord, seat: SeatId) -> bool {
        self.grid.ortho_neighbors(at).into_iter().any(|n| {
            self.grid.get(n).is_some_and(|t| {
                !t.is_wall()
                    && t.is_fully_claimed()
                    && t.owner.is_some_and(|o| self.seats.allied(seat, o))
            })
        })
    }

    /// Active spots of any structure covering `at` or a neighboring tile
    /// are stale after a wall or claim change there.
    fn recompute_spots_near(&mut self, at: TileCoord) {
        let mut ids: SmallVec<[StructureId; 4]> = SmallVec::new();
        let mut coords = self.grid.all_neighbors(at);
        coords.push(at);
        for coord in coords {
            if let Some(id) = self.grid.get(coord).and_then(|t| t.covering_structure) {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        for id in ids {
            if let Some(structure) = self.structures.get_mut(&id) {
                structure.recompute_active_spots(&self.grid);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Creatures
    // -----------------------------------------------------------------------

    /// Spawn a creature of a configured class. Fails for unknown seats or
    /// classes and for tiles the class cannot stand on.
    pub fn add_creature(
        &mut self,
        seat: SeatId,
        class_name: &str,
        pos: TileCoord,
        deltas: &mut MapDeltas,
    ) -> Option<CreatureId> {
        self.seats.get(seat)?;
        let stats = self.config.class(class_name)?.clone();
        let tile = self.grid.get(pos)?;
        let class = TraversalClass::from_speeds(stats.water_speed, stats.lava_speed);
        if !tile.passable_by(class) {
            return None;
        }
        self.next_creature_id += 1;
        let id = CreatureId(self.next_creature_id);
        self.creatures
            .insert(id, Creature::new(id, seat, class_name, stats, pos));
        deltas.creature_events.push(CreatureEvent::Spawned(id));
        Some(id)
    }

    pub fn remove_creature(&mut self, id: CreatureId, deltas: &mut MapDeltas) -> bool {
        if self.creatures.remove(&id).is_none() {
            return false;
        }
        deltas.creature_events.push(CreatureEvent::Removed(id));
        true
    }

    /// Authoritative position update. The destination must be occupiable
    /// for the creature (its own locked doors included).
    pub fn move_creature(&mut self, id: CreatureId, to: TileCoord, deltas: &mut MapDeltas) -> bool {
        let Some(profile) = self.mover_profile(id, false) else {
            return false;
        };
        let Some(tile) = self.grid.get(to) else {
            return false;
        };
        if !profile.can_occupy(to, tile) {
            return false;
        }
        let Some(creature) = self.creatures.get_mut(&id) else {
            return false;
        };
        if creature.pos == to {
            return true;
        }
        creature.pos = to;
        deltas.creature_events.push(CreatureEvent::Moved(id));
        true
    }

    /// Build the pathfinding profile for a creature: movement class, team
    /// group, allied seats, and the doors currently shut against it.
    pub fn mover_profile(&self, id: CreatureId, through_diggable: bool) -> Option<MoverProfile> {
        let creature = self.creatures.get(&id)?;
        let group = self.seats.group_of_seat(creature.seat)?;
        let mut profile = MoverProfile::from_class(&creature.stats, group);
        profile.seat = Some(creature.seat);
        profile.through_diggable = through_diggable;
        for other in self.seats.ids() {
            if self.seats.allied(creature.seat, other) {
                profile.allied_seats.push(other);
            }
        }
        for structure in self.structures.values() {
            if structure.door_locked() && self.seats.allied(creature.seat, structure.seat) {
                if let Some(&at) = structure.tiles.first() {
                    profile.blocked_tiles.push(at);
                }
            }
        }
        Some(profile)
    }

    // -----------------------------------------------------------------------
    // Structures
    // -----------------------------------------------------------------------

    /// Place a structure over open ground tiles. Every tile must exist, be
    /// open ground, and not already covered; a door covers exactly one
    /// tile. Covered ground belongs to the builder outright, and a door
    /// placed locked cuts connectivity immediately.
    pub fn add_structure(
        &mut self,
        kind: StructureKind,
        seat: SeatId,
        tiles: Vec<TileCoord>,
        deltas: &mut MapDeltas,
    ) -> Option<StructureId> {
        self.seats.get(seat)?;
        if tiles.is_empty() || (kind.is_door() && tiles.len() != 1) {
            return None;
        }
        for &at in &tiles {
            let tile = self.grid.get(at)?;
            if tile.is_wall() || !tile.terrain.open_is_ground() || tile.covering_structure.is_some()
            {
                return None;
            }
        }
        self.next_structure_id += 1;
        let id = StructureId(self.next_structure_id);
        let mut structure = Structure::new(id, kind, seat, tiles);
        for &at in &structure.tiles {
            if let Some(tile) = self.grid.get_mut(at) {
                tile.covering_structure = Some(id);
                tile.owner = Some(seat);
                tile.claimed_fraction = 1.0;
            }
            deltas.mark_tile_dirty(at);
        }
        structure.recompute_active_spots(&self.grid);
        let locked_door_at = if structure.door_locked() {
            structure.tiles.first().copied()
        } else {
            None
        };
        self.structures.insert(id, structure);
        deltas.structure_events.push(StructureEvent::Added(id));
        if let Some(at) = locked_door_at {
            if let Some(group) = self.seats.group_of_seat(seat) {
                self.conn.lock_cut(&self.grid, at, group);
            }
        }
        Some(id)
    }

    /// Remove a structure, releasing its tiles (they stay claimed ground)
    /// and undoing a locked door's cut.
    pub fn remove_structure(&mut self, id: StructureId, deltas: &mut MapDeltas) -> bool {
        let Some(structure) = self.structures.remove(&id) else {
            return false;
        };
        if structure.door_locked() {
            if let Some(&at) = structure.tiles.first() {
                self.conn.unlock_cut(&self.grid, at);
            }
        }
        for &at in &structure.tiles {
            if let Some(tile) = self.grid.get_mut(at) {
                tile.covering_structure = None;
            }
            deltas.mark_tile_dirty(at);
        }
        deltas.structure_events.push(StructureEvent::Removed(id));
        true
    }

    // -----------------------------------------------------------------------
    // Replication appliers
    // -----------------------------------------------------------------------
    // Client mirrors rebuild their partial state from authoritative
    // snapshots. These setters skip gameplay validation (the server already
    // ran it) but keep derived state consistent. Tile appliers do not touch
    // the connectivity planes; callers apply a whole delta batch, then call
    // `rebuild_connectivity` once.

    /// The fill tile's terrain and wall flag, as loaded from the descriptor.
    pub fn bootstrap_defaults(&self) -> (Terrain, bool) {
        (self.default_terrain, self.default_wall)
    }

    /// Overwrite one tile's replicated fields. Ownership arrives only for
    /// fully claimed tiles, so a present owner always means fraction 1.0.
    pub fn apply_replicated_tile(
        &mut self,
        at: TileCoord,
        terrain: Terrain,
        fullness: f32,
        owner: Option<SeatId>,
    ) -> bool {
        let Some(tile) = self.grid.get_mut(at) else {
            return false;
        };
        tile.terrain = terrain;
        tile.fullness = fullness;
        tile.owner = owner;
        tile.claimed_fraction = if owner.is_some() { 1.0 } else { 0.0 };
        true
    }

    /// Insert a creature under a server-assigned id.
    pub fn apply_replicated_creature(
        &mut self,
        id: CreatureId,
        seat: SeatId,
        class_name: &str,
        at: TileCoord,
    ) -> bool {
        if !self.grid.in_bounds(at) {
            return false;
        }
        let Some(stats) = self.config.class(class_name).cloned() else {
            return false;
        };
        self.creatures
            .insert(id, Creature::new(id, seat, class_name, stats, at));
        self.next_creature_id = self.next_creature_id.max(id.0 + 1);
        true
    }

    /// Teleport a replicated creature to its authoritative position.
    pub fn apply_replicated_move(&mut self, id: CreatureId, to: TileCoord) -> bool {
        if !self.grid.in_bounds(to) {
            return false;
        }
        match self.creatures.get_mut(&id) {
            Some(creature) => {
                creature.pos = to;
                true
            }
            None => false,
        }
    }

    /// Insert a structure under a server-assigned id, wiring up coverage
    /// pointers and a locked door's connectivity cut. Footprint claims
    /// arrive separately as tile deltas.
    pub fn apply_replicated_structure(
        &mut self,
        id: StructureId,
        kind: StructureKind,
        seat: SeatId,
        tiles: Vec<TileCoord>,
    ) -> bool {
        if tiles.is_empty() || tiles.iter().any(|&at| !self.grid.in_bounds(at)) {
            return false;
        }
        let mut structure = Structure::new(id, kind, seat, tiles);
        structure.recompute_active_spots(&self.grid);
        for &at in &structure.tiles {
            if let Some(tile) = self.grid.get_mut(at) {
                tile.covering_structure = Some(id);
            }
        }
        if structure.door_locked() {
            if let (Some(&at), Some(group)) =
                (structure.tiles.first(), self.seats.group_of_seat(seat))
            {
                self.conn.lock_cut(&self.grid, at, group);
            }
        }
        self.structures.insert(id, structure);
        self.next_structure_id = self.next_structure_id.max(id.0 + 1);
        true
    }

    /// Replace `seat`'s dig-mark state on the listed tiles.
    pub fn apply_replicated_marks(&mut self, seat: SeatId, tiles: &[TileCoord], marked: bool) {
        for &at in tiles {
            if let Some(tile) = self.grid.get_mut(at) {
                tile.set_mark(seat, marked);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Path queries and vision
    // -----------------------------------------------------------------------

    /// O(1) reachability from the connectivity planes.
    pub fn path_exists(&self, mover: &MoverProfile, from: TileCoord, to: TileCoord) -> bool {
        self.conn.connected(mover.group, mover.class, from, to)
    }

    pub fn find_path(&mut self, mover: &MoverProfile, from: TileCoord, to: TileCoord) -> TilePath {
        self.engine.find_path(&self.grid, &self.conn, mover, from, to)
    }

    pub fn find_best_among(
        &mut self,
        mover: &MoverProfile,
        from: TileCoord,
        candidates: &[TileCoord],
    ) -> Option<(TileCoord, TilePath)> {
        self.engine
            .find_best_among(&self.grid, &self.conn, mover, from, candidates)
    }

    /// Every tile `seat` currently sees: creature sight discs plus owned
    /// structure footprints.
    pub fn visible_tiles(&self, seat: SeatId) -> BTreeSet<TileCoord> {
        vision::visible_tiles(
            &self.grid,
            seat,
            self.creatures.values(),
            self.structures.values(),
        )
    }
}

// ---------------------------------------------------------------------------
// Map descriptors
// ---------------------------------------------------------------------------

fn default_wall_flag() -> bool {
    true
}

fn default_fill_terrain() -> Terrain {
    Terrain::Dirt
}

fn default_claim_fraction() -> f32 {
    1.0
}

/// JSON-loadable initial map: dimensions, a fill tile, per-tile overrides,
/// and starting entities. Consumed once at load; the running game never
/// refers back to it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MapDescriptor {
    pub width: u32,
    pub height: u32,
    /// Terrain for every tile without an override.
    #[serde(default = "default_fill_terrain")]
    pub default_terrain: Terrain,
    /// Whether the fill is a full wall (the usual undug map) or open.
    #[serde(default = "default_wall_flag")]
    pub default_wall: bool,
    #[serde(default)]
    pub tiles: Vec<TileOverride>,
    #[serde(default)]
    pub seats: Vec<SeatDescriptor>,
    #[serde(default)]
    pub creatures: Vec<CreatureDescriptor>,
    #[serde(default)]
    pub structures: Vec<StructureDescriptor>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TileOverride {
    pub x: i32,
    pub y: i32,
    pub terrain: Terrain,
    /// 0 (the default) means open; positive means a wall with that much
    /// digging left.
    #[serde(default)]
    pub fullness: f32,
    #[serde(default)]
    pub owner: Option<SeatId>,
    /// Only read when `owner` is set; defaults to fully claimed.
    #[serde(default = "default_claim_fraction")]
    pub claimed_fraction: f32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SeatDescriptor {
    pub id: SeatId,
    pub team: TeamId,
    #[serde(default)]
    pub gold: f32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreatureDescriptor {
    pub seat: SeatId,
    pub class: String,
    pub x: i32,
    pub y: i32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StructureDescriptor {
    pub kind: StructureKind,
    pub seat: SeatId,
    pub tiles: Vec<(i32, i32)>,
}

impl GameMap {
    /// Build a map from a descriptor, validating every override and entity.
    /// The first invalid entry aborts the load with a description of what
    /// was wrong.
    pub fn from_descriptor(desc: &MapDescriptor, config: GameConfig) -> Result<Self, String> {
        if desc.width == 0 || desc.height == 0 {
            return Err("map dimensions must be nonzero".to_string());
        }
        if desc.default_wall && matches!(desc.default_terrain, Terrain::Water | Terrain::Lava) {
            return Err(format!(
                "{:?} terrain cannot form walls",
                desc.default_terrain
            ));
        }
        let fill = if desc.default_wall {
            Tile::wall(desc.default_terrain, config.max_fullness)
        } else {
            Tile::open(desc.default_terrain)
        };
        let mut grid = TileGrid::new(desc.width, desc.height, fill);
        for o in &desc.tiles {
            let at = TileCoord::new(o.x, o.y);
            if !grid.in_bounds(at) {
                return Err(format!("tile override ({}, {}) is out of bounds", o.x, o.y));
            }
            if !(o.fullness >= 0.0) || o.fullness > config.max_fullness {
                return Err(format!(
                    "tile override ({}, {}) has invalid fullness {}",
                    o.x, o.y, o.fullness
                ));
            }
            if o.fullness > 0.0 && matches!(o.terrain, Terrain::Water | Terrain::Lava) {
                return Err(format!("{:?} terrain cannot form walls", o.terrain));
            }
            let mut tile = if o.fullness > 0.0 {
                Tile::wall(o.terrain, o.fullness)
            } else {
                Tile::open(o.terrain)
            };
            if let Some(owner) = o.owner {
                tile.owner = Some(owner);
                tile.claimed_fraction = o.claimed_fraction.clamp(0.0, 1.0);
            }
            grid.set(at, tile);
        }

        let mut ids = BTreeSet::new();
        let mut seats = Vec::new();
        for s in &desc.seats {
            if s.id.0 == 0 {
                return Err("seat id 0 is reserved".to_string());
            }
            if !ids.insert(s.id) {
                return Err(format!("duplicate seat id {}", s.id.0));
            }
            seats.push(Seat::new(s.id, s.team, s.gold));
        }

        let mut map = GameMap::new(grid, seats, config);
        map.default_terrain = desc.default_terrain;
        map.default_wall = desc.default_wall;
        let mut scratch = MapDeltas::new();
        for c in &desc.creatures {
            let at = TileCoord::new(c.x, c.y);
            if map.add_creature(c.seat, &c.class, at, &mut scratch).is_none() {
                return Err(format!(
                    "cannot spawn {} for seat {} at ({}, {})",
                    c.class, c.seat.0, c.x, c.y
                ));
            }
        }
        for s in &desc.structures {
            let tiles = s
                .tiles
                .iter()
                .map(|&(x, y)| TileCoord::new(x, y))
                .collect();
            if map.add_structure(s.kind, s.seat, tiles, &mut scratch).is_none() {
                return Err(format!("cannot place {:?} for seat {}", s.kind, s.seat.0));
            }
        }
        Ok(map)
    }
}
