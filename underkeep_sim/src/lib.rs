// underkeep_sim: pure Rust dungeon simulation library.
//
// This crate contains all map and simulation logic for Underkeep: the tile
// grid, the claim/dig state machine, region connectivity, pathfinding,
// entities, and per-turn change tracking. It has zero networking
// dependencies and can be tested, benchmarked, and run headless; the
// companion crates `underkeep_protocol` and `underkeep_net` put it on the
// wire.
//
// Module overview:
// - `gamemap.rs`:      GameMap, the authoritative map, its mutation API, and
//                      JSON map descriptors. The single writer of everything below.
// - `grid.rs`:         Dense row-major tile grid + neighbor offset tables.
// - `tile.rs`:         One tile: terrain, fullness, claim state machine, dig marks.
// - `connectivity.rs`: Per-(team group, traversal class) region color planes:
//                      O(1) reachability, incremental refresh, door cuts.
// - `pathfinding.rs`:  Weighted A* over the grid, gated by the color planes.
// - `creature.rs`:     Creature entities (position + class stats).
// - `structures.rs`:   Rooms and doors, with derived active spots.
// - `seat.rs`:         Seats, teams, and the alliance-derived team groups.
// - `vision.rs`:       Per-seat visible tile sets (sight discs + footprints).
// - `delta.rs`:        MapDeltas, the per-turn mutation record replication reads.
// - `config.rs`:       GameConfig, all tunable parameters, JSON-loaded.
// - `types.rs`:        TileCoord, ids, Terrain, TraversalClass, TeamGroup.
//
// **Critical constraint: determinism.** The map is a pure function of its
// command sequence: `(state, commands) -> (new_state, deltas)`. No
// `HashMap` iteration in replicated state, no system time, no OS entropy.
// Use `BTreeMap` for ordered collections. Server and client mirrors verify
// this with per-turn state checksums.

pub mod config;
pub mod connectivity;
pub mod creature;
pub mod delta;
pub mod gamemap;
pub mod grid;
pub mod pathfinding;
pub mod seat;
pub mod structures;
pub mod tile;
pub mod types;
pub mod vision;
