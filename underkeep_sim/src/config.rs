// Data-driven game configuration.
//
// All tunable simulation parameters live here in `GameConfig`, loaded from
// JSON at startup. The sim never uses magic numbers; it reads from the
// config. In multiplayer the server's config is authoritative; clients only
// need the creature class table, which the bootstrap message replicates.
//
// Claim/dig tuning is grouped into `ClaimParams`. Creature behavior is
// data-driven: named `CreatureClass` templates (speed per terrain, sight
// radius, work rates) keyed by class name in the `creature_classes` map,
// following the same shape the original's creature definition files used.
//
// **Critical constraint: determinism.** Config values feed directly into
// claim and dig arithmetic. Server and clients must use identical class
// tables for identical mirrored state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tuning for the per-tile claim/dig state machine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClaimParams {
    /// Multiplier applied to the claim rate when claiming a wall tile
    /// (fullness > 0) instead of open ground.
    pub wall_claim_penalty: f32,
    /// Multiplier applied to dig amounts against a fully claimed wall.
    pub claimed_wall_dig_penalty: f32,
    /// Concurrent claimers allowed on one tile; further attempts are
    /// rejected, not queued.
    pub max_claimers_per_tile: u8,
    /// Concurrent diggers allowed on one tile.
    pub max_diggers_per_tile: u8,
}

impl Default for ClaimParams {
    fn default() -> Self {
        Self {
            wall_claim_penalty: 0.5,
            claimed_wall_dig_penalty: 0.2,
            max_claimers_per_tile: 1,
            max_diggers_per_tile: 2,
        }
    }
}

/// A named creature template: movement speeds per terrain, sight radius,
/// and work rates. Zero water/lava speed means that terrain is impassable
/// for the class, which also selects its traversal class.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreatureClass {
    pub ground_speed: f32,
    pub water_speed: f32,
    pub lava_speed: f32,
    /// Vision disc radius in tiles (Chebyshev).
    pub sight_radius: u32,
    /// Fullness removed per dig action.
    pub dig_rate: f32,
    /// Claim fraction added per claim action.
    pub claim_rate: f32,
}

/// Top-level game configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameConfig {
    /// Fullness value of an untouched wall. Digging counts down from here.
    pub max_fullness: f32,

    /// Gold credited to the digging seat per point of fullness removed from
    /// a gold or gem tile.
    pub gold_per_fullness_dug: f32,

    /// Claim/dig state machine tuning.
    pub claim: ClaimParams,

    /// Sight radius used when a creature's class is missing from the table.
    pub default_sight_radius: u32,

    /// Per-class behavioral data, keyed by class name. Replicated to
    /// clients in the bootstrap message.
    pub creature_classes: BTreeMap<String, CreatureClass>,
}

impl GameConfig {
    /// Look up a creature class, if defined.
    pub fn class(&self, name: &str) -> Option<&CreatureClass> {
        self.creature_classes.get(name)
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        let mut creature_classes = BTreeMap::new();
        creature_classes.insert(
            "worker".to_string(),
            CreatureClass {
                ground_speed: 1.0,
                water_speed: 0.0,
                lava_speed: 0.0,
                sight_radius: 8,
                dig_rate: 10.0,
                claim_rate: 0.35,
            },
        );
        creature_classes.insert(
            "warrior".to_string(),
            CreatureClass {
                ground_speed: 0.9,
                water_speed: 0.6,
                lava_speed: 0.0,
                sight_radius: 10,
                dig_rate: 0.0,
                claim_rate: 0.0,
            },
        );
        creature_classes.insert(
            "salamander".to_string(),
            CreatureClass {
                ground_speed: 0.8,
                water_speed: 0.0,
                lava_speed: 0.8,
                sight_radius: 9,
                dig_rate: 0.0,
                claim_rate: 0.0,
            },
        );

        Self {
            max_fullness: 100.0,
            gold_per_fullness_dug: 1.0,
            claim: ClaimParams::default(),
            default_sight_radius: 8,
            creature_classes,
        }
    }
}
