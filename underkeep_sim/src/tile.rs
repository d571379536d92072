// A single map tile and its claim/dig state machine.
//
// Tiles hold terrain, wall fullness (0 = open ground, >0 = wall), claim
// ownership state, per-seat dig marks, and transient worker-capacity
// counters. The claim state machine here is tile-local: alliance checks and
// neighbor effects (connectivity refresh, active-spot recomputes, mark
// cancellation) are orchestrated by `GameMap`, which is the only sanctioned
// caller of these mutators.
//
// Claim lifecycle: unclaimed → contested (0 < fraction < 1, owner
// tentatively the leading claimer) → claimed (fraction = 1, owner fixed).
// An enemy claim drives the fraction down; crossing zero flips ownership to
// the claimer and keeps the positive excess, so contesting never stalls at
// an exact zero. The fraction is normalized to [0, 1] before every mutator
// returns.

use crate::config::ClaimParams;
use crate::types::{SeatId, Terrain, TraversalClass};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Result of one claim action on a tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The tile cannot be claimed by this call (bad rate, already owned in
    /// full by the claimer's side). Nothing changed.
    Rejected,
    /// The fraction moved; ownership did not finalize.
    Progress,
    /// Ownership flipped to the claimer mid-contest.
    Flipped,
    /// The fraction reached 1.0 for the claimer's side; the caller must run
    /// full-claim effects (mark cancellation, active-spot recomputes).
    FullyClaimed,
}

/// Result of one dig action on a tile.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DigOutcome {
    /// Not diggable by the digging seat. Nothing changed.
    Rejected,
    /// Fullness dropped but the tile is still a wall. `gold` is the amount
    /// mined (nonzero only for gold/gem terrain).
    Progress { gold: f32 },
    /// Fullness reached 0; the caller must refresh connectivity.
    DugOut { gold: f32 },
}

/// One tile of the dense map grid.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tile {
    pub terrain: Terrain,
    /// 0 = open ground; >0 = wall with this much digging left.
    pub fullness: f32,
    /// Owning seat. Tentative while contested; fixed once fraction is 1.
    pub owner: Option<SeatId>,
    /// Claim contest progress in [0, 1].
    pub claimed_fraction: f32,
    /// Seats that marked this tile for digging.
    pub dig_marks: SmallVec<[SeatId; 2]>,
    /// Structure covering this tile, if any.
    pub covering_structure: Option<crate::types::StructureId>,
    /// Workers currently claiming this tile. Runtime-only accounting.
    #[serde(skip)]
    pub claimers: u8,
    /// Workers currently digging this tile. Runtime-only accounting.
    #[serde(skip)]
    pub diggers: u8,
}

impl Tile {
    /// A wall tile at full fullness.
    pub fn wall(terrain: Terrain, max_fullness: f32) -> Self {
        Self {
            terrain,
            fullness: max_fullness,
            owner: None,
            claimed_fraction: 0.0,
            dig_marks: SmallVec::new(),
            covering_structure: None,
            claimers: 0,
            diggers: 0,
        }
    }

    /// An open tile (ground, water, or lava depending on terrain).
    pub fn open(terrain: Terrain) -> Self {
        Self {
            terrain,
            fullness: 0.0,
            owner: None,
            claimed_fraction: 0.0,
            dig_marks: SmallVec::new(),
            covering_structure: None,
            claimers: 0,
            diggers: 0,
        }
    }

    pub fn is_wall(&self) -> bool {
        self.fullness > 0.0
    }

    pub fn is_fully_claimed(&self) -> bool {
        self.claimed_fraction >= 1.0
    }

    /// Whether this tile is claimed in full by `seat`'s side.
    pub fn is_claimed_for(&self, seat: SeatId, allied: impl Fn(SeatId, SeatId) -> bool) -> bool {
        match self.owner {
            Some(owner) if self.is_fully_claimed() => allied(owner, seat),
            _ => false,
        }
    }

    /// Whether a mover of `class` can occupy this tile.
    ///
    /// Walls block every class. Open rock or gem (which a well-formed map
    /// never contains) is treated as impassable.
    pub fn passable_by(&self, class: TraversalClass) -> bool {
        if self.is_wall() {
            return false;
        }
        match self.terrain {
            Terrain::Water => class.crosses_water(),
            Terrain::Lava => class.crosses_lava(),
            _ => self.terrain.open_is_ground(),
        }
    }

    // -----------------------------------------------------------------------
    // Claim state machine
    // -----------------------------------------------------------------------

    /// Whether open ground here can be claimed at all.
    pub fn is_ground_claimable(&self) -> bool {
        !self.is_wall() && self.terrain.open_is_ground() && self.covering_structure.is_none()
    }

    /// Whether this wall's terrain kind is contestable by wall claiming.
    /// Gold walls are not; their value is in digging them.
    pub fn wall_claimable_kind(&self) -> bool {
        self.is_wall() && self.terrain == Terrain::Dirt
    }

    /// Apply one claim action. `allied` tells whether the claimer's side
    /// matches the current owner's; the caller resolves alliances.
    pub fn claim_for_seat(
        &mut self,
        claimer: SeatId,
        allied: bool,
        rate: f32,
        params: &ClaimParams,
    ) -> ClaimOutcome {
        if !(rate > 0.0) {
            return ClaimOutcome::Rejected;
        }
        let mut rate = rate;
        if self.is_wall() {
            rate *= params.wall_claim_penalty;
        }

        if self.owner.is_none() || allied {
            if self.is_fully_claimed() {
                return ClaimOutcome::Rejected;
            }
            if self.owner.is_none() {
                self.owner = Some(claimer);
            }
            self.claimed_fraction += rate;
            if self.claimed_fraction >= 1.0 {
                self.claimed_fraction = 1.0;
                return ClaimOutcome::FullyClaimed;
            }
            ClaimOutcome::Progress
        } else {
            self.claimed_fraction -= rate;
            if self.claimed_fraction > 0.0 {
                return ClaimOutcome::Progress;
            }
            // Crossed zero: the claimer takes over with the excess.
            self.claimed_fraction = -self.claimed_fraction;
            self.owner = Some(claimer);
            if self.claimed_fraction >= 1.0 {
                self.claimed_fraction = 1.0;
                return ClaimOutcome::FullyClaimed;
            }
            ClaimOutcome::Flipped
        }
    }

    // -----------------------------------------------------------------------
    // Digging
    // -----------------------------------------------------------------------

    /// Whether `seat` may dig this tile. `allied` tells whether the seat is
    /// allied with the tile's owner (ignored unless fully claimed).
    pub fn is_diggable(&self, allied: bool) -> bool {
        if !self.is_wall() || !self.terrain.kind_diggable() {
            return false;
        }
        if self.is_fully_claimed() {
            return allied;
        }
        true
    }

    /// Apply one dig action of `amount` fullness. The caller has already
    /// validated `is_diggable`. Gem tiles never lose fullness but still
    /// yield gold; fully claimed walls dig slower.
    pub fn dig(&mut self, amount: f32, gold_per_fullness: f32, params: &ClaimParams) -> DigOutcome {
        if !(amount > 0.0) || !self.is_wall() {
            return DigOutcome::Rejected;
        }
        let mut amount = amount;
        if self.is_fully_claimed() {
            amount *= params.claimed_wall_dig_penalty;
        }

        if self.terrain == Terrain::Gem {
            return DigOutcome::Progress {
                gold: amount * gold_per_fullness,
            };
        }

        let removed = amount.min(self.fullness);
        self.fullness -= removed;
        let gold = if self.terrain == Terrain::Gold {
            removed * gold_per_fullness
        } else {
            0.0
        };

        if self.fullness <= 0.0 {
            self.fullness = 0.0;
            // An opened tile sheds its contest state; ground claiming
            // starts fresh.
            self.owner = None;
            self.claimed_fraction = 0.0;
            DigOutcome::DugOut { gold }
        } else {
            DigOutcome::Progress { gold }
        }
    }

    // -----------------------------------------------------------------------
    // Dig marks
    // -----------------------------------------------------------------------

    pub fn is_marked_by(&self, seat: SeatId) -> bool {
        self.dig_marks.contains(&seat)
    }

    /// Set or clear `seat`'s dig mark. Returns whether anything changed.
    pub fn set_mark(&mut self, seat: SeatId, marked: bool) -> bool {
        let present = self.is_marked_by(seat);
        if marked && !present {
            self.dig_marks.push(seat);
            true
        } else if !marked && present {
            self.dig_marks.retain(|s| *s != seat);
            true
        } else {
            false
        }
    }

    /// Remove every mark failing `keep`, returning the seats whose marks
    /// were canceled.
    pub fn take_marks_where(&mut self, keep: impl Fn(SeatId) -> bool) -> SmallVec<[SeatId; 2]> {
        let mut canceled = SmallVec::new();
        self.dig_marks.retain(|s| {
            if keep(*s) {
                true
            } else {
                canceled.push(*s);
                false
            }
        });
        canceled
    }

    // -----------------------------------------------------------------------
    // Worker capacity
    // -----------------------------------------------------------------------

    /// Register a claiming worker; rejected (not queued) beyond capacity.
    pub fn try_add_claimer(&mut self, params: &ClaimParams) -> bool {
        if self.claimers >= params.max_claimers_per_tile {
            return false;
        }
        self.claimers += 1;
        true
    }

    pub fn remove_claimer(&mut self) {
        self.claimers = self.claimers.saturating_sub(1);
    }

    /// Register a digging worker; rejected (not queued) beyond capacity.
    pub fn try_add_digger(&mut self, params: &ClaimParams) -> bool {
        if self.diggers >= params.max_diggers_per_tile {
            return false;
        }
        self.diggers += 1;
        true
    }

    pub fn remove_digger(&mut self) {
        self.diggers = self.diggers.saturating_sub(1);
    }
}
