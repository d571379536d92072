// Seats and team grouping.
//
// A seat is one player slot: it owns tiles, creatures, and structures, and
// accumulates gold from digging. Seats sharing a `TeamId` are allies. Each
// distinct team maps to one flood-fill color-plane group; group 0 is reserved
// for the neutral baseline and never assigned to a team.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::types::{SeatId, TeamGroup, TeamId};

/// One player slot.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Seat {
    pub id: SeatId,
    pub team: TeamId,
    /// Gold on hand. Digging credits fractional amounts, so this is kept as
    /// a float and rounded for display only.
    pub gold: f32,
    /// Nickname of the connected player once the seat is taken.
    pub player_name: Option<String>,
}

impl Seat {
    pub fn new(id: SeatId, team: TeamId, gold: f32) -> Self {
        Self {
            id,
            team,
            gold,
            player_name: None,
        }
    }
}

/// All seats in a game plus the team-to-group assignment.
///
/// Groups are assigned once at construction: distinct teams in ascending
/// `TeamId` order get groups 1..=N. The assignment never changes mid-game,
/// so the connectivity planes can be sized once at rebuild.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SeatRegistry {
    seats: BTreeMap<SeatId, Seat>,
    groups: BTreeMap<TeamId, TeamGroup>,
}

impl SeatRegistry {
    pub fn new(seats: Vec<Seat>) -> Self {
        let mut by_id = BTreeMap::new();
        for seat in seats {
            by_id.insert(seat.id, seat);
        }
        let teams: BTreeSet<TeamId> = by_id.values().map(|s| s.team).collect();
        let groups = teams
            .iter()
            .enumerate()
            .map(|(i, &team)| (team, TeamGroup(i as u32 + 1)))
            .collect();
        Self {
            seats: by_id,
            groups,
        }
    }

    /// Number of color-plane groups, including the neutral baseline.
    pub fn group_count(&self) -> u32 {
        self.groups.len() as u32 + 1
    }

    pub fn group_of_team(&self, team: TeamId) -> Option<TeamGroup> {
        self.groups.get(&team).copied()
    }

    pub fn group_of_seat(&self, seat: SeatId) -> Option<TeamGroup> {
        self.seats
            .get(&seat)
            .and_then(|s| self.group_of_team(s.team))
    }

    /// Whether two seats are on the same team. A seat is always allied with
    /// itself; an unknown seat is allied with nothing.
    pub fn allied(&self, a: SeatId, b: SeatId) -> bool {
        if a == b {
            return self.seats.contains_key(&a);
        }
        match (self.seats.get(&a), self.seats.get(&b)) {
            (Some(sa), Some(sb)) => sa.team == sb.team,
            _ => false,
        }
    }

    pub fn get(&self, id: SeatId) -> Option<&Seat> {
        self.seats.get(&id)
    }

    pub fn get_mut(&mut self, id: SeatId) -> Option<&mut Seat> {
        self.seats.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Seat> {
        self.seats.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = SeatId> + '_ {
        self.seats.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.seats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }

    /// Credit (or debit, if negative) gold to a seat. Unknown seats are
    /// ignored.
    pub fn credit_gold(&mut self, id: SeatId, amount: f32) {
        if let Some(seat) = self.seats.get_mut(&id) {
            seat.gold += amount;
        }
    }

    /// First seat not yet bound to a player, in ascending id order.
    pub fn first_unbound(&self) -> Option<SeatId> {
        self.seats
            .values()
            .find(|s| s.player_name.is_none())
            .map(|s| s.id)
    }

    /// Bind a player name to a seat. Returns false if the seat is unknown or
    /// already taken.
    pub fn bind_player(&mut self, id: SeatId, name: &str) -> bool {
        match self.seats.get_mut(&id) {
            Some(seat) if seat.player_name.is_none() => {
                seat.player_name = Some(name.to_owned());
                true
            }
            _ => false,
        }
    }

    /// Release a seat when its player disconnects.
    pub fn unbind_player(&mut self, id: SeatId) {
        if let Some(seat) = self.seats.get_mut(&id) {
            seat.player_name = None;
        }
    }
}
