// Replicated entity snapshots and the desync checksum.
//
// These are the payload records the server serializes from its map and the
// client applies to its mirror. They deliberately use raw ordinals (terrain
// and structure-kind bytes, seat u32s) instead of sim types, so this crate
// stays a leaf, shared by both sides of the wire.
//
// A tile's `seat` field is 0 unless the tile is fully claimed; contested
// fractions never replicate. Clients therefore only ever learn finished
// ownership, which is also what the checksum covers.

use std::hash::Hasher;

use rustc_hash::FxHasher;

use crate::wire::{Wire, WireError, WireReader, WireWriter};

/// One tile's replicated state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileSnapshot {
    pub x: i32,
    pub y: i32,
    /// Terrain ordinal (dirt 0, gold 1, rock 2, water 3, lava 4, gem 5).
    pub terrain: u8,
    pub fullness: f32,
    /// Owning seat id, 0 unless fully claimed.
    pub seat: u32,
}

impl Wire for TileSnapshot {
    fn encode(&self, w: &mut WireWriter) {
        w.put_i32(self.x);
        w.put_i32(self.y);
        w.put_u8(self.terrain);
        w.put_f32(self.fullness);
        w.put_u32(self.seat);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            x: r.take_i32()?,
            y: r.take_i32()?,
            terrain: r.take_u8()?,
            fullness: r.take_f32()?,
            seat: r.take_u32()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CreatureSnapshot {
    pub id: u64,
    pub seat: u32,
    pub class: String,
    pub x: i32,
    pub y: i32,
}

impl Wire for CreatureSnapshot {
    fn encode(&self, w: &mut WireWriter) {
        w.put_u64(self.id);
        w.put_u32(self.seat);
        w.put_str(&self.class);
        w.put_i32(self.x);
        w.put_i32(self.y);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            id: r.take_u64()?,
            seat: r.take_u32()?,
            class: r.take_str()?,
            x: r.take_i32()?,
            y: r.take_i32()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StructureSnapshot {
    pub id: u64,
    /// Structure-kind ordinal (door 0, treasury 1, dormitory 2, workshop 3).
    pub kind: u8,
    /// Door lock state; always false for non-doors.
    pub locked: bool,
    pub seat: u32,
    pub tiles: Vec<(i32, i32)>,
}

impl Wire for StructureSnapshot {
    fn encode(&self, w: &mut WireWriter) {
        w.put_u64(self.id);
        w.put_u8(self.kind);
        w.put_bool(self.locked);
        w.put_u32(self.seat);
        w.put_list(&self.tiles);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            id: r.take_u64()?,
            kind: r.take_u8()?,
            locked: r.take_bool()?,
            seat: r.take_u32()?,
            tiles: r.take_list("structure tiles")?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SeatSnapshot {
    pub id: u32,
    pub team: u32,
    pub gold: f32,
}

impl Wire for SeatSnapshot {
    fn encode(&self, w: &mut WireWriter) {
        w.put_u32(self.id);
        w.put_u32(self.team);
        w.put_f32(self.gold);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            id: r.take_u32()?,
            team: r.take_u32()?,
            gold: r.take_f32()?,
        })
    }
}

/// A creature class definition replicated in the bootstrap, so mirrors can
/// reason about speeds and sight without the server's config file.
#[derive(Clone, Debug, PartialEq)]
pub struct ClassSnapshot {
    pub name: String,
    pub ground_speed: f32,
    pub water_speed: f32,
    pub lava_speed: f32,
    pub sight_radius: u32,
    pub dig_rate: f32,
    pub claim_rate: f32,
}

impl Wire for ClassSnapshot {
    fn encode(&self, w: &mut WireWriter) {
        w.put_str(&self.name);
        w.put_f32(self.ground_speed);
        w.put_f32(self.water_speed);
        w.put_f32(self.lava_speed);
        w.put_u32(self.sight_radius);
        w.put_f32(self.dig_rate);
        w.put_f32(self.claim_rate);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            name: r.take_str()?,
            ground_speed: r.take_f32()?,
            water_speed: r.take_f32()?,
            lava_speed: r.take_f32()?,
            sight_radius: r.take_u32()?,
            dig_rate: r.take_f32()?,
            claim_rate: r.take_f32()?,
        })
    }
}

/// Desync-detection hash over tile state. Both sides feed the tiles they
/// believe the client knows, in coordinate order; the server hashes its
/// per-client sent cache, the client its applied mirror. `FxHasher` keeps
/// the result stable across processes and platforms.
pub fn state_checksum<'a, I>(tiles: I) -> u64
where
    I: IntoIterator<Item = &'a TileSnapshot>,
{
    let mut hasher = FxHasher::default();
    for t in tiles {
        hasher.write_i32(t.x);
        hasher.write_i32(t.y);
        hasher.write_u8(t.terrain);
        hasher.write_u32(t.fullness.to_bits());
        hasher.write_u32(t.seat);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile(x: i32, y: i32, fullness: f32, seat: u32) -> TileSnapshot {
        TileSnapshot {
            x,
            y,
            terrain: 0,
            fullness,
            seat,
        }
    }

    #[test]
    fn checksum_matches_for_identical_state() {
        let a = vec![tile(0, 0, 100.0, 0), tile(1, 0, 0.0, 3)];
        let b = a.clone();
        assert_eq!(state_checksum(&a), state_checksum(&b));
    }

    #[test]
    fn checksum_detects_field_and_order_changes() {
        let base = vec![tile(0, 0, 100.0, 0), tile(1, 0, 0.0, 3)];
        let baseline = state_checksum(&base);

        let mut dug = base.clone();
        dug[0].fullness = 60.0;
        assert_ne!(state_checksum(&dug), baseline);

        let mut flipped = base.clone();
        flipped[1].seat = 4;
        assert_ne!(state_checksum(&flipped), baseline);

        let swapped = vec![base[1], base[0]];
        assert_ne!(state_checksum(&swapped), baseline);
    }

    #[test]
    fn checksum_of_empty_state_is_stable() {
        assert_eq!(state_checksum([]), state_checksum([]));
    }
}
