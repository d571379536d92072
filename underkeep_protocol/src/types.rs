// Core ID types for the multiplayer protocol.
//
// Lightweight newtypes shared by `message.rs` and the server's session
// bookkeeping (`underkeep_net::session`). They are connection-scoped
// identifiers for the wire, not sim entity ids: the server assigns compact
// `ClientId`s per TCP connection, and seats travel as raw u32 ordinals.

use crate::wire::{Wire, WireError, WireReader, WireWriter};

/// Protocol revision. A `Hello` carrying any other value is rejected before
/// a seat is assigned.
pub const PROTOCOL_VERSION: u32 = 1;

/// Server-assigned connection id (compact u32, unique per TCP connection).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u32);

impl Wire for ClientId {
    fn encode(&self, w: &mut WireWriter) {
        w.put_u32(self.0);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(ClientId(r.take_u32()?))
    }
}

/// Monotonically increasing simulation turn number.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TurnNumber(pub u64);

impl Wire for TurnNumber {
    fn encode(&self, w: &mut WireWriter) {
        w.put_u64(self.0);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(TurnNumber(r.take_u64()?))
    }
}
