// underkeep_protocol: wire protocol for the authoritative server.
//
// This crate defines the message types, binary codec, and framing used by
// the server (`underkeep_net`) and game clients to communicate over TCP.
// It is shared between both sides and has no dependency on the sim crate;
// replicated state travels as snapshot records with raw ordinals.
//
// Module overview:
// - `types.rs`:    Core ID newtypes (`ClientId`, `TurnNumber`) and
//                  `PROTOCOL_VERSION`.
// - `wire.rs`:     The byte codec: `Wire` trait, `WireWriter`/`WireReader`,
//                  `WireError`. Fixed field order, explicit counts,
//                  exact-consume decoding.
// - `snapshot.rs`: Replicated entity records (tiles, seats, creatures,
//                  structures, classes) and the desync `state_checksum`.
// - `message.rs`:  `ClientMessage` / `ServerMessage` enums, the full
//                  protocol vocabulary, one append-only tag per variant.
// - `framing.rs`:  Length-delimited framing over any `Read`/`Write` stream:
//                  4-byte big-endian length prefix, then one encoded message.
//
// Design decisions:
// - **Hand-ordered binary encoding.** Every field is written and read in a
//   fixed, documented order, so a frame either decodes completely or is
//   rejected whole. The codec is the compatibility contract; tags and field
//   orders are append-only.
// - **No sim dependency.** Snapshots carry ordinals, not sim enums. The
//   server converts outbound state; mirrors convert inbound.
// - **No async runtime.** `std::io::Read`/`Write` framing works with
//   blocking TCP streams and buffered wrappers.

pub mod framing;
pub mod message;
pub mod snapshot;
pub mod types;
pub mod wire;

pub use framing::{MAX_MESSAGE_SIZE, read_message, write_message};
pub use message::{BootstrapData, ClientMessage, NoticeKind, ServerMessage};
pub use snapshot::{
    ClassSnapshot, CreatureSnapshot, SeatSnapshot, StructureSnapshot, TileSnapshot, state_checksum,
};
pub use types::{ClientId, PROTOCOL_VERSION, TurnNumber};
pub use wire::{Wire, WireError, WireReader, WireWriter};
