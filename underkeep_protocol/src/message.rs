// Protocol messages for client-server communication.
//
// Two enums define the full protocol vocabulary:
// - `ClientMessage`: sent by game clients to the authoritative server.
// - `ServerMessage`: sent by the server to game clients.
//
// Each variant encodes as a one-byte tag followed by its fields in declared
// order (see `wire.rs` for the field codec). Tags are append-only: new
// variants take the next free tag, existing tags never change meaning.
//
// The heavyweight payload structs live in `snapshot.rs`; `BootstrapData`
// here bundles them into the one large full-state message a client receives
// while Loading.

use crate::snapshot::{ClassSnapshot, CreatureSnapshot, SeatSnapshot, StructureSnapshot, TileSnapshot};
use crate::types::{ClientId, TurnNumber};
use crate::wire::{Wire, WireError, WireReader, WireWriter};

/// Messages sent by a client to the server.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientMessage {
    /// Handshake. Rejected unless `protocol_version` matches exactly.
    Hello {
        protocol_version: u32,
        nickname: String,
    },
    /// The bootstrap is fully applied; ready to enter the turn loop.
    BootstrapDone,
    /// Everything up to and including turn-started(`turn`) is applied;
    /// `checksum` hashes the applied visible tile state.
    AckTurn { turn: TurnNumber, checksum: u64 },
    /// Ask the server to mark (or unmark) tiles for digging.
    MarkTiles { tiles: Vec<(i32, i32)>, marked: bool },
    /// Chat line, relayed to every in-game client.
    Chat { text: String },
    /// Leaving gracefully.
    Goodbye,
}

impl Wire for ClientMessage {
    fn encode(&self, w: &mut WireWriter) {
        match self {
            ClientMessage::Hello {
                protocol_version,
                nickname,
            } => {
                w.put_u8(0);
                w.put_u32(*protocol_version);
                w.put_str(nickname);
            }
            ClientMessage::BootstrapDone => w.put_u8(1),
            ClientMessage::AckTurn { turn, checksum } => {
                w.put_u8(2);
                turn.encode(w);
                w.put_u64(*checksum);
            }
            ClientMessage::MarkTiles { tiles, marked } => {
                w.put_u8(3);
                w.put_list(tiles);
                w.put_bool(*marked);
            }
            ClientMessage::Chat { text } => {
                w.put_u8(4);
                w.put_str(text);
            }
            ClientMessage::Goodbye => w.put_u8(5),
        }
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        match r.take_u8()? {
            0 => Ok(ClientMessage::Hello {
                protocol_version: r.take_u32()?,
                nickname: r.take_str()?,
            }),
            1 => Ok(ClientMessage::BootstrapDone),
            2 => Ok(ClientMessage::AckTurn {
                turn: TurnNumber::decode(r)?,
                checksum: r.take_u64()?,
            }),
            3 => Ok(ClientMessage::MarkTiles {
                tiles: r.take_list("marked tiles")?,
                marked: r.take_bool()?,
            }),
            4 => Ok(ClientMessage::Chat {
                text: r.take_str()?,
            }),
            5 => Ok(ClientMessage::Goodbye),
            tag => Err(WireError::BadTag {
                what: "client message",
                tag,
            }),
        }
    }
}

/// Everything a Loading client needs to mirror the map: dimensions, the
/// fill tile, every visible non-default tile, seats, class definitions,
/// and visible entities, stamped with the server's current turn.
#[derive(Clone, Debug, PartialEq)]
pub struct BootstrapData {
    pub width: u32,
    pub height: u32,
    pub default_terrain: u8,
    pub default_wall: bool,
    /// Fullness of an undug wall, so default wall tiles mirror exactly.
    pub max_fullness: f32,
    pub turn: TurnNumber,
    pub tiles: Vec<TileSnapshot>,
    pub seats: Vec<SeatSnapshot>,
    pub classes: Vec<ClassSnapshot>,
    pub creatures: Vec<CreatureSnapshot>,
    pub structures: Vec<StructureSnapshot>,
}

impl Wire for BootstrapData {
    fn encode(&self, w: &mut WireWriter) {
        w.put_u32(self.width);
        w.put_u32(self.height);
        w.put_u8(self.default_terrain);
        w.put_bool(self.default_wall);
        w.put_f32(self.max_fullness);
        self.turn.encode(w);
        w.put_list(&self.tiles);
        w.put_list(&self.seats);
        w.put_list(&self.classes);
        w.put_list(&self.creatures);
        w.put_list(&self.structures);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            width: r.take_u32()?,
            height: r.take_u32()?,
            default_terrain: r.take_u8()?,
            default_wall: r.take_bool()?,
            max_fullness: r.take_f32()?,
            turn: TurnNumber::decode(r)?,
            tiles: r.take_list("bootstrap tiles")?,
            seats: r.take_list("bootstrap seats")?,
            classes: r.take_list("bootstrap classes")?,
            creatures: r.take_list("bootstrap creatures")?,
            structures: r.take_list("bootstrap structures")?,
        })
    }
}

/// Server notice severity/kind ordinal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeKind {
    /// Routine information (joins, leaves, server chatter).
    Info,
    /// This client's ack checksum disagreed with the server.
    DesyncWarning,
    /// The server is going down.
    ShuttingDown,
}

impl Wire for NoticeKind {
    fn encode(&self, w: &mut WireWriter) {
        let tag = match self {
            NoticeKind::Info => 0,
            NoticeKind::DesyncWarning => 1,
            NoticeKind::ShuttingDown => 2,
        };
        w.put_u8(tag);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        match r.take_u8()? {
            0 => Ok(NoticeKind::Info),
            1 => Ok(NoticeKind::DesyncWarning),
            2 => Ok(NoticeKind::ShuttingDown),
            tag => Err(WireError::BadTag {
                what: "notice kind",
                tag,
            }),
        }
    }
}

/// Messages sent by the server to a client.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerMessage {
    /// Handshake accepted; a seat has not been assigned yet.
    Welcome {
        client_id: ClientId,
        server_turn: TurnNumber,
    },
    /// Handshake rejected; the connection closes after this.
    Rejected { reason: String },
    /// The seat this client will play, echoing its nickname.
    SeatAssigned { seat: u32, nickname: String },
    /// Full visible state for the Loading phase.
    Bootstrap(Box<BootstrapData>),
    /// Turn `turn` is complete on the server; every delta for it has
    /// already been sent.
    TurnStarted { turn: TurnNumber },
    /// Replicated tile changes, vision-filtered for this client.
    TileDeltas { tiles: Vec<TileSnapshot> },
    /// This client's dig marks changed (its own request, or server-side
    /// cancellation).
    MarkedTiles { tiles: Vec<(i32, i32)>, marked: bool },
    CreatureAdded(CreatureSnapshot),
    CreatureRemoved { id: u64 },
    CreatureMoved { id: u64, x: i32, y: i32 },
    StructureAdded(StructureSnapshot),
    StructureRemoved { id: u64 },
    DoorState { id: u64, locked: bool },
    /// A seat's replicated scalar state (gold) changed.
    SeatUpdate(SeatSnapshot),
    /// Chat from another player, with the sender's seat and name.
    Chat {
        seat: u32,
        nickname: String,
        text: String,
    },
    /// Asynchronous server notice, not tied to a turn boundary.
    Notice { kind: NoticeKind, text: String },
}

impl Wire for ServerMessage {
    fn encode(&self, w: &mut WireWriter) {
        match self {
            ServerMessage::Welcome {
                client_id,
                server_turn,
            } => {
                w.put_u8(0);
                client_id.encode(w);
                server_turn.encode(w);
            }
            ServerMessage::Rejected { reason } => {
                w.put_u8(1);
                w.put_str(reason);
            }
            ServerMessage::SeatAssigned { seat, nickname } => {
                w.put_u8(2);
                w.put_u32(*seat);
                w.put_str(nickname);
            }
            ServerMessage::Bootstrap(data) => {
                w.put_u8(3);
                data.encode(w);
            }
            ServerMessage::TurnStarted { turn } => {
                w.put_u8(4);
                turn.encode(w);
            }
            ServerMessage::TileDeltas { tiles } => {
                w.put_u8(5);
                w.put_list(tiles);
            }
            ServerMessage::MarkedTiles { tiles, marked } => {
                w.put_u8(6);
                w.put_list(tiles);
                w.put_bool(*marked);
            }
            ServerMessage::CreatureAdded(snapshot) => {
                w.put_u8(7);
                snapshot.encode(w);
            }
            ServerMessage::CreatureRemoved { id } => {
                w.put_u8(8);
                w.put_u64(*id);
            }
            ServerMessage::CreatureMoved { id, x, y } => {
                w.put_u8(9);
                w.put_u64(*id);
                w.put_i32(*x);
                w.put_i32(*y);
            }
            ServerMessage::StructureAdded(snapshot) => {
                w.put_u8(10);
                snapshot.encode(w);
            }
            ServerMessage::StructureRemoved { id } => {
                w.put_u8(11);
                w.put_u64(*id);
            }
            ServerMessage::DoorState { id, locked } => {
                w.put_u8(12);
                w.put_u64(*id);
                w.put_bool(*locked);
            }
            ServerMessage::SeatUpdate(snapshot) => {
                w.put_u8(13);
                snapshot.encode(w);
            }
            ServerMessage::Chat {
                seat,
                nickname,
                text,
            } => {
                w.put_u8(14);
                w.put_u32(*seat);
                w.put_str(nickname);
                w.put_str(text);
            }
            ServerMessage::Notice { kind, text } => {
                w.put_u8(15);
                kind.encode(w);
                w.put_str(text);
            }
        }
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        match r.take_u8()? {
            0 => Ok(ServerMessage::Welcome {
                client_id: ClientId::decode(r)?,
                server_turn: TurnNumber::decode(r)?,
            }),
            1 => Ok(ServerMessage::Rejected {
                reason: r.take_str()?,
            }),
            2 => Ok(ServerMessage::SeatAssigned {
                seat: r.take_u32()?,
                nickname: r.take_str()?,
            }),
            3 => Ok(ServerMessage::Bootstrap(Box::new(BootstrapData::decode(
                r,
            )?))),
            4 => Ok(ServerMessage::TurnStarted {
                turn: TurnNumber::decode(r)?,
            }),
            5 => Ok(ServerMessage::TileDeltas {
                tiles: r.take_list("tile deltas")?,
            }),
            6 => Ok(ServerMessage::MarkedTiles {
                tiles: r.take_list("marked tiles")?,
                marked: r.take_bool()?,
            }),
            7 => Ok(ServerMessage::CreatureAdded(CreatureSnapshot::decode(r)?)),
            8 => Ok(ServerMessage::CreatureRemoved { id: r.take_u64()? }),
            9 => Ok(ServerMessage::CreatureMoved {
                id: r.take_u64()?,
                x: r.take_i32()?,
                y: r.take_i32()?,
            }),
            10 => Ok(ServerMessage::StructureAdded(StructureSnapshot::decode(
                r,
            )?)),
            11 => Ok(ServerMessage::StructureRemoved { id: r.take_u64()? }),
            12 => Ok(ServerMessage::DoorState {
                id: r.take_u64()?,
                locked: r.take_bool()?,
            }),
            13 => Ok(ServerMessage::SeatUpdate(SeatSnapshot::decode(r)?)),
            14 => Ok(ServerMessage::Chat {
                seat: r.take_u32()?,
                nickname: r.take_str()?,
                text: r.take_str()?,
            }),
            15 => Ok(ServerMessage::Notice {
                kind: NoticeKind::decode(r)?,
                text: r.take_str()?,
            }),
            tag => Err(WireError::BadTag {
                what: "server message",
                tag,
            }),
        }
    }
}
