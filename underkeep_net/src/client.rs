// TCP client and the replicated map mirror.
//
// Two pieces live here:
// - `ClientMirror` holds everything a client knows: a partial `GameMap`
//   rebuilt purely from server messages, the cache of tile snapshots it
//   has applied (which the desync checksum hashes), the turn counter, and
//   chat/notice logs. `apply()` is the single entry point for inbound
//   messages and returns the protocol reply the message demands, so live
//   connections and replay logs share one code path.
// - `NetClient` is the transport: `connect()` performs TCP connect + Hello
//   handshake on the calling thread, then spawns a background reader
//   thread that pushes decoded `ServerMessage`s into an `mpsc` channel.
//   The owning thread holds a `BufWriter<TcpStream>` for sending and
//   drains the inbox with `poll()`, or lets `pump()` drain it straight
//   into a mirror (sending the acks the mirror produces).
//
// The mirror never runs gameplay rules. It applies snapshots through the
// sim's replication setters and rebuilds connectivity after each tile
// batch, so path queries against the mirrored map work, but digging and
// claiming only ever happen on the server.

use std::collections::BTreeMap;
use std::io::{BufReader, BufWriter};
use std::net::TcpStream;
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};

use underkeep_protocol::framing::{read_message, write_message};
use underkeep_protocol::message::{BootstrapData, ClientMessage, NoticeKind, ServerMessage};
use underkeep_protocol::snapshot::{TileSnapshot, state_checksum};
use underkeep_protocol::types::{ClientId, PROTOCOL_VERSION, TurnNumber};
use underkeep_protocol::wire::Wire;

use underkeep_sim::config::{CreatureClass, GameConfig};
use underkeep_sim::delta::MapDeltas;
use underkeep_sim::gamemap::GameMap;
use underkeep_sim::grid::TileGrid;
use underkeep_sim::seat::Seat;
use underkeep_sim::structures::StructureKind;
use underkeep_sim::tile::Tile;
use underkeep_sim::types::{CreatureId, SeatId, StructureId, TeamId, Terrain, TileCoord};

// ---------------------------------------------------------------------------
// Client mirror
// ---------------------------------------------------------------------------

/// A chat line as seen by this client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatLine {
    pub seat: u32,
    pub nickname: String,
    pub text: String,
}

/// The client-side replica of the visible game state.
pub struct ClientMirror {
    client_id: Option<ClientId>,
    seat: Option<SeatId>,
    nickname: Option<String>,
    map: Option<GameMap>,
    /// Every tile snapshot this mirror has applied, keyed by coordinate.
    /// The ack checksum hashes these values in iteration order, which is
    /// the same coordinate order the server hashes its sent cache in.
    received_tiles: BTreeMap<TileCoord, TileSnapshot>,
    turn: TurnNumber,
    chat_log: Vec<ChatLine>,
    notices: Vec<(NoticeKind, String)>,
}

impl Default for ClientMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientMirror {
    pub fn new() -> Self {
        Self {
            client_id: None,
            seat: None,
            nickname: None,
            map: None,
            received_tiles: BTreeMap::new(),
            turn: TurnNumber(0),
            chat_log: Vec::new(),
            notices: Vec::new(),
        }
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    pub fn seat(&self) -> Option<SeatId> {
        self.seat
    }

    pub fn nickname(&self) -> Option<&str> {
        self.nickname.as_deref()
    }

    /// The mirrored map, once the bootstrap has been applied.
    pub fn map(&self) -> Option<&GameMap> {
        self.map.as_ref()
    }

    pub fn map_mut(&mut self) -> Option<&mut GameMap> {
        self.map.as_mut()
    }

    /// The last turn boundary this mirror has seen.
    pub fn turn(&self) -> TurnNumber {
        self.turn
    }

    pub fn chat_log(&self) -> &[ChatLine] {
        &self.chat_log
    }

    pub fn notices(&self) -> &[(NoticeKind, String)] {
        &self.notices
    }

    /// Hash of every tile state this mirror has applied, in coordinate
    /// order. Sent back with each turn ack for desync detection.
    pub fn checksum(&self) -> u64 {
        state_checksum(self.received_tiles.values())
    }

    /// Apply one server message to the mirror; returns the reply the
    /// protocol requires (bootstrap-done, turn acks), if any. Unknown
    /// entity ids and out-of-bounds coordinates are ignored rather than
    /// failing; the server is authoritative and a mirror can do no better
    /// than skip what it cannot place.
    pub fn apply(&mut self, message: &ServerMessage) -> Option<ClientMessage> {
        match message {
            ServerMessage::Welcome {
                client_id,
                server_turn,
            } => {
                self.client_id = Some(*client_id);
                self.turn = *server_turn;
                None
            }
            ServerMessage::Rejected { .. } => None,
            ServerMessage::SeatAssigned { seat, nickname } => {
                self.seat = Some(SeatId(*seat));
                self.nickname = Some(nickname.clone());
                None
            }
            ServerMessage::Bootstrap(data) => {
                self.build_map(data);
                Some(ClientMessage::BootstrapDone)
            }
            ServerMessage::TurnStarted { turn } => {
                self.turn = *turn;
                if let Some(map) = self.map.as_mut() {
                    map.set_turn(turn.0);
                }
                Some(ClientMessage::AckTurn {
                    turn: *turn,
                    checksum: self.checksum(),
                })
            }
            ServerMessage::TileDeltas { tiles } => {
                if let Some(map) = self.map.as_mut() {
                    for snap in tiles {
                        apply_tile(map, &mut self.received_tiles, snap);
                    }
                    map.rebuild_connectivity();
                }
                None
            }
            ServerMessage::MarkedTiles { tiles, marked } => {
                if let (Some(map), Some(seat)) = (self.map.as_mut(), self.seat) {
                    let coords: Vec<TileCoord> =
                        tiles.iter().map(|&(x, y)| TileCoord { x, y }).collect();
                    map.apply_replicated_marks(seat, &coords, *marked);
                }
                None
            }
            ServerMessage::CreatureAdded(snap) => {
                if let Some(map) = self.map.as_mut() {
                    map.apply_replicated_creature(
                        CreatureId(snap.id),
                        SeatId(snap.seat),
                        &snap.class,
                        TileCoord {
                            x: snap.x,
                            y: snap.y,
                        },
                    );
                }
                None
            }
            ServerMessage::CreatureRemoved { id } => {
                if let Some(map) = self.map.as_mut() {
                    map.remove_creature(CreatureId(*id), &mut MapDeltas::new());
                }
                None
            }
            ServerMessage::CreatureMoved { id, x, y } => {
                if let Some(map) = self.map.as_mut() {
                    map.apply_replicated_move(CreatureId(*id), TileCoord { x: *x, y: *y });
                }
                None
            }
            ServerMessage::StructureAdded(snap) => {
                if let Some(map) = self.map.as_mut() {
                    if let Some(kind) = StructureKind::from_parts(snap.kind, snap.locked) {
                        let tiles: Vec<TileCoord> = snap
                            .tiles
                            .iter()
                            .map(|&(x, y)| TileCoord { x, y })
                            .collect();
                        map.apply_replicated_structure(
                            StructureId(snap.id),
                            kind,
                            SeatId(snap.seat),
                            tiles,
                        );
                    }
                }
                None
            }
            ServerMessage::StructureRemoved { id } => {
                if let Some(map) = self.map.as_mut() {
                    map.remove_structure(StructureId(*id), &mut MapDeltas::new());
                }
                None
            }
            ServerMessage::DoorState { id, locked } => {
                if let Some(map) = self.map.as_mut() {
                    map.lock_door(StructureId(*id), *locked, &mut MapDeltas::new());
                }
                None
            }
            ServerMessage::SeatUpdate(snap) => {
                if let Some(map) = self.map.as_mut() {
                    if let Some(seat) = map.seats_mut().get_mut(SeatId(snap.id)) {
                        seat.gold = snap.gold;
                    }
                }
                None
            }
            ServerMessage::Chat {
                seat,
                nickname,
                text,
            } => {
                self.chat_log.push(ChatLine {
                    seat: *seat,
                    nickname: nickname.clone(),
                    text: text.clone(),
                });
                None
            }
            ServerMessage::Notice { kind, text } => {
                self.notices.push((*kind, text.clone()));
                None
            }
        }
    }

    /// Build the mirrored map from a bootstrap: fill the grid with the
    /// default tile, then overlay every replicated snapshot. The class
    /// table rides in the bootstrap so `apply_replicated_creature` can
    /// find stats without the server's config file.
    fn build_map(&mut self, data: &BootstrapData) {
        let default_terrain = Terrain::from_ordinal(data.default_terrain).unwrap_or(Terrain::Dirt);
        let fill = if data.default_wall {
            Tile::wall(default_terrain, data.max_fullness)
        } else {
            Tile::open(default_terrain)
        };
        let grid = TileGrid::new(data.width, data.height, fill);

        let seats: Vec<Seat> = data
            .seats
            .iter()
            .map(|s| Seat::new(SeatId(s.id), TeamId(s.team), s.gold))
            .collect();

        let config = GameConfig {
            max_fullness: data.max_fullness,
            creature_classes: data
                .classes
                .iter()
                .map(|c| {
                    (
                        c.name.clone(),
                        CreatureClass {
                            ground_speed: c.ground_speed,
                            water_speed: c.water_speed,
                            lava_speed: c.lava_speed,
                            sight_radius: c.sight_radius,
                            dig_rate: c.dig_rate,
                            claim_rate: c.claim_rate,
                        },
                    )
                })
                .collect(),
            ..GameConfig::default()
        };

        let mut map = GameMap::new(grid, seats, config);
        self.received_tiles.clear();
        for snap in &data.tiles {
            apply_tile(&mut map, &mut self.received_tiles, snap);
        }
        for snap in &data.creatures {
            map.apply_replicated_creature(
                CreatureId(snap.id),
                SeatId(snap.seat),
                &snap.class,
                TileCoord {
                    x: snap.x,
                    y: snap.y,
                },
            );
        }
        for snap in &data.structures {
            if let Some(kind) = StructureKind::from_parts(snap.kind, snap.locked) {
                let tiles: Vec<TileCoord> = snap
                    .tiles
                    .iter()
                    .map(|&(x, y)| TileCoord { x, y })
                    .collect();
                map.apply_replicated_structure(StructureId(snap.id), kind, SeatId(snap.seat), tiles);
            }
        }
        map.set_turn(data.turn.0);
        map.rebuild_connectivity();
        self.turn = data.turn;
        self.map = Some(map);
    }
}

/// Record a tile snapshot in the checksum cache and write it through to
/// the mirrored grid. Seat 0 on the wire means unowned.
fn apply_tile(
    map: &mut GameMap,
    cache: &mut BTreeMap<TileCoord, TileSnapshot>,
    snap: &TileSnapshot,
) {
    let Some(terrain) = Terrain::from_ordinal(snap.terrain) else {
        return;
    };
    let at = TileCoord {
        x: snap.x,
        y: snap.y,
    };
    let owner = if snap.seat == 0 {
        None
    } else {
        Some(SeatId(snap.seat))
    };
    if map.apply_replicated_tile(at, terrain, snap.fullness, owner) {
        cache.insert(at, *snap);
    }
}

// ---------------------------------------------------------------------------
// TCP client
// ---------------------------------------------------------------------------

/// Information returned by a successful `connect()` handshake.
pub struct WelcomeInfo {
    pub client_id: ClientId,
    pub server_turn: TurnNumber,
}

/// TCP client for talking to an authoritative server.
///
/// `connect()` blocks for the handshake; afterwards the owning thread
/// never blocks on network I/O. The reader thread handles the blocking
/// reads, and the writer flushes synchronously (acceptable for the small
/// messages a client sends).
pub struct NetClient {
    writer: BufWriter<TcpStream>,
    inbox: Receiver<ServerMessage>,
    _reader_thread: Option<JoinHandle<()>>,
    client_id: ClientId,
}

impl NetClient {
    /// Connect to a server, perform the Hello handshake, and spawn a
    /// reader thread. Returns the client and welcome info on success.
    pub fn connect(addr: &str, nickname: &str) -> Result<(Self, WelcomeInfo), String> {
        let stream = TcpStream::connect(addr).map_err(|e| format!("connect failed: {e}"))?;

        // Bound the handshake; cleared before the long-lived reader loop.
        stream
            .set_read_timeout(Some(std::time::Duration::from_secs(5)))
            .ok();

        let reader_stream = stream
            .try_clone()
            .map_err(|e| format!("clone failed: {e}"))?;
        let mut writer = BufWriter::new(stream);

        let hello = ClientMessage::Hello {
            protocol_version: PROTOCOL_VERSION,
            nickname: nickname.into(),
        };
        send_msg(&mut writer, &hello).map_err(|e| format!("send Hello failed: {e}"))?;

        let mut reader = BufReader::new(reader_stream);
        let response_bytes =
            read_message(&mut reader).map_err(|e| format!("read Welcome failed: {e}"))?;
        let response = ServerMessage::from_frame(&response_bytes)
            .map_err(|e| format!("parse Welcome failed: {e}"))?;

        let welcome = match response {
            ServerMessage::Welcome {
                client_id,
                server_turn,
            } => WelcomeInfo {
                client_id,
                server_turn,
            },
            ServerMessage::Rejected { reason } => {
                return Err(format!("rejected: {reason}"));
            }
            other => {
                return Err(format!("unexpected response: {other:?}"));
            }
        };

        if let Ok(inner) = reader.get_ref().try_clone() {
            inner.set_read_timeout(None).ok();
        }

        let (tx, rx) = mpsc::channel();
        let reader_thread = thread::spawn(move || {
            reader_loop(reader, tx);
        });

        let client_id = welcome.client_id;
        Ok((
            Self {
                writer,
                inbox: rx,
                _reader_thread: Some(reader_thread),
                client_id,
            },
            welcome,
        ))
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Send any client message.
    pub fn send(&mut self, message: &ClientMessage) -> Result<(), String> {
        send_msg(&mut self.writer, message).map_err(|e| format!("send failed: {e}"))
    }

    /// Ask the server to mark (or unmark) tiles for digging.
    pub fn send_mark_tiles(&mut self, tiles: Vec<(i32, i32)>, marked: bool) -> Result<(), String> {
        let msg = ClientMessage::MarkTiles { tiles, marked };
        send_msg(&mut self.writer, &msg).map_err(|e| format!("send MarkTiles failed: {e}"))
    }

    /// Send a chat message.
    pub fn send_chat(&mut self, text: &str) -> Result<(), String> {
        let msg = ClientMessage::Chat { text: text.into() };
        send_msg(&mut self.writer, &msg).map_err(|e| format!("send Chat failed: {e}"))
    }

    /// Send Goodbye and let the connection wind down.
    pub fn disconnect(&mut self) {
        let _ = send_msg(&mut self.writer, &ClientMessage::Goodbye);
    }

    /// Drain all queued server messages (non-blocking).
    pub fn poll(&self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(msg) = self.inbox.try_recv() {
            messages.push(msg);
        }
        messages
    }

    /// Drain the inbox into a mirror, sending whatever replies the mirror
    /// produces (bootstrap-done, turn acks). Returns the drained messages
    /// so callers can react to chat and notices themselves.
    pub fn pump(&mut self, mirror: &mut ClientMirror) -> Result<Vec<ServerMessage>, String> {
        let messages = self.poll();
        for message in &messages {
            if let Some(reply) = mirror.apply(message) {
                self.send(&reply)?;
            }
        }
        Ok(messages)
    }
}

/// Encode a `ClientMessage` and write it with length-delimited framing.
fn send_msg(writer: &mut BufWriter<TcpStream>, msg: &ClientMessage) -> Result<(), String> {
    write_message(writer, &msg.to_frame()).map_err(|e| e.to_string())
}

/// Reader thread: read framed messages in a loop, push to channel.
fn reader_loop(mut reader: BufReader<TcpStream>, tx: mpsc::Sender<ServerMessage>) {
    while let Ok(bytes) = read_message(&mut reader) {
        match ServerMessage::from_frame(&bytes) {
            Ok(msg) => {
                if tx.send(msg).is_err() {
                    break; // Owning thread dropped the receiver
                }
            }
            Err(_) => break, // Malformed message
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use underkeep_protocol::snapshot::{
        ClassSnapshot, CreatureSnapshot, SeatSnapshot, StructureSnapshot,
    };

    fn at(x: i32, y: i32) -> TileCoord {
        TileCoord { x, y }
    }

    fn open_tile(x: i32, y: i32, seat: u32) -> TileSnapshot {
        TileSnapshot {
            x,
            y,
            terrain: 0,
            fullness: 0.0,
            seat,
        }
    }

    /// A 5x4 all-wall map with a dug L-corridor, one seat, one worker.
    fn sample_bootstrap() -> BootstrapData {
        BootstrapData {
            width: 5,
            height: 4,
            default_terrain: 0,
            default_wall: true,
            max_fullness: 100.0,
            turn: TurnNumber(12),
            tiles: vec![
                open_tile(1, 1, 0),
                open_tile(2, 1, 1),
                open_tile(2, 2, 0),
            ],
            seats: vec![SeatSnapshot {
                id: 1,
                team: 1,
                gold: 250.0,
            }],
            classes: vec![ClassSnapshot {
                name: "worker".into(),
                ground_speed: 1.0,
                water_speed: 0.0,
                lava_speed: 0.0,
                sight_radius: 8,
                dig_rate: 10.0,
                claim_rate: 0.35,
            }],
            creatures: vec![CreatureSnapshot {
                id: 3,
                seat: 1,
                class: "worker".into(),
                x: 1,
                y: 1,
            }],
            structures: vec![],
        }
    }

    fn bootstrapped_mirror() -> ClientMirror {
        let mut mirror = ClientMirror::new();
        mirror.apply(&ServerMessage::Welcome {
            client_id: ClientId(1),
            server_turn: TurnNumber(12),
        });
        mirror.apply(&ServerMessage::SeatAssigned {
            seat: 1,
            nickname: "keeper".into(),
        });
        let reply = mirror.apply(&ServerMessage::Bootstrap(Box::new(sample_bootstrap())));
        assert_eq!(reply, Some(ClientMessage::BootstrapDone));
        mirror
    }

    #[test]
    fn bootstrap_builds_the_mirrored_map() {
        let mirror = bootstrapped_mirror();
        assert_eq!(mirror.client_id(), Some(ClientId(1)));
        assert_eq!(mirror.seat(), Some(SeatId(1)));
        assert_eq!(mirror.turn(), TurnNumber(12));

        let map = mirror.map().unwrap();
        assert_eq!(map.grid().width, 5);
        assert_eq!(map.turn(), 12);

        // Unlisted tiles take the default fill.
        let wall = map.tile(at(0, 0)).unwrap();
        assert!(wall.is_wall());
        assert_eq!(wall.fullness, 100.0);

        // Listed tiles are overlaid; seat 1's claimed tile carries over.
        assert!(!map.tile(at(1, 1)).unwrap().is_wall());
        assert_eq!(map.tile(at(2, 1)).unwrap().owner, Some(SeatId(1)));
        assert_eq!(map.seats().get(SeatId(1)).unwrap().gold, 250.0);

        // The replicated class table backs the replicated creature.
        let creature = map.creature(CreatureId(3)).unwrap();
        assert_eq!(creature.pos, at(1, 1));
        assert_eq!(creature.stats.dig_rate, 10.0);

        // Connectivity was rebuilt: the corridor is one region.
        let profile = map.mover_profile(CreatureId(3), false).unwrap();
        assert!(map.path_exists(&profile, at(1, 1), at(2, 2)));
    }

    #[test]
    fn turn_started_acks_with_the_mirror_checksum() {
        let mut mirror = bootstrapped_mirror();
        let reply = mirror.apply(&ServerMessage::TurnStarted {
            turn: TurnNumber(13),
        });
        let expected = mirror.checksum();
        assert_eq!(
            reply,
            Some(ClientMessage::AckTurn {
                turn: TurnNumber(13),
                checksum: expected,
            })
        );
        assert_eq!(mirror.turn(), TurnNumber(13));
        assert_eq!(mirror.map().unwrap().turn(), 13);
    }

    #[test]
    fn tile_deltas_write_through_and_change_the_checksum() {
        let mut mirror = bootstrapped_mirror();
        let before = mirror.checksum();

        // The server dug (3, 1) open.
        mirror.apply(&ServerMessage::TileDeltas {
            tiles: vec![open_tile(3, 1, 0)],
        });
        let map = mirror.map().unwrap();
        assert!(!map.tile(at(3, 1)).unwrap().is_wall());
        assert_ne!(mirror.checksum(), before);

        // The corridor now reaches the new tile.
        let profile = map.mover_profile(CreatureId(3), false).unwrap();
        assert!(map.path_exists(&profile, at(1, 1), at(3, 1)));
    }

    #[test]
    fn structure_and_door_messages_apply() {
        let mut mirror = bootstrapped_mirror();
        mirror.apply(&ServerMessage::StructureAdded(StructureSnapshot {
            id: 9,
            kind: 0,
            locked: true,
            seat: 1,
            tiles: vec![(2, 1)],
        }));
        let map = mirror.map().unwrap();
        assert!(map.structure(StructureId(9)).unwrap().door_locked());

        // A locked own door blocks the owner's pathing through it.
        let profile = map.mover_profile(CreatureId(3), false).unwrap();
        assert!(!map.path_exists(&profile, at(1, 1), at(2, 2)));

        mirror.apply(&ServerMessage::DoorState {
            id: 9,
            locked: false,
        });
        let map = mirror.map().unwrap();
        assert!(!map.structure(StructureId(9)).unwrap().door_locked());
        let profile = map.mover_profile(CreatureId(3), false).unwrap();
        assert!(map.path_exists(&profile, at(1, 1), at(2, 2)));
    }

    #[test]
    fn creature_lifecycle_messages_apply() {
        let mut mirror = bootstrapped_mirror();
        mirror.apply(&ServerMessage::CreatureMoved { id: 3, x: 2, y: 1 });
        assert_eq!(
            mirror.map().unwrap().creature(CreatureId(3)).unwrap().pos,
            at(2, 1)
        );
        mirror.apply(&ServerMessage::CreatureRemoved { id: 3 });
        assert!(mirror.map().unwrap().creature(CreatureId(3)).is_none());
    }

    #[test]
    fn marked_tiles_apply_to_the_assigned_seat() {
        let mut mirror = bootstrapped_mirror();
        mirror.apply(&ServerMessage::TileDeltas {
            tiles: vec![TileSnapshot {
                x: 3,
                y: 1,
                terrain: 0,
                fullness: 100.0,
                seat: 0,
            }],
        });
        mirror.apply(&ServerMessage::MarkedTiles {
            tiles: vec![(3, 1)],
            marked: true,
        });
        let map = mirror.map().unwrap();
        assert!(map.tile(at(3, 1)).unwrap().is_marked_by(SeatId(1)));

        mirror.apply(&ServerMessage::MarkedTiles {
            tiles: vec![(3, 1)],
            marked: false,
        });
        let map = mirror.map().unwrap();
        assert!(!map.tile(at(3, 1)).unwrap().is_marked_by(SeatId(1)));
    }

    #[test]
    fn chat_and_notices_are_logged() {
        let mut mirror = bootstrapped_mirror();
        mirror.apply(&ServerMessage::Chat {
            seat: 2,
            nickname: "rival".into(),
            text: "dig faster".into(),
        });
        mirror.apply(&ServerMessage::Notice {
            kind: NoticeKind::DesyncWarning,
            text: "checksum mismatch at turn 13".into(),
        });
        assert_eq!(mirror.chat_log().len(), 1);
        assert_eq!(mirror.chat_log()[0].nickname, "rival");
        assert_eq!(mirror.notices()[0].0, NoticeKind::DesyncWarning);
    }
}
