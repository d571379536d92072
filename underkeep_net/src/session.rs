// Session state for the authoritative server.
//
// `Session` is the central data structure that `server.rs` drives. It tracks
// connected clients (their phase, seat, and what they have been told), turns
// the sim's per-turn `MapDeltas` into per-client vision-filtered messages,
// and verifies ack checksums for desync detection. All mutation happens
// through methods called from the server's single-threaded main loop, so
// there is no internal locking.
//
// Client lifecycle: `add_client` welcomes a connection and seats it if a
// seat is free, else queues it (AwaitingSeat). Seating sends SeatAssigned
// plus a vision-filtered bootstrap and enters Loading; BootstrapDone
// promotes to InTurnLoop. A disconnect frees the seat and promotes the
// longest-waiting queued client.
//
// Flushing is diff-based. Each client carries a `sent_tiles` cache: every
// tile snapshot it has ever been sent. A flush takes a fresh snapshot of
// each currently visible tile and sends it only when it differs from the
// cache (or is a never-sent non-default tile). Tiles that leave vision stay
// in the cache untouched, so the client keeps their last known state and
// the ack checksum, hashed over the cache in coordinate order, stays in
// agreement with the mirror on the other end.
//
// Backpressure: the flush refuses to advance the turn while the slowest
// InTurnLoop client is `max_turn_lag` turns behind on acks; mutations keep
// accumulating in the caller's `MapDeltas` until the flush unblocks.
// `drop_laggards` cuts clients whose acks have stalled past a deadline.
//
// Outbound frames go through one writer thread per client: `send_to`
// serializes on the main thread and queues the frame, the writer thread
// drains the queue onto the socket. A slow or dead socket never blocks the
// turn loop. Send and write failures are ignored; the client's reader
// thread surfaces the disconnect.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::io::BufWriter;
use std::net::{Shutdown, TcpStream};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use underkeep_protocol::framing::write_message;
use underkeep_protocol::message::{BootstrapData, NoticeKind, ServerMessage};
use underkeep_protocol::snapshot::{
    ClassSnapshot, CreatureSnapshot, SeatSnapshot, StructureSnapshot, TileSnapshot, state_checksum,
};
use underkeep_protocol::types::{ClientId, PROTOCOL_VERSION, TurnNumber};
use underkeep_protocol::wire::Wire;

use underkeep_sim::config::CreatureClass;
use underkeep_sim::creature::Creature;
use underkeep_sim::delta::{CreatureEvent, MapDeltas, StructureEvent};
use underkeep_sim::gamemap::GameMap;
use underkeep_sim::seat::Seat;
use underkeep_sim::structures::Structure;
use underkeep_sim::types::{CreatureId, SeatId, StructureId, TileCoord};

use crate::replay::ReplayWriter;

/// Where a client is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientPhase {
    /// Welcomed, but every seat is bound; queued until one frees.
    AwaitingSeat,
    /// Seat assigned and bootstrap sent; applying it.
    InLoading,
    /// Bootstrap applied; acks every turn boundary.
    InTurnLoop,
}

struct ClientState {
    nickname: String,
    /// Frames queued for this client's writer thread.
    outbox: Sender<Vec<u8>>,
    /// Kept so dropping the client can shut the socket down and unblock
    /// its reader and writer threads.
    stream: TcpStream,
    phase: ClientPhase,
    seat: Option<SeatId>,
    /// Every tile snapshot ever sent, keyed by coordinate. Flushes diff
    /// against it; the ack checksum hashes its values.
    sent_tiles: BTreeMap<TileCoord, TileSnapshot>,
    /// Entities this client has been told about.
    known_creatures: BTreeSet<CreatureId>,
    known_structures: BTreeSet<StructureId>,
    /// Checksums for announced turns not yet acked, oldest first.
    pending_checksums: VecDeque<(TurnNumber, u64)>,
    last_ack: TurnNumber,
    last_ack_at: Instant,
    desync_warned: bool,
}

/// Authoritative session over one game map.
pub struct Session {
    clients: BTreeMap<ClientId, ClientState>,
    next_client_id: u32,
    max_clients: u32,
    /// Turns the slowest in-loop client may fall behind before flushing
    /// pauses.
    max_turn_lag: u64,
    /// Unseated clients in arrival order.
    seat_queue: VecDeque<ClientId>,

    // Replay recording: armed for the first seated client, mirroring its
    // outbound stream. One log per server run.
    replay_path: Option<PathBuf>,
    recorder: Option<ReplayWriter>,
    recorded_client: Option<ClientId>,
}

impl Session {
    pub fn new(max_clients: u32, max_turn_lag: u64, replay_log: Option<PathBuf>) -> Self {
        Self {
            clients: BTreeMap::new(),
            next_client_id: 0,
            max_clients,
            max_turn_lag,
            seat_queue: VecDeque::new(),
            replay_path: replay_log,
            recorder: None,
            recorded_client: None,
        }
    }

    /// Attempt to add a client. Returns the assigned client ID on success,
    /// or an error reason string (the caller writes the Rejected).
    ///
    /// The returned `ClientId` should be used to tag the reader thread for
    /// this connection so that subsequent `InternalEvent::MessageFrom`
    /// events carry the correct ID.
    pub fn add_client(
        &mut self,
        nickname: String,
        protocol_version: u32,
        stream: TcpStream,
        map: &mut GameMap,
    ) -> Result<ClientId, String> {
        if protocol_version != PROTOCOL_VERSION {
            return Err(format!(
                "protocol version mismatch: server {PROTOCOL_VERSION}, client {protocol_version}"
            ));
        }
        if self.clients.len() as u32 >= self.max_clients {
            return Err("server is full".into());
        }

        let writer_stream = stream.try_clone().map_err(|e| e.to_string())?;
        let id = ClientId(self.next_client_id);
        self.next_client_id += 1;

        let (outbox, outbox_rx) = mpsc::channel::<Vec<u8>>();
        thread::spawn(move || writer_loop(BufWriter::new(writer_stream), outbox_rx));

        self.clients.insert(
            id,
            ClientState {
                nickname,
                outbox,
                stream,
                phase: ClientPhase::AwaitingSeat,
                seat: None,
                sent_tiles: BTreeMap::new(),
                known_creatures: BTreeSet::new(),
                known_structures: BTreeSet::new(),
                pending_checksums: VecDeque::new(),
                last_ack: TurnNumber(map.turn()),
                last_ack_at: Instant::now(),
                desync_warned: false,
            },
        );

        self.send_to(
            id,
            &ServerMessage::Welcome {
                client_id: id,
                server_turn: TurnNumber(map.turn()),
            },
        );

        if !self.seat_client(id, map) {
            self.seat_queue.push_back(id);
            self.send_to(
                id,
                &ServerMessage::Notice {
                    kind: NoticeKind::Info,
                    text: "all seats are taken; waiting for one to free".into(),
                },
            );
        }
        Ok(id)
    }

    /// Bind the next free seat to a client and send SeatAssigned plus the
    /// vision-filtered bootstrap. Returns false when no seat is free.
    fn seat_client(&mut self, id: ClientId, map: &mut GameMap) -> bool {
        let Some(seat) = map.seats().first_unbound() else {
            return false;
        };
        let Some(state) = self.clients.get_mut(&id) else {
            return false;
        };
        if !map.seats_mut().bind_player(seat, &state.nickname) {
            return false;
        }
        state.seat = Some(seat);
        state.phase = ClientPhase::InLoading;
        state.last_ack = TurnNumber(map.turn());
        state.last_ack_at = Instant::now();

        // Bootstrap payload: every visible tile that differs from the map's
        // default fill, plus visible entities. Sent tiles seed the cache the
        // ack checksum is hashed over.
        let visible = map.visible_tiles(seat);
        let (default_terrain, default_wall) = map.bootstrap_defaults();
        let default_fullness = if default_wall {
            map.config().max_fullness
        } else {
            0.0
        };
        let mut tiles = Vec::new();
        for &at in &visible {
            let Some(snap) = snapshot_tile(map, at) else {
                continue;
            };
            let is_default = snap.terrain == default_terrain.ordinal()
                && snap.fullness == default_fullness
                && snap.seat == 0;
            if !is_default {
                state.sent_tiles.insert(at, snap);
                tiles.push(snap);
            }
        }
        let mut creatures = Vec::new();
        for creature in map.creatures() {
            if visible.contains(&creature.pos) {
                state.known_creatures.insert(creature.id);
                creatures.push(creature_snapshot(creature));
            }
        }
        let mut structures = Vec::new();
        for structure in map.structures() {
            if structure.tiles.iter().any(|t| visible.contains(t)) {
                state.known_structures.insert(structure.id);
                structures.push(structure_snapshot(structure));
            }
        }
        let bootstrap = BootstrapData {
            width: map.grid().width,
            height: map.grid().height,
            default_terrain: default_terrain.ordinal(),
            default_wall,
            max_fullness: map.config().max_fullness,
            turn: TurnNumber(map.turn()),
            tiles,
            seats: map.seats().iter().map(seat_snapshot).collect(),
            classes: map
                .config()
                .creature_classes
                .iter()
                .map(|(name, class)| class_snapshot(name, class))
                .collect(),
            creatures,
            structures,
        };
        let nickname = state.nickname.clone();

        self.arm_recorder(id);
        self.send_to(
            id,
            &ServerMessage::SeatAssigned {
                seat: seat.0,
                nickname: nickname.clone(),
            },
        );
        self.send_to(id, &ServerMessage::Bootstrap(Box::new(bootstrap)));
        self.broadcast(&ServerMessage::Notice {
            kind: NoticeKind::Info,
            text: format!("{nickname} took seat {}", seat.0),
        });
        true
    }

    /// Remove a client, free its seat, and promote the longest-waiting
    /// queued client into it.
    pub fn remove_client(&mut self, id: ClientId, map: &mut GameMap) {
        self.seat_queue.retain(|queued| *queued != id);
        let Some(state) = self.clients.remove(&id) else {
            return;
        };
        let _ = state.stream.shutdown(Shutdown::Both);
        if self.recorded_client == Some(id) {
            if let Some(writer) = self.recorder.take() {
                let _ = writer.finish();
            }
        }
        if let Some(seat) = state.seat {
            map.seats_mut().unbind_player(seat);
            self.broadcast(&ServerMessage::Notice {
                kind: NoticeKind::Info,
                text: format!("{} left seat {}", state.nickname, seat.0),
            });
            if let Some(next) = self.seat_queue.pop_front() {
                self.seat_client(next, map);
            }
        }
    }

    /// The client has applied its bootstrap and joins the turn loop.
    pub fn handle_bootstrap_done(&mut self, id: ClientId) {
        if let Some(state) = self.clients.get_mut(&id) {
            if state.phase == ClientPhase::InLoading {
                state.phase = ClientPhase::InTurnLoop;
            }
        }
    }

    /// Record a turn ack. The acked turn's stored checksum is compared
    /// against the client's; on the first mismatch the client is warned
    /// (once) with a DesyncWarning notice.
    pub fn handle_ack(&mut self, id: ClientId, turn: TurnNumber, checksum: u64) {
        let mut desync: Option<String> = None;
        if let Some(state) = self.clients.get_mut(&id) {
            while let Some(&(pending_turn, expected)) = state.pending_checksums.front() {
                if pending_turn.0 > turn.0 {
                    break;
                }
                state.pending_checksums.pop_front();
                if pending_turn == turn && expected != checksum && !state.desync_warned {
                    state.desync_warned = true;
                    desync = Some(format!(
                        "state checksum mismatch at turn {}: server {expected:#018x}, client {checksum:#018x}",
                        turn.0
                    ));
                }
            }
            state.last_ack = turn;
            state.last_ack_at = Instant::now();
        }
        if let Some(text) = desync {
            eprintln!("Client {} desynced: {text}", id.0);
            self.send_to(
                id,
                &ServerMessage::Notice {
                    kind: NoticeKind::DesyncWarning,
                    text,
                },
            );
        }
    }

    /// Apply a client's dig-mark request. `set_dig_mark` enforces the
    /// diggability rules; accepted changes land in `deltas` and echo back
    /// to the owning client at the next flush.
    pub fn handle_mark_request(
        &mut self,
        id: ClientId,
        tiles: &[(i32, i32)],
        marked: bool,
        map: &mut GameMap,
        deltas: &mut MapDeltas,
    ) {
        let Some(seat) = self.clients.get(&id).and_then(|c| c.seat) else {
            return;
        };
        for &(x, y) in tiles {
            map.set_dig_mark(TileCoord { x, y }, seat, marked, deltas);
        }
    }

    /// Relay chat immediately to every in-loop client, tagged with the
    /// sender's seat and nickname. Unseated clients cannot chat.
    pub fn handle_chat(&mut self, id: ClientId, text: String) {
        let Some((seat, nickname)) = self
            .clients
            .get(&id)
            .and_then(|c| c.seat.map(|s| (s.0, c.nickname.clone())))
        else {
            return;
        };
        self.broadcast(&ServerMessage::Chat {
            seat,
            nickname,
            text,
        });
    }

    /// Close out one turn: advance the map's turn counter and send every
    /// seated client its vision-filtered view of `deltas`, ending with
    /// TurnStarted. Returns false (and leaves `deltas` accumulating) when
    /// the slowest in-loop client is too far behind on acks.
    pub fn flush_turn(&mut self, map: &mut GameMap, deltas: &mut MapDeltas) -> bool {
        if self.lag_blocked(map.turn()) {
            return false;
        }
        let turn = TurnNumber(map.advance_turn());
        let ids: Vec<ClientId> = self.clients.keys().copied().collect();
        for id in ids {
            self.flush_client(id, map, deltas, turn);
        }
        deltas.clear();
        true
    }

    fn lag_blocked(&self, current_turn: u64) -> bool {
        self.clients
            .values()
            .filter(|c| c.phase == ClientPhase::InTurnLoop)
            .map(|c| c.last_ack.0)
            .min()
            .is_some_and(|min_ack| current_turn.saturating_sub(min_ack) >= self.max_turn_lag)
    }

    /// One client's share of a turn flush. Unseated clients get nothing;
    /// Loading clients get deltas too (stream order keeps them behind the
    /// bootstrap), they just do not ack yet.
    fn flush_client(
        &mut self,
        id: ClientId,
        map: &GameMap,
        deltas: &MapDeltas,
        turn: TurnNumber,
    ) {
        let mut messages: Vec<ServerMessage> = Vec::new();
        {
            let Some(state) = self.clients.get_mut(&id) else {
                return;
            };
            let Some(seat) = state.seat else {
                return;
            };
            let visible = map.visible_tiles(seat);
            let (default_terrain, default_wall) = map.bootstrap_defaults();
            let default_fullness = if default_wall {
                map.config().max_fullness
            } else {
                0.0
            };

            // Tile pass: every visible tile whose fresh snapshot differs
            // from what this client was last sent. Covers dirty tiles and
            // tiles entering vision in one sweep; never-sent tiles still
            // matching the default fill are skipped (the mirror already has
            // them right).
            let mut tiles = Vec::new();
            for &at in &visible {
                let Some(snap) = snapshot_tile(map, at) else {
                    continue;
                };
                match state.sent_tiles.get(&at) {
                    Some(prev) if *prev == snap => {}
                    Some(_) => {
                        state.sent_tiles.insert(at, snap);
                        tiles.push(snap);
                    }
                    None => {
                        let is_default = snap.terrain == default_terrain.ordinal()
                            && snap.fullness == default_fullness
                            && snap.seat == 0;
                        if !is_default {
                            state.sent_tiles.insert(at, snap);
                            tiles.push(snap);
                        }
                    }
                }
            }
            if !tiles.is_empty() {
                messages.push(ServerMessage::TileDeltas { tiles });
            }

            // Creature events. Removals go to every client that knows the
            // creature (ghost cleanup even outside vision); moves only
            // while the destination is visible. Spawns fall out of the
            // newly-visible scan below.
            let mut moved: BTreeSet<CreatureId> = BTreeSet::new();
            for event in &deltas.creature_events {
                match *event {
                    CreatureEvent::Removed(cid) => {
                        moved.remove(&cid);
                        if state.known_creatures.remove(&cid) {
                            messages.push(ServerMessage::CreatureRemoved { id: cid.0 });
                        }
                    }
                    CreatureEvent::Moved(cid) => {
                        moved.insert(cid);
                    }
                    CreatureEvent::Spawned(_) => {}
                }
            }
            for cid in moved {
                if !state.known_creatures.contains(&cid) {
                    continue;
                }
                if let Some(creature) = map.creature(cid) {
                    if visible.contains(&creature.pos) {
                        messages.push(ServerMessage::CreatureMoved {
                            id: cid.0,
                            x: creature.pos.x,
                            y: creature.pos.y,
                        });
                    }
                }
            }
            for creature in map.creatures() {
                if !state.known_creatures.contains(&creature.id) && visible.contains(&creature.pos)
                {
                    state.known_creatures.insert(creature.id);
                    messages.push(ServerMessage::CreatureAdded(creature_snapshot(creature)));
                }
            }

            // Structure events, same shape.
            for event in &deltas.structure_events {
                match *event {
                    StructureEvent::Removed(sid) => {
                        if state.known_structures.remove(&sid) {
                            messages.push(ServerMessage::StructureRemoved { id: sid.0 });
                        }
                    }
                    StructureEvent::DoorState(sid, locked) => {
                        let in_view = map
                            .structure(sid)
                            .is_some_and(|s| s.tiles.iter().any(|t| visible.contains(t)));
                        if state.known_structures.contains(&sid) && in_view {
                            messages.push(ServerMessage::DoorState { id: sid.0, locked });
                        }
                    }
                    StructureEvent::Added(_) => {}
                }
            }
            for structure in map.structures() {
                if !state.known_structures.contains(&structure.id)
                    && structure.tiles.iter().any(|t| visible.contains(t))
                {
                    state.known_structures.insert(structure.id);
                    messages.push(ServerMessage::StructureAdded(structure_snapshot(structure)));
                }
            }

            // Mark changes route to the owning seat only.
            for change in &deltas.mark_changes {
                if change.seat == seat {
                    messages.push(ServerMessage::MarkedTiles {
                        tiles: change.tiles.iter().map(|t| (t.x, t.y)).collect(),
                        marked: change.marked,
                    });
                }
            }

            // Seat scalar state (gold), own seat only.
            if deltas.dirty_seats.contains(&seat) {
                if let Some(seat_state) = map.seats().get(seat) {
                    messages.push(ServerMessage::SeatUpdate(seat_snapshot(seat_state)));
                }
            }

            messages.push(ServerMessage::TurnStarted { turn });
            let checksum = state_checksum(state.sent_tiles.values());
            state.pending_checksums.push_back((turn, checksum));
        }
        for message in &messages {
            self.send_to(id, message);
        }
    }

    /// Drop every seated client whose acks have stalled for `timeout`
    /// while turns are outstanding. Returns the dropped ids.
    pub fn drop_laggards(&mut self, map: &mut GameMap, timeout: Duration) -> Vec<ClientId> {
        let current = map.turn();
        let stalled: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|(_, c)| {
                c.phase != ClientPhase::AwaitingSeat
                    && c.last_ack.0 < current
                    && c.last_ack_at.elapsed() >= timeout
            })
            .map(|(id, _)| *id)
            .collect();
        for id in &stalled {
            self.remove_client(*id, map);
        }
        stalled
    }

    /// Notify everyone and close every connection. Queued or not, the
    /// shutdown notice still gets delivered: dropping the client map drops
    /// each outbox sender, and the writer threads drain what is queued
    /// before closing their sockets.
    pub fn shutdown(&mut self) {
        let msg = ServerMessage::Notice {
            kind: NoticeKind::ShuttingDown,
            text: "server shutting down".into(),
        };
        let ids: Vec<ClientId> = self.clients.keys().copied().collect();
        for id in ids {
            self.send_to(id, &msg);
        }
        if let Some(writer) = self.recorder.take() {
            let _ = writer.finish();
        }
        self.clients.clear();
        self.seat_queue.clear();
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn phase_of(&self, id: ClientId) -> Option<ClientPhase> {
        self.clients.get(&id).map(|c| c.phase)
    }

    pub fn seat_of(&self, id: ClientId) -> Option<SeatId> {
        self.clients.get(&id).and_then(|c| c.seat)
    }

    /// The checksum the server expects from this client's next ack: a hash
    /// of every tile snapshot it has been sent.
    pub fn sent_checksum(&self, id: ClientId) -> Option<u64> {
        self.clients
            .get(&id)
            .map(|c| state_checksum(c.sent_tiles.values()))
    }

    /// Start mirroring this client's outbound stream into the replay log,
    /// if one was requested and nobody is being recorded yet.
    fn arm_recorder(&mut self, id: ClientId) {
        if self.recorded_client.is_some() {
            return;
        }
        let Some(path) = self.replay_path.take() else {
            return;
        };
        match ReplayWriter::create(&path) {
            Ok(writer) => {
                self.recorder = Some(writer);
                self.recorded_client = Some(id);
            }
            Err(e) => {
                eprintln!("Failed to create replay log {}: {e}", path.display());
            }
        }
    }

    /// Send a message to one client, mirroring the frame into the replay
    /// log when this is the recorded client. Queue errors are ignored (the
    /// reader thread will detect the broken pipe).
    fn send_to(&mut self, id: ClientId, msg: &ServerMessage) {
        let frame = msg.to_frame();
        if self.recorded_client == Some(id) {
            if let Some(writer) = self.recorder.as_mut() {
                if let Err(e) = writer.record(&frame) {
                    eprintln!("Replay log write failed; recording stopped: {e}");
                    self.recorder = None;
                }
            }
        }
        if let Some(state) = self.clients.get(&id) {
            let _ = state.outbox.send(frame);
        }
    }

    /// Broadcast to every in-loop client. Loading and unseated clients are
    /// skipped: chat and notices are for clients that are actually in the
    /// game.
    fn broadcast(&mut self, msg: &ServerMessage) {
        let ids: Vec<ClientId> = self
            .clients
            .iter()
            .filter(|(_, c)| c.phase == ClientPhase::InTurnLoop)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            self.send_to(id, msg);
        }
    }
}

/// Writer thread for one client: drains queued frames onto the socket.
/// Exits when the queue's sender drops or the socket dies.
fn writer_loop(mut writer: BufWriter<TcpStream>, frames: Receiver<Vec<u8>>) {
    while let Ok(frame) = frames.recv() {
        if write_message(&mut writer, &frame).is_err() {
            break; // broken pipe; the reader thread reports it
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot builders
// ---------------------------------------------------------------------------

/// A tile's replicated view. The seat field carries the owner only once
/// the claim is finished; contested fractions never leave the server.
fn snapshot_tile(map: &GameMap, at: TileCoord) -> Option<TileSnapshot> {
    let tile = map.tile(at)?;
    let seat = if tile.is_fully_claimed() {
        tile.owner.map_or(0, |s| s.0)
    } else {
        0
    };
    Some(TileSnapshot {
        x: at.x,
        y: at.y,
        terrain: tile.terrain.ordinal(),
        fullness: tile.fullness,
        seat,
    })
}

fn creature_snapshot(creature: &Creature) -> CreatureSnapshot {
    CreatureSnapshot {
        id: creature.id.0,
        seat: creature.seat.0,
        class: creature.class_name.clone(),
        x: creature.pos.x,
        y: creature.pos.y,
    }
}

fn structure_snapshot(structure: &Structure) -> StructureSnapshot {
    StructureSnapshot {
        id: structure.id.0,
        kind: structure.kind.ordinal(),
        locked: structure.door_locked(),
        seat: structure.seat.0,
        tiles: structure.tiles.iter().map(|t| (t.x, t.y)).collect(),
    }
}

fn seat_snapshot(seat: &Seat) -> SeatSnapshot {
    SeatSnapshot {
        id: seat.id.0,
        team: seat.team.0,
        gold: seat.gold,
    }
}

fn class_snapshot(name: &str, class: &CreatureClass) -> ClassSnapshot {
    ClassSnapshot {
        name: name.to_string(),
        ground_speed: class.ground_speed,
        water_speed: class.water_speed,
        lava_speed: class.lava_speed,
        sight_radius: class.sight_radius,
        dig_rate: class.dig_rate,
        claim_rate: class.claim_rate,
    }
}

#[cfg(test)]
mod tests {
    use std::io::BufReader;
    use std::net::TcpListener;

    use underkeep_protocol::framing::read_message;
    use underkeep_sim::config::GameConfig;
    use underkeep_sim::grid::TileGrid;
    use underkeep_sim::tile::Tile;
    use underkeep_sim::types::{TeamId, Terrain};

    use crate::client::ClientMirror;

    use super::*;

    /// Create a TCP pair: (client_stream, server_stream) on localhost.
    fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    /// Read one ServerMessage off a client-side stream.
    fn recv_server_msg(stream: &mut BufReader<TcpStream>) -> ServerMessage {
        let bytes = read_message(stream).unwrap();
        ServerMessage::from_frame(&bytes).unwrap()
    }

    fn at(x: i32, y: i32) -> TileCoord {
        TileCoord { x, y }
    }

    /// 9x6 all-wall dirt map with a dug corridor (1,1)..(5,1), a worker
    /// with sight radius 2 at its west end, and `seat_count` seats. Small
    /// sight keeps the far side of the map out of view.
    fn test_map(seat_count: u32) -> (GameMap, CreatureId) {
        let mut config = GameConfig::default();
        if let Some(worker) = config.creature_classes.get_mut("worker") {
            worker.sight_radius = 2;
        }
        let mut grid = TileGrid::new(9, 6, Tile::wall(Terrain::Dirt, config.max_fullness));
        for x in 1..=5 {
            grid.set(at(x, 1), Tile::open(Terrain::Dirt));
        }
        let seats = (1..=seat_count)
            .map(|i| Seat::new(SeatId(i), TeamId(i), 100.0))
            .collect();
        let mut map = GameMap::new(grid, seats, config);
        let mut deltas = MapDeltas::new();
        let worker = map
            .add_creature(SeatId(1), "worker", at(1, 1), &mut deltas)
            .unwrap();
        (map, worker)
    }

    /// Session with one connected, seated client; drains nothing.
    fn seated_session(map: &mut GameMap) -> (Session, ClientId, BufReader<TcpStream>) {
        let (client, server) = tcp_pair();
        let mut session = Session::new(8, 4, None);
        let id = session
            .add_client("Ada".into(), PROTOCOL_VERSION, server, map)
            .unwrap();
        (session, id, BufReader::new(client))
    }

    #[test]
    fn add_client_welcomes_seats_and_bootstraps() {
        let (mut map, worker) = test_map(2);
        let (session, id, mut reader) = seated_session(&mut map);
        assert_eq!(id, ClientId(0));
        assert_eq!(session.phase_of(id), Some(ClientPhase::InLoading));
        assert_eq!(session.seat_of(id), Some(SeatId(1)));

        match recv_server_msg(&mut reader) {
            ServerMessage::Welcome {
                client_id,
                server_turn,
            } => {
                assert_eq!(client_id, ClientId(0));
                assert_eq!(server_turn, TurnNumber(0));
            }
            other => panic!("expected Welcome, got {other:?}"),
        }
        match recv_server_msg(&mut reader) {
            ServerMessage::SeatAssigned { seat, nickname } => {
                assert_eq!(seat, 1);
                assert_eq!(nickname, "Ada");
            }
            other => panic!("expected SeatAssigned, got {other:?}"),
        }
        match recv_server_msg(&mut reader) {
            ServerMessage::Bootstrap(data) => {
                assert_eq!((data.width, data.height), (9, 6));
                assert!(data.default_wall);
                assert_eq!(data.max_fullness, 100.0);
                assert_eq!(data.turn, TurnNumber(0));
                // Three corridor tiles fall inside the worker's sight; the
                // corridor's east half is out of view and not sent.
                assert_eq!(data.tiles.len(), 3);
                assert!(data.tiles.iter().all(|t| t.fullness == 0.0));
                assert_eq!(data.seats.len(), 2);
                assert_eq!(data.creatures.len(), 1);
                assert_eq!(data.creatures[0].id, worker.0);
            }
            other => panic!("expected Bootstrap, got {other:?}"),
        }
    }

    #[test]
    fn version_mismatch_rejected() {
        let (mut map, _) = test_map(2);
        let (_client, server) = tcp_pair();
        let mut session = Session::new(8, 4, None);
        let result = session.add_client("Ada".into(), PROTOCOL_VERSION + 1, server, &mut map);
        assert!(result.unwrap_err().starts_with("protocol version mismatch"));
        assert_eq!(session.client_count(), 0);
    }

    #[test]
    fn full_server_rejected() {
        let (mut map, _) = test_map(2);
        let (_client1, server1) = tcp_pair();
        let (_client2, server2) = tcp_pair();
        let mut session = Session::new(1, 4, None);
        session
            .add_client("Ada".into(), PROTOCOL_VERSION, server1, &mut map)
            .unwrap();
        let result = session.add_client("Brin".into(), PROTOCOL_VERSION, server2, &mut map);
        assert_eq!(result.unwrap_err(), "server is full");
    }

    #[test]
    fn seat_exhaustion_queues_until_one_frees() {
        let (mut map, _) = test_map(1);
        let (_client1, server1) = tcp_pair();
        let (client2, server2) = tcp_pair();
        let mut session = Session::new(8, 4, None);

        let first = session
            .add_client("Ada".into(), PROTOCOL_VERSION, server1, &mut map)
            .unwrap();
        let second = session
            .add_client("Brin".into(), PROTOCOL_VERSION, server2, &mut map)
            .unwrap();
        assert_eq!(session.phase_of(second), Some(ClientPhase::AwaitingSeat));
        assert_eq!(session.seat_of(second), None);

        let mut reader2 = BufReader::new(client2);
        assert!(matches!(
            recv_server_msg(&mut reader2),
            ServerMessage::Welcome { .. }
        ));
        match recv_server_msg(&mut reader2) {
            ServerMessage::Notice { kind, .. } => assert_eq!(kind, NoticeKind::Info),
            other => panic!("expected Notice, got {other:?}"),
        }

        // The seat frees and the queued client is promoted into it.
        session.remove_client(first, &mut map);
        assert_eq!(session.phase_of(second), Some(ClientPhase::InLoading));
        assert_eq!(session.seat_of(second), Some(SeatId(1)));
        match recv_server_msg(&mut reader2) {
            ServerMessage::SeatAssigned { seat, nickname } => {
                assert_eq!(seat, 1);
                assert_eq!(nickname, "Brin");
            }
            other => panic!("expected SeatAssigned, got {other:?}"),
        }
        assert!(matches!(
            recv_server_msg(&mut reader2),
            ServerMessage::Bootstrap(_)
        ));
    }

    #[test]
    fn flush_filters_deltas_by_vision() {
        let (mut map, _) = test_map(2);
        let (mut session, id, mut reader) = seated_session(&mut map);
        for _ in 0..3 {
            recv_server_msg(&mut reader); // Welcome, SeatAssigned, Bootstrap
        }
        session.handle_bootstrap_done(id);

        // One dig inside the worker's sight disc, one far outside it.
        let mut deltas = MapDeltas::new();
        assert!(map.set_fullness(at(2, 2), 0.0, &mut deltas));
        assert!(map.set_fullness(at(8, 5), 0.0, &mut deltas));

        assert!(session.flush_turn(&mut map, &mut deltas));
        assert!(deltas.is_empty());

        match recv_server_msg(&mut reader) {
            ServerMessage::TileDeltas { tiles } => {
                assert_eq!(tiles.len(), 1);
                assert_eq!((tiles[0].x, tiles[0].y), (2, 2));
                assert_eq!(tiles[0].fullness, 0.0);
            }
            other => panic!("expected TileDeltas, got {other:?}"),
        }
        assert!(matches!(
            recv_server_msg(&mut reader),
            ServerMessage::TurnStarted {
                turn: TurnNumber(1)
            }
        ));
    }

    #[test]
    fn quiet_turn_sends_only_turn_started() {
        let (mut map, _) = test_map(2);
        let (mut session, id, mut reader) = seated_session(&mut map);
        for _ in 0..3 {
            recv_server_msg(&mut reader);
        }
        session.handle_bootstrap_done(id);

        let mut deltas = MapDeltas::new();
        assert!(session.flush_turn(&mut map, &mut deltas));
        assert!(matches!(
            recv_server_msg(&mut reader),
            ServerMessage::TurnStarted {
                turn: TurnNumber(1)
            }
        ));
    }

    #[test]
    fn server_checksum_matches_a_real_mirror() {
        let (mut map, _) = test_map(2);
        let (mut session, id, mut reader) = seated_session(&mut map);

        // Run the real client mirror over the exact stream the session
        // wrote, through the bootstrap and one delta-carrying turn.
        let mut mirror = ClientMirror::new();
        for _ in 0..3 {
            mirror.apply(&recv_server_msg(&mut reader));
        }
        session.handle_bootstrap_done(id);

        let mut deltas = MapDeltas::new();
        assert!(map.set_fullness(at(2, 2), 0.0, &mut deltas));
        assert!(session.flush_turn(&mut map, &mut deltas));

        #[allow(unused_assignments)]
        let mut acked = None;
        loop {
            match mirror.apply(&recv_server_msg(&mut reader)) {
                Some(underkeep_protocol::message::ClientMessage::AckTurn { turn, checksum }) => {
                    acked = Some((turn, checksum));
                    break;
                }
                _ => continue,
            }
        }
        let (turn, checksum) = acked.unwrap();
        assert_eq!(turn, TurnNumber(1));
        assert_eq!(Some(checksum), session.sent_checksum(id));
    }

    #[test]
    fn desync_warning_is_sent_once() {
        let (mut map, _) = test_map(2);
        let (mut session, id, mut reader) = seated_session(&mut map);
        for _ in 0..3 {
            recv_server_msg(&mut reader);
        }
        session.handle_bootstrap_done(id);

        let mut deltas = MapDeltas::new();
        assert!(session.flush_turn(&mut map, &mut deltas));
        assert!(session.flush_turn(&mut map, &mut deltas));
        recv_server_msg(&mut reader); // TurnStarted(1)
        recv_server_msg(&mut reader); // TurnStarted(2)

        // Two bad acks, then a chat to delimit the stream: exactly one
        // DesyncWarning notice arrives before the chat.
        session.handle_ack(id, TurnNumber(1), 0xBAD);
        session.handle_ack(id, TurnNumber(2), 0xBAD);
        session.handle_chat(id, "still here".into());

        match recv_server_msg(&mut reader) {
            ServerMessage::Notice { kind, .. } => assert_eq!(kind, NoticeKind::DesyncWarning),
            other => panic!("expected Notice, got {other:?}"),
        }
        match recv_server_msg(&mut reader) {
            ServerMessage::Chat { text, .. } => assert_eq!(text, "still here"),
            other => panic!("expected Chat, got {other:?}"),
        }
    }

    #[test]
    fn matching_ack_raises_no_warning() {
        let (mut map, _) = test_map(2);
        let (mut session, id, mut reader) = seated_session(&mut map);
        for _ in 0..3 {
            recv_server_msg(&mut reader);
        }
        session.handle_bootstrap_done(id);

        let mut deltas = MapDeltas::new();
        assert!(session.flush_turn(&mut map, &mut deltas));
        recv_server_msg(&mut reader); // TurnStarted(1)

        let checksum = session.sent_checksum(id).unwrap();
        session.handle_ack(id, TurnNumber(1), checksum);
        session.handle_chat(id, "all good".into());
        match recv_server_msg(&mut reader) {
            ServerMessage::Chat { text, .. } => assert_eq!(text, "all good"),
            other => panic!("expected Chat (no notice), got {other:?}"),
        }
    }

    #[test]
    fn flush_blocks_at_max_turn_lag_until_an_ack() {
        let (mut map, _) = test_map(2);
        let (client, server) = tcp_pair();
        let mut session = Session::new(8, 2, None);
        let id = session
            .add_client("Ada".into(), PROTOCOL_VERSION, server, &mut map)
            .unwrap();
        session.handle_bootstrap_done(id);
        let _keep_alive = client;

        let mut deltas = MapDeltas::new();
        assert!(session.flush_turn(&mut map, &mut deltas)); // turn 1
        assert!(session.flush_turn(&mut map, &mut deltas)); // turn 2
        assert!(!session.flush_turn(&mut map, &mut deltas)); // 2 behind, blocked
        assert_eq!(map.turn(), 2);

        // Accumulated mutations survive a blocked flush.
        assert!(map.set_fullness(at(2, 2), 0.0, &mut deltas));
        assert!(!session.flush_turn(&mut map, &mut deltas));
        assert!(!deltas.is_empty());

        session.handle_ack(id, TurnNumber(1), session.sent_checksum(id).unwrap());
        assert!(session.flush_turn(&mut map, &mut deltas)); // unblocked, turn 3
        assert_eq!(map.turn(), 3);
        assert!(deltas.is_empty());
    }

    #[test]
    fn mark_changes_route_to_their_seat_only() {
        let (mut map, _) = test_map(2);
        let (client1, server1) = tcp_pair();
        let (client2, server2) = tcp_pair();
        let mut session = Session::new(8, 4, None);
        let first = session
            .add_client("Ada".into(), PROTOCOL_VERSION, server1, &mut map)
            .unwrap();
        let second = session
            .add_client("Brin".into(), PROTOCOL_VERSION, server2, &mut map)
            .unwrap();
        session.handle_bootstrap_done(first);
        session.handle_bootstrap_done(second);

        // Both seatings happened before either client finished loading, so
        // the join notices reached nobody; each stream holds exactly the
        // Welcome, SeatAssigned, Bootstrap trio.
        let mut reader1 = BufReader::new(client1);
        let mut reader2 = BufReader::new(client2);
        for _ in 0..3 {
            recv_server_msg(&mut reader1);
            recv_server_msg(&mut reader2);
        }

        // A diggable wall next to the corridor, and an open tile that is
        // not markable: only the former produces a change.
        let mut deltas = MapDeltas::new();
        session.handle_mark_request(first, &[(2, 2), (2, 1)], true, &mut map, &mut deltas);
        assert_eq!(deltas.mark_changes.len(), 1);
        assert!(map.tile(at(2, 2)).unwrap().is_marked_by(SeatId(1)));

        assert!(session.flush_turn(&mut map, &mut deltas));

        // Seat 1 sees its mark echo; seat 2 goes straight to TurnStarted.
        match recv_server_msg(&mut reader1) {
            ServerMessage::MarkedTiles { tiles, marked } => {
                assert_eq!(tiles, vec![(2, 2)]);
                assert!(marked);
            }
            other => panic!("expected MarkedTiles, got {other:?}"),
        }
        assert!(matches!(
            recv_server_msg(&mut reader1),
            ServerMessage::TurnStarted { .. }
        ));
        assert!(matches!(
            recv_server_msg(&mut reader2),
            ServerMessage::TurnStarted { .. }
        ));
    }

    #[test]
    fn chat_skips_loading_clients() {
        let (mut map, _) = test_map(2);
        let (client1, server1) = tcp_pair();
        let (client2, server2) = tcp_pair();
        let mut session = Session::new(8, 4, None);
        let first = session
            .add_client("Ada".into(), PROTOCOL_VERSION, server1, &mut map)
            .unwrap();
        let _second = session
            .add_client("Brin".into(), PROTOCOL_VERSION, server2, &mut map)
            .unwrap();
        session.handle_bootstrap_done(first);
        // Brin stays InLoading.

        session.handle_chat(first, "hello?".into());

        let mut reader1 = BufReader::new(client1);
        for _ in 0..3 {
            recv_server_msg(&mut reader1);
        }
        match recv_server_msg(&mut reader1) {
            ServerMessage::Chat {
                seat,
                nickname,
                text,
            } => {
                assert_eq!(seat, 1);
                assert_eq!(nickname, "Ada");
                assert_eq!(text, "hello?");
            }
            other => panic!("expected Chat, got {other:?}"),
        }

        // Brin's stream carries only the join traffic, then the next
        // flush's TurnStarted, with no chat in between.
        let mut deltas = MapDeltas::new();
        assert!(session.flush_turn(&mut map, &mut deltas));
        let mut reader2 = BufReader::new(client2);
        for _ in 0..3 {
            recv_server_msg(&mut reader2);
        }
        assert!(matches!(
            recv_server_msg(&mut reader2),
            ServerMessage::TurnStarted { .. }
        ));
    }

    #[test]
    fn stalled_client_is_dropped_and_its_seat_freed() {
        let (mut map, _) = test_map(1);
        let (client, server) = tcp_pair();
        let mut session = Session::new(8, 4, None);
        let id = session
            .add_client("Ada".into(), PROTOCOL_VERSION, server, &mut map)
            .unwrap();
        session.handle_bootstrap_done(id);
        let _keep_alive = client;

        let mut deltas = MapDeltas::new();
        assert!(session.flush_turn(&mut map, &mut deltas));

        // No acks ever arrive; with a zero deadline the client is cut.
        let dropped = session.drop_laggards(&mut map, Duration::ZERO);
        assert_eq!(dropped, vec![id]);
        assert_eq!(session.client_count(), 0);
        assert_eq!(map.seats().first_unbound(), Some(SeatId(1)));
    }

    #[test]
    fn caught_up_client_survives_the_deadline() {
        let (mut map, _) = test_map(1);
        let (client, server) = tcp_pair();
        let mut session = Session::new(8, 4, None);
        let id = session
            .add_client("Ada".into(), PROTOCOL_VERSION, server, &mut map)
            .unwrap();
        session.handle_bootstrap_done(id);
        let _keep_alive = client;

        let mut deltas = MapDeltas::new();
        assert!(session.flush_turn(&mut map, &mut deltas));
        session.handle_ack(id, TurnNumber(1), session.sent_checksum(id).unwrap());

        assert!(session.drop_laggards(&mut map, Duration::ZERO).is_empty());
        assert_eq!(session.client_count(), 1);
    }

    #[test]
    fn shutdown_notifies_clients_then_closes() {
        let (mut map, _) = test_map(2);
        let (mut session, id, mut reader) = seated_session(&mut map);
        for _ in 0..3 {
            recv_server_msg(&mut reader);
        }
        session.handle_bootstrap_done(id);

        session.shutdown();
        assert_eq!(session.client_count(), 0);
        match recv_server_msg(&mut reader) {
            ServerMessage::Notice { kind, .. } => assert_eq!(kind, NoticeKind::ShuttingDown),
            other => panic!("expected Notice, got {other:?}"),
        }
        // After the drain the writer thread closes its end of the socket.
        assert!(read_message(&mut reader).is_err());
    }

    #[test]
    fn tiles_leaving_vision_keep_their_cached_state() {
        let (mut map, worker) = test_map(2);
        let (mut session, id, mut reader) = seated_session(&mut map);
        let mut mirror = ClientMirror::new();
        for _ in 0..3 {
            mirror.apply(&recv_server_msg(&mut reader));
        }
        session.handle_bootstrap_done(id);

        // March the worker to the corridor's east end; the west end drops
        // out of its sight disc but must stay in the sent cache.
        let mut deltas = MapDeltas::new();
        assert!(map.move_creature(worker, at(5, 1), &mut deltas));
        assert!(session.flush_turn(&mut map, &mut deltas));
        let before = session.sent_checksum(id).unwrap();

        // A change on the now-unseen west tile is not replicated, and the
        // cache (hence the expected checksum) is unchanged by it.
        assert!(map.set_fullness(at(1, 1), map.config().max_fullness, &mut deltas));
        assert!(session.flush_turn(&mut map, &mut deltas));
        assert_eq!(session.sent_checksum(id), Some(before));

        // The live mirror agrees turn by turn.
        loop {
            let msg = recv_server_msg(&mut reader);
            let reply = mirror.apply(&msg);
            if let Some(underkeep_protocol::message::ClientMessage::AckTurn { turn, checksum }) =
                reply
            {
                if turn == TurnNumber(2) {
                    assert_eq!(Some(checksum), session.sent_checksum(id));
                    break;
                }
            }
        }
    }
}
