// TCP server and main event loop for the authoritative game server.
//
// Architecture: thread-per-connection I/O with a central `mpsc` channel.
//
// - **Listener thread** (`TcpListener::accept()` loop): accepts new TCP
//   connections and sends `InternalEvent::NewConnection` to the main thread.
// - **Reader threads** (one per client): call `framing::read_message()` in a
//   loop, decode `ClientMessage`, and send `InternalEvent::MessageFrom` to
//   the main thread. On error/EOF, send `InternalEvent::Disconnected`.
// - **Writer threads** (one per client, owned by `Session`): drain frames
//   the main thread serialized, so a stalled socket never blocks a turn.
// - **Main thread**: owns the `GameMap`, the `Session`, and the pending
//   `MapDeltas`. It drains events and, on a fixed deadline cadence, drops
//   stalled clients and flushes the turn.
//
// The turn timer is a deadline, not a plain `recv_timeout`: the receive
// timeout is whatever remains until the next flush instant, so a steady
// stream of chat or mark traffic cannot keep pushing the flush back.
//
// Gameplay code outside the loop mutates the map through
// `ServerHandle::apply`, which ships a closure to the main thread. The
// closure's delta output is replicated with the next turn.
//
// Shutdown: `stop` flips `keep_running`; the loop notices within 100ms
// and runs `Session::shutdown`, which notifies every client.

use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use underkeep_protocol::framing::{read_message, write_message};
use underkeep_protocol::message::{ClientMessage, ServerMessage};
use underkeep_protocol::types::ClientId;
use underkeep_protocol::wire::Wire;

use underkeep_sim::delta::MapDeltas;
use underkeep_sim::gamemap::GameMap;

use crate::session::Session;

/// An authoritative mutation, run on the simulation thread between turn
/// flushes. Whatever it records in the deltas replicates that turn.
pub type Mutation = Box<dyn FnOnce(&mut GameMap, &mut MapDeltas) + Send>;

/// Events sent from listener/reader threads (and `ServerHandle::apply`)
/// to the main thread.
enum InternalEvent {
    NewConnection {
        stream: TcpStream,
    },
    MessageFrom {
        client_id: ClientId,
        message: ClientMessage,
    },
    Disconnected {
        client_id: ClientId,
    },
    Mutate {
        mutation: Mutation,
    },
}

/// Handle returned by `start_server` to control the running server.
pub struct ServerHandle {
    keep_running: Arc<AtomicBool>,
    events: Sender<InternalEvent>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ServerHandle {
    /// Queue a mutation for the simulation thread. It runs before the next
    /// turn flush.
    pub fn apply(&self, mutation: Mutation) {
        let _ = self.events.send(InternalEvent::Mutate { mutation });
    }

    /// Signal the server to stop and wait for it to shut down.
    pub fn stop(self) {
        self.keep_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread {
            let _ = handle.join();
        }
    }
}

/// Configuration for starting a game server.
pub struct ServerConfig {
    pub port: u16,
    /// Turn flush cadence in milliseconds.
    pub turn_ms: u64,
    pub max_clients: u32,
    /// Turns the slowest in-loop client may fall behind on acks before
    /// the flush pauses.
    pub max_turn_lag: u64,
    /// How long a client may sit on an outstanding turn before it is
    /// dropped.
    pub ack_timeout_ms: u64,
    /// Record the first seated client's outbound stream into this log.
    pub replay_log: Option<std::path::PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 32222,
            turn_ms: 250,
            max_clients: 8,
            max_turn_lag: 4,
            ack_timeout_ms: 10_000,
            replay_log: None,
        }
    }
}

/// Start the game server on a background thread. Returns a handle for
/// stopping it and the actual bound address (useful when port 0 is used
/// to let the OS pick a free port).
pub fn start_server(
    config: ServerConfig,
    map: GameMap,
) -> std::io::Result<(ServerHandle, SocketAddr)> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", config.port))?;
    let addr = listener.local_addr()?;
    let keep_running = Arc::new(AtomicBool::new(true));
    let keep_running_clone = keep_running.clone();

    // The channel is created here rather than in the loop so the handle
    // can inject Mutate events.
    let (tx, rx): (Sender<InternalEvent>, Receiver<InternalEvent>) = mpsc::channel();
    let tx_loop = tx.clone();

    let thread = thread::spawn(move || {
        run_server(listener, config, map, tx_loop, rx, keep_running_clone);
    });

    Ok((
        ServerHandle {
            keep_running,
            events: tx,
            thread: Some(thread),
        },
        addr,
    ))
}

/// Main server loop. Runs until `keep_running` is set to false.
fn run_server(
    listener: TcpListener,
    config: ServerConfig,
    mut map: GameMap,
    tx: Sender<InternalEvent>,
    rx: Receiver<InternalEvent>,
    keep_running: Arc<AtomicBool>,
) {
    let mut session = Session::new(config.max_clients, config.max_turn_lag, config.replay_log);
    let mut deltas = MapDeltas::new();

    // Set the listener to non-blocking so the accept thread can check
    // keep_running periodically.
    listener.set_nonblocking(true).ok();

    // Listener thread: accepts new connections.
    let keep_running_listener = keep_running.clone();
    let tx_listener = tx.clone();
    thread::spawn(move || {
        while keep_running_listener.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, _addr)) => {
                    stream.set_nonblocking(false).ok();
                    let _ = tx_listener.send(InternalEvent::NewConnection { stream });
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(50));
                }
                Err(_) => break,
            }
        }
    });

    let turn = Duration::from_millis(config.turn_ms.max(1));
    let ack_timeout = Duration::from_millis(config.ack_timeout_ms);
    let mut next_flush = Instant::now() + turn;

    // Main event loop.
    while keep_running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= next_flush {
            if session.client_count() > 0 {
                for dropped in session.drop_laggards(&mut map, ack_timeout) {
                    eprintln!(
                        "Dropping client {} (no ack for {}ms)",
                        dropped.0, config.ack_timeout_ms
                    );
                }
                // A blocked flush leaves the deltas accumulating; it is
                // retried at the next deadline.
                session.flush_turn(&mut map, &mut deltas);
            }
            next_flush += turn;
            let now = Instant::now();
            if next_flush <= now {
                // Skip missed ticks after a long stall instead of bursting.
                next_flush = now + turn;
            }
            continue;
        }
        // Cap the wait so `stop` is honored promptly even with a long
        // turn cadence.
        let wait = (next_flush - now).min(Duration::from_millis(100));
        match rx.recv_timeout(wait) {
            Ok(event) => {
                handle_event(&mut session, &mut map, &mut deltas, event, &tx, &keep_running);
                // Drain any additional events that arrived during handling.
                while let Ok(event) = rx.try_recv() {
                    handle_event(&mut session, &mut map, &mut deltas, event, &tx, &keep_running);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                // Deadline reached; the top of the loop flushes.
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    session.shutdown();
}

/// Dispatch a single event.
fn handle_event(
    session: &mut Session,
    map: &mut GameMap,
    deltas: &mut MapDeltas,
    event: InternalEvent,
    tx: &Sender<InternalEvent>,
    keep_running: &Arc<AtomicBool>,
) {
    match event {
        InternalEvent::NewConnection { stream } => {
            handle_new_connection(session, map, stream, tx, keep_running);
        }
        InternalEvent::MessageFrom { client_id, message } => {
            handle_message(session, map, deltas, client_id, message);
        }
        InternalEvent::Disconnected { client_id } => {
            session.remove_client(client_id, map);
        }
        InternalEvent::Mutate { mutation } => {
            mutation(map, deltas);
        }
    }
}

/// Handle a new TCP connection: read the Hello handshake, add the client
/// to the session, and spawn a reader thread.
fn handle_new_connection(
    session: &mut Session,
    map: &mut GameMap,
    stream: TcpStream,
    tx: &Sender<InternalEvent>,
    keep_running: &Arc<AtomicBool>,
) {
    // Set a read timeout so the handshake doesn't block forever.
    stream.set_read_timeout(Some(Duration::from_secs(5))).ok();

    let mut reader = BufReader::new(match stream.try_clone() {
        Ok(s) => s,
        Err(_) => return,
    });

    let hello_bytes = match read_message(&mut reader) {
        Ok(bytes) => bytes,
        Err(_) => return,
    };

    let hello = match ClientMessage::from_frame(&hello_bytes) {
        Ok(msg) => msg,
        Err(_) => return,
    };

    match hello {
        ClientMessage::Hello {
            protocol_version,
            nickname,
        } => {
            // Clone the stream for the session's write half; the original
            // stays in hand for a possible Rejected.
            let write_stream = match stream.try_clone() {
                Ok(s) => s,
                Err(_) => return,
            };

            match session.add_client(nickname, protocol_version, write_stream, map) {
                Ok(client_id) => {
                    // Clear the handshake timeout for the long-lived
                    // reader loop.
                    stream.set_read_timeout(None).ok();

                    let tx_reader = tx.clone();
                    let keep_running_reader = keep_running.clone();
                    thread::spawn(move || {
                        reader_loop(reader, client_id, tx_reader, keep_running_reader);
                    });
                }
                Err(reason) => {
                    // Send Rejected and close the connection.
                    let rejected = ServerMessage::Rejected { reason };
                    let mut writer = BufWriter::new(stream);
                    let _ = write_message(&mut writer, &rejected.to_frame());
                }
            }
        }
        _ => {
            // Expected Hello as the first message; drop the connection.
        }
    }
}

/// Reader loop for a single client. Runs in its own thread.
fn reader_loop(
    mut reader: BufReader<TcpStream>,
    client_id: ClientId,
    tx: Sender<InternalEvent>,
    keep_running: Arc<AtomicBool>,
) {
    while keep_running.load(Ordering::SeqCst) {
        match read_message(&mut reader) {
            Ok(bytes) => match ClientMessage::from_frame(&bytes) {
                Ok(ClientMessage::Goodbye) => {
                    let _ = tx.send(InternalEvent::Disconnected { client_id });
                    break;
                }
                Ok(message) => {
                    let _ = tx.send(InternalEvent::MessageFrom { client_id, message });
                }
                Err(_) => {
                    // Malformed message; drop the client.
                    let _ = tx.send(InternalEvent::Disconnected { client_id });
                    break;
                }
            },
            Err(_) => {
                // Read error or EOF.
                let _ = tx.send(InternalEvent::Disconnected { client_id });
                break;
            }
        }
    }
}

/// Handle a client message that isn't Hello or Goodbye (those are handled
/// during connection setup and in the reader loop respectively).
fn handle_message(
    session: &mut Session,
    map: &mut GameMap,
    deltas: &mut MapDeltas,
    client_id: ClientId,
    message: ClientMessage,
) {
    match message {
        ClientMessage::BootstrapDone => {
            session.handle_bootstrap_done(client_id);
        }
        ClientMessage::AckTurn { turn, checksum } => {
            session.handle_ack(client_id, turn, checksum);
        }
        ClientMessage::MarkTiles { tiles, marked } => {
            session.handle_mark_request(client_id, &tiles, marked, map, deltas);
        }
        ClientMessage::Chat { text } => {
            session.handle_chat(client_id, text);
        }
        ClientMessage::Hello { .. } | ClientMessage::Goodbye => {
            // Hello is handled during connection setup, Goodbye in the
            // reader loop.
        }
    }
}
