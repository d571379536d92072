// Test-only game client for multiplayer integration tests.
//
// Wraps the real `NetClient` and `ClientMirror` (from `underkeep_net`) to
// provide a synchronous, test-friendly API for exercising the full
// replication pipeline: connect -> seat -> bootstrap -> turn deltas ->
// mirror -> path queries.
//
// The only test-specific code here is the synchronous polling wrappers
// (blocking loops around `NetClient::pump()`). All networking and map
// logic uses the same code paths as a real game client.
//
// See also: `tests/full_pipeline.rs` for the integration test scenarios.

use std::thread;
use std::time::{Duration, Instant};

use underkeep_net::client::{ClientMirror, NetClient};
use underkeep_protocol::message::{NoticeKind, ServerMessage};
use underkeep_sim::gamemap::GameMap;

/// Default timeout for blocking poll operations.
const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Sleep duration between poll attempts.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A test game client wrapping a real NetClient and ClientMirror.
pub struct TestGameClient {
    client: NetClient,
    pub mirror: ClientMirror,
}

impl TestGameClient {
    /// Connect to a server, perform the Hello handshake, and pump until
    /// the seat assignment and bootstrap snapshot have been applied.
    pub fn connect(addr: std::net::SocketAddr, nickname: &str) -> Self {
        let addr_str = addr.to_string();
        let (client, _welcome) =
            NetClient::connect(&addr_str, nickname).expect("TestGameClient::connect failed");
        let mut this = Self {
            client,
            mirror: ClientMirror::new(),
        };
        this.pump_until(|c| c.mirror.map().is_some(), "bootstrap");
        this
    }

    /// Drain pending messages into the mirror, sending any replies the
    /// mirror produces (BootstrapDone, AckTurn). Returns the messages so
    /// callers can inspect them.
    pub fn pump(&mut self) -> Vec<ServerMessage> {
        self.client
            .pump(&mut self.mirror)
            .expect("connection failed during pump")
    }

    /// Blocking pump until `done` holds for this client.
    pub fn pump_until(&mut self, done: impl Fn(&Self) -> bool, what: &str) {
        let start = Instant::now();
        loop {
            assert!(
                start.elapsed() < POLL_TIMEOUT,
                "timed out waiting for {what}"
            );
            self.pump();
            if done(self) {
                return;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Blocking pump until the mirror has applied turn `turn` (or later).
    pub fn wait_for_turn(&mut self, turn: u64) {
        self.pump_until(|c| c.mirror.turn().0 >= turn, &format!("turn {turn}"));
    }

    /// The mirror's map. Panics if the bootstrap has not arrived yet.
    pub fn map(&self) -> &GameMap {
        self.mirror.map().expect("mirror has no map yet")
    }

    /// Ask the server to mark or unmark tiles for digging.
    pub fn send_mark_tiles(&mut self, tiles: Vec<(i32, i32)>, marked: bool) {
        self.client
            .send_mark_tiles(tiles, marked)
            .expect("send_mark_tiles failed");
    }

    /// Send a chat line to the server.
    pub fn send_chat(&mut self, text: &str) {
        self.client.send_chat(text).expect("send_chat failed");
    }

    /// Drain everything still in flight after the server has shut down,
    /// without sending replies (the socket is dying or dead). Returns once
    /// the ShuttingDown notice has been applied to the mirror.
    pub fn drain_after_shutdown(&mut self) {
        let start = Instant::now();
        loop {
            assert!(
                start.elapsed() < POLL_TIMEOUT,
                "timed out waiting for the shutdown notice"
            );
            for message in self.client.poll() {
                let _ = self.mirror.apply(&message);
            }
            let shutting_down = self
                .mirror
                .notices()
                .iter()
                .any(|(kind, _)| *kind == NoticeKind::ShuttingDown);
            if shutting_down {
                return;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Send Goodbye and close the connection.
    pub fn disconnect(&mut self) {
        self.client.disconnect();
    }
}
