// underkeep_net: authoritative server and client mirror for Underkeep.
//
// This crate owns everything on either side of the socket. The server runs
// the real `GameMap` and replicates per-turn, vision-filtered deltas to
// each connected client; clients maintain a read-only mirror map they can
// run path queries against, and acknowledge every turn with a state
// checksum so divergence is caught instead of silently compounding.
//
// Module overview:
// - `session.rs`:  Per-client replication state on the server: seats,
//                  lifecycle phases, sent-tile caches, vision filtering,
//                  ack bookkeeping, backpressure. The core data structure
//                  that `server.rs` drives.
// - `server.rs`:   TCP listener, reader threads (one per client), and the
//                  main event loop. Uses `std::net` with a thread-per-
//                  connection architecture and an `mpsc` channel to funnel
//                  events into the single-threaded `Session`.
// - `client.rs`:   `ClientMirror` (applies server messages to a local
//                  `GameMap`) and `NetClient` (the live TCP connection).
// - `replay.rs`:   Timestamped frame log; a recorded stream feeds the same
//                  `ClientMirror::apply` path as a live socket.
//
// Dependencies: `underkeep_protocol` (message types and framing) and
// `underkeep_sim` (the map both sides run).
//
// The server can run as a standalone binary (`main.rs`) or be embedded in
// another process via the library API (`start_server`).

pub mod client;
pub mod replay;
pub mod server;
pub mod session;

pub use client::{ClientMirror, NetClient};
pub use server::{ServerConfig, ServerHandle, start_server};
pub use session::Session;
