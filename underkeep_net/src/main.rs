// CLI entry point for the authoritative Underkeep server.
//
// Loads a JSON map descriptor, builds the game map, and serves it to
// clients over TCP. See `server.rs` for the networking architecture and
// `session.rs` for the per-client replication state.
//
// Usage:
//   underkeep-server --map <PATH> [OPTIONS]
//     --map <PATH>            Map descriptor JSON (required)
//     --port <PORT>           Listen port (default: 32222)
//     --turn-ms <N>           Turn flush cadence in ms (default: 250)
//     --max-turn-lag <N>      Ack lag bound in turns (default: 4)
//     --max-clients <N>       Max connected clients (default: 8)
//     --replay-log <PATH>     Record the first seated client's stream

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use underkeep_net::server::{ServerConfig, start_server};
use underkeep_sim::config::GameConfig;
use underkeep_sim::gamemap::{GameMap, MapDescriptor};

fn main() {
    let (config, map_path) = parse_args();
    let map = load_map(&map_path);

    let (handle, addr) = match start_server(config, map) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Failed to start server: {e}");
            std::process::exit(1);
        }
    };

    println!("Server listening on {addr}");
    println!("Press Ctrl+C to stop.");

    // Park the main thread. The process exits on SIGINT/SIGTERM by
    // default, tearing the server threads down with it; a graceful
    // in-process shutdown would need the `ctrlc` crate.
    let running = Arc::new(AtomicBool::new(true));
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    println!("\nShutting down...");
    handle.stop();
}

/// Parse command-line arguments. Uses simple `std::env::args()` matching,
/// no clap dependency.
fn parse_args() -> (ServerConfig, PathBuf) {
    let mut config = ServerConfig::default();
    let mut map_path: Option<PathBuf> = None;
    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--map" => {
                i += 1;
                map_path = Some(args.get(i).map(PathBuf::from).unwrap_or_else(|| {
                    eprintln!("--map requires a path");
                    std::process::exit(1);
                }));
            }
            "--port" => {
                i += 1;
                config.port = args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                    eprintln!("--port requires a valid port number");
                    std::process::exit(1);
                });
            }
            "--turn-ms" => {
                i += 1;
                config.turn_ms = args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                    eprintln!("--turn-ms requires a valid number");
                    std::process::exit(1);
                });
            }
            "--max-turn-lag" => {
                i += 1;
                config.max_turn_lag =
                    args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                        eprintln!("--max-turn-lag requires a valid number");
                        std::process::exit(1);
                    });
            }
            "--max-clients" => {
                i += 1;
                config.max_clients =
                    args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                        eprintln!("--max-clients requires a valid number");
                        std::process::exit(1);
                    });
            }
            "--replay-log" => {
                i += 1;
                config.replay_log = Some(args.get(i).map(PathBuf::from).unwrap_or_else(|| {
                    eprintln!("--replay-log requires a path");
                    std::process::exit(1);
                }));
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let Some(map_path) = map_path else {
        eprintln!("--map <PATH> is required");
        print_usage();
        std::process::exit(1);
    };
    (config, map_path)
}

/// Read and validate the map descriptor, exiting with a diagnostic on any
/// failure.
fn load_map(path: &Path) -> GameMap {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Failed to read map {}: {e}", path.display());
            std::process::exit(1);
        }
    };
    let descriptor: MapDescriptor = match serde_json::from_str(&text) {
        Ok(descriptor) => descriptor,
        Err(e) => {
            eprintln!("Failed to parse map {}: {e}", path.display());
            std::process::exit(1);
        }
    };
    match GameMap::from_descriptor(&descriptor, GameConfig::default()) {
        Ok(map) => map,
        Err(e) => {
            eprintln!("Invalid map {}: {e}", path.display());
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    println!("Usage: underkeep-server --map <PATH> [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --map <PATH>            Map descriptor JSON (required)");
    println!("  --port <PORT>           Listen port (default: 32222)");
    println!("  --turn-ms <N>           Turn flush cadence in ms (default: 250)");
    println!("  --max-turn-lag <N>      Ack lag bound in turns (default: 4)");
    println!("  --max-clients <N>       Max connected clients (default: 8)");
    println!("  --replay-log <PATH>     Record the first seated client's stream");
    println!("  --help, -h              Show this help");
}
