// Timestamped server-message logs.
//
// A replay log captures every frame the server sent to one client, in send
// order, so the session can be reconstructed offline through the exact
// apply path a live client uses. The format is a headerless sequence of
// records:
//
//   [u64 BE: milliseconds since recording started]
//   [u32 BE: frame length] [frame bytes]
//
// The length-prefixed part reuses the protocol's stream framing, so a log
// is literally the client's inbound byte stream with timestamps spliced in.
// Clean EOF between records ends the log; EOF inside a record is an error.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::Instant;

use underkeep_protocol::framing::{read_message, write_message};
use underkeep_protocol::message::ServerMessage;
use underkeep_protocol::wire::Wire;

use crate::client::ClientMirror;

/// Appends timestamped frames to a log file.
pub struct ReplayWriter {
    out: BufWriter<File>,
    started: Instant,
}

impl ReplayWriter {
    pub fn create(path: &Path) -> io::Result<Self> {
        Ok(Self {
            out: BufWriter::new(File::create(path)?),
            started: Instant::now(),
        })
    }

    /// Append one already-encoded server message.
    pub fn record(&mut self, frame: &[u8]) -> io::Result<()> {
        #[expect(clippy::cast_possible_truncation)]
        let ms = self.started.elapsed().as_millis() as u64;
        self.out.write_all(&ms.to_be_bytes())?;
        write_message(&mut self.out, frame)
    }

    /// Flush and close the log.
    pub fn finish(mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Reads records back in order.
pub struct ReplayReader {
    input: BufReader<File>,
}

impl ReplayReader {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            input: BufReader::new(File::open(path)?),
        })
    }

    /// The next `(timestamp_ms, frame)` record, or `None` at a clean end.
    pub fn next_record(&mut self) -> io::Result<Option<(u64, Vec<u8>)>> {
        let mut stamp = [0u8; 8];
        match self.input.read_exact(&mut stamp) {
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            other => other?,
        }
        let frame = read_message(&mut self.input)?;
        Ok(Some((u64::from_be_bytes(stamp), frame)))
    }
}

/// Rebuild a client mirror by running a recorded log through the same
/// apply path a live connection uses. Timestamps are ignored; replies the
/// mirror would send (acks, bootstrap-done) are discarded.
pub fn replay_mirror(path: &Path) -> io::Result<ClientMirror> {
    let mut reader = ReplayReader::open(path)?;
    let mut mirror = ClientMirror::new();
    while let Some((_ms, frame)) = reader.next_record()? {
        let message = ServerMessage::from_frame(&frame).map_err(io::Error::from)?;
        let _replies = mirror.apply(&message);
    }
    Ok(mirror)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use underkeep_protocol::message::NoticeKind;
    use underkeep_protocol::types::TurnNumber;

    fn temp_log(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("underkeep_{}_{}.log", name, std::process::id()))
    }

    #[test]
    fn records_roundtrip_in_order() {
        let path = temp_log("roundtrip");
        let frames = [
            ServerMessage::TurnStarted {
                turn: TurnNumber(1),
            }
            .to_frame(),
            ServerMessage::Notice {
                kind: NoticeKind::Info,
                text: "hello".into(),
            }
            .to_frame(),
        ];

        let mut writer = ReplayWriter::create(&path).unwrap();
        for frame in &frames {
            writer.record(frame).unwrap();
        }
        writer.finish().unwrap();

        let mut reader = ReplayReader::open(&path).unwrap();
        let mut seen = Vec::new();
        while let Some((ms, frame)) = reader.next_record().unwrap() {
            assert!(ms < 10_000, "timestamps are relative to recording start");
            seen.push(frame);
        }
        assert_eq!(seen, frames);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn truncated_record_is_an_error() {
        let path = temp_log("truncated");
        let mut writer = ReplayWriter::create(&path).unwrap();
        writer
            .record(
                &ServerMessage::TurnStarted {
                    turn: TurnNumber(9),
                }
                .to_frame(),
            )
            .unwrap();
        writer.finish().unwrap();

        // Chop the last byte off the record.
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 1]).unwrap();

        let mut reader = ReplayReader::open(&path).unwrap();
        assert!(reader.next_record().is_err());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn empty_log_yields_no_records() {
        let path = temp_log("empty");
        ReplayWriter::create(&path).unwrap().finish().unwrap();
        let mut reader = ReplayReader::open(&path).unwrap();
        assert!(reader.next_record().unwrap().is_none());
        std::fs::remove_file(&path).ok();
    }
}
