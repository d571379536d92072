// Length-delimited message framing over TCP.
//
// A frame is a 4-byte big-endian length prefix followed by one encoded
// message payload. Both `write_message` and `read_message` operate on raw
// `&[u8]` / `Vec<u8>`; callers run the `wire.rs` codec separately, keeping
// this module payload-agnostic.
//
// `MAX_MESSAGE_SIZE` protects against unbounded allocation from malformed
// or malicious length prefixes. The bootstrap is the largest expected
// message (tens of bytes per visible tile); 4 MB covers maps far past the
// sizes the sim targets.

use std::io::{self, Read, Write};

/// Maximum allowed frame payload size (4 MB).
pub const MAX_MESSAGE_SIZE: u32 = 4 * 1024 * 1024;

/// Write one frame: 4-byte big-endian length, then the payload.
pub fn write_message<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let len = payload.len();
    if len > MAX_MESSAGE_SIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("message too large: {len} bytes (max {MAX_MESSAGE_SIZE})"),
        ));
    }
    #[expect(clippy::cast_possible_truncation)]
    let len_bytes = (len as u32).to_be_bytes();
    writer.write_all(&len_bytes)?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame: 4-byte big-endian length, then the payload.
///
/// Returns `UnexpectedEof` if the stream closes before or during a frame,
/// and `InvalidData` if the length exceeds `MAX_MESSAGE_SIZE`.
pub fn read_message<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_MESSAGE_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message too large: {len} bytes (max {MAX_MESSAGE_SIZE})"),
        ));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}
