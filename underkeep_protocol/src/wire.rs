// Byte-level codec for protocol messages.
//
// Every message field is written and read in a fixed order; variable-length
// values are preceded by an explicit count. A frame that fails to decode any
// declared field is malformed as a whole (nothing is partially applied),
// and decoding must consume the frame exactly, so trailing bytes are an
// error too. Integers are big-endian; floats travel as their IEEE-754 bit
// patterns; strings are a u32 byte count plus UTF-8.
//
// The `Wire` trait is the seam every message and snapshot type implements.
// `WireError` never crosses the transport boundary directly; `framing.rs`
// converts it into `std::io::Error` for the socket threads.

use std::fmt;
use std::io;

/// Decode failure. The offending frame is dropped as a whole.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WireError {
    /// The frame ended before a declared field was complete.
    UnexpectedEnd,
    /// The frame decoded fully but left unread bytes behind.
    TrailingBytes(usize),
    /// An enum tag or flag byte held an unknown value.
    BadTag { what: &'static str, tag: u8 },
    /// A string field was not valid UTF-8.
    BadString,
    /// A collection count larger than the remaining frame could carry.
    BadCount { what: &'static str, count: u32 },
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::UnexpectedEnd => write!(f, "frame ended mid-field"),
            WireError::TrailingBytes(n) => write!(f, "{n} trailing bytes after message"),
            WireError::BadTag { what, tag } => write!(f, "unknown {what} tag {tag}"),
            WireError::BadString => write!(f, "string field is not valid UTF-8"),
            WireError::BadCount { what, count } => {
                write!(f, "{what} count {count} exceeds remaining frame")
            }
        }
    }
}

impl std::error::Error for WireError {}

impl From<WireError> for io::Error {
    fn from(err: WireError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, err.to_string())
    }
}

/// Anything that can be written to and read back from a frame.
pub trait Wire: Sized {
    fn encode(&self, w: &mut WireWriter);
    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError>;

    /// Encode into a fresh frame payload.
    fn to_frame(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        self.encode(&mut w);
        w.into_bytes()
    }

    /// Decode one message from a complete frame, requiring exact consumption.
    fn from_frame(frame: &[u8]) -> Result<Self, WireError> {
        let mut r = WireReader::new(frame);
        let msg = Self::decode(&mut r)?;
        r.finish()?;
        Ok(msg)
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_bool(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_bits().to_be_bytes());
    }

    /// u32 byte count, then the UTF-8 bytes.
    pub fn put_str(&mut self, v: &str) {
        self.put_u32(v.len() as u32);
        self.buf.extend_from_slice(v.as_bytes());
    }

    /// u32 element count, then each element in order.
    pub fn put_list<T: Wire>(&mut self, items: &[T]) {
        self.put_u32(items.len() as u32);
        for item in items {
            item.encode(self);
        }
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Consume-exactly check; call once the full message is decoded.
    pub fn finish(self) -> Result<(), WireError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(WireError::TrailingBytes(n)),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::UnexpectedEnd);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn take_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub fn take_bool(&mut self) -> Result<bool, WireError> {
        match self.take_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            tag => Err(WireError::BadTag { what: "bool", tag }),
        }
    }

    pub fn take_u32(&mut self) -> Result<u32, WireError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn take_u64(&mut self) -> Result<u64, WireError> {
        let bytes = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(arr))
    }

    pub fn take_i32(&mut self) -> Result<i32, WireError> {
        let bytes = self.take(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn take_f32(&mut self) -> Result<f32, WireError> {
        Ok(f32::from_bits(self.take_u32()?))
    }

    pub fn take_str(&mut self) -> Result<String, WireError> {
        let len = self.take_u32()? as usize;
        if len > self.remaining() {
            return Err(WireError::UnexpectedEnd);
        }
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::BadString)
    }

    /// Read a collection count, rejecting counts the remaining frame cannot
    /// possibly hold (each element takes at least one byte). Keeps a lying
    /// count from reserving unbounded memory.
    pub fn take_count(&mut self, what: &'static str) -> Result<usize, WireError> {
        let count = self.take_u32()?;
        if count as usize > self.remaining() {
            return Err(WireError::BadCount { what, count });
        }
        Ok(count as usize)
    }

    pub fn take_list<T: Wire>(&mut self, what: &'static str) -> Result<Vec<T>, WireError> {
        let count = self.take_count(what)?;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(T::decode(self)?);
        }
        Ok(items)
    }
}

// Coordinate pairs appear in several messages; encode them inline.
impl Wire for (i32, i32) {
    fn encode(&self, w: &mut WireWriter) {
        w.put_i32(self.0);
        w.put_i32(self.1);
    }

    fn decode(r: &mut WireReader<'_>) -> Result<Self, WireError> {
        Ok((r.take_i32()?, r.take_i32()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_roundtrip_preserves_values() {
        let mut w = WireWriter::new();
        w.put_u8(0xAB);
        w.put_bool(true);
        w.put_u32(3_000_000_000);
        w.put_u64(u64::MAX);
        w.put_i32(-42);
        w.put_f32(1.5);
        w.put_str("déjà vu");
        let bytes = w.into_bytes();

        let mut r = WireReader::new(&bytes);
        assert_eq!(r.take_u8().unwrap(), 0xAB);
        assert!(r.take_bool().unwrap());
        assert_eq!(r.take_u32().unwrap(), 3_000_000_000);
        assert_eq!(r.take_u64().unwrap(), u64::MAX);
        assert_eq!(r.take_i32().unwrap(), -42);
        assert_eq!(r.take_f32().unwrap(), 1.5);
        assert_eq!(r.take_str().unwrap(), "déjà vu");
        r.finish().unwrap();
    }

    #[test]
    fn nan_bit_pattern_survives() {
        let mut w = WireWriter::new();
        w.put_f32(f32::NAN);
        let bytes = w.into_bytes();
        let mut r = WireReader::new(&bytes);
        assert!(r.take_f32().unwrap().is_nan());
    }

    #[test]
    fn truncated_field_is_unexpected_end() {
        let mut w = WireWriter::new();
        w.put_u32(7);
        let mut bytes = w.into_bytes();
        bytes.pop();
        let mut r = WireReader::new(&bytes);
        assert_eq!(r.take_u32(), Err(WireError::UnexpectedEnd));
    }

    #[test]
    fn trailing_bytes_fail_finish() {
        let mut w = WireWriter::new();
        w.put_u8(1);
        w.put_u8(2);
        let bytes = w.into_bytes();
        let mut r = WireReader::new(&bytes);
        r.take_u8().unwrap();
        assert_eq!(r.finish(), Err(WireError::TrailingBytes(1)));
    }

    #[test]
    fn bad_bool_tag_is_rejected() {
        let mut r = WireReader::new(&[7]);
        assert_eq!(
            r.take_bool(),
            Err(WireError::BadTag {
                what: "bool",
                tag: 7
            })
        );
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut w = WireWriter::new();
        w.put_u32(2);
        let mut bytes = w.into_bytes();
        bytes.extend_from_slice(&[0xFF, 0xFE]);
        let mut r = WireReader::new(&bytes);
        assert_eq!(r.take_str(), Err(WireError::BadString));
    }

    #[test]
    fn lying_count_is_rejected_before_allocation() {
        // Claims one million pairs but carries no bytes for them.
        let mut w = WireWriter::new();
        w.put_u32(1_000_000);
        let bytes = w.into_bytes();
        let mut r = WireReader::new(&bytes);
        let got: Result<Vec<(i32, i32)>, WireError> = r.take_list("pairs");
        assert_eq!(
            got,
            Err(WireError::BadCount {
                what: "pairs",
                count: 1_000_000
            })
        );
    }

    #[test]
    fn string_length_beyond_frame_is_rejected() {
        let mut w = WireWriter::new();
        w.put_u32(100);
        let mut bytes = w.into_bytes();
        bytes.extend_from_slice(b"short");
        let mut r = WireReader::new(&bytes);
        assert_eq!(r.take_str(), Err(WireError::UnexpectedEnd));
    }

    #[test]
    fn pair_list_roundtrip() {
        let pairs = vec![(0, 0), (-5, 12), (i32::MAX, i32::MIN)];
        let mut w = WireWriter::new();
        w.put_list(&pairs);
        let bytes = w.into_bytes();
        let mut r = WireReader::new(&bytes);
        let got: Vec<(i32, i32)> = r.take_list("pairs").unwrap();
        assert_eq!(got, pairs);
        r.finish().unwrap();
    }

    #[test]
    fn wire_error_converts_to_io_invalid_data() {
        let err: io::Error = WireError::UnexpectedEnd.into();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
