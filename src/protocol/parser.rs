//! RESP protocol decoder.
//!
//! Decoding walks a borrowed buffer with a cursor and only reports how many
//! bytes it consumed once a whole node is available. A truncated buffer
//! yields `Ok(None)` and leaves the caller's bytes untouched, so the reactor
//! can append more data and retry.

use super::frame::Frame;
use super::markers;
use crate::error::ProtocolError;
use crate::{MAX_ARGUMENTS, MAX_BULK_SIZE, MAX_NESTING_DEPTH};
use bytes::{Buf, Bytes, BytesMut};
use memchr::memchr;

/// Outcome of a single decoding step below the top level.
type Step<T> = Result<Option<T>, ProtocolError>;

/// Decode one node from the front of `buf`.
///
/// Returns:
/// - `Ok(Some((frame, consumed)))` when a complete node was decoded
/// - `Ok(None)` when more data is needed (nothing is consumed)
/// - `Err(e)` when the data is malformed
pub fn decode(buf: &[u8]) -> Result<Option<(Frame, usize)>, ProtocolError> {
    let mut cursor = Cursor { buf, pos: 0 };
    Ok(cursor.node(0)?.map(|frame| (frame, cursor.pos)))
}

/// Decode a snapshot transfer: `$<len>\r\n` followed by exactly `len` bytes
/// with no trailing CRLF. Returns the payload and the bytes consumed.
pub fn decode_snapshot(buf: &[u8]) -> Result<Option<(Bytes, usize)>, ProtocolError> {
    let Some(&marker) = buf.first() else {
        return Ok(None);
    };
    if marker != markers::BULK_STRING {
        return Err(ProtocolError::InvalidTypeMarker(marker));
    }
    let mut cursor = Cursor { buf, pos: 1 };
    let Some(len) = cursor.length()? else {
        return Ok(None);
    };
    if len < 0 {
        return Err(ProtocolError::InvalidBulkLength(len));
    }
    let len = len as usize;
    if len > MAX_BULK_SIZE {
        return Err(ProtocolError::BulkTooLarge {
            len,
            max: MAX_BULK_SIZE,
        });
    }
    if buf.len() - cursor.pos < len {
        return Ok(None);
    }
    let payload = Bytes::copy_from_slice(&buf[cursor.pos..cursor.pos + len]);
    Ok(Some((payload, cursor.pos + len)))
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn node(&mut self, depth: usize) -> Step<Frame> {
        let Some(&marker) = self.buf.get(self.pos) else {
            return Ok(None);
        };
        self.pos += 1;

        match marker {
            markers::SIMPLE_STRING => Ok(self.text()?.map(Frame::Simple)),
            markers::ERROR => Ok(self.text()?.map(Frame::Error)),
            markers::INTEGER => Ok(self.length()?.map(Frame::Integer)),
            markers::BULK_STRING => self.bulk(),
            markers::ARRAY => self.array(depth),
            _ => Err(ProtocolError::InvalidTypeMarker(marker)),
        }
    }

    /// Read up to the next CRLF, returning the line without the terminator.
    fn line(&mut self) -> Step<&'a [u8]> {
        match find_crlf(&self.buf[self.pos..]) {
            Some(offset) => {
                let line = &self.buf[self.pos..self.pos + offset];
                self.pos += offset + 2;
                Ok(Some(line))
            }
            None => Ok(None),
        }
    }

    fn text(&mut self) -> Step<String> {
        let Some(line) = self.line()? else {
            return Ok(None);
        };
        let s = std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8)?;
        Ok(Some(s.to_string()))
    }

    /// A signed decimal line: integer payloads and declared lengths.
    fn length(&mut self) -> Step<i64> {
        let Some(line) = self.line()? else {
            return Ok(None);
        };
        let s = std::str::from_utf8(line)
            .map_err(|_| ProtocolError::InvalidInteger(String::from_utf8_lossy(line).into_owned()))?;
        Ok(Some(s.parse()?))
    }

    fn bulk(&mut self) -> Step<Frame> {
        let Some(len) = self.length()? else {
            return Ok(None);
        };
        if len == -1 {
            return Ok(Some(Frame::Null));
        }
        if len < 0 {
            return Err(ProtocolError::InvalidBulkLength(len));
        }
        let len = len as usize;
        if len > MAX_BULK_SIZE {
            return Err(ProtocolError::BulkTooLarge {
                len,
                max: MAX_BULK_SIZE,
            });
        }

        let remaining = self.buf.len() - self.pos;
        if remaining < len + 2 {
            // A payload that is already complete but followed by something
            // other than CR is malformed, not short.
            if remaining > len && self.buf[self.pos + len] != b'\r' {
                return Err(ProtocolError::MissingCrlf);
            }
            return Ok(None);
        }
        if &self.buf[self.pos + len..self.pos + len + 2] != b"\r\n" {
            return Err(ProtocolError::MissingCrlf);
        }

        let data = Bytes::copy_from_slice(&self.buf[self.pos..self.pos + len]);
        self.pos += len + 2;
        Ok(Some(Frame::Bulk(data)))
    }

    fn array(&mut self, depth: usize) -> Step<Frame> {
        let Some(len) = self.array_header(depth)? else {
            return Ok(None);
        };
        let mut frames = Vec::with_capacity(len.min(1024));
        Ok(self.elements(depth, len, &mut frames)?.map(|()| Frame::Array(frames)))
    }

    /// The `<len>\r\n` after an array marker, validated.
    fn array_header(&mut self, depth: usize) -> Step<usize> {
        if depth >= MAX_NESTING_DEPTH {
            return Err(ProtocolError::NestingTooDeep(MAX_NESTING_DEPTH));
        }
        let Some(len) = self.length()? else {
            return Ok(None);
        };
        if len < 0 {
            return Err(ProtocolError::InvalidArrayLength(len));
        }
        let len = len as usize;
        if len > MAX_ARGUMENTS {
            return Err(ProtocolError::TooManyElements {
                count: len,
                max: MAX_ARGUMENTS,
            });
        }
        Ok(Some(len))
    }

    /// Decode elements into `frames` until it holds `len`. When input runs
    /// out, the cursor is left just past the last complete element.
    fn elements(&mut self, depth: usize, len: usize, frames: &mut Vec<Frame>) -> Step<()> {
        while frames.len() < len {
            let start = self.pos;
            match self.node(depth + 1)? {
                Some(frame) => frames.push(frame),
                None => {
                    self.pos = start;
                    return Ok(None);
                }
            }
        }
        Ok(Some(()))
    }
}

/// A top-level array cut short by the end of the buffer: the elements
/// decoded so far and where the next one starts.
#[derive(Debug)]
struct PartialArray {
    len: usize,
    frames: Vec<Frame>,
    pos: usize,
}

/// Find CRLF in a byte slice.
///
/// memchr finds each `\r`, then the following byte is checked for `\n`.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    let mut offset = 0;
    while offset < buf.len().saturating_sub(1) {
        match memchr(b'\r', &buf[offset..]) {
            Some(pos) => {
                let abs_pos = offset + pos;
                if abs_pos + 1 < buf.len() && buf[abs_pos + 1] == b'\n' {
                    return Some(abs_pos);
                }
                offset = abs_pos + 1;
            }
            None => return None,
        }
    }
    None
}

/// Streaming parser: an input accumulator plus the decoder.
///
/// # Usage
///
/// ```
/// use rivulet::RespParser;
///
/// let mut parser = RespParser::new();
/// parser.extend(b"*1\r\n$4\r\nPI");
/// assert!(parser.parse().unwrap().is_none());
/// parser.extend(b"NG\r\n");
/// assert!(parser.parse().unwrap().is_some());
/// ```
#[derive(Debug, Default)]
pub struct RespParser {
    buffer: BytesMut,
    /// Progress through a pipelined array that has not fully arrived, so a
    /// retry resumes instead of decoding the array from the start again
    partial: Option<PartialArray>,
}

impl RespParser {
    /// Create a new parser.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            partial: None,
        }
    }

    /// Append raw bytes to the accumulator.
    #[inline]
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Returns true if no undecoded bytes are buffered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Number of undecoded bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop everything buffered.
    #[inline]
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.partial = None;
    }

    /// Try to decode a complete frame from the accumulator.
    pub fn parse(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Ok(self.parse_with_raw()?.map(|(frame, _)| frame))
    }

    /// Decode a frame and also hand back the exact bytes it was decoded from,
    /// which is what replication forwards.
    pub fn parse_with_raw(&mut self) -> Result<Option<(Frame, Bytes)>, ProtocolError> {
        let decoded = match self.partial.take() {
            Some(partial) => self.resume(partial)?,
            None if self.buffer.first() == Some(&markers::ARRAY) => {
                let mut cursor = Cursor {
                    buf: &self.buffer[..],
                    pos: 1,
                };
                let header = cursor.array_header(0)?.map(|len| (len, cursor.pos));
                match header {
                    Some((len, pos)) => self.resume(PartialArray {
                        len,
                        frames: Vec::with_capacity(len.min(1024)),
                        pos,
                    })?,
                    None => None,
                }
            }
            None => decode(&self.buffer)?,
        };

        Ok(decoded.map(|(frame, consumed)| {
            let raw = self.buffer.split_to(consumed).freeze();
            (frame, raw)
        }))
    }

    /// Continue decoding the elements of a top-level array. If it is still
    /// incomplete, the progress is kept for the next call.
    fn resume(&mut self, mut partial: PartialArray) -> Result<Option<(Frame, usize)>, ProtocolError> {
        let mut cursor = Cursor {
            buf: &self.buffer[..],
            pos: partial.pos,
        };
        match cursor.elements(0, partial.len, &mut partial.frames)? {
            Some(()) => Ok(Some((Frame::Array(partial.frames), cursor.pos))),
            None => {
                partial.pos = cursor.pos;
                self.partial = Some(partial);
                Ok(None)
            }
        }
    }

    /// Decode a snapshot transfer (`$<len>\r\n<payload>`, no trailing CRLF).
    pub fn parse_snapshot(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        match decode_snapshot(&self.buffer)? {
            Some((payload, consumed)) => {
                self.buffer.advance(consumed);
                self.partial = None;
                Ok(Some(payload))
            }
            None => Ok(None),
        }
    }

    /// Take whatever is left in the accumulator.
    pub fn take_remaining(&mut self) -> BytesMut {
        self.partial = None;
        self.buffer.split()
    }
}


/// Property-based tests using proptest.
#[cfg(test)]
mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_frame() -> impl Strategy<Value = Frame> {
        let leaf = prop_oneof![
            "[a-zA-Z0-9 ]{0,40}".prop_map(Frame::Simple),
            "[a-zA-Z0-9 ]{0,40}".prop_map(Frame::Error),
            any::<i64>().prop_map(Frame::Integer),
            prop::collection::vec(any::<u8>(), 0..200).prop_map(|v| Frame::Bulk(Bytes::from(v))),
            Just(Frame::Null),
        ];
        leaf.prop_recursive(4, 64, 8, |inner| {
            prop::collection::vec(inner, 0..8).prop_map(Frame::Array)
        })
    }

    proptest! {
        /// Decoder should never panic on arbitrary input.
        #[test]
        fn decoder_never_panics(data: Vec<u8>) {
            let _ = decode(&data);
        }

        /// Encoding a frame then decoding it reproduces the exact bytes.
        #[test]
        fn encode_decode_identity(frame in arb_frame()) {
            let bytes = frame.encode();
            let (decoded, consumed) = decode(&bytes).unwrap().unwrap();
            prop_assert_eq!(consumed, bytes.len());
            prop_assert_eq!(decoded.encode(), bytes);
        }

        /// Every strict prefix of a valid encoding is reported as incomplete.
        #[test]
        fn truncation_is_incomplete(frame in arb_frame(), cut in any::<prop::sample::Index>()) {
            let bytes = frame.encode();
            let split = cut.index(bytes.len());
            prop_assert_eq!(decode(&bytes[..split]).unwrap(), None);
        }
    }
}
