//! Stream implementation.
//!
//! Streams are append-only logs whose entries are keyed by a strictly
//! increasing `<ms>-<seq>` id.

use crate::error::StreamIdError;
use crate::protocol::Frame;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;

/// Stream entry ID in format `<milliseconds>-<sequence>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct StreamId {
    /// Milliseconds timestamp
    pub ms: u64,
    /// Sequence number
    pub seq: u64,
}

impl StreamId {
    /// Smallest id, `0-0`.
    pub const MIN: Self = Self { ms: 0, seq: 0 };

    /// Largest representable id.
    pub const MAX: Self = Self {
        ms: u64::MAX,
        seq: u64::MAX,
    };

    /// Create a new stream ID
    pub const fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// Parse `ms-seq`, or a bare `ms` with the sequence set to `default_seq`.
    pub fn parse_with_default(s: &str, default_seq: u64) -> Result<Self, StreamIdError> {
        match s.split_once('-') {
            Some((ms, seq)) => Ok(Self::new(parse_part(ms)?, parse_part(seq)?)),
            None => Ok(Self::new(parse_part(s)?, default_seq)),
        }
    }

    /// Parse an id used as a read cursor (`ms-seq` or `ms`, meaning `ms-0`).
    pub fn parse(s: &str) -> Result<Self, StreamIdError> {
        Self::parse_with_default(s, 0)
    }

    /// The id as a bulk frame.
    pub fn to_frame(self) -> Frame {
        Frame::bulk(self.to_string())
    }
}

fn parse_part(s: &str) -> Result<u64, StreamIdError> {
    s.parse().map_err(|_| StreamIdError::Invalid)
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

/// How XADD chooses the id of a new entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamIdSpec {
    /// `ms-seq`
    Explicit(StreamId),
    /// `ms-*`: fixed milliseconds, next free sequence
    AutoSeq(u64),
    /// `*`: wall clock milliseconds
    Auto,
}

impl StreamIdSpec {
    /// Parse an XADD id argument.
    pub fn parse(s: &str) -> Result<Self, StreamIdError> {
        if s == "*" {
            return Ok(Self::Auto);
        }
        match s.split_once('-') {
            Some((ms, "*")) => Ok(Self::AutoSeq(parse_part(ms)?)),
            _ => StreamId::parse(s).map(Self::Explicit),
        }
    }
}

/// One end of an XRANGE interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeBound {
    Start,
    End,
}

impl RangeBound {
    /// Resolve `-`, `+`, `ms` or `ms-seq` into a concrete id for this end.
    ///
    /// A bare `ms` covers the whole millisecond: sequence 0 at the start and
    /// the maximum sequence at the end.
    pub fn parse(self, s: &str) -> Result<StreamId, StreamIdError> {
        match (s, self) {
            ("-", _) => Ok(StreamId::MIN),
            ("+", _) => Ok(StreamId::MAX),
            (_, Self::Start) => StreamId::parse_with_default(s, 0),
            (_, Self::End) => StreamId::parse_with_default(s, u64::MAX),
        }
    }
}

/// A single stream entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Entry ID
    pub id: StreamId,
    /// Field-value pairs in insertion order
    pub fields: Vec<(Bytes, Bytes)>,
}

impl StreamEntry {
    /// `[id, [field, value, ...]]`, the shape XRANGE and XREAD reply with.
    pub fn to_frame(&self) -> Frame {
        let fields = self
            .fields
            .iter()
            .flat_map(|(f, v)| [Frame::Bulk(f.clone()), Frame::Bulk(v.clone())])
            .collect();
        Frame::Array(vec![self.id.to_frame(), Frame::Array(fields)])
    }
}

/// Stream data structure.
#[derive(Debug, Clone, Default)]
pub struct Stream {
    entries: BTreeMap<StreamId, Vec<(Bytes, Bytes)>>,
    /// Highest id ever assigned
    last_id: StreamId,
}

impl Stream {
    /// Create a new empty stream
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get the last entry ID
    pub fn last_id(&self) -> StreamId {
        self.last_id
    }

    /// Resolve the id a new entry would receive, without inserting.
    pub fn next_id(&self, spec: StreamIdSpec, now_ms: u64) -> Result<StreamId, StreamIdError> {
        let last = self.last_id;
        let id = match spec {
            StreamIdSpec::Auto => {
                if now_ms > last.ms {
                    StreamId::new(now_ms, 0)
                } else {
                    let seq = last
                        .seq
                        .checked_add(1)
                        .ok_or(StreamIdError::NotGreaterThanTop)?;
                    StreamId::new(last.ms, seq)
                }
            }
            StreamIdSpec::AutoSeq(ms) => {
                if ms < last.ms {
                    return Err(StreamIdError::NotGreaterThanTop);
                }
                if ms == last.ms {
                    let seq = last
                        .seq
                        .checked_add(1)
                        .ok_or(StreamIdError::NotGreaterThanTop)?;
                    StreamId::new(ms, seq)
                } else {
                    StreamId::new(ms, 0)
                }
            }
            StreamIdSpec::Explicit(id) => {
                if id == StreamId::MIN {
                    return Err(StreamIdError::Zero);
                }
                id
            }
        };

        if id <= last {
            return Err(StreamIdError::NotGreaterThanTop);
        }
        Ok(id)
    }

    /// Append an entry and return its id.
    pub fn add(
        &mut self,
        spec: StreamIdSpec,
        fields: Vec<(Bytes, Bytes)>,
        now_ms: u64,
    ) -> Result<StreamId, StreamIdError> {
        let id = self.next_id(spec, now_ms)?;
        self.entries.insert(id, fields);
        self.last_id = id;
        Ok(id)
    }

    /// Entries with `start <= id <= end`, oldest first.
    pub fn range(&self, start: StreamId, end: StreamId, count: Option<usize>) -> Vec<StreamEntry> {
        if start > end {
            return Vec::new();
        }
        self.collect((Bound::Included(start), Bound::Included(end)), count)
    }

    /// Entries with an id strictly greater than `after`, oldest first.
    pub fn read_after(&self, after: StreamId, count: Option<usize>) -> Vec<StreamEntry> {
        self.collect((Bound::Excluded(after), Bound::Unbounded), count)
    }

    fn collect(&self, bounds: (Bound<StreamId>, Bound<StreamId>), count: Option<usize>) -> Vec<StreamEntry> {
        self.entries
            .range(bounds)
            .take(count.unwrap_or(usize::MAX))
            .map(|(id, fields)| StreamEntry {
                id: *id,
                fields: fields.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Vec<(Bytes, Bytes)> {
        vec![(Bytes::from("f"), Bytes::from("v"))]
    }

    #[test]
    fn test_stream_id_parse() {
        assert_eq!(StreamId::parse("1000-5"), Ok(StreamId::new(1000, 5)));
        assert_eq!(StreamId::parse("1000"), Ok(StreamId::new(1000, 0)));
        assert_eq!(StreamId::parse("abc"), Err(StreamIdError::Invalid));
        assert_eq!(StreamId::parse("1-2-3"), Err(StreamIdError::Invalid));
        assert_eq!(StreamId::parse("-1"), Err(StreamIdError::Invalid));
    }

    #[test]
    fn test_id_spec_parse() {
        assert_eq!(StreamIdSpec::parse("*"), Ok(StreamIdSpec::Auto));
        assert_eq!(StreamIdSpec::parse("5-*"), Ok(StreamIdSpec::AutoSeq(5)));
        assert_eq!(
            StreamIdSpec::parse("5-3"),
            Ok(StreamIdSpec::Explicit(StreamId::new(5, 3)))
        );
        assert!(StreamIdSpec::parse("x-*").is_err());
    }

    #[test]
    fn test_range_bounds() {
        assert_eq!(RangeBound::Start.parse("-"), Ok(StreamId::MIN));
        assert_eq!(RangeBound::End.parse("+"), Ok(StreamId::MAX));
        assert_eq!(RangeBound::Start.parse("7"), Ok(StreamId::new(7, 0)));
        assert_eq!(RangeBound::End.parse("7"), Ok(StreamId::new(7, u64::MAX)));
    }

    #[test]
    fn test_zero_id_rejected() {
        let mut stream = Stream::new();
        assert_eq!(
            stream.add(StreamIdSpec::Explicit(StreamId::MIN), fields(), 0),
            Err(StreamIdError::Zero)
        );
    }

    #[test]
    fn test_explicit_must_increase() {
        let mut stream = Stream::new();
        stream
            .add(StreamIdSpec::Explicit(StreamId::new(5, 5)), fields(), 0)
            .unwrap();
        assert_eq!(
            stream.add(StreamIdSpec::Explicit(StreamId::new(5, 3)), fields(), 0),
            Err(StreamIdError::NotGreaterThanTop)
        );
        assert_eq!(
            stream.add(StreamIdSpec::Explicit(StreamId::new(5, 5)), fields(), 0),
            Err(StreamIdError::NotGreaterThanTop)
        );
        assert_eq!(stream.len(), 1);
    }

    #[test]
    fn test_auto_sequence() {
        let mut stream = Stream::new();
        assert_eq!(
            stream.add(StreamIdSpec::AutoSeq(5), fields(), 0),
            Ok(StreamId::new(5, 0))
        );
        assert_eq!(
            stream.add(StreamIdSpec::AutoSeq(5), fields(), 0),
            Ok(StreamId::new(5, 1))
        );
        assert_eq!(
            stream.add(StreamIdSpec::AutoSeq(4), fields(), 0),
            Err(StreamIdError::NotGreaterThanTop)
        );
    }

    #[test]
    fn test_auto_sequence_at_zero_ms() {
        let mut stream = Stream::new();
        assert_eq!(
            stream.add(StreamIdSpec::AutoSeq(0), fields(), 0),
            Ok(StreamId::new(0, 1))
        );
    }

    #[test]
    fn test_auto_uses_clock_then_sequence() {
        let mut stream = Stream::new();
        assert_eq!(
            stream.add(StreamIdSpec::Auto, fields(), 100),
            Ok(StreamId::new(100, 0))
        );
        // Clock did not move forward.
        assert_eq!(
            stream.add(StreamIdSpec::Auto, fields(), 100),
            Ok(StreamId::new(100, 1))
        );
        stream
            .add(StreamIdSpec::Explicit(StreamId::new(500, 0)), fields(), 100)
            .unwrap();
        assert_eq!(
            stream.add(StreamIdSpec::Auto, fields(), 200),
            Ok(StreamId::new(500, 1))
        );
    }

    #[test]
    fn test_range_and_read_after() {
        let mut stream = Stream::new();
        for i in 1..=5 {
            stream
                .add(StreamIdSpec::Explicit(StreamId::new(i * 1000, 0)), fields(), 0)
                .unwrap();
        }

        let entries = stream.range(StreamId::new(2000, 0), StreamId::new(4000, 0), None);
        assert_eq!(entries.len(), 3);
        assert_eq!(stream.range(StreamId::MIN, StreamId::MAX, Some(2)).len(), 2);
        assert!(stream.range(StreamId::MAX, StreamId::MIN, None).is_empty());

        let after = stream.read_after(StreamId::new(3000, 0), None);
        assert_eq!(after.len(), 2);
        assert_eq!(after[0].id, StreamId::new(4000, 0));
        assert!(stream.read_after(StreamId::new(5000, 0), None).is_empty());
    }

    #[test]
    fn test_entry_frame_shape() {
        let entry = StreamEntry {
            id: StreamId::new(1, 2),
            fields: fields(),
        };
        assert_eq!(
            entry.to_frame(),
            Frame::Array(vec![Frame::bulk("1-2"), Frame::command(["f", "v"])])
        );
    }
}
