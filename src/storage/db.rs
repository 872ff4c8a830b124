//! Keyspace implementation.
//!
//! The database maps keys to tagged values. Every accessor takes the current
//! time so that an expired string is evicted the moment it is touched.

use crate::error::CommandError;
use crate::types::{List, Stream, StreamEntry, StreamId, StreamIdSpec, Timestamp, Value, ValueType};
use bytes::Bytes;
use std::collections::HashMap;
use tracing::trace;

type CommandResult<T> = std::result::Result<T, CommandError>;

/// The keyspace.
#[derive(Debug, Default)]
pub struct Database {
    data: HashMap<Bytes, Value>,
}

impl Database {
    /// Create a new empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys, counting ones that have expired but not been touched.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Look up a live value, evicting it first if it has expired.
    fn entry(&mut self, key: &[u8], now: Timestamp) -> Option<&mut Value> {
        if self.data.get(key).is_some_and(|v| v.is_expired(now)) {
            self.data.remove(key);
            trace!(key = ?String::from_utf8_lossy(key), "evicted expired key");
            return None;
        }
        self.data.get_mut(key)
    }

    /// Type of the value under `key`, if any.
    pub fn key_type(&mut self, key: &[u8], now: Timestamp) -> Option<ValueType> {
        self.entry(key, now).map(|v| v.value_type())
    }

    pub fn exists(&mut self, key: &[u8], now: Timestamp) -> bool {
        self.entry(key, now).is_some()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Strings
    // ─────────────────────────────────────────────────────────────────────

    /// Unconditionally overwrite `key` with a string. With a TTL the value
    /// expires at `now + ttl_ms`.
    pub fn set(&mut self, key: Bytes, value: Bytes, ttl_ms: Option<i64>, now: Timestamp) {
        let expires_at = ttl_ms.map(|ttl| now.saturating_add(ttl));
        self.data.insert(
            key,
            Value::String {
                data: value,
                expires_at,
            },
        );
    }

    /// The string under `key`, or `None` if absent or expired.
    pub fn get(&mut self, key: &[u8], now: Timestamp) -> CommandResult<Option<Bytes>> {
        match self.entry(key, now) {
            None => Ok(None),
            Some(Value::String { data, .. }) => Ok(Some(data.clone())),
            Some(_) => Err(CommandError::WrongType),
        }
    }

    /// Increment an integer string in place, keeping its expiry.
    ///
    /// Returns `Ok(None)` when the key is absent; the caller decides what an
    /// absent counter means.
    pub fn increment_if_numeric(&mut self, key: &[u8], now: Timestamp) -> CommandResult<Option<i64>> {
        let Some(value) = self.entry(key, now) else {
            return Ok(None);
        };
        let Value::String { data, .. } = value else {
            return Err(CommandError::WrongType);
        };

        let current: i64 = std::str::from_utf8(data)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(CommandError::NotInteger)?;
        let next = current.checked_add(1).ok_or(CommandError::NotInteger)?;
        *data = Bytes::from(next.to_string());
        Ok(Some(next))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lists
    // ─────────────────────────────────────────────────────────────────────

    fn list_mut(&mut self, key: &[u8], now: Timestamp) -> CommandResult<Option<&mut List>> {
        match self.entry(key, now) {
            None => Ok(None),
            Some(Value::List(list)) => Ok(Some(list)),
            Some(_) => Err(CommandError::WrongType),
        }
    }

    fn push(
        &mut self,
        key: Bytes,
        values: Vec<Bytes>,
        front: bool,
        now: Timestamp,
    ) -> CommandResult<usize> {
        if self.list_mut(&key, now)?.is_none() {
            self.data.insert(key.clone(), Value::List(List::new()));
        }
        let Some(Value::List(list)) = self.data.get_mut(&key) else {
            return Err(CommandError::WrongType);
        };
        if front {
            list.push_front_multi(values);
        } else {
            list.push_back_multi(values);
        }
        Ok(list.len())
    }

    /// LPUSH: returns the new length.
    pub fn list_push_left(&mut self, key: Bytes, values: Vec<Bytes>, now: Timestamp) -> CommandResult<usize> {
        self.push(key, values, true, now)
    }

    /// RPUSH: returns the new length.
    pub fn list_push_right(&mut self, key: Bytes, values: Vec<Bytes>, now: Timestamp) -> CommandResult<usize> {
        self.push(key, values, false, now)
    }

    /// Remove up to `n` items from the head.
    ///
    /// `None` when the key is missing or does not hold a list. A list that
    /// becomes empty is deleted.
    pub fn list_pop(&mut self, key: &[u8], n: usize, now: Timestamp) -> Option<Vec<Bytes>> {
        let list = self.list_mut(key, now).ok()??;
        let popped = list.pop_front_multi(n);
        if list.is_empty() {
            self.data.remove(key);
        }
        Some(popped)
    }

    /// LRANGE over the list under `key`; empty when absent.
    pub fn list_range(&mut self, key: &[u8], start: i64, end: i64, now: Timestamp) -> CommandResult<Vec<Bytes>> {
        Ok(self
            .list_mut(key, now)?
            .map(|list| list.range(start, end))
            .unwrap_or_default())
    }

    pub fn list_len(&mut self, key: &[u8], now: Timestamp) -> CommandResult<usize> {
        Ok(self.list_mut(key, now)?.map_or(0, |list| list.len()))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Streams
    // ─────────────────────────────────────────────────────────────────────

    fn stream(&mut self, key: &[u8], now: Timestamp) -> CommandResult<Option<&mut Stream>> {
        match self.entry(key, now) {
            None => Ok(None),
            Some(Value::Stream(stream)) => Ok(Some(stream)),
            Some(_) => Err(CommandError::WrongType),
        }
    }

    /// XADD. The stream is created on first append; a rejected id leaves the
    /// keyspace untouched.
    pub fn stream_append(
        &mut self,
        key: Bytes,
        spec: StreamIdSpec,
        fields: Vec<(Bytes, Bytes)>,
        now: Timestamp,
    ) -> CommandResult<StreamId> {
        let clock = u64::try_from(now).unwrap_or_default();
        if let Some(stream) = self.stream(&key, now)? {
            return Ok(stream.add(spec, fields, clock)?);
        }

        let mut stream = Stream::new();
        let id = stream.add(spec, fields, clock)?;
        self.data.insert(key, Value::Stream(stream));
        Ok(id)
    }

    /// XRANGE between two inclusive ids.
    pub fn stream_range(
        &mut self,
        key: &[u8],
        start: StreamId,
        end: StreamId,
        count: Option<usize>,
        now: Timestamp,
    ) -> CommandResult<Vec<StreamEntry>> {
        Ok(self
            .stream(key, now)?
            .map(|s| s.range(start, end, count))
            .unwrap_or_default())
    }

    /// Entries strictly after `after`, oldest first.
    pub fn stream_read_from(
        &mut self,
        key: &[u8],
        after: StreamId,
        count: Option<usize>,
        now: Timestamp,
    ) -> CommandResult<Vec<StreamEntry>> {
        Ok(self
            .stream(key, now)?
            .map(|s| s.read_after(after, count))
            .unwrap_or_default())
    }

    /// The last id assigned in the stream, `0-0` when absent.
    pub fn stream_last_id(&mut self, key: &[u8], now: Timestamp) -> CommandResult<StreamId> {
        Ok(self.stream(key, now)?.map_or(StreamId::MIN, |s| s.last_id()))
    }
}
