//! List value.
//!
//! A `VecDeque` gives O(1) pushes and pops at both ends.

use bytes::Bytes;
use std::collections::VecDeque;

/// A list of binary-safe strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct List {
    inner: VecDeque<Bytes>,
}

impl List {
    /// Create a new empty list.
    #[inline]
    pub fn new() -> Self {
        Self {
            inner: VecDeque::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Push each value onto the head in argument order, so the last argument
    /// ends up first (LPUSH).
    pub fn push_front_multi(&mut self, values: impl IntoIterator<Item = Bytes>) {
        for value in values {
            self.inner.push_front(value);
        }
    }

    /// Append values at the tail (RPUSH).
    pub fn push_back_multi(&mut self, values: impl IntoIterator<Item = Bytes>) {
        self.inner.extend(values);
    }

    /// Pop up to `count` elements from the head. Never pads.
    pub fn pop_front_multi(&mut self, count: usize) -> Vec<Bytes> {
        let count = count.min(self.inner.len());
        self.inner.drain(..count).collect()
    }

    /// Elements between `start` and `stop` inclusive (LRANGE).
    ///
    /// Negative indices count from the tail. Both ends are clamped into the
    /// list; an inverted range is empty.
    pub fn range(&self, start: i64, stop: i64) -> Vec<Bytes> {
        let len = self.inner.len() as i64;
        if len == 0 {
            return Vec::new();
        }

        let start = if start < 0 { (len + start).max(0) } else { start };
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };

        if start > stop || start >= len || stop < 0 {
            return Vec::new();
        }

        self.inner
            .range(start as usize..=stop as usize)
            .cloned()
            .collect()
    }

    /// Iterate from head to tail.
    pub fn iter(&self) -> impl Iterator<Item = &Bytes> {
        self.inner.iter()
    }
}

impl FromIterator<Bytes> for List {
    fn from_iter<I: IntoIterator<Item = Bytes>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}
