//! Storage engine.
//!
//! This module provides the in-memory keyspace and the wall clock every
//! expiry and stream id is measured against.

mod db;

pub use db::Database;

use crate::types::Timestamp;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current time in milliseconds since Unix epoch.
#[inline]
#[must_use]
pub fn now_ms() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or_default()
}
