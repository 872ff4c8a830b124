//! Core value types.
//!
//! Everything stored in the keyspace is one of these: a string with an
//! optional expiry, a list, or an append-only stream.

mod list;
mod stream;
mod value;

pub use list::List;
pub use stream::{RangeBound, Stream, StreamEntry, StreamId, StreamIdSpec};
pub use value::{Value, ValueType};

/// Timestamp in milliseconds since Unix epoch.
pub type Timestamp = i64;
