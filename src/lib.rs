//! # Rivulet
//!
//! A small in-memory key-value server that speaks RESP.
//!
//! Rivulet runs a single reactor that owns all state:
//! - Strings with millisecond expiry, lists and append-only streams
//! - Blocking reads (`BLPOP`, `XREAD BLOCK`) served in FIFO order
//! - `MULTI`/`EXEC` transactions
//! - Primary/replica replication with a full-resync handshake
//!
//! ## Example
//!
//! ```no_run
//! use rivulet::{Config, Result, Server};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<()> {
//!     let config = Config::new().port(6380);
//!     let server = Server::bind(config).await?;
//!     server.run().await
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unused_lifetimes,
    unused_qualifications
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::len_without_is_empty,
    missing_docs
)]

// ─────────────────────────────────────────────────────────────────────────────
// Modules
// ─────────────────────────────────────────────────────────────────────────────

/// Command parsing and execution layer.
pub mod commands;
/// Error types and result aliases.
pub mod error;
/// RESP codec.
pub mod protocol;
/// Reactor, client state, blocking, replication and configuration.
pub mod server;
/// Keyspace.
pub mod storage;
/// Value types stored in the keyspace.
pub mod types;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports
// ─────────────────────────────────────────────────────────────────────────────

pub use error::{CommandError, Error, ProtocolError, Result, StreamIdError};
pub use protocol::{Frame, RespParser};
pub use server::{Config, Server};
pub use storage::Database;
pub use types::{StreamId, Value};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Server version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default listening port.
pub const DEFAULT_PORT: u16 = 6379;

/// Default bind address.
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Maximum bulk string payload accepted by the decoder (512 MiB).
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of elements in a single array.
pub const MAX_ARGUMENTS: usize = 1024 * 1024;

/// Maximum array nesting depth accepted by the decoder.
pub const MAX_NESTING_DEPTH: usize = 32;

/// Default maximum number of client connections.
pub const DEFAULT_MAX_CLIENTS: usize = 10_000;

/// Default frequency of the periodic timer (ticks per second).
pub const DEFAULT_HZ: u32 = 10;

/// Default cap on unprocessed input buffered for one client.
pub const DEFAULT_QUERY_BUFFER_LIMIT: usize = 1024 * 1024 * 1024;
