//! Error types for rivulet.
//!
//! Errors are split by where they surface: protocol errors close the
//! connection, command errors become `-ERR ...` replies, and I/O errors tear
//! the connection down without a reply.

use std::io;
use std::net::AddrParseError;
use std::num::ParseIntError;
use thiserror::Error;

use crate::server::config::ConfigError;

/// Result type alias for rivulet operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Protocol parsing errors
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Command execution errors
    #[error("command error: {0}")]
    Command(#[from] CommandError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Replica handshake or primary link failure
    #[error("replication error: {0}")]
    Replication(String),

    /// Address parsing error
    #[error("address parse error: {0}")]
    AddrParse(#[from] AddrParseError),
}

/// Protocol-level errors during RESP parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Invalid RESP data type marker
    #[error("invalid type marker: {0:?}")]
    InvalidTypeMarker(u8),

    /// Invalid UTF-8 in simple string or error line
    #[error("invalid UTF-8 in string")]
    InvalidUtf8,

    /// Invalid integer format
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Negative bulk string length other than the nil marker
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Negative array length
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Bulk string too large
    #[error("bulk string too large: {len} bytes (max: {max})")]
    BulkTooLarge {
        /// Declared bulk string length in bytes
        len: usize,
        /// Maximum allowed length
        max: usize,
    },

    /// Too many array elements
    #[error("too many array elements: {count} (max: {max})")]
    TooManyElements {
        /// Declared element count
        count: usize,
        /// Maximum allowed count
        max: usize,
    },

    /// Arrays nested deeper than the decoder accepts
    #[error("arrays nested deeper than {0} levels")]
    NestingTooDeep(usize),

    /// Bulk payload not followed by CRLF
    #[error("missing CRLF terminator")]
    MissingCrlf,
}

/// Stream id validation errors raised by XADD and id parsing.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamIdError {
    /// `0-0` is reserved
    #[error("ERR The ID specified in XADD must be greater than 0-0")]
    Zero,

    /// New id does not advance past the stream's last id
    #[error("ERR The ID specified in XADD is equal or smaller than the target stream top item")]
    NotGreaterThanTop,

    /// The id literal is malformed
    #[error("ERR Invalid stream ID specified as stream command argument")]
    Invalid,
}

/// Command execution errors. The display text is sent verbatim as the
/// error reply.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown command
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    /// Wrong number of arguments
    #[error("ERR wrong number of arguments for '{command}' command")]
    WrongArity {
        /// Command name (lowercase) that received wrong arity
        command: String,
    },

    /// Request was not a non-empty array of strings
    #[error("ERR Protocol error: expected a non-empty array of bulk strings")]
    ExpectedArray,

    /// Wrong type for operation
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    /// Syntax error
    #[error("ERR syntax error")]
    SyntaxError,

    /// Not an integer
    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    /// Negative count where a positive one is required
    #[error("ERR value is out of range, must be positive")]
    NotPositive,

    /// Timeout argument is not a float
    #[error("ERR timeout is not a float or out of range")]
    InvalidTimeout,

    /// Timeout argument is negative
    #[error("ERR timeout is negative")]
    NegativeTimeout,

    /// Invalid expire time in SET
    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpireTime(String),

    /// XREAD ids do not pair with keys
    #[error("ERR Unbalanced 'xread' list of streams: for each stream key an ID or '$' must be specified.")]
    UnbalancedStreams,

    /// Nested MULTI call
    #[error("ERR MULTI calls can not be nested")]
    NestedMulti,

    /// EXEC without MULTI
    #[error("ERR EXEC without MULTI")]
    ExecWithoutMulti,

    /// DISCARD without MULTI
    #[error("ERR DISCARD without MULTI")]
    DiscardWithoutMulti,

    /// Transaction aborted by an earlier queueing error
    #[error("EXECABORT Transaction discarded because of previous errors.")]
    TransactionAborted,

    /// Stream id errors surface with their own text
    #[error(transparent)]
    StreamId(#[from] StreamIdError),
}

impl From<ParseIntError> for ProtocolError {
    fn from(e: ParseIntError) -> Self {
        ProtocolError::InvalidInteger(e.to_string())
    }
}
