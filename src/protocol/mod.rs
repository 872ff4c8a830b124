//! RESP wire protocol.
//!
//! Five node kinds travel on the wire: arrays, bulk strings (nullable),
//! simple strings, errors and integers. The decoder is resumable: when the
//! buffer does not hold a whole node yet it reports "incomplete" and consumes
//! nothing.

mod frame;
mod parser;
pub mod responses;

pub use frame::Frame;
pub use parser::{decode, decode_snapshot, RespParser};

/// CRLF terminator bytes.
pub const CRLF: &[u8] = b"\r\n";

/// Type markers for RESP.
pub mod markers {
    /// Simple string: +
    pub const SIMPLE_STRING: u8 = b'+';
    /// Error: -
    pub const ERROR: u8 = b'-';
    /// Integer: :
    pub const INTEGER: u8 = b':';
    /// Bulk string: $
    pub const BULK_STRING: u8 = b'$';
    /// Array: *
    pub const ARRAY: u8 = b'*';
}
