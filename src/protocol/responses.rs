//! Pre-encoded replies for the hottest responses.

/// +OK\r\n
pub static OK: &[u8] = b"+OK\r\n";

/// +PONG\r\n
pub static PONG: &[u8] = b"+PONG\r\n";

/// +QUEUED\r\n
pub static QUEUED: &[u8] = b"+QUEUED\r\n";

/// Nil bulk string: $-1\r\n
pub static NULL_BULK: &[u8] = b"$-1\r\n";

/// $0\r\n\r\n
pub static EMPTY_BULK: &[u8] = b"$0\r\n\r\n";

/// *0\r\n
pub static EMPTY_ARRAY: &[u8] = b"*0\r\n";

/// :0\r\n
pub static ZERO: &[u8] = b":0\r\n";

/// :1\r\n
pub static ONE: &[u8] = b":1\r\n";

/// Look up a pre-encoded integer reply.
#[inline]
pub fn integer(n: i64) -> Option<&'static [u8]> {
    match n {
        0 => Some(ZERO),
        1 => Some(ONE),
        _ => None,
    }
}
