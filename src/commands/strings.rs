//! String command implementations.

use super::{ExecContext, ParsedCommand, Reply};
use crate::error::CommandError;
use crate::protocol::Frame;
use bytes::Bytes;

type Result<T> = std::result::Result<T, CommandError>;

/// GET key
pub fn cmd_get(cmd: &ParsedCommand, ctx: &mut ExecContext<'_>) -> Result<Reply> {
    match ctx.db.get(&cmd.args[0], ctx.now)? {
        Some(value) => Ok(Frame::Bulk(value).into()),
        None => Ok(Frame::Null.into()),
    }
}

/// SET key value [EX seconds | PX milliseconds]
pub fn cmd_set(cmd: &ParsedCommand, ctx: &mut ExecContext<'_>) -> Result<Reply> {
    let key = cmd.args[0].clone();
    let value = cmd.args[1].clone();

    let mut ttl_ms = None;
    let mut i = 2;
    while i < cmd.args.len() {
        let opt = cmd.get_str(i)?.to_uppercase();
        let scale = match opt.as_str() {
            "EX" => 1000,
            "PX" => 1,
            _ => return Err(CommandError::SyntaxError),
        };
        if ttl_ms.is_some() {
            return Err(CommandError::SyntaxError);
        }
        i += 1;
        if i >= cmd.args.len() {
            return Err(CommandError::SyntaxError);
        }
        let amount = cmd.get_i64(i)?;
        if amount <= 0 {
            return Err(CommandError::InvalidExpireTime("set".to_string()));
        }
        let ms = amount
            .checked_mul(scale)
            .ok_or_else(|| CommandError::InvalidExpireTime("set".to_string()))?;
        ttl_ms = Some(ms);
        i += 1;
    }

    ctx.db.set(key.clone(), value, ttl_ms, ctx.now);
    ctx.touch(key);
    Ok(Frame::ok().into())
}

/// INCR key
///
/// A missing key counts as 0.
pub fn cmd_incr(cmd: &ParsedCommand, ctx: &mut ExecContext<'_>) -> Result<Reply> {
    let key = &cmd.args[0];
    let value = match ctx.db.increment_if_numeric(key, ctx.now)? {
        Some(value) => value,
        None => {
            ctx.db.set(key.clone(), Bytes::from_static(b"1"), None, ctx.now);
            1
        }
    };
    ctx.touch(key.clone());
    Ok(Frame::Integer(value).into())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Harness;
    use crate::protocol::Frame;

    #[test]
    fn test_set_get() {
        let mut h = Harness::new();
        assert_eq!(h.frame(&["SET", "k", "v"]), Frame::ok());
        assert_eq!(h.frame(&["GET", "k"]), Frame::bulk("v"));
        assert_eq!(h.frame(&["GET", "missing"]), Frame::Null);
    }

    #[test]
    fn test_set_px_expires() {
        let mut h = Harness::new();
        h.run(&["SET", "k", "v", "PX", "100"]);
        h.now += 99;
        assert_eq!(h.frame(&["GET", "k"]), Frame::bulk("v"));
        h.now += 1;
        assert_eq!(h.frame(&["GET", "k"]), Frame::Null);
        assert_eq!(h.frame(&["TYPE", "k"]), Frame::simple("none"));
    }

    #[test]
    fn test_set_ex_seconds() {
        let mut h = Harness::new();
        h.run(&["SET", "k", "v", "ex", "2"]);
        h.now += 1_999;
        assert_eq!(h.frame(&["GET", "k"]), Frame::bulk("v"));
        h.now += 1;
        assert_eq!(h.frame(&["GET", "k"]), Frame::Null);
    }

    #[test]
    fn test_set_rejects_bad_options() {
        let mut h = Harness::new();
        assert_eq!(h.frame(&["SET", "k", "v", "PX"]), Frame::error("ERR syntax error"));
        assert_eq!(h.frame(&["SET", "k", "v", "NOPE", "1"]), Frame::error("ERR syntax error"));
        assert_eq!(
            h.frame(&["SET", "k", "v", "PX", "0"]),
            Frame::error("ERR invalid expire time in 'set' command")
        );
        assert_eq!(
            h.frame(&["SET", "k", "v", "PX", "ten"]),
            Frame::error("ERR value is not an integer or out of range")
        );
    }

    #[test]
    fn test_set_clears_previous_ttl() {
        let mut h = Harness::new();
        h.run(&["SET", "k", "v", "PX", "10"]);
        h.run(&["SET", "k", "w"]);
        h.now += 1_000;
        assert_eq!(h.frame(&["GET", "k"]), Frame::bulk("w"));
    }

    #[test]
    fn test_incr() {
        let mut h = Harness::new();
        assert_eq!(h.frame(&["INCR", "n"]), Frame::integer(1));
        assert_eq!(h.frame(&["INCR", "n"]), Frame::integer(2));
        h.run(&["SET", "s", "x"]);
        assert_eq!(
            h.frame(&["INCR", "s"]),
            Frame::error("ERR value is not an integer or out of range")
        );
    }

    #[test]
    fn test_get_wrong_type() {
        let mut h = Harness::new();
        h.run(&["RPUSH", "l", "a"]);
        assert_eq!(
            h.frame(&["GET", "l"]),
            Frame::error("WRONGTYPE Operation against a key holding the wrong kind of value")
        );
    }
}
