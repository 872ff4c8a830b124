//! List command implementations.

use super::{ExecContext, ParsedCommand, Reply};
use crate::error::CommandError;
use crate::protocol::Frame;
use crate::types::ValueType;

type Result<T> = std::result::Result<T, CommandError>;

/// LPUSH key element [element ...]
pub fn cmd_lpush(cmd: &ParsedCommand, ctx: &mut ExecContext<'_>) -> Result<Reply> {
    let key = cmd.args[0].clone();
    let len = ctx
        .db
        .list_push_left(key.clone(), cmd.args[1..].to_vec(), ctx.now)?;
    ctx.touch(key);
    Ok(Frame::Integer(len as i64).into())
}

/// RPUSH key element [element ...]
pub fn cmd_rpush(cmd: &ParsedCommand, ctx: &mut ExecContext<'_>) -> Result<Reply> {
    let key = cmd.args[0].clone();
    let len = ctx
        .db
        .list_push_right(key.clone(), cmd.args[1..].to_vec(), ctx.now)?;
    ctx.touch(key);
    Ok(Frame::Integer(len as i64).into())
}

/// LPOP key [count]
///
/// Without a count the reply is a single element or nil. With a count it is
/// an array of up to `count` elements; `0` always yields an empty array.
pub fn cmd_lpop(cmd: &ParsedCommand, ctx: &mut ExecContext<'_>) -> Result<Reply> {
    let key = &cmd.args[0];
    let count = match cmd.args.get(1) {
        Some(_) => {
            let n = cmd.get_i64(1)?;
            if n < 0 {
                return Err(CommandError::NotPositive);
            }
            Some(n as usize)
        }
        None => None,
    };

    match ctx.db.key_type(key, ctx.now) {
        None | Some(ValueType::List) => {}
        Some(_) => return Err(CommandError::WrongType),
    }

    if count == Some(0) {
        return Ok(Frame::empty_array().into());
    }

    let popped = ctx.db.list_pop(key, count.unwrap_or(1), ctx.now);
    let reply = match (popped, count) {
        (None, _) => Frame::Null,
        (Some(items), Some(_)) => items.into_iter().map(Frame::Bulk).collect(),
        (Some(items), None) => items.into_iter().next().map_or(Frame::Null, Frame::Bulk),
    };
    Ok(reply.into())
}

/// LRANGE key start stop
pub fn cmd_lrange(cmd: &ParsedCommand, ctx: &mut ExecContext<'_>) -> Result<Reply> {
    let start = cmd.get_i64(1)?;
    let stop = cmd.get_i64(2)?;
    let items = ctx.db.list_range(&cmd.args[0], start, stop, ctx.now)?;
    Ok(items.into_iter().map(Frame::Bulk).collect::<Frame>().into())
}

/// LLEN key
pub fn cmd_llen(cmd: &ParsedCommand, ctx: &mut ExecContext<'_>) -> Result<Reply> {
    let len = ctx.db.list_len(&cmd.args[0], ctx.now)?;
    Ok(Frame::Integer(len as i64).into())
}
