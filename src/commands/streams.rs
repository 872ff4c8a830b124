//! Stream command implementations.

use super::{ExecContext, ParsedCommand, Reply};
use crate::error::CommandError;
use crate::protocol::Frame;
use crate::server::blocking::{read_streams, WaitingFor};
use crate::types::{RangeBound, StreamId, StreamIdSpec, ValueType};
use bytes::Bytes;

type Result<T> = std::result::Result<T, CommandError>;

/// XADD key <* | ms-* | ms-seq> field value [field value ...]
pub fn cmd_xadd(cmd: &ParsedCommand, ctx: &mut ExecContext<'_>) -> Result<Reply> {
    if cmd.args.len() % 2 != 0 {
        return Err(cmd.arity_error());
    }

    let key = cmd.args[0].clone();
    let spec = StreamIdSpec::parse(cmd.get_str(1)?)?;
    let fields: Vec<(Bytes, Bytes)> = cmd.args[2..]
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();

    let id = ctx.db.stream_append(key.clone(), spec, fields, ctx.now)?;
    ctx.touch(key);
    Ok(id.to_frame().into())
}

/// XRANGE key start end [COUNT count]
pub fn cmd_xrange(cmd: &ParsedCommand, ctx: &mut ExecContext<'_>) -> Result<Reply> {
    let start = RangeBound::Start.parse(cmd.get_str(1)?)?;
    let end = RangeBound::End.parse(cmd.get_str(2)?)?;

    let count = match cmd.args.len() {
        3 => None,
        5 if cmd.arg_is(3, "COUNT") => Some(usize::try_from(cmd.get_i64(4)?).unwrap_or(0)),
        _ => return Err(CommandError::SyntaxError),
    };

    let entries = ctx.db.stream_range(&cmd.args[0], start, end, count, ctx.now)?;
    Ok(entries.iter().map(|e| e.to_frame()).collect::<Frame>().into())
}

/// Parsed XREAD options.
#[derive(Debug, PartialEq, Eq)]
struct XreadArgs<'a> {
    count: Option<usize>,
    block_ms: Option<i64>,
    keys: &'a [Bytes],
    ids: &'a [Bytes],
}

fn parse_xread(cmd: &ParsedCommand) -> Result<XreadArgs<'_>> {
    let mut count = None;
    let mut block_ms = None;
    let mut i = 0;

    loop {
        if i >= cmd.args.len() {
            return Err(CommandError::SyntaxError);
        }
        if cmd.arg_is(i, "COUNT") {
            let n = cmd.get_i64(i + 1)?;
            count = usize::try_from(n).ok().filter(|n| *n > 0);
            i += 2;
        } else if cmd.arg_is(i, "BLOCK") {
            let ms: i64 = cmd
                .get_str(i + 1)?
                .parse()
                .map_err(|_| CommandError::InvalidTimeout)?;
            if ms < 0 {
                return Err(CommandError::NegativeTimeout);
            }
            block_ms = Some(ms);
            i += 2;
        } else if cmd.arg_is(i, "STREAMS") {
            i += 1;
            break;
        } else {
            return Err(CommandError::SyntaxError);
        }
    }

    let rest = &cmd.args[i..];
    if rest.is_empty() || rest.len() % 2 != 0 {
        return Err(CommandError::UnbalancedStreams);
    }
    let (keys, ids) = rest.split_at(rest.len() / 2);
    Ok(XreadArgs {
        count,
        block_ms,
        keys,
        ids,
    })
}

/// XREAD [COUNT count] [BLOCK milliseconds] STREAMS key [key ...] id [id ...]
///
/// `$` reads only entries added after the call. Without BLOCK, or when no
/// stream has anything new and the client may not block, the reply is nil.
pub fn cmd_xread(cmd: &ParsedCommand, ctx: &mut ExecContext<'_>) -> Result<Reply> {
    let args = parse_xread(cmd)?;

    let mut cursors = Vec::with_capacity(args.keys.len());
    for (key, id) in args.keys.iter().zip(args.ids) {
        match ctx.db.key_type(key, ctx.now) {
            None | Some(ValueType::Stream) => {}
            Some(_) => return Err(CommandError::WrongType),
        }
        let after = if &id[..] == b"$" {
            ctx.db.stream_last_id(key, ctx.now)?
        } else {
            let id = std::str::from_utf8(id).map_err(|_| CommandError::SyntaxError)?;
            StreamId::parse(id)?
        };
        cursors.push((key.clone(), after));
    }

    if let Some(reply) = read_streams(ctx.db, &cursors, args.count, ctx.now) {
        return Ok(reply.into());
    }

    match args.block_ms {
        Some(ms) if ctx.can_block => {
            let deadline = (ms > 0).then(|| ctx.now.saturating_add(ms));
            ctx.blocking.register_blocked(
                ctx.client.id(),
                deadline,
                WaitingFor::StreamRead {
                    cursors,
                    count: args.count,
                },
            );
            Ok(Reply::Blocked)
        }
        _ => Ok(Frame::Null.into()),
    }
}
