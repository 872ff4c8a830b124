//! Blocking list commands.
//!
//! A blocking command either answers at once or registers the client with
//! the blocking coordinator and replies `Blocked`; the answer then arrives as
//! a wakeup when a push lands on one of its keys or the deadline passes.

use super::{ExecContext, ParsedCommand, Reply};
use crate::error::CommandError;
use crate::protocol::Frame;
use crate::server::blocking::WaitingFor;
use crate::types::{Timestamp, ValueType};
use bytes::Bytes;

/// Parse a timeout given in (possibly fractional) seconds into a deadline.
/// Zero means wait forever.
pub(crate) fn deadline_from_seconds(
    arg: &str,
    now: Timestamp,
) -> Result<Option<Timestamp>, CommandError> {
    let seconds: f64 = arg.parse().map_err(|_| CommandError::InvalidTimeout)?;
    if !seconds.is_finite() {
        return Err(CommandError::InvalidTimeout);
    }
    if seconds < 0.0 {
        return Err(CommandError::NegativeTimeout);
    }
    if seconds == 0.0 {
        return Ok(None);
    }
    let ms = (seconds * 1000.0).round() as i64;
    Ok(Some(now.saturating_add(ms.max(1))))
}

/// BLPOP key [key ...] timeout
pub fn cmd_blpop(cmd: &ParsedCommand, ctx: &mut ExecContext<'_>) -> Result<Reply, CommandError> {
    let timeout_idx = cmd.args.len() - 1;
    let deadline = deadline_from_seconds(cmd.get_str(timeout_idx)?, ctx.now)?;
    let keys: Vec<Bytes> = cmd.args[..timeout_idx].to_vec();

    for key in &keys {
        match ctx.db.key_type(key, ctx.now) {
            None | Some(ValueType::List) => {}
            Some(_) => return Err(CommandError::WrongType),
        }
    }

    for key in &keys {
        if let Some(item) = ctx
            .db
            .list_pop(key, 1, ctx.now)
            .and_then(|items| items.into_iter().next())
        {
            ctx.propagate(Frame::command([Bytes::from_static(b"LPOP"), key.clone()]));
            return Ok(Frame::array(vec![Frame::Bulk(key.clone()), Frame::Bulk(item)]).into());
        }
    }

    if !ctx.can_block {
        return Ok(Frame::Null.into());
    }

    ctx.blocking
        .register_blocked(ctx.client.id(), deadline, WaitingFor::ListPop { keys });
    Ok(Reply::Blocked)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Harness;
    use super::*;

    #[test]
    fn test_deadline_parsing() {
        assert_eq!(deadline_from_seconds("0", 1_000), Ok(None));
        assert_eq!(deadline_from_seconds("1", 1_000), Ok(Some(2_000)));
        assert_eq!(deadline_from_seconds("0.1", 1_000), Ok(Some(1_100)));
        assert_eq!(
            deadline_from_seconds("-1", 0),
            Err(CommandError::NegativeTimeout)
        );
        assert_eq!(
            deadline_from_seconds("soon", 0),
            Err(CommandError::InvalidTimeout)
        );
        assert_eq!(
            deadline_from_seconds("inf", 0),
            Err(CommandError::InvalidTimeout)
        );
    }

    #[test]
    fn test_blpop_serves_immediately() {
        let mut h = Harness::new();
        h.run(&["RPUSH", "b", "x"]);
        assert_eq!(h.frame(&["BLPOP", "a", "b", "0"]), Frame::command(["b", "x"]));
        assert!(!h.blocking.is_blocked(1));
    }

    #[test]
    fn test_blpop_blocks_on_empty() {
        let mut h = Harness::new();
        assert_eq!(h.run(&["BLPOP", "a", "b", "1.5"]), Reply::Blocked);
        assert!(h.blocking.is_blocked(1));
        assert_eq!(h.blocking.waiters(b"a"), vec![1]);
        assert_eq!(h.blocking.next_deadline(), Some(h.now + 1_500));
    }

    #[test]
    fn test_push_wakes_blocked_client() {
        let mut h = Harness::new();
        h.run(&["BLPOP", "q", "0"]);

        // Another client pushes; the harness runs it on the same state, which
        // is enough to drive the coordinator.
        h.client = crate::server::ClientState::new(2, None, crate::server::ClientKind::Normal);
        let (reply, wakeups) = h.run_with_wakeups(&["RPUSH", "q", "v"]);
        assert_eq!(reply, Reply::Frame(Frame::integer(1)));
        assert_eq!(wakeups.len(), 1);
        assert_eq!(wakeups[0].client, 1);
        assert_eq!(wakeups[0].reply, Frame::command(["q", "v"]));
        assert_eq!(h.frame(&["LLEN", "q"]), Frame::integer(0));
    }

    #[test]
    fn test_blpop_wrong_type() {
        let mut h = Harness::new();
        h.run(&["SET", "s", "v"]);
        assert!(h.frame(&["BLPOP", "s", "0"]).is_error());
        assert!(!h.blocking.is_blocked(1));
    }

    #[test]
    fn test_blpop_propagates_as_lpop() {
        let mut h = Harness::new();
        h.replication.register_replica(9);
        h.run(&["RPUSH", "q", "v"]);
        h.run(&["BLPOP", "q", "0"]);
        let outbox = h.replication.take_outbox();
        assert_eq!(outbox.len(), 2);
        assert_eq!(outbox[1], Frame::command(["LPOP", "q"]).encode());
    }
}
