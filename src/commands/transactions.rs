//! Transaction command implementations (MULTI, EXEC, DISCARD).
//!
//! Queueing and EXEC itself live in the executor, which sees every command
//! before dispatch. These handlers only cover the states the executor lets
//! through: opening a transaction, and EXEC or DISCARD outside of one.

use super::{ExecContext, ParsedCommand, Reply};
use crate::error::CommandError;
use crate::protocol::Frame;

/// MULTI - Start a transaction block.
pub fn cmd_multi(_cmd: &ParsedCommand, ctx: &mut ExecContext<'_>) -> Result<Reply, CommandError> {
    if !ctx.client.start_transaction() {
        return Err(CommandError::NestedMulti);
    }
    Ok(Frame::ok().into())
}

/// EXEC - Execute all commands issued after MULTI.
///
/// Reaching this handler means no transaction is open.
pub fn cmd_exec(_cmd: &ParsedCommand, _ctx: &mut ExecContext<'_>) -> Result<Reply, CommandError> {
    Err(CommandError::ExecWithoutMulti)
}

/// DISCARD - Drop all queued commands.
pub fn cmd_discard(_cmd: &ParsedCommand, ctx: &mut ExecContext<'_>) -> Result<Reply, CommandError> {
    if !ctx.client.discard_transaction() {
        return Err(CommandError::DiscardWithoutMulti);
    }
    Ok(Frame::ok().into())
}
