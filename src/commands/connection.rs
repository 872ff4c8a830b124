//! Connection command implementations.

use super::{ExecContext, ParsedCommand, Reply};
use crate::error::CommandError;
use crate::protocol::Frame;

type Result<T> = std::result::Result<T, CommandError>;

/// PING [message]
pub fn cmd_ping(cmd: &ParsedCommand, _ctx: &mut ExecContext<'_>) -> Result<Reply> {
    match cmd.args.first() {
        Some(message) => Ok(Frame::Bulk(message.clone()).into()),
        None => Ok(Frame::pong().into()),
    }
}

/// ECHO message
pub fn cmd_echo(cmd: &ParsedCommand, _ctx: &mut ExecContext<'_>) -> Result<Reply> {
    Ok(Frame::Bulk(cmd.args[0].clone()).into())
}
