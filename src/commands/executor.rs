//! Command executor.
//!
//! Resolves a parsed command to its handler, applies transaction queueing,
//! and afterwards performs the bookkeeping every command shares: replica
//! fan-out and waking clients blocked on the keys it touched.

use super::{CommandRegistry, ExecContext, ParsedCommand, Reply};
use crate::error::CommandError;
use crate::protocol::Frame;
use bytes::Bytes;
use tracing::trace;

/// Command executor that dispatches commands to handlers.
#[derive(Debug, Default)]
pub struct CommandExecutor {
    registry: CommandRegistry,
}

impl CommandExecutor {
    /// Create a new command executor.
    pub fn new() -> Self {
        Self {
            registry: CommandRegistry::new(),
        }
    }

    /// Get the command registry.
    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Execute one command arriving on a connection. `raw` is the exact
    /// bytes it was decoded from.
    pub fn execute(&self, cmd: ParsedCommand, raw: Bytes, ctx: &mut ExecContext<'_>) -> Reply {
        trace!(client = ctx.client.id(), command = %cmd.name, args = cmd.arg_count(), "execute");

        if ctx.client.in_transaction() {
            match cmd.name.as_str() {
                "EXEC" => return self.execute_transaction(ctx),
                "MULTI" | "DISCARD" => {}
                _ => return self.queue(cmd, raw, ctx),
            }
        }

        let from_primary = ctx.client.is_primary_link();
        let answers_primary = cmd.name == "REPLCONF" && cmd.arg_is(0, "GETACK");
        let reply = self.run(&cmd, &raw, ctx);

        if from_primary && !answers_primary {
            return Reply::Silent;
        }
        reply
    }

    /// Validate a command inside MULTI and queue it. A command that fails
    /// validation poisons the transaction.
    fn queue(&self, cmd: ParsedCommand, raw: Bytes, ctx: &mut ExecContext<'_>) -> Reply {
        match self.registry.resolve(&cmd) {
            Ok(_) => {
                ctx.client.queue_command(cmd, raw);
                Frame::queued().into()
            }
            Err(e) => {
                ctx.client.abort_transaction();
                Frame::error(e.to_string()).into()
            }
        }
    }

    /// EXEC: run every queued command in order and collect their replies.
    fn execute_transaction(&self, ctx: &mut ExecContext<'_>) -> Reply {
        let Some(tx) = ctx.client.take_transaction() else {
            return Frame::error(CommandError::ExecWithoutMulti.to_string()).into();
        };
        if tx.is_aborted() {
            return Frame::error(CommandError::TransactionAborted.to_string()).into();
        }

        let can_block = ctx.can_block;
        ctx.can_block = false;
        let results = tx
            .into_commands()
            .into_iter()
            .map(|queued| match self.run(&queued.command, &queued.raw, ctx) {
                Reply::Frame(frame) => frame,
                Reply::Snapshot { header, .. } => header,
                Reply::Blocked | Reply::Silent => Frame::Null,
            })
            .collect();
        ctx.can_block = can_block;

        Frame::Array(results).into()
    }

    /// Dispatch to the handler, then fan out and wake waiters.
    fn run(&self, cmd: &ParsedCommand, raw: &Bytes, ctx: &mut ExecContext<'_>) -> Reply {
        let command = match self.registry.resolve(cmd) {
            Ok(command) => command,
            Err(e) => return Frame::error(e.to_string()).into(),
        };

        let reply = match (command.handler)(cmd, ctx) {
            Ok(reply) => {
                if command.flags.is_write() {
                    ctx.replication.propagate(raw);
                }
                reply
            }
            Err(e) => Reply::Frame(Frame::error(e.to_string())),
        };

        for frame in std::mem::take(&mut ctx.propagated) {
            ctx.replication.propagate(&frame.encode());
        }

        for key in std::mem::take(&mut ctx.touched) {
            let wakeups = ctx.blocking.notify_key_changed(&key, ctx.db, ctx.now);
            for wakeup in wakeups {
                if let Some(frame) = &wakeup.propagate {
                    ctx.replication.propagate(&frame.encode());
                }
                ctx.wakeups.push(wakeup);
            }
        }

        reply
    }
}
