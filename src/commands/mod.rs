//! Command implementation.
//!
//! This module provides the command parsing, routing, and execution layer.

mod blocking;
mod connection;
mod executor;
mod keys;
mod lists;
mod registry;
mod server_cmds;
mod streams;
mod strings;
mod transactions;

pub use executor::CommandExecutor;
pub use registry::{Command, CommandHandler, CommandRegistry};

use crate::error::CommandError;
use crate::protocol::Frame;
use crate::server::blocking::{BlockingCoordinator, Wakeup};
use crate::server::replication::ReplicationManager;
use crate::server::ClientState;
use crate::storage::Database;
use crate::types::Timestamp;
use bytes::Bytes;

type CommandResult<T> = std::result::Result<T, CommandError>;

/// Parsed command with name and arguments.
#[derive(Debug, Clone)]
pub struct ParsedCommand {
    /// Command name (uppercase)
    pub name: String,
    /// Command arguments
    pub args: Vec<Bytes>,
}

impl ParsedCommand {
    /// Parse a command from a RESP frame.
    ///
    /// The frame must be a non-empty array whose elements are all strings
    /// (bulk, simple or integer).
    pub fn from_frame(frame: Frame) -> CommandResult<Self> {
        let frames = match frame {
            Frame::Array(arr) if !arr.is_empty() => arr,
            _ => return Err(CommandError::ExpectedArray),
        };

        let mut iter = frames.into_iter();

        let name_frame = iter.next().ok_or(CommandError::ExpectedArray)?;
        let name_bytes = name_frame.to_bytes().ok_or(CommandError::ExpectedArray)?;
        let name = String::from_utf8_lossy(&name_bytes).to_uppercase();

        let args = iter
            .map(|f| f.to_bytes().ok_or(CommandError::ExpectedArray))
            .collect::<CommandResult<Vec<_>>>()?;

        Ok(Self { name, args })
    }

    /// Get the number of arguments (excluding command name).
    #[inline]
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    /// Command name as it appears in error messages.
    pub fn lowercase_name(&self) -> String {
        self.name.to_lowercase()
    }

    /// Wrong-arity error for this command.
    pub fn arity_error(&self) -> CommandError {
        CommandError::WrongArity {
            command: self.lowercase_name(),
        }
    }

    /// Get an argument as a string.
    pub fn get_str(&self, index: usize) -> CommandResult<&str> {
        let bytes = self.args.get(index).ok_or_else(|| self.arity_error())?;
        std::str::from_utf8(bytes).map_err(|_| CommandError::SyntaxError)
    }

    /// Get an argument as an i64.
    pub fn get_i64(&self, index: usize) -> CommandResult<i64> {
        let s = self.get_str(index)?;
        s.parse().map_err(|_| CommandError::NotInteger)
    }

    /// Case-insensitive comparison of an argument against a keyword.
    pub fn arg_is(&self, index: usize, keyword: &str) -> bool {
        self.args
            .get(index)
            .is_some_and(|a| a.eq_ignore_ascii_case(keyword.as_bytes()))
    }
}

bitflags::bitflags! {
    /// Command flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CommandFlags: u8 {
        /// Command is read-only
        const READONLY = 1 << 0;
        /// Command modifies data and is fanned out to replicas
        const WRITE    = 1 << 1;
        /// Command is for admin use
        const ADMIN    = 1 << 2;
        /// Command may block the connection
        const BLOCKING = 1 << 3;
        /// Command is fast (O(1))
        const FAST     = 1 << 4;
    }
}

impl CommandFlags {
    /// Flags for read-only commands (readonly + fast).
    #[inline]
    pub const fn readonly() -> Self {
        Self::READONLY.union(Self::FAST)
    }

    /// Flags for write commands.
    #[inline]
    pub const fn write() -> Self {
        Self::WRITE
    }

    /// Flags for admin commands.
    #[inline]
    pub const fn admin() -> Self {
        Self::ADMIN
    }

    /// Flags for blocking commands. They are not fanned out as-is; whatever
    /// they consume is propagated explicitly.
    #[inline]
    pub const fn blocking() -> Self {
        Self::BLOCKING
    }

    #[inline]
    pub const fn is_write(&self) -> bool {
        self.contains(Self::WRITE)
    }
}

/// What a handler produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// A reply to serialize
    Frame(Frame),
    /// The client is now blocked; it will be answered later
    Blocked,
    /// Nothing is sent back
    Silent,
    /// A status line followed by a raw snapshot transfer (PSYNC)
    Snapshot { header: Frame, payload: Bytes },
}

impl From<Frame> for Reply {
    fn from(frame: Frame) -> Self {
        Self::Frame(frame)
    }
}

/// Everything a handler may touch while running one command.
pub struct ExecContext<'a> {
    pub db: &'a mut Database,
    pub blocking: &'a mut BlockingCoordinator,
    pub replication: &'a mut ReplicationManager,
    pub client: &'a mut ClientState,
    /// Clock reading shared by the whole command
    pub now: Timestamp,
    /// False inside EXEC and on the primary link; blocking commands then
    /// answer immediately
    pub can_block: bool,
    touched: Vec<Bytes>,
    propagated: Vec<Frame>,
    wakeups: Vec<Wakeup>,
}

impl<'a> ExecContext<'a> {
    pub fn new(
        db: &'a mut Database,
        blocking: &'a mut BlockingCoordinator,
        replication: &'a mut ReplicationManager,
        client: &'a mut ClientState,
        now: Timestamp,
    ) -> Self {
        let can_block = !client.is_primary_link();
        Self {
            db,
            blocking,
            replication,
            client,
            now,
            can_block,
            touched: Vec::new(),
            propagated: Vec::new(),
            wakeups: Vec::new(),
        }
    }

    /// Record that `key` was mutated so its waiters get a chance to run.
    pub fn touch(&mut self, key: Bytes) {
        if !self.touched.contains(&key) {
            self.touched.push(key);
        }
    }

    /// Fan out `command` to replicas instead of (or besides) the original
    /// request bytes.
    pub fn propagate(&mut self, command: Frame) {
        self.propagated.push(command);
    }

    /// Clients unblocked as a consequence of this command.
    pub fn take_wakeups(&mut self) -> Vec<Wakeup> {
        std::mem::take(&mut self.wakeups)
    }
}
