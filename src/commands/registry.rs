//! Command registry for looking up commands.

use super::{CommandFlags, ExecContext, ParsedCommand, Reply};
use crate::error::CommandError;
use std::collections::HashMap;

/// Type alias for a command handler.
pub type CommandHandler =
    fn(&ParsedCommand, &mut ExecContext<'_>) -> Result<Reply, CommandError>;

/// Command definition.
#[derive(Clone)]
pub struct Command {
    /// Command name
    pub name: &'static str,
    /// Minimum argument count
    pub min_args: i32,
    /// Maximum argument count (-1 for unlimited)
    pub max_args: i32,
    /// Command flags
    pub flags: CommandFlags,
    /// Handler function
    pub handler: CommandHandler,
    /// Help text
    pub summary: &'static str,
}

impl Command {
    /// Create a new command definition.
    pub const fn new(
        name: &'static str,
        min_args: i32,
        max_args: i32,
        flags: CommandFlags,
        handler: CommandHandler,
        summary: &'static str,
    ) -> Self {
        Self {
            name,
            min_args,
            max_args,
            flags,
            handler,
            summary,
        }
    }

    /// Whether `count` arguments (excluding the name) are acceptable.
    pub fn accepts_arity(&self, count: usize) -> bool {
        let count = i32::try_from(count).unwrap_or(i32::MAX);
        count >= self.min_args && (self.max_args < 0 || count <= self.max_args)
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .field("flags", &self.flags)
            .field("summary", &self.summary)
            .finish()
    }
}

/// Registry of all available commands.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: HashMap<&'static str, Command>,
}

impl CommandRegistry {
    /// Create a new command registry with all built-in commands.
    pub fn new() -> Self {
        let mut registry = Self {
            commands: HashMap::new(),
        };
        registry.register_all();
        registry
    }

    /// Register a command.
    pub fn register(&mut self, cmd: Command) {
        self.commands.insert(cmd.name, cmd);
    }

    /// Look up a command by its uppercase name.
    pub fn get(&self, name: &str) -> Option<&Command> {
        self.commands.get(name)
    }

    /// Look up a command and check its arity.
    pub fn resolve(&self, cmd: &ParsedCommand) -> Result<&Command, CommandError> {
        let command = self
            .get(&cmd.name)
            .ok_or_else(|| CommandError::UnknownCommand(cmd.lowercase_name()))?;
        if !command.accepts_arity(cmd.arg_count()) {
            return Err(cmd.arity_error());
        }
        Ok(command)
    }

    /// Get all registered commands.
    pub fn commands(&self) -> impl Iterator<Item = &Command> {
        self.commands.values()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    fn register_all(&mut self) {
        self.register_connection_commands();
        self.register_string_commands();
        self.register_key_commands();
        self.register_list_commands();
        self.register_blocking_commands();
        self.register_stream_commands();
        self.register_transaction_commands();
        self.register_server_commands();
    }

    fn register_connection_commands(&mut self) {
        use super::connection::*;

        self.register(Command::new(
            "PING",
            0,
            1,
            CommandFlags::FAST,
            cmd_ping,
            "Ping the server",
        ));
        self.register(Command::new(
            "ECHO",
            1,
            1,
            CommandFlags::FAST,
            cmd_echo,
            "Echo the given string",
        ));
    }

    fn register_string_commands(&mut self) {
        use super::strings::*;

        self.register(Command::new(
            "GET",
            1,
            1,
            CommandFlags::readonly(),
            cmd_get,
            "Get the value of a key",
        ));
        self.register(Command::new(
            "SET",
            2,
            -1,
            CommandFlags::write(),
            cmd_set,
            "Set the string value of a key",
        ));
        self.register(Command::new(
            "INCR",
            1,
            1,
            CommandFlags::write(),
            cmd_incr,
            "Increment the integer value of a key by one",
        ));
    }

    fn register_key_commands(&mut self) {
        use super::keys::*;

        self.register(Command::new(
            "TYPE",
            1,
            1,
            CommandFlags::readonly(),
            cmd_type,
            "Determine the type stored at key",
        ));
    }

    fn register_list_commands(&mut self) {
        use super::lists::*;

        self.register(Command::new(
            "LPUSH",
            2,
            -1,
            CommandFlags::write(),
            cmd_lpush,
            "Prepend one or multiple elements to a list",
        ));
        self.register(Command::new(
            "RPUSH",
            2,
            -1,
            CommandFlags::write(),
            cmd_rpush,
            "Append one or multiple elements to a list",
        ));
        self.register(Command::new(
            "LPOP",
            1,
            2,
            CommandFlags::write(),
            cmd_lpop,
            "Remove and get the first elements in a list",
        ));
        self.register(Command::new(
            "LRANGE",
            3,
            3,
            CommandFlags::READONLY,
            cmd_lrange,
            "Get a range of elements from a list",
        ));
        self.register(Command::new(
            "LLEN",
            1,
            1,
            CommandFlags::readonly(),
            cmd_llen,
            "Get the length of a list",
        ));
    }

    fn register_blocking_commands(&mut self) {
        use super::blocking::*;

        self.register(Command::new(
            "BLPOP",
            2,
            -1,
            CommandFlags::blocking(),
            cmd_blpop,
            "Remove and get the first element in a list, or block until one is available",
        ));
    }

    fn register_stream_commands(&mut self) {
        use super::streams::*;

        self.register(Command::new(
            "XADD",
            4,
            -1,
            CommandFlags::write(),
            cmd_xadd,
            "Append a new entry to a stream",
        ));
        self.register(Command::new(
            "XRANGE",
            3,
            5,
            CommandFlags::READONLY,
            cmd_xrange,
            "Return a range of elements in a stream",
        ));
        self.register(Command::new(
            "XREAD",
            3,
            -1,
            CommandFlags::READONLY.union(CommandFlags::BLOCKING),
            cmd_xread,
            "Read entries from one or more streams, optionally blocking",
        ));
    }

    fn register_transaction_commands(&mut self) {
        use super::transactions::*;

        self.register(Command::new(
            "MULTI",
            0,
            0,
            CommandFlags::FAST,
            cmd_multi,
            "Mark the start of a transaction block",
        ));
        self.register(Command::new(
            "EXEC",
            0,
            0,
            CommandFlags::empty(),
            cmd_exec,
            "Execute all commands issued after MULTI",
        ));
        self.register(Command::new(
            "DISCARD",
            0,
            0,
            CommandFlags::FAST,
            cmd_discard,
            "Discard all commands issued after MULTI",
        ));
    }

    fn register_server_commands(&mut self) {
        use super::server_cmds::*;

        self.register(Command::new(
            "INFO",
            0,
            -1,
            CommandFlags::admin(),
            cmd_info,
            "Get information and statistics about the server",
        ));
        self.register(Command::new(
            "REPLCONF",
            1,
            -1,
            CommandFlags::admin(),
            cmd_replconf,
            "Configure a replication link",
        ));
        self.register(Command::new(
            "PSYNC",
            2,
            2,
            CommandFlags::admin(),
            cmd_psync,
            "Synchronize a replica with this primary",
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Frame;

    fn parsed(parts: &[&str]) -> ParsedCommand {
        ParsedCommand::from_frame(Frame::command(parts.iter().map(|s| s.to_string()))).unwrap()
    }

    #[test]
    fn test_registry_has_commands() {
        let registry = CommandRegistry::new();
        assert!(registry.get("GET").is_some());
        assert!(registry.get("XREAD").is_some());
        assert!(registry.get("NOSUCH").is_none());
        assert_eq!(registry.len(), registry.commands().count());
    }

    #[test]
    fn test_write_flags() {
        let registry = CommandRegistry::new();
        assert!(registry.get("SET").unwrap().flags.is_write());
        assert!(registry.get("XADD").unwrap().flags.is_write());
        assert!(!registry.get("GET").unwrap().flags.is_write());
        // Blocking pops propagate what they consume, not the request.
        assert!(!registry.get("BLPOP").unwrap().flags.is_write());
    }

    #[test]
    fn test_resolve_checks_arity() {
        let registry = CommandRegistry::new();
        assert!(registry.resolve(&parsed(&["GET", "k"])).is_ok());
        assert_eq!(
            registry.resolve(&parsed(&["GET"])).unwrap_err(),
            CommandError::WrongArity {
                command: "get".to_string()
            }
        );
        assert_eq!(
            registry.resolve(&parsed(&["LPOP", "k", "1", "2"])).unwrap_err(),
            CommandError::WrongArity {
                command: "lpop".to_string()
            }
        );
        assert_eq!(
            registry.resolve(&parsed(&["FOO"])).unwrap_err(),
            CommandError::UnknownCommand("foo".to_string())
        );
    }
}
