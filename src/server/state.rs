//! Client connection state.
//!
//! One `ClientState` exists per accepted socket (and one for the link to our
//! primary when running as a replica). It holds undecoded input, replies that
//! still need serializing, bytes that still need writing, and an open
//! transaction if any. Whether the client is blocked is tracked by the
//! blocking coordinator, not here.

use crate::commands::ParsedCommand;
use crate::error::ProtocolError;
use crate::protocol::{Frame, RespParser};
use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;
use std::net::SocketAddr;

/// Stable per-connection handle used as the key in every registry.
pub type ClientId = u64;

/// What sits on the other end of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    /// Ordinary client
    Normal,
    /// A replica that completed PSYNC; receives the write stream
    Replica,
    /// Our own primary; its commands are applied without replies
    Primary,
}

/// A command queued inside MULTI, kept with the bytes it arrived as.
#[derive(Debug, Clone)]
pub struct QueuedCommand {
    pub command: ParsedCommand,
    pub raw: Bytes,
}

/// An open MULTI block.
#[derive(Debug, Default)]
pub struct Transaction {
    commands: Vec<QueuedCommand>,
    aborted: bool,
}

impl Transaction {
    /// Commands queued so far, in order.
    pub fn commands(&self) -> &[QueuedCommand] {
        &self.commands
    }

    /// True if a command failed validation while queueing.
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn into_commands(self) -> Vec<QueuedCommand> {
        self.commands
    }
}

/// Client connection state.
#[derive(Debug)]
pub struct ClientState {
    id: ClientId,
    addr: Option<SocketAddr>,
    kind: ClientKind,
    input: RespParser,
    replies: VecDeque<Frame>,
    output: BytesMut,
    transaction: Option<Transaction>,
    close_after_flush: bool,
}

impl ClientState {
    pub fn new(id: ClientId, addr: Option<SocketAddr>, kind: ClientKind) -> Self {
        Self {
            id,
            addr,
            kind,
            input: RespParser::new(),
            replies: VecDeque::new(),
            output: BytesMut::new(),
            transaction: None,
            close_after_flush: false,
        }
    }

    #[inline]
    pub fn id(&self) -> ClientId {
        self.id
    }

    #[inline]
    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    #[inline]
    pub fn kind(&self) -> ClientKind {
        self.kind
    }

    #[inline]
    pub fn set_kind(&mut self, kind: ClientKind) {
        self.kind = kind;
    }

    #[inline]
    pub fn is_primary_link(&self) -> bool {
        self.kind == ClientKind::Primary
    }

    // ─────────────────────────────────────────────────────────────────────
    // Input
    // ─────────────────────────────────────────────────────────────────────

    /// Append bytes read from the socket.
    pub fn feed(&mut self, data: &[u8]) {
        self.input.extend(data);
    }

    /// Decode the next complete command together with its raw bytes.
    pub fn next_command(&mut self) -> Result<Option<(Frame, Bytes)>, ProtocolError> {
        self.input.parse_with_raw()
    }

    pub fn has_pending_input(&self) -> bool {
        !self.input.is_empty()
    }

    /// Bytes read but not yet decoded.
    pub fn pending_input_len(&self) -> usize {
        self.input.len()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Output
    // ─────────────────────────────────────────────────────────────────────

    /// Queue a reply value; it is serialized lazily before writing.
    pub fn queue_reply(&mut self, frame: Frame) {
        self.replies.push_back(frame);
    }

    /// Queue already-encoded bytes. Pending replies are serialized first so
    /// the two queues never reorder.
    pub fn queue_raw(&mut self, bytes: &[u8]) {
        self.serialize_replies();
        self.output.extend_from_slice(bytes);
    }

    /// Move every queued reply into the byte queue.
    pub fn serialize_replies(&mut self) {
        while let Some(frame) = self.replies.pop_front() {
            frame.serialize(&mut self.output);
        }
    }

    pub fn has_pending_output(&self) -> bool {
        !self.replies.is_empty() || !self.output.is_empty()
    }

    /// Bytes waiting to be written. Call `serialize_replies` first.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Drop the first `n` bytes after a (possibly partial) write.
    pub fn advance_output(&mut self, n: usize) {
        self.output.advance(n);
    }

    /// Mark the connection to be closed once its output drains.
    pub fn close_after_flush(&mut self) {
        self.close_after_flush = true;
    }

    /// True once the connection was marked for closing; no more input is
    /// processed.
    pub fn is_closing(&self) -> bool {
        self.close_after_flush
    }

    pub fn should_close(&self) -> bool {
        self.close_after_flush && !self.has_pending_output()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Transactions
    // ─────────────────────────────────────────────────────────────────────

    #[inline]
    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Open a transaction. Returns false if one is already open.
    pub fn start_transaction(&mut self) -> bool {
        if self.transaction.is_some() {
            return false;
        }
        self.transaction = Some(Transaction::default());
        true
    }

    /// Append a command to the open transaction.
    pub fn queue_command(&mut self, command: ParsedCommand, raw: Bytes) {
        if let Some(tx) = self.transaction.as_mut() {
            tx.commands.push(QueuedCommand { command, raw });
        }
    }

    /// Flag the open transaction so EXEC refuses to run it.
    pub fn abort_transaction(&mut self) {
        if let Some(tx) = self.transaction.as_mut() {
            tx.aborted = true;
        }
    }

    /// Hand back the transaction and return to non-transactional mode.
    pub fn take_transaction(&mut self) -> Option<Transaction> {
        self.transaction.take()
    }

    /// Drop the open transaction. Returns false if there was none.
    pub fn discard_transaction(&mut self) -> bool {
        self.transaction.take().is_some()
    }
}
