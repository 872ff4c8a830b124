//! Rivulet server implementation.
//!
//! This module provides the reactor, connection handling, blocking
//! coordination, replication and configuration.
//!
//! All state lives in one reactor task. Each iteration waits for the first
//! of: a shutdown request, a new connection, socket readiness from a reader
//! task, or the timer. It then handles what arrived, flushes output, and
//! times out expired blocked clients. The timer never sleeps past the
//! earliest blocked-client deadline.

pub mod blocking;
pub mod config;
mod connection;
pub mod replication;
mod state;

pub use blocking::BlockingCoordinator;
pub use config::{Config, ConfigError, LogLevel};
pub use replication::{ReplicationManager, Role};
pub use state::{ClientId, ClientKind, ClientState};

use crate::commands::{CommandExecutor, ExecContext, ParsedCommand, Reply};
use crate::protocol::Frame;
use crate::storage::{now_ms, Database};
use crate::Result;
use blocking::Wakeup;
use bytes::{BufMut, Bytes, BytesMut};
use connection::{Connection, Event};
use replication::PrimaryLink;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::Notify;
use tracing::{debug, error, info, trace, warn};

/// How long the replica handshake may wait on each step.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Reader events that may queue up before reader tasks wait on the reactor.
const EVENT_QUEUE_CAPACITY: usize = 1024;

/// Sent to connections refused because of `maxclients`.
const MAX_CLIENTS_ERROR: &[u8] = b"-ERR max number of clients reached\r\n";

/// The server: a bound listener plus, on a replica, the handshaken link to
/// its primary.
#[derive(Debug)]
pub struct Server {
    config: Config,
    listener: TcpListener,
    primary: Option<PrimaryLink>,
    shutdown: Arc<Notify>,
}

impl Server {
    /// Bind the listener and, when configured as a replica, complete the
    /// handshake with the primary.
    pub async fn bind(config: Config) -> Result<Self> {
        let listener = TcpListener::bind(config.listen_addr()).await?;
        let local = listener.local_addr()?;
        info!(addr = %local, "listening");

        let primary = match &config.replicaof {
            Some((host, port)) => {
                Some(replication::handshake(host, *port, local.port(), HANDSHAKE_TIMEOUT).await?)
            }
            None => None,
        };

        Ok(Self {
            config,
            listener,
            primary,
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle that stops `run` when notified.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the reactor until shutdown is requested.
    pub async fn run(self) -> Result<()> {
        let Server {
            config,
            listener,
            primary,
            shutdown,
        } = self;

        let (events_tx, mut events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let mut reactor = Reactor::new(config, events_tx);
        if let Some(link) = primary {
            reactor.attach_primary(link);
        }
        info!("Ready to accept connections");

        loop {
            let wait = reactor.wait_duration();
            let wake = tokio::select! {
                _ = shutdown.notified() => Wake::Shutdown,
                accepted = listener.accept() => Wake::Accept(accepted),
                event = events_rx.recv() => Wake::Event(event),
                _ = tokio::time::sleep(wait) => Wake::Timer,
            };

            match wake {
                Wake::Shutdown => break,
                Wake::Accept(Ok((stream, addr))) => reactor.accept(stream, addr),
                Wake::Accept(Err(e)) => warn!(error = %e, "accept failed"),
                Wake::Event(Some(event)) => {
                    reactor.handle_event(event);
                    drain_events(&mut reactor, &mut events_rx);
                }
                Wake::Event(None) | Wake::Timer => {}
            }

            reactor.after_iteration();
        }

        info!(clients = reactor.clients.len(), "shutting down");
        reactor.close_all();
        Ok(())
    }
}

/// Handle every event that is already waiting without yielding.
fn drain_events(reactor: &mut Reactor, events: &mut Receiver<Event>) {
    while let Ok(event) = events.try_recv() {
        reactor.handle_event(event);
    }
}

/// What woke the reactor.
enum Wake {
    Shutdown,
    Accept(io::Result<(TcpStream, SocketAddr)>),
    Event(Option<Event>),
    Timer,
}

/// Everything the reactor owns.
struct Reactor {
    config: Config,
    db: Database,
    blocking: BlockingCoordinator,
    replication: ReplicationManager,
    executor: CommandExecutor,
    clients: HashMap<ClientId, Connection>,
    next_id: ClientId,
    events: Sender<Event>,
    /// Clients whose buffered input should be processed
    ready: VecDeque<ClientId>,
}

impl Reactor {
    fn new(config: Config, events: Sender<Event>) -> Self {
        let replication = match &config.replicaof {
            Some((host, port)) => ReplicationManager::replica_of(host.clone(), *port),
            None => ReplicationManager::primary(),
        };
        Self {
            config,
            db: Database::new(),
            blocking: BlockingCoordinator::new(),
            replication,
            executor: CommandExecutor::new(),
            clients: HashMap::new(),
            next_id: 1,
            events,
            ready: VecDeque::new(),
        }
    }

    fn allocate_id(&mut self) -> ClientId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // ─────────────────────────────────────────────────────────────────────
    // Connections
    // ─────────────────────────────────────────────────────────────────────

    fn accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        if self.clients.len() >= self.config.max_clients {
            warn!(%addr, max = self.config.max_clients, "rejecting connection, too many clients");
            let _ = stream.try_write(MAX_CLIENTS_ERROR);
            return;
        }
        let id = self.allocate_id();
        let conn = Connection::spawn(id, stream, addr, ClientKind::Normal, self.events.clone());
        self.clients.insert(id, conn);
        debug!(client = id, %addr, "accepted connection");
    }

    /// Register the link to our primary. Bytes that arrived together with
    /// the snapshot are the first propagated commands.
    fn attach_primary(&mut self, link: PrimaryLink) {
        let id = self.allocate_id();
        let mut conn = Connection::spawn(
            id,
            link.stream,
            link.addr,
            ClientKind::Primary,
            self.events.clone(),
        );
        conn.state.feed(&link.leftover);
        self.clients.insert(id, conn);
        info!(client = id, addr = %link.addr, repl_id = %link.repl_id, "following primary");

        self.ready.push_back(id);
        self.process_ready();
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Data(id, bytes) => {
                let Some(conn) = self.clients.get_mut(&id) else {
                    return;
                };
                trace!(client = id, bytes = bytes.len(), "read");
                conn.state.feed(&bytes);
                if conn.state.pending_input_len() > self.config.query_buffer_limit {
                    warn!(
                        client = id,
                        buffered = conn.state.pending_input_len(),
                        limit = self.config.query_buffer_limit,
                        "query buffer limit exceeded, closing connection"
                    );
                    self.close_client(id);
                    return;
                }
                self.ready.push_back(id);
                self.process_ready();
            }
            Event::Writable(id) => {
                if let Some(conn) = self.clients.get_mut(&id) {
                    conn.writable();
                }
            }
            Event::Closed(id, None) => {
                debug!(client = id, "connection closed by peer");
                self.close_client(id);
            }
            Event::Closed(id, Some(e)) => {
                warn!(client = id, error = %e, "read failed");
                self.close_client(id);
            }
        }
    }

    fn close_client(&mut self, id: ClientId) {
        let Some(conn) = self.clients.remove(&id) else {
            return;
        };
        self.blocking.remove_blocked_client_from_all_keys(id);
        if self.replication.unregister_replica(id) {
            info!(client = id, "replica detached");
        }
        if conn.state.is_primary_link() {
            error!(client = id, "lost connection to primary");
        }
        conn.shutdown();
    }

    fn close_all(&mut self) {
        self.flush_all();
        let ids: Vec<ClientId> = self.clients.keys().copied().collect();
        for id in ids {
            self.close_client(id);
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Command processing
    // ─────────────────────────────────────────────────────────────────────

    /// Drain the ready worklist. Waking a client pushes it back here, so a
    /// chain of wakeups is handled iteratively.
    fn process_ready(&mut self) {
        while let Some(id) = self.ready.pop_front() {
            self.process_input(id);
        }
    }

    /// Execute buffered commands of `id` until its input runs dry, it
    /// blocks, or it is closing.
    fn process_input(&mut self, id: ClientId) {
        loop {
            if self.blocking.is_blocked(id) {
                return;
            }
            let Some(conn) = self.clients.get_mut(&id) else {
                return;
            };
            if conn.state.is_closing() {
                return;
            }

            let (frame, raw) = match conn.state.next_command() {
                Ok(Some(command)) => command,
                Ok(None) => return,
                Err(e) => {
                    warn!(client = id, error = %e, "protocol error, closing connection");
                    if !conn.state.is_primary_link() {
                        conn.state.queue_reply(Frame::error(format!("ERR Protocol error: {e}")));
                    }
                    conn.state.close_after_flush();
                    return;
                }
            };
            self.dispatch(id, frame, raw);
        }
    }

    /// Run one decoded command for `id` and route everything it produced.
    fn dispatch(&mut self, id: ClientId, frame: Frame, raw: Bytes) {
        let Some(conn) = self.clients.get_mut(&id) else {
            return;
        };
        let from_primary = conn.state.is_primary_link();

        // Every byte from the primary counts toward the acknowledged offset,
        // rejected frames included. A command is counted after it runs so
        // GETACK reports the offset before itself.
        let cmd = match ParsedCommand::from_frame(frame) {
            Ok(cmd) => cmd,
            Err(e) => {
                if from_primary {
                    self.replication.record_processed(raw.len());
                } else {
                    conn.state.queue_reply(Frame::error(e.to_string()));
                }
                return;
            }
        };

        let raw_len = raw.len();

        let (reply, wakeups) = {
            let mut ctx = ExecContext::new(
                &mut self.db,
                &mut self.blocking,
                &mut self.replication,
                &mut conn.state,
                now_ms(),
            );
            let reply = self.executor.execute(cmd, raw, &mut ctx);
            (reply, ctx.take_wakeups())
        };

        match reply {
            Reply::Frame(frame) => conn.state.queue_reply(frame),
            Reply::Snapshot { header, payload } => {
                conn.state.queue_reply(header);
                conn.state.queue_raw(&snapshot_transfer(&payload));
            }
            Reply::Blocked => debug!(client = id, "client blocked"),
            Reply::Silent => {}
        }
        if from_primary {
            self.replication.record_processed(raw_len);
        }

        self.deliver(wakeups);
        self.fan_out();
    }

    /// Queue the replies of woken clients and schedule their pending input.
    fn deliver(&mut self, wakeups: Vec<Wakeup>) {
        for wakeup in wakeups {
            if let Some(conn) = self.clients.get_mut(&wakeup.client) {
                debug!(client = wakeup.client, "client unblocked");
                conn.state.queue_reply(wakeup.reply);
                self.ready.push_back(wakeup.client);
            }
        }
    }

    /// Copy propagated commands into every replica's output queue.
    fn fan_out(&mut self) {
        let outbox = self.replication.take_outbox();
        if outbox.is_empty() {
            return;
        }
        for replica in self.replication.replicas() {
            if let Some(conn) = self.clients.get_mut(replica) {
                for command in &outbox {
                    conn.state.queue_raw(command);
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Timer and output
    // ─────────────────────────────────────────────────────────────────────

    /// Flush, time out expired blocked clients, and flush what that produced.
    fn after_iteration(&mut self) {
        self.flush_all();

        let expired = self.blocking.scan_and_expire(now_ms());
        if !expired.is_empty() {
            self.deliver(expired);
            self.process_ready();
            self.flush_all();
        }
    }

    fn flush_all(&mut self) {
        let mut dead = Vec::new();
        for (id, conn) in &mut self.clients {
            if let Err(e) = conn.flush() {
                warn!(client = id, error = %e, "write failed");
                dead.push(*id);
            } else if conn.state.should_close() {
                dead.push(*id);
            }
        }
        for id in dead {
            self.close_client(id);
        }
    }

    /// How long the next wait may last. Output stuck behind a full socket
    /// does not shorten it; the connection's watcher wakes the reactor.
    fn wait_duration(&self) -> Duration {
        let tick = Duration::from_millis(1000 / u64::from(self.config.hz.max(1)));
        match self.blocking.next_deadline() {
            Some(deadline) => {
                let until = u64::try_from(deadline - now_ms()).unwrap_or(0);
                tick.min(Duration::from_millis(until))
            }
            None => tick,
        }
    }
}

/// `$<len>\r\n<payload>` with no trailing CRLF.
fn snapshot_transfer(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + 16);
    buf.put_slice(format!("${}\r\n", payload.len()).as_bytes());
    buf.put_slice(payload);
    buf.freeze()
}
