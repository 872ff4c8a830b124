//! Primary/replica replication.
//!
//! ## Protocol Flow
//!
//! 1. Replica sends PING, then REPLCONF listening-port and REPLCONF capa
//! 2. Replica sends PSYNC ? -1
//! 3. Primary answers FULLRESYNC and transfers an (empty) snapshot
//! 4. Primary streams every executed write command to the replica
//!
//! On the primary side the manager only records which connections are
//! replicas and buffers the bytes to fan out; the reactor copies the buffered
//! bytes into each replica's output queue after every command.

use super::state::ClientId;
use crate::error::{Error, Result};
use crate::protocol::{Frame, RespParser};
use bytes::{Bytes, BytesMut};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// An empty snapshot, sent after FULLRESYNC.
pub const EMPTY_RDB: &[u8] = b"REDIS0011\xfa\x09redis-ver\x057.2.0\xfa\x0aredis-bits\xc0@\xfa\x05ctime\xc2m\x08\xbce\xfa\x08used-mem\xc2\xb0\xc4\x10\x00\xfa\x08aof-base\xc0\x00\xff\xf0n;\xfe\xc0\xffZ\xa2";

/// Length of a replication id.
const REPL_ID_LEN: usize = 40;

/// Replication role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// This server accepts writes and feeds replicas
    Primary,
    /// This server follows a primary
    Replica { host: String, port: u16 },
}

/// Replication state owned by the reactor.
#[derive(Debug)]
pub struct ReplicationManager {
    role: Role,
    repl_id: String,
    /// Bytes fanned out so far
    offset: u64,
    /// Bytes applied from our primary (replica role)
    processed: u64,
    replicas: Vec<ClientId>,
    outbox: Vec<Bytes>,
}

impl ReplicationManager {
    fn with_role(role: Role) -> Self {
        Self {
            role,
            repl_id: generate_repl_id(),
            offset: 0,
            processed: 0,
            replicas: Vec::new(),
            outbox: Vec::new(),
        }
    }

    /// A manager for a standalone primary.
    pub fn primary() -> Self {
        Self::with_role(Role::Primary)
    }

    /// A manager for a replica of `host:port`.
    pub fn replica_of(host: impl Into<String>, port: u16) -> Self {
        Self::with_role(Role::Replica {
            host: host.into(),
            port,
        })
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    #[inline]
    pub fn is_replica(&self) -> bool {
        matches!(self.role, Role::Replica { .. })
    }

    pub fn repl_id(&self) -> &str {
        &self.repl_id
    }

    /// Replication offset: bytes sent to replicas on a primary, bytes
    /// applied from the primary on a replica.
    pub fn offset(&self) -> u64 {
        if self.is_replica() {
            self.processed
        } else {
            self.offset
        }
    }

    /// Register a connection that completed PSYNC.
    pub fn register_replica(&mut self, client: ClientId) {
        if !self.replicas.contains(&client) {
            self.replicas.push(client);
            info!(client, "replica attached");
        }
    }

    /// Forget a replica connection. Returns false if it was not one.
    pub fn unregister_replica(&mut self, client: ClientId) -> bool {
        let before = self.replicas.len();
        self.replicas.retain(|c| *c != client);
        before != self.replicas.len()
    }

    pub fn replicas(&self) -> &[ClientId] {
        &self.replicas
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    /// Queue an encoded command for every replica. A replica never feeds
    /// anyone, and nothing is buffered while no replica is attached.
    pub fn propagate(&mut self, command: &[u8]) {
        if self.is_replica() || self.replicas.is_empty() {
            return;
        }
        self.offset += command.len() as u64;
        self.outbox.push(Bytes::copy_from_slice(command));
    }

    /// Drain the bytes waiting to be fanned out, oldest first.
    pub fn take_outbox(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.outbox)
    }

    /// Count bytes applied from the primary link.
    pub fn record_processed(&mut self, bytes: usize) {
        self.processed += bytes as u64;
    }

    /// The PSYNC answer: `+FULLRESYNC <id> <offset>` and the snapshot.
    pub fn full_resync(&self) -> (Frame, Bytes) {
        let header = Frame::simple(format!("FULLRESYNC {} {}", self.repl_id, self.offset));
        (header, Bytes::from_static(EMPTY_RDB))
    }

    /// The `# Replication` INFO section.
    pub fn info(&self) -> String {
        let mut out = String::from("# Replication\r\n");
        match &self.role {
            Role::Primary => {
                let _ = write!(out, "role:master\r\nconnected_slaves:{}\r\n", self.replicas.len());
            }
            Role::Replica { host, port } => {
                let _ = write!(
                    out,
                    "role:slave\r\nmaster_host:{host}\r\nmaster_port:{port}\r\nmaster_link_status:up\r\n"
                );
            }
        }
        let _ = write!(
            out,
            "master_replid:{}\r\nmaster_repl_offset:{}\r\n",
            self.repl_id,
            self.offset()
        );
        out
    }
}

/// Generate a random 40-character alphanumeric replication id.
fn generate_repl_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REPL_ID_LEN)
        .map(char::from)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Replica side
// ─────────────────────────────────────────────────────────────────────────────

/// A connection to our primary that completed the handshake.
#[derive(Debug)]
pub struct PrimaryLink {
    pub stream: TcpStream,
    pub addr: SocketAddr,
    /// Bytes received after the snapshot; the start of the command stream
    pub leftover: BytesMut,
    pub repl_id: String,
}

/// Connect to `host:port` and run the replica handshake.
///
/// Any unexpected reply is an error; the caller must not start serving with
/// an unknown primary state.
pub async fn handshake(
    host: &str,
    port: u16,
    listening_port: u16,
    timeout: Duration,
) -> Result<PrimaryLink> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| Error::Replication(format!("timed out connecting to {host}:{port}")))??;
    let addr = stream.peer_addr()?;
    info!(%addr, "connected to primary, starting handshake");

    let mut hs = Handshake {
        stream,
        parser: RespParser::new(),
        timeout,
    };

    hs.send(&["PING"]).await?;
    hs.expect_simple("PONG").await?;

    let port = listening_port.to_string();
    hs.send(&["REPLCONF", "listening-port", &port]).await?;
    hs.expect_simple("OK").await?;

    hs.send(&["REPLCONF", "capa", "psync2"]).await?;
    hs.expect_simple("OK").await?;

    hs.send(&["PSYNC", "?", "-1"]).await?;
    let reply = hs.read_frame().await?;
    let repl_id = match reply.as_str().and_then(|s| s.strip_prefix("FULLRESYNC ")) {
        Some(rest) if !reply.is_error() => rest
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string(),
        _ => return Err(unexpected("FULLRESYNC", &reply)),
    };

    let snapshot = hs.read_snapshot().await?;
    debug!(bytes = snapshot.len(), "discarded snapshot from primary");
    info!(%addr, %repl_id, "handshake with primary complete");

    Ok(PrimaryLink {
        leftover: hs.parser.take_remaining(),
        stream: hs.stream,
        addr,
        repl_id,
    })
}

struct Handshake {
    stream: TcpStream,
    parser: RespParser,
    timeout: Duration,
}

impl Handshake {
    async fn send(&mut self, parts: &[&str]) -> Result<()> {
        let frame = Frame::command(parts.iter().map(|p| p.to_string()));
        self.stream.write_all(&frame.encode()).await?;
        Ok(())
    }

    async fn read_more(&mut self) -> Result<()> {
        let mut buf = [0u8; 4096];
        let n = tokio::time::timeout(self.timeout, self.stream.read(&mut buf))
            .await
            .map_err(|_| Error::Replication("timed out waiting for primary".to_string()))??;
        if n == 0 {
            return Err(Error::Replication(
                "primary closed the connection during handshake".to_string(),
            ));
        }
        self.parser.extend(&buf[..n]);
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.parser.parse()? {
                return Ok(frame);
            }
            self.read_more().await?;
        }
    }

    async fn read_snapshot(&mut self) -> Result<Bytes> {
        loop {
            if let Some(payload) = self.parser.parse_snapshot()? {
                return Ok(payload);
            }
            self.read_more().await?;
        }
    }

    async fn expect_simple(&mut self, expected: &str) -> Result<()> {
        let reply = self.read_frame().await?;
        match &reply {
            Frame::Simple(s) if s.eq_ignore_ascii_case(expected) => Ok(()),
            _ => Err(unexpected(expected, &reply)),
        }
    }
}

fn unexpected(expected: &str, got: &Frame) -> Error {
    Error::Replication(format!("expected {expected} from primary, got {got:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repl_id_shape() {
        let manager = ReplicationManager::primary();
        assert_eq!(manager.repl_id().len(), REPL_ID_LEN);
        assert!(manager.repl_id().chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(manager.repl_id(), ReplicationManager::primary().repl_id());
    }

    #[test]
    fn test_role() {
        assert!(!ReplicationManager::primary().is_replica());
        let replica = ReplicationManager::replica_of("localhost", 6379);
        assert_eq!(
            replica.role(),
            &Role::Replica {
                host: "localhost".to_string(),
                port: 6379
            }
        );
    }

    #[test]
    fn test_propagate_without_replicas_is_dropped() {
        let mut manager = ReplicationManager::primary();
        manager.propagate(b"*1\r\n$4\r\nPING\r\n");
        assert!(manager.take_outbox().is_empty());
        assert_eq!(manager.offset(), 0);
    }

    #[test]
    fn test_propagate_advances_offset() {
        let mut manager = ReplicationManager::primary();
        manager.register_replica(3);
        manager.register_replica(3);
        assert_eq!(manager.replica_count(), 1);

        manager.propagate(b"abc");
        manager.propagate(b"de");
        assert_eq!(manager.offset(), 5);
        assert_eq!(
            manager.take_outbox(),
            vec![Bytes::from_static(b"abc"), Bytes::from_static(b"de")]
        );
        assert!(manager.take_outbox().is_empty());

        assert!(manager.unregister_replica(3));
        assert!(!manager.unregister_replica(3));
    }

    #[test]
    fn test_replica_never_propagates() {
        let mut manager = ReplicationManager::replica_of("h", 1);
        manager.register_replica(3);
        manager.propagate(b"abc");
        assert!(manager.take_outbox().is_empty());
        manager.record_processed(31);
        assert_eq!(manager.offset(), 31);
    }

    #[test]
    fn test_full_resync() {
        let manager = ReplicationManager::primary();
        let (header, payload) = manager.full_resync();
        assert_eq!(
            header,
            Frame::simple(format!("FULLRESYNC {} 0", manager.repl_id()))
        );
        assert_eq!(payload.len(), 88);
        assert!(payload.starts_with(b"REDIS0011"));
    }

    #[test]
    fn test_info() {
        let manager = ReplicationManager::primary();
        let info = manager.info();
        assert!(info.starts_with("# Replication\r\n"));
        assert!(info.contains("role:master\r\n"));
        assert!(info.contains("connected_slaves:0\r\n"));
        assert!(info.contains("master_repl_offset:0\r\n"));

        let info = ReplicationManager::replica_of("10.0.0.1", 7000).info();
        assert!(info.contains("role:slave\r\n"));
        assert!(info.contains("master_host:10.0.0.1\r\n"));
        assert!(info.contains("master_port:7000\r\n"));
    }
}
