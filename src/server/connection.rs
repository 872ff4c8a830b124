//! Socket plumbing for individual clients.
//!
//! Each socket is split in two. A reader task moves bytes from the socket
//! into the reactor's bounded event channel and never touches state; the
//! reactor keeps the write half and writes with `try_write`, so it never
//! waits on a slow peer. Whatever the kernel does not accept stays queued in
//! the client's output buffer, and a watcher task reports when the socket
//! can take more.

use super::state::{ClientId, ClientKind, ClientState};
use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Buffer size for reading from socket.
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Readiness reported by a reader task.
#[derive(Debug)]
pub(crate) enum Event {
    /// Bytes arrived
    Data(ClientId, Bytes),
    /// The peer hung up (`None`) or the read failed
    Closed(ClientId, Option<io::Error>),
    /// A socket with queued output can be written again
    Writable(ClientId),
}

/// A connection to a single peer.
#[derive(Debug)]
pub(crate) struct Connection {
    pub state: ClientState,
    writer: Arc<OwnedWriteHalf>,
    reader: JoinHandle<()>,
    /// Armed while output is stuck behind a full socket
    write_watch: Option<JoinHandle<()>>,
    events: Sender<Event>,
}

impl Connection {
    /// Split `stream` and start its reader task.
    pub fn spawn(
        id: ClientId,
        stream: TcpStream,
        addr: SocketAddr,
        kind: ClientKind,
        events: Sender<Event>,
    ) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(client = id, error = %e, "failed to set TCP_NODELAY");
        }
        let (read_half, writer) = stream.into_split();
        let reader = tokio::spawn(read_loop(id, read_half, events.clone()));
        Self {
            state: ClientState::new(id, Some(addr), kind),
            writer: Arc::new(writer),
            reader,
            write_watch: None,
            events,
        }
    }

    /// Write as much queued output as the socket takes without blocking.
    /// If some is left over, arm a watcher that sends [`Event::Writable`]
    /// once the socket drains.
    pub fn flush(&mut self) -> io::Result<()> {
        self.write_pending()?;
        if self.state.has_pending_output() && self.write_watch.is_none() {
            let id = self.state.id();
            let writer = Arc::clone(&self.writer);
            let events = self.events.clone();
            trace!(client = id, "waiting for socket to drain");
            self.write_watch = Some(tokio::spawn(async move {
                if writer.writable().await.is_ok() {
                    let _ = events.send(Event::Writable(id)).await;
                }
            }));
        }
        Ok(())
    }

    /// The watcher fired; the next flush may arm a new one.
    pub fn writable(&mut self) {
        self.write_watch = None;
    }

    pub fn is_awaiting_writable(&self) -> bool {
        self.write_watch.is_some()
    }

    fn write_pending(&mut self) -> io::Result<()> {
        self.state.serialize_replies();
        while !self.state.output().is_empty() {
            match self.writer.try_write(self.state.output()) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    trace!(client = self.state.id(), bytes = n, "wrote");
                    self.state.advance_output(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Stop the reader and watcher tasks. The write half closes once the
    /// last handle to it is dropped.
    pub fn shutdown(self) {
        self.reader.abort();
        if let Some(watch) = self.write_watch {
            watch.abort();
        }
    }
}

async fn read_loop(id: ClientId, mut reader: OwnedReadHalf, events: Sender<Event>) {
    let mut read_buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let event = match reader.read(&mut read_buf).await {
            Ok(0) => Event::Closed(id, None),
            Ok(n) => Event::Data(id, Bytes::copy_from_slice(&read_buf[..n])),
            Err(e) => Event::Closed(id, Some(e)),
        };
        let last = matches!(event, Event::Closed(..));
        if events.send(event).await.is_err() || last {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    async fn socket_pair() -> (TcpStream, SocketAddr, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peer = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (ours, addr) = listener.accept().await.unwrap();
        (ours, addr, peer)
    }

    #[tokio::test]
    async fn test_stalled_peer_waits_for_writable() {
        let (tx, mut rx) = mpsc::channel(16);
        let (stream, addr, mut peer) = socket_pair().await;
        let mut conn = Connection::spawn(7, stream, addr, ClientKind::Normal, tx);

        // More than the kernel buffers on both ends will hold.
        let total = 32 * 1024 * 1024;
        conn.state.queue_raw(&vec![b'x'; total]);
        conn.flush().unwrap();
        assert!(conn.state.has_pending_output());
        assert!(conn.is_awaiting_writable());

        // A second flush does not arm another watcher.
        conn.flush().unwrap();
        assert!(conn.is_awaiting_writable());

        let mut sink = vec![0u8; 64 * 1024];
        let mut received = 0;
        let event = loop {
            tokio::select! {
                event = rx.recv() => break event,
                n = peer.read(&mut sink) => received += n.unwrap(),
            }
        };
        assert!(matches!(event, Some(Event::Writable(7))));
        assert!(received > 0);

        conn.writable();
        assert!(!conn.is_awaiting_writable());
        conn.shutdown();
    }

    #[tokio::test]
    async fn test_small_reply_needs_no_watcher() {
        let (tx, _rx) = mpsc::channel(16);
        let (stream, addr, mut peer) = socket_pair().await;
        let mut conn = Connection::spawn(1, stream, addr, ClientKind::Normal, tx);

        conn.state.queue_raw(b"+OK\r\n");
        conn.flush().unwrap();
        assert!(!conn.state.has_pending_output());
        assert!(!conn.is_awaiting_writable());

        let mut buf = [0u8; 5];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"+OK\r\n");
        conn.shutdown();
    }
}
