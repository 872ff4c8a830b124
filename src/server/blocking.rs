//! Blocked-client coordinator.
//!
//! Clients waiting in `BLPOP` or `XREAD BLOCK` are indexed per key in FIFO
//! queues. Mutating commands call [`BlockingCoordinator::notify_key_changed`]
//! which retries every waiter on that key in arrival order; the reactor calls
//! [`BlockingCoordinator::scan_and_expire`] once per iteration to time out
//! the rest. A client leaves every queue at once, so it gets exactly one
//! reply per blocking command.

use super::state::ClientId;
use crate::protocol::Frame;
use crate::storage::Database;
use crate::types::{StreamId, Timestamp};
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// What a blocked client is waiting for, with the parameters needed to
/// retry it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitingFor {
    /// BLPOP: the first element pushed to any of `keys`
    ListPop { keys: Vec<Bytes> },
    /// XREAD BLOCK: entries after each stream's cursor
    StreamRead {
        cursors: Vec<(Bytes, StreamId)>,
        count: Option<usize>,
    },
}

impl WaitingFor {
    fn keys(&self) -> Vec<Bytes> {
        match self {
            Self::ListPop { keys } => keys.clone(),
            Self::StreamRead { cursors, .. } => cursors.iter().map(|(k, _)| k.clone()).collect(),
        }
    }
}

/// A reply owed to a previously blocked client.
#[derive(Debug, Clone, PartialEq)]
pub struct Wakeup {
    pub client: ClientId,
    pub reply: Frame,
    /// Command replicas should apply for what this wakeup consumed
    pub propagate: Option<Frame>,
}

impl Wakeup {
    fn timeout(client: ClientId) -> Self {
        Self {
            client,
            reply: Frame::Null,
            propagate: None,
        }
    }
}

#[derive(Debug)]
struct BlockedClient {
    keys: Vec<Bytes>,
    deadline: Option<Timestamp>,
    waiting_for: WaitingFor,
}

impl BlockedClient {
    fn expired(&self, now: Timestamp) -> bool {
        self.deadline.is_some_and(|d| d <= now)
    }
}

/// Registry of blocked clients.
#[derive(Debug, Default)]
pub struct BlockingCoordinator {
    waiters: HashMap<Bytes, VecDeque<ClientId>>,
    blocked: HashMap<ClientId, BlockedClient>,
}

impl BlockingCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block `client` until one of its keys changes or `deadline` (epoch ms)
    /// passes. `None` waits forever.
    ///
    /// Registering a client that is already blocked keeps its place in every
    /// queue it is on; only the deadline and wait parameters are replaced.
    pub fn register_blocked(
        &mut self,
        client: ClientId,
        deadline: Option<Timestamp>,
        waiting_for: WaitingFor,
    ) {
        let mut keys: Vec<Bytes> = Vec::new();
        for key in waiting_for.keys() {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }

        if let Some(previous) = self.blocked.remove(&client) {
            for key in previous.keys.iter().filter(|k| !keys.contains(k)) {
                self.leave_queue(key, client);
            }
        }
        for key in &keys {
            let queue = self.waiters.entry(key.clone()).or_default();
            if !queue.contains(&client) {
                queue.push_back(client);
            }
        }

        debug!(client, keys = keys.len(), ?deadline, "client blocked");
        self.blocked.insert(
            client,
            BlockedClient {
                keys,
                deadline,
                waiting_for,
            },
        );
    }

    #[inline]
    pub fn is_blocked(&self, client: ClientId) -> bool {
        self.blocked.contains_key(&client)
    }

    pub fn blocked_count(&self) -> usize {
        self.blocked.len()
    }

    /// Earliest deadline among blocked clients.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.blocked.values().filter_map(|b| b.deadline).min()
    }

    /// Clients queued on `key`, oldest first.
    pub fn waiters(&self, key: &[u8]) -> Vec<ClientId> {
        self.waiters
            .get(key)
            .map(|q| q.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Retry every waiter on `key` in FIFO order.
    ///
    /// Waiters past their deadline get a nil reply. The scan is exhaustive
    /// so one push of several elements can feed several waiters, and one
    /// stream append can feed all of its readers.
    pub fn notify_key_changed(
        &mut self,
        key: &[u8],
        db: &mut Database,
        now: Timestamp,
    ) -> Vec<Wakeup> {
        let queued = self.waiters(key);
        let mut wakeups = Vec::new();

        for client in queued {
            let Some(blocked) = self.blocked.get(&client) else {
                continue;
            };

            let wakeup = if blocked.expired(now) {
                Some(Wakeup::timeout(client))
            } else {
                try_serve(client, key, &blocked.waiting_for, db, now)
            };

            if let Some(wakeup) = wakeup {
                self.remove_blocked_client_from_all_keys(client);
                debug!(client, timed_out = wakeup.reply.is_null(), "client unblocked");
                wakeups.push(wakeup);
            }
        }

        wakeups
    }

    /// Time out every client whose deadline has passed, in client id order.
    pub fn scan_and_expire(&mut self, now: Timestamp) -> Vec<Wakeup> {
        let mut expired: Vec<ClientId> = self
            .blocked
            .iter()
            .filter(|(_, b)| b.expired(now))
            .map(|(id, _)| *id)
            .collect();
        expired.sort_unstable();

        for client in &expired {
            self.remove_blocked_client_from_all_keys(*client);
            debug!(client, "blocked client timed out");
        }
        expired.into_iter().map(Wakeup::timeout).collect()
    }

    /// Forget `client` everywhere. Returns false if it was not blocked.
    pub fn remove_blocked_client_from_all_keys(&mut self, client: ClientId) -> bool {
        let Some(blocked) = self.blocked.remove(&client) else {
            return false;
        };
        for key in &blocked.keys {
            self.leave_queue(key, client);
        }
        true
    }

    fn leave_queue(&mut self, key: &Bytes, client: ClientId) {
        if let Some(queue) = self.waiters.get_mut(key) {
            queue.retain(|c| *c != client);
            if queue.is_empty() {
                self.waiters.remove(key);
            }
        }
    }
}

/// Build the reply a waiter would get now, if its condition holds.
fn try_serve(
    client: ClientId,
    key: &[u8],
    waiting_for: &WaitingFor,
    db: &mut Database,
    now: Timestamp,
) -> Option<Wakeup> {
    match waiting_for {
        WaitingFor::ListPop { .. } => {
            let item = db.list_pop(key, 1, now)?.into_iter().next()?;
            let key = Bytes::copy_from_slice(key);
            Some(Wakeup {
                client,
                reply: Frame::array(vec![Frame::Bulk(key.clone()), Frame::Bulk(item)]),
                propagate: Some(Frame::command([Bytes::from_static(b"LPOP"), key])),
            })
        }
        WaitingFor::StreamRead { cursors, count } => {
            let reply = read_streams(db, cursors, *count, now)?;
            Some(Wakeup {
                client,
                reply,
                propagate: None,
            })
        }
    }
}

/// XREAD reply for `cursors`: one `[key, entries]` pair per stream that has
/// entries past its cursor, or `None` if none do.
pub fn read_streams(
    db: &mut Database,
    cursors: &[(Bytes, StreamId)],
    count: Option<usize>,
    now: Timestamp,
) -> Option<Frame> {
    let mut streams = Vec::new();
    for (key, after) in cursors {
        let entries = db.stream_read_from(key, *after, count, now).ok()?;
        if !entries.is_empty() {
            streams.push(Frame::array(vec![
                Frame::Bulk(key.clone()),
                entries.iter().map(|e| e.to_frame()).collect(),
            ]));
        }
    }
    (!streams.is_empty()).then(|| Frame::Array(streams))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StreamIdSpec;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    fn list_pop(keys: &[&str]) -> WaitingFor {
        WaitingFor::ListPop {
            keys: keys.iter().map(|k| b(k)).collect(),
        }
    }

    #[test]
    fn test_register_is_fifo_and_deduplicated() {
        let mut coord = BlockingCoordinator::new();
        coord.register_blocked(1, None, list_pop(&["k", "k"]));
        coord.register_blocked(2, None, list_pop(&["k"]));
        assert_eq!(coord.waiters(b"k"), vec![1, 2]);
        assert!(coord.is_blocked(1));
    }

    #[test]
    fn test_reregister_keeps_queue_position() {
        let mut coord = BlockingCoordinator::new();
        coord.register_blocked(1, None, list_pop(&["k", "a"]));
        coord.register_blocked(2, None, list_pop(&["k"]));
        coord.register_blocked(1, Some(500), list_pop(&["k", "b"]));

        assert_eq!(coord.waiters(b"k"), vec![1, 2]);
        assert!(coord.waiters(b"a").is_empty());
        assert_eq!(coord.waiters(b"b"), vec![1]);
        assert_eq!(coord.next_deadline(), Some(500));
        assert_eq!(coord.blocked_count(), 2);
    }

    #[test]
    fn test_push_serves_oldest_waiter() {
        let mut coord = BlockingCoordinator::new();
        let mut db = Database::new();
        coord.register_blocked(1, None, list_pop(&["k"]));
        coord.register_blocked(2, None, list_pop(&["k"]));

        db.list_push_right(b("k"), vec![b("v1")], 0).unwrap();
        let wakeups = coord.notify_key_changed(b"k", &mut db, 0);
        assert_eq!(wakeups.len(), 1);
        assert_eq!(wakeups[0].client, 1);
        assert_eq!(wakeups[0].reply, Frame::command(["k", "v1"]));
        assert_eq!(wakeups[0].propagate, Some(Frame::command(["LPOP", "k"])));

        assert!(!coord.is_blocked(1));
        assert_eq!(coord.waiters(b"k"), vec![2]);
    }

    #[test]
    fn test_multi_push_drains_several_waiters() {
        let mut coord = BlockingCoordinator::new();
        let mut db = Database::new();
        coord.register_blocked(1, None, list_pop(&["k"]));
        coord.register_blocked(2, None, list_pop(&["k"]));
        coord.register_blocked(3, None, list_pop(&["k"]));

        db.list_push_right(b("k"), vec![b("a"), b("b")], 0).unwrap();
        let wakeups = coord.notify_key_changed(b"k", &mut db, 0);
        let served: Vec<_> = wakeups.iter().map(|w| (w.client, w.reply.clone())).collect();
        assert_eq!(
            served,
            vec![
                (1, Frame::command(["k", "a"])),
                (2, Frame::command(["k", "b"])),
            ]
        );
        assert_eq!(coord.waiters(b"k"), vec![3]);
        assert_eq!(db.key_type(b"k", 0), None);
    }

    #[test]
    fn test_unblock_removes_from_every_key() {
        let mut coord = BlockingCoordinator::new();
        let mut db = Database::new();
        coord.register_blocked(1, None, list_pop(&["a", "b"]));

        db.list_push_right(b("b"), vec![b("x")], 0).unwrap();
        assert_eq!(coord.notify_key_changed(b"b", &mut db, 0).len(), 1);
        assert!(coord.waiters(b"a").is_empty());

        // A later push to the other key must not reach the client again.
        db.list_push_right(b("a"), vec![b("y")], 0).unwrap();
        assert!(coord.notify_key_changed(b"a", &mut db, 0).is_empty());
        assert_eq!(db.list_len(b"a", 0), Ok(1));
    }

    #[test]
    fn test_expired_waiter_gets_nil_on_notify() {
        let mut coord = BlockingCoordinator::new();
        let mut db = Database::new();
        coord.register_blocked(1, Some(100), list_pop(&["k"]));
        coord.register_blocked(2, None, list_pop(&["k"]));

        db.list_push_right(b("k"), vec![b("v")], 0).unwrap();
        let wakeups = coord.notify_key_changed(b"k", &mut db, 150);
        assert_eq!(wakeups[0], Wakeup::timeout(1));
        assert_eq!(wakeups[1].client, 2);
        assert_eq!(wakeups[1].reply, Frame::command(["k", "v"]));
    }

    #[test]
    fn test_scan_and_expire() {
        let mut coord = BlockingCoordinator::new();
        coord.register_blocked(3, Some(100), list_pop(&["a", "b"]));
        coord.register_blocked(1, Some(50), list_pop(&["a"]));
        coord.register_blocked(2, None, list_pop(&["a"]));
        assert_eq!(coord.next_deadline(), Some(50));

        assert!(coord.scan_and_expire(49).is_empty());
        let expired: Vec<_> = coord.scan_and_expire(100).iter().map(|w| w.client).collect();
        assert_eq!(expired, vec![1, 3]);
        assert_eq!(coord.waiters(b"a"), vec![2]);
        assert!(coord.waiters(b"b").is_empty());
        assert_eq!(coord.next_deadline(), None);
        assert_eq!(coord.blocked_count(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut coord = BlockingCoordinator::new();
        coord.register_blocked(1, None, list_pop(&["k"]));
        assert!(coord.remove_blocked_client_from_all_keys(1));
        assert!(!coord.remove_blocked_client_from_all_keys(1));
        assert!(coord.waiters(b"k").is_empty());
        assert!(!coord.is_blocked(1));
    }

    #[test]
    fn test_stream_append_wakes_all_readers() {
        let mut coord = BlockingCoordinator::new();
        let mut db = Database::new();
        let waiting = WaitingFor::StreamRead {
            cursors: vec![(b("s"), StreamId::MIN)],
            count: None,
        };
        coord.register_blocked(1, None, waiting.clone());
        coord.register_blocked(2, None, waiting);

        db.stream_append(
            b("s"),
            StreamIdSpec::Explicit(StreamId::new(1, 1)),
            vec![(b("f"), b("v"))],
            0,
        )
        .unwrap();
        let wakeups = coord.notify_key_changed(b"s", &mut db, 0);
        assert_eq!(wakeups.len(), 2);
        assert_eq!(wakeups[0].reply, wakeups[1].reply);
        assert_eq!(wakeups[0].propagate, None);
    }

    #[test]
    fn test_list_push_does_not_wake_stream_reader() {
        let mut coord = BlockingCoordinator::new();
        let mut db = Database::new();
        coord.register_blocked(
            1,
            None,
            WaitingFor::StreamRead {
                cursors: vec![(b("k"), StreamId::MIN)],
                count: None,
            },
        );
        db.list_push_right(b("k"), vec![b("v")], 0).unwrap();
        assert!(coord.notify_key_changed(b"k", &mut db, 0).is_empty());
        assert!(coord.is_blocked(1));
    }
}
