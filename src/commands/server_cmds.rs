//! Server and replication command implementations.

use super::{ExecContext, ParsedCommand, Reply};
use crate::error::CommandError;
use crate::protocol::Frame;
use crate::server::ClientKind;
use crate::VERSION;
use std::fmt::Write as _;
use tracing::{debug, info};

/// Redis version we report compatibility with.
const REDIS_VERSION: &str = "7.2.0";

fn server_section() -> String {
    let mut out = String::from("# Server\r\n");
    let _ = write!(
        out,
        "redis_version:{REDIS_VERSION}\r\nrivulet_version:{VERSION}\r\nredis_mode:standalone\r\nos:{}\r\narch_bits:{}\r\nmultiplexing_api:tokio\r\n",
        std::env::consts::OS,
        usize::BITS
    );
    out
}

/// INFO [section ...]
///
/// Known sections are `server` and `replication`; `all`, `everything` and
/// `default` select both. Unknown sections contribute nothing.
pub fn cmd_info(cmd: &ParsedCommand, ctx: &mut ExecContext<'_>) -> Result<Reply, CommandError> {
    let wants = |name: &str| {
        cmd.args.is_empty()
            || cmd.args.iter().any(|a| {
                a.eq_ignore_ascii_case(name.as_bytes())
                    || a.eq_ignore_ascii_case(b"all")
                    || a.eq_ignore_ascii_case(b"everything")
                    || a.eq_ignore_ascii_case(b"default")
            })
    };

    let mut sections = Vec::new();
    if wants("server") {
        sections.push(server_section());
    }
    if wants("replication") {
        sections.push(ctx.replication.info());
    }
    Ok(Frame::bulk(sections.join("\r\n")).into())
}

/// REPLCONF <option> <value> [<option> <value> ...]
///
/// Replicas announce `listening-port` and `capa` during the handshake and
/// later report `ACK <offset>`, which needs no answer. `GETACK` asks a
/// replica for its processed offset.
pub fn cmd_replconf(cmd: &ParsedCommand, ctx: &mut ExecContext<'_>) -> Result<Reply, CommandError> {
    if cmd.arg_is(0, "GETACK") {
        let offset = ctx.replication.offset().to_string();
        return Ok(Frame::command(["REPLCONF".to_string(), "ACK".to_string(), offset]).into());
    }
    if cmd.arg_is(0, "ACK") {
        debug!(client = ctx.client.id(), offset = ?cmd.get_str(1).ok(), "replica ack");
        return Ok(Reply::Silent);
    }
    Ok(Frame::ok().into())
}

/// PSYNC <replid> <offset>
///
/// Partial resynchronization is not supported, so every request gets a full
/// resync with an empty snapshot. The connection becomes a replica link and
/// receives every write from then on.
pub fn cmd_psync(_cmd: &ParsedCommand, ctx: &mut ExecContext<'_>) -> Result<Reply, CommandError> {
    let id = ctx.client.id();
    info!(client = id, addr = ?ctx.client.addr(), "full resync requested");

    let (header, payload) = ctx.replication.full_resync();
    ctx.replication.register_replica(id);
    ctx.client.set_kind(ClientKind::Replica);
    Ok(Reply::Snapshot { header, payload })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Harness;
    use super::*;
    use crate::server::replication::{ReplicationManager, EMPTY_RDB};

    fn bulk_text(frame: Frame) -> String {
        frame.as_str().map(str::to_string).unwrap_or_default()
    }

    #[test]
    fn test_info_sections() {
        let mut h = Harness::new();
        let all = bulk_text(h.frame(&["INFO"]));
        assert!(all.contains("# Server\r\n"));
        assert!(all.contains("role:master\r\n"));

        let repl = bulk_text(h.frame(&["INFO", "replication"]));
        assert!(repl.starts_with("# Replication\r\n"));
        assert!(!repl.contains("# Server"));

        assert_eq!(h.frame(&["INFO", "keyspace"]), Frame::bulk(""));
    }

    #[test]
    fn test_info_on_replica() {
        let mut h = Harness::new();
        h.replication = ReplicationManager::replica_of("127.0.0.1", 6379);
        assert!(bulk_text(h.frame(&["INFO", "replication"])).contains("role:slave\r\n"));
    }

    #[test]
    fn test_replconf_handshake_options() {
        let mut h = Harness::new();
        assert_eq!(h.frame(&["REPLCONF", "listening-port", "6380"]), Frame::ok());
        assert_eq!(h.frame(&["REPLCONF", "capa", "psync2"]), Frame::ok());
        assert_eq!(h.run(&["REPLCONF", "ACK", "0"]), Reply::Silent);
    }

    #[test]
    fn test_replconf_getack_reports_processed_offset() {
        let mut h = Harness::new();
        h.replication = ReplicationManager::replica_of("127.0.0.1", 6379);
        h.replication.record_processed(37);
        assert_eq!(
            h.frame(&["REPLCONF", "GETACK", "*"]),
            Frame::command(["REPLCONF", "ACK", "37"])
        );
    }

    #[test]
    fn test_psync_registers_replica() {
        let mut h = Harness::new();
        let Reply::Snapshot { header, payload } = h.run(&["PSYNC", "?", "-1"]) else {
            panic!("PSYNC should answer with a snapshot");
        };
        assert!(header
            .as_str()
            .is_some_and(|s| s.starts_with("FULLRESYNC ") && s.ends_with(" 0")));
        assert_eq!(&payload[..], EMPTY_RDB);
        assert_eq!(h.replication.replicas(), &[1]);
        assert_eq!(h.client.kind(), ClientKind::Replica);

        h.run(&["SET", "k", "v"]);
        assert_eq!(h.replication.take_outbox().len(), 1);
    }
}
