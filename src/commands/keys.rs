//! Key command implementations.

use super::{ExecContext, ParsedCommand, Reply};
use crate::error::CommandError;
use crate::protocol::Frame;

/// TYPE key
pub fn cmd_type(cmd: &ParsedCommand, ctx: &mut ExecContext<'_>) -> Result<Reply, CommandError> {
    let name = ctx
        .db
        .key_type(&cmd.args[0], ctx.now)
        .map_or("none", |t| t.as_str());
    Ok(Frame::simple(name).into())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Harness;
    use crate::protocol::Frame;

    #[test]
    fn test_type() {
        let mut h = Harness::new();
        h.run(&["SET", "s", "v"]);
        h.run(&["RPUSH", "l", "a"]);
        h.run(&["XADD", "x", "1-1", "f", "v"]);
        assert_eq!(h.frame(&["TYPE", "s"]), Frame::simple("string"));
        assert_eq!(h.frame(&["TYPE", "l"]), Frame::simple("list"));
        assert_eq!(h.frame(&["TYPE", "x"]), Frame::simple("stream"));
        assert_eq!(h.frame(&["TYPE", "nope"]), Frame::simple("none"));
    }
}
