//! Process-wide command table.
//!
//! Populated once on first use from the per-type command modules and
//! read-only afterwards. Each entry carries the executor, the key extractor
//! used for lock planning, the arity contract and the read/write flag.

use crate::db::Db;
use bytes::Bytes;
use once_cell::sync::Lazy;
use resp::{reply, CmdLine, RespValue};
use std::collections::HashMap;
use std::time::SystemTime;

/// Persistence directive returned by a write executor.
pub struct AofCtx {
    /// Append the command to the AOF.
    pub need_aof: bool,
    /// The executor also set an absolute TTL; a derived `PEXPIREAT` frame
    /// follows the command.
    pub expire_at: Option<SystemTime>,
}

impl AofCtx {
    pub fn save() -> Option<AofCtx> {
        Some(AofCtx {
            need_aof: true,
            expire_at: None,
        })
    }

    pub fn save_with_expire(at: SystemTime) -> Option<AofCtx> {
        Some(AofCtx {
            need_aof: true,
            expire_at: Some(at),
        })
    }
}

/// Executor: receives the arguments after the command name.
pub type ExecFn = fn(&Db, &[Bytes]) -> (RespValue, Option<AofCtx>);

/// Key extractor: returns (write keys, read keys) from the argument list.
pub type KeysFn = fn(&[Bytes]) -> (Vec<Bytes>, Vec<Bytes>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    Write,
    ReadOnly,
}

pub struct Command {
    pub name: &'static str,
    pub execute: ExecFn,
    pub keys: KeysFn,
    /// Positive: exact length of the full command line (name included).
    /// Negative: minimum length `|arity|`.
    pub arity: i32,
    pub flag: Flag,
}

static COMMANDS: Lazy<HashMap<&'static str, Command>> = Lazy::new(|| {
    let mut table = HashMap::new();
    crate::commands::strings::register(&mut table);
    crate::commands::keys::register(&mut table);
    crate::commands::lists::register(&mut table);
    crate::commands::hashes::register(&mut table);
    crate::commands::sets::register(&mut table);
    crate::commands::zsets::register(&mut table);
    table
});

pub(crate) fn insert(
    table: &mut HashMap<&'static str, Command>,
    name: &'static str,
    execute: ExecFn,
    keys: KeysFn,
    arity: i32,
    flag: Flag,
) {
    table.insert(
        name,
        Command {
            name,
            execute,
            keys,
            arity,
            flag,
        },
    );
}

pub fn lookup(name: &str) -> Option<&'static Command> {
    COMMANDS.get(name)
}

pub fn is_read_only(name: &str) -> bool {
    lookup(&name.to_ascii_lowercase())
        .map(|cmd| cmd.flag == Flag::ReadOnly)
        .unwrap_or(false)
}

fn arity_ok(arity: i32, line_len: usize) -> bool {
    if arity >= 0 {
        line_len == arity as usize
    } else {
        line_len >= (-arity) as usize
    }
}

/// Unknown-command / arity validation shared by every dispatch path.
/// Returns the error reply to send, or `None` when the line is well-formed.
pub fn check_syntax(cmdline: &CmdLine) -> Option<RespValue> {
    let Some(name) = cmdline.first() else {
        return Some(reply::err("ERR empty command"));
    };
    let name = String::from_utf8_lossy(name).to_ascii_lowercase();
    let Some(cmd) = lookup(&name) else {
        return Some(reply::unknown_command(&name));
    };
    if !arity_ok(cmd.arity, cmdline.len()) {
        return Some(reply::arg_num(&name));
    }
    None
}

/// The (write, read) key sets a command line touches; empty for unknown
/// commands.
pub fn write_read_keys(cmdline: &CmdLine) -> (Vec<Bytes>, Vec<Bytes>) {
    let Some(name) = cmdline.first() else {
        return (Vec::new(), Vec::new());
    };
    let name = String::from_utf8_lossy(name).to_ascii_lowercase();
    match lookup(&name) {
        Some(cmd) => (cmd.keys)(&cmdline[1..]),
        None => (Vec::new(), Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_command() {
        let err = check_syntax(&resp::cmdline(&["NOPE", "x"])).unwrap();
        match err {
            RespValue::Error(msg) => {
                assert_eq!(&msg[..], b"ERR unknown command 'nope'")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_exact_arity() {
        assert!(check_syntax(&resp::cmdline(&["GET", "k"])).is_none());
        assert!(check_syntax(&resp::cmdline(&["GET"])).is_some());
        assert!(check_syntax(&resp::cmdline(&["GET", "k", "extra"])).is_some());
    }

    #[test]
    fn test_minimum_arity() {
        assert!(check_syntax(&resp::cmdline(&["MGET", "a"])).is_none());
        assert!(check_syntax(&resp::cmdline(&["MGET", "a", "b", "c"])).is_none());
        assert!(check_syntax(&resp::cmdline(&["MGET"])).is_some());
    }

    #[test]
    fn test_key_extraction_conventions() {
        let (w, r) = write_read_keys(&resp::cmdline(&["SET", "k", "v"]));
        assert_eq!(w, vec![Bytes::from("k")]);
        assert!(r.is_empty());

        let (w, r) = write_read_keys(&resp::cmdline(&["SINTER", "a", "b"]));
        assert!(w.is_empty());
        assert_eq!(r.len(), 2);

        let (w, r) = write_read_keys(&resp::cmdline(&["SINTERSTORE", "dest", "a", "b"]));
        assert_eq!(w, vec![Bytes::from("dest")]);
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn test_read_only_flags() {
        assert!(is_read_only("get"));
        assert!(is_read_only("ZRANGE"));
        assert!(!is_read_only("set"));
        assert!(!is_read_only("missing"));
    }
}
