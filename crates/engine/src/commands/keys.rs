//! Generic key-space commands.

use super::*;
use crate::db::Db;
use crate::registry::{insert, AofCtx, Command, Flag};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type Outcome = (RespValue, Option<AofCtx>);

fn exec_del(db: &Db, args: &[Bytes]) -> Outcome {
    if !db.contains_key(&args[0]) {
        return (reply::integer(0), None);
    }
    db.remove_key(&args[0]);
    (reply::integer(1), AofCtx::save())
}

fn exec_exists(db: &Db, args: &[Bytes]) -> Outcome {
    let count = args.iter().filter(|key| db.contains_key(key)).count();
    (reply::integer(count as i64), None)
}

fn set_expiration(db: &Db, key: &Bytes, at: SystemTime) -> Outcome {
    if !db.contains_key(key) {
        return (reply::integer(0), None);
    }
    db.expire_at(key.clone(), at);
    (reply::integer(1), AofCtx::save_with_expire(at))
}

fn exec_expire(db: &Db, args: &[Bytes]) -> Outcome {
    let seconds = match parse_i64(&args[1]) {
        Ok(n) => n,
        Err(e) => return (e, None),
    };
    let at = if seconds <= 0 {
        SystemTime::now()
    } else {
        SystemTime::now() + Duration::from_secs(seconds as u64)
    };
    set_expiration(db, &args[0], at)
}

fn exec_expireat(db: &Db, args: &[Bytes]) -> Outcome {
    let unix_secs = match parse_i64(&args[1]) {
        Ok(n) => n,
        Err(e) => return (e, None),
    };
    let at = UNIX_EPOCH + Duration::from_secs(unix_secs.max(0) as u64);
    set_expiration(db, &args[0], at)
}

fn exec_pexpireat(db: &Db, args: &[Bytes]) -> Outcome {
    let unix_millis = match parse_i64(&args[1]) {
        Ok(n) => n,
        Err(e) => return (e, None),
    };
    let at = UNIX_EPOCH + Duration::from_millis(unix_millis.max(0) as u64);
    set_expiration(db, &args[0], at)
}

fn exec_persist(db: &Db, args: &[Bytes]) -> Outcome {
    if !db.contains_key(&args[0]) {
        return (reply::integer(0), None);
    }
    if db.persist(&args[0]) {
        (reply::integer(1), AofCtx::save())
    } else {
        (reply::integer(0), None)
    }
}

fn exec_ttl(db: &Db, args: &[Bytes]) -> Outcome {
    if !db.contains_key(&args[0]) {
        return (reply::integer(-2), None);
    }
    match db.ttl_of(&args[0]) {
        Some(at) => {
            let secs = at
                .duration_since(SystemTime::now())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            (reply::integer(secs), None)
        }
        None => (reply::integer(-1), None),
    }
}

/// Internal: the monotonic write counter WATCH and TCC compare against.
fn exec_keyversion(db: &Db, args: &[Bytes]) -> Outcome {
    (reply::integer(db.version(&args[0]) as i64), None)
}

fn exec_type(db: &Db, args: &[Bytes]) -> Outcome {
    match db.with_entity(&args[0], |e| e.type_name()) {
        Some(name) => (reply::status(name), None),
        None => (reply::status("none"), None),
    }
}

fn exec_flushdb(db: &Db, _args: &[Bytes]) -> Outcome {
    db.flush();
    (reply::ok(), AofCtx::save())
}

fn exec_dbsize(db: &Db, _args: &[Bytes]) -> Outcome {
    (reply::integer(db.sizes().0 as i64), None)
}

pub(crate) fn register(table: &mut HashMap<&'static str, Command>) {
    insert(table, "del", exec_del, write_first_key, 2, Flag::Write);
    insert(table, "exists", exec_exists, read_all_keys, -2, Flag::ReadOnly);
    insert(table, "expire", exec_expire, write_first_key, 3, Flag::Write);
    insert(table, "expireat", exec_expireat, write_first_key, 3, Flag::Write);
    insert(table, "pexpireat", exec_pexpireat, write_first_key, 3, Flag::Write);
    insert(table, "persist", exec_persist, write_first_key, 2, Flag::Write);
    insert(table, "ttl", exec_ttl, read_first_key, 2, Flag::ReadOnly);
    insert(table, "keyversion", exec_keyversion, read_first_key, 2, Flag::ReadOnly);
    insert(table, "type", exec_type, read_first_key, 2, Flag::ReadOnly);
    insert(table, "flushdb", exec_flushdb, no_keys, 1, Flag::Write);
    insert(table, "dbsize", exec_dbsize, no_keys, 1, Flag::ReadOnly);
}
