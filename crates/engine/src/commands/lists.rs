//! List commands.

use super::*;
use crate::db::Db;
use crate::entity::DataEntity;
use crate::registry::{insert, AofCtx, Command, Flag};
use std::collections::HashMap;
use storage::QuickList;

type Outcome = (RespValue, Option<AofCtx>);

/// Run `f` on the list under `key`; `Ok(None)` when the key is absent.
fn with_list<R>(db: &Db, key: &[u8], f: impl FnOnce(&mut QuickList) -> R) -> Result<Option<R>, RespValue> {
    match db.with_entity_mut(key, |e| e.as_list_mut().map(f)) {
        None => Ok(None),
        Some(Some(r)) => Ok(Some(r)),
        Some(None) => Err(reply::wrong_type()),
    }
}

fn push(db: &Db, args: &[Bytes], front: bool, require_existing: bool) -> Outcome {
    let key = args[0].clone();
    let values = &args[1..];

    if require_existing && !db.contains_key(&key) {
        return (reply::integer(0), None);
    }

    let result = db.entry(
        key,
        || DataEntity::List(QuickList::new()),
        |entity| {
            let list = entity.as_list_mut()?;
            for value in values {
                if front {
                    list.push_front(value.clone());
                } else {
                    list.push_back(value.clone());
                }
            }
            Some(list.len())
        },
    );
    match result {
        Some(len) => (reply::integer(len as i64), AofCtx::save()),
        None => (reply::wrong_type(), None),
    }
}

fn exec_lpush(db: &Db, args: &[Bytes]) -> Outcome {
    push(db, args, true, false)
}

fn exec_rpush(db: &Db, args: &[Bytes]) -> Outcome {
    push(db, args, false, false)
}

fn exec_lpushx(db: &Db, args: &[Bytes]) -> Outcome {
    push(db, args, true, true)
}

fn exec_rpushx(db: &Db, args: &[Bytes]) -> Outcome {
    push(db, args, false, true)
}

fn pop(db: &Db, args: &[Bytes], front: bool) -> Outcome {
    let popped = match with_list(db, &args[0], |list| {
        let value = if front { list.pop_front() } else { list.pop_back() };
        (value, list.is_empty())
    }) {
        Ok(v) => v,
        Err(e) => return (e, None),
    };
    match popped {
        Some((Some(value), emptied)) => {
            if emptied {
                db.remove_key(&args[0]);
            }
            (reply::bulk(value), AofCtx::save())
        }
        _ => (reply::null_bulk(), None),
    }
}

fn exec_lpop(db: &Db, args: &[Bytes]) -> Outcome {
    pop(db, args, true)
}

fn exec_rpop(db: &Db, args: &[Bytes]) -> Outcome {
    pop(db, args, false)
}

fn exec_lindex(db: &Db, args: &[Bytes]) -> Outcome {
    let index = match parse_i64(&args[1]) {
        Ok(n) => n,
        Err(e) => return (e, None),
    };
    let value = match with_list(db, &args[0], |list| {
        normalize_index(index, list.len()).and_then(|i| list.get(i).cloned())
    }) {
        Ok(v) => v.flatten(),
        Err(e) => return (e, None),
    };
    match value {
        Some(v) => (reply::bulk(v), None),
        None => (reply::null_bulk(), None),
    }
}

fn exec_llen(db: &Db, args: &[Bytes]) -> Outcome {
    match with_list(db, &args[0], |list| list.len()) {
        Ok(len) => (reply::integer(len.unwrap_or(0) as i64), None),
        Err(e) => (e, None),
    }
}

fn exec_lset(db: &Db, args: &[Bytes]) -> Outcome {
    let index = match parse_i64(&args[1]) {
        Ok(n) => n,
        Err(e) => return (e, None),
    };
    let value = args[2].clone();
    let updated = match with_list(db, &args[0], |list| {
        match normalize_index(index, list.len()) {
            Some(i) => list.set(i, value),
            None => false,
        }
    }) {
        Ok(v) => v,
        Err(e) => return (e, None),
    };
    match updated {
        None => (reply::err("ERR no such key"), None),
        Some(false) => (reply::err("ERR index out of range"), None),
        Some(true) => (reply::ok(), AofCtx::save()),
    }
}

fn exec_lrem(db: &Db, args: &[Bytes]) -> Outcome {
    let count = match parse_i64(&args[1]) {
        Ok(n) => n,
        Err(e) => return (e, None),
    };
    let value = args[2].clone();
    let removed = match with_list(db, &args[0], |list| {
        let removed = match count.cmp(&0) {
            std::cmp::Ordering::Greater => list.remove_first(&value, count as usize),
            std::cmp::Ordering::Less => list.remove_last(&value, count.unsigned_abs() as usize),
            std::cmp::Ordering::Equal => list.remove_all(&value),
        };
        (removed, list.is_empty())
    }) {
        Ok(v) => v,
        Err(e) => return (e, None),
    };
    match removed {
        Some((n, emptied)) => {
            if emptied {
                db.remove_key(&args[0]);
            }
            let ctx = if n > 0 { AofCtx::save() } else { None };
            (reply::integer(n as i64), ctx)
        }
        None => (reply::integer(0), None),
    }
}

fn exec_ltrim(db: &Db, args: &[Bytes]) -> Outcome {
    let start = match parse_i64(&args[1]) {
        Ok(n) => n,
        Err(e) => return (e, None),
    };
    let stop = match parse_i64(&args[2]) {
        Ok(n) => n,
        Err(e) => return (e, None),
    };
    let emptied = match with_list(db, &args[0], |list| {
        match normalize_range(start, stop, list.len()) {
            Some((from, to)) => list.trim(from, to),
            None => list.trim(1, 0), // out-of-range trim empties the list
        }
        list.is_empty()
    }) {
        Ok(v) => v,
        Err(e) => return (e, None),
    };
    match emptied {
        Some(true) => {
            db.remove_key(&args[0]);
            (reply::ok(), AofCtx::save())
        }
        Some(false) => (reply::ok(), AofCtx::save()),
        None => (reply::ok(), None),
    }
}

fn exec_lrange(db: &Db, args: &[Bytes]) -> Outcome {
    let start = match parse_i64(&args[1]) {
        Ok(n) => n,
        Err(e) => return (e, None),
    };
    let stop = match parse_i64(&args[2]) {
        Ok(n) => n,
        Err(e) => return (e, None),
    };
    let values = match with_list(db, &args[0], |list| {
        match normalize_range(start, stop, list.len()) {
            Some((from, to)) => list.range(from, to),
            None => Vec::new(),
        }
    }) {
        Ok(v) => v.unwrap_or_default(),
        Err(e) => return (e, None),
    };
    (reply::multi_bulk(values), None)
}

pub(crate) fn register(table: &mut HashMap<&'static str, Command>) {
    insert(table, "lpush", exec_lpush, write_first_key, -3, Flag::Write);
    insert(table, "rpush", exec_rpush, write_first_key, -3, Flag::Write);
    insert(table, "lpushx", exec_lpushx, write_first_key, -3, Flag::Write);
    insert(table, "rpushx", exec_rpushx, write_first_key, -3, Flag::Write);
    insert(table, "lpop", exec_lpop, write_first_key, 2, Flag::Write);
    insert(table, "rpop", exec_rpop, write_first_key, 2, Flag::Write);
    insert(table, "lindex", exec_lindex, read_first_key, 3, Flag::ReadOnly);
    insert(table, "llen", exec_llen, read_first_key, 2, Flag::ReadOnly);
    insert(table, "lset", exec_lset, write_first_key, 4, Flag::Write);
    insert(table, "lrem", exec_lrem, write_first_key, 4, Flag::Write);
    insert(table, "ltrim", exec_ltrim, write_first_key, 4, Flag::Write);
    insert(table, "lrange", exec_lrange, read_first_key, 4, Flag::ReadOnly);
}
