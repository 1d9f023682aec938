//! Hash commands.

use super::*;
use crate::db::Db;
use crate::entity::{DataEntity, Hash};
use crate::registry::{insert, AofCtx, Command, Flag};
use std::collections::HashMap;

type Outcome = (RespValue, Option<AofCtx>);

fn with_hash<R>(db: &Db, key: &[u8], f: impl FnOnce(&Hash) -> R) -> Result<Option<R>, RespValue> {
    match db.with_entity(key, |e| e.as_hash().map(f)) {
        None => Ok(None),
        Some(Some(r)) => Ok(Some(r)),
        Some(None) => Err(reply::wrong_type()),
    }
}

fn exec_hset(db: &Db, args: &[Bytes]) -> Outcome {
    if args.len() % 2 != 1 {
        return (reply::arg_num("hset"), None);
    }
    let pairs = &args[1..];
    let created = db.entry(
        args[0].clone(),
        || DataEntity::Hash(Hash::new()),
        |entity| {
            let hash = entity.as_hash()?;
            let mut created = 0;
            for pair in pairs.chunks(2) {
                created += hash.set(pair[0].clone(), pair[1].clone());
            }
            Some(created)
        },
    );
    match created {
        Some(n) => (reply::integer(n as i64), AofCtx::save()),
        None => (reply::wrong_type(), None),
    }
}

fn exec_hsetnx(db: &Db, args: &[Bytes]) -> Outcome {
    let field = args[1].clone();
    let value = args[2].clone();
    let created = db.entry(
        args[0].clone(),
        || DataEntity::Hash(Hash::new()),
        |entity| entity.as_hash().map(|hash| hash.set_if_absent(field, value)),
    );
    match created {
        Some(1) => (reply::integer(1), AofCtx::save()),
        Some(_) => (reply::integer(0), None),
        None => (reply::wrong_type(), None),
    }
}

fn exec_hget(db: &Db, args: &[Bytes]) -> Outcome {
    match with_hash(db, &args[0], |hash| hash.get(&args[1])) {
        Ok(Some(Some(value))) => (reply::bulk(value), None),
        Ok(_) => (reply::null_bulk(), None),
        Err(e) => (e, None),
    }
}

fn exec_hdel(db: &Db, args: &[Bytes]) -> Outcome {
    let fields = &args[1..];
    let removed = match with_hash(db, &args[0], |hash| {
        let removed: usize = fields.iter().map(|f| hash.remove(f)).sum();
        (removed, hash.is_empty())
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

fn exec_hexists(db: &Db, args: &[Bytes]) -> Outcome {
    match with_hash(db, &args[0], |hash| hash.contains(&args[1])) {
        Ok(Some(true)) => (reply::integer(1), None),
        Ok(_) => (reply::integer(0), None),
        Err(e) => (e, None),
    }
}

fn exec_hgetall(db: &Db, args: &[Bytes]) -> Outcome {
    let flattened = match with_hash(db, &args[0], |hash| {
        let mut out = Vec::with_capacity(hash.len() * 2);
        hash.for_each(|field, value| {
            out.push(field.clone());
            out.push(value.clone());
            true
        });
        out
    }) {
        Ok(v) => v.unwrap_or_default(),
        Err(e) => return (e, None),
    };
    (reply::multi_bulk(flattened), None)
}

fn exec_hincrby(db: &Db, args: &[Bytes]) -> Outcome {
    let delta = match parse_i64(&args[2]) {
        Ok(n) => n,
        Err(e) => return (e, None),
    };
    let field = args[1].clone();
    let result = db.entry(
        args[0].clone(),
        || DataEntity::Hash(Hash::new()),
        |entity| {
            let hash = entity.as_hash()?;
            let current = match hash.get(&field) {
                Some(raw) => match parse_i64(&raw) {
                    Ok(n) => n,
                    Err(e) => return Some(Err(e)),
                },
                None => 0,
            };
            let Some(next) = current.checked_add(delta) else {
                return Some(Err(reply::not_integer()));
            };
            hash.set(field.clone(), Bytes::from(next.to_string()));
            Some(Ok(next))
        },
    );
    match result {
        Some(Ok(next)) => (reply::integer(next), AofCtx::save()),
        Some(Err(e)) => (e, None),
        None => (reply::wrong_type(), None),
    }
}

fn exec_hkeys(db: &Db, args: &[Bytes]) -> Outcome {
    match with_hash(db, &args[0], |hash| hash.fields()) {
        Ok(v) => (reply::multi_bulk(v.unwrap_or_default()), None),
        Err(e) => (e, None),
    }
}

fn exec_hvals(db: &Db, args: &[Bytes]) -> Outcome {
    let values = match with_hash(db, &args[0], |hash| {
        let mut out = Vec::with_capacity(hash.len());
        hash.for_each(|_, value| {
            out.push(value.clone());
            true
        });
        out
    }) {
        Ok(v) => v.unwrap_or_default(),
        Err(e) => return (e, None),
    };
    (reply::multi_bulk(values), None)
}

fn exec_hlen(db: &Db, args: &[Bytes]) -> Outcome {
    match with_hash(db, &args[0], |hash| hash.len()) {
        Ok(len) => (reply::integer(len.unwrap_or(0) as i64), None),
        Err(e) => (e, None),
    }
}

pub(crate) fn register(table: &mut HashMap<&'static str, Command>) {
    insert(table, "hset", exec_hset, write_first_key, -4, Flag::Write);
    insert(table, "hsetnx", exec_hsetnx, write_first_key, 4, Flag::Write);
    insert(table, "hget", exec_hget, read_first_key, 3, Flag::ReadOnly);
    insert(table, "hdel", exec_hdel, write_first_key, -3, Flag::Write);
    insert(table, "hexists", exec_hexists, read_first_key, 3, Flag::ReadOnly);
    insert(table, "hgetall", exec_hgetall, read_first_key, 2, Flag::ReadOnly);
    insert(table, "hincrby", exec_hincrby, write_first_key, 4, Flag::Write);
    insert(table, "hkeys", exec_hkeys, read_first_key, 2, Flag::ReadOnly);
    insert(table, "hvals", exec_hvals, read_first_key, 2, Flag::ReadOnly);
    insert(table, "hlen", exec_hlen, read_first_key, 2, Flag::ReadOnly);
}
