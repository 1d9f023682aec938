//! String commands.

use super::*;
use crate::db::Db;
use crate::entity::DataEntity;
use crate::registry::{insert, AofCtx, Command, Flag};
use std::collections::HashMap;
use std::time::{Duration, SystemTime};

type Outcome = (RespValue, Option<AofCtx>);

/// Read the string under `key`: `Ok(None)` when absent, error reply when the
/// key holds another kind of value.
fn get_string(db: &Db, key: &[u8]) -> Result<Option<Bytes>, RespValue> {
    match db.with_entity(key, |e| e.as_string().cloned()) {
        None => Ok(None),
        Some(Some(s)) => Ok(Some(s)),
        Some(None) => Err(reply::wrong_type()),
    }
}

fn exec_get(db: &Db, args: &[Bytes]) -> Outcome {
    match get_string(db, &args[0]) {
        Ok(Some(value)) => (reply::bulk(value), None),
        Ok(None) => (reply::null_bulk(), None),
        Err(e) => (e, None),
    }
}

#[derive(PartialEq)]
enum SetPolicy {
    Any,
    IfAbsent,
    IfExists,
}

fn exec_set(db: &Db, args: &[Bytes]) -> Outcome {
    let key = args[0].clone();
    let value = args[1].clone();

    let mut policy = SetPolicy::Any;
    let mut expire_at: Option<SystemTime> = None;
    let mut i = 2;
    while i < args.len() {
        let opt = args[i].to_ascii_uppercase();
        match opt.as_slice() {
            b"NX" if policy == SetPolicy::Any => policy = SetPolicy::IfAbsent,
            b"XX" if policy == SetPolicy::Any => policy = SetPolicy::IfExists,
            b"EX" | b"PX" => {
                let Some(raw) = args.get(i + 1) else {
                    return (reply::syntax(), None);
                };
                let n = match parse_i64(raw) {
                    Ok(n) if n > 0 => n,
                    Ok(_) => return (reply::not_integer(), None),
                    Err(e) => return (e, None),
                };
                let ttl = if opt.as_slice() == b"EX" {
                    Duration::from_secs(n as u64)
                } else {
                    Duration::from_millis(n as u64)
                };
                expire_at = Some(SystemTime::now() + ttl);
                i += 1;
            }
            _ => return (reply::syntax(), None),
        }
        i += 1;
    }

    let stored = match policy {
        SetPolicy::Any => {
            db.put_entity(key.clone(), DataEntity::String(value));
            true
        }
        SetPolicy::IfAbsent => db.put_if_absent(key.clone(), DataEntity::String(value)) > 0,
        SetPolicy::IfExists => db.put_if_exists(key.clone(), DataEntity::String(value)) > 0,
    };
    if !stored {
        return (reply::null_bulk(), None);
    }

    match expire_at {
        Some(at) => {
            db.expire_at(key, at);
            (reply::ok(), AofCtx::save_with_expire(at))
        }
        None => {
            // a plain SET discards any previous TTL
            db.persist(&key);
            (reply::ok(), AofCtx::save())
        }
    }
}

fn exec_setnx(db: &Db, args: &[Bytes]) -> Outcome {
    let stored = db.put_if_absent(args[0].clone(), DataEntity::String(args[1].clone()));
    if stored > 0 {
        (reply::integer(1), AofCtx::save())
    } else {
        (reply::integer(0), None)
    }
}

fn exec_setex(db: &Db, args: &[Bytes]) -> Outcome {
    let seconds = match parse_i64(&args[1]) {
        Ok(n) if n > 0 => n,
        Ok(_) => return (reply::not_integer(), None),
        Err(e) => return (e, None),
    };
    let key = args[0].clone();
    let at = SystemTime::now() + Duration::from_secs(seconds as u64);
    db.put_entity(key.clone(), DataEntity::String(args[2].clone()));
    db.expire_at(key, at);
    (reply::ok(), AofCtx::save_with_expire(at))
}

fn exec_getset(db: &Db, args: &[Bytes]) -> Outcome {
    let old = match get_string(db, &args[0]) {
        Ok(v) => v,
        Err(e) => return (e, None),
    };
    db.put_entity(args[0].clone(), DataEntity::String(args[1].clone()));
    db.persist(&args[0]);
    match old {
        Some(v) => (reply::bulk(v), AofCtx::save()),
        None => (reply::null_bulk(), AofCtx::save()),
    }
}

fn exec_mset(db: &Db, args: &[Bytes]) -> Outcome {
    if args.len() % 2 != 0 {
        return (reply::arg_num("mset"), None);
    }
    for pair in args.chunks(2) {
        db.put_entity(pair[0].clone(), DataEntity::String(pair[1].clone()));
    }
    (reply::ok(), AofCtx::save())
}

fn exec_mget(db: &Db, args: &[Bytes]) -> Outcome {
    let values = args
        .iter()
        .map(|key| match get_string(db, key) {
            Ok(Some(v)) => RespValue::BulkString(Some(v)),
            _ => RespValue::BulkString(None),
        })
        .collect();
    (RespValue::Array(values), None)
}

fn exec_append(db: &Db, args: &[Bytes]) -> Outcome {
    let suffix = args[1].clone();
    let result = db.entry(
        args[0].clone(),
        || DataEntity::String(Bytes::new()),
        |entity| match entity {
            DataEntity::String(s) => {
                let mut joined = Vec::with_capacity(s.len() + suffix.len());
                joined.extend_from_slice(s);
                joined.extend_from_slice(&suffix);
                *s = Bytes::from(joined);
                Some(s.len())
            }
            _ => None,
        },
    );
    match result {
        Some(len) => (reply::integer(len as i64), AofCtx::save()),
        None => (reply::wrong_type(), None),
    }
}

fn exec_strlen(db: &Db, args: &[Bytes]) -> Outcome {
    match get_string(db, &args[0]) {
        Ok(Some(v)) => (reply::integer(v.len() as i64), None),
        Ok(None) => (reply::integer(0), None),
        Err(e) => (e, None),
    }
}

fn incr_by(db: &Db, key: &Bytes, delta: i64) -> Outcome {
    let current = match get_string(db, key) {
        Ok(Some(raw)) => match parse_i64(&raw) {
            Ok(n) => n,
            Err(e) => return (e, None),
        },
        Ok(None) => 0,
        Err(e) => return (e, None),
    };
    // overflow is an error, not a wrap
    let Some(next) = current.checked_add(delta) else {
        return (reply::not_integer(), None);
    };
    db.put_entity(key.clone(), DataEntity::String(Bytes::from(next.to_string())));
    (reply::integer(next), AofCtx::save())
}

fn exec_incr(db: &Db, args: &[Bytes]) -> Outcome {
    incr_by(db, &args[0], 1)
}

fn exec_decr(db: &Db, args: &[Bytes]) -> Outcome {
    incr_by(db, &args[0], -1)
}

fn exec_incrby(db: &Db, args: &[Bytes]) -> Outcome {
    match parse_i64(&args[1]) {
        Ok(delta) => incr_by(db, &args[0], delta),
        Err(e) => (e, None),
    }
}

fn exec_decrby(db: &Db, args: &[Bytes]) -> Outcome {
    match parse_i64(&args[1]) {
        Ok(delta) => incr_by(db, &args[0], delta.wrapping_neg()),
        Err(e) => (e, None),
    }
}

pub(crate) fn register(table: &mut HashMap<&'static str, Command>) {
    insert(table, "get", exec_get, read_first_key, 2, Flag::ReadOnly);
    insert(table, "set", exec_set, write_first_key, -3, Flag::Write);
    insert(table, "setnx", exec_setnx, write_first_key, 3, Flag::Write);
    insert(table, "setex", exec_setex, write_first_key, 4, Flag::Write);
    insert(table, "getset", exec_getset, write_first_key, 3, Flag::Write);
    insert(table, "mset", exec_mset, write_alternate_keys, -3, Flag::Write);
    insert(table, "mget", exec_mget, read_all_keys, -2, Flag::ReadOnly);
    insert(table, "append", exec_append, write_first_key, 3, Flag::Write);
    insert(table, "strlen", exec_strlen, read_first_key, 2, Flag::ReadOnly);
    insert(table, "incr", exec_incr, write_first_key, 2, Flag::Write);
    insert(table, "decr", exec_decr, write_first_key, 2, Flag::Write);
    insert(table, "incrby", exec_incrby, write_first_key, 3, Flag::Write);
    insert(table, "decrby", exec_decrby, write_first_key, 3, Flag::Write);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::WHEEL_INTERVAL;
    use crate::session::Session;
    use std::sync::Arc;
    use storage::TimeWheel;

    async fn run(db: &Arc<Db>, parts: &[&str]) -> RespValue {
        db.exec(&Session::fake(), &resp::cmdline(parts)).await
    }

    fn test_db() -> Arc<Db> {
        Db::new_basic(0, TimeWheel::start(WHEEL_INTERVAL, 8))
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let db = test_db();
        assert_eq!(run(&db, &["SET", "foo", "bar"]).await, reply::ok());
        assert_eq!(
            run(&db, &["GET", "foo"]).await,
            reply::bulk(Bytes::from("bar"))
        );
        assert_eq!(run(&db, &["GET", "missing"]).await, reply::null_bulk());
    }

    #[tokio::test]
    async fn test_set_nx_xx() {
        let db = test_db();
        assert_eq!(run(&db, &["SET", "k", "1", "NX"]).await, reply::ok());
        assert_eq!(run(&db, &["SET", "k", "2", "NX"]).await, reply::null_bulk());
        assert_eq!(run(&db, &["SET", "k", "3", "XX"]).await, reply::ok());
        assert_eq!(run(&db, &["SET", "j", "1", "XX"]).await, reply::null_bulk());
        assert_eq!(run(&db, &["GET", "k"]).await, reply::bulk(Bytes::from("3")));
        assert!(run(&db, &["SET", "k", "1", "BOGUS"]).await.is_error());
    }

    #[tokio::test]
    async fn test_set_ex_records_ttl() {
        let db = test_db();
        run(&db, &["SET", "k", "v", "EX", "100"]).await;
        assert!(db.ttl_of(b"k").is_some());
        // plain SET clears it again
        run(&db, &["SET", "k", "v2"]).await;
        assert!(db.ttl_of(b"k").is_none());
    }

    #[tokio::test]
    async fn test_wrong_type_does_not_mutate() {
        let db = test_db();
        run(&db, &["SET", "k", "hello"]).await;
        let r = run(&db, &["LPUSH", "k", "x"]).await;
        assert!(r.is_error());
        assert_eq!(
            run(&db, &["GET", "k"]).await,
            reply::bulk(Bytes::from("hello"))
        );
    }

    #[tokio::test]
    async fn test_incr_decr_and_overflow() {
        let db = test_db();
        assert_eq!(run(&db, &["INCR", "n"]).await, reply::integer(1));
        assert_eq!(run(&db, &["INCRBY", "n", "9"]).await, reply::integer(10));
        assert_eq!(run(&db, &["DECRBY", "n", "3"]).await, reply::integer(7));
        assert_eq!(run(&db, &["DECR", "n"]).await, reply::integer(6));

        run(&db, &["SET", "big", &i64::MAX.to_string()]).await;
        assert!(run(&db, &["INCR", "big"]).await.is_error());
        assert_eq!(
            run(&db, &["GET", "big"]).await,
            reply::bulk(Bytes::from(i64::MAX.to_string()))
        );

        run(&db, &["SET", "txt", "xyz"]).await;
        assert!(run(&db, &["INCR", "txt"]).await.is_error());
    }

    #[tokio::test]
    async fn test_append_strlen() {
        let db = test_db();
        assert_eq!(run(&db, &["APPEND", "s", "ab"]).await, reply::integer(2));
        assert_eq!(run(&db, &["APPEND", "s", "cd"]).await, reply::integer(4));
        assert_eq!(run(&db, &["STRLEN", "s"]).await, reply::integer(4));
        assert_eq!(run(&db, &["STRLEN", "none"]).await, reply::integer(0));
    }

    #[tokio::test]
    async fn test_mset_mget_getset() {
        let db = test_db();
        assert_eq!(run(&db, &["MSET", "a", "1", "b", "2"]).await, reply::ok());
        assert_eq!(
            run(&db, &["MGET", "a", "b", "nope"]).await,
            RespValue::Array(vec![
                RespValue::BulkString(Some(Bytes::from("1"))),
                RespValue::BulkString(Some(Bytes::from("2"))),
                RespValue::BulkString(None),
            ])
        );
        assert_eq!(
            run(&db, &["GETSET", "a", "9"]).await,
            reply::bulk(Bytes::from("1"))
        );
        assert_eq!(run(&db, &["GET", "a"]).await, reply::bulk(Bytes::from("9")));
    }
}
