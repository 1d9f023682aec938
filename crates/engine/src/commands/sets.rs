//! Set commands, including the algebra and `*STORE` variants.

use super::*;
use crate::db::Db;
use crate::entity::DataEntity;
use crate::registry::{insert, AofCtx, Command, Flag};
use std::collections::{HashMap, HashSet};
use storage::Set;

type Outcome = (RespValue, Option<AofCtx>);

fn with_set<R>(db: &Db, key: &[u8], f: impl FnOnce(&Set) -> R) -> Result<Option<R>, RespValue> {
    match db.with_entity(key, |e| e.as_set().map(f)) {
        None => Ok(None),
        Some(Some(r)) => Ok(Some(r)),
        Some(None) => Err(reply::wrong_type()),
    }
}

/// Member sets of every named key; absent keys are empty sets.
fn member_sets(db: &Db, keys: &[Bytes]) -> Result<Vec<HashSet<Bytes>>, RespValue> {
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        let members = with_set(db, key, |set| set.members())?;
        out.push(members.unwrap_or_default().into_iter().collect());
    }
    Ok(out)
}

fn exec_sadd(db: &Db, args: &[Bytes]) -> Outcome {
    let members = &args[1..];
    let added = db.entry(
        args[0].clone(),
        || DataEntity::Set(Set::new()),
        |entity| {
            entity
                .as_set()
                .map(|set| members.iter().map(|m| set.add(m.clone())).sum::<usize>())
        },
    );
    match added {
        Some(n) => {
            let ctx = if n > 0 { AofCtx::save() } else { None };
            (reply::integer(n as i64), ctx)
        }
        None => (reply::wrong_type(), None),
    }
}

fn exec_srem(db: &Db, args: &[Bytes]) -> Outcome {
    let members = &args[1..];
    let removed = match with_set(db, &args[0], |set| {
        let n: usize = members.iter().map(|m| set.remove(m)).sum();
        (n, set.is_empty())
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

fn exec_scard(db: &Db, args: &[Bytes]) -> Outcome {
    match with_set(db, &args[0], |set| set.len()) {
        Ok(len) => (reply::integer(len.unwrap_or(0) as i64), None),
        Err(e) => (e, None),
    }
}

fn exec_sismember(db: &Db, args: &[Bytes]) -> Outcome {
    match with_set(db, &args[0], |set| set.contains(&args[1])) {
        Ok(Some(true)) => (reply::integer(1), None),
        Ok(_) => (reply::integer(0), None),
        Err(e) => (e, None),
    }
}

fn exec_smembers(db: &Db, args: &[Bytes]) -> Outcome {
    match with_set(db, &args[0], |set| set.members()) {
        Ok(v) => (reply::multi_bulk(v.unwrap_or_default()), None),
        Err(e) => (e, None),
    }
}

fn exec_spop(db: &Db, args: &[Bytes]) -> Outcome {
    let (count, with_count) = match args.get(1) {
        Some(raw) => match parse_i64(raw) {
            Ok(n) if n >= 0 => (n as usize, true),
            Ok(_) => return (reply::not_integer(), None),
            Err(e) => return (e, None),
        },
        None => (1, false),
    };

    let popped = match with_set(db, &args[0], |set| {
        let victims = set.random_distinct_members(count);
        for member in &victims {
            set.remove(member);
        }
        (victims, set.is_empty())
    }) {
        Ok(v) => v,
        Err(e) => return (e, None),
    };

    match popped {
        Some((victims, emptied)) => {
            if emptied {
                db.remove_key(&args[0]);
            }
            let ctx = if victims.is_empty() { None } else { AofCtx::save() };
            if with_count {
                (reply::multi_bulk(victims), ctx)
            } else {
                match victims.into_iter().next() {
                    Some(member) => (reply::bulk(member), ctx),
                    None => (reply::null_bulk(), None),
                }
            }
        }
        None => {
            if with_count {
                (reply::empty_multi_bulk(), None)
            } else {
                (reply::null_bulk(), None)
            }
        }
    }
}

fn exec_srandmember(db: &Db, args: &[Bytes]) -> Outcome {
    let (count, with_count) = match args.get(1) {
        Some(raw) => match parse_i64(raw) {
            Ok(n) => (n, true),
            Err(e) => return (e, None),
        },
        None => (1, false),
    };

    let sampled = match with_set(db, &args[0], |set| {
        if count >= 0 {
            set.random_distinct_members(count as usize)
        } else {
            set.random_members(count.unsigned_abs() as usize)
        }
    }) {
        Ok(v) => v,
        Err(e) => return (e, None),
    };

    match sampled {
        Some(members) if with_count => (reply::multi_bulk(members), None),
        Some(members) => match members.into_iter().next() {
            Some(member) => (reply::bulk(member), None),
            None => (reply::null_bulk(), None),
        },
        None if with_count => (reply::empty_multi_bulk(), None),
        None => (reply::null_bulk(), None),
    }
}

fn diff(sets: Vec<HashSet<Bytes>>) -> HashSet<Bytes> {
    let mut iter = sets.into_iter();
    let mut result = iter.next().unwrap_or_default();
    for other in iter {
        result.retain(|m| !other.contains(m));
    }
    result
}

fn inter(sets: Vec<HashSet<Bytes>>) -> HashSet<Bytes> {
    let mut iter = sets.into_iter();
    let mut result = iter.next().unwrap_or_default();
    for other in iter {
        result.retain(|m| other.contains(m));
    }
    result
}

fn union(sets: Vec<HashSet<Bytes>>) -> HashSet<Bytes> {
    let mut result = HashSet::new();
    for set in sets {
        result.extend(set);
    }
    result
}

fn algebra(db: &Db, keys: &[Bytes], op: fn(Vec<HashSet<Bytes>>) -> HashSet<Bytes>) -> Result<HashSet<Bytes>, RespValue> {
    Ok(op(member_sets(db, keys)?))
}

fn exec_sdiff(db: &Db, args: &[Bytes]) -> Outcome {
    match algebra(db, args, diff) {
        Ok(members) => (reply::multi_bulk(members.into_iter().collect()), None),
        Err(e) => (e, None),
    }
}

fn exec_sinter(db: &Db, args: &[Bytes]) -> Outcome {
    match algebra(db, args, inter) {
        Ok(members) => (reply::multi_bulk(members.into_iter().collect()), None),
        Err(e) => (e, None),
    }
}

fn exec_sunion(db: &Db, args: &[Bytes]) -> Outcome {
    match algebra(db, args, union) {
        Ok(members) => (reply::multi_bulk(members.into_iter().collect()), None),
        Err(e) => (e, None),
    }
}

fn store(db: &Db, args: &[Bytes], op: fn(Vec<HashSet<Bytes>>) -> HashSet<Bytes>) -> Outcome {
    let members = match algebra(db, &args[1..], op) {
        Ok(m) => m,
        Err(e) => return (e, None),
    };
    let dest = args[0].clone();
    if members.is_empty() {
        // storing an empty result deletes the destination
        db.remove_key(&dest);
        return (reply::integer(0), AofCtx::save());
    }
    let set = Set::new();
    for member in &members {
        set.add(member.clone());
    }
    let len = set.len();
    db.put_entity(dest.clone(), DataEntity::Set(set));
    db.persist(&dest);
    (reply::integer(len as i64), AofCtx::save())
}

fn exec_sdiffstore(db: &Db, args: &[Bytes]) -> Outcome {
    store(db, args, diff)
}

fn exec_sinterstore(db: &Db, args: &[Bytes]) -> Outcome {
    store(db, args, inter)
}

fn exec_sunionstore(db: &Db, args: &[Bytes]) -> Outcome {
    store(db, args, union)
}

pub(crate) fn register(table: &mut HashMap<&'static str, Command>) {
    insert(table, "sadd", exec_sadd, write_first_key, -3, Flag::Write);
    insert(table, "srem", exec_srem, write_first_key, -3, Flag::Write);
    insert(table, "scard", exec_scard, read_first_key, 2, Flag::ReadOnly);
    insert(table, "sismember", exec_sismember, read_first_key, 3, Flag::ReadOnly);
    insert(table, "smembers", exec_smembers, read_first_key, 2, Flag::ReadOnly);
    insert(table, "spop", exec_spop, write_first_key, -2, Flag::Write);
    insert(table, "srandmember", exec_srandmember, read_first_key, -2, Flag::ReadOnly);
    insert(table, "sdiff", exec_sdiff, set_calculate_keys, -2, Flag::ReadOnly);
    insert(table, "sinter", exec_sinter, set_calculate_keys, -2, Flag::ReadOnly);
    insert(table, "sunion", exec_sunion, set_calculate_keys, -2, Flag::ReadOnly);
    insert(table, "sdiffstore", exec_sdiffstore, set_calculate_store_keys, -3, Flag::Write);
    insert(table, "sinterstore", exec_sinterstore, set_calculate_store_keys, -3, Flag::Write);
    insert(table, "sunionstore", exec_sunionstore, set_calculate_store_keys, -3, Flag::Write);
}
