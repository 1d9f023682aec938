//! Sorted-set commands.

use super::*;
use crate::db::Db;
use crate::entity::{format_score, DataEntity};
use crate::registry::{insert, AofCtx, Command, Flag};
use std::collections::HashMap;
use storage::{ScoreBound, SortedSet};

type Outcome = (RespValue, Option<AofCtx>);

fn with_zset<R>(db: &Db, key: &[u8], f: impl FnOnce(&mut SortedSet) -> R) -> Result<Option<R>, RespValue> {
    match db.with_entity_mut(key, |e| e.as_zset_mut().map(f)) {
        None => Ok(None),
        Some(Some(r)) => Ok(Some(r)),
        Some(None) => Err(reply::wrong_type()),
    }
}

fn parse_bound(raw: &[u8]) -> Result<ScoreBound, RespValue> {
    ScoreBound::parse(raw).ok_or_else(|| reply::err("ERR min or max is not a float"))
}

/// Flatten (member, score) pairs into a reply, appending scores when asked.
fn pairs_reply(pairs: Vec<(Bytes, f64)>, with_scores: bool) -> RespValue {
    let mut out = Vec::with_capacity(pairs.len() * if with_scores { 2 } else { 1 });
    for (member, score) in pairs {
        out.push(member);
        if with_scores {
            out.push(Bytes::from(format_score(score)));
        }
    }
    reply::multi_bulk(out)
}

fn exec_zadd(db: &Db, args: &[Bytes]) -> Outcome {
    if args.len() % 2 != 1 {
        return (reply::syntax(), None);
    }
    let mut elements = Vec::with_capacity((args.len() - 1) / 2);
    for pair in args[1..].chunks(2) {
        let score = match parse_f64(&pair[0]) {
            Ok(s) => s,
            Err(e) => return (e, None),
        };
        elements.push((pair[1].clone(), score));
    }

    let added = db.entry(
        args[0].clone(),
        || DataEntity::SortedSet(SortedSet::new()),
        |entity| {
            entity.as_zset_mut().map(|zset| {
                elements
                    .iter()
                    .filter(|(member, score)| zset.add(member.clone(), *score))
                    .count()
            })
        },
    );
    match added {
        Some(n) => (reply::integer(n as i64), AofCtx::save()),
        None => (reply::wrong_type(), None),
    }
}

fn exec_zcard(db: &Db, args: &[Bytes]) -> Outcome {
    match with_zset(db, &args[0], |z| z.len()) {
        Ok(len) => (reply::integer(len.unwrap_or(0) as i64), None),
        Err(e) => (e, None),
    }
}

fn exec_zscore(db: &Db, args: &[Bytes]) -> Outcome {
    match with_zset(db, &args[0], |z| z.score(&args[1])) {
        Ok(Some(Some(score))) => (reply::bulk(Bytes::from(format_score(score))), None),
        Ok(_) => (reply::null_bulk(), None),
        Err(e) => (e, None),
    }
}

fn exec_zcount(db: &Db, args: &[Bytes]) -> Outcome {
    let min = match parse_bound(&args[1]) {
        Ok(b) => b,
        Err(e) => return (e, None),
    };
    let max = match parse_bound(&args[2]) {
        Ok(b) => b,
        Err(e) => return (e, None),
    };
    match with_zset(db, &args[0], |z| z.count(min, max)) {
        Ok(n) => (reply::integer(n.unwrap_or(0) as i64), None),
        Err(e) => (e, None),
    }
}

fn exec_zincrby(db: &Db, args: &[Bytes]) -> Outcome {
    let delta = match parse_f64(&args[1]) {
        Ok(d) => d,
        Err(e) => return (e, None),
    };
    let member = args[2].clone();
    let next = db.entry(
        args[0].clone(),
        || DataEntity::SortedSet(SortedSet::new()),
        |entity| {
            entity.as_zset_mut().map(|zset| {
                let next = zset.score(&member).unwrap_or(0.0) + delta;
                zset.add(member.clone(), next);
                next
            })
        },
    );
    match next {
        Some(score) => (reply::bulk(Bytes::from(format_score(score))), AofCtx::save()),
        None => (reply::wrong_type(), None),
    }
}

fn exec_zrem(db: &Db, args: &[Bytes]) -> Outcome {
    let members = &args[1..];
    let removed = match with_zset(db, &args[0], |zset| {
        let n = members.iter().filter(|m| zset.remove(m)).count();
        (n, zset.is_empty())
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

fn rank_reply(rank: Option<Option<usize>>) -> RespValue {
    match rank.flatten() {
        Some(r) => reply::integer(r as i64),
        None => reply::null_bulk(),
    }
}

fn exec_zrank(db: &Db, args: &[Bytes]) -> Outcome {
    match with_zset(db, &args[0], |z| z.rank(&args[1])) {
        Ok(rank) => (rank_reply(rank), None),
        Err(e) => (e, None),
    }
}

fn exec_zrevrank(db: &Db, args: &[Bytes]) -> Outcome {
    match with_zset(db, &args[0], |z| z.rev_rank(&args[1])) {
        Ok(rank) => (rank_reply(rank), None),
        Err(e) => (e, None),
    }
}

fn parse_with_scores(args: &[Bytes]) -> Result<bool, RespValue> {
    match args {
        [] => Ok(false),
        [flag] if flag.eq_ignore_ascii_case(b"WITHSCORES") => Ok(true),
        _ => Err(reply::syntax()),
    }
}

fn range_by_rank(db: &Db, args: &[Bytes], rev: bool) -> Outcome {
    let start = match parse_i64(&args[1]) {
        Ok(n) => n,
        Err(e) => return (e, None),
    };
    let stop = match parse_i64(&args[2]) {
        Ok(n) => n,
        Err(e) => return (e, None),
    };
    let with_scores = match parse_with_scores(&args[3..]) {
        Ok(b) => b,
        Err(e) => return (e, None),
    };

    let pairs = match with_zset(db, &args[0], |zset| {
        let len = zset.len();
        let Some((from, to)) = normalize_range(start, stop, len) else {
            return Vec::new();
        };
        if rev {
            // descending rank r maps to ascending rank len-1-r
            let mut pairs = zset.range_by_rank(len - 1 - to, len - 1 - from);
            pairs.reverse();
            pairs
        } else {
            zset.range_by_rank(from, to)
        }
    }) {
        Ok(v) => v.unwrap_or_default(),
        Err(e) => return (e, None),
    };
    (pairs_reply(pairs, with_scores), None)
}

fn exec_zrange(db: &Db, args: &[Bytes]) -> Outcome {
    range_by_rank(db, args, false)
}

fn exec_zrevrange(db: &Db, args: &[Bytes]) -> Outcome {
    range_by_rank(db, args, true)
}

struct ScoreRangeOpts {
    with_scores: bool,
    offset: usize,
    count: Option<usize>,
}

fn parse_score_range_opts(args: &[Bytes]) -> Result<ScoreRangeOpts, RespValue> {
    let mut opts = ScoreRangeOpts {
        with_scores: false,
        offset: 0,
        count: None,
    };
    let mut i = 0;
    while i < args.len() {
        if args[i].eq_ignore_ascii_case(b"WITHSCORES") {
            opts.with_scores = true;
            i += 1;
        } else if args[i].eq_ignore_ascii_case(b"LIMIT") {
            let (Some(off), Some(cnt)) = (args.get(i + 1), args.get(i + 2)) else {
                return Err(reply::syntax());
            };
            let off = parse_i64(off)?;
            let cnt = parse_i64(cnt)?;
            opts.offset = off.max(0) as usize;
            // a negative count means "all from offset"
            opts.count = if cnt < 0 { None } else { Some(cnt as usize) };
            i += 3;
        } else {
            return Err(reply::syntax());
        }
    }
    Ok(opts)
}

fn range_by_score(db: &Db, args: &[Bytes], rev: bool) -> Outcome {
    // ZREVRANGEBYSCORE takes max before min
    let (min_raw, max_raw) = if rev {
        (&args[2], &args[1])
    } else {
        (&args[1], &args[2])
    };
    let min = match parse_bound(min_raw) {
        Ok(b) => b,
        Err(e) => return (e, None),
    };
    let max = match parse_bound(max_raw) {
        Ok(b) => b,
        Err(e) => return (e, None),
    };
    let opts = match parse_score_range_opts(&args[3..]) {
        Ok(o) => o,
        Err(e) => return (e, None),
    };

    let pairs = match with_zset(db, &args[0], |zset| {
        let mut pairs = zset.range_by_score(min, max);
        if rev {
            pairs.reverse();
        }
        pairs
    }) {
        Ok(v) => v.unwrap_or_default(),
        Err(e) => return (e, None),
    };

    let pairs: Vec<(Bytes, f64)> = match opts.count {
        Some(count) => pairs.into_iter().skip(opts.offset).take(count).collect(),
        None => pairs.into_iter().skip(opts.offset).collect(),
    };
    (pairs_reply(pairs, opts.with_scores), None)
}

fn exec_zrangebyscore(db: &Db, args: &[Bytes]) -> Outcome {
    range_by_score(db, args, false)
}

fn exec_zrevrangebyscore(db: &Db, args: &[Bytes]) -> Outcome {
    range_by_score(db, args, true)
}

fn exec_zremrangebyrank(db: &Db, args: &[Bytes]) -> Outcome {
    let start = match parse_i64(&args[1]) {
        Ok(n) => n,
        Err(e) => return (e, None),
    };
    let stop = match parse_i64(&args[2]) {
        Ok(n) => n,
        Err(e) => return (e, None),
    };
    let removed = match with_zset(db, &args[0], |zset| {
        let removed = match normalize_range(start, stop, zset.len()) {
            Some((from, to)) => zset.remove_range_by_rank(from, to),
            None => 0,
        };
        (removed, zset.is_empty())
    }) {
        Ok(v) => v,
        Err(e) => return (e, None),
    };
    finish_removal(db, &args[0], removed)
}

fn exec_zremrangebyscore(db: &Db, args: &[Bytes]) -> Outcome {
    let min = match parse_bound(&args[1]) {
        Ok(b) => b,
        Err(e) => return (e, None),
    };
    let max = match parse_bound(&args[2]) {
        Ok(b) => b,
        Err(e) => return (e, None),
    };
    let removed = match with_zset(db, &args[0], |zset| {
        let removed = zset.remove_range_by_score(min, max);
        (removed, zset.is_empty())
    }) {
        Ok(v) => v,
        Err(e) => return (e, None),
    };
    finish_removal(db, &args[0], removed)
}

fn finish_removal(db: &Db, key: &[u8], removed: Option<(usize, bool)>) -> Outcome {
    match removed {
        Some((n, emptied)) => {
            if emptied {
                db.remove_key(key);
            }
            let ctx = if n > 0 { AofCtx::save() } else { None };
            (reply::integer(n as i64), ctx)
        }
        None => (reply::integer(0), None),
    }
}

pub(crate) fn register(table: &mut HashMap<&'static str, Command>) {
    insert(table, "zadd", exec_zadd, write_first_key, -4, Flag::Write);
    insert(table, "zcard", exec_zcard, read_first_key, 2, Flag::ReadOnly);
    insert(table, "zscore", exec_zscore, read_first_key, 3, Flag::ReadOnly);
    insert(table, "zcount", exec_zcount, read_first_key, 4, Flag::ReadOnly);
    insert(table, "zincrby", exec_zincrby, write_first_key, 4, Flag::Write);
    insert(table, "zrem", exec_zrem, write_first_key, -3, Flag::Write);
    insert(table, "zrank", exec_zrank, read_first_key, 3, Flag::ReadOnly);
    insert(table, "zrevrank", exec_zrevrank, read_first_key, 3, Flag::ReadOnly);
    insert(table, "zrange", exec_zrange, read_first_key, -4, Flag::ReadOnly);
    insert(table, "zrevrange", exec_zrevrange, read_first_key, -4, Flag::ReadOnly);
    insert(table, "zrangebyscore", exec_zrangebyscore, read_first_key, -4, Flag::ReadOnly);
    insert(table, "zrevrangebyscore", exec_zrevrangebyscore, read_first_key, -4, Flag::ReadOnly);
    insert(table, "zremrangebyrank", exec_zremrangebyrank, write_first_key, 4, Flag::Write);
    insert(table, "zremrangebyscore", exec_zremrangebyscore, write_first_key, 4, Flag::Write);
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

    fn bulks(items: &[&str]) -> RespValue {
        reply::multi_bulk(items.iter().map(|s| Bytes::copy_from_slice(s.as_bytes())).collect())
    }

    #[tokio::test]
    async fn test_zadd_zscore_zcard() {
        let db = test_db();
        assert_eq!(
            run(&db, &["ZADD", "z", "1", "a", "2", "b"]).await,
            reply::integer(2)
        );
        assert_eq!(run(&db, &["ZADD", "z", "5", "a"]).await, reply::integer(0));
        assert_eq!(run(&db, &["ZCARD", "z"]).await, reply::integer(2));
        assert_eq!(run(&db, &["ZSCORE", "z", "a"]).await, reply::bulk(Bytes::from("5")));
        assert_eq!(run(&db, &["ZSCORE", "z", "q"]).await, reply::null_bulk());
        assert!(run(&db, &["ZADD", "z", "nan", "m"]).await.is_error());
    }

    #[tokio::test]
    async fn test_zrange_withscores() {
        let db = test_db();
        run(&db, &["ZADD", "z", "1", "a", "2", "b", "3", "c"]).await;
        assert_eq!(run(&db, &["ZRANGE", "z", "0", "-1"]).await, bulks(&["a", "b", "c"]));
        assert_eq!(
            run(&db, &["ZRANGE", "z", "0", "1", "WITHSCORES"]).await,
            bulks(&["a", "1", "b", "2"])
        );
        assert_eq!(run(&db, &["ZREVRANGE", "z", "0", "1"]).await, bulks(&["c", "b"]));
    }

    #[tokio::test]
    async fn test_zrangebyscore_borders_and_limit() {
        let db = test_db();
        run(&db, &["ZADD", "z", "1", "a", "2", "b", "3", "c", "4", "d"]).await;
        assert_eq!(
            run(&db, &["ZRANGEBYSCORE", "z", "(1", "3", "WITHSCORES"]).await,
            bulks(&["b", "2", "c", "3"])
        );
        assert_eq!(
            run(&db, &["ZRANGEBYSCORE", "z", "-inf", "+inf", "LIMIT", "1", "2"]).await,
            bulks(&["b", "c"])
        );
        assert_eq!(
            run(&db, &["ZREVRANGEBYSCORE", "z", "3", "1"]).await,
            bulks(&["c", "b", "a"])
        );
    }

    #[tokio::test]
    async fn test_zrank_and_removals() {
        let db = test_db();
        run(&db, &["ZADD", "z", "1", "a", "2", "b", "3", "c", "4", "d"]).await;
        assert_eq!(run(&db, &["ZRANK", "z", "c"]).await, reply::integer(2));
        assert_eq!(run(&db, &["ZREVRANK", "z", "c"]).await, reply::integer(1));
        assert_eq!(run(&db, &["ZRANK", "z", "missing"]).await, reply::null_bulk());

        assert_eq!(run(&db, &["ZREMRANGEBYSCORE", "z", "2", "3"]).await, reply::integer(2));
        assert_eq!(run(&db, &["ZRANGE", "z", "0", "-1"]).await, bulks(&["a", "d"]));
        assert_eq!(run(&db, &["ZREM", "z", "a", "nope"]).await, reply::integer(1));
        assert_eq!(run(&db, &["ZREMRANGEBYRANK", "z", "0", "0"]).await, reply::integer(1));
        // empty zset is removed from the key space
        assert_eq!(run(&db, &["EXISTS", "z"]).await, reply::integer(0));
    }

    #[tokio::test]
    async fn test_zincrby_zcount() {
        let db = test_db();
        assert_eq!(
            run(&db, &["ZINCRBY", "z", "2.5", "m"]).await,
            reply::bulk(Bytes::from("2.5"))
        );
        assert_eq!(
            run(&db, &["ZINCRBY", "z", "2.5", "m"]).await,
            reply::bulk(Bytes::from("5"))
        );
        run(&db, &["ZADD", "z", "1", "n"]).await;
        assert_eq!(run(&db, &["ZCOUNT", "z", "1", "5"]).await, reply::integer(2));
        assert_eq!(run(&db, &["ZCOUNT", "z", "(1", "5"]).await, reply::integer(1));
    }
}
