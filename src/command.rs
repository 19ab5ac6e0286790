//! Command dispatch: one function per wire command, a table tying names to
//! handlers, and the arity/argument plumbing shared by all of them. Every
//! handler takes the raw argument vector (command name included, at index
//! 0) and returns a `Reply` — handlers never see I/O or the socket.

use crate::db::Db;
use crate::error::Error;
use crate::reclaim;
use crate::resp::Reply;

type Args = [Vec<u8>];

fn err(msg: impl Into<String>) -> Reply {
    Reply::Error(format!("ERR {}", msg.into()))
}

fn from_error(e: Error) -> Reply {
    err(e.to_string())
}

fn arity(args: &Args, name: &str, min: usize, max: usize) -> Result<(), Reply> {
    if args.len() < min || args.len() > max {
        return Err(err(format!("wrong number of arguments for '{name}' command")));
    }
    Ok(())
}

fn parse_i64(b: &[u8], what: &str) -> Result<i64, Reply> {
    std::str::from_utf8(b)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| err(format!("{what} is not an integer")))
}

fn parse_f64(b: &[u8], what: &str) -> Result<f64, Reply> {
    std::str::from_utf8(b)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| err(format!("{what} is not a valid float")))
}

/// Dispatches one already-parsed request. `args[0]` is the command name.
pub fn dispatch(db: &Db, args: Vec<Vec<u8>>) -> Reply {
    if args.is_empty() {
        return err("empty command");
    }
    let name = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
    let result = match name.as_str() {
        "PING" => Ok(Reply::Simple("PONG".to_string())),
        "SET" => cmd_set(db, &args),
        "SETNX" => cmd_setnx(db, &args),
        "GET" => cmd_get(db, &args),
        "GETSET" => cmd_getset(db, &args),
        "APPEND" => cmd_append(db, &args),
        "STRLEN" => cmd_strlen(db, &args),
        "STREXISTS" => cmd_strexists(db, &args),
        "STRREM" => cmd_strrem(db, &args),
        "PREFIXSCAN" => cmd_prefix_scan(db, &args),
        "RANGESCAN" => cmd_range_scan(db, &args),
        "EXPIRE" => cmd_expire(db, &args),
        "PERSIST" => cmd_persist(db, &args),
        "TTL" => cmd_ttl(db, &args),

        "LPUSH" => cmd_lpush(db, &args),
        "RPUSH" => cmd_rpush(db, &args),
        "LPOP" => cmd_lpop(db, &args),
        "RPOP" => cmd_rpop(db, &args),
        "LINDEX" => cmd_lindex(db, &args),
        "LLEN" => cmd_llen(db, &args),
        "LKEYEXISTS" => cmd_lkeyexists(db, &args),
        "LVALEXISTS" => cmd_lvalexists(db, &args),
        "LREM" => cmd_lrem(db, &args),
        "LINSERT" => cmd_linsert(db, &args),
        "LSET" => cmd_lset(db, &args),
        "LTRIM" => cmd_ltrim(db, &args),
        "LRANGE" => cmd_lrange(db, &args),

        "HSET" => cmd_hset(db, &args),
        "HSETNX" => cmd_hsetnx(db, &args),
        "HGET" => cmd_hget(db, &args),
        "HGETALL" => cmd_hgetall(db, &args),
        "HDEL" => cmd_hdel(db, &args),
        "HEXISTS" => cmd_hexists(db, &args),
        "HLEN" => cmd_hlen(db, &args),
        "HKEYS" => cmd_hkeys(db, &args),
        "HVALS" => cmd_hvals(db, &args),
        "HMSET" => cmd_hmset(db, &args),
        "HMGET" => cmd_hmget(db, &args),

        "SADD" => cmd_sadd(db, &args),
        "SREM" => cmd_srem(db, &args),
        "SMOVE" => cmd_smove(db, &args),
        "SPOP" => cmd_spop(db, &args),
        "SISMEMBER" => cmd_sismember(db, &args),
        "SRANDMEMBER" => cmd_srandmember(db, &args),
        "SCARD" => cmd_scard(db, &args),
        "SMEMBERS" => cmd_smembers(db, &args),
        "SUNION" => cmd_sunion(db, &args),
        "SDIFF" => cmd_sdiff(db, &args),

        "ZADD" => cmd_zadd(db, &args),
        "ZREM" => cmd_zrem(db, &args),
        "ZSCORE" => cmd_zscore(db, &args),
        "ZCARD" => cmd_zcard(db, &args),
        "ZRANK" => cmd_zrank(db, &args),
        "ZREVRANK" => cmd_zrevrank(db, &args),
        "ZINCRBY" => cmd_zincrby(db, &args),
        "ZGETBYRANK" => cmd_zgetbyrank(db, &args),
        "ZREVGETBYRANK" => cmd_zrevgetbyrank(db, &args),
        "ZSCORERANGE" => cmd_zscorerange(db, &args),
        "ZREVSCORERANGE" => cmd_zrevscorerange(db, &args),
        "ZRANGE" => cmd_zrange(db, &args),
        "ZREVRANGE" => cmd_zrevrange(db, &args),

        "RECLAIM" => cmd_reclaim(db, &args),
        "RECLAIMSEGMENT" => cmd_reclaim_segment(db, &args),

        _ => return err(format!("unknown command '{name}'")),
    };
    match result {
        Ok(reply) => reply,
        Err(reply) => reply,
    }
}

// ---------------- String ----------------

fn cmd_set(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "SET", 3, 3)?;
    db.set(&args[1], &args[2]).map_err(from_error)?;
    Ok(Reply::ok())
}

fn cmd_setnx(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "SETNX", 3, 3)?;
    let created = db.setnx(&args[1], &args[2]).map_err(from_error)?;
    Ok(Reply::Integer(created as i64))
}

fn cmd_get(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "GET", 2, 2)?;
    match db.get(&args[1]) {
        Ok(v) => Ok(Reply::Bulk(v)),
        Err(Error::KeyNotExist) | Err(Error::KeyExpired) => Ok(Reply::Nil),
        Err(e) => Err(from_error(e)),
    }
}

fn cmd_getset(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "GETSET", 3, 3)?;
    let old = db.getset(&args[1], &args[2]).map_err(from_error)?;
    Ok(Reply::from_bulk(old))
}

fn cmd_append(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "APPEND", 3, 3)?;
    db.append(&args[1], &args[2]).map_err(from_error)?;
    Ok(Reply::Integer(db.strlen(&args[1]) as i64))
}

fn cmd_strlen(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "STRLEN", 2, 2)?;
    Ok(Reply::Integer(db.strlen(&args[1]) as i64))
}

fn cmd_strexists(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "STREXISTS", 2, 2)?;
    Ok(Reply::Integer(db.str_exists(&args[1]) as i64))
}

fn cmd_strrem(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "STRREM", 2, 2)?;
    db.strrem(&args[1]).map_err(from_error)?;
    Ok(Reply::ok())
}

fn cmd_prefix_scan(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "PREFIXSCAN", 4, 4)?;
    let limit = parse_i64(&args[2], "limit")?;
    let offset = parse_i64(&args[3], "offset")?;
    let values = db.prefix_scan(&args[1], limit, offset).map_err(from_error)?;
    Ok(Reply::from_bulk_list(values))
}

fn cmd_range_scan(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "RANGESCAN", 3, 3)?;
    let values = db.range_scan(&args[1], &args[2]).map_err(from_error)?;
    Ok(Reply::from_bulk_list(values))
}

fn cmd_expire(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "EXPIRE", 3, 3)?;
    let secs = parse_i64(&args[2], "seconds")?;
    db.expire(&args[1], secs).map_err(from_error)?;
    Ok(Reply::ok())
}

fn cmd_persist(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "PERSIST", 2, 2)?;
    db.persist(&args[1]).map_err(from_error)?;
    Ok(Reply::ok())
}

fn cmd_ttl(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "TTL", 2, 2)?;
    Ok(Reply::Integer(db.ttl(&args[1])))
}

// ---------------- List ----------------

fn cmd_lpush(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "LPUSH", 3, 3)?;
    Ok(Reply::Integer(db.lpush(&args[1], &args[2]).map_err(from_error)? as i64))
}

fn cmd_rpush(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "RPUSH", 3, 3)?;
    Ok(Reply::Integer(db.rpush(&args[1], &args[2]).map_err(from_error)? as i64))
}

fn cmd_lpop(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "LPOP", 2, 2)?;
    Ok(Reply::from_bulk(db.lpop(&args[1]).map_err(from_error)?))
}

fn cmd_rpop(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "RPOP", 2, 2)?;
    Ok(Reply::from_bulk(db.rpop(&args[1]).map_err(from_error)?))
}

fn cmd_lindex(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "LINDEX", 3, 3)?;
    let index = parse_i64(&args[2], "index")?;
    Ok(Reply::from_bulk(db.lindex(&args[1], index)))
}

fn cmd_llen(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "LLEN", 2, 2)?;
    Ok(Reply::Integer(db.llen(&args[1]) as i64))
}

fn cmd_lkeyexists(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "LKEYEXISTS", 2, 2)?;
    Ok(Reply::Integer(db.lkey_exists(&args[1]) as i64))
}

fn cmd_lvalexists(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "LVALEXISTS", 3, 3)?;
    Ok(Reply::Integer(db.lval_exists(&args[1], &args[2]) as i64))
}

fn cmd_lrem(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "LREM", 4, 4)?;
    let count = parse_i64(&args[2], "count")?;
    Ok(Reply::Integer(db.lrem(&args[1], count, &args[3]).map_err(from_error)? as i64))
}

fn cmd_linsert(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "LINSERT", 5, 5)?;
    let before = match args[3].to_ascii_uppercase().as_slice() {
        b"BEFORE" => true,
        b"AFTER" => false,
        _ => return Err(err("syntax error: expected BEFORE or AFTER")),
    };
    match db.linsert(&args[1], &args[2], before, &args[4]).map_err(from_error)? {
        Some(len) => Ok(Reply::Integer(len as i64)),
        None => Ok(Reply::Integer(-1)),
    }
}

fn cmd_lset(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "LSET", 4, 4)?;
    let index = parse_i64(&args[2], "index")?;
    if db.lset(&args[1], index, &args[3]).map_err(from_error)? {
        Ok(Reply::ok())
    } else {
        Err(err("no such key or index out of range"))
    }
}

fn cmd_ltrim(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "LTRIM", 4, 4)?;
    let start = parse_i64(&args[2], "start")?;
    let end = parse_i64(&args[3], "end")?;
    db.ltrim(&args[1], start, end).map_err(from_error)?;
    Ok(Reply::ok())
}

fn cmd_lrange(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "LRANGE", 4, 4)?;
    let start = parse_i64(&args[2], "start")?;
    let end = parse_i64(&args[3], "end")?;
    Ok(Reply::from_bulk_list(db.lrange(&args[1], start, end)))
}

// ---------------- Hash ----------------

fn cmd_hset(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "HSET", 4, 4)?;
    Ok(Reply::Integer(db.hset(&args[1], &args[2], &args[3]).map_err(from_error)? as i64))
}

fn cmd_hsetnx(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "HSETNX", 4, 4)?;
    Ok(Reply::Integer(db.hsetnx(&args[1], &args[2], &args[3]).map_err(from_error)? as i64))
}

fn cmd_hget(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "HGET", 3, 3)?;
    Ok(Reply::from_bulk(db.hget(&args[1], &args[2])))
}

fn cmd_hgetall(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "HGETALL", 2, 2)?;
    let pairs = db.hget_all(&args[1]);
    let mut flat = Vec::with_capacity(pairs.len() * 2);
    for (f, v) in pairs {
        flat.push(f);
        flat.push(v);
    }
    Ok(Reply::from_bulk_list(flat))
}

fn cmd_hdel(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "HDEL", 3, 3)?;
    Ok(Reply::Integer(db.hdel(&args[1], &args[2]).map_err(from_error)? as i64))
}

fn cmd_hexists(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "HEXISTS", 3, 3)?;
    Ok(Reply::Integer(db.hexists(&args[1], &args[2]) as i64))
}

fn cmd_hlen(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "HLEN", 2, 2)?;
    Ok(Reply::Integer(db.hlen(&args[1]) as i64))
}

fn cmd_hkeys(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "HKEYS", 2, 2)?;
    Ok(Reply::from_bulk_list(db.hkeys(&args[1])))
}

fn cmd_hvals(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "HVALS", 2, 2)?;
    Ok(Reply::from_bulk_list(db.hvals(&args[1])))
}

fn cmd_hmset(db: &Db, args: &Args) -> Result<Reply, Reply> {
    if args.len() < 4 || args.len() % 2 != 0 {
        return Err(err("wrong number of arguments for 'HMSET' command"));
    }
    let pairs: Vec<(&[u8], &[u8])> = args[2..].chunks(2).map(|c| (c[0].as_slice(), c[1].as_slice())).collect();
    db.hmset(&args[1], &pairs).map_err(from_error)?;
    Ok(Reply::ok())
}

fn cmd_hmget(db: &Db, args: &Args) -> Result<Reply, Reply> {
    if args.len() < 3 {
        return Err(err("wrong number of arguments for 'HMGET' command"));
    }
    let fields: Vec<&[u8]> = args[2..].iter().map(|f| f.as_slice()).collect();
    let values = db.hmget(&args[1], &fields);
    Ok(Reply::Array(values.into_iter().map(Reply::from_bulk).collect()))
}

// ---------------- Set ----------------

fn cmd_sadd(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "SADD", 3, 3)?;
    Ok(Reply::Integer(db.sadd(&args[1], &args[2]).map_err(from_error)? as i64))
}

fn cmd_srem(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "SREM", 3, 3)?;
    Ok(Reply::Integer(db.srem(&args[1], &args[2]).map_err(from_error)? as i64))
}

fn cmd_smove(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "SMOVE", 4, 4)?;
    Ok(Reply::Integer(db.smove(&args[1], &args[2], &args[3]).map_err(from_error)? as i64))
}

fn cmd_spop(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "SPOP", 3, 3)?;
    let count = parse_i64(&args[2], "count")?;
    Ok(Reply::from_bulk_list(db.spop(&args[1], count).map_err(from_error)?))
}

fn cmd_sismember(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "SISMEMBER", 3, 3)?;
    Ok(Reply::Integer(db.sismember(&args[1], &args[2]) as i64))
}

fn cmd_srandmember(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "SRANDMEMBER", 3, 3)?;
    let count = parse_i64(&args[2], "count")?;
    Ok(Reply::from_bulk_list(db.srandmember(&args[1], count)))
}

fn cmd_scard(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "SCARD", 2, 2)?;
    Ok(Reply::Integer(db.scard(&args[1]) as i64))
}

fn cmd_smembers(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "SMEMBERS", 2, 2)?;
    Ok(Reply::from_bulk_list(db.smembers(&args[1])))
}

fn cmd_sunion(db: &Db, args: &Args) -> Result<Reply, Reply> {
    if args.len() < 2 {
        return Err(err("wrong number of arguments for 'SUNION' command"));
    }
    let keys: Vec<&[u8]> = args[1..].iter().map(|k| k.as_slice()).collect();
    Ok(Reply::from_bulk_list(db.sunion(&keys)))
}

fn cmd_sdiff(db: &Db, args: &Args) -> Result<Reply, Reply> {
    if args.len() < 2 {
        return Err(err("wrong number of arguments for 'SDIFF' command"));
    }
    let keys: Vec<&[u8]> = args[1..].iter().map(|k| k.as_slice()).collect();
    Ok(Reply::from_bulk_list(db.sdiff(&keys)))
}

// ---------------- ZSet ----------------

fn zmember_reply(pairs: Vec<(Vec<u8>, f64)>) -> Reply {
    let mut out = Vec::with_capacity(pairs.len() * 2);
    for (member, score) in pairs {
        out.push(Reply::Bulk(member));
        out.push(Reply::Bulk(score.to_string().into_bytes()));
    }
    Reply::Array(out)
}

fn cmd_zadd(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "ZADD", 4, 4)?;
    let score = parse_f64(&args[2], "score")?;
    db.zadd(&args[1], score, &args[3]).map_err(from_error)?;
    Ok(Reply::ok())
}

fn cmd_zrem(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "ZREM", 3, 3)?;
    Ok(Reply::Integer(db.zrem(&args[1], &args[2]).map_err(from_error)? as i64))
}

fn cmd_zscore(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "ZSCORE", 3, 3)?;
    match db.zscore(&args[1], &args[2]) {
        Some(s) => Ok(Reply::Bulk(s.to_string().into_bytes())),
        None => Ok(Reply::Nil),
    }
}

fn cmd_zcard(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "ZCARD", 2, 2)?;
    Ok(Reply::Integer(db.zcard(&args[1]) as i64))
}

fn cmd_zrank(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "ZRANK", 3, 3)?;
    match db.zrank(&args[1], &args[2]) {
        Some(r) => Ok(Reply::Integer(r as i64)),
        None => Ok(Reply::Nil),
    }
}

fn cmd_zrevrank(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "ZREVRANK", 3, 3)?;
    match db.zrevrank(&args[1], &args[2]) {
        Some(r) => Ok(Reply::Integer(r as i64)),
        None => Ok(Reply::Nil),
    }
}

fn cmd_zincrby(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "ZINCRBY", 4, 4)?;
    let delta = parse_f64(&args[3], "increment")?;
    let score = db.zincrby(&args[1], &args[2], delta).map_err(from_error)?;
    Ok(Reply::Bulk(score.to_string().into_bytes()))
}

fn cmd_zgetbyrank(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "ZGETBYRANK", 3, 3)?;
    let rank = parse_i64(&args[2], "rank")?.max(0) as u64;
    match db.zget_by_rank(&args[1], rank) {
        Some((m, s)) => Ok(zmember_reply(vec![(m, s)])),
        None => Ok(Reply::Array(Vec::new())),
    }
}

fn cmd_zrevgetbyrank(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "ZREVGETBYRANK", 3, 3)?;
    let rank = parse_i64(&args[2], "rank")?.max(0) as u64;
    match db.zrevget_by_rank(&args[1], rank) {
        Some((m, s)) => Ok(zmember_reply(vec![(m, s)])),
        None => Ok(Reply::Array(Vec::new())),
    }
}

fn cmd_zscorerange(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "ZSCORERANGE", 4, 4)?;
    let min = parse_f64(&args[2], "min")?;
    let max = parse_f64(&args[3], "max")?;
    Ok(zmember_reply(db.zscore_range(&args[1], min, max)))
}

fn cmd_zrevscorerange(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "ZREVSCORERANGE", 4, 4)?;
    let max = parse_f64(&args[2], "max")?;
    let min = parse_f64(&args[3], "min")?;
    Ok(zmember_reply(db.zrev_score_range(&args[1], max, min)))
}

fn cmd_zrange(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "ZRANGE", 4, 4)?;
    let start = parse_i64(&args[2], "start")?;
    let end = parse_i64(&args[3], "end")?;
    Ok(zmember_reply(db.zrange(&args[1], start, end)))
}

fn cmd_zrevrange(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "ZREVRANGE", 4, 4)?;
    let start = parse_i64(&args[2], "start")?;
    let end = parse_i64(&args[3], "end")?;
    Ok(zmember_reply(db.zrevrange(&args[1], start, end)))
}

// ---------------- Admin ----------------

fn cmd_reclaim(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "RECLAIM", 1, 1)?;
    reclaim::full_reclaim(db).map_err(from_error)?;
    Ok(Reply::ok())
}

fn cmd_reclaim_segment(db: &Db, args: &Args) -> Result<Reply, Reply> {
    arity(args, "RECLAIMSEGMENT", 1, 1)?;
    reclaim::single_segment_reclaim(db).map_err(from_error)?;
    Ok(Reply::ok())
}
