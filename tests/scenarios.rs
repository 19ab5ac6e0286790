//! End-to-end scenarios S1–S6 from the design's testable-properties list,
//! driven through the public `Db` facade rather than the wire protocol.

use stratadb::config::Config;
use stratadb::db::Db;
use stratadb::error::Error;
use stratadb::reclaim;
use tempfile::TempDir;

fn open_db(dir: &TempDir) -> Db {
    let mut config = Config::default();
    config.dir_path = dir.path().to_path_buf();
    Db::open(config).unwrap()
}

fn open_db_with_block_size(dir: &TempDir, block_size: u64) -> Db {
    let mut config = Config::default();
    config.dir_path = dir.path().to_path_buf();
    config.block_size = block_size;
    config.reclaim_threshold = 2;
    Db::open(config).unwrap()
}

/// S1: string set/get survives a close + reopen.
#[test]
fn s1_string_set_get_across_restart() {
    let dir = TempDir::new().unwrap();
    {
        let db = open_db(&dir);
        db.set(b"foo", b"bar").unwrap();
        assert_eq!(db.get(b"foo").unwrap(), b"bar");
        db.close().unwrap();
    }
    let db = Db::reopen(dir.path()).unwrap();
    assert_eq!(db.get(b"foo").unwrap(), b"bar");
}

/// S2: an expired key reports KeyExpired and TTL collapses to 0.
#[test]
fn s2_expire_then_get() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    db.set(b"foo", b"bar").unwrap();
    db.expire(b"foo", 1).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(2000));
    assert!(matches!(db.get(b"foo"), Err(Error::KeyExpired)));
    assert_eq!(db.ttl(b"foo"), 0);
}

/// S3: sorted-set ranks and inclusive score range.
#[test]
fn s3_sorted_set_ranks() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    db.zadd(b"k", 1.0, b"a").unwrap();
    db.zadd(b"k", 2.0, b"b").unwrap();
    db.zadd(b"k", 3.0, b"c").unwrap();
    assert_eq!(db.zrank(b"k", b"b"), Some(1));
    assert_eq!(db.zrevrank(b"k", b"b"), Some(1));
    let range = db.zscore_range(b"k", 1.0, 2.0);
    assert_eq!(range, vec![(b"a".to_vec(), 1.0), (b"b".to_vec(), 2.0)]);
}

/// S4: list trim keeps the middle slice and reports the new length.
#[test]
fn s4_list_trim() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    for v in [b"a", b"b", b"c", b"d", b"e"] {
        db.rpush(b"k", v).unwrap();
    }
    db.ltrim(b"k", 1, 3).unwrap();
    assert_eq!(db.lrange(b"k", 0, -1), vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
    assert_eq!(db.llen(b"k"), 3);
}

/// S5: set difference excludes members present in any of the other sets.
#[test]
fn s5_set_difference() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    for m in [b"1", b"2", b"3"] {
        db.sadd(b"a", m).unwrap();
    }
    db.sadd(b"b", b"2").unwrap();
    db.sadd(b"c", b"3").unwrap();
    let mut diff = db.sdiff(&[b"a", b"b", b"c"]);
    diff.sort();
    assert_eq!(diff, vec![b"1".to_vec()]);
}

/// S6: small BlockSize rotates the String segment family into multiple
/// files, every write remains readable, and full reclaim does not lose any
/// live value once the archived-segment count crosses the threshold.
#[test]
fn s6_segment_rotation_and_reclaim() {
    let dir = TempDir::new().unwrap();
    let db = open_db_with_block_size(&dir, 2048);

    for i in 0..200 {
        let key = format!("k{i}");
        db.set(key.as_bytes(), &vec![b'x'; 32]).unwrap();
    }
    for i in 0..200 {
        let key = format!("k{i}");
        assert_eq!(db.get(key.as_bytes()).unwrap(), vec![b'x'; 32]);
    }

    let segment_files = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".data.str"))
        .count();
    assert!(segment_files > 2, "expected rotation to produce multiple segment files, got {segment_files}");

    reclaim::full_reclaim(&db).unwrap();

    for i in 0..200 {
        let key = format!("k{i}");
        assert_eq!(db.get(key.as_bytes()).unwrap(), vec![b'x'; 32]);
    }
}
