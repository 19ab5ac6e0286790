//! Compaction. Two algorithms, matching the two ways a segment can go stale:
//!
//! - [`full_reclaim`] rebuilds every type's segments from the current
//!   in-memory state. Since List/Hash/Set/ZSet are always fully resident,
//!   "still live" for them just means "still in the index" — there is no
//!   cheaper validity check than the index itself, so full reclaim
//!   re-derives a minimal entry sequence per key directly from memory.
//! - [`single_segment_reclaim`] targets one archived String segment and
//!   keeps only the entries the String index still points at — the
//!   validity predicate this module is named for — appending survivors to
//!   the active segment. Only String supports this because only String
//!   carries locators back into specific segments.
//!
//! Both take every relevant lock in the fixed order *type bucket(s), then
//! segments* that `Db`'s normal write path also uses (see `db.rs`), so
//! reclaim can never deadlock against a concurrent client operation.

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use tracing::info;

use crate::config::IdxMode;
use crate::db::{format_score, Db, Segments, StringBucket};
use crate::entry::{self, opcode, DataType, Entry};
use crate::error::{Error, Result};
use crate::index::Locator;
use crate::segment::{segment_file_name, RwMethod, Segment};

pub fn full_reclaim(db: &Db) -> Result<()> {
    if db.is_reclaiming.swap(true, Ordering::SeqCst) {
        return Err(Error::DbIsReclaiming);
    }
    let result = full_reclaim_inner(db);
    db.is_reclaiming.store(false, Ordering::SeqCst);
    result
}

fn archived_count(segments: &Segments, data_type: DataType) -> usize {
    segments.archived.get(&data_type).map(|m| m.len()).unwrap_or(0)
}

fn reclaim_threshold_reached(segments: &Segments, threshold: usize) -> bool {
    DataType::ALL.iter().any(|dt| archived_count(segments, *dt) >= threshold)
}

fn full_reclaim_inner(db: &Db) -> Result<()> {
    let string_b = db.string_b.write()?;
    let list_b = db.list_b.write()?;
    let hash_b = db.hash_b.write()?;
    let set_b = db.set_b.write()?;
    let zset_b = db.zset_b.write()?;
    let mut segments = db.segments.write()?;

    if !reclaim_threshold_reached(&segments, db.config.reclaim_threshold) {
        return Err(Error::ReclaimUnreached);
    }

    // Per spec: each type is reclaimed independently — a type below its own
    // archived-segment threshold keeps its existing segments untouched.
    let due: Vec<DataType> =
        DataType::ALL.iter().copied().filter(|dt| archived_count(&segments, *dt) >= db.config.reclaim_threshold).collect();

    let tmp_dir = segments.dir.join("reclaim.tmp");
    std::fs::create_dir_all(&tmp_dir)?;

    let mut rebuilt: HashMap<DataType, (HashMap<u32, Segment>, Segment)> = HashMap::new();
    for data_type in &due {
        let entries = match data_type {
            DataType::String => build_string_entries(&mut segments, &string_b, db.config.idx_mode)?,
            DataType::List => build_list_entries(&list_b),
            DataType::Hash => build_hash_entries(&hash_b),
            DataType::Set => build_set_entries(&set_b),
            DataType::ZSet => build_zset_entries(&zset_b),
        };
        let built = write_compacted(&tmp_dir, *data_type, &entries, db.config.rw_method, db.config.block_size)?;
        rebuilt.insert(*data_type, built);
    }

    for data_type in due {
        if let Some(old_active) = segments.active.remove(&data_type) {
            let _ = std::fs::remove_file(old_active.path());
        }
        if let Some(old_archived) = segments.archived.remove(&data_type) {
            for (id, seg) in old_archived {
                let _ = std::fs::remove_file(seg.path());
                segments.meta.reclaimable_space.remove(&id);
            }
        }

        let (archived_new, active_new) = rebuilt.remove(&data_type).expect("built above");
        for id in archived_new.keys() {
            let name = segment_file_name(*id, data_type);
            std::fs::rename(tmp_dir.join(&name), segments.dir.join(&name))?;
        }
        let active_name = segment_file_name(active_new.id, data_type);
        std::fs::rename(tmp_dir.join(&active_name), segments.dir.join(&active_name))?;

        segments.meta.set_offset(data_type, active_new.offset);
        segments.active.insert(data_type, active_new);
        segments.archived.insert(data_type, archived_new);
    }
    segments.meta.store(&segments.dir)?;
    std::fs::remove_dir_all(&tmp_dir).ok();
    info!("full reclaim complete");
    Ok(())
}

fn read_locator(segments: &mut Segments, data_type: DataType, locator: &Locator) -> Result<Vec<u8>> {
    let active_id = segments.active.get(&data_type).unwrap().id;
    let entry = if locator.file_id == active_id {
        segments.active.get_mut(&data_type).unwrap().read(locator.offset)?.0
    } else {
        segments
            .archived
            .get_mut(&data_type)
            .and_then(|m| m.get_mut(&locator.file_id))
            .ok_or(Error::KeyNotExist)?
            .read(locator.offset)?
            .0
    };
    Ok(entry.value)
}

fn build_string_entries(segments: &mut Segments, bucket: &StringBucket, idx_mode: IdxMode) -> Result<Vec<Entry>> {
    let snapshot: Vec<(Vec<u8>, Locator)> = bucket.idx.iter().map(|(k, l)| (k.to_vec(), l.clone())).collect();
    let mut entries = Vec::new();
    for (key, locator) in snapshot {
        let value = match idx_mode {
            IdxMode::KeyValueMem => locator.value.clone().unwrap_or_default(),
            IdxMode::KeyOnlyMem => read_locator(segments, DataType::String, &locator)?,
        };
        entries.push(Entry::new_no_extra(key.clone(), value, DataType::String, opcode::string::SET));
        if let Some(deadline) = bucket.expires.get(&key) {
            entries.push(Entry::new_with_expire(key, Vec::new(), deadline, DataType::String, opcode::string::EXPIRE));
        }
    }
    Ok(entries)
}

fn build_list_entries(bucket: &crate::db::ListBucket) -> Vec<Entry> {
    let mut entries = Vec::new();
    for (key, items) in bucket.idx.snapshot() {
        for item in items {
            entries.push(Entry::new_no_extra(key.clone(), item, DataType::List, opcode::list::RPUSH));
        }
        if let Some(deadline) = bucket.expires.get(&key) {
            entries.push(Entry::new_with_expire(key, Vec::new(), deadline, DataType::List, opcode::list::EXPIRE));
        }
    }
    entries
}

fn build_hash_entries(bucket: &crate::db::HashBucket) -> Vec<Entry> {
    let mut entries = Vec::new();
    for (key, fields) in bucket.idx.snapshot() {
        for (field, value) in fields {
            entries.push(Entry::new(key.clone(), value, field, DataType::Hash, opcode::hash::HSET));
        }
        if let Some(deadline) = bucket.expires.get(&key) {
            entries.push(Entry::new_with_expire(key, Vec::new(), deadline, DataType::Hash, opcode::hash::EXPIRE));
        }
    }
    entries
}

fn build_set_entries(bucket: &crate::db::SetBucket) -> Vec<Entry> {
    let mut entries = Vec::new();
    for (key, members) in bucket.idx.snapshot() {
        for member in members {
            entries.push(Entry::new_no_extra(key.clone(), member, DataType::Set, opcode::set::SADD));
        }
        if let Some(deadline) = bucket.expires.get(&key) {
            entries.push(Entry::new_with_expire(key, Vec::new(), deadline, DataType::Set, opcode::set::EXPIRE));
        }
    }
    entries
}

fn build_zset_entries(bucket: &crate::db::ZSetBucket) -> Vec<Entry> {
    let mut entries = Vec::new();
    for (key, members) in bucket.idx.snapshot() {
        for (member, score) in members {
            let extra = format_score(score).into_bytes();
            entries.push(Entry::new(key.clone(), member, extra, DataType::ZSet, opcode::zset::ZADD));
        }
        if let Some(deadline) = bucket.expires.get(&key) {
            entries.push(Entry::new_with_expire(key, Vec::new(), deadline, DataType::ZSet, opcode::zset::EXPIRE));
        }
    }
    entries
}

/// Writes `entries` into fresh segments under `dir` (ids starting at 0,
/// rotating on `block_size`). Returns the finished (archived) segments and
/// the still-open active one.
fn write_compacted(
    dir: &std::path::Path,
    data_type: DataType,
    entries: &[Entry],
    rw_method: RwMethod,
    block_size: u64,
) -> Result<(HashMap<u32, Segment>, Segment)> {
    let mut archived = HashMap::new();
    let mut next_id = 0u32;
    let mut active = Segment::create(dir, next_id, rw_method, block_size, data_type)?;
    for entry in entries {
        if active.offset + entry.size() > block_size {
            active.sync()?;
            next_id += 1;
            let new_active = Segment::create(dir, next_id, rw_method, block_size, data_type)?;
            let finished = std::mem::replace(&mut active, new_active);
            archived.insert(finished.id, finished);
        }
        active.write(entry)?;
    }
    active.sync()?;
    Ok((archived, active))
}

pub fn single_segment_reclaim(db: &Db) -> Result<()> {
    if db.is_single_reclaiming.swap(true, Ordering::SeqCst) {
        return Err(Error::DbIsReclaiming);
    }
    let result = single_segment_reclaim_inner(db);
    db.is_single_reclaiming.store(false, Ordering::SeqCst);
    result
}

fn single_segment_reclaim_inner(db: &Db) -> Result<()> {
    let mut string_b = db.string_b.write()?;
    let mut segments = db.segments.write()?;

    let target_id = {
        let archived_ids: Vec<u32> = segments.archived.get(&DataType::String).map(|m| m.keys().copied().collect()).unwrap_or_default();
        archived_ids
            .into_iter()
            .filter(|id| segments.meta.reclaimable_space.get(id).copied().unwrap_or(0) >= db.config.single_reclaim_threshold)
            .max_by_key(|id| segments.meta.reclaimable_space.get(id).copied().unwrap_or(0))
    };
    let Some(target_id) = target_id else { return Err(Error::ReclaimUnreached) };

    let raw_entries: Vec<(Entry, u64, u64)> = {
        let seg = segments.archived.get_mut(&DataType::String).unwrap().get_mut(&target_id).unwrap();
        let mut offset = 0u64;
        let mut out = Vec::new();
        loop {
            if offset + entry::HEADER_SIZE as u64 > db.config.block_size {
                break;
            }
            match seg.read(offset) {
                Ok((e, size)) => {
                    out.push((e, offset, size));
                    offset += size;
                }
                Err(_) => break,
            }
        }
        out
    };

    let live_entries: Vec<Entry> = raw_entries
        .into_iter()
        .filter(|(e, offset, size)| {
            let mark = e.get_mark();
            if mark != opcode::string::SET && mark != opcode::string::PERSIST {
                return false;
            }
            match string_b.idx.get(&e.key) {
                Some(locator) => locator.file_id == target_id && locator.offset == *offset && locator.entry_size == *size,
                None => false,
            }
        })
        .map(|(e, _, _)| e)
        .collect();

    // Drop the segments lock before re-acquiring it per-write inside
    // `Db::store`; `string_b` stays held throughout, preserving lock order.
    drop(segments);
    for e in live_entries {
        let (file_id, offset, size) = db.store(DataType::String, &e)?;
        let value_size = e.value.len() as u64;
        let value = if db.config.idx_mode == IdxMode::KeyValueMem { Some(e.value.clone()) } else { None };
        string_b.idx.put(e.key.clone(), Locator { file_id, entry_size: size, value_size, offset, value });
    }

    let mut segments = db.segments.write()?;
    if let Some(old) = segments.archived.get_mut(&DataType::String).and_then(|m| m.remove(&target_id)) {
        let _ = std::fs::remove_file(old.path());
    }
    segments.meta.reclaimable_space.remove(&target_id);
    segments.meta.store(&segments.dir)?;
    info!(target_id, "single-segment reclaim complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use tempfile::TempDir;

    fn open_db(dir: &TempDir, block_size: u64) -> Db {
        let mut config = Config::default();
        config.dir_path = dir.path().to_path_buf();
        config.block_size = block_size;
        config.reclaim_threshold = 2;
        config.single_reclaim_threshold = 1;
        Db::open(config).unwrap()
    }

    #[test]
    fn full_reclaim_preserves_live_state() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir, 4096);
        for i in 0..100 {
            let key = format!("k{i}");
            db.set(key.as_bytes(), b"v").unwrap();
        }
        for i in 0..50 {
            let key = format!("k{i}");
            db.strrem(key.as_bytes()).unwrap();
        }
        full_reclaim(&db).unwrap();
        for i in 0..50 {
            let key = format!("k{i}");
            assert!(matches!(db.get(key.as_bytes()), Err(Error::KeyNotExist)));
        }
        for i in 50..100 {
            let key = format!("k{i}");
            assert_eq!(db.get(key.as_bytes()).unwrap(), b"v");
        }
    }

    #[test]
    fn full_reclaim_rejects_when_threshold_unreached() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir, 1024 * 1024);
        db.set(b"k", b"v").unwrap();
        assert!(matches!(full_reclaim(&db), Err(Error::ReclaimUnreached)));
    }

    #[test]
    fn single_segment_reclaim_keeps_only_live_locators() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir, 256);
        for i in 0..30 {
            let key = format!("k{i}");
            db.set(key.as_bytes(), b"initial").unwrap();
        }
        for i in 0..30 {
            let key = format!("k{i}");
            db.set(key.as_bytes(), b"updated").unwrap();
        }
        single_segment_reclaim(&db).unwrap();
        for i in 0..30 {
            let key = format!("k{i}");
            assert_eq!(db.get(key.as_bytes()).unwrap(), b"updated");
        }
    }
}
