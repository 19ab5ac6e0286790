//! The database facade: owns every segment and every type index, and is
//! the sole entry point mutating either. Each type gets its own
//! `RwLock<...Bucket>` pairing its index with its expiration table (they
//! are always touched together, per SPEC_FULL.md §4.7); `segments` is the
//! coarser facade-level lock guarding rotation and reclaim.
//!
//! Lock order is always *type bucket(s), then segments* — reclaim takes
//! every type's write lock up front (in a fixed order) before taking the
//! segments write lock, so no code path ever acquires them in the reverse
//! order. See DESIGN.md for why this collapses the "per-type lock plus a
//! reclaim flag" design in spec.md into that explicit ordering discipline.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use tracing::{debug, info};

use crate::config::{Config, IdxMode};
use crate::entry::{self, contains_separator, join_extra, now_unix, opcode, split_extra, DataType, Entry};
use crate::error::{Error, Result};
use crate::expire::ExpireTable;
use crate::index::hash::HashIndex;
use crate::index::list::ListIndex;
use crate::index::set::SetIndex;
use crate::index::skiplist::SkipList;
use crate::index::zset::ZSetIndex;
use crate::index::Locator;
use crate::meta::Meta;
use crate::segment::Segment;

pub(crate) struct StringBucket {
    pub idx: SkipList,
    pub expires: ExpireTable,
}

pub(crate) struct ListBucket {
    pub idx: ListIndex,
    pub expires: ExpireTable,
}

pub(crate) struct HashBucket {
    pub idx: HashIndex,
    pub expires: ExpireTable,
}

pub(crate) struct SetBucket {
    pub idx: SetIndex,
    pub expires: ExpireTable,
}

pub(crate) struct ZSetBucket {
    pub idx: ZSetIndex,
    pub expires: ExpireTable,
}

pub(crate) struct Segments {
    pub dir: PathBuf,
    pub active: HashMap<DataType, Segment>,
    pub archived: HashMap<DataType, HashMap<u32, Segment>>,
    pub meta: Meta,
}

pub struct Db {
    pub(crate) config: Config,
    pub(crate) segments: RwLock<Segments>,
    pub(crate) string_b: RwLock<StringBucket>,
    pub(crate) list_b: RwLock<ListBucket>,
    pub(crate) hash_b: RwLock<HashBucket>,
    pub(crate) set_b: RwLock<SetBucket>,
    pub(crate) zset_b: RwLock<ZSetBucket>,
    pub(crate) is_reclaiming: AtomicBool,
    pub(crate) is_single_reclaiming: AtomicBool,
}

fn check_no_separator(b: &[u8]) -> Result<()> {
    if contains_separator(b) {
        Err(Error::ExtraContainsSeparator)
    } else {
        Ok(())
    }
}

impl Db {
    pub fn open(config: Config) -> Result<Db> {
        std::fs::create_dir_all(&config.dir_path)?;
        let dir = config.dir_path.clone();
        let discovered = crate::segment_set::discover(&dir)?;
        let meta = Meta::load(&dir)?;

        let mut active = HashMap::new();
        let mut archived = HashMap::new();
        for data_type in DataType::ALL {
            let mut ids = discovered.get(&data_type).cloned().unwrap_or_default();
            let active_id = ids.pop().unwrap_or(0);
            let active_offset = meta.offset_for(data_type);
            let active_seg = if discovered.contains_key(&data_type) || active_offset > 0 {
                Segment::open(&dir, active_id, config.rw_method, config.block_size, data_type, active_offset)?
            } else {
                Segment::create(&dir, active_id, config.rw_method, config.block_size, data_type)?
            };
            active.insert(data_type, active_seg);

            let mut arch_map = HashMap::new();
            for id in ids {
                let seg = Segment::open(&dir, id, config.rw_method, config.block_size, data_type, 0)?;
                arch_map.insert(id, seg);
            }
            archived.insert(data_type, arch_map);
        }

        let db = Db {
            config,
            segments: RwLock::new(Segments { dir, active, archived, meta }),
            string_b: RwLock::new(StringBucket { idx: SkipList::new(), expires: ExpireTable::default() }),
            list_b: RwLock::new(ListBucket { idx: ListIndex::default(), expires: ExpireTable::default() }),
            hash_b: RwLock::new(HashBucket { idx: HashIndex::default(), expires: ExpireTable::default() }),
            set_b: RwLock::new(SetBucket { idx: SetIndex::default(), expires: ExpireTable::default() }),
            zset_b: RwLock::new(ZSetBucket { idx: ZSetIndex::default(), expires: ExpireTable::default() }),
            is_reclaiming: AtomicBool::new(false),
            is_single_reclaiming: AtomicBool::new(false),
        };
        db.replay()?;
        info!(dir = %db.config.dir_path.display(), "database opened");
        Ok(db)
    }

    pub fn reopen(dir: &Path) -> Result<Db> {
        let mut config = Config::load_cfg_json(dir)?;
        config.dir_path = dir.to_path_buf();
        Db::open(config)
    }

    pub fn close(&self) -> Result<()> {
        let segments = self.segments.read()?;
        for seg in segments.active.values() {
            seg.close(true)?;
        }
        for archived in segments.archived.values() {
            for seg in archived.values() {
                seg.close(true)?;
            }
        }
        segments.meta.store(&segments.dir)?;
        drop(segments);
        self.config.save_cfg_json(&self.config.dir_path)?;
        info!("database closed");
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        let segments = self.segments.read()?;
        for seg in segments.active.values() {
            seg.sync()?;
        }
        Ok(())
    }

    pub fn backup(&self, dest: &Path) -> Result<()> {
        std::fs::create_dir_all(dest)?;
        self.sync()?;
        let segments = self.segments.read()?;
        copy_dir(&segments.dir, dest)
    }

    fn check_key_value(&self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        if key.is_empty() {
            return Err(Error::EmptyKey);
        }
        if key.len() as u64 > self.config.max_key_size {
            return Err(Error::KeyTooLarge);
        }
        if let Some(v) = value {
            if v.len() as u64 > self.config.max_value_size {
                return Err(Error::ValueTooLarge);
            }
        }
        Ok(())
    }

    /// Appends `entry` for `data_type`, rotating the active segment if it
    /// would overflow `block_size`. Returns `(file_id, offset_before_write,
    /// entry_size)` — the locator for this write.
    pub(crate) fn store(&self, data_type: DataType, entry: &Entry) -> Result<(u32, u64, u64)> {
        let mut segments_guard = self.segments.write()?;
        let segments = &mut *segments_guard;
        let size = entry.size();
        let block_size = self.config.block_size;

        let needs_rotation = {
            let active = segments.active.get(&data_type).expect("active segment always present");
            active.offset + size > block_size
        };
        if needs_rotation {
            let active = segments.active.get(&data_type).unwrap();
            active.sync()?;
            let old_id = active.id;
            let new_id = old_id + 1;
            let new_active = Segment::create(&segments.dir, new_id, self.config.rw_method, block_size, data_type)?;
            let old_active = segments.active.insert(data_type, new_active).unwrap();
            segments.archived.entry(data_type).or_default().insert(old_id, old_active);
            segments.meta.set_offset(data_type, 0);
            debug!(?data_type, old_id, new_id, "rotated active segment");
        }

        let active = segments.active.get_mut(&data_type).unwrap();
        let file_id = active.id;
        active.write(entry)?;
        let offset_after = active.offset;
        segments.meta.set_offset(data_type, offset_after);
        if self.config.sync {
            active.sync()?;
        }
        Ok((file_id, offset_after - size, size))
    }

    fn incr_reclaimable(&self, old: Option<&Locator>) -> Result<()> {
        if let Some(locator) = old {
            let mut segments = self.segments.write()?;
            segments.meta.add_reclaimable(locator.file_id, locator.entry_size as i64);
        }
        Ok(())
    }

    // ---------------- String ----------------

    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_key_value(key, Some(value))?;
        let mut b = self.string_b.write()?;
        self.check_expired_string(&mut b, key)?;
        let entry = Entry::new_no_extra(key.to_vec(), value.to_vec(), DataType::String, opcode::string::SET);
        let (file_id, offset, entry_size) = self.store(DataType::String, &entry)?;
        let old = b.idx.get(key).cloned();
        self.incr_reclaimable(old.as_ref())?;
        b.expires.remove(key);
        let stored_value = if self.config.idx_mode == IdxMode::KeyValueMem { Some(value.to_vec()) } else { None };
        let value_size = value.len() as u64;
        b.idx.put(key.to_vec(), Locator { file_id, entry_size, value_size, offset, value: stored_value });
        Ok(())
    }

    pub fn setnx(&self, key: &[u8], value: &[u8]) -> Result<bool> {
        if self.str_exists(key) {
            return Ok(false);
        }
        self.set(key, value)?;
        Ok(true)
    }

    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.check_key_value(key, None)?;
        let mut b = self.string_b.write()?;
        self.check_expired_string(&mut b, key)?;
        let locator = b.idx.get(key).ok_or(Error::KeyNotExist)?;
        match self.config.idx_mode {
            IdxMode::KeyValueMem => locator.value.clone().ok_or(Error::NilIndexer),
            IdxMode::KeyOnlyMem => {
                let (file_id, offset) = (locator.file_id, locator.offset);
                drop(b);
                self.read_string_from_disk(file_id, offset)
            }
        }
    }

    fn read_string_from_disk(&self, file_id: u32, offset: u64) -> Result<Vec<u8>> {
        let mut segments = self.segments.write()?;
        let active_id = segments.active.get(&DataType::String).unwrap().id;
        let entry = if file_id == active_id {
            segments.active.get_mut(&DataType::String).unwrap().read(offset)?.0
        } else {
            segments
                .archived
                .get_mut(&DataType::String)
                .and_then(|m| m.get_mut(&file_id))
                .ok_or(Error::KeyNotExist)?
                .read(offset)?
                .0
        };
        Ok(entry.value)
    }

    pub fn getset(&self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>> {
        let old = match self.get(key) {
            Ok(v) => Some(v),
            Err(Error::KeyNotExist) | Err(Error::KeyExpired) => None,
            Err(e) => return Err(e),
        };
        self.set(key, value)?;
        Ok(old)
    }

    pub fn append(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_key_value(key, Some(value))?;
        let mut existing = match self.get(key) {
            Ok(v) => v,
            Err(Error::KeyNotExist) | Err(Error::KeyExpired) => Vec::new(),
            Err(e) => return Err(e),
        };
        existing.extend_from_slice(value);
        self.set(key, &existing)
    }

    pub fn strlen(&self, key: &[u8]) -> usize {
        let mut b = match self.string_b.write() {
            Ok(b) => b,
            Err(_) => return 0,
        };
        if self.check_expired_string(&mut b, key).is_err() {
            return 0;
        }
        b.idx.get(key).map(|l| l.value_size as usize).unwrap_or(0)
    }

    pub fn str_exists(&self, key: &[u8]) -> bool {
        if self.check_key_value(key, None).is_err() {
            return false;
        }
        let mut b = match self.string_b.write() {
            Ok(b) => b,
            Err(_) => return false,
        };
        if !b.idx.exist(key) {
            return false;
        }
        self.check_expired_string(&mut b, key).is_ok()
    }

    pub fn strrem(&self, key: &[u8]) -> Result<()> {
        self.check_key_value(key, None)?;
        let mut b = self.string_b.write()?;
        let entry = Entry::new_no_extra(key.to_vec(), Vec::new(), DataType::String, opcode::string::REM);
        self.store(DataType::String, &entry)?;
        let old = b.idx.get(key).cloned();
        self.incr_reclaimable(old.as_ref())?;
        b.idx.remove(key);
        b.expires.remove(key);
        Ok(())
    }

    pub fn prefix_scan(&self, prefix: &[u8], limit: i64, offset: i64) -> Result<Vec<Vec<u8>>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let offset = offset.max(0) as usize;
        self.check_key_value(prefix, None)?;
        let b = self.string_b.read()?;
        let mut out = Vec::new();
        let Some(start) = b.idx.find_prefix(prefix).map(|k| k.to_vec()) else { return Ok(Vec::new()) };
        let mut skipped = 0usize;
        let mut remaining = if limit > 0 { Some(limit as usize) } else { None };
        for (key, locator) in b.idx.iter_from(&start) {
            if !key.starts_with(prefix) {
                break;
            }
            if b.expires.is_expired(key) {
                continue;
            }
            if skipped < offset {
                skipped += 1;
                continue;
            }
            if let Some(r) = remaining {
                if r == 0 {
                    break;
                }
            }
            // `read_string_from_disk` locks `segments`, a distinct RwLock
            // from `string_b`, so holding `b` across the call is safe.
            let value = match self.config.idx_mode {
                IdxMode::KeyValueMem => locator.value.clone().unwrap_or_default(),
                IdxMode::KeyOnlyMem => self.read_string_from_disk(locator.file_id, locator.offset)?,
            };
            out.push(value);
            if let Some(r) = remaining.as_mut() {
                *r -= 1;
            }
        }
        Ok(out)
    }

    pub fn range_scan(&self, start: &[u8], end: &[u8]) -> Result<Vec<Vec<u8>>> {
        let b = self.string_b.read()?;
        let mut out = Vec::new();
        for (key, locator) in b.idx.iter_from(start) {
            if key > end {
                break;
            }
            if b.expires.is_expired(key) {
                continue;
            }
            let value = match self.config.idx_mode {
                IdxMode::KeyValueMem => locator.value.clone().unwrap_or_default(),
                IdxMode::KeyOnlyMem => self.read_string_from_disk(locator.file_id, locator.offset)?,
            };
            out.push(value);
        }
        Ok(out)
    }

    pub fn expire(&self, key: &[u8], duration: i64) -> Result<()> {
        if duration <= 0 {
            return Err(Error::InvalidTtl);
        }
        if !self.str_exists(key) {
            return Err(Error::KeyNotExist);
        }
        let mut b = self.string_b.write()?;
        let deadline = now_unix() + duration as u64;
        let entry = Entry::new_with_expire(key.to_vec(), Vec::new(), deadline, DataType::String, opcode::string::EXPIRE);
        self.store(DataType::String, &entry)?;
        b.expires.set(key.to_vec(), deadline);
        Ok(())
    }

    pub fn persist(&self, key: &[u8]) -> Result<()> {
        let value = self.get(key)?;
        let mut b = self.string_b.write()?;
        let entry = Entry::new_no_extra(key.to_vec(), value, DataType::String, opcode::string::PERSIST);
        self.store(DataType::String, &entry)?;
        b.expires.remove(key);
        Ok(())
    }

    pub fn ttl(&self, key: &[u8]) -> i64 {
        let b = match self.string_b.read() {
            Ok(b) => b,
            Err(_) => return 0,
        };
        b.expires.ttl(key)
    }

    /// Lazily expires `key` if its deadline has passed: removes the index
    /// entry, records reclaimable space, and appends a Rem entry.
    fn check_expired_string(&self, b: &mut StringBucket, key: &[u8]) -> Result<()> {
        if !b.expires.is_expired(key) {
            return Ok(());
        }
        let old = b.idx.get(key).cloned();
        let entry = Entry::new_no_extra(key.to_vec(), Vec::new(), DataType::String, opcode::string::REM);
        self.store(DataType::String, &entry)?;
        if let Some(locator) = old {
            let mut segments = self.segments.write()?;
            segments.meta.add_reclaimable(locator.file_id, locator.entry_size as i64);
        }
        b.idx.remove(key);
        b.expires.remove(key);
        Err(Error::KeyExpired)
    }

    // ---------------- List ----------------

    pub fn lpush(&self, key: &[u8], value: &[u8]) -> Result<usize> {
        self.check_key_value(key, Some(value))?;
        let mut b = self.list_b.write()?;
        self.check_expired_list(&mut b, key);
        let entry = Entry::new_no_extra(key.to_vec(), value.to_vec(), DataType::List, opcode::list::LPUSH);
        self.store(DataType::List, &entry)?;
        Ok(b.idx.lpush(key, value.to_vec()))
    }

    pub fn rpush(&self, key: &[u8], value: &[u8]) -> Result<usize> {
        self.check_key_value(key, Some(value))?;
        let mut b = self.list_b.write()?;
        self.check_expired_list(&mut b, key);
        let entry = Entry::new_no_extra(key.to_vec(), value.to_vec(), DataType::List, opcode::list::RPUSH);
        self.store(DataType::List, &entry)?;
        Ok(b.idx.rpush(key, value.to_vec()))
    }

    pub fn lpop(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut b = self.list_b.write()?;
        self.check_expired_list(&mut b, key);
        let Some(value) = b.idx.lpop(key) else { return Ok(None) };
        let entry = Entry::new_no_extra(key.to_vec(), value.clone(), DataType::List, opcode::list::LPOP);
        self.store(DataType::List, &entry)?;
        Ok(Some(value))
    }

    pub fn rpop(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut b = self.list_b.write()?;
        self.check_expired_list(&mut b, key);
        let Some(value) = b.idx.rpop(key) else { return Ok(None) };
        let entry = Entry::new_no_extra(key.to_vec(), value.clone(), DataType::List, opcode::list::RPOP);
        self.store(DataType::List, &entry)?;
        Ok(Some(value))
    }

    pub fn lindex(&self, key: &[u8], index: i64) -> Option<Vec<u8>> {
        let mut b = self.list_b.write().ok()?;
        self.check_expired_list(&mut b, key);
        b.idx.lindex(key, index).map(|v| v.to_vec())
    }

    pub fn llen(&self, key: &[u8]) -> usize {
        let mut b = match self.list_b.write() {
            Ok(b) => b,
            Err(_) => return 0,
        };
        self.check_expired_list(&mut b, key);
        b.idx.llen(key)
    }

    pub fn lkey_exists(&self, key: &[u8]) -> bool {
        let mut b = match self.list_b.write() {
            Ok(b) => b,
            Err(_) => return false,
        };
        self.check_expired_list(&mut b, key);
        b.idx.lkey_exists(key)
    }

    pub fn lval_exists(&self, key: &[u8], value: &[u8]) -> bool {
        let mut b = match self.list_b.write() {
            Ok(b) => b,
            Err(_) => return false,
        };
        self.check_expired_list(&mut b, key);
        b.idx.lval_exists(key, value)
    }

    pub fn lrem(&self, key: &[u8], count: i64, value: &[u8]) -> Result<usize> {
        let mut b = self.list_b.write()?;
        self.check_expired_list(&mut b, key);
        let extra = count.to_string().into_bytes();
        let entry = Entry::new(key.to_vec(), value.to_vec(), extra, DataType::List, opcode::list::LREM);
        self.store(DataType::List, &entry)?;
        Ok(b.idx.lrem(key, count, value))
    }

    pub fn linsert(&self, key: &[u8], pivot: &[u8], before: bool, value: &[u8]) -> Result<Option<usize>> {
        check_no_separator(pivot)?;
        let mut b = self.list_b.write()?;
        self.check_expired_list(&mut b, key);
        let position: &[u8] = if before { b"before" } else { b"after" };
        let extra = join_extra(&[pivot, position]);
        let entry = Entry::new(key.to_vec(), value.to_vec(), extra, DataType::List, opcode::list::LINSERT);
        self.store(DataType::List, &entry)?;
        Ok(b.idx.linsert(key, pivot, before, value.to_vec()))
    }

    pub fn lset(&self, key: &[u8], index: i64, value: &[u8]) -> Result<bool> {
        let mut b = self.list_b.write()?;
        self.check_expired_list(&mut b, key);
        let extra = index.to_string().into_bytes();
        let entry = Entry::new(key.to_vec(), value.to_vec(), extra, DataType::List, opcode::list::LSET);
        self.store(DataType::List, &entry)?;
        Ok(b.idx.lset(key, index, value.to_vec()))
    }

    pub fn ltrim(&self, key: &[u8], start: i64, end: i64) -> Result<()> {
        let mut b = self.list_b.write()?;
        self.check_expired_list(&mut b, key);
        let extra = join_extra(&[start.to_string().as_bytes(), end.to_string().as_bytes()]);
        let entry = Entry::new(key.to_vec(), Vec::new(), extra, DataType::List, opcode::list::LTRIM);
        self.store(DataType::List, &entry)?;
        b.idx.ltrim(key, start, end);
        Ok(())
    }

    pub fn lrange(&self, key: &[u8], start: i64, end: i64) -> Vec<Vec<u8>> {
        let mut b = match self.list_b.write() {
            Ok(b) => b,
            Err(_) => return Vec::new(),
        };
        self.check_expired_list(&mut b, key);
        b.idx.lrange(key, start, end)
    }

    fn check_expired_list(&self, b: &mut ListBucket, key: &[u8]) {
        if !b.expires.is_expired(key) {
            return;
        }
        let entry = Entry::new_no_extra(key.to_vec(), Vec::new(), DataType::List, opcode::list::CLEAR);
        let _ = self.store(DataType::List, &entry);
        b.idx.lclear(key);
        b.expires.remove(key);
    }

    // ---------------- Hash ----------------

    pub fn hset(&self, key: &[u8], field: &[u8], value: &[u8]) -> Result<bool> {
        self.check_key_value(key, Some(value))?;
        check_no_separator(field)?;
        let mut b = self.hash_b.write()?;
        self.check_expired_hash(&mut b, key);
        let entry = Entry::new(key.to_vec(), value.to_vec(), field.to_vec(), DataType::Hash, opcode::hash::HSET);
        self.store(DataType::Hash, &entry)?;
        Ok(b.idx.hset(key, field, value.to_vec()))
    }

    pub fn hsetnx(&self, key: &[u8], field: &[u8], value: &[u8]) -> Result<bool> {
        self.check_key_value(key, Some(value))?;
        check_no_separator(field)?;
        let mut b = self.hash_b.write()?;
        self.check_expired_hash(&mut b, key);
        if b.idx.hget(key, field).is_some() {
            return Ok(false);
        }
        let entry = Entry::new(key.to_vec(), value.to_vec(), field.to_vec(), DataType::Hash, opcode::hash::HSET);
        self.store(DataType::Hash, &entry)?;
        Ok(b.idx.hsetnx(key, field, value.to_vec()))
    }

    pub fn hmset(&self, key: &[u8], pairs: &[(&[u8], &[u8])]) -> Result<()> {
        for (field, value) in pairs {
            self.hset(key, field, value)?;
        }
        Ok(())
    }

    pub fn hmget(&self, key: &[u8], fields: &[&[u8]]) -> Vec<Option<Vec<u8>>> {
        fields.iter().map(|f| self.hget(key, f)).collect()
    }

    pub fn hget(&self, key: &[u8], field: &[u8]) -> Option<Vec<u8>> {
        let mut b = self.hash_b.write().ok()?;
        self.check_expired_hash(&mut b, key);
        b.idx.hget(key, field).map(|v| v.to_vec())
    }

    pub fn hget_all(&self, key: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut b = match self.hash_b.write() {
            Ok(b) => b,
            Err(_) => return Vec::new(),
        };
        self.check_expired_hash(&mut b, key);
        b.idx.hget_all(key)
    }

    pub fn hdel(&self, key: &[u8], field: &[u8]) -> Result<bool> {
        let mut b = self.hash_b.write()?;
        self.check_expired_hash(&mut b, key);
        let entry = Entry::new(key.to_vec(), Vec::new(), field.to_vec(), DataType::Hash, opcode::hash::HDEL);
        self.store(DataType::Hash, &entry)?;
        Ok(b.idx.hdel(key, field))
    }

    pub fn hexists(&self, key: &[u8], field: &[u8]) -> bool {
        let mut b = match self.hash_b.write() {
            Ok(b) => b,
            Err(_) => return false,
        };
        self.check_expired_hash(&mut b, key);
        b.idx.hexists(key, field)
    }

    pub fn hlen(&self, key: &[u8]) -> usize {
        let mut b = match self.hash_b.write() {
            Ok(b) => b,
            Err(_) => return 0,
        };
        self.check_expired_hash(&mut b, key);
        b.idx.hlen(key)
    }

    pub fn hkeys(&self, key: &[u8]) -> Vec<Vec<u8>> {
        let mut b = match self.hash_b.write() {
            Ok(b) => b,
            Err(_) => return Vec::new(),
        };
        self.check_expired_hash(&mut b, key);
        b.idx.hkeys(key)
    }

    pub fn hvals(&self, key: &[u8]) -> Vec<Vec<u8>> {
        let mut b = match self.hash_b.write() {
            Ok(b) => b,
            Err(_) => return Vec::new(),
        };
        self.check_expired_hash(&mut b, key);
        b.idx.hvals(key)
    }

    fn check_expired_hash(&self, b: &mut HashBucket, key: &[u8]) {
        if !b.expires.is_expired(key) {
            return;
        }
        let entry = Entry::new_no_extra(key.to_vec(), Vec::new(), DataType::Hash, opcode::hash::CLEAR);
        let _ = self.store(DataType::Hash, &entry);
        b.idx.hclear(key);
        b.expires.remove(key);
    }

    // ---------------- Set ----------------

    pub fn sadd(&self, key: &[u8], member: &[u8]) -> Result<bool> {
        self.check_key_value(key, Some(member))?;
        let mut b = self.set_b.write()?;
        self.check_expired_set(&mut b, key);
        let entry = Entry::new_no_extra(key.to_vec(), member.to_vec(), DataType::Set, opcode::set::SADD);
        // Append first; only mutate the index once the log write succeeds
        // (Open Question b: the Go source's SAdd only indexed on append
        // *failure*, almost certainly inverted).
        self.store(DataType::Set, &entry)?;
        Ok(b.idx.sadd(key, member.to_vec()))
    }

    pub fn srem(&self, key: &[u8], member: &[u8]) -> Result<bool> {
        let mut b = self.set_b.write()?;
        self.check_expired_set(&mut b, key);
        let entry = Entry::new_no_extra(key.to_vec(), member.to_vec(), DataType::Set, opcode::set::SREM);
        self.store(DataType::Set, &entry)?;
        Ok(b.idx.srem(key, member))
    }

    pub fn smove(&self, src: &[u8], dst: &[u8], member: &[u8]) -> Result<bool> {
        check_no_separator(dst)?;
        let mut b = self.set_b.write()?;
        self.check_expired_set(&mut b, src);
        self.check_expired_set(&mut b, dst);
        let entry = Entry::new(src.to_vec(), member.to_vec(), dst.to_vec(), DataType::Set, opcode::set::SMOVE);
        self.store(DataType::Set, &entry)?;
        Ok(b.idx.smove(src, dst, member))
    }

    pub fn spop(&self, key: &[u8], count: i64) -> Result<Vec<Vec<u8>>> {
        let mut b = self.set_b.write()?;
        self.check_expired_set(&mut b, key);
        let members = b.idx.spop(key, count);
        for member in &members {
            let entry = Entry::new_no_extra(key.to_vec(), member.clone(), DataType::Set, opcode::set::SREM);
            self.store(DataType::Set, &entry)?;
        }
        Ok(members)
    }

    pub fn sismember(&self, key: &[u8], member: &[u8]) -> bool {
        let mut b = match self.set_b.write() {
            Ok(b) => b,
            Err(_) => return false,
        };
        self.check_expired_set(&mut b, key);
        b.idx.sismember(key, member)
    }

    pub fn srandmember(&self, key: &[u8], count: i64) -> Vec<Vec<u8>> {
        let mut b = match self.set_b.write() {
            Ok(b) => b,
            Err(_) => return Vec::new(),
        };
        self.check_expired_set(&mut b, key);
        b.idx.srandmember(key, count)
    }

    pub fn scard(&self, key: &[u8]) -> usize {
        let mut b = match self.set_b.write() {
            Ok(b) => b,
            Err(_) => return 0,
        };
        self.check_expired_set(&mut b, key);
        b.idx.scard(key)
    }

    pub fn smembers(&self, key: &[u8]) -> Vec<Vec<u8>> {
        let mut b = match self.set_b.write() {
            Ok(b) => b,
            Err(_) => return Vec::new(),
        };
        self.check_expired_set(&mut b, key);
        b.idx.smembers(key)
    }

    pub fn sunion(&self, keys: &[&[u8]]) -> Vec<Vec<u8>> {
        let mut b = match self.set_b.write() {
            Ok(b) => b,
            Err(_) => return Vec::new(),
        };
        for key in keys {
            self.check_expired_set(&mut b, key);
        }
        b.idx.sunion(keys)
    }

    pub fn sdiff(&self, keys: &[&[u8]]) -> Vec<Vec<u8>> {
        let mut b = match self.set_b.write() {
            Ok(b) => b,
            Err(_) => return Vec::new(),
        };
        for key in keys {
            self.check_expired_set(&mut b, key);
        }
        b.idx.sdiff(keys)
    }

    fn check_expired_set(&self, b: &mut SetBucket, key: &[u8]) {
        if !b.expires.is_expired(key) {
            return;
        }
        let entry = Entry::new_no_extra(key.to_vec(), Vec::new(), DataType::Set, opcode::set::CLEAR);
        let _ = self.store(DataType::Set, &entry);
        b.idx.sclear(key);
        b.expires.remove(key);
    }

    // ---------------- ZSet ----------------

    pub fn zadd(&self, key: &[u8], score: f64, member: &[u8]) -> Result<()> {
        self.check_key_value(key, Some(member))?;
        let mut b = self.zset_b.write()?;
        self.check_expired_zset(&mut b, key);
        let extra = format_score(score).into_bytes();
        let entry = Entry::new(key.to_vec(), member.to_vec(), extra, DataType::ZSet, opcode::zset::ZADD);
        self.store(DataType::ZSet, &entry)?;
        b.idx.zadd(key, score, member);
        Ok(())
    }

    /// `Db::zrem` takes the bucket's write lock for the whole operation
    /// (Open Question c: the Go source reads under an `RLock` while
    /// mutating, upgraded here to a write lock).
    pub fn zrem(&self, key: &[u8], member: &[u8]) -> Result<bool> {
        let mut b = self.zset_b.write()?;
        self.check_expired_zset(&mut b, key);
        let entry = Entry::new_no_extra(key.to_vec(), member.to_vec(), DataType::ZSet, opcode::zset::ZREM);
        self.store(DataType::ZSet, &entry)?;
        Ok(b.idx.zrem(key, member))
    }

    pub fn zincrby(&self, key: &[u8], member: &[u8], delta: f64) -> Result<f64> {
        let mut b = self.zset_b.write()?;
        self.check_expired_zset(&mut b, key);
        let new_score = b.idx.zscore(key, member).unwrap_or(0.0) + delta;
        let extra = format_score(new_score).into_bytes();
        let entry = Entry::new(key.to_vec(), member.to_vec(), extra, DataType::ZSet, opcode::zset::ZADD);
        self.store(DataType::ZSet, &entry)?;
        b.idx.zadd(key, new_score, member);
        Ok(new_score)
    }

    pub fn zscore(&self, key: &[u8], member: &[u8]) -> Option<f64> {
        let mut b = self.zset_b.write().ok()?;
        self.check_expired_zset(&mut b, key);
        b.idx.zscore(key, member)
    }

    pub fn zcard(&self, key: &[u8]) -> u64 {
        let mut b = match self.zset_b.write() {
            Ok(b) => b,
            Err(_) => return 0,
        };
        self.check_expired_zset(&mut b, key);
        b.idx.zcard(key)
    }

    pub fn zrank(&self, key: &[u8], member: &[u8]) -> Option<u64> {
        let mut b = self.zset_b.write().ok()?;
        self.check_expired_zset(&mut b, key);
        b.idx.zrank(key, member)
    }

    pub fn zrevrank(&self, key: &[u8], member: &[u8]) -> Option<u64> {
        let mut b = self.zset_b.write().ok()?;
        self.check_expired_zset(&mut b, key);
        b.idx.zrevrank(key, member)
    }

    pub fn zget_by_rank(&self, key: &[u8], rank: u64) -> Option<(Vec<u8>, f64)> {
        let mut b = self.zset_b.write().ok()?;
        self.check_expired_zset(&mut b, key);
        b.idx.zget_by_rank(key, rank)
    }

    pub fn zrevget_by_rank(&self, key: &[u8], rank: u64) -> Option<(Vec<u8>, f64)> {
        let mut b = self.zset_b.write().ok()?;
        self.check_expired_zset(&mut b, key);
        b.idx.zrevget_by_rank(key, rank)
    }

    pub fn zscore_range(&self, key: &[u8], min: f64, max: f64) -> Vec<(Vec<u8>, f64)> {
        let mut b = match self.zset_b.write() {
            Ok(b) => b,
            Err(_) => return Vec::new(),
        };
        self.check_expired_zset(&mut b, key);
        b.idx.zscore_range(key, min, max)
    }

    pub fn zrev_score_range(&self, key: &[u8], max: f64, min: f64) -> Vec<(Vec<u8>, f64)> {
        let mut b = match self.zset_b.write() {
            Ok(b) => b,
            Err(_) => return Vec::new(),
        };
        self.check_expired_zset(&mut b, key);
        b.idx.zrev_score_range(key, max, min)
    }

    pub fn zrange(&self, key: &[u8], start: i64, end: i64) -> Vec<(Vec<u8>, f64)> {
        let mut b = match self.zset_b.write() {
            Ok(b) => b,
            Err(_) => return Vec::new(),
        };
        self.check_expired_zset(&mut b, key);
        b.idx.zrange(key, start, end)
    }

    pub fn zrevrange(&self, key: &[u8], start: i64, end: i64) -> Vec<(Vec<u8>, f64)> {
        let mut b = match self.zset_b.write() {
            Ok(b) => b,
            Err(_) => return Vec::new(),
        };
        self.check_expired_zset(&mut b, key);
        b.idx.zrevrange(key, start, end)
    }

    fn check_expired_zset(&self, b: &mut ZSetBucket, key: &[u8]) {
        if !b.expires.is_expired(key) {
            return;
        }
        // The Go source mistakenly builds a List-typed Clear entry here
        // (`storage.NewEntryNoExtra(key, nil, List, ListLClear)`); that is
        // a defect in `checkExpired`'s ZSet branch, not a deliberate design
        // choice, so it is not carried over.
        let entry = Entry::new_no_extra(key.to_vec(), Vec::new(), DataType::ZSet, opcode::zset::CLEAR);
        let _ = self.store(DataType::ZSet, &entry);
        b.idx.zclear(key);
        b.expires.remove(key);
    }

    // ---------------- Recovery ----------------

    fn replay(&self) -> Result<()> {
        for data_type in DataType::ALL {
            self.replay_type(data_type)?;
        }
        Ok(())
    }

    fn replay_type(&self, data_type: DataType) -> Result<()> {
        let entries = {
            let mut segments = self.segments.write()?;
            gather_entries(&mut segments, data_type, self.config.block_size)?
        };
        for (entry, file_id, offset, size) in entries {
            self.apply_replayed(data_type, entry, file_id, offset, size)?;
        }
        Ok(())
    }

    fn apply_replayed(&self, data_type: DataType, entry: Entry, file_id: u32, offset: u64, size: u64) -> Result<()> {
        if entry.key.is_empty() {
            return Ok(());
        }
        let now = now_unix();
        match data_type {
            DataType::String => {
                let mut b = self.string_b.write()?;
                match entry.get_mark() {
                    m if m == opcode::string::SET => {
                        let value_size = entry.value.len() as u64;
                        let value = if self.config.idx_mode == IdxMode::KeyValueMem { Some(entry.value.clone()) } else { None };
                        b.idx.put(entry.key.clone(), Locator { file_id, entry_size: size, value_size, offset, value });
                    }
                    m if m == opcode::string::REM => {
                        b.idx.remove(&entry.key);
                        b.expires.remove(&entry.key);
                    }
                    m if m == opcode::string::EXPIRE => {
                        if entry.timestamp > now {
                            b.expires.set(entry.key.clone(), entry.timestamp);
                        } else {
                            b.idx.remove(&entry.key);
                            b.expires.remove(&entry.key);
                        }
                    }
                    m if m == opcode::string::PERSIST => {
                        let value_size = entry.value.len() as u64;
                        let value = if self.config.idx_mode == IdxMode::KeyValueMem { Some(entry.value.clone()) } else { None };
                        b.idx.put(entry.key.clone(), Locator { file_id, entry_size: size, value_size, offset, value });
                        b.expires.remove(&entry.key);
                    }
                    _ => {}
                }
            }
            DataType::List => {
                let mut b = self.list_b.write()?;
                match entry.get_mark() {
                    m if m == opcode::list::LPUSH => {
                        b.idx.lpush(&entry.key, entry.value.clone());
                    }
                    m if m == opcode::list::RPUSH => {
                        b.idx.rpush(&entry.key, entry.value.clone());
                    }
                    m if m == opcode::list::LPOP => {
                        b.idx.lpop(&entry.key);
                    }
                    m if m == opcode::list::RPOP => {
                        b.idx.rpop(&entry.key);
                    }
                    m if m == opcode::list::LREM => {
                        if let Ok(count) = std::str::from_utf8(&entry.extra).unwrap_or("0").parse::<i64>() {
                            b.idx.lrem(&entry.key, count, &entry.value);
                        }
                    }
                    m if m == opcode::list::LINSERT => {
                        let parts = split_extra(&entry.extra);
                        if parts.len() == 2 {
                            let before = parts[1] == b"before";
                            b.idx.linsert(&entry.key, &parts[0], before, entry.value.clone());
                        }
                    }
                    m if m == opcode::list::LSET => {
                        if let Ok(index) = std::str::from_utf8(&entry.extra).unwrap_or("0").parse::<i64>() {
                            b.idx.lset(&entry.key, index, entry.value.clone());
                        }
                    }
                    m if m == opcode::list::LTRIM => {
                        let parts = split_extra(&entry.extra);
                        if parts.len() == 2 {
                            if let (Ok(start), Ok(end)) = (
                                std::str::from_utf8(&parts[0]).unwrap_or("0").parse::<i64>(),
                                std::str::from_utf8(&parts[1]).unwrap_or("0").parse::<i64>(),
                            ) {
                                b.idx.ltrim(&entry.key, start, end);
                            }
                        }
                    }
                    m if m == opcode::list::CLEAR => {
                        b.idx.lclear(&entry.key);
                        b.expires.remove(&entry.key);
                    }
                    m if m == opcode::list::EXPIRE => {
                        if entry.timestamp > now {
                            b.expires.set(entry.key.clone(), entry.timestamp);
                        } else {
                            b.idx.lclear(&entry.key);
                            b.expires.remove(&entry.key);
                        }
                    }
                    _ => {}
                }
            }
            DataType::Hash => {
                let mut b = self.hash_b.write()?;
                match entry.get_mark() {
                    m if m == opcode::hash::HSET => {
                        b.idx.hset(&entry.key, &entry.extra, entry.value.clone());
                    }
                    m if m == opcode::hash::HDEL => {
                        b.idx.hdel(&entry.key, &entry.extra);
                    }
                    m if m == opcode::hash::CLEAR => {
                        b.idx.hclear(&entry.key);
                        b.expires.remove(&entry.key);
                    }
                    m if m == opcode::hash::EXPIRE => {
                        if entry.timestamp > now {
                            b.expires.set(entry.key.clone(), entry.timestamp);
                        } else {
                            b.idx.hclear(&entry.key);
                            b.expires.remove(&entry.key);
                        }
                    }
                    _ => {}
                }
            }
            DataType::Set => {
                let mut b = self.set_b.write()?;
                match entry.get_mark() {
                    m if m == opcode::set::SADD => {
                        b.idx.sadd(&entry.key, entry.value.clone());
                    }
                    m if m == opcode::set::SREM => {
                        b.idx.srem(&entry.key, &entry.value);
                    }
                    m if m == opcode::set::SMOVE => {
                        b.idx.smove(&entry.key, &entry.extra, &entry.value);
                    }
                    m if m == opcode::set::CLEAR => {
                        b.idx.sclear(&entry.key);
                        b.expires.remove(&entry.key);
                    }
                    m if m == opcode::set::EXPIRE => {
                        if entry.timestamp > now {
                            b.expires.set(entry.key.clone(), entry.timestamp);
                        } else {
                            b.idx.sclear(&entry.key);
                            b.expires.remove(&entry.key);
                        }
                    }
                    _ => {}
                }
            }
            DataType::ZSet => {
                let mut b = self.zset_b.write()?;
                match entry.get_mark() {
                    m if m == opcode::zset::ZADD => {
                        if let Ok(score) = std::str::from_utf8(&entry.extra).unwrap_or("0").parse::<f64>() {
                            b.idx.zadd(&entry.key, score, &entry.value);
                        }
                    }
                    m if m == opcode::zset::ZREM => {
                        b.idx.zrem(&entry.key, &entry.value);
                    }
                    m if m == opcode::zset::CLEAR => {
                        b.idx.zclear(&entry.key);
                        b.expires.remove(&entry.key);
                    }
                    m if m == opcode::zset::EXPIRE => {
                        if entry.timestamp > now {
                            b.expires.set(entry.key.clone(), entry.timestamp);
                        } else {
                            b.idx.zclear(&entry.key);
                            b.expires.remove(&entry.key);
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

pub(crate) fn format_score(score: f64) -> String {
    format!("{score}")
}

/// Reads every entry of every archived+active segment for `data_type`, in
/// ascending segment-id order, stopping a segment's scan at the first
/// decode failure (truncation, EOF, or corruption) — matching the
/// teacher's `Writer::read_valid_entry` non-fatal stop-iteration style.
pub(crate) fn gather_entries(segments: &mut Segments, data_type: DataType, block_size: u64) -> Result<Vec<(Entry, u32, u64, u64)>> {
    let mut ids: Vec<u32> = segments.archived.get(&data_type).map(|m| m.keys().copied().collect()).unwrap_or_default();
    ids.sort_unstable();
    let active_id = segments.active.get(&data_type).unwrap().id;
    ids.push(active_id);

    let mut out = Vec::new();
    for id in ids {
        let seg = if id == active_id {
            segments.active.get_mut(&data_type).unwrap()
        } else {
            segments.archived.get_mut(&data_type).unwrap().get_mut(&id).unwrap()
        };
        let mut offset = 0u64;
        loop {
            if offset + entry::HEADER_SIZE as u64 > block_size {
                break;
            }
            match seg.read(offset) {
                Ok((e, size)) => {
                    out.push((e, id, offset, size));
                    offset += size;
                }
                Err(_) => break,
            }
        }
    }
    Ok(out)
}

fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let ty = entry.file_type()?;
        let target = dst.join(entry.file_name());
        if ty.is_dir() {
            std::fs::create_dir_all(&target)?;
            copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_db(dir: &TempDir) -> Db {
        let mut config = Config::default();
        config.dir_path = dir.path().to_path_buf();
        config.block_size = 4096;
        Db::open(config).unwrap()
    }

    #[test]
    fn set_get_round_trip_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let db = open_db(&dir);
            db.set(b"foo", b"bar").unwrap();
            assert_eq!(db.get(b"foo").unwrap(), b"bar");
            db.close().unwrap();
        }
        let db = open_db(&dir);
        assert_eq!(db.get(b"foo").unwrap(), b"bar");
    }

    #[test]
    fn expire_then_get_reports_expired() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        db.set(b"foo", b"bar").unwrap();
        db.expire(b"foo", 1).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(matches!(db.get(b"foo"), Err(Error::KeyExpired)));
        assert_eq!(db.ttl(b"foo"), 0);
    }

    #[test]
    fn zset_ranks_scenario() {
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

    #[test]
    fn list_trim_scenario() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        for v in [b"a", b"b", b"c", b"d", b"e"] {
            db.rpush(b"k", v).unwrap();
        }
        db.ltrim(b"k", 1, 3).unwrap();
        assert_eq!(db.lrange(b"k", 0, -1), vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
        assert_eq!(db.llen(b"k"), 3);
    }

    #[test]
    fn set_difference_scenario() {
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

    #[test]
    fn segment_rotation_on_small_block_size() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        for i in 0..200 {
            let key = format!("k{i}");
            db.set(key.as_bytes(), &vec![b'x'; 64]).unwrap();
        }
        for i in 0..200 {
            let key = format!("k{i}");
            assert_eq!(db.get(key.as_bytes()).unwrap(), vec![b'x'; 64]);
        }
        let segments = db.segments.read().unwrap();
        assert!(segments.archived.get(&DataType::String).unwrap().len() > 1);
    }

    #[test]
    fn hash_field_operations() {
        let dir = TempDir::new().unwrap();
        let db = open_db(&dir);
        assert!(db.hset(b"k", b"f1", b"v1").unwrap());
        assert!(!db.hset(b"k", b"f1", b"v2").unwrap());
        assert_eq!(db.hget(b"k", b"f1"), Some(b"v2".to_vec()));
        assert!(db.hdel(b"k", b"f1").unwrap());
        assert!(!db.hexists(b"k", b"f1"));
    }
}
