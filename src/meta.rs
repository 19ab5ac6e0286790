//! `DB.META`: active write offsets and reclaimable-byte counters, persisted
//! as JSON. Loaded by `Db::open`, written by `Db::close` and whenever a
//! reclaim finishes.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::entry::DataType;
use crate::error::Result;

const META_FILE: &str = "DB.META";

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Meta {
    /// keyed by type suffix ("str", "list", ...)
    pub active_write_off: HashMap<String, u64>,
    /// keyed by segment id
    pub reclaimable_space: HashMap<u32, i64>,
}

impl Meta {
    pub fn offset_for(&self, data_type: DataType) -> u64 {
        *self.active_write_off.get(data_type.suffix()).unwrap_or(&0)
    }

    pub fn set_offset(&mut self, data_type: DataType, offset: u64) {
        self.active_write_off.insert(data_type.suffix().to_string(), offset);
    }

    pub fn add_reclaimable(&mut self, file_id: u32, bytes: i64) {
        *self.reclaimable_space.entry(file_id).or_insert(0) += bytes;
    }

    pub fn load(dir: &Path) -> Result<Meta> {
        let path = dir.join(META_FILE);
        if !path.exists() {
            return Ok(Meta::default());
        }
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data).unwrap_or_default())
    }

    pub fn store(&self, dir: &Path) -> Result<()> {
        let path = dir.join(META_FILE);
        let data = serde_json::to_vec_pretty(self).expect("meta serializes");
        std::fs::write(path, data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut meta = Meta::default();
        meta.set_offset(DataType::String, 128);
        meta.add_reclaimable(3, 64);
        meta.store(dir.path()).unwrap();

        let loaded = Meta::load(dir.path()).unwrap();
        assert_eq!(loaded.offset_for(DataType::String), 128);
        assert_eq!(loaded.reclaimable_space.get(&3), Some(&64));
    }

    #[test]
    fn missing_file_yields_default() {
        let dir = tempfile::TempDir::new().unwrap();
        let loaded = Meta::load(dir.path()).unwrap();
        assert_eq!(loaded.offset_for(DataType::String), 0);
    }
}
