//! Discovery of segment files on disk.
//!
//! `discover` enumerates `*.data.*` files under a directory, groups them by
//! type (the filename suffix), and returns ids sorted ascending per type.
//! The facade (`Db::open`) decides which id is active (the largest) and
//! opens the rest read-only.

use std::collections::HashMap;
use std::path::Path;

use crate::entry::DataType;
use crate::error::Result;

pub fn discover(dir: &Path) -> Result<HashMap<DataType, Vec<u32>>> {
    let mut found: HashMap<DataType, Vec<u32>> = HashMap::new();
    if !dir.exists() {
        return Ok(found);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some((id, data_type)) = parse_segment_name(name) {
            found.entry(data_type).or_default().push(id);
        }
    }
    for ids in found.values_mut() {
        ids.sort_unstable();
    }
    Ok(found)
}

fn parse_segment_name(name: &str) -> Option<(u32, DataType)> {
    // "{id:09d}.data.{suffix}"
    let mut parts = name.splitn(3, '.');
    let id_part = parts.next()?;
    let tag = parts.next()?;
    let suffix = parts.next()?;
    if tag != "data" || id_part.len() != 9 {
        return None;
    }
    let id: u32 = id_part.parse().ok()?;
    let data_type = DataType::from_suffix(suffix)?;
    Some((id, data_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_names() {
        assert_eq!(parse_segment_name("000000003.data.str"), Some((3, DataType::String)));
        assert_eq!(parse_segment_name("000000012.data.zset"), Some((12, DataType::ZSet)));
    }

    #[test]
    fn rejects_unrelated_names() {
        assert_eq!(parse_segment_name("DB.META"), None);
        assert_eq!(parse_segment_name("000000003.data.bogus"), None);
    }

    #[test]
    fn discover_groups_and_sorts() {
        let dir = tempfile::TempDir::new().unwrap();
        for (id, suffix) in [(2, "str"), (0, "str"), (1, "str"), (5, "hash")] {
            std::fs::write(dir.path().join(format!("{id:09}.data.{suffix}")), b"").unwrap();
        }
        let found = discover(dir.path()).unwrap();
        assert_eq!(found.get(&DataType::String).unwrap(), &vec![0, 1, 2]);
        assert_eq!(found.get(&DataType::Hash).unwrap(), &vec![5]);
    }
}
