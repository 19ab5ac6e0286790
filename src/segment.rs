//! Segment files: one append-only file per `(data type, monotonic id)`.
//!
//! Two read/write strategies are supported, selected per-database by
//! `RwMethod`. `FileIO` performs positional reads/writes against a regular
//! file descriptor and grows as entries are appended. `MMap` truncates the
//! file to `block_size` up front and maps it read-write; the mapping is the
//! hard cap on how much a single `MMap` segment can ever hold.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use serde::{Deserialize, Serialize};

use crate::entry::{DataType, Entry, HEADER_SIZE};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RwMethod {
    FileIo,
    MMap,
}

pub fn segment_file_name(id: u32, data_type: DataType) -> String {
    format!("{id:09}.data.{}", data_type.suffix())
}

pub struct Segment {
    pub id: u32,
    pub data_type: DataType,
    path: PathBuf,
    file: File,
    mmap: Option<MmapMut>,
    pub offset: u64,
    rw_method: RwMethod,
    block_size: u64,
}

impl Segment {
    /// Creates a brand new segment file at `dir/{id:09}.data.{suffix}`.
    pub fn create(dir: &Path, id: u32, rw_method: RwMethod, block_size: u64, data_type: DataType) -> Result<Segment> {
        let path = dir.join(segment_file_name(id, data_type));
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(true).open(&path)?;
        if rw_method == RwMethod::MMap {
            file.set_len(block_size)?;
        }
        let mmap = if rw_method == RwMethod::MMap {
            Some(unsafe { MmapMut::map_mut(&file)? })
        } else {
            None
        };
        Ok(Segment { id, data_type, path, file, mmap, offset: 0, rw_method, block_size })
    }

    /// Opens an existing segment file, restoring `offset` from the caller
    /// (active segments restore from `DB.META`; archived segments restore
    /// from their on-disk length).
    pub fn open(dir: &Path, id: u32, rw_method: RwMethod, block_size: u64, data_type: DataType, offset: u64) -> Result<Segment> {
        let path = dir.join(segment_file_name(id, data_type));
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        if rw_method == RwMethod::MMap {
            let len = file.metadata()?.len();
            if len < block_size {
                file.set_len(block_size)?;
            }
        }
        let mmap = if rw_method == RwMethod::MMap {
            Some(unsafe { MmapMut::map_mut(&file)? })
        } else {
            None
        };
        Ok(Segment { id, data_type, path, file, mmap, offset, rw_method, block_size })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Reads the entry at `offset`, returning the decoded entry and its
    /// total on-disk size.
    pub fn read(&mut self, offset: u64) -> Result<(Entry, u64)> {
        let mut header = [0u8; HEADER_SIZE];
        self.read_at(offset, &mut header)?;
        let (_, key_size, value_size, extra_size, _, _) = Entry::decode_header(&header)?;
        let total = HEADER_SIZE as u64 + key_size as u64 + value_size as u64 + extra_size as u64;
        let mut buf = vec![0u8; total as usize];
        self.read_at(offset, &mut buf)?;
        let entry = Entry::decode(&buf)?;
        Ok((entry, total))
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        match &self.mmap {
            Some(map) => {
                let end = offset as usize + buf.len();
                let slice = map.get(offset as usize..end).ok_or(Error::EmptyEntry)?;
                buf.copy_from_slice(slice);
            }
            None => {
                self.file.seek(SeekFrom::Start(offset))?;
                self.file.read_exact(buf)?;
            }
        }
        Ok(())
    }

    /// Appends `entry` at the current offset; fails with `EmptyEntry` if the
    /// key is empty. Callers are responsible for the `block_size` cap check
    /// (`Db::store`), since the decision to rotate happens before the write.
    pub fn write(&mut self, entry: &Entry) -> Result<()> {
        if entry.key.is_empty() {
            return Err(Error::EmptyEntry);
        }
        let buf = entry.encode()?;
        match &mut self.mmap {
            Some(map) => {
                let start = self.offset as usize;
                let end = start + buf.len();
                if end > map.len() {
                    return Err(Error::Io(std::io::Error::new(std::io::ErrorKind::WriteZero, "mmap segment full")));
                }
                map[start..end].copy_from_slice(&buf);
            }
            None => {
                self.file.seek(SeekFrom::Start(self.offset))?;
                self.file.write_all(&buf)?;
            }
        }
        self.offset += buf.len() as u64;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        match &self.mmap {
            Some(map) => map.flush()?,
            None => self.file.sync_data()?,
        }
        Ok(())
    }

    pub fn close(&self, sync: bool) -> Result<()> {
        if sync {
            self.sync()?;
        }
        Ok(())
    }

    /// Length of the underlying file on disk (used when restoring an
    /// archived segment's effective size in `FileIo` mode).
    pub fn file_len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::opcode;
    use tempfile::TempDir;

    #[test]
    fn write_then_read_file_io() {
        let dir = TempDir::new().unwrap();
        let mut seg = Segment::create(dir.path(), 0, RwMethod::FileIo, 4096, DataType::String).unwrap();
        let e = Entry::new_no_extra(b"k".to_vec(), b"v".to_vec(), DataType::String, opcode::string::SET);
        let size = e.size();
        seg.write(&e).unwrap();
        assert_eq!(seg.offset, size);
        let (read_back, read_size) = seg.read(0).unwrap();
        assert_eq!(read_size, size);
        assert_eq!(read_back.key, b"k");
        assert_eq!(read_back.value, b"v");
    }

    #[test]
    fn write_then_read_mmap() {
        let dir = TempDir::new().unwrap();
        let mut seg = Segment::create(dir.path(), 0, RwMethod::MMap, 4096, DataType::String).unwrap();
        let e = Entry::new_no_extra(b"k".to_vec(), b"v".to_vec(), DataType::String, opcode::string::SET);
        seg.write(&e).unwrap();
        seg.sync().unwrap();
        let (read_back, _) = seg.read(0).unwrap();
        assert_eq!(read_back.value, b"v");
    }

    #[test]
    fn segment_file_name_format() {
        assert_eq!(segment_file_name(7, DataType::ZSet), "000000007.data.zset");
    }
}
