//! The on-disk log record and its opcode vocabulary.
//!
//! Layout (26-byte header, big-endian multi-byte fields, followed by
//! `key`, `value`, `extra` contiguously):
//!
//! ```text
//! 0   4   crc32      CRC32/IEEE of `value` only
//! 4   8   keySize
//! 8   12  valueSize
//! 12  16  extraSize
//! 16  18  state      high byte = type, low byte = opcode
//! 18  26  timestamp  unix seconds, or absolute deadline for Expire entries
//! 26  ..  key | value | extra
//! ```
//!
//! Key and extra bytes are not covered by the CRC; this mirrors the
//! original on-disk format and is a known weakness (see SPEC_FULL.md §4).

use crate::error::{Error, Result};

pub const HEADER_SIZE: usize = 26;

/// The literal two-byte separator used to pack auxiliary operands into
/// `extra`. Not a NUL byte.
pub const EXTRA_SEPARATOR: &[u8] = b"\\0";

pub fn contains_separator(s: &[u8]) -> bool {
    s.windows(EXTRA_SEPARATOR.len()).any(|w| w == EXTRA_SEPARATOR)
}

pub fn join_extra(parts: &[&[u8]]) -> Vec<u8> {
    parts.join(EXTRA_SEPARATOR)
}

/// Splits `extra` on the literal separator. Returns exactly as many pieces
/// as separators + 1; callers know how many operands to expect.
pub fn split_extra(extra: &[u8]) -> Vec<Vec<u8>> {
    if extra.is_empty() {
        return Vec::new();
    }
    let sep = EXTRA_SEPARATOR;
    let mut parts = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i + sep.len() <= extra.len() {
        if &extra[i..i + sep.len()] == sep {
            parts.push(extra[start..i].to_vec());
            i += sep.len();
            start = i;
        } else {
            i += 1;
        }
    }
    parts.push(extra[start..].to_vec());
    parts
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    String = 0,
    List = 1,
    Hash = 2,
    Set = 3,
    ZSet = 4,
}

impl DataType {
    pub const ALL: [DataType; 5] = [
        DataType::String,
        DataType::List,
        DataType::Hash,
        DataType::Set,
        DataType::ZSet,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            DataType::String => "str",
            DataType::List => "list",
            DataType::Hash => "hash",
            DataType::Set => "set",
            DataType::ZSet => "zset",
        }
    }

    pub fn from_suffix(s: &str) -> Option<DataType> {
        Some(match s {
            "str" => DataType::String,
            "list" => DataType::List,
            "hash" => DataType::Hash,
            "set" => DataType::Set,
            "zset" => DataType::ZSet,
            _ => return None,
        })
    }
}

impl TryFrom<u8> for DataType {
    type Error = Error;
    fn try_from(v: u8) -> Result<Self> {
        Ok(match v {
            0 => DataType::String,
            1 => DataType::List,
            2 => DataType::Hash,
            3 => DataType::Set,
            4 => DataType::ZSet,
            _ => return Err(Error::InvalidEntry),
        })
    }
}

/// Per-type opcode constants. Kept as plain `u8` (rather than one enum per
/// type) because entries are decoded generically by `(type, opcode)` pairs
/// in the replay dispatcher (`db.rs::replay`), which matches on both at once.
pub mod opcode {
    pub mod string {
        pub const SET: u8 = 0;
        pub const REM: u8 = 1;
        pub const EXPIRE: u8 = 2;
        pub const PERSIST: u8 = 3;
    }
    pub mod list {
        pub const LPUSH: u8 = 0;
        pub const RPUSH: u8 = 1;
        pub const LPOP: u8 = 2;
        pub const RPOP: u8 = 3;
        pub const LREM: u8 = 4;
        pub const LINSERT: u8 = 5;
        pub const LSET: u8 = 6;
        pub const LTRIM: u8 = 7;
        pub const CLEAR: u8 = 8;
        pub const EXPIRE: u8 = 9;
    }
    pub mod hash {
        pub const HSET: u8 = 0;
        pub const HDEL: u8 = 1;
        pub const CLEAR: u8 = 2;
        pub const EXPIRE: u8 = 3;
    }
    pub mod set {
        pub const SADD: u8 = 0;
        pub const SREM: u8 = 1;
        pub const SMOVE: u8 = 2;
        pub const CLEAR: u8 = 3;
        pub const EXPIRE: u8 = 4;
    }
    pub mod zset {
        pub const ZADD: u8 = 0;
        pub const ZREM: u8 = 1;
        pub const CLEAR: u8 = 2;
        pub const EXPIRE: u8 = 3;
    }
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub crc32: u32,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub extra: Vec<u8>,
    pub state: u16,
    pub timestamp: u64,
}

impl Entry {
    fn new_internal(
        key: Vec<u8>,
        value: Vec<u8>,
        extra: Vec<u8>,
        timestamp: u64,
        data_type: DataType,
        mark: u8,
    ) -> Entry {
        let state = ((data_type as u16) << 8) | mark as u16;
        Entry { crc32: 0, key, value, extra, state, timestamp }
    }

    pub fn new(key: Vec<u8>, value: Vec<u8>, extra: Vec<u8>, data_type: DataType, mark: u8) -> Entry {
        let now = now_unix();
        Entry::new_internal(key, value, extra, now, data_type, mark)
    }

    pub fn new_no_extra(key: Vec<u8>, value: Vec<u8>, data_type: DataType, mark: u8) -> Entry {
        Entry::new(key, value, Vec::new(), data_type, mark)
    }

    pub fn new_with_expire(
        key: Vec<u8>,
        value: Vec<u8>,
        deadline: u64,
        data_type: DataType,
        mark: u8,
    ) -> Entry {
        Entry::new_internal(key, value, Vec::new(), deadline, data_type, mark)
    }

    pub fn size(&self) -> u64 {
        HEADER_SIZE as u64 + self.key.len() as u64 + self.value.len() as u64 + self.extra.len() as u64
    }

    pub fn get_type(&self) -> Result<DataType> {
        DataType::try_from((self.state >> 8) as u8)
    }

    pub fn get_mark(&self) -> u8 {
        (self.state & 0xFF) as u8
    }

    /// Validates and serialises the entry, filling in the CRC.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.key.is_empty() {
            return Err(Error::InvalidEntry);
        }
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.value);
        let crc = hasher.finalize();

        let mut buf = Vec::with_capacity(self.size() as usize);
        buf.extend_from_slice(&crc.to_be_bytes());
        buf.extend_from_slice(&(self.key.len() as u32).to_be_bytes());
        buf.extend_from_slice(&(self.value.len() as u32).to_be_bytes());
        buf.extend_from_slice(&(self.extra.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.state.to_be_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);
        buf.extend_from_slice(&self.extra);
        Ok(buf)
    }

    /// Parses the 26-byte header. Returns `(crc32, key_size, value_size,
    /// extra_size, state, timestamp)`.
    pub fn decode_header(buf: &[u8]) -> Result<(u32, u32, u32, u32, u16, u64)> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::EmptyEntry);
        }
        let crc32 = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        let key_size = u32::from_be_bytes(buf[4..8].try_into().unwrap());
        let value_size = u32::from_be_bytes(buf[8..12].try_into().unwrap());
        let extra_size = u32::from_be_bytes(buf[12..16].try_into().unwrap());
        let state = u16::from_be_bytes(buf[16..18].try_into().unwrap());
        let timestamp = u64::from_be_bytes(buf[18..26].try_into().unwrap());
        Ok((crc32, key_size, value_size, extra_size, state, timestamp))
    }

    /// Decodes a full record (header + key/value/extra) and verifies the
    /// value's CRC, failing with `InvalidCrc` on mismatch.
    pub fn decode(buf: &[u8]) -> Result<Entry> {
        let (crc32, key_size, value_size, extra_size, state, timestamp) = Entry::decode_header(buf)?;
        let mut off = HEADER_SIZE;
        let key = buf
            .get(off..off + key_size as usize)
            .ok_or(Error::EmptyEntry)?
            .to_vec();
        off += key_size as usize;
        let value = buf
            .get(off..off + value_size as usize)
            .ok_or(Error::EmptyEntry)?
            .to_vec();
        off += value_size as usize;
        let extra = buf
            .get(off..off + extra_size as usize)
            .ok_or(Error::EmptyEntry)?
            .to_vec();

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&value);
        if hasher.finalize() != crc32 {
            return Err(Error::InvalidCrc);
        }

        Ok(Entry { crc32, key, value, extra, state, timestamp })
    }
}

pub fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let e = Entry::new_no_extra(b"k".to_vec(), b"v".to_vec(), DataType::String, opcode::string::SET);
        let buf = e.encode().unwrap();
        assert_eq!(buf.len(), e.size() as usize);
        let decoded = Entry::decode(&buf).unwrap();
        assert_eq!(decoded.key, b"k");
        assert_eq!(decoded.value, b"v");
        assert_eq!(decoded.get_type().unwrap(), DataType::String);
        assert_eq!(decoded.get_mark(), opcode::string::SET);
    }

    #[test]
    fn corrupted_value_fails_crc() {
        let e = Entry::new_no_extra(b"k".to_vec(), b"v".to_vec(), DataType::String, opcode::string::SET);
        let mut buf = e.encode().unwrap();
        let value_off = HEADER_SIZE + 1;
        buf[value_off] ^= 0xFF;
        assert!(matches!(Entry::decode(&buf), Err(Error::InvalidCrc)));
    }

    #[test]
    fn empty_key_rejected_on_encode() {
        let e = Entry::new_no_extra(Vec::new(), b"v".to_vec(), DataType::String, opcode::string::SET);
        assert!(matches!(e.encode(), Err(Error::InvalidEntry)));
    }

    #[test]
    fn extra_join_split_round_trip() {
        let extra = join_extra(&[b"pivot", b"before"]);
        let parts = split_extra(&extra);
        assert_eq!(parts, vec![b"pivot".to_vec(), b"before".to_vec()]);
    }

    #[test]
    fn separator_detection() {
        assert!(contains_separator(b"foo\\0bar"));
        assert!(!contains_separator(b"foobar"));
    }
}
