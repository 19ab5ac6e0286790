//! The five type-specific in-memory indexes.

pub mod hash;
pub mod list;
pub mod set;
pub mod skiplist;
pub mod zset;
pub mod zset_skiplist;

/// Points at the on-disk location of a String value. Only the String index
/// uses locators: List/Hash/Set/ZSet are always fully materialised in
/// memory (SPEC_FULL.md §3.5).
#[derive(Debug, Clone)]
pub struct Locator {
    pub file_id: u32,
    pub entry_size: u64,
    pub value_size: u64,
    pub offset: u64,
    /// Present only in `KeyValueMem` mode.
    pub value: Option<Vec<u8>>,
}
