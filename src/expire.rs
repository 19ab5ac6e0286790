//! Per-type `key -> absolute deadline (unix seconds)` tables. A key is
//! logically expired once `now > deadline`. Enforcement itself
//! (`Db::check_expired`) lives in `db.rs`, since it must also mutate the
//! matching type index and append a log entry.

use std::collections::HashMap;

use crate::entry::now_unix;

#[derive(Debug, Default)]
pub struct ExpireTable {
    deadlines: HashMap<Vec<u8>, u64>,
}

impl ExpireTable {
    pub fn set(&mut self, key: Vec<u8>, deadline: u64) {
        self.deadlines.insert(key, deadline);
    }

    pub fn get(&self, key: &[u8]) -> Option<u64> {
        self.deadlines.get(key).copied()
    }

    pub fn remove(&mut self, key: &[u8]) {
        self.deadlines.remove(key);
    }

    pub fn is_expired(&self, key: &[u8]) -> bool {
        match self.deadlines.get(key) {
            Some(deadline) => now_unix() > *deadline,
            None => false,
        }
    }

    pub fn ttl(&self, key: &[u8]) -> i64 {
        match self.deadlines.get(key) {
            Some(deadline) => {
                if self.is_expired(key) {
                    0
                } else {
                    *deadline as i64 - now_unix() as i64
                }
            }
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn future_deadline_not_expired() {
        let mut t = ExpireTable::default();
        t.set(b"k".to_vec(), now_unix() + 1000);
        assert!(!t.is_expired(b"k"));
        assert!(t.ttl(b"k") > 0);
    }

    #[test]
    fn past_deadline_expired() {
        let mut t = ExpireTable::default();
        t.set(b"k".to_vec(), now_unix().saturating_sub(10));
        assert!(t.is_expired(b"k"));
        assert_eq!(t.ttl(b"k"), 0);
    }

    #[test]
    fn absent_key_not_expired() {
        let t = ExpireTable::default();
        assert!(!t.is_expired(b"missing"));
        assert_eq!(t.ttl(b"missing"), 0);
    }
}
