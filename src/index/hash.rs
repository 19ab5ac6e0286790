//! Hash index: `key -> field -> value`.

use std::collections::HashMap;

#[derive(Default)]
pub struct HashIndex {
    hashes: HashMap<Vec<u8>, HashMap<Vec<u8>, Vec<u8>>>,
}

impl HashIndex {
    /// Returns `true` if `field` was newly created (as opposed to
    /// overwritten) — matches `HSet`'s "1 if new field" semantics.
    pub fn hset(&mut self, key: &[u8], field: &[u8], value: Vec<u8>) -> bool {
        let fields = self.hashes.entry(key.to_vec()).or_default();
        fields.insert(field.to_vec(), value).is_none()
    }

    pub fn hsetnx(&mut self, key: &[u8], field: &[u8], value: Vec<u8>) -> bool {
        let fields = self.hashes.entry(key.to_vec()).or_default();
        if fields.contains_key(field) {
            false
        } else {
            fields.insert(field.to_vec(), value);
            true
        }
    }

    pub fn hget(&self, key: &[u8], field: &[u8]) -> Option<&[u8]> {
        self.hashes.get(key)?.get(field).map(|v| v.as_slice())
    }

    pub fn hget_all(&self, key: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.hashes.get(key).map(|f| f.iter().map(|(k, v)| (k.clone(), v.clone())).collect()).unwrap_or_default()
    }

    pub fn hdel(&mut self, key: &[u8], field: &[u8]) -> bool {
        let Some(fields) = self.hashes.get_mut(key) else { return false };
        let removed = fields.remove(field).is_some();
        if fields.is_empty() {
            self.hashes.remove(key);
        }
        removed
    }

    pub fn hclear(&mut self, key: &[u8]) {
        self.hashes.remove(key);
    }

    pub fn hkey_exists(&self, key: &[u8]) -> bool {
        self.hashes.contains_key(key)
    }

    pub fn hexists(&self, key: &[u8], field: &[u8]) -> bool {
        self.hashes.get(key).map(|f| f.contains_key(field)).unwrap_or(false)
    }

    pub fn hlen(&self, key: &[u8]) -> usize {
        self.hashes.get(key).map(|f| f.len()).unwrap_or(0)
    }

    pub fn hkeys(&self, key: &[u8]) -> Vec<Vec<u8>> {
        self.hashes.get(key).map(|f| f.keys().cloned().collect()).unwrap_or_default()
    }

    pub fn hvals(&self, key: &[u8]) -> Vec<Vec<u8>> {
        self.hashes.get(key).map(|f| f.values().cloned().collect()).unwrap_or_default()
    }

    /// Every key's current fields; used by full reclaim.
    pub fn snapshot(&self) -> Vec<(Vec<u8>, Vec<(Vec<u8>, Vec<u8>)>)> {
        self.hashes
            .iter()
            .map(|(k, fields)| (k.clone(), fields.iter().map(|(f, v)| (f.clone(), v.clone())).collect()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hset_reports_new_vs_overwrite() {
        let mut h = HashIndex::default();
        assert!(h.hset(b"k", b"f", b"1".to_vec()));
        assert!(!h.hset(b"k", b"f", b"2".to_vec()));
        assert_eq!(h.hget(b"k", b"f"), Some(b"2".as_slice()));
    }

    #[test]
    fn hdel_drops_empty_key() {
        let mut h = HashIndex::default();
        h.hset(b"k", b"f", b"1".to_vec());
        assert!(h.hdel(b"k", b"f"));
        assert!(!h.hkey_exists(b"k"));
    }

    #[test]
    fn hsetnx_respects_existing() {
        let mut h = HashIndex::default();
        assert!(h.hsetnx(b"k", b"f", b"1".to_vec()));
        assert!(!h.hsetnx(b"k", b"f", b"2".to_vec()));
        assert_eq!(h.hget(b"k", b"f"), Some(b"1".as_slice()));
    }
}
