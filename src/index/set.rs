//! Set index: `key -> set of members`.

use std::collections::{HashMap, HashSet};

use rand::seq::SliceRandom;
use rand::Rng;

#[derive(Default)]
pub struct SetIndex {
    sets: HashMap<Vec<u8>, HashSet<Vec<u8>>>,
}

impl SetIndex {
    pub fn sadd(&mut self, key: &[u8], member: Vec<u8>) -> bool {
        self.sets.entry(key.to_vec()).or_default().insert(member)
    }

    pub fn srem(&mut self, key: &[u8], member: &[u8]) -> bool {
        let Some(members) = self.sets.get_mut(key) else { return false };
        let removed = members.remove(member);
        if members.is_empty() {
            self.sets.remove(key);
        }
        removed
    }

    pub fn smove(&mut self, src: &[u8], dst: &[u8], member: &[u8]) -> bool {
        let Some(set) = self.sets.get_mut(src) else { return false };
        if !set.remove(member) {
            return false;
        }
        if set.is_empty() {
            self.sets.remove(src);
        }
        self.sets.entry(dst.to_vec()).or_default().insert(member.to_vec());
        true
    }

    pub fn sclear(&mut self, key: &[u8]) {
        self.sets.remove(key);
    }

    pub fn skey_exists(&self, key: &[u8]) -> bool {
        self.sets.contains_key(key)
    }

    pub fn sismember(&self, key: &[u8], member: &[u8]) -> bool {
        self.sets.get(key).map(|s| s.contains(member)).unwrap_or(false)
    }

    pub fn scard(&self, key: &[u8]) -> usize {
        self.sets.get(key).map(|s| s.len()).unwrap_or(0)
    }

    pub fn smembers(&self, key: &[u8]) -> Vec<Vec<u8>> {
        self.sets.get(key).map(|s| s.iter().cloned().collect()).unwrap_or_default()
    }

    /// `count > 0`: up to `count` distinct members. `count < 0`: `-count`
    /// samples, possibly repeating. `count == 0`: nothing.
    pub fn srandmember(&self, key: &[u8], count: i64) -> Vec<Vec<u8>> {
        let Some(members) = self.sets.get(key) else { return Vec::new() };
        let pool: Vec<&Vec<u8>> = members.iter().collect();
        if pool.is_empty() || count == 0 {
            return Vec::new();
        }
        let mut rng = rand::thread_rng();
        if count > 0 {
            let n = (count as usize).min(pool.len());
            let mut shuffled = pool.clone();
            shuffled.shuffle(&mut rng);
            shuffled.into_iter().take(n).cloned().collect()
        } else {
            let n = (-count) as usize;
            (0..n).map(|_| pool[rng.gen_range(0..pool.len())].clone()).collect()
        }
    }

    /// `count > 0`: remove up to `count` distinct members. `count < 0` (Go
    /// quirk kept as documented behaviour): same as positive, since popping
    /// is inherently exhaustive-without-replacement.
    pub fn spop(&mut self, key: &[u8], count: i64) -> Vec<Vec<u8>> {
        let n = count.unsigned_abs() as usize;
        let Some(members) = self.sets.get_mut(key) else { return Vec::new() };
        let chosen: Vec<Vec<u8>> = members.iter().take(n).cloned().collect();
        for m in &chosen {
            members.remove(m);
        }
        if members.is_empty() {
            self.sets.remove(key);
        }
        chosen
    }

    pub fn sunion(&self, keys: &[&[u8]]) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        for key in keys {
            if let Some(members) = self.sets.get(*key) {
                out.extend(members.iter().cloned());
            }
        }
        out
    }

    pub fn sdiff(&self, keys: &[&[u8]]) -> Vec<Vec<u8>> {
        let Some((first, rest)) = keys.split_first() else { return Vec::new() };
        let Some(base) = self.sets.get(*first) else { return Vec::new() };
        base.iter()
            .filter(|m| !rest.iter().any(|k| self.sets.get(*k).is_some_and(|s| s.contains(*m))))
            .cloned()
            .collect()
    }

    /// Every key's current members; used by full reclaim.
    pub fn snapshot(&self) -> Vec<(Vec<u8>, Vec<Vec<u8>>)> {
        self.sets.iter().map(|(k, s)| (k.clone(), s.iter().cloned().collect())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_rem_and_membership() {
        let mut s = SetIndex::default();
        assert!(s.sadd(b"k", b"a".to_vec()));
        assert!(!s.sadd(b"k", b"a".to_vec()));
        assert!(s.sismember(b"k", b"a"));
        assert!(s.srem(b"k", b"a"));
        assert!(!s.skey_exists(b"k"));
    }

    #[test]
    fn move_transfers_member() {
        let mut s = SetIndex::default();
        s.sadd(b"src", b"m".to_vec());
        assert!(s.smove(b"src", b"dst", b"m"));
        assert!(!s.sismember(b"src", b"m"));
        assert!(s.sismember(b"dst", b"m"));
    }

    #[test]
    fn diff_excludes_members_in_other_sets() {
        let mut s = SetIndex::default();
        for m in [b"1", b"2", b"3"] {
            s.sadd(b"a", m.to_vec());
        }
        s.sadd(b"b", b"2".to_vec());
        s.sadd(b"c", b"3".to_vec());
        let mut diff = s.sdiff(&[b"a", b"b", b"c"]);
        diff.sort();
        assert_eq!(diff, vec![b"1".to_vec()]);
    }

    #[test]
    fn union_concatenates_with_duplicates() {
        let mut s = SetIndex::default();
        s.sadd(b"a", b"x".to_vec());
        s.sadd(b"b", b"x".to_vec());
        let mut u = s.sunion(&[b"a", b"b"]);
        u.sort();
        assert_eq!(u, vec![b"x".to_vec(), b"x".to_vec()]);
    }
}
