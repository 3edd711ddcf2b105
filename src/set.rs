// Copyright 2025 Splitmap Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Set view over [`SplitMap`] with unit values.

use std::hash::Hash;

use crate::map::SplitMap;

/// Hash set sharing the map's bucket and directory machinery.
pub struct SplitSet<K> {
    map: SplitMap<K, ()>,
}

impl<K: Hash> SplitSet<K> {
    pub fn new() -> Self {
        SplitSet {
            map: SplitMap::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        SplitSet {
            map: SplitMap::with_capacity(capacity),
        }
    }
}

impl<K: Hash> Default for SplitSet<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> SplitSet<K> {
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn iter<'a>(&'a self) -> impl Iterator<Item = &'a K> {
        self.map.keys()
    }
}

impl<K: Eq> SplitSet<K> {
    /// Returns true when the value was not already present.
    pub fn insert(&mut self, key: K) -> bool {
        self.map.insert(key, ()).is_none()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Returns true when the value was present.
    pub fn remove(&mut self, key: &K) -> bool {
        self.map.remove(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_basic() {
        let mut s: SplitSet<i64> = SplitSet::new();
        assert!(s.insert(1));
        assert!(s.insert(2));
        assert!(!s.insert(1));
        assert_eq!(s.len(), 2);
        assert!(s.contains(&1));
        assert!(!s.contains(&3));
        assert!(s.remove(&1));
        assert!(!s.remove(&1));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_set_clear_and_iter() {
        let mut s: SplitSet<i64> = SplitSet::with_capacity(100);
        for i in 0..100 {
            s.insert(i);
        }
        let mut keys: Vec<i64> = s.iter().copied().collect();
        keys.sort_unstable();
        assert_eq!(keys, (0..100).collect::<Vec<_>>());
        s.clear();
        assert!(s.is_empty());
        assert_eq!(s.iter().count(), 0);
    }
}
