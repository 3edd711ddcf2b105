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

//! Extendible directory of Swiss-table buckets.
//!
//! A key is hashed once. The top `dir_bits` bits select a directory entry,
//! which names a bucket; the remaining bits drive the probe inside that
//! bucket. A bucket with local depth d owns an aligned block of
//! `2^(dir_bits - d)` contiguous directory entries.
//!
//! Growth works bottom-up. A bucket that runs out of budget first tries to
//! reclaim tombstones in place, then doubles, and only once it has reached
//! `max_bucket_capacity` is it split into two children one directory bit
//! deeper (doubling the directory itself when the bucket already uses every
//! bit). Splitting caps the peak extra memory of growth at roughly one
//! bucket's worth of slots, instead of the 2x spike a monolithic table
//! pays on resize; `max_bucket_capacity = 0` or `usize::MAX` opts back
//! into the monolithic behavior.
//!
//! A split that cannot redistribute (every element routes to the same
//! child, e.g. under a degenerate hash) makes no progress at any depth, so
//! the routing is counted first and such buckets double past
//! `max_bucket_capacity` instead.

use std::hash::Hash;
use std::mem;
use std::rc::Rc;

use crate::alloc::{HeapAllocator, SlotAllocator};
use crate::bucket::{capacity_for, growth_budget, Bucket, BucketCtx, MIN_BUCKET_CAPACITY};
use crate::group::CTRL_DELETED;
use crate::hash::{default_hash, random_seed, HashFn};

/// Default ceiling on a single bucket's capacity.
pub const DEFAULT_MAX_BUCKET_CAPACITY: usize = 4095;

pub(crate) struct Params<K, V> {
    pub(crate) hash: HashFn<K>,
    pub(crate) seed: u64,
    pub(crate) alloc: Rc<dyn SlotAllocator<K, V>>,
    /// 0 disables splitting; otherwise a power of two minus one.
    pub(crate) max_bucket_capacity: usize,
}

/// Builder for maps that need a non-default hash, allocator, bucket
/// ceiling, or seed.
///
/// ```
/// use splitmap::{Options, SplitMap};
///
/// let mut m: SplitMap<u64, u64> = Options::new().max_bucket_capacity(63).build(0);
/// m.insert(1, 10);
/// assert_eq!(m.get(&1), Some(&10));
/// ```
pub struct Options<K, V> {
    hash: HashFn<K>,
    allocator: Rc<dyn SlotAllocator<K, V>>,
    max_bucket_capacity: usize,
    seed: Option<u64>,
}

impl<K: Hash, V> Options<K, V> {
    /// Options with the default AHash-backed hash.
    pub fn new() -> Self {
        Self::with_hash(default_hash::<K>)
    }
}

impl<K: Hash, V> Default for Options<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Options<K, V> {
    /// Options around an explicit hash function; the only constructor for
    /// key types that do not implement `Hash`.
    pub fn with_hash(hash: HashFn<K>) -> Self {
        Options {
            hash,
            allocator: Rc::new(HeapAllocator),
            max_bucket_capacity: DEFAULT_MAX_BUCKET_CAPACITY,
            seed: None,
        }
    }

    pub fn hash(mut self, hash: HashFn<K>) -> Self {
        self.hash = hash;
        self
    }

    pub fn allocator(mut self, allocator: Rc<dyn SlotAllocator<K, V>>) -> Self {
        self.allocator = allocator;
        self
    }

    /// Ceiling on a single bucket's capacity, rounded up to a power of two
    /// minus one. 0 disables splitting so the map stays a single bucket
    /// that doubles forever.
    pub fn max_bucket_capacity(mut self, cap: usize) -> Self {
        self.max_bucket_capacity = cap;
        self
    }

    /// Fixes the hash seed, making probe placement and traversal order
    /// deterministic. Intended for tests.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Builds a map pre-sized for `initial_capacity` entries.
    pub fn build(self, initial_capacity: usize) -> SplitMap<K, V> {
        SplitMap::with_options(self, initial_capacity)
    }
}

/// Hash map built from Swiss-table buckets behind an extendible directory.
///
/// Single-threaded by design: the map holds `Rc` handles and performs no
/// internal synchronization. Any reference obtained from the map is
/// invalidated by the next mutation, which the borrow checker enforces.
pub struct SplitMap<K, V> {
    dir: Vec<u32>,
    buckets: Vec<Bucket<K, V>>,
    dir_bits: u32,
    len: usize,
    params: Params<K, V>,
}

impl<K: Hash, V> SplitMap<K, V> {
    pub fn new() -> Self {
        Options::new().build(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Options::new().build(capacity)
    }
}

impl<K: Hash, V> Default for SplitMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SplitMap<K, V> {
    fn with_options(opts: Options<K, V>, initial_capacity: usize) -> Self {
        let max_bucket_capacity = match opts.max_bucket_capacity {
            0 => 0,
            m => usize::MAX >> m.max(MIN_BUCKET_CAPACITY).leading_zeros(),
        };
        let params = Params {
            hash: opts.hash,
            seed: opts.seed.unwrap_or_else(random_seed),
            alloc: opts.allocator,
            max_bucket_capacity,
        };

        let (dir, buckets, dir_bits) = if initial_capacity == 0 {
            (vec![0], vec![Bucket::empty(0)], 0)
        } else {
            let single = capacity_for(initial_capacity);
            if max_bucket_capacity == 0 || single <= max_bucket_capacity {
                let b = Bucket::with_capacity(&*params.alloc, single, 0);
                (vec![0], vec![b], 0)
            } else {
                // Spread the request over the smallest power-of-two number
                // of max-sized buckets whose combined budget covers it.
                let per_bucket = growth_budget(max_bucket_capacity);
                let mut n = 1usize;
                while n.saturating_mul(per_bucket) < initial_capacity {
                    n *= 2;
                }
                let dir_bits = n.trailing_zeros();
                let buckets = (0..n)
                    .map(|_| Bucket::with_capacity(&*params.alloc, max_bucket_capacity, dir_bits))
                    .collect();
                ((0..n as u32).collect(), buckets, dir_bits)
            }
        };

        SplitMap {
            dir,
            buckets,
            dir_bits,
            len: 0,
            params,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total slot capacity across all buckets.
    pub fn capacity(&self) -> usize {
        self.buckets.iter().map(|b| b.capacity).sum()
    }

    /// Number of distinct buckets behind the directory.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Drops every entry. Capacity, buckets, and directory shape are kept.
    pub fn clear(&mut self) {
        for b in &mut self.buckets {
            b.clear();
        }
        self.len = 0;
    }

    pub fn iter<'a>(&'a self) -> impl Iterator<Item = (&'a K, &'a V)> {
        self.buckets.iter().flat_map(|b| b.entries())
    }

    pub fn keys<'a>(&'a self) -> impl Iterator<Item = &'a K> {
        self.iter().map(|(k, _)| k)
    }

    pub fn values<'a>(&'a self) -> impl Iterator<Item = &'a V> {
        self.iter().map(|(_, v)| v)
    }

    pub fn iter_mut<'a>(&'a mut self) -> impl Iterator<Item = (&'a K, &'a mut V)> {
        self.buckets.iter_mut().flat_map(|b| b.entries_mut())
    }

    /// Re-entrant iteration: the live entries are snapshotted before the
    /// first call, then `f` runs once per snapshotted entry until it
    /// returns `false`.
    ///
    /// Because `f` receives the map back, it may insert, remove, and even
    /// force resizes or splits mid-iteration; it keeps observing the
    /// snapshot taken at entry. Keys inserted during iteration are not
    /// visited; keys removed during iteration may still be visited with
    /// their snapshot-time values. Traversal order is derived from the map
    /// seed and is deliberately not stable.
    pub fn scan<F>(&mut self, mut f: F)
    where
        K: Clone,
        V: Clone,
        F: FnMut(&mut Self, &K, &V) -> bool,
    {
        let snapshot = self.snapshot();
        for (k, v) in &snapshot {
            if !f(&mut *self, k, v) {
                break;
            }
        }
    }

    fn snapshot(&self) -> Vec<(K, V)>
    where
        K: Clone,
        V: Clone,
    {
        let mut out = Vec::with_capacity(self.len);
        let rotation = self.params.seed.wrapping_mul(0x9e37_79b9_7f4a_7c15) as usize;
        let n = self.buckets.len();
        let start = rotation % n;
        for j in 0..n {
            self.buckets[(start + j) % n].snapshot_into(rotation, &mut out);
        }
        out
    }

    #[inline]
    fn dir_index(&self, h: u64) -> usize {
        if self.dir_bits == 0 {
            0
        } else {
            (h >> (64 - self.dir_bits)) as usize
        }
    }

    #[inline]
    fn bucket_id(&self, h: u64) -> usize {
        self.dir[self.dir_index(h)] as usize
    }

    fn resize_bucket(&mut self, id: usize, new_capacity: usize) {
        let ctx = BucketCtx {
            hash: self.params.hash,
            seed: self.params.seed,
            alloc: &*self.params.alloc,
        };
        self.buckets[id].resize(&ctx, new_capacity);
    }

    fn rehash_bucket(&mut self, id: usize) {
        let ctx = BucketCtx {
            hash: self.params.hash,
            seed: self.params.seed,
            alloc: &*self.params.alloc,
        };
        self.buckets[id].rehash_in_place(&ctx);
    }

    /// Makes room in the bucket an insertion of hash `h` failed against:
    /// rehash in place when tombstones dominate, double while under the
    /// bucket ceiling, otherwise split (doubling the directory first when
    /// the bucket already disambiguates every directory bit).
    fn grow(&mut self, h: u64) {
        let id = self.bucket_id(h);
        let b = &self.buckets[id];
        let capacity = b.capacity;
        let depth = b.local_depth;
        let tombstones = b.tombstones();

        if tombstones > 0 && tombstones * 4 >= growth_budget(capacity) {
            self.rehash_bucket(id);
            return;
        }
        let target = if capacity == 0 {
            MIN_BUCKET_CAPACITY
        } else {
            2 * capacity + 1
        };
        let max = self.params.max_bucket_capacity;
        if max == 0 || target <= max {
            self.resize_bucket(id, target);
            return;
        }
        let (left_n, right_n) = self.split_counts(id);
        if left_n == 0 || right_n == 0 {
            // Every element routes to one child; a split at any depth makes
            // no progress, so the bucket outgrows its ceiling instead.
            self.resize_bucket(id, target);
            return;
        }
        if depth == self.dir_bits {
            self.double_dir();
        }
        self.split(h, left_n, right_n);
    }

    /// How a split of bucket `id` would route its entries.
    fn split_counts(&self, id: usize) -> (usize, usize) {
        let b = &self.buckets[id];
        let bit = 1u64 << (63 - b.local_depth);
        let mut left = 0;
        let mut right = 0;
        for (k, _) in b.entries() {
            if (self.params.hash)(k, self.params.seed) & bit == 0 {
                left += 1;
            } else {
                right += 1;
            }
        }
        (left, right)
    }

    fn double_dir(&mut self) {
        debug_assert!(self.dir_bits < 64);
        let mut dir = Vec::with_capacity(self.dir.len() * 2);
        for &id in &self.dir {
            dir.push(id);
            dir.push(id);
        }
        self.dir = dir;
        self.dir_bits += 1;
    }

    /// Replaces the bucket for hash `h` with two children one bit deeper,
    /// splitting its directory block between them.
    fn split(&mut self, h: u64, left_n: usize, right_n: usize) {
        let di = self.dir_index(h);
        let id = self.dir[di] as usize;
        let depth = self.buckets[id].local_depth;
        debug_assert!(depth < self.dir_bits);
        let bit = 1u64 << (63 - depth);

        let mut left: Bucket<K, V> =
            Bucket::with_capacity(&*self.params.alloc, split_capacity(left_n), depth + 1);
        let mut right: Bucket<K, V> =
            Bucket::with_capacity(&*self.params.alloc, split_capacity(right_n), depth + 1);

        let mut parent = mem::replace(&mut self.buckets[id], Bucket::empty(depth + 1));
        for i in 0..parent.capacity {
            if parent.is_full_at(i) {
                // SAFETY: full control byte, initialized slot; the parent's
                // arrays are freed below without dropping contents.
                let (k, v) = unsafe { parent.take_at(i) };
                let kh = (self.params.hash)(&k, self.params.seed);
                let child = if kh & bit == 0 { &mut left } else { &mut right };
                child.insert_unique(kh, k, v);
            }
        }
        parent.release(&*self.params.alloc);

        debug_assert_eq!(left.used, left_n);
        debug_assert_eq!(right.used, right_n);
        self.buckets[id] = left;
        debug_assert!(self.buckets.len() < u32::MAX as usize);
        let right_id = self.buckets.len() as u32;
        self.buckets.push(right);

        let block = 1usize << (self.dir_bits - depth);
        let start = di & !(block - 1);
        for e in &mut self.dir[start + block / 2..start + block] {
            *e = right_id;
        }
    }
}

/// Child capacity for a split: sized to its share of the parent's entries,
/// with headroom so re-routing can never overflow it.
fn split_capacity(n: usize) -> usize {
    let mut c = capacity_for(n.max(1));
    if growth_budget(c) < n {
        c = 2 * c + 1;
    }
    c
}

impl<K: Eq, V> SplitMap<K, V> {
    /// Inserts a key/value pair, returning the previous value when the key
    /// was already present.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let h = (self.params.hash)(&key, self.params.seed);
        let mut pair = (key, value);
        loop {
            let id = self.bucket_id(h);
            match self.buckets[id].insert(h, pair.0, pair.1) {
                Ok(old) => {
                    if old.is_none() {
                        self.len += 1;
                    }
                    return old;
                }
                Err(back) => {
                    pair = back;
                    self.grow(h);
                }
            }
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let h = (self.params.hash)(key, self.params.seed);
        let b = &self.buckets[self.bucket_id(h)];
        let i = b.find(h, key)?;
        // SAFETY: find returns full slots.
        Some(unsafe { b.value_at(i) })
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let h = (self.params.hash)(key, self.params.seed);
        let id = self.bucket_id(h);
        let i = self.buckets[id].find(h, key)?;
        // SAFETY: find returns full slots.
        Some(unsafe { self.buckets[id].value_at_mut(i) })
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Removes a key, returning its value when present.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let h = (self.params.hash)(key, self.params.seed);
        let id = self.bucket_id(h);
        let i = self.buckets[id].find(h, key)?;
        let (_key, value) = self.buckets[id].remove_at(i);
        self.len -= 1;
        Some(value)
    }

    pub fn entry(&mut self, key: K) -> Entry<'_, K, V> {
        let h = (self.params.hash)(&key, self.params.seed);
        loop {
            let id = self.bucket_id(h);
            if let Some(index) = self.buckets[id].find(h, &key) {
                return Entry::Occupied(OccupiedEntry {
                    map: self,
                    id,
                    index,
                });
            }
            let b = &self.buckets[id];
            if b.capacity > 0 {
                let index = b.find_first_non_full(h);
                let reuses_tombstone = b.ctrl(index) == CTRL_DELETED;
                if reuses_tombstone || b.growth_left > 0 {
                    return Entry::Vacant(VacantEntry {
                        map: self,
                        id,
                        index,
                        hash: h,
                        reuses_tombstone,
                        key,
                    });
                }
            }
            self.grow(h);
        }
    }
}

pub enum Entry<'a, K, V> {
    Occupied(OccupiedEntry<'a, K, V>),
    Vacant(VacantEntry<'a, K, V>),
}

impl<'a, K, V> Entry<'a, K, V> {
    pub fn or_insert(self, default: V) -> &'a mut V {
        match self {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(default),
        }
    }

    pub fn or_insert_with<F: FnOnce() -> V>(self, f: F) -> &'a mut V {
        match self {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(f()),
        }
    }

    pub fn or_default(self) -> &'a mut V
    where
        V: Default,
    {
        match self {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(V::default()),
        }
    }

    pub fn and_modify<F: FnOnce(&mut V)>(self, f: F) -> Self {
        match self {
            Entry::Occupied(mut e) => {
                f(e.get_mut());
                Entry::Occupied(e)
            }
            Entry::Vacant(e) => Entry::Vacant(e),
        }
    }
}

pub struct OccupiedEntry<'a, K, V> {
    map: &'a mut SplitMap<K, V>,
    id: usize,
    index: usize,
}

impl<'a, K, V> OccupiedEntry<'a, K, V> {
    pub fn get(&self) -> &V {
        // SAFETY: an OccupiedEntry is only built for a full slot, and the
        // exclusive borrow of the map keeps it full.
        unsafe { self.map.buckets[self.id].value_at(self.index) }
    }

    pub fn get_mut(&mut self) -> &mut V {
        // SAFETY: as in get.
        unsafe { self.map.buckets[self.id].value_at_mut(self.index) }
    }

    pub fn into_mut(self) -> &'a mut V {
        // SAFETY: as in get.
        unsafe { self.map.buckets[self.id].value_at_mut(self.index) }
    }

    pub fn insert(&mut self, value: V) -> V {
        // SAFETY: as in get.
        unsafe { self.map.buckets[self.id].replace_value_at(self.index, value) }
    }

    pub fn remove(self) -> V {
        let (_key, value) = self.map.buckets[self.id].remove_at(self.index);
        self.map.len -= 1;
        value
    }
}

pub struct VacantEntry<'a, K, V> {
    map: &'a mut SplitMap<K, V>,
    id: usize,
    index: usize,
    hash: u64,
    reuses_tombstone: bool,
    key: K,
}

impl<'a, K, V> VacantEntry<'a, K, V> {
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Writes the value into the slot reserved when the entry was created.
    pub fn insert(self, value: V) -> &'a mut V {
        self.map.buckets[self.id].occupy(
            self.index,
            self.hash,
            self.key,
            value,
            self.reuses_tombstone,
        );
        self.map.len += 1;
        // SAFETY: just written.
        unsafe { self.map.buckets[self.id].value_at_mut(self.index) }
    }
}

/// Owning iterator. Buckets are released to the allocator as they drain;
/// dropping the iterator early drops the unvisited entries first.
pub struct IntoIter<K, V> {
    buckets: std::vec::IntoIter<Bucket<K, V>>,
    current: Option<Bucket<K, V>>,
    slot: usize,
    remaining: usize,
    alloc: Rc<dyn SlotAllocator<K, V>>,
}

impl<K, V> Iterator for IntoIter<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        loop {
            if let Some(b) = self.current.as_mut() {
                while self.slot < b.capacity {
                    let i = self.slot;
                    self.slot += 1;
                    if b.is_full_at(i) {
                        self.remaining -= 1;
                        // SAFETY: full control byte; take_at marks the slot
                        // consumed so it cannot be dropped again.
                        return Some(unsafe { b.take_at(i) });
                    }
                }
                let b = self.current.take().unwrap();
                b.release(&*self.alloc);
            }
            match self.buckets.next() {
                Some(b) => {
                    self.current = Some(b);
                    self.slot = 0;
                }
                None => return None,
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> Drop for IntoIter<K, V> {
    fn drop(&mut self) {
        if let Some(mut b) = self.current.take() {
            b.clear();
            b.release(&*self.alloc);
        }
        while let Some(mut b) = self.buckets.next() {
            b.clear();
            b.release(&*self.alloc);
        }
    }
}

impl<K, V> IntoIterator for SplitMap<K, V> {
    type Item = (K, V);
    type IntoIter = IntoIter<K, V>;

    fn into_iter(mut self) -> IntoIter<K, V> {
        let buckets = mem::take(&mut self.buckets);
        let remaining = self.len;
        let alloc = Rc::clone(&self.params.alloc);
        // self is dropped here with an empty bucket list, so Drop frees
        // nothing; the iterator owns the storage now.
        IntoIter {
            buckets: buckets.into_iter(),
            current: None,
            slot: 0,
            remaining,
            alloc,
        }
    }
}

impl<K: Clone + Eq, V: Clone> Clone for SplitMap<K, V> {
    fn clone(&self) -> Self {
        let opts = Options {
            hash: self.params.hash,
            allocator: Rc::clone(&self.params.alloc),
            max_bucket_capacity: self.params.max_bucket_capacity,
            seed: Some(self.params.seed),
        };
        let mut m = opts.build(self.len);
        for (k, v) in self.iter() {
            m.insert(k.clone(), v.clone());
        }
        m
    }
}

impl<K, V> Drop for SplitMap<K, V> {
    fn drop(&mut self) {
        for mut b in mem::take(&mut self.buckets) {
            b.clear();
            b.release(&*self.params.alloc);
        }
    }
}

#[cfg(test)]
impl<K, V> SplitMap<K, V> {
    /// Structural checks mirrored from the module invariants; test-only.
    pub(crate) fn check_invariants(&self) {
        assert_eq!(self.dir.len(), 1usize << self.dir_bits);
        let mut total = 0;
        for b in &self.buckets {
            b.check_invariants();
            total += b.used;
        }
        assert_eq!(total, self.len, "len out of sync with bucket usage");

        let mut e = 0;
        while e < self.dir.len() {
            let id = self.dir[e] as usize;
            let depth = self.buckets[id].local_depth;
            assert!(depth <= self.dir_bits);
            let block = 1usize << (self.dir_bits - depth);
            assert_eq!(e & (block - 1), 0, "directory block misaligned");
            for i in e..e + block {
                assert_eq!(self.dir[i] as usize, id, "directory block torn");
            }
            e += block;
        }
    }

    pub(crate) fn force_rehash(&mut self) {
        for id in 0..self.buckets.len() {
            self.rehash_bucket(id);
        }
    }

    pub(crate) fn force_resize(&mut self) {
        for id in 0..self.buckets.len() {
            let c = self.buckets[id].capacity;
            if c > 0 {
                self.resize_bucket(id, 2 * c + 1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::Slot;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;

    fn zero_hash(_key: &i64, _seed: u64) -> u64 {
        0
    }

    fn ones_hash(_key: &i64, _seed: u64) -> u64 {
        u64::MAX
    }

    fn fx_hash(key: &u64, seed: u64) -> u64 {
        use std::hash::Hasher;
        let mut h = rustc_hash::FxHasher::default();
        h.write_u64(seed);
        h.write_u64(*key);
        h.finish()
    }

    fn to_std_map<K, V>(m: &mut SplitMap<K, V>) -> HashMap<K, V>
    where
        K: Clone + Eq + std::hash::Hash,
        V: Clone,
    {
        let mut r = HashMap::new();
        m.scan(|_, k, v| {
            r.insert(k.clone(), v.clone());
            true
        });
        r
    }

    fn nth_element(m: &mut SplitMap<i64, i64>, n: usize) -> Option<(i64, i64)> {
        let mut out = None;
        let mut seen = 0;
        m.scan(|_, k, v| {
            if seen == n {
                out = Some((*k, *v));
                false
            } else {
                seen += 1;
                true
            }
        });
        out
    }

    fn run_basic(mut m: SplitMap<i64, i64>) {
        const COUNT: i64 = 100;
        let mut e: HashMap<i64, i64> = HashMap::new();

        assert_eq!(m.len(), 0);
        assert_eq!(m.buckets[0].growth_left, 0);
        for i in 0..COUNT {
            assert_eq!(m.get(&i), None);
        }

        for i in 0..COUNT {
            assert_eq!(m.insert(i, i + COUNT), None);
            e.insert(i, i + COUNT);
            assert_eq!(m.get(&i), Some(&(i + COUNT)));
            assert_eq!(m.len() as i64, i + 1);
            assert_eq!(to_std_map(&mut m), e);
            m.check_invariants();
        }

        for i in 0..COUNT {
            assert_eq!(m.insert(i, i + 2 * COUNT), Some(i + COUNT));
            e.insert(i, i + 2 * COUNT);
            assert_eq!(m.get(&i), Some(&(i + 2 * COUNT)));
            assert_eq!(m.len() as i64, COUNT);
            assert_eq!(to_std_map(&mut m), e);
        }

        for i in 0..COUNT {
            assert_eq!(m.remove(&i), Some(i + 2 * COUNT));
            e.remove(&i);
            assert_eq!(m.len() as i64, COUNT - i - 1);
            assert_eq!(m.get(&i), None);
            assert_eq!(to_std_map(&mut m), e);
            m.check_invariants();
        }
    }

    #[test]
    fn test_basic() {
        run_basic(SplitMap::new());
    }

    #[test]
    fn test_basic_degenerate_hash() {
        // A constant hash forces every key through one probe chain and
        // exercises tombstones plus growth beyond the bucket ceiling.
        run_basic(Options::with_hash(zero_hash).max_bucket_capacity(7).build(0));
        run_basic(Options::with_hash(ones_hash).max_bucket_capacity(7).build(0));
    }

    #[test]
    fn test_initial_capacity() {
        let cases: &[(usize, usize, usize, usize)] = &[
            // (requested, max bucket capacity, capacity, buckets)
            (0, DEFAULT_MAX_BUCKET_CAPACITY, 0, 1),
            (1, DEFAULT_MAX_BUCKET_CAPACITY, 7, 1),
            (7, DEFAULT_MAX_BUCKET_CAPACITY, 7, 1),
            (8, DEFAULT_MAX_BUCKET_CAPACITY, 15, 1),
            (896, DEFAULT_MAX_BUCKET_CAPACITY, 1023, 1),
            (897, DEFAULT_MAX_BUCKET_CAPACITY, 2047, 1),
            (16, 7, 7 * 4, 4),
            (65536, 4095, 4095 * 32, 32),
        ];
        for &(requested, max, capacity, buckets) in cases {
            let m: SplitMap<i64, i64> = Options::new().max_bucket_capacity(max).build(requested);
            assert_eq!(m.capacity(), capacity, "requested {requested} max {max}");
            assert_eq!(m.bucket_count(), buckets, "requested {requested} max {max}");
            m.check_invariants();
        }
    }

    fn run_random(mut m: SplitMap<i64, i64>, ops: usize) {
        let mut rng = StdRng::seed_from_u64(0xdeca_fbad);
        let mut e: HashMap<i64, i64> = HashMap::new();
        for op in 0..ops {
            match rng.gen_range(0..100) {
                0..=49 => {
                    let k = rng.gen_range(0..5_000);
                    let v = rng.gen::<i64>();
                    m.insert(k, v);
                    e.insert(k, v);
                }
                50..=64 => {
                    if m.is_empty() {
                        assert!(e.is_empty());
                    } else {
                        let n = rng.gen_range(0..m.len());
                        let (k, _) = nth_element(&mut m, n).unwrap();
                        let v = rng.gen::<i64>();
                        m.insert(k, v);
                        e.insert(k, v);
                    }
                }
                65..=79 => {
                    if m.is_empty() {
                        assert!(e.is_empty());
                    } else {
                        let n = rng.gen_range(0..m.len());
                        let (k, _) = nth_element(&mut m, n).unwrap();
                        assert_eq!(m.remove(&k), e.remove(&k));
                    }
                }
                80..=94 => {
                    if m.is_empty() {
                        assert!(e.is_empty());
                    } else {
                        let n = rng.gen_range(0..m.len());
                        let (k, v) = nth_element(&mut m, n).unwrap();
                        assert_eq!(e.get(&k), Some(&v));
                    }
                }
                _ => {
                    m.force_rehash();
                    assert_eq!(to_std_map(&mut m), e);
                }
            }
            assert_eq!(m.len(), e.len());
            if op % 64 == 0 {
                m.check_invariants();
            }
        }
        m.check_invariants();
        assert_eq!(to_std_map(&mut m), e);
    }

    #[test]
    fn test_random_ops() {
        run_random(SplitMap::new(), 10_000);
    }

    #[test]
    fn test_random_ops_degenerate_hash() {
        // Every key collides, so each run is quadratic in the live set.
        run_random(Options::with_hash(zero_hash).max_bucket_capacity(512).build(0), 4_000);
        run_random(Options::with_hash(ones_hash).max_bucket_capacity(512).build(0), 4_000);
    }

    #[test]
    fn test_random_ops_small_buckets() {
        run_random(Options::new().max_bucket_capacity(63).build(0), 10_000);
    }

    #[test]
    fn test_resize_during_scan() {
        let mut m: SplitMap<i64, i64> = SplitMap::new();
        for i in 0..100 {
            m.insert(i, i);
        }
        let before = to_std_map(&mut m);

        // Resizing mid-iteration must not affect what the scan observes.
        let mut seen: HashMap<i64, i64> = HashMap::new();
        m.scan(|m, k, v| {
            if k % 10 == 0 {
                m.force_resize();
            }
            seen.insert(*k, *v);
            true
        });
        assert_eq!(seen, before);
        m.check_invariants();
    }

    #[test]
    fn test_scan_snapshot_semantics() {
        let mut m: SplitMap<i64, i64> = SplitMap::new();
        for i in 0..50 {
            m.insert(i, i * 2);
        }
        let mut visited: Vec<(i64, i64)> = Vec::new();
        m.scan(|m, k, v| {
            m.remove(&((k + 1) % 50));
            m.insert(1000 + k, 0);
            visited.push((*k, *v));
            true
        });
        // Every pre-scan key is visited with its snapshot value, removals
        // notwithstanding; keys inserted during the scan are not.
        assert_eq!(visited.len(), 50);
        let mut keys: Vec<i64> = visited.iter().map(|&(k, _)| k).collect();
        keys.sort_unstable();
        assert_eq!(keys, (0..50).collect::<Vec<_>>());
        for (k, v) in visited {
            assert_eq!(v, k * 2);
        }
    }

    #[test]
    fn test_scan_early_stop() {
        let mut m: SplitMap<i64, i64> = SplitMap::new();
        for i in 0..100 {
            m.insert(i, i);
        }
        let mut count = 0;
        m.scan(|_, _, _| {
            count += 1;
            count < 10
        });
        assert_eq!(count, 10);
    }

    #[test]
    fn test_clear() {
        for max in [usize::MAX, 7] {
            let mut m: SplitMap<i64, i64> = Options::new().max_bucket_capacity(max).build(0);
            for i in 0..1000 {
                m.insert(i, i);
            }
            let capacity = m.capacity();
            m.clear();
            assert_eq!(m.len(), 0);
            assert_eq!(m.capacity(), capacity);
            m.scan(|_, _, _| panic!("clear left an entry behind"));
            m.check_invariants();
        }
    }

    #[derive(Default)]
    struct CountingAllocator {
        allocs: Cell<usize>,
        frees: Cell<usize>,
        slot_lens: RefCell<Vec<usize>>,
    }

    impl<K, V> SlotAllocator<K, V> for CountingAllocator {
        fn alloc(&self, ctrls_len: usize, slots_len: usize) -> (Box<[u8]>, Box<[Slot<K, V>]>) {
            self.allocs.set(self.allocs.get() + 1);
            self.slot_lens.borrow_mut().push(slots_len);
            <HeapAllocator as SlotAllocator<K, V>>::alloc(&HeapAllocator, ctrls_len, slots_len)
        }

        fn free(&self, ctrls: Box<[u8]>, slots: Box<[Slot<K, V>]>) {
            self.frees.set(self.frees.get() + 1);
            <HeapAllocator as SlotAllocator<K, V>>::free(&HeapAllocator, ctrls, slots);
        }
    }

    #[test]
    fn test_allocator_balance() {
        let a = Rc::new(CountingAllocator::default());
        let mut m: SplitMap<i64, i64> = Options::new()
            .allocator(a.clone())
            .max_bucket_capacity(usize::MAX)
            .build(0);
        for i in 0..100 {
            m.insert(i, i);
        }
        // 8 -> 16 -> 32 -> 64 -> 128 slot cells.
        assert_eq!(a.allocs.get(), 5);
        assert_eq!(a.frees.get(), 4);
        assert_eq!(*a.slot_lens.borrow(), vec![8, 16, 32, 64, 128]);
        drop(m);
        assert_eq!(a.frees.get(), 5);
    }

    #[test]
    fn test_allocator_balance_with_splits() {
        let a = Rc::new(CountingAllocator::default());
        let mut m: SplitMap<i64, i64> = Options::new()
            .allocator(a.clone())
            .max_bucket_capacity(15)
            .build(0);
        for i in 0..2_000 {
            m.insert(i, i);
        }
        for i in 0..2_000 {
            assert_eq!(m.remove(&i), Some(i));
        }
        m.check_invariants();
        drop(m);
        assert_eq!(a.allocs.get(), a.frees.get());
    }

    #[test]
    fn test_split_many_buckets() {
        let mut m: SplitMap<u64, u64> = Options::new().max_bucket_capacity(63).seed(7).build(0);
        for i in 0..10_000 {
            m.insert(i, i * 3);
        }
        assert_eq!(m.len(), 10_000);
        assert!(m.bucket_count() > 1, "splits never happened");
        m.check_invariants();
        for i in 0..10_000 {
            assert_eq!(m.get(&i), Some(&(i * 3)));
        }
        for i in (0..10_000).step_by(2) {
            assert_eq!(m.remove(&i), Some(i * 3));
        }
        assert_eq!(m.len(), 5_000);
        m.check_invariants();
        for i in 0..10_000 {
            if i % 2 == 0 {
                assert_eq!(m.get(&i), None);
            } else {
                assert_eq!(m.get(&i), Some(&(i * 3)));
            }
        }
    }

    #[test]
    fn test_custom_hash() {
        let mut m: SplitMap<u64, u64> = Options::with_hash(fx_hash).max_bucket_capacity(63).build(0);
        for i in 0..5_000 {
            m.insert(i, !i);
        }
        for i in 0..5_000 {
            assert_eq!(m.get(&i), Some(&!i));
        }
        m.check_invariants();
    }

    #[test]
    fn test_entry_api() {
        let mut m: SplitMap<i64, i64> = SplitMap::new();

        *m.entry(1).or_insert(10) += 5;
        assert_eq!(m.get(&1), Some(&15));

        *m.entry(1).or_insert(100) += 5;
        assert_eq!(m.get(&1), Some(&20));

        m.entry(2).or_insert_with(|| 42);
        assert_eq!(m.get(&2), Some(&42));

        let v: &mut i64 = m.entry(3).or_default();
        *v = 99;
        assert_eq!(m.get(&3), Some(&99));

        m.entry(3).and_modify(|v| *v += 1);
        assert_eq!(m.get(&3), Some(&100));
        m.entry(4).and_modify(|v| *v += 1);
        assert_eq!(m.get(&4), None);

        match m.entry(3) {
            Entry::Occupied(e) => assert_eq!(e.remove(), 100),
            Entry::Vacant(_) => panic!("expected occupied"),
        }
        assert_eq!(m.get(&3), None);
        assert_eq!(m.len(), 2);
        m.check_invariants();
    }

    #[test]
    fn test_entry_fills_past_growth() {
        let mut m: SplitMap<i64, i64> = SplitMap::new();
        for i in 0..1_000 {
            match m.entry(i) {
                Entry::Vacant(e) => {
                    assert_eq!(*e.key(), i);
                    e.insert(i);
                }
                Entry::Occupied(_) => panic!("fresh key reported occupied"),
            }
        }
        assert_eq!(m.len(), 1_000);
        m.check_invariants();
    }

    #[test]
    fn test_iterators() {
        let mut m: SplitMap<i64, i64> = SplitMap::new();
        m.insert(1, 10);
        m.insert(2, 20);
        m.insert(3, 30);

        let mut keys: Vec<i64> = m.keys().copied().collect();
        keys.sort_unstable();
        assert_eq!(keys, vec![1, 2, 3]);

        let mut values: Vec<i64> = m.values().copied().collect();
        values.sort_unstable();
        assert_eq!(values, vec![10, 20, 30]);

        for (_, v) in m.iter_mut() {
            *v += 1;
        }
        assert_eq!(m.get(&2), Some(&21));
    }

    #[test]
    fn test_get_mut() {
        let mut m: SplitMap<i64, i64> = SplitMap::new();
        m.insert(7, 1);
        *m.get_mut(&7).unwrap() += 10;
        assert_eq!(m.get(&7), Some(&11));
        assert_eq!(m.get_mut(&8), None);
    }

    #[test]
    fn test_clone_independent() {
        let mut m: SplitMap<i64, i64> = Options::new().max_bucket_capacity(63).build(0);
        for i in 0..500 {
            m.insert(i, i);
        }
        let mut c = m.clone();
        assert_eq!(c.len(), 500);
        c.insert(1000, 1000);
        m.remove(&0);
        assert_eq!(c.get(&0), Some(&0));
        assert_eq!(m.get(&1000), None);
        c.check_invariants();
        m.check_invariants();
    }

    struct DropTracker {
        count: Rc<RefCell<usize>>,
    }

    impl DropTracker {
        fn new(count: Rc<RefCell<usize>>) -> Self {
            Self { count }
        }
    }

    impl Drop for DropTracker {
        fn drop(&mut self) {
            *self.count.borrow_mut() += 1;
        }
    }

    #[test]
    fn test_into_iter_partial_consume_drops_remaining() {
        let drop_count = Rc::new(RefCell::new(0));

        let mut m: SplitMap<i64, DropTracker> = SplitMap::new();
        m.insert(1, DropTracker::new(Rc::clone(&drop_count)));
        m.insert(2, DropTracker::new(Rc::clone(&drop_count)));
        m.insert(3, DropTracker::new(Rc::clone(&drop_count)));

        let mut iter = m.into_iter();
        let _ = iter.next();
        assert_eq!(*drop_count.borrow(), 1);

        drop(iter);
        assert_eq!(
            *drop_count.borrow(),
            3,
            "leak detected: only {} entries dropped",
            *drop_count.borrow()
        );
    }

    #[test]
    fn test_into_iter_no_consume_drops_all() {
        let drop_count = Rc::new(RefCell::new(0));

        let mut m: SplitMap<i64, DropTracker> = SplitMap::new();
        m.insert(1, DropTracker::new(Rc::clone(&drop_count)));
        m.insert(2, DropTracker::new(Rc::clone(&drop_count)));
        m.insert(3, DropTracker::new(Rc::clone(&drop_count)));

        drop(m.into_iter());
        assert_eq!(*drop_count.borrow(), 3);
    }

    #[test]
    fn test_into_iter_full_consume() {
        let drop_count = Rc::new(RefCell::new(0));

        let mut m: SplitMap<i64, DropTracker> = SplitMap::new();
        m.insert(1, DropTracker::new(Rc::clone(&drop_count)));
        m.insert(2, DropTracker::new(Rc::clone(&drop_count)));
        m.insert(3, DropTracker::new(Rc::clone(&drop_count)));

        for _ in m.into_iter() {}
        assert_eq!(*drop_count.borrow(), 3);
    }

    #[test]
    fn test_drop_releases_entries() {
        let drop_count = Rc::new(RefCell::new(0));
        let mut m: SplitMap<i64, DropTracker> = SplitMap::new();
        for i in 0..100 {
            m.insert(i, DropTracker::new(Rc::clone(&drop_count)));
        }
        // Overwriting drops the previous value.
        m.insert(0, DropTracker::new(Rc::clone(&drop_count)));
        assert_eq!(*drop_count.borrow(), 1);
        drop(m);
        assert_eq!(*drop_count.borrow(), 101);
    }

    #[test]
    fn test_string_keys() {
        let mut m: SplitMap<String, usize> = SplitMap::new();
        for i in 0..200usize {
            m.insert(format!("key-{i}"), i);
        }
        for i in 0..200usize {
            assert_eq!(m.get(&format!("key-{i}")), Some(&i));
        }
        assert_eq!(m.remove(&"key-0".to_string()), Some(0));
        assert_eq!(m.len(), 199);
        m.check_invariants();
    }
}
