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

//! A single Swiss table: parallel control-byte and slot arrays.
//!
//! # Memory layout
//!
//! ```text
//! Bucket (capacity c, always 2^k - 1 or 0)
//! ├── ctrls: Box<[u8]>          [c + 8]    control bytes
//! │     [0, c)    slot states (EMPTY / DELETED / h2)
//! │     [c]       SENTINEL
//! │     [c+1, c+8) mirror of ctrls[0, 7) so every group load near the
//! │               end wraps without a branch
//! ├── slots: Box<[Slot<K, V>]>  [c + 1]    entries (cell c unused)
//! ├── used                                 number of full slots
//! ├── growth_left                          empty slots the load factor
//! │                                        still allows us to consume
//! └── local_depth                          directory bits this bucket owns
//! ```
//!
//! The growth budget is `c - c/8` (7/8 load factor), except capacity 7
//! where it is 6: the budget must stay below the capacity so every bucket
//! keeps at least one EMPTY lane, which is what terminates unsuccessful
//! probes.
//!
//! Slots are `MaybeUninit` pairs; a slot is initialized exactly while its
//! control byte is full. All `unsafe` blocks in this module rest on that
//! single invariant.

use std::mem::{self, MaybeUninit};
use std::ptr;

use crate::alloc::SlotAllocator;
use crate::group::{
    h1, h2, is_full, Group, CTRL_DELETED, CTRL_EMPTY, CTRL_SENTINEL, GROUP_SIZE,
};
use crate::hash::HashFn;
use crate::probe::ProbeSeq;

/// Smallest non-empty bucket capacity.
pub(crate) const MIN_BUCKET_CAPACITY: usize = 7;

/// One key/value cell. Initialized iff the matching control byte is full.
pub struct Slot<K, V> {
    key: MaybeUninit<K>,
    value: MaybeUninit<V>,
}

impl<K, V> Slot<K, V> {
    /// An uninitialized cell, the only state an allocator hands out.
    #[inline]
    pub fn vacant() -> Self {
        Slot {
            key: MaybeUninit::uninit(),
            value: MaybeUninit::uninit(),
        }
    }

    #[inline]
    pub(crate) fn write(&mut self, key: K, value: V) {
        self.key.write(key);
        self.value.write(value);
    }

    /// SAFETY: the slot must be initialized.
    #[inline]
    pub(crate) unsafe fn key_ref(&self) -> &K {
        self.key.assume_init_ref()
    }

    /// SAFETY: the slot must be initialized.
    #[inline]
    pub(crate) unsafe fn value_ref(&self) -> &V {
        self.value.assume_init_ref()
    }

    /// SAFETY: the slot must be initialized.
    #[inline]
    pub(crate) unsafe fn value_mut(&mut self) -> &mut V {
        self.value.assume_init_mut()
    }

    /// SAFETY: the slot must be initialized.
    #[inline]
    pub(crate) unsafe fn pair_ref(&self) -> (&K, &V) {
        (self.key.assume_init_ref(), self.value.assume_init_ref())
    }

    /// SAFETY: the slot must be initialized.
    #[inline]
    pub(crate) unsafe fn pair_mut(&mut self) -> (&K, &mut V) {
        let Slot { key, value } = self;
        (key.assume_init_ref(), value.assume_init_mut())
    }

    /// Moves the contents out, logically vacating the slot.
    /// SAFETY: the slot must be initialized; the caller must mark it
    /// non-full before any other access.
    #[inline]
    pub(crate) unsafe fn take(&mut self) -> (K, V) {
        (self.key.as_ptr().read(), self.value.as_ptr().read())
    }

    /// SAFETY: the slot must be initialized.
    #[inline]
    pub(crate) unsafe fn replace_value(&mut self, value: V) -> V {
        mem::replace(self.value.assume_init_mut(), value)
    }

    /// SAFETY: the slot must be initialized and never accessed again
    /// without a fresh `write`.
    #[inline]
    pub(crate) unsafe fn drop_in_place(&mut self) {
        ptr::drop_in_place(self.key.as_mut_ptr());
        ptr::drop_in_place(self.value.as_mut_ptr());
    }
}

impl<K, V> Default for Slot<K, V> {
    #[inline]
    fn default() -> Self {
        Self::vacant()
    }
}

/// Hash and allocator handles a bucket operation needs from its map.
pub(crate) struct BucketCtx<'a, K, V> {
    pub(crate) hash: HashFn<K>,
    pub(crate) seed: u64,
    pub(crate) alloc: &'a dyn SlotAllocator<K, V>,
}

/// Load-factor budget: how many EMPTY slots insertions may consume.
#[inline]
pub(crate) fn growth_budget(capacity: usize) -> usize {
    // c - c/8 equals c when c == 7, which would let the table fill
    // completely and break probe termination.
    if capacity == 7 {
        6
    } else {
        capacity - capacity / 8
    }
}

/// Smallest power-of-two-minus-one capacity whose sizing budget covers `n`
/// entries.
pub(crate) fn capacity_for(n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    let mut c = usize::MAX >> n.leading_zeros();
    while c - c / 8 < n {
        c = 2 * c + 1;
    }
    c
}

pub(crate) struct Bucket<K, V> {
    ctrls: Box<[u8]>,
    slots: Box<[Slot<K, V>]>,
    pub(crate) capacity: usize,
    pub(crate) used: usize,
    pub(crate) growth_left: usize,
    pub(crate) local_depth: u32,
}

impl<K, V> Bucket<K, V> {
    /// A capacity-0 bucket. Owns no storage; the first insertion resizes it.
    pub(crate) fn empty(local_depth: u32) -> Self {
        Bucket {
            ctrls: Box::default(),
            slots: Box::default(),
            capacity: 0,
            used: 0,
            growth_left: 0,
            local_depth,
        }
    }

    pub(crate) fn with_capacity(
        alloc: &dyn SlotAllocator<K, V>,
        capacity: usize,
        local_depth: u32,
    ) -> Self {
        debug_assert!(capacity >= MIN_BUCKET_CAPACITY);
        debug_assert!((capacity + 1).is_power_of_two());
        let (mut ctrls, slots) = alloc.alloc(capacity + GROUP_SIZE, capacity + 1);
        assert_eq!(ctrls.len(), capacity + GROUP_SIZE, "allocator returned short ctrl buffer");
        assert_eq!(slots.len(), capacity + 1, "allocator returned short slot buffer");
        for c in ctrls.iter_mut() {
            *c = CTRL_EMPTY;
        }
        ctrls[capacity] = CTRL_SENTINEL;
        Bucket {
            ctrls,
            slots,
            capacity,
            used: 0,
            growth_left: growth_budget(capacity),
            local_depth,
        }
    }

    pub(crate) fn tombstones(&self) -> usize {
        growth_budget(self.capacity) - self.used - self.growth_left
    }

    #[inline]
    pub(crate) fn is_full_at(&self, i: usize) -> bool {
        is_full(self.ctrls[i])
    }

    /// SAFETY: slot `i` must be full.
    #[inline]
    pub(crate) unsafe fn value_at(&self, i: usize) -> &V {
        self.slots.get_unchecked(i).value_ref()
    }

    /// SAFETY: slot `i` must be full.
    #[inline]
    pub(crate) unsafe fn value_at_mut(&mut self, i: usize) -> &mut V {
        self.slots.get_unchecked_mut(i).value_mut()
    }

    /// SAFETY: slot `i` must be full.
    #[inline]
    pub(crate) unsafe fn replace_value_at(&mut self, i: usize, value: V) -> V {
        self.slots.get_unchecked_mut(i).replace_value(value)
    }

    /// Moves the entry out of slot `i` and marks the slot EMPTY without
    /// touching probe bookkeeping. Teardown use only (owning iteration,
    /// splitting); the bucket is rebuilt or freed afterwards.
    ///
    /// SAFETY: slot `i` must be full.
    pub(crate) unsafe fn take_at(&mut self, i: usize) -> (K, V) {
        self.set_ctrl(i, CTRL_EMPTY);
        self.slots[i].take()
    }

    /// Writes control byte `i`, mirroring it into the wrap-around tail when
    /// it falls in the first G-1 logical positions.
    #[inline]
    fn set_ctrl(&mut self, i: usize, ctrl: u8) {
        debug_assert!(i < self.capacity + 1);
        self.ctrls[i] = ctrl;
        if i < GROUP_SIZE - 1 {
            self.ctrls[self.capacity + 1 + i] = ctrl;
        }
    }

    /// Finds the slot holding `key`, walking the probe sequence until a
    /// group contains an EMPTY lane. An EMPTY lane has never been occupied,
    /// so no insertion of `key` can ever have probed past it.
    pub(crate) fn find(&self, h: u64, key: &K) -> Option<usize>
    where
        K: Eq,
    {
        if self.used == 0 {
            return None;
        }
        let h2 = h2(h);
        let mut seq = ProbeSeq::new(h1(h), self.capacity);
        loop {
            let g = Group::load(&self.ctrls, seq.offset());
            for lane in g.match_h2(h2) {
                let i = seq.offset() + lane;
                // SAFETY: a lane matching h2 is full (possibly a SWAR false
                // positive, which is still a full lane), so the slot is
                // initialized.
                if unsafe { self.slots.get_unchecked(i).key_ref() } == key {
                    return Some(i);
                }
            }
            if g.match_empty().any() {
                return None;
            }
            seq.advance();
        }
    }

    /// First EMPTY or DELETED slot along the probe sequence for `h`.
    /// The growth budget keeps at least one EMPTY lane in every bucket, so
    /// this always terminates.
    pub(crate) fn find_first_non_full(&self, h: u64) -> usize {
        let mut seq = ProbeSeq::new(h1(h), self.capacity);
        loop {
            let m = Group::load(&self.ctrls, seq.offset()).match_empty_or_deleted();
            if m.any() {
                return seq.offset() + m.first();
            }
            seq.advance();
        }
    }

    /// Inserts or updates. `Err` hands the pair back when the bucket is out
    /// of budget and the map must grow it first; reusing a tombstone never
    /// consumes budget.
    pub(crate) fn insert(&mut self, h: u64, key: K, value: V) -> Result<Option<V>, (K, V)>
    where
        K: Eq,
    {
        if let Some(i) = self.find(h, &key) {
            // SAFETY: find only returns full slots.
            return Ok(Some(unsafe { self.replace_value_at(i, value) }));
        }
        if self.capacity == 0 {
            return Err((key, value));
        }
        let i = self.find_first_non_full(h);
        if self.ctrls[i] != CTRL_DELETED {
            if self.growth_left == 0 {
                return Err((key, value));
            }
            self.growth_left -= 1;
        }
        self.set_ctrl(i, h2(h));
        self.slots[i].write(key, value);
        self.used += 1;
        Ok(None)
    }

    /// Insertion for keys known to be absent into slots known to be EMPTY:
    /// resize, split, and entry fast paths.
    pub(crate) fn insert_unique(&mut self, h: u64, key: K, value: V) {
        debug_assert!(self.growth_left > 0);
        let i = self.find_first_non_full(h);
        debug_assert_eq!(self.ctrls[i], CTRL_EMPTY);
        self.set_ctrl(i, h2(h));
        self.slots[i].write(key, value);
        self.used += 1;
        self.growth_left -= 1;
    }

    /// Claims slot `i` for a new key; `reuses_tombstone` tells whether the
    /// slot was DELETED (free) or EMPTY (costs budget).
    pub(crate) fn occupy(&mut self, i: usize, h: u64, key: K, value: V, reuses_tombstone: bool) {
        debug_assert_eq!(reuses_tombstone, self.ctrls[i] == CTRL_DELETED);
        if !reuses_tombstone {
            debug_assert!(self.growth_left > 0);
            self.growth_left -= 1;
        }
        self.set_ctrl(i, h2(h));
        self.slots[i].write(key, value);
        self.used += 1;
    }

    #[inline]
    pub(crate) fn ctrl(&self, i: usize) -> u8 {
        self.ctrls[i]
    }

    /// Removes the entry at slot `i` (which the caller located via `find`)
    /// and returns it. The slot becomes EMPTY when no probe chain can pass
    /// through it, DELETED otherwise.
    pub(crate) fn remove_at(&mut self, i: usize) -> (K, V) {
        debug_assert!(self.is_full_at(i));
        if self.capacity < GROUP_SIZE || self.was_never_full(i) {
            self.set_ctrl(i, CTRL_EMPTY);
            self.growth_left += 1;
        } else {
            self.set_ctrl(i, CTRL_DELETED);
        }
        self.used -= 1;
        // SAFETY: the caller guarantees slot i was full; the control byte
        // now marks it vacant.
        unsafe { self.slots[i].take() }
    }

    /// True when deleting slot `i` can mark it EMPTY instead of leaving a
    /// tombstone: any insertion probing through i's group must have seen an
    /// EMPTY lane and stopped, i.e. the two groups around i never presented
    /// a full window of G occupied lanes.
    fn was_never_full(&self, i: usize) -> bool {
        let before = i.wrapping_sub(GROUP_SIZE) & self.capacity;
        let empty_after = Group::load(&self.ctrls, i).match_empty();
        let empty_before = Group::load(&self.ctrls, before).match_empty();
        empty_before.absent_at_end() + empty_after.absent_at_start() < GROUP_SIZE
    }

    /// Moves every entry into freshly allocated arrays of `new_capacity`
    /// and frees the old ones. Tombstones do not survive.
    pub(crate) fn resize(&mut self, ctx: &BucketCtx<'_, K, V>, new_capacity: usize) {
        debug_assert!(new_capacity >= MIN_BUCKET_CAPACITY);
        debug_assert!((new_capacity + 1).is_power_of_two());
        debug_assert!(growth_budget(new_capacity) >= self.used);

        let (mut ctrls, slots) = ctx
            .alloc
            .alloc(new_capacity + GROUP_SIZE, new_capacity + 1);
        assert_eq!(ctrls.len(), new_capacity + GROUP_SIZE, "allocator returned short ctrl buffer");
        assert_eq!(slots.len(), new_capacity + 1, "allocator returned short slot buffer");
        for c in ctrls.iter_mut() {
            *c = CTRL_EMPTY;
        }
        ctrls[new_capacity] = CTRL_SENTINEL;

        let old_capacity = self.capacity;
        let old_ctrls = mem::replace(&mut self.ctrls, ctrls);
        let mut old_slots = mem::replace(&mut self.slots, slots);
        self.capacity = new_capacity;
        self.used = 0;
        self.growth_left = growth_budget(new_capacity);

        for i in 0..old_capacity {
            if is_full(old_ctrls[i]) {
                // SAFETY: a full control byte means the slot is initialized;
                // the old arrays are freed below without dropping contents.
                let (k, v) = unsafe { old_slots[i].take() };
                let h = (ctx.hash)(&k, ctx.seed);
                self.insert_unique(h, k, v);
            }
        }
        if old_capacity > 0 {
            ctx.alloc.free(old_ctrls, old_slots);
        }
    }

    /// Reclaims tombstones without allocating.
    ///
    /// Pass 1 flips every non-full byte to EMPTY and every full byte to
    /// DELETED, where DELETED now means "entry awaiting placement". Pass 2
    /// re-places each such entry: it stays when its probe lands in the
    /// group it already occupies, moves into an EMPTY slot, or swaps with
    /// another waiting entry and re-places that one in turn.
    pub(crate) fn rehash_in_place(&mut self, ctx: &BucketCtx<'_, K, V>) {
        let cap = self.capacity;
        if cap == 0 {
            return;
        }
        let mut o = 0;
        while o < cap + 1 {
            Group::load(&self.ctrls, o)
                .convert_special_to_empty_and_full_to_deleted()
                .store(&mut self.ctrls, o);
            o += GROUP_SIZE;
        }
        self.ctrls[cap] = CTRL_SENTINEL;
        for j in 0..GROUP_SIZE - 1 {
            self.ctrls[cap + 1 + j] = self.ctrls[j];
        }

        let mut i = 0;
        while i < cap {
            if self.ctrls[i] != CTRL_DELETED {
                i += 1;
                continue;
            }
            loop {
                // SAFETY: in this phase DELETED marks a full slot whose
                // entry has not been re-placed yet.
                let h = {
                    let key = unsafe { self.slots[i].key_ref() };
                    (ctx.hash)(key, ctx.seed)
                };
                let target = self.find_first_non_full(h);
                if target & !(GROUP_SIZE - 1) == i & !(GROUP_SIZE - 1) {
                    // Same group: lane position within a group does not
                    // matter to lookups.
                    self.set_ctrl(i, h2(h));
                    break;
                }
                if self.ctrls[target] == CTRL_EMPTY {
                    self.set_ctrl(target, h2(h));
                    // SAFETY: slot i holds the entry being placed; target
                    // is vacant.
                    let (k, v) = unsafe { self.slots[i].take() };
                    self.slots[target].write(k, v);
                    self.set_ctrl(i, CTRL_EMPTY);
                    break;
                }
                debug_assert_eq!(self.ctrls[target], CTRL_DELETED);
                self.set_ctrl(target, h2(h));
                self.slots.swap(i, target);
                // The displaced entry now sits at i; place it next.
            }
            i += 1;
        }
        self.growth_left = growth_budget(cap) - self.used;
    }

    /// Drops every live entry and resets the controls. Capacity and
    /// storage are kept.
    pub(crate) fn clear(&mut self) {
        if self.capacity == 0 {
            return;
        }
        for i in 0..self.capacity {
            if is_full(self.ctrls[i]) {
                // SAFETY: full control byte, initialized slot; the reset
                // below marks everything EMPTY.
                unsafe { self.slots[i].drop_in_place() };
            }
        }
        for c in self.ctrls.iter_mut() {
            *c = CTRL_EMPTY;
        }
        self.ctrls[self.capacity] = CTRL_SENTINEL;
        self.used = 0;
        self.growth_left = growth_budget(self.capacity);
    }

    /// Returns the storage to the allocator. Entries must already have been
    /// dropped or moved out.
    pub(crate) fn release(mut self, alloc: &dyn SlotAllocator<K, V>) {
        if self.capacity == 0 {
            return;
        }
        let ctrls = mem::take(&mut self.ctrls);
        let slots = mem::take(&mut self.slots);
        alloc.free(ctrls, slots);
    }

    pub(crate) fn entries<'a>(&'a self) -> impl Iterator<Item = (&'a K, &'a V)> {
        self.ctrls[..self.capacity]
            .iter()
            .zip(self.slots.iter())
            .filter_map(|(&c, slot)| {
                if is_full(c) {
                    // SAFETY: full control byte, initialized slot.
                    Some(unsafe { slot.pair_ref() })
                } else {
                    None
                }
            })
    }

    pub(crate) fn entries_mut<'a>(&'a mut self) -> impl Iterator<Item = (&'a K, &'a mut V)> {
        let capacity = self.capacity;
        let Bucket { ctrls, slots, .. } = self;
        ctrls[..capacity]
            .iter()
            .zip(slots.iter_mut())
            .filter_map(|(&c, slot)| {
                if is_full(c) {
                    // SAFETY: full control byte, initialized slot.
                    Some(unsafe { slot.pair_mut() })
                } else {
                    None
                }
            })
    }

    /// Clones every live entry into `out`, starting the slot walk at a
    /// rotation offset so traversal order follows the map seed.
    pub(crate) fn snapshot_into(&self, rotation: usize, out: &mut Vec<(K, V)>)
    where
        K: Clone,
        V: Clone,
    {
        if self.capacity == 0 {
            return;
        }
        let start = rotation & self.capacity;
        for j in 0..=self.capacity {
            let i = (start + j) & self.capacity;
            if i < self.capacity && is_full(self.ctrls[i]) {
                // SAFETY: full control byte, initialized slot.
                let (k, v) = unsafe { self.slots[i].pair_ref() };
                out.push((k.clone(), v.clone()));
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        if self.capacity == 0 {
            assert_eq!(self.used, 0);
            assert_eq!(self.growth_left, 0);
            assert!(self.ctrls.is_empty());
            assert!(self.slots.is_empty());
            return;
        }
        assert_eq!(self.ctrls.len(), self.capacity + GROUP_SIZE);
        assert_eq!(self.slots.len(), self.capacity + 1);
        assert_eq!(self.ctrls[self.capacity], CTRL_SENTINEL);
        for j in 0..GROUP_SIZE - 1 {
            assert_eq!(self.ctrls[j], self.ctrls[self.capacity + 1 + j], "tail mirror at {j}");
        }
        let mut full = 0;
        let mut deleted = 0;
        for i in 0..self.capacity {
            let c = self.ctrls[i];
            if is_full(c) {
                full += 1;
            } else if c == CTRL_DELETED {
                deleted += 1;
            } else {
                assert_eq!(c, CTRL_EMPTY, "unexpected control byte at {i}");
            }
        }
        assert_eq!(full, self.used);
        assert_eq!(
            growth_budget(self.capacity),
            self.used + deleted + self.growth_left,
            "growth budget accounting"
        );
        assert!(full + deleted < self.capacity, "no empty lane left");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::HeapAllocator;
    use crate::hash::default_hash;

    fn ctx<'a>() -> BucketCtx<'a, u64, u64> {
        BucketCtx {
            hash: default_hash::<u64>,
            seed: 0,
            alloc: &HeapAllocator,
        }
    }

    #[test]
    fn test_growth_budget() {
        assert_eq!(growth_budget(0), 0);
        assert_eq!(growth_budget(7), 6);
        assert_eq!(growth_budget(15), 14);
        assert_eq!(growth_budget(31), 28);
        assert_eq!(growth_budget(1023), 896);
        assert_eq!(growth_budget(2047), 1792);
    }

    #[test]
    fn test_capacity_for() {
        assert_eq!(capacity_for(0), 0);
        assert_eq!(capacity_for(1), 7);
        assert_eq!(capacity_for(7), 7);
        assert_eq!(capacity_for(8), 15);
        assert_eq!(capacity_for(896), 1023);
        assert_eq!(capacity_for(897), 2047);
    }

    #[test]
    fn test_was_never_full() {
        let cases: &[(&[usize], bool)] = &[
            (&[], false),
            (&[0], false),
            (&[0, 15], true),
            (&[1, 15], true),
            (&[2, 15], true),
            (&[3, 15], true),
            (&[4, 15], true),
            (&[5, 15], true),
            (&[6, 15], true),
            (&[7, 15], true),
            (&[8, 15], false),
            (&[0, 14], true),
            (&[0, 13], true),
            (&[0, 12], true),
            (&[0, 11], true),
            (&[0, 10], true),
            (&[0, 9], true),
            (&[0, 8], true),
            (&[0, 7], false),
        ];
        for (empties, expected) in cases {
            let mut b: Bucket<u64, u64> = Bucket::with_capacity(&HeapAllocator, 15, 0);
            for i in 0..16 {
                b.set_ctrl(i, 0);
            }
            for &i in *empties {
                b.set_ctrl(i, CTRL_EMPTY);
            }
            assert_eq!(b.was_never_full(0), *expected, "empties {empties:?}");
        }
    }

    #[test]
    fn test_single_group_delete_restores_budget() {
        let c = ctx();
        let mut b: Bucket<u64, u64> = Bucket::with_capacity(&HeapAllocator, 7, 0);
        for k in 0..6u64 {
            let h = (c.hash)(&k, c.seed);
            b.insert(h, k, k).unwrap();
        }
        assert_eq!(b.growth_left, 0);
        for k in 0..6u64 {
            let h = (c.hash)(&k, c.seed);
            let i = b.find(h, &k).unwrap();
            b.remove_at(i);
        }
        // Deletes in a single-group bucket never leave tombstones.
        assert_eq!(b.growth_left, 6);
        assert_eq!(b.tombstones(), 0);
        b.check_invariants();
    }

    #[test]
    fn test_tombstone_reuse_without_budget() {
        let c = ctx();
        let mut b: Bucket<u64, u64> = Bucket::with_capacity(&HeapAllocator, 15, 0);
        for k in 0..14u64 {
            let h = (c.hash)(&k, c.seed);
            b.insert(h, k, k).unwrap();
        }
        assert_eq!(b.growth_left, 0);
        let victim = 3u64;
        let h = (c.hash)(&victim, c.seed);
        let i = b.find(h, &victim).unwrap();
        b.remove_at(i);
        b.check_invariants();

        // Re-inserting the removed key finds its own vacated slot first on
        // its probe path, so it succeeds even with the budget exhausted.
        b.insert(h, victim, 333).unwrap();
        assert_eq!(b.used, 14);
        let i = b.find(h, &victim).unwrap();
        // SAFETY: find returns full slots.
        assert_eq!(unsafe { *b.value_at(i) }, 333);
        b.check_invariants();
    }

    #[test]
    fn test_resize_preserves_entries() {
        let c = ctx();
        let mut b: Bucket<u64, u64> = Bucket::with_capacity(&HeapAllocator, 7, 0);
        for k in 0..6u64 {
            let h = (c.hash)(&k, c.seed);
            b.insert(h, k, k * 10).unwrap();
        }
        b.resize(&c, 15);
        assert_eq!(b.capacity, 15);
        assert_eq!(b.used, 6);
        for k in 0..6u64 {
            let h = (c.hash)(&k, c.seed);
            let i = b.find(h, &k).unwrap();
            // SAFETY: find returns full slots.
            assert_eq!(unsafe { *b.value_at(i) }, k * 10);
        }
        b.check_invariants();
    }

    #[test]
    fn test_rehash_in_place_reclaims_tombstones() {
        let c = ctx();
        let mut b: Bucket<u64, u64> = Bucket::with_capacity(&HeapAllocator, 31, 0);
        for k in 0..28u64 {
            let h = (c.hash)(&k, c.seed);
            b.insert(h, k, k).unwrap();
        }
        for k in 0..20u64 {
            let h = (c.hash)(&k, c.seed);
            let i = b.find(h, &k).unwrap();
            b.remove_at(i);
        }
        let live = b.used;
        b.rehash_in_place(&c);
        assert_eq!(b.used, live);
        assert_eq!(b.tombstones(), 0);
        assert_eq!(b.growth_left, growth_budget(31) - live);
        for k in 20..28u64 {
            let h = (c.hash)(&k, c.seed);
            let i = b.find(h, &k).unwrap();
            // SAFETY: find returns full slots.
            assert_eq!(unsafe { *b.value_at(i) }, k);
        }
        b.check_invariants();
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let c = ctx();
        let mut b: Bucket<u64, u64> = Bucket::with_capacity(&HeapAllocator, 15, 0);
        for k in 0..10u64 {
            let h = (c.hash)(&k, c.seed);
            b.insert(h, k, k).unwrap();
        }
        b.clear();
        assert_eq!(b.capacity, 15);
        assert_eq!(b.used, 0);
        assert_eq!(b.growth_left, growth_budget(15));
        assert_eq!(b.entries().count(), 0);
        b.check_invariants();
        b.release(&HeapAllocator);
    }
}
