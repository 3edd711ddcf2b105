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

//! Control bytes and SWAR group matching.
//!
//! One control byte per slot encodes the slot state:
//!
//! ```text
//! EMPTY    = 0b1000_0000   never held an entry since the last rehash
//! DELETED  = 0b1111_1110   tombstone; held an entry, probe chains pass through
//! SENTINEL = 0b1111_1111   terminator one past the last logical slot
//! full     = 0b0hhh_hhhh   low 7 bits of the entry's hash ("h2")
//! ```
//!
//! Eight consecutive control bytes form a [`Group`] loaded as a single
//! `u64`, so a probe step examines eight slots with a handful of
//! branch-free word operations. Loads go through `u64::from_le`, which is
//! free on little-endian hosts and byte-swaps on big-endian ones, keeping
//! lane i in byte i either way.

use crate::bitset::BitSet;

/// Number of control bytes matched per probe step.
pub(crate) const GROUP_SIZE: usize = 8;

pub(crate) const CTRL_EMPTY: u8 = 0b1000_0000;
pub(crate) const CTRL_DELETED: u8 = 0b1111_1110;
pub(crate) const CTRL_SENTINEL: u8 = 0b1111_1111;

const LSBS: u64 = 0x0101_0101_0101_0101;
const MSBS: u64 = 0x8080_8080_8080_8080;

/// A full control byte has the top bit clear.
#[inline]
pub(crate) fn is_full(ctrl: u8) -> bool {
    ctrl & 0x80 == 0
}

/// Probe-driving part of the hash: everything above the low 7 bits.
#[inline]
pub(crate) fn h1(h: u64) -> usize {
    (h >> 7) as usize
}

/// Group-matching part of the hash: the low 7 bits.
#[inline]
pub(crate) fn h2(h: u64) -> u8 {
    (h & 0x7f) as u8
}

/// Eight control bytes viewed as one word.
#[derive(Clone, Copy)]
pub(crate) struct Group(u64);

impl Group {
    /// Loads the group starting at `offset`. The load may be unaligned and
    /// may extend into the mirrored tail of the control array.
    #[inline]
    pub(crate) fn load(ctrls: &[u8], offset: usize) -> Group {
        debug_assert!(offset + GROUP_SIZE <= ctrls.len());
        // SAFETY: offset + GROUP_SIZE <= ctrls.len() per the assertion above.
        let word = unsafe { (ctrls.as_ptr().add(offset) as *const u64).read_unaligned() };
        Group(u64::from_le(word))
    }

    /// Writes the group back to `offset`. Only used on group-aligned
    /// offsets during in-place rehash.
    #[inline]
    pub(crate) fn store(self, ctrls: &mut [u8], offset: usize) {
        ctrls[offset..offset + GROUP_SIZE].copy_from_slice(&self.0.to_le_bytes());
    }

    /// Lanes whose byte equals `h2`.
    ///
    /// Uses the classic any-byte-zero trick on `group ^ broadcast(h2)`. A
    /// borrow out of a true match can produce a false positive in a lane
    /// whose byte differs from `h2` only in the lowest bit; such a byte has
    /// its top bit clear, so the lane is always full and the key comparison
    /// rejects it.
    #[inline]
    pub(crate) fn match_h2(self, h2: u8) -> BitSet {
        let x = self.0 ^ LSBS.wrapping_mul(h2 as u64);
        BitSet(x.wrapping_sub(LSBS) & !x & MSBS)
    }

    /// Lanes that are exactly EMPTY: top bit set, bit 1 clear. DELETED and
    /// SENTINEL both carry bit 1, so neither can leak in. This match is
    /// exact (no false positives), which the deletion predicate relies on.
    #[inline]
    pub(crate) fn match_empty(self) -> BitSet {
        BitSet(self.0 & !(self.0 << 6) & MSBS)
    }

    /// Lanes that are EMPTY or DELETED: top bit set, bit 0 clear. The
    /// sentinel has bit 0 set and is excluded, so an insertion can never
    /// land on the sentinel slot.
    #[inline]
    pub(crate) fn match_empty_or_deleted(self) -> BitSet {
        BitSet(self.0 & !(self.0 << 7) & MSBS)
    }

    /// Maps EMPTY/DELETED/SENTINEL to EMPTY and full to DELETED, the
    /// first pass of in-place rehash. DELETED afterwards means "entry not
    /// yet re-placed".
    #[inline]
    pub(crate) fn convert_special_to_empty_and_full_to_deleted(self) -> Group {
        // x has 0x80 in special lanes, 0x00 in full lanes. Per byte:
        // special: !0x80 + 0x01 = 0x80, full: !0x00 + 0x00 = 0xff; masking
        // off bit 0 turns 0xff into DELETED and leaves EMPTY alone.
        let x = self.0 & MSBS;
        Group((!x).wrapping_add(x >> 7) & !LSBS)
    }
}
