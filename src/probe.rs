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

//! Quadratic probe sequence over control-byte groups.
//!
//! Offsets advance by triangular numbers: o, o+8, o+24, o+48, ... masked by
//! the table capacity. Because the table size is a power of two, the
//! sequence visits every group exactly once before repeating, so a probe
//! that terminates on the first empty-bearing group is guaranteed to
//! terminate whenever the table has at least one empty slot.

use crate::group::GROUP_SIZE;

pub(crate) struct ProbeSeq {
    mask: usize,
    offset: usize,
    index: usize,
}

impl ProbeSeq {
    /// Starts a sequence for `h1` in a table with `mask = capacity`
    /// (a power of two minus one). The start offset is aligned down to a
    /// group boundary.
    #[inline]
    pub(crate) fn new(h1: usize, mask: usize) -> ProbeSeq {
        ProbeSeq {
            mask,
            offset: h1 & mask & !(GROUP_SIZE - 1),
            index: 0,
        }
    }

    #[inline]
    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub(crate) fn advance(&mut self) {
        self.index += 1;
        self.offset = (self.offset + self.index * GROUP_SIZE) & self.mask;
    }
}
