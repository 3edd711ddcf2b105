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

//! Pluggable storage allocator for bucket arrays.
//!
//! A bucket owns two parallel arrays: control bytes and slots. Both are
//! requested together and released together, so an allocator can carve them
//! out of a single arena region or pool them for reuse. The default
//! [`HeapAllocator`] just uses boxed slices.

use crate::bucket::Slot;

/// Supplies and reclaims bucket storage.
///
/// Contract:
/// - `alloc` must return buffers of exactly the requested lengths. The
///   caller initializes every control byte itself, so the contents need
///   not be zeroed.
/// - `free` receives exactly the pair a previous `alloc` returned. Slot
///   contents are destroyed by the caller before the arrays are freed;
///   the allocator must not attempt to drop entries.
/// - Every `alloc` is matched by exactly one `free` by the time the owning
///   map is dropped.
pub trait SlotAllocator<K, V> {
    fn alloc(&self, ctrls_len: usize, slots_len: usize) -> (Box<[u8]>, Box<[Slot<K, V>]>);

    fn free(&self, ctrls: Box<[u8]>, slots: Box<[Slot<K, V>]>);
}

/// Default allocator backed by the global heap.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeapAllocator;

impl<K, V> SlotAllocator<K, V> for HeapAllocator {
    fn alloc(&self, ctrls_len: usize, slots_len: usize) -> (Box<[u8]>, Box<[Slot<K, V>]>) {
        let ctrls = vec![0u8; ctrls_len].into_boxed_slice();
        let slots: Box<[Slot<K, V>]> = (0..slots_len).map(|_| Slot::vacant()).collect();
        (ctrls, slots)
    }

    fn free(&self, ctrls: Box<[u8]>, slots: Box<[Slot<K, V>]>) {
        drop(ctrls);
        drop(slots);
    }
}
