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

//! # Splitmap - extendible hashing over Swiss-table buckets
//!
//! An in-memory hash map whose table is not one monolithic array but a
//! directory of bounded-size Swiss tables. Small maps behave like a single
//! Swiss table; once a bucket reaches its configured ceiling it splits in
//! two instead of doubling, so growth of a very large map never copies the
//! whole table or doubles peak memory.
//!
//! ## Key features
//!
//! - **Swiss-table probing** - one control byte per slot, matched eight at
//!   a time with branch-free SWAR word tricks
//! - **Tombstone economics** - deletes reclaim slots in place when the
//!   probe chain permits, and a tombstone-heavy bucket rehashes in place
//!   instead of allocating
//! - **Split-over-resize growth** - bounded buckets split one at a time
//!   behind an extendible directory, capping the memory spike of growth
//! - **Pluggable hash and allocator** - per-map `(key, seed) -> u64` hash
//!   and a storage allocator trait with exact alloc/free pairing
//! - **Re-entrant iteration** - [`SplitMap::scan`] snapshots the entries,
//!   so the callback may mutate the map, including forcing resizes and
//!   splits, without disturbing what the iteration observes
//!
//! ## Quick start
//!
//! ```rust
//! use splitmap::SplitMap;
//!
//! let mut m: SplitMap<u64, &str> = SplitMap::new();
//! m.insert(1, "one");
//! m.insert(2, "two");
//! assert_eq!(m.get(&1), Some(&"one"));
//! assert_eq!(m.remove(&2), Some("two"));
//! assert_eq!(m.len(), 1);
//! ```
//!
//! Tuning goes through [`Options`]:
//!
//! ```rust
//! use splitmap::{Options, SplitMap};
//!
//! // Small buckets: the map splits early and often.
//! let mut m: SplitMap<u64, u64> = Options::new().max_bucket_capacity(63).build(1_000);
//! for i in 0..1_000 {
//!     m.insert(i, i * i);
//! }
//! assert!(m.bucket_count() > 1);
//! ```
//!
//! ## Modules
//!
//! - [`map`] - the map, its options, entry API, and iterators
//! - [`set`] - set wrapper with unit values
//! - [`alloc`] - bucket storage allocator contract
//! - [`hash`] - hash function contract and AHash-backed default
//!
//! The map is single-threaded: it performs no internal synchronization and
//! is intentionally `!Send`. Wrap it yourself if you need to move it.

pub mod alloc;
pub mod hash;
pub mod map;
pub mod set;

mod bitset;
mod bucket;
mod group;
mod probe;

pub use alloc::{HeapAllocator, SlotAllocator};
pub use bucket::Slot;
pub use hash::{default_hash, HashFn};
pub use map::{
    Entry, IntoIter, OccupiedEntry, Options, SplitMap, VacantEntry, DEFAULT_MAX_BUCKET_CAPACITY,
};
pub use set::SplitSet;
