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

//! Hash function contract and the AHash-backed default.
//!
//! A map hashes with a plain function pointer `(key, seed) -> u64` so the
//! hash can be swapped per map without a generic parameter. The seed is
//! fixed for the lifetime of a map; the low 7 bits of the result drive
//! group matching and the remaining bits drive probing and bucket
//! selection, so the two halves should be independent. A weak hash
//! degrades probe lengths but never correctness.

use std::hash::{BuildHasher, Hash};

/// Per-map hash function. Must be deterministic for a given seed.
pub type HashFn<K> = fn(&K, u64) -> u64;

const SEED_K1: u64 = 0x9e37_79b9_7f4a_7c15;
const SEED_K2: u64 = 0xc2b2_ae3d_27d4_eb4f;
const SEED_K3: u64 = 0x1656_67b1_9e37_79f9;

/// Default hash for `K: Hash`, built on AHash keyed by the map seed.
pub fn default_hash<K: Hash + ?Sized>(key: &K, seed: u64) -> u64 {
    ahash::RandomState::with_seeds(seed, seed ^ SEED_K1, seed ^ SEED_K2, seed ^ SEED_K3)
        .hash_one(key)
}

/// Fresh per-map seed. Randomized so iteration order and probe placement
/// vary between maps and runs.
pub(crate) fn random_seed() -> u64 {
    ahash::RandomState::new().hash_one(0x73706c_69746d_6170u64)
}
