//! Deterministic utilities for reproducible forests
//!
//! Provides an LCG-based RNG with per-tree streams and a subset fingerprint
//! used to keep bootstrap subsets distinct across trees.

use std::num::Wrapping;

/// Linear Congruential Generator for deterministic pseudo-randomness
/// Uses the glibc constants
#[derive(Clone, Debug)]
pub struct LcgRng {
    state: Wrapping<i64>,
}

impl LcgRng {
    const MULTIPLIER: i64 = 1103515245;
    const INCREMENT: i64 = 12345;
    const MODULUS: i64 = 1 << 31;

    pub fn new(seed: i64) -> Self {
        Self {
            state: Wrapping(seed.wrapping_abs() % Self::MODULUS),
        }
    }

    /// Independent stream for a given tree or phase
    pub fn for_stream(seed: i64, stream: u64) -> Self {
        let mixed = (seed as u64)
            .wrapping_add(stream.wrapping_mul(0x9E37_79B9_7F4A_7C15))
            .rotate_left(23);
        Self::new((mixed ^ (mixed >> 29)) as i64)
    }

    /// Next value in [0, MODULUS)
    pub fn next_i64(&mut self) -> i64 {
        self.state = self.state * Wrapping(Self::MULTIPLIER) + Wrapping(Self::INCREMENT);
        self.state.0 & (Self::MODULUS - 1)
    }

    /// Uniform index in [0, max); 0 when max is 0
    pub fn next_below(&mut self, max: usize) -> usize {
        if max == 0 {
            return 0;
        }
        // Low LCG bits are weak, mix the high ones in
        let r = self.next_i64() as u64;
        ((r ^ (r >> 16)) % max as u64) as usize
    }

    /// Fisher-Yates shuffle
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.next_below(i + 1);
            items.swap(i, j);
        }
    }

    /// `k` distinct indices out of `0..n`, in draw order
    pub fn choose_distinct(&mut self, n: usize, k: usize) -> Vec<usize> {
        let k = k.min(n);
        let mut pool: Vec<usize> = (0..n).collect();
        for i in 0..k {
            let j = i + self.next_below(n - i);
            pool.swap(i, j);
        }
        pool.truncate(k);
        pool
    }
}

/// Order-independent fingerprint of a sample-ID set
pub fn subset_fingerprint<'a>(ids: impl IntoIterator<Item = &'a u16>) -> [u8; 32] {
    let mut sorted: Vec<u16> = ids.into_iter().copied().collect();
    sorted.sort_unstable();
    let mut hasher = blake3::Hasher::new();
    for id in sorted {
        hasher.update(&id.to_le_bytes());
    }
    *hasher.finalize().as_bytes()
}
