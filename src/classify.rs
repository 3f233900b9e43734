//! Splitter selection and element classification.
//!
//! `k` splitters define `2k + 1` buckets. Bucket `2j` holds the elements
//! strictly between splitters `j - 1` and `j`, bucket `2j + 1` the elements
//! equal to splitter `j`. Equality buckets are never recursed into, which
//! keeps inputs with many duplicates from degenerating.

use rayon::prelude::*;

use crate::util::{ordering, Cmp};

// Elements classified per rayon task.
const CLASSIFY_CHUNK: usize = 4096;

/// The bucket index of every element, stored compactly.
pub type BucketId = u16;

/// xorshift64, seeded from the input length so runs are reproducible.
struct Rng {
    state: u64,
}

impl Rng {
    fn new(seed: u64) -> Self {
        Rng {
            state: seed ^ 0x9e37_79b9_7f4a_7c15,
        }
    }

    fn next_u64(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next_u64() % n as u64) as usize
    }
}

/// Number of samples taken per bucket: `percent` percent of `log2(n)`, at
/// least one.
pub fn oversampling_factor(n: usize, percent: usize) -> usize {
    let log_n = n.max(1).ilog2() as usize;
    (percent * log_n / 100).max(1)
}

/// Sorted, distinct splitters borrowed from the input.
pub struct Classifier<'a, T> {
    splitters: Vec<&'a T>,
}

impl<'a, T> Classifier<'a, T> {
    /// Samples `v` and picks up to `num_buckets - 1` distinct splitters.
    pub fn sample<F: Cmp<T>>(
        v: &'a [T],
        num_buckets: usize,
        oversampling: usize,
        is_less: &F,
    ) -> Self {
        assert!(!v.is_empty() && num_buckets >= 2);
        let n = v.len();
        let sample_len = num_buckets.saturating_mul(oversampling).clamp(1, n);

        let mut rng = Rng::new(n as u64);
        let mut sample: Vec<&T> = (0..sample_len).map(|_| &v[rng.below(n)]).collect();
        sample.sort_unstable_by(|a, b| ordering(*a, *b, is_less));

        let mut splitters: Vec<&T> = Vec::with_capacity(num_buckets - 1);
        for i in 1..num_buckets {
            let candidate = sample[i * sample_len / num_buckets];
            match splitters.last() {
                Some(&prev) if !is_less(prev, candidate) => {}
                _ => splitters.push(candidate),
            }
        }

        Self { splitters }
    }

    #[inline]
    pub fn num_splitters(&self) -> usize {
        self.splitters.len()
    }

    #[inline]
    pub fn num_buckets(&self) -> usize {
        2 * self.splitters.len() + 1
    }

    #[inline]
    pub fn is_equality_bucket(bucket: usize) -> bool {
        bucket % 2 == 1
    }

    /// The bucket of `x`, by binary search over the splitters.
    #[inline]
    pub fn classify<F: Cmp<T>>(&self, x: &T, is_less: &F) -> usize {
        let lo = self.splitters.partition_point(|&s| is_less(s, x));
        if lo < self.splitters.len() && !is_less(x, self.splitters[lo]) {
            2 * lo + 1
        } else {
            2 * lo
        }
    }

    /// Classifies every element of `v` in parallel. Nothing is moved, so a
    /// panicking comparison leaves `v` untouched.
    pub fn classify_all<F: Cmp<T>>(&self, v: &[T], is_less: &F) -> Vec<BucketId>
    where
        T: Sync,
    {
        debug_assert!(self.num_buckets() <= BucketId::MAX as usize + 1);
        v.par_chunks(CLASSIFY_CHUNK)
            .flat_map_iter(|chunk| chunk.iter().map(|x| self.classify(x, is_less) as BucketId))
            .collect()
    }
}
