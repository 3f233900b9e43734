//! The recursive driver: classify, distribute, clean up, recurse.

use core::mem;
use core::ops::Range;

use rayon::prelude::*;

use crate::base_case::BaseCaseFn;
use crate::block::{align_to_prev_block, is_block_aligned};
use crate::buffers::{BlockBuffer, BucketBuffers, LocalBuffers, Overflow, Swap};
use crate::classify::{oversampling_factor, Classifier};
use crate::config::Config;
use crate::distribute::{distribute, Distribution};
use crate::error::Error;
use crate::ledger::BucketLedger;
use crate::margins::{Cleanup, SavedMargin};
use crate::util::{invariant, ordering, Cmp, RawArray};

/// Splits the buckets into at most `threads` contiguous ranges for the
/// cleanup.
///
/// Ranges are as even as possible, except that a boundary is dropped when the
/// block straddling it starts in a bucket before the range ending there.
/// The bucket whose elements the margin saver preserves at a boundary thus
/// always lies in the range of the thread that saved them.
pub fn thread_ranges(ledger: &BucketLedger, threads: usize) -> Vec<Range<usize>> {
    let num_buckets = ledger.num_buckets();
    let block_size = ledger.block_size();
    let threads = threads.clamp(1, num_buckets.max(1));

    let mut bounds = vec![0];
    for t in 1..threads {
        let boundary = t * num_buckets / threads;
        let prev = bounds[bounds.len() - 1];
        if boundary <= prev {
            continue;
        }

        let start = ledger.start(boundary);
        if !is_block_aligned(start, block_size) {
            let block_start = align_to_prev_block(start, block_size);
            let mut owner = boundary;
            loop {
                owner -= 1;
                if ledger.start(owner) <= block_start {
                    break;
                }
            }
            if owner < prev {
                continue;
            }
        }
        bounds.push(boundary);
    }
    bounds.push(num_buckets);

    bounds.windows(2).map(|w| w[0]..w[1]).collect()
}

pub(crate) struct Sorter<'c, T, F> {
    config: &'c Config,
    is_less: &'c F,
    block_size: usize,
    base_case: BaseCaseFn<T>,
    max_depth: usize,
}

impl<'c, T: Send + Sync, F: Cmp<T>> Sorter<'c, T, F> {
    pub fn new(config: &'c Config, is_less: &'c F, n: usize) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            config,
            is_less,
            block_size: config.block_size_for::<T>(),
            base_case: config.base_case.resolve::<T>(),
            max_depth: 2 * n.max(1).ilog2() as usize + 8,
        })
    }

    pub fn sort(&self, v: &mut [T]) -> Result<(), Error> {
        self.sort_level(v, 0)
    }

    /// Number of workers for an input of `n` elements split into
    /// `num_buckets` buckets.
    fn workers(&self, n: usize, num_buckets: usize) -> usize {
        let blocks = n / self.block_size;
        let by_size = blocks / self.config.min_parallel_blocks_per_thread.max(1);
        self.config.threads().min(by_size).min(num_buckets).max(1)
    }

    fn sort_level(&self, v: &mut [T], depth: usize) -> Result<(), Error> {
        let n = v.len();
        let base_case_size = self.config.base_case_size;
        if n <= 2 * base_case_size {
            (self.base_case)(v, self.is_less);
            return Ok(());
        }

        if depth >= self.max_depth {
            log::debug!("recursion depth {depth} reached with {n} elements, sorting directly");
            v.sort_unstable_by(|a, b| ordering(a, b, self.is_less));
            return Ok(());
        }

        let log_buckets = self.config.log_buckets.min((n / base_case_size).ilog2()).max(1);
        let is_last_level = n <= self.config.single_level_threshold();

        let (ids, num_buckets) = {
            let classifier = Classifier::sample(
                v,
                1 << log_buckets,
                oversampling_factor(n, self.config.oversampling_percent),
                self.is_less,
            );
            (classifier.classify_all(v, self.is_less), classifier.num_buckets())
        };
        let threads = self.workers(n, num_buckets);

        log::debug!(
            "level {depth}: {n} elements, {num_buckets} buckets, {threads} workers, block {}{}",
            self.block_size,
            if is_last_level { ", last level" } else { "" }
        );

        let array = RawArray::from_mut_slice(v);
        // SAFETY: the array is fully occupied and only accessed through
        // `array` until the cleanup below is done.
        let Distribution {
            ledger,
            mut locals,
            mut overflow,
        } = unsafe { distribute(array, &ids, num_buckets, self.block_size, threads)? };
        drop(ids);

        self.cleanup(array, &ledger, &mut locals, overflow.as_mut(), threads, is_last_level);
        debug_assert!(locals.iter().all(|l| l.is_empty()));
        debug_assert!(overflow.as_ref().map_or(true, |ov| ov.is_empty()));

        if is_last_level {
            return Ok(());
        }

        let mut rest: &mut [T] = v;
        let mut large = Vec::new();
        for bucket in 0..ledger.num_buckets() {
            let (current, tail) = mem::take(&mut rest).split_at_mut(ledger.bucket_len(bucket));
            rest = tail;
            if !Classifier::<T>::is_equality_bucket(bucket) && current.len() > 2 * base_case_size {
                large.push(current);
            }
        }

        large
            .into_par_iter()
            .try_for_each(|bucket| self.sort_level(bucket, depth + 1))
    }

    fn cleanup(
        &self,
        array: RawArray<'_, T>,
        ledger: &BucketLedger,
        locals: &mut [LocalBuffers<T>],
        overflow: Option<&mut Overflow<T>>,
        threads: usize,
        is_last_level: bool,
    ) {
        let ranges = thread_ranges(ledger, threads);
        let num_ranges = ranges.len();
        let cleanup = Cleanup::new(
            array,
            ledger,
            self.base_case,
            self.config.base_case_size,
            is_last_level,
        );

        let mut swaps: Vec<BlockBuffer<T>> = (0..num_ranges)
            .map(|_| BlockBuffer::new(self.block_size))
            .collect();
        let saved: Vec<SavedMargin> = swaps
            .par_iter_mut()
            .enumerate()
            .map(|(t, swap)| {
                // SAFETY: distribution is done, no writer runs before every
                // margin is saved.
                unsafe { cleanup.save_margins(t, num_ranges, ranges[t].end, swap) }
            })
            .collect();

        let mut views: Vec<Vec<BucketBuffers<'_, T>>> = (0..num_ranges)
            .map(|_| Vec::with_capacity(locals.len()))
            .collect();
        for local in locals.iter_mut() {
            for (r, view) in local.buckets_mut().split_by_ranges(&ranges).into_iter().enumerate() {
                views[r].push(view);
            }
        }

        let mut overflows: Vec<Option<&mut Overflow<T>>> = (0..num_ranges).map(|_| None).collect();
        if let Some(ov) = overflow {
            let r = ranges.partition_point(|range| range.end <= ov.bucket());
            overflows[r] = Some(ov);
        }

        let is_less = self.is_less;
        ranges
            .into_par_iter()
            .zip(overflows)
            .zip(swaps.par_iter_mut().zip(saved))
            .zip(views)
            .for_each(|(((buckets, overflow), (swap, saved)), mut views)| {
                invariant!(
                    swap.len() == saved.len,
                    "swap store holds {} elements, {} were saved",
                    swap.len(),
                    saved.len
                );
                let swap = Swap {
                    bucket: saved.bucket,
                    buffer: swap,
                };
                // SAFETY: every margin has been saved, and each range gets the
                // stores and local buffer slots of its own buckets.
                unsafe {
                    cleanup.write_margins(buckets, overflow, Some(swap), &mut views, is_less)
                };
            });
    }
}
