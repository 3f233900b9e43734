//! Block distribution of classified elements.
//!
//! Workers process disjoint stripes of the input. Each keeps a local buffer
//! per bucket; once a bucket's buffer holds `B - 1` elements and another one
//! arrives, the worker claims the next block of that bucket from the shared
//! write cursor and writes all `B` elements there. The single block that
//! would cross the end of the array goes to the overflow store instead.

use core::mem::MaybeUninit;
use core::ptr;

use rayon::prelude::*;

use crate::buffers::{LocalBuffers, Overflow};
use crate::classify::BucketId;
use crate::error::LedgerError;
use crate::ledger::BucketLedger;
use crate::util::{invariant, AbortOnUnwind, RawArray};

/// What distribution leaves behind for the cleanup.
pub struct Distribution<T> {
    pub ledger: BucketLedger,
    /// The local buffers of every worker, in worker order.
    pub locals: Vec<LocalBuffers<T>>,
    pub overflow: Option<Overflow<T>>,
}

/// Bucket sizes, counted in parallel.
fn bucket_sizes(ids: &[BucketId], num_buckets: usize) -> Vec<usize> {
    ids.par_chunks(1 << 14)
        .fold(
            || vec![0usize; num_buckets],
            |mut counts, chunk| {
                for &id in chunk {
                    counts[id as usize] += 1;
                }
                counts
            },
        )
        .reduce(
            || vec![0usize; num_buckets],
            |mut a, b| {
                a.iter_mut().zip(b).for_each(|(x, y)| *x += y);
                a
            },
        )
}

/// Distributes the elements of `array`, where `ids[i]` is the bucket of
/// element `i`, using `num_threads` workers.
///
/// On error the array is left untouched. On success the occupied slots of
/// the array are exactly the blocks committed through the ledger, and every
/// other element is in a local buffer or the overflow store.
///
/// SAFETY: every slot of `array` must be occupied and no other reference to
/// the array may be used until the cleanup has finished.
pub unsafe fn distribute<T: Send>(
    array: RawArray<'_, T>,
    ids: &[BucketId],
    num_buckets: usize,
    block_size: usize,
    num_threads: usize,
) -> Result<Distribution<T>, LedgerError> {
    let n = array.len();
    assert_eq!(ids.len(), n, "every element needs a bucket");
    assert!(num_threads > 0 && block_size > 0);

    let sizes = bucket_sizes(ids, num_buckets);
    let mut starts = Vec::with_capacity(num_buckets + 1);
    starts.push(0);
    let mut acc = 0;
    for size in &sizes {
        acc += size;
        starts.push(acc);
    }
    let ledger = BucketLedger::new(starts, n, block_size)?;

    // From here on every element lives in exactly one place, and unwinding
    // would lose track of that.
    let _guard = AbortOnUnwind;
    let mut staging: Vec<MaybeUninit<T>> = Vec::with_capacity(n);
    // SAFETY: the staging vector has room for n elements and does not overlap
    // the array. The array slots count as unoccupied from now on.
    unsafe {
        ptr::copy_nonoverlapping(array.ptr(0), staging.as_mut_ptr().cast::<T>(), n);
        staging.set_len(n);
    }
    let staged = RawArray::from_maybeuninit_mut_slice(&mut staging);

    let ledger_ref = &ledger;
    let results: Vec<(LocalBuffers<T>, Option<Overflow<T>>)> = (0..num_threads)
        .into_par_iter()
        .map(|t| {
            let stripe = t * n / num_threads..(t + 1) * n / num_threads;
            let mut local = LocalBuffers::new(num_buckets, block_size);
            let mut overflow = None;

            for i in stripe {
                let bucket = ids[i] as usize;
                // SAFETY: every staged element is read by exactly one worker.
                let x = unsafe { ptr::read(staged.ptr(i)) };
                if !local.is_full(bucket) {
                    local.push(bucket, x);
                    continue;
                }

                let claim = ledger_ref.claim_block(bucket);
                if claim + block_size <= n {
                    // SAFETY: the claimed block is unoccupied and ours alone.
                    unsafe {
                        let dst = array.range_ptr(claim, block_size);
                        let moved = local.flush_into(bucket, dst);
                        ptr::write(dst.add(moved), x);
                    }
                } else {
                    invariant!(
                        overflow.is_none(),
                        "second overflow block for bucket {bucket} at {claim}"
                    );
                    log::trace!("bucket {bucket} overflows at {claim}, past the end at {n}");
                    let mut ov = Overflow::new(bucket, block_size);
                    local.flush_into_block(bucket, ov.block_mut());
                    ov.block_mut().push(x);
                    overflow = Some(ov);
                }
            }

            (local, overflow)
        })
        .collect();

    let mut locals = Vec::with_capacity(results.len());
    let mut overflow = None;
    for (local, ov) in results {
        locals.push(local);
        if let Some(ov) = ov {
            invariant!(overflow.is_none(), "more than one overflow block");
            overflow = Some(ov);
        }
    }

    Ok(Distribution {
        ledger,
        locals,
        overflow,
    })
}
