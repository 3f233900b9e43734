use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::block::{align_to_next_block, is_block_aligned};
use crate::error::LedgerError;

/// The write cursor of a single bucket. Workers claim blocks by advancing it
/// one block at a time; it never moves backwards.
#[derive(Debug)]
struct BucketPointer {
    write: AtomicUsize,
    reconciled: AtomicBool,
}

impl BucketPointer {
    fn new(write: usize) -> Self {
        Self {
            write: AtomicUsize::new(write),
            reconciled: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn write(&self) -> usize {
        self.write.load(Ordering::Acquire)
    }

    /// Claims the next block, returning its offset.
    #[inline]
    pub fn claim_block(&self, block_size: usize) -> usize {
        self.write.fetch_add(block_size, Ordering::AcqRel)
    }
}

/// Bucket boundaries and write cursors of one recursion level.
#[derive(Debug)]
pub struct BucketLedger {
    block_size: usize,
    starts: Vec<usize>,
    pointers: Vec<BucketPointer>,
}

impl BucketLedger {
    /// Creates a ledger from `num_buckets + 1` boundaries, the last of which
    /// must equal `len`. Every write cursor starts at the first block boundary
    /// inside its bucket.
    pub fn new(starts: Vec<usize>, len: usize, block_size: usize) -> Result<Self, LedgerError> {
        validate_starts(&starts, len)?;
        let pointers = starts[..starts.len() - 1]
            .iter()
            .map(|&s| BucketPointer::new(align_to_next_block(s, block_size)))
            .collect();
        Ok(Self {
            block_size,
            starts,
            pointers,
        })
    }

    /// Creates a ledger whose write cursors have already advanced, as left
    /// behind by some distribution pass.
    pub fn with_cursors(
        starts: Vec<usize>,
        cursors: &[usize],
        len: usize,
        block_size: usize,
    ) -> Result<Self, LedgerError> {
        validate_starts(&starts, len)?;
        let num_buckets = starts.len() - 1;
        if cursors.len() != num_buckets {
            return Err(LedgerError::CursorCount {
                found: cursors.len(),
                expected: num_buckets,
            });
        }

        for (bucket, (&cursor, &start)) in cursors.iter().zip(&starts).enumerate() {
            if !is_block_aligned(cursor, block_size) {
                return Err(LedgerError::UnalignedCursor {
                    bucket,
                    cursor,
                    block_size,
                });
            }
            if cursor < start {
                return Err(LedgerError::CursorBeforeStart {
                    bucket,
                    cursor,
                    start,
                });
            }
        }

        Ok(Self {
            block_size,
            starts,
            pointers: cursors.iter().map(|&c| BucketPointer::new(c)).collect(),
        })
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline]
    pub fn num_buckets(&self) -> usize {
        self.pointers.len()
    }

    /// Total number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.starts[self.starts.len() - 1]
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All boundaries, `num_buckets + 1` of them.
    #[inline]
    pub fn starts(&self) -> &[usize] {
        &self.starts
    }

    /// Start of bucket `i`. `i == num_buckets` gives the total length.
    #[inline]
    pub fn start(&self, i: usize) -> usize {
        self.starts[i]
    }

    #[inline]
    pub fn end(&self, i: usize) -> usize {
        self.starts[i + 1]
    }

    #[inline]
    pub fn bucket_len(&self, i: usize) -> usize {
        self.end(i) - self.start(i)
    }

    #[inline]
    pub fn write(&self, i: usize) -> usize {
        self.pointers[i].write()
    }

    #[inline]
    pub fn claim_block(&self, i: usize) -> usize {
        self.pointers[i].claim_block(self.block_size)
    }

    #[inline]
    pub fn is_reconciled(&self, i: usize) -> bool {
        self.pointers[i].reconciled.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn mark_reconciled(&self, i: usize) {
        self.pointers[i].reconciled.store(true, Ordering::Release);
    }
}

fn validate_starts(starts: &[usize], len: usize) -> Result<(), LedgerError> {
    if starts.len() < 2 {
        return Err(LedgerError::NoBuckets);
    }
    if starts[0] != 0 {
        return Err(LedgerError::NonZeroStart(starts[0]));
    }
    for (index, w) in starts.windows(2).enumerate() {
        if w[1] < w[0] {
            return Err(LedgerError::Decreasing {
                index: index + 1,
                value: w[1],
                prev: w[0],
            });
        }
    }
    let found = starts[starts.len() - 1];
    if found != len {
        return Err(LedgerError::LengthMismatch {
            found,
            expected: len,
        });
    }
    Ok(())
}
