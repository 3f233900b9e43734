//! Margin cleanup: the last step of a distribution level.
//!
//! Distribution writes elements into the array one block at a time, so the
//! regions covered by blocks almost never line up with the bucket boundaries.
//! What is left is, for every bucket, a head gap between the bucket start and
//! the first block boundary inside it, possibly some elements of the last
//! block spilling past the bucket end, and leftovers in the scratch stores.
//! The cleanup moves all of those into place so that every bucket `i` holds
//! exactly its elements in `start[i]..end[i]`.
//!
//! When several threads clean up disjoint bucket ranges concurrently, the
//! elements spilling past the last bucket of a range lie in the next range,
//! which may fill its head gap before they are read. Every thread therefore
//! first saves these margins ([`Cleanup::save_margins`]) and only after all
//! threads have done so writes its buckets ([`Cleanup::write_margins`]).

use core::ops::Range;
use core::ptr;

use crate::base_case::BaseCaseFn;
use crate::block::align_to_next_block;
use crate::buffers::{BlockBuffer, BucketBuffers, Overflow, Swap};
use crate::ledger::BucketLedger;
use crate::util::{invariant, AbortOnUnwind, Cmp, RawArray};

/// The elements a thread saved at its upper boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SavedMargin {
    /// The bucket owning the saved elements.
    pub bucket: usize,
    /// The number of elements saved.
    pub len: usize,
}

/// Cleanup of one distribution level.
pub struct Cleanup<'a, T> {
    array: RawArray<'a, T>,
    ledger: &'a BucketLedger,
    base_case: BaseCaseFn<T>,
    base_case_size: usize,
    is_last_level: bool,
}

impl<'a, T> Cleanup<'a, T> {
    /// Buckets of at most `2 * base_case_size` elements are sorted with
    /// `base_case` once they are complete. On the last level every bucket is.
    pub fn new(
        array: RawArray<'a, T>,
        ledger: &'a BucketLedger,
        base_case: BaseCaseFn<T>,
        base_case_size: usize,
        is_last_level: bool,
    ) -> Self {
        assert_eq!(array.len(), ledger.len(), "ledger does not describe the array");
        Self {
            array,
            ledger,
            base_case,
            base_case_size,
            is_last_level,
        }
    }

    /// Saves the elements of the block straddling the upper boundary of
    /// thread `thread`, whose buckets end at `last_bucket`, into `swap`.
    ///
    /// Only a block that was committed in place holds anything to save: the
    /// part of it past the end of its owning bucket belongs to the region of
    /// the next thread. The last thread has no successor and saves nothing.
    ///
    /// SAFETY: all distribution writes must have finished and no thread may
    /// have started writing margins. The slots reported as occupied by the
    /// ledger must hold elements; the saved ones become unoccupied.
    pub unsafe fn save_margins(
        &self,
        thread: usize,
        num_threads: usize,
        last_bucket: usize,
        swap: &mut BlockBuffer<T>,
    ) -> SavedMargin {
        let _guard = AbortOnUnwind;
        let block_size = self.ledger.block_size();
        let mut owner = last_bucket;
        let mut tail = 0;
        let mut end = 0;

        if thread + 1 != num_threads {
            tail = self.ledger.start(last_bucket);
            end = align_to_next_block(tail, block_size);
            if tail != end {
                // A single block may cover several small buckets, so walk back
                // to the one the block starts in.
                let start_of_last_block = end - block_size;
                loop {
                    owner -= 1;
                    if self.ledger.start(owner) <= start_of_last_block {
                        break;
                    }
                }

                // A block reaching past the end of the array was written to
                // the overflow store instead.
                let committed = end <= self.array.len() && self.ledger.write(owner) >= end;
                tail = if committed {
                    self.ledger.start(owner + 1)
                } else {
                    end
                };
            }
        }

        let len = end - tail;
        if len > 0 {
            invariant!(
                swap.is_empty(),
                "swap buffer of thread {thread} already holds {} elements",
                swap.len()
            );
            unsafe { swap.read_from(self.array.range_ptr(tail, len), len) };
            log::trace!("thread {thread} saved {len} elements of bucket {owner} at {tail}..{end}");
        }

        SavedMargin { bucket: owner, len }
    }

    /// Completes every bucket in `buckets`.
    ///
    /// The sources of each bucket are drained in a fixed order: the overflow
    /// store if it belongs to the bucket, else the swap store if it does, else
    /// the elements spilling past the bucket end; then the local buffers of
    /// every thread in order. Each source fills the head gap of the bucket
    /// first and continues behind the last block. Buckets that are already
    /// complete are skipped.
    ///
    /// SAFETY: every thread must have finished [`Cleanup::save_margins`], the
    /// stores must hold exactly what distribution and margin saving left
    /// behind, and no other thread may write to the buckets in `buckets`.
    /// `locals` holds the slots of `buckets` of every thread.
    pub unsafe fn write_margins<F: Cmp<T>>(
        &self,
        buckets: Range<usize>,
        mut overflow: Option<&mut Overflow<T>>,
        mut swap: Option<Swap<'_, T>>,
        locals: &mut [BucketBuffers<'_, T>],
        is_less: &F,
    ) {
        let _guard = AbortOnUnwind;
        let block_size = self.ledger.block_size();

        for i in buckets.clone() {
            let bstart = self.ledger.start(i);
            let bend = self.ledger.end(i);
            let bwrite = self.ledger.write(i);

            if self.ledger.is_reconciled(i) {
                invariant!(
                    locals.iter().all(|l| l.is_empty(i)),
                    "bucket {i} is complete but local buffers still hold elements for it"
                );
                continue;
            }

            match (overflow.as_deref_mut(), swap.as_mut()) {
                (Some(ov), _) if ov.bucket() == i && !ov.is_empty() => {
                    // The overflow block was the last block of the bucket.
                    check_overflow(i, bend, bwrite, block_size, ov.block().len());
                    log::trace!("bucket {i} takes the overflow block");

                    let tail = bwrite - block_size;
                    let mut fill = BucketFill::new(i, bstart, bend, block_size, tail);
                    unsafe {
                        fill.fill_from(self.array, ov.block().as_ptr(), block_size);
                        ov.block_mut().reset();
                    }
                    self.drain_locals(&mut fill, locals);
                }

                (_, Some(sw)) if sw.bucket == i && !sw.buffer.is_empty() => {
                    // Saved from the block at our thread boundary.
                    let mut fill = BucketFill::new(i, bstart, bend, block_size, bwrite);
                    unsafe {
                        fill.fill_from(self.array, sw.buffer.as_ptr(), sw.buffer.len());
                        sw.buffer.reset();
                    }
                    self.drain_locals(&mut fill, locals);
                }

                _ => {
                    let mut fill = BucketFill::new(i, bstart, bend, block_size, bwrite);
                    if bwrite > bend && bend - bstart >= block_size {
                        // The last block reaches past the bucket end, move the
                        // excess elements to the head gap.
                        check_excess(i, bend, bwrite, block_size, fill.remaining);
                        let excess = bwrite - bend;
                        let src = self.array.range_ptr(bend, excess);
                        unsafe { fill.fill_from(self.array, src, excess) };
                    }
                    self.drain_locals(&mut fill, locals);
                }
            }

            self.ledger.mark_reconciled(i);

            // Sort small buckets now, while the data is still in cache.
            if self.is_last_level || bend - bstart <= 2 * self.base_case_size {
                let bucket = unsafe { self.array.slice_mut(bstart..bend) };
                (self.base_case)(bucket, is_less);
            }
        }

        check_drained(&buckets, overflow.as_deref(), swap.as_ref());
    }

    fn drain_locals(&self, fill: &mut BucketFill, locals: &mut [BucketBuffers<'_, T>]) {
        let i = fill.bucket;
        for buffers in locals.iter_mut() {
            let count = buffers.len(i);
            unsafe {
                fill.fill_from(self.array, buffers.as_ptr(i), count);
                buffers.reset(i);
            }
        }

        invariant!(
            fill.is_complete(),
            "bucket {i} ({}..{}) was filled up to {} (head gap left: {})",
            fill.start,
            fill.end,
            fill.dst,
            fill.remaining
        );
    }
}

/// The overflow block must be the full last block of its bucket.
fn check_overflow(bucket: usize, end: usize, write: usize, block_size: usize, len: usize) {
    invariant!(
        align_to_next_block(end, block_size) == write,
        "overflow bucket {bucket} ends at {end} but its write cursor is at {write}"
    );
    invariant!(
        len == block_size,
        "overflow block of bucket {bucket} holds {len} elements, expected {block_size}"
    );
}

/// Elements spilling past the end of a bucket must come from its last block
/// and fit into its head gap.
fn check_excess(bucket: usize, end: usize, write: usize, block_size: usize, head_gap: usize) {
    invariant!(
        align_to_next_block(end, block_size) == write,
        "bucket {bucket} ends at {end} but its write cursor is at {write}"
    );
    let excess = write - end;
    invariant!(
        excess <= head_gap,
        "bucket {bucket} has {excess} excess elements but a head gap of {head_gap}"
    );
}

/// Stores tagged with a bucket of `buckets` must have been emptied into it.
/// Anything left would be dropped while its bits are also in the array.
fn check_drained<T>(
    buckets: &Range<usize>,
    overflow: Option<&Overflow<T>>,
    swap: Option<&Swap<'_, T>>,
) {
    if let Some(ov) = overflow.filter(|ov| buckets.contains(&ov.bucket())) {
        invariant!(
            ov.is_empty(),
            "overflow store of bucket {} still holds {} elements after cleanup",
            ov.bucket(),
            ov.block().len()
        );
    }
    if let Some(sw) = swap.filter(|sw| buckets.contains(&sw.bucket)) {
        invariant!(
            sw.buffer.is_empty(),
            "swap store of bucket {} still holds {} elements after cleanup",
            sw.bucket,
            sw.buffer.len()
        );
    }
}

/// The write position inside one bucket. Writes go to the head gap until it
/// is full, then continue at the tail behind the last block.
struct BucketFill {
    bucket: usize,
    start: usize,
    end: usize,
    tail: usize,
    dst: usize,
    remaining: usize,
    in_tail: bool,
}

impl BucketFill {
    fn new(bucket: usize, start: usize, end: usize, block_size: usize, tail: usize) -> Self {
        let remaining = align_to_next_block(start, block_size) - start;
        let mut fill = Self {
            bucket,
            start,
            end,
            tail,
            dst: start,
            remaining,
            in_tail: false,
        };
        if remaining == 0 {
            fill.switch_to_tail();
        }
        fill
    }

    #[inline]
    fn switch_to_tail(&mut self) {
        self.dst = self.tail;
        self.remaining = usize::MAX;
        self.in_tail = true;
    }

    /// Moves `count` elements from `src` into the bucket.
    ///
    /// SAFETY: `src` must point to `count` elements outside the slots written
    /// to, which are logically moved out.
    unsafe fn fill_from<T>(&mut self, array: RawArray<'_, T>, mut src: *const T, mut count: usize) {
        while count > 0 {
            let n = count.min(self.remaining);
            invariant!(
                self.dst + n <= self.end,
                "writing {n} elements at {} overflows bucket {} ({}..{})",
                self.dst,
                self.bucket,
                self.start,
                self.end
            );
            unsafe {
                ptr::copy_nonoverlapping(src, array.range_ptr(self.dst, n), n);
                src = src.add(n);
            }
            self.dst += n;
            self.remaining -= n;
            count -= n;

            if self.remaining == 0 {
                self.switch_to_tail();
            }
        }
    }

    /// Whether the head gap and the tail have been filled exactly.
    fn is_complete(&self) -> bool {
        if self.in_tail {
            self.dst == self.end.max(self.tail)
        } else {
            self.dst == self.end
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_case::insertion_sort;
    use crate::buffers::LocalBuffers;

    const HOLE: u32 = u32::MAX;

    fn less(a: &u32, b: &u32) -> bool {
        a < b
    }

    /// A level ready for cleanup, built by hand. Unoccupied slots hold HOLE.
    struct Level {
        array: Vec<u32>,
        ledger: BucketLedger,
        locals: Vec<LocalBuffers<u32>>,
        overflow: Option<Overflow<u32>>,
    }

    impl Level {
        fn new(starts: &[usize], cursors: &[usize], block_size: usize, threads: usize) -> Self {
            let len = *starts.last().unwrap();
            let ledger =
                BucketLedger::with_cursors(starts.to_vec(), cursors, len, block_size).unwrap();
            let locals = (0..threads)
                .map(|_| LocalBuffers::new(ledger.num_buckets(), block_size))
                .collect();
            Self {
                array: vec![HOLE; len],
                ledger,
                locals,
                overflow: None,
            }
        }

        fn put(&mut self, at: usize, values: &[u32]) {
            self.array[at..at + values.len()].copy_from_slice(values);
        }

        fn local(&mut self, thread: usize, bucket: usize, values: &[u32]) {
            for &x in values {
                self.locals[thread].push(bucket, x);
            }
        }

        fn set_overflow(&mut self, bucket: usize, values: &[u32]) {
            let mut ov = Overflow::new(bucket, self.ledger.block_size());
            for &x in values {
                ov.block_mut().push(x);
            }
            self.overflow = Some(ov);
        }

        fn cleanup(
            &mut self,
            base_case_size: usize,
            is_last_level: bool,
        ) -> (Cleanup<'_, u32>, Vec<BucketBuffers<'_, u32>>) {
            let cleanup = Cleanup::new(
                RawArray::from_mut_slice(&mut self.array),
                &self.ledger,
                insertion_sort::<u32>,
                base_case_size,
                is_last_level,
            );
            let views = self.locals.iter_mut().map(|l| l.buckets_mut()).collect();
            (cleanup, views)
        }

        /// Single-threaded cleanup of every bucket.
        fn write_all(&mut self, base_case_size: usize, is_last_level: bool) {
            let num_buckets = self.ledger.num_buckets();
            let mut overflow = self.overflow.take();
            let (cleanup, mut views) = self.cleanup(base_case_size, is_last_level);
            let buckets = 0..num_buckets;
            unsafe { cleanup.write_margins(buckets, overflow.as_mut(), None, &mut views, &less) };
            self.overflow = overflow;
        }

        /// Cleanup by two threads, the second one starting at bucket `split`.
        fn write_split(&mut self, split: usize) -> SavedMargin {
            let num_buckets = self.ledger.num_buckets();
            let block_size = self.ledger.block_size();
            let (cleanup, views) = self.cleanup(16, false);
            let mut swap = BlockBuffer::new(block_size);
            let saved = unsafe { cleanup.save_margins(0, 2, split, &mut swap) };
            let mut last_swap = BlockBuffer::new(block_size);
            let last = unsafe { cleanup.save_margins(1, 2, num_buckets, &mut last_swap) };
            assert_eq!(last.len, 0);

            let mut first = Vec::new();
            let mut second = Vec::new();
            for view in views {
                let (a, b) = view.split_at(split);
                first.push(a);
                second.push(b);
            }
            unsafe {
                let sw = Swap {
                    bucket: saved.bucket,
                    buffer: &mut swap,
                };
                cleanup.write_margins(0..split, None, Some(sw), &mut first, &less);
                cleanup.write_margins(split..num_buckets, None, None, &mut second, &less);
            }
            assert!(swap.is_empty());
            saved
        }

        fn bucket(&self, i: usize) -> &[u32] {
            &self.array[self.ledger.start(i)..self.ledger.end(i)]
        }
    }

    /// Runs `body` in a child process executing only the test `name`, and
    /// returns the standard error of the child, which must have failed.
    /// Checks inside the cleanup abort instead of unwinding, so they can not
    /// be caught in-process.
    fn run_in_child(name: &str, body: impl FnOnce()) -> String {
        const VAR: &str = "MARGINSORT_CHILD_TEST";
        let test = format!("margins::tests::{name}");
        if std::env::var(VAR).as_deref() == Ok(test.as_str()) {
            body();
            std::process::exit(0);
        }

        let output = std::process::Command::new(std::env::current_exe().unwrap())
            .args([test.as_str(), "--exact", "--nocapture", "--test-threads=1"])
            .env(VAR, &test)
            .output()
            .unwrap();
        assert!(!output.status.success(), "{test} did not fail in the child process");
        String::from_utf8_lossy(&output.stderr).into_owned()
    }

    // Block size 4, buckets 0..3, 3..7, 7..10, split between two threads at
    // bucket 2. If bucket 1 committed the block 4..8, its last element spills
    // into bucket 2 and has to be saved before thread 1 fills its head gap.
    fn straddling_level(committed: bool) -> Level {
        let cursor = if committed { 8 } else { 4 };
        let mut level = Level::new(&[0, 3, 7, 10], &[0, cursor, 8], 4, 2);
        level.local(0, 0, &[2, 0, 1]);
        if committed {
            level.put(4, &[13, 11, 12, 10]);
        } else {
            level.local(0, 1, &[13, 11]);
            level.local(1, 1, &[12, 10]);
        }
        level.local(1, 2, &[22, 20, 21]);
        level
    }

    #[test]
    fn saves_committed_margin() {
        let mut level = straddling_level(true);
        let (cleanup, _) = level.cleanup(16, false);
        let mut swap = BlockBuffer::new(4);
        let saved = unsafe { cleanup.save_margins(0, 2, 2, &mut swap) };
        assert_eq!(saved, SavedMargin { bucket: 1, len: 1 });
        assert_eq!(swap.as_slice(), &[10]);
        unsafe { swap.reset() };
    }

    #[test]
    fn uncommitted_block_saves_nothing() {
        let mut level = straddling_level(false);
        let (cleanup, _) = level.cleanup(16, false);
        let mut swap = BlockBuffer::new(4);
        let saved = unsafe { cleanup.save_margins(0, 2, 2, &mut swap) };
        assert_eq!(saved, SavedMargin { bucket: 1, len: 0 });
        assert!(swap.is_empty());
    }

    #[test]
    fn last_thread_saves_nothing() {
        let mut level = straddling_level(true);
        let (cleanup, _) = level.cleanup(16, false);
        let mut swap = BlockBuffer::new(4);
        let saved = unsafe { cleanup.save_margins(1, 2, 3, &mut swap) };
        assert_eq!(saved, SavedMargin { bucket: 3, len: 0 });
        assert!(swap.is_empty());

        let saved = unsafe { cleanup.save_margins(0, 1, 2, &mut swap) };
        assert_eq!(saved.len, 0);
        assert!(swap.is_empty());
    }

    #[test]
    fn aligned_boundary_saves_nothing() {
        let mut level = Level::new(&[0, 4, 8], &[4, 8], 4, 2);
        level.put(0, &[1, 2, 3, 4]);
        level.put(4, &[5, 6, 7, 8]);
        let (cleanup, _) = level.cleanup(16, false);
        let mut swap = BlockBuffer::new(4);
        let saved = unsafe { cleanup.save_margins(0, 2, 1, &mut swap) };
        assert_eq!(saved, SavedMargin { bucket: 1, len: 0 });
        assert!(swap.is_empty());
    }

    #[test]
    fn saved_element_fills_the_head_gap() {
        let mut level = straddling_level(true);
        let saved = level.write_split(2);
        assert_eq!(saved, SavedMargin { bucket: 1, len: 1 });

        // The element saved from offset 7 went to the head gap at offset 3.
        assert_eq!(level.bucket(0), &[0, 1, 2]);
        assert_eq!(level.bucket(1), &[10, 11, 12, 13]);
        assert_eq!(level.bucket(2), &[20, 21, 22]);
        assert!(level.locals.iter().all(|l| l.is_empty()));
    }

    #[test]
    fn uncommitted_boundary_block_cleans_up_from_locals() {
        let mut level = straddling_level(false);
        let saved = level.write_split(2);
        assert_eq!(saved, SavedMargin { bucket: 1, len: 0 });
        assert_eq!(level.array, &[0, 1, 2, 10, 11, 12, 13, 20, 21, 22]);
    }

    #[test]
    fn writer_leaves_other_ranges_alone() {
        let mut level = straddling_level(true);
        let mut swap = BlockBuffer::new(4);
        {
            let (cleanup, views) = level.cleanup(16, false);
            let saved = unsafe { cleanup.save_margins(0, 2, 2, &mut swap) };
            let mut first: Vec<_> = views.into_iter().map(|v| v.split_at(2).0).collect();
            unsafe {
                let sw = Swap {
                    bucket: saved.bucket,
                    buffer: &mut swap,
                };
                cleanup.write_margins(0..2, None, Some(sw), &mut first, &less);
            }
        }
        assert_eq!(level.array[3], 10);
        // The saved slot still holds its old bits, the rest of bucket 2 is
        // still unoccupied.
        assert_eq!(&level.array[7..], &[10, HOLE, HOLE]);
        assert_eq!(level.locals[1].as_slice(2), &[22, 20, 21]);
    }

    #[test]
    fn block_covering_several_buckets() {
        // Block size 8. Bucket 1 (3..13) committed the block 8..16, which
        // also covers bucket 2 (13..14) and the start of bucket 3 (14..20),
        // where the second thread begins.
        let mut level = Level::new(&[0, 3, 13, 14, 20], &[0, 16, 16, 16], 8, 2);
        level.local(0, 0, &[2, 0, 1]);
        level.put(8, &[107, 106, 105, 104, 103, 102, 101, 100]);
        level.local(0, 1, &[108]);
        level.local(1, 1, &[109]);
        level.local(1, 2, &[130]);
        level.local(0, 3, &[145, 144, 143]);
        level.local(1, 3, &[142, 141, 140]);

        let saved = level.write_split(3);
        assert_eq!(saved, SavedMargin { bucket: 1, len: 3 });

        let mut expected: Vec<u32> = vec![0, 1, 2];
        expected.extend(100..110);
        expected.push(130);
        expected.extend(140..146);
        assert_eq!(level.array, expected);
    }

    #[test]
    fn overflow_block_fills_head_then_tail() {
        // Bucket 1 (1..10) wrote the block 4..8, its next block 8..12 would
        // cross the array end and went to the overflow store.
        let mut level = Level::new(&[0, 1, 10], &[0, 12], 4, 1);
        level.local(0, 0, &[0]);
        level.put(4, &[14, 15, 16, 17]);
        level.set_overflow(1, &[11, 12, 13, 18]);
        level.local(0, 1, &[19]);

        level.write_all(16, false);

        assert_eq!(level.bucket(0), &[0]);
        assert_eq!(level.bucket(1), &[11, 12, 13, 14, 15, 16, 17, 18, 19]);
        assert!(level.overflow.as_ref().unwrap().is_empty());
    }

    #[test]
    fn overflow_head_gap_comes_first() {
        let mut level = Level::new(&[0, 1, 10], &[0, 12], 4, 1);
        level.local(0, 0, &[0]);
        level.put(4, &[4, 4, 4, 4]);
        level.set_overflow(1, &[1, 2, 3, 9]);
        level.local(0, 1, &[9]);

        // Nothing gets sorted, so the order of the writes is visible.
        level.write_all(0, false);
        assert_eq!(level.array, &[0, 1, 2, 3, 4, 4, 4, 4, 9, 9]);
    }

    #[test]
    fn excess_moves_to_head() {
        // Bucket 1 (1..6) wrote the block 4..8, spilling two elements into
        // bucket 2 (6..8).
        let mut level = Level::new(&[0, 1, 6, 8], &[0, 8, 8], 4, 2);
        level.local(0, 0, &[100]);
        level.put(4, &[13, 14, 11, 12]);
        level.local(1, 1, &[15]);
        level.local(0, 2, &[21]);
        level.local(1, 2, &[20]);

        level.write_all(16, false);

        assert_eq!(level.bucket(0), &[100]);
        assert_eq!(level.bucket(1), &[11, 12, 13, 14, 15]);
        assert_eq!(level.bucket(2), &[20, 21]);
    }

    #[test]
    fn exactly_one_block_with_unaligned_start() {
        // Bucket 1 holds exactly one block (3..7) written at 4..8.
        let mut level = Level::new(&[0, 3, 7, 9], &[0, 8, 8], 4, 1);
        level.local(0, 0, &[0, 1, 2]);
        level.put(4, &[6, 4, 5, 3]);
        level.local(0, 2, &[8, 7]);

        level.write_all(16, false);

        assert_eq!(level.array, (0..9u32).collect::<Vec<_>>());
    }

    #[test]
    fn local_buffers_fill_head_then_tail_in_thread_order() {
        // Bucket 1 (2..13) has one block at 4..8, the rest comes from three
        // threads.
        let mut level = Level::new(&[0, 2, 13], &[0, 8], 4, 3);
        level.local(0, 0, &[0, 1]);
        level.put(4, &[40, 41, 42, 43]);
        level.local(0, 1, &[1]);
        level.local(1, 1, &[2, 3, 4]);
        level.local(2, 1, &[5, 6, 7]);

        level.write_all(0, false);

        assert_eq!(level.array, &[0, 1, 1, 2, 40, 41, 42, 43, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn small_buckets_end_up_sorted() {
        let mut level = Level::new(&[0, 5, 9], &[4, 8], 4, 2);
        level.put(0, &[9, 3, 7, 1]);
        level.local(1, 0, &[0]);
        level.local(0, 1, &[18, 12, 15]);
        level.local(1, 1, &[11]);

        level.write_all(16, false);

        assert_eq!(level.bucket(0), &[0, 1, 3, 7, 9]);
        assert_eq!(level.bucket(1), &[11, 12, 15, 18]);
    }

    #[test]
    fn large_buckets_are_left_for_recursion() {
        let mut level = Level::new(&[0, 5, 9], &[4, 8], 4, 2);
        level.put(0, &[9, 3, 7, 1]);
        level.local(1, 0, &[0]);
        level.local(0, 1, &[18, 12, 15]);
        level.local(1, 1, &[11]);

        level.write_all(2, false);

        assert_eq!(level.bucket(0), &[9, 3, 7, 1, 0]);
        assert_eq!(level.bucket(1), &[11, 12, 15, 18]);
    }

    #[test]
    fn second_pass_is_a_no_op() {
        let mut level = Level::new(&[0, 1, 6, 8], &[0, 8, 8], 4, 1);
        level.local(0, 0, &[100]);
        level.put(4, &[13, 14, 11, 12]);
        level.local(0, 1, &[15]);
        level.local(0, 2, &[21, 20]);

        level.write_all(0, true);
        assert_eq!(level.array, &[100, 11, 12, 13, 14, 15, 20, 21]);
        assert!(level.locals.iter().all(|l| l.is_empty()));
        assert!((0..3).all(|i| level.ledger.is_reconciled(i)));

        level.write_all(0, true);
        assert_eq!(level.array, &[100, 11, 12, 13, 14, 15, 20, 21]);
    }

    #[test]
    fn empty_and_tiny_buckets() {
        let mut level = Level::new(&[0, 0, 1, 1, 3, 3], &[0, 0, 4, 4, 4], 4, 2);
        level.local(1, 1, &[7]);
        level.local(0, 3, &[9]);
        level.local(1, 3, &[8]);

        level.write_all(0, true);

        assert_eq!(level.array, &[7, 8, 9]);
    }

    #[test]
    #[should_panic(expected = "writing 2 elements at 6 overflows bucket 2 (4..7)")]
    fn fill_past_bucket_end_panics() {
        let mut array = [0u32; 10];
        let src = [1u32, 2];
        // No head gap in 4..7, the tail starts at 6.
        let mut fill = BucketFill::new(2, 4, 7, 4, 6);
        unsafe { fill.fill_from(RawArray::from_mut_slice(&mut array), src.as_ptr(), 2) };
    }

    #[test]
    #[should_panic(expected = "bucket 1 (3..7) was filled up to")]
    fn missing_elements_are_detected() {
        let mut level = straddling_level(false);
        // Drop the part of bucket 1 held by thread 1.
        level.locals[1] = LocalBuffers::new(3, 4);
        let (cleanup, mut views) = level.cleanup(16, false);
        let mut fill = BucketFill::new(1, 3, 7, 4, 4);
        cleanup.drain_locals(&mut fill, &mut views);
    }

    #[test]
    #[should_panic(expected = "overflow block of bucket 1 holds 2 elements, expected 4")]
    fn partial_overflow_block_is_rejected() {
        check_overflow(1, 10, 12, 4, 2);
    }

    #[test]
    #[should_panic(expected = "overflow bucket 1 ends at 10 but its write cursor is at 16")]
    fn overflow_needs_the_last_block() {
        check_overflow(1, 10, 16, 4, 4);
    }

    #[test]
    #[should_panic(expected = "bucket 1 has 2 excess elements but a head gap of 1")]
    fn excess_larger_than_head_gap_is_rejected() {
        check_excess(1, 6, 8, 4, 1);
    }

    #[test]
    #[should_panic(expected = "bucket 1 ends at 6 but its write cursor is at 12")]
    fn excess_needs_the_last_block() {
        check_excess(1, 6, 12, 4, 3);
    }

    #[test]
    #[should_panic(expected = "swap store of bucket 1 still holds 1 elements after cleanup")]
    fn undrained_swap_is_rejected() {
        let mut buffer = BlockBuffer::new(4);
        buffer.push(String::from("left behind"));
        let swap = Swap {
            bucket: 1,
            buffer: &mut buffer,
        };
        check_drained::<String>(&(0..2), None, Some(&swap));
    }

    #[test]
    #[should_panic(expected = "overflow store of bucket 3 still holds 4 elements after cleanup")]
    fn undrained_overflow_is_rejected() {
        let mut ov = Overflow::new(3, 4);
        for x in 0..4u32 {
            ov.block_mut().push(x);
        }
        check_drained(&(2..4), Some(&ov), None);
    }

    #[test]
    fn stores_of_other_ranges_are_not_checked() {
        let mut ov = Overflow::new(3, 4);
        ov.block_mut().push(7u32);
        let mut buffer = BlockBuffer::new(4);
        buffer.push(5u32);
        let swap = Swap {
            bucket: 2,
            buffer: &mut buffer,
        };
        check_drained(&(0..2), Some(&ov), Some(&swap));
    }

    #[test]
    fn corrupted_overflow_aborts() {
        let stderr = run_in_child("corrupted_overflow_aborts", || {
            let mut level = Level::new(&[0, 1, 10], &[0, 12], 4, 1);
            level.local(0, 0, &[0]);
            level.put(4, &[4, 5, 6, 7]);
            level.set_overflow(1, &[1, 2]);
            level.write_all(16, false);
        });
        assert!(
            stderr.contains("overflow block of bucket 1 holds 2 elements, expected 4"),
            "{stderr}"
        );
    }

    #[test]
    fn swap_left_in_a_completed_bucket_aborts() {
        let stderr = run_in_child("swap_left_in_a_completed_bucket_aborts", || {
            let mut level = straddling_level(true);
            level.ledger.mark_reconciled(1);
            level.write_split(2);
        });
        assert!(
            stderr.contains("swap store of bucket 1 still holds 1 elements after cleanup"),
            "{stderr}"
        );
    }
}
