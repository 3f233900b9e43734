//! Scratch stores holding elements that are not in the array during the
//! cleanup: block-sized buffers for overflow and swap data, and the per-thread
//! local buffers filled during distribution.

use core::mem::MaybeUninit;
use core::ops::Range;
use core::ptr;

use crate::util::assert_abort;

/// A buffer with room for a single block of elements.
pub struct BlockBuffer<T> {
    data: Box<[MaybeUninit<T>]>,
    len: usize,
}

impl<T> BlockBuffer<T> {
    pub fn new(block_size: usize) -> Self {
        Self {
            data: (0..block_size).map(|_| MaybeUninit::uninit()).collect(),
            len: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.data.len()
    }

    /// Panics if the buffer is full.
    pub fn push(&mut self, x: T) {
        assert!(!self.is_full(), "block buffer is full");
        self.data[self.len].write(x);
        self.len += 1;
    }

    pub fn as_slice(&self) -> &[T] {
        // SAFETY: the first len elements are initialized.
        unsafe { core::slice::from_raw_parts(self.as_ptr(), self.len) }
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> *const T {
        self.data.as_ptr().cast::<T>()
    }

    /// Moves `count` elements starting at `src` to the end of this buffer.
    ///
    /// SAFETY: `src` must point to `count` initialized elements, which are
    /// logically moved out (the caller must treat the source slots as
    /// unoccupied). They may not overlap this buffer.
    pub unsafe fn read_from(&mut self, src: *const T, count: usize) {
        assert_abort(count <= self.capacity() - self.len);
        unsafe {
            let dst = self.data.as_mut_ptr().add(self.len).cast::<T>();
            ptr::copy_nonoverlapping(src, dst, count);
        }
        self.len += count;
    }

    /// Empties the buffer without dropping its contents.
    ///
    /// SAFETY: the contents must have been moved elsewhere.
    #[inline]
    pub unsafe fn reset(&mut self) {
        self.len = 0;
    }
}

impl<T> Drop for BlockBuffer<T> {
    fn drop(&mut self) {
        unsafe {
            // SAFETY: the first len elements are initialized and owned by us.
            let data = self.data.as_mut_ptr().cast::<T>();
            let init = core::slice::from_raw_parts_mut(data, self.len);
            ptr::drop_in_place(init);
        }
    }
}

/// The overflow store: the last block of one bucket that would have reached
/// past the end of the array.
pub struct Overflow<T> {
    bucket: usize,
    block: BlockBuffer<T>,
}

impl<T> Overflow<T> {
    pub fn new(bucket: usize, block_size: usize) -> Self {
        Self {
            bucket,
            block: BlockBuffer::new(block_size),
        }
    }

    #[inline]
    pub fn bucket(&self) -> usize {
        self.bucket
    }

    #[inline]
    pub fn block(&self) -> &BlockBuffer<T> {
        &self.block
    }

    #[inline]
    pub fn block_mut(&mut self) -> &mut BlockBuffer<T> {
        &mut self.block
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.block.is_empty()
    }
}

/// A swap store lent to the margin writer, tagged with the bucket whose
/// trailing elements it holds.
pub struct Swap<'a, T> {
    pub bucket: usize,
    pub buffer: &'a mut BlockBuffer<T>,
}

/// Leftover elements of one thread, one slot of `capacity` elements per
/// bucket.
pub struct LocalBuffers<T> {
    capacity: usize,
    data: Box<[MaybeUninit<T>]>,
    lens: Box<[usize]>,
}

impl<T> LocalBuffers<T> {
    /// Creates the buffers of one thread. A slot of a buffer is flushed as a
    /// full block before it would reach `block_size` elements, so it only
    /// needs room for `block_size - 1`.
    pub fn new(num_buckets: usize, block_size: usize) -> Self {
        let capacity = block_size.saturating_sub(1);
        Self {
            capacity,
            data: (0..num_buckets * capacity)
                .map(|_| MaybeUninit::uninit())
                .collect(),
            lens: vec![0; num_buckets].into_boxed_slice(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn len(&self, bucket: usize) -> usize {
        self.lens[bucket]
    }

    #[inline]
    pub fn is_full(&self, bucket: usize) -> bool {
        self.lens[bucket] == self.capacity
    }

    /// Whether every slot is empty.
    pub fn is_empty(&self) -> bool {
        self.lens.iter().all(|&l| l == 0)
    }

    /// Panics if the slot is full.
    pub fn push(&mut self, bucket: usize, x: T) {
        assert!(!self.is_full(bucket), "local buffer of bucket {bucket} is full");
        let len = self.lens[bucket];
        self.data[bucket * self.capacity + len].write(x);
        self.lens[bucket] = len + 1;
    }

    pub fn as_slice(&self, bucket: usize) -> &[T] {
        // SAFETY: the first lens[bucket] elements of the slot are initialized.
        unsafe { core::slice::from_raw_parts(self.slot_ptr(bucket), self.lens[bucket]) }
    }

    /// Moves the contents of a slot to `dst` and empties it, returning the
    /// number of elements moved.
    ///
    /// SAFETY: `dst` must be valid for writing `self.len(bucket)` elements
    /// and hold nothing that needs dropping.
    pub unsafe fn flush_into(&mut self, bucket: usize, dst: *mut T) -> usize {
        let len = self.lens[bucket];
        unsafe { ptr::copy_nonoverlapping(self.slot_ptr(bucket), dst, len) };
        self.lens[bucket] = 0;
        len
    }

    /// Moves the contents of a slot to the end of `block`.
    pub fn flush_into_block(&mut self, bucket: usize, block: &mut BlockBuffer<T>) {
        let len = self.lens[bucket];
        // SAFETY: the slot holds len initialized elements, which are no
        // longer counted as ours once the length is reset below.
        unsafe { block.read_from(self.slot_ptr(bucket), len) };
        self.lens[bucket] = 0;
    }

    /// A mutable view of all slots, which can be split by bucket ranges.
    pub fn buckets_mut(&mut self) -> BucketBuffers<'_, T> {
        BucketBuffers {
            first: 0,
            capacity: self.capacity,
            data: &mut self.data,
            lens: &mut self.lens,
        }
    }

    #[inline]
    fn slot_ptr(&self, bucket: usize) -> *const T {
        self.data[bucket * self.capacity..].as_ptr().cast::<T>()
    }
}

impl<T> Drop for LocalBuffers<T> {
    fn drop(&mut self) {
        for bucket in 0..self.lens.len() {
            let len = self.lens[bucket];
            let begin = bucket * self.capacity;
            for slot in &mut self.data[begin..begin + len] {
                // SAFETY: the first lens[bucket] elements of the slot are
                // initialized and owned by us.
                unsafe { slot.assume_init_drop() };
            }
        }
    }
}

/// The slots of a contiguous range of buckets of one thread's
/// [`LocalBuffers`].
pub struct BucketBuffers<'a, T> {
    first: usize,
    capacity: usize,
    data: &'a mut [MaybeUninit<T>],
    lens: &'a mut [usize],
}

impl<'a, T> BucketBuffers<'a, T> {
    #[inline]
    pub fn buckets(&self) -> Range<usize> {
        self.first..self.first + self.lens.len()
    }

    #[inline]
    pub fn len(&self, bucket: usize) -> usize {
        self.lens[bucket - self.first]
    }

    #[inline]
    pub fn is_empty(&self, bucket: usize) -> bool {
        self.len(bucket) == 0
    }

    /// Splits into the slots before `bucket` and the slots from `bucket` on.
    pub fn split_at(self, bucket: usize) -> (Self, Self) {
        assert!(
            self.buckets().contains(&bucket) || bucket == self.buckets().end,
            "bucket {bucket} outside of {:?}",
            self.buckets()
        );
        let mid = bucket - self.first;
        let (data_left, data_right) = self.data.split_at_mut(mid * self.capacity);
        let (lens_left, lens_right) = self.lens.split_at_mut(mid);
        (
            Self {
                first: self.first,
                capacity: self.capacity,
                data: data_left,
                lens: lens_left,
            },
            Self {
                first: bucket,
                capacity: self.capacity,
                data: data_right,
                lens: lens_right,
            },
        )
    }

    /// Splits into one view per range. The ranges must be contiguous and
    /// together cover exactly the buckets of this view.
    pub fn split_by_ranges(self, ranges: &[Range<usize>]) -> Vec<Self> {
        let mut rest = self;
        let mut views = Vec::with_capacity(ranges.len());
        for (i, range) in ranges.iter().enumerate() {
            assert_eq!(range.start, rest.first, "bucket ranges must be contiguous");
            if i + 1 == ranges.len() {
                assert_eq!(range.end, rest.buckets().end, "bucket ranges must cover the view");
                break;
            }
            let (view, tail) = rest.split_at(range.end);
            views.push(view);
            rest = tail;
        }
        views.push(rest);
        views
    }

    #[inline]
    pub(crate) fn as_ptr(&self, bucket: usize) -> *const T {
        self.data[(bucket - self.first) * self.capacity..]
            .as_ptr()
            .cast::<T>()
    }

    /// Empties the slot of `bucket` without dropping its contents.
    ///
    /// SAFETY: the contents must have been moved elsewhere.
    #[inline]
    pub unsafe fn reset(&mut self, bucket: usize) {
        self.lens[bucket - self.first] = 0;
    }
}
