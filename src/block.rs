//! Block arithmetic. Offsets are relative to the start of the array being
//! sorted at the current recursion level.

/// Rounds `offset` up to the next multiple of `block_size`.
#[inline]
pub fn align_to_next_block(offset: usize, block_size: usize) -> usize {
    offset.div_ceil(block_size) * block_size
}

/// Rounds `offset` down to the previous multiple of `block_size`.
#[inline]
pub fn align_to_prev_block(offset: usize, block_size: usize) -> usize {
    offset - offset % block_size
}

#[inline]
pub fn is_block_aligned(offset: usize, block_size: usize) -> bool {
    offset % block_size == 0
}

/// The block size used for elements of type `T` when `block_bytes` bytes are
/// requested: the largest power of two number of elements that fits, and at
/// least one.
pub fn block_size_for<T>(block_bytes: usize) -> usize {
    let fit = (block_bytes / core::mem::size_of::<T>().max(1)).max(1);
    1 << (usize::BITS - 1 - fit.leading_zeros())
}
