use thiserror::Error;

/// A configuration that can not be used to sort.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("block size must be at least one element")]
    ZeroBlockSize,
    #[error("block size in bytes must be non-zero")]
    ZeroBlockBytes,
    #[error("base case size must be at least one element")]
    ZeroBaseCase,
    #[error("log2 of the bucket count must lie in 1..=8, got {0}")]
    LogBucketsOutOfRange(u32),
    #[error("thread count must be non-zero")]
    ZeroThreads,
    #[error("oversampling percentage must be non-zero")]
    ZeroOversampling,
}

/// Bucket boundaries or write cursors that violate the ledger contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("a ledger needs at least one bucket")]
    NoBuckets,
    #[error("first bucket boundary must be 0, got {0}")]
    NonZeroStart(usize),
    #[error("bucket boundary {index} ({value}) is smaller than the previous one ({prev})")]
    Decreasing { index: usize, value: usize, prev: usize },
    #[error("last bucket boundary is {found}, expected the element count {expected}")]
    LengthMismatch { found: usize, expected: usize },
    #[error("expected {expected} write cursors, got {found}")]
    CursorCount { found: usize, expected: usize },
    #[error("write cursor {cursor} of bucket {bucket} is not a multiple of {block_size}")]
    UnalignedCursor {
        bucket: usize,
        cursor: usize,
        block_size: usize,
    },
    #[error("write cursor {cursor} of bucket {bucket} lies before its start {start}")]
    CursorBeforeStart {
        bucket: usize,
        cursor: usize,
        start: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}
