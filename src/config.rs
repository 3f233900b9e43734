use crate::base_case::BaseCase;
use crate::block::block_size_for;
use crate::error::ConfigError;

/// Largest supported log2 of the number of splitter-delimited buckets.
pub const MAX_LOG_BUCKETS: u32 = 8;

/// Tuning parameters of the sort.
///
/// ```
/// use marginsort::{BaseCase, Config};
///
/// let config = Config::default()
///     .block_size(64)
///     .num_threads(4)
///     .base_case(BaseCase::Network);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub(crate) block_bytes: usize,
    pub(crate) block_size: Option<usize>,
    pub(crate) base_case_size: usize,
    pub(crate) log_buckets: u32,
    pub(crate) oversampling_percent: usize,
    pub(crate) num_threads: Option<usize>,
    pub(crate) min_parallel_blocks_per_thread: usize,
    pub(crate) base_case: BaseCase,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_bytes: 2048,
            block_size: None,
            base_case_size: 16,
            log_buckets: MAX_LOG_BUCKETS,
            oversampling_percent: 20,
            num_threads: None,
            min_parallel_blocks_per_thread: 4,
            base_case: BaseCase::Insertion,
        }
    }
}

impl Config {
    /// Bytes per block. The block size is the largest power of two number of
    /// elements fitting in it.
    pub fn block_bytes(mut self, bytes: usize) -> Self {
        self.block_bytes = bytes;
        self
    }

    /// Elements per block, overriding [`Config::block_bytes`].
    pub fn block_size(mut self, elements: usize) -> Self {
        self.block_size = Some(elements);
        self
    }

    /// Buckets of at most twice this many elements are finished by the base
    /// case sort instead of another distribution level.
    pub fn base_case_size(mut self, elements: usize) -> Self {
        self.base_case_size = elements;
        self
    }

    /// Log2 of the maximum number of splitter-delimited buckets per level.
    pub fn log_buckets(mut self, log_buckets: u32) -> Self {
        self.log_buckets = log_buckets;
        self
    }

    /// Sample size relative to `log2(n)`, in percent.
    pub fn oversampling_percent(mut self, percent: usize) -> Self {
        self.oversampling_percent = percent;
        self
    }

    /// Number of workers. Defaults to the size of the current rayon pool.
    pub fn num_threads(mut self, threads: usize) -> Self {
        self.num_threads = Some(threads);
        self
    }

    /// Below this many blocks per worker, fewer workers are used.
    pub fn min_parallel_blocks_per_thread(mut self, blocks: usize) -> Self {
        self.min_parallel_blocks_per_thread = blocks;
        self
    }

    pub fn base_case(mut self, base_case: BaseCase) -> Self {
        self.base_case = base_case;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_size == Some(0) {
            return Err(ConfigError::ZeroBlockSize);
        }
        if self.block_size.is_none() && self.block_bytes == 0 {
            return Err(ConfigError::ZeroBlockBytes);
        }
        if self.base_case_size == 0 {
            return Err(ConfigError::ZeroBaseCase);
        }
        if !(1..=MAX_LOG_BUCKETS).contains(&self.log_buckets) {
            return Err(ConfigError::LogBucketsOutOfRange(self.log_buckets));
        }
        if self.num_threads == Some(0) {
            return Err(ConfigError::ZeroThreads);
        }
        if self.oversampling_percent == 0 {
            return Err(ConfigError::ZeroOversampling);
        }
        Ok(())
    }

    /// The block size in elements for elements of type `T`.
    pub fn block_size_for<T>(&self) -> usize {
        self.block_size
            .unwrap_or_else(|| block_size_for::<T>(self.block_bytes))
    }

    /// Inputs of at most this many elements are split into buckets once and
    /// not recursed into.
    pub fn single_level_threshold(&self) -> usize {
        self.base_case_size.saturating_mul(1 << self.log_buckets)
    }

    pub(crate) fn threads(&self) -> usize {
        self.num_threads.unwrap_or_else(rayon::current_num_threads)
    }
}
