#![deny(unsafe_op_in_unsafe_fn)]

//! Marginsort is a parallel samplesort. Every level classifies the
//! elements against a sample of splitters, distributes them into buckets in
//! whole blocks claimed through shared atomic write cursors, and then runs a
//! margin cleanup that moves the elements which did not fill a whole block
//! into the unaligned edges of their buckets. Small buckets are finished with
//! a base case sort while they are still in cache, large ones are recursed
//! into in parallel with [`rayon`].
//!
//! Elements equal to a splitter get a bucket of their own and are never
//! recursed into, so inputs with many duplicates sort quickly. The sort is
//! not stable, and it is not in-place either: each level stages the elements
//! in a scratch vector as long as the input. Only the cleanup works in place.
//!
//! The cleanup is exposed through [`margins::Cleanup`] together with the
//! stores it drains, so a different distribution scheme can reuse it.

mod config;
mod error;
mod sorter;
mod util;

pub mod base_case;
pub mod block;
pub mod buffers;
pub mod classify;
pub mod distribute;
pub mod ledger;
pub mod margins;
pub mod network;

use core::cmp::Ordering;

use util::*;

pub use base_case::{BaseCase, BaseCaseFn};
pub use config::Config;
pub use error::{ConfigError, Error, LedgerError};
pub use sorter::thread_ranges;
pub use util::{Cmp, RawArray};

use crate::sorter::Sorter;

/// See [`slice::sort_unstable`].
pub fn sort<T: Ord + Send + Sync>(v: &mut [T]) {
    sort_by(v, |a, b| a.cmp(b))
}

/// See [`slice::sort_unstable_by_key`]. The key function is called on every
/// comparison.
pub fn sort_by_key<T, K, F>(v: &mut [T], f: F)
where
    T: Send + Sync,
    K: Ord,
    F: Fn(&T) -> K + Sync,
{
    sort_by(v, |a, b| f(a).cmp(&f(b)))
}

/// See [`slice::sort_unstable_by`]. The comparison is shared between worker
/// threads, so it has to be `Fn + Sync`.
pub fn sort_by<T, F>(v: &mut [T], compare: F)
where
    T: Send + Sync,
    F: Fn(&T, &T) -> Ordering + Sync,
{
    if let Err(err) = sort_with_config_by(v, &Config::default(), compare) {
        // The default configuration is valid and bucket boundaries come from
        // counting, so this is a bug.
        panic!("sorting with the default configuration failed: {err}");
    }
}

/// Like [`sort_by`], with explicit tuning parameters.
///
/// Fails without touching `v` if `config` is invalid.
pub fn sort_with_config_by<T, F>(v: &mut [T], config: &Config, compare: F) -> Result<(), Error>
where
    T: Send + Sync,
    F: Fn(&T, &T) -> Ordering + Sync,
{
    let is_less = cmp_from_closure(|a: &T, b: &T| compare(a, b) == Ordering::Less);
    let sorter = Sorter::new(config, &is_less, v.len())?;

    // Zero-sized types are either always or never sorted, as they can not carry
    // any information that would allow the permutation to change.
    if core::mem::size_of::<T>() == 0 {
        return Ok(());
    }

    sorter.sort(v)
}
