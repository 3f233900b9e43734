//! A 24-input sorting network stored as plain compare-exchange tables.
//!
//! The network sorts both halves with a 12-input network (Batcher's odd-even
//! merge sort with the comparators of inputs 12..16 removed) and then merges
//! them. Every comparator moves the smaller element to the lower index, so
//! the network also sorts any shorter input if comparators touching indices
//! past the end are skipped: those indices behave as if they held elements
//! greater than everything else.

pub const NETWORK_LEN: usize = 24;

#[rustfmt::skip]
const SORT12: [(u8, u8); 42] = [
    (0, 1), (2, 3), (4, 5), (6, 7), (8, 9), (10, 11), (0, 2), (1, 3), (4, 6), (5, 7), (8, 10),
    (9, 11), (1, 2), (5, 6), (9, 10), (0, 4), (1, 5), (2, 6), (3, 7), (2, 4), (3, 5), (1, 2),
    (3, 4), (5, 6), (9, 10), (0, 8), (1, 9), (2, 10), (3, 11), (4, 8), (5, 9), (6, 10),
    (7, 11), (2, 4), (3, 5), (6, 8), (7, 9), (1, 2), (3, 4), (5, 6), (7, 8), (9, 10),
];

#[rustfmt::skip]
const MERGE24: [(u8, u8); 45] = [
    // Even indices.
    (0, 12), (2, 14), (4, 16), (6, 18), (8, 20), (10, 22), (2, 12), (10, 20), (4, 12), (6, 14),
    (8, 16), (10, 18), (8, 12), (10, 14), (6, 8), (10, 12), (14, 16),
    // Odd indices.
    (1, 13), (3, 15), (5, 17), (7, 19), (9, 21), (11, 23), (3, 13), (11, 21), (5, 13), (7, 15),
    (9, 17), (11, 19), (9, 13), (11, 15), (7, 9), (11, 13), (15, 17),
    // Final pass.
    (1, 2), (3, 4), (5, 6), (7, 8), (9, 10), (11, 12), (13, 14), (15, 16), (17, 18), (19, 20),
    (21, 22),
];

#[inline(always)]
fn compare_exchange<T>(v: &mut [T], a: usize, b: usize, is_less: &dyn Fn(&T, &T) -> bool) {
    if is_less(&v[b], &v[a]) {
        v.swap(a, b);
    }
}

#[inline]
fn run<T>(v: &mut [T], pairs: &[(u8, u8)], offset: usize, is_less: &dyn Fn(&T, &T) -> bool) {
    for &(a, b) in pairs {
        let (a, b) = (offset + a as usize, offset + b as usize);
        if b < v.len() {
            compare_exchange(v, a, b, is_less);
        }
    }
}

/// Sorts `v`, which may hold at most [`NETWORK_LEN`] elements.
pub fn network_sort_small<T>(v: &mut [T], is_less: &dyn Fn(&T, &T) -> bool) {
    assert!(v.len() <= NETWORK_LEN, "network input of {} elements", v.len());
    run(v, &SORT12, 0, is_less);
    run(v, &SORT12, 12, is_less);
    run(v, &MERGE24, 0, is_less);
}
