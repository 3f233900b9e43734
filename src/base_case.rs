use core::mem::ManuallyDrop;
use core::ptr;

use crate::network::{network_sort_small, NETWORK_LEN};

/// A direct sort of a small contiguous range, called for every bucket the
/// cleanup finishes.
pub type BaseCaseFn<T> = fn(&mut [T], &dyn Fn(&T, &T) -> bool);

/// Which base case sort to use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BaseCase {
    /// Insertion sort.
    #[default]
    Insertion,
    /// The 24-input sorting network on chunks, finished by insertion sort.
    Network,
}

impl BaseCase {
    pub fn resolve<T>(self) -> BaseCaseFn<T> {
        match self {
            BaseCase::Insertion => insertion_sort::<T>,
            BaseCase::Network => network_sort::<T>,
        }
    }
}

/// When dropped, moves the element at `src` into the hole at `dest`.
struct InsertionHole<T> {
    src: *const T,
    dest: *mut T,
}

impl<T> Drop for InsertionHole<T> {
    fn drop(&mut self) {
        // SAFETY: src is the element taken out of the slice and dest the one
        // slot not holding an element, so this restores a fully initialized
        // slice, even when the comparison panicked.
        unsafe { ptr::copy_nonoverlapping(self.src, self.dest, 1) }
    }
}

/// Inserts the last element of `v` into the sorted elements before it.
///
/// SAFETY: `v.len() >= 2`.
unsafe fn insert_tail<T>(v: &mut [T], is_less: &dyn Fn(&T, &T) -> bool) {
    let n = v.len();
    let arr = v.as_mut_ptr();
    unsafe {
        let last = arr.add(n - 1);
        if !is_less(&*last, &*last.sub(1)) {
            return;
        }

        let tmp = ManuallyDrop::new(ptr::read(last));
        let mut hole = InsertionHole {
            src: &*tmp,
            dest: last.sub(1),
        };
        ptr::copy_nonoverlapping(hole.dest, last, 1);

        for j in (0..n - 2).rev() {
            let p = arr.add(j);
            if !is_less(&*tmp, &*p) {
                break;
            }
            ptr::copy_nonoverlapping(p, hole.dest, 1);
            hole.dest = p;
        }
        // The hole is filled with tmp on drop.
    }
}

pub fn insertion_sort<T>(v: &mut [T], is_less: &dyn Fn(&T, &T) -> bool) {
    for i in 1..v.len() {
        // SAFETY: the slice holds i + 1 >= 2 elements.
        unsafe { insert_tail(&mut v[..=i], is_less) };
    }
}

pub fn network_sort<T>(v: &mut [T], is_less: &dyn Fn(&T, &T) -> bool) {
    if v.len() <= NETWORK_LEN {
        return network_sort_small(v, is_less);
    }

    for chunk in v.chunks_mut(NETWORK_LEN) {
        network_sort_small(chunk, is_less);
    }
    insertion_sort(v, is_less);
}
