use core::cmp::Ordering;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::ops::Range;

/// Trait alias for comparison functions shared between workers.
pub trait Cmp<T>: Fn(&T, &T) -> bool + Sync {}
impl<T, F: Fn(&T, &T) -> bool + Sync> Cmp<T> for F {}

/// Helper function for the compiler to infer a closure as Cmp<T>.
#[inline]
pub fn cmp_from_closure<T, F>(f: F) -> F
where
    F: Fn(&T, &T) -> bool + Sync,
{
    f
}

/// Turns `is_less` back into a total order, for APIs that want one.
pub fn ordering<T, F: Cmp<T>>(a: &T, b: &T, is_less: &F) -> Ordering {
    if is_less(a, b) {
        Ordering::Less
    } else if is_less(b, a) {
        Ordering::Greater
    } else {
        Ordering::Equal
    }
}

#[inline]
#[cold]
pub fn abort() -> ! {
    std::process::abort();
}

#[inline(always)]
pub fn assert_abort(b: bool) {
    if !b {
        abort();
    }
}

/// Checks an invariant of the cleanup. The check is kept in release builds,
/// a violation panics with the given context and, as every caller holds an
/// [`AbortOnUnwind`], ends the process.
macro_rules! invariant {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            panic!($($arg)+);
        }
    };
}
pub(crate) use invariant;

/// Aborts the process when dropped during a panic. Held while the array
/// contains slots whose element has been moved elsewhere, since unwinding
/// would drop those slots a second time.
pub struct AbortOnUnwind;

impl Drop for AbortOnUnwind {
    #[inline]
    fn drop(&mut self) {
        if std::thread::panicking() {
            abort();
        }
    }
}

/// A raw view of the array being sorted.
///
/// Creating a view is safe, using it is not: while a view is in use, slots of
/// the array may be unoccupied (their element moved into a scratch store), and
/// it is up to the user to only read occupied slots and to write unoccupied
/// ones. The view is shared between workers that operate on disjoint regions.
pub struct RawArray<'l, T> {
    begin: *mut T,
    len: usize,
    _lifetime: PhantomData<&'l mut [T]>,
}

unsafe impl<'l, T: Send> Send for RawArray<'l, T> {}
unsafe impl<'l, T: Send> Sync for RawArray<'l, T> {}

impl<'l, T> Clone for RawArray<'l, T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<'l, T> Copy for RawArray<'l, T> {}

impl<'l, T> RawArray<'l, T> {
    #[inline]
    pub fn from_mut_slice(sl: &'l mut [T]) -> Self {
        Self {
            begin: sl.as_mut_ptr(),
            len: sl.len(),
            _lifetime: PhantomData,
        }
    }

    #[inline]
    pub fn from_maybeuninit_mut_slice(sl: &'l mut [MaybeUninit<T>]) -> Self {
        Self {
            begin: sl.as_mut_ptr().cast::<T>(),
            len: sl.len(),
            _lifetime: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pointer to slot `i`, which may be one past the end. Aborts when out of
    /// bounds.
    #[inline]
    pub fn ptr(&self, i: usize) -> *mut T {
        assert_abort(i <= self.len);
        // SAFETY: in bounds of the borrowed allocation, checked above.
        unsafe { self.begin.add(i) }
    }

    /// Pointer to the first of `count` slots starting at `i`. Aborts when the
    /// range is out of bounds.
    #[inline]
    pub fn range_ptr(&self, i: usize, count: usize) -> *mut T {
        assert_abort(count <= self.len && i <= self.len - count);
        self.ptr(i)
    }

    /// SAFETY: every slot in `range` must be occupied and no other reference to
    /// it may exist while the returned slice lives.
    #[inline]
    pub unsafe fn slice_mut<'a>(&self, range: Range<usize>) -> &'a mut [T] {
        assert_abort(range.start <= range.end && range.end <= self.len);
        unsafe { core::slice::from_raw_parts_mut(self.ptr(range.start), range.len()) }
    }
}
