use core::mem::{align_of, size_of};
use core::ptr::NonNull;

/// A raw view of a contiguous byte region, usually a shared memory mapping.
///
/// `Region` does not own its memory. Whoever created it (an mmap owner or a
/// [`HeapRegion`]) must keep the backing memory alive for as long as any copy
/// of the view is in use.
#[derive(Clone, Copy)]
pub struct Region {
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: Region is just a pointer + length. Synchronization of the bytes it
// points at is the responsibility of the protocol layered on top.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Create a region view from a raw base pointer.
    ///
    /// # Safety
    ///
    /// - `base` must be valid for reads and writes of `len` bytes.
    /// - The memory must outlive every use of the returned view.
    pub unsafe fn from_raw(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    /// Length of the region in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pointer to `offset` bytes into the region.
    ///
    /// Panics if `offset` is past the end of the region.
    #[inline]
    pub fn offset(&self, offset: usize) -> *mut u8 {
        assert!(offset <= self.len, "offset {offset} out of bounds ({})", self.len);
        // SAFETY: offset <= len, so the result stays within (or one past) the allocation.
        unsafe { self.base.as_ptr().add(offset) }
    }

    /// Borrow a `T` living at `offset`.
    ///
    /// # Safety
    ///
    /// The bytes at `offset` must hold an initialized `T`.
    #[inline]
    pub unsafe fn get<T>(&self, offset: usize) -> &T {
        self.check_typed::<T>(offset);
        unsafe { &*(self.offset(offset) as *const T) }
    }

    /// Mutably borrow a `T` living at `offset`.
    ///
    /// # Safety
    ///
    /// The caller must have exclusive access to those bytes for the lifetime
    /// of the returned reference.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut<T>(&self, offset: usize) -> &mut T {
        self.check_typed::<T>(offset);
        unsafe { &mut *(self.offset(offset) as *mut T) }
    }

    /// Borrow `len` bytes starting at `offset`.
    ///
    /// # Safety
    ///
    /// Nobody may write those bytes while the slice is alive.
    #[inline]
    pub unsafe fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        self.check_range(offset, len);
        unsafe { core::slice::from_raw_parts(self.offset(offset), len) }
    }

    /// Mutably borrow `len` bytes starting at `offset`.
    ///
    /// # Safety
    ///
    /// The caller must have exclusive access to those bytes while the slice
    /// is alive.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn bytes_mut(&self, offset: usize, len: usize) -> &mut [u8] {
        self.check_range(offset, len);
        unsafe { core::slice::from_raw_parts_mut(self.offset(offset), len) }
    }

    #[inline]
    fn check_typed<T>(&self, offset: usize) {
        self.check_range(offset, size_of::<T>());
        assert!(
            (self.base.as_ptr() as usize + offset).is_multiple_of(align_of::<T>()),
            "misaligned access at offset {offset}"
        );
    }

    #[inline]
    fn check_range(&self, offset: usize, len: usize) {
        let end = offset.checked_add(len).expect("region range overflow");
        assert!(end <= self.len, "range {offset}..{end} out of bounds ({})", self.len);
    }
}

/// Heap-backed zeroed region, for tests and in-process peers.
#[cfg(any(test, feature = "alloc"))]
pub struct HeapRegion {
    base: NonNull<u8>,
    layout: alloc::alloc::Layout,
}

#[cfg(any(test, feature = "alloc"))]
unsafe impl Send for HeapRegion {}
#[cfg(any(test, feature = "alloc"))]
unsafe impl Sync for HeapRegion {}

#[cfg(any(test, feature = "alloc"))]
impl HeapRegion {
    /// Allocate `len` zeroed bytes, 64-byte aligned.
    pub fn new_zeroed(len: usize) -> Self {
        let layout = alloc::alloc::Layout::from_size_align(len.max(1), 64)
            .expect("invalid heap region layout");
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { alloc::alloc::alloc_zeroed(layout) };
        let Some(base) = NonNull::new(ptr) else {
            alloc::alloc::handle_alloc_error(layout);
        };
        Self { base, layout }
    }

    /// A view of the whole allocation.
    pub fn region(&self) -> Region {
        // SAFETY: the allocation is live until `self` drops.
        unsafe { Region::from_raw(self.base, self.layout.size()) }
    }
}

#[cfg(any(test, feature = "alloc"))]
impl Drop for HeapRegion {
    fn drop(&mut self) {
        // SAFETY: allocated in `new_zeroed` with this exact layout.
        unsafe { alloc::alloc::dealloc(self.base.as_ptr(), self.layout) }
    }
}
