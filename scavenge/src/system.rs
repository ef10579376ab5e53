use std::ptr::NonNull;

#[cfg(unix)]
mod unix {
    use core::ffi::c_void;

    const PROT_READ: i32 = 0x1;
    const PROT_WRITE: i32 = 0x2;
    const MAP_PRIVATE: i32 = 0x02;
    #[cfg(target_os = "linux")]
    const MAP_ANON: i32 = 0x20;
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    const MAP_ANON: i32 = 0x1000;
    const MAP_FAILED: isize = -1;

    unsafe extern "C" {
        fn mmap(
            addr: *mut c_void,
            length: usize,
            prot: i32,
            flags: i32,
            fd: i32,
            offset: isize,
        ) -> *mut c_void;

        fn munmap(addr: *mut c_void, length: usize) -> i32;
    }

    /// Private read/write mapping of `len` zeroed bytes, null on failure.
    pub fn map_zeroed(len: usize) -> *mut u8 {
        // SAFETY: a fresh anonymous mapping aliases nothing
        let p = unsafe {
            mmap(
                core::ptr::null_mut(),
                len,
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE | MAP_ANON,
                -1,
                0,
            )
        };
        if p as isize == MAP_FAILED {
            core::ptr::null_mut()
        } else {
            p.cast()
        }
    }

    /// # Safety
    /// `ptr` and `len` must describe a mapping from [`map_zeroed`] that is
    /// no longer referenced.
    pub unsafe fn unmap(ptr: *mut u8, len: usize) {
        // SAFETY: guaranteed by the caller
        let _ = unsafe { munmap(ptr.cast(), len) };
    }
}

pub const OS_PAGE_SIZE: usize = 4096;

/// Owned anonymous memory mapping backing every block of a `BlockSpace`.
///
/// The mapping is page aligned and zero filled; it is unmapped on drop.
#[derive(Debug)]
pub struct MappedRegion {
    start: NonNull<u8>,
    len: usize,
}

// SAFETY: the region is plain memory, ownership of individual words is
// handed out through block handles
unsafe impl Send for MappedRegion {}
// SAFETY: see above
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Maps `len` bytes rounded up to whole OS pages.
    #[must_use]
    pub fn new(len: usize) -> Option<Self> {
        let len = len.checked_next_multiple_of(OS_PAGE_SIZE)?;
        if len == 0 {
            return None;
        }
        NonNull::new(unix::map_zeroed(len)).map(|start| Self { start, len })
    }

    #[inline]
    pub fn start(&self) -> NonNull<u8> {
        self.start
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
    pub fn contains(&self, addr: usize) -> bool {
        let start = self.start.as_ptr() as usize;
        addr >= start && addr < start + self.len
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: start and len come from map_zeroed, no block outlives
        // the space owning this region
        unsafe { unix::unmap(self.start.as_ptr(), self.len) };
    }
}
