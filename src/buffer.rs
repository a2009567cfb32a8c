use std::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};

use crate::sector::SECTOR_SIZE;

pub const TRANSFER_ALIGN: usize = 4096;

/// Page-aligned sector buffer, usable with O_DIRECT transfers.
pub struct AlignedBuffer {
    ptr: *mut u8,
    layout: Layout,
}

impl AlignedBuffer {
    pub fn new(sectors: usize) -> Self {
        assert!(sectors > 0, "aligned buffer needs at least one sector");
        let layout = Layout::from_size_align(sectors * SECTOR_SIZE, TRANSFER_ALIGN)
            .expect("Invalid layout for AlignedBuffer");
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            handle_alloc_error(layout);
        }
        AlignedBuffer { ptr, layout }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.layout.size()) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.layout.size()) }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr, self.layout) };
    }
}

// Owned heap allocation with no thread affinity.
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}
