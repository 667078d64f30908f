// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::{
    alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error},
    ptr::{NonNull, read_unaligned, write_unaligned},
};

use crate::heap::subspace::SubspaceId;

/// A zero-initialized backing buffer for a heap region or a sparse data
/// range. The `ptr` points to a continuous buffer of `size` bytes,
/// allocated at the requested alignment.
#[derive(Debug)]
pub(crate) struct RegionBlock {
    ptr: NonNull<u8>,
    size: usize,
    alignment: usize,
}

impl RegionBlock {
    pub(crate) fn new(size: usize, alignment: usize) -> Self {
        debug_assert!(size > 0);
        debug_assert!(alignment.is_power_of_two());
        let layout = match Layout::from_size_align(size, alignment) {
            Ok(layout) => layout,
            Err(_) => panic!("invalid region layout: {size} bytes at alignment {alignment}"),
        };
        // SAFETY: Size of allocation is non-zero.
        let data = unsafe { alloc_zeroed(layout) };
        if data.is_null() {
            handle_alloc_error(layout);
        }
        debug_assert_eq!(data.align_offset(alignment), 0);
        let Some(ptr) = NonNull::new(data) else {
            unreachable!()
        };
        Self {
            ptr,
            size,
            alignment,
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn read_u32(&self, offset: usize) -> u32 {
        debug_assert!(offset + 4 <= self.size);
        // SAFETY: The buffer is initialized and the value read is fully
        // within the allocation.
        unsafe { read_unaligned(self.ptr.as_ptr().add(offset).cast()) }
    }

    pub(crate) fn write_u32(&mut self, offset: usize, value: u32) {
        debug_assert!(offset + 4 <= self.size);
        // SAFETY: The buffer is initialized and the value written is fully
        // within the allocation.
        unsafe { write_unaligned(self.ptr.as_ptr().add(offset).cast(), value) }
    }

    pub(crate) fn read_u64(&self, offset: usize) -> u64 {
        debug_assert!(offset + 8 <= self.size);
        // SAFETY: The buffer is initialized and the value read is fully
        // within the allocation.
        unsafe { read_unaligned(self.ptr.as_ptr().add(offset).cast()) }
    }

    pub(crate) fn write_u64(&mut self, offset: usize, value: u64) {
        debug_assert!(offset + 8 <= self.size);
        // SAFETY: The buffer is initialized and the value written is fully
        // within the allocation.
        unsafe { write_unaligned(self.ptr.as_ptr().add(offset).cast(), value) }
    }

    pub(crate) fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        debug_assert!(offset.checked_add(len).is_some_and(|end| end <= self.size));
        // SAFETY: The buffer is initialized and the range is fully within
        // the allocation.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr().add(offset), len) }
    }

    pub(crate) fn bytes_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        debug_assert!(offset.checked_add(len).is_some_and(|end| end <= self.size));
        // SAFETY: The buffer is initialized and the range is fully within
        // the allocation.
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr().add(offset), len) }
    }
}

impl Drop for RegionBlock {
    fn drop(&mut self) {
        let Ok(layout) = Layout::from_size_align(self.size, self.alignment) else {
            unreachable!()
        };
        // SAFETY: The buffer was allocated with this exact layout.
        unsafe { dealloc(self.ptr.as_ptr(), layout) }
    }
}

/// A committed heap region. Regions are fixed power-of-two blocks owned
/// by exactly one subspace; their index in the heap's region table is
/// stable for the life of the heap, even after the backing memory has
/// been decommitted.
#[derive(Debug)]
pub(crate) struct Region {
    block: Option<RegionBlock>,
    subspace: SubspaceId,
}

impl Region {
    pub(crate) fn new(size: usize, alignment: usize, subspace: SubspaceId) -> Self {
        Self {
            block: Some(RegionBlock::new(size, alignment)),
            subspace,
        }
    }

    pub(crate) fn subspace(&self) -> SubspaceId {
        self.subspace
    }

    pub(crate) fn is_committed(&self) -> bool {
        self.block.is_some()
    }

    /// Release the backing memory. The region index stays reserved so
    /// existing addresses never alias a new region.
    pub(crate) fn decommit(&mut self) {
        debug_assert!(self.block.is_some());
        self.block = None;
    }

    pub(crate) fn block(&self) -> &RegionBlock {
        match &self.block {
            Some(block) => block,
            None => panic!("read through a decommitted region"),
        }
    }

    pub(crate) fn block_mut(&mut self) -> &mut RegionBlock {
        match &mut self.block {
            Some(block) => block,
            None => panic!("write through a decommitted region"),
        }
    }
}
