// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The sparse off-heap data space.
//!
//! In off-heap mode an indexable object's spine carries only a header;
//! its element data lives in one contiguous range mapped from a
//! dedicated address namespace above the region space. The leaf blocks
//! the allocation sequence still requests are decommitted immediately,
//! so the heap's region accounting and OOM behaviour stay identical to
//! the on-heap path while the data itself is addressable as a single
//! pointer-contiguous buffer.

use hashbrown::HashMap;

use crate::heap::{
    HeapAddress,
    address::SPARSE_ADDRESS_BASE,
    region::RegionBlock,
};

/// Alignment of every mapped range base.
const RANGE_ALIGNMENT: u64 = 16;

#[derive(Debug)]
struct SparseRange {
    block: RegionBlock,
    size: u64,
}

/// Allocator and byte store for the sparse data address namespace.
///
/// Live ranges are keyed by their base address. The table is small (one
/// entry per off-heap array), so containment queries scan it.
#[derive(Debug)]
pub struct SparseVirtualHeap {
    ranges: HashMap<u64, SparseRange>,
    next_offset: u64,
    decommitted_leaf_bytes: u64,
}

impl SparseVirtualHeap {
    pub(crate) fn new() -> Self {
        Self {
            ranges: HashMap::new(),
            next_offset: RANGE_ALIGNMENT,
            decommitted_leaf_bytes: 0,
        }
    }

    /// Map one contiguous range of `size` bytes and return its base
    /// address. The backing is zero-initialized.
    pub(crate) fn map_contiguous(&mut self, size: u64) -> HeapAddress {
        debug_assert!(size > 0);
        let raw = SPARSE_ADDRESS_BASE + self.next_offset;
        self.next_offset += (size + RANGE_ALIGNMENT - 1) & !(RANGE_ALIGNMENT - 1);
        let base = match HeapAddress::from_raw(raw) {
            Some(base) => base,
            None => unreachable!(),
        };
        self.ranges.insert(
            raw,
            SparseRange {
                block: RegionBlock::new(size as usize, RANGE_ALIGNMENT as usize),
                size,
            },
        );
        tracing::debug!(?base, size, "mapped sparse data range");
        base
    }

    /// Unmap the range based at `base`. False when no such range is
    /// live.
    pub fn free_range(&mut self, base: HeapAddress) -> bool {
        self.ranges.remove(&base.raw()).is_some()
    }

    /// True when `address` falls inside any live mapped range. The
    /// heap-check walks use this to validate off-heap data pointers.
    pub fn is_valid_data_address(&self, address: HeapAddress) -> bool {
        self.find(address).is_some()
    }

    pub fn live_range_count(&self) -> usize {
        self.ranges.len()
    }

    /// Running total of leaf bytes decommitted in favour of sparse
    /// storage.
    pub fn decommitted_leaf_bytes(&self) -> u64 {
        self.decommitted_leaf_bytes
    }

    pub(crate) fn note_decommitted_leaf(&mut self, bytes: u64) {
        self.decommitted_leaf_bytes += bytes;
    }

    fn find(&self, address: HeapAddress) -> Option<(&SparseRange, usize)> {
        let raw = address.raw();
        self.ranges.iter().find_map(|(base, range)| {
            (*base <= raw && raw < base + range.size).then(|| (range, (raw - base) as usize))
        })
    }

    fn resolve(&self, address: HeapAddress) -> (&SparseRange, usize) {
        self.find(address)
            .expect("sparse address outside any mapped range")
    }

    fn resolve_mut(&mut self, address: HeapAddress) -> (&mut SparseRange, usize) {
        let raw = address.raw();
        self.ranges
            .iter_mut()
            .find_map(|(base, range)| {
                (*base <= raw && raw < base + range.size).then(|| (range, (raw - base) as usize))
            })
            .expect("sparse address outside any mapped range")
    }

    pub(crate) fn read_u32(&self, address: HeapAddress) -> u32 {
        let (range, offset) = self.resolve(address);
        range.block.read_u32(offset)
    }

    pub(crate) fn write_u32(&mut self, address: HeapAddress, value: u32) {
        let (range, offset) = self.resolve_mut(address);
        range.block.write_u32(offset, value)
    }

    pub(crate) fn read_u64(&self, address: HeapAddress) -> u64 {
        let (range, offset) = self.resolve(address);
        range.block.read_u64(offset)
    }

    pub(crate) fn write_u64(&mut self, address: HeapAddress, value: u64) {
        let (range, offset) = self.resolve_mut(address);
        range.block.write_u64(offset, value)
    }

    pub(crate) fn bytes(&self, address: HeapAddress, len: usize) -> &[u8] {
        let (range, offset) = self.resolve(address);
        range.block.bytes(offset, len)
    }

    pub(crate) fn bytes_mut(&mut self, address: HeapAddress, len: usize) -> &mut [u8] {
        let (range, offset) = self.resolve_mut(address);
        range.block.bytes_mut(offset, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapped_ranges_do_not_overlap() {
        let mut sparse = SparseVirtualHeap::new();
        let first = sparse.map_contiguous(100);
        let second = sparse.map_contiguous(100);
        assert!(first.is_sparse());
        assert!(second.raw() >= first.raw() + 100);
        assert_eq!(sparse.live_range_count(), 2);
    }

    #[test]
    fn interior_addresses_are_valid_and_readable() {
        let mut sparse = SparseVirtualHeap::new();
        let base = sparse.map_contiguous(4096);
        let interior = base.offset_by(4092);
        assert!(sparse.is_valid_data_address(base));
        assert!(sparse.is_valid_data_address(interior));
        assert!(!sparse.is_valid_data_address(base.offset_by(4096)));
        sparse.write_u32(interior, 99);
        assert_eq!(sparse.read_u32(interior), 99);
        assert_eq!(sparse.read_u32(base), 0);
    }

    #[test]
    fn freed_ranges_stop_validating() {
        let mut sparse = SparseVirtualHeap::new();
        let base = sparse.map_contiguous(64);
        assert!(sparse.free_range(base));
        assert!(!sparse.free_range(base));
        assert!(!sparse.is_valid_data_address(base));
    }

    #[test]
    fn decommit_bookkeeping_accumulates() {
        let mut sparse = SparseVirtualHeap::new();
        sparse.note_decommitted_leaf(4096);
        sparse.note_decommitted_leaf(4096);
        assert_eq!(sparse.decommitted_leaf_bytes(), 8192);
    }
}
