// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::{
    class::ClassId,
    heap::{HeapAddress, SubspaceId},
    layout::ArrayLayout,
};

/// The byte-exact plan for one allocation attempt.
///
/// Created on the calling thread per attempt and discarded on return.
/// While the attempt is running, the `spine` field is the single point
/// of truth for the object's current address: a raw-allocator call may
/// run a collection, relocate the object, and overwrite the field
/// through [`set_spine`]. Any address captured before such a call is
/// stale and must not be reused.
///
/// [`set_spine`]: AllocateDescription::set_spine
#[derive(Debug)]
pub struct AllocateDescription {
    class: ClassId,
    element_count: u32,
    stride: u64,
    layout: ArrayLayout,
    data_size: u64,
    align_data: bool,
    off_heap_data: bool,
    data_adjacent: bool,
    leaf_count: u64,
    spine_bytes: u64,
    leaf_bytes: u64,
    chunked: bool,
    hash_slot_offset: Option<u64>,
    subspace: SubspaceId,
    spine: Option<HeapAddress>,
}

impl AllocateDescription {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        class: ClassId,
        element_count: u32,
        stride: u64,
        layout: ArrayLayout,
        data_size: u64,
        align_data: bool,
        off_heap_data: bool,
        leaf_count: u64,
        subspace: SubspaceId,
    ) -> Self {
        Self {
            class,
            element_count,
            stride,
            layout,
            data_size,
            align_data,
            off_heap_data,
            data_adjacent: true,
            leaf_count,
            spine_bytes: 0,
            leaf_bytes: 0,
            chunked: false,
            hash_slot_offset: None,
            subspace,
            spine: None,
        }
    }

    /// Fill in the byte plan once the builder has sized the request.
    pub(crate) fn set_plan(
        &mut self,
        spine_bytes: u64,
        leaf_bytes: u64,
        chunked: bool,
        hash_slot_offset: Option<u64>,
        data_adjacent: bool,
    ) {
        self.spine_bytes = spine_bytes;
        self.leaf_bytes = leaf_bytes;
        self.chunked = chunked;
        self.hash_slot_offset = hash_slot_offset;
        self.data_adjacent = data_adjacent;
    }

    pub fn class(&self) -> ClassId {
        self.class
    }

    pub fn element_count(&self) -> u32 {
        self.element_count
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn layout(&self) -> ArrayLayout {
        self.layout
    }

    pub fn data_size(&self) -> u64 {
        self.data_size
    }

    pub(crate) fn align_data(&self) -> bool {
        self.align_data
    }

    pub(crate) fn off_heap_data(&self) -> bool {
        self.off_heap_data
    }

    /// True when the object's data will sit directly after its header.
    /// False only for off-heap contiguous objects.
    pub fn data_adjacent(&self) -> bool {
        self.data_adjacent
    }

    pub fn leaf_count(&self) -> u64 {
        self.leaf_count
    }

    /// Leaf allocations the spine/leaf allocator must perform. Hybrid
    /// keeps its last, partial leaf in the spine; an off-heap
    /// contiguous object iterates every leaf for bookkeeping even
    /// though none is retained.
    pub fn external_leaf_count(&self) -> u64 {
        match self.layout {
            ArrayLayout::Discontiguous => self.leaf_count,
            ArrayLayout::Hybrid => self.leaf_count - 1,
            ArrayLayout::InlineContiguous => {
                if self.data_adjacent {
                    0
                } else {
                    self.leaf_count
                }
            }
            ArrayLayout::Illegal => 0,
        }
    }

    /// Bytes the spine allocation must request.
    pub fn spine_bytes(&self) -> u64 {
        self.spine_bytes
    }

    /// Bytes requiring separate leaf allocation.
    pub fn leaf_bytes(&self) -> u64 {
        self.leaf_bytes
    }

    /// Total bytes this attempt will consume; the figure surfaced to
    /// out-of-memory diagnostics on failure.
    pub fn bytes_requested(&self) -> u64 {
        self.spine_bytes + self.leaf_bytes
    }

    /// True when finishing the object takes more than the spine
    /// allocation, i.e. the multi-step leaf sequence must run.
    pub fn chunked(&self) -> bool {
        self.chunked
    }

    pub(crate) fn hash_slot_offset(&self) -> Option<u64> {
        self.hash_slot_offset
    }

    pub fn subspace(&self) -> SubspaceId {
        self.subspace
    }

    /// The object's current address, `None` before the spine exists or
    /// after abandonment.
    pub fn spine(&self) -> Option<HeapAddress> {
        self.spine
    }

    /// Overwrite the object's current address. Raw allocators call this
    /// when a collection relocates the object mid-sequence.
    pub fn set_spine(&mut self, spine: Option<HeapAddress>) {
        self.spine = spine;
    }
}
