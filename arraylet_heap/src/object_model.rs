// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Consumer-side queries over indexable objects.
//!
//! Scanners, copying collectors, and heap iteration use these to walk a
//! finished object without re-deriving allocation policy by hand. The
//! layout is never stored; it is re-derived from the header: a non-zero
//! contiguous size field means InlineContiguous, anything else re-runs
//! the layout policy on the class and the discontiguous size. Queries
//! tolerate null arrayoid slots so that a partially built (abandoned)
//! object is still safe to walk.

pub(crate) mod header;

use crate::{
    class::ClassId,
    heap::{Heap, HeapAddress},
    layout::{ArrayLayout, select_layout},
};

/// A finished (or abandoned mid-build) indexable object, viewed through
/// its spine address.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct IndexableObject(HeapAddress);

impl IndexableObject {
    pub fn from_address(address: HeapAddress) -> Self {
        Self(address)
    }

    pub fn address(self) -> HeapAddress {
        self.0
    }

    pub fn class_id(self, heap: &Heap) -> ClassId {
        header::class_id(heap, self.0)
    }

    pub fn has_hash_slot(self, heap: &Heap) -> bool {
        header::flags(heap, self.0) & header::FLAG_HASHED != 0
    }

    /// Element count, read from whichever size field is live.
    pub fn size_in_elements(self, heap: &Heap) -> u32 {
        let contiguous = header::contiguous_size(heap, self.0);
        if contiguous != 0 {
            contiguous
        } else {
            header::discontiguous_size(heap, self.0)
        }
    }

    /// Re-derive the object's layout from its header.
    pub fn layout(self, heap: &Heap) -> ArrayLayout {
        let geometry = heap.geometry();
        if header::contiguous_size(heap, self.0) != 0 {
            return ArrayLayout::InlineContiguous;
        }
        debug_assert_eq!(
            heap.read_u32(self.0.offset_by(geometry.must_be_zero_offset())),
            0,
            "discontiguous header with a corrupt must-be-zero word"
        );
        let element_count = header::discontiguous_size(heap, self.0);
        let class = heap.class(self.class_id(heap));
        let data_size = geometry
            .data_size_in_bytes(element_count, class.stride())
            .expect("header-derived data size cannot overflow");
        let policy = heap.layout_policy(heap.subspace_of(self.0));
        select_layout(
            &geometry,
            policy,
            data_size,
            class.should_align_spine_data(geometry.reference_mode()),
            false,
        )
    }

    pub fn data_size_in_bytes(self, heap: &Heap) -> u64 {
        let class = heap.class(self.class_id(heap));
        heap.geometry()
            .data_size_in_bytes(self.size_in_elements(heap), class.stride())
            .expect("header-derived data size cannot overflow")
    }

    fn align_data(self, heap: &Heap) -> bool {
        let class = heap.class(self.class_id(heap));
        class.should_align_spine_data(heap.geometry().reference_mode())
    }

    pub fn leaf_count(self, heap: &Heap) -> u64 {
        match self.layout(heap) {
            ArrayLayout::InlineContiguous => 0,
            ArrayLayout::Discontiguous | ArrayLayout::Hybrid => {
                heap.geometry().leaf_count(self.data_size_in_bytes(heap))
            }
            ArrayLayout::Illegal => unreachable!("Illegal layout is never stored"),
        }
    }

    /// Number of arrayoid slots referencing external leaves. Hybrid
    /// objects keep their final, partial leaf in the spine.
    pub fn external_leaf_count(self, heap: &Heap) -> u64 {
        match self.layout(heap) {
            ArrayLayout::InlineContiguous => 0,
            ArrayLayout::Discontiguous => self.leaf_count(heap),
            ArrayLayout::Hybrid => self.leaf_count(heap) - 1,
            ArrayLayout::Illegal => unreachable!("Illegal layout is never stored"),
        }
    }

    /// Used bytes of the leaf at `index`; only the last leaf may be
    /// partial.
    pub fn arraylet_size(self, heap: &Heap, index: u64) -> u64 {
        heap.geometry()
            .arraylet_size(self.data_size_in_bytes(heap), index)
    }

    /// Resolve arrayoid slot `index` to an address: the external leaf
    /// it references, the in-spine remainder for a Hybrid object's
    /// final slot, or `None` for a slot not yet attached.
    pub fn arrayoid_slot(self, heap: &Heap, index: u64) -> Option<HeapAddress> {
        let layout = self.layout(heap);
        let leaf_count = self.leaf_count(heap);
        assert!(
            layout.uses_discontiguous_header(),
            "contiguous object has no arrayoid"
        );
        assert!(index < leaf_count, "arrayoid slot {index} out of bounds");
        if layout == ArrayLayout::Hybrid && index == leaf_count - 1 {
            // The in-spine offset is written after the external leaves;
            // a legitimate offset is at least the header size, so raw
            // zero means the build was abandoned before attaching it.
            let offset = header::read_arrayoid_slot_raw(heap, self.0, index);
            if offset == 0 {
                return None;
            }
            return Some(self.0.offset_by(offset));
        }
        header::read_arrayoid_slot(heap, self.0, index)
    }

    /// Walk the external leaf slots in index order. Unattached slots
    /// yield `None`.
    pub fn leaf_addresses<'heap>(
        self,
        heap: &'heap Heap,
    ) -> impl Iterator<Item = Option<HeapAddress>> + 'heap {
        (0..self.external_leaf_count(heap)).map(move |index| header::read_arrayoid_slot(heap, self.0, index))
    }

    /// Data address of an InlineContiguous object: header-adjacent in
    /// the normal case, a sparse off-heap address in off-heap mode.
    pub fn contiguous_data_address(self, heap: &Heap) -> Option<HeapAddress> {
        match self.layout(heap) {
            ArrayLayout::InlineContiguous => header::data_address(heap, self.0),
            _ => None,
        }
    }

    /// Address of a Hybrid object's in-spine remainder data, `None`
    /// while the final slot has not been attached yet.
    pub fn spine_remainder_address(self, heap: &Heap) -> Option<HeapAddress> {
        match self.layout(heap) {
            ArrayLayout::Hybrid => {
                let leaf_count = self.leaf_count(heap);
                let offset = header::read_arrayoid_slot_raw(heap, self.0, leaf_count - 1);
                if offset == 0 {
                    return None;
                }
                Some(self.0.offset_by(offset))
            }
            _ => None,
        }
    }

    /// True when the object's data sits directly after its header.
    fn data_is_adjacent(self, heap: &Heap) -> bool {
        match self.layout(heap) {
            ArrayLayout::InlineContiguous => {
                let data = header::data_address(heap, self.0)
                    .expect("contiguous object without a data address");
                data == self.0.offset_by(heap.geometry().contiguous_header_size())
            }
            _ => true,
        }
    }

    /// Spine footprint: header plus in-spine data, adjusted, including
    /// the hash slot. Matches the spine bytes the allocation
    /// description requested.
    pub fn size_in_bytes_with_header(self, heap: &Heap) -> u64 {
        self.spine_sizing(heap).bytes
    }

    /// Bytes held in external leaves, counting the whole final leaf of
    /// a Discontiguous object even when only partially used.
    pub fn external_leaf_bytes(self, heap: &Heap) -> u64 {
        let geometry = heap.geometry();
        match self.layout(heap) {
            ArrayLayout::InlineContiguous => {
                if self.data_is_adjacent(heap) {
                    0
                } else {
                    self.data_size_in_bytes(heap)
                }
            }
            ArrayLayout::Discontiguous => self.data_size_in_bytes(heap),
            ArrayLayout::Hybrid => (self.leaf_count(heap) - 1) * geometry.leaf_size(),
            ArrayLayout::Illegal => unreachable!("Illegal layout is never stored"),
        }
    }

    /// Total allocated footprint, the figure reported to out-of-memory
    /// diagnostics: spine plus external leaves.
    pub fn total_footprint(self, heap: &Heap) -> u64 {
        self.size_in_bytes_with_header(heap) + self.external_leaf_bytes(heap)
    }

    /// Byte offset of the identity hash slot, when present.
    pub fn hashcode_offset(self, heap: &Heap) -> Option<u64> {
        self.spine_sizing(heap).hash_slot_offset
    }

    pub fn hash_code(self, heap: &Heap) -> Option<u32> {
        if !self.has_hash_slot(heap) {
            return None;
        }
        self.hashcode_offset(heap)
            .map(|offset| heap.read_u32(self.0.offset_by(offset)))
    }

    /// Verify every attached external leaf lies inside the owning
    /// subspace's arraylet range. Null slots pass; they are legal in an
    /// abandoned object.
    pub fn leaves_in_arraylet_range(self, heap: &Heap) -> bool {
        let policy = heap.layout_policy(heap.subspace_of(self.0));
        self.leaf_addresses(heap)
            .flatten()
            .all(|leaf| policy.range_contains(leaf))
    }

    fn spine_sizing(self, heap: &Heap) -> crate::geometry::SpineSizing {
        let geometry = heap.geometry();
        let layout = self.layout(heap);
        let data_size = self.data_size_in_bytes(heap);
        let leaf_count = match layout {
            ArrayLayout::InlineContiguous => 0,
            _ => geometry.leaf_count(data_size),
        };
        geometry.spine_allocation_size(
            layout,
            leaf_count,
            data_size,
            self.align_data(heap),
            self.has_hash_slot(heap),
            self.data_is_adjacent(heap),
        )
    }
}
