// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::{
    alloc::{AllocateDescription, AllocationError, AllocationFlags},
    class::ClassId,
    heap::{Heap, HeapAddress, RawAllocator, SubspaceId},
    layout::{ArrayLayout, fits_adjacent, select_layout},
    object_model::header,
};

/// The two-phase allocation engine for one indexable object.
///
/// Phase one, [`initialize_allocate_description`], turns the logical
/// request into a byte-exact plan without touching the heap. Phase two,
/// [`initialize_indexable_object`], drives the raw allocator through
/// the spine request and the per-leaf sequence, re-deriving the
/// object's address from the description after every call that could
/// have run a collection. An attempt always ends complete (the object
/// address) or abandoned (`None`, with the spine and any attached
/// leaves left as floating garbage for a future collection).
///
/// [`initialize_allocate_description`]:
///     IndexableObjectAllocationModel::initialize_allocate_description
/// [`initialize_indexable_object`]:
///     IndexableObjectAllocationModel::initialize_indexable_object
#[derive(Debug)]
pub struct IndexableObjectAllocationModel {
    description: AllocateDescription,
    flags: AllocationFlags,
    allocatable: bool,
    leaves_attached: u64,
    failure: Option<AllocationError>,
}

impl IndexableObjectAllocationModel {
    /// Size the logical request. Overflowing element counts yield an
    /// `Illegal` layout here and are rejected by phase one before any
    /// geometry consumes them.
    pub fn new(
        heap: &Heap,
        class: ClassId,
        element_count: u32,
        subspace: SubspaceId,
        flags: AllocationFlags,
    ) -> Self {
        let geometry = heap.geometry();
        let class_entry = heap.class(class);
        let stride = class_entry.stride();
        let align_data = class_entry.should_align_spine_data(geometry.reference_mode());
        let off_heap_data = heap.parameters().off_heap_data;
        let (layout, data_size, leaf_count) =
            match geometry.data_size_in_bytes(element_count, stride) {
                None => (ArrayLayout::Illegal, 0, 0),
                Some(data_size) => {
                    let policy = heap.layout_policy(subspace);
                    let layout =
                        select_layout(&geometry, policy, data_size, align_data, off_heap_data);
                    (layout, data_size, geometry.leaf_count(data_size))
                }
            };
        Self {
            description: AllocateDescription::new(
                class,
                element_count,
                stride,
                layout,
                data_size,
                align_data,
                off_heap_data,
                leaf_count,
                subspace,
            ),
            flags,
            allocatable: false,
            leaves_attached: 0,
            failure: None,
        }
    }

    pub fn description(&self) -> &AllocateDescription {
        &self.description
    }

    /// Why the attempt failed, once it has.
    pub fn failure(&self) -> Option<AllocationError> {
        self.failure
    }

    pub fn leaves_attached(&self) -> u64 {
        self.leaves_attached
    }

    /// Phase one: compute the byte plan. Must run before any raw byte
    /// allocation; `false` means "do not attempt allocation" and no
    /// memory has been consumed.
    pub fn initialize_allocate_description(&mut self, heap: &Heap) -> bool {
        let geometry = heap.geometry();
        let hashed = self.flags.precompute_hash;
        let layout = self.description.layout();
        let data_size = self.description.data_size();
        let leaf_count = self.description.leaf_count();
        let align_data = self.description.align_data();
        match layout {
            ArrayLayout::Illegal => {
                self.failure = Some(AllocationError::SizeOverflow {
                    element_count: self.description.element_count(),
                    stride: self.description.stride(),
                });
                return false;
            }
            ArrayLayout::InlineContiguous => {
                let policy = heap.layout_policy(self.description.subspace());
                let adjacent = !self.description.off_heap_data()
                    || fits_adjacent(&geometry, policy, data_size);
                let sizing = geometry.spine_allocation_size(
                    layout, leaf_count, data_size, align_data, hashed, adjacent,
                );
                let (leaf_bytes, chunked) = if adjacent { (0, false) } else { (data_size, true) };
                self.description.set_plan(
                    sizing.bytes,
                    leaf_bytes,
                    chunked,
                    sizing.hash_slot_offset,
                    adjacent,
                );
                if !adjacent && !self.flags.collection_permitted {
                    // The leaf sequence has collection points; a caller
                    // that cannot tolerate one cannot build this object.
                    self.failure = Some(AllocationError::CollectionNotPermitted {
                        bytes_requested: self.description.bytes_requested(),
                    });
                    return false;
                }
            }
            ArrayLayout::Discontiguous => {
                let sizing = geometry.spine_allocation_size(
                    layout, leaf_count, data_size, align_data, hashed, true,
                );
                self.description.set_plan(
                    sizing.bytes,
                    data_size,
                    self.description.element_count() != 0,
                    sizing.hash_slot_offset,
                    true,
                );
            }
            ArrayLayout::Hybrid => {
                let sizing = geometry.spine_allocation_size(
                    layout, leaf_count, data_size, align_data, hashed, true,
                );
                let leaf_bytes = (leaf_count - 1) << geometry.leaf_log2();
                self.description.set_plan(
                    sizing.bytes,
                    leaf_bytes,
                    true,
                    sizing.hash_slot_offset,
                    true,
                );
            }
        }
        self.allocatable = true;
        true
    }

    /// Phase two: drive the raw allocator until the object is complete
    /// or the attempt is abandoned.
    pub fn initialize_indexable_object(
        &mut self,
        heap: &mut Heap,
        allocator: &mut dyn RawAllocator,
    ) -> Option<HeapAddress> {
        assert!(
            self.allocatable,
            "allocation attempted without a successful description"
        );
        let bytes_requested = self.description.bytes_requested();
        tracing::trace!(
            class = ?self.description.class(),
            element_count = self.description.element_count(),
            layout = ?self.description.layout(),
            bytes_requested,
            "starting indexable allocation"
        );
        let Some(spine) = allocator.allocate_spine(heap, &mut self.description) else {
            self.failure = Some(AllocationError::SpineExhausted { bytes_requested });
            tracing::debug!(bytes_requested, "spine allocation failed");
            return None;
        };
        self.description.set_spine(Some(spine));
        match self.description.layout() {
            ArrayLayout::InlineContiguous => self.finish_contiguous(heap, allocator),
            ArrayLayout::Discontiguous | ArrayLayout::Hybrid => self.finish_chunked(heap, allocator),
            ArrayLayout::Illegal => unreachable!("Illegal layout reached the allocator"),
        }
    }

    fn header_flags(&self) -> u8 {
        if self.flags.precompute_hash {
            header::FLAG_HASHED
        } else {
            0
        }
    }

    fn finish_contiguous(
        &mut self,
        heap: &mut Heap,
        allocator: &mut dyn RawAllocator,
    ) -> Option<HeapAddress> {
        let spine = self.current_spine();
        header::write_contiguous_header(
            heap,
            spine,
            self.description.class(),
            self.header_flags(),
            self.description.element_count(),
        );
        if !self.description.chunked() {
            let data = spine.offset_by(heap.geometry().contiguous_header_size());
            header::write_data_address(heap, spine, data);
            return self.complete(heap);
        }
        // Off-heap data: run the leaf sequence purely for region
        // bookkeeping and OOM detection, releasing each leaf's backing
        // as soon as it is counted. The sparse mapping made afterwards
        // is the canonical storage.
        for _ in 0..self.description.external_leaf_count() {
            let Some(leaf) = allocator.allocate_leaf(heap, &mut self.description) else {
                return self.abandon();
            };
            heap.decommit_leaf(leaf);
            self.leaves_attached += 1;
        }
        let data = heap.map_sparse_range(self.description.data_size());
        let spine = self.current_spine();
        header::write_data_address(heap, spine, data);
        self.complete(heap)
    }

    fn finish_chunked(
        &mut self,
        heap: &mut Heap,
        allocator: &mut dyn RawAllocator,
    ) -> Option<HeapAddress> {
        let spine = self.current_spine();
        header::write_discontiguous_header(
            heap,
            spine,
            self.description.class(),
            self.header_flags(),
            self.description.element_count(),
        );
        let leaf_size = heap.geometry().leaf_size();
        let external = self.description.external_leaf_count();
        let mut remaining = self.description.leaf_bytes();
        for index in 0..external {
            let Some(leaf) = allocator.allocate_leaf(heap, &mut self.description) else {
                return self.abandon();
            };
            // The leaf request may have run a collection and moved the
            // spine; the description holds the only address still
            // valid.
            let spine = self.current_spine();
            header::write_arrayoid_slot(heap, spine, index, Some(leaf));
            self.leaves_attached += 1;
            remaining -= remaining.min(leaf_size);
            tracing::trace!(index, ?leaf, remaining, "attached arraylet leaf");
        }
        debug_assert_eq!(remaining, 0);
        match self.description.layout() {
            ArrayLayout::Discontiguous => {
                debug_assert_eq!(self.leaves_attached, self.description.leaf_count());
            }
            ArrayLayout::Hybrid => {
                debug_assert_eq!(self.leaves_attached, self.description.leaf_count() - 1);
                // The final arrayoid slot records where the in-spine
                // remainder begins, as an offset rather than a leaf
                // reference.
                let geometry = heap.geometry();
                let offset = geometry.hybrid_remainder_offset(
                    self.description.leaf_count(),
                    self.description.align_data(),
                );
                let spine = self.current_spine();
                header::write_arrayoid_slot_raw(
                    heap,
                    spine,
                    self.description.leaf_count() - 1,
                    offset,
                );
            }
            _ => unreachable!("chunked finish on a non-chunked layout"),
        }
        self.complete(heap)
    }

    fn current_spine(&self) -> HeapAddress {
        self.description
            .spine()
            .expect("collector dropped the in-flight spine")
    }

    /// Abandon the attempt: null the spine reference and leave the
    /// partially built object unreferenced. A future collection
    /// reclaims it; nothing is freed here.
    fn abandon(&mut self) -> Option<HeapAddress> {
        self.description.set_spine(None);
        self.failure = Some(AllocationError::LeafExhausted {
            bytes_requested: self.description.bytes_requested(),
            leaves_attached: self.leaves_attached,
        });
        tracing::debug!(
            bytes_requested = self.description.bytes_requested(),
            leaves_attached = self.leaves_attached,
            "leaf allocation failed; abandoning object"
        );
        None
    }

    fn complete(&mut self, heap: &mut Heap) -> Option<HeapAddress> {
        let spine = self.current_spine();
        // The hash slot waits until the object's final size and address
        // are fixed.
        if let Some(offset) = self.description.hash_slot_offset() {
            let hash = heap.identity_hash(spine);
            heap.write_u32(spine.offset_by(offset), hash);
        }
        tracing::trace!(object = ?spine, "indexable allocation complete");
        Some(spine)
    }
}
