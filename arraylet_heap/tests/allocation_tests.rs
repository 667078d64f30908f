// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end allocation tests: the full spine/leaf sequence against
//! scripted raw allocators that relocate the spine or fail at chosen
//! steps, the threshold scenarios, and the off-heap variant.

use arraylet_heap::{
    AllocateDescription, AllocationError, AllocationFlags, ArrayClass, ArrayLayout, BumpAllocator,
    ClassId, ElementKind, Heap, HeapAddress, HeapParameters, IndexableObject,
    IndexableObjectAllocationModel, RawAllocator, ReferenceMode, SubspaceId,
};

/// Raw allocator double: bump allocation plus a script of collector
/// behaviour, relocating the spine or failing at a chosen leaf index.
struct ScriptedAllocator {
    inner: BumpAllocator,
    relocate_before_leaf: Option<u64>,
    fail_at_leaf: Option<u64>,
    leaf_calls: u64,
    spines_seen: Vec<HeapAddress>,
    leaves_handed_out: Vec<HeapAddress>,
}

impl ScriptedAllocator {
    fn new(budget: u64) -> Self {
        Self {
            inner: BumpAllocator::new(budget),
            relocate_before_leaf: None,
            fail_at_leaf: None,
            leaf_calls: 0,
            spines_seen: Vec::new(),
            leaves_handed_out: Vec::new(),
        }
    }

    fn relocating_before_leaf(mut self, index: u64) -> Self {
        self.relocate_before_leaf = Some(index);
        self
    }

    fn failing_at_leaf(mut self, index: u64) -> Self {
        self.fail_at_leaf = Some(index);
        self
    }
}

impl RawAllocator for ScriptedAllocator {
    fn allocate_spine(
        &mut self,
        heap: &mut Heap,
        description: &mut AllocateDescription,
    ) -> Option<HeapAddress> {
        let spine = self.inner.allocate_spine(heap, description)?;
        self.spines_seen.push(spine);
        Some(spine)
    }

    fn allocate_leaf(
        &mut self,
        heap: &mut Heap,
        description: &mut AllocateDescription,
    ) -> Option<HeapAddress> {
        let index = self.leaf_calls;
        self.leaf_calls += 1;
        if self.fail_at_leaf == Some(index) {
            return None;
        }
        if self.relocate_before_leaf == Some(index) {
            // Play the collector: move the partially built spine and
            // record the new address in the description, exactly as a
            // real collection would.
            let stale = description.spine().expect("no spine to relocate");
            let moved = heap
                .relocate_object(stale, description.spine_bytes())
                .expect("relocation target allocation failed");
            description.set_spine(Some(moved));
            self.spines_seen.push(moved);
        }
        let leaf = self.inner.allocate_leaf(heap, description)?;
        self.leaves_handed_out.push(leaf);
        Some(leaf)
    }
}

fn byte_array_heap(threshold: u64) -> (Heap, SubspaceId, ClassId) {
    let mut heap = Heap::new(HeapParameters::default());
    let subspace = heap.add_subspace("tenure", threshold);
    let class = heap.register_class(ArrayClass::new("byte[]", 1, ElementKind::Primitive));
    (heap, subspace, class)
}

#[test]
fn a_small_array_is_laid_out_inline() {
    let (mut heap, subspace, class) = byte_array_heap(4096);
    let mut allocator = BumpAllocator::new(1 << 20);
    let address = heap
        .allocate_indexable(class, 100, subspace, AllocationFlags::default(), &mut allocator)
        .unwrap();
    let object = IndexableObject::from_address(address);
    assert_eq!(object.layout(&heap), ArrayLayout::InlineContiguous);
    assert_eq!(object.size_in_elements(&heap), 100);
    assert_eq!(object.leaf_count(&heap), 0);
    assert_eq!(
        object.contiguous_data_address(&heap),
        Some(address.offset_by(heap.geometry().contiguous_header_size()))
    );
    assert_eq!(object.total_footprint(&heap), 24 + 100 + 4);
}

#[test]
fn the_hybrid_threshold_scenario_cuts_both_ways() {
    // 10000 bytes over 4096-byte leaves: three leaves, 1808-byte
    // remainder. A 2000-byte threshold admits the hybrid spine
    // (16 + 3*8 + 1808 = 1848); an 1800-byte threshold does not.
    let (mut heap, subspace, class) = byte_array_heap(2000);
    let mut allocator = BumpAllocator::new(1 << 20);
    let address = heap
        .allocate_indexable(class, 10000, subspace, AllocationFlags::default(), &mut allocator)
        .unwrap();
    let object = IndexableObject::from_address(address);
    assert_eq!(object.layout(&heap), ArrayLayout::Hybrid);
    assert_eq!(object.external_leaf_count(&heap), 2);
    assert_eq!(object.leaf_addresses(&heap).flatten().count(), 2);
    assert_eq!(
        object.spine_remainder_address(&heap),
        Some(address.offset_by(16 + 3 * 8))
    );
    // The remainder slot resolves through the arrayoid like any other.
    assert_eq!(
        object.arrayoid_slot(&heap, 2),
        object.spine_remainder_address(&heap)
    );

    let (mut heap, subspace, class) = byte_array_heap(1800);
    let mut allocator = BumpAllocator::new(1 << 20);
    let address = heap
        .allocate_indexable(class, 10000, subspace, AllocationFlags::default(), &mut allocator)
        .unwrap();
    let object = IndexableObject::from_address(address);
    assert_eq!(object.layout(&heap), ArrayLayout::Discontiguous);
    assert_eq!(object.external_leaf_count(&heap), 3);
    // The third leaf is only 1808 bytes live out of 4096 allocated.
    assert_eq!(object.arraylet_size(&heap, 2), 1808);
    assert_eq!(object.external_leaf_bytes(&heap), 10000);
    assert!(object.leaves_in_arraylet_range(&heap));
}

#[test]
fn a_zero_element_array_is_a_bare_discontiguous_header() {
    let (mut heap, subspace, class) = byte_array_heap(4096);
    let mut allocator = ScriptedAllocator::new(1 << 20);
    let address = heap
        .allocate_indexable(class, 0, subspace, AllocationFlags::default(), &mut allocator)
        .unwrap();
    let object = IndexableObject::from_address(address);
    assert_eq!(object.layout(&heap), ArrayLayout::Discontiguous);
    assert_eq!(object.size_in_elements(&heap), 0);
    assert_eq!(object.leaf_count(&heap), 0);
    assert_eq!(object.total_footprint(&heap), 16);
    assert!(allocator.leaves_handed_out.is_empty());
    assert_eq!(heap.bytes_allocated(subspace), 16);
}

#[test]
fn both_size_header_fields_are_never_live_at_once() {
    let (mut heap, subspace, class) = byte_array_heap(2000);
    let mut allocator = BumpAllocator::new(1 << 20);
    for element_count in [0u32, 100, 10000, 3 * 4096] {
        let address = heap
            .allocate_indexable(class, element_count, subspace, AllocationFlags::default(), &mut allocator)
            .unwrap();
        let contiguous = heap.read_u32(address.offset_by(8));
        let discontiguous = heap.read_u32(address.offset_by(12));
        assert!(
            contiguous == 0 || discontiguous == 0,
            "both size fields live for element count {element_count}"
        );
        let object = IndexableObject::from_address(address);
        assert_eq!(object.size_in_elements(&heap), element_count);
    }
}

#[test]
fn a_spine_relocation_between_leaves_does_not_lose_slots() {
    let (mut heap, subspace, class) = byte_array_heap(1800);
    // Discontiguous, three leaves; the collector moves the spine
    // between attaching leaf 1 and leaf 2.
    let mut allocator = ScriptedAllocator::new(1 << 20).relocating_before_leaf(2);
    let address = heap
        .allocate_indexable(class, 3 * 4096, subspace, AllocationFlags::default(), &mut allocator)
        .unwrap();
    assert_eq!(allocator.spines_seen.len(), 2);
    let original = allocator.spines_seen[0];
    let relocated = allocator.spines_seen[1];
    assert_ne!(original, relocated);
    assert_eq!(address, relocated, "the finished object is the moved spine");

    let object = IndexableObject::from_address(address);
    assert_eq!(object.layout(&heap), ArrayLayout::Discontiguous);
    for (index, leaf) in allocator.leaves_handed_out.iter().enumerate() {
        assert_eq!(
            object.arrayoid_slot(&heap, index as u64),
            Some(*leaf),
            "slot {index} must reference its leaf through the moved spine"
        );
    }
    assert!(object.leaves_in_arraylet_range(&heap));
}

#[test]
fn a_failed_leaf_abandons_the_object_as_floating_garbage() {
    let (mut heap, subspace, class) = byte_array_heap(1800);
    let mut allocator = ScriptedAllocator::new(1 << 20).failing_at_leaf(2);
    let result = heap.allocate_indexable(
        class,
        3 * 4096,
        subspace,
        AllocationFlags::default(),
        &mut allocator,
    );
    assert_eq!(
        result,
        Err(AllocationError::LeafExhausted {
            bytes_requested: 40 + 3 * 4096,
            leaves_attached: 2,
        })
    );
    // The abandoned spine is unreferenced but intact: its header and
    // the two attached slots still parse, and the missing slot is
    // null, so a scanner walking garbage does not crash.
    let spine = allocator.spines_seen[0];
    let abandoned = IndexableObject::from_address(spine);
    assert_eq!(abandoned.layout(&heap), ArrayLayout::Discontiguous);
    assert_eq!(
        abandoned.arrayoid_slot(&heap, 0),
        Some(allocator.leaves_handed_out[0])
    );
    assert_eq!(
        abandoned.arrayoid_slot(&heap, 1),
        Some(allocator.leaves_handed_out[1])
    );
    assert_eq!(abandoned.arrayoid_slot(&heap, 2), None);
    assert!(abandoned.leaves_in_arraylet_range(&heap));
}

#[test]
fn an_abandoned_hybrid_object_reports_no_spine_remainder() {
    let (mut heap, subspace, class) = byte_array_heap(2000);
    // 10000 bytes is Hybrid at this threshold: two external leaves plus
    // an in-spine remainder. Fail the second leaf, before the final
    // slot's in-spine offset is ever written.
    let mut allocator = ScriptedAllocator::new(1 << 20).failing_at_leaf(1);
    let result = heap.allocate_indexable(
        class,
        10_000,
        subspace,
        AllocationFlags::default(),
        &mut allocator,
    );
    assert_eq!(
        result,
        Err(AllocationError::LeafExhausted {
            bytes_requested: 1848 + 2 * 4096,
            leaves_attached: 1,
        })
    );
    let abandoned = IndexableObject::from_address(allocator.spines_seen[0]);
    assert_eq!(abandoned.layout(&heap), ArrayLayout::Hybrid);
    assert_eq!(
        abandoned.arrayoid_slot(&heap, 0),
        Some(allocator.leaves_handed_out[0])
    );
    assert_eq!(abandoned.arrayoid_slot(&heap, 1), None);
    // The final slot still holds raw zero; it must not decode as a
    // remainder at the object's own header.
    assert_eq!(abandoned.arrayoid_slot(&heap, 2), None);
    assert_eq!(abandoned.spine_remainder_address(&heap), None);
}

#[test]
fn an_exhausted_spine_consumes_nothing() {
    let (mut heap, subspace, class) = byte_array_heap(1800);
    let mut allocator = BumpAllocator::new(0);
    let result = heap.allocate_indexable(
        class,
        3 * 4096,
        subspace,
        AllocationFlags::default(),
        &mut allocator,
    );
    assert_eq!(
        result,
        Err(AllocationError::SpineExhausted {
            bytes_requested: 40 + 3 * 4096,
        })
    );
    assert_eq!(heap.bytes_allocated(subspace), 0);
}

#[test]
fn the_builder_and_the_object_model_agree_on_footprints() {
    let (mut heap, subspace, class) = byte_array_heap(2000);
    for element_count in [1u32, 100, 4096, 8192, 10000, 3 * 4096, 100_000] {
        let mut model = IndexableObjectAllocationModel::new(
            &heap,
            class,
            element_count,
            subspace,
            AllocationFlags::default(),
        );
        assert!(model.initialize_allocate_description(&heap));
        let spine_bytes = model.description().spine_bytes();
        let bytes_requested = model.description().bytes_requested();
        let mut allocator = BumpAllocator::new(1 << 24);
        let address = model
            .initialize_indexable_object(&mut heap, &mut allocator)
            .unwrap();
        let object = IndexableObject::from_address(address);
        assert_eq!(object.size_in_bytes_with_header(&heap), spine_bytes);
        assert_eq!(object.total_footprint(&heap), bytes_requested);
    }
}

#[test]
fn hash_slots_are_reserved_and_stable() {
    let (mut heap, subspace, class) = byte_array_heap(2000);
    let flags = AllocationFlags {
        precompute_hash: true,
        ..AllocationFlags::default()
    };
    let mut allocator = BumpAllocator::new(1 << 20);
    for element_count in [5u32, 10000] {
        let address = heap
            .allocate_indexable(class, element_count, subspace, flags, &mut allocator)
            .unwrap();
        let object = IndexableObject::from_address(address);
        assert!(object.has_hash_slot(&heap));
        let hash = object.hash_code(&heap).unwrap();
        assert_eq!(object.hash_code(&heap), Some(hash));
        assert_eq!(hash, heap.identity_hash(address));
    }
    // Unhashed objects carry neither the flag nor the slot.
    let plain = heap
        .allocate_indexable(class, 5, subspace, AllocationFlags::default(), &mut allocator)
        .unwrap();
    let object = IndexableObject::from_address(plain);
    assert!(!object.has_hash_slot(&heap));
    assert_eq!(object.hash_code(&heap), None);
}

#[test]
fn compressed_and_full_references_agree_on_layout() {
    for mode in [ReferenceMode::Full, ReferenceMode::Compressed { shift: 3 }] {
        let mut heap = Heap::new(HeapParameters {
            reference_mode: mode,
            ..HeapParameters::default()
        });
        let subspace = heap.add_subspace("tenure", 2000);
        let class = heap.register_class(ArrayClass::new("byte[]", 1, ElementKind::Primitive));
        let mut allocator = BumpAllocator::new(1 << 20);
        let address = heap
            .allocate_indexable(class, 10000, subspace, AllocationFlags::default(), &mut allocator)
            .unwrap();
        let object = IndexableObject::from_address(address);
        assert_eq!(object.layout(&heap), ArrayLayout::Hybrid);
        assert_eq!(object.external_leaf_count(&heap), 2);
        for leaf in object.leaf_addresses(&heap).flatten() {
            assert_eq!(leaf.raw() % 8, 0, "leaf addresses survive slot encoding");
        }
        assert!(object.leaves_in_arraylet_range(&heap));
    }
}

#[test]
fn off_heap_arrays_map_one_contiguous_sparse_range() {
    let mut heap = Heap::new(HeapParameters {
        off_heap_data: true,
        ..HeapParameters::default()
    });
    let subspace = heap.add_subspace("tenure", 2000);
    let class = heap.register_class(ArrayClass::new("byte[]", 1, ElementKind::Primitive));
    let mut allocator = ScriptedAllocator::new(1 << 20);
    let address = heap
        .allocate_indexable(class, 10000, subspace, AllocationFlags::default(), &mut allocator)
        .unwrap();
    let object = IndexableObject::from_address(address);
    // Camouflaged discontiguous: tagged contiguous, data elsewhere.
    assert_eq!(object.layout(&heap), ArrayLayout::InlineContiguous);
    let data = object.contiguous_data_address(&heap).unwrap();
    assert!(data.is_sparse());
    assert_ne!(data, address.offset_by(heap.geometry().contiguous_header_size()));

    let sparse = heap.sparse().unwrap();
    assert!(sparse.is_valid_data_address(data));
    assert!(sparse.is_valid_data_address(data.offset_by(9999)));
    assert!(!sparse.is_valid_data_address(data.offset_by(10000)));
    assert_eq!(sparse.decommitted_leaf_bytes(), 3 * 4096);

    // Every bookkeeping leaf was handed out and then decommitted.
    assert_eq!(allocator.leaves_handed_out.len(), 3);
    for leaf in &allocator.leaves_handed_out {
        assert!(!heap.region_is_committed(*leaf));
    }

    // The mapped range is addressable as one contiguous buffer.
    heap.write_u64(data, 0x1122_3344_5566_7788);
    heap.write_u32(data.offset_by(9996), 42);
    assert_eq!(heap.read_u64(data), 0x1122_3344_5566_7788);
    assert_eq!(heap.read_u32(data.offset_by(9996)), 42);

    // The spine footprint is a bare header; the data bytes count as
    // external.
    assert_eq!(object.size_in_bytes_with_header(&heap), 24);
    assert_eq!(object.total_footprint(&heap), 24 + 10000);
}

#[test]
fn off_heap_allocation_requires_collection_points() {
    let mut heap = Heap::new(HeapParameters {
        off_heap_data: true,
        ..HeapParameters::default()
    });
    let subspace = heap.add_subspace("tenure", 2000);
    let class = heap.register_class(ArrayClass::new("byte[]", 1, ElementKind::Primitive));
    let flags = AllocationFlags {
        collection_permitted: false,
        ..AllocationFlags::default()
    };
    let mut allocator = BumpAllocator::new(1 << 20);
    let result = heap.allocate_indexable(class, 10000, subspace, flags, &mut allocator);
    assert!(matches!(
        result,
        Err(AllocationError::CollectionNotPermitted { .. })
    ));
    assert_eq!(heap.bytes_allocated(subspace), 0);
    // Small arrays stay header-adjacent and need no collection point.
    let small = heap.allocate_indexable(class, 64, subspace, flags, &mut allocator).unwrap();
    let object = IndexableObject::from_address(small);
    assert_eq!(
        object.contiguous_data_address(&heap),
        Some(small.offset_by(heap.geometry().contiguous_header_size()))
    );
}

#[test]
fn a_failed_off_heap_leaf_abandons_before_mapping() {
    let mut heap = Heap::new(HeapParameters {
        off_heap_data: true,
        ..HeapParameters::default()
    });
    let subspace = heap.add_subspace("tenure", 2000);
    let class = heap.register_class(ArrayClass::new("byte[]", 1, ElementKind::Primitive));
    let mut allocator = ScriptedAllocator::new(1 << 20).failing_at_leaf(1);
    let result = heap.allocate_indexable(
        class,
        10000,
        subspace,
        AllocationFlags::default(),
        &mut allocator,
    );
    assert!(matches!(
        result,
        Err(AllocationError::LeafExhausted {
            leaves_attached: 1,
            ..
        })
    ));
    assert_eq!(heap.sparse().unwrap().live_range_count(), 0);
}

#[test]
fn leaf_counts_pack_tightly_for_random_sizes() {
    let geometry = Heap::new(HeapParameters::default()).geometry();
    let leaf_size = geometry.leaf_size();
    let mut rng = rand::rng();
    for _ in 0..10_000 {
        let data_size = rand::Rng::random_range(&mut rng, 1..=1u64 << 40);
        let leaf_count = geometry.leaf_count(data_size);
        assert!(leaf_count * leaf_size >= data_size);
        assert!((leaf_count - 1) * leaf_size < data_size);
    }
}

#[test]
fn layout_selection_is_total_and_idempotent() {
    let (heap, subspace, _class) = byte_array_heap(2000);
    let geometry = heap.geometry();
    let policy = heap.layout_policy(subspace);
    let mut rng = rand::rng();
    for _ in 0..10_000 {
        let data_size = rand::Rng::random_range(&mut rng, 0..=1u64 << 40);
        let first = arraylet_heap::select_layout(&geometry, policy, data_size, false, false);
        let second = arraylet_heap::select_layout(&geometry, policy, data_size, false, false);
        assert_eq!(first, second);
        assert!(matches!(
            first,
            ArrayLayout::InlineContiguous | ArrayLayout::Discontiguous | ArrayLayout::Hybrid
        ));
    }
}
