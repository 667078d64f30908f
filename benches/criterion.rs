// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};

use arraylet_heap::{
    AllocationFlags, ArrayClass, ArrayletGeometry, BumpAllocator, ClassId, ElementKind, Heap,
    HeapParameters, LayoutPolicy, SubspaceId, select_layout,
};

fn fresh_heap() -> (Heap, SubspaceId, ClassId) {
    let mut heap = Heap::new(HeapParameters::default());
    let subspace = heap.add_subspace("bench", 2048);
    let class = heap.register_class(ArrayClass::new("byte[]", 1, ElementKind::Primitive));
    (heap, subspace, class)
}

fn bench_layout_selection(c: &mut Criterion) {
    let geometry = ArrayletGeometry::from_parameters(&HeapParameters::default());
    let policy = LayoutPolicy::new(2048);
    // One data size per layout outcome, plus the empty-array path.
    for (name, data_size) in [
        ("Layout selection (empty)", 0u64),
        ("Layout selection (contiguous)", 512),
        ("Layout selection (hybrid)", 10_000),
        ("Layout selection (discontiguous)", 3 * 4096),
    ] {
        c.bench_function(name, |b| {
            b.iter(|| select_layout(&geometry, &policy, std::hint::black_box(data_size), false, false))
        });
    }
}

fn bench_description_build(c: &mut Criterion) {
    let (heap, subspace, class) = fresh_heap();
    for (name, element_count) in [
        ("Describe allocation (contiguous)", 512u32),
        ("Describe allocation (hybrid)", 10_000),
        ("Describe allocation (discontiguous)", 3 * 4096),
    ] {
        c.bench_function(name, |b| {
            b.iter(|| {
                let mut model = arraylet_heap::IndexableObjectAllocationModel::new(
                    &heap,
                    class,
                    std::hint::black_box(element_count),
                    subspace,
                    AllocationFlags::default(),
                );
                model.initialize_allocate_description(&heap)
            })
        });
    }
}

fn bench_full_allocation(c: &mut Criterion) {
    for (name, element_count) in [
        ("Allocate indexable (contiguous)", 512u32),
        ("Allocate indexable (hybrid)", 10_000),
        ("Allocate indexable (discontiguous)", 3 * 4096),
    ] {
        c.bench_function(name, |b| {
            b.iter_batched(
                || (fresh_heap(), BumpAllocator::new(1 << 20)),
                |((mut heap, subspace, class), mut allocator)| {
                    heap.allocate_indexable(
                        class,
                        element_count,
                        subspace,
                        AllocationFlags::default(),
                        &mut allocator,
                    )
                },
                BatchSize::SmallInput,
            )
        });
    }
}

criterion_group!(
    benches,
    bench_layout_selection,
    bench_description_build,
    bench_full_allocation
);
criterion_main!(benches);
