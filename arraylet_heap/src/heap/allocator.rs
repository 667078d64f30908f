// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::{
    alloc::AllocateDescription,
    heap::{Heap, HeapAddress},
};

/// The raw byte allocator the allocation engine drives.
///
/// Either call may trigger a garbage collection as a side effect, and a
/// collection may relocate the spine currently being built. An
/// implementation that moves objects must store the spine's new address
/// into the description before returning; the engine re-derives every
/// object address from the description after each call and never reuses
/// an address captured beforehand.
pub trait RawAllocator {
    /// Allocate the spine's raw bytes, as sized by the description.
    /// Returns `None` on exhaustion; no memory is consumed in that
    /// case.
    fn allocate_spine(
        &mut self,
        heap: &mut Heap,
        description: &mut AllocateDescription,
    ) -> Option<HeapAddress>;

    /// Allocate one fixed-size leaf block. Returns `None` on
    /// exhaustion; the engine abandons the partially built object.
    fn allocate_leaf(
        &mut self,
        heap: &mut Heap,
        description: &mut AllocateDescription,
    ) -> Option<HeapAddress>;
}

/// Bump allocator over subspace regions, with a byte budget standing in
/// for heap exhaustion. Never collects, so it never relocates a spine.
#[derive(Debug)]
pub struct BumpAllocator {
    budget: u64,
}

impl BumpAllocator {
    pub fn new(budget: u64) -> Self {
        Self { budget }
    }

    pub fn remaining_budget(&self) -> u64 {
        self.budget
    }
}

impl RawAllocator for BumpAllocator {
    fn allocate_spine(
        &mut self,
        heap: &mut Heap,
        description: &mut AllocateDescription,
    ) -> Option<HeapAddress> {
        let bytes = description.spine_bytes();
        if self.budget < bytes {
            return None;
        }
        let alignment = heap.geometry().spine_alignment();
        let spine = heap.allocate_bytes(description.subspace(), bytes, alignment)?;
        self.budget -= bytes;
        description.set_spine(Some(spine));
        Some(spine)
    }

    fn allocate_leaf(
        &mut self,
        heap: &mut Heap,
        description: &mut AllocateDescription,
    ) -> Option<HeapAddress> {
        let bytes = heap.geometry().leaf_size();
        if self.budget < bytes {
            return None;
        }
        let leaf = heap.allocate_leaf_block(description.subspace())?;
        self.budget -= bytes;
        Some(leaf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        alloc::AllocationFlags,
        class::{ArrayClass, ElementKind},
        heap::HeapParameters,
    };

    #[test]
    fn the_budget_is_charged_before_any_bytes_move() {
        let mut heap = Heap::new(HeapParameters::default());
        let subspace = heap.add_subspace("tenure", 1 << 11);
        let class = heap.register_class(ArrayClass::new("byte[]", 1, ElementKind::Primitive));
        let mut allocator = BumpAllocator::new(100);
        let result = heap.allocate_indexable(
            class,
            64,
            subspace,
            AllocationFlags::default(),
            &mut allocator,
        );
        assert!(result.is_ok());
        // 64 data bytes behind a 24-byte header, adjusted to 88.
        assert_eq!(allocator.remaining_budget(), 12);
        let result = heap.allocate_indexable(
            class,
            64,
            subspace,
            AllocationFlags::default(),
            &mut allocator,
        );
        assert!(result.is_err());
        assert_eq!(allocator.remaining_budget(), 12);
    }
}
