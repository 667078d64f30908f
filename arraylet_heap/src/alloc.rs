// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The indexable object allocation engine.
//!
//! Allocation is two-phase. [`IndexableObjectAllocationModel`] first
//! builds an [`AllocateDescription`], the byte-exact plan for the
//! attempt, without consuming memory; it then drives a [`RawAllocator`]
//! through the spine request and the per-leaf sequence. The raw
//! allocator may run a collection (and relocate the object being
//! built) inside either call, which is why the description's spine
//! field, not any captured address, names the object throughout.
//!
//! [`Heap::allocate_indexable`] wraps both phases behind a `Result`.
//!
//! [`RawAllocator`]: crate::heap::RawAllocator

mod description;
mod model;

pub use description::AllocateDescription;
pub use model::IndexableObjectAllocationModel;

use crate::{
    class::ClassId,
    heap::{Heap, HeapAddress, RawAllocator, SubspaceId},
};

/// Per-request allocation options.
#[derive(Clone, Copy, Debug)]
pub struct AllocationFlags {
    /// Reserve and fill an identity hash slot in the spine.
    pub precompute_hash: bool,
    /// Whether the caller tolerates a collection between allocation
    /// steps. Off-heap data allocation requires it.
    pub collection_permitted: bool,
}

impl Default for AllocationFlags {
    fn default() -> Self {
        Self {
            precompute_hash: false,
            collection_permitted: true,
        }
    }
}

/// Why an allocation attempt produced no object.
///
/// `SizeOverflow` and `CollectionNotPermitted` are detected before any
/// byte is consumed. `SpineExhausted` consumes nothing either; only
/// `LeafExhausted` leaves memory behind, as unreferenced floating
/// garbage for a future collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum AllocationError {
    #[error("{element_count} elements of stride {stride} exceed the representable array size")]
    SizeOverflow { element_count: u32, stride: u64 },
    #[error("off-heap allocation of {bytes_requested} bytes needs collection points")]
    CollectionNotPermitted { bytes_requested: u64 },
    #[error("spine allocation failed; {bytes_requested} bytes requested")]
    SpineExhausted { bytes_requested: u64 },
    #[error("leaf allocation failed after {leaves_attached} leaves; {bytes_requested} bytes requested")]
    LeafExhausted {
        bytes_requested: u64,
        leaves_attached: u64,
    },
}

impl Heap {
    /// Allocate and fully lay out one indexable object of
    /// `element_count` elements of `class` in `subspace`.
    pub fn allocate_indexable(
        &mut self,
        class: ClassId,
        element_count: u32,
        subspace: SubspaceId,
        flags: AllocationFlags,
        allocator: &mut dyn RawAllocator,
    ) -> Result<HeapAddress, AllocationError> {
        let mut model =
            IndexableObjectAllocationModel::new(self, class, element_count, subspace, flags);
        if !model.initialize_allocate_description(self) {
            return Err(model
                .failure()
                .expect("unallocatable description without a failure"));
        }
        match model.initialize_indexable_object(self, allocator) {
            Some(object) => Ok(object),
            None => Err(model
                .failure()
                .expect("abandoned allocation without a failure")),
        }
    }
}
