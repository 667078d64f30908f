// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Arraylet-based layout and allocation engine for variable-length
//! objects in a managed heap.
//!
//! An indexable object is physically one of three shapes, picked once
//! at allocation time by the [`layout`] policy: fully inline
//! ([`InlineContiguous`]), split into fixed-size external leaves
//! referenced from an arrayoid in the spine ([`Discontiguous`]), or
//! both, with the partial last leaf folded into the spine
//! ([`Hybrid`]). The [`geometry`] module does the pure size
//! arithmetic, [`alloc`] plans and executes the multi-step allocation
//! sequence against a [`RawAllocator`] that may relocate the object
//! between steps, and [`object_model`] answers the queries scanners
//! and copying collectors need to walk the result. The [`sparse`]
//! module backs the off-heap mode, where a logically huge array is
//! presented as one pointer-contiguous buffer mapped outside the
//! region space.
//!
//! [`InlineContiguous`]: layout::ArrayLayout::InlineContiguous
//! [`Discontiguous`]: layout::ArrayLayout::Discontiguous
//! [`Hybrid`]: layout::ArrayLayout::Hybrid
//! [`RawAllocator`]: heap::RawAllocator

pub mod alloc;
pub mod class;
pub mod geometry;
pub mod heap;
pub mod layout;
pub mod object_model;
pub mod sparse;

pub use alloc::{
    AllocateDescription, AllocationError, AllocationFlags, IndexableObjectAllocationModel,
};
pub use class::{ArrayClass, ClassId, ClassTable, ElementKind};
pub use geometry::{ArrayletGeometry, SpineSizing};
pub use heap::{
    BumpAllocator, Heap, HeapAddress, HeapParameters, RawAllocator, ReferenceMode, SubspaceId,
};
pub use layout::{ArrayLayout, LayoutPolicy, UNLIMITED_SPINE_SIZE, select_layout};
pub use object_model::IndexableObject;
pub use sparse::SparseVirtualHeap;
