// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Layout tags and the spine size policy that picks between them.

use crate::{geometry::ArrayletGeometry, heap::HeapAddress};

/// Threshold value meaning spines may grow without bound, so every
/// array with data is laid out contiguously.
pub const UNLIMITED_SPINE_SIZE: u64 = u64::MAX;

/// How an indexable object's data is distributed between its spine and
/// external leaves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArrayLayout {
    /// The requested size cannot be represented. Never stored in a
    /// header; it only flows through allocation as a rejection.
    Illegal,
    /// All element data sits in the spine, directly after the header.
    InlineContiguous,
    /// All element data sits in external leaves; the spine holds only
    /// the arrayoid.
    Discontiguous,
    /// Full leaves are external, and the partial last leaf sits in the
    /// spine after the arrayoid. The final arrayoid slot points at it.
    Hybrid,
}

impl ArrayLayout {
    /// True for the layouts that use the discontiguous header shape.
    pub fn uses_discontiguous_header(self) -> bool {
        matches!(self, ArrayLayout::Discontiguous | ArrayLayout::Hybrid)
    }
}

/// Per-subspace layout policy: the spine size threshold and the address
/// range leaves are known to live in.
///
/// The range is widened monotonically as regions are committed; it
/// never shrinks, so a stale-but-wide range stays a safe validity
/// filter for leaf pointers.
#[derive(Clone, Copy, Debug)]
pub struct LayoutPolicy {
    largest_desirable_spine: u64,
    arraylet_range_base: Option<HeapAddress>,
    arraylet_range_top: Option<HeapAddress>,
}

impl LayoutPolicy {
    pub fn new(largest_desirable_spine: u64) -> Self {
        Self {
            largest_desirable_spine,
            arraylet_range_base: None,
            arraylet_range_top: None,
        }
    }

    /// Largest spine the policy is willing to allocate before breaking
    /// an array into leaves. [`UNLIMITED_SPINE_SIZE`] disables leaves.
    pub fn largest_desirable_spine(&self) -> u64 {
        self.largest_desirable_spine
    }

    /// Widen the known leaf address range to cover `[base, top)`. The
    /// base only ever moves down and the top only ever moves up.
    /// `largest_desirable_spine` is taken when the range is first
    /// initialized; later calls leave the threshold untouched.
    pub fn expand_range(&mut self, base: HeapAddress, top: HeapAddress, largest_desirable_spine: u64) {
        debug_assert!(base <= top);
        if self.arraylet_range_base.is_none() {
            self.largest_desirable_spine = largest_desirable_spine;
        }
        self.arraylet_range_base = Some(match self.arraylet_range_base {
            None => base,
            Some(current) => current.min(base),
        });
        self.arraylet_range_top = Some(match self.arraylet_range_top {
            None => top,
            Some(current) => current.max(top),
        });
    }

    pub fn arraylet_range(&self) -> Option<(HeapAddress, HeapAddress)> {
        match (self.arraylet_range_base, self.arraylet_range_top) {
            (Some(base), Some(top)) => Some((base, top)),
            _ => None,
        }
    }

    /// True when `address` falls inside the known leaf range. Used to
    /// sanity-check arrayoid slots.
    pub fn range_contains(&self, address: HeapAddress) -> bool {
        match self.arraylet_range() {
            Some((base, top)) => base <= address && address < top,
            None => false,
        }
    }
}

/// Pick the layout for `data_size` bytes of element data.
///
/// The contiguous test subtracts the growth reserve and header from the
/// threshold rather than adding them to the data size, so an enormous
/// `data_size` can never wrap the comparison. Zero-length arrays are
/// always discontiguous: their header shape must not be mistaken for a
/// contiguous object whose size field happens to be zero. When the heap
/// stores indexable data off-heap, every non-empty array reports
/// InlineContiguous regardless of size; the allocation path gives it a
/// contiguous data address backed by the sparse heap instead of leaves.
pub fn select_layout(
    geometry: &ArrayletGeometry,
    policy: &LayoutPolicy,
    data_size: u64,
    align_data: bool,
    off_heap_data: bool,
) -> ArrayLayout {
    let threshold = policy.largest_desirable_spine();
    let mut layout = if fits_adjacent(geometry, policy, data_size) {
        if data_size == 0 {
            ArrayLayout::Discontiguous
        } else {
            ArrayLayout::InlineContiguous
        }
    } else if geometry.last_leaf_remainder(data_size) > 0 {
        let leaf_count = geometry.leaf_count(data_size);
        let spine = geometry.spine_size(ArrayLayout::Hybrid, leaf_count, data_size, align_data);
        let spine_after_growth = geometry.adjust_size(spine).saturating_add(geometry.spine_growth_reserve());
        if spine_after_growth <= threshold {
            ArrayLayout::Hybrid
        } else {
            ArrayLayout::Discontiguous
        }
    } else {
        ArrayLayout::Discontiguous
    };
    if off_heap_data && data_size > 0 {
        layout = ArrayLayout::InlineContiguous;
    }
    layout
}

/// True when `data_size` is small enough to live directly after a
/// contiguous header under this policy. This is the same comparison the
/// contiguous arm of [`select_layout`] makes; the off-heap allocation
/// path reuses it to decide whether a forced-contiguous object's data
/// is header-adjacent or sparse-mapped.
pub(crate) fn fits_adjacent(
    geometry: &ArrayletGeometry,
    policy: &LayoutPolicy,
    data_size: u64,
) -> bool {
    let threshold = policy.largest_desirable_spine();
    let contiguous_limit = threshold
        .saturating_sub(geometry.spine_growth_reserve())
        .saturating_sub(geometry.contiguous_header_size());
    threshold == UNLIMITED_SPINE_SIZE || data_size <= contiguous_limit
}
