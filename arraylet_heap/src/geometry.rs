// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Arraylet size and shape arithmetic.
//!
//! An indexable object is split into a spine, which carries the header
//! and possibly some element data, and zero or more leaves of a fixed
//! power-of-two size holding the rest. [`ArrayletGeometry`] answers
//! every sizing question about that split: how many leaves a data size
//! needs, how large the spine is under each layout, and where the
//! header fields and the arrayoid live. All arithmetic here is pure;
//! nothing in this module touches heap memory.

use crate::{
    heap::{HeapParameters, ReferenceMode},
    layout::ArrayLayout,
};

/// Largest data size the engine will lay out, in bytes. Capping the
/// data size here leaves enough headroom that spine and padding sums
/// downstream can use plain arithmetic without wrapping.
pub const MAXIMUM_DATA_SIZE: u64 = u64::MAX >> 3;

/// Width in bytes of the optional identity hash slot.
pub(crate) const HASH_SLOT_BYTES: u64 = 4;

pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Derived sizing constants for one heap configuration.
#[derive(Clone, Copy, Debug)]
pub struct ArrayletGeometry {
    mode: ReferenceMode,
    leaf_log2: u32,
    object_alignment: u64,
    minimum_object_size: u64,
    spine_growth_reserve: u64,
}

impl ArrayletGeometry {
    pub fn from_parameters(parameters: &HeapParameters) -> Self {
        Self {
            mode: parameters.reference_mode,
            leaf_log2: parameters.arraylet_leaf_log2,
            object_alignment: parameters.object_alignment,
            minimum_object_size: parameters.minimum_object_size,
            spine_growth_reserve: parameters.spine_growth_reserve,
        }
    }

    pub fn reference_mode(&self) -> ReferenceMode {
        self.mode
    }

    /// Physical width of one reference slot, and therefore of one
    /// arrayoid entry.
    pub fn slot_width(&self) -> u64 {
        self.mode.slot_width()
    }

    /// Size in bytes of one arraylet leaf.
    pub fn leaf_size(&self) -> u64 {
        1u64 << self.leaf_log2
    }

    pub fn leaf_log2(&self) -> u32 {
        self.leaf_log2
    }

    fn leaf_size_mask(&self) -> u64 {
        self.leaf_size() - 1
    }

    pub fn object_alignment(&self) -> u64 {
        self.object_alignment
    }

    /// Bytes the layout policy holds back so a contiguous spine can
    /// still grow in place after a collection.
    pub fn spine_growth_reserve(&self) -> u64 {
        self.spine_growth_reserve
    }

    /// Total element data size for `element_count` elements of
    /// `stride` bytes each. Returns `None` when the product wraps or
    /// exceeds [`MAXIMUM_DATA_SIZE`], in which case the array is not
    /// representable and allocation must be rejected.
    pub fn data_size_in_bytes(&self, element_count: u32, stride: u64) -> Option<u64> {
        let data_size = u64::from(element_count).checked_mul(stride)?;
        if data_size > MAXIMUM_DATA_SIZE {
            return None;
        }
        Some(data_size)
    }

    /// Number of leaves needed to hold `data_size` bytes, counting a
    /// trailing partial leaf as one. The form below never overflows:
    /// the remainder term contributes exactly one when `data_size` is
    /// not a whole multiple of the leaf size, and zero otherwise.
    pub fn leaf_count(&self, data_size: u64) -> u64 {
        let mask = self.leaf_size_mask();
        (data_size >> self.leaf_log2) + (((data_size & mask) + mask) >> self.leaf_log2)
    }

    /// Bytes of the final leaf that are actually used, or zero when
    /// `data_size` is a whole multiple of the leaf size.
    pub fn last_leaf_remainder(&self, data_size: u64) -> u64 {
        data_size & self.leaf_size_mask()
    }

    /// Used size of the leaf at `index` for an object of `data_size`
    /// bytes. Every leaf but the last is full.
    pub fn arraylet_size(&self, data_size: u64, index: u64) -> u64 {
        let leaf_count = self.leaf_count(data_size);
        debug_assert!(index < leaf_count);
        if index + 1 < leaf_count {
            self.leaf_size()
        } else {
            data_size - index * self.leaf_size()
        }
    }

    /// Header size of the contiguous shape: class word, 32-bit element
    /// count, then a full-width data address, padded so the data
    /// address sits on an 8-byte boundary.
    pub fn contiguous_header_size(&self) -> u64 {
        match self.mode {
            ReferenceMode::Compressed { .. } => 16,
            ReferenceMode::Full => 24,
        }
    }

    /// Header size of the discontiguous shape: class word, the
    /// must-be-zero word, then the 32-bit element count.
    pub fn discontiguous_header_size(&self) -> u64 {
        match self.mode {
            ReferenceMode::Compressed { .. } => 12,
            ReferenceMode::Full => 16,
        }
    }

    pub fn header_size(&self, layout: ArrayLayout) -> u64 {
        match layout {
            ArrayLayout::InlineContiguous => self.contiguous_header_size(),
            ArrayLayout::Discontiguous | ArrayLayout::Hybrid => self.discontiguous_header_size(),
            ArrayLayout::Illegal => panic!("illegal layout has no header"),
        }
    }

    /// Byte offset of the 32-bit element count in a contiguous header.
    pub(crate) fn contiguous_size_offset(&self) -> u64 {
        self.slot_width()
    }

    /// Byte offset of the word that is zero in every discontiguous
    /// header. It overlays the contiguous element count, which is how
    /// the two shapes stay distinguishable after the fact.
    pub(crate) fn must_be_zero_offset(&self) -> u64 {
        self.slot_width()
    }

    pub(crate) fn discontiguous_size_offset(&self) -> u64 {
        self.slot_width() + 4
    }

    pub(crate) fn data_address_offset(&self) -> u64 {
        match self.mode {
            ReferenceMode::Compressed { .. } => 8,
            ReferenceMode::Full => 16,
        }
    }

    /// Byte offset of the first arrayoid slot, relative to the object.
    pub(crate) fn arrayoid_offset(&self) -> u64 {
        self.discontiguous_header_size()
    }

    /// Alignment required for element data stored in the spine of a
    /// Hybrid object. Wide elements ask for 8 bytes; a compressed
    /// reference shift demands that every slot-encoded address keep its
    /// low bits clear, and the in-spine data pointer is slot-encoded.
    pub(crate) fn hybrid_data_alignment(&self, align_data: bool) -> u64 {
        let element_alignment = if align_data { 8 } else { 1 };
        element_alignment.max(self.mode.slot_alignment())
    }

    /// Worst-case padding between the arrayoid and in-spine data.
    pub(crate) fn spine_padding(&self, align_data: bool) -> u64 {
        self.hybrid_data_alignment(align_data)
            .saturating_sub(self.slot_width())
    }

    /// Offset of the in-spine remainder data of a Hybrid object,
    /// relative to the object.
    pub(crate) fn hybrid_remainder_offset(&self, leaf_count: u64, align_data: bool) -> u64 {
        let arrayoid_end = self.arrayoid_offset() + leaf_count * self.slot_width();
        align_up(arrayoid_end, self.hybrid_data_alignment(align_data))
    }

    /// Spine size in bytes, not counting the header.
    ///
    /// A contiguous spine carries all element data. A discontiguous
    /// spine carries only the arrayoid. A hybrid spine carries the
    /// arrayoid followed by the partial last leaf; its final arrayoid
    /// slot points at that in-spine remainder rather than at a leaf.
    pub fn spine_size_without_header(
        &self,
        layout: ArrayLayout,
        leaf_count: u64,
        data_size: u64,
        align_data: bool,
    ) -> u64 {
        match layout {
            ArrayLayout::InlineContiguous => data_size,
            ArrayLayout::Discontiguous | ArrayLayout::Hybrid => {
                if data_size == 0 {
                    return 0;
                }
                let arrayoid = leaf_count * self.slot_width();
                let in_spine = if layout == ArrayLayout::Hybrid {
                    self.last_leaf_remainder(data_size)
                } else {
                    0
                };
                self.spine_padding(align_data) + arrayoid + in_spine
            }
            ArrayLayout::Illegal => panic!("illegal layout has no spine"),
        }
    }

    /// Spine size in bytes including the header, before adjustment.
    pub fn spine_size(
        &self,
        layout: ArrayLayout,
        leaf_count: u64,
        data_size: u64,
        align_data: bool,
    ) -> u64 {
        self.header_size(layout)
            + self.spine_size_without_header(layout, leaf_count, data_size, align_data)
    }

    /// Round a raw object size up to the heap's object alignment and
    /// enforce the minimum object size.
    pub fn adjust_size(&self, size: u64) -> u64 {
        align_up(size, self.object_alignment).max(self.minimum_object_size)
    }

    /// Alignment a spine allocation must satisfy so its address can be
    /// stored in a reference slot.
    pub(crate) fn spine_alignment(&self) -> u64 {
        self.object_alignment.max(self.mode.slot_alignment())
    }

    /// Exact byte requirement of one spine allocation, including the
    /// header, alignment adjustment, and the optional hash slot.
    ///
    /// `data_adjacent` is false only for a contiguous object whose data
    /// lives off-heap; its spine then carries nothing but the header.
    /// The hash slot is appended after everything else, unless the
    /// alignment slack of the adjusted size already covers it.
    pub fn spine_allocation_size(
        &self,
        layout: ArrayLayout,
        leaf_count: u64,
        data_size: u64,
        align_data: bool,
        hashed: bool,
        data_adjacent: bool,
    ) -> SpineSizing {
        let body = if data_adjacent {
            self.spine_size_without_header(layout, leaf_count, data_size, align_data)
        } else {
            0
        };
        let raw = self.header_size(layout) + body;
        if !hashed {
            return SpineSizing {
                bytes: self.adjust_size(raw),
                hash_slot_offset: None,
            };
        }
        let offset = align_up(raw, HASH_SLOT_BYTES);
        let adjusted = self.adjust_size(raw);
        let bytes = if adjusted >= offset + HASH_SLOT_BYTES {
            adjusted
        } else {
            self.adjust_size(offset + HASH_SLOT_BYTES)
        };
        SpineSizing {
            bytes,
            hash_slot_offset: Some(offset),
        }
    }
}

/// Sized spine request: the bytes to ask the raw allocator for and,
/// when a hash slot was requested, where in the spine it lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpineSizing {
    pub bytes: u64,
    pub hash_slot_offset: Option<u64>,
}
