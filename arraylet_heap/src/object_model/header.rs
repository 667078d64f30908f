// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Raw header field access.
//!
//! The single place that knows which header field sits at which offset
//! and width. Both the allocation sequence and the consumer queries go
//! through here, so the two can never disagree about the binary shape.

use crate::{
    class::ClassId,
    heap::{Heap, HeapAddress, ReferenceMode},
};

/// Class-word flag: the object carries a precomputed identity hash
/// slot.
pub(crate) const FLAG_HASHED: u8 = 0x01;

/// The class word packs `ClassId << 8 | flags`; the low byte is free
/// because class ids are kept below the 24-bit table limit.
fn class_word_value(class: ClassId, flags: u8) -> u64 {
    (u64::from(class.into_raw()) << 8) | u64::from(flags)
}

pub(crate) fn write_class_word(heap: &mut Heap, object: HeapAddress, class: ClassId, flags: u8) {
    let word = class_word_value(class, flags);
    match heap.geometry().reference_mode() {
        ReferenceMode::Full => heap.write_u64(object, word),
        ReferenceMode::Compressed { .. } => heap.write_u32(object, word as u32),
    }
}

pub(crate) fn read_class_word(heap: &Heap, object: HeapAddress) -> u64 {
    match heap.geometry().reference_mode() {
        ReferenceMode::Full => heap.read_u64(object),
        ReferenceMode::Compressed { .. } => u64::from(heap.read_u32(object)),
    }
}

pub(crate) fn class_id(heap: &Heap, object: HeapAddress) -> ClassId {
    let raw = (read_class_word(heap, object) >> 8) as u32;
    match ClassId::from_raw(raw) {
        Some(id) => id,
        None => panic!("object header holds a null class id"),
    }
}

pub(crate) fn flags(heap: &Heap, object: HeapAddress) -> u8 {
    (read_class_word(heap, object) & 0xff) as u8
}

/// Write a contiguous-shape header: class word, non-zero element count,
/// full-width data address.
pub(crate) fn write_contiguous_header(
    heap: &mut Heap,
    object: HeapAddress,
    class: ClassId,
    flags: u8,
    element_count: u32,
) {
    debug_assert!(element_count != 0, "zero-length arrays use the discontiguous shape");
    let geometry = heap.geometry();
    write_class_word(heap, object, class, flags);
    heap.write_u32(object.offset_by(geometry.contiguous_size_offset()), element_count);
}

/// Write a discontiguous-shape header: class word, the must-be-zero
/// word, element count. Covers both Discontiguous and Hybrid objects.
pub(crate) fn write_discontiguous_header(
    heap: &mut Heap,
    object: HeapAddress,
    class: ClassId,
    flags: u8,
    element_count: u32,
) {
    let geometry = heap.geometry();
    write_class_word(heap, object, class, flags);
    heap.write_u32(object.offset_by(geometry.must_be_zero_offset()), 0);
    heap.write_u32(
        object.offset_by(geometry.discontiguous_size_offset()),
        element_count,
    );
}

pub(crate) fn contiguous_size(heap: &Heap, object: HeapAddress) -> u32 {
    heap.read_u32(object.offset_by(heap.geometry().contiguous_size_offset()))
}

pub(crate) fn discontiguous_size(heap: &Heap, object: HeapAddress) -> u32 {
    heap.read_u32(object.offset_by(heap.geometry().discontiguous_size_offset()))
}

/// The contiguous shape's data address field. Always full width, even
/// under compressed references, because it may hold a sparse off-heap
/// address.
pub(crate) fn data_address(heap: &Heap, object: HeapAddress) -> Option<HeapAddress> {
    HeapAddress::from_raw(heap.read_u64(object.offset_by(heap.geometry().data_address_offset())))
}

pub(crate) fn write_data_address(heap: &mut Heap, object: HeapAddress, data: HeapAddress) {
    let offset = heap.geometry().data_address_offset();
    heap.write_u64(object.offset_by(offset), data.raw());
}

fn arrayoid_slot_address(heap: &Heap, object: HeapAddress, index: u64) -> HeapAddress {
    let geometry = heap.geometry();
    object.offset_by(geometry.arrayoid_offset() + index * geometry.slot_width())
}

/// Store a leaf address (or null) into arrayoid slot `index` at the
/// active reference width.
pub(crate) fn write_arrayoid_slot(
    heap: &mut Heap,
    object: HeapAddress,
    index: u64,
    leaf: Option<HeapAddress>,
) {
    let encoded = heap.geometry().reference_mode().encode_slot(leaf);
    write_arrayoid_slot_raw(heap, object, index, encoded);
}

/// Store an uninterpreted value into arrayoid slot `index`. The Hybrid
/// final slot uses this to record an in-spine byte offset.
pub(crate) fn write_arrayoid_slot_raw(heap: &mut Heap, object: HeapAddress, index: u64, raw: u64) {
    let slot = arrayoid_slot_address(heap, object, index);
    match heap.geometry().reference_mode() {
        ReferenceMode::Full => heap.write_u64(slot, raw),
        ReferenceMode::Compressed { .. } => {
            debug_assert!(raw <= u64::from(u32::MAX));
            heap.write_u32(slot, raw as u32)
        }
    }
}

pub(crate) fn read_arrayoid_slot_raw(heap: &Heap, object: HeapAddress, index: u64) -> u64 {
    let slot = arrayoid_slot_address(heap, object, index);
    match heap.geometry().reference_mode() {
        ReferenceMode::Full => heap.read_u64(slot),
        ReferenceMode::Compressed { .. } => u64::from(heap.read_u32(slot)),
    }
}

/// Decode arrayoid slot `index` as a leaf reference. Null slots come
/// back as `None`; a partially built object is still walkable.
pub(crate) fn read_arrayoid_slot(heap: &Heap, object: HeapAddress, index: u64) -> Option<HeapAddress> {
    heap.geometry()
        .reference_mode()
        .decode_slot(read_arrayoid_slot_raw(heap, object, index))
}
