// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Array class descriptions.
//!
//! Every indexable object is an instance of a registered [`ArrayClass`],
//! which fixes the element stride and whether elements are references.
//! The first header word of every object packs the class id together
//! with per-object flag bits, so class ids are capped to 24 bits.

use core::num::NonZeroU32;
use std::ops::Index;

use crate::heap::ReferenceMode;

/// Largest registrable class id. The id must leave room for the flag
/// byte when packed into a 32-bit class word.
const MAX_CLASS_ID: u32 = (1 << 24) - 1;

/// Index of a registered array class in the heap's class table.
///
/// The inner value is offset by one so that `Option<ClassId>` fits in a
/// single u32.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ClassId(NonZeroU32);

const _CLASS_ID_SIZE_IS_U32: () = assert!(size_of::<ClassId>() == size_of::<u32>());
const _OPTION_CLASS_ID_SIZE_IS_U32: () = assert!(size_of::<Option<ClassId>>() == size_of::<u32>());

impl ClassId {
    pub(crate) const fn from_index(value: usize) -> Self {
        assert!(value < MAX_CLASS_ID as usize);
        let value = value as u32;
        match NonZeroU32::new(value + 1) {
            Some(value) => Self(value),
            None => unreachable!(),
        }
    }

    pub(crate) const fn into_index(self) -> usize {
        self.0.get() as usize - 1
    }

    /// The id as stored in the high bits of a class word.
    pub(crate) const fn into_raw(self) -> u32 {
        self.0.get()
    }

    pub(crate) const fn from_raw(value: u32) -> Option<Self> {
        match NonZeroU32::new(value) {
            Some(value) => Some(Self(value)),
            None => None,
        }
    }
}

impl core::fmt::Debug for ClassId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "ClassId({})", self.0.get())
    }
}

/// What an indexable object's elements are made of.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementKind {
    /// Elements are plain bytes; the collector never scans them.
    Primitive,
    /// Elements are reference slots of the heap's configured width.
    Reference,
}

/// Description of one indexable class: the element stride in bytes and
/// the element kind.
#[derive(Clone, Debug)]
pub struct ArrayClass {
    name: &'static str,
    stride: u64,
    kind: ElementKind,
}

impl ArrayClass {
    pub fn new(name: &'static str, stride: u64, kind: ElementKind) -> Self {
        assert!(stride > 0, "array class {name} has a zero element stride");
        Self { name, stride, kind }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Element size in bytes.
    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    /// True when in-spine element data must start on an 8-byte boundary.
    /// Only 8-byte elements under 4-byte reference slots need this; every
    /// other combination is already aligned by the slot layout.
    pub(crate) fn should_align_spine_data(&self, mode: ReferenceMode) -> bool {
        self.stride == 8 && mode.slot_width() == 4
    }
}

/// Registry of array classes known to a heap.
#[derive(Debug, Default)]
pub struct ClassTable {
    classes: Vec<ArrayClass>,
}

impl ClassTable {
    pub(crate) fn register(&mut self, class: ArrayClass, mode: ReferenceMode) -> ClassId {
        assert!(
            self.classes.len() < MAX_CLASS_ID as usize,
            "class table is full"
        );
        if class.kind == ElementKind::Reference {
            assert!(
                class.stride == mode.slot_width(),
                "reference array class {} has stride {} but reference slots are {} bytes",
                class.name,
                class.stride,
                mode.slot_width(),
            );
        }
        self.classes.push(class);
        ClassId::from_index(self.classes.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl Index<ClassId> for ClassTable {
    type Output = ArrayClass;

    fn index(&self, index: ClassId) -> &Self::Output {
        self.classes
            .get(index.into_index())
            .expect("ClassId out of bounds")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_ids_are_one_based() {
        let id = ClassId::from_index(0);
        assert_eq!(id.into_raw(), 1);
        assert_eq!(id.into_index(), 0);
        assert_eq!(ClassId::from_raw(1), Some(id));
        assert_eq!(ClassId::from_raw(0), None);
    }

    #[test]
    fn registration_hands_out_sequential_ids() {
        let mut table = ClassTable::default();
        let bytes = table.register(
            ArrayClass::new("byte[]", 1, ElementKind::Primitive),
            ReferenceMode::Full,
        );
        let longs = table.register(
            ArrayClass::new("long[]", 8, ElementKind::Primitive),
            ReferenceMode::Full,
        );
        assert_ne!(bytes, longs);
        assert_eq!(table[bytes].name(), "byte[]");
        assert_eq!(table[longs].stride(), 8);
    }

    #[test]
    #[should_panic(expected = "reference slots are 4 bytes")]
    fn reference_stride_must_match_slot_width() {
        let mut table = ClassTable::default();
        table.register(
            ArrayClass::new("ref[]", 8, ElementKind::Reference),
            ReferenceMode::Compressed { shift: 3 },
        );
    }

    #[test]
    fn only_wide_elements_under_narrow_slots_align_spine_data() {
        let compressed = ReferenceMode::Compressed { shift: 3 };
        let long_class = ArrayClass::new("long[]", 8, ElementKind::Primitive);
        let int_class = ArrayClass::new("int[]", 4, ElementKind::Primitive);
        assert!(long_class.should_align_spine_data(compressed));
        assert!(!long_class.should_align_spine_data(ReferenceMode::Full));
        assert!(!int_class.should_align_spine_data(compressed));
    }
}
