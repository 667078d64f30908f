// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::num::NonZeroU64;

/// Base of the sparse data address namespace. Addresses at or above this
/// value resolve through [`SparseVirtualHeap`] instead of a heap region.
///
/// [`SparseVirtualHeap`]: crate::sparse::SparseVirtualHeap
pub(crate) const SPARSE_ADDRESS_BASE: u64 = 1 << 48;

/// A byte address in the heap's logical address space.
///
/// Region-backed addresses pack a region index (starting at 1) into the
/// high bits and a byte offset within the region into the low
/// `region_log2` bits. Addresses at or above [`SPARSE_ADDRESS_BASE`]
/// belong to the sparse data namespace. Zero is reserved as the null
/// reference, which lets `Option<HeapAddress>` stay a single word.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct HeapAddress(NonZeroU64);

const _HEAP_ADDRESS_SIZE_IS_U64: () = assert!(size_of::<HeapAddress>() == size_of::<u64>());
const _OPTION_HEAP_ADDRESS_SIZE_IS_U64: () =
    assert!(size_of::<Option<HeapAddress>>() == size_of::<u64>());

impl HeapAddress {
    pub(crate) fn compose(region_index: u32, region_log2: u32, offset: u64) -> Self {
        debug_assert!(region_index != 0);
        debug_assert!(offset < 1u64 << region_log2);
        let raw = ((region_index as u64) << region_log2) | offset;
        match NonZeroU64::new(raw) {
            Some(raw) => Self(raw),
            None => unreachable!(),
        }
    }

    pub const fn from_raw(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }

    pub const fn raw(self) -> u64 {
        self.0.get()
    }

    /// True if this address resolves through the sparse data heap rather
    /// than a committed region.
    pub const fn is_sparse(self) -> bool {
        self.0.get() >= SPARSE_ADDRESS_BASE
    }

    pub(crate) const fn region_index(self, region_log2: u32) -> u32 {
        debug_assert!(!self.is_sparse());
        (self.0.get() >> region_log2) as u32
    }

    pub(crate) const fn region_offset(self, region_log2: u32) -> u64 {
        debug_assert!(!self.is_sparse());
        self.0.get() & ((1u64 << region_log2) - 1)
    }

    /// Address `bytes` past this one. Offsets within an object are always
    /// far below the address width, so the addition cannot wrap.
    pub fn offset_by(self, bytes: u64) -> Self {
        debug_assert!(self.0.get().checked_add(bytes).is_some());
        Self(self.0.saturating_add(bytes))
    }

    pub(crate) fn is_aligned_to(self, alignment: u64) -> bool {
        debug_assert!(alignment.is_power_of_two());
        self.0.get() & (alignment - 1) == 0
    }
}

impl core::fmt::Debug for HeapAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "HeapAddress({:#x})", self.0.get())
    }
}

/// Width and encoding of object reference slots.
///
/// The engine never duplicates code per width; anything that reads or
/// writes a reference slot threads the mode through to here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReferenceMode {
    /// Reference slots hold full 64-bit addresses.
    Full,
    /// Reference slots hold 32-bit values; the address is recovered by
    /// shifting left. A shift of 0 stores the low address bits directly.
    Compressed { shift: u8 },
}

impl ReferenceMode {
    /// Physical width in bytes of one reference slot.
    pub const fn slot_width(self) -> u64 {
        match self {
            ReferenceMode::Full => 8,
            ReferenceMode::Compressed { .. } => 4,
        }
    }

    /// Alignment every slot-encoded address must satisfy.
    pub(crate) const fn slot_alignment(self) -> u64 {
        match self {
            ReferenceMode::Full => 1,
            ReferenceMode::Compressed { shift } => 1u64 << shift,
        }
    }

    /// Encode an address for storage in a reference slot. The null
    /// reference encodes as zero in both modes.
    pub(crate) fn encode_slot(self, address: Option<HeapAddress>) -> u64 {
        let Some(address) = address else {
            return 0;
        };
        match self {
            ReferenceMode::Full => address.raw(),
            ReferenceMode::Compressed { shift } => {
                debug_assert!(!address.is_sparse());
                debug_assert!(address.is_aligned_to(1u64 << shift));
                let encoded = address.raw() >> shift;
                debug_assert!(encoded <= u32::MAX as u64);
                encoded
            }
        }
    }

    /// Decode a raw slot value back into an address.
    pub(crate) fn decode_slot(self, raw: u64) -> Option<HeapAddress> {
        match self {
            ReferenceMode::Full => HeapAddress::from_raw(raw),
            ReferenceMode::Compressed { shift } => HeapAddress::from_raw(raw << shift),
        }
    }
}
