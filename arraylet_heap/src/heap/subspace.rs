// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::num::NonZeroU32;

use crate::{geometry::align_up, layout::LayoutPolicy};

/// Index of a subspace in the heap's subspace list.
///
/// One-based like [`ClassId`], so `Option<SubspaceId>` stays a u32.
///
/// [`ClassId`]: crate::class::ClassId
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SubspaceId(NonZeroU32);

const _SUBSPACE_ID_SIZE_IS_U32: () = assert!(size_of::<SubspaceId>() == size_of::<u32>());
const _OPTION_SUBSPACE_ID_SIZE_IS_U32: () =
    assert!(size_of::<Option<SubspaceId>>() == size_of::<u32>());

impl SubspaceId {
    #[cfg(test)]
    pub(crate) const DEFAULT: SubspaceId = SubspaceId::from_index(0);

    pub(crate) const fn from_index(value: usize) -> Self {
        assert!(value < u32::MAX as usize);
        match NonZeroU32::new(value as u32 + 1) {
            Some(value) => Self(value),
            None => unreachable!(),
        }
    }

    pub(crate) const fn into_index(self) -> usize {
        self.0.get() as usize - 1
    }
}

impl core::fmt::Debug for SubspaceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "SubspaceId({})", self.0.get())
    }
}

/// Accounting and policy view over the regions one allocation space has
/// committed.
///
/// Spines bump-allocate within the current spine region; leaves carve
/// whole leaf-sized chunks out of dedicated leaf regions so that every
/// leaf address is leaf-aligned. The subspace owns the [`LayoutPolicy`]
/// that governs allocations into it; the policy's arraylet range is
/// widened whenever a leaf region is committed.
#[derive(Debug)]
pub(crate) struct Subspace {
    name: &'static str,
    policy: LayoutPolicy,
    spine_region: Option<u32>,
    spine_cursor: u64,
    leaf_region: Option<u32>,
    leaf_cursor: u64,
    bytes_allocated: u64,
    regions_committed: u64,
}

impl Subspace {
    pub(crate) fn new(name: &'static str, largest_desirable_spine: u64) -> Self {
        Self {
            name,
            policy: LayoutPolicy::new(largest_desirable_spine),
            spine_region: None,
            spine_cursor: 0,
            leaf_region: None,
            leaf_cursor: 0,
            bytes_allocated: 0,
            regions_committed: 0,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn policy(&self) -> &LayoutPolicy {
        &self.policy
    }

    pub(crate) fn policy_mut(&mut self) -> &mut LayoutPolicy {
        &mut self.policy
    }

    pub(crate) fn bytes_allocated(&self) -> u64 {
        self.bytes_allocated
    }

    pub(crate) fn regions_committed(&self) -> u64 {
        self.regions_committed
    }

    pub(crate) fn note_region_committed(&mut self) {
        self.regions_committed += 1;
    }

    /// Reserve `bytes` at `alignment` from the current spine region.
    /// `None` means a fresh region must be committed first.
    pub(crate) fn reserve_spine(
        &mut self,
        bytes: u64,
        alignment: u64,
        region_size: u64,
    ) -> Option<(u32, u64)> {
        let region = self.spine_region?;
        let offset = align_up(self.spine_cursor, alignment);
        if offset + bytes > region_size {
            return None;
        }
        self.spine_cursor = offset + bytes;
        self.bytes_allocated += bytes;
        Some((region, offset))
    }

    pub(crate) fn begin_spine_region(&mut self, region: u32) {
        self.spine_region = Some(region);
        self.spine_cursor = 0;
    }

    /// Reserve one leaf-sized chunk from the current leaf region.
    pub(crate) fn reserve_leaf(&mut self, leaf_size: u64, region_size: u64) -> Option<(u32, u64)> {
        let region = self.leaf_region?;
        if self.leaf_cursor + leaf_size > region_size {
            return None;
        }
        let offset = self.leaf_cursor;
        self.leaf_cursor = offset + leaf_size;
        self.bytes_allocated += leaf_size;
        Some((region, offset))
    }

    pub(crate) fn begin_leaf_region(&mut self, region: u32) {
        self.leaf_region = Some(region);
        self.leaf_cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subspace_ids_are_one_based() {
        assert_eq!(SubspaceId::from_index(0).into_index(), 0);
        assert_eq!(SubspaceId::from_index(7).into_index(), 7);
        assert_eq!(SubspaceId::DEFAULT, SubspaceId::from_index(0));
    }

    #[test]
    fn spine_reservations_bump_and_align() {
        let mut subspace = Subspace::new("tenure", 4096);
        assert_eq!(subspace.reserve_spine(24, 8, 4096), None);
        subspace.begin_spine_region(1);
        assert_eq!(subspace.reserve_spine(24, 8, 4096), Some((1, 0)));
        assert_eq!(subspace.reserve_spine(20, 8, 4096), Some((1, 24)));
        // 44 rounds up to 48 before the next reservation.
        assert_eq!(subspace.reserve_spine(8, 8, 4096), Some((1, 48)));
        assert_eq!(subspace.bytes_allocated(), 52);
    }

    #[test]
    fn a_full_spine_region_refuses_further_reservations() {
        let mut subspace = Subspace::new("tenure", 4096);
        subspace.begin_spine_region(1);
        assert_eq!(subspace.reserve_spine(4000, 8, 4096), Some((1, 0)));
        assert_eq!(subspace.reserve_spine(200, 8, 4096), None);
        subspace.begin_spine_region(2);
        assert_eq!(subspace.reserve_spine(200, 8, 4096), Some((2, 0)));
    }

    #[test]
    fn leaf_reservations_are_leaf_aligned_chunks() {
        let mut subspace = Subspace::new("tenure", 4096);
        subspace.begin_leaf_region(3);
        assert_eq!(subspace.reserve_leaf(1024, 4096), Some((3, 0)));
        assert_eq!(subspace.reserve_leaf(1024, 4096), Some((3, 1024)));
        assert_eq!(subspace.reserve_leaf(1024, 4096), Some((3, 2048)));
        assert_eq!(subspace.reserve_leaf(1024, 4096), Some((3, 3072)));
        assert_eq!(subspace.reserve_leaf(1024, 4096), None);
    }
}
