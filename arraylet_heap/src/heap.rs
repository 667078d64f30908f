// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The heap substrate the allocation engine runs against.
//!
//! This is deliberately the minimum a real runtime would provide:
//! power-of-two regions committed on demand, subspaces that own them,
//! and typed byte access resolved through [`HeapAddress`]. The engine
//! proper lives in [`alloc`]; collectors are represented only by the
//! [`RawAllocator`] seam and the [`Heap::relocate_object`] primitive
//! they would use to move a spine mid-allocation.
//!
//! [`alloc`]: crate::alloc

pub(crate) mod address;
mod allocator;
pub(crate) mod region;
pub(crate) mod subspace;

use core::hash::BuildHasher;

pub use address::{HeapAddress, ReferenceMode};
pub use allocator::{BumpAllocator, RawAllocator};
pub use subspace::SubspaceId;

use crate::{
    class::{ArrayClass, ClassId, ClassTable},
    geometry::ArrayletGeometry,
    heap::{region::Region, subspace::Subspace},
    layout::LayoutPolicy,
    sparse::SparseVirtualHeap,
};

/// Physical alignment of region backing blocks. Logical address
/// alignment comes from the address packing, not from here.
const REGION_BLOCK_ALIGNMENT: usize = 16;

/// Heap-shape configuration, fixed at heap construction.
///
/// The spine threshold is deliberately absent: it is per-subspace
/// policy, supplied to [`Heap::add_subspace`]. `spine_growth_reserve`
/// is a collector-family-dependent margin with no universal value;
/// `Default` exists for tests and benchmarks, not as a recommendation.
#[derive(Clone, Copy, Debug)]
pub struct HeapParameters {
    pub reference_mode: ReferenceMode,
    /// Alignment of every object start address. Power of two.
    pub object_alignment: u64,
    /// Log2 of the region size, the unit of heap growth.
    pub region_log2: u32,
    /// Log2 of the arraylet leaf size. At most `region_log2`.
    pub arraylet_leaf_log2: u32,
    /// Smallest size any object allocation may occupy.
    pub minimum_object_size: u64,
    /// Bytes held back from the spine threshold so a relocated spine
    /// can still grow in place, e.g. by a hash slot.
    pub spine_growth_reserve: u64,
    /// Store indexable data in the sparse off-heap address space
    /// instead of spines and retained leaves.
    pub off_heap_data: bool,
}

impl Default for HeapParameters {
    fn default() -> Self {
        Self {
            reference_mode: ReferenceMode::Full,
            object_alignment: 8,
            region_log2: 12,
            arraylet_leaf_log2: 12,
            minimum_object_size: 16,
            spine_growth_reserve: 0,
            off_heap_data: false,
        }
    }
}

impl HeapParameters {
    fn validate(&self) {
        assert!(
            self.object_alignment.is_power_of_two(),
            "object alignment {} is not a power of two",
            self.object_alignment
        );
        assert!(self.minimum_object_size > 0, "minimum object size is zero");
        assert!(
            self.arraylet_leaf_log2 < 32,
            "leaf size 2^{} is not representable",
            self.arraylet_leaf_log2
        );
        assert!(
            self.arraylet_leaf_log2 <= self.region_log2,
            "leaf size 2^{} exceeds region size 2^{}",
            self.arraylet_leaf_log2,
            self.region_log2
        );
        // Region indexes are 32 bits; the packed address space must
        // stay below the sparse namespace.
        assert!(
            self.region_log2 <= 16,
            "region size 2^{} overflows the region address space",
            self.region_log2
        );
    }
}

/// The managed heap: committed regions, subspaces, the class table, and
/// the sparse off-heap data space when enabled.
#[derive(Debug)]
pub struct Heap {
    parameters: HeapParameters,
    geometry: ArrayletGeometry,
    regions: Vec<Region>,
    subspaces: Vec<Subspace>,
    classes: ClassTable,
    sparse: Option<SparseVirtualHeap>,
    hash_state: ahash::RandomState,
}

impl Heap {
    pub fn new(parameters: HeapParameters) -> Self {
        parameters.validate();
        let sparse = parameters.off_heap_data.then(SparseVirtualHeap::new);
        Self {
            parameters,
            geometry: ArrayletGeometry::from_parameters(&parameters),
            regions: Vec::new(),
            subspaces: Vec::new(),
            classes: ClassTable::default(),
            sparse,
            hash_state: ahash::RandomState::with_seeds(
                rand::random(),
                rand::random(),
                rand::random(),
                rand::random(),
            ),
        }
    }

    pub fn parameters(&self) -> &HeapParameters {
        &self.parameters
    }

    pub fn geometry(&self) -> ArrayletGeometry {
        self.geometry
    }

    pub fn region_size(&self) -> u64 {
        1u64 << self.parameters.region_log2
    }

    pub fn classes(&self) -> &ClassTable {
        &self.classes
    }

    pub fn register_class(&mut self, class: ArrayClass) -> ClassId {
        self.classes.register(class, self.parameters.reference_mode)
    }

    pub fn class(&self, id: ClassId) -> &ArrayClass {
        &self.classes[id]
    }

    pub fn add_subspace(&mut self, name: &'static str, largest_desirable_spine: u64) -> SubspaceId {
        self.subspaces.push(Subspace::new(name, largest_desirable_spine));
        SubspaceId::from_index(self.subspaces.len() - 1)
    }

    pub fn layout_policy(&self, subspace: SubspaceId) -> &LayoutPolicy {
        self.subspace(subspace).policy()
    }

    pub fn bytes_allocated(&self, subspace: SubspaceId) -> u64 {
        self.subspace(subspace).bytes_allocated()
    }

    pub fn regions_committed(&self, subspace: SubspaceId) -> u64 {
        self.subspace(subspace).regions_committed()
    }

    pub fn sparse(&self) -> Option<&SparseVirtualHeap> {
        self.sparse.as_ref()
    }

    fn subspace(&self, id: SubspaceId) -> &Subspace {
        self.subspaces.get(id.into_index()).expect("SubspaceId out of bounds")
    }

    fn subspace_mut(&mut self, id: SubspaceId) -> &mut Subspace {
        self.subspaces
            .get_mut(id.into_index())
            .expect("SubspaceId out of bounds")
    }

    /// Subspace owning the region `address` falls in.
    pub fn subspace_of(&self, address: HeapAddress) -> SubspaceId {
        self.region_of(address).subspace()
    }

    fn region_of(&self, address: HeapAddress) -> &Region {
        assert!(!address.is_sparse(), "sparse address has no region");
        let index = address.region_index(self.parameters.region_log2) as usize;
        self.regions.get(index - 1).expect("address outside any committed region")
    }

    fn region_of_mut(&mut self, address: HeapAddress) -> &mut Region {
        assert!(!address.is_sparse(), "sparse address has no region");
        let index = address.region_index(self.parameters.region_log2) as usize;
        self.regions
            .get_mut(index - 1)
            .expect("address outside any committed region")
    }

    /// Commit one fresh region for `subspace` and return its one-based
    /// index.
    fn commit_region(&mut self, subspace: SubspaceId) -> u32 {
        let size = self.region_size() as usize;
        self.regions
            .push(Region::new(size, REGION_BLOCK_ALIGNMENT, subspace));
        let index = self.regions.len() as u32;
        let owner = self.subspace_mut(subspace);
        owner.note_region_committed();
        tracing::debug!(
            subspace = owner.name(),
            index,
            size,
            "committed heap region"
        );
        index
    }

    /// Carve `bytes` at `alignment` out of the subspace's spine
    /// regions, committing a new region when the current one is full.
    /// `None` when `bytes` cannot fit a single region; a spine larger
    /// than a region is unallocatable in this heap.
    pub fn allocate_bytes(
        &mut self,
        subspace: SubspaceId,
        bytes: u64,
        alignment: u64,
    ) -> Option<HeapAddress> {
        let region_size = self.region_size();
        if bytes == 0 || bytes > region_size {
            return None;
        }
        let log2 = self.parameters.region_log2;
        if let Some((region, offset)) =
            self.subspace_mut(subspace).reserve_spine(bytes, alignment, region_size)
        {
            return Some(HeapAddress::compose(region, log2, offset));
        }
        let region = self.commit_region(subspace);
        let owner = self.subspace_mut(subspace);
        owner.begin_spine_region(region);
        let (region, offset) = owner
            .reserve_spine(bytes, alignment, region_size)
            .expect("fresh region cannot satisfy a region-sized reservation");
        Some(HeapAddress::compose(region, log2, offset))
    }

    /// Carve one leaf-sized, leaf-aligned block out of the subspace's
    /// leaf regions. Committing a leaf region widens the subspace's
    /// arraylet range.
    pub fn allocate_leaf_block(&mut self, subspace: SubspaceId) -> Option<HeapAddress> {
        let region_size = self.region_size();
        let leaf_size = self.geometry.leaf_size();
        let log2 = self.parameters.region_log2;
        if let Some((region, offset)) =
            self.subspace_mut(subspace).reserve_leaf(leaf_size, region_size)
        {
            return Some(HeapAddress::compose(region, log2, offset));
        }
        let region = self.commit_region(subspace);
        let base = HeapAddress::compose(region, log2, 0);
        let owner = self.subspace_mut(subspace);
        owner.begin_leaf_region(region);
        let threshold = owner.policy().largest_desirable_spine();
        owner
            .policy_mut()
            .expand_range(base, base.offset_by(region_size), threshold);
        let (region, offset) = owner
            .reserve_leaf(leaf_size, region_size)
            .expect("fresh region cannot satisfy a leaf reservation");
        Some(HeapAddress::compose(region, log2, offset))
    }

    /// Move `bytes` starting at `from` to a fresh allocation in the
    /// same subspace and return the new address. This is the primitive
    /// a moving collector applies to a spine between allocation steps;
    /// the engine itself never calls it. The old bytes are left behind
    /// as garbage.
    pub fn relocate_object(&mut self, from: HeapAddress, bytes: u64) -> Option<HeapAddress> {
        let subspace = self.subspace_of(from);
        let alignment = self.geometry.spine_alignment();
        let data = self.bytes(from, bytes as usize).to_vec();
        let to = self.allocate_bytes(subspace, bytes, alignment)?;
        self.bytes_mut(to, bytes as usize).copy_from_slice(&data);
        tracing::trace!(?from, ?to, bytes, "relocated object");
        Some(to)
    }

    /// Release the physical backing of the region holding `leaf`. The
    /// off-heap allocation path calls this once per leaf after the
    /// sparse space has taken over as canonical storage.
    pub(crate) fn decommit_leaf(&mut self, leaf: HeapAddress) {
        assert!(
            self.parameters.arraylet_leaf_log2 == self.parameters.region_log2,
            "leaf decommit requires leaf-sized regions"
        );
        let leaf_size = self.geometry.leaf_size();
        self.region_of_mut(leaf).decommit();
        if let Some(sparse) = &mut self.sparse {
            sparse.note_decommitted_leaf(leaf_size);
        }
    }

    /// True when the region holding `address` still has physical
    /// backing.
    pub fn region_is_committed(&self, address: HeapAddress) -> bool {
        self.region_of(address).is_committed()
    }

    pub(crate) fn map_sparse_range(&mut self, size: u64) -> HeapAddress {
        match &mut self.sparse {
            Some(sparse) => sparse.map_contiguous(size),
            None => panic!("sparse mapping requested but off-heap data is disabled"),
        }
    }

    /// Salted identity hash of an object address. Stable for the life
    /// of the heap; the salt changes per heap instance.
    pub fn identity_hash(&self, address: HeapAddress) -> u32 {
        self.hash_state.hash_one(address.raw()) as u32
    }

    pub fn read_u32(&self, address: HeapAddress) -> u32 {
        if address.is_sparse() {
            return self.sparse_ref().read_u32(address);
        }
        let offset = address.region_offset(self.parameters.region_log2) as usize;
        self.region_of(address).block().read_u32(offset)
    }

    pub fn write_u32(&mut self, address: HeapAddress, value: u32) {
        if address.is_sparse() {
            return self.sparse_mut().write_u32(address, value);
        }
        let offset = address.region_offset(self.parameters.region_log2) as usize;
        self.region_of_mut(address).block_mut().write_u32(offset, value)
    }

    pub fn read_u64(&self, address: HeapAddress) -> u64 {
        if address.is_sparse() {
            return self.sparse_ref().read_u64(address);
        }
        let offset = address.region_offset(self.parameters.region_log2) as usize;
        self.region_of(address).block().read_u64(offset)
    }

    pub fn write_u64(&mut self, address: HeapAddress, value: u64) {
        if address.is_sparse() {
            return self.sparse_mut().write_u64(address, value);
        }
        let offset = address.region_offset(self.parameters.region_log2) as usize;
        self.region_of_mut(address).block_mut().write_u64(offset, value)
    }

    pub fn bytes(&self, address: HeapAddress, len: usize) -> &[u8] {
        if address.is_sparse() {
            return self.sparse_ref().bytes(address, len);
        }
        let offset = address.region_offset(self.parameters.region_log2) as usize;
        self.region_of(address).block().bytes(offset, len)
    }

    pub fn bytes_mut(&mut self, address: HeapAddress, len: usize) -> &mut [u8] {
        if address.is_sparse() {
            return self.sparse_mut().bytes_mut(address, len);
        }
        let offset = address.region_offset(self.parameters.region_log2) as usize;
        self.region_of_mut(address).block_mut().bytes_mut(offset, len)
    }

    fn sparse_ref(&self) -> &SparseVirtualHeap {
        self.sparse
            .as_ref()
            .expect("sparse address reached a heap without off-heap data")
    }

    fn sparse_mut(&mut self) -> &mut SparseVirtualHeap {
        self.sparse
            .as_mut()
            .expect("sparse address reached a heap without off-heap data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap() -> Heap {
        Heap::new(HeapParameters::default())
    }

    #[test]
    fn byte_allocations_span_regions() {
        let mut heap = heap();
        let subspace = heap.add_subspace("tenure", 4096);
        let first = heap.allocate_bytes(subspace, 4000, 8).unwrap();
        let second = heap.allocate_bytes(subspace, 200, 8).unwrap();
        assert_ne!(
            first.region_index(12),
            second.region_index(12),
            "200 bytes cannot follow 4000 in one 4096-byte region"
        );
        assert_eq!(heap.bytes_allocated(subspace), 4200);
        assert_eq!(heap.regions_committed(subspace), 2);
    }

    #[test]
    fn oversized_spines_are_unallocatable() {
        let mut heap = heap();
        let subspace = heap.add_subspace("tenure", 4096);
        assert_eq!(heap.allocate_bytes(subspace, 4097, 8), None);
        assert_eq!(heap.allocate_bytes(subspace, 0, 8), None);
    }

    #[test]
    fn leaf_blocks_widen_the_arraylet_range() {
        let mut heap = heap();
        let subspace = heap.add_subspace("tenure", 4096);
        assert!(heap.layout_policy(subspace).arraylet_range().is_none());
        let first = heap.allocate_leaf_block(subspace).unwrap();
        let second = heap.allocate_leaf_block(subspace).unwrap();
        let policy = heap.layout_policy(subspace);
        assert!(policy.range_contains(first));
        assert!(policy.range_contains(second));
        // Spine allocations do not widen the leaf range.
        let spine = heap.allocate_bytes(subspace, 64, 8).unwrap();
        assert!(!heap.layout_policy(subspace).range_contains(spine));
    }

    #[test]
    fn typed_access_round_trips_through_addresses() {
        let mut heap = heap();
        let subspace = heap.add_subspace("tenure", 4096);
        let address = heap.allocate_bytes(subspace, 64, 8).unwrap();
        heap.write_u32(address.offset_by(4), 0x1234_5678);
        heap.write_u64(address.offset_by(16), u64::MAX - 7);
        assert_eq!(heap.read_u32(address.offset_by(4)), 0x1234_5678);
        assert_eq!(heap.read_u64(address.offset_by(16)), u64::MAX - 7);
        assert_eq!(heap.read_u32(address), 0);
    }

    #[test]
    fn relocation_copies_the_object_bytes() {
        let mut heap = heap();
        let subspace = heap.add_subspace("tenure", 4096);
        let from = heap.allocate_bytes(subspace, 48, 8).unwrap();
        heap.write_u64(from, 0xfeed_face_cafe_f00d);
        heap.write_u32(from.offset_by(40), 77);
        let to = heap.relocate_object(from, 48).unwrap();
        assert_ne!(from, to);
        assert_eq!(heap.read_u64(to), 0xfeed_face_cafe_f00d);
        assert_eq!(heap.read_u32(to.offset_by(40)), 77);
        assert_eq!(heap.subspace_of(from), heap.subspace_of(to));
    }

    #[test]
    fn identity_hashes_are_stable_per_heap() {
        let mut heap = heap();
        let subspace = heap.add_subspace("tenure", 4096);
        let address = heap.allocate_bytes(subspace, 32, 8).unwrap();
        assert_eq!(heap.identity_hash(address), heap.identity_hash(address));
    }

    #[test]
    #[should_panic(expected = "leaf size 2^13 exceeds region size 2^12")]
    fn leaves_may_not_outgrow_regions() {
        Heap::new(HeapParameters {
            arraylet_leaf_log2: 13,
            region_log2: 12,
            ..HeapParameters::default()
        });
    }
}
