//! Per-inode data-cluster reference tree (spec §4.6): six direct slots,
//! one single-indirect slot and one double-indirect slot, each indirect
//! slot pointing at an index cluster packed with `RPC` cluster
//! references. Per spec §5, at most one index cluster's contents are
//! held decoded in process memory at a time (`RefCache` below) — again a
//! single slot, not an LRU.

use crate::{
	balloc,
	codec::CODEC,
	data::{ClusterHeader, ClusterRef, Inode, InodeNum, InodeRef, N_DIRECT, RPC},
	device::BlockDevice,
	error::{Result, SofsError},
	itable::InodeTable,
	layout::BLOCKS_PER_CLUSTER,
};

/// Total number of logical cluster positions an inode can address.
pub fn capacity() -> u64 {
	N_DIRECT as u64 + RPC as u64 + RPC as u64 * RPC as u64
}

fn cluster_block(dzone_start: u64, idx: u32) -> u64 {
	dzone_start + idx as u64 * BLOCKS_PER_CLUSTER
}

/// Single-slot cache over one index cluster's reference array.
pub struct RefCache {
	loaded: Option<(u32, [ClusterRef; RPC])>,
	dirty:  bool,
}

impl Default for RefCache {
	fn default() -> Self {
		Self {
			loaded: None,
			dirty:  false,
		}
	}
}

impl RefCache {
	pub fn new() -> Self {
		Self::default()
	}

	fn evict<D: BlockDevice>(&mut self, dev: &mut D, dzone_start: u64, owner: InodeNum) -> Result<()> {
		if let Some((idx, refs)) = self.loaded.take() {
			if self.dirty {
				write_refs(dev, dzone_start, idx, owner, &refs)?;
				self.dirty = false;
			}
		}
		Ok(())
	}

	fn ensure<D: BlockDevice>(
		&mut self,
		dev: &mut D,
		dzone_start: u64,
		idx: u32,
		owner: InodeNum,
	) -> Result<&mut [ClusterRef; RPC]> {
		if !matches!(&self.loaded, Some((l, _)) if *l == idx) {
			self.evict(dev, dzone_start, owner)?;
			let refs = read_refs(dev, dzone_start, idx)?;
			self.loaded = Some((idx, refs));
		}
		Ok(&mut self.loaded.as_mut().unwrap().1)
	}

	fn mark_dirty(&mut self) {
		self.dirty = true;
	}
}

fn read_header<D: BlockDevice>(dev: &mut D, dzone_start: u64, idx: u32) -> Result<(ClusterHeader, Vec<u8>)> {
	let bs = dev.block_size() as usize;
	let mut buf = vec![0u8; bs];
	dev.read_block(cluster_block(dzone_start, idx), &mut buf)?;
	let (hdr, used): (ClusterHeader, usize) =
		bincode::decode_from_slice(&buf, CODEC).map_err(|_| SofsError::ClusterHeaderInconsistent)?;
	Ok((hdr, buf[used..].to_vec()))
}

fn read_refs<D: BlockDevice>(dev: &mut D, dzone_start: u64, idx: u32) -> Result<[ClusterRef; RPC]> {
	let (_, payload) = read_header(dev, dzone_start, idx)?;
	let mut refs = [ClusterRef::NONE; RPC];
	let mut offset = 0usize;
	for slot in refs.iter_mut() {
		let (r, used): (ClusterRef, usize) =
			bincode::decode_from_slice(&payload[offset..], CODEC).map_err(|_| SofsError::ReferenceListInconsistent)?;
		*slot = r;
		offset += used;
	}
	Ok(refs)
}

fn write_refs<D: BlockDevice>(
	dev: &mut D,
	dzone_start: u64,
	idx: u32,
	owner: InodeNum,
	refs: &[ClusterRef; RPC],
) -> Result<()> {
	let bs = dev.block_size() as usize;
	let mut buf = vec![0u8; bs];
	let hdr = ClusterHeader {
		prev: ClusterRef::NONE,
		next: ClusterRef::NONE,
		stat: InodeRef::some(owner),
	};
	let hdr_enc = bincode::encode_to_vec(&hdr, CODEC).map_err(|_| SofsError::ClusterHeaderInconsistent)?;
	buf[..hdr_enc.len()].copy_from_slice(&hdr_enc);
	let mut offset = hdr_enc.len();
	for r in refs {
		let enc = bincode::encode_to_vec(r, CODEC).map_err(|_| SofsError::ReferenceListInconsistent)?;
		buf[offset..offset + enc.len()].copy_from_slice(&enc);
		offset += enc.len();
	}
	dev.write_block(cluster_block(dzone_start, idx), &buf)?;
	Ok(())
}

/// Reset a freshly allocated cluster's header to "owned by `owner`,
/// unlinked", leaving its payload untouched (callers that need a zeroed
/// payload, e.g. index clusters, overwrite it separately).
fn claim_header<D: BlockDevice>(dev: &mut D, dzone_start: u64, idx: u32, owner: InodeNum) -> Result<()> {
	let bs = dev.block_size() as usize;
	let mut buf = vec![0u8; bs];
	let hdr = ClusterHeader {
		prev: ClusterRef::NONE,
		next: ClusterRef::NONE,
		stat: InodeRef::some(owner),
	};
	let enc = bincode::encode_to_vec(&hdr, CODEC).map_err(|_| SofsError::ClusterHeaderInconsistent)?;
	buf[..enc.len()].copy_from_slice(&enc);
	dev.write_block(cluster_block(dzone_start, idx), &buf)?;
	Ok(())
}

/// Overwrite a cluster's header while leaving its payload exactly as read,
/// for patching an already-live data cluster's `prev`/`next` links without
/// disturbing its content.
fn write_header_with_payload<D: BlockDevice>(
	dev: &mut D,
	dzone_start: u64,
	idx: u32,
	hdr: ClusterHeader,
	payload: &[u8],
) -> Result<()> {
	let bs = dev.block_size() as usize;
	let mut buf = vec![0u8; bs];
	let enc = bincode::encode_to_vec(&hdr, CODEC).map_err(|_| SofsError::ClusterHeaderInconsistent)?;
	buf[..enc.len()].copy_from_slice(&enc);
	buf[enc.len()..enc.len() + payload.len()].copy_from_slice(payload);
	dev.write_block(cluster_block(dzone_start, idx), &buf)?;
	Ok(())
}

/// Link a newly allocated data cluster into its file's sibling chain, per
/// spec §4.6 ALLOC's "attach" step: if the logical position immediately
/// before or after `logical` is already allocated, patch both clusters'
/// `prev`/`next` so the chain stays contiguous.
fn attach<D: BlockDevice>(
	dev: &mut D,
	dzone_start: u64,
	inode: &Inode,
	cache: &mut RefCache,
	owner: InodeNum,
	logical: u64,
	idx: u32,
) -> Result<()> {
	let (mut hdr, payload) = read_header(dev, dzone_start, idx)?;
	if logical > 0 {
		if let Some(prev_idx) = get(dev, dzone_start, inode, cache, owner, logical - 1)? {
			hdr.prev = ClusterRef::some(prev_idx);
			let (mut prev_hdr, prev_payload) = read_header(dev, dzone_start, prev_idx)?;
			prev_hdr.next = ClusterRef::some(idx);
			write_header_with_payload(dev, dzone_start, prev_idx, prev_hdr, &prev_payload)?;
		}
	}
	if logical + 1 < capacity() {
		if let Some(next_idx) = get(dev, dzone_start, inode, cache, owner, logical + 1)? {
			hdr.next = ClusterRef::some(next_idx);
			let (mut next_hdr, next_payload) = read_header(dev, dzone_start, next_idx)?;
			next_hdr.prev = ClusterRef::some(idx);
			write_header_with_payload(dev, dzone_start, next_idx, next_hdr, &next_payload)?;
		}
	}
	write_header_with_payload(dev, dzone_start, idx, hdr, &payload)?;
	Ok(())
}

/// Undo `attach` before releasing a data cluster, per spec §4.6 FREE's
/// symmetric "detach": bridge any still-linked neighbors over the cluster
/// being freed. Harmless to call even when a neighbor is about to be freed
/// in the same sweep — `free` resets that cluster's own links regardless.
fn detach<D: BlockDevice>(dev: &mut D, dzone_start: u64, idx: u32) -> Result<()> {
	let (hdr, _) = read_header(dev, dzone_start, idx)?;
	if let Some(prev_idx) = hdr.prev.get() {
		let (mut prev_hdr, prev_payload) = read_header(dev, dzone_start, prev_idx)?;
		prev_hdr.next = hdr.next;
		write_header_with_payload(dev, dzone_start, prev_idx, prev_hdr, &prev_payload)?;
	}
	if let Some(next_idx) = hdr.next.get() {
		let (mut next_hdr, next_payload) = read_header(dev, dzone_start, next_idx)?;
		next_hdr.prev = hdr.prev;
		write_header_with_payload(dev, dzone_start, next_idx, next_hdr, &next_payload)?;
	}
	Ok(())
}

enum Position {
	Direct(usize),
	Single(usize),
	Double(usize, usize),
}

fn locate(logical: u64) -> Result<Position> {
	let rpc = RPC as u64;
	if logical < N_DIRECT as u64 {
		return Ok(Position::Direct(logical as usize));
	}
	let logical = logical - N_DIRECT as u64;
	if logical < rpc {
		return Ok(Position::Single(logical as usize));
	}
	let logical = logical - rpc;
	if logical < rpc * rpc {
		return Ok(Position::Double((logical / rpc) as usize, (logical % rpc) as usize));
	}
	Err(SofsError::MaxFileSizeExceeded)
}

/// Resolve the physical cluster backing logical position `logical`, or
/// `None` if it has never been allocated (a hole).
pub fn get<D: BlockDevice>(
	dev: &mut D,
	dzone_start: u64,
	inode: &Inode,
	cache: &mut RefCache,
	owner: InodeNum,
	logical: u64,
) -> Result<Option<u32>> {
	match locate(logical)? {
		Position::Direct(i) => Ok(inode.direct[i].get()),
		Position::Single(i) => match inode.indirect1.get() {
			None => Ok(None),
			Some(ic) => {
				let refs = cache.ensure(dev, dzone_start, ic, owner)?;
				Ok(refs[i].get())
			}
		},
		Position::Double(outer, inner) => {
			let Some(ic2) = inode.indirect2.get() else {
				return Ok(None);
			};
			let refs = cache.ensure(dev, dzone_start, ic2, owner)?;
			let Some(mid) = refs[outer].get() else {
				return Ok(None);
			};
			let refs = cache.ensure(dev, dzone_start, mid, owner)?;
			Ok(refs[inner].get())
		}
	}
}

/// Resolve the physical cluster backing `logical`, allocating any missing
/// data or index clusters along the way. Once a new *data* cluster (as
/// opposed to an index cluster) is allocated, it is linked into the file's
/// sibling chain against any already-allocated neighbor (spec §4.6 ALLOC's
/// "attach" step).
pub fn ensure<D: BlockDevice>(
	dev: &mut D,
	sb: &mut crate::data::Superblock,
	itable: &mut InodeTable,
	inode: &mut Inode,
	cache: &mut RefCache,
	owner: InodeNum,
	logical: u64,
) -> Result<u32> {
	let dzone_start = sb.dzone_start as u64;
	match locate(logical)? {
		Position::Direct(i) => {
			if let Some(existing) = inode.direct[i].get() {
				return Ok(existing);
			}
			let idx = balloc::allocate(sb, itable, dev, owner)?;
			claim_header(dev, dzone_start, idx, owner)?;
			inode.direct[i] = ClusterRef::some(idx);
			inode.cluster_count += 1;
			attach(dev, dzone_start, inode, cache, owner, logical, idx)?;
			Ok(idx)
		}
		Position::Single(i) => {
			let ic = match inode.indirect1.get() {
				Some(ic) => ic,
				None => {
					let ic = balloc::allocate(sb, itable, dev, owner)?;
					let refs = [ClusterRef::NONE; RPC];
					write_refs(dev, dzone_start, ic, owner, &refs)?;
					inode.indirect1 = ClusterRef::some(ic);
					inode.cluster_count += 1;
					ic
				}
			};
			let refs = cache.ensure(dev, dzone_start, ic, owner)?;
			if let Some(existing) = refs[i].get() {
				return Ok(existing);
			}
			let idx = balloc::allocate(sb, itable, dev, owner)?;
			claim_header(dev, dzone_start, idx, owner)?;
			let refs = cache.ensure(dev, dzone_start, ic, owner)?;
			refs[i] = ClusterRef::some(idx);
			cache.mark_dirty();
			inode.cluster_count += 1;
			attach(dev, dzone_start, inode, cache, owner, logical, idx)?;
			Ok(idx)
		}
		Position::Double(outer, inner) => {
			let ic2 = match inode.indirect2.get() {
				Some(ic2) => ic2,
				None => {
					let ic2 = balloc::allocate(sb, itable, dev, owner)?;
					let refs = [ClusterRef::NONE; RPC];
					write_refs(dev, dzone_start, ic2, owner, &refs)?;
					inode.indirect2 = ClusterRef::some(ic2);
					inode.cluster_count += 1;
					ic2
				}
			};
			let outer_refs = cache.ensure(dev, dzone_start, ic2, owner)?;
			let mid = match outer_refs[outer].get() {
				Some(mid) => mid,
				None => {
					let mid = balloc::allocate(sb, itable, dev, owner)?;
					let refs = [ClusterRef::NONE; RPC];
					write_refs(dev, dzone_start, mid, owner, &refs)?;
					let outer_refs = cache.ensure(dev, dzone_start, ic2, owner)?;
					outer_refs[outer] = ClusterRef::some(mid);
					cache.mark_dirty();
					inode.cluster_count += 1;
					mid
				}
			};
			let inner_refs = cache.ensure(dev, dzone_start, mid, owner)?;
			if let Some(existing) = inner_refs[inner].get() {
				return Ok(existing);
			}
			let idx = balloc::allocate(sb, itable, dev, owner)?;
			claim_header(dev, dzone_start, idx, owner)?;
			let inner_refs = cache.ensure(dev, dzone_start, mid, owner)?;
			inner_refs[inner] = ClusterRef::some(idx);
			cache.mark_dirty();
			inode.cluster_count += 1;
			attach(dev, dzone_start, inode, cache, owner, logical, idx)?;
			Ok(idx)
		}
	}
}

/// Free every cluster reachable from `inode` (direct data, single- and
/// double-indirect data, and the index clusters themselves), resetting
/// it to hold no clusters at all. Used by truncate-to-zero and by inode
/// cleaning when the last link disappears.
pub fn clean<D: BlockDevice>(
	dev: &mut D,
	sb: &mut crate::data::Superblock,
	inode: &mut Inode,
	cache: &mut RefCache,
	owner: InodeNum,
) -> Result<()> {
	let dzone_start = sb.dzone_start as u64;
	cache.evict(dev, dzone_start, owner)?;

	for slot in inode.direct.iter_mut() {
		if let Some(idx) = slot.get() {
			detach(dev, dzone_start, idx)?;
			balloc::free(sb, dev, idx)?;
			*slot = ClusterRef::NONE;
			inode.cluster_count -= 1;
		}
	}

	if let Some(ic) = inode.indirect1.get() {
		let refs = read_refs(dev, dzone_start, ic)?;
		for r in refs {
			if let Some(idx) = r.get() {
				detach(dev, dzone_start, idx)?;
				balloc::free(sb, dev, idx)?;
				inode.cluster_count -= 1;
			}
		}
		balloc::free(sb, dev, ic)?;
		inode.indirect1 = ClusterRef::NONE;
		inode.cluster_count -= 1;
	}

	if let Some(ic2) = inode.indirect2.get() {
		let outer = read_refs(dev, dzone_start, ic2)?;
		for mid_ref in outer {
			if let Some(mid) = mid_ref.get() {
				let inner = read_refs(dev, dzone_start, mid)?;
				for r in inner {
					if let Some(idx) = r.get() {
						detach(dev, dzone_start, idx)?;
						balloc::free(sb, dev, idx)?;
						inode.cluster_count -= 1;
					}
				}
				balloc::free(sb, dev, mid)?;
				inode.cluster_count -= 1;
			}
		}
		balloc::free(sb, dev, ic2)?;
		inode.indirect2 = ClusterRef::NONE;
		inode.cluster_count -= 1;
	}

	inode.size_bytes = 0;
	debug_assert_eq!(inode.cluster_count, 0);
	Ok(())
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use super::*;
	use crate::{data::TimesOrLinks, device::FileBlockDevice, format, superblock::SuperblockStore};

	fn fresh(nblocks: u64) -> (FileBlockDevice<Cursor<Vec<u8>>>, crate::data::Superblock, InodeTable, InodeNum) {
		let buf = vec![0u8; (nblocks * crate::layout::BLOCK_SIZE) as usize];
		let mut dev = FileBlockDevice::new(Cursor::new(buf), crate::layout::BLOCK_SIZE);
		format::format(&mut dev, nblocks, 16, "test").unwrap();
		let store = SuperblockStore::load(&mut dev).unwrap();
		let sb = store.get().clone();
		let mut itable = InodeTable::new(sb.itable_start as u64, sb.itable_block_count as u64);
		let owner = InodeNum::new(1);
		let mut inode = Inode::free_clean(InodeRef::NONE, InodeRef::NONE);
		inode.mode = crate::data::MODE_TYPE_REGULAR | 0o644;
		inode.times_or_links = TimesOrLinks::Times { atime: 0, mtime: 0 };
		itable.put(&mut dev, owner, inode).unwrap();
		(dev, sb, itable, owner)
	}

	#[test]
	fn direct_slots_allocate_and_resolve() {
		let (mut dev, mut sb, mut itable, owner) = fresh(200);
		let mut inode = Inode::free_clean(InodeRef::NONE, InodeRef::NONE);
		let mut cache = RefCache::new();
		let idx = ensure(&mut dev, &mut sb, &mut itable, &mut inode, &mut cache, owner, 2).unwrap();
		let got = get(&mut dev, sb.dzone_start as u64, &inode, &mut cache, owner, 2).unwrap();
		assert_eq!(got, Some(idx));
	}

	#[test]
	fn single_indirect_allocates_index_cluster_once() {
		let (mut dev, mut sb, mut itable, owner) = fresh(2000);
		let mut inode = Inode::free_clean(InodeRef::NONE, InodeRef::NONE);
		let mut cache = RefCache::new();
		let a = ensure(&mut dev, &mut sb, &mut itable, &mut inode, &mut cache, owner, N_DIRECT as u64).unwrap();
		let b = ensure(&mut dev, &mut sb, &mut itable, &mut inode, &mut cache, owner, N_DIRECT as u64 + 1).unwrap();
		assert_ne!(a, b);
		assert!(inode.indirect1.get().is_some());
	}

	#[test]
	fn adjacent_direct_clusters_are_linked_as_siblings() {
		let (mut dev, mut sb, mut itable, owner) = fresh(200);
		let mut inode = Inode::free_clean(InodeRef::NONE, InodeRef::NONE);
		let mut cache = RefCache::new();
		let a = ensure(&mut dev, &mut sb, &mut itable, &mut inode, &mut cache, owner, 0).unwrap();
		let b = ensure(&mut dev, &mut sb, &mut itable, &mut inode, &mut cache, owner, 1).unwrap();
		let dzone_start = sb.dzone_start as u64;
		let (hdr_a, _) = read_header(&mut dev, dzone_start, a).unwrap();
		let (hdr_b, _) = read_header(&mut dev, dzone_start, b).unwrap();
		assert_eq!(hdr_a.next, ClusterRef::some(b));
		assert_eq!(hdr_b.prev, ClusterRef::some(a));
	}

	#[test]
	fn clean_frees_everything_and_hits_zero() {
		let (mut dev, mut sb, mut itable, owner) = fresh(2000);
		let mut inode = Inode::free_clean(InodeRef::NONE, InodeRef::NONE);
		let mut cache = RefCache::new();
		for logical in [0u64, 1, N_DIRECT as u64, N_DIRECT as u64 + 5] {
			ensure(&mut dev, &mut sb, &mut itable, &mut inode, &mut cache, owner, logical).unwrap();
		}
		let free_before = sb.n_clusters_free;
		clean(&mut dev, &mut sb, &mut inode, &mut cache, owner).unwrap();
		assert_eq!(inode.cluster_count, 0);
		assert!(sb.n_clusters_free > free_before);
	}

	#[test]
	fn out_of_range_logical_index_is_max_file_size_exceeded() {
		assert_eq!(locate(capacity()).unwrap_err(), SofsError::MaxFileSizeExceeded);
	}
}
