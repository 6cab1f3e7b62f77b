//! Free-data-cluster repository (spec §4.5): two small in-superblock
//! caches front an on-disk doubly-linked list threaded through the free
//! clusters' own headers, so that the common case — allocate or free one
//! cluster — almost never touches the linked list on disk.
//!
//! * `retrieve_cache` is a LIFO of up to `DZ` cluster indices ready to
//!   hand out; `retrieve_idx` is the index of the next valid entry.
//! * `insert_cache` is a LIFO of up to `DZ` freed cluster indices not yet
//!   threaded onto the on-disk list; `insert_idx` is the next free slot.
//!
//! When `retrieve_cache` runs dry, it is refilled by walking nodes off
//! the head of the on-disk list (deplete-ing `insert_cache` onto that
//! list first if it runs out early). When `insert_cache` fills up, it is
//! flushed onto the on-disk list as a linked run and the cache is reset.
//! This is the classic two-cache/free-list split; see DESIGN.md for why
//! it was chosen over a single flat free bitmap.

use crate::{
	codec::CODEC,
	data::{ClusterHeader, ClusterRef, InodeNum, InodeRef, Superblock, DZ},
	device::BlockDevice,
	error::{Result, SofsError},
	ireftree,
	itable::InodeTable,
	layout::BLOCKS_PER_CLUSTER,
};

fn cluster_block(dzone_start: u64, idx: u32) -> u64 {
	dzone_start + idx as u64 * BLOCKS_PER_CLUSTER
}

fn read_header<D: BlockDevice>(dev: &mut D, dzone_start: u64, idx: u32) -> Result<ClusterHeader> {
	let bs = dev.block_size() as usize;
	let mut buf = vec![0u8; bs];
	dev.read_block(cluster_block(dzone_start, idx), &mut buf)?;
	let (hdr, _): (ClusterHeader, usize) =
		bincode::decode_from_slice(&buf, CODEC).map_err(|_| SofsError::ClusterHeaderInconsistent)?;
	Ok(hdr)
}

fn write_header<D: BlockDevice>(dev: &mut D, dzone_start: u64, idx: u32, hdr: ClusterHeader) -> Result<()> {
	let bs = dev.block_size() as usize;
	let mut buf = vec![0u8; bs];
	dev.read_block(cluster_block(dzone_start, idx), &mut buf)?;
	let encoded = bincode::encode_to_vec(&hdr, CODEC).map_err(|_| SofsError::ClusterHeaderInconsistent)?;
	buf[..encoded.len()].copy_from_slice(&encoded);
	dev.write_block(cluster_block(dzone_start, idx), &buf)?;
	Ok(())
}

/// Pull up to `need = min(total-free, DZ)` clusters off the head of the
/// on-disk free list into `retrieve_cache`, writing them from slot
/// `DZ − need` upward so that `retrieve_idx` (which `allocate` advances
/// upward from) lands exactly on the first filled slot (spec §4.5.3). If
/// the on-disk list runs dry before `need` is satisfied, **deplete** the
/// insert cache onto the on-disk list first and resume walking it.
fn replenish<D: BlockDevice>(sb: &mut Superblock, dev: &mut D) -> Result<()> {
	debug_assert_eq!(sb.retrieve_idx as usize, DZ, "replenish called with a non-empty cache");
	log::trace!("replenish: retrieve cache empty, refilling from the on-disk free list");

	let need = (sb.n_clusters_free as usize).min(DZ);
	if need == 0 {
		return Err(SofsError::NoSpace);
	}

	let dzone_start = sb.dzone_start as u64;
	let mut popped = Vec::with_capacity(need);

	while popped.len() < need {
		if sb.free_cluster_head.get().is_none() {
			if sb.insert_idx == 0 {
				break;
			}
			deplete(sb, dev)?;
			if sb.free_cluster_head.get().is_none() {
				break;
			}
		}
		let head = sb.free_cluster_head.get().unwrap();
		let hdr = read_header(dev, dzone_start, head)?;
		sb.free_cluster_head = hdr.next;
		match hdr.next.get() {
			Some(new_head) => {
				let mut nh = read_header(dev, dzone_start, new_head)?;
				nh.prev = ClusterRef::NONE;
				write_header(dev, dzone_start, new_head, nh)?;
			}
			None => sb.free_cluster_tail = ClusterRef::NONE,
		}
		popped.push(ClusterRef::some(head));
	}

	if popped.is_empty() {
		return Err(SofsError::NoSpace);
	}

	let filled = popped.len();
	let mut cache = [ClusterRef::NONE; DZ];
	cache[DZ - filled..DZ].copy_from_slice(&popped);
	sb.retrieve_cache = cache;
	sb.retrieve_idx = (DZ - filled) as u32;
	Ok(())
}

/// Thread every entry currently in `insert_cache` onto the on-disk free
/// list as a single run, then reset the cache.
fn deplete<D: BlockDevice>(sb: &mut Superblock, dev: &mut D) -> Result<()> {
	log::trace!("deplete: flushing {} insert-cache entries onto the on-disk free list", sb.insert_idx);
	let dzone_start = sb.dzone_start as u64;
	for slot in 0..sb.insert_idx as usize {
		let idx = sb.insert_cache[slot].get().ok_or(SofsError::ReferenceListInconsistent)?;
		let old_tail = sb.free_cluster_tail;
		write_header(
			dev,
			dzone_start,
			idx,
			ClusterHeader {
				prev: old_tail,
				next: ClusterRef::NONE,
				stat: InodeRef::NONE,
			},
		)?;
		match old_tail.get() {
			Some(tail) => {
				let mut t = read_header(dev, dzone_start, tail)?;
				t.next = ClusterRef::some(idx);
				write_header(dev, dzone_start, tail, t)?;
			}
			None => sb.free_cluster_head = ClusterRef::some(idx),
		}
		sb.free_cluster_tail = ClusterRef::some(idx);
		sb.insert_cache[slot] = ClusterRef::NONE;
	}
	sb.insert_idx = 0;
	Ok(())
}

/// Allocate one free cluster for `owner` (spec §4.5.1). `owner` must
/// already be in-use. If the popped cluster is *dirty* — released by a
/// prior `free` without ever being dissociated from its previous owner —
/// that previous owner is cleaned first, so the cluster never ends up
/// claimed by two inodes at once. The cluster's header is written with
/// `stat = owner` before the index is returned; linking it into the
/// owner's sibling chain is the caller's job (`ireftree::ensure`).
pub fn allocate<D: BlockDevice>(
	sb: &mut Superblock,
	itable: &mut InodeTable,
	dev: &mut D,
	owner: InodeNum,
) -> Result<u32> {
	if !itable.get(dev, owner)?.is_in_use() {
		return Err(SofsError::InodeInUseInconsistent);
	}

	if sb.retrieve_idx as usize == DZ {
		replenish(sb, dev)?;
	}
	let slot = sb.retrieve_idx as usize;
	let idx = sb.retrieve_cache[slot].get().ok_or(SofsError::ReferenceListInconsistent)?;
	sb.retrieve_cache[slot] = ClusterRef::NONE;
	sb.retrieve_idx += 1;
	sb.n_clusters_free -= 1;

	let dzone_start = sb.dzone_start as u64;
	let hdr = read_header(dev, dzone_start, idx)?;
	if let Some(prior) = hdr.stat.get() {
		log::debug!("allocate: cluster {idx} was dirty (previously owned by {prior}), cleaning it first");
		let mut prior_inode = itable.get(dev, prior)?;
		let mut scratch = ireftree::RefCache::new();
		ireftree::clean(dev, sb, &mut prior_inode, &mut scratch, prior)?;
		itable.put(dev, prior, prior_inode)?;
	}

	write_header(
		dev,
		dzone_start,
		idx,
		ClusterHeader {
			prev: ClusterRef::NONE,
			next: ClusterRef::NONE,
			stat: InodeRef::some(owner),
		},
	)?;
	log::trace!("allocate: handed cluster {idx} to inode {owner}");
	Ok(idx)
}

/// Return cluster `idx` to the repository. Per spec §4.5.2 step 3, `stat`
/// is left untouched — the cluster becomes *dirty*, still naming the
/// inode it was released from, until a later `allocate` pop dissociates
/// it (or `ireftree::FREE_CLEAN`/`CLEAN` does so directly).
pub fn free<D: BlockDevice>(sb: &mut Superblock, dev: &mut D, idx: u32) -> Result<()> {
	if idx == 0 {
		return Err(SofsError::InvalidArgument);
	}
	let dzone_start = sb.dzone_start as u64;
	let mut hdr = read_header(dev, dzone_start, idx)?;
	if hdr.stat.is_none() {
		return Err(SofsError::AlreadyInList);
	}
	hdr.prev = ClusterRef::NONE;
	hdr.next = ClusterRef::NONE;
	write_header(dev, dzone_start, idx, hdr)?;

	if sb.insert_idx as usize == DZ {
		deplete(sb, dev)?;
	}
	let slot = sb.insert_idx as usize;
	sb.insert_cache[slot] = ClusterRef::some(idx);
	sb.insert_idx += 1;
	sb.n_clusters_free += 1;
	Ok(())
}
