//! Directory layer (spec §4.8): a directory's data is just its inode's
//! cluster chain, reinterpreted as a packed array of [`DirEntry`] records
//! instead of raw bytes. Every operation here is entry-level only — it
//! does not touch link counts or free an emptied inode; that orchestration
//! lives in `fs.rs`, which is the only place that sees both the directory
//! layer and the inode lifecycle at once.

use crate::{
	codec::CODEC,
	data::{DirEntry, Inode, InodeNum, Superblock, DPC},
	device::BlockDevice,
	error::{Result, SofsError},
	ireftree::{self, RefCache},
	itable::InodeTable,
};

fn cluster_block(dzone_start: u64, idx: u32) -> u64 {
	dzone_start + idx as u64 * crate::layout::BLOCKS_PER_CLUSTER
}

fn read_entries<D: BlockDevice>(dev: &mut D, dzone_start: u64, idx: u32) -> Result<[DirEntry; DPC]> {
	let bs = dev.block_size() as usize;
	let mut buf = vec![0u8; bs];
	dev.read_block(cluster_block(dzone_start, idx), &mut buf)?;
	let (_, used): (crate::data::ClusterHeader, usize) =
		bincode::decode_from_slice(&buf, CODEC).map_err(|_| SofsError::ClusterHeaderInconsistent)?;
	let mut entries = [DirEntry::FREE; DPC];
	let mut offset = used;
	for slot in entries.iter_mut() {
		let (e, consumed): (DirEntry, usize) =
			bincode::decode_from_slice(&buf[offset..], CODEC).map_err(|_| SofsError::InternalInconsistency)?;
		*slot = e;
		offset += consumed;
	}
	Ok(entries)
}

fn write_entry<D: BlockDevice>(dev: &mut D, dzone_start: u64, idx: u32, slot: usize, entry: DirEntry) -> Result<()> {
	let bs = dev.block_size() as usize;
	let mut buf = vec![0u8; bs];
	dev.read_block(cluster_block(dzone_start, idx), &mut buf)?;
	let (_, hdr_len): (crate::data::ClusterHeader, usize) =
		bincode::decode_from_slice(&buf, CODEC).map_err(|_| SofsError::ClusterHeaderInconsistent)?;
	let entry_size = crate::data::DIRENTRY_SIZE;
	let offset = hdr_len + slot * entry_size;
	let enc = bincode::encode_to_vec(&entry, CODEC).map_err(|_| SofsError::InternalInconsistency)?;
	buf[offset..offset + enc.len()].copy_from_slice(&enc);
	dev.write_block(cluster_block(dzone_start, idx), &buf)?;
	Ok(())
}

/// Visit every `(cluster_logical_index, physical_cluster, slot, entry)`
/// quadruple in `dir`'s cluster chain, stopping at the first hole.
fn for_each_entry<D: BlockDevice, F: FnMut(u64, u32, usize, DirEntry) -> Option<R>, R>(
	dev: &mut D,
	dzone_start: u64,
	dir: &Inode,
	cache: &mut RefCache,
	owner: InodeNum,
	mut f: F,
) -> Result<Option<R>> {
	let mut logical = 0u64;
	loop {
		let Some(physical) = ireftree::get(dev, dzone_start, dir, cache, owner, logical)? else {
			return Ok(None);
		};
		let entries = read_entries(dev, dzone_start, physical)?;
		for (slot, entry) in entries.into_iter().enumerate() {
			if let Some(r) = f(logical, physical, slot, entry) {
				return Ok(Some(r));
			}
		}
		logical += 1;
	}
}

/// Look up `name` in `dir`, returning the inode it names if present.
pub fn lookup<D: BlockDevice>(
	dev: &mut D,
	dzone_start: u64,
	dir: &Inode,
	cache: &mut RefCache,
	owner: InodeNum,
	name: &[u8],
) -> Result<Option<InodeNum>> {
	let found = for_each_entry(dev, dzone_start, dir, cache, owner, |_, _, _, e| {
		if !e.is_free() && e.name_bytes() == name {
			e.inode.get()
		} else {
			None
		}
	})?;
	Ok(found)
}

/// Whether `dir` contains only the implicit `.` and `..` entries.
pub fn is_empty<D: BlockDevice>(
	dev: &mut D,
	dzone_start: u64,
	dir: &Inode,
	cache: &mut RefCache,
	owner: InodeNum,
) -> Result<bool> {
	let extra = for_each_entry(dev, dzone_start, dir, cache, owner, |_, _, _, e| {
		if e.is_free() || e.name_bytes() == b"." || e.name_bytes() == b".." {
			None
		} else {
			Some(())
		}
	})?;
	Ok(extra.is_none())
}

/// Insert `name -> target` into `dir`. Errors with [`SofsError::Exists`]
/// if the name is already bound, [`SofsError::NameTooLong`] if it does
/// not fit, and allocates a new cluster via [`ireftree::ensure`] only
/// when every existing cluster is full.
pub fn add<D: BlockDevice>(
	dev: &mut D,
	sb: &mut Superblock,
	itable: &mut InodeTable,
	dir: &mut Inode,
	cache: &mut RefCache,
	owner: InodeNum,
	name: &[u8],
	target: InodeNum,
) -> Result<()> {
	if name.is_empty() || name.len() > crate::data::MAX_NAME {
		return Err(SofsError::NameTooLong);
	}
	let dzone_start = sb.dzone_start as u64;

	// A single full pass: a duplicate anywhere in the directory is an
	// error regardless of whether a free slot happened to come first, so
	// the whole chain is scanned before a free slot is acted on.
	let mut free_slot: Option<(u32, usize)> = None;
	let mut next_logical = 0u64;
	loop {
		let Some(physical) = ireftree::get(dev, dzone_start, dir, cache, owner, next_logical)? else {
			break;
		};
		let entries = read_entries(dev, dzone_start, physical)?;
		for (slot, e) in entries.into_iter().enumerate() {
			if !e.is_free() && e.name_bytes() == name {
				return Err(SofsError::Exists);
			}
			if e.is_free() && free_slot.is_none() {
				free_slot = Some((physical, slot));
			}
		}
		next_logical += 1;
	}

	let (physical, slot) = match free_slot {
		Some(slot) => slot,
		None => {
			// Every existing cluster is full (or the directory is empty);
			// grow it by one cluster and use its first slot.
			let physical = ireftree::ensure(dev, sb, itable, dir, cache, owner, next_logical)?;
			dir.size_bytes += crate::data::CLUSTER_PAYLOAD_SIZE as u64;
			(physical, 0)
		}
	};

	write_entry(dev, dzone_start, physical, slot, DirEntry::new(name, target))?;
	Ok(())
}

/// Remove `name` from `dir`. Implements the crash-consistent sequence
/// from spec §3: first toggle the entry into its tombstone form (so a
/// crash mid-removal still shows a non-colliding, clearly-dead name on
/// recovery), then zero-fill it to free-clean — restoring the directory's
/// in-memory equivalence to never having held the entry, which an
/// add-then-remove round trip requires.
pub fn remove<D: BlockDevice>(
	dev: &mut D,
	sb: &mut Superblock,
	dir: &Inode,
	cache: &mut RefCache,
	owner: InodeNum,
	name: &[u8],
) -> Result<InodeNum> {
	let dzone_start = sb.dzone_start as u64;
	let found = for_each_entry(dev, dzone_start, dir, cache, owner, |_, physical, slot, e| {
		if !e.is_free() && e.name_bytes() == name {
			Some((physical, slot, e))
		} else {
			None
		}
	})?;
	let Some((physical, slot, mut entry)) = found else {
		return Err(SofsError::NoEntry);
	};
	let target = entry.inode.get().ok_or(SofsError::InternalInconsistency)?;

	entry.toggle_tombstone();
	write_entry(dev, dzone_start, physical, slot, entry)?;
	write_entry(dev, dzone_start, physical, slot, DirEntry::FREE)?;

	Ok(target)
}

/// Rebind `name` from whatever it currently points at to `target`, used
/// by rename to retarget a destination name that already exists (the
/// caller is responsible for adjusting the old target's refcount).
pub fn rebind<D: BlockDevice>(
	dev: &mut D,
	sb: &mut Superblock,
	dir: &Inode,
	cache: &mut RefCache,
	owner: InodeNum,
	name: &[u8],
	target: InodeNum,
) -> Result<()> {
	let dzone_start = sb.dzone_start as u64;
	let found = for_each_entry(dev, dzone_start, dir, cache, owner, |_, physical, slot, e| {
		if !e.is_free() && e.name_bytes() == name {
			Some((physical, slot))
		} else {
			None
		}
	})?;
	let (physical, slot) = found.ok_or(SofsError::NoEntry)?;
	write_entry(dev, dzone_start, physical, slot, DirEntry::new(name, target))?;
	Ok(())
}
