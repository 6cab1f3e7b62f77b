//! Whole-filesystem consistency walk (spec §8's invariants), exposed both
//! as a standalone [`check`] entry point and as the `debug_assert!`-gated
//! spot checks sprinkled through `ialloc`/`balloc`/`dir` themselves. This
//! is the `fsck`-lite the teacher's own test suite leans on heavily
//! (`sbassert!`-style checks scattered through its borrow/commit paths),
//! generalized into one pass a caller can run on demand.

use crate::{
	data::{Inode, InodeNum},
	device::BlockDevice,
	error::{Result, SofsError},
	ireftree::RefCache,
	itable::InodeTable,
	superblock::SuperblockStore,
};

/// A single consistency defect. Deliberately flat, like [`SofsError`]
/// itself — a caller wants the list of everything wrong, not a tree of
/// causes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Defect {
	FreeInodeCountMismatch { recorded: u32, actual: u32 },
	FreeClusterCountMismatch { recorded: u32, actual: u32 },
	FreeInodeListCycle,
	InUseInodeHasZeroRefcount(InodeNum),
	DirectoryRefcountMismatch { dir: InodeNum, expected: u16, actual: u16 },
	GeometryInvariantViolated,
}

/// Walk the whole device and return every [`Defect`] found. An empty
/// result means the volume is internally consistent; it says nothing
/// about whether its *contents* are what a user expects.
pub fn check<D: BlockDevice>(dev: &mut D) -> Result<Vec<Defect>> {
	let store = SuperblockStore::load(dev)?;
	let sb = store.get().clone();
	let mut defects = Vec::new();

	let k = crate::layout::BLOCKS_PER_CLUSTER;
	if 1 + sb.itable_block_count as u64 + sb.n_clusters_total as u64 * k != sb.n_total_blocks as u64 {
		defects.push(Defect::GeometryInvariantViolated);
	}

	let mut table = InodeTable::new(sb.itable_start as u64, sb.itable_block_count as u64);

	// Free-inode list: walk it and cross-check against n_inodes_free.
	let mut seen = std::collections::HashSet::new();
	let mut cur = sb.free_inode_head;
	while let Some(n) = cur.get() {
		if !seen.insert(n) {
			defects.push(Defect::FreeInodeListCycle);
			break;
		}
		let inode = table.get(dev, n)?;
		let Some((next, _)) = inode.links() else {
			break;
		};
		cur = next;
	}
	if seen.len() as u32 != sb.n_inodes_free {
		defects.push(Defect::FreeInodeCountMismatch {
			recorded: sb.n_inodes_free,
			actual:   seen.len() as u32,
		});
	}

	// In-use inode refcounts.
	for i in 0..sb.n_inodes_total {
		let n = InodeNum::new(i);
		let inode = table.get(dev, n)?;
		if inode.is_in_use() && inode.refcount == 0 {
			defects.push(Defect::InUseInodeHasZeroRefcount(n));
		}
	}

	// Directory refcount invariant, walked top-down from root so a cycle
	// in the tree (which should be impossible given mkdir/rmdir's own
	// invariants) cannot spin forever: depth is bounded by n_inodes_total.
	let mut cache = RefCache::new();
	let root = table.get(dev, InodeNum::ROOT)?;
	walk_directory_refcounts(dev, &sb, &mut table, &mut cache, InodeNum::ROOT, &root, &mut defects)?;

	Ok(defects)
}

fn walk_directory_refcounts<D: BlockDevice>(
	dev: &mut D,
	sb: &crate::data::Superblock,
	table: &mut InodeTable,
	cache: &mut RefCache,
	n: InodeNum,
	inode: &Inode,
	defects: &mut Vec<Defect>,
) -> Result<()> {
	let dzone_start = sb.dzone_start as u64;
	let mut child_dirs = Vec::new();

	let names = collect_names(dev, dzone_start, inode, cache, n)?;
	for (name, target) in names {
		if name == b"." || name == b".." {
			continue;
		}
		let child = table.get(dev, target)?;
		if child.kind() == Some(crate::data::InodeType::Directory) {
			child_dirs.push((target, child));
		}
	}

	let expected = 2u16.saturating_add(child_dirs.len() as u16);
	if inode.refcount != expected {
		defects.push(Defect::DirectoryRefcountMismatch {
			dir:      n,
			expected,
			actual:   inode.refcount,
		});
	}

	for (child_n, child_inode) in child_dirs {
		walk_directory_refcounts(dev, sb, table, cache, child_n, &child_inode, defects)?;
	}
	Ok(())
}

fn collect_names<D: BlockDevice>(
	dev: &mut D,
	dzone_start: u64,
	dir_inode: &Inode,
	cache: &mut RefCache,
	owner: InodeNum,
) -> Result<Vec<(Vec<u8>, InodeNum)>> {
	let mut out = Vec::new();
	// dir::lookup only returns the first match; walk clusters directly
	// here since we need every entry, not just one name.
	let mut logical = 0u64;
	loop {
		let Some(physical) = crate::ireftree::get(dev, dzone_start, dir_inode, cache, owner, logical)? else {
			break;
		};
		let bs_entries = read_all_entries(dev, dzone_start, physical)?;
		for e in bs_entries {
			if !e.is_free() {
				if let Some(target) = e.inode.get() {
					out.push((e.name_bytes().to_vec(), target));
				}
			}
		}
		logical += 1;
	}
	Ok(out)
}

fn read_all_entries<D: BlockDevice>(
	dev: &mut D,
	dzone_start: u64,
	physical: u32,
) -> Result<[crate::data::DirEntry; crate::data::DPC]> {
	let bs = dev.block_size() as usize;
	let mut buf = vec![0u8; bs];
	dev.read_block(dzone_start + physical as u64 * crate::layout::BLOCKS_PER_CLUSTER, &mut buf)?;
	let (_, used): (crate::data::ClusterHeader, usize) =
		bincode::decode_from_slice(&buf, crate::codec::CODEC).map_err(|_| SofsError::ClusterHeaderInconsistent)?;
	let mut entries = [crate::data::DirEntry::FREE; crate::data::DPC];
	let mut offset = used;
	for slot in entries.iter_mut() {
		let (e, consumed): (crate::data::DirEntry, usize) = bincode::decode_from_slice(&buf[offset..], crate::codec::CODEC)
			.map_err(|_| SofsError::InternalInconsistency)?;
		*slot = e;
		offset += consumed;
	}
	Ok(entries)
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use super::*;
	use crate::{device::FileBlockDevice, format};

	#[test]
	fn freshly_formatted_volume_has_no_defects() {
		let buf = vec![0u8; (19 * crate::layout::BLOCK_SIZE) as usize];
		let mut dev = FileBlockDevice::new(Cursor::new(buf), crate::layout::BLOCK_SIZE);
		format::format(&mut dev, 19, 16, "vol").unwrap();
		let defects = check(&mut dev).unwrap();
		assert!(defects.is_empty(), "{defects:?}");
	}
}
