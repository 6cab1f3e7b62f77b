//! Formatter (spec §4.9): lays out a fresh superblock, inode table and
//! data zone on a blank device. The on-disk magic is written as
//! [`crate::data::MAGIC_SENTINEL`] until every other block has landed,
//! and only flipped to [`crate::data::MAGIC_FINAL`] in the very last
//! write — a half-formatted device is never mistaken for a mountable one.

use crate::{
	codec::CODEC,
	data::{
		ClusterHeader, ClusterRef, DirEntry, Inode, InodeNum, InodeRef, MountStatus, Superblock, DZ,
		MAGIC_FINAL, MAGIC_SENTINEL, MODE_TYPE_DIRECTORY, VERSION,
	},
	device::BlockDevice,
	error::{Result, SofsError},
	itable::InodeTable, layout::{Geometry, BLOCKS_PER_CLUSTER},
	superblock::SuperblockStore,
};

fn zero_device<D: BlockDevice>(dev: &mut D, n_total_blocks: u64) -> Result<()> {
	let bs = dev.block_size() as usize;
	let zero = vec![0u8; bs];
	for b in 0..n_total_blocks {
		dev.write_block(b, &zero)?;
	}
	Ok(())
}

fn write_root_cluster<D: BlockDevice>(dev: &mut D, dzone_start: u64, root: InodeNum) -> Result<()> {
	let bs = dev.block_size() as usize;
	let mut buf = vec![0u8; bs];
	let hdr = ClusterHeader {
		prev: ClusterRef::NONE,
		next: ClusterRef::NONE,
		stat: InodeRef::some(root),
	};
	let mut offset = 0usize;
	let hdr_enc = bincode::encode_to_vec(&hdr, CODEC).map_err(|_| SofsError::InternalInconsistency)?;
	buf[..hdr_enc.len()].copy_from_slice(&hdr_enc);
	offset += hdr_enc.len();

	let dot = DirEntry::new(b".", root);
	let dotdot = DirEntry::new(b"..", root);
	for entry in [dot, dotdot] {
		let enc = bincode::encode_to_vec(&entry, CODEC).map_err(|_| SofsError::InternalInconsistency)?;
		buf[offset..offset + enc.len()].copy_from_slice(&enc);
		offset += enc.len();
	}
	// Remaining DPC-2 slots stay zeroed, which decodes as DirEntry::FREE.
	dev.write_block(dzone_start, &buf)?;
	Ok(())
}

/// Format `dev`, a device of `n_total_blocks` blocks, with
/// `requested_inodes` inodes (0 picks the default of `N/8`) and volume
/// label `name`.
pub fn format<D: BlockDevice>(
	dev: &mut D,
	n_total_blocks: u64,
	requested_inodes: u64,
	name: &str,
) -> Result<()> {
	let geom = Geometry::compute(n_total_blocks, requested_inodes)?;
	if geom.n_inodes < 1 {
		return Err(SofsError::InvalidArgument);
	}
	log::debug!(
		"formatting {n_total_blocks} blocks: itable_blocks={}, n_inodes={}, n_clusters_total={}",
		geom.itable_blocks, geom.n_inodes, geom.n_clusters_total
	);

	zero_device(dev, n_total_blocks)?;

	let root = InodeNum::ROOT;
	let mut table = InodeTable::new(geom.itable_start(), geom.itable_blocks);

	// Thread every non-root inode onto the free list, in ascending order,
	// before the root inode is written over slot 0.
	let mut prev = InodeRef::NONE;
	for i in 1..geom.n_inodes {
		let next = if i + 1 < geom.n_inodes {
			InodeRef::some(InodeNum::new(i as u32 + 1))
		} else {
			InodeRef::NONE
		};
		table.put(dev, InodeNum::new(i as u32), Inode::free_clean(next, prev))?;
		prev = InodeRef::some(InodeNum::new(i as u32));
	}
	let free_inode_head = if geom.n_inodes > 1 { InodeRef::some(InodeNum::new(1)) } else { InodeRef::NONE };
	let free_inode_tail = prev;

	let mut root_inode = Inode::free_clean(InodeRef::NONE, InodeRef::NONE);
	root_inode.mode = MODE_TYPE_DIRECTORY | 0o755;
	// refcount = 2 + num_child_dirs(root): the self-referential ".." link
	// supplies root's second reference since root has no parent to hold it.
	root_inode.refcount = 2;
	root_inode.owner = 0;
	root_inode.group = 0;
	root_inode.direct[0] = ClusterRef::some(0);
	root_inode.cluster_count = 1;
	root_inode.size_bytes = crate::data::CLUSTER_PAYLOAD_SIZE as u64;
	root_inode.times_or_links = crate::data::TimesOrLinks::Times { atime: 0, mtime: 0 };
	table.put(dev, root, root_inode)?;
	table.evict(dev)?;

	write_root_cluster(dev, geom.dzone_start(), root)?;

	// Thread the remaining data clusters onto the free-cluster list;
	// cluster 0 belongs to the root directory and is never in the list.
	let mut free_cluster_head = ClusterRef::NONE;
	let mut free_cluster_tail = ClusterRef::NONE;
	if geom.n_clusters_total > 1 {
		let bs = dev.block_size() as usize;
		let mut prev_cluster = ClusterRef::NONE;
		for c in 1..geom.n_clusters_total {
			let next_cluster = if c + 1 < geom.n_clusters_total {
				ClusterRef::some(c as u32 + 1)
			} else {
				ClusterRef::NONE
			};
			let hdr = ClusterHeader {
				prev: prev_cluster,
				next: next_cluster,
				stat: InodeRef::NONE,
			};
			let mut buf = vec![0u8; bs];
			let enc = bincode::encode_to_vec(&hdr, CODEC).map_err(|_| SofsError::InternalInconsistency)?;
			buf[..enc.len()].copy_from_slice(&enc);
			let block = geom.dzone_start() + c * BLOCKS_PER_CLUSTER;
			dev.write_block(block, &buf)?;
			prev_cluster = ClusterRef::some(c as u32);
		}
		free_cluster_head = ClusterRef::some(1);
		free_cluster_tail = prev_cluster;
	}

	let mut sb = Superblock {
		magic: MAGIC_SENTINEL,
		version: VERSION,
		name: [0u8; crate::data::VOLUME_NAME_LEN],
		mount_status: MountStatus::UnmountedClean,
		n_total_blocks: geom.n_total_blocks as u32,
		itable_start: geom.itable_start() as u32,
		itable_block_count: geom.itable_blocks as u32,
		n_inodes_total: geom.n_inodes as u32,
		n_inodes_free: (geom.n_inodes - 1) as u32,
		free_inode_head,
		free_inode_tail,
		dzone_start: geom.dzone_start() as u32,
		n_clusters_total: geom.n_clusters_total as u32,
		n_clusters_free: (geom.n_clusters_total - 1) as u32,
		free_cluster_head,
		free_cluster_tail,
		retrieve_idx: DZ as u32,
		insert_idx: 0,
		retrieve_cache: [ClusterRef::NONE; DZ],
		insert_cache: [ClusterRef::NONE; DZ],
		reserved: [0u8; crate::data::SB_RESERVED_LEN],
	};
	sb.set_name(name);
	sb.magic = MAGIC_FINAL;

	let mut store = SuperblockStore::new(sb);
	store.store(dev)?;
	log::info!("formatted volume {name:?}: {} inodes, {} clusters", geom.n_inodes, geom.n_clusters_total);
	Ok(())
}
