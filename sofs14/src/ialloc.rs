//! Free-inode list (spec §4.4): a FIFO doubly-linked list threaded through
//! the free inodes' overloaded `vD1`/`vD2` fields, with head/tail kept in
//! the superblock. Allocation pops the head; freeing appends at the tail,
//! so an inode is not immediately reused after being freed — it cycles
//! through the rest of the free list first (an Open Question the spec
//! left unresolved; see DESIGN.md).

use crate::{
	data::{InodeNum, InodeRef, Superblock, TimesOrLinks, MODE_FREE},
	device::BlockDevice,
	error::{Result, SofsError},
	itable::InodeTable,
};

/// Pop the head of the free-inode list and return it. The popped inode may
/// be free-clean or free-dirty (§4.4's Allocate defers the CLEAN step to
/// the caller, which has to own the reference-tree cache to run it); either
/// way the caller overwrites it with in-use content before releasing the
/// device.
pub fn allocate<D: BlockDevice>(sb: &mut Superblock, itable: &mut InodeTable, dev: &mut D) -> Result<InodeNum> {
	let head = sb.free_inode_head.get().ok_or(SofsError::NoSpace)?;

	let head_inode = itable.get(dev, head)?;
	if !head_inode.is_free() {
		log::warn!("free-inode list head {head} is not actually free");
		return Err(SofsError::FreeInodeDirtyInconsistent);
	}
	log::trace!("allocate: popping inode {head} off the free list");
	let (next, _prev) = head_inode
		.links()
		.ok_or(SofsError::FreeInodeDirtyInconsistent)?;

	sb.free_inode_head = next;
	match next.get() {
		Some(new_head) => {
			let mut nh = itable.get(dev, new_head)?;
			match &mut nh.times_or_links {
				TimesOrLinks::Links { prev, .. } => *prev = InodeRef::NONE,
				TimesOrLinks::Times { .. } => return Err(SofsError::FreeInodeDirtyInconsistent),
			}
			itable.put(dev, new_head, nh)?;
		}
		None => sb.free_inode_tail = InodeRef::NONE,
	}

	sb.n_inodes_free -= 1;
	Ok(head)
}

/// Append `n` to the tail of the free-inode list. Per spec §4.4, freeing
/// only sets the free-flag and overwrites the link fields — the type bits
/// stay visible, leaving the inode free-*dirty* until something actually
/// releases its clusters (the next Allocate to pop it, via CLEAN).
pub fn free<D: BlockDevice>(sb: &mut Superblock, itable: &mut InodeTable, dev: &mut D, n: InodeNum) -> Result<()> {
	if n == InodeNum::ROOT {
		return Err(SofsError::InvalidArgument);
	}
	let mut current = itable.get(dev, n)?;
	if current.is_free() {
		log::warn!("free: inode {n} is already on the free list");
		return Err(SofsError::AlreadyInList);
	}
	log::trace!("free: appending inode {n} to the free list as free-dirty");

	let old_tail = sb.free_inode_tail;
	current.mode |= MODE_FREE;
	current.times_or_links = TimesOrLinks::Links { next: InodeRef::NONE, prev: old_tail };
	itable.put(dev, n, current)?;

	match old_tail.get() {
		Some(tail) => {
			let mut t = itable.get(dev, tail)?;
			match &mut t.times_or_links {
				TimesOrLinks::Links { next, .. } => *next = InodeRef::some(n),
				TimesOrLinks::Times { .. } => return Err(SofsError::FreeInodeDirtyInconsistent),
			}
			itable.put(dev, tail, t)?;
		}
		None => sb.free_inode_head = InodeRef::some(n),
	}
	sb.free_inode_tail = InodeRef::some(n);
	sb.n_inodes_free += 1;
	Ok(())
}
