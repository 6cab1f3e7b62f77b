//! Access checks (spec §4.7's `AccessGranted`): a minimal POSIX-style
//! owner/group/other permission test against a requesting uid/gid.

use crate::data::{Inode, PERM_GROUP_EXEC, PERM_GROUP_READ, PERM_GROUP_WRITE, PERM_OTHER_EXEC, PERM_OTHER_READ, PERM_OTHER_WRITE, PERM_OWNER_EXEC, PERM_OWNER_READ, PERM_OWNER_WRITE};

/// The three classic access modes, independent of how the caller's
/// syscall layer names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
	Read,
	Write,
	Execute,
}

/// `uid == 0` always passes, mirroring root's unconditional access in the
/// teacher's own permission checks.
pub fn access_granted(inode: &Inode, uid: u32, gid: u32, mode: Access) -> bool {
	if uid == 0 {
		return true;
	}
	let perm = inode.perm();
	let (r, w, x) = if uid == inode.owner {
		(PERM_OWNER_READ, PERM_OWNER_WRITE, PERM_OWNER_EXEC)
	} else if gid == inode.group {
		(PERM_GROUP_READ, PERM_GROUP_WRITE, PERM_GROUP_EXEC)
	} else {
		(PERM_OTHER_READ, PERM_OTHER_WRITE, PERM_OTHER_EXEC)
	};
	let bit = match mode {
		Access::Read => r,
		Access::Write => w,
		Access::Execute => x,
	};
	perm & bit != 0
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::data::{InodeRef, MODE_TYPE_REGULAR};

	fn inode_with(owner: u32, group: u32, perm: u16) -> Inode {
		let mut i = Inode::free_clean(InodeRef::NONE, InodeRef::NONE);
		i.mode = MODE_TYPE_REGULAR | perm;
		i.owner = owner;
		i.group = group;
		i
	}

	#[test]
	fn root_always_passes() {
		let inode = inode_with(5, 5, 0o000);
		assert!(access_granted(&inode, 0, 0, Access::Write));
	}

	#[test]
	fn owner_bits_apply_to_owner() {
		let inode = inode_with(5, 5, 0o600);
		assert!(access_granted(&inode, 5, 99, Access::Read));
		assert!(access_granted(&inode, 5, 99, Access::Write));
		assert!(!access_granted(&inode, 5, 99, Access::Execute));
	}

	#[test]
	fn other_bits_apply_to_strangers() {
		let inode = inode_with(5, 5, 0o604);
		assert!(access_granted(&inode, 9, 9, Access::Read));
		assert!(!access_granted(&inode, 9, 9, Access::Write));
	}

	#[test]
	fn group_bits_apply_when_group_matches_but_not_owner() {
		let inode = inode_with(5, 7, 0o640);
		assert!(access_granted(&inode, 9, 7, Access::Write));
		assert!(!access_granted(&inode, 9, 7, Access::Execute));
	}
}
