//! On-disk record layouts (spec §3). All multi-byte integers are
//! little-endian; [`crate::fs::codec`] encodes/decodes with a fixed-int,
//! little-endian `bincode` configuration throughout.

use bincode::{
	de::Decoder as BinDecoder,
	enc::Encoder as BinEncoder,
	error::{DecodeError, EncodeError},
	Decode, Encode,
};

use crate::layout::BLOCKS_PER_CLUSTER;

/// Sentinel value for "no inode" / "no cluster". Valid inode and cluster
/// indices never reach `u32::MAX` because [`crate::layout::Geometry`]
/// refuses device sizes large enough to produce one.
const SENTINEL: u32 = u32::MAX;

/// Number of direct cluster references held directly in an inode.
pub const N_DIRECT: usize = 6;

/// Size in bytes of one on-disk inode record.
pub const INODE_SIZE: usize = 64;

/// Inodes per inode-table block (`IPB`).
pub const IPB: usize = (crate::layout::BLOCK_SIZE as usize) / INODE_SIZE;

/// Size in bytes of a data cluster (`C = B*K`).
pub const CLUSTER_SIZE: usize = crate::layout::BLOCK_SIZE as usize * BLOCKS_PER_CLUSTER as usize;

/// Size in bytes of a data-cluster header: {prev, next, stat}.
pub const CLUSTER_HEADER_SIZE: usize = 12;

/// Usable payload bytes following a cluster's header.
pub const CLUSTER_PAYLOAD_SIZE: usize = CLUSTER_SIZE - CLUSTER_HEADER_SIZE;

/// References per cluster (`RPC`): how many cluster indices fit in one
/// index (indirect/double-indirect) cluster's payload.
pub const RPC: usize = CLUSTER_PAYLOAD_SIZE / 4;

/// Bytes reserved for a directory entry's name, including the implicit
/// null terminator. `MAX_NAME` usable characters is one less.
pub const DIRENTRY_NAME_LEN: usize = 60;

/// Maximum usable length of a directory entry name.
pub const MAX_NAME: usize = DIRENTRY_NAME_LEN - 1;

/// Size in bytes of one directory entry record.
pub const DIRENTRY_SIZE: usize = DIRENTRY_NAME_LEN + 4;

/// Directory entries per cluster (`DPC`).
pub const DPC: usize = CLUSTER_PAYLOAD_SIZE / DIRENTRY_SIZE;

/// Bytes left unused at the tail of a directory cluster's payload once
/// `DPC` fixed-size entries are packed in (not an error — just the
/// remainder of an integer division, left zeroed).
pub const DIR_PADDING: usize = CLUSTER_PAYLOAD_SIZE - DPC * DIRENTRY_SIZE;

/// Bounded length of the volume label stored in the superblock,
/// zero-terminated.
pub const VOLUME_NAME_LEN: usize = 32;

/// Capacity of the retrieve/insert free-cluster caches held in the
/// superblock (`DZ`).
pub const DZ: usize = 16;

const SB_FIXED_LEN: usize = 2 + 2 // magic, version
	+ 1 // mount_status
	+ 4 * 14 // the fourteen u32 layout/list fields below
	+ VOLUME_NAME_LEN;
pub(crate) const SB_RESERVED_LEN: usize =
	crate::layout::BLOCK_SIZE as usize - SB_FIXED_LEN - 2 * 4 * DZ;

/// Sentinel magic written by the formatter before it has finished;
/// flipped to [`MAGIC_FINAL`] only on success (spec §3, §7).
pub const MAGIC_SENTINEL: u16 = 0xffff;
/// Magic written once formatting completes successfully.
pub const MAGIC_FINAL: u16 = 0x5334; // "S4"
/// On-disk format version understood by this engine.
pub const VERSION: u16 = 1;

/// Mount status recorded in the superblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountStatus {
	Pristine,
	Mounted,
	UnmountedClean,
}

impl Encode for MountStatus {
	fn encode<E: BinEncoder>(&self, e: &mut E) -> Result<(), EncodeError> {
		let v: u8 = match self {
			Self::Pristine => 0,
			Self::Mounted => 1,
			Self::UnmountedClean => 2,
		};
		v.encode(e)
	}
}

impl Decode for MountStatus {
	fn decode<D: BinDecoder>(d: &mut D) -> Result<Self, DecodeError> {
		let v = u8::decode(d)?;
		Ok(match v {
			0 => Self::Pristine,
			1 => Self::Mounted,
			_ => Self::UnmountedClean,
		})
	}
}

/// Inode index. Inode 0 is always the root directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Encode, Decode)]
pub struct InodeNum(pub u32);

impl InodeNum {
	pub const ROOT: InodeNum = InodeNum(0);

	pub fn new(n: u32) -> Self {
		Self(n)
	}

	pub fn get(&self) -> u32 {
		self.0
	}
}

impl std::fmt::Display for InodeNum {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// A possibly-absent inode index, as stored in a free list link or a
/// directory entry. On disk this is just a `u32`, with `u32::MAX` as the
/// "none" sentinel — kept as a distinct type from [`InodeNum`] so callers
/// cannot accidentally treat a sentinel as a real inode index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeRef(u32);

impl InodeRef {
	pub const NONE: InodeRef = InodeRef(SENTINEL);

	pub fn some(n: InodeNum) -> Self {
		Self(n.0)
	}

	pub fn get(&self) -> Option<InodeNum> {
		if self.0 == SENTINEL {
			None
		} else {
			Some(InodeNum(self.0))
		}
	}

	pub fn is_none(&self) -> bool {
		self.0 == SENTINEL
	}
}

impl From<Option<InodeNum>> for InodeRef {
	fn from(v: Option<InodeNum>) -> Self {
		match v {
			Some(n) => Self::some(n),
			None => Self::NONE,
		}
	}
}

impl Encode for InodeRef {
	fn encode<E: BinEncoder>(&self, e: &mut E) -> Result<(), EncodeError> {
		self.0.encode(e)
	}
}

impl Decode for InodeRef {
	fn decode<D: BinDecoder>(d: &mut D) -> Result<Self, DecodeError> {
		Ok(Self(u32::decode(d)?))
	}
}

/// A possibly-absent logical cluster index, as stored in an inode's
/// direct/indirect slots, an index cluster's reference array, or a free
/// cluster list link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct ClusterRef(u32);

impl ClusterRef {
	pub const NONE: ClusterRef = ClusterRef(SENTINEL);

	pub fn some(idx: u32) -> Self {
		Self(idx)
	}

	pub fn get(&self) -> Option<u32> {
		if self.0 == SENTINEL {
			None
		} else {
			Some(self.0)
		}
	}

	pub fn is_none(&self) -> bool {
		self.0 == SENTINEL
	}
}

impl From<Option<u32>> for ClusterRef {
	fn from(v: Option<u32>) -> Self {
		match v {
			Some(n) => Self::some(n),
			None => Self::NONE,
		}
	}
}

/// File type tag carried in an inode's mode bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeType {
	RegularFile,
	Directory,
	Symlink,
}

/// Inode free-flag: set when the inode is free (clean or dirty).
pub const MODE_FREE: u16 = 0x8000;
/// Mask over the type bits.
pub const MODE_TYPE_MASK: u16 = 0x7000;
pub const MODE_TYPE_REGULAR: u16 = 0x1000;
pub const MODE_TYPE_DIRECTORY: u16 = 0x2000;
pub const MODE_TYPE_SYMLINK: u16 = 0x3000;
/// Mask over the nine owner/group/other permission bits.
pub const MODE_PERM_MASK: u16 = 0x01ff;

pub const PERM_OWNER_READ: u16 = 0o400;
pub const PERM_OWNER_WRITE: u16 = 0o200;
pub const PERM_OWNER_EXEC: u16 = 0o100;
pub const PERM_GROUP_READ: u16 = 0o040;
pub const PERM_GROUP_WRITE: u16 = 0o020;
pub const PERM_GROUP_EXEC: u16 = 0o010;
pub const PERM_OTHER_READ: u16 = 0o004;
pub const PERM_OTHER_WRITE: u16 = 0o002;
pub const PERM_OTHER_EXEC: u16 = 0o001;

/// Exact on-disk bit pattern of a fully free-clean inode's mode field
/// (spec §3: "mode is exactly the free sentinel").
pub const MODE_FREE_CLEAN: u16 = MODE_FREE;

/// The overloaded `vD1`/`vD2` pair (spec §9): timestamps while the inode
/// is in use, free-list links while it is free. The on-disk bit pattern
/// is identical in both cases (two `u32`s); the discriminant is the
/// inode's own free-flag, never stored twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimesOrLinks {
	Times { atime: u32, mtime: u32 },
	Links { next: InodeRef, prev: InodeRef },
}

/// A fixed-size, 64-byte inode record (`INODE_SIZE`, `IPB` per block).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
	pub mode:          u16,
	pub refcount:      u16,
	pub owner:         u32,
	pub group:         u32,
	pub size_bytes:    u64,
	pub cluster_count: u32,
	pub direct:        [ClusterRef; N_DIRECT],
	pub indirect1:     ClusterRef,
	pub indirect2:     ClusterRef,
	pub times_or_links: TimesOrLinks,
}

impl Inode {
	/// A fully free-clean inode: the state every inode starts in at
	/// format time (save for inode 0) and returns to once [`Inode`]
	/// cleaning dissociates its last dangling cluster.
	pub fn free_clean(next: InodeRef, prev: InodeRef) -> Self {
		Self {
			mode:          MODE_FREE_CLEAN,
			refcount:      0,
			owner:         0,
			group:         0,
			size_bytes:    0,
			cluster_count: 0,
			direct:        [ClusterRef::NONE; N_DIRECT],
			indirect1:     ClusterRef::NONE,
			indirect2:     ClusterRef::NONE,
			times_or_links: TimesOrLinks::Links { next, prev },
		}
	}

	pub fn is_free(&self) -> bool {
		self.mode & MODE_FREE != 0
	}

	pub fn is_free_clean(&self) -> bool {
		self.mode == MODE_FREE_CLEAN
	}

	pub fn is_free_dirty(&self) -> bool {
		self.is_free() && !self.is_free_clean()
	}

	pub fn is_in_use(&self) -> bool {
		!self.is_free()
	}

	pub fn kind(&self) -> Option<InodeType> {
		match self.mode & MODE_TYPE_MASK {
			MODE_TYPE_REGULAR => Some(InodeType::RegularFile),
			MODE_TYPE_DIRECTORY => Some(InodeType::Directory),
			MODE_TYPE_SYMLINK => Some(InodeType::Symlink),
			_ => None,
		}
	}

	pub fn perm(&self) -> u16 {
		self.mode & MODE_PERM_MASK
	}

	pub fn links(&self) -> Option<(InodeRef, InodeRef)> {
		match self.times_or_links {
			TimesOrLinks::Links { next, prev } => Some((next, prev)),
			TimesOrLinks::Times { .. } => None,
		}
	}

	pub fn times(&self) -> Option<(u32, u32)> {
		match self.times_or_links {
			TimesOrLinks::Times { atime, mtime } => Some((atime, mtime)),
			TimesOrLinks::Links { .. } => None,
		}
	}
}

impl Encode for Inode {
	fn encode<E: BinEncoder>(&self, e: &mut E) -> Result<(), EncodeError> {
		self.mode.encode(e)?;
		self.refcount.encode(e)?;
		self.owner.encode(e)?;
		self.group.encode(e)?;
		self.size_bytes.encode(e)?;
		self.cluster_count.encode(e)?;
		self.direct.encode(e)?;
		self.indirect1.encode(e)?;
		self.indirect2.encode(e)?;
		match self.times_or_links {
			TimesOrLinks::Times { atime, mtime } => {
				atime.encode(e)?;
				mtime.encode(e)?;
			}
			TimesOrLinks::Links { next, prev } => {
				next.encode(e)?;
				prev.encode(e)?;
			}
		}
		Ok(())
	}
}

impl Decode for Inode {
	fn decode<D: BinDecoder>(d: &mut D) -> Result<Self, DecodeError> {
		let mode = u16::decode(d)?;
		let refcount = u16::decode(d)?;
		let owner = u32::decode(d)?;
		let group = u32::decode(d)?;
		let size_bytes = u64::decode(d)?;
		let cluster_count = u32::decode(d)?;
		let direct = <[ClusterRef; N_DIRECT]>::decode(d)?;
		let indirect1 = ClusterRef::decode(d)?;
		let indirect2 = ClusterRef::decode(d)?;

		let free = mode & MODE_FREE != 0;
		let times_or_links = if free {
			let next = InodeRef::decode(d)?;
			let prev = InodeRef::decode(d)?;
			TimesOrLinks::Links { next, prev }
		} else {
			let atime = u32::decode(d)?;
			let mtime = u32::decode(d)?;
			TimesOrLinks::Times { atime, mtime }
		};

		Ok(Self {
			mode,
			refcount,
			owner,
			group,
			size_bytes,
			cluster_count,
			direct,
			indirect1,
			indirect2,
			times_or_links,
		})
	}
}

/// The singleton superblock record (block 0).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
	pub magic:             u16,
	pub version:           u16,
	pub name:              [u8; VOLUME_NAME_LEN],
	pub mount_status:      MountStatus,

	pub n_total_blocks:    u32,
	pub itable_start:      u32,
	pub itable_block_count: u32,
	pub n_inodes_total:    u32,
	pub n_inodes_free:     u32,
	pub free_inode_head:   InodeRef,
	pub free_inode_tail:   InodeRef,

	pub dzone_start:       u32,
	pub n_clusters_total:  u32,
	pub n_clusters_free:   u32,
	pub free_cluster_head: ClusterRef,
	pub free_cluster_tail: ClusterRef,

	pub retrieve_idx:      u32,
	pub insert_idx:        u32,
	pub retrieve_cache:    [ClusterRef; DZ],
	pub insert_cache:      [ClusterRef; DZ],

	pub reserved:          [u8; SB_RESERVED_LEN],
}

impl Superblock {
	pub fn set_name(&mut self, name: &str) {
		let bytes = name.as_bytes();
		let n = bytes.len().min(VOLUME_NAME_LEN - 1);
		self.name = [0u8; VOLUME_NAME_LEN];
		self.name[..n].copy_from_slice(&bytes[..n]);
	}

	pub fn name(&self) -> &str {
		let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
		std::str::from_utf8(&self.name[..end]).unwrap_or("")
	}

	pub fn is_mountable(&self) -> bool {
		self.magic != MAGIC_SENTINEL && self.magic == MAGIC_FINAL
	}
}

impl Encode for Superblock {
	fn encode<E: BinEncoder>(&self, e: &mut E) -> Result<(), EncodeError> {
		self.magic.encode(e)?;
		self.version.encode(e)?;
		self.name.encode(e)?;
		self.mount_status.encode(e)?;
		self.n_total_blocks.encode(e)?;
		self.itable_start.encode(e)?;
		self.itable_block_count.encode(e)?;
		self.n_inodes_total.encode(e)?;
		self.n_inodes_free.encode(e)?;
		self.free_inode_head.encode(e)?;
		self.free_inode_tail.encode(e)?;
		self.dzone_start.encode(e)?;
		self.n_clusters_total.encode(e)?;
		self.n_clusters_free.encode(e)?;
		self.free_cluster_head.encode(e)?;
		self.free_cluster_tail.encode(e)?;
		self.retrieve_idx.encode(e)?;
		self.insert_idx.encode(e)?;
		self.retrieve_cache.encode(e)?;
		self.insert_cache.encode(e)?;
		self.reserved.encode(e)?;
		Ok(())
	}
}

impl Decode for Superblock {
	fn decode<D: BinDecoder>(d: &mut D) -> Result<Self, DecodeError> {
		Ok(Self {
			magic:              u16::decode(d)?,
			version:            u16::decode(d)?,
			name:               <[u8; VOLUME_NAME_LEN]>::decode(d)?,
			mount_status:       MountStatus::decode(d)?,
			n_total_blocks:     u32::decode(d)?,
			itable_start:       u32::decode(d)?,
			itable_block_count: u32::decode(d)?,
			n_inodes_total:     u32::decode(d)?,
			n_inodes_free:      u32::decode(d)?,
			free_inode_head:    InodeRef::decode(d)?,
			free_inode_tail:    InodeRef::decode(d)?,
			dzone_start:        u32::decode(d)?,
			n_clusters_total:   u32::decode(d)?,
			n_clusters_free:    u32::decode(d)?,
			free_cluster_head:  ClusterRef::decode(d)?,
			free_cluster_tail:  ClusterRef::decode(d)?,
			retrieve_idx:       u32::decode(d)?,
			insert_idx:         u32::decode(d)?,
			retrieve_cache:     <[ClusterRef; DZ]>::decode(d)?,
			insert_cache:       <[ClusterRef; DZ]>::decode(d)?,
			reserved:           <[u8; SB_RESERVED_LEN]>::decode(d)?,
		})
	}
}

/// Header shared by every data cluster: {prev, next, stat}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct ClusterHeader {
	pub prev: ClusterRef,
	pub next: ClusterRef,
	/// The owning inode, or [`InodeRef::NONE`] when the cluster is
	/// clean-free.
	pub stat: InodeRef,
}

impl ClusterHeader {
	pub fn is_clean(&self) -> bool {
		self.stat.is_none()
	}
}

/// One fixed-size directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
	pub name:  [u8; DIRENTRY_NAME_LEN],
	pub inode: InodeRef,
}

impl DirEntry {
	pub const FREE: Self = Self {
		name:  [0u8; DIRENTRY_NAME_LEN],
		inode: InodeRef::NONE,
	};

	pub fn new(name: &[u8], inode: InodeNum) -> Self {
		let mut buf = [0u8; DIRENTRY_NAME_LEN];
		buf[..name.len()].copy_from_slice(name);
		Self {
			name:  buf,
			inode: InodeRef::some(inode),
		}
	}

	pub fn is_free(&self) -> bool {
		self.inode.is_none() && self.name.iter().all(|&b| b == 0)
	}

	/// Length of the name up to the first null byte.
	pub fn name_len(&self) -> usize {
		self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len())
	}

	pub fn name_bytes(&self) -> &[u8] {
		&self.name[..self.name_len()]
	}

	/// Mark this entry as a rename/remove tombstone in place (spec §3):
	/// swap the first and last byte of the name array. Applying this
	/// twice restores the original name, which is how a crash between
	/// the tombstone write and the final free-clean write stays
	/// recoverable.
	pub fn toggle_tombstone(&mut self) {
		self.name.swap(0, DIRENTRY_NAME_LEN - 1);
	}
}

impl Encode for DirEntry {
	fn encode<E: BinEncoder>(&self, e: &mut E) -> Result<(), EncodeError> {
		self.name.encode(e)?;
		self.inode.encode(e)?;
		Ok(())
	}
}

impl Decode for DirEntry {
	fn decode<D: BinDecoder>(d: &mut D) -> Result<Self, DecodeError> {
		Ok(Self {
			name:  <[u8; DIRENTRY_NAME_LEN]>::decode(d)?,
			inode: InodeRef::decode(d)?,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn inode_is_exactly_64_bytes() {
		let cfg = bincode::config::standard()
			.with_fixed_int_encoding()
			.with_little_endian();
		let ino = Inode::free_clean(InodeRef::NONE, InodeRef::NONE);
		let bytes = bincode::encode_to_vec(&ino, cfg).unwrap();
		assert_eq!(bytes.len(), INODE_SIZE);
	}

	#[test]
	fn direntry_is_exact_size() {
		let cfg = bincode::config::standard()
			.with_fixed_int_encoding()
			.with_little_endian();
		let e = DirEntry::new(b"foo", InodeNum::new(3));
		let bytes = bincode::encode_to_vec(&e, cfg).unwrap();
		assert_eq!(bytes.len(), DIRENTRY_SIZE);
	}

	#[test]
	fn superblock_fits_in_one_block() {
		assert!(SB_FIXED_LEN + 2 * 4 * DZ + SB_RESERVED_LEN == crate::layout::BLOCK_SIZE as usize);
	}

	#[test]
	fn ipb_divides_block_size_exactly() {
		assert_eq!(IPB * INODE_SIZE, crate::layout::BLOCK_SIZE as usize);
	}

	#[test]
	fn tombstone_toggle_is_an_involution() {
		let mut e = DirEntry::new(b"foo", InodeNum::new(1));
		let orig = e;
		e.toggle_tombstone();
		assert_ne!(e.name[0], orig.name[0]);
		e.toggle_tombstone();
		assert_eq!(e, orig);
	}

	#[test]
	fn inode_free_dirty_retains_type_bits() {
		let mut ino = Inode::free_clean(InodeRef::NONE, InodeRef::NONE);
		ino.mode = MODE_TYPE_REGULAR | 0o644;
		ino.mode |= MODE_FREE;
		assert!(ino.is_free_dirty());
		assert_eq!(ino.kind(), Some(InodeType::RegularFile));
	}
}
