//! On-disk metadata engine for SOFS14, a UNIX-style block-structured
//! filesystem built on top of a single regular file acting as a raw block
//! device.
//!
//! This crate implements exactly the core described in the specification:
//! the superblock, the inode table, the free-inode list, the free-cluster
//! repository, the per-inode data-cluster reference tree, and a directory
//! layer on top of it. It consumes a [`BlockDevice`] — *read block* /
//! *write block* plus *open*/*close* — and nothing more; the raw I/O
//! primitive, the write-back block cache, the mount driver and the CLI
//! wrappers are all external collaborators outside this crate.

mod balloc;
mod codec;
mod consistency;
mod data;
mod device;
mod dir;
mod error;
mod format;
mod fs;
mod ialloc;
mod ireftree;
mod itable;
mod layout;
mod perm;
mod superblock;

pub use crate::{
	consistency::{check as consistency_check, Defect},
	data::{
		ClusterRef, DirEntry, Inode, InodeNum, InodeRef, InodeType, MountStatus, Superblock,
		TimesOrLinks, CLUSTER_SIZE, DIRENTRY_NAME_LEN, DPC, IPB, N_DIRECT, RPC,
	},
	device::{BlockDevice, FileBlockDevice, RawIo},
	error::{Result, SofsError},
	format::format,
	fs::{Info, Sofs14},
	layout::{Geometry, BLOCK_SIZE},
	perm::{access_granted, Access},
};
