//! Top-level filesystem handle (spec §4.7's per-inode operations plus the
//! operations that tie the inode table, free lists, reference tree and
//! directory layer together into something a syscall layer can drive).
//! Analogous to the teacher's `Ufs<R: Backend>`.

use crate::{
	data::{
		ClusterRef, Inode, InodeNum, InodeType, CLUSTER_PAYLOAD_SIZE,
		MODE_TYPE_DIRECTORY, MODE_TYPE_REGULAR, MODE_TYPE_SYMLINK, MODE_PERM_MASK,
	},
	device::BlockDevice,
	dir,
	error::{Result, SofsError},
	ialloc,
	ireftree::{self, RefCache},
	itable::InodeTable,
	layout::BLOCKS_PER_CLUSTER,
	perm::{access_granted, Access},
	superblock::SuperblockStore,
};

/// A `statfs`-style summary of a mounted volume (spec's supplemented
/// feature G; grounded on the teacher's `ufs::Info`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Info {
	pub block_size:     u64,
	pub cluster_size:    u64,
	pub total_inodes:   u32,
	pub free_inodes:    u32,
	pub total_clusters: u32,
	pub free_clusters:  u32,
}

/// Maximum number of symlink hops `resolve` will follow before giving up
/// (spec §4.8/§8: two nested symlinks is already too many).
const MAX_SYMLINK_DEPTH: u32 = 1;

/// A mounted SOFS14 volume. Owns the single inode-table block slot and
/// the single reference-cluster slot the spec mandates (§5); there is no
/// LRU here by design.
pub struct Sofs14<D: BlockDevice> {
	dev:       D,
	sb:        SuperblockStore,
	itable:    InodeTable,
	ref_cache: RefCache,
}

impl<D: BlockDevice> Sofs14<D> {
	/// Mount an already-formatted device: load its superblock, mark it
	/// mounted, and build the inode table store from its recorded
	/// geometry.
	pub fn mount(mut dev: D) -> Result<Self> {
		let mut sb = SuperblockStore::load(&mut dev)?;
		log::debug!(
			"mounting volume {:?}: {} inodes free of {}, {} clusters free of {}",
			sb.get().name(), sb.get().n_inodes_free, sb.get().n_inodes_total,
			sb.get().n_clusters_free, sb.get().n_clusters_total
		);
		sb.get_mut().mount_status = crate::data::MountStatus::Mounted;
		sb.store(&mut dev)?;
		let itable = InodeTable::new(sb.get().itable_start as u64, sb.get().itable_block_count as u64);
		Ok(Self {
			dev,
			sb,
			itable,
			ref_cache: RefCache::new(),
		})
	}

	/// Flush every dirty structure and mark the superblock cleanly
	/// unmounted, returning the underlying device.
	pub fn unmount(mut self) -> Result<D> {
		log::debug!("unmounting volume {:?}", self.sb.get().name());
		self.itable.evict(&mut self.dev)?;
		self.sb.get_mut().mount_status = crate::data::MountStatus::UnmountedClean;
		self.sb.store(&mut self.dev)?;
		Ok(self.dev)
	}

	pub fn info(&self) -> Info {
		let sb = self.sb.get();
		Info {
			block_size:     self.dev_block_size(),
			cluster_size:    CLUSTER_PAYLOAD_SIZE as u64 + crate::data::CLUSTER_HEADER_SIZE as u64,
			total_inodes:   sb.n_inodes_total,
			free_inodes:    sb.n_inodes_free,
			total_clusters: sb.n_clusters_total,
			free_clusters:  sb.n_clusters_free,
		}
	}

	fn dev_block_size(&self) -> u64 {
		self.dev.block_size()
	}

	pub fn stat(&mut self, n: InodeNum) -> Result<Inode> {
		self.itable.get(&mut self.dev, n)
	}

	fn dzone_start(&self) -> u64 {
		self.sb.get().dzone_start as u64
	}

	/// Look up a single path component within `dir`.
	pub fn lookup(&mut self, dir_n: InodeNum, name: &str) -> Result<InodeNum> {
		let dir_inode = self.itable.get(&mut self.dev, dir_n)?;
		if dir_inode.kind() != Some(InodeType::Directory) {
			return Err(SofsError::NotADirectory);
		}
		let dzone_start = self.dzone_start();
		dir::lookup(&mut self.dev, dzone_start, &dir_inode, &mut self.ref_cache, dir_n, name.as_bytes())?
			.ok_or(SofsError::NoEntry)
	}

	/// Resolve an absolute, `/`-separated path from the root, following
	/// at most [`MAX_SYMLINK_DEPTH`] symlink hops total.
	pub fn resolve(&mut self, path: &str) -> Result<InodeNum> {
		self.resolve_inner(path, 0)
	}

	fn resolve_inner(&mut self, path: &str, depth: u32) -> Result<InodeNum> {
		let mut cur = InodeNum::ROOT;
		for component in path.split('/').filter(|c| !c.is_empty()) {
			let next = self.lookup(cur, component)?;
			let inode = self.itable.get(&mut self.dev, next)?;
			cur = if inode.kind() == Some(InodeType::Symlink) {
				if depth >= MAX_SYMLINK_DEPTH {
					return Err(SofsError::TooManySymlinks);
				}
				let target = self.readlink(next)?;
				self.resolve_inner(&target, depth + 1)?
			} else {
				next
			};
		}
		Ok(cur)
	}

	fn check_access(&mut self, n: InodeNum, uid: u32, gid: u32, mode: Access) -> Result<()> {
		let inode = self.itable.get(&mut self.dev, n)?;
		if access_granted(&inode, uid, gid, mode) {
			Ok(())
		} else {
			Err(SofsError::PermissionDenied)
		}
	}

	/// Read up to `buf.len()` bytes starting at `offset`, returning the
	/// number of bytes actually read (short at end-of-file, like `read(2)`).
	pub fn read(&mut self, n: InodeNum, offset: u64, buf: &mut [u8]) -> Result<usize> {
		let inode = self.itable.get(&mut self.dev, n)?;
		if inode.kind() == Some(InodeType::Directory) {
			return Err(SofsError::IsADirectory);
		}
		if offset >= inode.size_bytes {
			return Ok(0);
		}
		let payload = CLUSTER_PAYLOAD_SIZE as u64;
		let dzone_start = self.dzone_start();
		let to_read = buf.len().min((inode.size_bytes - offset) as usize);
		let mut done = 0usize;
		while done < to_read {
			let pos = offset + done as u64;
			let logical = pos / payload;
			let in_cluster = (pos % payload) as usize;
			let chunk = (payload as usize - in_cluster).min(to_read - done);
			match ireftree::get(&mut self.dev, dzone_start, &inode, &mut self.ref_cache, n, logical)? {
				Some(physical) => {
					let block = dzone_start + physical as u64 * BLOCKS_PER_CLUSTER;
					let bs = self.dev.block_size() as usize;
					let mut cbuf = vec![0u8; bs];
					self.dev.read_block(block, &mut cbuf)?;
					let hdr_len = crate::data::CLUSTER_HEADER_SIZE;
					buf[done..done + chunk].copy_from_slice(&cbuf[hdr_len + in_cluster..hdr_len + in_cluster + chunk]);
				}
				None => buf[done..done + chunk].fill(0),
			}
			done += chunk;
		}
		Ok(done)
	}

	/// Write `data` at `offset`, allocating clusters as needed and
	/// extending `size_bytes` when the write goes past the current end.
	pub fn write(&mut self, n: InodeNum, offset: u64, data: &[u8]) -> Result<usize> {
		let mut inode = self.itable.get(&mut self.dev, n)?;
		if inode.kind() == Some(InodeType::Directory) {
			return Err(SofsError::IsADirectory);
		}
		let payload = CLUSTER_PAYLOAD_SIZE as u64;
		if offset + data.len() as u64 > payload * ireftree::capacity() {
			return Err(SofsError::MaxFileSizeExceeded);
		}
		// Cluster allocation below mutates the live free-cluster repository
		// as it goes, so a failure partway through (e.g. no space left) must
		// not be allowed to strand already-claimed clusters: whatever the
		// loop manages to attach to `inode` is persisted before the error is
		// returned, rather than only on a full success.
		let mut done = 0usize;
		let mut fault: Option<SofsError> = None;
		{
			let sb = self.sb.get_mut();
			let dzone_start = sb.dzone_start as u64;
			while done < data.len() {
				let pos = offset + done as u64;
				let logical = pos / payload;
				let in_cluster = (pos % payload) as usize;
				let chunk = (payload as usize - in_cluster).min(data.len() - done);
				let physical = match ireftree::ensure(&mut self.dev, sb, &mut self.itable, &mut inode, &mut self.ref_cache, n, logical) {
					Ok(physical) => physical,
					Err(e) => {
						fault = Some(e);
						break;
					}
				};
				let block = dzone_start + physical as u64 * BLOCKS_PER_CLUSTER;
				let bs = self.dev.block_size() as usize;
				let mut cbuf = vec![0u8; bs];
				if let Err(e) = self.dev.read_block(block, &mut cbuf) {
					fault = Some(e);
					break;
				}
				let hdr_len = crate::data::CLUSTER_HEADER_SIZE;
				cbuf[hdr_len + in_cluster..hdr_len + in_cluster + chunk].copy_from_slice(&data[done..done + chunk]);
				if let Err(e) = self.dev.write_block(block, &cbuf) {
					fault = Some(e);
					break;
				}
				done += chunk;
			}
		}
		let new_end = offset + done as u64;
		if new_end > inode.size_bytes {
			inode.size_bytes = new_end;
		}
		self.itable.put(&mut self.dev, n, inode)?;
		if let Some(e) = fault {
			return Err(e);
		}
		Ok(done)
	}

	/// Allocate a fresh in-use inode off the free-inode list and overwrite
	/// it with the given mode/owner/group, zero size and no clusters. A
	/// popped inode that was free-*dirty* (spec §4.4) still references
	/// clusters from its previous life; those are released via CLEAN
	/// before the slot is handed out again.
	fn new_inode(&mut self, mode: u16, owner: u32, group: u32) -> Result<InodeNum> {
		let sb = self.sb.get_mut();
		let n = ialloc::allocate(sb, &mut self.itable, &mut self.dev)?;

		let mut prior = self.itable.get(&mut self.dev, n)?;
		if prior.is_free_dirty() {
			let sb = self.sb.get_mut();
			ireftree::clean(&mut self.dev, sb, &mut prior, &mut self.ref_cache, n)?;
		}

		let inode = Inode {
			mode,
			refcount: 0,
			owner,
			group,
			size_bytes: 0,
			cluster_count: 0,
			direct: [ClusterRef::NONE; crate::data::N_DIRECT],
			indirect1: ClusterRef::NONE,
			indirect2: ClusterRef::NONE,
			times_or_links: crate::data::TimesOrLinks::Times { atime: 0, mtime: 0 },
		};
		self.itable.put(&mut self.dev, n, inode)?;
		Ok(n)
	}

	/// Attach `name -> target` under `parent`, bumping `target`'s
	/// refcount by one (spec §4.8's generic ADD). Building a directory's
	/// `.`/`..` entries is just two more calls to this with the new
	/// directory as both parent and target in turn.
	fn link(&mut self, parent: InodeNum, name: &str, target: InodeNum) -> Result<()> {
		let mut parent_inode = self.itable.get(&mut self.dev, parent)?;
		if parent_inode.kind() != Some(InodeType::Directory) {
			return Err(SofsError::NotADirectory);
		}
		{
			let sb = self.sb.get_mut();
			dir::add(
				&mut self.dev,
				sb,
				&mut self.itable,
				&mut parent_inode,
				&mut self.ref_cache,
				parent,
				name.as_bytes(),
				target,
			)?;
		}
		self.itable.put(&mut self.dev, parent, parent_inode)?;

		let mut target_inode = self.itable.get(&mut self.dev, target)?;
		target_inode.refcount += 1;
		self.itable.put(&mut self.dev, target, target_inode)?;
		Ok(())
	}

	/// Detach `name` from `parent`, dropping the named inode's refcount by
	/// one and reclaiming it once it hits zero.
	fn unlink_generic(&mut self, parent: InodeNum, name: &str) -> Result<InodeNum> {
		let parent_inode = self.itable.get(&mut self.dev, parent)?;
		let target = {
			let sb = self.sb.get_mut();
			dir::remove(&mut self.dev, sb, &parent_inode, &mut self.ref_cache, parent, name.as_bytes())?
		};
		let mut target_inode = self.itable.get(&mut self.dev, target)?;
		target_inode.refcount = target_inode.refcount.saturating_sub(1);
		if target_inode.refcount == 0 {
			let sb = self.sb.get_mut();
			ireftree::clean(&mut self.dev, sb, &mut target_inode, &mut self.ref_cache, target)?;
			self.itable.put(&mut self.dev, target, target_inode)?;
			ialloc::free(sb, &mut self.itable, &mut self.dev, target)?;
		} else {
			self.itable.put(&mut self.dev, target, target_inode)?;
		}
		Ok(target)
	}

	/// Create a new, empty regular file named `name` under `parent`.
	pub fn create(&mut self, parent: InodeNum, name: &str, owner: u32, group: u32, perm: u16) -> Result<InodeNum> {
		log::trace!("create({parent}, {name:?})");
		self.check_access(parent, owner, group, Access::Write)?;
		let n = self.new_inode(MODE_TYPE_REGULAR | (perm & MODE_PERM_MASK), owner, group)?;
		if let Err(e) = self.link(parent, name, n) {
			self.rollback_new_inode(n)?;
			return Err(e);
		}
		Ok(n)
	}

	/// Create a new directory named `name` under `parent`, with its `.`
	/// and `..` entries already populated.
	pub fn mkdir(&mut self, parent: InodeNum, name: &str, owner: u32, group: u32, perm: u16) -> Result<InodeNum> {
		self.check_access(parent, owner, group, Access::Write)?;
		let n = self.new_inode(MODE_TYPE_DIRECTORY | (perm & MODE_PERM_MASK), owner, group)?;

		if let Err(e) = self.link(parent, name, n) {
			self.rollback_new_inode(n)?;
			return Err(e);
		}
		if let Err(e) = self.link(n, ".", n) {
			// Unwinds the first link too: n's refcount drops back to zero
			// and it is returned to the free-inode list.
			self.unlink_generic(parent, name)?;
			return Err(e);
		}
		if let Err(e) = self.link(n, "..", parent) {
			self.unlink_generic(n, ".")?;
			self.unlink_generic(parent, name)?;
			return Err(e);
		}
		Ok(n)
	}

	/// Create a symlink named `name` under `parent` whose payload is
	/// `target` (an arbitrary path string, not resolved at creation time).
	pub fn symlink(&mut self, parent: InodeNum, name: &str, target: &str, owner: u32, group: u32) -> Result<InodeNum> {
		self.check_access(parent, owner, group, Access::Write)?;
		let n = self.new_inode(MODE_TYPE_SYMLINK | 0o777, owner, group)?;
		if let Err(e) = self.write(n, 0, target.as_bytes()) {
			self.rollback_new_inode(n)?;
			return Err(e);
		}
		if let Err(e) = self.link(parent, name, n) {
			self.rollback_new_inode(n)?;
			return Err(e);
		}
		Ok(n)
	}

	/// Read a symlink's target path back out.
	pub fn readlink(&mut self, n: InodeNum) -> Result<String> {
		let inode = self.itable.get(&mut self.dev, n)?;
		if inode.kind() != Some(InodeType::Symlink) {
			return Err(SofsError::InvalidArgument);
		}
		let mut buf = vec![0u8; inode.size_bytes as usize];
		self.read(n, 0, &mut buf)?;
		String::from_utf8(buf).map_err(|_| SofsError::InternalInconsistency)
	}

	/// Remove a non-directory entry, freeing its inode once its last link
	/// is gone.
	pub fn unlink(&mut self, parent: InodeNum, name: &str, uid: u32, gid: u32) -> Result<()> {
		self.check_access(parent, uid, gid, Access::Write)?;
		let target = self.lookup(parent, name)?;
		let target_inode = self.itable.get(&mut self.dev, target)?;
		if target_inode.kind() == Some(InodeType::Directory) {
			return Err(SofsError::IsADirectory);
		}
		self.unlink_generic(parent, name)?;
		Ok(())
	}

	/// Remove an empty directory.
	pub fn rmdir(&mut self, parent: InodeNum, name: &str, uid: u32, gid: u32) -> Result<()> {
		self.check_access(parent, uid, gid, Access::Write)?;
		let target = self.lookup(parent, name)?;
		let target_inode = self.itable.get(&mut self.dev, target)?;
		if target_inode.kind() != Some(InodeType::Directory) {
			return Err(SofsError::NotADirectory);
		}
		let dzone_start = self.dzone_start();
		if !dir::is_empty(&mut self.dev, dzone_start, &target_inode, &mut self.ref_cache, target)? {
			return Err(SofsError::NotEmpty);
		}
		// Order matters: both of these read from target's own directory
		// cluster, so they must run before the parent-entry detach below
		// can drop target's refcount to zero and reclaim that cluster.
		self.unlink_generic(target, "..")?;
		self.unlink_generic(target, ".")?;
		self.unlink_generic(parent, name)?;
		Ok(())
	}

	/// Move `name` from `old_parent` to `new_parent` under `new_name`.
	/// Fails with [`SofsError::Exists`] if `new_name` is already bound in
	/// `new_parent` (SOFS14 does not support atomic replace).
	pub fn rename(
		&mut self,
		old_parent: InodeNum,
		old_name: &str,
		new_parent: InodeNum,
		new_name: &str,
	) -> Result<()> {
		log::trace!("rename({old_parent}, {old_name:?} -> {new_parent}, {new_name:?})");
		if matches!(old_name, "." | "..") || matches!(new_name, "." | "..") {
			return Err(SofsError::InvalidArgument);
		}
		let target = self.lookup(old_parent, old_name)?;
		if self.lookup(new_parent, new_name).is_ok() {
			return Err(SofsError::Exists);
		}

		let target_inode = self.itable.get(&mut self.dev, target)?;
		let is_dir = target_inode.kind() == Some(InodeType::Directory);

		self.link(new_parent, new_name, target)?;
		self.unlink_generic(old_parent, old_name)?;

		if is_dir && old_parent != new_parent {
			let inode = self.itable.get(&mut self.dev, target)?;
			{
				let sb = self.sb.get_mut();
				dir::rebind(&mut self.dev, sb, &inode, &mut self.ref_cache, target, b"..", new_parent)?;
			}
			let mut old_parent_inode = self.itable.get(&mut self.dev, old_parent)?;
			old_parent_inode.refcount = old_parent_inode.refcount.saturating_sub(1);
			self.itable.put(&mut self.dev, old_parent, old_parent_inode)?;
			let mut new_parent_inode = self.itable.get(&mut self.dev, new_parent)?;
			new_parent_inode.refcount += 1;
			self.itable.put(&mut self.dev, new_parent, new_parent_inode)?;
		}
		Ok(())
	}

	pub fn access(&mut self, n: InodeNum, uid: u32, gid: u32, mode: Access) -> Result<bool> {
		let inode = self.itable.get(&mut self.dev, n)?;
		Ok(access_granted(&inode, uid, gid, mode))
	}

	/// Best-effort cleanup for a partially-built inode whose directory
	/// entry never made it in (e.g. `create` followed by a failing
	/// `link`): return it to the free-inode list rather than leaking it.
	fn rollback_new_inode(&mut self, n: InodeNum) -> Result<()> {
		let mut inode = self.itable.get(&mut self.dev, n)?;
		let sb = self.sb.get_mut();
		ireftree::clean(&mut self.dev, sb, &mut inode, &mut self.ref_cache, n)?;
		self.itable.put(&mut self.dev, n, inode)?;
		ialloc::free(sb, &mut self.itable, &mut self.dev, n)?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use super::*;
	use crate::{device::FileBlockDevice, format};

	fn mounted(nblocks: u64) -> Sofs14<FileBlockDevice<Cursor<Vec<u8>>>> {
		let buf = vec![0u8; (nblocks * crate::layout::BLOCK_SIZE) as usize];
		let mut dev = FileBlockDevice::new(Cursor::new(buf), crate::layout::BLOCK_SIZE);
		format::format(&mut dev, nblocks, 0, "test").unwrap();
		Sofs14::mount(dev).unwrap()
	}

	#[test]
	fn create_write_read_roundtrip() {
		let mut fs = mounted(400);
		let f = fs.create(InodeNum::ROOT, "hello.txt", 0, 0, 0o644).unwrap();
		fs.write(f, 0, b"hello world").unwrap();
		let mut buf = [0u8; 11];
		let n = fs.read(f, 0, &mut buf).unwrap();
		assert_eq!(n, 11);
		assert_eq!(&buf, b"hello world");
	}

	#[test]
	fn mkdir_then_lookup_then_rmdir() {
		let mut fs = mounted(400);
		let d = fs.mkdir(InodeNum::ROOT, "sub", 0, 0, 0o755).unwrap();
		assert_eq!(fs.lookup(InodeNum::ROOT, "sub").unwrap(), d);
		assert_eq!(fs.stat(d).unwrap().refcount, 2);
		fs.rmdir(InodeNum::ROOT, "sub", 0, 0).unwrap();
		assert_eq!(fs.lookup(InodeNum::ROOT, "sub").unwrap_err(), SofsError::NoEntry);
	}

	#[test]
	fn rmdir_on_nonempty_directory_errors() {
		let mut fs = mounted(400);
		let d = fs.mkdir(InodeNum::ROOT, "sub", 0, 0, 0o755).unwrap();
		fs.create(d, "file", 0, 0, 0o644).unwrap();
		assert_eq!(fs.rmdir(InodeNum::ROOT, "sub", 0, 0).unwrap_err(), SofsError::NotEmpty);
	}

	#[test]
	fn symlink_resolves_through_one_hop() {
		let mut fs = mounted(400);
		fs.create(InodeNum::ROOT, "real", 0, 0, 0o644).unwrap();
		fs.symlink(InodeNum::ROOT, "link", "real", 0, 0).unwrap();
		let resolved = fs.resolve("link").unwrap();
		let real = fs.lookup(InodeNum::ROOT, "real").unwrap();
		assert_eq!(resolved, real);
	}

	#[test]
	fn two_symlinks_in_a_row_is_too_many() {
		let mut fs = mounted(400);
		fs.create(InodeNum::ROOT, "real", 0, 0, 0o644).unwrap();
		fs.symlink(InodeNum::ROOT, "a", "real", 0, 0).unwrap();
		fs.symlink(InodeNum::ROOT, "b", "a", 0, 0).unwrap();
		assert_eq!(fs.resolve("b").unwrap_err(), SofsError::TooManySymlinks);
	}

	#[test]
	fn unlink_frees_the_inode_for_reuse() {
		let mut fs = mounted(400);
		let before = fs.info().free_inodes;
		let f = fs.create(InodeNum::ROOT, "f", 0, 0, 0o644).unwrap();
		fs.unlink(InodeNum::ROOT, "f", 0, 0).unwrap();
		assert_eq!(fs.info().free_inodes, before);
		let _ = f;
	}

	#[test]
	fn rename_moves_entry_between_directories() {
		let mut fs = mounted(400);
		let d1 = fs.mkdir(InodeNum::ROOT, "d1", 0, 0, 0o755).unwrap();
		let d2 = fs.mkdir(InodeNum::ROOT, "d2", 0, 0, 0o755).unwrap();
		fs.create(d1, "f", 0, 0, 0o644).unwrap();
		fs.rename(d1, "f", d2, "f").unwrap();
		assert!(fs.lookup(d1, "f").is_err());
		assert!(fs.lookup(d2, "f").is_ok());
	}

	#[test]
	fn large_write_spans_indirect_clusters() {
		let mut fs = mounted(4000);
		let f = fs.create(InodeNum::ROOT, "big", 0, 0, 0o644).unwrap();
		let payload = CLUSTER_PAYLOAD_SIZE as u64;
		let offset = payload * (crate::data::N_DIRECT as u64 + 2);
		fs.write(f, offset, b"past the direct blocks").unwrap();
		let mut buf = [0u8; 23];
		fs.read(f, offset, &mut buf).unwrap();
		assert_eq!(&buf, b"past the direct blocks");
	}
}
