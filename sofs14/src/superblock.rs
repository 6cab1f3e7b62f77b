//! Superblock store (spec §4.2): load/get/store of the single superblock
//! record living in block 0. There is exactly one superblock in memory at
//! a time, mirroring the single-slot discipline spec §5 mandates for the
//! inode-table block and the reference cluster.

use crate::{
	codec::CODEC,
	data::Superblock,
	device::BlockDevice,
	error::{Result, SofsError},
};

/// Thin store over the superblock record. Holds the decoded record plus a
/// dirty flag; callers mutate through [`SuperblockStore::get_mut`] and must
/// call [`SuperblockStore::store`] to persist.
pub struct SuperblockStore {
	sb:    Superblock,
	dirty: bool,
}

impl SuperblockStore {
	/// Wrap an already-built superblock record, e.g. one just assembled by
	/// the formatter, marking it dirty so the next [`SuperblockStore::flush`]
	/// writes it out.
	pub fn new(sb: Superblock) -> Self {
		Self { sb, dirty: true }
	}

	/// Read block 0 and decode it. Fails with
	/// [`SofsError::InternalInconsistency`] if the magic does not match a
	/// cleanly formatted volume.
	pub fn load<D: BlockDevice>(dev: &mut D) -> Result<Self> {
		let mut buf = vec![0u8; dev.block_size() as usize];
		dev.read_block(0, &mut buf)?;
		let (sb, _): (Superblock, usize) =
			bincode::decode_from_slice(&buf, CODEC).map_err(|_| SofsError::InternalInconsistency)?;
		if !sb.is_mountable() {
			return Err(SofsError::InternalInconsistency);
		}
		Ok(Self { sb, dirty: false })
	}

	pub fn get(&self) -> &Superblock {
		&self.sb
	}

	pub fn get_mut(&mut self) -> &mut Superblock {
		self.dirty = true;
		&mut self.sb
	}

	/// Encode and write block 0 unconditionally, clearing the dirty flag.
	pub fn store<D: BlockDevice>(&mut self, dev: &mut D) -> Result<()> {
		let mut buf = vec![0u8; dev.block_size() as usize];
		let encoded = bincode::encode_to_vec(&self.sb, CODEC).map_err(|_| SofsError::InternalInconsistency)?;
		if encoded.len() > buf.len() {
			return Err(SofsError::InternalInconsistency);
		}
		buf[..encoded.len()].copy_from_slice(&encoded);
		dev.write_block(0, &buf)?;
		self.dirty = false;
		Ok(())
	}

	/// Store only if [`SuperblockStore::get_mut`] was called since the last
	/// store.
	pub fn flush<D: BlockDevice>(&mut self, dev: &mut D) -> Result<()> {
		if self.dirty {
			self.store(dev)?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use super::*;
	use crate::{device::FileBlockDevice, format};

	fn fresh(nblocks: u64) -> FileBlockDevice<Cursor<Vec<u8>>> {
		let buf = vec![0u8; (nblocks * crate::layout::BLOCK_SIZE) as usize];
		let mut dev = FileBlockDevice::new(Cursor::new(buf), crate::layout::BLOCK_SIZE);
		format::format(&mut dev, nblocks, 0, "test").unwrap();
		dev
	}

	#[test]
	fn load_then_store_roundtrips() {
		let mut dev = fresh(19);
		let mut store = SuperblockStore::load(&mut dev).unwrap();
		let before = store.get().clone();
		store.store(&mut dev).unwrap();
		let reloaded = SuperblockStore::load(&mut dev).unwrap();
		assert_eq!(*reloaded.get(), before);
	}

	#[test]
	fn get_mut_marks_dirty_and_flush_persists() {
		let mut dev = fresh(19);
		let mut store = SuperblockStore::load(&mut dev).unwrap();
		store.get_mut().n_inodes_free -= 1;
		store.flush(&mut dev).unwrap();
		let reloaded = SuperblockStore::load(&mut dev).unwrap();
		assert_eq!(reloaded.get().n_inodes_free, store.get().n_inodes_free);
	}
}
