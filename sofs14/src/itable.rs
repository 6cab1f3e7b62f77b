//! Inode table store (spec §4.3): the inode table lives in
//! `itable_block_count` blocks starting at `itable_start`, packed `IPB`
//! inodes per block. Per spec §5, at most one inode-table block is held
//! decoded in memory at a time — this is a single-slot cache, not an LRU
//! (a deliberate departure from the teacher's `icache`; see DESIGN.md).

use crate::{
	codec::CODEC,
	data::{Inode, InodeNum, IPB},
	device::BlockDevice,
	error::{Result, SofsError},
};

/// Single-slot, write-back cache over one inode-table block.
pub struct InodeTable {
	itable_start: u64,
	block_count:  u64,
	loaded:       Option<(u64, Vec<Inode>)>,
	dirty:        bool,
}

impl InodeTable {
	pub fn new(itable_start: u64, block_count: u64) -> Self {
		Self {
			itable_start,
			block_count,
			loaded: None,
			dirty: false,
		}
	}

	fn block_of(&self, n: InodeNum) -> Result<(u64, usize)> {
		let idx = n.get() as u64;
		let block = idx / IPB as u64;
		if block >= self.block_count {
			return Err(SofsError::InvalidArgument);
		}
		Ok((block, (idx % IPB as u64) as usize))
	}

	/// Evict the currently loaded block, flushing it first if dirty.
	pub fn evict<D: BlockDevice>(&mut self, dev: &mut D) -> Result<()> {
		if let Some((block, inodes)) = self.loaded.take() {
			if self.dirty {
				Self::store_block(dev, self.itable_start, block, &inodes)?;
				self.dirty = false;
			}
		}
		Ok(())
	}

	fn ensure_loaded<D: BlockDevice>(&mut self, dev: &mut D, block: u64) -> Result<()> {
		if let Some((loaded_block, _)) = &self.loaded {
			if *loaded_block == block {
				return Ok(());
			}
		}
		self.evict(dev)?;
		let inodes = Self::load_block(dev, self.itable_start, block)?;
		self.loaded = Some((block, inodes));
		Ok(())
	}

	fn load_block<D: BlockDevice>(dev: &mut D, itable_start: u64, block: u64) -> Result<Vec<Inode>> {
		let bs = dev.block_size() as usize;
		let mut buf = vec![0u8; bs];
		dev.read_block(itable_start + block, &mut buf)?;
		let mut inodes = Vec::with_capacity(IPB);
		let mut offset = 0usize;
		for _ in 0..IPB {
			let (inode, used): (Inode, usize) = bincode::decode_from_slice(&buf[offset..], CODEC)
				.map_err(|_| SofsError::InternalInconsistency)?;
			offset += used;
			inodes.push(inode);
		}
		Ok(inodes)
	}

	fn store_block<D: BlockDevice>(
		dev: &mut D,
		itable_start: u64,
		block: u64,
		inodes: &[Inode],
	) -> Result<()> {
		let bs = dev.block_size() as usize;
		let mut buf = vec![0u8; bs];
		let mut offset = 0usize;
		for inode in inodes {
			let encoded = bincode::encode_to_vec(inode, CODEC).map_err(|_| SofsError::InternalInconsistency)?;
			buf[offset..offset + encoded.len()].copy_from_slice(&encoded);
			offset += crate::data::INODE_SIZE;
		}
		dev.write_block(itable_start + block, &buf)?;
		Ok(())
	}

	/// Read one inode.
	pub fn get<D: BlockDevice>(&mut self, dev: &mut D, n: InodeNum) -> Result<Inode> {
		let (block, slot) = self.block_of(n)?;
		self.ensure_loaded(dev, block)?;
		Ok(self.loaded.as_ref().unwrap().1[slot].clone())
	}

	/// Overwrite one inode in the loaded block, marking it dirty. Does not
	/// write through immediately; call [`InodeTable::evict`] or load a
	/// different block to flush.
	pub fn put<D: BlockDevice>(&mut self, dev: &mut D, n: InodeNum, inode: Inode) -> Result<()> {
		let (block, slot) = self.block_of(n)?;
		self.ensure_loaded(dev, block)?;
		self.loaded.as_mut().unwrap().1[slot] = inode;
		self.dirty = true;
		Ok(())
	}

	/// Write through immediately regardless of which block is currently
	/// loaded — used sparingly, e.g. by `fsck`-lite full scans.
	pub fn put_now<D: BlockDevice>(&mut self, dev: &mut D, n: InodeNum, inode: Inode) -> Result<()> {
		self.put(dev, n, inode)?;
		self.evict(dev)
	}

	pub fn block_count(&self) -> u64 {
		self.block_count
	}
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use super::*;
	use crate::device::FileBlockDevice;

	fn harness(nblocks: u64, itable_start: u64, itable_blocks: u64) -> (FileBlockDevice<Cursor<Vec<u8>>>, InodeTable) {
		let buf = vec![0u8; (nblocks * crate::layout::BLOCK_SIZE) as usize];
		let dev = FileBlockDevice::new(Cursor::new(buf), crate::layout::BLOCK_SIZE);
		(dev, InodeTable::new(itable_start, itable_blocks))
	}

	#[test]
	fn put_then_get_roundtrips_after_eviction() {
		let (mut dev, mut table) = harness(19, 1, 2);
		let mut inode = Inode::free_clean(crate::data::InodeRef::NONE, crate::data::InodeRef::NONE);
		inode.refcount = 7;
		table.put(&mut dev, InodeNum::new(3), inode.clone()).unwrap();
		table.evict(&mut dev).unwrap();
		let got = table.get(&mut dev, InodeNum::new(3)).unwrap();
		assert_eq!(got, inode);
	}

	#[test]
	fn only_one_block_loaded_at_a_time() {
		let (mut dev, mut table) = harness(19, 1, 2);
		table.get(&mut dev, InodeNum::new(0)).unwrap();
		assert_eq!(table.loaded.as_ref().unwrap().0, 0);
		table.get(&mut dev, InodeNum::new(8)).unwrap();
		assert_eq!(table.loaded.as_ref().unwrap().0, 1);
	}

	#[test]
	fn out_of_range_inode_errors() {
		let (mut dev, mut table) = harness(19, 1, 2);
		assert_eq!(
			table.get(&mut dev, InodeNum::new(16)).unwrap_err(),
			SofsError::InvalidArgument
		);
	}
}
