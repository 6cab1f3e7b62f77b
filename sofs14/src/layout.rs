//! Layout calculator (spec §4.1): from a device size and a requested
//! inode count, derive the block counts that make up a device.

use crate::{
	data::IPB,
	error::{Result, SofsError},
};

/// Number of blocks in one data cluster (`K` in the spec).
pub const BLOCKS_PER_CLUSTER: u64 = 4;

/// Block size, in bytes (`B` in the spec).
pub const BLOCK_SIZE: u64 = 512;

/// Derived layout of a device: block counts for the inode table and the
/// data zone, given a device size and a requested inode count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
	/// Total blocks on the device (`N`).
	pub n_total_blocks:  u64,
	/// Blocks occupied by the inode table (block 1 onward).
	pub itable_blocks:   u64,
	/// Total inodes (`itable_blocks * IPB`).
	pub n_inodes:         u64,
	/// Total data clusters.
	pub n_clusters_total: u64,
}

impl Geometry {
	/// Compute the layout for a device of `n_total_blocks` blocks and a
	/// requested inode count `requested_inodes` (0 means "pick a
	/// default of `N/8`").
	///
	/// Step 5 of spec §4.1 ("re-derive itable_blocks to absorb the
	/// remainder") is mandatory: it is what keeps invariant
	/// `1 + itable_blocks + cluster_total*K == n_total_blocks` exact.
	pub fn compute(n_total_blocks: u64, requested_inodes: u64) -> Result<Self> {
		if n_total_blocks < 1 + BLOCKS_PER_CLUSTER {
			return Err(SofsError::InvalidArgument);
		}

		let mut n_inodes_0 = requested_inodes;
		if n_inodes_0 == 0 {
			n_inodes_0 = n_total_blocks / 8;
		}
		if n_inodes_0 == 0 {
			return Err(SofsError::InvalidArgument);
		}

		let ipb = IPB as u64;
		let itable_blocks_0 = n_inodes_0.div_ceil(ipb);

		if n_total_blocks <= 1 + itable_blocks_0 {
			return Err(SofsError::InvalidArgument);
		}
		let cluster_total = (n_total_blocks - 1 - itable_blocks_0) / BLOCKS_PER_CLUSTER;
		if cluster_total == 0 {
			return Err(SofsError::InvalidArgument);
		}

		// Re-derive itable_blocks so the three regions add up to exactly
		// n_total_blocks, absorbing whatever remainder step 3's floor
		// division left on the table.
		let itable_blocks = n_total_blocks - 1 - cluster_total * BLOCKS_PER_CLUSTER;
		let n_inodes = itable_blocks * ipb;

		Ok(Self {
			n_total_blocks,
			itable_blocks,
			n_inodes,
			n_clusters_total: cluster_total,
		})
	}

	/// Physical block index of the first inode-table block (always 1).
	pub fn itable_start(&self) -> u64 {
		1
	}

	/// Physical block index of the first data-zone block.
	pub fn dzone_start(&self) -> u64 {
		1 + self.itable_blocks
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	/// spec §8 scenario 1: format a 19-block device with 16 inodes.
	#[test]
	fn scenario_19_blocks_16_inodes() {
		let g = Geometry::compute(19, 16).unwrap();
		assert_eq!(g.itable_blocks, 2);
		assert_eq!(g.n_clusters_total, 4);
		assert_eq!(g.n_inodes, 16);
		assert_eq!(
			1 + g.itable_blocks + g.n_clusters_total * BLOCKS_PER_CLUSTER,
			g.n_total_blocks
		);
	}

	/// spec §8 scenario 3: a 100-block device with 8 inodes.
	#[test]
	fn scenario_100_blocks_8_inodes() {
		let g = Geometry::compute(100, 8).unwrap();
		assert_eq!(
			1 + g.itable_blocks + g.n_clusters_total * BLOCKS_PER_CLUSTER,
			g.n_total_blocks
		);
		assert!(g.n_inodes >= 8);
	}

	#[test]
	fn default_inode_count_is_n_over_8() {
		let g = Geometry::compute(800, 0).unwrap();
		assert!(g.n_inodes * (crate::data::IPB as u64) >= 800 / 8);
	}

	#[test]
	fn rejects_undersized_device() {
		assert_eq!(Geometry::compute(2, 1), Err(SofsError::InvalidArgument));
	}

	#[test]
	fn invariant_holds_across_a_range_of_sizes() {
		for n in 20u64..500 {
			for inodes in [0u64, 1, 7, 16, 64] {
				if let Ok(g) = Geometry::compute(n, inodes) {
					assert_eq!(
						1 + g.itable_blocks + g.n_clusters_total * BLOCKS_PER_CLUSTER,
						n
					);
					assert_eq!(g.n_inodes, g.itable_blocks * crate::data::IPB as u64);
				}
			}
		}
	}
}
