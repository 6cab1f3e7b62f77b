use std::{fs::File, path::Path};

use anyhow::{Context, Result};
use clap::Parser;
use sofs14::{format, FileBlockDevice, InodeNum, Sofs14, BLOCK_SIZE};

use crate::cli::{Cli, Command};

mod cli;

fn open_existing(device: &Path) -> Result<FileBlockDevice<File>> {
	FileBlockDevice::open(device, BLOCK_SIZE, true)
		.with_context(|| format!("opening {}", device.display()))
}

fn mkfs(device: &Path, blocks: u64, inodes: u64, name: &str) -> Result<()> {
	let file = File::options()
		.read(true)
		.write(true)
		.create(true)
		.truncate(true)
		.open(device)
		.with_context(|| format!("creating {}", device.display()))?;
	file.set_len(blocks * BLOCK_SIZE)?;
	let mut dev = FileBlockDevice::new(file, BLOCK_SIZE);
	format(&mut dev, blocks, inodes, name)?;
	log::info!("formatted {} ({blocks} blocks, volume {name:?})", device.display());
	Ok(())
}

fn showblock(device: &Path) -> Result<()> {
	let dev = open_existing(device)?;
	let mut fs = Sofs14::mount(dev)?;
	let info = fs.info();
	println!("block size:      {}", info.block_size);
	println!("cluster size:    {}", info.cluster_size);
	println!("inodes:          {} total, {} free", info.total_inodes, info.free_inodes);
	println!("clusters:        {} total, {} free", info.total_clusters, info.free_clusters);
	let root = fs.stat(InodeNum::ROOT)?;
	println!("root inode mode: {:#06o}", root.mode);
	println!("root refcount:   {}", root.refcount);
	fs.unmount()?;
	Ok(())
}

fn fsck(device: &Path) -> Result<()> {
	let mut dev = open_existing(device)?;
	let defects = sofs14::consistency_check(&mut dev)?;
	if defects.is_empty() {
		println!("{}: no defects found", device.display());
	} else {
		for d in &defects {
			println!("{d:?}");
		}
		anyhow::bail!("{} defect(s) found", defects.len());
	}
	Ok(())
}

fn main() -> Result<()> {
	let cli = Cli::parse();
	env_logger::builder()
		.filter_level(cli.verbose.log_level_filter())
		.init();

	match cli.command {
		Command::Mkfs { device, blocks, inodes, name } => mkfs(&device, blocks, inodes, &name),
		Command::Showblock { device } => showblock(&device),
		Command::Fsck { device } => fsck(&device),
	}
}
