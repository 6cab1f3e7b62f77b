use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};

#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
	#[command(subcommand)]
	pub command: Command,

	#[command(flatten)]
	pub verbose: Verbosity<WarnLevel>,
}

#[derive(Subcommand)]
pub enum Command {
	/// Format a device image with a fresh SOFS14 volume.
	Mkfs {
		/// Path to the device image (created if it does not exist).
		device: PathBuf,
		/// Total number of blocks the image should hold.
		blocks: u64,
		/// Requested inode count; 0 picks the default of blocks/8.
		#[arg(short = 'i', long, default_value_t = 0)]
		inodes: u64,
		/// Volume label, up to 31 bytes.
		#[arg(short = 'n', long, default_value = "sofs14")]
		name: String,
	},
	/// Print the superblock and the inode table of a mounted volume.
	Showblock {
		/// Path to the device image.
		device: PathBuf,
	},
	/// Walk a volume's metadata and report any consistency defects found.
	Fsck {
		/// Path to the device image.
		device: PathBuf,
	},
}
