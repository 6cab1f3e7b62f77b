//! The single `bincode` configuration used for every on-disk record.
//! Fixed-width integers, little-endian, to match spec §3's byte layout
//! exactly rather than bincode's default varint encoding.

use bincode::config::{
	Configuration, Fixint, LittleEndian, NoLimit,
};

pub type Codec = Configuration<LittleEndian, Fixint, NoLimit>;

pub const CODEC: Codec = bincode::config::standard()
	.with_fixed_int_encoding()
	.with_little_endian();
