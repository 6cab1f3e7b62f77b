use std::fmt;

/// Flat error taxonomy returned by every core operation (spec §6).
///
/// No error is recovered locally; failures propagate upward unchanged
/// (spec §7). There is deliberately no nesting: a caller matches on a
/// single flat enum rather than walking a cause chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SofsError {
	InvalidArgument,
	NoSpace,
	NoEntry,
	Exists,
	NotADirectory,
	IsADirectory,
	NotEmpty,
	NameTooLong,
	TooManySymlinks,
	TooManyLinks,
	MaxFileSizeExceeded,
	NoAccess,
	PermissionDenied,
	DeviceNotOpen,
	IoFailure,
	InternalInconsistency,
	InodeInUseInconsistent,
	FreeInodeDirtyInconsistent,
	ClusterHeaderInconsistent,
	ReferenceListInconsistent,
	AlreadyInList,
	NotInList,
	WrongOwnerInode,
}

impl SofsError {
	/// Whether this error signals device corruption rather than a normal,
	/// recoverable-at-the-caller failure (spec §7: the "inconsistent"
	/// family is non-recoverable).
	pub fn is_corruption(&self) -> bool {
		matches!(
			self,
			Self::InternalInconsistency |
				Self::InodeInUseInconsistent |
				Self::FreeInodeDirtyInconsistent |
				Self::ClusterHeaderInconsistent |
				Self::ReferenceListInconsistent
		)
	}
}

impl fmt::Display for SofsError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Self::InvalidArgument => "invalid argument",
			Self::NoSpace => "no space left on device",
			Self::NoEntry => "no such entry",
			Self::Exists => "entry already exists",
			Self::NotADirectory => "not a directory",
			Self::IsADirectory => "is a directory",
			Self::NotEmpty => "directory not empty",
			Self::NameTooLong => "name too long",
			Self::TooManySymlinks => "too many levels of symbolic links",
			Self::TooManyLinks => "too many links",
			Self::MaxFileSizeExceeded => "maximum file size exceeded",
			Self::NoAccess => "access denied",
			Self::PermissionDenied => "permission denied",
			Self::DeviceNotOpen => "device not open",
			Self::IoFailure => "I/O failure",
			Self::InternalInconsistency => "internal inconsistency",
			Self::InodeInUseInconsistent => "inode in-use state is inconsistent",
			Self::FreeInodeDirtyInconsistent => "free inode dirty-state is inconsistent",
			Self::ClusterHeaderInconsistent => "cluster header is inconsistent",
			Self::ReferenceListInconsistent => "reference list is inconsistent",
			Self::AlreadyInList => "already in list",
			Self::NotInList => "not in list",
			Self::WrongOwnerInode => "wrong owner inode",
		};
		f.write_str(s)
	}
}

impl std::error::Error for SofsError {}

impl From<std::io::Error> for SofsError {
	fn from(_: std::io::Error) -> Self {
		Self::IoFailure
	}
}

/// Maps each [`SofsError`] to the nearest POSIX errno, for consumers (e.g.
/// `sofs14-cli`) that need to report via `std::io::Error`.
impl From<SofsError> for std::io::Error {
	fn from(e: SofsError) -> Self {
		let errno = match e {
			SofsError::InvalidArgument => libc::EINVAL,
			SofsError::NoSpace => libc::ENOSPC,
			SofsError::NoEntry => libc::ENOENT,
			SofsError::Exists => libc::EEXIST,
			SofsError::NotADirectory => libc::ENOTDIR,
			SofsError::IsADirectory => libc::EISDIR,
			SofsError::NotEmpty => libc::ENOTEMPTY,
			SofsError::NameTooLong => libc::ENAMETOOLONG,
			SofsError::TooManySymlinks => libc::ELOOP,
			SofsError::TooManyLinks => libc::EMLINK,
			SofsError::MaxFileSizeExceeded => libc::EFBIG,
			SofsError::NoAccess => libc::EACCES,
			SofsError::PermissionDenied => libc::EPERM,
			SofsError::DeviceNotOpen => libc::EBADF,
			SofsError::IoFailure => libc::EIO,
			_ if e.is_corruption() => libc::EIO,
			_ => libc::EINVAL,
		};
		std::io::Error::from_raw_os_error(errno)
	}
}

pub type Result<T> = std::result::Result<T, SofsError>;
