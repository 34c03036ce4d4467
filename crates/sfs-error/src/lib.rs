#![forbid(unsafe_code)]
//! Error types for SimFS.
//!
//! # Error Taxonomy
//!
//! Every failure the driver can report is a variant of [`SfsError`]. All of
//! them are local and recoverable: the driver returns the error, leaves its
//! state exactly as it was before the call, and keeps accepting commands.
//! The single fatal condition is [`SfsError::InvalidGeometry`], raised while
//! deriving block-capacity parameters at startup.
//!
//! | Group | Variants |
//! |-------|----------|
//! | Namespace | `InvalidPath`, `NotFound`, `AlreadyExists`, `IsDirectory`, `NotADirectory`, `NotAFile`, `DirectoryNotEmpty`, `CannotRemoveRoot`, `CannotRemoveWorkingDirectory`, `SameParentLink` |
//! | Descriptors | `UnknownMode`, `AlreadyOpen`, `BadDescriptor`, `NotOpenForRead`, `NotOpenForWrite`, `ReadPastEnd`, `SeekOutOfRange` |
//! | Space | `FileTooLarge`, `OutOfSpace` |
//! | Command surface | `Usage`, `InvalidArgument` |
//! | Internal | `Io`, `InvalidGeometry`, `Corruption` |
//!
//! ## errno Mapping
//!
//! Every variant maps to exactly one POSIX errno via [`SfsError::to_errno`].
//! The mapping is exhaustive (no wildcard arms) so adding a new variant is a
//! compile error until its errno is assigned.
//!
//! ## Design Constraints
//!
//! - `sfs-error` MUST NOT depend on any other `sfs-*` crate; descriptor and
//!   block values are carried as plain integers.
//! - All string payloads are owned (`String`).

use thiserror::Error;

/// Unified error type for all SimFS operations.
#[derive(Debug, Error)]
pub enum SfsError {
    /// Operating system I/O error from the backing store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Sizing input is missing, zero, or inconsistent.
    ///
    /// Raised while deriving the block geometry. No addressing scheme can
    /// exist without it, so the CLI treats this as fatal.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// An internal invariant was breached (double release, block store
    /// access crossing a block boundary, dangling table reference).
    #[error("corrupt state at block {block}: {detail}")]
    Corruption { block: u64, detail: String },

    /// A command was given the wrong number of arguments.
    #[error("{verb}: usage: {usage}")]
    Usage { verb: String, usage: String },

    /// A numeric argument (descriptor, size, offset) did not parse.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A path component before the last one does not exist.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The open mode token is not one of `r`, `w`, `rw`.
    #[error("unknown mode: {0}")]
    UnknownMode(String),

    /// The named entry does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Attempted a file operation on a directory.
    #[error("is a directory")]
    IsDirectory,

    /// A directory was required.
    #[error("not a directory")]
    NotADirectory,

    /// The entry already has a live descriptor.
    #[error("{0} is already open")]
    AlreadyOpen(String),

    /// No open descriptor with this number.
    #[error("bad file descriptor: {0}")]
    BadDescriptor(u64),

    /// The descriptor was opened write-only.
    #[error("descriptor {0} not open for read")]
    NotOpenForRead(u64),

    /// The descriptor was opened read-only.
    #[error("descriptor {0} not open for write")]
    NotOpenForWrite(u64),

    /// The read would go beyond the end of the file.
    #[error("read past end: cursor={cursor} len={len} size={size}")]
    ReadPastEnd { cursor: u64, len: u64, size: u64 },

    /// The seek target lies beyond the end of the file.
    #[error("seek out of range: offset={offset} size={size}")]
    SeekOutOfRange { offset: u64, size: u64 },

    /// The write would exceed what a single inode can address.
    #[error("file too large: requested={requested} max={max}")]
    FileTooLarge { requested: u64, max: u64 },

    /// No free blocks remain to satisfy the request.
    #[error("no space left on device")]
    OutOfSpace,

    /// rmdir on a non-empty directory.
    #[error("directory not empty")]
    DirectoryNotEmpty,

    /// rmdir on the root directory.
    #[error("cannot remove root directory")]
    CannotRemoveRoot,

    /// rmdir on the current working directory.
    #[error("cannot remove working directory")]
    CannotRemoveWorkingDirectory,

    /// Target already exists (mkdir, link destination).
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// A regular file was required (link source, unlink target).
    #[error("{0} is not a file")]
    NotAFile(String),

    /// Hard link source and destination share a parent directory.
    #[error("link source and destination must be in different directories")]
    SameParentLink,
}

impl SfsError {
    /// Convert this error into a POSIX errno.
    ///
    /// Policy notes:
    /// - `ReadPastEnd` / `SeekOutOfRange` → `EINVAL`: the request itself is
    ///   out of range, the file is fine.
    /// - `AlreadyOpen` → `EBUSY`: the entry is locked by another descriptor.
    /// - `SameParentLink` → `EXDEV`: closest errno for "wrong directory pair".
    /// - `Corruption` → `EIO`.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::Corruption { .. } => libc::EIO,
            Self::InvalidGeometry(_)
            | Self::Usage { .. }
            | Self::InvalidArgument(_)
            | Self::UnknownMode(_)
            | Self::ReadPastEnd { .. }
            | Self::SeekOutOfRange { .. } => libc::EINVAL,
            Self::InvalidPath(_) | Self::NotFound(_) => libc::ENOENT,
            Self::IsDirectory => libc::EISDIR,
            Self::NotADirectory => libc::ENOTDIR,
            Self::AlreadyOpen(_) => libc::EBUSY,
            Self::BadDescriptor(_) | Self::NotOpenForRead(_) | Self::NotOpenForWrite(_) => {
                libc::EBADF
            }
            Self::FileTooLarge { .. } => libc::EFBIG,
            Self::OutOfSpace => libc::ENOSPC,
            Self::DirectoryNotEmpty => libc::ENOTEMPTY,
            Self::CannotRemoveRoot | Self::CannotRemoveWorkingDirectory => libc::EBUSY,
            Self::AlreadyExists(_) => libc::EEXIST,
            Self::NotAFile(_) => libc::EPERM,
            Self::SameParentLink => libc::EXDEV,
        }
    }
}

/// Result alias using `SfsError`.
pub type Result<T> = std::result::Result<T, SfsError>;
