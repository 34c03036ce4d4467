#![forbid(unsafe_code)]
//! Shared newtypes and geometry for SimFS.

use serde::{Deserialize, Serialize};
use sfs_error::{Result, SfsError};
use std::fmt;

/// Path component separator.
pub const PATH_SEPARATOR: char = '/';

/// Name given to the root directory entry.
pub const ROOT_NAME: &str = "root";

/// Block index on the backing store.
///
/// The physical byte address of a block is `index * block_size`; use
/// [`Geometry::block_to_byte`] rather than multiplying by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNumber(pub u64);

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Byte offset on the backing store.
///
/// This is a unit-carrying wrapper to prevent mixing bytes and blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ByteOffset(pub u64);

/// Identity of an inode in the inode table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InodeNumber(pub u64);

impl fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Arena handle of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(pub u64);

impl EntryId {
    /// The root directory is always the first entry created.
    pub const ROOT: Self = Self(0);
}

/// File descriptor handed out by `open`.
///
/// Assigned monotonically and never reused for the lifetime of a filesystem
/// instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fd(pub u64);

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of a namespace node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

impl EntryKind {
    #[must_use]
    pub fn is_dir(self) -> bool {
        self == Self::Directory
    }
}

/// Access mode of an open descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpenMode {
    Read,
    Write,
    ReadWrite,
}

impl OpenMode {
    /// Parse a mode token: `r`, `w`, or `rw`.
    pub fn parse(token: &str) -> Result<Self> {
        match token {
            "r" => Ok(Self::Read),
            "w" => Ok(Self::Write),
            "rw" => Ok(Self::ReadWrite),
            other => Err(SfsError::UnknownMode(other.to_owned())),
        }
    }

    #[must_use]
    pub fn can_read(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    #[must_use]
    pub fn can_write(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }

    /// Whether opening in this mode requires the file to exist already.
    #[must_use]
    pub fn requires_existing(self) -> bool {
        self.can_read()
    }

    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            Self::Read => "r",
            Self::Write => "w",
            Self::ReadWrite => "rw",
        }
    }
}

/// Block geometry fixed at filesystem creation.
///
/// Invariant: `block_size`, `direct_blocks` and `num_blocks` are all
/// non-zero, and the derived maximum file size fits in a `u64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    block_size: u32,
    direct_blocks: u32,
    num_blocks: u64,
}

impl Geometry {
    /// Derive the geometry from the total store size and per-block settings.
    ///
    /// `num_blocks = ceil(fs_size / block_size)`. Any zero input is rejected
    /// with [`SfsError::InvalidGeometry`].
    pub fn new(fs_size: u64, block_size: u32, direct_blocks: u32) -> Result<Self> {
        if fs_size == 0 {
            return Err(SfsError::InvalidGeometry("fs_size=0".into()));
        }
        if block_size == 0 {
            return Err(SfsError::InvalidGeometry("block_size=0".into()));
        }
        if direct_blocks == 0 {
            return Err(SfsError::InvalidGeometry("direct_blocks=0".into()));
        }
        let num_blocks = fs_size.div_ceil(u64::from(block_size));
        let geo = Self {
            block_size,
            direct_blocks,
            num_blocks,
        };
        if geo.checked_max_file_size().is_none() || geo.checked_total_bytes().is_none() {
            return Err(SfsError::InvalidGeometry(format!(
                "block_size={block_size} direct_blocks={direct_blocks} overflows u64"
            )));
        }
        Ok(geo)
    }

    #[must_use]
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    #[must_use]
    pub fn block_size_u64(&self) -> u64 {
        u64::from(self.block_size)
    }

    #[must_use]
    pub fn direct_blocks(&self) -> u32 {
        self.direct_blocks
    }

    #[must_use]
    pub fn direct_blocks_u64(&self) -> u64 {
        u64::from(self.direct_blocks)
    }

    #[must_use]
    pub fn num_blocks(&self) -> u64 {
        self.num_blocks
    }

    /// Size of the backing store in bytes (`num_blocks * block_size`).
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.num_blocks * self.block_size_u64()
    }

    /// Bytes covered by the direct block list.
    #[must_use]
    pub fn direct_bytes(&self) -> u64 {
        self.direct_blocks_u64() * self.block_size_u64()
    }

    /// Blocks one inode can address: `direct + direct^2`.
    #[must_use]
    pub fn max_blocks_per_inode(&self) -> u64 {
        let d = self.direct_blocks_u64();
        d + d * d
    }

    /// Largest file size in bytes: `block_size * (direct + direct^2)`.
    #[must_use]
    pub fn max_file_size(&self) -> u64 {
        self.block_size_u64() * self.max_blocks_per_inode()
    }

    /// Number of blocks needed to hold `bytes` bytes.
    #[must_use]
    pub fn blocks_for_bytes(&self, bytes: u64) -> u64 {
        bytes.div_ceil(self.block_size_u64())
    }

    /// Physical byte address of the first byte of `block`.
    #[must_use]
    pub fn block_to_byte(&self, block: BlockNumber) -> ByteOffset {
        ByteOffset(block.0 * self.block_size_u64())
    }

    /// Offset of `byte_offset` inside its block.
    #[must_use]
    pub fn offset_in_block(&self, byte_offset: u64) -> u64 {
        byte_offset % self.block_size_u64()
    }

    fn checked_max_file_size(&self) -> Option<u64> {
        let d = self.direct_blocks_u64();
        d.checked_mul(d)
            .and_then(|sq| sq.checked_add(d))
            .and_then(|blocks| blocks.checked_mul(self.block_size_u64()))
    }

    fn checked_total_bytes(&self) -> Option<u64> {
        self.num_blocks.checked_mul(self.block_size_u64())
    }
}
