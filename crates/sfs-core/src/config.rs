//! Construction parameters.

use serde::{Deserialize, Serialize};
use sfs_error::Result;
use sfs_types::Geometry;

/// Sizing of a filesystem instance, fixed for its lifetime.
///
/// Missing fields in a deserialised config are treated as zero, which
/// [`FsConfig::geometry`] rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsConfig {
    /// Total size of the backing store in bytes (rounded up to whole blocks).
    #[serde(default)]
    pub fs_size: u64,
    /// Bytes per block.
    #[serde(default)]
    pub block_size: u32,
    /// Slots in the direct block list and in each indirect group.
    #[serde(default)]
    pub direct_blocks: u32,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            fs_size: 64 * 1024,
            block_size: 64,
            direct_blocks: 4,
        }
    }
}

impl FsConfig {
    #[must_use]
    pub fn new(fs_size: u64, block_size: u32, direct_blocks: u32) -> Self {
        Self {
            fs_size,
            block_size,
            direct_blocks,
        }
    }

    /// Derive and validate the block geometry.
    pub fn geometry(&self) -> Result<Geometry> {
        Geometry::new(self.fs_size, self.block_size, self.direct_blocks)
    }
}
