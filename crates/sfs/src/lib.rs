#![forbid(unsafe_code)]
//! SimFS public API facade.
//!
//! Re-exports the driver from `sfs-core` together with the error, type and
//! device definitions callers need to drive it. This is the crate the CLI
//! depends on.

pub use sfs_block::{ByteDevice, FileByteDevice, MemByteDevice};
pub use sfs_core::*;
pub use sfs_error::{Result, SfsError};
pub use sfs_types::{EntryKind, Fd, Geometry, InodeNumber, OpenMode};
