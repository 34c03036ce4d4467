//! Open file table.

use serde::Serialize;
use sfs_error::{Result, SfsError};
use sfs_types::{EntryId, Fd, InodeNumber, OpenMode};
use std::collections::BTreeMap;

/// State of one open descriptor.
///
/// `inode` and `entry` are lookups into the inode table and directory
/// tree, not owners; the entry stays locked for as long as the handle
/// lives, so neither can be removed underneath it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenHandle {
    pub fd: Fd,
    pub mode: OpenMode,
    pub cursor: u64,
    pub inode: InodeNumber,
    pub entry: EntryId,
}

/// Descriptor number to open handle.
#[derive(Debug, Default)]
pub struct OpenFileTable {
    handles: BTreeMap<Fd, OpenHandle>,
    next_fd: u64,
}

impl OpenFileTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle under the next descriptor number.
    ///
    /// Numbers increase monotonically and are never handed out twice.
    pub fn insert(&mut self, mode: OpenMode, inode: InodeNumber, entry: EntryId) -> Fd {
        let fd = Fd(self.next_fd);
        self.next_fd += 1;
        self.handles.insert(
            fd,
            OpenHandle {
                fd,
                mode,
                cursor: 0,
                inode,
                entry,
            },
        );
        fd
    }

    pub fn get(&self, fd: Fd) -> Result<&OpenHandle> {
        self.handles.get(&fd).ok_or(SfsError::BadDescriptor(fd.0))
    }

    pub fn get_mut(&mut self, fd: Fd) -> Result<&mut OpenHandle> {
        self.handles
            .get_mut(&fd)
            .ok_or(SfsError::BadDescriptor(fd.0))
    }

    pub fn remove(&mut self, fd: Fd) -> Result<OpenHandle> {
        self.handles
            .remove(&fd)
            .ok_or(SfsError::BadDescriptor(fd.0))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptors_are_monotonic_and_not_reused() {
        let mut table = OpenFileTable::new();
        let a = table.insert(OpenMode::Read, InodeNumber(0), EntryId(1));
        let b = table.insert(OpenMode::Write, InodeNumber(1), EntryId(2));
        assert_eq!((a, b), (Fd(0), Fd(1)));

        table.remove(a).unwrap();
        let c = table.insert(OpenMode::ReadWrite, InodeNumber(0), EntryId(1));
        assert_eq!(c, Fd(2));
        assert_eq!(table.len(), 2);
        assert!(matches!(table.get(a), Err(SfsError::BadDescriptor(0))));
        assert_eq!(table.get(c).unwrap().fd, Fd(2));
    }

    #[test]
    fn unknown_descriptor_is_bad() {
        let mut table = OpenFileTable::new();
        assert!(matches!(table.get(Fd(9)), Err(SfsError::BadDescriptor(9))));
        assert!(matches!(table.remove(Fd(0)), Err(SfsError::BadDescriptor(0))));
        assert!(table.is_empty());
    }

    #[test]
    fn cursor_starts_at_zero() {
        let mut table = OpenFileTable::new();
        let fd = table.insert(OpenMode::Write, InodeNumber(3), EntryId(4));
        let handle = table.get_mut(fd).unwrap();
        assert_eq!(handle.cursor, 0);
        handle.cursor = 12;
        assert_eq!(table.get(fd).unwrap().cursor, 12);
    }
}
