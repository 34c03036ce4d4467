#![forbid(unsafe_code)]
//! SimFS filesystem driver.
//!
//! [`SimFs`] ties the free extent list, the inode table, the directory tree
//! and the open file table to one block store. Every operation runs to
//! completion before returning; a failed operation leaves the instance
//! exactly as it was.

pub mod command;
pub mod config;
pub mod table;

pub use command::{Command, Outcome, tokenize};
pub use config::FsConfig;
pub use table::{OpenFileTable, OpenHandle};

use serde::Serialize;
use sfs_alloc::FreeExtentList;
use sfs_block::{BlockStore, ByteDevice};
use sfs_dir::{DirTree, Resolution, resolve};
use sfs_error::{Result, SfsError};
use sfs_inode::{BlockRuns, InodeTable};
use sfs_types::{EntryId, EntryKind, Fd, Geometry, InodeNumber, OpenMode};
use tracing::{debug, trace};

// ── Reports ───────────────────────────────────────────────────────────

/// Result of `stat` on one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StatInfo {
    File {
        name: String,
        inode: InodeNumber,
        /// Directory entries sharing the inode.
        links: u32,
        size: u64,
        blocks: u64,
    },
    Directory {
        name: String,
        entries: usize,
    },
}

/// One line of `ls`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListEntry {
    pub name: String,
    pub kind: EntryKind,
}

/// Nested namespace snapshot produced by `tree`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    pub name: String,
    pub kind: EntryKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
}

/// Space and object accounting, as reported by `df`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FsUsage {
    pub block_size: u32,
    pub total_blocks: u64,
    pub free_blocks: u64,
    /// Blocks held by live inodes.
    pub used_blocks: u64,
    pub free_extents: usize,
    pub largest_free_extent: u64,
    pub inodes: usize,
    pub entries: usize,
    pub open_files: usize,
}

// ── Driver ────────────────────────────────────────────────────────────

/// A mounted SimFS instance.
pub struct SimFs {
    geometry: Geometry,
    store: BlockStore,
    free: FreeExtentList,
    inodes: InodeTable,
    tree: DirTree,
    cwd: EntryId,
    open_files: OpenFileTable,
}

impl std::fmt::Debug for SimFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimFs")
            .field("geometry", &self.geometry)
            .field("free_blocks", &self.free.free_blocks())
            .field("inodes", &self.inodes.len())
            .field("entries", &self.tree.len())
            .field("cwd", &self.cwd)
            .field("open_files", &self.open_files.len())
            .finish_non_exhaustive()
    }
}

impl SimFs {
    /// Create a filesystem backed by a zeroed in-memory store.
    pub fn new(config: &FsConfig) -> Result<Self> {
        let geometry = config.geometry()?;
        Ok(Self::from_store(BlockStore::in_memory(geometry)?))
    }

    /// Create a filesystem on an already-opened, zero-initialised device.
    ///
    /// The device must hold at least `num_blocks * block_size` bytes.
    pub fn with_device(config: &FsConfig, dev: Box<dyn ByteDevice>) -> Result<Self> {
        let geometry = config.geometry()?;
        Ok(Self::from_store(BlockStore::new(geometry, dev)?))
    }

    fn from_store(store: BlockStore) -> Self {
        let geometry = *store.geometry();
        debug!(
            block_size = geometry.block_size(),
            direct_blocks = geometry.direct_blocks(),
            num_blocks = geometry.num_blocks(),
            "sfs_create"
        );
        Self {
            geometry,
            store,
            free: FreeExtentList::new(geometry.num_blocks()),
            inodes: InodeTable::new(),
            tree: DirTree::new(),
            cwd: EntryId::ROOT,
            open_files: OpenFileTable::new(),
        }
    }

    #[must_use]
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    #[must_use]
    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    #[must_use]
    pub fn free_extents(&self) -> &FreeExtentList {
        &self.free
    }

    #[must_use]
    pub fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    #[must_use]
    pub fn dir_tree(&self) -> &DirTree {
        &self.tree
    }

    #[must_use]
    pub fn open_files(&self) -> &OpenFileTable {
        &self.open_files
    }

    /// Entry of the current working directory.
    #[must_use]
    pub fn cwd(&self) -> EntryId {
        self.cwd
    }

    fn resolve(&self, path: &str) -> Result<Resolution> {
        resolve(&self.tree, self.cwd, path)
    }

    /// Resolve `path` to the parent it would be created in, rejecting
    /// existing targets, empty names and file parents.
    fn creation_parent(&self, res: &Resolution, path: &str) -> Result<EntryId> {
        if res.node.is_some() {
            return Err(SfsError::AlreadyExists(path.to_owned()));
        }
        if res.name.is_empty() {
            return Err(SfsError::InvalidPath(path.to_owned()));
        }
        if !self.tree.get(res.parent)?.is_dir() {
            return Err(SfsError::NotADirectory);
        }
        Ok(res.parent)
    }

    // ── Descriptors ───────────────────────────────────────────────────

    /// Open `path` with a mode token (`r`, `w` or `rw`).
    ///
    /// An unresolvable path is reported before an unknown mode token.
    pub fn open(&mut self, path: &str, mode: &str) -> Result<Fd> {
        self.resolve(path)?;
        let mode = OpenMode::parse(mode)?;
        self.open_with_mode(path, mode)
    }

    /// Open `path`, creating an empty file when the mode allows it.
    ///
    /// Opening an existing file for writing keeps its contents; the cursor
    /// starts at offset 0 either way.
    pub fn open_with_mode(&mut self, path: &str, mode: OpenMode) -> Result<Fd> {
        let res = self.resolve(path)?;
        let (entry, inode) = match res.node {
            Some(id) => {
                let entry = self.tree.get(id)?;
                let Some(inode) = entry.inode() else {
                    return Err(SfsError::IsDirectory);
                };
                if entry.locked {
                    return Err(SfsError::AlreadyOpen(path.to_owned()));
                }
                (id, inode)
            }
            None if mode.requires_existing() => {
                return Err(SfsError::NotFound(path.to_owned()));
            }
            None => {
                let parent = self.creation_parent(&res, path)?;
                let inode = self.inodes.create();
                let entry = self.tree.add_file(parent, &res.name, inode)?;
                (entry, inode)
            }
        };

        self.tree.set_locked(entry, true)?;
        let fd = self.open_files.insert(mode, inode, entry);
        debug!(fd = fd.0, ino = inode.0, mode = mode.token(), path, "fd_open");
        Ok(fd)
    }

    /// Read exactly `len` bytes at the cursor and advance it.
    pub fn read(&mut self, fd: Fd, len: u64) -> Result<Vec<u8>> {
        let geo = self.geometry;
        let handle = self.open_files.get(fd)?;
        if !handle.mode.can_read() {
            return Err(SfsError::NotOpenForRead(fd.0));
        }
        let cursor = handle.cursor;
        let inode = self.inodes.get(handle.inode)?;
        let size = inode.size();
        let end = cursor
            .checked_add(len)
            .filter(|&end| end <= size)
            .ok_or(SfsError::ReadPastEnd { cursor, len, size })?;

        let mut buf = vec![0_u8; to_usize(len)?];
        let mut filled = 0;
        for (offset, run) in BlockRuns::new(&geo, cursor, len) {
            let addr = inode.translate(&geo, offset)?;
            let run = to_usize(run)?;
            self.store.read_at(addr, &mut buf[filled..filled + run])?;
            filled += run;
        }

        self.open_files.get_mut(fd)?.cursor = end;
        trace!(fd = fd.0, cursor, len, "fd_read");
        Ok(buf)
    }

    /// Write `data` at the cursor, growing the file as needed.
    ///
    /// New blocks are taken from the free list before the inode is touched,
    /// so running out of space leaves both unchanged. Returns the number of
    /// bytes written, which is always `data.len()`.
    pub fn write(&mut self, fd: Fd, data: &[u8]) -> Result<u64> {
        let geo = self.geometry;
        let handle = self.open_files.get(fd)?;
        if !handle.mode.can_write() {
            return Err(SfsError::NotOpenForWrite(fd.0));
        }
        let (cursor, ino) = (handle.cursor, handle.inode);
        let len = data.len() as u64;
        let max = geo.max_file_size();
        let end = cursor
            .checked_add(len)
            .filter(|&end| end <= max)
            .ok_or(SfsError::FileTooLarge {
                requested: cursor.saturating_add(len),
                max,
            })?;

        let inode = self.inodes.get(ino)?;
        let new_size = inode.size().max(end);
        let blocks_used = inode.blocks_used();
        let needed = geo.blocks_for_bytes(new_size).saturating_sub(blocks_used);

        if needed > 0 {
            let chunks = self.free.allocate(needed)?;
            let inode = self.inodes.get_mut(ino)?;
            inode.grow_to(&geo, blocks_used + needed);
            if let Err(err) = inode.attach(&geo, &chunks) {
                for chunk in &chunks {
                    self.free.release(chunk.start, chunk.count)?;
                }
                return Err(err);
            }
            trace!(
                ino = ino.0,
                blocks = needed,
                chunks = chunks.len(),
                "inode_extend"
            );
        }

        let inode = self.inodes.get(ino)?;
        let mut consumed = 0;
        for (offset, run) in BlockRuns::new(&geo, cursor, len) {
            let addr = inode.translate(&geo, offset)?;
            let run = to_usize(run)?;
            self.store.write_at(addr, &data[consumed..consumed + run])?;
            consumed += run;
        }

        self.inodes.get_mut(ino)?.set_size(&geo, new_size)?;
        self.open_files.get_mut(fd)?.cursor = end;
        trace!(fd = fd.0, cursor, len, size = new_size, "fd_write");
        Ok(len)
    }

    /// Move the cursor to an absolute offset no greater than the file size.
    pub fn seek(&mut self, fd: Fd, offset: u64) -> Result<()> {
        let ino = self.open_files.get(fd)?.inode;
        let size = self.inodes.get(ino)?.size();
        if offset > size {
            return Err(SfsError::SeekOutOfRange { offset, size });
        }
        self.open_files.get_mut(fd)?.cursor = offset;
        trace!(fd = fd.0, offset, "fd_seek");
        Ok(())
    }

    /// Release a descriptor and unlock its entry.
    pub fn close(&mut self, fd: Fd) -> Result<()> {
        let handle = self.open_files.get(fd)?;
        self.tree.set_locked(handle.entry, false)?;
        let handle = self.open_files.remove(fd)?;
        debug!(fd = fd.0, ino = handle.inode.0, "fd_close");
        Ok(())
    }

    // ── Namespace ─────────────────────────────────────────────────────

    /// Create an empty directory.
    pub fn mkdir(&mut self, path: &str) -> Result<EntryId> {
        let res = self.resolve(path)?;
        let parent = self.creation_parent(&res, path)?;
        let id = self.tree.add_dir(parent, &res.name)?;
        debug!(parent = parent.0, id = id.0, path, "mkdir");
        Ok(id)
    }

    /// Remove an empty directory other than the root or the working
    /// directory.
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        let res = self.resolve(path)?;
        let Some(id) = res.node else {
            return Err(SfsError::InvalidPath(path.to_owned()));
        };
        if id == self.tree.root() {
            return Err(SfsError::CannotRemoveRoot);
        }
        if id == self.cwd {
            return Err(SfsError::CannotRemoveWorkingDirectory);
        }
        let entry = self.tree.get(id)?;
        if !entry.children().is_empty() {
            return Err(SfsError::DirectoryNotEmpty);
        }
        if !entry.is_dir() {
            return Err(SfsError::NotADirectory);
        }
        self.tree.remove(id)?;
        debug!(id = id.0, path, "rmdir");
        Ok(())
    }

    /// Change the working directory.
    pub fn cd(&mut self, path: &str) -> Result<()> {
        let res = self.resolve(path)?;
        let Some(id) = res.node else {
            return Err(SfsError::InvalidPath(path.to_owned()));
        };
        if !self.tree.get(id)?.is_dir() {
            return Err(SfsError::NotADirectory);
        }
        self.cwd = id;
        trace!(cwd = id.0, path, "cd");
        Ok(())
    }

    /// Add a second name for the file at `src`.
    ///
    /// Both names refer to the same inode. The new name must live in a
    /// different directory from the source.
    pub fn link(&mut self, src: &str, dest: &str) -> Result<()> {
        let src_res = self.resolve(src)?;
        let dest_res = self.resolve(dest)?;
        let Some(src_id) = src_res.node else {
            return Err(SfsError::NotFound(src.to_owned()));
        };
        if dest_res.node.is_some() {
            return Err(SfsError::AlreadyExists(dest.to_owned()));
        }
        let Some(inode) = self.tree.get(src_id)?.inode() else {
            return Err(SfsError::NotAFile(src.to_owned()));
        };
        if src_res.parent == dest_res.parent {
            return Err(SfsError::SameParentLink);
        }
        let parent = self.creation_parent(&dest_res, dest)?;
        let id = self.tree.add_file(parent, &dest_res.name, inode)?;
        let links = self.inodes.link(inode)?;
        debug!(ino = inode.0, id = id.0, links, src, dest, "link");
        Ok(())
    }

    /// Remove a file name; the inode's blocks are reclaimed with its last
    /// name.
    pub fn unlink(&mut self, path: &str) -> Result<()> {
        let res = self.resolve(path)?;
        let Some(id) = res.node else {
            return Err(SfsError::NotFound(path.to_owned()));
        };
        let entry = self.tree.get(id)?;
        let Some(inode) = entry.inode() else {
            return Err(SfsError::NotAFile(path.to_owned()));
        };
        if entry.locked {
            return Err(SfsError::AlreadyOpen(path.to_owned()));
        }
        self.tree.remove(id)?;
        let reclaimed = self.inodes.unlink(inode, &mut self.free)?;
        debug!(ino = inode.0, reclaimed, path, "unlink");
        Ok(())
    }

    // ── Queries ───────────────────────────────────────────────────────

    pub fn stat(&self, path: &str) -> Result<StatInfo> {
        let res = self.resolve(path)?;
        let Some(id) = res.node else {
            return Err(SfsError::NotFound(path.to_owned()));
        };
        let entry = self.tree.get(id)?;
        Ok(match entry.inode() {
            Some(ino) => {
                let inode = self.inodes.get(ino)?;
                StatInfo::File {
                    name: entry.name.clone(),
                    inode: ino,
                    links: self.inodes.links(ino)?,
                    size: inode.size(),
                    blocks: inode.blocks_used(),
                }
            }
            None => StatInfo::Directory {
                name: entry.name.clone(),
                entries: entry.children().len(),
            },
        })
    }

    /// Children of the working directory in insertion order.
    pub fn ls(&self) -> Result<Vec<ListEntry>> {
        self.tree
            .get(self.cwd)?
            .children()
            .iter()
            .map(|&child| {
                let entry = self.tree.get(child)?;
                Ok(ListEntry {
                    name: entry.name.clone(),
                    kind: entry.kind(),
                })
            })
            .collect()
    }

    /// Whole contents of a file.
    pub fn cat(&mut self, path: &str) -> Result<Vec<u8>> {
        let fd = self.open_with_mode(path, OpenMode::Read)?;
        let data = self.read_to_end(fd);
        self.close(fd)?;
        data
    }

    /// Copy the contents of `src` over the start of `dest`, creating
    /// `dest` if needed. Returns the bytes copied.
    pub fn cp(&mut self, src: &str, dest: &str) -> Result<u64> {
        let src_fd = self.open_with_mode(src, OpenMode::Read)?;
        let dest_fd = match self.open_with_mode(dest, OpenMode::Write) {
            Ok(fd) => fd,
            Err(err) => {
                self.close(src_fd)?;
                return Err(err);
            }
        };
        let copied = self
            .read_to_end(src_fd)
            .and_then(|data| self.write(dest_fd, &data));
        let closed_src = self.close(src_fd);
        let closed_dest = self.close(dest_fd);
        let copied = copied?;
        closed_src?;
        closed_dest?;
        debug!(src, dest, bytes = copied, "cp");
        Ok(copied)
    }

    fn read_to_end(&mut self, fd: Fd) -> Result<Vec<u8>> {
        let handle = self.open_files.get(fd)?;
        let size = self.inodes.get(handle.inode)?.size();
        let remaining = size.saturating_sub(handle.cursor);
        self.read(fd, remaining)
    }

    /// Absolute path of the working directory.
    pub fn pwd(&self) -> Result<String> {
        self.tree.path_of(self.cwd)
    }

    /// Snapshot of the namespace below the working directory.
    pub fn tree(&self) -> Result<TreeNode> {
        self.tree_node(self.cwd)
    }

    fn tree_node(&self, id: EntryId) -> Result<TreeNode> {
        let entry = self.tree.get(id)?;
        let size = match entry.inode() {
            Some(ino) => Some(self.inodes.get(ino)?.size()),
            None => None,
        };
        let children = entry
            .children()
            .iter()
            .map(|&child| self.tree_node(child))
            .collect::<Result<Vec<_>>>()?;
        Ok(TreeNode {
            name: entry.name.clone(),
            kind: entry.kind(),
            size,
            children,
        })
    }

    #[must_use]
    pub fn usage(&self) -> FsUsage {
        FsUsage {
            block_size: self.geometry.block_size(),
            total_blocks: self.free.total_blocks(),
            free_blocks: self.free.free_blocks(),
            used_blocks: self.inodes.blocks_held(),
            free_extents: self.free.extents().len(),
            largest_free_extent: self.free.largest_extent(),
            inodes: self.inodes.len(),
            entries: self.tree.len(),
            open_files: self.open_files.len(),
        }
    }

    /// Flush the backing store.
    pub fn sync(&self) -> Result<()> {
        self.store.sync()
    }
}

fn to_usize(n: u64) -> Result<usize> {
    usize::try_from(n).map_err(|_| SfsError::InvalidArgument(format!("length {n} exceeds usize")))
}
