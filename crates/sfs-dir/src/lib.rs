#![forbid(unsafe_code)]
//! Directory operations.
//!
//! The namespace is an arena of [`DirEntry`] nodes addressed by
//! [`EntryId`]. Downward edges (a directory's child list) own their
//! entries; the upward `parent` edge is a plain id, so there is no
//! ownership cycle. The root is created with the tree and is its own
//! parent.
//!
//! Name uniqueness inside a directory is not enforced here: callers look
//! the name up with [`DirTree::find_child`] before adding. Lookup returns
//! the first match in insertion order.

pub mod path;

pub use path::{Resolution, resolve, split_components};

use sfs_error::{Result, SfsError};
use sfs_types::{EntryId, EntryKind, InodeNumber, PATH_SEPARATOR, ROOT_NAME};
use std::collections::HashMap;
use tracing::trace;

/// What a namespace node holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryNode {
    /// Owned child entries in insertion order.
    Directory { children: Vec<EntryId> },
    /// Shared reference into the inode table.
    File { inode: InodeNumber },
}

/// One namespace node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub parent: EntryId,
    pub node: EntryNode,
    /// True while an open descriptor targets this entry.
    pub locked: bool,
}

impl DirEntry {
    #[must_use]
    pub fn kind(&self) -> EntryKind {
        match self.node {
            EntryNode::Directory { .. } => EntryKind::Directory,
            EntryNode::File { .. } => EntryKind::File,
        }
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind().is_dir()
    }

    /// Inode of a file entry; `None` for directories.
    #[must_use]
    pub fn inode(&self) -> Option<InodeNumber> {
        match self.node {
            EntryNode::File { inode } => Some(inode),
            EntryNode::Directory { .. } => None,
        }
    }

    /// Children of a directory entry; empty for files.
    #[must_use]
    pub fn children(&self) -> &[EntryId] {
        match &self.node {
            EntryNode::Directory { children } => children,
            EntryNode::File { .. } => &[],
        }
    }
}

/// Arena holding every live directory entry.
#[derive(Debug, Clone)]
pub struct DirTree {
    entries: HashMap<EntryId, DirEntry>,
    next_id: u64,
}

impl Default for DirTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DirTree {
    /// A tree containing only the root directory.
    #[must_use]
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            EntryId::ROOT,
            DirEntry {
                name: ROOT_NAME.to_owned(),
                parent: EntryId::ROOT,
                node: EntryNode::Directory {
                    children: Vec::new(),
                },
                locked: false,
            },
        );
        Self {
            entries,
            next_id: EntryId::ROOT.0 + 1,
        }
    }

    #[must_use]
    pub fn root(&self) -> EntryId {
        EntryId::ROOT
    }

    pub fn get(&self, id: EntryId) -> Result<&DirEntry> {
        self.entries.get(&id).ok_or_else(|| dangling(id))
    }

    pub fn get_mut(&mut self, id: EntryId) -> Result<&mut DirEntry> {
        self.entries.get_mut(&id).ok_or_else(|| dangling(id))
    }

    /// Number of live entries, root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up `name` under `dir`.
    ///
    /// `"."` is `dir` itself and `".."` its parent; any other name is a
    /// linear scan of the children. A missing name is `Ok(None)`.
    pub fn find_child(&self, dir: EntryId, name: &str) -> Result<Option<EntryId>> {
        let entry = self.get(dir)?;
        match name {
            "." => Ok(Some(dir)),
            ".." => Ok(Some(entry.parent)),
            _ => {
                for &child in entry.children() {
                    if self.get(child)?.name == name {
                        return Ok(Some(child));
                    }
                }
                Ok(None)
            }
        }
    }

    fn insert_child(&mut self, parent: EntryId, name: &str, node: EntryNode) -> Result<EntryId> {
        if !self.get(parent)?.is_dir() {
            return Err(SfsError::NotADirectory);
        }
        let id = EntryId(self.next_id);
        self.next_id += 1;
        self.entries.insert(
            id,
            DirEntry {
                name: name.to_owned(),
                parent,
                node,
                locked: false,
            },
        );
        if let EntryNode::Directory { children } = &mut self.get_mut(parent)?.node {
            children.push(id);
        }
        trace!(parent = parent.0, id = id.0, name, "dir_add");
        Ok(id)
    }

    /// Create an empty directory `name` under `parent`.
    pub fn add_dir(&mut self, parent: EntryId, name: &str) -> Result<EntryId> {
        self.insert_child(
            parent,
            name,
            EntryNode::Directory {
                children: Vec::new(),
            },
        )
    }

    /// Create a file entry `name` under `parent` referring to `inode`.
    pub fn add_file(&mut self, parent: EntryId, name: &str, inode: InodeNumber) -> Result<EntryId> {
        self.insert_child(parent, name, EntryNode::File { inode })
    }

    /// Detach `id` from its parent and drop it from the arena.
    ///
    /// The root and non-empty directories cannot be removed; removing them
    /// would orphan entries.
    pub fn remove(&mut self, id: EntryId) -> Result<DirEntry> {
        if id == EntryId::ROOT {
            return Err(SfsError::CannotRemoveRoot);
        }
        let entry = self.get(id)?;
        if !entry.children().is_empty() {
            return Err(SfsError::DirectoryNotEmpty);
        }
        let parent = entry.parent;
        if let EntryNode::Directory { children } = &mut self.get_mut(parent)?.node {
            children.retain(|&child| child != id);
        }
        let removed = self.entries.remove(&id).ok_or_else(|| dangling(id))?;
        trace!(parent = parent.0, id = id.0, name = %removed.name, "dir_remove");
        Ok(removed)
    }

    /// Set or clear the open-descriptor lock on an entry.
    pub fn set_locked(&mut self, id: EntryId, locked: bool) -> Result<()> {
        self.get_mut(id)?.locked = locked;
        Ok(())
    }

    /// Absolute path of `id`, `/` for the root.
    pub fn path_of(&self, id: EntryId) -> Result<String> {
        let mut names = Vec::new();
        let mut cur = id;
        while cur != EntryId::ROOT {
            let entry = self.get(cur)?;
            names.push(entry.name.as_str());
            cur = entry.parent;
        }
        if names.is_empty() {
            return Ok(PATH_SEPARATOR.to_string());
        }
        let mut path = String::new();
        for name in names.iter().rev() {
            path.push(PATH_SEPARATOR);
            path.push_str(name);
        }
        Ok(path)
    }
}

fn dangling(id: EntryId) -> SfsError {
    SfsError::Corruption {
        block: 0,
        detail: format!("dangling directory entry {}", id.0),
    }
}
