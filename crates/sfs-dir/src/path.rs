//! Path resolution.
//!
//! Turns a slash-separated path into the `(parent, node, name)` triple the
//! driver needs for both lookups and creations.

use crate::DirTree;
use sfs_error::{Result, SfsError};
use sfs_types::{EntryId, PATH_SEPARATOR};

/// Outcome of walking a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Directory the last component was looked up in.
    pub parent: EntryId,
    /// Entry named by the last component, if it exists.
    pub node: Option<EntryId>,
    /// The last component as written.
    pub name: String,
}

/// Split the part of a path after any leading separator into components.
///
/// Empty components between consecutive separators are kept as-is; a
/// single trailing separator does not produce a final empty component, and
/// an empty string has no components.
#[must_use]
pub fn split_components(rest: &str) -> Vec<&str> {
    if rest.is_empty() {
        return Vec::new();
    }
    let mut parts: Vec<&str> = rest.split(PATH_SEPARATOR).collect();
    if rest.ends_with(PATH_SEPARATOR) {
        parts.pop();
    }
    parts
}

/// Resolve `path` against `tree`, starting at the root for absolute paths
/// and at `cwd` otherwise.
///
/// Each component is looked up in the entry found for the previous one. If
/// any component other than the last is missing, the path is invalid. A
/// path with no components resolves to the start entry itself, reported as
/// `(start.parent, start, start.name)`.
pub fn resolve(tree: &DirTree, cwd: EntryId, path: &str) -> Result<Resolution> {
    let (start, rest) = match path.strip_prefix(PATH_SEPARATOR) {
        Some(rest) => (tree.root(), rest),
        None => (cwd, path),
    };

    let start_entry = tree.get(start)?;
    let mut parent = start_entry.parent;
    let mut name = start_entry.name.clone();
    let mut current = Some(start);

    for component in split_components(rest) {
        let Some(dir) = current else {
            return Err(SfsError::InvalidPath(path.to_owned()));
        };
        parent = dir;
        current = tree.find_child(dir, component)?;
        component.clone_into(&mut name);
    }

    Ok(Resolution {
        parent,
        node: current,
        name,
    })
}
