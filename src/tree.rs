//! Hierarchical entity store for one share root: directories and files in an
//! index-addressed arena.
//!
//! Parent links are arena indices, never owning handles, so the cyclic
//! file → directory → parent chain of the share hierarchy stays safe. Node 0
//! is always the root directory; its name is the root's virtual name.
//! Sibling maps are keyed by the case-folded name, which gives both
//! case-insensitive uniqueness and the deterministic walk order (children by
//! case-folded name ascending, then files by case-folded name ascending).

use crate::error::{ShareError, ShareResult};
use crate::types::{category_of, FileCategory, Tth};
use regex::Regex;
use std::collections::BTreeMap;

/// Arena index of a directory node within its [`DirTree`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct DirId(pub u32);

/// Stable handle to a file: owning directory plus the case-folded name key.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct FileRef {
    pub dir: DirId,
    pub name_key: String,
}

/// A regular file in the tree. `tth` is `None` while the file is queued for
/// hashing; pending files are invisible to search and listings.
#[derive(Clone, Debug)]
pub struct FileNode {
    pub name: String,
    pub size: u64,
    pub last_write: u64,
    pub tth: Option<Tth>,
}

/// A directory node. `size` and `file_types` aggregate the whole subtree.
#[derive(Clone, Debug)]
pub struct DirNode {
    pub name: String,
    pub last_write: u64,
    pub parent: Option<DirId>,
    pub size: u64,
    pub file_types: u32,
    children: BTreeMap<String, DirId>,
    files: BTreeMap<String, FileNode>,
}

impl DirNode {
    fn new(name: String, last_write: u64, parent: Option<DirId>) -> Self {
        Self {
            name,
            last_write,
            parent,
            size: 0,
            file_types: 0,
            children: BTreeMap::new(),
            files: BTreeMap::new(),
        }
    }

    /// Does this subtree contain files of `category`? `Any` always passes.
    /// Categories that carry no mask bit (`Directory`, `Tth`) never prune.
    pub fn has_type(&self, category: FileCategory) -> bool {
        let bit = category.mask_bit();
        category == FileCategory::Any || bit == 0 || self.file_types & bit != 0
    }

    /// Child directories in case-folded ascending order.
    pub fn children(&self) -> impl Iterator<Item = (&str, DirId)> {
        self.children.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Files in case-folded ascending order.
    pub fn files(&self) -> impl Iterator<Item = (&str, &FileNode)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

/// Case-folded key used for sibling identity.
pub fn name_key(name: &str) -> String {
    name.to_lowercase()
}

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

/// The directory tree of a single share root.
#[derive(Clone, Debug)]
pub struct DirTree {
    nodes: Vec<DirNode>,
}

impl DirTree {
    /// A tree holding only the root directory, named after the root's
    /// virtual name.
    pub fn new(virtual_name: &str, last_write: u64) -> Self {
        Self { nodes: vec![DirNode::new(virtual_name.to_string(), last_write, None)] }
    }

    pub const ROOT: DirId = DirId(0);

    pub fn node(&self, id: DirId) -> &DirNode {
        &self.nodes[id.0 as usize]
    }

    /// Rename the root directory (virtual name changes).
    pub fn set_root_name(&mut self, name: &str) {
        self.nodes[0].name = name.to_string();
    }

    fn node_mut(&mut self, id: DirId) -> &mut DirNode {
        &mut self.nodes[id.0 as usize]
    }

    pub fn dir_count(&self) -> usize {
        self.nodes.len()
    }

    /// Total size of all files in the tree.
    pub fn total_size(&self) -> u64 {
        self.node(Self::ROOT).size
    }

    /// Insert a child directory under `parent`.
    pub fn insert_dir(&mut self, parent: DirId, name: &str, last_write: u64) -> ShareResult<DirId> {
        let key = name_key(name);
        {
            let p = self.node(parent);
            if p.children.contains_key(&key) || p.files.contains_key(&key) {
                return Err(ShareError::DuplicateName(name.to_string()));
            }
        }
        let id = DirId(self.nodes.len() as u32);
        self.nodes.push(DirNode::new(name.to_string(), last_write, Some(parent)));
        self.node_mut(parent).children.insert(key, id);
        Ok(id)
    }

    /// Insert a file under `parent`, propagating size and type aggregates up
    /// the parent chain.
    pub fn insert_file(
        &mut self,
        parent: DirId,
        name: &str,
        size: u64,
        last_write: u64,
        tth: Option<Tth>,
    ) -> ShareResult<FileRef> {
        let key = name_key(name);
        {
            let p = self.node(parent);
            if p.files.contains_key(&key) || p.children.contains_key(&key) {
                return Err(ShareError::DuplicateName(name.to_string()));
            }
        }
        let type_bit = category_of(name).mask_bit();
        self.node_mut(parent)
            .files
            .insert(key.clone(), FileNode { name: name.to_string(), size, last_write, tth });

        let mut cursor = Some(parent);
        while let Some(id) = cursor {
            let node = self.node_mut(id);
            node.size += size;
            node.file_types |= type_bit;
            cursor = node.parent;
        }
        Ok(FileRef { dir: parent, name_key: key })
    }

    /// Case-insensitive child directory lookup.
    pub fn find_child(&self, parent: DirId, name: &str) -> Option<DirId> {
        self.node(parent).children.get(&name_key(name)).copied()
    }

    /// Case-insensitive file lookup.
    pub fn find_file(&self, parent: DirId, name: &str) -> Option<&FileNode> {
        self.node(parent).files.get(&name_key(name))
    }

    pub fn file(&self, fref: &FileRef) -> Option<&FileNode> {
        self.node(fref.dir).files.get(&fref.name_key)
    }

    /// Install the TTH of a previously pending file.
    pub fn set_file_tth(&mut self, fref: &FileRef, tth: Tth) -> bool {
        match self.node_mut(fref.dir).files.get_mut(&fref.name_key) {
            Some(f) => {
                f.tth = Some(tth);
                true
            }
            None => false,
        }
    }

    /// Walk a subtree depth-first in deterministic order, visiting each
    /// directory before its children and files.
    pub fn walk<F>(&self, dir: DirId, f: &mut F)
    where
        F: FnMut(&DirTree, DirId),
    {
        f(self, dir);
        let children: Vec<DirId> = self.node(dir).children.values().copied().collect();
        for child in children {
            self.walk(child, f);
        }
    }

    /// Visit every file in a subtree, directories in walk order.
    pub fn walk_files<F>(&self, dir: DirId, f: &mut F)
    where
        F: FnMut(DirId, &str, &FileNode),
    {
        self.walk(dir, &mut |tree, id| {
            for (key, file) in tree.node(id).files() {
                f(id, key, file);
            }
        });
    }

    /// Path components from (but excluding) the root down to `dir`.
    pub fn rel_components(&self, dir: DirId) -> Vec<&str> {
        let mut parts = Vec::new();
        let mut cursor = Some(dir);
        while let Some(id) = cursor {
            let node = self.node(id);
            if node.parent.is_some() {
                parts.push(node.name.as_str());
            }
            cursor = node.parent;
        }
        parts.reverse();
        parts
    }

    /// ADC-style virtual path of a directory: `/Virtual/sub/` with a
    /// trailing separator.
    pub fn adc_path(&self, dir: DirId) -> String {
        let mut out = String::from("/");
        out.push_str(&self.node(Self::ROOT).name);
        out.push('/');
        for part in self.rel_components(dir) {
            out.push_str(part);
            out.push('/');
        }
        out
    }

    /// ADC-style virtual path of a file within `dir`.
    pub fn file_adc_path(&self, dir: DirId, file: &FileNode) -> String {
        let mut out = self.adc_path(dir);
        out.push_str(&file.name);
        out
    }

    /// Resolve a sequence of virtual path components below `dir`.
    pub fn descend(&self, dir: DirId, components: &[&str]) -> Option<DirId> {
        let mut cursor = dir;
        for part in components {
            cursor = self.find_child(cursor, part)?;
        }
        Some(cursor)
    }

    /// Recursive file count for a subtree.
    pub fn count_files(&self, dir: DirId) -> usize {
        let mut n = 0;
        self.walk(dir, &mut |tree, id| n += tree.node(id).file_count());
        n
    }
}

// ---------------------------------------------------------------------------
// Release-name list
// ---------------------------------------------------------------------------

/// Sorted list of shared directory names matching the release pattern, used
/// by the queue manager to refuse duplicate downloads. Guarded by its own
/// mutex in the manager; lock order is tree first, then this list.
#[derive(Default)]
pub struct ReleaseDirs {
    pattern: Option<Regex>,
    names: Vec<String>,
}

impl ReleaseDirs {
    pub fn new(pattern: Option<Regex>) -> Self {
        Self { pattern, names: Vec::new() }
    }

    pub fn matches(&self, name: &str) -> bool {
        self.pattern.as_ref().is_some_and(|re| re.is_match(name))
    }

    /// Replace the list with names collected from a fresh catalog walk.
    pub fn replace(&mut self, mut names: Vec<String>) {
        for n in &mut names {
            *n = n.to_lowercase();
        }
        names.sort();
        names.dedup();
        self.names = names;
    }

    pub fn add(&mut self, name: &str) {
        let lower = name.to_lowercase();
        if let Err(pos) = self.names.binary_search(&lower) {
            self.names.insert(pos, lower);
        }
    }

    pub fn remove(&mut self, name: &str) {
        let lower = name.to_lowercase();
        if let Ok(pos) = self.names.binary_search(&lower) {
            self.names.remove(pos);
        }
    }

    /// O(log n) membership test, case-insensitive.
    pub fn contains(&self, name: &str) -> bool {
        self.names.binary_search(&name.to_lowercase()).is_ok()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
