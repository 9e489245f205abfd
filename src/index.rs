//! The catalog: all share roots plus the secondary indices derived from
//! their trees: per-root TTH multimaps, the virtual-name map, and the
//! search bloom.
//!
//! Everything in here is protected by the manager's single reader-writer
//! lock. Full rebuilds run under the exclusive lock at refresh swap time;
//! the partial path exists for single-root updates and always scrubs the
//! affected root's entries before re-inserting, so no TTH entry survives
//! for a removed file.

use crate::bloom::BloomTokenFilter;
use crate::tree::{DirTree, FileRef};
use crate::types::{Peer, Tth};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Root share
// ---------------------------------------------------------------------------

/// One configured share root: the `(real path, virtual name)` pair, its
/// directory tree, and its TTH index.
pub struct RootShare {
    /// Canonical absolute path of the shared directory.
    pub real_path: PathBuf,
    /// Label exposed to peers. Multiple roots may share one virtual name.
    pub virtual_name: String,
    /// Hub URLs that must not see this root.
    pub excluded_hubs: BTreeSet<String>,
    /// Hot path refreshed on the incoming schedule.
    pub incoming: bool,
    /// Modification time of the root directory at scan time; lets
    /// `REFRESH_UPDATE` skip unchanged roots without walking them.
    pub root_last_write: u64,
    pub tree: DirTree,
    /// TTH → files within this root's subtree. Multimap: several files may
    /// carry the same content.
    pub tth_index: HashMap<Tth, Vec<FileRef>>,
}

impl RootShare {
    pub fn new(real_path: PathBuf, virtual_name: &str, last_write: u64) -> Self {
        Self {
            real_path,
            virtual_name: virtual_name.to_string(),
            excluded_hubs: BTreeSet::new(),
            incoming: false,
            root_last_write: last_write,
            tree: DirTree::new(virtual_name, last_write),
            tth_index: HashMap::new(),
        }
    }

    /// Is this root hidden from the peer's hub?
    pub fn is_hub_excluded(&self, peer: &Peer) -> bool {
        !peer.hub_url.is_empty() && self.excluded_hubs.contains(&peer.hub_url)
    }

    /// On-disk path of a file in this root.
    pub fn real_file_path(&self, fref: &FileRef) -> Option<PathBuf> {
        let file = self.tree.file(fref)?;
        let mut path = self.real_path.clone();
        for part in self.tree.rel_components(fref.dir) {
            path.push(part);
        }
        path.push(&file.name);
        Some(path)
    }

    /// Rebuild this root's TTH index from its tree. Scrubs first.
    pub fn rebuild_tth_index(&mut self) {
        self.tth_index.clear();
        let mut entries: Vec<(Tth, FileRef)> = Vec::new();
        self.tree.walk_files(DirTree::ROOT, &mut |dir, key, file| {
            if let Some(tth) = file.tth {
                entries.push((tth, FileRef { dir, name_key: key.to_string() }));
            }
        });
        for (tth, fref) in entries {
            self.tth_index.entry(tth).or_default().push(fref);
        }
    }

    /// Feed every directory and file name of this root into the bloom.
    pub fn ingest_names(&self, bloom: &mut BloomTokenFilter) {
        self.tree.walk(DirTree::ROOT, &mut |tree, id| {
            bloom.add_name(&tree.node(id).name);
            for (_, file) in tree.node(id).files() {
                bloom.add_name(&file.name);
            }
        });
    }

    fn name_count(&self) -> usize {
        self.tree.dir_count() + self.tree.count_files(DirTree::ROOT)
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Root key: the canonical real path rendered as a string. Case-preserved;
/// lookups go through [`Catalog::root_key_for`].
pub type RootKey = String;

/// The complete in-memory share catalog. One instance lives behind the
/// manager's reader-writer lock; refresh builds replacements off to the side
/// and splices them in under the exclusive lock.
#[derive(Default)]
pub struct Catalog {
    /// Real root path → share. BTreeMap keeps listings and walks stable.
    pub roots: BTreeMap<RootKey, RootShare>,
    /// Case-folded virtual name → root keys carrying that name.
    pub virtual_index: HashMap<String, Vec<RootKey>>,
    pub bloom: BloomTokenFilter,
}

impl Catalog {
    pub fn root_key_for(path: &Path) -> RootKey {
        path.to_string_lossy().to_string()
    }

    /// Rebuild every secondary index: per-root TTH multimaps, the
    /// virtual-name map, and the bloom. Single pass per root; called under
    /// the exclusive lock at swap time.
    pub fn rebuild_indices(&mut self) {
        let names: usize = self.roots.values().map(|r| r.name_count()).sum();
        let mut bloom = BloomTokenFilter::with_estimate(names * 16);
        let mut virtual_index: HashMap<String, Vec<RootKey>> = HashMap::new();
        for (key, root) in &mut self.roots {
            root.rebuild_tth_index();
            virtual_index.entry(root.virtual_name.to_lowercase()).or_default().push(key.clone());
        }
        for root in self.roots.values() {
            root.ingest_names(&mut bloom);
        }
        self.virtual_index = virtual_index;
        self.bloom = bloom;
    }

    /// Partial update after one root changed: scrub and rebuild that root's
    /// TTH index and re-ingest its names. The bloom only gains bits here; a
    /// full rebuild at the next swap sheds stale ones.
    pub fn update_indices(&mut self, key: &str) {
        if let Some(root) = self.roots.get_mut(key) {
            root.rebuild_tth_index();
            root.ingest_names(&mut self.bloom);
        }
        self.rebuild_virtual_index();
    }

    pub(crate) fn rebuild_virtual_index(&mut self) {
        let mut virtual_index: HashMap<String, Vec<RootKey>> = HashMap::new();
        for (key, root) in &self.roots {
            virtual_index.entry(root.virtual_name.to_lowercase()).or_default().push(key.clone());
        }
        self.virtual_index = virtual_index;
    }

    /// Insert or replace a root and keep the virtual-name map consistent.
    pub fn insert_root(&mut self, root: RootShare) {
        let key = Self::root_key_for(&root.real_path);
        self.roots.insert(key, root);
        self.rebuild_virtual_index();
    }

    pub fn remove_root(&mut self, key: &str) -> Option<RootShare> {
        let removed = self.roots.remove(key);
        if removed.is_some() {
            self.rebuild_virtual_index();
        }
        removed
    }

    /// Roots whose virtual name matches, case-insensitively.
    pub fn roots_by_virtual(&self, virtual_name: &str) -> Vec<&RootShare> {
        self.virtual_index
            .get(&virtual_name.to_lowercase())
            .map(|keys| keys.iter().filter_map(|k| self.roots.get(k)).collect())
            .unwrap_or_default()
    }

    pub fn has_virtual(&self, virtual_name: &str) -> bool {
        self.virtual_index.contains_key(&virtual_name.to_lowercase())
    }

    /// The root whose real path is a prefix of `path`.
    pub fn root_for_real_path(&self, path: &Path) -> Option<(&RootKey, &RootShare)> {
        self.roots.iter().find(|(_, r)| path.starts_with(&r.real_path))
    }

    /// Locate a file by its on-disk path: root prefix match, then a
    /// case-insensitive descent.
    pub fn locate_by_real_path(&self, path: &Path) -> Option<(&RootKey, FileRef)> {
        let (key, root) = self.root_for_real_path(path)?;
        let rel = path.strip_prefix(&root.real_path).ok()?;
        let mut components: Vec<&str> = rel.iter().filter_map(|c| c.to_str()).collect();
        let file_name = components.pop()?;
        let dir = root.tree.descend(DirTree::ROOT, &components)?;
        root.tree.find_file(dir, file_name)?;
        Some((key, FileRef { dir, name_key: crate::tree::name_key(file_name) }))
    }

    /// Every `(root, file)` pair carrying this TTH, walk order.
    pub fn find_by_tth(&self, tth: &Tth) -> Vec<(&RootKey, &RootShare, &FileRef)> {
        let mut out = Vec::new();
        for (key, root) in &self.roots {
            if let Some(refs) = root.tth_index.get(tth) {
                for fref in refs {
                    out.push((key, root, fref));
                }
            }
        }
        out
    }

    /// Does any root's index contain this TTH? `false` on an empty catalog.
    pub fn is_tth_shared(&self, tth: &Tth) -> bool {
        self.roots.values().any(|r| r.tth_index.contains_key(tth))
    }

    /// Total shared size visible to `peer` (`None` = no hub filtering).
    pub fn share_size(&self, peer: Option<&Peer>) -> u64 {
        self.roots
            .values()
            .filter(|r| peer.is_none_or(|p| !r.is_hub_excluded(p)))
            .map(|r| r.tree.total_size())
            .sum()
    }

    pub fn shared_file_count(&self) -> usize {
        self.roots.values().map(|r| r.tree.count_files(DirTree::ROOT)).sum()
    }

    /// `(virtual name, real paths)` pairs, grouped. Aliased roots collapse
    /// into one entry.
    pub fn grouped_directories(&self) -> Vec<(String, Vec<PathBuf>)> {
        let mut grouped: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        for root in self.roots.values() {
            grouped.entry(root.virtual_name.clone()).or_default().push(root.real_path.clone());
        }
        grouped.into_iter().collect()
    }

    /// Collect directory names matching the release predicate across all
    /// roots, for the release-name list rebuild at swap time.
    pub fn collect_release_names<F>(&self, matches: F) -> Vec<String>
    where
        F: Fn(&str) -> bool,
    {
        let mut names = Vec::new();
        for root in self.roots.values() {
            root.tree.walk(DirTree::ROOT, &mut |tree, id| {
                let node = tree.node(id);
                if node.parent.is_some() && matches(&node.name) {
                    names.push(node.name.clone());
                }
            });
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tth(b: u8) -> Tth {
        Tth([b; 24])
    }

    fn sample_root(path: &str, virt: &str) -> RootShare {
        let mut root = RootShare::new(PathBuf::from(path), virt, 0);
        let sub = root.tree.insert_dir(DirTree::ROOT, "Albums", 0).unwrap();
        root.tree.insert_file(sub, "Song.mp3", 100, 0, Some(tth(1))).unwrap();
        root.tree.insert_file(DirTree::ROOT, "loose.flac", 50, 0, Some(tth(2))).unwrap();
        root
    }

    #[test]
    fn rebuild_populates_tth_and_virtual_indexes() {
        let mut catalog = Catalog::default();
        catalog.insert_root(sample_root("/music", "Music"));
        catalog.rebuild_indices();

        assert!(catalog.is_tth_shared(&tth(1)));
        assert!(catalog.is_tth_shared(&tth(2)));
        assert!(!catalog.is_tth_shared(&tth(9)));
        assert_eq!(catalog.roots_by_virtual("music").len(), 1);
        assert!(catalog.bloom.might_contain("song."));
    }

    #[test]
    fn aliased_roots_group_under_one_virtual_name() {
        let mut catalog = Catalog::default();
        catalog.insert_root(sample_root("/a", "Media"));
        catalog.insert_root(sample_root("/b", "Media"));
        catalog.rebuild_indices();
        assert_eq!(catalog.roots_by_virtual("Media").len(), 2);
        assert_eq!(catalog.grouped_directories().len(), 1);
    }

    #[test]
    fn locate_by_real_path_descends_case_insensitively() {
        let mut catalog = Catalog::default();
        catalog.insert_root(sample_root("/music", "Music"));
        catalog.rebuild_indices();
        let (key, fref) =
            catalog.locate_by_real_path(Path::new("/music/ALBUMS/song.mp3")).unwrap();
        assert_eq!(key, "/music");
        let root = &catalog.roots[key];
        assert_eq!(root.tree.file(&fref).unwrap().name, "Song.mp3");
    }

    #[test]
    fn share_size_respects_hub_exclusion() {
        let mut catalog = Catalog::default();
        let mut secret = sample_root("/sec", "Sec");
        secret.excluded_hubs.insert("adc://secret".into());
        catalog.insert_root(secret);
        catalog.insert_root(sample_root("/pub", "Pub"));
        catalog.rebuild_indices();

        let outsider = Peer::new("cid", "adc://secret");
        assert_eq!(catalog.share_size(None), 300);
        assert_eq!(catalog.share_size(Some(&outsider)), 150);
    }
}
