//! Search execution against the catalog.
//!
//! Two dialects: the legacy string/size/category query and the structured
//! ADC query. Both run the same discipline: bloom prefilter, then a
//! deterministic tree walk that prunes whole subtrees via the per-directory
//! type mask, stopping at the result cap. Hub exclusion is applied here at
//! query time so a single catalog serves every hub.

use crate::bloom::search_tokens;
use crate::error::{ShareError, ShareResult};
use crate::index::Catalog;
use crate::tree::{DirId, DirTree, FileNode};
use crate::types::{check_type, FileCategory, Peer, SearchResultItem, Tth};

// ---------------------------------------------------------------------------
// Legacy queries
// ---------------------------------------------------------------------------

/// A legacy-protocol search: free-text terms plus size and category bounds.
#[derive(Clone, Debug)]
pub struct LegacyQuery {
    pub terms: String,
    pub category: FileCategory,
    pub min_size: u64,
    pub max_size: u64,
    pub max_results: usize,
}

impl LegacyQuery {
    pub fn new(terms: impl Into<String>, category: FileCategory, max_results: usize) -> Self {
        Self { terms: terms.into(), category, min_size: 0, max_size: u64::MAX, max_results }
    }

    /// Execute against a catalog snapshot. Results come back in tree-walk
    /// order, capped at `max_results`.
    pub fn run(&self, catalog: &Catalog, peer: &Peer) -> Vec<SearchResultItem> {
        let mut results = Vec::new();

        // TTH-form legacy query resolves through the index, no walk.
        if self.category == FileCategory::Tth {
            let text = self.terms.trim().trim_start_matches("TTH:");
            if let Ok(tth) = text.parse::<Tth>() {
                collect_tth_hits(catalog, &tth, peer, self.max_results, &mut results);
            }
            return results;
        }

        let atoms = search_tokens(&self.terms);
        if atoms.is_empty() || !catalog.bloom.might_contain_all(&atoms) {
            return results;
        }

        for root in catalog.roots.values() {
            if results.len() >= self.max_results {
                break;
            }
            if root.is_hub_excluded(peer) {
                continue;
            }
            self.walk(&root.tree, DirTree::ROOT, &atoms, &mut results);
        }
        results
    }

    fn walk(
        &self,
        tree: &DirTree,
        dir: DirId,
        atoms: &[String],
        results: &mut Vec<SearchResultItem>,
    ) {
        if results.len() >= self.max_results {
            return;
        }
        let node = tree.node(dir);
        // Subtrees without the wanted category cannot contain a hit.
        if !node.has_type(self.category) {
            return;
        }

        if self.category == FileCategory::Directory {
            let lower = node.name.to_lowercase();
            if atoms.iter().all(|a| lower.contains(a.as_str())) {
                results.push(SearchResultItem {
                    virtual_path: tree.adc_path(dir),
                    size: node.size,
                    tth: None,
                    is_directory: true,
                });
            }
        } else {
            for (_, file) in node.files() {
                if results.len() >= self.max_results {
                    return;
                }
                if self.file_matches(file, atoms) {
                    results.push(SearchResultItem {
                        virtual_path: tree.file_adc_path(dir, file),
                        size: file.size,
                        tth: file.tth,
                        is_directory: false,
                    });
                }
            }
        }

        let children: Vec<DirId> = node.children().map(|(_, id)| id).collect();
        for child in children {
            self.walk(tree, child, atoms, results);
        }
    }

    fn file_matches(&self, file: &FileNode, atoms: &[String]) -> bool {
        if file.tth.is_none() {
            return false;
        }
        if file.size < self.min_size || file.size > self.max_size {
            return false;
        }
        if !check_type(&file.name, self.category) {
            return false;
        }
        let lower = file.name.to_lowercase();
        atoms.iter().all(|a| lower.contains(a.as_str()))
    }
}

// ---------------------------------------------------------------------------
// ADC queries
// ---------------------------------------------------------------------------

/// A structured ADC search, parsed from `SCH` parameter strings.
#[derive(Clone, Debug, Default)]
pub struct AdcQuery {
    /// Terms that must all appear, lowercased.
    pub include: Vec<String>,
    /// Terms that must not appear anywhere on the path.
    pub exclude: Vec<String>,
    /// Extension whitelist (lowercased, no dot). Empty = all.
    pub ext: Vec<String>,
    /// Extension blacklist.
    pub no_ext: Vec<String>,
    /// Minimum size, inclusive.
    pub ge: u64,
    /// Maximum size, inclusive.
    pub le: u64,
    pub tth: Option<Tth>,
    pub directories_only: bool,
}

impl AdcQuery {
    /// Parse `AN`/`NO`/`EX`/`LE`/`GE`/`EQ`/`TR`/`TY` parameters. Unknown
    /// codes are ignored, as the protocol reserves them for extensions.
    pub fn from_params<S: AsRef<str>>(params: &[S]) -> ShareResult<Self> {
        let mut q = AdcQuery { le: u64::MAX, ..AdcQuery::default() };
        for p in params {
            let p = p.as_ref();
            if p.len() < 2 || !p.is_char_boundary(2) {
                return Err(ShareError::InvalidPath(p.to_string()));
            }
            let (code, value) = p.split_at(2);
            match code {
                "AN" => q.include.push(value.to_lowercase()),
                "NO" => q.exclude.push(value.to_lowercase()),
                "EX" => q.ext.push(value.to_lowercase()),
                "GE" => q.ge = value.parse().unwrap_or(0),
                "LE" => q.le = value.parse().unwrap_or(u64::MAX),
                "EQ" => {
                    let n = value.parse().unwrap_or(0);
                    q.ge = n;
                    q.le = n;
                }
                "TR" => q.tth = Some(value.parse()?),
                "TY" => q.directories_only = value == "2",
                _ => {}
            }
        }
        Ok(q)
    }

    /// Execute against a catalog snapshot.
    pub fn run(&self, catalog: &Catalog, peer: &Peer, max_results: usize) -> Vec<SearchResultItem> {
        let mut results = Vec::new();

        if let Some(tth) = &self.tth {
            collect_tth_hits(catalog, tth, peer, max_results, &mut results);
            return results;
        }

        if !catalog.bloom.might_contain_all(&self.include) {
            return results;
        }

        for root in catalog.roots.values() {
            if results.len() >= max_results {
                break;
            }
            if root.is_hub_excluded(peer) {
                continue;
            }
            let unmatched: Vec<usize> = (0..self.include.len()).collect();
            self.walk(&root.tree, DirTree::ROOT, &unmatched, max_results, &mut results);
        }
        results
    }

    /// `unmatched` carries the include atoms not yet satisfied by an
    /// ancestor directory name, so a parent match covers the whole subtree
    /// without re-checking.
    fn walk(
        &self,
        tree: &DirTree,
        dir: DirId,
        unmatched: &[usize],
        max_results: usize,
        results: &mut Vec<SearchResultItem>,
    ) {
        if results.len() >= max_results {
            return;
        }
        let node = tree.node(dir);
        let dir_lower = node.name.to_lowercase();

        // An excluded term on a directory name removes the whole subtree.
        if node.parent.is_some() && self.exclude.iter().any(|x| dir_lower.contains(x.as_str())) {
            return;
        }

        let remaining: Vec<usize> = unmatched
            .iter()
            .copied()
            .filter(|&i| !dir_lower.contains(self.include[i].as_str()))
            .collect();

        if remaining.is_empty() && node.parent.is_some() && self.ext.is_empty() {
            let dir_size_ok = node.size >= self.ge && node.size <= self.le;
            if self.directories_only || dir_size_ok {
                results.push(SearchResultItem {
                    virtual_path: tree.adc_path(dir),
                    size: node.size,
                    tth: None,
                    is_directory: true,
                });
            }
        }

        if !self.directories_only {
            for (_, file) in node.files() {
                if results.len() >= max_results {
                    return;
                }
                if self.file_matches(file, &remaining) {
                    results.push(SearchResultItem {
                        virtual_path: tree.file_adc_path(dir, file),
                        size: file.size,
                        tth: file.tth,
                        is_directory: false,
                    });
                }
            }
        }

        let children: Vec<DirId> = node.children().map(|(_, id)| id).collect();
        for child in children {
            self.walk(tree, child, &remaining, max_results, results);
        }
    }

    fn file_matches(&self, file: &FileNode, remaining: &[usize]) -> bool {
        if file.tth.is_none() {
            return false;
        }
        if file.size < self.ge || file.size > self.le {
            return false;
        }
        let lower = file.name.to_lowercase();
        if !remaining.iter().all(|&i| lower.contains(self.include[i].as_str())) {
            return false;
        }
        if self.exclude.iter().any(|x| lower.contains(x.as_str())) {
            return false;
        }
        let ext = lower.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
        if !self.ext.is_empty() && !self.ext.iter().any(|e| e == ext) {
            return false;
        }
        if self.no_ext.iter().any(|e| e == ext) {
            return false;
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Shared TTH resolution
// ---------------------------------------------------------------------------

fn collect_tth_hits(
    catalog: &Catalog,
    tth: &Tth,
    peer: &Peer,
    max_results: usize,
    results: &mut Vec<SearchResultItem>,
) {
    for (_, root, fref) in catalog.find_by_tth(tth) {
        if results.len() >= max_results {
            return;
        }
        if root.is_hub_excluded(peer) {
            continue;
        }
        if let Some(file) = root.tree.file(fref) {
            results.push(SearchResultItem {
                virtual_path: root.tree.file_adc_path(fref.dir, file),
                size: file.size,
                tth: file.tth,
                is_directory: false,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::RootShare;
    use std::path::PathBuf;

    fn tth(b: u8) -> Tth {
        Tth([b; 24])
    }

    fn music_catalog() -> Catalog {
        let mut root = RootShare::new(PathBuf::from("/music"), "Music", 0);
        let albums = root.tree.insert_dir(DirTree::ROOT, "Albums", 0).unwrap();
        root.tree.insert_file(albums, "Song.mp3", 1_234_567, 0, Some(tth(1))).unwrap();
        root.tree.insert_file(albums, "Clip.mkv", 9_000, 0, Some(tth(2))).unwrap();
        root.tree.insert_file(DirTree::ROOT, "pending.mp3", 5, 0, None).unwrap();
        let mut catalog = Catalog::default();
        catalog.insert_root(root);
        catalog.rebuild_indices();
        catalog
    }

    #[test]
    fn legacy_finds_by_term_and_category() {
        let catalog = music_catalog();
        let hits = LegacyQuery::new("song", FileCategory::Audio, 10)
            .run(&catalog, &Peer::default());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].virtual_path, "/Music/Albums/Song.mp3");
        assert_eq!(hits[0].size, 1_234_567);
    }

    #[test]
    fn legacy_category_prunes() {
        let catalog = music_catalog();
        let hits = LegacyQuery::new("clip", FileCategory::Audio, 10)
            .run(&catalog, &Peer::default());
        assert!(hits.is_empty());
    }

    #[test]
    fn legacy_skips_pending_files() {
        let catalog = music_catalog();
        let hits = LegacyQuery::new("pending", FileCategory::Any, 10)
            .run(&catalog, &Peer::default());
        assert!(hits.is_empty());
    }

    #[test]
    fn legacy_size_bounds() {
        let catalog = music_catalog();
        let mut q = LegacyQuery::new("song", FileCategory::Any, 10);
        q.max_size = 100;
        assert!(q.run(&catalog, &Peer::default()).is_empty());
        q.max_size = u64::MAX;
        q.min_size = 1_000_000;
        assert_eq!(q.run(&catalog, &Peer::default()).len(), 1);
    }

    #[test]
    fn adc_parent_match_covers_children() {
        let catalog = music_catalog();
        let q = AdcQuery::from_params(&["ANalbums", "ANsong"]).unwrap();
        let hits = q.run(&catalog, &Peer::default(), 10);
        assert!(hits.iter().any(|h| h.virtual_path == "/Music/Albums/Song.mp3"));
    }

    #[test]
    fn adc_exclude_and_extensions() {
        let catalog = music_catalog();
        let q = AdcQuery::from_params(&["ANalbums", "NOclip"]).unwrap();
        let hits = q.run(&catalog, &Peer::default(), 10);
        assert!(hits.iter().all(|h| !h.virtual_path.contains("Clip")));

        let q = AdcQuery::from_params(&["ANalbums", "EXmkv"]).unwrap();
        let hits = q.run(&catalog, &Peer::default(), 10);
        assert!(hits.iter().filter(|h| !h.is_directory).all(|h| h.virtual_path.ends_with(".mkv")));
    }

    #[test]
    fn adc_tth_lookup_skips_walk() {
        let catalog = music_catalog();
        let q = AdcQuery::from_params(&[format!("TR{}", tth(1))]).unwrap();
        let hits = q.run(&catalog, &Peer::default(), 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].tth, Some(tth(1)));
    }

    #[test]
    fn adc_directory_results() {
        let catalog = music_catalog();
        let q = AdcQuery::from_params(&["ANalbums", "TY2"]).unwrap();
        let hits = q.run(&catalog, &Peer::default(), 10);
        assert_eq!(hits.len(), 1);
        assert!(hits[0].is_directory);
        assert_eq!(hits[0].virtual_path, "/Music/Albums/");
    }

    #[test]
    fn hub_exclusion_filters_hits() {
        let mut catalog = music_catalog();
        catalog.roots.get_mut("/music").unwrap().excluded_hubs.insert("adc://secret".into());
        let blocked = Peer::new("c", "adc://secret");
        let open = Peer::new("c", "adc://open");
        let q = LegacyQuery::new("song", FileCategory::Audio, 10);
        assert!(q.run(&catalog, &blocked).is_empty());
        assert_eq!(q.run(&catalog, &open).len(), 1);
    }
}
