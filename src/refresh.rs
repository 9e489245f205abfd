//! Filesystem scanning for the refresh pipeline.
//!
//! Scanning runs without any catalog lock: each selected root is walked into
//! a provisional [`RootShare`] off to the side, reusing TTHs from the prior
//! catalog when a file's `(size, mtime)` is unchanged and queueing the rest
//! for the hasher. The manager splices the provisional roots in under the
//! exclusive lock afterwards. Hidden files are skipped, as are configured
//! excluded subpaths; per-hub exclusion is deliberately NOT applied here;
//! one catalog serves every hub and exclusion happens at query time.

use crate::config::RootSpec;
use crate::error::{ShareError, ShareResult};
use crate::index::{Catalog, RootShare};
use crate::tree::{DirId, DirTree};
use crate::types::Tth;
use ignore::WalkBuilder;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Prior-catalog snapshot
// ---------------------------------------------------------------------------

/// What the previous catalog knew about a file, for TTH reuse.
pub struct PriorEntry {
    pub size: u64,
    pub mtime: u64,
    pub tth: Tth,
}

pub type PriorMap = HashMap<PathBuf, PriorEntry>;

/// Collect `(path → size, mtime, tth)` for every hashed file under the given
/// roots. Taken under the shared lock before scanning starts; the scan
/// itself then runs lock-free.
pub fn snapshot_prior(catalog: &Catalog, keys: &[String]) -> PriorMap {
    let mut prior = PriorMap::new();
    for key in keys {
        let Some(root) = catalog.roots.get(key) else { continue };
        root.tree.walk_files(DirTree::ROOT, &mut |dir, _, file| {
            let Some(tth) = file.tth else { return };
            let mut path = root.real_path.clone();
            for part in root.tree.rel_components(dir) {
                path.push(part);
            }
            path.push(&file.name);
            prior.insert(path, PriorEntry { size: file.size, mtime: file.last_write, tth });
        });
    }
    prior
}

// ---------------------------------------------------------------------------
// Scanning
// ---------------------------------------------------------------------------

/// Result of scanning one root: the provisional share and the files left
/// pending for the hasher.
pub struct ScanOutcome {
    pub root: RootShare,
    pub to_hash: Vec<PathBuf>,
    pub files: usize,
    pub reused: usize,
}

pub fn mtime_secs(md: &fs::Metadata) -> u64 {
    md.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Modification time of a directory itself, for `REFRESH_UPDATE` skipping.
pub fn root_mtime(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().map(|md| mtime_secs(&md))
}

/// Walk one root into a provisional [`RootShare`].
///
/// I/O failures on individual entries are logged and skipped; only a
/// missing root directory fails the scan.
pub fn scan_root(
    spec: &RootSpec,
    excluded: &[PathBuf],
    prior: &PriorMap,
) -> ShareResult<ScanOutcome> {
    let root_md =
        fs::metadata(&spec.path).map_err(|_| ShareError::PathNotFound(spec.path.clone()))?;
    if !root_md.is_dir() {
        return Err(ShareError::PathNotFound(spec.path.clone()));
    }

    let mut root = RootShare::new(spec.path.clone(), &spec.virtual_name, mtime_secs(&root_md));
    root.excluded_hubs = spec.excluded_hubs.iter().cloned().collect();
    root.incoming = spec.incoming;

    let mut dirs: HashMap<PathBuf, DirId> = HashMap::new();
    dirs.insert(spec.path.clone(), DirTree::ROOT);

    let mut to_hash = Vec::new();
    let mut files = 0usize;
    let mut reused = 0usize;

    let skip: Vec<PathBuf> = excluded.to_vec();
    let walker = WalkBuilder::new(&spec.path)
        .hidden(true)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .follow_links(false)
        .filter_entry(move |entry| !skip.iter().any(|x| entry.path().starts_with(x)))
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "walk error, skipping entry");
                continue;
            }
        };
        if entry.depth() == 0 {
            continue;
        }
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            warn!(path = %path.display(), "non-unicode name, skipping");
            continue;
        };
        // Entries under a skipped parent have no recorded parent id.
        let Some(&parent) = path.parent().and_then(|p| dirs.get(p)) else {
            continue;
        };

        let file_type = entry.file_type();
        if file_type.is_some_and(|ft| ft.is_dir()) {
            let md = match entry.metadata() {
                Ok(md) => md,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "stat failed, skipping subtree");
                    continue;
                }
            };
            match root.tree.insert_dir(parent, name, mtime_secs(&md)) {
                Ok(id) => {
                    dirs.insert(path.to_path_buf(), id);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "skipping directory"),
            }
        } else if file_type.is_some_and(|ft| ft.is_file()) {
            let md = match entry.metadata() {
                Ok(md) => md,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "stat failed, skipping file");
                    continue;
                }
            };
            let size = md.len();
            let mtime = mtime_secs(&md);
            // A size-or-mtime change invalidates the cached TTH.
            let tth = match prior.get(path) {
                Some(p) if p.size == size && p.mtime == mtime => {
                    reused += 1;
                    Some(p.tth)
                }
                _ => None,
            };
            let pending = tth.is_none();
            match root.tree.insert_file(parent, name, size, mtime, tth) {
                Ok(_) => {
                    files += 1;
                    if pending {
                        to_hash.push(path.to_path_buf());
                    }
                }
                Err(e) => warn!(path = %path.display(), error = %e, "skipping file"),
            }
        }
    }

    debug!(
        root = %spec.path.display(),
        files,
        reused,
        pending = to_hash.len(),
        "root scanned"
    );
    Ok(ScanOutcome { root, to_hash, files, reused })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write as _;

    fn spec(path: &Path) -> RootSpec {
        RootSpec {
            path: path.to_path_buf(),
            virtual_name: "Test".into(),
            excluded_hubs: vec![],
            incoming: false,
        }
    }

    fn touch(path: &Path, contents: &[u8]) {
        File::create(path).unwrap().write_all(contents).unwrap();
    }

    #[test]
    fn scan_builds_tree_and_queues_unhashed() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("Albums")).unwrap();
        touch(&dir.path().join("Albums/Song.mp3"), b"xxx");
        touch(&dir.path().join("loose.bin"), b"yy");

        let out = scan_root(&spec(dir.path()), &[], &PriorMap::new()).unwrap();
        assert_eq!(out.files, 2);
        assert_eq!(out.to_hash.len(), 2);
        assert_eq!(out.reused, 0);
        let albums = out.root.tree.find_child(DirTree::ROOT, "albums").unwrap();
        assert!(out.root.tree.find_file(albums, "Song.mp3").is_some());
        assert_eq!(out.root.tree.total_size(), 5);
    }

    #[test]
    fn prior_tths_are_reused_when_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.bin");
        touch(&file, b"abc");
        let md = fs::metadata(&file).unwrap();

        let mut prior = PriorMap::new();
        prior.insert(
            file.clone(),
            PriorEntry { size: md.len(), mtime: mtime_secs(&md), tth: Tth([7; 24]) },
        );

        let out = scan_root(&spec(dir.path()), &[], &prior).unwrap();
        assert_eq!(out.reused, 1);
        assert!(out.to_hash.is_empty());
        let f = out.root.tree.find_file(DirTree::ROOT, "a.bin").unwrap();
        assert_eq!(f.tth, Some(Tth([7; 24])));

        // Same path, different size: rehash.
        let mut prior = PriorMap::new();
        prior.insert(
            file.clone(),
            PriorEntry { size: 999, mtime: mtime_secs(&md), tth: Tth([7; 24]) },
        );
        let out = scan_root(&spec(dir.path()), &[], &prior).unwrap();
        assert_eq!(out.to_hash, vec![file]);
    }

    #[cfg(unix)]
    #[test]
    fn hidden_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join(".hidden"), b"x");
        touch(&dir.path().join("visible"), b"x");
        let out = scan_root(&spec(dir.path()), &[], &PriorMap::new()).unwrap();
        assert_eq!(out.files, 1);
        assert!(out.root.tree.find_file(DirTree::ROOT, "visible").is_some());
    }

    #[test]
    fn excluded_subpaths_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("keep")).unwrap();
        fs::create_dir(dir.path().join("skip")).unwrap();
        touch(&dir.path().join("keep/a"), b"x");
        touch(&dir.path().join("skip/b"), b"x");

        let excluded = vec![dir.path().join("skip")];
        let out = scan_root(&spec(dir.path()), &excluded, &PriorMap::new()).unwrap();
        assert_eq!(out.files, 1);
        assert!(out.root.tree.find_child(DirTree::ROOT, "skip").is_none());
    }

    #[test]
    fn missing_root_is_path_not_found() {
        let err = scan_root(&spec(Path::new("/no/such/dir")), &[], &PriorMap::new());
        assert!(matches!(err, Err(ShareError::PathNotFound(_))));
    }
}
