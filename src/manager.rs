//! The share manager: top-level façade and lifecycle owner.
//!
//! One constructed instance is passed by handle to collaborators; there is
//! no process-wide singleton. The manager owns the single non-recursive
//! reader-writer lock over the catalog (`cs`), the listing registry, the
//! release-name list, the temp-share table, and the hashing queue. Lock
//! order where two are needed: tree first, then release list.

use crate::bloom::encode_tth_bloom;
use crate::cache;
use crate::config::{RootSpec, ShareConfig};
use crate::error::{ShareError, ShareResult};
use crate::hasher::{Hasher, HashQueue};
use crate::index::{Catalog, RootShare};
use crate::listing::{self, FileList, ListingRegistry};
use crate::refresh::{self, PriorMap, ScanOutcome};
use crate::resolve;
use crate::search::{AdcQuery, LegacyQuery};
use crate::tempshare::{TempShareInfo, TempShareTable};
use crate::tree::{DirTree, ReleaseDirs};
use crate::types::{
    unix_now, Peer, RefreshKind, SearchResultItem, Tth, CACHE_SAVE_GUARD_SECS, REFRESH_ALL,
    REFRESH_BLOCKING, REFRESH_DIRECTORY, REFRESH_INCOMING, REFRESH_UPDATE,
};
use rayon::prelude::*;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread;
use tracing::{info, warn};

/// Gap between automatic refreshes of incoming hot roots.
const INCOMING_REFRESH_SECS: u64 = 60 * 60;

// ---------------------------------------------------------------------------
// Listeners
// ---------------------------------------------------------------------------

/// Summary handed to listeners after a refresh swap.
#[derive(Clone, Debug)]
pub struct RefreshSummary {
    pub roots: usize,
    pub files: usize,
    pub reused: usize,
    pub pending: usize,
}

/// Share lifecycle events. All methods default to no-ops.
pub trait ShareListener: Send + Sync {
    fn on_refresh_completed(&self, _summary: &RefreshSummary) {}
    fn on_file_hashed(&self, _path: &Path, _tth: &Tth) {}
    fn on_cache_saved(&self) {}
}

/// Scoped listener registration; dropping it unsubscribes.
pub struct ShareSubscription {
    id: u64,
    manager: Weak<ShareManager>,
    _listener: Arc<dyn ShareListener>,
}

impl Drop for ShareSubscription {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.listeners.lock().unwrap().retain(|(id, _)| *id != self.id);
        }
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct ShareManager {
    /// NON-recursive reader-writer lock over the whole catalog. Readers
    /// hold it for complete traversals; the refresh writer only at swap.
    pub(crate) cs: RwLock<Catalog>,
    pub(crate) config: RwLock<ShareConfig>,
    release: Mutex<ReleaseDirs>,
    temp: TempShareTable,
    listings: ListingRegistry,
    hash_queue: HashQueue,
    hasher: Arc<dyn Hasher>,

    refreshing: AtomicBool,
    /// Bumped at every swap; listing generation restarts when it moves.
    generation: AtomicU64,
    hits: AtomicU64,
    cache_dirty: AtomicBool,
    shutting_down: AtomicBool,
    last_save: AtomicU64,
    last_incoming_refresh: AtomicU64,

    listeners: Mutex<Vec<(u64, Weak<dyn ShareListener>)>>,
    listener_seq: AtomicU64,
    save_worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ShareManager {
    pub fn new(config: ShareConfig, hasher: Arc<dyn Hasher>) -> Arc<Self> {
        let release_pattern = config.release_pattern.as_deref().and_then(|p| {
            Regex::new(p)
                .map_err(|e| warn!(pattern = p, error = %e, "bad release pattern, disabled"))
                .ok()
        });
        let listings = ListingRegistry::new(config.cache_dir.clone());

        Arc::new_cyclic(|weak: &Weak<ShareManager>| {
            let cb = weak.clone();
            let hash_queue = HashQueue::new(
                Arc::clone(&hasher),
                Box::new(move |path, tth| {
                    if let Some(manager) = cb.upgrade() {
                        manager.on_file_hashed(&path, tth);
                    }
                }),
            );
            ShareManager {
                cs: RwLock::new(Catalog::default()),
                config: RwLock::new(config),
                release: Mutex::new(ReleaseDirs::new(release_pattern)),
                temp: TempShareTable::default(),
                listings,
                hash_queue,
                hasher,
                refreshing: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                hits: AtomicU64::new(0),
                cache_dirty: AtomicBool::new(false),
                shutting_down: AtomicBool::new(false),
                last_save: AtomicU64::new(0),
                last_incoming_refresh: AtomicU64::new(unix_now()),
                listeners: Mutex::new(Vec::new()),
                listener_seq: AtomicU64::new(0),
                save_worker: Mutex::new(None),
            }
        })
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Restore the catalog from the persisted cache, or force a full
    /// blocking refresh when the cache is absent, corrupt, or incomplete.
    pub fn startup(self: &Arc<Self>) -> ShareResult<()> {
        let (cache_file, specs) = {
            let config = self.config.read().unwrap();
            (config.cache_file(), config.roots.clone())
        };

        let cached = match cache::load_share_cache(&cache_file) {
            Ok(roots) => roots,
            Err(e) => {
                warn!(error = %e, "share cache unusable, rescanning");
                Vec::new()
            }
        };

        let mut restored: HashSet<PathBuf> = HashSet::new();
        if !cached.is_empty() {
            let mut catalog = self.cs.write().unwrap();
            for c in cached {
                let Some(spec) = specs.iter().find(|s| s.path == c.real_path) else {
                    continue;
                };
                let mut root = RootShare::new(c.real_path.clone(), &spec.virtual_name, c.root_last_write);
                root.tree = c.tree;
                root.tree.set_root_name(&spec.virtual_name);
                root.excluded_hubs = spec.excluded_hubs.iter().cloned().collect();
                root.incoming = spec.incoming;
                restored.insert(c.real_path);
                catalog.insert_root(root);
            }
            catalog.rebuild_indices();
            self.rebuild_release_list(&catalog);
            self.generation.fetch_add(1, Ordering::SeqCst);
            info!(roots = restored.len(), files = catalog.shared_file_count(), "share cache loaded");
        }

        if specs.iter().any(|s| !restored.contains(&s.path)) {
            match self.refresh(REFRESH_ALL | REFRESH_BLOCKING) {
                RefreshKind::Started => {}
                other => warn!(?other, "startup refresh not run"),
            }
        } else {
            self.listings.set_dirty(true);
        }
        Ok(())
    }

    /// Stop background work and flush a dirty cache.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.hash_queue.shutdown();
        if let Some(worker) = self.save_worker.lock().unwrap().take() {
            let _ = worker.join();
        }
        if self.cache_dirty.load(Ordering::SeqCst) {
            if let Err(e) = self.save_cache_blocking() {
                warn!(error = %e, "cache flush failed at shutdown");
            }
        }
    }

    /// Subscribe to share events; the registration lives as long as the
    /// returned handle.
    pub fn subscribe(self: &Arc<Self>, listener: Arc<dyn ShareListener>) -> ShareSubscription {
        let id = self.listener_seq.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().unwrap().push((id, Arc::downgrade(&listener)));
        ShareSubscription { id, manager: Arc::downgrade(self), _listener: listener }
    }

    fn notify<F: Fn(&dyn ShareListener)>(&self, f: F) {
        let listeners: Vec<Arc<dyn ShareListener>> = {
            let mut guard = self.listeners.lock().unwrap();
            guard.retain(|(_, w)| w.strong_count() > 0);
            guard.iter().filter_map(|(_, w)| w.upgrade()).collect()
        };
        for listener in listeners {
            f(&*listener);
        }
    }

    /// Minute tick from the application timer: drives debounced cache saves
    /// and the periodic incoming-root refresh.
    pub fn minute_tick(self: &Arc<Self>, now: u64) {
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        if self.cache_dirty.load(Ordering::SeqCst)
            && now.saturating_sub(self.last_save.load(Ordering::SeqCst)) >= CACHE_SAVE_GUARD_SECS
        {
            self.save_cache();
        }
        let has_incoming = self.config.read().unwrap().roots.iter().any(|r| r.incoming);
        if has_incoming
            && now.saturating_sub(self.last_incoming_refresh.load(Ordering::SeqCst))
                >= INCOMING_REFRESH_SECS
        {
            self.last_incoming_refresh.store(now, Ordering::SeqCst);
            self.refresh(REFRESH_INCOMING | REFRESH_UPDATE);
        }
    }

    // -----------------------------------------------------------------------
    // Root administration
    // -----------------------------------------------------------------------

    /// Share `real_path` under `virtual_name`. The new root is visible
    /// immediately but empty until refreshed.
    pub fn add_directory(&self, real_path: &Path, virtual_name: &str) -> ShareResult<()> {
        let md = fs::metadata(real_path)
            .map_err(|_| ShareError::PathNotFound(real_path.to_path_buf()))?;
        if !md.is_dir() {
            return Err(ShareError::PathNotFound(real_path.to_path_buf()));
        }
        let virtual_name = resolve::validate_virtual(virtual_name);

        {
            let mut config = self.config.write().unwrap();
            if config.roots.iter().any(|r| r.path == real_path) {
                return Err(ShareError::DuplicateVirtualName(virtual_name));
            }
            config.roots.push(RootSpec {
                path: real_path.to_path_buf(),
                virtual_name: virtual_name.clone(),
                excluded_hubs: Vec::new(),
                incoming: false,
            });
        }
        {
            let mut catalog = self.cs.write().unwrap();
            catalog.insert_root(RootShare::new(
                real_path.to_path_buf(),
                &virtual_name,
                refresh::root_mtime(real_path).unwrap_or(0),
            ));
        }
        self.set_dirty(true);
        info!(path = %real_path.display(), name = virtual_name.as_str(), "root added");
        Ok(())
    }

    /// Stop sharing a root.
    pub fn remove_directory(&self, real_path: &Path) -> ShareResult<()> {
        {
            let mut config = self.config.write().unwrap();
            let before = config.roots.len();
            config.roots.retain(|r| r.path != real_path);
            if config.roots.len() == before {
                return Err(ShareError::PathNotFound(real_path.to_path_buf()));
            }
        }
        {
            let mut catalog = self.cs.write().unwrap();
            let key = Catalog::root_key_for(real_path);
            catalog.remove_root(&key);
            catalog.rebuild_indices();
            self.rebuild_release_list(&catalog);
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        self.set_dirty(true);
        info!(path = %real_path.display(), "root removed");
        Ok(())
    }

    /// Change a root's virtual name.
    pub fn rename_directory(&self, real_path: &Path, virtual_name: &str) -> ShareResult<()> {
        let virtual_name = resolve::validate_virtual(virtual_name);
        {
            let mut config = self.config.write().unwrap();
            let spec = config
                .roots
                .iter_mut()
                .find(|r| r.path == real_path)
                .ok_or_else(|| ShareError::PathNotFound(real_path.to_path_buf()))?;
            spec.virtual_name = virtual_name.clone();
        }
        {
            let mut catalog = self.cs.write().unwrap();
            let key = Catalog::root_key_for(real_path);
            if let Some(root) = catalog.roots.get_mut(&key) {
                root.virtual_name = virtual_name.clone();
                root.tree.set_root_name(&virtual_name);
            }
            catalog.rebuild_virtual_index();
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        self.set_dirty(true);
        Ok(())
    }

    /// Indexed size of the subtree at `path`, for exclusion accounting.
    /// Logs the not-found branches so an empty directory (a real 0) stays
    /// distinguishable from a path the catalog never resolved.
    fn indexed_subtree_size(&self, path: &Path) -> u64 {
        let catalog = self.cs.read().unwrap();
        let Some((_, root)) = catalog.root_for_real_path(path) else {
            warn!(path = %path.display(), "path is below no shared root");
            return 0;
        };
        let Ok(rel) = path.strip_prefix(&root.real_path) else { return 0 };
        let components: Vec<&str> = rel.iter().filter_map(|c| c.to_str()).collect();
        match root.tree.descend(DirTree::ROOT, &components) {
            Some(dir) => root.tree.node(dir).size,
            None => {
                warn!(path = %path.display(), "subtree is not in the catalog");
                0
            }
        }
    }

    /// Exclude a subtree from indexing. Returns the size that will be freed
    /// at the next refresh of the owning root.
    pub fn add_exclude_folder(&self, path: &Path) -> u64 {
        {
            let mut config = self.config.write().unwrap();
            if !config.excluded_paths.iter().any(|p| p == path) {
                config.excluded_paths.push(path.to_path_buf());
            }
        }
        self.indexed_subtree_size(path)
    }

    /// Remove an exclusion. Returns the size that becomes shared again:
    /// the subtree's indexed size while it is still in the catalog, 0 once
    /// a refresh has pruned it (the next refresh re-indexes it). A path
    /// that was never excluded restores nothing.
    pub fn remove_exclude_folder(&self, path: &Path) -> u64 {
        let removed = {
            let mut config = self.config.write().unwrap();
            let before = config.excluded_paths.len();
            config.excluded_paths.retain(|p| p != path);
            config.excluded_paths.len() != before
        };
        if !removed {
            return 0;
        }
        self.indexed_subtree_size(path)
    }

    pub fn set_incoming(&self, real_path: &Path, incoming: bool) -> ShareResult<()> {
        let mut config = self.config.write().unwrap();
        let spec = config
            .roots
            .iter_mut()
            .find(|r| r.path == real_path)
            .ok_or_else(|| ShareError::PathNotFound(real_path.to_path_buf()))?;
        spec.incoming = incoming;
        Ok(())
    }

    pub fn incoming(&self) -> Vec<PathBuf> {
        self.config
            .read()
            .unwrap()
            .roots
            .iter()
            .filter(|r| r.incoming)
            .map(|r| r.path.clone())
            .collect()
    }

    /// Configured roots as `(virtual name, real paths)` groups.
    pub fn grouped_directories(&self) -> Vec<(String, Vec<PathBuf>)> {
        self.cs.read().unwrap().grouped_directories()
    }

    // -----------------------------------------------------------------------
    // Refresh pipeline
    // -----------------------------------------------------------------------

    /// Kick a refresh. A second caller while one is in flight gets
    /// [`RefreshKind::InProgress`].
    pub fn refresh(self: &Arc<Self>, opts: u32) -> RefreshKind {
        self.refresh_selected(opts, Vec::new())
    }

    /// Refresh the root covering `dir`.
    pub fn refresh_path(self: &Arc<Self>, dir: &Path) -> RefreshKind {
        let root_path = {
            let config = self.config.read().unwrap();
            config.roots.iter().find(|r| dir.starts_with(&r.path)).map(|r| r.path.clone())
        };
        match root_path {
            Some(path) => self.refresh_selected(REFRESH_DIRECTORY | REFRESH_BLOCKING, vec![path]),
            None => RefreshKind::PathNotFound,
        }
    }

    fn refresh_selected(self: &Arc<Self>, opts: u32, paths: Vec<PathBuf>) -> RefreshKind {
        if self.refreshing.swap(true, Ordering::SeqCst) {
            return RefreshKind::InProgress;
        }

        let specs: Vec<RootSpec> = {
            let config = self.config.read().unwrap();
            config
                .roots
                .iter()
                .filter(|r| {
                    if opts & REFRESH_INCOMING != 0 {
                        r.incoming
                    } else if opts & REFRESH_DIRECTORY != 0 {
                        paths.iter().any(|p| p == &r.path)
                    } else {
                        true
                    }
                })
                .cloned()
                .collect()
        };
        if specs.is_empty() {
            self.refreshing.store(false, Ordering::SeqCst);
            return if opts & REFRESH_DIRECTORY != 0 {
                RefreshKind::PathNotFound
            } else {
                RefreshKind::Started
            };
        }

        if opts & REFRESH_BLOCKING != 0 {
            self.run_refresh(specs, opts);
        } else {
            let manager = Arc::clone(self);
            let spawned = thread::Builder::new()
                .name("share-refresh".into())
                .spawn(move || manager.run_refresh(specs, opts));
            if let Err(e) = spawned {
                warn!(error = %e, "refresh thread failed to start");
                self.refreshing.store(false, Ordering::SeqCst);
            }
        }
        RefreshKind::Started
    }

    /// Scan phase (lock-free), swap phase (exclusive lock), notify phase.
    fn run_refresh(&self, mut specs: Vec<RootSpec>, opts: u32) {
        let started = std::time::Instant::now();
        if self.shutting_down.load(Ordering::SeqCst) {
            self.refreshing.store(false, Ordering::SeqCst);
            return;
        }

        // UPDATE: drop roots whose directory mtime is unchanged since the
        // last scan and which are already in the catalog.
        if opts & REFRESH_UPDATE != 0 {
            let catalog = self.cs.read().unwrap();
            specs.retain(|spec| {
                let key = Catalog::root_key_for(&spec.path);
                match (catalog.roots.get(&key), refresh::root_mtime(&spec.path)) {
                    (Some(existing), Some(mtime)) => existing.root_last_write != mtime,
                    _ => true,
                }
            });
        }

        let excluded = self.config.read().unwrap().excluded_paths.clone();
        let keys: Vec<String> = specs.iter().map(|s| Catalog::root_key_for(&s.path)).collect();
        let prior: PriorMap = {
            let catalog = self.cs.read().unwrap();
            refresh::snapshot_prior(&catalog, &keys)
        };

        let outcomes: Vec<ScanOutcome> = specs
            .par_iter()
            .filter_map(|spec| match refresh::scan_root(spec, &excluded, &prior) {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    warn!(path = %spec.path.display(), error = %e, "root scan failed");
                    None
                }
            })
            .collect();

        let mut summary = RefreshSummary { roots: outcomes.len(), files: 0, reused: 0, pending: 0 };
        let mut to_hash: Vec<PathBuf> = Vec::new();

        if self.shutting_down.load(Ordering::SeqCst) {
            self.refreshing.store(false, Ordering::SeqCst);
            return;
        }
        {
            let mut catalog = self.cs.write().unwrap();
            if opts & REFRESH_ALL != 0 {
                // Config is the source of truth for the root set.
                let configured: HashSet<String> = self
                    .config
                    .read()
                    .unwrap()
                    .roots
                    .iter()
                    .map(|r| Catalog::root_key_for(&r.path))
                    .collect();
                let stale: Vec<String> =
                    catalog.roots.keys().filter(|k| !configured.contains(*k)).cloned().collect();
                for key in stale {
                    catalog.remove_root(&key);
                }
            }
            for outcome in outcomes {
                summary.files += outcome.files;
                summary.reused += outcome.reused;
                summary.pending += outcome.to_hash.len();
                to_hash.extend(outcome.to_hash);
                catalog.insert_root(outcome.root);
            }
            catalog.rebuild_indices();
            self.rebuild_release_list(&catalog);
            self.generation.fetch_add(1, Ordering::SeqCst);
        }

        self.listings.set_dirty(true);
        self.cache_dirty.store(true, Ordering::SeqCst);
        for path in to_hash {
            self.hash_queue.enqueue(path);
        }

        self.refreshing.store(false, Ordering::SeqCst);
        info!(
            roots = summary.roots,
            files = summary.files,
            reused = summary.reused,
            pending = summary.pending,
            time_ms = started.elapsed().as_millis() as u64,
            "refresh complete"
        );
        self.notify(|l| l.on_refresh_completed(&summary));
    }

    /// Rebuild the release-name list from a catalog the caller already
    /// holds locked. Tree lock before release lock, per the lock order.
    fn rebuild_release_list(&self, catalog: &Catalog) {
        let mut release = self.release.lock().unwrap();
        let names = catalog.collect_release_names(|name| release.matches(name));
        release.replace(names);
    }

    /// Hasher completion: install the TTH under a brief exclusive lock.
    pub(crate) fn on_file_hashed(&self, path: &Path, tth: Tth) {
        let installed = {
            let mut guard = self.cs.write().unwrap();
            let catalog = &mut *guard;
            let located = catalog.locate_by_real_path(path).map(|(k, f)| (k.clone(), f));
            match located {
                Some((key, fref)) => {
                    let root = catalog.roots.get_mut(&key).expect("located root exists");
                    let ok = root.tree.set_file_tth(&fref, tth);
                    if ok {
                        root.tth_index.entry(tth).or_default().push(fref.clone());
                        let name = root.tree.file(&fref).map(|f| f.name.clone());
                        if let Some(name) = name {
                            catalog.bloom.add_name(&name);
                        }
                    }
                    ok
                }
                None => false,
            }
        };
        if installed {
            self.listings.set_dirty(false);
            self.cache_dirty.store(true, Ordering::SeqCst);
            self.notify(|l| l.on_file_hashed(path, &tth));
        }
    }

    /// Queue-manager bundle completion: re-scan the owning root.
    pub fn on_bundle_hashed(self: &Arc<Self>, path: &Path) {
        let _ = self.refresh_path(path);
    }

    /// Block until every queued file has a TTH. Intended for blocking
    /// startup flows and tests.
    pub fn wait_for_hashing(&self) {
        self.hash_queue.wait_idle();
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------------
    // Search
    // -----------------------------------------------------------------------

    pub fn search(&self, query: &LegacyQuery, peer: &Peer) -> Vec<SearchResultItem> {
        let results = {
            let catalog = self.cs.read().unwrap();
            query.run(&catalog, peer)
        };
        self.add_hits(results.len() as u64);
        results
    }

    pub fn search_adc(
        &self,
        query: &AdcQuery,
        peer: &Peer,
        max_results: usize,
    ) -> Vec<SearchResultItem> {
        let results = {
            let catalog = self.cs.read().unwrap();
            query.run(&catalog, peer, max_results)
        };
        self.add_hits(results.len() as u64);
        results
    }

    /// Served-hit counter for UI telemetry.
    pub fn add_hits(&self, n: u64) {
        self.hits.fetch_add(n, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Export the TTH bloom at peer-negotiated parameters.
    pub fn encode_bloom(&self, k: usize, m: usize, h: usize) -> Vec<u8> {
        let catalog = self.cs.read().unwrap();
        let tths: Vec<&Tth> =
            catalog.roots.values().flat_map(|r| r.tth_index.keys()).collect();
        encode_tth_bloom(tths, k, m, h)
    }

    pub fn bloom_stats(&self) -> String {
        self.cs.read().unwrap().bloom.stats()
    }

    // -----------------------------------------------------------------------
    // Listings
    // -----------------------------------------------------------------------

    /// Full listing for `peer`'s hub (`None` = the default `All` list).
    pub fn generate_xml_list(&self, peer: Option<&Peer>, forced: bool) -> ShareResult<FileList> {
        let cid = self.config.read().unwrap().cid.clone();
        listing::generate_xml_list(
            &self.listings,
            &self.cs,
            &self.generation,
            self.hasher.as_ref(),
            &cid,
            peer,
            forced,
        )
    }

    /// Generate the local user's own list and return the artifact path.
    pub fn generate_own_list(&self, hub_url: &str) -> ShareResult<PathBuf> {
        let peer = (!hub_url.is_empty()).then(|| Peer::new("", hub_url));
        let fl = self.generate_xml_list(peer.as_ref(), true)?;
        fl.bz_path.ok_or_else(|| ShareError::NotShared("file list".into()))
    }

    /// XML fragment for a browsed virtual directory.
    pub fn generate_partial_list(
        &self,
        dir: &str,
        recurse: bool,
        peer: &Peer,
    ) -> ShareResult<Vec<u8>> {
        let cid = self.config.read().unwrap().cid.clone();
        let catalog = self.cs.read().unwrap();
        listing::generate_partial_list(&catalog, dir, recurse, peer, &cid)
    }

    /// Newline-delimited TTH list for a browsed virtual directory.
    pub fn generate_tth_list(
        &self,
        dir: &str,
        recurse: bool,
        peer: &Peer,
    ) -> ShareResult<Vec<u8>> {
        let catalog = self.cs.read().unwrap();
        listing::generate_tth_list(&catalog, dir, recurse, peer)
    }

    /// Mark every listing dirty; `force` bypasses the freshness guard.
    pub fn set_dirty(&self, force: bool) {
        self.listings.set_dirty(force);
        self.cache_dirty.store(true, Ordering::SeqCst);
    }

    /// Force one hub's listing to regenerate on next request.
    pub fn set_hub_list_dirty(&self, hub_url: &str) {
        self.listings.set_hub_dirty(hub_url);
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    pub fn to_virtual(&self, tth: &Tth, peer: &Peer) -> ShareResult<String> {
        resolve::to_virtual(&self.cs.read().unwrap(), tth, peer)
    }

    pub fn to_real(
        &self,
        virtual_file: &str,
        in_sharing_hub: bool,
        peer: &Peer,
        session_id: &str,
    ) -> ShareResult<PathBuf> {
        let catalog = self.cs.read().unwrap();
        resolve::to_real(&catalog, &self.temp, virtual_file, in_sharing_hub, peer, session_id)
    }

    pub fn to_real_with_size(
        &self,
        virtual_file: &str,
        in_sharing_hub: bool,
        peer: &Peer,
        session_id: &str,
    ) -> ShareResult<(PathBuf, u64)> {
        let catalog = self.cs.read().unwrap();
        resolve::to_real_with_size(
            &catalog,
            &self.temp,
            virtual_file,
            in_sharing_hub,
            peer,
            session_id,
        )
    }

    pub fn get_tth(&self, virtual_file: &str, peer: &Peer) -> ShareResult<Tth> {
        resolve::get_tth(&self.cs.read().unwrap(), virtual_file, peer)
    }

    pub fn get_real_path(&self, tth: &Tth) -> ShareResult<PathBuf> {
        resolve::get_real_path(&self.cs.read().unwrap(), tth)
    }

    pub fn get_real_paths(&self, virtual_path: &str, out: &mut Vec<PathBuf>) -> ShareResult<()> {
        resolve::get_real_paths(&self.cs.read().unwrap(), virtual_path, out)
    }

    /// `false` when no root's index holds the TTH, including on an empty
    /// catalog.
    pub fn is_tth_shared(&self, tth: &Tth) -> bool {
        self.cs.read().unwrap().is_tth_shared(tth)
    }

    pub fn is_file_shared(&self, tth: &Tth, name: &str) -> bool {
        resolve::is_file_shared(&self.cs.read().unwrap(), tth, name)
    }

    pub fn has_virtual(&self, virtual_name: &str) -> bool {
        self.cs.read().unwrap().has_virtual(virtual_name)
    }

    pub fn share_size(&self, peer: Option<&Peer>) -> u64 {
        self.cs.read().unwrap().share_size(peer)
    }

    /// Size of one root's subtree, by its real path.
    pub fn share_size_of_root(&self, real_path: &Path) -> Option<u64> {
        let catalog = self.cs.read().unwrap();
        catalog.roots.get(&Catalog::root_key_for(real_path)).map(|r| r.tree.total_size())
    }

    /// Real path of the first root directory matching a virtual directory
    /// path (`/Name/sub/`).
    pub fn get_dir_path(&self, virtual_dir: &str) -> ShareResult<PathBuf> {
        let mut out = Vec::new();
        self.get_real_paths(virtual_dir, &mut out)?;
        out.into_iter().next().ok_or_else(|| ShareError::NotShared(virtual_dir.to_string()))
    }

    pub fn shared_file_count(&self) -> usize {
        self.cs.read().unwrap().shared_file_count()
    }

    /// Is `name` a known release directory? O(log n) over the sorted list.
    pub fn is_release_shared(&self, name: &str) -> bool {
        self.release.lock().unwrap().contains(name)
    }

    // -----------------------------------------------------------------------
    // Temp shares
    // -----------------------------------------------------------------------

    /// Register an ad-hoc share. For NMDC flows (`adc_hub == false`) a TTH
    /// already in the main catalog needs no temp entry.
    pub fn add_temp_share(
        &self,
        key: &str,
        tth: Tth,
        path: &Path,
        size: u64,
        adc_hub: bool,
    ) -> bool {
        if !adc_hub && self.is_tth_shared(&tth) {
            return true;
        }
        self.temp.add(key, tth, path, size)
    }

    pub fn remove_temp_share(&self, key: &str, tth: &Tth) {
        self.temp.remove(key, tth);
    }

    pub fn has_temp_shares(&self) -> bool {
        !self.temp.is_empty()
    }

    pub fn temp_shares(&self) -> Vec<(Tth, TempShareInfo)> {
        self.temp.entries()
    }

    // -----------------------------------------------------------------------
    // Cache persistence
    // -----------------------------------------------------------------------

    /// Persist the share cache on the background worker. Joins any previous
    /// save first so at most one runs.
    pub fn save_cache(self: &Arc<Self>) {
        let mut slot = self.save_worker.lock().unwrap();
        if let Some(worker) = slot.take() {
            let _ = worker.join();
        }
        let manager = Arc::clone(self);
        let spawned = thread::Builder::new().name("share-cache".into()).spawn(move || {
            if let Err(e) = manager.save_cache_blocking() {
                warn!(error = %e, "share cache save failed");
            }
        });
        match spawned {
            Ok(handle) => *slot = Some(handle),
            Err(e) => warn!(error = %e, "cache worker failed to start"),
        }
    }

    /// Persist the share cache on the calling thread.
    pub fn save_cache_blocking(&self) -> ShareResult<()> {
        let path = self.config.read().unwrap().cache_file();
        {
            let catalog = self.cs.read().unwrap();
            cache::save_share_cache(catalog.roots.values(), &path)?;
        }
        self.cache_dirty.store(false, Ordering::SeqCst);
        self.last_save.store(unix_now(), Ordering::SeqCst);
        self.notify(|l| l.on_cache_saved());
        Ok(())
    }

    /// Snapshot of the current configuration.
    pub fn config_snapshot(&self) -> ShareConfig {
        self.config.read().unwrap().clone()
    }
}
