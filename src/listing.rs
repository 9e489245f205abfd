//! Per-hub XML file listings: the cached full list (`files.xml.bz2`), the
//! on-the-fly partial lists peers browse with, and the TTH list variant.
//!
//! One `FileList` record exists per stripped hub URL (`""` is the default
//! `All` list). Full-list generation streams the XML through a bz2 encoder
//! while holding the shared tree lock, writes the artifact under a fresh
//! generation-numbered name, then swaps the record and removes the
//! predecessor. Requesters for the same hub serialize on the record's
//! mutex; a catalog swap landing between build and publish restarts the
//! build.

use crate::error::{ShareError, ShareResult};
use crate::hasher::Hasher;
use crate::index::{Catalog, RootShare};
use crate::tree::{DirId, DirTree};
use crate::types::{strip_hub_url, unix_now, Peer, Tth, LIST_GENERATOR, XML_LIST_GUARD_SECS};
use bzip2::write::BzEncoder;
use bzip2::Compression;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::Writer;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// File list records
// ---------------------------------------------------------------------------

/// State of one hub's cached listing.
#[derive(Clone, Debug)]
pub struct FileList {
    /// Stripped hub URL; empty for the default `All` list.
    pub name: String,
    /// Monotonic generation of the on-disk artifact.
    pub list_n: u64,
    pub xml_len: u64,
    pub xml_tth: Option<Tth>,
    pub bz_len: u64,
    pub bz_tth: Option<Tth>,
    /// Current bz2 artifact, if one has been generated.
    pub bz_path: Option<PathBuf>,
    pub last_update: u64,
    pub xml_dirty: bool,
    /// Bypass the freshness guard at the next generation.
    pub force_refresh: bool,
}

impl FileList {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            list_n: 0,
            xml_len: 0,
            xml_tth: None,
            bz_len: 0,
            bz_tth: None,
            bz_path: None,
            last_update: 0,
            xml_dirty: true,
            force_refresh: true,
        }
    }
}

/// Registry of per-hub listing records plus the artifact directory.
pub struct ListingRegistry {
    out_dir: PathBuf,
    lists: Mutex<HashMap<String, Arc<Mutex<FileList>>>>,
}

impl ListingRegistry {
    pub fn new(out_dir: PathBuf) -> Self {
        Self { out_dir, lists: Mutex::new(HashMap::new()) }
    }

    fn slot(&self, key: &str) -> Arc<Mutex<FileList>> {
        let mut lists = self.lists.lock().unwrap();
        Arc::clone(
            lists.entry(key.to_string()).or_insert_with(|| {
                Arc::new(Mutex::new(FileList::new(key)))
            }),
        )
    }

    /// Mark every known list dirty; `force` also bypasses the freshness
    /// guard at the next request.
    pub fn set_dirty(&self, force: bool) {
        let lists = self.lists.lock().unwrap();
        for slot in lists.values() {
            let mut fl = slot.lock().unwrap();
            fl.xml_dirty = true;
            if force {
                fl.force_refresh = true;
            }
        }
    }

    /// Force one hub's list to regenerate on next request.
    pub fn set_hub_dirty(&self, hub_url: &str) {
        let key = strip_hub_url(hub_url);
        let lists = self.lists.lock().unwrap();
        if let Some(slot) = lists.get(&key) {
            slot.lock().unwrap().force_refresh = true;
        }
    }
}

// ---------------------------------------------------------------------------
// Full list generation
// ---------------------------------------------------------------------------

/// Generate (or return the cached) full listing for `peer`'s hub.
///
/// `generation` is the catalog swap counter: a bump between building and
/// publishing restarts the build so a listing never mixes catalog states.
pub fn generate_xml_list(
    registry: &ListingRegistry,
    cs: &RwLock<Catalog>,
    generation: &AtomicU64,
    hasher: &dyn Hasher,
    cid: &str,
    peer: Option<&Peer>,
    forced: bool,
) -> ShareResult<FileList> {
    let key = peer.map(|p| strip_hub_url(&p.hub_url)).unwrap_or_default();
    let slot = registry.slot(&key);
    let mut fl = slot.lock().unwrap();

    let now = unix_now();
    let fresh = now.saturating_sub(fl.last_update) < XML_LIST_GUARD_SECS;
    if !fl.xml_dirty && !fl.force_refresh && !forced && fresh && fl.bz_path.is_some() {
        return Ok(fl.clone());
    }

    let xml = loop {
        let gen_before = generation.load(Ordering::SeqCst);
        let xml = {
            let catalog = cs.read().unwrap();
            write_full_xml(&catalog, peer, cid)?
        };
        if generation.load(Ordering::SeqCst) == gen_before {
            break xml;
        }
        debug!(list = key.as_str(), "catalog swapped during generation, restarting");
    };

    let mut encoder = BzEncoder::new(Vec::new(), Compression::best());
    io::Write::write_all(&mut encoder, &xml)?;
    let bz = encoder.finish()?;

    let list_n = fl.list_n + 1;
    let stem = if key.is_empty() { "all".to_string() } else { key.clone() };
    let path = registry.out_dir.join(format!("files_{stem}_{list_n}.xml.bz2"));
    fs::write(&path, &bz)?;

    let old = fl.bz_path.take();
    fl.list_n = list_n;
    fl.xml_len = xml.len() as u64;
    fl.xml_tth = Some(hasher.digest_bytes(&xml));
    fl.bz_len = bz.len() as u64;
    fl.bz_tth = Some(hasher.digest_bytes(&bz));
    fl.bz_path = Some(path);
    fl.last_update = now;
    fl.xml_dirty = false;
    fl.force_refresh = false;

    // Predecessor artifact is only unlinked after the record swap.
    if let Some(old) = old {
        let _ = fs::remove_file(old);
    }

    info!(list = key.as_str(), generation = list_n, bytes = fl.bz_len, "file list generated");
    Ok(fl.clone())
}

fn write_full_xml(catalog: &Catalog, peer: Option<&Peer>, cid: &str) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut writer = Writer::new(&mut buf);
    write_listing_open(&mut writer, cid, "/")?;

    for (_, roots) in visible_virtual_groups(catalog, peer) {
        let name = roots[0].tree.node(DirTree::ROOT).name.clone();
        let mut elem = BytesStart::new("Directory");
        elem.push_attribute(("Name", name.as_str()));
        writer.write_event(Event::Start(elem))?;
        for root in roots {
            write_dir_contents(&mut writer, &root.tree, DirTree::ROOT, true)?;
        }
        writer.write_event(Event::End(BytesEnd::new("Directory")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("FileListing")))?;
    Ok(buf)
}

/// Roots grouped by case-folded virtual name, hub-excluded roots dropped.
fn visible_virtual_groups<'a>(
    catalog: &'a Catalog,
    peer: Option<&Peer>,
) -> BTreeMap<String, Vec<&'a RootShare>> {
    let mut groups: BTreeMap<String, Vec<&RootShare>> = BTreeMap::new();
    for root in catalog.roots.values() {
        if peer.is_some_and(|p| root.is_hub_excluded(p)) {
            continue;
        }
        groups.entry(root.virtual_name.to_lowercase()).or_default().push(root);
    }
    groups
}

fn write_listing_open(writer: &mut Writer<&mut Vec<u8>>, cid: &str, base: &str) -> io::Result<()> {
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), Some("yes"))))?;
    let mut open = BytesStart::new("FileListing");
    open.push_attribute(("Version", "1"));
    open.push_attribute(("CID", cid));
    open.push_attribute(("Base", base));
    open.push_attribute(("Generator", LIST_GENERATOR));
    writer.write_event(Event::Start(open))
}

/// Write the children of `dir`. `recurse` descends fully; otherwise child
/// directories appear as incomplete stubs for the peer to browse into.
fn write_dir_contents(
    writer: &mut Writer<&mut Vec<u8>>,
    tree: &DirTree,
    dir: DirId,
    recurse: bool,
) -> io::Result<()> {
    let node = tree.node(dir);
    let children: Vec<DirId> = node.children().map(|(_, id)| id).collect();
    for child in children {
        let child_node = tree.node(child);
        let mut elem = BytesStart::new("Directory");
        elem.push_attribute(("Name", child_node.name.as_str()));
        if recurse {
            writer.write_event(Event::Start(elem))?;
            write_dir_contents(writer, tree, child, true)?;
            writer.write_event(Event::End(BytesEnd::new("Directory")))?;
        } else {
            elem.push_attribute(("Incomplete", "1"));
            elem.push_attribute(("Size", child_node.size.to_string().as_str()));
            writer.write_event(Event::Empty(elem))?;
        }
    }
    for (_, file) in node.files() {
        let Some(tth) = file.tth else { continue };
        let mut elem = BytesStart::new("File");
        elem.push_attribute(("Name", file.name.as_str()));
        elem.push_attribute(("Size", file.size.to_string().as_str()));
        elem.push_attribute(("TTH", tth.to_base32().as_str()));
        writer.write_event(Event::Empty(elem))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Partial and TTH lists
// ---------------------------------------------------------------------------

/// Split `/Name/sub/…/` into components; empty vec for the virtual root.
fn split_virtual_dir(dir: &str) -> ShareResult<Vec<&str>> {
    if !dir.starts_with('/') || !dir.ends_with('/') {
        return Err(ShareError::InvalidPath(dir.to_string()));
    }
    Ok(dir.split('/').filter(|c| !c.is_empty()).collect())
}

/// Directories across all aliased roots matching a virtual directory path.
fn resolve_virtual_dirs<'a>(
    catalog: &'a Catalog,
    components: &[&str],
    peer: &Peer,
) -> Vec<(&'a RootShare, DirId)> {
    let mut out = Vec::new();
    for root in catalog.roots_by_virtual(components[0]) {
        if root.is_hub_excluded(peer) {
            continue;
        }
        if let Some(dir) = root.tree.descend(DirTree::ROOT, &components[1..]) {
            out.push((root, dir));
        }
    }
    out
}

/// Produce an on-the-fly XML fragment rooted at a virtual directory. Aliased
/// roots merge under one `<Directory>` element.
pub fn generate_partial_list(
    catalog: &Catalog,
    dir: &str,
    recurse: bool,
    peer: &Peer,
    cid: &str,
) -> ShareResult<Vec<u8>> {
    let components = split_virtual_dir(dir)?;

    let mut buf = Vec::new();
    let mut writer = Writer::new(&mut buf);
    write_listing_open(&mut writer, cid, dir)?;

    if components.is_empty() {
        for (_, roots) in visible_virtual_groups(catalog, Some(peer)) {
            let name = roots[0].tree.node(DirTree::ROOT).name.clone();
            let mut elem = BytesStart::new("Directory");
            elem.push_attribute(("Name", name.as_str()));
            if recurse {
                writer.write_event(Event::Start(elem))?;
                for root in roots {
                    write_dir_contents(&mut writer, &root.tree, DirTree::ROOT, true)?;
                }
                writer.write_event(Event::End(BytesEnd::new("Directory")))?;
            } else {
                elem.push_attribute(("Incomplete", "1"));
                let size: u64 = roots.iter().map(|r| r.tree.total_size()).sum();
                elem.push_attribute(("Size", size.to_string().as_str()));
                writer.write_event(Event::Empty(elem))?;
            }
        }
    } else {
        let matched = resolve_virtual_dirs(catalog, &components, peer);
        if matched.is_empty() {
            return Err(ShareError::NotShared(dir.to_string()));
        }
        let name = matched[0].0.tree.node(matched[0].1).name.clone();
        let mut elem = BytesStart::new("Directory");
        elem.push_attribute(("Name", name.as_str()));
        writer.write_event(Event::Start(elem))?;
        for (root, id) in matched {
            write_dir_contents(&mut writer, &root.tree, id, recurse)?;
        }
        writer.write_event(Event::End(BytesEnd::new("Directory")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("FileListing")))?;
    Ok(buf)
}

/// Newline-delimited TTH listing for a virtual directory subtree.
pub fn generate_tth_list(
    catalog: &Catalog,
    dir: &str,
    recurse: bool,
    peer: &Peer,
) -> ShareResult<Vec<u8>> {
    let components = split_virtual_dir(dir)?;
    if components.is_empty() {
        return Err(ShareError::InvalidPath(dir.to_string()));
    }
    let matched = resolve_virtual_dirs(catalog, &components, peer);
    if matched.is_empty() {
        return Err(ShareError::NotShared(dir.to_string()));
    }

    let mut out = Vec::new();
    for (root, id) in matched {
        if recurse {
            root.tree.walk_files(id, &mut |_, _, file| {
                if let Some(tth) = file.tth {
                    out.extend_from_slice(tth.to_base32().as_bytes());
                    out.push(b'\n');
                }
            });
        } else {
            for (_, file) in root.tree.node(id).files() {
                if let Some(tth) = file.tth {
                    out.extend_from_slice(tth.to_base32().as_bytes());
                    out.push(b'\n');
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn tth(b: u8) -> Tth {
        Tth([b; 24])
    }

    fn aliased_catalog() -> Catalog {
        let mut a = RootShare::new(PathBuf::from("/a"), "Media", 0);
        a.tree.insert_file(DirTree::ROOT, "X.avi", 10, 0, Some(tth(1))).unwrap();
        let mut b = RootShare::new(PathBuf::from("/b"), "Media", 0);
        b.tree.insert_file(DirTree::ROOT, "Y.mkv", 20, 0, Some(tth(2))).unwrap();
        let mut catalog = Catalog::default();
        catalog.insert_root(a);
        catalog.insert_root(b);
        catalog.rebuild_indices();
        catalog
    }

    #[test]
    fn partial_list_merges_aliased_roots() {
        let catalog = aliased_catalog();
        let xml = generate_partial_list(&catalog, "/Media/", false, &Peer::default(), "CID")
            .unwrap();
        let text = String::from_utf8(xml).unwrap();
        assert_eq!(text.matches("<Directory Name=\"Media\">").count(), 1);
        assert!(text.contains("X.avi"));
        assert!(text.contains("Y.mkv"));
        assert!(text.contains("Base=\"/Media/\""));
    }

    #[test]
    fn partial_list_unknown_dir_fails() {
        let catalog = aliased_catalog();
        let err = generate_partial_list(&catalog, "/Nope/", false, &Peer::default(), "CID");
        assert!(matches!(err, Err(ShareError::NotShared(_))));
        let err = generate_partial_list(&catalog, "Media", false, &Peer::default(), "CID");
        assert!(matches!(err, Err(ShareError::InvalidPath(_))));
    }

    #[test]
    fn tth_list_is_newline_delimited() {
        let catalog = aliased_catalog();
        let bytes = generate_tth_list(&catalog, "/Media/", true, &Peer::default()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines.contains(&tth(1).to_base32().as_str()));
    }

    #[test]
    fn pending_files_stay_out_of_listings() {
        let mut root = RootShare::new(PathBuf::from("/m"), "M", 0);
        root.tree.insert_file(DirTree::ROOT, "done.mp3", 5, 0, Some(tth(1))).unwrap();
        root.tree.insert_file(DirTree::ROOT, "queued.mp3", 5, 0, None).unwrap();
        let mut catalog = Catalog::default();
        catalog.insert_root(root);
        catalog.rebuild_indices();
        let xml =
            generate_partial_list(&catalog, "/M/", true, &Peer::default(), "CID").unwrap();
        let text = String::from_utf8(xml).unwrap();
        assert!(text.contains("done.mp3"));
        assert!(!text.contains("queued.mp3"));
    }

    struct XorHasher;
    impl Hasher for XorHasher {
        fn digest_file(&self, _: &Path) -> io::Result<Tth> {
            Ok(Tth([0; 24]))
        }
        fn digest_bytes(&self, bytes: &[u8]) -> Tth {
            let mut out = [0u8; 24];
            for (i, b) in bytes.iter().enumerate() {
                out[i % 24] ^= *b;
            }
            Tth(out)
        }
    }

    #[test]
    fn full_list_caches_until_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ListingRegistry::new(dir.path().to_path_buf());
        let cs = RwLock::new(aliased_catalog());
        let generation = AtomicU64::new(1);

        let first =
            generate_xml_list(&registry, &cs, &generation, &XorHasher, "CID", None, false)
                .unwrap();
        assert_eq!(first.list_n, 1);
        assert!(first.bz_path.as_ref().unwrap().exists());
        assert!(first.bz_tth.is_some());

        // Clean and inside the guard window: same artifact back.
        let second =
            generate_xml_list(&registry, &cs, &generation, &XorHasher, "CID", None, false)
                .unwrap();
        assert_eq!(second.list_n, 1);

        // Forced: new generation, old artifact removed.
        let third =
            generate_xml_list(&registry, &cs, &generation, &XorHasher, "CID", None, true)
                .unwrap();
        assert_eq!(third.list_n, 2);
        assert!(!first.bz_path.unwrap().exists());
        assert!(third.bz_path.unwrap().exists());
    }

    #[test]
    fn hub_excluded_roots_missing_from_hub_list() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ListingRegistry::new(dir.path().to_path_buf());
        let mut catalog = aliased_catalog();
        catalog.roots.get_mut("/a").unwrap().excluded_hubs.insert("adc://secret".into());
        let cs = RwLock::new(catalog);
        let generation = AtomicU64::new(1);

        let peer = Peer::new("cid", "adc://secret");
        let fl = generate_xml_list(
            &registry, &cs, &generation, &XorHasher, "CID", Some(&peer), true,
        )
        .unwrap();
        let bz = fs::read(fl.bz_path.unwrap()).unwrap();
        let mut decoder = bzip2::read::BzDecoder::new(&bz[..]);
        let mut xml = String::new();
        io::Read::read_to_string(&mut decoder, &mut xml).unwrap();
        assert!(!xml.contains("X.avi"));
        assert!(xml.contains("Y.mkv"));
    }
}
