//! Resolution between virtual paths, content hashes, and on-disk paths, for
//! upload serving.
//!
//! Two path syntaxes arrive from peers: ADC-style virtual paths
//! (`/Virtual/sub/file`) and the TTH shorthand (`TTH/<39-char base32>`).
//! TTH-form lookups consult the temp-share table first (keyed by the
//! session id, the peer's CID, then the hub URL) and fall through to the
//! catalog. Per-hub exclusion is enforced on every catalog hit.

use crate::error::{ShareError, ShareResult};
use crate::index::{Catalog, RootShare};
use crate::tempshare::TempShareTable;
use crate::tree::{DirId, DirTree, FileNode};
use crate::types::{Peer, Tth};
use std::path::PathBuf;

/// Characters stripped from virtual names before they are exposed.
const ILLEGAL_VIRTUAL: &[char] = &['$', '|', ':', '<', '>', '"', '?', '*', '\\', '/'];

/// Sanitize a requested virtual name. Falls back to `"Share"` when nothing
/// survives.
pub fn validate_virtual(name: &str) -> String {
    let cleaned: String = name.chars().filter(|c| !ILLEGAL_VIRTUAL.contains(c)).collect();
    let cleaned = cleaned.trim().to_string();
    if cleaned.is_empty() {
        "Share".to_string()
    } else {
        cleaned
    }
}

// ---------------------------------------------------------------------------
// Virtual path parsing
// ---------------------------------------------------------------------------

fn split_virtual_file(path: &str) -> ShareResult<Vec<&str>> {
    if !path.starts_with('/') || path.ends_with('/') {
        return Err(ShareError::InvalidPath(path.to_string()));
    }
    let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    if components.len() < 2 {
        return Err(ShareError::InvalidPath(path.to_string()));
    }
    Ok(components)
}

/// Locate a file by virtual path. Resolution failures distinguish "nothing
/// there" (`NotShared`) from "there, but this hub may not see it"
/// (`ExcludedByHub`).
pub fn find_virtual_file<'a>(
    catalog: &'a Catalog,
    virtual_file: &str,
    peer: &Peer,
) -> ShareResult<(&'a RootShare, DirId, &'a FileNode)> {
    let components = split_virtual_file(virtual_file)?;
    let (file_name, dir_parts) = components.split_last().expect("len >= 2");

    let mut excluded_hit = false;
    for root in catalog.roots_by_virtual(components[0]) {
        let Some(dir) = root.tree.descend(DirTree::ROOT, &dir_parts[1..]) else {
            continue;
        };
        let Some(file) = root.tree.find_file(dir, file_name) else {
            continue;
        };
        if root.is_hub_excluded(peer) {
            excluded_hit = true;
            continue;
        }
        return Ok((root, dir, file));
    }
    if excluded_hit {
        Err(ShareError::ExcludedByHub(peer.hub_url.clone()))
    } else {
        Err(ShareError::NotShared(virtual_file.to_string()))
    }
}

// ---------------------------------------------------------------------------
// TTH → virtual / real
// ---------------------------------------------------------------------------

/// Virtual path of any file with this TTH that `peer` may see.
pub fn to_virtual(catalog: &Catalog, tth: &Tth, peer: &Peer) -> ShareResult<String> {
    for (_, root, fref) in catalog.find_by_tth(tth) {
        if root.is_hub_excluded(peer) {
            continue;
        }
        if let Some(file) = root.tree.file(fref) {
            return Ok(root.tree.file_adc_path(fref.dir, file));
        }
    }
    Err(ShareError::NotShared(tth.to_base32()))
}

/// On-disk path of any file with this TTH, hub checks skipped (local use).
pub fn get_real_path(catalog: &Catalog, tth: &Tth) -> ShareResult<PathBuf> {
    for (_, root, fref) in catalog.find_by_tth(tth) {
        if let Some(path) = root.real_file_path(fref) {
            return Ok(path);
        }
    }
    Err(ShareError::NotShared(tth.to_base32()))
}

// ---------------------------------------------------------------------------
// Virtual → real
// ---------------------------------------------------------------------------

/// Resolve an upload request to `(real path, size)` in a single probe.
///
/// `session_id` is the transport session key (CID for NMDC); temp shares
/// registered under it, the peer's CID, or the hub URL win over the catalog.
pub fn to_real_with_size(
    catalog: &Catalog,
    temp: &TempShareTable,
    virtual_file: &str,
    in_sharing_hub: bool,
    peer: &Peer,
    session_id: &str,
) -> ShareResult<(PathBuf, u64)> {
    if let Some(rest) = virtual_file.strip_prefix("TTH/") {
        let tth: Tth = rest.parse()?;

        for key in [session_id, peer.cid.as_str(), peer.hub_url.as_str()] {
            if key.is_empty() {
                continue;
            }
            if let Some(entry) = temp.find(key, &tth) {
                return Ok((entry.path, entry.size));
            }
        }
        if !in_sharing_hub {
            return Err(ShareError::NotShared(virtual_file.to_string()));
        }

        let mut excluded_hit = false;
        for (_, root, fref) in catalog.find_by_tth(&tth) {
            if root.is_hub_excluded(peer) {
                excluded_hit = true;
                continue;
            }
            if let (Some(path), Some(file)) = (root.real_file_path(fref), root.tree.file(fref)) {
                return Ok((path, file.size));
            }
        }
        return if excluded_hit {
            Err(ShareError::ExcludedByHub(peer.hub_url.clone()))
        } else {
            Err(ShareError::NotShared(virtual_file.to_string()))
        };
    }

    if !in_sharing_hub {
        return Err(ShareError::NoAccess);
    }
    let (root, dir, file) = find_virtual_file(catalog, virtual_file, peer)?;
    let mut path = root.real_path.clone();
    for part in root.tree.rel_components(dir) {
        path.push(part);
    }
    path.push(&file.name);
    if file.tth.is_none() {
        return Err(ShareError::HashInProgress(path));
    }
    Ok((path, file.size))
}

/// [`to_real_with_size`] without the size.
pub fn to_real(
    catalog: &Catalog,
    temp: &TempShareTable,
    virtual_file: &str,
    in_sharing_hub: bool,
    peer: &Peer,
    session_id: &str,
) -> ShareResult<PathBuf> {
    to_real_with_size(catalog, temp, virtual_file, in_sharing_hub, peer, session_id)
        .map(|(path, _)| path)
}

/// TTH of a virtual file. Pending files report `HashInProgress` rather than
/// blocking on the hasher.
pub fn get_tth(catalog: &Catalog, virtual_file: &str, peer: &Peer) -> ShareResult<Tth> {
    if let Some(rest) = virtual_file.strip_prefix("TTH/") {
        let tth: Tth = rest.parse()?;
        return if catalog.is_tth_shared(&tth) {
            Ok(tth)
        } else {
            Err(ShareError::NotShared(virtual_file.to_string()))
        };
    }
    let (root, dir, file) = find_virtual_file(catalog, virtual_file, peer)?;
    file.tth.ok_or_else(|| {
        let mut path = root.real_path.clone();
        for part in root.tree.rel_components(dir) {
            path.push(part);
        }
        path.push(&file.name);
        ShareError::HashInProgress(path)
    })
}

/// Every on-disk path a virtual path maps to. A trailing `/` resolves
/// directories (one hit per aliased root); otherwise files.
pub fn get_real_paths(catalog: &Catalog, virtual_path: &str, out: &mut Vec<PathBuf>) -> ShareResult<()> {
    if virtual_path.ends_with('/') {
        let components: Vec<&str> =
            virtual_path.split('/').filter(|c| !c.is_empty()).collect();
        if components.is_empty() || !virtual_path.starts_with('/') {
            return Err(ShareError::InvalidPath(virtual_path.to_string()));
        }
        for root in catalog.roots_by_virtual(components[0]) {
            if let Some(dir) = root.tree.descend(DirTree::ROOT, &components[1..]) {
                let mut path = root.real_path.clone();
                for part in root.tree.rel_components(dir) {
                    path.push(part);
                }
                out.push(path);
            }
        }
    } else {
        let components = split_virtual_file(virtual_path)?;
        let (file_name, dir_parts) = components.split_last().expect("len >= 2");
        for root in catalog.roots_by_virtual(components[0]) {
            let Some(dir) = root.tree.descend(DirTree::ROOT, &dir_parts[1..]) else {
                continue;
            };
            if let Some(file) = root.tree.find_file(dir, file_name) {
                let mut path = root.real_path.clone();
                for part in root.tree.rel_components(dir) {
                    path.push(part);
                }
                path.push(&file.name);
                out.push(path);
            }
        }
    }
    if out.is_empty() {
        return Err(ShareError::NotShared(virtual_path.to_string()));
    }
    Ok(())
}

/// Is any file with this TTH shared under a name matching `name`?
pub fn is_file_shared(catalog: &Catalog, tth: &Tth, name: &str) -> bool {
    catalog.find_by_tth(tth).iter().any(|(_, root, fref)| {
        root.tree.file(fref).is_some_and(|f| f.name.eq_ignore_ascii_case(name))
    })
}
