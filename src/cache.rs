//! Persisted share cache: the catalog serialized to XML so startup can skip
//! a full rescan.
//!
//! Format: a `<Share>` document holding each root with its virtual name and
//! real path, then the nested directory tree with per-file name, size, TTH,
//! and last-write stamp. Pending (unhashed) files are not persisted; the
//! next refresh rediscovers and queues them. The file is written to a
//! sibling temp name and renamed into place, so a crash mid-save leaves the
//! previous cache intact.

use crate::error::{ShareError, ShareResult};
use crate::index::RootShare;
use crate::tree::{DirId, DirTree};
use crate::types::Tth;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::fs;
use std::io::{BufReader, BufWriter, Write as _};
use std::path::{Path, PathBuf};
use tracing::warn;

// ---------------------------------------------------------------------------
// Save
// ---------------------------------------------------------------------------

fn write_dir(
    writer: &mut Writer<&mut Vec<u8>>,
    tree: &DirTree,
    dir: DirId,
) -> std::io::Result<()> {
    let node = tree.node(dir);
    // The root node is represented by the enclosing <Root> element.
    if node.parent.is_some() {
        let mut elem = BytesStart::new("Directory");
        elem.push_attribute(("Name", node.name.as_str()));
        elem.push_attribute(("LastWrite", node.last_write.to_string().as_str()));
        writer.write_event(Event::Start(elem))?;
    }

    let children: Vec<DirId> = node.children().map(|(_, id)| id).collect();
    for child in children {
        write_dir(writer, tree, child)?;
    }
    for (_, file) in node.files() {
        let Some(tth) = file.tth else { continue };
        let mut elem = BytesStart::new("File");
        elem.push_attribute(("Name", file.name.as_str()));
        elem.push_attribute(("Size", file.size.to_string().as_str()));
        elem.push_attribute(("TTH", tth.to_base32().as_str()));
        elem.push_attribute(("LastWrite", file.last_write.to_string().as_str()));
        writer.write_event(Event::Empty(elem))?;
    }

    if node.parent.is_some() {
        writer.write_event(Event::End(BytesEnd::new("Directory")))?;
    }
    Ok(())
}

/// Serialize every root to the cache file at `path`.
pub fn save_share_cache<'a, I>(roots: I, path: &Path) -> ShareResult<()>
where
    I: IntoIterator<Item = &'a RootShare>,
{
    let mut buf = Vec::new();
    let mut writer = Writer::new_with_indent(&mut buf, b'\t', 1);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), Some("yes"))))?;

    let mut share = BytesStart::new("Share");
    share.push_attribute(("Version", "1"));
    writer.write_event(Event::Start(share))?;

    for root in roots {
        let mut elem = BytesStart::new("Root");
        elem.push_attribute(("Virtual", root.virtual_name.as_str()));
        elem.push_attribute(("Path", root.real_path.to_string_lossy().as_ref()));
        elem.push_attribute(("LastWrite", root.root_last_write.to_string().as_str()));
        writer.write_event(Event::Start(elem))?;
        write_dir(&mut writer, &root.tree, DirTree::ROOT)?;
        writer.write_event(Event::End(BytesEnd::new("Root")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("Share")))?;

    let tmp = path.with_extension("xml.tmp");
    {
        let mut out = BufWriter::new(fs::File::create(&tmp)?);
        out.write_all(&buf)?;
        out.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// A root restored from the cache, before config policy (excluded hubs,
/// incoming flag) is reapplied.
pub struct CachedRoot {
    pub real_path: PathBuf,
    pub virtual_name: String,
    pub root_last_write: u64,
    pub tree: DirTree,
}

fn attr(elem: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    elem.attributes()
        .filter_map(|a| a.ok())
        .find(|a| a.key.as_ref() == name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn attr_u64(elem: &BytesStart<'_>, name: &[u8]) -> u64 {
    attr(elem, name).and_then(|v| v.parse().ok()).unwrap_or(0)
}

/// Parse the cache file. A missing file is `Ok(vec![])`; anything
/// structurally broken is [`ShareError::Corrupt`], which callers treat as
/// "no cache" and answer with a full refresh.
pub fn load_share_cache(path: &Path) -> ShareResult<Vec<CachedRoot>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = Reader::from_reader(BufReader::new(fs::File::open(path)?));
    reader.config_mut().trim_text(true);

    let mut roots: Vec<CachedRoot> = Vec::new();
    let mut current: Option<CachedRoot> = None;
    let mut stack: Vec<DirId> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(elem)) => match elem.name().as_ref() {
                b"Root" => {
                    let virtual_name =
                        attr(&elem, b"Virtual").ok_or_else(|| corrupt_str("Root w/o Virtual"))?;
                    let real_path =
                        attr(&elem, b"Path").ok_or_else(|| corrupt_str("Root w/o Path"))?;
                    let last_write = attr_u64(&elem, b"LastWrite");
                    current = Some(CachedRoot {
                        real_path: PathBuf::from(real_path),
                        root_last_write: last_write,
                        tree: DirTree::new(&virtual_name, last_write),
                        virtual_name,
                    });
                    stack = vec![DirTree::ROOT];
                }
                b"Directory" => {
                    if let (Some(root), Some(&parent)) = (current.as_mut(), stack.last()) {
                        let name = attr(&elem, b"Name").unwrap_or_default();
                        let lw = attr_u64(&elem, b"LastWrite");
                        match root.tree.insert_dir(parent, &name, lw) {
                            Ok(id) => stack.push(id),
                            Err(e) => {
                                warn!(name = name.as_str(), error = %e, "skipping cached dir");
                                stack.push(parent); // keep depth consistent
                            }
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(elem)) => {
                if elem.name().as_ref() == b"File" {
                    if let (Some(root), Some(&parent)) = (current.as_mut(), stack.last()) {
                        let name = attr(&elem, b"Name").unwrap_or_default();
                        let size = attr_u64(&elem, b"Size");
                        let lw = attr_u64(&elem, b"LastWrite");
                        let tth = attr(&elem, b"TTH").and_then(|t| t.parse::<Tth>().ok());
                        if tth.is_none() {
                            continue;
                        }
                        if let Err(e) = root.tree.insert_file(parent, &name, size, lw, tth) {
                            warn!(name = name.as_str(), error = %e, "skipping cached file");
                        }
                    }
                }
            }
            Ok(Event::End(elem)) => match elem.name().as_ref() {
                b"Directory" => {
                    stack.pop();
                }
                b"Root" => {
                    if let Some(root) = current.take() {
                        roots.push(root);
                    }
                    stack.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(ShareError::Corrupt(e.to_string())),
        }
        buf.clear();
    }
    Ok(roots)
}

fn corrupt_str(msg: &str) -> ShareError {
    ShareError::Corrupt(msg.to_string())
}
