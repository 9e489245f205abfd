//! Ad-hoc one-off shares: TTH → on-disk path entries scoped to a single
//! peer (CID) or hub URL, bypassing the main catalog.
//!
//! The table lives in its own lock domain so temp-share traffic never
//! touches the tree lock; the resolver consults it first for TTH-form
//! lookups and falls through to the catalog on miss.

use crate::types::Tth;
use dashmap::DashMap;
use std::path::{Path, PathBuf};

/// One temp-share entry. `key` is a peer CID (NMDC flows) or a hub URL
/// (ADC flows).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TempShareInfo {
    pub key: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Multimap from TTH to temp-share entries.
#[derive(Default)]
pub struct TempShareTable {
    map: DashMap<Tth, Vec<TempShareInfo>>,
}

impl TempShareTable {
    /// Register an entry. Returns `false` when the same `(key, tth)` pair
    /// is already present.
    pub fn add(&self, key: &str, tth: Tth, path: &Path, size: u64) -> bool {
        let mut entries = self.map.entry(tth).or_default();
        if entries.iter().any(|e| e.key == key) {
            return false;
        }
        entries.push(TempShareInfo { key: key.to_string(), path: path.to_path_buf(), size });
        true
    }

    /// Drop the entry for `(key, tth)`, if any.
    pub fn remove(&self, key: &str, tth: &Tth) {
        let emptied = match self.map.get_mut(tth) {
            Some(mut entries) => {
                entries.retain(|e| e.key != key);
                entries.is_empty()
            }
            None => false,
        };
        if emptied {
            self.map.remove_if(tth, |_, v| v.is_empty());
        }
    }

    /// Entry for `(key, tth)`, cloned out of the lock.
    pub fn find(&self, key: &str, tth: &Tth) -> Option<TempShareInfo> {
        self.map.get(tth).and_then(|entries| entries.iter().find(|e| e.key == key).cloned())
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Snapshot of every entry, for diagnostics.
    pub fn entries(&self) -> Vec<(Tth, TempShareInfo)> {
        self.map
            .iter()
            .flat_map(|kv| kv.value().iter().map(|e| (*kv.key(), e.clone())).collect::<Vec<_>>())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tth(b: u8) -> Tth {
        Tth([b; 24])
    }

    #[test]
    fn add_find_remove() {
        let table = TempShareTable::default();
        assert!(table.add("cid-1", tth(1), Path::new("/tmp/a.bin"), 42));
        assert!(!table.add("cid-1", tth(1), Path::new("/tmp/a.bin"), 42));
        assert!(table.add("cid-2", tth(1), Path::new("/tmp/b.bin"), 43));

        let hit = table.find("cid-1", &tth(1)).unwrap();
        assert_eq!(hit.path, PathBuf::from("/tmp/a.bin"));
        assert!(table.find("cid-3", &tth(1)).is_none());

        table.remove("cid-1", &tth(1));
        assert!(table.find("cid-1", &tth(1)).is_none());
        table.remove("cid-2", &tth(1));
        assert!(table.is_empty());
    }
}
