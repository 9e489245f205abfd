//! Test harness: builds a `ShareManager` over a tempdir fixture tree with a
//! deterministic mock hashing service, so refreshes are reproducible and
//! content → TTH is predictable from the test side.
#![allow(dead_code)]

use hubshare::{Hasher, RootSpec, ShareConfig, ShareManager, Tth};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Mock hashing service
// ---------------------------------------------------------------------------

/// Content-addressed stand-in for the Tiger Tree service: FNV-1a streams
/// expanded over 24 bytes. Deterministic, so tests can predict a file's TTH
/// from its contents.
pub struct MockHasher;

fn fnv1a(seed: u64, bytes: &[u8]) -> u64 {
    let mut h = seed ^ 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        h ^= u64::from(b);
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    h
}

impl Hasher for MockHasher {
    fn digest_file(&self, path: &Path) -> io::Result<Tth> {
        Ok(self.digest_bytes(&fs::read(path)?))
    }

    fn digest_bytes(&self, bytes: &[u8]) -> Tth {
        let mut out = [0u8; 24];
        for (i, chunk) in out.chunks_mut(8).enumerate() {
            chunk.copy_from_slice(&fnv1a(i as u64, bytes).to_le_bytes());
        }
        Tth(out)
    }
}

/// The TTH `MockHasher` assigns to these contents.
pub fn content_tth(bytes: &[u8]) -> Tth {
    MockHasher.digest_bytes(bytes)
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct HarnessBuilder {
    dir: TempDir,
    config: ShareConfig,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let cache_dir = dir.path().join("cache");
        fs::create_dir(&cache_dir).expect("cache dir");
        let config = ShareConfig { cache_dir, cid: "TESTCID".into(), ..ShareConfig::default() };
        Self { dir, config }
    }

    /// Share `subdir` (created under the tempdir) as `virtual_name`.
    pub fn root(self, virtual_name: &str, subdir: &str) -> Self {
        self.root_excluding(virtual_name, subdir, &[])
    }

    /// Same, with a per-root excluded hub set.
    pub fn root_excluding(mut self, virtual_name: &str, subdir: &str, hubs: &[&str]) -> Self {
        let path = self.dir.path().join(subdir);
        fs::create_dir_all(&path).expect("root dir");
        self.config.roots.push(RootSpec {
            path,
            virtual_name: virtual_name.to_string(),
            excluded_hubs: hubs.iter().map(|h| h.to_string()).collect(),
            incoming: false,
        });
        self
    }

    pub fn release_pattern(mut self, pattern: &str) -> Self {
        self.config.release_pattern = Some(pattern.to_string());
        self
    }

    /// Create a fixture file (parents included) before startup.
    pub fn file(self, rel: &str, contents: &[u8]) -> Self {
        let path = self.dir.path().join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("parents");
        fs::write(path, contents).expect("fixture file");
        self
    }

    /// Build the manager, run the startup refresh, and drain the hasher.
    pub fn start(self) -> TestHarness {
        let manager = ShareManager::new(self.config.clone(), Arc::new(MockHasher));
        manager.startup().expect("startup");
        manager.wait_for_hashing();
        TestHarness { manager, config: self.config, dir: self.dir }
    }

    /// Build the manager without scanning anything.
    pub fn build_cold(self) -> TestHarness {
        let manager = ShareManager::new(self.config.clone(), Arc::new(MockHasher));
        TestHarness { manager, config: self.config, dir: self.dir }
    }
}

pub struct TestHarness {
    pub manager: Arc<ShareManager>,
    pub config: ShareConfig,
    dir: TempDir,
}

impl TestHarness {
    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    /// Write (or overwrite) a file under the tempdir.
    pub fn write(&self, rel: &str, contents: &[u8]) {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("parents");
        fs::write(path, contents).expect("write");
    }

    /// Full blocking refresh plus hasher drain.
    pub fn refresh(&self) {
        use hubshare::{RefreshKind, REFRESH_ALL, REFRESH_BLOCKING};
        assert_eq!(self.manager.refresh(REFRESH_ALL | REFRESH_BLOCKING), RefreshKind::Started);
        self.manager.wait_for_hashing();
    }

    /// A second manager over the same config, as after a process restart.
    pub fn reopen(&self) -> Arc<ShareManager> {
        let manager = ShareManager::new(self.config.clone(), Arc::new(MockHasher));
        manager.startup().expect("startup");
        manager
    }
}
