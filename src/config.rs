//! Share configuration: the root list and its adjacent policy knobs.
//!
//! Construction in code is the primary interface; the TOML loader exists for
//! the CLI and for tools that keep the share definition on disk.

use crate::error::{ShareError, ShareResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// One configured share root.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RootSpec {
    /// Absolute on-disk path of the shared directory.
    pub path: PathBuf,
    /// Label exposed to peers. Several roots may use the same name.
    #[serde(rename = "virtual")]
    pub virtual_name: String,
    /// Hub URLs that must not see this root.
    #[serde(default)]
    pub excluded_hubs: Vec<String>,
    /// Hot path refreshed on the incoming schedule.
    #[serde(default)]
    pub incoming: bool,
}

/// Full share configuration.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct ShareConfig {
    #[serde(default)]
    pub roots: Vec<RootSpec>,
    /// Subpaths skipped while indexing. Exclusion by hub is NOT applied
    /// here; one catalog serves every hub; hubs are filtered at query time.
    #[serde(default)]
    pub excluded_paths: Vec<PathBuf>,
    /// Regex identifying release directory names.
    #[serde(default)]
    pub release_pattern: Option<String>,
    /// Directory holding the share cache and listing artifacts.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Local client identity embedded in generated listings.
    #[serde(default)]
    pub cid: String,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".")
}

impl ShareConfig {
    pub fn load(path: &Path) -> ShareResult<Self> {
        let raw = fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| ShareError::Corrupt(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> ShareResult<()> {
        let raw = toml::to_string_pretty(self).map_err(|e| ShareError::Corrupt(e.to_string()))?;
        fs::write(path, raw)?;
        Ok(())
    }

    pub fn root_for(&self, path: &Path) -> Option<&RootSpec> {
        self.roots.iter().find(|r| r.path == path)
    }

    pub fn cache_file(&self) -> PathBuf {
        self.cache_dir.join("share_cache.xml")
    }
}
