//! hubshare: in-memory, TTH-addressed share index for peer-to-peer hub
//! clients.
//!
//! The crate walks configured root directories into a catalog of
//! directories and files keyed by Tiger Tree Hash, then serves three
//! concurrent workloads against it: peer searches (legacy and ADC
//! dialects), per-hub XML file listings (full, partial, and TTH variants),
//! and virtual-path/TTH resolution for upload serving. A single
//! reader-writer lock guards the catalog; the refresh pipeline scans
//! lock-free and swaps whole roots in under the exclusive lock, so readers
//! always observe either the pre-swap or post-swap state.
//!
//! [`manager::ShareManager`] is the entry point; construct one with a
//! [`config::ShareConfig`] and a [`hasher::Hasher`] implementation, call
//! [`manager::ShareManager::startup`], and go.

pub mod bloom;
pub mod cache;
pub mod config;
pub mod error;
pub mod hasher;
pub mod index;
pub mod listing;
pub mod manager;
pub mod refresh;
pub mod resolve;
pub mod search;
pub mod tempshare;
pub mod tree;
pub mod types;

pub use config::{RootSpec, ShareConfig};
pub use error::{ShareError, ShareResult};
pub use hasher::Hasher;
pub use listing::FileList;
pub use manager::{RefreshSummary, ShareListener, ShareManager, ShareSubscription};
pub use search::{AdcQuery, LegacyQuery};
pub use tempshare::TempShareInfo;
pub use types::{
    FileCategory, Peer, RefreshKind, SearchResultItem, Tth, REFRESH_ALL, REFRESH_BLOCKING,
    REFRESH_DIRECTORY, REFRESH_INCOMING, REFRESH_UPDATE,
};
