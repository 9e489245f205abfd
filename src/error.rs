//! Error taxonomy for the share index.
//!
//! Query-path errors surface to the caller without touching the catalog;
//! refresh-path I/O errors are logged and skipped so one unreadable subtree
//! never aborts a whole refresh.

use std::path::PathBuf;
use thiserror::Error;

pub type ShareResult<T> = Result<T, ShareError>;

#[derive(Debug, Error)]
pub enum ShareError {
    /// `add_directory` with a virtual name already mapped to a different root
    /// set, or a real path already shared.
    #[error("virtual name '{0}' conflicts with an existing share")]
    DuplicateVirtualName(String),

    /// A case-folded sibling with this name already exists in the directory.
    #[error("duplicate name '{0}' in directory")]
    DuplicateName(String),

    /// `remove_directory`/`refresh_path` on a path no configured root covers.
    #[error("path is not a shared root: {0}")]
    PathNotFound(PathBuf),

    /// The requested virtual file or TTH is not in the catalog.
    #[error("file is not shared: {0}")]
    NotShared(String),

    /// Resolved, but the peer's hub is excluded from the owning root.
    #[error("share root is excluded for hub {0}")]
    ExcludedByHub(String),

    /// The peer is not in any sharing group.
    #[error("peer has no access to the share")]
    NoAccess,

    /// The file is known but its TTH has not been computed yet.
    #[error("file is still being hashed: {0}")]
    HashInProgress(PathBuf),

    /// A refresh is already in flight.
    #[error("refresh already in progress")]
    RefreshBusy,

    /// Malformed virtual or ADC path.
    #[error("invalid virtual path: {0}")]
    InvalidPath(String),

    /// Text that does not parse as a 39-character base32 TTH.
    #[error("invalid TTH: {0}")]
    InvalidTth(String),

    /// Unreadable or structurally invalid persisted cache. Startup treats
    /// this as "no cache" and forces a full refresh.
    #[error("corrupt share cache: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
