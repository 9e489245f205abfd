use crate::error::ShareError;
use data_encoding::BASE32_NOPAD;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Width of a Tiger Tree root in bytes (192 bits).
pub const TTH_BYTES: usize = 24;

/// Length of the base32 text form of a TTH.
pub const TTH_BASE32_LEN: usize = 39;

/// Freshness window for cached file listings; regeneration inside the window
/// is skipped unless forced.
pub const XML_LIST_GUARD_SECS: u64 = 15 * 60;

/// Minimum gap between background share-cache saves.
pub const CACHE_SAVE_GUARD_SECS: u64 = 15 * 60;

/// Generator identity embedded in produced file listings.
pub const LIST_GENERATOR: &str = concat!("hubshare ", env!("CARGO_PKG_VERSION"));

/// Seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tiger Tree Hash root
// ---------------------------------------------------------------------------

/// A Tiger Tree Hash root: the network-wide content identity of a file.
///
/// Rendered as 39 characters of unpadded base32 (`Display`/`FromStr`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tth(pub [u8; TTH_BYTES]);

impl Tth {
    pub fn as_bytes(&self) -> &[u8; TTH_BYTES] {
        &self.0
    }

    pub fn to_base32(self) -> String {
        BASE32_NOPAD.encode(&self.0)
    }
}

impl fmt::Display for Tth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base32())
    }
}

impl fmt::Debug for Tth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tth({})", self.to_base32())
    }
}

impl FromStr for Tth {
    type Err = ShareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != TTH_BASE32_LEN {
            return Err(ShareError::InvalidTth(s.to_string()));
        }
        let raw = BASE32_NOPAD
            .decode(s.to_ascii_uppercase().as_bytes())
            .map_err(|_| ShareError::InvalidTth(s.to_string()))?;
        let mut out = [0u8; TTH_BYTES];
        out.copy_from_slice(&raw);
        Ok(Tth(out))
    }
}

impl Serialize for Tth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base32())
    }
}

// ---------------------------------------------------------------------------
// File type categories
// ---------------------------------------------------------------------------

/// Search category a peer can restrict a query to.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub enum FileCategory {
    Any,
    Audio,
    Compressed,
    Document,
    Executable,
    Picture,
    Video,
    Directory,
    Tth,
}

impl FileCategory {
    /// Bit for this category in a directory's aggregated type mask.
    /// `Any`, `Directory`, and `Tth` carry no bit of their own.
    pub fn mask_bit(self) -> u32 {
        match self {
            FileCategory::Audio => 1 << 1,
            FileCategory::Compressed => 1 << 2,
            FileCategory::Document => 1 << 3,
            FileCategory::Executable => 1 << 4,
            FileCategory::Picture => 1 << 5,
            FileCategory::Video => 1 << 6,
            _ => 0,
        }
    }
}

const AUDIO_EXTS: &[&str] = &[
    "aac", "ac3", "aif", "aiff", "amr", "ape", "au", "cda", "dts", "flac", "gsm", "m4a", "mid",
    "midi", "mp1", "mp2", "mp3", "mpa", "mpc", "ogg", "ra", "snd", "voc", "wav", "wma",
];
const COMPRESSED_EXTS: &[&str] =
    &["7z", "ace", "arj", "bz2", "gz", "lha", "lzh", "rar", "tar", "tz", "z", "zip"];
const DOCUMENT_EXTS: &[&str] = &[
    "doc", "docx", "htm", "html", "nfo", "odp", "ods", "odt", "pdf", "ppt", "pptx", "rtf", "txt",
    "xls", "xlsx", "xml", "xps",
];
const EXECUTABLE_EXTS: &[&str] =
    &["app", "bat", "cmd", "com", "dll", "exe", "jar", "msi", "ps1", "vbs", "wsf"];
const PICTURE_EXTS: &[&str] = &[
    "ai", "bmp", "cdr", "emf", "eps", "gif", "ico", "img", "jpeg", "jpg", "png", "ps", "psd",
    "sgi", "tga", "tif", "webp", "wmf",
];
const VIDEO_EXTS: &[&str] = &[
    "3gp", "asf", "asx", "avi", "divx", "flv", "m4v", "mkv", "mov", "mp4", "mpeg", "mpg", "ogm",
    "qt", "rm", "rmvb", "vob", "webm", "wmv",
];

/// Classify a file name into a search category by its extension.
pub fn category_of(name: &str) -> FileCategory {
    let ext = match name.rsplit_once('.') {
        Some((_, e)) => e.to_ascii_lowercase(),
        None => return FileCategory::Any,
    };
    let ext = ext.as_str();
    if AUDIO_EXTS.contains(&ext) {
        FileCategory::Audio
    } else if VIDEO_EXTS.contains(&ext) {
        FileCategory::Video
    } else if PICTURE_EXTS.contains(&ext) {
        FileCategory::Picture
    } else if COMPRESSED_EXTS.contains(&ext) {
        FileCategory::Compressed
    } else if DOCUMENT_EXTS.contains(&ext) {
        FileCategory::Document
    } else if EXECUTABLE_EXTS.contains(&ext) {
        FileCategory::Executable
    } else {
        FileCategory::Any
    }
}

/// Does `name` fall into `category`? `Any` accepts everything; `Directory`
/// and `Tth` never match a plain file name.
pub fn check_type(name: &str, category: FileCategory) -> bool {
    match category {
        FileCategory::Any => true,
        FileCategory::Directory | FileCategory::Tth => false,
        other => category_of(name) == other,
    }
}

// ---------------------------------------------------------------------------
// Peer context
// ---------------------------------------------------------------------------

/// The remote peer a search or upload request originates from, as supplied
/// by the hub/client registry.
#[derive(Clone, Debug, Default)]
pub struct Peer {
    /// Client identifier (CID) of the peer.
    pub cid: String,
    /// URL of the hub the request arrived through. Empty for hubless flows.
    pub hub_url: String,
}

impl Peer {
    pub fn new(cid: impl Into<String>, hub_url: impl Into<String>) -> Self {
        Self { cid: cid.into(), hub_url: hub_url.into() }
    }
}

/// Reduce a hub URL to the key used for per-hub file lists and artifact
/// names: protocol prefix dropped, separators flattened.
pub fn strip_hub_url(url: &str) -> String {
    let trimmed = url
        .trim()
        .trim_start_matches("adcs://")
        .trim_start_matches("adc://")
        .trim_start_matches("nmdcs://")
        .trim_start_matches("dchub://");
    trimmed
        .chars()
        .map(|c| if c == ':' || c == '/' || c == '\\' { '_' } else { c })
        .collect()
}

// ---------------------------------------------------------------------------
// Search results
// ---------------------------------------------------------------------------

/// A single search hit. Slot counts and hub identity are appended by the
/// transport layer, not here.
#[derive(Clone, Debug, Serialize)]
pub struct SearchResultItem {
    /// ADC-style virtual path (`/Virtual/sub/file.ext`, trailing `/` for
    /// directories).
    pub virtual_path: String,
    pub size: u64,
    pub tth: Option<Tth>,
    pub is_directory: bool,
}

// ---------------------------------------------------------------------------
// Refresh options and outcomes
// ---------------------------------------------------------------------------

/// Refresh every configured root.
pub const REFRESH_ALL: u32 = 0x01;
/// Refresh only the explicitly selected paths.
pub const REFRESH_DIRECTORY: u32 = 0x02;
/// Run the pipeline on the calling thread instead of a worker.
pub const REFRESH_BLOCKING: u32 = 0x04;
/// Skip roots whose on-disk state is unchanged since the last scan.
pub const REFRESH_UPDATE: u32 = 0x08;
/// Restrict the pass to roots marked as incoming hot paths.
pub const REFRESH_INCOMING: u32 = 0x10;

/// Outcome of a refresh request.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RefreshKind {
    /// The pipeline was started (or, for a blocking call, has completed).
    Started,
    /// No configured root matched the requested path.
    PathNotFound,
    /// A refresh is already running; the request was refused.
    InProgress,
}
