//! hubshare binary: thin CLI shell over the [`hubshare`] library crate.
//!
//! Exists to exercise the index end-to-end without a hub connection: scan
//! roots, run one-shot searches, generate listings, resolve virtual paths.

use clap::{Parser, Subcommand};
use hubshare::{
    FileCategory, Hasher, LegacyQuery, Peer, RootSpec, ShareConfig, ShareManager, Tth,
};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tiger::{Digest, Tiger};
use tracing::{error, info};

// ---------------------------------------------------------------------------
// Tiger Tree hashing service
// ---------------------------------------------------------------------------

/// THEX block size.
const LEAF_BLOCK: usize = 1024;

/// The hashing service the library delegates to: Tiger Tree (THEX) with
/// 1 KiB leaves, `0x00`-prefixed leaf hashes and `0x01`-prefixed internal
/// nodes, odd nodes promoted unchanged.
struct TigerTreeHasher;

fn leaf_hash(block: &[u8]) -> [u8; 24] {
    let mut h = Tiger::new();
    h.update([0u8]);
    h.update(block);
    h.finalize().into()
}

fn node_hash(left: &[u8; 24], right: &[u8; 24]) -> [u8; 24] {
    let mut h = Tiger::new();
    h.update([1u8]);
    h.update(left);
    h.update(right);
    h.finalize().into()
}

fn tree_root(mut level: Vec<[u8; 24]>) -> [u8; 24] {
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| if pair.len() == 2 { node_hash(&pair[0], &pair[1]) } else { pair[0] })
            .collect();
    }
    level[0]
}

impl Hasher for TigerTreeHasher {
    fn digest_file(&self, path: &std::path::Path) -> std::io::Result<Tth> {
        let mut file = std::fs::File::open(path)?;
        let mut leaves = Vec::new();
        let mut buf = [0u8; LEAF_BLOCK];
        loop {
            let mut filled = 0;
            while filled < LEAF_BLOCK {
                let n = file.read(&mut buf[filled..])?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == 0 {
                break;
            }
            leaves.push(leaf_hash(&buf[..filled]));
            if filled < LEAF_BLOCK {
                break;
            }
        }
        if leaves.is_empty() {
            leaves.push(leaf_hash(&[]));
        }
        Ok(Tth(tree_root(leaves)))
    }

    fn digest_bytes(&self, bytes: &[u8]) -> Tth {
        let mut leaves: Vec<[u8; 24]> = bytes.chunks(LEAF_BLOCK).map(leaf_hash).collect();
        if leaves.is_empty() {
            leaves.push(leaf_hash(&[]));
        }
        Tth(tree_root(leaves))
    }
}

// ---------------------------------------------------------------------------
// CLI definition (clap derive)
// ---------------------------------------------------------------------------

/// Share indexer for peer-to-peer hub clients: scan, search, list, resolve.
#[derive(Parser)]
#[command(name = "hubshare", version, about, long_about = None)]
struct Cli {
    /// Shared root (repeatable, format: NAME=PATH)
    #[arg(long = "root", value_name = "NAME=PATH")]
    roots: Vec<String>,

    /// Load the share definition from a TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for the share cache and listing artifacts
    #[arg(long, default_value = ".")]
    cache_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index the configured roots and print share statistics
    Scan,
    /// Run a one-shot legacy search against the index
    Search {
        /// Query terms
        query: String,
        /// Restrict to a category: audio, video, picture, document,
        /// compressed, executable, directory
        #[arg(long)]
        category: Option<String>,
        /// Result cap
        #[arg(long, default_value_t = 25)]
        max: usize,
    },
    /// Generate the full file listing and print the artifact path
    List {
        /// Generate the listing for a specific hub URL
        #[arg(long)]
        hub: Option<String>,
    },
    /// Resolve a virtual path or TTH/<base32> to the on-disk path
    Resolve {
        /// ADC-style virtual path or TTH shorthand
        path: String,
    },
}

fn parse_category(raw: &str) -> Option<FileCategory> {
    match raw.to_ascii_lowercase().as_str() {
        "any" => Some(FileCategory::Any),
        "audio" => Some(FileCategory::Audio),
        "video" => Some(FileCategory::Video),
        "picture" => Some(FileCategory::Picture),
        "document" => Some(FileCategory::Document),
        "compressed" => Some(FileCategory::Compressed),
        "executable" => Some(FileCategory::Executable),
        "directory" => Some(FileCategory::Directory),
        _ => None,
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hubshare=info".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match ShareConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!(path = %path.display(), error = %e, "could not load config");
                std::process::exit(1);
            }
        },
        None => ShareConfig::default(),
    };
    config.cache_dir = cli.cache_dir.clone();

    for spec in &cli.roots {
        let Some((name, path)) = spec.split_once('=') else {
            error!(spec = spec.as_str(), "invalid --root format, expected NAME=PATH");
            std::process::exit(1);
        };
        let path = PathBuf::from(path).canonicalize().unwrap_or_else(|e| {
            error!(root = name, path = path, error = %e, "root path not found");
            std::process::exit(1);
        });
        config.roots.push(RootSpec {
            path,
            virtual_name: name.to_string(),
            excluded_hubs: Vec::new(),
            incoming: false,
        });
    }

    if config.roots.is_empty() {
        error!("no roots configured; pass --root NAME=PATH or --config");
        std::process::exit(1);
    }

    let manager = ShareManager::new(config, Arc::new(TigerTreeHasher));
    if let Err(e) = manager.startup() {
        error!(error = %e, "startup failed");
        std::process::exit(1);
    }
    manager.wait_for_hashing();
    info!(
        files = manager.shared_file_count(),
        bytes = manager.share_size(None),
        "index ready"
    );

    match cli.command {
        Commands::Scan => {
            println!("{}", manager.bloom_stats());
            for (name, paths) in manager.grouped_directories() {
                for path in paths {
                    println!("{name}\t{}", path.display());
                }
            }
            if let Err(e) = manager.save_cache_blocking() {
                error!(error = %e, "cache save failed");
            }
        }
        Commands::Search { query, category, max } => {
            let category = match category.as_deref() {
                Some(raw) => parse_category(raw).unwrap_or_else(|| {
                    error!(category = raw, "unknown category");
                    std::process::exit(1);
                }),
                None => FileCategory::Any,
            };
            let results =
                manager.search(&LegacyQuery::new(query, category, max), &Peer::default());
            for hit in &results {
                println!("{}", serde_json::to_string(hit).expect("serializable result"));
            }
            info!(hits = results.len(), "search done");
        }
        Commands::List { hub } => match manager.generate_own_list(hub.as_deref().unwrap_or("")) {
            Ok(path) => println!("{}", path.display()),
            Err(e) => {
                error!(error = %e, "listing failed");
                std::process::exit(1);
            }
        },
        Commands::Resolve { path } => {
            match manager.to_real_with_size(&path, true, &Peer::default(), "") {
                Ok((real, size)) => println!("{}\t{size}", real.display()),
                Err(e) => {
                    error!(error = %e, "resolve failed");
                    std::process::exit(1);
                }
            }
        }
    }

    manager.shutdown();
}
