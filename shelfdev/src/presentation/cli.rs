use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "shelfdev: offline chapter cache diagnostics", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Cache directory (created on first use)
    #[arg(long, global = true, default_value = ".shelf")]
    pub root: PathBuf,

    /// 32-byte hex key to seal chapter bodies at rest (XChaCha20-Poly1305)
    #[arg(long = "key", global = true, conflicts_with = "passphrase")]
    pub key_hex: Option<String>,

    /// Derive the sealing key from a passphrase (Argon2id, salt kept in the cache root)
    #[arg(long, global = true)]
    pub passphrase: Option<String>,

    /// Storage quota in bytes; overrides shelf.json
    #[arg(long, global = true)]
    pub quota: Option<u64>,

    /// Payload codec: "store" or "zstd"; overrides shelf.json
    #[arg(long, global = true)]
    pub codec: Option<String>,

    /// Do not open the shell-asset precache
    #[arg(long, global = true)]
    pub no_precache: bool,

    /// Keep chapters in process memory only (quota acts as capacity)
    #[arg(long, global = true)]
    pub memory: bool,

    /// host:port whose reachability decides online/offline
    #[arg(long, global = true, default_value = "1.1.1.1:443")]
    pub reach: String,

    #[arg(long, global = true, default_value_t = 800)]
    pub reach_timeout_ms: u64,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Report which storage primitives are usable
    Probe,

    /// Store a chapter; content is read from --file or stdin
    Download {
        chapter_id: String,
        #[arg(long)]
        novel_id: u64,
        #[arg(long)]
        novel_title: String,
        #[arg(long = "number", default_value_t = 1)]
        chapter_number: u32,
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Print a downloaded chapter's content
    Cat { chapter_id: String },

    /// List downloaded chapters grouped by novel
    Ls {
        /// only this novel
        #[arg(long)]
        novel: Option<u64>,
        /// show size and download time
        #[arg(long)]
        long: bool,
    },

    /// Remove chapters (absent ids are fine)
    Rm {
        #[arg(required = true)]
        chapter_ids: Vec<String>,
    },

    /// Bytes used against the quota
    Usage,

    /// Catalog counters
    Stats,

    /// Compact the catalog journal and sweep orphaned blobs
    Compact,

    /// Download, read back and remove a fixed diagnostic chapter
    Selftest,

    /// Register a shell manifest, fetching its assets from a build directory
    Precache {
        manifest: PathBuf,
        /// directory the manifest's asset paths resolve against
        dist: PathBuf,
    },

    /// Report whether --reach is reachable, optionally watching for transitions
    Online {
        /// keep polling and print transitions for this many seconds
        #[arg(long)]
        watch: Option<u64>,
        #[arg(long, default_value_t = 5)]
        interval: u64,
    },
}
