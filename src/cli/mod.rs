pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "pagewatch")]
#[command(about = "Watch web pages and relay their new files", long_about = None)]
pub struct Cli {
    /// Number of pages checked concurrently (overrides the config file)
    #[arg(short, long, global = true)]
    pub workers: Option<usize>,

    /// Config file (default: ~/.config/pagewatch/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database file (default: <data dir>/pagewatch/pagewatch.db)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start tracking a page and take its first snapshot
    Track {
        user: i64,
        url: String,
        /// Display name used in captions
        #[arg(short, long)]
        name: Option<String>,
        /// Only check during the configured daytime window
        #[arg(long)]
        night_mode: bool,
    },
    /// Stop tracking a page
    Untrack {
        user: i64,
        url: String,
        /// Also delete the page's archives and statistics
        #[arg(long)]
        purge: bool,
    },
    /// List a user's tracked pages
    List { user: i64 },
    /// Show the resources found on a tracked page at its last check
    Resources { user: i64, url: String },
    /// Turn night mode on or off for a tracked page
    NightMode {
        user: i64,
        url: String,
        state: Toggle,
    },
    /// Check every tracked page once
    Check,
    /// Show a user's statistics
    Stats { user: i64 },
    /// Show archived snapshots of a tracked page, newest first
    Archives {
        user: i64,
        url: String,
        /// Maximum number of entries shown
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Delete archives past the retention window
    Sweep,
    /// Download one URL now and send it to a user
    Download { user: i64, url: String },
    /// Export a user's pages, statistics and archives
    Export {
        user: i64,
        /// json or csv
        #[arg(short, long, default_value = "json")]
        format: String,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show or change a user's notification settings
    Settings {
        user: i64,
        /// Message format: text or html
        #[arg(long)]
        format: Option<String>,
        /// Only deliver these extensions
        #[arg(long, value_delimiter = ',')]
        allow: Vec<String>,
        /// Never deliver these extensions
        #[arg(long, value_delimiter = ',')]
        deny: Vec<String>,
        /// Only deliver these kinds (document, image, audio, video)
        #[arg(long, value_delimiter = ',')]
        kind: Vec<String>,
        /// Only deliver resources whose URL contains one of these words
        #[arg(long, value_delimiter = ',')]
        keyword: Vec<String>,
        /// Skip files larger than this many bytes
        #[arg(long)]
        max_size: Option<u64>,
        /// Remove all filter rules
        #[arg(long)]
        clear: bool,
    },
    /// Background daemon for periodic checks
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    pub fn enabled(self) -> bool {
        self == Toggle::On
    }
}

#[derive(Subcommand)]
pub enum DaemonAction {
    /// Start the daemon in the foreground
    Start {
        /// Scan interval (e.g., "30m", "1h"); defaults to the config file
        #[arg(short, long)]
        interval: Option<String>,

        /// Skip the scan on start
        #[arg(long)]
        no_initial_check: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Check daemon status
    Status,
}
