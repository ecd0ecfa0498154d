//! # pagewatch
//!
//! Watches web pages on behalf of chat users, reports content changes and
//! relays newly linked files.
//!
//! ## Architecture
//!
//! Every tracked page goes through the same check cycle:
//!
//! ```text
//! Fetcher → ChangeDetector → ResourceExtractor → ResourceFilter → DedupSet
//!         → DownloadOrchestrator → NotificationDispatcher → Store
//! ```
//!
//! with statistics recorded for every outcome and a snapshot archived for
//! every successful fetch.
//!
//! ## Quick Start
//!
//! ```bash
//! # Track a page for chat 42
//! pagewatch track 42 https://example.com/notices --name "Notices"
//!
//! # Check everything once
//! pagewatch check
//!
//! # Keep checking every 30 minutes
//! pagewatch daemon start
//! ```

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together the store,
/// fetcher, transport, downloaders and tracker.
pub mod app;

/// Retention-bounded content snapshots.
pub mod archive;

/// Command-line interface using clap.
pub mod cli;

/// Configuration loaded from `~/.config/pagewatch/config.toml`.
pub mod config;

/// Background daemon for periodic scans.
///
/// - `pagewatch daemon start` - Run the scan loop
/// - `pagewatch daemon stop` - Stop the daemon
/// - `pagewatch daemon status` - Check if daemon is running
pub mod daemon;

pub mod dedup;

/// Content hashing and line diffs.
pub mod detector;

/// Core domain models.
///
/// - [`TrackedTarget`](domain::TrackedTarget): a (user, URL) pair under watch
/// - [`ResourceCandidate`](domain::ResourceCandidate): a downloadable file found on a page
/// - [`StatRecord`](domain::StatRecord): per-page counters
pub mod domain;

/// Downloader chain, size limits and file splitting.
pub mod download;

/// JSON and CSV export of a user's data.
pub mod export;

/// Link discovery and file-type classification.
pub mod extractor;

/// HTTP fetching of tracked pages.
///
/// - [`Fetcher`](fetcher::Fetcher): Async trait for page fetching
/// - [`HttpFetcher`](fetcher::HttpFetcher): reqwest-based implementation
pub mod fetcher;

/// Per-user resource filters.
pub mod filter;

/// Outbound messages: chunking, captions, transports.
pub mod notify;

/// Counters and uptime.
pub mod stats;

/// SQLite persistence layer.
///
/// - [`Store`](store::Store): Trait defining storage operations
/// - [`SqliteStore`](store::SqliteStore): SQLite implementation
pub mod store;

/// The check cycle, leases, night mode and the worker-pool scan.
pub mod tracker;
