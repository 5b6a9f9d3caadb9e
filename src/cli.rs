//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Default output directory for artifacts, snapshots and the export.
pub const DEFAULT_OUTPUT_DIR: &str = "./torrents";

/// Crawl a saved-items listing and fetch each item's metadata and artifact.
///
/// Progress is stored next to the artifacts, so an interrupted run can be
/// resumed by running the same command again.
#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(author, version, about)]
pub struct Args {
    /// Netscape-format cookie file exported from a logged-in browser
    pub cookies_file: PathBuf,

    /// Output directory for artifacts, page snapshots and the export [default: ./torrents]
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Maximum number of items to process
    #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
    pub max: Option<u64>,

    /// Listing page to start from
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub start_page: u32,

    /// Visit at most this many listing pages
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_pages: Option<u32>,

    /// Only process the page given by --start-page
    #[arg(long)]
    pub only_page: bool,

    /// Process IDs already in the progress store without crawling the listing
    #[arg(long)]
    pub skip_discovery: bool,

    /// Collect metadata only; do not download artifacts
    #[arg(long)]
    pub metadata_only: bool,

    /// Site root URL (overrides `base_url` in the config file)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Progress database path [default: <output>/progress.db]
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Export document path [default: <output>/export.json]
    #[arg(long)]
    pub export: Option<PathBuf>,

    /// Config file path [default: $XDG_CONFIG_HOME/harvester/config.toml]
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}
