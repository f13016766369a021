//! Command-line interface definitions for the crawler.
//!
//! All arguments can be provided via command-line flags; the API key can
//! also come from the environment.

use clap::Parser;

/// Command-line arguments for one crawler invocation.
///
/// # Examples
///
/// ```sh
/// # Crawl every enabled source
/// cardshow_crawler --all
///
/// # Crawl one source without persisting anything
/// cardshow_crawler --url https://example.com/shows --dry-run --verbose
///
/// # Register a new seed URL
/// cardshow_crawler --add-source https://example.com/shows --priority 80
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Crawl a single target URL
    #[arg(long, conflicts_with = "all")]
    pub url: Option<String>,

    /// Crawl all enabled sources in priority order
    #[arg(long)]
    pub all: bool,

    /// Run the full pipeline but persist nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Enable chunk-level debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Skip geocoding entirely for this run
    #[arg(long)]
    pub no_geocode: bool,

    /// Directory holding the source catalog and pending-show queue
    #[arg(short, long, default_value = "./data")]
    pub data_dir: String,

    /// Optional path to a TOML pipeline config file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Register a seed URL in the source catalog and exit
    #[arg(long, value_name = "URL")]
    pub add_source: Option<String>,

    /// Priority for --add-source (0-100)
    #[arg(long, default_value_t = 50)]
    pub priority: u8,

    /// Backfill missing coordinates on pending rows and exit
    #[arg(long)]
    pub backfill_geocode: bool,

    /// API key for the AI extraction endpoint
    #[arg(long, env = "CARDSHOW_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
}
