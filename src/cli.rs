//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use mirror_core::PaperId;

/// Maintain a local arXiv mirror.
///
/// Harvests metadata over OAI-PMH, downloads PDFs and source archives, and
/// builds a citation graph from the downloaded bibliographies.
#[derive(Parser, Debug)]
#[command(name = "arxiv-mirror")]
#[command(author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/arxiv-mirror/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Mirror directory holding index.db, pdf/ and src/
    #[arg(long, global = true, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// OAI-PMH endpoint
    #[arg(long, global = true, value_name = "URL")]
    pub oai_url: Option<String>,

    /// Base URL for /pdf/ and /e-print/ downloads
    #[arg(long, global = true, value_name = "URL")]
    pub artifact_url: Option<String>,

    /// Minimum delay between remote requests in milliseconds (max 60000)
    #[arg(short = 'l', long = "rate-limit", global = true, value_name = "MS",
          value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub rate_limit_ms: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Harvest metadata, resuming an interrupted run
    Sync(SyncArgs),
    /// Download missing PDFs and source archives
    Download(DownloadArgs),
    /// Fetch metadata (and artifacts) for specific papers
    Fetch(FetchArgs),
    /// Show one paper
    Show(PaperArg),
    /// List the papers a paper cites
    Refs(PaperArg),
    /// List the papers citing a paper
    CitedBy(CitedByArgs),
    /// Show the citation neighbourhood of a paper
    Graph(PaperArg),
    /// List categories with paper counts
    Categories,
    /// Show mirror-wide counters
    Stats,
    /// Keyword search over titles and abstracts
    Search(SearchArgs),
    /// Rebuild the citation edges of one paper from its source
    Citations(PaperArg),
    /// Repopulate the full-text index
    RebuildFts,
    /// Rebuild citation edges for every paper with a source
    RebuildCitations(RebuildCitationsArgs),
    /// Clear artifact flags whose files are missing or empty
    Verify,
}

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    /// OAI set, e.g. cs or physics:hep-th
    #[arg(long)]
    pub set: Option<String>,

    /// Only records changed on or after this date (YYYY-MM-DD)
    #[arg(long)]
    pub from: Option<NaiveDate>,

    /// Only records changed on or before this date (YYYY-MM-DD)
    #[arg(long)]
    pub until: Option<NaiveDate>,

    /// Records per committed batch
    #[arg(short = 'b', long, value_parser = clap::value_parser!(u64).range(1..=100_000))]
    pub batch_size: Option<u64>,

    /// Discard a pending resumption token and start over
    #[arg(long)]
    pub restart: bool,

    /// Maximum attempts per page (1-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub max_retries: Option<u32>,
}

#[derive(Args, Debug, Clone)]
pub struct DownloadArgs {
    /// Paper IDs to download
    #[arg(value_parser = parse_paper_id, required_unless_present = "category", conflicts_with = "category")]
    pub ids: Vec<PaperId>,

    /// Download every paper in a category (or archive, e.g. cs)
    #[arg(long)]
    pub category: Option<String>,

    /// Maximum concurrent downloads (1-100)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u16).range(1..=100))]
    pub concurrency: Option<u16>,

    /// Maximum attempts per artifact (1-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u32).range(1..=10))]
    pub max_retries: Option<u32>,

    /// Skip PDFs
    #[arg(long)]
    pub no_pdf: bool,

    /// Skip source archives
    #[arg(long)]
    pub no_source: bool,
}

#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
    /// Paper IDs to fetch
    #[arg(value_parser = parse_paper_id, required = true)]
    pub ids: Vec<PaperId>,

    /// Also download the PDF
    #[arg(long)]
    pub pdf: bool,

    /// Skip the source archive
    #[arg(long)]
    pub no_source: bool,

    /// Fetch metadata only
    #[arg(long, conflicts_with_all = ["pdf", "no_source"])]
    pub metadata_only: bool,
}

#[derive(Args, Debug, Clone)]
pub struct PaperArg {
    /// Paper ID, e.g. 2401.00001 or hep-th/9901001
    #[arg(value_parser = parse_paper_id)]
    pub id: PaperId,
}

#[derive(Args, Debug, Clone)]
pub struct CitedByArgs {
    #[arg(value_parser = parse_paper_id)]
    pub id: PaperId,

    /// Maximum number of citers to list
    #[arg(short = 'n', long)]
    pub limit: Option<u32>,
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    /// Search terms
    #[arg(required = true)]
    pub query: Vec<String>,

    /// Restrict to a category (or archive)
    #[arg(long)]
    pub category: Option<String>,

    /// Maximum number of results
    #[arg(short = 'n', long, default_value_t = mirror_core::mirror::DEFAULT_SEARCH_LIMIT)]
    pub limit: u32,
}

#[derive(Args, Debug, Clone)]
pub struct RebuildCitationsArgs {
    /// Drop every edge first
    #[arg(long)]
    pub clean: bool,
}

fn parse_paper_id(raw: &str) -> Result<PaperId, String> {
    PaperId::parse(raw).map_err(|e| e.to_string())
}
